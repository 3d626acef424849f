use std::fs;

use attrkit::{EngineConfig, TypeRegistry, Value, DEFAULT_MAX_LAZY_DEPTH};

// Environment variables are process-wide, so every case that depends on them
// lives in this one test.
#[test]
fn test_config_layers() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("attrkit.toml");

    let written = EngineConfig {
        max_lazy_depth: 8,
        wrap_scalars: false,
        strict_fields: true,
    };
    fs::write(&path, toml::to_string(&written).unwrap()).unwrap();

    std::env::remove_var("ATTRKIT_MAX_LAZY_DEPTH");
    std::env::remove_var("ATTRKIT_WRAP_SCALARS");
    std::env::remove_var("ATTRKIT_STRICT_FIELDS");

    assert_eq!(EngineConfig::load(None).unwrap(), EngineConfig::default());
    assert_eq!(EngineConfig::load(Some(&path)).unwrap(), written);

    // Partial files fall back to compiled defaults.
    let partial = dir.path().join("partial.toml");
    fs::write(&partial, "strict_fields = false\n").unwrap();
    let loaded = EngineConfig::load(Some(&partial)).unwrap();
    assert!(!loaded.strict_fields);
    assert_eq!(loaded.max_lazy_depth, DEFAULT_MAX_LAZY_DEPTH);

    // The environment wins over the file.
    std::env::set_var("ATTRKIT_MAX_LAZY_DEPTH", "4");
    let loaded = EngineConfig::load(Some(&path)).unwrap();
    std::env::remove_var("ATTRKIT_MAX_LAZY_DEPTH");
    assert_eq!(loaded.max_lazy_depth, 4);
    assert!(!loaded.wrap_scalars);

    let registry = TypeRegistry::new(loaded);
    assert!(registry
        .resolve("list<integer>")
        .unwrap()
        .coerce(Value::Int(1))
        .is_err());
}

#[test]
fn test_malformed_file_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    fs::write(&path, "max_lazy_depth = \"deep\"\n").unwrap();
    let err = EngineConfig::load(Some(&path)).unwrap_err();
    assert!(matches!(err, attrkit::AttrError::Config(_)));
}
