use std::cell::Cell;
use std::rc::Rc;

use attrkit::{
    AttrError, FieldOptions, FnCoercer, LazyValue, Record, RecordType, Type, TypeRegistry,
    UsageError, Value,
};

/// An integer stored doubled and read back halved.
fn doubled(registry: &TypeRegistry) -> Rc<Type> {
    registry
        .resolve("integer")
        .unwrap()
        .specialize(|t| {
            Ok(t.named("doubled")
                .with_coercer(FnCoercer::infallible("double", |v| match v {
                    Value::Int(i) => Value::Int(i * 2),
                    other => other,
                }))
                .with_out_coercer(FnCoercer::infallible("halve", |v| match v {
                    Value::Int(i) => Value::Int(i / 2),
                    other => other,
                })))
        })
        .unwrap()
}

fn halved_list() -> Rc<RecordType> {
    let registry = TypeRegistry::default();
    registry
        .record("samples")
        .field(
            "values",
            registry.list(Some(doubled(&registry))),
            FieldOptions::new().with_default(Value::list(Vec::<Value>::new())),
        )
        .build()
        .unwrap()
}

#[test]
fn test_element_coercers_apply_both_ways() {
    let ty = halved_list();
    let first = Record::new(Rc::clone(&ty));
    let values = first.get("values").unwrap().into_list().unwrap();
    values.push(5).unwrap();

    assert_eq!(first.get_value("values").unwrap(), Value::list([5]));
    assert_eq!(first.raw_field("values").unwrap(), Some(Value::list([10])));

    let second = Record::new(ty);
    let view = second.get("values").unwrap().into_list().unwrap();
    assert!(!view.matches(&[Value::Int(5)]).unwrap());
    second.set("values", Value::list([5])).unwrap();
    assert!(view.matches(&[Value::Int(5)]).unwrap());
    assert!(first.eq_record(&second).unwrap());
}

#[test]
fn test_required_keys_report_only_what_is_missing() {
    let registry = TypeRegistry::default();
    let ty = registry
        .record("settings")
        .field(
            "limits",
            registry.resolve("map<string, integer>").unwrap(),
            FieldOptions::new().required_keys(["a", "b"]),
        )
        .build()
        .unwrap();
    let record = Record::new(ty);

    let err = record.set("limits", Value::map([("a", 1)])).unwrap_err();
    let failures = err.failures().unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].path, "limits");
    assert!(failures[0].message.contains('b'));
    assert!(!record.is_set("limits").unwrap());

    record.set("limits", Value::map([("a", 1), ("b", 2)])).unwrap();
    assert!(record.is_set("limits").unwrap());
}

#[test]
fn test_second_promotion_is_a_usage_error() {
    let registry = TypeRegistry::default();
    let ty = registry
        .record("queue")
        .field("jobs", registry.resolve("list<string>").unwrap(), FieldOptions::new())
        .build()
        .unwrap();
    let record = Record::new(ty);

    let left = record.get("jobs").unwrap().into_list().unwrap();
    let right = record.get("jobs").unwrap().into_list().unwrap();
    left.push("build").unwrap();

    let err = right.push("test").unwrap_err();
    assert!(matches!(
        err,
        AttrError::Usage(UsageError::PromotionRace { ref path }) if path == "jobs"
    ));
    assert_eq!(record.get_value("jobs").unwrap(), Value::list(["build"]));

    // A view taken after the promotion writes into the stored list.
    let late = record.get("jobs").unwrap().into_list().unwrap();
    late.push("test").unwrap();
    assert_eq!(record.get_value("jobs").unwrap(), Value::list(["build", "test"]));
}

#[test]
fn test_cached_and_uncached_lazy_defaults() {
    let registry = TypeRegistry::default();
    let string = registry.resolve("string").unwrap();
    let cached_calls = Rc::new(Cell::new(0));
    let uncached_calls = Rc::new(Cell::new(0));
    let (c, u) = (Rc::clone(&cached_calls), Rc::clone(&uncached_calls));

    let ty = registry
        .record("session")
        .field(
            "token",
            Rc::clone(&string),
            FieldOptions::new().lazy_default(move |_| {
                c.set(c.get() + 1);
                Ok(Value::from("abc"))
            }),
        )
        .field(
            "stamp",
            string,
            FieldOptions::new().uncached_default(move |_| {
                u.set(u.get() + 1);
                Ok(Value::from(format!("t{}", u.get())))
            }),
        )
        .build()
        .unwrap();
    let record = Record::new(ty);

    assert_eq!(record.get_value("token").unwrap(), Value::from("abc"));
    assert_eq!(record.get_value("token").unwrap(), Value::from("abc"));
    assert_eq!(cached_calls.get(), 1);
    assert!(record.is_set("token").unwrap());

    assert_eq!(record.get_value("stamp").unwrap(), Value::from("t1"));
    assert_eq!(record.get_value("stamp").unwrap(), Value::from("t2"));
    assert_eq!(uncached_calls.get(), 2);
    assert!(!record.is_set("stamp").unwrap());
}

#[test]
fn test_reset_restores_the_default() {
    let registry = TypeRegistry::default();
    let ty = registry
        .record("server")
        .field(
            "port",
            registry.resolve("integer").unwrap(),
            FieldOptions::new().with_default(8080),
        )
        .field(
            "hosts",
            registry.resolve("list<string>").unwrap(),
            FieldOptions::new().with_default(Value::list(["a"])),
        )
        .build()
        .unwrap();
    let record = Record::new(ty);

    record.set("port", 1).unwrap();
    assert_eq!(record.reset("port").unwrap(), Some(Value::Int(1)));
    assert_eq!(record.get_value("port").unwrap(), Value::Int(8080));
    assert!(!record.is_set("port").unwrap());

    let hosts = record.get("hosts").unwrap().into_list().unwrap();
    hosts.push("b").unwrap();
    assert_eq!(
        record.reset("hosts").unwrap(),
        Some(Value::list(["a", "b"]))
    );
    assert_eq!(record.get_value("hosts").unwrap(), Value::list(["a"]));
}

#[test]
fn test_reset_returns_the_output_value() {
    let registry = TypeRegistry::default();
    let ty = registry
        .record("gauge")
        .field("level", doubled(&registry), FieldOptions::new().with_default(4))
        .build()
        .unwrap();
    let record = Record::new(ty);
    assert_eq!(record.get_value("level").unwrap(), Value::Int(4));

    record.set("level", 3).unwrap();
    assert_eq!(record.raw_field("level").unwrap(), Some(Value::Int(6)));
    assert_eq!(record.reset("level").unwrap(), Some(Value::Int(3)));
    assert_eq!(record.get_value("level").unwrap(), Value::Int(4));
    assert!(!record.is_set("level").unwrap());
    assert_eq!(record.reset("level").unwrap(), None);
}

#[test]
fn test_equality_skips_defaults_unset_on_both_sides() {
    let registry = TypeRegistry::default();
    let calls = Rc::new(Cell::new(0));
    let seen = Rc::clone(&calls);
    let ty = registry
        .record("job")
        .field("name", registry.resolve("string").unwrap(), FieldOptions::new())
        .field(
            "owner",
            registry.resolve("string").unwrap(),
            FieldOptions::new().uncached_default(move |_| {
                seen.set(seen.get() + 1);
                Ok(Value::from("root"))
            }),
        )
        .build()
        .unwrap();

    let a = Record::new(Rc::clone(&ty));
    let b = Record::new(ty);
    a.set("name", "x").unwrap();
    b.set("name", "x").unwrap();
    assert!(a.eq_record(&b).unwrap());
    assert_eq!(calls.get(), 0);

    b.set("owner", "root").unwrap();
    assert!(a.eq_record(&b).unwrap());
    assert_eq!(calls.get(), 1);

    b.set("owner", "admin").unwrap();
    assert!(!a.eq_record(&b).unwrap());
}

#[test]
fn test_to_hash_with_defaults_does_not_set_fields() {
    let registry = TypeRegistry::default();
    let ty = registry
        .record("app")
        .field(
            "tags",
            registry.resolve("set<string>").unwrap(),
            FieldOptions::new().with_default(Value::set(["web"])),
        )
        .field(
            "token",
            registry.resolve("string").unwrap(),
            FieldOptions::new().lazy_default(|_| Ok(Value::from("t"))),
        )
        .build()
        .unwrap();
    let record = Record::new(ty);

    assert_eq!(
        record.to_hash(true).unwrap(),
        Value::map([("tags", Value::set(["web"])), ("token", Value::from("t"))])
    );
    assert!(!record.is_set("tags").unwrap());
    assert!(!record.is_set("token").unwrap());
    assert_eq!(record.to_hash(false).unwrap(), Value::Map(Default::default()));
}

#[test]
fn test_deferred_value_sees_the_record() {
    let registry = TypeRegistry::default();
    let ty = registry
        .record("paths")
        .field("root", registry.resolve("path").unwrap(), FieldOptions::new())
        .field("logs", registry.resolve("path").unwrap(), FieldOptions::new())
        .build()
        .unwrap();
    let record = Record::new(ty);
    record
        .set_deferred(
            "logs",
            LazyValue::new(|scope| {
                let root = scope.lookup("root")?;
                Ok(Value::from(format!("{}/logs", root.as_str().unwrap_or(""))))
            }),
        )
        .unwrap();
    record.set("root", "/srv").unwrap();
    assert_eq!(record.get_value("logs").unwrap(), Value::from("/srv/logs"));
}

#[test]
fn test_self_referencing_lazy_is_a_cycle() {
    let registry = TypeRegistry::default();
    let ty = registry
        .record("loop")
        .field(
            "a",
            registry.resolve("any").unwrap(),
            FieldOptions::new().uncached_default(|scope| scope.lookup("a")),
        )
        .build()
        .unwrap();
    let err = Record::new(ty).get_value("a").unwrap_err();
    assert!(matches!(
        err.as_usage(),
        Some(UsageError::LazyCycle) | Some(UsageError::LazyDepthExceeded(_))
    ));
}

#[test]
fn test_identity_round_trip() {
    let registry = TypeRegistry::default();
    let ty = registry
        .record("plain")
        .field("v", registry.resolve("any").unwrap(), FieldOptions::new())
        .build()
        .unwrap();
    let record = Record::new(ty);
    for value in [
        Value::Int(3),
        Value::from("s"),
        Value::Float(1.5),
        Value::list([Value::Bool(true), Value::Null]),
        Value::map([("k", Value::list([1, 2]))]),
    ] {
        record.set("v", value.clone()).unwrap();
        assert_eq!(record.get_value("v").unwrap(), value);
    }
}

#[test]
fn test_cached_lazy_default_is_per_record() {
    let registry = TypeRegistry::default();
    let string = registry.resolve("string").unwrap();
    let ty = registry
        .record("user")
        .field("name", Rc::clone(&string), FieldOptions::new())
        .field(
            "home",
            string,
            FieldOptions::new().lazy_default(|scope| {
                let name = scope.lookup("name")?;
                Ok(Value::from(format!("/home/{}", name.as_str().unwrap_or("nobody"))))
            }),
        )
        .build()
        .unwrap();

    let alice = Record::new(Rc::clone(&ty));
    alice.set("name", "alice").unwrap();
    let bob = Record::new(ty);
    bob.set("name", "bob").unwrap();

    assert_eq!(alice.get_value("home").unwrap(), Value::from("/home/alice"));
    assert_eq!(bob.get_value("home").unwrap(), Value::from("/home/bob"));

    // The first read stored the value, so later changes do not flow through.
    alice.set("name", "carol").unwrap();
    assert_eq!(alice.get_value("home").unwrap(), Value::from("/home/alice"));
}
