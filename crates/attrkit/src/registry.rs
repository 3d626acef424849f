//! Named types and type expressions.
//!
//! A [`TypeRegistry`] is the explicit context for building schemas. It holds
//! the [`EngineConfig`], the built-in scalar types and any types registered
//! by the caller, and resolves type expressions:
//!
//! ```text
//! string            a named type
//! list<integer>     list with an element type
//! set<string>       set with an item type
//! map<string, any>  map with key and value types
//! string?           nullable: null skips validation
//! ```
//!
//! Built-ins: `any`, `string`, `integer`, `float` (integers are widened),
//! `number`, `boolean`, `path`.

use std::collections::BTreeMap;
use std::rc::Rc;

use crate::coerce::FnCoercer;
use crate::config::EngineConfig;
use crate::error::{Result, UsageError};
use crate::record::{RecordType, RecordTypeBuilder};
use crate::types::Type;
use crate::validate::KindOf;
use crate::value::{Value, ValueKind};

pub struct TypeRegistry {
    config: EngineConfig,
    named: BTreeMap<String, Rc<Type>>,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl TypeRegistry {
    pub fn new(config: EngineConfig) -> Self {
        let mut registry = Self {
            config,
            named: BTreeMap::new(),
        };
        registry.register_builtins();
        registry
    }

    fn register_builtins(&mut self) {
        let kind = |name: &str, kinds: &[ValueKind]| {
            Type::scalar(name).with_validator(KindOf::new(kinds.iter().copied()))
        };
        self.register("any", Type::any());
        self.register("string", kind("string", &[ValueKind::Str]));
        self.register("integer", kind("integer", &[ValueKind::Int]));
        self.register(
            "float",
            kind("float", &[ValueKind::Int, ValueKind::Float]).with_coercer(
                FnCoercer::infallible("to_float", |v| match v {
                    Value::Int(i) => Value::Float(i as f64),
                    other => other,
                }),
            ),
        );
        self.register("number", kind("number", &[ValueKind::Int, ValueKind::Float]));
        self.register("boolean", kind("boolean", &[ValueKind::Bool]));
        self.register("path", kind("path", &[ValueKind::Str]));
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Register (or replace) a named type.
    pub fn register(&mut self, name: impl Into<String>, ty: Type) -> Rc<Type> {
        let ty = Rc::new(ty);
        self.named.insert(name.into(), Rc::clone(&ty));
        ty
    }

    /// Register a record type under its own name so expressions can refer to it.
    pub fn register_record(&mut self, record: Rc<RecordType>) -> Rc<Type> {
        let name = record.name().to_string();
        self.register(name, Type::record(record))
    }

    pub fn get(&self, name: &str) -> Option<Rc<Type>> {
        self.named.get(name).cloned()
    }

    /// Start a record type carrying this registry's configuration.
    pub fn record(&self, name: impl Into<String>) -> RecordTypeBuilder {
        RecordType::builder(name)
            .strict_fields(self.config.strict_fields)
            .max_lazy_depth(self.config.max_lazy_depth)
    }

    pub fn list(&self, element: Option<Rc<Type>>) -> Rc<Type> {
        Rc::new(Type::list(element).wrap_scalars(self.config.wrap_scalars))
    }

    pub fn set(&self, item: Option<Rc<Type>>) -> Rc<Type> {
        Rc::new(Type::set(item).wrap_scalars(self.config.wrap_scalars))
    }

    pub fn map(&self, key: Option<Rc<Type>>, value: Option<Rc<Type>>) -> Rc<Type> {
        Rc::new(Type::map(key, value))
    }

    /// Resolve a type expression such as `map<string, list<integer>>`.
    pub fn resolve(&self, expr: &str) -> Result<Rc<Type>> {
        let tokens = tokenize(expr)?;
        let mut parser = Parser {
            registry: self,
            expr,
            tokens: &tokens,
            pos: 0,
        };
        let ty = parser.parse_type()?;
        if parser.pos != tokens.len() {
            return Err(parser.invalid("unexpected trailing input"));
        }
        Ok(ty)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Open,
    Close,
    Comma,
    Question,
}

fn tokenize(expr: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = expr.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '<' | '>' | ',' | '?' => {
                chars.next();
                tokens.push(match c {
                    '<' => Token::Open,
                    '>' => Token::Close,
                    ',' => Token::Comma,
                    _ => Token::Question,
                });
            }
            c if c.is_alphanumeric() || c == '_' => {
                let mut ident = String::new();
                while let Some(&c) = chars.peek() {
                    if !(c.is_alphanumeric() || c == '_') {
                        break;
                    }
                    ident.push(c);
                    chars.next();
                }
                tokens.push(Token::Ident(ident));
            }
            other => {
                return Err(UsageError::InvalidTypeExpression {
                    expr: expr.to_string(),
                    reason: format!("unexpected character '{other}'"),
                }
                .into())
            }
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    registry: &'a TypeRegistry,
    expr: &'a str,
    tokens: &'a [Token],
    pos: usize,
}

impl Parser<'_> {
    fn invalid(&self, reason: &str) -> crate::error::AttrError {
        UsageError::InvalidTypeExpression {
            expr: self.expr.to_string(),
            reason: reason.to_string(),
        }
        .into()
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn expect(&mut self, token: Token, what: &str) -> Result<()> {
        if self.peek() == Some(&token) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.invalid(&format!("expected {what}")))
        }
    }

    fn parse_type(&mut self) -> Result<Rc<Type>> {
        let Some(Token::Ident(name)) = self.peek().cloned() else {
            return Err(self.invalid("expected a type name"));
        };
        self.pos += 1;

        let args = if self.peek() == Some(&Token::Open) {
            self.pos += 1;
            let mut args = vec![self.parse_type()?];
            while self.peek() == Some(&Token::Comma) {
                self.pos += 1;
                args.push(self.parse_type()?);
            }
            self.expect(Token::Close, "'>'")?;
            args
        } else {
            Vec::new()
        };

        let mut ty = self.build(&name, args)?;
        while self.peek() == Some(&Token::Question) {
            self.pos += 1;
            let nullable = format!("{}?", ty.name());
            ty = ty.specialize(|t| Ok(t.named(nullable).nullable()))?;
        }
        Ok(ty)
    }

    fn build(&self, name: &str, args: Vec<Rc<Type>>) -> Result<Rc<Type>> {
        let registry = self.registry;
        let mut args = args.into_iter();
        let ty = match (name, args.len()) {
            ("list", 0) => registry.list(None),
            ("list", 1) => registry.list(args.next()),
            ("set", 0) => registry.set(None),
            ("set", 1) => registry.set(args.next()),
            ("map", 0) => registry.map(None, None),
            ("map", 2) => {
                let key = args.next();
                registry.map(key, args.next())
            }
            ("list" | "set" | "map", n) => {
                return Err(self.invalid(&format!("{name} does not take {n} type arguments")))
            }
            (_, 0) => registry
                .get(name)
                .ok_or_else(|| UsageError::UnknownType(name.to_string()))?,
            (_, _) => return Err(self.invalid(&format!("{name} takes no type arguments"))),
        };
        Ok(ty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AttrError;
    use crate::lazy::NoScope;
    use crate::types::Kind;

    #[test]
    fn test_builtins() {
        let registry = TypeRegistry::default();
        let float = registry.resolve("float").unwrap();
        assert_eq!(float.coerce(Value::Int(2)).unwrap(), Value::Float(2.0));
        assert!(registry.resolve("integer").unwrap().coerce(Value::Float(1.0)).is_err());
        assert!(registry.resolve("boolean").unwrap().coerce(Value::Bool(true)).is_ok());
    }

    #[test]
    fn test_nested_expressions() {
        let registry = TypeRegistry::default();
        let ty = registry.resolve("map<string, list<integer>>").unwrap();
        assert_eq!(ty.name(), "map<string, list<integer>>");
        let Kind::Map { value: Some(value), .. } = ty.kind() else {
            panic!("expected a map type");
        };
        assert_eq!(value.name(), "list<integer>");
        assert!(ty
            .coerce(Value::map([("a", Value::list([Value::from("x")]))]))
            .is_err());
    }

    #[test]
    fn test_nullable_suffix() {
        let registry = TypeRegistry::default();
        let ty = registry.resolve("string?").unwrap();
        assert_eq!(ty.name(), "string?");
        assert_eq!(ty.coerce(Value::Null).unwrap(), Value::Null);
        assert!(ty.coerce(Value::Int(1)).is_err());
        assert!(ty.is_refinement_of(&registry.get("string").unwrap()));
    }

    #[test]
    fn test_unknown_and_malformed_expressions() {
        let registry = TypeRegistry::default();
        assert!(matches!(
            registry.resolve("widget").unwrap_err(),
            AttrError::Usage(UsageError::UnknownType(ref name)) if name == "widget"
        ));
        for expr in ["list<", "map<string>", "string<integer>", "list<integer>>", "", "a-b"] {
            assert!(
                matches!(
                    registry.resolve(expr).unwrap_err(),
                    AttrError::Usage(UsageError::InvalidTypeExpression { .. })
                ),
                "{expr} should be rejected"
            );
        }
    }

    #[test]
    fn test_config_flows_into_built_types() {
        let registry = TypeRegistry::new(EngineConfig {
            wrap_scalars: false,
            strict_fields: false,
            ..Default::default()
        });
        let list = registry.resolve("list<integer>").unwrap();
        assert!(list.coerce(Value::Int(1)).is_err());

        let record = registry.record("r").build().unwrap();
        assert!(!record.strict_fields());
    }

    #[test]
    fn test_registered_records_resolve_by_name() {
        let mut registry = TypeRegistry::default();
        let string = registry.resolve("string").unwrap();
        let point = registry
            .record("host")
            .field("name", string, crate::options::FieldOptions::new())
            .build()
            .unwrap();
        registry.register_record(point);
        let hosts = registry.resolve("list<host>").unwrap();
        let coerced = hosts
            .coerce(Value::list([Value::map([("name", "a")])]))
            .unwrap();
        assert_eq!(
            hosts.coerce_out(coerced, &NoScope).unwrap(),
            Value::list([Value::map([("name", "a")])])
        );
    }
}
