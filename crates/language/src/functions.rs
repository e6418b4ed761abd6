//! Function registry and built-in functions
//!
//! Functions are looked up by name when a call is evaluated. Each one is
//! either a statement (called for its effect, returns nothing) or an rvalue
//! (produces a value); using one where the other is expected is an error
//! raised at call time.

use crate::error::Result;
use crate::evaluator::Evaluator;
use crate::scope::Scope;
use catalog::{ResourceRef, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    Statement,
    Rvalue,
}

/// Where a call appears
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallContext {
    Statement,
    Rvalue,
}

/// Signature of a function implementation: evaluator, calling scope,
/// evaluated arguments, line of the call
pub type FunctionImpl = fn(&mut Evaluator<'_>, &Rc<Scope>, Vec<Value>, usize) -> Result<Value>;

#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub kind: FunctionKind,
    pub implementation: FunctionImpl,
}

impl Function {
    /// Reject a call made in the wrong context
    pub fn check_context(&self, context: CallContext) -> std::result::Result<(), String> {
        match (self.kind, context) {
            (FunctionKind::Rvalue, CallContext::Statement) => Err(format!(
                "Function '{}' must be the value of a statement",
                self.name
            )),
            (FunctionKind::Statement, CallContext::Rvalue) => {
                Err(format!("Function '{}' does not return a value", self.name))
            }
            _ => Ok(()),
        }
    }
}

/// Functions available to manifests, shared read-only across compiles
#[derive(Debug, Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, Function>,
}

impl FunctionRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in statement and rvalue functions
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        let statements: &[(&str, FunctionImpl)] = &[
            ("include", include),
            ("require", require),
            ("contain", contain),
            ("realize", realize),
            ("tag", tag),
            ("notice", notice),
            ("warning", warning),
            ("info", info),
            ("debug", debug),
            ("err", err),
            ("fail", fail),
        ];
        for (name, implementation) in statements {
            registry.register(name, FunctionKind::Statement, *implementation);
        }
        let rvalues: &[(&str, FunctionImpl)] = &[
            ("defined", defined),
            ("upcase", upcase),
            ("downcase", downcase),
            ("join", join),
            ("split", split),
            ("size", size),
            ("versioncmp", versioncmp),
            ("tagged", tagged),
        ];
        for (name, implementation) in rvalues {
            registry.register(name, FunctionKind::Rvalue, *implementation);
        }
        registry
    }

    /// Register a function, replacing any earlier one of the same name
    pub fn register(&mut self, name: &str, kind: FunctionKind, implementation: FunctionImpl) {
        self.functions.insert(
            name.to_string(),
            Function {
                name: name.to_string(),
                kind,
                implementation,
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&Function> {
        self.functions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

fn arity(ev: &Evaluator<'_>, name: &str, args: &[Value], min: usize, max: usize, line: usize) -> Result<()> {
    if (min..=max).contains(&args.len()) {
        return Ok(());
    }
    let expected = if min == max {
        format!("{min}")
    } else {
        format!("between {min} and {max}")
    };
    Err(ev.error(
        line,
        format!("{name}(): expects {expected} arguments, got {}", args.len()),
    ))
}

/// Class names from strings, arrays of strings and `Class[...]` references
fn class_names(args: &[Value]) -> Vec<String> {
    let mut names = Vec::new();
    for arg in args {
        match arg {
            Value::Array(items) => names.extend(class_names(items)),
            Value::Ref(reference) if reference.is_class() => names.push(reference.title.clone()),
            Value::Undef => {}
            other => names.push(other.to_string()),
        }
    }
    names
}

fn include(ev: &mut Evaluator<'_>, scope: &Rc<Scope>, args: Vec<Value>, line: usize) -> Result<Value> {
    for name in class_names(&args) {
        ev.declare_class(&name, None, scope, line)?;
    }
    Ok(Value::Undef)
}

fn require(ev: &mut Evaluator<'_>, scope: &Rc<Scope>, args: Vec<Value>, line: usize) -> Result<Value> {
    for name in class_names(&args) {
        ev.require_class(&name, scope, line)?;
    }
    Ok(Value::Undef)
}

fn contain(ev: &mut Evaluator<'_>, scope: &Rc<Scope>, args: Vec<Value>, line: usize) -> Result<Value> {
    for name in class_names(&args) {
        ev.contain_class(&name, scope, line)?;
    }
    Ok(Value::Undef)
}

fn realize(ev: &mut Evaluator<'_>, _scope: &Rc<Scope>, args: Vec<Value>, line: usize) -> Result<Value> {
    for arg in &args {
        let references: Vec<ResourceRef> = match arg {
            Value::Ref(_) | Value::Array(_) => arg.references(),
            other => {
                return Err(ev.error(
                    line,
                    format!("realize(): expects resource references, got {}", other.kind()),
                ));
            }
        };
        for reference in references {
            ev.realize(reference, line);
        }
    }
    Ok(Value::Undef)
}

fn tag(ev: &mut Evaluator<'_>, scope: &Rc<Scope>, args: Vec<Value>, _line: usize) -> Result<Value> {
    let tags: Vec<String> = args.iter().flat_map(Value::to_string_list).collect();
    ev.tag_container(scope, &tags);
    Ok(Value::Undef)
}

fn message(args: &[Value]) -> String {
    args.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

fn notice(ev: &mut Evaluator<'_>, scope: &Rc<Scope>, args: Vec<Value>, _line: usize) -> Result<Value> {
    log::info!("Scope({}): {}", ev.scope_label(scope), message(&args));
    Ok(Value::Undef)
}

fn warning(ev: &mut Evaluator<'_>, scope: &Rc<Scope>, args: Vec<Value>, _line: usize) -> Result<Value> {
    log::warn!("Scope({}): {}", ev.scope_label(scope), message(&args));
    Ok(Value::Undef)
}

fn info(ev: &mut Evaluator<'_>, scope: &Rc<Scope>, args: Vec<Value>, _line: usize) -> Result<Value> {
    log::info!("Scope({}): {}", ev.scope_label(scope), message(&args));
    Ok(Value::Undef)
}

fn debug(ev: &mut Evaluator<'_>, scope: &Rc<Scope>, args: Vec<Value>, _line: usize) -> Result<Value> {
    log::debug!("Scope({}): {}", ev.scope_label(scope), message(&args));
    Ok(Value::Undef)
}

fn err(ev: &mut Evaluator<'_>, scope: &Rc<Scope>, args: Vec<Value>, _line: usize) -> Result<Value> {
    log::error!("Scope({}): {}", ev.scope_label(scope), message(&args));
    Ok(Value::Undef)
}

fn fail(ev: &mut Evaluator<'_>, _scope: &Rc<Scope>, args: Vec<Value>, line: usize) -> Result<Value> {
    Err(ev.error(line, message(&args)))
}

fn defined(ev: &mut Evaluator<'_>, scope: &Rc<Scope>, args: Vec<Value>, line: usize) -> Result<Value> {
    if args.is_empty() {
        return Err(ev.error(line, "defined(): expects at least 1 argument"));
    }
    for arg in &args {
        if !ev.is_defined(arg, scope)? {
            return Ok(Value::Bool(false));
        }
    }
    Ok(Value::Bool(true))
}

fn map_strings(value: Value, f: fn(&str) -> String) -> Option<Value> {
    match value {
        Value::String(s) => Some(Value::String(f(&s))),
        Value::Array(items) => items
            .into_iter()
            .map(|item| map_strings(item, f))
            .collect::<Option<Vec<_>>>()
            .map(Value::Array),
        Value::Hash(map) => map
            .into_iter()
            .map(|(k, v)| map_strings(v, f).map(|v| (f(&k), v)))
            .collect::<Option<_>>()
            .map(Value::Hash),
        _ => None,
    }
}

fn upcase(ev: &mut Evaluator<'_>, _scope: &Rc<Scope>, mut args: Vec<Value>, line: usize) -> Result<Value> {
    arity(ev, "upcase", &args, 1, 1, line)?;
    let value = args.remove(0);
    let kind = value.kind();
    map_strings(value, str::to_uppercase)
        .ok_or_else(|| ev.error(line, format!("upcase(): expects a String, Array or Hash, got {kind}")))
}

fn downcase(ev: &mut Evaluator<'_>, _scope: &Rc<Scope>, mut args: Vec<Value>, line: usize) -> Result<Value> {
    arity(ev, "downcase", &args, 1, 1, line)?;
    let value = args.remove(0);
    let kind = value.kind();
    map_strings(value, str::to_lowercase)
        .ok_or_else(|| ev.error(line, format!("downcase(): expects a String, Array or Hash, got {kind}")))
}

fn join(ev: &mut Evaluator<'_>, _scope: &Rc<Scope>, args: Vec<Value>, line: usize) -> Result<Value> {
    arity(ev, "join", &args, 1, 2, line)?;
    let Value::Array(items) = &args[0] else {
        return Err(ev.error(line, format!("join(): expects an Array, got {}", args[0].kind())));
    };
    let separator = args.get(1).map(ToString::to_string).unwrap_or_default();
    let joined = items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(&separator);
    Ok(Value::String(joined))
}

fn split(ev: &mut Evaluator<'_>, _scope: &Rc<Scope>, args: Vec<Value>, line: usize) -> Result<Value> {
    arity(ev, "split", &args, 2, 2, line)?;
    let text = args[0].to_string();
    let pattern = args[1].to_string();
    let regex = regex::Regex::new(&pattern)
        .map_err(|e| ev.error(line, format!("split(): invalid pattern '{pattern}': {e}")))?;
    Ok(Value::Array(
        regex
            .split(&text)
            .map(|part| Value::String(part.to_string()))
            .collect(),
    ))
}

fn size(ev: &mut Evaluator<'_>, _scope: &Rc<Scope>, args: Vec<Value>, line: usize) -> Result<Value> {
    arity(ev, "size", &args, 1, 1, line)?;
    let count = match &args[0] {
        Value::String(s) => s.chars().count(),
        Value::Array(items) => items.len(),
        Value::Hash(map) => map.len(),
        other => {
            return Err(ev.error(
                line,
                format!("size(): expects a String, Array or Hash, got {}", other.kind()),
            ));
        }
    };
    Ok(Value::Integer(i64::try_from(count).unwrap_or(i64::MAX)))
}

/// Compare dotted version strings segment by segment, numerically where
/// both segments are numbers
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let segments = |v: &str| -> Vec<String> {
        v.split(['.', '-'])
            .map(str::to_string)
            .collect()
    };
    let (left, right) = (segments(a), segments(b));
    for (l, r) in left.iter().zip(right.iter()) {
        let ordering = match (l.parse::<u64>(), r.parse::<u64>()) {
            (Ok(x), Ok(y)) => x.cmp(&y),
            _ => l.cmp(r),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    left.len().cmp(&right.len())
}

fn versioncmp(ev: &mut Evaluator<'_>, _scope: &Rc<Scope>, args: Vec<Value>, line: usize) -> Result<Value> {
    arity(ev, "versioncmp", &args, 2, 2, line)?;
    let result = match compare_versions(&args[0].to_string(), &args[1].to_string()) {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    };
    Ok(Value::Integer(result))
}

fn tagged(ev: &mut Evaluator<'_>, scope: &Rc<Scope>, args: Vec<Value>, line: usize) -> Result<Value> {
    if args.is_empty() {
        return Err(ev.error(line, "tagged(): expects at least 1 argument"));
    }
    let all = args
        .iter()
        .flat_map(Value::to_string_list)
        .all(|tag| ev.container_tagged(scope, &tag));
    Ok(Value::Bool(all))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry_kinds() {
        let registry = FunctionRegistry::builtin();
        assert_eq!(registry.get("include").map(|f| f.kind), Some(FunctionKind::Statement));
        assert_eq!(registry.get("upcase").map(|f| f.kind), Some(FunctionKind::Rvalue));
        assert!(!registry.contains("frobnicate"));
        assert!(registry.names().contains(&"versioncmp"));
    }

    #[test]
    fn test_context_checks() {
        let registry = FunctionRegistry::builtin();
        let upcase = registry.get("upcase").unwrap();
        assert_eq!(
            upcase.check_context(CallContext::Statement).unwrap_err(),
            "Function 'upcase' must be the value of a statement"
        );
        let notice = registry.get("notice").unwrap();
        assert_eq!(
            notice.check_context(CallContext::Rvalue).unwrap_err(),
            "Function 'notice' does not return a value"
        );
        assert!(notice.check_context(CallContext::Statement).is_ok());
    }

    #[test]
    fn test_compare_versions() {
        assert_eq!(compare_versions("1.10.0", "1.9.3"), Ordering::Greater);
        assert_eq!(compare_versions("2.0", "2.0"), Ordering::Equal);
        assert_eq!(compare_versions("2.0", "2.0.1"), Ordering::Less);
        assert_eq!(compare_versions("1.0-rc1", "1.0-rc2"), Ordering::Less);
    }

    #[test]
    fn test_map_strings_over_nested_values() {
        let value = Value::Array(vec![Value::from("a"), Value::Array(vec![Value::from("b")])]);
        assert_eq!(
            map_strings(value, str::to_uppercase),
            Some(Value::Array(vec![
                Value::from("A"),
                Value::Array(vec![Value::from("B")])
            ]))
        );
        assert_eq!(map_strings(Value::Integer(1), str::to_uppercase), None);
    }
}
