//! Parameter values and resource references

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Reference to a resource by its identity, `Type[title]`
///
/// The type name is stored lowercased without a leading `::`. Titles are
/// case-preserving except for classes and stages, whose titles are names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceRef {
    #[serde(rename = "type")]
    pub type_name: String,
    pub title: String,
}

impl ResourceRef {
    pub fn new(type_name: impl AsRef<str>, title: impl Into<String>) -> Self {
        let type_name = normalize_name(type_name.as_ref());
        let mut title = title.into();
        if is_name_titled(&type_name) {
            title = normalize_name(&title);
        }
        Self { type_name, title }
    }

    /// Reference to a class
    pub fn class(name: &str) -> Self {
        Self::new("class", name)
    }

    /// Whether this references a class
    pub fn is_class(&self) -> bool {
        self.type_name == "class"
    }

    /// Parse a textual reference such as `File[/tmp/x]`
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let open = text.find('[')?;
        let inner = text[open + 1..].strip_suffix(']')?;
        let type_name = &text[..open];
        if type_name.is_empty() {
            return None;
        }
        let title = inner
            .trim()
            .trim_matches(|c| c == '\'' || c == '"')
            .to_string();
        Some(Self::new(type_name, title))
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let title = if is_name_titled(&self.type_name) {
            capitalize_segments(&self.title)
        } else {
            self.title.clone()
        };
        write!(f, "{}[{}]", capitalize_segments(&self.type_name), title)
    }
}

/// Lowercase a type or class name and drop a leading `::`
pub fn normalize_name(name: &str) -> String {
    name.trim().trim_start_matches("::").to_lowercase()
}

/// `foo::bar` -> `Foo::Bar`
pub fn capitalize_segments(name: &str) -> String {
    name.split("::")
        .map(|segment| {
            let mut chars = segment.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("::")
}

fn is_name_titled(type_name: &str) -> bool {
    matches!(type_name, "class" | "stage")
}

/// A parameter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Undef,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Ref(ResourceRef),
    Array(Vec<Value>),
    Hash(IndexMap<String, Value>),
}

impl Value {
    pub fn string(s: impl Into<String>) -> Self {
        Self::String(s.into())
    }

    /// Puppet truthiness: only `undef` and `false` are false
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Self::Undef | Self::Bool(false))
    }

    pub fn is_undef(&self) -> bool {
        matches!(self, Self::Undef)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::String(s) if s == "true" => Some(true),
            Self::String(s) if s == "false" => Some(false),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            Self::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Collect every resource reference held by this value, flattening arrays
    pub fn references(&self) -> Vec<ResourceRef> {
        match self {
            Self::Ref(r) => vec![r.clone()],
            Self::Array(items) => items.iter().flat_map(Value::references).collect(),
            Self::String(s) => ResourceRef::parse(s).into_iter().collect(),
            _ => Vec::new(),
        }
    }

    /// Flatten into a list of strings (scalars and arrays of scalars)
    pub fn to_string_list(&self) -> Vec<String> {
        match self {
            Self::Undef => Vec::new(),
            Self::Array(items) => items.iter().flat_map(Value::to_string_list).collect(),
            other => vec![other.to_string()],
        }
    }

    /// Short name of the value's kind, for error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Undef => "Undef",
            Self::Bool(_) => "Boolean",
            Self::Integer(_) => "Integer",
            Self::Float(_) => "Float",
            Self::String(_) => "String",
            Self::Ref(_) => "Resource",
            Self::Array(_) => "Array",
            Self::Hash(_) => "Hash",
        }
    }

    fn fmt_nested(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "'{}'", s),
            Self::Undef => write!(f, "undef"),
            other => write!(f, "{}", other),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undef => Ok(()),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Integer(i) => write!(f, "{}", i),
            Self::Float(x) => write!(f, "{}", x),
            Self::String(s) => write!(f, "{}", s),
            Self::Ref(r) => write!(f, "{}", r),
            Self::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    item.fmt_nested(f)?;
                }
                write!(f, "]")
            }
            Self::Hash(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "'{}' => ", k)?;
                    v.fmt_nested(f)?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<ResourceRef> for Value {
    fn from(r: ResourceRef) -> Self {
        Self::Ref(r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_refs_are_case_normalized() {
        let a = ResourceRef::new("Class", "Apache::Mod");
        let b = ResourceRef::class("::apache::mod");
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "Class[Apache::Mod]");
    }

    #[test]
    fn test_titles_preserve_case_for_plain_types() {
        let r = ResourceRef::new("File", "/Tmp/X");
        assert_eq!(r.type_name, "file");
        assert_eq!(r.title, "/Tmp/X");
        assert_eq!(r.to_string(), "File[/Tmp/X]");
    }

    #[test]
    fn test_parse_reference() {
        let r = ResourceRef::parse("Package['nginx']").unwrap();
        assert_eq!(r, ResourceRef::new("package", "nginx"));
        assert!(ResourceRef::parse("nginx").is_none());
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Undef.is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(Value::string("").is_truthy());
        assert!(Value::Integer(0).is_truthy());
    }

    #[test]
    fn test_display_array() {
        let v = Value::Array(vec![Value::Integer(1), Value::string("a")]);
        assert_eq!(v.to_string(), "[1, 'a']");
    }

    #[test]
    fn test_references_flatten_arrays() {
        let v = Value::Array(vec![
            Value::Ref(ResourceRef::new("file", "/a")),
            Value::Array(vec![Value::Ref(ResourceRef::new("file", "/b"))]),
        ]);
        assert_eq!(v.references().len(), 2);
    }
}
