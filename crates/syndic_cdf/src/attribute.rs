//! Typed, language-keyed CDF attributes.

use crate::error::{CdfError, CdfResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Language key used for values that are not language specific.
pub const LANGUAGE_NONE: &str = "und";

/// Scalar kind of an attribute value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeKind {
    /// Whole number.
    Integer,
    /// Floating point number.
    Number,
    /// Free text.
    String,
    /// True/false flag.
    Boolean,
    /// UUID of another CDF object.
    Reference,
    /// Exact-match token.
    Keyword,
    /// Arbitrary JSON object.
    Object,
}

impl AttributeKind {
    /// Returns the wire name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            AttributeKind::Integer => "integer",
            AttributeKind::Number => "number",
            AttributeKind::String => "string",
            AttributeKind::Boolean => "boolean",
            AttributeKind::Reference => "reference",
            AttributeKind::Keyword => "keyword",
            AttributeKind::Object => "object",
        }
    }

    /// Parses a wire name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "integer" => Some(AttributeKind::Integer),
            "number" => Some(AttributeKind::Number),
            "string" => Some(AttributeKind::String),
            "boolean" => Some(AttributeKind::Boolean),
            "reference" => Some(AttributeKind::Reference),
            "keyword" => Some(AttributeKind::Keyword),
            "object" => Some(AttributeKind::Object),
            _ => None,
        }
    }

    fn infer(value: &Value) -> Self {
        match value {
            Value::Bool(_) => AttributeKind::Boolean,
            Value::Number(n) if n.is_f64() => AttributeKind::Number,
            Value::Number(_) => AttributeKind::Integer,
            Value::Object(_) => AttributeKind::Object,
            _ => AttributeKind::String,
        }
    }
}

/// Type of a CDF attribute: a scalar kind or an array of one.
///
/// On the wire the type is a string such as `"string"` or `"array<reference>"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AttributeType {
    /// A single value per language.
    Scalar(AttributeKind),
    /// A list of values per language.
    Array(AttributeKind),
}

impl AttributeType {
    /// Shorthand for a scalar string attribute.
    pub const STRING: AttributeType = AttributeType::Scalar(AttributeKind::String);
    /// Shorthand for a scalar keyword attribute.
    pub const KEYWORD: AttributeType = AttributeType::Scalar(AttributeKind::Keyword);
    /// Shorthand for a scalar reference attribute.
    pub const REFERENCE: AttributeType = AttributeType::Scalar(AttributeKind::Reference);

    /// Infers the attribute type from a JSON value.
    ///
    /// Arrays take the kind of their first element; empty arrays are string arrays.
    pub fn infer(value: &Value) -> Self {
        match value {
            Value::Array(items) => AttributeType::Array(
                items
                    .first()
                    .map(AttributeKind::infer)
                    .unwrap_or(AttributeKind::String),
            ),
            other => AttributeType::Scalar(AttributeKind::infer(other)),
        }
    }

    /// Returns the underlying scalar kind.
    pub fn kind(&self) -> AttributeKind {
        match self {
            AttributeType::Scalar(kind) | AttributeType::Array(kind) => *kind,
        }
    }

    /// Returns true if the attribute holds references to other objects.
    pub fn is_reference(&self) -> bool {
        self.kind() == AttributeKind::Reference
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeType::Scalar(kind) => f.write_str(kind.as_str()),
            AttributeType::Array(kind) => write!(f, "array<{}>", kind.as_str()),
        }
    }
}

impl FromStr for AttributeType {
    type Err = CdfError;

    fn from_str(s: &str) -> CdfResult<Self> {
        let parsed = match s.strip_prefix("array<").and_then(|r| r.strip_suffix('>')) {
            Some(inner) => AttributeKind::from_name(inner).map(AttributeType::Array),
            None => AttributeKind::from_name(s).map(AttributeType::Scalar),
        };
        parsed.ok_or_else(|| CdfError::UnknownAttributeType(s.to_string()))
    }
}

impl TryFrom<String> for AttributeType {
    type Error = CdfError;

    fn try_from(value: String) -> CdfResult<Self> {
        value.parse()
    }
}

impl From<AttributeType> for String {
    fn from(value: AttributeType) -> Self {
        value.to_string()
    }
}

/// A typed attribute whose values are keyed by language code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CdfAttribute {
    /// Attribute type.
    #[serde(rename = "type")]
    pub attr_type: AttributeType,
    /// Values keyed by language code.
    #[serde(default)]
    pub value: BTreeMap<String, Value>,
}

impl CdfAttribute {
    /// Creates an empty attribute of the given type.
    pub fn new(attr_type: AttributeType) -> Self {
        Self {
            attr_type,
            value: BTreeMap::new(),
        }
    }

    /// Creates a language-neutral attribute holding a single value.
    pub fn neutral(attr_type: AttributeType, value: impl Into<Value>) -> Self {
        Self::new(attr_type).with_value(LANGUAGE_NONE, value)
    }

    /// Sets the value for a language, returning self.
    pub fn with_value(mut self, langcode: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set_value(langcode, value);
        self
    }

    /// Sets the value for a language.
    pub fn set_value(&mut self, langcode: impl Into<String>, value: impl Into<Value>) {
        self.value.insert(langcode.into(), value.into());
    }

    /// Gets the value for a language.
    pub fn get_value(&self, langcode: &str) -> Option<&Value> {
        self.value.get(langcode)
    }

    /// Gets the language-neutral value, falling back to the first language present.
    pub fn neutral_value(&self) -> Option<&Value> {
        self.value
            .get(LANGUAGE_NONE)
            .or_else(|| self.value.values().next())
    }

    /// Returns the language codes that carry a value.
    pub fn languages(&self) -> impl Iterator<Item = &str> {
        self.value.keys().map(String::as_str)
    }

    /// Keeps only the languages for which `keep` returns true.
    ///
    /// Returns the number of values removed.
    pub fn retain_languages(&mut self, mut keep: impl FnMut(&str) -> bool) -> usize {
        let before = self.value.len();
        self.value.retain(|lang, _| keep(lang));
        before - self.value.len()
    }

    /// Returns every UUID found in the values of all languages, in order.
    ///
    /// Strings that do not parse as UUIDs are skipped.
    pub fn uuid_values(&self) -> Vec<Uuid> {
        let mut found = Vec::new();
        for value in self.value.values() {
            collect_uuids(value, &mut found);
        }
        found
    }

    /// Returns true if no language carries a value.
    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}

fn collect_uuids(value: &Value, out: &mut Vec<Uuid>) {
    match value {
        Value::String(s) => {
            if let Ok(uuid) = Uuid::parse_str(s) {
                out.push(uuid);
            }
        }
        Value::Array(items) => items.iter().for_each(|v| collect_uuids(v, out)),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn attribute_type_names() {
        assert_eq!(AttributeType::STRING.to_string(), "string");
        assert_eq!(
            AttributeType::Array(AttributeKind::Reference).to_string(),
            "array<reference>"
        );
        assert_eq!(
            "array<integer>".parse::<AttributeType>().unwrap(),
            AttributeType::Array(AttributeKind::Integer)
        );
        assert!("array<blob>".parse::<AttributeType>().is_err());
        assert!("date".parse::<AttributeType>().is_err());
    }

    #[test]
    fn infer_from_json() {
        assert_eq!(AttributeType::infer(&json!(true)).kind(), AttributeKind::Boolean);
        assert_eq!(AttributeType::infer(&json!(3)).kind(), AttributeKind::Integer);
        assert_eq!(AttributeType::infer(&json!(3.5)).kind(), AttributeKind::Number);
        assert_eq!(
            AttributeType::infer(&json!(["a", "b"])),
            AttributeType::Array(AttributeKind::String)
        );
        assert_eq!(
            AttributeType::infer(&json!([])),
            AttributeType::Array(AttributeKind::String)
        );
    }

    #[test]
    fn serialized_shape() {
        let attr = CdfAttribute::new(AttributeType::STRING)
            .with_value("en", "Hello")
            .with_value("es", "Hola");
        let encoded = serde_json::to_value(&attr).unwrap();
        assert_eq!(
            encoded,
            json!({"type": "string", "value": {"en": "Hello", "es": "Hola"}})
        );
    }

    #[test]
    fn neutral_value_falls_back() {
        let attr = CdfAttribute::new(AttributeType::STRING).with_value("fr", "Bonjour");
        assert_eq!(attr.neutral_value(), Some(&json!("Bonjour")));

        let attr = CdfAttribute::neutral(AttributeType::KEYWORD, "page");
        assert_eq!(attr.get_value(LANGUAGE_NONE), Some(&json!("page")));
    }

    #[test]
    fn retain_languages() {
        let mut attr = CdfAttribute::new(AttributeType::STRING)
            .with_value("en", "Hello")
            .with_value("de", "Hallo")
            .with_value(LANGUAGE_NONE, "-");
        let removed = attr.retain_languages(|lang| lang != "de");
        assert_eq!(removed, 1);
        assert_eq!(attr.languages().collect::<Vec<_>>(), vec!["en", "und"]);
    }

    #[test]
    fn uuid_values_skip_non_uuids() {
        let a = Uuid::from_u128(1);
        let b = Uuid::from_u128(2);
        let attr = CdfAttribute::neutral(
            "array<reference>".parse().unwrap(),
            json!([a.to_string(), "not-a-uuid", b.to_string(), 5]),
        );
        assert_eq!(attr.uuid_values(), vec![a, b]);
    }
}
