//! Per-node attribute storage.
//!
//! Every node carries an [`Attributes`] map with three reserved keys that are
//! always present: `Name` (text), `Length` (number) and `Support` (number).
//! `NaN` in `Length` or `Support` means "not specified", which is different from zero.
//! Any other key is a custom attribute holding either a number or a string.
//!
//! Keys are compared case-insensitively: `support`, `Support` and `SUPPORT` all
//! address the same entry.
//!
//! # Example
//! ```
//! # use treenode::attributes::{Attributes, AttributeValue};
//! let mut attrs = Attributes::new();
//! attrs.set_name("A");
//! attrs.insert("rate", 0.25);
//! attrs.insert("Host", "human");
//!
//! assert_eq!(attrs.get_text("NAME"), Some("A"));
//! assert_eq!(attrs.get_number("RATE"), Some(0.25));
//! assert!(attrs.length().is_nan());
//! assert_eq!(attrs.len(), 5);
//! ```

use std::fmt;

pub const NAME: &str = "Name";
pub const LENGTH: &str = "Length";
pub const SUPPORT: &str = "Support";

/// Root attribute holding the name of a whole tree.
pub const TREE_NAME: &str = "TreeName";

/// Owned attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Number(f64),
    Text(String),
}

impl AttributeValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            AttributeValue::Number(n) => Some(*n),
            AttributeValue::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttributeValue::Text(s) => Some(s),
            AttributeValue::Number(_) => None,
        }
    }

    pub fn is_number(&self) -> bool {
        matches!(self, AttributeValue::Number(_))
    }

    pub fn borrowed(&self) -> AttributeRef<'_> {
        match self {
            AttributeValue::Number(n) => AttributeRef::Number(*n),
            AttributeValue::Text(s) => AttributeRef::Text(s),
        }
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::Number(value)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::Text(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::Text(value)
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.borrowed().fmt(f)
    }
}

/// Borrowed view of an attribute value, used when iterating.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AttributeRef<'a> {
    Number(f64),
    Text(&'a str),
}

impl AttributeRef<'_> {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            AttributeRef::Number(n) => Some(*n),
            AttributeRef::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttributeRef::Text(s) => Some(s),
            AttributeRef::Number(_) => None,
        }
    }

    /// `NaN` numbers and empty strings count as absent when serializing.
    pub fn is_unset(&self) -> bool {
        match self {
            AttributeRef::Number(n) => n.is_nan(),
            AttributeRef::Text(s) => s.is_empty(),
        }
    }

    pub fn to_owned_value(self) -> AttributeValue {
        match self {
            AttributeRef::Number(n) => AttributeValue::Number(n),
            AttributeRef::Text(s) => AttributeValue::Text(s.to_string()),
        }
    }
}

impl fmt::Display for AttributeRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeRef::Number(n) => write!(f, "{n}"),
            AttributeRef::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reserved {
    Name,
    Length,
    Support,
}

fn reserved(key: &str) -> Option<Reserved> {
    if key.eq_ignore_ascii_case(NAME) {
        Some(Reserved::Name)
    } else if key.eq_ignore_ascii_case(LENGTH) {
        Some(Reserved::Length)
    } else if key.eq_ignore_ascii_case(SUPPORT) {
        Some(Reserved::Support)
    } else {
        None
    }
}

/// Parses a complete string as a floating point number.
///
/// Returns `None` when the string is empty or has trailing garbage.
pub fn parse_number(value: &str) -> Option<f64> {
    let value = value.trim_start();
    if value.is_empty() {
        return None;
    }
    value.parse::<f64>().ok()
}

/// Case-insensitive attribute map with typed fast paths for the reserved keys.
///
/// Custom keys keep their insertion order, so serializers emit them stably.
#[derive(Debug, Clone)]
pub struct Attributes {
    name: String,
    length: f64,
    support: f64,
    custom: Vec<(String, AttributeValue)>,
}

impl Default for Attributes {
    fn default() -> Self {
        Self::new()
    }
}

impl Attributes {
    /// Empty name, unspecified length and support, no custom entries.
    pub fn new() -> Self {
        Attributes {
            name: String::new(),
            length: f64::NAN,
            support: f64::NAN,
            custom: Vec::new(),
        }
    }

    pub fn with_name(name: impl Into<String>) -> Self {
        let mut attrs = Self::new();
        attrs.name = name.into();
        attrs
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn length(&self) -> f64 {
        self.length
    }

    pub fn set_length(&mut self, length: f64) {
        self.length = length;
    }

    pub fn support(&self) -> f64 {
        self.support
    }

    pub fn set_support(&mut self, support: f64) {
        self.support = support;
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.custom.iter().position(|(k, _)| k.eq_ignore_ascii_case(key))
    }

    pub fn get(&self, key: &str) -> Option<AttributeRef<'_>> {
        match reserved(key) {
            Some(Reserved::Name) => Some(AttributeRef::Text(&self.name)),
            Some(Reserved::Length) => Some(AttributeRef::Number(self.length)),
            Some(Reserved::Support) => Some(AttributeRef::Number(self.support)),
            None => self.position(key).map(|i| self.custom[i].1.borrowed()),
        }
    }

    pub fn get_number(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(|v| v.as_number())
    }

    pub fn get_text(&self, key: &str) -> Option<&str> {
        match self.get(key)? {
            AttributeRef::Text(s) => Some(s),
            AttributeRef::Number(_) => None,
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        reserved(key).is_some() || self.position(key).is_some()
    }

    /// Inserts or replaces an attribute, returning the previous value.
    ///
    /// Values written to a reserved key are coerced to its type: text parses to a
    /// number (`NaN` when it does not parse) and numbers format to a name.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) -> Option<AttributeValue> {
        let key = key.into();
        let value = value.into();
        match reserved(&key) {
            Some(Reserved::Name) => {
                let text = match value {
                    AttributeValue::Text(s) => s,
                    AttributeValue::Number(n) => n.to_string(),
                };
                Some(AttributeValue::Text(std::mem::replace(&mut self.name, text)))
            }
            Some(slot) => {
                let number = match value {
                    AttributeValue::Number(n) => n,
                    AttributeValue::Text(s) => parse_number(&s).unwrap_or(f64::NAN),
                };
                let target = if slot == Reserved::Length {
                    &mut self.length
                } else {
                    &mut self.support
                };
                Some(AttributeValue::Number(std::mem::replace(target, number)))
            }
            None => match self.position(&key) {
                Some(i) => Some(std::mem::replace(&mut self.custom[i].1, value)),
                None => {
                    self.custom.push((key, value));
                    None
                }
            },
        }
    }

    /// Removes a custom attribute. Reserved keys cannot be removed and yield `None`.
    pub fn remove(&mut self, key: &str) -> Option<AttributeValue> {
        if reserved(key).is_some() {
            return None;
        }
        let i = self.position(key)?;
        Some(self.custom.remove(i).1)
    }

    /// Number of entries, reserved keys included.
    pub fn len(&self) -> usize {
        3 + self.custom.len()
    }

    /// Always false: the reserved keys are always present.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// All entries, reserved keys first, then custom keys in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, AttributeRef<'_>)> {
        [
            (NAME, AttributeRef::Text(self.name.as_str())),
            (LENGTH, AttributeRef::Number(self.length)),
            (SUPPORT, AttributeRef::Number(self.support)),
        ]
        .into_iter()
        .chain(self.custom())
    }

    /// Custom entries only.
    pub fn custom(&self) -> impl Iterator<Item = (&str, AttributeRef<'_>)> {
        self.custom.iter().map(|(k, v)| (k.as_str(), v.borrowed()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.iter().map(|(k, _)| k)
    }
}

fn same_number(a: f64, b: f64) -> bool {
    a == b || (a.is_nan() && b.is_nan())
}

/// Equality treats two unspecified (`NaN`) numbers as equal and ignores key case
/// and custom key order.
impl PartialEq for Attributes {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && same_number(self.length, other.length)
            && same_number(self.support, other.support)
            && self.custom.len() == other.custom.len()
            && self.custom.iter().all(|(k, v)| match (v, other.get(k)) {
                (AttributeValue::Number(a), Some(AttributeRef::Number(b))) => same_number(*a, b),
                (AttributeValue::Text(a), Some(AttributeRef::Text(b))) => a == b,
                _ => false,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_keys_always_present() {
        let attrs = Attributes::new();
        assert_eq!(attrs.len(), 3);
        assert_eq!(attrs.get_text("name"), Some(""));
        assert!(attrs.get_number("LENGTH").unwrap().is_nan());
        assert!(attrs.get_number("support").unwrap().is_nan());
        assert!(attrs.contains_key("Support"));
    }

    #[test]
    fn reserved_keys_cannot_be_removed() {
        let mut attrs = Attributes::with_name("A");
        assert_eq!(attrs.remove("name"), None);
        assert_eq!(attrs.name(), "A");
    }

    #[test]
    fn case_insensitive_custom_keys() {
        let mut attrs = Attributes::new();
        assert_eq!(attrs.insert("Rate", 1.0), None);
        assert_eq!(attrs.insert("RATE", 2.0), Some(AttributeValue::Number(1.0)));
        assert_eq!(attrs.get_number("rate"), Some(2.0));
        assert_eq!(attrs.len(), 4);
        // The first spelling of the key is kept.
        assert_eq!(attrs.custom().next().map(|(k, _)| k), Some("Rate"));
        assert_eq!(attrs.remove("rAtE"), Some(AttributeValue::Number(2.0)));
        assert!(!attrs.contains_key("rate"));
    }

    #[test]
    fn reserved_keys_route_to_typed_fields() {
        let mut attrs = Attributes::new();
        attrs.insert("length", 0.5);
        attrs.insert("SUPPORT", "0.9");
        attrs.insert("Name", "tip");
        assert_eq!(attrs.length(), 0.5);
        assert_eq!(attrs.support(), 0.9);
        assert_eq!(attrs.name(), "tip");
        assert_eq!(attrs.len(), 3);

        attrs.insert("Length", "not a number");
        assert!(attrs.length().is_nan());
    }

    #[test]
    fn iteration_order_is_stable() {
        let mut attrs = Attributes::new();
        attrs.insert("b", "x");
        attrs.insert("a", 1.0);
        let keys: Vec<&str> = attrs.keys().collect();
        assert_eq!(keys, vec!["Name", "Length", "Support", "b", "a"]);
    }

    #[test]
    fn equality_treats_nan_as_equal() {
        let mut a = Attributes::with_name("A");
        let mut b = Attributes::with_name("A");
        assert_eq!(a, b);
        a.insert("x", f64::NAN);
        b.insert("X", f64::NAN);
        assert_eq!(a, b);
        b.set_length(1.0);
        assert_ne!(a, b);
    }

    #[test]
    fn parse_number_requires_full_match() {
        assert_eq!(parse_number("0.95"), Some(0.95));
        assert_eq!(parse_number("1e-3"), Some(1e-3));
        assert_eq!(parse_number("12abc"), None);
        assert_eq!(parse_number(""), None);
    }
}
