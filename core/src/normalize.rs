//! Input canonicalization shared by every relkit component.
//!
//! Relation and attribute names are interpolated into SQL text, so they are
//! validated here before any statement is built. Values pass through
//! [`ensure_list`] and [`coerce_bool`] so consumers only ever see
//! [`Value`] sequences.

use crate::criteria::Criteria;
use crate::error::{CoreError, Result};
use crate::value::Value;

/// Validates that a relation or attribute name is safe to embed in SQL.
///
/// Names must be non-empty, contain only ASCII alphanumerics and
/// underscores, and must not start with a digit.
///
/// # Examples
///
/// ```
/// use relkit_core::validate_identifier;
///
/// assert!(validate_identifier("first_name").is_ok());
/// assert!(validate_identifier("1st").is_err());
/// assert!(validate_identifier("drop;--").is_err());
/// ```
pub fn validate_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return Err(CoreError::InvalidIdentifier(name.to_string()));
    };
    if first.is_ascii_digit() {
        return Err(CoreError::InvalidIdentifier(name.to_string()));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(CoreError::InvalidIdentifier(name.to_string()));
    }
    Ok(())
}

/// Validates `name` and wraps it in double quotes.
pub fn quote_identifier(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("\"{name}\""))
}

/// Turns any criteria into a flat list of values.
///
/// `None` yields an empty list.
pub fn ensure_list(criteria: Option<&Criteria>) -> Vec<Value> {
    criteria.map(Criteria::values).unwrap_or_default()
}

/// Converts truthy/falsy text and numbers to `Integer(0 | 1)`.
///
/// Text such as `"true"`, `"yes"`, `"on"` and `"1"` maps to `1`;
/// `"false"`, `"no"`, `"off"`, `"0"` and the empty string map to `0`.
/// Anything else is returned unchanged.
pub fn coerce_bool(value: Value) -> Value {
    match value {
        Value::Text(text) => match text.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Value::Integer(1),
            "false" | "no" | "off" | "0" | "" => Value::Integer(0),
            _ => Value::Text(text),
        },
        Value::Real(v) => Value::Integer(i64::from(v != 0.0)),
        Value::Integer(v) => Value::Integer(i64::from(v != 0)),
        other => other,
    }
}

/// Collects names from anything iterable, skipping duplicates but
/// preserving first-seen order.
pub fn dedup_names<I, S>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut seen = Vec::new();
    for name in names {
        let name = name.into();
        if !seen.contains(&name) {
            seen.push(name);
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_identifiers() {
        assert!(validate_identifier("Users").is_ok());
        assert!(validate_identifier("_private").is_ok());
        assert!(validate_identifier("a1_b2").is_ok());
    }

    #[test]
    fn test_invalid_identifiers() {
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("9lives").is_err());
        assert!(validate_identifier("hello world").is_err());
        assert!(validate_identifier("a-b").is_err());
        assert!(validate_identifier("x\"y").is_err());
    }

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("Names").unwrap(), "\"Names\"");
        assert!(quote_identifier("bad name").is_err());
    }

    #[test]
    fn test_ensure_list() {
        assert!(ensure_list(None).is_empty());
        let criteria = Criteria::from("x");
        assert_eq!(ensure_list(Some(&criteria)), vec![Value::from("x")]);
    }

    #[test]
    fn test_coerce_bool() {
        assert_eq!(coerce_bool(Value::from("Yes")), Value::Integer(1));
        assert_eq!(coerce_bool(Value::from("off")), Value::Integer(0));
        assert_eq!(coerce_bool(Value::Integer(7)), Value::Integer(1));
        assert_eq!(coerce_bool(Value::from("maybe")), Value::from("maybe"));
        assert_eq!(coerce_bool(Value::Null), Value::Null);
    }

    #[test]
    fn test_dedup_names_keeps_order() {
        assert_eq!(dedup_names(["b", "a", "b"]), vec!["b", "a"]);
    }
}
