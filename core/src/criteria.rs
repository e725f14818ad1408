//! Tagged criteria values used throughout query specifications.
//!
//! A criteria slot in a query can hold one value, a list of values, or a
//! nested mapping. [`Criteria`] captures that shape once so consumers never
//! re-inspect raw input.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// One criteria entry of a query specification.
///
/// # Examples
///
/// ```
/// use relkit_core::{Criteria, Value};
///
/// let one = Criteria::from("al");
/// assert_eq!(one.values(), vec![Value::from("al")]);
///
/// let many = Criteria::from(vec!["al", "be"]);
/// assert_eq!(many.values().len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Criteria {
    /// Several values, each tested independently.
    List(Vec<Value>),
    /// A single value.
    Scalar(Value),
    /// Nested criteria keyed by name.
    Map(BTreeMap<String, Criteria>),
}

impl Criteria {
    /// Flattens the criteria into the list of values it carries.
    ///
    /// A scalar becomes a singleton; a map contributes the values of its
    /// entries in key order.
    pub fn values(&self) -> Vec<Value> {
        match self {
            Criteria::Scalar(value) => vec![value.clone()],
            Criteria::List(values) => values.clone(),
            Criteria::Map(entries) => entries.values().flat_map(Criteria::values).collect(),
        }
    }

    /// Returns `true` if the criteria holds no values at all.
    pub fn is_empty(&self) -> bool {
        match self {
            Criteria::Scalar(_) => false,
            Criteria::List(values) => values.is_empty(),
            Criteria::Map(entries) => entries.values().all(Criteria::is_empty),
        }
    }

    /// Returns the single value when the criteria is a scalar.
    pub fn as_scalar(&self) -> Option<&Value> {
        match self {
            Criteria::Scalar(value) => Some(value),
            _ => None,
        }
    }

    /// Returns the nested mapping when the criteria is a map.
    pub fn as_map(&self) -> Option<&BTreeMap<String, Criteria>> {
        match self {
            Criteria::Map(entries) => Some(entries),
            _ => None,
        }
    }
}

impl From<Value> for Criteria {
    fn from(value: Value) -> Self {
        Criteria::Scalar(value)
    }
}

macro_rules! criteria_from_scalar {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Criteria {
            fn from(v: $ty) -> Self {
                Criteria::Scalar(Value::from(v))
            }
        })*
    };
}

criteria_from_scalar!(i32, i64, u32, usize, bool, f64, &str, String, &String);

impl<T: Into<Value>> From<Option<T>> for Criteria {
    fn from(v: Option<T>) -> Self {
        Criteria::Scalar(v.map_or(Value::Null, Into::into))
    }
}

impl<T: Into<Value>> From<Vec<T>> for Criteria {
    fn from(values: Vec<T>) -> Self {
        Criteria::List(values.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>, const N: usize> From<[T; N]> for Criteria {
    fn from(values: [T; N]) -> Self {
        Criteria::List(values.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value> + Clone> From<&[T]> for Criteria {
    fn from(values: &[T]) -> Self {
        Criteria::List(values.iter().cloned().map(Into::into).collect())
    }
}

impl From<BTreeMap<String, Criteria>> for Criteria {
    fn from(entries: BTreeMap<String, Criteria>) -> Self {
        Criteria::Map(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_normalizes_to_singleton() {
        assert_eq!(Criteria::from(26).values(), vec![Value::Integer(26)]);
    }

    #[test]
    fn test_list_keeps_order() {
        let criteria = Criteria::from(["b", "a"]);
        assert_eq!(criteria.values(), vec![Value::from("b"), Value::from("a")]);
    }

    #[test]
    fn test_map_flattens_in_key_order() {
        let mut entries = BTreeMap::new();
        entries.insert("z".to_string(), Criteria::from(1));
        entries.insert("a".to_string(), Criteria::from(vec![2, 3]));
        let criteria = Criteria::from(entries);
        assert_eq!(
            criteria.values(),
            vec![Value::Integer(2), Value::Integer(3), Value::Integer(1)]
        );
    }

    #[test]
    fn test_empty_list_is_empty() {
        assert!(Criteria::List(vec![]).is_empty());
        assert!(!Criteria::from(Value::Null).is_empty());
    }
}
