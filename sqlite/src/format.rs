//! Result formatting and shaping.
//!
//! Raw rows go through two passes before they reach the caller:
//!
//! 1. every value is formatted: foreign keys are turned back into logical
//!    values (reverse lookups are cached) while the session is held, then
//!    the caller's [`ValueFormatter`] runs after it has been released, so
//!    a callback may use the database itself;
//! 2. the formatted table is shaped into nested relation, attribute and row
//!    layers. A layer holding a single element collapses into that element
//!    unless its force flag in [`ShapeOptions`] is set.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use relkit_core::Value;
use tracing::warn;

use crate::error::{Error, Result};
use crate::session::Session;

/// Formatter callback, called as `f(value, attribute, relation)`.
pub type FormatFn = Arc<dyn Fn(&Value, &str, &str) -> Value + Send + Sync>;

type AliasSource = Box<dyn Iterator<Item = std::result::Result<String, String>> + Send>;

/// Renaming applied to result keys.
#[derive(Clone, Default)]
pub enum Alias {
    /// Keys are attribute names and row positions.
    #[default]
    None,
    /// Replaces the attribute name when exactly one attribute is selected.
    Fixed(String),
    /// Per-attribute replacement names.
    PerAttribute(BTreeMap<String, String>),
    /// One row key per row, drawn lazily. A source error yields
    /// [`FormatOptions::alias_replacement`] instead.
    Sequence(Arc<Mutex<AliasSource>>),
}

impl Alias {
    /// Row keys drawn from `source`.
    pub fn sequence<I>(source: I) -> Self
    where
        I: IntoIterator<Item = std::result::Result<String, String>>,
        I::IntoIter: Send + 'static,
    {
        Alias::Sequence(Arc::new(Mutex::new(Box::new(source.into_iter()))))
    }

    /// Display name of `attribute` when `selected` attributes are shown.
    pub fn attribute_name(&self, attribute: &str, selected: usize) -> String {
        match self {
            Alias::Fixed(name) if selected == 1 => name.clone(),
            Alias::Fixed(name) => {
                warn!(alias = %name, selected, "fixed alias needs exactly one attribute; ignored");
                attribute.to_string()
            }
            Alias::PerAttribute(names) => names
                .get(attribute)
                .cloned()
                .unwrap_or_else(|| attribute.to_string()),
            Alias::None | Alias::Sequence(_) => attribute.to_string(),
        }
    }

    /// Key of the row at `index`.
    pub fn row_key(&self, index: usize, replacement: Option<&str>) -> Key {
        let Alias::Sequence(source) = self else {
            return Key::Index(index);
        };
        match source.lock().next() {
            Some(Ok(name)) => Key::Name(name),
            Some(Err(err)) => {
                warn!(error = %err, index, "alias source failed");
                replacement.map_or(Key::Index(index), |r| Key::Name(r.to_string()))
            }
            None => Key::Index(index),
        }
    }
}

impl fmt::Debug for Alias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Alias::None => f.write_str("None"),
            Alias::Fixed(name) => f.debug_tuple("Fixed").field(name).finish(),
            Alias::PerAttribute(names) => f.debug_tuple("PerAttribute").field(names).finish(),
            Alias::Sequence(_) => f.write_str("Sequence(..)"),
        }
    }
}

/// Caller-supplied value formatting.
#[derive(Clone, Default)]
pub enum ValueFormatter {
    /// Values are returned as read.
    #[default]
    None,
    /// One callback for every value.
    All(FormatFn),
    /// Callbacks per attribute; other attributes are untouched.
    PerAttribute(BTreeMap<String, FormatFn>),
}

impl ValueFormatter {
    /// Formatter applying `f` to every value.
    pub fn all(f: impl Fn(&Value, &str, &str) -> Value + Send + Sync + 'static) -> Self {
        ValueFormatter::All(Arc::new(f))
    }

    /// Adds a callback for `attribute`, switching to per-attribute mode.
    pub fn with(
        self,
        attribute: &str,
        f: impl Fn(&Value, &str, &str) -> Value + Send + Sync + 'static,
    ) -> Self {
        let mut callbacks = match self {
            ValueFormatter::PerAttribute(callbacks) => callbacks,
            _ => BTreeMap::new(),
        };
        callbacks.insert(attribute.to_string(), Arc::new(f));
        ValueFormatter::PerAttribute(callbacks)
    }

    /// Formats one value.
    pub fn apply(&self, value: Value, attribute: &str, relation: &str) -> Value {
        match self {
            ValueFormatter::None => value,
            ValueFormatter::All(f) => f(&value, attribute, relation),
            ValueFormatter::PerAttribute(callbacks) => match callbacks.get(attribute) {
                Some(f) => f(&value, attribute, relation),
                None => value,
            },
        }
    }
}

impl fmt::Debug for ValueFormatter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueFormatter::None => f.write_str("None"),
            ValueFormatter::All(_) => f.write_str("All(..)"),
            ValueFormatter::PerAttribute(callbacks) => f
                .debug_tuple("PerAttribute")
                .field(&callbacks.keys().collect::<Vec<_>>())
                .finish(),
        }
    }
}

/// How values are post-processed.
#[derive(Debug, Clone)]
pub struct FormatOptions {
    /// Key renaming.
    pub alias: Alias,
    /// Value callbacks.
    pub formatter: ValueFormatter,
    /// Replaces foreign keys with logical values.
    pub check_foreign: bool,
    /// A dangling foreign key yields `NULL`.
    pub return_null: bool,
    /// A dangling foreign key yields this value (unless `return_null`).
    pub error_replacement: Option<Value>,
    /// Row key used when the alias source fails.
    pub alias_replacement: Option<String>,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            alias: Alias::None,
            formatter: ValueFormatter::None,
            check_foreign: true,
            return_null: false,
            error_replacement: None,
            alias_replacement: None,
        }
    }
}

/// Which single-element layers are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShapeOptions {
    /// Keep the relation layer.
    pub force_relation: bool,
    /// Keep the attribute layer.
    pub force_attribute: bool,
    /// Keep the row layer.
    pub force_tuple: bool,
    /// Nest rows inside attributes (`true`) or attributes inside rows.
    pub attribute_first: bool,
    /// Row layer as a list instead of a keyed map.
    pub rows_as_list: bool,
    /// Row layer as a list of distinct values.
    pub values_as_set: bool,
}

impl Default for ShapeOptions {
    fn default() -> Self {
        Self {
            force_relation: false,
            force_attribute: false,
            force_tuple: false,
            attribute_first: true,
            rows_as_list: false,
            values_as_set: false,
        }
    }
}

impl ShapeOptions {
    /// Keeps every layer.
    pub fn nested() -> Self {
        Self {
            force_relation: true,
            force_attribute: true,
            force_tuple: true,
            ..Self::default()
        }
    }
}

/// Key of one entry in a [`Shape::Map`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
    /// Relation, attribute or aliased row name.
    Name(String),
    /// Row position.
    Index(usize),
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        Key::Name(name.to_string())
    }
}

impl From<String> for Key {
    fn from(name: String) -> Self {
        Key::Name(name)
    }
}

impl From<usize> for Key {
    fn from(index: usize) -> Self {
        Key::Index(index)
    }
}

/// Shaped query result.
///
/// # Examples
///
/// ```
/// use relkit_core::Value;
/// use relkit_sqlite::{Key, Shape};
///
/// let shape = Shape::Map(vec![(Key::from("name"), Shape::Map(vec![(Key::Index(0), Shape::from("Lorem"))]))]);
/// let first = shape.get("name").and_then(|rows| rows.get(Key::Index(0)));
/// assert_eq!(first.and_then(Shape::as_value), Some(&Value::from("Lorem")));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    /// A single value.
    Value(Value),
    /// Unkeyed entries.
    List(Vec<Shape>),
    /// Keyed entries in result order.
    Map(Vec<(Key, Shape)>),
}

impl Shape {
    /// The value, if this is a leaf.
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Shape::Value(value) => Some(value),
            _ => None,
        }
    }

    /// Entry under `key`; list entries are addressed by index.
    pub fn get(&self, key: impl Into<Key>) -> Option<&Shape> {
        let key = key.into();
        match (self, &key) {
            (Shape::Map(entries), _) => entries.iter().find(|(k, _)| *k == key).map(|(_, v)| v),
            (Shape::List(items), Key::Index(index)) => items.get(*index),
            _ => None,
        }
    }

    /// Number of entries; `1` for a leaf.
    pub fn len(&self) -> usize {
        match self {
            Shape::Value(_) => 1,
            Shape::List(items) => items.len(),
            Shape::Map(entries) => entries.len(),
        }
    }

    /// Returns `true` for an empty list or map.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every leaf value in order.
    pub fn values(&self) -> Vec<Value> {
        match self {
            Shape::Value(value) => vec![value.clone()],
            Shape::List(items) => items.iter().flat_map(Shape::values).collect(),
            Shape::Map(entries) => entries.iter().flat_map(|(_, v)| v.values()).collect(),
        }
    }
}

macro_rules! shape_from_value {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Shape {
            fn from(value: $ty) -> Self {
                Shape::Value(Value::from(value))
            }
        })*
    };
}

shape_from_value!(i32, i64, f64, bool, &str, String);

impl From<Value> for Shape {
    fn from(value: Value) -> Self {
        Shape::Value(value)
    }
}

/// Formatted rows of one relation, ready for shaping.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Table {
    pub(crate) relation: String,
    /// Attribute behind each column, before aliasing.
    pub(crate) attributes: Vec<String>,
    pub(crate) columns: Vec<String>,
    pub(crate) row_keys: Vec<Key>,
    pub(crate) rows: Vec<Vec<Value>>,
}

impl Table {
    /// Runs `formatter` over every value in place.
    pub(crate) fn apply_formatter(&mut self, formatter: &ValueFormatter) {
        if matches!(formatter, ValueFormatter::None) {
            return;
        }
        for row in &mut self.rows {
            for (value, attribute) in row.iter_mut().zip(&self.attributes) {
                let raw = std::mem::replace(value, Value::Null);
                *value = formatter.apply(raw, attribute, &self.relation);
            }
        }
    }
}

fn collapse(entries: Vec<(Key, Shape)>, force: bool) -> Shape {
    let mut entries = entries;
    if !force && entries.len() == 1 {
        if let Some((_, only)) = entries.pop() {
            return only;
        }
    }
    Shape::Map(entries)
}

fn row_layer(values: Vec<Value>, keys: &[Key], options: &ShapeOptions) -> Shape {
    if values.is_empty() && !options.force_tuple {
        return Shape::Value(Value::Null);
    }
    if options.values_as_set || options.rows_as_list {
        let mut items: Vec<Value> = Vec::with_capacity(values.len());
        for value in values {
            if !options.values_as_set || !items.contains(&value) {
                items.push(value);
            }
        }
        if items.len() == 1 && !options.force_tuple {
            return items.pop().map(Shape::Value).unwrap_or(Shape::Value(Value::Null));
        }
        return Shape::List(items.into_iter().map(Shape::Value).collect());
    }
    let entries = keys
        .iter()
        .cloned()
        .zip(values.into_iter().map(Shape::Value))
        .collect();
    collapse(entries, options.force_tuple)
}

fn shape_table(table: Table, options: &ShapeOptions) -> Shape {
    let Table {
        columns,
        row_keys,
        rows,
        ..
    } = table;
    if options.attribute_first {
        let entries = columns
            .iter()
            .enumerate()
            .map(|(index, column)| {
                let values = rows.iter().map(|row| row[index].clone()).collect();
                (Key::Name(column.clone()), row_layer(values, &row_keys, options))
            })
            .collect();
        return collapse(entries, options.force_attribute);
    }
    if rows.is_empty() && !options.force_tuple {
        return Shape::Value(Value::Null);
    }
    let per_row: Vec<(Key, Shape)> = row_keys
        .into_iter()
        .zip(rows)
        .map(|(key, row)| {
            let attributes = columns
                .iter()
                .cloned()
                .map(Key::Name)
                .zip(row.into_iter().map(Shape::Value))
                .collect();
            (key, collapse(attributes, options.force_attribute))
        })
        .collect();
    if options.rows_as_list || options.values_as_set {
        if per_row.len() == 1 && !options.force_tuple {
            return collapse(per_row, false);
        }
        return Shape::List(per_row.into_iter().map(|(_, shape)| shape).collect());
    }
    collapse(per_row, options.force_tuple)
}

/// Shapes formatted tables into the nested result.
pub(crate) fn shape(tables: Vec<Table>, options: &ShapeOptions) -> Shape {
    let entries = tables
        .into_iter()
        .map(|table| (Key::Name(table.relation.clone()), shape_table(table, options)))
        .collect();
    collapse(entries, options.force_relation)
}

impl Session {
    /// Logical value behind one stored value of `relation.attribute`.
    ///
    /// Linked attributes are looked up in their foreign relation; a missing
    /// foreign row follows `return_null` and `error_replacement`.
    pub(crate) fn logical_value(
        &mut self,
        relation: &str,
        attribute: &str,
        stored: Value,
        options: &FormatOptions,
    ) -> Result<Value> {
        if !options.check_foreign || self.catalogue.link(relation, attribute).is_none() {
            return Ok(stored);
        }
        match self.reverse_lookup(relation, attribute, &stored)? {
            Some(value) => Ok(value),
            None if options.return_null => Ok(Value::Null),
            None => match &options.error_replacement {
                Some(replacement) => Ok(replacement.clone()),
                None => Err(Error::ValueNotFound(format!(
                    "{relation}.{attribute} = {stored}"
                ))),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users(rows: Vec<Vec<Value>>) -> Table {
        let row_keys = (0..rows.len()).map(Key::Index).collect();
        Table {
            relation: "Users".into(),
            attributes: vec!["name".into(), "age".into()],
            columns: vec!["name".into(), "age".into()],
            row_keys,
            rows,
        }
    }

    fn single(value: &str) -> Table {
        Table {
            relation: "Users".into(),
            attributes: vec!["name".into()],
            columns: vec!["name".into()],
            row_keys: vec![Key::Index(0)],
            rows: vec![vec![Value::from(value)]],
        }
    }

    #[test]
    fn test_single_value_collapses_to_scalar() {
        assert_eq!(
            shape(vec![single("Lorem")], &ShapeOptions::default()),
            Shape::from("Lorem")
        );
    }

    #[test]
    fn test_each_force_flag_keeps_its_layer() {
        let attribute = shape(
            vec![single("Lorem")],
            &ShapeOptions {
                force_attribute: true,
                ..ShapeOptions::default()
            },
        );
        assert_eq!(
            attribute,
            Shape::Map(vec![(Key::from("name"), Shape::from("Lorem"))])
        );

        let tuple = shape(
            vec![single("Lorem")],
            &ShapeOptions {
                force_tuple: true,
                ..ShapeOptions::default()
            },
        );
        assert_eq!(tuple, Shape::Map(vec![(Key::Index(0), Shape::from("Lorem"))]));

        let relation = shape(
            vec![single("Lorem")],
            &ShapeOptions {
                force_relation: true,
                ..ShapeOptions::default()
            },
        );
        assert_eq!(
            relation,
            Shape::Map(vec![(Key::from("Users"), Shape::from("Lorem"))])
        );
    }

    #[test]
    fn test_multiple_elements_never_collapse() {
        let shaped = shape(
            vec![users(vec![
                vec![Value::from("Lorem"), Value::from(26)],
                vec![Value::from("Ipsum"), Value::from(30)],
            ])],
            &ShapeOptions::default(),
        );
        let ages = shaped.get("age").unwrap();
        assert_eq!(ages.get(Key::Index(1)).and_then(Shape::as_value), Some(&Value::from(30)));
        assert_eq!(shaped.len(), 2);
    }

    #[test]
    fn test_row_first_orientation() {
        let shaped = shape(
            vec![users(vec![vec![Value::from("Lorem"), Value::from(26)]])],
            &ShapeOptions {
                attribute_first: false,
                force_tuple: true,
                ..ShapeOptions::default()
            },
        );
        let row = shaped.get(Key::Index(0)).unwrap();
        assert_eq!(row.get("age").and_then(Shape::as_value), Some(&Value::from(26)));
    }

    #[test]
    fn test_values_as_set_deduplicates() {
        let shaped = shape(
            vec![Table {
                relation: "Users".into(),
                attributes: vec!["age".into()],
                columns: vec!["age".into()],
                row_keys: vec![Key::Index(0), Key::Index(1), Key::Index(2)],
                rows: vec![vec![Value::from(1)], vec![Value::from(2)], vec![Value::from(1)]],
            }],
            &ShapeOptions {
                values_as_set: true,
                ..ShapeOptions::default()
            },
        );
        assert_eq!(shaped, Shape::List(vec![Shape::from(1), Shape::from(2)]));
    }

    #[test]
    fn test_empty_result_is_null_unless_forced() {
        assert_eq!(
            shape(vec![users(Vec::new())], &ShapeOptions {
                force_attribute: false,
                ..ShapeOptions::default()
            })
            .get("name")
            .cloned(),
            Some(Shape::Value(Value::Null))
        );
        let forced = shape(vec![users(Vec::new())], &ShapeOptions::nested());
        assert!(forced.get("Users").and_then(|s| s.get("name")).unwrap().is_empty());
    }

    #[test]
    fn test_aliases() {
        assert_eq!(Alias::Fixed("who".into()).attribute_name("name", 1), "who");
        assert_eq!(Alias::Fixed("who".into()).attribute_name("name", 2), "name");
        let per = Alias::PerAttribute(BTreeMap::from([("age".to_string(), "years".to_string())]));
        assert_eq!(per.attribute_name("age", 2), "years");
        assert_eq!(per.attribute_name("name", 2), "name");

        let rows = Alias::sequence(vec![Ok("first".to_string()), Err("broken".to_string())]);
        assert_eq!(rows.row_key(0, Some("?")), Key::from("first"));
        assert_eq!(rows.row_key(1, Some("?")), Key::from("?"));
        assert_eq!(rows.row_key(2, None), Key::Index(2));
    }

    #[test]
    fn test_value_formatter() {
        let upper = ValueFormatter::all(|value, _, _| match value.as_text() {
            Some(text) => Value::from(text.to_uppercase()),
            None => value.clone(),
        });
        assert_eq!(upper.apply(Value::from("abc"), "name", "Users"), Value::from("ABC"));

        let per = ValueFormatter::None.with("age", |value, attribute, relation| {
            Value::from(format!("{relation}.{attribute}={value}"))
        });
        assert_eq!(per.apply(Value::from(3), "age", "Users"), Value::from("Users.age=3"));
        assert_eq!(per.apply(Value::from(3), "id", "Users"), Value::from(3));
    }

    #[test]
    fn test_table_formatter_sees_attribute_not_alias() {
        let mut table = users(vec![vec![Value::from("Lorem"), Value::from(26)]]);
        table.columns = vec!["Name".into(), "Age".into()];
        table.apply_formatter(&ValueFormatter::all(|value, attribute, relation| {
            Value::from(format!("{relation}.{attribute}={value}"))
        }));
        assert_eq!(
            table.rows,
            vec![vec![Value::from("Users.name='Lorem'"), Value::from("Users.age=26")]]
        );
    }
}
