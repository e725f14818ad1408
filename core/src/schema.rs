//! Relation and attribute definitions.
//!
//! These types describe a relation the way the engine reports it (via
//! introspection) and the way callers request it (via the mutation engine
//! or a migration target). They serialize with [`serde`], so migration
//! targets can be stored as JSON or YAML.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::normalize::validate_identifier;
use crate::value::Value;

/// Logical data type of an attribute.
///
/// Each variant maps to the engine-native type name returned by
/// [`sql_name`](DataType::sql_name). Declared types read back from the
/// engine are mapped with SQLite's affinity rules in
/// [`from_declared`](DataType::from_declared).
///
/// # Examples
///
/// ```
/// use relkit_core::DataType;
///
/// assert_eq!(DataType::from_declared("VARCHAR(40)"), DataType::Text);
/// assert_eq!(DataType::from_declared("BIGINT"), DataType::Integer);
/// assert_eq!(DataType::Boolean.sql_name(), "BOOLEAN");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum DataType {
    /// Whole numbers.
    Integer,
    /// Floating point numbers.
    Real,
    /// Text (the default).
    #[default]
    Text,
    /// Raw bytes.
    Blob,
    /// Booleans, stored as `0 | 1`.
    Boolean,
    /// Decimal numbers.
    Numeric,
    /// Calendar date, stored as ISO-8601 text.
    Date,
    /// Date and time, stored as ISO-8601 text.
    DateTime,
}

impl DataType {
    /// Engine-native type name used in `CREATE TABLE`.
    pub fn sql_name(self) -> &'static str {
        match self {
            DataType::Integer => "INTEGER",
            DataType::Real => "REAL",
            DataType::Text => "TEXT",
            DataType::Blob => "BLOB",
            DataType::Boolean => "BOOLEAN",
            DataType::Numeric => "NUMERIC",
            DataType::Date => "DATE",
            DataType::DateTime => "DATETIME",
        }
    }

    /// Maps a declared column type to a logical type.
    ///
    /// Exact names produced by [`sql_name`](Self::sql_name) round-trip;
    /// anything else falls back to SQLite column affinity.
    pub fn from_declared(declared: &str) -> Self {
        let upper = declared.trim().to_ascii_uppercase();
        match upper.as_str() {
            "BOOLEAN" | "BOOL" => return DataType::Boolean,
            "DATE" => return DataType::Date,
            "DATETIME" | "TIMESTAMP" => return DataType::DateTime,
            "" => return DataType::Blob,
            _ => {}
        }
        if upper.contains("INT") {
            DataType::Integer
        } else if upper.contains("CHAR") || upper.contains("CLOB") || upper.contains("TEXT") {
            DataType::Text
        } else if upper.contains("BLOB") {
            DataType::Blob
        } else if upper.contains("REAL") || upper.contains("FLOA") || upper.contains("DOUB") {
            DataType::Real
        } else {
            DataType::Numeric
        }
    }

    /// Parses a user-facing type label such as `"int"` or `"str"`.
    pub fn parse(label: &str) -> Result<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "integer" | "int" => Ok(DataType::Integer),
            "real" | "float" | "double" => Ok(DataType::Real),
            "text" | "str" | "string" => Ok(DataType::Text),
            "blob" | "bytes" => Ok(DataType::Blob),
            "boolean" | "bool" => Ok(DataType::Boolean),
            "numeric" | "decimal" => Ok(DataType::Numeric),
            "date" => Ok(DataType::Date),
            "datetime" | "timestamp" => Ok(DataType::DateTime),
            other => Err(CoreError::UnknownDataType(other.to_string())),
        }
    }
}

/// Directed edge from a domestic attribute to a foreign attribute.
///
/// The domestic attribute stores the primary key of the row in
/// `relation` whose `attribute` holds the caller-visible value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ForeignLink {
    /// Foreign relation name.
    pub relation: String,
    /// Attribute in the foreign relation holding the logical value.
    pub attribute: String,
}

impl ForeignLink {
    /// Creates a link to `relation.attribute`.
    pub fn new(relation: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self {
            relation: relation.into(),
            attribute: attribute.into(),
        }
    }
}

/// Definition of one attribute (column).
///
/// # Examples
///
/// ```
/// use relkit_core::{AttributeDef, DataType};
///
/// let name = AttributeDef::new("name", DataType::Integer).references("Names", "first_name");
/// assert!(name.foreign.is_some());
///
/// let id = AttributeDef::primary_key("id");
/// assert!(id.primary && id.auto_increment);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDef {
    /// Attribute name.
    pub name: String,
    /// Logical type.
    #[serde(default)]
    pub data_type: DataType,
    /// Rejects `NULL` when set.
    #[serde(default)]
    pub not_null: bool,
    /// Default value used when an insert omits the attribute.
    #[serde(default)]
    pub default: Option<Value>,
    /// Default given as an SQL expression, such as `CURRENT_TIMESTAMP`.
    ///
    /// Takes precedence over `default` when both are set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_expression: Option<String>,
    /// Enforces uniqueness across rows.
    #[serde(default)]
    pub unique: bool,
    /// Marks the primary key.
    #[serde(default)]
    pub primary: bool,
    /// Primary key values are generated by the engine.
    #[serde(default)]
    pub auto_increment: bool,
    /// Optional foreign link.
    #[serde(default)]
    pub foreign: Option<ForeignLink>,
}

impl AttributeDef {
    /// Creates a nullable attribute with no constraints.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            not_null: false,
            default: None,
            default_expression: None,
            unique: false,
            primary: false,
            auto_increment: false,
            foreign: None,
        }
    }

    /// Creates an auto-incrementing integer primary key.
    pub fn primary_key(name: impl Into<String>) -> Self {
        Self {
            primary: true,
            auto_increment: true,
            ..Self::new(name, DataType::Integer)
        }
    }

    /// Sets `NOT NULL`.
    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    /// Sets `UNIQUE`.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Sets the default value.
    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Sets an SQL expression evaluated by the engine on insert.
    pub fn with_default_expression(mut self, sql: impl Into<String>) -> Self {
        self.default_expression = Some(sql.into());
        self
    }

    /// Links this attribute to `relation.attribute`.
    ///
    /// The data type becomes `Integer` since the column stores surrogate keys.
    pub fn references(mut self, relation: impl Into<String>, attribute: impl Into<String>) -> Self {
        self.data_type = DataType::Integer;
        self.foreign = Some(ForeignLink::new(relation, attribute));
        self
    }

    /// Returns `true` if adding this attribute to an existing relation
    /// cannot be done with a plain `ALTER TABLE ADD COLUMN`.
    ///
    /// The engine rejects `NOT NULL` without a default and non-constant
    /// defaults, and unique, primary and foreign constraints cannot be
    /// attached in place.
    pub fn requires_rebuild(&self) -> bool {
        let missing_default = self.not_null && self.default.as_ref().is_none_or(Value::is_null);
        missing_default
            || self.default_expression.is_some()
            || self.unique
            || self.primary
            || self.foreign.is_some()
    }

    /// Returns `true` if the definitions differ in anything but the name.
    pub fn differs_from(&self, other: &AttributeDef) -> bool {
        self.data_type != other.data_type
            || self.not_null != other.not_null
            || self.default != other.default
            || self.default_expression != other.default_expression
            || self.unique != other.unique
            || self.primary != other.primary
            || self.auto_increment != other.auto_increment
            || self.foreign != other.foreign
    }
}

/// Ordered set of attributes making up one relation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationSchema {
    /// Relation name.
    pub name: String,
    /// Attributes in column order.
    pub attributes: Vec<AttributeDef>,
}

impl RelationSchema {
    /// Creates an empty relation schema.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
        }
    }

    /// Appends an attribute (builder style).
    pub fn with_attribute(mut self, attribute: AttributeDef) -> Self {
        self.attributes.push(attribute);
        self
    }

    /// Looks up an attribute by name.
    pub fn attribute(&self, name: &str) -> Option<&AttributeDef> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Attribute names in column order.
    pub fn attribute_names(&self) -> Vec<String> {
        self.attributes.iter().map(|a| a.name.clone()).collect()
    }

    /// Name of the primary key attribute, if any.
    pub fn primary_key(&self) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.primary)
            .map(|a| a.name.as_str())
    }

    /// Foreign links keyed by domestic attribute.
    pub fn foreign_links(&self) -> BTreeMap<String, ForeignLink> {
        self.attributes
            .iter()
            .filter_map(|a| a.foreign.clone().map(|link| (a.name.clone(), link)))
            .collect()
    }

    /// Checks identifiers, duplicate attributes, and the single-primary-key rule.
    pub fn validate(&self) -> Result<()> {
        validate_identifier(&self.name)?;
        let mut primaries = 0;
        for (index, attribute) in self.attributes.iter().enumerate() {
            validate_identifier(&attribute.name)?;
            if let Some(link) = &attribute.foreign {
                validate_identifier(&link.relation)?;
                validate_identifier(&link.attribute)?;
            }
            if self.attributes[..index]
                .iter()
                .any(|a| a.name == attribute.name)
            {
                return Err(CoreError::DuplicateAttribute {
                    relation: self.name.clone(),
                    attribute: attribute.name.clone(),
                });
            }
            if attribute.primary {
                primaries += 1;
            }
        }
        if primaries > 1 {
            return Err(CoreError::MultiplePrimaryKeys(self.name.clone()));
        }
        Ok(())
    }

    /// Produces the schema obtained by replacing/appending `delta` and
    /// dropping the attributes named in `remove`.
    ///
    /// Existing attributes keep their position; new ones are appended.
    ///
    /// # Examples
    ///
    /// ```
    /// use relkit_core::{AttributeDef, DataType, RelationSchema};
    ///
    /// let users = RelationSchema::new("Users")
    ///     .with_attribute(AttributeDef::primary_key("id"))
    ///     .with_attribute(AttributeDef::new("age", DataType::Integer));
    ///
    /// let merged = users.merge(&[AttributeDef::new("height", DataType::Integer)], &["age"]);
    /// assert_eq!(merged.attribute_names(), vec!["id", "height"]);
    /// ```
    pub fn merge<S: AsRef<str>>(&self, delta: &[AttributeDef], remove: &[S]) -> RelationSchema {
        let mut attributes: Vec<AttributeDef> = self
            .attributes
            .iter()
            .filter(|a| !remove.iter().any(|r| r.as_ref() == a.name))
            .cloned()
            .collect();
        for change in delta {
            match attributes.iter_mut().find(|a| a.name == change.name) {
                Some(existing) => *existing = change.clone(),
                None => attributes.push(change.clone()),
            }
        }
        RelationSchema {
            name: self.name.clone(),
            attributes,
        }
    }

    /// Flattened per-property view of the schema.
    pub fn report(&self) -> SchemaReport {
        let mut report = SchemaReport::default();
        for a in &self.attributes {
            report.schema.insert(a.name.clone(), a.data_type);
            report.not_null.insert(a.name.clone(), a.not_null);
            report.primary.insert(a.name.clone(), a.primary);
            report.unique.insert(a.name.clone(), a.unique);
            report.auto_increment.insert(a.name.clone(), a.auto_increment);
            if let Some(default) = &a.default {
                report.default.insert(a.name.clone(), default.clone());
            }
            if let Some(expression) = &a.default_expression {
                report
                    .default_expression
                    .insert(a.name.clone(), expression.clone());
            }
            if let Some(link) = &a.foreign {
                report
                    .foreign
                    .entry(a.name.clone())
                    .or_default()
                    .insert(link.relation.clone(), link.attribute.clone());
            }
        }
        report
    }
}

/// Per-property mappings describing a relation.
///
/// Each map is keyed by attribute name. `foreign` maps an attribute to
/// `{foreign_relation: foreign_attribute}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaReport {
    /// Logical type per attribute.
    pub schema: BTreeMap<String, DataType>,
    /// `NOT NULL` flag per attribute.
    pub not_null: BTreeMap<String, bool>,
    /// Primary key flag per attribute.
    pub primary: BTreeMap<String, bool>,
    /// Default value per attribute (only attributes that declare one).
    pub default: BTreeMap<String, Value>,
    /// Default expression per attribute (only attributes that declare one).
    #[serde(default)]
    pub default_expression: BTreeMap<String, String>,
    /// Unique flag per attribute.
    pub unique: BTreeMap<String, bool>,
    /// Auto-increment flag per attribute.
    pub auto_increment: BTreeMap<String, bool>,
    /// Foreign links per attribute.
    pub foreign: BTreeMap<String, BTreeMap<String, String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> RelationSchema {
        RelationSchema::new("Users")
            .with_attribute(AttributeDef::primary_key("id"))
            .with_attribute(AttributeDef::new("name", DataType::Integer).references("Names", "first_name"))
            .with_attribute(AttributeDef::new("age", DataType::Integer))
            .with_attribute(AttributeDef::new("height", DataType::Integer))
    }

    #[test]
    fn test_affinity_mapping() {
        assert_eq!(DataType::from_declared("INTEGER"), DataType::Integer);
        assert_eq!(DataType::from_declared("nvarchar(10)"), DataType::Text);
        assert_eq!(DataType::from_declared("DOUBLE PRECISION"), DataType::Real);
        assert_eq!(DataType::from_declared("DECIMAL(10,5)"), DataType::Numeric);
        assert_eq!(DataType::from_declared(""), DataType::Blob);
        assert_eq!(DataType::from_declared("bool"), DataType::Boolean);
    }

    #[test]
    fn test_sql_name_round_trips() {
        for ty in [
            DataType::Integer,
            DataType::Real,
            DataType::Text,
            DataType::Blob,
            DataType::Boolean,
            DataType::Numeric,
            DataType::Date,
            DataType::DateTime,
        ] {
            assert_eq!(DataType::from_declared(ty.sql_name()), ty);
        }
    }

    #[test]
    fn test_parse_labels() {
        assert_eq!(DataType::parse("int").unwrap(), DataType::Integer);
        assert_eq!(DataType::parse("str").unwrap(), DataType::Text);
        assert!(DataType::parse("uuid").is_err());
    }

    #[test]
    fn test_requires_rebuild() {
        assert!(!AttributeDef::new("a", DataType::Text).requires_rebuild());
        assert!(
            !AttributeDef::new("a", DataType::Text)
                .not_null()
                .with_default("x")
                .requires_rebuild()
        );
        assert!(AttributeDef::new("a", DataType::Text).not_null().requires_rebuild());
        assert!(AttributeDef::new("a", DataType::Text).unique().requires_rebuild());
        assert!(
            AttributeDef::new("at", DataType::DateTime)
                .with_default_expression("CURRENT_TIMESTAMP")
                .requires_rebuild()
        );
        assert!(
            AttributeDef::new("a", DataType::Integer)
                .references("B", "c")
                .requires_rebuild()
        );
    }

    #[test]
    fn test_validate_rejects_duplicates() {
        let schema = users().with_attribute(AttributeDef::new("age", DataType::Text));
        assert!(matches!(
            schema.validate(),
            Err(CoreError::DuplicateAttribute { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_two_primary_keys() {
        let schema = users().with_attribute(AttributeDef::primary_key("other"));
        assert_eq!(
            schema.validate(),
            Err(CoreError::MultiplePrimaryKeys("Users".into()))
        );
    }

    #[test]
    fn test_merge_replaces_and_appends() {
        let merged = users().merge(
            &[
                AttributeDef::new("age", DataType::Real),
                AttributeDef::new("email", DataType::Text),
            ],
            &["height"],
        );
        assert_eq!(merged.attribute_names(), vec!["id", "name", "age", "email"]);
        assert_eq!(merged.attribute("age").unwrap().data_type, DataType::Real);
    }

    #[test]
    fn test_report_views() {
        let report = users().report();
        assert_eq!(report.schema["age"], DataType::Integer);
        assert!(report.primary["id"]);
        assert_eq!(report.foreign["name"]["Names"], "first_name");
        assert!(!report.default.contains_key("age"));
    }

    #[test]
    fn test_schema_serde_json() {
        let json = serde_json::to_string(&users()).unwrap();
        let back: RelationSchema = serde_json::from_str(&json).unwrap();
        assert_eq!(back, users());
    }
}
