//! SQL generation for relation definitions.
//!
//! Turns a [`RelationSchema`] into `CREATE TABLE` text and single
//! attributes into column definitions, and reads default expressions back
//! from the catalogue.
//!
//! # Table structure
//!
//! Every column is emitted as
//!
//! ```text
//! "name" TYPE [PRIMARY KEY [AUTOINCREMENT]] [NOT NULL] [UNIQUE] [DEFAULT literal-or-expression]
//! ```
//!
//! followed by one `FOREIGN KEY ("attr") REFERENCES "Foreign"("attr")`
//! clause per foreign link. The referenced column is the *logical* value
//! column; the domestic column stores the foreign row's primary key.

use relkit_core::{AttributeDef, DataType, RelationSchema, Value, quote_identifier};

use crate::error::Result;

/// Suffix appended to a relation name while it is being rebuilt.
pub const REBUILD_SUFFIX: &str = "__rebuild";

/// Name of the temporary table used while rebuilding `relation`.
pub fn rebuild_table_name(relation: &str) -> String {
    format!("{relation}{REBUILD_SUFFIX}")
}

/// Renders a value as an SQL literal.
pub fn literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Integer(v) => v.to_string(),
        Value::Real(v) => format!("{v:?}"),
        Value::Text(v) => format!("'{}'", v.replace('\'', "''")),
        Value::Blob(bytes) => {
            let hex: String = bytes.iter().map(|b| format!("{b:02X}")).collect();
            format!("X'{hex}'")
        }
    }
}

/// Default clause as read back from the catalogue.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnDefault {
    /// A constant that round-trips through [`literal`].
    Literal(Value),
    /// Any other expression, kept as SQL text.
    Expression(String),
}

/// Parses a default expression as reported by `PRAGMA table_info`.
pub fn parse_default(sql: &str) -> Option<ColumnDefault> {
    let sql = sql.trim();
    if sql.eq_ignore_ascii_case("NULL") {
        return None;
    }
    if sql.len() >= 2 && sql.starts_with('\'') && sql.ends_with('\'') {
        let inner = &sql[1..sql.len() - 1];
        if !inner.replace("''", "").contains('\'') {
            return Some(ColumnDefault::Literal(Value::Text(inner.replace("''", "'"))));
        }
    }
    if let Ok(v) = sql.parse::<i64>() {
        return Some(ColumnDefault::Literal(Value::Integer(v)));
    }
    if let Ok(v) = sql.parse::<f64>() {
        if v.is_finite() {
            return Some(ColumnDefault::Literal(Value::Real(v)));
        }
    }
    let upper = sql.to_ascii_uppercase();
    if upper.starts_with("X'") && sql.ends_with('\'') {
        let hex = &sql[2..sql.len() - 1];
        let bytes: Option<Vec<u8>> = (0..hex.len())
            .step_by(2)
            .map(|i| hex.get(i..i + 2).and_then(|h| u8::from_str_radix(h, 16).ok()))
            .collect();
        if let Some(bytes) = bytes {
            return Some(ColumnDefault::Literal(Value::Blob(bytes)));
        }
    }
    Some(ColumnDefault::Expression(sql.to_string()))
}

/// Renders a default expression for a `DEFAULT` clause.
///
/// The `CURRENT_*` keywords stand alone; anything else is parenthesised.
fn expression_clause(sql: &str) -> String {
    let sql = sql.trim();
    let keyword = ["CURRENT_TIME", "CURRENT_DATE", "CURRENT_TIMESTAMP"]
        .iter()
        .any(|k| sql.eq_ignore_ascii_case(k));
    if keyword || (sql.starts_with('(') && sql.ends_with(')')) {
        sql.to_string()
    } else {
        format!("({sql})")
    }
}

/// Column definition for one attribute, without foreign key clauses.
///
/// # Errors
///
/// Returns an error if the attribute name is not a valid identifier.
pub fn column_definition(attribute: &AttributeDef) -> Result<String> {
    let mut sql = format!(
        "{} {}",
        quote_identifier(&attribute.name)?,
        attribute.data_type.sql_name()
    );
    if attribute.primary {
        sql.push_str(" PRIMARY KEY");
        if attribute.auto_increment && attribute.data_type == DataType::Integer {
            sql.push_str(" AUTOINCREMENT");
        }
    }
    if attribute.not_null {
        sql.push_str(" NOT NULL");
    }
    if attribute.unique && !attribute.primary {
        sql.push_str(" UNIQUE");
    }
    if let Some(expression) = &attribute.default_expression {
        sql.push_str(" DEFAULT ");
        sql.push_str(&expression_clause(expression));
    } else if let Some(default) = attribute.default.as_ref().filter(|v| !v.is_null()) {
        sql.push_str(" DEFAULT ");
        sql.push_str(&literal(default));
    }
    Ok(sql)
}

/// Generates `CREATE TABLE` for a relation.
///
/// # Errors
///
/// Returns an error if the schema fails validation.
///
/// # Examples
///
/// ```
/// use relkit_core::{AttributeDef, DataType, RelationSchema};
/// use relkit_sqlite::create_table_sql;
///
/// let users = RelationSchema::new("Users")
///     .with_attribute(AttributeDef::primary_key("id"))
///     .with_attribute(AttributeDef::new("name", DataType::Integer).references("Names", "first_name"));
///
/// let sql = create_table_sql(&users).unwrap();
/// assert!(sql.starts_with("CREATE TABLE \"Users\""));
/// assert!(sql.contains("FOREIGN KEY (\"name\") REFERENCES \"Names\"(\"first_name\")"));
/// ```
pub fn create_table_sql(schema: &RelationSchema) -> Result<String> {
    schema.validate()?;
    let mut parts = Vec::with_capacity(schema.attributes.len());
    for attribute in &schema.attributes {
        parts.push(column_definition(attribute)?);
    }
    for attribute in &schema.attributes {
        if let Some(link) = &attribute.foreign {
            parts.push(format!(
                "FOREIGN KEY ({}) REFERENCES {}({})",
                quote_identifier(&attribute.name)?,
                quote_identifier(&link.relation)?,
                quote_identifier(&link.attribute)?
            ));
        }
    }
    Ok(format!(
        "CREATE TABLE {} ({})",
        quote_identifier(&schema.name)?,
        parts.join(", ")
    ))
}

/// Generates `ALTER TABLE ... ADD COLUMN` for an attribute that can be
/// added in place.
pub fn add_column_sql(relation: &str, attribute: &AttributeDef) -> Result<String> {
    Ok(format!(
        "ALTER TABLE {} ADD COLUMN {}",
        quote_identifier(relation)?,
        column_definition(attribute)?
    ))
}

/// Generates `ALTER TABLE ... RENAME TO`.
pub fn rename_table_sql(from: &str, to: &str) -> Result<String> {
    Ok(format!(
        "ALTER TABLE {} RENAME TO {}",
        quote_identifier(from)?,
        quote_identifier(to)?
    ))
}

/// Generates `DROP TABLE`.
pub fn drop_table_sql(relation: &str) -> Result<String> {
    Ok(format!("DROP TABLE {}", quote_identifier(relation)?))
}

/// Generates a parameterized `INSERT` for the given columns.
pub fn insert_sql(relation: &str, columns: &[String]) -> Result<String> {
    insert_sql_with("INSERT", relation, columns)
}

/// [`insert_sql`] with another verb, such as `INSERT OR REPLACE`.
pub(crate) fn insert_sql_with(verb: &str, relation: &str, columns: &[String]) -> Result<String> {
    if columns.is_empty() {
        return Ok(format!("{verb} INTO {} DEFAULT VALUES", quote_identifier(relation)?));
    }
    let quoted = columns
        .iter()
        .map(|c| quote_identifier(c))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let placeholders = vec!["?"; columns.len()].join(", ");
    Ok(format!(
        "{verb} INTO {} ({}) VALUES ({})",
        quote_identifier(relation)?,
        quoted.join(", "),
        placeholders
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use relkit_core::RelationDefinition;

    fn users() -> RelationSchema {
        RelationSchema::new("Users")
            .with_attribute(AttributeDef::primary_key("id"))
            .with_attribute(AttributeDef::new("name", DataType::Integer).references("Names", "first_name"))
            .with_attribute(AttributeDef::new("age", DataType::Integer).not_null().with_default(0))
            .with_attribute(AttributeDef::new("email", DataType::Text).unique())
    }

    #[test]
    fn test_column_definitions() {
        let schema = users();
        assert_eq!(
            column_definition(&schema.attributes[0]).unwrap(),
            "\"id\" INTEGER PRIMARY KEY AUTOINCREMENT"
        );
        assert_eq!(
            column_definition(&schema.attributes[2]).unwrap(),
            "\"age\" INTEGER NOT NULL DEFAULT 0"
        );
        assert_eq!(
            column_definition(&schema.attributes[3]).unwrap(),
            "\"email\" TEXT UNIQUE"
        );
    }

    #[test]
    fn test_create_table_sql_executes() {
        let sql = create_table_sql(&users()).unwrap();
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch(&sql).unwrap();
        conn.execute("INSERT INTO Users (name, email) VALUES (1, 'a@b')", [])
            .unwrap();
        let age: i64 = conn
            .query_row("SELECT age FROM Users", [], |row| row.get(0))
            .unwrap();
        assert_eq!(age, 0);
    }

    #[test]
    fn test_create_table_rejects_invalid_names() {
        let schema = RelationSchema::new("bad name").with_attribute(AttributeDef::primary_key("id"));
        assert!(create_table_sql(&schema).is_err());
    }

    #[test]
    fn test_field_group_definition_renders() {
        let schema = RelationDefinition::new("Colors")
            .with_choice(Default::default())
            .to_schema()
            .unwrap();
        let sql = create_table_sql(&schema).unwrap();
        assert!(sql.contains("\"label\" TEXT NOT NULL UNIQUE"));
    }

    #[test]
    fn test_literals_round_trip_through_parse_default() {
        for value in [
            Value::Integer(-3),
            Value::Real(2.5),
            Value::Text("it's".into()),
            Value::Blob(vec![0xAB, 0x01]),
        ] {
            assert_eq!(parse_default(&literal(&value)), Some(ColumnDefault::Literal(value)));
        }
        assert_eq!(parse_default("NULL"), None);
    }

    #[test]
    fn test_expression_defaults_stay_expressions() {
        for sql in ["CURRENT_TIMESTAMP", "(datetime('now'))", "'a' || 'b'"] {
            assert_eq!(
                parse_default(sql),
                Some(ColumnDefault::Expression(sql.to_string()))
            );
        }

        let at = AttributeDef::new("at", DataType::DateTime).with_default_expression("CURRENT_TIMESTAMP");
        assert_eq!(
            column_definition(&at).unwrap(),
            "\"at\" DATETIME DEFAULT CURRENT_TIMESTAMP"
        );
        let stamp = AttributeDef::new("stamp", DataType::Text).with_default_expression("datetime('now')");
        assert_eq!(
            column_definition(&stamp).unwrap(),
            "\"stamp\" TEXT DEFAULT (datetime('now'))"
        );
    }

    #[test]
    fn test_insert_sql() {
        assert_eq!(
            insert_sql("Users", &["name".into(), "age".into()]).unwrap(),
            "INSERT INTO \"Users\" (\"name\", \"age\") VALUES (?, ?)"
        );
        assert_eq!(
            insert_sql("Users", &[]).unwrap(),
            "INSERT INTO \"Users\" DEFAULT VALUES"
        );
    }

    #[test]
    fn test_rebuild_table_name() {
        assert_eq!(rebuild_table_name("Users"), "Users__rebuild");
    }
}
