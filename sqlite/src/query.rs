//! Request types for reads and writes.
//!
//! [`Get`] describes one read: which attributes of which relations, where,
//! in what order, and how the result is formatted and shaped. Writes take
//! [`InsertOptions`] and [`ChangeOptions`].
//!
//! # Example
//!
//! ```
//! use relkit_sqlite::{Get, Location, Order, ShapeOptions};
//!
//! let get = Get::new()
//!     .select("Users", ["name", "age"])
//!     .location(Location::new().greater_than("age", 18))
//!     .order_by("age", Order::Desc)
//!     .limit(10)
//!     .shape(ShapeOptions { force_tuple: true, ..ShapeOptions::default() });
//!
//! assert_eq!(get.relations(), vec!["Users"]);
//! ```

use relkit_core::{dedup_names, quote_identifier};

use crate::error::{Error, Result};
use crate::format::{FormatOptions, ShapeOptions};
use crate::location::Location;

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    /// Ascending.
    #[default]
    Asc,
    /// Descending.
    Desc,
}

impl Order {
    fn sql(self) -> &'static str {
        match self {
            Order::Asc => "ASC",
            Order::Desc => "DESC",
        }
    }
}

/// What one relation contributes to a read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Selection {
    /// Every attribute in column order.
    All,
    /// The named attributes, in request order.
    Attributes(Vec<String>),
}

/// One read request.
#[derive(Debug, Clone, Default)]
pub struct Get {
    pub(crate) selections: Vec<(String, Selection)>,
    pub(crate) location: Location,
    pub(crate) order_by: Vec<(String, Order)>,
    pub(crate) limit: Option<u64>,
    pub(crate) offset: Option<u64>,
    pub(crate) distinct: bool,
    pub(crate) shape: ShapeOptions,
    pub(crate) format: FormatOptions,
}

impl Get {
    /// Empty request.
    pub fn new() -> Self {
        Self::default()
    }

    /// Selects attributes of `relation`. Repeated names are read once.
    pub fn select<I, S>(mut self, relation: &str, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let attributes = dedup_names(attributes);
        self.set_selection(relation, Selection::Attributes(attributes));
        self
    }

    /// Selects every attribute of `relation`.
    pub fn select_all(mut self, relation: &str) -> Self {
        self.set_selection(relation, Selection::All);
        self
    }

    fn set_selection(&mut self, relation: &str, selection: Selection) {
        match self.selections.iter_mut().find(|(r, _)| r == relation) {
            Some(existing) => existing.1 = selection,
            None => self.selections.push((relation.to_string(), selection)),
        }
    }

    /// Restricts rows; applied to every selected relation.
    pub fn location(mut self, location: Location) -> Self {
        self.location = location;
        self
    }

    /// Appends a sort key.
    pub fn order_by(mut self, attribute: &str, order: Order) -> Self {
        self.order_by.push((attribute.to_string(), order));
        self
    }

    /// Caps the number of rows per relation.
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skips rows; needs no limit.
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Drops duplicate rows.
    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// Sets the shaping flags.
    pub fn shape(mut self, shape: ShapeOptions) -> Self {
        self.shape = shape;
        self
    }

    /// Sets value formatting.
    pub fn format(mut self, format: FormatOptions) -> Self {
        self.format = format;
        self
    }

    /// Selected relations in request order.
    pub fn relations(&self) -> Vec<&str> {
        self.selections.iter().map(|(r, _)| r.as_str()).collect()
    }

    /// `ORDER BY`, `LIMIT` and `OFFSET` text for one statement.
    pub(crate) fn tail_sql(&self) -> Result<String> {
        let mut sql = String::new();
        if !self.order_by.is_empty() {
            let keys = self
                .order_by
                .iter()
                .map(|(attribute, order)| Ok(format!("{} {}", quote_identifier(attribute)?, order.sql())))
                .collect::<Result<Vec<_>>>()?;
            sql.push_str(" ORDER BY ");
            sql.push_str(&keys.join(", "));
        }
        match (self.limit, self.offset) {
            (Some(limit), Some(offset)) => sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}")),
            (Some(limit), None) => sql.push_str(&format!(" LIMIT {limit}")),
            (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {offset}")),
            (None, None) => {}
        }
        Ok(sql)
    }

    pub(crate) fn ensure_selection(&self) -> Result<()> {
        if self.selections.is_empty() {
            return Err(Error::InvalidRequest("no relation selected".to_string()));
        }
        Ok(())
    }
}

/// What an insert does when it hits a unique constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnConflict {
    /// Surface the constraint violation.
    #[default]
    Raise,
    /// Replace the conflicting row.
    Replace,
    /// Keep the existing row and skip the insert.
    Ignore,
}

impl OnConflict {
    pub(crate) fn verb(self) -> &'static str {
        match self {
            OnConflict::Raise => "INSERT",
            OnConflict::Replace => "INSERT OR REPLACE",
            OnConflict::Ignore => "INSERT OR IGNORE",
        }
    }
}

/// Options for [`Database::add_tuple`](crate::Database::add_tuple).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertOptions {
    /// Unique-conflict policy.
    pub on_conflict: OnConflict,
    /// Resolve foreign-linked values to surrogate keys.
    pub check_foreign: bool,
}

impl Default for InsertOptions {
    fn default() -> Self {
        Self {
            on_conflict: OnConflict::Raise,
            check_foreign: true,
        }
    }
}

/// Options for [`Database::change_tuple`](crate::Database::change_tuple).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeOptions {
    /// Resolve foreign-linked values to surrogate keys.
    pub check_foreign: bool,
    /// Whether a referenced foreign row may be renamed in place:
    /// `Some(true)` always, `Some(false)` never, `None` only when nothing
    /// else references it.
    pub update_foreign: Option<bool>,
    /// Create missing foreign rows named in the location.
    pub force_match: bool,
}

impl Default for ChangeOptions {
    fn default() -> Self {
        Self {
            check_foreign: true,
            update_foreign: None,
            force_match: true,
        }
    }
}

/// Options for [`Database::create_relation`](crate::Database::create_relation).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateOptions {
    /// An existing relation of the same name is kept and the call
    /// succeeds; otherwise it is an error.
    pub no_replication: bool,
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self {
            no_replication: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_merges_repeated_relations() {
        let get = Get::new()
            .select("Users", ["name", "name", "age"])
            .select_all("Pets")
            .select("Users", ["age"]);
        assert_eq!(get.relations(), vec!["Users", "Pets"]);
        assert_eq!(
            get.selections[0].1,
            Selection::Attributes(vec!["age".to_string()])
        );
        assert_eq!(get.selections[1].1, Selection::All);
    }

    #[test]
    fn test_tail_sql() {
        assert_eq!(Get::new().tail_sql().unwrap(), "");
        let get = Get::new()
            .order_by("age", Order::Desc)
            .order_by("name", Order::Asc)
            .limit(5)
            .offset(10);
        assert_eq!(
            get.tail_sql().unwrap(),
            " ORDER BY \"age\" DESC, \"name\" ASC LIMIT 5 OFFSET 10"
        );
        assert_eq!(Get::new().offset(3).tail_sql().unwrap(), " LIMIT -1 OFFSET 3");
    }

    #[test]
    fn test_empty_selection_is_rejected() {
        assert!(matches!(Get::new().ensure_selection(), Err(Error::InvalidRequest(_))));
    }

    #[test]
    fn test_conflict_verbs() {
        assert_eq!(OnConflict::default().verb(), "INSERT");
        assert_eq!(OnConflict::Replace.verb(), "INSERT OR REPLACE");
        assert_eq!(OnConflict::Ignore.verb(), "INSERT OR IGNORE");
    }
}
