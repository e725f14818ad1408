//! Row selection: comparison criteria compiled into a `WHERE` clause.
//!
//! A [`Location`] collects criteria per operator and attribute. Each value
//! of a criterion becomes its own clause; clauses are then combined in
//! three steps:
//!
//! 1. clauses of one operator on one attribute: `OR` for the positive
//!    operators (`next_to`, `like`, `is_in`, `is_between`), `AND` for the
//!    negated and range operators;
//! 2. criteria given for the wildcard key (the `*_any` builders) are
//!    applied to every attribute of the relation and combined with
//!    [`Location::next_to_condition_none`];
//! 3. all groups are combined with [`Location::next_to_condition`].
//!
//! Absence tests treat `NULL` and the empty string alike. Criteria on
//! foreign-linked attributes are matched against surrogate keys; with
//! [`Location::force_match`] a missing foreign row is created, so reads
//! compiled this way can write.

use relkit_core::{Criteria, ForeignLink, Value, quote_identifier};

use crate::error::{Error, Result};
use crate::session::Session;

/// Boolean connective between clauses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Condition {
    /// All clauses must hold.
    #[default]
    And,
    /// Any clause may hold.
    Or,
}

impl Condition {
    fn sql(self) -> &'static str {
        match self {
            Condition::And => " AND ",
            Condition::Or => " OR ",
        }
    }
}

/// Comparison applied by one criterion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Operator {
    /// Equal to.
    NextTo,
    /// Not equal to.
    NotNextTo,
    /// SQL `LIKE` pattern.
    Like,
    /// Negated `LIKE`.
    NotLike,
    /// `NULL` or empty.
    IsNull,
    /// Neither `NULL` nor empty.
    IsNotNull,
    /// Member of the value list.
    IsIn,
    /// Not a member of the value list.
    IsNotIn,
    /// Inside an inclusive range; values come in `(low, high)` pairs.
    IsBetween,
    /// Outside an inclusive range.
    IsNotBetween,
    /// Strictly greater.
    GreaterThan,
    /// Greater or equal.
    GreaterThanOrEqual,
    /// Strictly less.
    LessThan,
    /// Less or equal.
    LessThanOrEqual,
}

impl Operator {
    /// Connective joining several clauses of this operator.
    pub fn joiner(self) -> Condition {
        match self {
            Operator::NextTo | Operator::Like | Operator::IsIn | Operator::IsBetween => {
                Condition::Or
            }
            _ => Condition::And,
        }
    }

    fn comparison(self) -> Option<&'static str> {
        match self {
            Operator::NextTo => Some("="),
            Operator::NotNextTo => Some("!="),
            Operator::Like => Some("LIKE"),
            Operator::NotLike => Some("NOT LIKE"),
            Operator::GreaterThan => Some(">"),
            Operator::GreaterThanOrEqual => Some(">="),
            Operator::LessThan => Some("<"),
            Operator::LessThanOrEqual => Some("<="),
            _ => None,
        }
    }
}

/// Compiled predicate: SQL text with positional `?` parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Predicate {
    /// Boolean SQL expression; empty when nothing is filtered.
    pub sql: String,
    /// Values bound to the placeholders, in order.
    pub params: Vec<Value>,
}

impl Predicate {
    fn raw(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    fn bound(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    /// Returns `true` if the predicate filters nothing.
    pub fn is_empty(&self) -> bool {
        self.sql.is_empty()
    }

    /// `" WHERE <sql>"`, or an empty string.
    pub fn where_clause(&self) -> String {
        if self.sql.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.sql)
        }
    }

    fn join(parts: Vec<Predicate>, condition: Condition) -> Option<Predicate> {
        let mut parts: Vec<Predicate> = parts.into_iter().filter(|p| !p.is_empty()).collect();
        match parts.len() {
            0 => None,
            1 => parts.pop(),
            _ => {
                let sql = parts
                    .iter()
                    .map(|p| p.sql.as_str())
                    .collect::<Vec<_>>()
                    .join(condition.sql());
                let params = parts.into_iter().flat_map(|p| p.params).collect();
                Some(Predicate::bound(format!("({sql})"), params))
            }
        }
    }
}

/// Link lookup and value resolution needed while compiling.
pub(crate) trait ForeignResolver {
    fn link(&self, relation: &str, attribute: &str) -> Option<ForeignLink>;
    fn key_column(&mut self, relation: &str) -> Result<String>;
    fn resolve(
        &mut self,
        relation: &str,
        attribute: &str,
        value: &Value,
        force_match: bool,
    ) -> Result<Option<Value>>;
}

#[derive(Debug, Clone, PartialEq)]
struct Criterion {
    operator: Operator,
    attribute: Option<String>,
    values: Vec<Value>,
}

/// Selection criteria for one relation.
///
/// # Examples
///
/// ```
/// use relkit_sqlite::{Condition, Location};
///
/// let adults_or_named = Location::new()
///     .greater_than_or_equal("age", 18)
///     .like("name", vec!["al%", "be%"])
///     .condition(Condition::Or);
/// assert!(!adults_or_named.is_empty());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Location {
    criteria: Vec<Criterion>,
    /// Connective between groups.
    pub next_to_condition: Condition,
    /// Connective between attributes for wildcard criteria.
    pub next_to_condition_none: Condition,
    /// Matches foreign-linked attributes by logical value.
    pub check_foreign: bool,
    /// Creates missing foreign rows while resolving.
    pub force_match: bool,
}

impl Default for Location {
    fn default() -> Self {
        Self {
            criteria: Vec::new(),
            next_to_condition: Condition::And,
            next_to_condition_none: Condition::Or,
            check_foreign: true,
            force_match: false,
        }
    }
}

macro_rules! criteria_builders {
    ($($(#[$doc:meta])* $name:ident, $any:ident => $operator:ident;)*) => {
        $(
            $(#[$doc])*
            pub fn $name(self, attribute: &str, criteria: impl Into<Criteria>) -> Self {
                self.with(Operator::$operator, Some(attribute), criteria)
            }

            #[doc = concat!("[`", stringify!($name), "`](Self::", stringify!($name), ") against every attribute.")]
            pub fn $any(self, criteria: impl Into<Criteria>) -> Self {
                self.with(Operator::$operator, None, criteria)
            }
        )*
    };
}

impl Location {
    /// Location matching every row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Equality on every given attribute.
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<str>,
        V: Into<Criteria>,
    {
        pairs
            .into_iter()
            .fold(Self::new(), |location, (attribute, value)| {
                location.next_to(attribute.as_ref(), value)
            })
    }

    /// Adds a criterion; `attribute == None` targets every attribute.
    pub fn with(
        mut self,
        operator: Operator,
        attribute: Option<&str>,
        criteria: impl Into<Criteria>,
    ) -> Self {
        let criteria: Criteria = criteria.into();
        self.criteria.push(Criterion {
            operator,
            attribute: attribute.map(str::to_string),
            values: criteria.values(),
        });
        self
    }

    criteria_builders! {
        /// Attribute equals any of the values.
        next_to, next_to_any => NextTo;
        /// Attribute differs from every value.
        not_next_to, not_next_to_any => NotNextTo;
        /// Attribute matches any `LIKE` pattern.
        like, like_any => Like;
        /// Attribute matches no `LIKE` pattern.
        not_like, not_like_any => NotLike;
        /// Attribute is in the list.
        is_in, is_in_any => IsIn;
        /// Attribute is not in the list.
        is_not_in, is_not_in_any => IsNotIn;
        /// Attribute exceeds every value.
        greater_than, greater_than_any => GreaterThan;
        /// Attribute is at least every value.
        greater_than_or_equal, greater_than_or_equal_any => GreaterThanOrEqual;
        /// Attribute is below every value.
        less_than, less_than_any => LessThan;
        /// Attribute is at most every value.
        less_than_or_equal, less_than_or_equal_any => LessThanOrEqual;
    }

    /// Attribute is `NULL` or empty.
    pub fn is_null(self, attribute: &str) -> Self {
        self.with(Operator::IsNull, Some(attribute), Value::Null)
    }

    /// Some attribute is `NULL` or empty.
    pub fn is_null_any(self) -> Self {
        self.with(Operator::IsNull, None, Value::Null)
    }

    /// Attribute is neither `NULL` nor empty.
    pub fn is_not_null(self, attribute: &str) -> Self {
        self.with(Operator::IsNotNull, Some(attribute), Value::Null)
    }

    /// Some attribute is neither `NULL` nor empty.
    pub fn is_not_null_any(self) -> Self {
        self.with(Operator::IsNotNull, None, Value::Null)
    }

    /// Attribute lies within `low..=high`.
    pub fn is_between(self, attribute: &str, low: impl Into<Value>, high: impl Into<Value>) -> Self {
        self.with(Operator::IsBetween, Some(attribute), vec![low.into(), high.into()])
    }

    /// Attribute lies outside `low..=high`.
    pub fn is_not_between(
        self,
        attribute: &str,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Self {
        self.with(
            Operator::IsNotBetween,
            Some(attribute),
            vec![low.into(), high.into()],
        )
    }

    /// Sets the connective between groups.
    pub fn condition(mut self, condition: Condition) -> Self {
        self.next_to_condition = condition;
        self
    }

    /// Sets the connective for wildcard criteria.
    pub fn condition_any(mut self, condition: Condition) -> Self {
        self.next_to_condition_none = condition;
        self
    }

    /// Compares foreign-linked attributes by stored key instead.
    pub fn raw_foreign(mut self) -> Self {
        self.check_foreign = false;
        self
    }

    /// Creates foreign rows for values that have none yet.
    pub fn force_match(mut self) -> Self {
        self.force_match = true;
        self
    }

    /// Returns `true` if no criteria were added.
    pub fn is_empty(&self) -> bool {
        self.criteria.is_empty()
    }

    /// Compiles the criteria for `relation`, whose columns are `attributes`.
    pub(crate) fn compile(
        &self,
        relation: &str,
        attributes: &[String],
        resolver: &mut dyn ForeignResolver,
    ) -> Result<Predicate> {
        let mut groups: Vec<(Operator, Option<String>, Vec<Value>)> = Vec::new();
        for criterion in &self.criteria {
            match groups
                .iter_mut()
                .find(|(op, attr, _)| *op == criterion.operator && *attr == criterion.attribute)
            {
                Some((_, _, values)) => values.extend(criterion.values.iter().cloned()),
                None => groups.push((
                    criterion.operator,
                    criterion.attribute.clone(),
                    criterion.values.clone(),
                )),
            }
        }

        let mut parts = Vec::new();
        for (operator, attribute, values) in groups {
            match attribute {
                Some(attribute) => {
                    if !attributes.contains(&attribute) {
                        return Err(Error::attribute_not_found(relation, &attribute));
                    }
                    parts.extend(self.attribute_group(relation, &attribute, operator, &values, resolver)?);
                }
                None => {
                    let mut per_attribute = Vec::new();
                    for attribute in attributes {
                        per_attribute.extend(self.attribute_group(
                            relation, attribute, operator, &values, resolver,
                        )?);
                    }
                    parts.extend(Predicate::join(per_attribute, self.next_to_condition_none));
                }
            }
        }
        Ok(Predicate::join(parts, self.next_to_condition).unwrap_or_default())
    }

    fn attribute_group(
        &self,
        relation: &str,
        attribute: &str,
        operator: Operator,
        values: &[Value],
        resolver: &mut dyn ForeignResolver,
    ) -> Result<Option<Predicate>> {
        let column = quote_identifier(attribute)?;
        let link = if self.check_foreign {
            resolver.link(relation, attribute)
        } else {
            None
        };
        let clauses = match (link, operator) {
            (None, _) | (Some(_), Operator::IsNull | Operator::IsNotNull) => {
                plain_clauses(&column, operator, values)?
            }
            (Some(_), Operator::NextTo | Operator::NotNextTo) => {
                let mut clauses = Vec::new();
                for value in values {
                    if value.is_absent() {
                        clauses.extend(plain_clauses(&column, operator, std::slice::from_ref(value))?);
                        continue;
                    }
                    match resolver.resolve(relation, attribute, value, self.force_match)? {
                        Some(key) => clauses.extend(plain_clauses(&column, operator, &[key])?),
                        None if operator == Operator::NextTo => clauses.push(Predicate::raw("1 = 0")),
                        None => clauses.push(Predicate::raw("1 = 1")),
                    }
                }
                clauses
            }
            (Some(_), Operator::IsIn | Operator::IsNotIn) => {
                let mut keys = Vec::with_capacity(values.len());
                for value in values {
                    if value.is_absent() {
                        keys.push(value.clone());
                    } else if let Some(key) =
                        resolver.resolve(relation, attribute, value, self.force_match)?
                    {
                        keys.push(key);
                    }
                }
                plain_clauses(&column, operator, &keys)?
            }
            (Some(link), _) => {
                let key = quote_identifier(&resolver.key_column(&link.relation)?)?;
                let table = quote_identifier(&link.relation)?;
                let foreign_column = quote_identifier(&link.attribute)?;
                plain_clauses(&foreign_column, operator, values)?
                    .into_iter()
                    .map(|inner| {
                        Predicate::bound(
                            format!("{column} IN (SELECT {key} FROM {table} WHERE {})", inner.sql),
                            inner.params,
                        )
                    })
                    .collect()
            }
        };
        Ok(Predicate::join(clauses, operator.joiner()))
    }
}

fn absent(column: &str) -> Predicate {
    Predicate::raw(format!("({column} IS NULL OR {column} = '')"))
}

fn present(column: &str) -> Predicate {
    Predicate::raw(format!("({column} IS NOT NULL AND {column} != '')"))
}

/// Clauses for `operator` on an already quoted column expression.
fn plain_clauses(column: &str, operator: Operator, values: &[Value]) -> Result<Vec<Predicate>> {
    let clauses = match operator {
        Operator::IsNull => vec![absent(column)],
        Operator::IsNotNull => vec![present(column)],
        Operator::NextTo | Operator::NotNextTo => values
            .iter()
            .map(|value| match (value.is_absent(), operator) {
                (true, Operator::NextTo) => absent(column),
                (true, _) => present(column),
                (false, Operator::NextTo) => Predicate::bound(format!("{column} = ?"), vec![value.clone()]),
                (false, _) => Predicate::bound(format!("{column} != ?"), vec![value.clone()]),
            })
            .collect(),
        Operator::IsIn | Operator::IsNotIn => {
            let negated = operator == Operator::IsNotIn;
            let (missing, listed): (Vec<&Value>, Vec<&Value>) =
                values.iter().partition(|value| value.is_absent());
            let mut clauses = Vec::new();
            if !listed.is_empty() {
                let placeholders = vec!["?"; listed.len()].join(", ");
                let keyword = if negated { "NOT IN" } else { "IN" };
                clauses.push(Predicate::bound(
                    format!("{column} {keyword} ({placeholders})"),
                    listed.into_iter().cloned().collect(),
                ));
            }
            if !missing.is_empty() {
                clauses.push(if negated { present(column) } else { absent(column) });
            }
            if clauses.is_empty() {
                clauses.push(Predicate::raw(if negated { "1 = 1" } else { "1 = 0" }));
            }
            clauses
        }
        Operator::IsBetween | Operator::IsNotBetween => {
            if values.len() % 2 != 0 {
                return Err(Error::InvalidRequest(
                    "range criteria need (low, high) pairs".to_string(),
                ));
            }
            let keyword = if operator == Operator::IsBetween {
                "BETWEEN"
            } else {
                "NOT BETWEEN"
            };
            values
                .chunks(2)
                .map(|pair| {
                    Predicate::bound(format!("{column} {keyword} ? AND ?"), pair.to_vec())
                })
                .collect()
        }
        _ => {
            let comparison = operator.comparison().unwrap_or("=");
            values
                .iter()
                .map(|value| Predicate::bound(format!("{column} {comparison} ?"), vec![value.clone()]))
                .collect()
        }
    };
    Ok(clauses)
}

impl ForeignResolver for Session {
    fn link(&self, relation: &str, attribute: &str) -> Option<ForeignLink> {
        self.catalogue.link(relation, attribute).cloned()
    }

    fn key_column(&mut self, relation: &str) -> Result<String> {
        self.introspector.key_column(&mut self.exec, relation)
    }

    fn resolve(
        &mut self,
        relation: &str,
        attribute: &str,
        value: &Value,
        force_match: bool,
    ) -> Result<Option<Value>> {
        self.resolve_foreign_value(relation, attribute, value, force_match)
    }
}

impl Session {
    /// Compiles `location` against the live columns of `relation`.
    pub(crate) fn compile_location(&mut self, relation: &str, location: &Location) -> Result<Predicate> {
        let attributes = self
            .introspector
            .attribute_names(&mut self.exec, relation, &[])?;
        location.compile(relation, &attributes, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    /// Resolver with one linked attribute, `Users.name -> Names.first_name`.
    #[derive(Default)]
    struct FakeResolver {
        names: BTreeMap<String, i64>,
    }

    impl ForeignResolver for FakeResolver {
        fn link(&self, relation: &str, attribute: &str) -> Option<ForeignLink> {
            (relation == "Users" && attribute == "name").then(|| ForeignLink::new("Names", "first_name"))
        }

        fn key_column(&mut self, _relation: &str) -> Result<String> {
            Ok("id".to_string())
        }

        fn resolve(
            &mut self,
            _relation: &str,
            _attribute: &str,
            value: &Value,
            force_match: bool,
        ) -> Result<Option<Value>> {
            let name = value.as_text().unwrap_or_default().to_string();
            if let Some(id) = self.names.get(&name) {
                return Ok(Some(Value::Integer(*id)));
            }
            if force_match {
                let id = self.names.len() as i64 + 1;
                self.names.insert(name, id);
                return Ok(Some(Value::Integer(id)));
            }
            Ok(None)
        }
    }

    fn attributes() -> Vec<String> {
        vec!["id".into(), "name".into(), "age".into()]
    }

    fn compile(location: &Location) -> Predicate {
        location
            .compile("Users", &attributes(), &mut FakeResolver::default())
            .unwrap()
    }

    #[test]
    fn test_empty_location_filters_nothing() {
        let predicate = compile(&Location::new());
        assert!(predicate.is_empty());
        assert_eq!(predicate.where_clause(), "");
    }

    #[test]
    fn test_groups_combine_with_next_to_condition() {
        let location = Location::new().next_to("age", 26).next_to("id", 2);
        assert_eq!(compile(&location).sql, "(\"age\" = ? AND \"id\" = ?)");

        let either = location.condition(Condition::Or);
        let predicate = compile(&either);
        assert_eq!(predicate.sql, "(\"age\" = ? OR \"id\" = ?)");
        assert_eq!(predicate.params, vec![Value::Integer(26), Value::Integer(2)]);
    }

    #[test]
    fn test_values_of_one_operator_expand_independently() {
        let predicate = compile(&Location::new().like("age", vec!["1%", "2%"]).not_like("age", "3%"));
        assert_eq!(
            predicate.sql,
            "((\"age\" LIKE ? OR \"age\" LIKE ?) AND \"age\" NOT LIKE ?)"
        );
        assert_eq!(predicate.params.len(), 3);
    }

    #[test]
    fn test_null_equality_matches_empty_text() {
        assert_eq!(
            compile(&Location::new().next_to("age", Value::Null)).sql,
            "(\"age\" IS NULL OR \"age\" = '')"
        );
        assert_eq!(
            compile(&Location::new().not_next_to("age", "")).sql,
            "(\"age\" IS NOT NULL AND \"age\" != '')"
        );
        assert_eq!(
            compile(&Location::new().is_not_null("age")).sql,
            "(\"age\" IS NOT NULL AND \"age\" != '')"
        );
    }

    #[test]
    fn test_in_lists_and_empty_lists() {
        let predicate = compile(&Location::new().is_in("age", vec![1, 2, 3]));
        assert_eq!(predicate.sql, "\"age\" IN (?, ?, ?)");
        assert_eq!(
            compile(&Location::new().is_in("age", Vec::<i64>::new())).sql,
            "1 = 0"
        );
        assert_eq!(
            compile(&Location::new().is_not_in("age", Vec::<i64>::new())).sql,
            "1 = 1"
        );
    }

    #[test]
    fn test_ranges() {
        let predicate = compile(&Location::new().is_between("age", 10, 20).less_than("id", 5));
        assert_eq!(predicate.sql, "(\"age\" BETWEEN ? AND ? AND \"id\" < ?)");
        let odd = Location::new().with(Operator::IsBetween, Some("age"), vec![1]);
        assert!(matches!(
            odd.compile("Users", &attributes(), &mut FakeResolver::default()),
            Err(Error::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_wildcard_applies_to_every_attribute() {
        let predicate = compile(&Location::new().next_to_any(7).next_to("age", 1));
        // `name` is linked and no foreign row holds 7.
        assert_eq!(
            predicate.sql,
            "((\"id\" = ? OR 1 = 0 OR \"age\" = ?) AND \"age\" = ?)"
        );
        assert_eq!(predicate.params.len(), 3);

        let any_null = compile(&Location::new().is_null_any().condition_any(Condition::And));
        assert!(any_null.sql.contains("(\"id\" IS NULL OR \"id\" = '') AND"));
    }

    #[test]
    fn test_unknown_attribute() {
        let result = Location::new()
            .next_to("height", 1)
            .compile("Users", &attributes(), &mut FakeResolver::default());
        assert!(matches!(result, Err(Error::AttributeNotFound { .. })));
    }

    #[test]
    fn test_foreign_equality_uses_surrogate_keys() {
        let mut resolver = FakeResolver::default();
        resolver.names.insert("Lorem".into(), 4);
        let predicate = Location::new()
            .next_to("name", "Lorem")
            .compile("Users", &attributes(), &mut resolver)
            .unwrap();
        assert_eq!(predicate.sql, "\"name\" = ?");
        assert_eq!(predicate.params, vec![Value::Integer(4)]);

        let missing = Location::new()
            .next_to("name", "Ipsum")
            .compile("Users", &attributes(), &mut resolver)
            .unwrap();
        assert_eq!(missing.sql, "1 = 0");
        assert!(!resolver.names.contains_key("Ipsum"));

        let forced = Location::new()
            .next_to("name", "Ipsum")
            .force_match()
            .compile("Users", &attributes(), &mut resolver)
            .unwrap();
        assert_eq!(forced.params, vec![Value::Integer(2)]);
        assert!(resolver.names.contains_key("Ipsum"));
    }

    #[test]
    fn test_foreign_pattern_uses_subquery() {
        let predicate = compile(&Location::new().like("name", "Lo%"));
        assert_eq!(
            predicate.sql,
            "\"name\" IN (SELECT \"id\" FROM \"Names\" WHERE \"first_name\" LIKE ?)"
        );
        assert_eq!(predicate.params, vec![Value::from("Lo%")]);
    }

    #[test]
    fn test_raw_foreign_skips_resolution() {
        let predicate = compile(&Location::new().next_to("name", 3).raw_foreign());
        assert_eq!(predicate.sql, "\"name\" = ?");
        assert_eq!(predicate.params, vec![Value::Integer(3)]);
    }
}
