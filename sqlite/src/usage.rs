//! Reference counts for foreign rows.
//!
//! [`UsageCounts`] records, for every foreign row, how many live domestic
//! rows of each consuming relation point at it. Counts are keyed by a flat
//! [`UsageKey`] instead of nested maps, and a count that drops to zero is
//! removed so the map only ever holds referenced rows.
//!
//! Queries take a [`UsageFilter`]; every axis left unset is aggregated
//! over.

use std::collections::{BTreeMap, BTreeSet};

/// One (foreign row, consumer) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UsageKey {
    /// Relation holding the referenced row.
    pub foreign_relation: String,
    /// Attribute of the foreign relation carrying the logical value.
    pub foreign_attribute: String,
    /// Key of the referenced row.
    pub row_id: i64,
    /// Relation whose rows reference it.
    pub consumer: String,
}

impl UsageKey {
    /// Creates a key.
    pub fn new(
        foreign_relation: impl Into<String>,
        foreign_attribute: impl Into<String>,
        row_id: i64,
        consumer: impl Into<String>,
    ) -> Self {
        Self {
            foreign_relation: foreign_relation.into(),
            foreign_attribute: foreign_attribute.into(),
            row_id,
            consumer: consumer.into(),
        }
    }
}

/// Selects usage entries; unset axes match everything.
///
/// # Examples
///
/// ```
/// use relkit_sqlite::{UsageCounts, UsageFilter, UsageKey};
///
/// let mut usage = UsageCounts::new();
/// usage.add(UsageKey::new("Names", "first_name", 1, "Users"), 2);
/// usage.add(UsageKey::new("Names", "first_name", 1, "Pets"), 1);
///
/// assert_eq!(usage.count(&UsageFilter::new().relation("Names").row(1)), 3);
/// assert_eq!(usage.count(&UsageFilter::new().consumer("Pets")), 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsageFilter {
    /// Foreign relation axis.
    pub foreign_relation: Option<String>,
    /// Foreign attribute axis.
    pub foreign_attribute: Option<String>,
    /// Row id axis.
    pub row_id: Option<i64>,
    /// Consumer axis.
    pub consumer: Option<String>,
}

impl UsageFilter {
    /// Filter matching every entry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts the foreign relation.
    pub fn relation(mut self, relation: impl Into<String>) -> Self {
        self.foreign_relation = Some(relation.into());
        self
    }

    /// Restricts the foreign attribute.
    pub fn attribute(mut self, attribute: impl Into<String>) -> Self {
        self.foreign_attribute = Some(attribute.into());
        self
    }

    /// Restricts the row id.
    pub fn row(mut self, row_id: i64) -> Self {
        self.row_id = Some(row_id);
        self
    }

    /// Restricts the consuming relation.
    pub fn consumer(mut self, consumer: impl Into<String>) -> Self {
        self.consumer = Some(consumer.into());
        self
    }

    /// Returns `true` if `key` falls within the filter.
    pub fn matches(&self, key: &UsageKey) -> bool {
        self.foreign_relation
            .as_ref()
            .is_none_or(|r| *r == key.foreign_relation)
            && self
                .foreign_attribute
                .as_ref()
                .is_none_or(|a| *a == key.foreign_attribute)
            && self.row_id.is_none_or(|id| id == key.row_id)
            && self.consumer.as_ref().is_none_or(|c| *c == key.consumer)
    }
}

/// In-memory usage counts plus the set of freshly created foreign rows.
#[derive(Debug, Clone, Default)]
pub struct UsageCounts {
    counts: BTreeMap<UsageKey, u64>,
    pending: BTreeSet<(String, i64)>,
}

impl UsageCounts {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `delta` references.
    ///
    /// The referenced row stops being pending.
    pub fn add(&mut self, key: UsageKey, delta: u64) {
        if delta == 0 {
            return;
        }
        self.pending
            .remove(&(key.foreign_relation.clone(), key.row_id));
        *self.counts.entry(key).or_insert(0) += delta;
    }

    /// Removes up to `delta` references and returns what remains.
    ///
    /// With `filter_empty` an entry reaching zero is dropped; without it
    /// the zero is kept until [`prune`](Self::prune).
    pub fn remove(&mut self, key: &UsageKey, delta: u64, filter_empty: bool) -> u64 {
        let Some(count) = self.counts.get_mut(key) else {
            return 0;
        };
        *count = count.saturating_sub(delta);
        let remaining = *count;
        if remaining == 0 && filter_empty {
            self.counts.remove(key);
        }
        remaining
    }

    /// Drops every zero entry.
    pub fn prune(&mut self) {
        self.counts.retain(|_, count| *count > 0);
    }

    /// Total references matching `filter`.
    pub fn count(&self, filter: &UsageFilter) -> u64 {
        self.counts
            .iter()
            .filter(|(key, _)| filter.matches(key))
            .map(|(_, count)| *count)
            .sum()
    }

    /// Matching entries with their counts, in key order.
    pub fn breakdown(&self, filter: &UsageFilter) -> Vec<(UsageKey, u64)> {
        self.counts
            .iter()
            .filter(|(key, _)| filter.matches(key))
            .map(|(key, count)| (key.clone(), *count))
            .collect()
    }

    /// Row ids of `foreign_relation` with at least one reference.
    pub fn referenced_rows(&self, foreign_relation: &str) -> BTreeSet<i64> {
        self.counts
            .iter()
            .filter(|(key, count)| key.foreign_relation == foreign_relation && **count > 0)
            .map(|(key, _)| key.row_id)
            .collect()
    }

    /// Drops every entry that involves `relation` on either side.
    pub fn forget_relation(&mut self, relation: &str) {
        self.counts
            .retain(|key, _| key.foreign_relation != relation && key.consumer != relation);
        self.pending.retain(|(foreign, _)| foreign != relation);
    }

    /// Marks a foreign row as created but not yet referenced.
    pub fn mark_pending(&mut self, foreign_relation: impl Into<String>, row_id: i64) {
        self.pending.insert((foreign_relation.into(), row_id));
    }

    /// Returns `true` if the row is pending.
    pub fn is_pending(&self, foreign_relation: &str, row_id: i64) -> bool {
        self.pending
            .iter()
            .any(|(relation, id)| relation == foreign_relation && *id == row_id)
    }

    /// Forgets every pending row.
    pub fn clear_pending(&mut self) {
        self.pending.clear();
    }

    /// Drops all counts, keeping pending rows.
    pub fn clear(&mut self) {
        self.counts.clear();
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// Returns `true` if nothing is referenced.
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(row: i64, consumer: &str) -> UsageKey {
        UsageKey::new("Names", "first_name", row, consumer)
    }

    #[test]
    fn test_wildcard_axis_queries() {
        let mut usage = UsageCounts::new();
        usage.add(key(1, "Users"), 2);
        usage.add(key(2, "Users"), 1);
        usage.add(key(1, "Pets"), 4);
        usage.add(UsageKey::new("Cities", "label", 1, "Users"), 5);

        assert_eq!(usage.count(&UsageFilter::new()), 12);
        assert_eq!(usage.count(&UsageFilter::new().relation("Names")), 7);
        assert_eq!(usage.count(&UsageFilter::new().relation("Names").row(1)), 6);
        assert_eq!(usage.count(&UsageFilter::new().consumer("Users")), 8);
        assert_eq!(
            usage.count(&UsageFilter::new().attribute("first_name").consumer("Users")),
            3
        );
        assert_eq!(usage.breakdown(&UsageFilter::new().row(2)), vec![(key(2, "Users"), 1)]);
    }

    #[test]
    fn test_zero_counts_are_removed() {
        let mut usage = UsageCounts::new();
        usage.add(key(1, "Users"), 1);
        assert_eq!(usage.remove(&key(1, "Users"), 1, true), 0);
        assert!(usage.is_empty());
        assert_eq!(usage.remove(&key(1, "Users"), 1, true), 0);
    }

    #[test]
    fn test_unfiltered_remove_keeps_zero_until_pruned() {
        let mut usage = UsageCounts::new();
        usage.add(key(1, "Users"), 1);
        usage.remove(&key(1, "Users"), 3, false);
        assert_eq!(usage.len(), 1);
        assert!(usage.referenced_rows("Names").is_empty());
        usage.prune();
        assert!(usage.is_empty());
    }

    #[test]
    fn test_pending_rows_clear_on_first_reference() {
        let mut usage = UsageCounts::new();
        usage.mark_pending("Names", 7);
        assert!(usage.is_pending("Names", 7));
        usage.add(key(7, "Users"), 1);
        assert!(!usage.is_pending("Names", 7));
    }

    #[test]
    fn test_forget_relation() {
        let mut usage = UsageCounts::new();
        usage.add(key(1, "Users"), 1);
        usage.add(key(1, "Pets"), 1);
        usage.forget_relation("Users");
        assert_eq!(usage.count(&UsageFilter::new()), 1);
    }
}
