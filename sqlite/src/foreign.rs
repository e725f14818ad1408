//! Foreign key catalogue and surrogate key resolution.
//!
//! A foreign-linked attribute stores the primary key of a row in the
//! foreign relation; callers only ever see the foreign row's logical
//! value. This module maps between the two:
//!
//! - [`ForeignCatalogue`] records every link, rebuilt from the catalogue
//!   whenever relations are created, renamed or dropped;
//! - resolution turns a logical value into a surrogate key, creating the
//!   foreign row on request;
//! - reverse lookup turns a stored key back into the logical value;
//! - cleaning deletes foreign rows nothing references any more.

use std::collections::{BTreeMap, BTreeSet};

use relkit_core::{ForeignLink, Value, quote_identifier};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::schema::REBUILD_SUFFIX;
use crate::session::Session;
use crate::usage::{UsageFilter, UsageKey};

/// Every foreign link in the database, by relation and attribute.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForeignCatalogue {
    links: BTreeMap<String, BTreeMap<String, ForeignLink>>,
}

impl ForeignCatalogue {
    /// Link declared on `relation.attribute`, if any.
    pub fn link(&self, relation: &str, attribute: &str) -> Option<&ForeignLink> {
        self.links.get(relation).and_then(|links| links.get(attribute))
    }

    /// Links declared on `relation`, keyed by attribute.
    pub fn links_of(&self, relation: &str) -> Option<&BTreeMap<String, ForeignLink>> {
        self.links.get(relation)
    }

    /// `(relation, attribute)` pairs pointing into `foreign_relation`.
    pub fn consumers_of(&self, foreign_relation: &str) -> Vec<(&str, &str)> {
        self.entries()
            .filter(|(_, _, link)| link.relation == foreign_relation)
            .map(|(relation, attribute, _)| (relation, attribute))
            .collect()
    }

    /// Relations referenced by at least one link.
    pub fn foreign_relations(&self) -> BTreeSet<String> {
        self.entries()
            .map(|(_, _, link)| link.relation.clone())
            .collect()
    }

    /// Every link as `(relation, attribute, link)`.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str, &ForeignLink)> {
        self.links.iter().flat_map(|(relation, links)| {
            links
                .iter()
                .map(move |(attribute, link)| (relation.as_str(), attribute.as_str(), link))
        })
    }

    /// Number of links.
    pub fn len(&self) -> usize {
        self.links.values().map(BTreeMap::len).sum()
    }

    /// Returns `true` if no relation declares a link.
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub(crate) fn insert(&mut self, relation: &str, links: BTreeMap<String, ForeignLink>) {
        if links.is_empty() {
            self.links.remove(relation);
        } else {
            self.links.insert(relation.to_string(), links);
        }
    }
}

impl Session {
    /// Rescans every relation's foreign keys.
    pub(crate) fn refresh_catalogue(&mut self) -> Result<()> {
        self.introspector.clear();
        let mut catalogue = ForeignCatalogue::default();
        for relation in self.introspector.relation_names(&mut self.exec)? {
            if relation.ends_with(REBUILD_SUFFIX) {
                continue;
            }
            let links = self
                .introspector
                .foreign_links(&mut self.exec, &relation)?;
            catalogue.insert(&relation, links);
        }
        info!(links = catalogue.len(), "refreshed foreign key catalogue");
        self.catalogue = catalogue;
        Ok(())
    }

    /// Recounts every reference with one grouped scan per link.
    pub(crate) fn rebuild_usage(&mut self) -> Result<()> {
        self.usage.clear();
        let entries: Vec<(String, String, ForeignLink)> = self
            .catalogue
            .entries()
            .map(|(relation, attribute, link)| (relation.to_string(), attribute.to_string(), link.clone()))
            .collect();
        for (relation, attribute, link) in entries {
            let column = quote_identifier(&attribute)?;
            let rows = self.exec.query(
                &format!(
                    "SELECT {column}, COUNT(*) FROM {} WHERE {column} IS NOT NULL GROUP BY {column}",
                    quote_identifier(&relation)?
                ),
                &[],
            )?;
            for row in rows.values {
                let (Some(id), Some(count)) = (row[0].as_integer(), row[1].as_integer()) else {
                    continue;
                };
                self.usage.add(
                    UsageKey::new(&link.relation, &link.attribute, id, &relation),
                    u64::try_from(count).unwrap_or(0),
                );
            }
        }
        debug!(entries = self.usage.len(), "rebuilt foreign usage counts");
        Ok(())
    }

    /// Key of the first foreign row whose logical value equals `value`.
    pub(crate) fn find_foreign_row(&mut self, link: &ForeignLink, value: &Value) -> Result<Option<i64>> {
        let key = quote_identifier(&self.introspector.key_column(&mut self.exec, &link.relation)?)?;
        let rows = self.exec.query(
            &format!(
                "SELECT {key} FROM {} WHERE {} = ? ORDER BY {key} LIMIT 1",
                quote_identifier(&link.relation)?,
                quote_identifier(&link.attribute)?
            ),
            std::slice::from_ref(value),
        )?;
        Ok(rows.scalar().and_then(Value::as_integer))
    }

    /// Inserts a foreign row holding `value` and returns its key.
    pub(crate) fn insert_foreign_row(&mut self, link: &ForeignLink, value: &Value) -> Result<i64> {
        self.exec.execute(
            &format!(
                "INSERT INTO {} ({}) VALUES (?)",
                quote_identifier(&link.relation)?,
                quote_identifier(&link.attribute)?
            ),
            std::slice::from_ref(value),
        )?;
        let id = self.exec.last_insert_id();
        self.usage.mark_pending(&link.relation, id);
        debug!(relation = %link.relation, id, "created foreign row");
        Ok(id)
    }

    /// Translates a logical value of `relation.attribute` into what the
    /// column stores.
    ///
    /// Unlinked attributes return the value unchanged and absent values
    /// resolve to `NULL`. For a linked attribute the foreign row is looked
    /// up first and only inserted when `force_match` is set, so resolving
    /// the same value twice yields the same key. Returns `None` when no
    /// foreign row matches and none was created.
    pub(crate) fn resolve_foreign_value(
        &mut self,
        relation: &str,
        attribute: &str,
        value: &Value,
        force_match: bool,
    ) -> Result<Option<Value>> {
        let Some(link) = self.catalogue.link(relation, attribute).cloned() else {
            return Ok(Some(value.clone()));
        };
        if value.is_absent() {
            return Ok(Some(Value::Null));
        }
        if let Some(id) = self.find_foreign_row(&link, value)? {
            return Ok(Some(Value::Integer(id)));
        }
        if force_match {
            return Ok(Some(Value::Integer(self.insert_foreign_row(&link, value)?)));
        }
        Ok(None)
    }

    /// Translates a stored surrogate key back into its logical value.
    ///
    /// Returns `None` if the foreign row no longer exists.
    pub(crate) fn reverse_lookup(
        &mut self,
        relation: &str,
        attribute: &str,
        stored: &Value,
    ) -> Result<Option<Value>> {
        let Some(link) = self.catalogue.link(relation, attribute).cloned() else {
            return Ok(Some(stored.clone()));
        };
        if stored.is_null() {
            return Ok(Some(Value::Null));
        }
        let cache_key = (relation.to_string(), attribute.to_string(), stored.clone());
        if let Some(value) = self.lookups.get(&cache_key) {
            return Ok(Some(value.clone()));
        }
        let key = quote_identifier(&self.introspector.key_column(&mut self.exec, &link.relation)?)?;
        let rows = self.exec.query(
            &format!(
                "SELECT {} FROM {} WHERE {key} = ?",
                quote_identifier(&link.attribute)?,
                quote_identifier(&link.relation)?
            ),
            std::slice::from_ref(stored),
        )?;
        let Some(value) = rows.scalar().cloned() else {
            return Ok(None);
        };
        self.lookups.insert(cache_key, value.clone());
        Ok(Some(value))
    }

    /// Chooses the surrogate key for rows of `relation` whose linked
    /// `attribute` changes to `new_value`.
    ///
    /// `old_ids` maps each currently referenced foreign row to the number
    /// of changing rows that reference it. The candidates are tried in
    /// order:
    ///
    /// 1. an existing foreign row already holding `new_value`;
    /// 2. with `update_foreign == Some(true)`, the lowest old row, renamed
    ///    in place for every consumer;
    /// 3. with `update_foreign == None`, the lowest old row referenced only
    ///    by the changing rows, renamed in place;
    /// 4. a newly inserted foreign row.
    pub(crate) fn change_foreign_value(
        &mut self,
        relation: &str,
        attribute: &str,
        old_ids: &BTreeMap<i64, u64>,
        new_value: &Value,
        update_foreign: Option<bool>,
    ) -> Result<Value> {
        let Some(link) = self.catalogue.link(relation, attribute).cloned() else {
            return Ok(new_value.clone());
        };
        if new_value.is_absent() {
            return Ok(Value::Null);
        }
        if let Some(id) = self.find_foreign_row(&link, new_value)? {
            return Ok(Value::Integer(id));
        }
        let in_place = match update_foreign {
            Some(true) => old_ids.keys().next().copied(),
            Some(false) => None,
            None => old_ids
                .iter()
                .find(|(id, changing)| {
                    let total = self
                        .usage
                        .count(&UsageFilter::new().relation(&link.relation).row(**id));
                    total == **changing
                })
                .map(|(id, _)| *id),
        };
        match in_place {
            Some(id) => {
                let key = quote_identifier(&self.introspector.key_column(&mut self.exec, &link.relation)?)?;
                self.exec.execute(
                    &format!(
                        "UPDATE {} SET {} = ? WHERE {key} = ?",
                        quote_identifier(&link.relation)?,
                        quote_identifier(&link.attribute)?
                    ),
                    &[new_value.clone(), Value::Integer(id)],
                )?;
                self.lookups.clear();
                debug!(relation = %link.relation, id, "renamed foreign row in place");
                Ok(Value::Integer(id))
            }
            None => Ok(Value::Integer(self.insert_foreign_row(&link, new_value)?)),
        }
    }

    /// Deletes foreign rows with no remaining references.
    ///
    /// This is destructive: the catalogue and usage counts are rebuilt from
    /// the live database first, and every row of a foreign relation that
    /// nothing references is deleted, except pending rows and rows listed
    /// in `exclude`. `only` restricts cleaning to the named foreign
    /// relations. Returns the number of rows deleted.
    pub(crate) fn clean_unused_foreign_rows(
        &mut self,
        only: Option<&[&str]>,
        exclude: &[(&str, i64)],
    ) -> Result<usize> {
        self.refresh_catalogue()?;
        self.rebuild_usage()?;
        let mut deleted = 0;
        for foreign in self.catalogue.foreign_relations() {
            if only.is_some_and(|names| !names.contains(&foreign.as_str())) {
                continue;
            }
            let key = quote_identifier(&self.introspector.key_column(&mut self.exec, &foreign)?)?;
            let table = quote_identifier(&foreign)?;
            let rows = self.exec.query(&format!("SELECT {key} FROM {table}"), &[])?;
            let referenced = self.usage.referenced_rows(&foreign);
            for id in rows.column(0).iter().filter_map(Value::as_integer) {
                if referenced.contains(&id)
                    || self.usage.is_pending(&foreign, id)
                    || exclude.iter().any(|(r, e)| *r == foreign && *e == id)
                {
                    continue;
                }
                deleted += self.exec.execute(
                    &format!("DELETE FROM {table} WHERE {key} = ?"),
                    &[Value::Integer(id)],
                )?;
            }
        }
        if deleted > 0 {
            warn!(deleted, "deleted unreferenced foreign rows");
            self.lookups.clear();
            self.rebuild_usage()?;
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalogue() -> ForeignCatalogue {
        let mut catalogue = ForeignCatalogue::default();
        catalogue.insert(
            "Users",
            BTreeMap::from([
                ("name".to_string(), ForeignLink::new("Names", "first_name")),
                ("city".to_string(), ForeignLink::new("Cities", "label")),
            ]),
        );
        catalogue.insert(
            "Pets",
            BTreeMap::from([("owner_name".to_string(), ForeignLink::new("Names", "first_name"))]),
        );
        catalogue.insert("Log", BTreeMap::new());
        catalogue
    }

    #[test]
    fn test_lookups() {
        let catalogue = catalogue();
        assert_eq!(catalogue.len(), 3);
        assert_eq!(
            catalogue.link("Users", "name"),
            Some(&ForeignLink::new("Names", "first_name"))
        );
        assert!(catalogue.link("Users", "age").is_none());
        assert!(catalogue.links_of("Log").is_none());
        assert_eq!(
            catalogue.consumers_of("Names"),
            vec![("Pets", "owner_name"), ("Users", "name")]
        );
        assert_eq!(
            catalogue.foreign_relations().into_iter().collect::<Vec<_>>(),
            vec!["Cities", "Names"]
        );
    }
}
