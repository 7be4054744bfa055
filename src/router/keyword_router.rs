use crate::router::keywords::{KeywordEntry, KeywordTable, derive_keywords};
use crate::router::{Catalog, DatabaseRouter};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::RwLock;
use tracing::{debug, error, info};

/// Rows sampled per table when deriving keywords.
const DERIVATION_SAMPLE_ROWS: usize = 10;

/// Substring keyword matching.
///
/// A database is selected when any of its keywords occurs in the lower-cased
/// question. There is no scoring; the result set is ordered by name and the
/// first name is treated as the highest ranked.
pub struct KeywordRouter {
    table: RwLock<KeywordTable>,
    max_keywords: usize,
}

impl KeywordRouter {
    pub fn new(table: KeywordTable, max_keywords: usize) -> Self {
        Self {
            table: RwLock::new(table),
            max_keywords,
        }
    }

    /// Router over `table` with `seeds` merged in as curated keywords.
    pub fn with_seeds(
        mut table: KeywordTable,
        max_keywords: usize,
        seeds: &BTreeMap<String, Vec<String>>,
    ) -> Self {
        let added: usize = seeds
            .iter()
            .map(|(database, keywords)| table.add_curated(database, keywords))
            .sum();
        if added > 0 {
            persist(&table);
        }
        Self::new(table, max_keywords)
    }

    /// Derive entries for catalog databases that have none yet.
    async fn fill_missing(&self, catalog: &Catalog<'_>) -> usize {
        let missing: Vec<String> = {
            let table = self.table.read().await;
            catalog
                .databases
                .keys()
                .filter(|name| !table.contains(name.as_str()))
                .cloned()
                .collect()
        };
        if missing.is_empty() {
            return 0;
        }

        let mut derived = Vec::with_capacity(missing.len());
        for name in missing {
            let Some(target) = catalog.databases.get(&name) else {
                continue;
            };
            let description = catalog
                .describer
                .describe_with_samples(target, None, DERIVATION_SAMPLE_ROWS)
                .await;
            let keywords = derive_keywords(&name, &description.tables, self.max_keywords);
            debug!(database = %name, ?keywords, "Derived database keywords");
            derived.push((name, keywords));
        }

        let count = derived.len();
        let mut table = self.table.write().await;
        for (name, keywords) in derived {
            // A concurrent curation wins over derivation
            if !table.contains(&name) {
                table.insert_derived(&name, keywords);
            }
        }
        persist(&table);
        count
    }
}

fn persist(table: &KeywordTable) {
    if let Err(e) = table.save() {
        error!("Could not save keyword mapping: {}", e);
    }
}

#[async_trait]
impl DatabaseRouter for KeywordRouter {
    async fn detect_databases(&self, question: &str, catalog: &Catalog<'_>) -> BTreeSet<String> {
        self.fill_missing(catalog).await;

        let question = question.to_lowercase();
        let table = self.table.read().await;
        let mut detected: BTreeSet<String> = table
            .entries()
            .iter()
            .filter(|(name, _)| catalog.databases.contains_key(name.as_str()))
            .filter(|(_, entry)| {
                entry
                    .keywords
                    .iter()
                    .any(|keyword| !keyword.is_empty() && question.contains(&keyword.to_lowercase()))
            })
            .map(|(name, _)| name.clone())
            .collect();

        if detected.is_empty() {
            detected.insert(catalog.primary.to_string());
        }

        debug!(?detected, "Detected databases for question");
        detected
    }

    fn detect_tables(&self, question: &str, tables: &[String]) -> Option<BTreeSet<String>> {
        let question = question.to_lowercase();
        let detected: BTreeSet<String> = tables
            .iter()
            .filter(|table| {
                let name = table.to_lowercase();
                question.contains(&name) || question.contains(&name.replace('_', " "))
            })
            .cloned()
            .collect();

        if detected.is_empty() { None } else { Some(detected) }
    }

    async fn remap(&self, catalog: &Catalog<'_>) -> usize {
        let removed = {
            let mut table = self.table.write().await;
            let removed = table.retain(|name| catalog.databases.contains_key(name));
            if !removed.is_empty() {
                persist(&table);
            }
            removed
        };

        let derived = self.fill_missing(catalog).await;
        info!(
            removed = removed.len(),
            derived, "Updated database keyword mapping"
        );
        derived
    }

    async fn add_keywords(&self, database: &str, keywords: &[String]) -> usize {
        let mut table = self.table.write().await;
        let added = table.add_curated(database, keywords);
        persist(&table);
        info!("Added {} keywords to database {}", added, database);
        added
    }

    async fn keywords(&self) -> BTreeMap<String, KeywordEntry> {
        self.table.read().await.entries().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> KeywordRouter {
        KeywordRouter::new(KeywordTable::in_memory(), 10)
    }

    #[test]
    fn tables_match_by_name_or_spaced_name() {
        let tables = vec![
            "customers".to_string(),
            "sales_data".to_string(),
            "orders".to_string(),
        ];
        let router = router();

        let detected = router
            .detect_tables("Top customers by sales data this year", &tables)
            .unwrap();
        assert_eq!(
            detected,
            BTreeSet::from(["customers".to_string(), "sales_data".to_string()])
        );

        assert!(router.detect_tables("What is the weather?", &tables).is_none());
    }
}
