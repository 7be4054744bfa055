use crate::db::schema::TableSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const STOPWORDS: &[&str] = &[
    "the", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by", "from", "into",
    "this", "that", "these", "those", "are", "was", "were", "has", "have", "had", "not", "all",
    "any", "some", "none", "null", "true", "false", "yes", "data", "table", "name", "value", "type",
    "date", "time", "count", "total", "number", "description", "created", "updated",
];

/// Where a keyword entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeywordOrigin {
    Curated,
    Derived,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordEntry {
    pub origin: KeywordOrigin,
    pub keywords: Vec<String>,
}

/// Database name to keyword vocabulary, optionally backed by a JSON file.
#[derive(Debug, Default)]
pub struct KeywordTable {
    path: Option<PathBuf>,
    entries: BTreeMap<String, KeywordEntry>,
}

impl KeywordTable {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load from `path`. A missing or unreadable file yields an empty table
    /// that still saves back to `path`.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = if path.exists() {
            match read_entries(&path) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("Could not load keyword mapping {}: {}", path.display(), e);
                    BTreeMap::new()
                }
            }
        } else {
            BTreeMap::new()
        };

        debug!("Loaded {} keyword entries", entries.len());
        Self {
            path: Some(path),
            entries,
        }
    }

    pub fn save(&self) -> std::io::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.entries).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }

    pub fn entries(&self) -> &BTreeMap<String, KeywordEntry> {
        &self.entries
    }

    pub fn get(&self, database: &str) -> Option<&KeywordEntry> {
        self.entries.get(database)
    }

    pub fn contains(&self, database: &str) -> bool {
        self.entries.contains_key(database)
    }

    pub fn insert_derived(&mut self, database: &str, keywords: Vec<String>) {
        self.entries.insert(
            database.to_string(),
            KeywordEntry {
                origin: KeywordOrigin::Derived,
                keywords,
            },
        );
    }

    /// Merge curated keywords into an entry, skipping ones already present.
    /// Returns how many were added.
    pub fn add_curated(&mut self, database: &str, keywords: &[String]) -> usize {
        let entry = self
            .entries
            .entry(database.to_string())
            .or_insert_with(|| KeywordEntry {
                origin: KeywordOrigin::Curated,
                keywords: Vec::new(),
            });
        entry.origin = KeywordOrigin::Curated;

        let mut added = 0;
        for keyword in keywords {
            let keyword = keyword.trim().to_lowercase();
            if !keyword.is_empty() && !entry.keywords.contains(&keyword) {
                entry.keywords.push(keyword);
                added += 1;
            }
        }
        added
    }

    /// Drop entries for which `keep` is false. Returns the removed names.
    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) -> Vec<String> {
        let removed: Vec<String> = self
            .entries
            .keys()
            .filter(|name| !keep(name.as_str()))
            .cloned()
            .collect();
        for name in &removed {
            self.entries.remove(name);
        }
        removed
    }
}

fn read_entries(path: &Path) -> Result<BTreeMap<String, KeywordEntry>, String> {
    let raw = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    serde_json::from_str(&raw).map_err(|e| e.to_string())
}

/// Build a keyword list for a database from its name and contents.
///
/// The full name and its tokens come first; column-name parts and words from
/// text sample values follow, most frequent first. Stopwords are removed and
/// the list is capped at `max`.
pub fn derive_keywords(database: &str, tables: &[TableSchema], max: usize) -> Vec<String> {
    let name = database.to_lowercase();
    let mut keywords: Vec<String> = Vec::new();
    let push = |word: String, keywords: &mut Vec<String>| {
        if !word.is_empty() && !STOPWORDS.contains(&word.as_str()) && !keywords.contains(&word) {
            keywords.push(word);
        }
    };

    push(name.clone(), &mut keywords);
    for token in name.split(['_', '-', ' ']) {
        push(token.to_string(), &mut keywords);
    }

    let mut counts: HashMap<String, usize> = HashMap::new();
    for table in tables {
        for column in &table.columns {
            for part in column.name.to_lowercase().split(['_', '-', ' ']) {
                if part.len() > 2 {
                    *counts.entry(part.to_string()).or_default() += 1;
                }
            }
        }

        for row in &table.sample.rows {
            for value in row {
                if let Value::String(text) = value {
                    for word in text.to_lowercase().replace('_', " ").split_whitespace() {
                        if word.len() > 3 && word.chars().all(char::is_alphabetic) {
                            *counts.entry(word.to_string()).or_default() += 1;
                        }
                    }
                }
            }
        }
    }

    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    for (word, _) in ranked {
        push(word, &mut keywords);
    }

    keywords.truncate(max);
    keywords
}
