//! Picks the databases and tables a question is about.

pub mod keyword_router;
pub mod keywords;

use crate::db::registry::DatabaseTarget;
use crate::db::schema::SchemaDescriber;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};

pub use keyword_router::KeywordRouter;
pub use keywords::{KeywordEntry, KeywordOrigin, KeywordTable, derive_keywords};

/// The databases a router may choose from, and a way to look inside them.
pub struct Catalog<'a> {
    pub databases: &'a BTreeMap<String, DatabaseTarget>,
    pub primary: &'a str,
    pub describer: &'a SchemaDescriber,
}

/// Strategy for scoping a question. The agent holds one behind an `Arc` so
/// the management surface can swap or reconfigure it at runtime.
#[async_trait]
pub trait DatabaseRouter: Send + Sync {
    /// Names of the databases the question is about. Never empty: falls back
    /// to the primary database.
    async fn detect_databases(&self, question: &str, catalog: &Catalog<'_>) -> BTreeSet<String>;

    /// Tables among `tables` the question mentions, or `None` when it
    /// mentions none of them.
    fn detect_tables(&self, question: &str, tables: &[String]) -> Option<BTreeSet<String>>;

    /// Bring the router's vocabulary in line with the catalog. Returns the
    /// number of databases whose vocabulary was derived.
    async fn remap(&self, catalog: &Catalog<'_>) -> usize;

    /// Attach curated keywords to a database. Returns how many were new.
    async fn add_keywords(&self, database: &str, keywords: &[String]) -> usize;

    async fn keywords(&self) -> BTreeMap<String, KeywordEntry>;
}
