use crate::db::backend::SqlBackend;
use crate::error::{DbError, DbResult};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, LazyLock};
use tracing::{debug, info, warn};

const REGISTRY_FILE: &str = "registry.json";
const DB_EXTENSION: &str = "duckdb";

static CREDENTIALS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"://([^:/@]+):([^@]+)@").expect("valid credentials pattern"));

/// SQL dialects an external connection can speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Postgresql,
    Mysql,
    Sqlserver,
    Sqlite,
}

impl Dialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::Postgresql => "postgresql",
            Dialect::Mysql => "mysql",
            Dialect::Sqlserver => "sqlserver",
            Dialect::Sqlite => "sqlite",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "postgresql" | "postgres" => Ok(Dialect::Postgresql),
            "mysql" => Ok(Dialect::Mysql),
            "sqlserver" | "mssql" => Ok(Dialect::Sqlserver),
            "sqlite" => Ok(Dialect::Sqlite),
            other => Err(format!("Unsupported database type: {}", other)),
        }
    }
}

/// Where the data behind a logical database name lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Locator {
    Local {
        path: PathBuf,
    },
    External {
        dialect: Dialect,
        connection_string: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseTarget {
    pub name: String,
    pub locator: Locator,
}

impl DatabaseTarget {
    pub fn local(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            locator: Locator::Local { path: path.into() },
        }
    }

    pub fn external(
        name: impl Into<String>,
        dialect: Dialect,
        connection_string: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            locator: Locator::External {
                dialect,
                connection_string: connection_string.into(),
            },
        }
    }

    pub fn is_external(&self) -> bool {
        matches!(self.locator, Locator::External { .. })
    }

    pub fn local_path(&self) -> Option<&Path> {
        match &self.locator {
            Locator::Local { path } => Some(path),
            Locator::External { .. } => None,
        }
    }

    /// "local" or the external dialect.
    pub fn type_tag(&self) -> &'static str {
        match &self.locator {
            Locator::Local { .. } => "local",
            Locator::External { dialect, .. } => dialect.as_str(),
        }
    }

    /// The locator with any password masked, safe to log or return to clients.
    pub fn display_locator(&self) -> String {
        match &self.locator {
            Locator::Local { path } => path.display().to_string(),
            Locator::External {
                connection_string, ..
            } => CREDENTIALS
                .replace(connection_string, "://$1:****@")
                .to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct RegistryFile {
    databases: Vec<DatabaseTarget>,
    default_database: String,
}

/// Maps logical database names to their targets.
///
/// The primary name always resolves; every other entry comes from discovery
/// of `<data_dir>/<name>/<name>.duckdb` files or from explicit registration
/// of an external connection. Discovery only ever adds names.
pub struct DatabaseRegistry {
    data_dir: PathBuf,
    primary: String,
    targets: BTreeMap<String, DatabaseTarget>,
    backend: Arc<dyn SqlBackend>,
}

impl DatabaseRegistry {
    /// Load the persisted registry, guarantee the primary database and merge
    /// anything found on disk.
    pub fn open(
        data_dir: impl Into<PathBuf>,
        primary: impl Into<String>,
        backend: Arc<dyn SqlBackend>,
    ) -> DbResult<Self> {
        let data_dir = data_dir.into();
        if !data_dir.exists() {
            info!("Creating data directory: {}", data_dir.display());
            std::fs::create_dir_all(&data_dir)?;
        }

        let targets = load_targets(&data_dir.join(REGISTRY_FILE));
        let mut registry = Self {
            data_dir,
            primary: primary.into(),
            targets,
            backend,
        };

        registry.ensure_primary()?;
        registry.discover()?;
        registry.save()?;
        Ok(registry)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn primary_name(&self) -> &str {
        &self.primary
    }

    /// Path a local database called `name` is stored at.
    pub fn local_path(&self, name: &str) -> PathBuf {
        self.data_dir
            .join(name)
            .join(format!("{}.{}", name, DB_EXTENSION))
    }

    pub fn list(&self) -> &BTreeMap<String, DatabaseTarget> {
        &self.targets
    }

    pub fn names(&self) -> Vec<String> {
        self.targets.keys().cloned().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.targets.contains_key(name)
    }

    pub fn resolve(&self, name: &str) -> DbResult<DatabaseTarget> {
        let target = self
            .targets
            .get(name)
            .cloned()
            .ok_or_else(|| DbError::NotFound {
                name: name.to_string(),
            })?;

        if name == self.primary {
            self.ensure_local_file(&target)?;
        }
        Ok(target)
    }

    pub fn primary(&self) -> DbResult<DatabaseTarget> {
        self.resolve(&self.primary)
    }

    /// Scan the data directory and merge newly found databases. Existing
    /// names are never remapped. Returns the number of names added.
    pub fn discover(&mut self) -> DbResult<usize> {
        let mut added = 0;

        for entry in std::fs::read_dir(&self.data_dir)?.filter_map(Result::ok) {
            if !entry.path().is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };

            let db_path = self.local_path(&name);
            if !db_path.exists() || self.targets.contains_key(&name) {
                continue;
            }

            debug!("Discovered database {} at {}", name, db_path.display());
            self.targets
                .insert(name.clone(), DatabaseTarget::local(name, db_path));
            added += 1;
        }

        if added > 0 {
            info!("Discovered {} new database(s)", added);
            self.save()?;
        }
        Ok(added)
    }

    /// Drop local entries whose file disappeared, then rediscover.
    pub fn refresh(&mut self) -> DbResult<()> {
        let primary = self.primary.clone();
        let before = self.targets.len();

        self.targets.retain(|name, target| match target.local_path() {
            Some(path) => name == &primary || path.exists(),
            None => true,
        });

        let removed = before - self.targets.len();
        if removed > 0 {
            info!("Removed {} stale database(s) from the registry", removed);
        }

        self.ensure_primary()?;
        self.discover()?;
        self.save()
    }

    pub fn register_external(
        &mut self,
        name: &str,
        dialect: Dialect,
        connection_string: &str,
    ) -> DbResult<DatabaseTarget> {
        validate_name(name)?;
        if self.targets.contains_key(name) {
            return Err(DbError::NameConflict {
                name: name.to_string(),
            });
        }

        let target = DatabaseTarget::external(name, dialect, connection_string);
        info!(
            "Registered external {} database {} ({})",
            dialect,
            name,
            target.display_locator()
        );
        self.targets.insert(name.to_string(), target.clone());
        self.save()?;
        Ok(target)
    }

    pub fn remove_external(&mut self, name: &str) -> DbResult<DatabaseTarget> {
        match self.targets.get(name) {
            Some(target) if target.is_external() => {}
            Some(_) => {
                return Err(DbError::InvalidName {
                    name: name.to_string(),
                    reason: "only external connections can be removed".to_string(),
                });
            }
            None => {
                return Err(DbError::NotFound {
                    name: name.to_string(),
                });
            }
        }

        let removed = self.targets.remove(name).ok_or_else(|| DbError::NotFound {
            name: name.to_string(),
        })?;
        info!("Removed external database {}", name);
        self.save()?;
        Ok(removed)
    }

    /// Create an empty local database. Taken names get a numeric suffix.
    pub fn create_local(&mut self, name: &str) -> DbResult<DatabaseTarget> {
        validate_name(name)?;

        let mut candidate = name.to_string();
        let mut counter = 1;
        while self.targets.contains_key(&candidate) || self.local_path(&candidate).exists() {
            candidate = format!("{}_{}", name, counter);
            counter += 1;
        }

        let path = self.local_path(&candidate);
        self.backend.create_database(&path)?;
        let target = DatabaseTarget::local(candidate.clone(), path);
        info!("Created local database {}", candidate);
        self.targets.insert(candidate, target.clone());
        self.save()?;
        Ok(target)
    }

    fn ensure_primary(&mut self) -> DbResult<()> {
        if !self.targets.contains_key(&self.primary) {
            let path = self.local_path(&self.primary);
            self.targets.insert(
                self.primary.clone(),
                DatabaseTarget::local(self.primary.clone(), path),
            );
        }

        let target = self.targets[&self.primary].clone();
        self.ensure_local_file(&target)
    }

    fn ensure_local_file(&self, target: &DatabaseTarget) -> DbResult<()> {
        if let Some(path) = target.local_path() {
            if !path.exists() {
                info!("Creating empty database {} at {}", target.name, path.display());
                self.backend.create_database(path)?;
            }
        }
        Ok(())
    }

    fn save(&self) -> DbResult<()> {
        let file = RegistryFile {
            databases: self.targets.values().cloned().collect(),
            default_database: self.primary.clone(),
        };
        let json = serde_json::to_string_pretty(&file)?;
        std::fs::write(self.data_dir.join(REGISTRY_FILE), json)?;
        Ok(())
    }
}

fn load_targets(path: &Path) -> BTreeMap<String, DatabaseTarget> {
    if !path.exists() {
        return BTreeMap::new();
    }

    let parsed = std::fs::read_to_string(path)
        .map_err(|e| e.to_string())
        .and_then(|raw| serde_json::from_str::<RegistryFile>(&raw).map_err(|e| e.to_string()));

    match parsed {
        Ok(file) => file
            .databases
            .into_iter()
            .map(|target| (target.name.clone(), target))
            .collect(),
        Err(e) => {
            warn!("Could not load database registry {}: {}", path.display(), e);
            BTreeMap::new()
        }
    }
}

fn validate_name(name: &str) -> DbResult<()> {
    if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-') {
        return Err(DbError::InvalidName {
            name: name.to_string(),
            reason: "names must be alphanumeric with underscores or dashes".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::duckdb_backend::DuckDbBackend;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> DatabaseRegistry {
        DatabaseRegistry::open(dir.path(), "main", Arc::new(DuckDbBackend::new())).unwrap()
    }

    #[test]
    fn primary_is_created_on_open() {
        let dir = TempDir::new().unwrap();
        let registry = open(&dir);

        let primary = registry.primary().unwrap();
        assert_eq!(primary.name, "main");
        assert!(primary.local_path().unwrap().exists());
        assert!(dir.path().join(REGISTRY_FILE).exists());
    }

    #[test]
    fn discovery_is_additive_and_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut registry = open(&dir);

        let path = registry.local_path("earthquake");
        DuckDbBackend::new().create_database(&path).unwrap();

        assert_eq!(registry.discover().unwrap(), 1);
        assert_eq!(registry.discover().unwrap(), 0);
        assert_eq!(registry.names(), vec!["earthquake", "main"]);
    }

    #[test]
    fn refresh_drops_stale_entries_but_keeps_primary() {
        let dir = TempDir::new().unwrap();
        let mut registry = open(&dir);
        registry.create_local("sales").unwrap();

        std::fs::remove_dir_all(dir.path().join("sales")).unwrap();
        std::fs::remove_dir_all(dir.path().join("main")).unwrap();
        registry.refresh().unwrap();

        assert_eq!(registry.names(), vec!["main"]);
        assert!(registry.local_path("main").exists());
    }

    #[test]
    fn external_names_never_shadow_existing_targets() {
        let dir = TempDir::new().unwrap();
        let mut registry = open(&dir);

        let err = registry
            .register_external("main", Dialect::Postgresql, "postgres://u:p@db/main")
            .unwrap_err();
        assert!(matches!(err, DbError::NameConflict { .. }));

        let target = registry
            .register_external("warehouse", Dialect::Postgresql, "postgres://u:secret@db/wh")
            .unwrap();
        assert_eq!(target.type_tag(), "postgresql");
        assert_eq!(target.display_locator(), "postgres://u:****@db/wh");

        let reopened = open(&dir);
        assert!(reopened.contains("warehouse"));
    }

    #[test]
    fn only_external_targets_can_be_removed() {
        let dir = TempDir::new().unwrap();
        let mut registry = open(&dir);
        registry
            .register_external("crm", Dialect::Mysql, "mysql://u:p@db/crm")
            .unwrap();

        assert!(registry.remove_external("main").is_err());
        assert!(registry.remove_external("crm").is_ok());
        assert!(matches!(
            registry.remove_external("crm"),
            Err(DbError::NotFound { .. })
        ));
    }

    #[test]
    fn create_local_suffixes_taken_names() {
        let dir = TempDir::new().unwrap();
        let mut registry = open(&dir);

        let first = registry.create_local("uploads").unwrap();
        let second = registry.create_local("uploads").unwrap();
        assert_eq!(first.name, "uploads");
        assert_eq!(second.name, "uploads_1");
    }

    #[test]
    fn dialect_parsing_accepts_aliases() {
        assert_eq!("postgres".parse::<Dialect>().unwrap(), Dialect::Postgresql);
        assert_eq!("MSSQL".parse::<Dialect>().unwrap(), Dialect::Sqlserver);
        assert!("oracle".parse::<Dialect>().is_err());
    }
}
