use clap::Parser;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Logical name of the database that always exists.
    pub primary: String,
    /// Rows sampled per table when describing a schema.
    pub sample_rows: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LlmConfig {
    pub backend: String, // "remote", "ollama" or "gemini"
    pub model: String,
    pub api_key: Option<String>,
    pub api_url: Option<String>,
    pub temperature: f32,
    pub timeout_secs: u64,
    /// Retries for transient connection failures inside the client.
    pub max_retries: u32,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AgentConfig {
    /// Regenerate-and-reexecute cycles allowed per question.
    pub max_retries: u32,
    /// Hard ceiling on state transitions for one question.
    pub transition_limit: u32,
    /// Rows embedded in the explanation prompt.
    pub preview_rows: usize,
    /// Vocabulary to table hints rendered into the generation prompt.
    pub table_hints: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RouterConfig {
    /// Where the keyword table is persisted. Defaults to `<data_dir>/keyword_mapping.json`.
    pub keyword_file: Option<String>,
    pub max_keywords: usize,
    pub auto_table_filter: bool,
    /// Curated keywords per database.
    pub keywords: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub web: WebConfig,
    pub llm: LlmConfig,
    pub agent: AgentConfig,
    pub router: RouterConfig,
    pub data_dir: String,
    pub log_level: String,
    pub json_logs: bool,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Directory holding the databases
    #[arg(long, env = "NLSQL_DATA_DIR")]
    pub data_dir: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    pub json_logs: bool,
}

impl AppConfig {
    pub fn new(args: &CliArgs) -> Result<Self, ConfigError> {
        let mut config_builder = Config::builder();

        if let Some(config_path) = &args.config {
            config_builder = config_builder.add_source(File::from(config_path.as_path()));
        } else {
            let default_locations = [
                "config.toml",
                "config/config.toml",
                "/etc/nl-sql-agent/config.toml",
            ];

            for location in default_locations {
                if Path::new(location).exists() {
                    config_builder =
                        config_builder.add_source(File::new(location, config::FileFormat::Toml));
                    break;
                }
            }
        }

        // NLSQL__LLM__API_KEY=... overrides llm.api_key
        config_builder = config_builder.add_source(
            Environment::with_prefix("NLSQL")
                .prefix_separator("__")
                .separator("__"),
        );

        let mut config: AppConfig = config_builder.build()?.try_deserialize()?;

        if let Some(host) = &args.host {
            config.web.host = host.clone();
        }
        if let Some(port) = args.port {
            config.web.port = port;
        }
        if let Some(data_dir) = &args.data_dir {
            config.data_dir = data_dir.clone();
        }
        if args.json_logs {
            config.json_logs = true;
        }

        Ok(config)
    }

    pub fn keyword_file(&self) -> PathBuf {
        match &self.router.keyword_file {
            Some(path) => PathBuf::from(path),
            None => Path::new(&self.data_dir).join("keyword_mapping.json"),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            web: WebConfig::default(),
            llm: LlmConfig::default(),
            agent: AgentConfig::default(),
            router: RouterConfig::default(),
            data_dir: "data".to_string(),
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            primary: "main".to_string(),
            sample_rows: 3,
        }
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            backend: "gemini".to_string(),
            model: "gemini-2.5-pro".to_string(),
            api_key: None,
            api_url: None,
            temperature: 0.1,
            timeout_secs: 30,
            max_retries: 2,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            transition_limit: 10,
            preview_rows: 5,
            table_hints: BTreeMap::new(),
        }
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            keyword_file: None,
            max_keywords: 10,
            auto_table_filter: false,
            keywords: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_pipeline_limits() {
        let config = AppConfig::default();
        assert_eq!(config.agent.max_retries, 2);
        assert_eq!(config.agent.transition_limit, 10);
        assert_eq!(config.agent.preview_rows, 5);
        assert_eq!(config.database.sample_rows, 3);
        assert_eq!(config.router.max_keywords, 10);
        assert_eq!(config.database.primary, "main");
    }

    #[test]
    fn keyword_file_defaults_into_data_dir() {
        let mut config = AppConfig::default();
        config.data_dir = "/tmp/nlsql".to_string();
        assert_eq!(
            config.keyword_file(),
            PathBuf::from("/tmp/nlsql/keyword_mapping.json")
        );

        config.router.keyword_file = Some("/etc/keywords.json".to_string());
        assert_eq!(config.keyword_file(), PathBuf::from("/etc/keywords.json"));
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let config: AppConfig = Config::builder()
            .add_source(config::File::from_str(
                "data_dir = \"dbs\"\n[llm]\nbackend = \"ollama\"\nmodel = \"sqlcoder\"\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.data_dir, "dbs");
        assert_eq!(config.llm.backend, "ollama");
        assert_eq!(config.llm.timeout_secs, 30);
        assert_eq!(config.web.port, 3000);
    }
}
