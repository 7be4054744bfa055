//! Shared fixtures: a temporary data directory with DuckDB files and a
//! scripted language model.
#![allow(dead_code)]

use async_trait::async_trait;
use duckdb::Connection;
use nl_sql_agent::config::AppConfig;
use nl_sql_agent::llm::{LanguageModel, LlmError};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;
use tempfile::TempDir;

pub const EXPLANATION: &str = "The query lists the requested customers.";

/// One scripted reply to a SQL generation prompt.
pub enum Reply {
    Sql(&'static str),
    RateLimited,
    Panic,
}

/// Replies to SQL generation prompts from a queue and to every other prompt
/// with [`EXPLANATION`]. When the queue runs dry the last reply repeats.
pub struct ScriptedModel {
    replies: Mutex<VecDeque<Reply>>,
    last: Mutex<Option<&'static str>>,
    pub generation_prompts: Mutex<Vec<String>>,
    pub explanation_prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            last: Mutex::new(None),
            generation_prompts: Mutex::new(Vec::new()),
            explanation_prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn generations(&self) -> usize {
        self.generation_prompts.lock().unwrap().len()
    }

    pub fn explanations(&self) -> usize {
        self.explanation_prompts.lock().unwrap().len()
    }

    pub fn calls(&self) -> usize {
        self.generations() + self.explanations()
    }

    pub fn push(&self, reply: Reply) {
        self.replies.lock().unwrap().push_back(reply);
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        if !prompt.trim_end().ends_with("SQL Query:") {
            self.explanation_prompts.lock().unwrap().push(prompt.to_string());
            return Ok(EXPLANATION.to_string());
        }

        self.generation_prompts.lock().unwrap().push(prompt.to_string());
        let reply = self.replies.lock().unwrap().pop_front();
        match reply {
            Some(Reply::Sql(sql)) => {
                *self.last.lock().unwrap() = Some(sql);
                Ok(sql.to_string())
            }
            Some(Reply::RateLimited) => Err(LlmError::Response {
                status: 429,
                message: "Resource has been exhausted (e.g. check quota).".to_string(),
            }),
            Some(Reply::Panic) => panic!("model exploded"),
            None => Ok(self.last.lock().unwrap().unwrap_or("SELECT 1").to_string()),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Create `<dir>/<name>/<name>.duckdb` and run `statements` against it.
pub fn create_database(dir: &Path, name: &str, statements: &str) {
    let db_dir = dir.join(name);
    std::fs::create_dir_all(&db_dir).unwrap();
    let conn = Connection::open(db_dir.join(format!("{}.duckdb", name))).unwrap();
    conn.execute_batch(statements).unwrap();
}

pub const CUSTOMERS: &str = "
    CREATE TABLE customers (
        customer_id INTEGER PRIMARY KEY,
        name VARCHAR NOT NULL,
        email VARCHAR,
        city VARCHAR,
        signup_date DATE
    );
    INSERT INTO customers VALUES
        (1, 'Alice Moreau', 'alice@example.com', 'Lyon', '2023-01-15'),
        (2, 'Bruno Silva', 'bruno@example.com', 'Porto', '2023-02-03'),
        (3, 'Chen Wei', 'chen@example.com', 'Shanghai', '2023-03-21'),
        (4, 'Dana Kowalski', 'dana@example.com', 'Krakow', '2023-04-09'),
        (5, 'Emeka Obi', 'emeka@example.com', 'Lagos', '2023-05-30');
";

pub const EARTHQUAKES: &str = "
    CREATE TABLE quakes (
        event_id INTEGER PRIMARY KEY,
        magnitude DOUBLE,
        depth_km DOUBLE,
        region VARCHAR
    );
    INSERT INTO quakes VALUES
        (1, 6.1, 10.0, 'Anatolia'),
        (2, 4.3, 33.5, 'Aegean');
";

/// Data directory holding the primary `main` database with a five-row
/// customers table.
pub fn data_dir() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    create_database(dir.path(), "main", CUSTOMERS);
    dir
}

pub fn config(dir: &TempDir) -> AppConfig {
    let mut config = AppConfig::default();
    config.data_dir = dir.path().to_string_lossy().into_owned();
    config
}
