use crate::agent::SqlAgent;
use crate::changes::{ChangeLog, ChangeOutcome, ChangeProcessor};
use crate::config::AppConfig;
use tokio::sync::Mutex;
use tracing::{debug, error};

/// Shared application state for the web server.
///
/// The agent is not safe for concurrent questions, so every handler that
/// touches it goes through the mutex. Lock order is agent, then processor.
pub struct AppState {
    pub config: AppConfig,
    pub agent: Mutex<SqlAgent>,
    pub changes: ChangeLog,
    pub processor: Mutex<ChangeProcessor>,
    pub startup_time: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    pub fn new(config: AppConfig, agent: SqlAgent) -> Self {
        Self {
            config,
            agent: Mutex::new(agent),
            changes: ChangeLog::new(),
            processor: Mutex::new(ChangeProcessor::new()),
            startup_time: chrono::Utc::now(),
        }
    }

    /// Apply change records the agent has not seen yet. Failures are logged
    /// and retried on the next call.
    pub async fn apply_pending_changes(&self, agent: &mut SqlAgent) -> ChangeOutcome {
        let mut processor = self.processor.lock().await;
        match processor.process(&self.changes, agent).await {
            Ok(outcome) => {
                if outcome.processed > 0 {
                    debug!(
                        ?outcome,
                        watermark = ?processor.watermark(),
                        "Applied pending database changes"
                    );
                }
                outcome
            }
            Err(e) => {
                error!("Failed to apply database changes: {}", e);
                ChangeOutcome::default()
            }
        }
    }
}
