use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Bookkeeping record for one replay invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayRun {
    pub id: String,
    pub recording: String,
    #[serde(default = "default_status")]
    pub status: String, // "pending", "running", "completed", "faulted"
    #[serde(default)]
    pub current_step: usize,
    #[serde(default)]
    pub total_steps: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

fn default_status() -> String {
    "pending".to_string()
}

impl ReplayRun {
    pub fn new(recording: String, total_steps: usize) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            recording,
            status: "pending".to_string(),
            current_step: 0,
            total_steps,
            error: None,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn start(&mut self) {
        self.status = "running".to_string();
        self.started_at = Some(Utc::now());
    }

    pub fn complete(&mut self) {
        self.status = "completed".to_string();
        self.completed_at = Some(Utc::now());
    }

    pub fn fault(&mut self, error: String) {
        self.status = "faulted".to_string();
        self.error = Some(error);
        self.completed_at = Some(Utc::now());
    }
}
