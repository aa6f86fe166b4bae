use serde::{Deserialize, Serialize};

/// Step-level progress of the current run. Not history: every update
/// replaces the previous one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub current: u64,
    pub total: u64,
    pub percentage: u8,
    pub status: String,
}
impl Progress {
    pub fn new(current: u64, total: u64, status: impl Into<String>) -> Self {
        let percentage = match total {
            0 => 0,
            total => ((current.min(total) as f64 / total as f64) * 100.0).round() as u8,
        };
        Self { current, total, percentage, status: status.into() }
    }
}
