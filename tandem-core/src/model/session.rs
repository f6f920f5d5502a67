use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Idle,
    Queued,
    Matched,
    Ended,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self::Idle
    }
}
