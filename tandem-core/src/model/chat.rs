use serde::{Deserialize, Serialize};

/// One transcript entry. `from_self` is decided by the matchmaking service,
/// which echoes our own messages back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub text: String,
    pub from_self: bool,
}
