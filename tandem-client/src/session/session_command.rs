use crate::session::SessionError;
use tokio::sync::oneshot;

pub type Reply<T> = oneshot::Sender<Result<T, SessionError>>;

/// Intents sent from a [`SessionHandle`](crate::session::SessionHandle)
/// to the session loop.
pub enum SessionCommand {
    Search(Reply<()>),
    Stop(Reply<()>),
    Skip { requeue: bool, reply: Reply<()> },
    SendMessage { text: String, reply: Reply<()> },
    /// Replies with the new muted state.
    ToggleMute(Reply<bool>),
    /// Replies with the new camera-off state.
    ToggleVideo(Reply<bool>),
    RetryMedia(Reply<()>),
    Shutdown(oneshot::Sender<()>),
}
