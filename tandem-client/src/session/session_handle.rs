use crate::session::{Reply, SessionCommand, SessionError, SessionSnapshot};
use tokio::sync::{mpsc, oneshot, watch};

/// Cloneable front door to a running match session. Dropping every handle
/// shuts the session down.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    snapshot: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    pub(crate) fn new(
        commands: mpsc::Sender<SessionCommand>,
        snapshot: watch::Receiver<SessionSnapshot>,
    ) -> Self {
        Self { commands, snapshot }
    }

    pub async fn search(&self) -> Result<(), SessionError> {
        self.request(SessionCommand::Search).await
    }

    pub async fn stop(&self) -> Result<(), SessionError> {
        self.request(SessionCommand::Stop).await
    }

    pub async fn skip(&self) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::Skip {
            requeue: false,
            reply,
        })
        .await
    }

    /// Leaves the current match and queues for the next one.
    pub async fn skip_and_search(&self) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::Skip {
            requeue: true,
            reply,
        })
        .await
    }

    pub async fn send_message(&self, text: impl Into<String>) -> Result<(), SessionError> {
        let text = text.into();
        self.request(|reply| SessionCommand::SendMessage { text, reply })
            .await
    }

    pub async fn toggle_mute(&self) -> Result<bool, SessionError> {
        self.request(SessionCommand::ToggleMute).await
    }

    pub async fn toggle_video(&self) -> Result<bool, SessionError> {
        self.request(SessionCommand::ToggleVideo).await
    }

    pub async fn retry_media(&self) -> Result<(), SessionError> {
        self.request(SessionCommand::RetryMedia).await
    }

    /// Runs the ordered shutdown and waits for it. A session that already
    /// ended returns immediately.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(SessionCommand::Shutdown(tx)).await.is_ok() {
            let _ = rx.await;
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> SessionCommand,
    ) -> Result<T, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.unwrap_or(Err(SessionError::Closed))
    }
}
