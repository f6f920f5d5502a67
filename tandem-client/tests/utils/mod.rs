pub mod mock_account;
pub mod mock_api;

pub use journal::*;
pub use mock_account::*;
pub use mock_api::*;
pub use mock_media::*;
pub use mock_peer::*;
pub use mock_signaling::*;

/// Polls `check` every 10ms until it holds or `timeout_ms` passes.
pub async fn wait_until<F, Fut>(timeout_ms: u64, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_millis(timeout_ms);
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() > deadline {
            return false;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
}
