use crate::utils::Journal;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tandem_client::AccountSession;

#[derive(Clone)]
pub struct MockAccount {
    authenticated: Arc<AtomicBool>,
    logouts: Arc<AtomicUsize>,
    journal: Journal,
}

impl MockAccount {
    pub fn new(journal: Journal) -> Self {
        Self {
            authenticated: Arc::new(AtomicBool::new(true)),
            logouts: Arc::new(AtomicUsize::new(0)),
            journal,
        }
    }

    pub fn logouts(&self) -> usize {
        self.logouts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AccountSession for MockAccount {
    fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    async fn logout(&self) {
        self.authenticated.store(false, Ordering::SeqCst);
        self.logouts.fetch_add(1, Ordering::SeqCst);
        self.journal.record("account:logout").await;
    }
}
