pub use tandem_core::{SessionConfig, SessionStatus};

pub mod model {
    pub use tandem_core::model::*;
}

pub mod config {
    pub use tandem_core::config::*;
}

#[cfg(feature = "client")]
pub mod client {
    pub use tandem_client::*;
}
