pub mod config;
pub mod model;
pub mod utils;

pub use config::{MediaConstraints, SessionConfig};
pub use model::*;
