mod account;
mod api_transport;
mod credential_gate;
mod relay;

pub use account::*;
pub use api_transport::*;
pub use credential_gate::*;
pub use relay::*;
