mod signaling_channel;
mod signaling_transport;
mod ws_transport;

pub use signaling_channel::*;
pub use signaling_transport::*;
pub use ws_transport::*;
