mod media;
mod peer_transport;
mod rtc_transport;
pub mod sdp;

pub use media::*;
pub use peer_transport::*;
pub use rtc_transport::*;
