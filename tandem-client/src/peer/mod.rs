mod candidate_buffer;
mod peer_link;
mod quality_sampler;

pub use candidate_buffer::*;
pub use peer_link::*;
pub use quality_sampler::*;
