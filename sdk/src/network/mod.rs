pub(crate) mod api_client;
pub(crate) mod transport;
pub(crate) mod udp_client;

pub use api_client::{HttpApi, RestApi, DEFAULT_API_BASE};
pub use udp_client::ExternalAddress;
pub(crate) use transport::{FrameReader, FrameSender};
pub(crate) use udp_client::VoiceUdp;
