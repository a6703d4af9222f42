pub mod discovery;
pub mod error;
pub mod gateway;
mod io;
pub mod opcode;
pub mod rest;
pub mod voice;

pub use discovery::IpDiscovery;
pub use error::ProtocolError;
pub use gateway::{GatewayEvent, GatewayFrame};
pub use opcode::{GatewayOpcode, VoiceOpcode};
pub use voice::{VoiceEvent, VoiceFrame};
