//! Gateway client and voice session engine.
//!
//! [`GatewaySession`] owns the primary gateway connection: heartbeat,
//! identify, the dispatch loop and slash-command replies. A voice join runs
//! the voice gateway handshake and UDP IP discovery on top of it and yields
//! a [`VoiceJoinContext`].

pub mod config;
pub mod error;
mod gateway;
mod heartbeat;
mod network;
pub mod rendezvous;
mod voice;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use config::{CommandConfig, GatewayConfig, PresenceConfig, VoiceConfig, VoiceTarget};
pub use error::SdkError;
pub use gateway::{GatewayHandshake, GatewaySession, GatewayState};
pub use network::{ExternalAddress, HttpApi, RestApi, DEFAULT_API_BASE};
pub use rendezvous::{RendezvousSlot, SlotExpired};
pub use voice::{UdpEndpoint, VoiceJoinContext, VoicePhase, VoiceSession};

pub use penny_protocol as protocol;

/// Lock a mutex that only guards plain data; a panic elsewhere can't leave
/// it half-written, so poisoning is ignored.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
