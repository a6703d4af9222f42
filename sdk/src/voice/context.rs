use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;

use crate::network::ExternalAddress;

/// Where a voice join currently is. Phases advance strictly in declaration
/// order; any failure jumps straight to `Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum VoicePhase {
    Idle,
    AwaitingVoiceState,
    AwaitingVoiceServer,
    Connecting,
    AwaitingHello,
    Identifying,
    AwaitingReady,
    DiscoveringIp,
    SelectingProtocol,
    AwaitingSessionDescription,
    Connected,
    Disconnected,
}

/// The media server's UDP endpoint as announced in voice Ready.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpEndpoint {
    pub ip: String,
    pub port: u16,
    pub ssrc: u32,
}

/// Everything learned during a successful voice join.
#[derive(Clone)]
pub struct VoiceJoinContext {
    pub guild_id: String,
    pub channel_id: String,
    pub session_id: String,
    pub endpoint: String,
    pub udp: UdpEndpoint,
    pub external: ExternalAddress,
    pub mode: String,
    secret_key: Vec<u8>,
}

impl VoiceJoinContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        guild_id: String,
        channel_id: String,
        session_id: String,
        endpoint: String,
        udp: UdpEndpoint,
        external: ExternalAddress,
        mode: String,
        secret_key: Vec<u8>,
    ) -> Self {
        Self {
            guild_id,
            channel_id,
            session_id,
            endpoint,
            udp,
            external,
            mode,
            secret_key,
        }
    }

    /// Key for the media stream.
    pub fn secret_key(&self) -> &[u8] {
        &self.secret_key
    }
}

impl fmt::Debug for VoiceJoinContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VoiceJoinContext")
            .field("guild_id", &self.guild_id)
            .field("channel_id", &self.channel_id)
            .field("session_id", &self.session_id)
            .field("endpoint", &self.endpoint)
            .field("udp", &self.udp)
            .field("external", &self.external)
            .field("mode", &self.mode)
            .field("secret_key", &format_args!("<{} bytes>", self.secret_key.len()))
            .finish()
    }
}

/// Publishes [`VoicePhase`] changes for one join attempt. A reporter from an
/// older attempt goes quiet as soon as a newer one is started, so a late
/// teardown can't overwrite the phase of the join that replaced it.
#[derive(Clone)]
pub(crate) struct PhaseReporter {
    tx: Arc<watch::Sender<VoicePhase>>,
    current: Arc<AtomicU64>,
    generation: u64,
}

impl PhaseReporter {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(VoicePhase::Idle);
        Self {
            tx: Arc::new(tx),
            current: Arc::new(AtomicU64::new(0)),
            generation: 0,
        }
    }

    /// Reporter for a new join attempt; silences every earlier one.
    pub(crate) fn next_attempt(&self) -> Self {
        let generation = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        Self {
            tx: self.tx.clone(),
            current: self.current.clone(),
            generation,
        }
    }

    pub(crate) fn set(&self, phase: VoicePhase) {
        let changed = self.tx.send_if_modified(|current| {
            if self.current.load(Ordering::SeqCst) != self.generation || *current == phase {
                return false;
            }
            *current = phase;
            true
        });
        if changed {
            debug!("[Voice] Phase {:?}", phase);
        }
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<VoicePhase> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_attempt_cannot_overwrite_phase() {
        let root = PhaseReporter::new();
        let rx = root.subscribe();

        let first = root.next_attempt();
        first.set(VoicePhase::Connected);
        assert_eq!(*rx.borrow(), VoicePhase::Connected);

        let second = root.next_attempt();
        second.set(VoicePhase::AwaitingVoiceState);
        first.set(VoicePhase::Disconnected);
        assert_eq!(*rx.borrow(), VoicePhase::AwaitingVoiceState);
    }

    #[test]
    fn secret_key_is_redacted_in_debug() {
        let context = VoiceJoinContext::new(
            "1".to_string(),
            "2".to_string(),
            "session".to_string(),
            "voice.example:443".to_string(),
            UdpEndpoint {
                ip: "1.2.3.4".to_string(),
                port: 5000,
                ssrc: 1000,
            },
            ExternalAddress {
                ip: "9.8.7.6".to_string(),
                port: 6000,
            },
            "xsalsa20_poly1305_suffix".to_string(),
            vec![7; 32],
        );

        let debug = format!("{context:?}");
        assert!(debug.contains("<32 bytes>"));
        assert!(!debug.contains("7, 7"));
        assert_eq!(context.secret_key().len(), 32);
    }
}
