use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::SdkError;
use crate::lock;
use crate::network::FrameSender;
use crate::rendezvous::RendezvousSlot;

/// Where the socket reader reports heartbeat ACKs. Each ping arms a fresh
/// slot, so an ACK only ever satisfies the heartbeat currently in flight.
#[derive(Clone, Default)]
pub(crate) struct AckHandle {
    in_flight: Arc<Mutex<Option<RendezvousSlot<()>>>>,
}

impl AckHandle {
    fn arm(&self) -> RendezvousSlot<()> {
        let slot = RendezvousSlot::new();
        *lock(&self.in_flight) = Some(slot.clone());
        slot
    }

    /// Returns `false` when no heartbeat was waiting for this ACK.
    pub(crate) fn acknowledge(&self) -> bool {
        lock(&self.in_flight)
            .as_ref()
            .is_some_and(|slot| slot.resolve(()))
    }
}

/// Periodic ping with an ACK deadline, shared by both gateways.
pub(crate) struct HeartbeatMonitor {
    label: &'static str,
    interval: Duration,
    first_delay: Duration,
    ack_deadline: Duration,
}

impl HeartbeatMonitor {
    pub(crate) fn new(label: &'static str, interval: Duration, ack_deadline: Duration) -> Self {
        Self {
            label,
            interval,
            first_delay: interval,
            ack_deadline,
        }
    }

    /// Delay the first ping by `jitter` on top of the interval.
    pub(crate) fn with_jitter(mut self, jitter: Duration) -> Self {
        self.first_delay = self.interval + jitter;
        self
    }

    /// Run until `cancel` fires or a heartbeat goes unacknowledged.
    ///
    /// Pings are scheduled on a fixed grid (`first_delay`, then every
    /// `interval`), so a slow ACK does not push later pings back.
    pub(crate) async fn run<F>(
        self,
        sender: FrameSender,
        acks: AckHandle,
        mut ping: F,
        cancel: CancellationToken,
    ) -> Result<(), SdkError>
    where
        F: FnMut() -> Result<String, SdkError>,
    {
        let mut next = Instant::now() + self.first_delay;

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(()),
                () = sleep_until(next) => {}
            }
            next += self.interval;

            let slot = acks.arm();
            sender.send_text(ping()?).await?;
            debug!("[{}] Heartbeat sent", self.label);

            tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(()),
                result = slot.wait(self.ack_deadline) => {
                    if result.is_err() {
                        warn!("[{}] No heartbeat ACK within {:?}", self.label, self.ack_deadline);
                        return Err(SdkError::MissedHeartbeatAck(self.ack_deadline));
                    }
                    debug!("[{}] Heartbeat ACK", self.label);
                }
            }
        }
    }

    /// Spawn [`run`](Self::run); `on_failure` is called once if it stops
    /// with an error.
    pub(crate) fn spawn<F, E>(
        self,
        sender: FrameSender,
        acks: AckHandle,
        ping: F,
        cancel: CancellationToken,
        on_failure: E,
    ) -> JoinHandle<()>
    where
        F: FnMut() -> Result<String, SdkError> + Send + 'static,
        E: FnOnce(SdkError) + Send + 'static,
    {
        let label = self.label;
        tokio::spawn(async move {
            match self.run(sender, acks, ping, cancel).await {
                Ok(()) => debug!("[{}] Heartbeat stopped", label),
                Err(e) => on_failure(e),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const INTERVAL: Duration = Duration::from_millis(41_250);
    const ACK_DEADLINE: Duration = Duration::from_secs(5);

    fn channel() -> (
        FrameSender,
        async_channel::Receiver<tokio_tungstenite::tungstenite::Message>,
    ) {
        let (tx, rx) = async_channel::unbounded();
        (FrameSender::new(tx), rx)
    }

    #[tokio::test(start_paused = true)]
    async fn pings_on_interval_after_jittered_start() {
        let (sender, rx) = channel();
        let acks = AckHandle::default();
        let cancel = CancellationToken::new();
        let jitter = Duration::from_millis(300);
        let start = Instant::now();

        let handle = HeartbeatMonitor::new("Test", INTERVAL, ACK_DEADLINE)
            .with_jitter(jitter)
            .spawn(
                sender,
                acks.clone(),
                || Ok("ping".to_string()),
                cancel.clone(),
                |e| panic!("heartbeat failed: {e}"),
            );

        let mut sent_at = Vec::new();
        for _ in 0..3 {
            rx.recv().await.expect("ping");
            sent_at.push(Instant::now());
            assert!(acks.acknowledge());
        }

        assert_eq!(sent_at[0] - start, INTERVAL + jitter);
        assert_eq!(sent_at[1] - sent_at[0], INTERVAL);
        assert_eq!(sent_at[2] - sent_at[1], INTERVAL);

        cancel.cancel();
        handle.await.expect("join");
    }

    #[tokio::test(start_paused = true)]
    async fn missed_ack_fails_once() {
        let (sender, rx) = channel();
        let failures = Arc::new(AtomicUsize::new(0));
        let start = Instant::now();

        let counter = failures.clone();
        let handle = HeartbeatMonitor::new("Test", INTERVAL, ACK_DEADLINE).spawn(
            sender,
            AckHandle::default(),
            || Ok("ping".to_string()),
            CancellationToken::new(),
            move |e| {
                assert!(matches!(e, SdkError::MissedHeartbeatAck(_)));
                counter.fetch_add(1, Ordering::SeqCst);
            },
        );

        rx.recv().await.expect("ping");
        handle.await.expect("join");

        assert_eq!(failures.load(Ordering::SeqCst), 1);
        assert_eq!(Instant::now() - start, INTERVAL + ACK_DEADLINE);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn ack_without_heartbeat_is_unsolicited() {
        let acks = AckHandle::default();
        assert!(!acks.acknowledge());

        let slot = acks.arm();
        assert!(acks.acknowledge());
        assert!(slot.is_resolved());
        assert!(!acks.acknowledge());
    }
}
