//! One-shot, single-assignment hand-off between independently running tasks.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;

/// The slot was not resolved before the caller's deadline.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("rendezvous slot not resolved within {0:?}")]
pub struct SlotExpired(pub Duration);

/// A value that is resolved at most once and awaited by any number of tasks.
///
/// Clones share the same slot. A second [`resolve`](Self::resolve) is
/// reported and ignored; awaiters always observe the first value.
pub struct RendezvousSlot<T> {
    tx: Arc<watch::Sender<Option<T>>>,
}

impl<T> Clone for RendezvousSlot<T> {
    fn clone(&self) -> Self {
        Self {
            tx: Arc::clone(&self.tx),
        }
    }
}

impl<T: Clone> Default for RendezvousSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> RendezvousSlot<T> {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Resolve the slot. Returns `false` if it was already resolved, in which
    /// case `value` is dropped and the stored value is untouched.
    pub fn resolve(&self, value: T) -> bool {
        self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(value);
            true
        })
    }

    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// The resolved value, without waiting.
    #[must_use]
    pub fn peek(&self) -> Option<T> {
        self.tx.borrow().clone()
    }

    /// Suspend the calling task until the slot is resolved or `deadline` elapses.
    /// Expiry leaves the slot as it was; it may still be resolved later.
    ///
    /// # Errors
    /// Returns [`SlotExpired`] when the deadline passes first.
    pub async fn wait(&self, deadline: Duration) -> Result<T, SlotExpired> {
        let mut rx = self.tx.subscribe();
        let resolved = tokio::time::timeout(deadline, async move {
            rx.wait_for(Option::is_some)
                .await
                .ok()
                .and_then(|value| value.clone())
        })
        .await;

        match resolved {
            Ok(Some(value)) => Ok(value),
            _ => Err(SlotExpired(deadline)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_once() {
        let slot = RendezvousSlot::new();
        assert!(slot.resolve(1));
        assert!(!slot.resolve(2));
        assert_eq!(slot.peek(), Some(1));
        assert_eq!(slot.wait(Duration::from_millis(10)).await, Ok(1));
    }

    #[tokio::test]
    async fn second_resolve_does_not_change_what_awaiters_see() {
        let slot = RendezvousSlot::new();
        let waiter = {
            let slot = slot.clone();
            tokio::spawn(async move { slot.wait(Duration::from_secs(5)).await })
        };
        tokio::task::yield_now().await;

        assert!(slot.resolve("first"));
        assert!(!slot.resolve("second"));

        assert_eq!(waiter.await.expect("join"), Ok("first"));
        assert_eq!(slot.wait(Duration::from_millis(10)).await, Ok("first"));
    }

    #[tokio::test(start_paused = true)]
    async fn expires_without_touching_the_slot() {
        let slot = RendezvousSlot::<u32>::new();
        let deadline = Duration::from_secs(5);
        assert_eq!(slot.wait(deadline).await, Err(SlotExpired(deadline)));
        assert!(!slot.is_resolved());

        // Still resolvable after an expired wait.
        assert!(slot.resolve(7));
        assert_eq!(slot.wait(deadline).await, Ok(7));
    }

    #[tokio::test]
    async fn already_resolved_slot_returns_immediately() {
        let slot = RendezvousSlot::new();
        slot.resolve(String::from("ready"));
        assert_eq!(slot.wait(Duration::ZERO).await.as_deref(), Ok("ready"));
    }
}
