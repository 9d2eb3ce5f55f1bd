use std::sync::Arc;

use tracing::debug;

use crate::{registry::Registry, session::SessionId};

/// Fans a line out to every session in the registry.
#[derive(Clone)]
pub struct Broadcaster {
    registry: Arc<Registry>,
}

impl Broadcaster {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Queues `message` for every registered session except `exclude`.
    ///
    /// A failed delivery only affects that recipient: it is asked to shut
    /// down and the loop moves on. Returns how many sessions the message was queued for.
    pub fn send(&self, message: &str, exclude: Option<SessionId>) -> usize {
        let mut delivered = 0;

        for session in self.registry.snapshot() {
            if Some(session.id()) == exclude {
                continue;
            }

            match session.send(message) {
                Ok(()) => delivered += 1,
                Err(err) => {
                    debug!(session = %session.id(), error = %err, "dropping recipient");
                    session.request_shutdown(err);
                }
            }
        }

        debug!(recipients = delivered, %message, "broadcast");
        delivered
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::{error::SendError, session::SessionHandle};

    fn named(
        registry: &Registry,
        name: &str,
        capacity: usize,
    ) -> (Arc<SessionHandle>, mpsc::Receiver<String>) {
        let (handle, outbound) = SessionHandle::new(registry.next_id(), None, capacity);
        handle.set_name(name.to_string());
        registry.add(Arc::clone(&handle));
        (handle, outbound)
    }

    #[test]
    fn excludes_only_the_sender() {
        let registry = Arc::new(Registry::new());
        let broadcaster = Broadcaster::new(Arc::clone(&registry));

        let (alice, mut alice_rx) = named(&registry, "alice", 4);
        let (_bob, mut bob_rx) = named(&registry, "bob", 4);
        let (pending, mut pending_rx) = SessionHandle::new(registry.next_id(), None, 4);
        registry.add(pending);

        let delivered = broadcaster.send("alice: hi", Some(alice.id()));

        assert_eq!(delivered, 2);
        assert_eq!(bob_rx.try_recv().unwrap(), "alice: hi");
        assert_eq!(pending_rx.try_recv().unwrap(), "alice: hi");
        assert!(alice_rx.try_recv().is_err());
    }

    #[test]
    fn failing_recipient_does_not_block_others() {
        let registry = Arc::new(Registry::new());
        let broadcaster = Broadcaster::new(Arc::clone(&registry));

        let (_slow, _slow_rx) = named(&registry, "slow", 1);
        let (_gone, gone_rx) = named(&registry, "gone", 4);
        let (_fast, mut fast_rx) = named(&registry, "fast", 4);
        drop(gone_rx);

        assert_eq!(broadcaster.send("one", None), 2);
        assert_eq!(broadcaster.send("two", None), 1);

        assert_eq!(fast_rx.try_recv().unwrap(), "one");
        assert_eq!(fast_rx.try_recv().unwrap(), "two");
    }

    #[test]
    fn per_recipient_order_follows_call_order() {
        let registry = Arc::new(Registry::new());
        let broadcaster = Broadcaster::new(Arc::clone(&registry));
        let (_reader, mut reader_rx) = named(&registry, "reader", 64);

        for n in 0..32 {
            broadcaster.send(&format!("writer: {n}"), None);
        }

        for n in 0..32 {
            assert_eq!(reader_rx.try_recv().unwrap(), format!("writer: {n}"));
        }
    }

    #[test]
    fn removed_session_is_not_reached() {
        let registry = Arc::new(Registry::new());
        let broadcaster = Broadcaster::new(Arc::clone(&registry));
        let (gone, mut gone_rx) = named(&registry, "gone", 4);

        assert!(gone.close(&broadcaster));
        assert_eq!(broadcaster.send("anyone there?", None), 0);
        assert!(gone_rx.try_recv().is_err());
        assert_eq!(gone.send("direct"), Err(SendError::Closed));
    }
}
