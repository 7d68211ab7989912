//! Remote client identity and liveness.
//!
//! A [`ClientHandle`] stands for the process (or in-process window) that owns a freeform display.
//! The transport that carries the client's requests calls [`ClientHandle::disconnect`] when the
//! client goes away; every death recipient linked to the handle then fires exactly once.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

static CLIENT_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Stable identity of a client, used as the display registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl ClientId {
    fn next() -> ClientId {
        ClientId(CLIENT_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }

    /// Refers to a client by the raw value returned from [`ClientId::get`].
    pub fn specific(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

type DeathRecipient = Box<dyn FnOnce(ClientId) + Send>;

#[derive(Default)]
struct Liveness {
    dead: bool,
    next_link: u64,
    recipients: HashMap<u64, DeathRecipient>,
}

/// Handle to a remote client.
///
/// Clones refer to the same client.
#[derive(Clone)]
pub struct ClientHandle {
    id: ClientId,
    liveness: Arc<Mutex<Liveness>>,
}

/// The client disconnected before the death recipient could be linked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientGone(pub ClientId);

impl fmt::Display for ClientGone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client {} is already gone", self.0)
    }
}

impl std::error::Error for ClientGone {}

impl ClientHandle {
    pub fn new() -> Self {
        Self {
            id: ClientId::next(),
            liveness: Arc::new(Mutex::new(Liveness::default())),
        }
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn is_alive(&self) -> bool {
        !self.lock().dead
    }

    /// Marks the client as gone and fires every linked death recipient.
    ///
    /// Only the first call has any effect. Recipients run on the calling thread, after the
    /// liveness state is unlocked, so they are free to call back into this handle.
    pub fn disconnect(&self) {
        let recipients = {
            let mut liveness = self.lock();
            if liveness.dead {
                return;
            }
            liveness.dead = true;
            std::mem::take(&mut liveness.recipients)
        };

        debug!("client {} disconnected, notifying {} recipients", self.id, recipients.len());
        for (_, recipient) in recipients {
            recipient(self.id);
        }
    }

    /// Registers `recipient` to run once when the client disconnects.
    ///
    /// Fails if the client is already gone. The returned link unregisters the recipient when
    /// dropped.
    pub fn link_to_death(
        &self,
        recipient: impl FnOnce(ClientId) + Send + 'static,
    ) -> Result<DeathLink, ClientGone> {
        let mut liveness = self.lock();
        if liveness.dead {
            return Err(ClientGone(self.id));
        }

        let link = liveness.next_link;
        liveness.next_link += 1;
        liveness.recipients.insert(link, Box::new(recipient));

        Ok(DeathLink {
            link,
            liveness: Arc::downgrade(&self.liveness),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Liveness> {
        // A panicking recipient never runs with the lock held, so poisoning can only come from a
        // panic in this module's own short critical sections; the state stays consistent.
        self.liveness
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for ClientHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientHandle")
            .field("id", &self.id)
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl PartialEq for ClientHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ClientHandle {}

/// Registration of a death recipient.
///
/// Dropping the link cancels the registration. After the recipient fired, dropping it does
/// nothing.
#[derive(Debug)]
pub struct DeathLink {
    link: u64,
    liveness: Weak<Mutex<Liveness>>,
}

impl DeathLink {
    /// Cancels the registration, returning whether the recipient was still pending.
    pub fn unlink(self) -> bool {
        self.remove()
    }

    fn remove(&self) -> bool {
        let Some(liveness) = self.liveness.upgrade() else {
            return false;
        };
        let mut liveness = liveness
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        liveness.recipients.remove(&self.link).is_some()
    }
}

impl Drop for DeathLink {
    fn drop(&mut self) {
        self.remove();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    fn counter() -> (Arc<AtomicUsize>, impl FnOnce(ClientId) + Send + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let count_ = count.clone();
        (count, move |_| {
            count_.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn ids_are_unique() {
        let a = ClientHandle::new();
        let b = ClientHandle::new();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.clone(), a);
    }

    #[test]
    fn recipient_fires_once() {
        let client = ClientHandle::new();
        let (count, recipient) = counter();
        let _link = client.link_to_death(recipient).unwrap();

        assert!(client.is_alive());
        client.disconnect();
        client.disconnect();

        assert!(!client.is_alive());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn linking_to_dead_client_fails() {
        let client = ClientHandle::new();
        client.disconnect();

        let (count, recipient) = counter();
        assert_eq!(
            client.link_to_death(recipient).unwrap_err(),
            ClientGone(client.id())
        );
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn dropped_link_does_not_fire() {
        let client = ClientHandle::new();
        let (count, recipient) = counter();
        let link = client.link_to_death(recipient).unwrap();
        assert!(link.unlink());

        client.disconnect();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unlink_after_death_is_noop() {
        let client = ClientHandle::new();
        let (count, recipient) = counter();
        let link = client.link_to_death(recipient).unwrap();

        client.disconnect();
        assert!(!link.unlink());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn recipient_may_use_handle() {
        let client = ClientHandle::new();
        let client_ = client.clone();
        let (count, recipient) = counter();
        let _link = client
            .link_to_death(move |id| {
                assert_eq!(id, client_.id());
                assert!(!client_.is_alive());
                recipient(id);
            })
            .unwrap();

        client.disconnect();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
