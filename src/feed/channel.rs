//! Receive-only handles to session feed channels.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

/// Cloneable receive end of one feed channel.
///
/// Every caller of a session accessor gets a clone of the same handle while
/// the feed is live. Clones compete for messages; each envelope is delivered
/// to exactly one of them. `recv` returns `None` once the feed's receive loop
/// has exited and buffered envelopes are drained. That is terminal: ask the
/// session for the feed again to re-establish it.
#[derive(Debug)]
pub struct FeedReceiver<T> {
    inner: Arc<Mutex<mpsc::Receiver<T>>>,
}

impl<T> FeedReceiver<T> {
    /// Creates a bounded channel and returns its sender with a receive handle.
    pub(crate) fn channel(capacity: usize) -> (mpsc::Sender<T>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            tx,
            Self {
                inner: Arc::new(Mutex::new(rx)),
            },
        )
    }

    /// Receives the next envelope, or `None` once the feed is closed.
    pub async fn recv(&self) -> Option<T> {
        self.inner.lock().await.recv().await
    }

    /// Returns `true` when both handles refer to the same channel.
    pub fn same_channel(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T> Clone for FeedReceiver<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}
