//! A set-once cell with async readers.

use tokio::sync::watch;

/// Value resolved at most once, awaited by any number of readers.
///
/// The first [`resolve`](ResolveOnce::resolve) wins; later calls are no-ops.
#[derive(Debug)]
pub struct ResolveOnce<T> {
    tx: watch::Sender<Option<T>>,
}

impl<T: Clone> ResolveOnce<T> {
    /// Create an unresolved cell.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    /// Resolve the cell. Returns `false` if it was already resolved.
    pub fn resolve(&self, value: T) -> bool {
        let mut value = Some(value);
        self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = value.take();
            true
        })
    }

    /// Whether the cell has been resolved.
    pub fn is_resolved(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// The value, if resolved.
    pub fn get(&self) -> Option<T> {
        self.tx.borrow().clone()
    }

    /// Wait for the value.
    pub async fn wait(&self) -> T {
        let mut rx = self.tx.subscribe();
        loop {
            if let Some(value) = rx.borrow_and_update().clone() {
                return value;
            }
            if rx.changed().await.is_err() {
                // the sender lives in `self`, so this is unreachable while borrowed
                std::future::pending::<()>().await;
            }
        }
    }
}

impl<T: Clone> Default for ResolveOnce<T> {
    fn default() -> Self {
        Self::new()
    }
}
