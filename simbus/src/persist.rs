//! Opaque durable-state holder for code under test.
//!
//! Replicated state machines persist two blobs: their hard state and an
//! optional snapshot. The fabric never looks inside either; this type just
//! holds them behind one lock so a "rebooted" peer can be handed a copy of
//! what it had written.

use std::sync::{Mutex, MutexGuard};

use bytes::Bytes;

/// Mutex-guarded holder for a state blob and a snapshot blob.
#[derive(Debug, Default)]
pub struct Persister {
    inner: Mutex<Blobs>,
}

#[derive(Debug, Default, Clone)]
struct Blobs {
    state: Bytes,
    snapshot: Bytes,
}

impl Persister {
    /// Create an empty persister.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Blobs> {
        self.inner.lock().expect("persister poisoned")
    }

    /// Replace the state blob, leaving the snapshot untouched.
    pub fn save_state(&self, state: impl Into<Bytes>) {
        self.lock().state = state.into();
    }

    /// Replace state and snapshot together, as one atomic step.
    pub fn save_state_and_snapshot(&self, state: impl Into<Bytes>, snapshot: impl Into<Bytes>) {
        let mut blobs = self.lock();
        blobs.state = state.into();
        blobs.snapshot = snapshot.into();
    }

    /// The current state blob.
    pub fn read_state(&self) -> Bytes {
        self.lock().state.clone()
    }

    /// The current snapshot blob.
    pub fn read_snapshot(&self) -> Bytes {
        self.lock().snapshot.clone()
    }

    /// Size of the state blob in bytes.
    pub fn state_size(&self) -> usize {
        self.lock().state.len()
    }

    /// Size of the snapshot blob in bytes.
    pub fn snapshot_size(&self) -> usize {
        self.lock().snapshot.len()
    }

    /// A detached copy. The copies share the immutable blob storage but
    /// update independently from here on.
    pub fn clone_detached(&self) -> Persister {
        Persister {
            inner: Mutex::new(self.lock().clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_and_read_state() {
        let p = Persister::new();
        assert_eq!(p.state_size(), 0);

        p.save_state(Bytes::from_static(b"term=3"));
        assert_eq!(p.read_state(), Bytes::from_static(b"term=3"));
        assert_eq!(p.state_size(), 6);
        assert_eq!(p.snapshot_size(), 0);
    }

    #[test]
    fn save_state_and_snapshot_together() {
        let p = Persister::new();
        p.save_state_and_snapshot(Bytes::from_static(b"state"), Bytes::from_static(b"snap"));
        assert_eq!(p.read_state(), Bytes::from_static(b"state"));
        assert_eq!(p.read_snapshot(), Bytes::from_static(b"snap"));
    }

    #[test]
    fn detached_copy_diverges() {
        let p = Persister::new();
        p.save_state(Bytes::from_static(b"original"));

        let copy = p.clone_detached();
        assert_eq!(copy.read_state(), Bytes::from_static(b"original"));

        p.save_state(Bytes::from_static(b"changed"));
        assert_eq!(copy.read_state(), Bytes::from_static(b"original"));
        assert_eq!(p.read_state(), Bytes::from_static(b"changed"));
    }
}
