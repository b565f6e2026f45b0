//! Per-key ordering for work spawned onto a shared task set.
//!
//! Every task admitted for a key waits until the task admitted before it for
//! the same key has finished. Tasks for different keys never wait on each
//! other.

use std::collections::HashMap;
use std::hash::Hash;

use tokio::sync::oneshot;

/// Admission table: the most recently admitted task of each busy key.
#[derive(Debug)]
pub struct Lanes<K> {
    next_seq: u64,
    tails: HashMap<K, (u64, oneshot::Receiver<()>)>,
}

/// A task's place in its lane. Dropping it lets the next task for the key run.
#[derive(Debug)]
pub struct Turn {
    seq: u64,
    previous: Option<oneshot::Receiver<()>>,
    _done: oneshot::Sender<()>,
}

impl Turn {
    /// Admission number, to hand back to [`Lanes::release`].
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Resolves once the previous task for the same key has finished.
    pub async fn wait(&mut self) {
        if let Some(previous) = self.previous.take() {
            // Completion is signalled by the sender being dropped.
            let _ = previous.await;
        }
    }
}

impl<K: Eq + Hash> Lanes<K> {
    pub fn new() -> Self {
        Self {
            next_seq: 0,
            tails: HashMap::new(),
        }
    }

    /// Queues a task for `key` behind the last one admitted for it.
    pub fn admit(&mut self, key: K) -> Turn {
        let seq = self.next_seq;
        self.next_seq += 1;
        let (done, finished) = oneshot::channel();
        let previous = self.tails.insert(key, (seq, finished)).map(|(_, rx)| rx);
        Turn {
            seq,
            previous,
            _done: done,
        }
    }

    /// Forgets the lane for `key` if `seq` was the last task admitted to it.
    pub fn release(&mut self, key: &K, seq: u64) {
        if self.tails.get(key).is_some_and(|(last, _)| *last == seq) {
            self.tails.remove(key);
        }
    }

    /// Number of keys with admitted, unreleased work.
    pub fn busy(&self) -> usize {
        self.tails.len()
    }
}

impl<K: Eq + Hash> Default for Lanes<K> {
    fn default() -> Self {
        Self::new()
    }
}
