//! Cross-thread deferral
//!
//! Host threads that are not the event-loop thread capture what a callback
//! needs as plain native data and queue it here; the next tick replays it.
//! The lock is held only to push or to swap the pending list out.

use std::sync::Mutex;

use tether_core::arena::ArenaHandle;
use tether_core::sync::lock;
use tether_host::ObjectHandle;

use crate::hooks::HookSide;
use crate::marshal::NativeValue;

/// An invocation captured off the event-loop thread.
#[derive(Debug, Clone, PartialEq)]
pub enum DeferredCall {
    Hook {
        registration: ArenaHandle,
        side: HookSide,
        context: ObjectHandle,
        params: Vec<NativeValue>,
    },
    KeyBind {
        registration: ArenaHandle,
    },
    ObjectCreated {
        registration: ArenaHandle,
        object: ObjectHandle,
    },
}

/// Many-producer, single-consumer hand-off queue.
pub struct DeferralQueue<T> {
    pending: Mutex<Vec<T>>,
}

impl<T> DeferralQueue<T> {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, item: T) {
        lock(&self.pending).push(item);
    }

    /// Take everything queued so far, in enqueue order. Items pushed while
    /// the caller works through the batch land in the next drain.
    pub fn drain(&self) -> Vec<T> {
        std::mem::take(&mut *lock(&self.pending))
    }

    pub fn len(&self) -> usize {
        lock(&self.pending).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for DeferralQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_drain_preserves_enqueue_order() {
        let queue = DeferralQueue::new();
        for i in 0..5 {
            queue.push(i);
        }
        assert_eq!(queue.drain(), vec![0, 1, 2, 3, 4]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_pushes_during_drain_wait_for_next_batch() {
        let queue = DeferralQueue::new();
        queue.push("first");

        let batch = queue.drain();
        for _ in &batch {
            queue.push("late");
        }

        assert_eq!(batch, vec!["first"]);
        assert_eq!(queue.drain(), vec!["late"]);
    }

    #[test]
    fn test_many_producers() {
        let queue = Arc::new(DeferralQueue::new());
        let producers: Vec<_> = (0..4)
            .map(|t| {
                let queue = Arc::clone(&queue);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        queue.push((t, i));
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }

        let drained = queue.drain();
        assert_eq!(drained.len(), 400);
        for t in 0..4 {
            let mine: Vec<_> = drained.iter().filter(|(who, _)| *who == t).map(|(_, i)| *i).collect();
            assert_eq!(mine, (0..100).collect::<Vec<_>>());
        }
    }
}
