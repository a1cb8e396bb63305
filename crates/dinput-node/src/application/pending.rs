//! Bookkeeping for requests that are waiting for a remote answer.
//!
//! # How correlation works (for beginners)
//!
//! The protocol has no request ids.  An answer is matched to its request by
//! the *content* of the request: the peer it went to, plus the mask or the
//! handle set it asked for.  That content is the key of a [`PendingMap`].
//!
//! ```text
//! startByType(sink-1, MOUSE)    ──► key (sink-1, MOUSE)
//! OnStartedByType{requested: MOUSE} from sink-1 ──► complete key (sink-1, MOUSE)
//! ```
//!
//! Two rules follow from this:
//!
//! - A second request with an identical key cannot be told apart from the
//!   first, so it is refused with `AlreadyPending`.
//! - An answer completes an entry only on an exact key match.  An answer
//!   for a key nobody is waiting for is logged and dropped.

use std::collections::HashMap;
use std::hash::Hash;

use crate::application::error::SharingError;

/// Callback that receives the final outcome of an asynchronous request.
///
/// Invoked exactly once, on the event loop that owns the request.
pub type Completion<T> = Box<dyn FnOnce(Result<T, SharingError>) + Send>;

/// Pending completions keyed by request content.
pub struct PendingMap<K, T> {
    entries: HashMap<K, Completion<T>>,
}

impl<K, T> Default for PendingMap<K, T> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash, T> PendingMap<K, T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Registers a completion.
    ///
    /// Callers check [`contains`](Self::contains) before sending the request;
    /// a duplicate key here refuses the newcomer with `AlreadyPending` and
    /// leaves the original entry in place.
    pub fn insert(&mut self, key: K, completion: Completion<T>) {
        if self.entries.contains_key(&key) {
            completion(Err(SharingError::AlreadyPending));
            return;
        }
        self.entries.insert(key, completion);
    }

    /// Completes the entry stored under exactly `key`.
    ///
    /// Returns `false` when nothing was waiting for that key.
    pub fn complete(&mut self, key: &K, result: Result<T, SharingError>) -> bool {
        match self.entries.remove(key) {
            Some(completion) => {
                completion(result);
                true
            }
            None => false,
        }
    }

    /// Fails every entry whose key matches `pred`.  Returns how many failed.
    pub fn fail_where<P>(&mut self, pred: P, error: &SharingError) -> usize
    where
        P: Fn(&K) -> bool,
    {
        let (doomed, kept): (HashMap<K, Completion<T>>, HashMap<K, Completion<T>>) =
            std::mem::take(&mut self.entries)
                .into_iter()
                .partition(|(key, _)| pred(key));
        self.entries = kept;
        let failed = doomed.len();
        for (_, completion) in doomed {
            completion(Err(error.clone()));
        }
        failed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
