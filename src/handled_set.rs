/*!
 * Shared membership sets used to enforce the job's dedup invariants: a
 * destination path is handled at most once, a destination directory is
 * created at most once, and purge only ever touches directories the walk
 * actually visited.
 */

use std::collections::HashSet;
use std::hash::Hash;
use std::sync::Mutex;

/// A mutex-guarded set with an atomic check-and-insert, so two workers
/// racing on the same key never both observe "not yet handled".
#[derive(Debug, Default)]
pub struct HandledSet<T: Eq + Hash> {
    inner: Mutex<HashSet<T>>,
}

impl<T: Eq + Hash + Clone> HandledSet<T> {
    pub fn new() -> Self {
        Self { inner: Mutex::new(HashSet::new()) }
    }

    /// Insert `key` if absent, returning `true` only to the caller that
    /// performed the insertion. Every other concurrent caller with the same
    /// key gets `false` and must not redo the work `key` guards.
    pub fn claim(&self, key: T) -> bool {
        self.inner.lock().expect("handled set mutex poisoned").insert(key)
    }

    pub fn contains(&self, key: &T) -> bool {
        self.inner.lock().expect("handled set mutex poisoned").contains(key)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("handled set mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot the current members, for the purge pass to scope its
    /// deletions to directories the walk actually visited.
    pub fn snapshot(&self) -> Vec<T> {
        self.inner.lock().expect("handled set mutex poisoned").iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn claim_is_true_only_once() {
        let set: HandledSet<String> = HandledSet::new();
        assert!(set.claim("a".to_string()));
        assert!(!set.claim("a".to_string()));
        assert!(set.claim("b".to_string()));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn contains_reflects_claims() {
        let set: HandledSet<u32> = HandledSet::new();
        assert!(!set.contains(&1));
        set.claim(1);
        assert!(set.contains(&1));
    }

    #[test]
    fn concurrent_claims_only_one_winner_per_key() {
        let set = Arc::new(HandledSet::<u32>::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let set = Arc::clone(&set);
            handles.push(thread::spawn(move || set.claim(42)));
        }
        let winners: u32 = handles.into_iter().map(|h| h.join().unwrap() as u32).sum();
        assert_eq!(winners, 1);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn snapshot_reflects_all_members() {
        let set: HandledSet<u32> = HandledSet::new();
        set.claim(1);
        set.claim(2);
        let mut snap = set.snapshot();
        snap.sort();
        assert_eq!(snap, vec![1, 2]);
    }
}
