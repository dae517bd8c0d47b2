// Process-wide page-lock registry.
//
// Background merge threads need to answer "is any online scanner holding
// this page?" without contending on the scanner's per-page latch. The
// registry is kept apart from page-buffer pinning so the merge daemon can
// pick a different victim instead of blocking.

use crate::common::{FileIdentity, OwnerToken, PageId};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};

/// Table mapping a file to the set of `(page, owner)` pairs currently
/// registered. All four operations serialize on one latch.
#[derive(Debug, Default)]
pub struct PageLockRegistry {
    map: Mutex<HashMap<FileIdentity, BTreeSet<(PageId, OwnerToken)>>>,
}

impl PageLockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a holder. Idempotent; duplicates are silently ignored.
    pub fn insert(&self, file: FileIdentity, page: PageId, owner: OwnerToken) {
        let mut map = self.map.lock();
        map.entry(file).or_default().insert((page, owner));
    }

    /// Remove one matching pair if present; no-op otherwise.
    pub fn erase(&self, file: FileIdentity, page: PageId, owner: OwnerToken) {
        let mut map = self.map.lock();
        if let Some(set) = map.get_mut(&file) {
            set.remove(&(page, owner));
            if set.is_empty() {
                map.remove(&file);
            }
        }
    }

    /// Remove every entry whose page lies in `pages`, regardless of owner.
    /// Used to drop locks when a transaction aborts.
    pub fn erase_pages(&self, file: FileIdentity, pages: &[PageId]) {
        let mut map = self.map.lock();
        if let Some(set) = map.get_mut(&file) {
            for &page in pages {
                let from = (page, OwnerToken::MIN);
                let to = (page, OwnerToken::MAX);
                let doomed: Vec<(PageId, OwnerToken)> =
                    set.range(from..=to).copied().collect();
                for pair in doomed {
                    set.remove(&pair);
                }
            }
            if set.is_empty() {
                map.remove(&file);
            }
        }
    }

    /// Whether that exact triple is registered.
    pub fn check(&self, file: FileIdentity, page: PageId, owner: OwnerToken) -> bool {
        let map = self.map.lock();
        map.get(&file)
            .map(|set| set.contains(&(page, owner)))
            .unwrap_or(false)
    }

    /// Whether any owner holds the page.
    pub fn is_page_held(&self, file: FileIdentity, page: PageId) -> bool {
        let map = self.map.lock();
        map.get(&file)
            .map(|set| {
                set.range((page, OwnerToken::MIN)..=(page, OwnerToken::MAX))
                    .next()
                    .is_some()
            })
            .unwrap_or(false)
    }

    /// Number of registered pairs for a file.
    pub fn holder_count(&self, file: FileIdentity) -> usize {
        let map = self.map.lock();
        map.get(&file).map(|s| s.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(n: u64) -> FileIdentity {
        FileIdentity::new(1, 1, n)
    }

    #[test]
    fn test_insert_check_erase() {
        let reg = PageLockRegistry::new();
        reg.insert(file(1), 7, 100);
        assert!(reg.check(file(1), 7, 100));
        assert!(!reg.check(file(1), 7, 101));
        assert!(!reg.check(file(2), 7, 100));

        // idempotent insert
        reg.insert(file(1), 7, 100);
        assert_eq!(reg.holder_count(file(1)), 1);

        reg.erase(file(1), 7, 100);
        assert!(!reg.check(file(1), 7, 100));
        // erase of an absent pair is a no-op
        reg.erase(file(1), 7, 100);
    }

    #[test]
    fn test_bulk_erase_ignores_owner() {
        let reg = PageLockRegistry::new();
        reg.insert(file(1), 3, 100);
        reg.insert(file(1), 3, 200);
        reg.insert(file(1), 4, 100);
        reg.insert(file(1), 9, 300);

        reg.erase_pages(file(1), &[3, 9]);
        assert!(!reg.check(file(1), 3, 100));
        assert!(!reg.check(file(1), 3, 200));
        assert!(!reg.check(file(1), 9, 300));
        assert!(reg.check(file(1), 4, 100));
    }

    #[test]
    fn test_is_page_held() {
        let reg = PageLockRegistry::new();
        assert!(!reg.is_page_held(file(1), 5));
        reg.insert(file(1), 5, 42);
        assert!(reg.is_page_held(file(1), 5));
    }
}
