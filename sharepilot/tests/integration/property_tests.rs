//! Property-based tests for share allocation.
//!
//! For any client count `m` and share count `n`:
//! 1. Balance: per-client counts differ by at most one
//! 2. The first `n % m` clients get the extra share
//! 3. Every share is allocated exactly once, with distinct names and paths
//! 4. The same input always yields the same assignment

use proptest::prelude::*;
use sharepilot::share::{ClientRef, NfsVersion, ShareTemplate, VersionSlot, allocate};
use std::collections::HashSet;

fn clients(m: usize) -> Vec<ClientRef> {
    (0..m)
        .map(|i| ClientRef::new(format!("client-{}", i), format!("192.168.1.{}", i + 1)))
        .collect()
}

fn template() -> ShareTemplate {
    ShareTemplate::new("nfs_share", "/export", "/mnt/nfs")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn prop_allocation_is_balanced(m in 1usize..40, n in 1usize..500) {
        let assignment = allocate(&clients(m), n, &template()).unwrap();
        let lengths: Vec<usize> = assignment.iter().map(|e| e.shares.len()).collect();

        prop_assert_eq!(lengths.len(), m);
        prop_assert_eq!(lengths.iter().sum::<usize>(), n);
        let max = *lengths.iter().max().unwrap();
        let min = *lengths.iter().min().unwrap();
        prop_assert!(max - min <= 1);

        let (q, r) = (n / m, n % m);
        for (position, len) in lengths.iter().enumerate() {
            let expected = if position < r { q + 1 } else { q };
            prop_assert_eq!(*len, expected, "client {}", position);
        }
    }

    #[test]
    fn prop_every_share_allocated_once(m in 1usize..20, n in 1usize..200) {
        let assignment = allocate(&clients(m), n, &template()).unwrap();

        let mut names = HashSet::new();
        let mut exports = HashSet::new();
        let mut mounts = HashSet::new();
        for (_, share) in assignment.pairs() {
            prop_assert!(names.insert(share.name.clone()), "duplicate {}", share.name);
            prop_assert!(exports.insert(share.export_path.clone()));
            prop_assert!(mounts.insert(share.mount_path.clone()));
        }
        prop_assert_eq!(names.len(), n);
        prop_assert_eq!(assignment.share_count(), n);
        for i in 0..n {
            let expected = format!("nfs_share_{}", i);
            prop_assert!(names.contains(&expected));
        }
    }

    #[test]
    fn prop_allocation_is_deterministic(m in 1usize..20, n in 1usize..200) {
        let clients = clients(m);
        let first = allocate(&clients, n, &template()).unwrap();
        let second = allocate(&clients, n, &template()).unwrap();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn prop_pinned_versions_cover_leading_clients(
        m in 2usize..20,
        n in 1usize..100,
        pinned in 0usize..20,
    ) {
        let pinned = pinned.min(m);
        let template = template().with_mount_versions(vec![VersionSlot {
            version: NfsVersion::V3,
            count: pinned,
        }]);
        let assignment = allocate(&clients(m), n, &template).unwrap();

        for (position, entry) in assignment.iter().enumerate() {
            let expected = if position < pinned { NfsVersion::V3 } else { NfsVersion::V4_0 };
            for share in &entry.shares {
                prop_assert_eq!(share.options.version, expected);
            }
        }
    }
}

#[test]
fn test_more_clients_than_shares() {
    let assignment = allocate(&clients(5), 3, &template()).unwrap();
    let lengths: Vec<usize> = assignment.iter().map(|e| e.shares.len()).collect();
    assert_eq!(lengths, vec![1, 1, 1, 0, 0]);
}

#[test]
fn test_invalid_inputs_are_rejected() {
    assert!(allocate(&[], 3, &template()).is_err());
    assert!(allocate(&clients(2), 0, &template()).is_err());
}
