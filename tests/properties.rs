//! Property tests for revision counting, change detection and lookups.

use proptest::prelude::*;
use revisions::{
    capturable_attributes, Clock, ManualClock, MemoryStore, Repository, Timestamp, TypeDescriptor,
    TypeRegistry,
};
use std::sync::Arc;

fn test_repo() -> (Repository<MemoryStore>, Arc<ManualClock>) {
    let registry = TypeRegistry::new();
    registry
        .register(
            TypeDescriptor::new("Person")
                .revisable()
                .embeds_many("addresses", "Address"),
        )
        .unwrap_or_else(|e| panic!("register failed: {e}"));
    registry
        .register(TypeDescriptor::new("Address"))
        .unwrap_or_else(|e| panic!("register failed: {e}"));

    let clock = Arc::new(ManualClock::new(Timestamp::from_secs(1_000)));
    let repo = Repository::with_clock(Arc::new(registry), MemoryStore::new(), clock.clone());
    (repo, clock)
}

fn name_strategy() -> impl Strategy<Value = String> {
    prop_oneof![Just("a".to_string()), Just("b".to_string()), "[a-z]{1,6}"]
}

proptest! {
    #[test]
    fn forced_revisions_are_counted(n in 0usize..20) {
        let (repo, _) = test_repo();
        let mut person = repo.create("Person", [("name", "x")]).unwrap();
        for _ in 0..n {
            prop_assert!(repo.force_revise(&mut person).unwrap());
        }
        prop_assert_eq!(person.revision_idx(), 1 + n as u64);
        prop_assert_eq!(person.revisions().len(), n);
        for (i, revision) in person.revisions().iter().enumerate() {
            prop_assert_eq!(revision.idx(), 1 + i as u64);
        }
    }

    #[test]
    fn revise_is_idempotent(name in name_strategy(), addresses in prop::collection::vec("[a-z ]{0,8}", 0..3)) {
        let (repo, _) = test_repo();
        let mut person = repo.create("Person", [("name", name)]).unwrap();
        for line in addresses {
            let mut address = repo.build("Address").unwrap();
            address.set("address", line).unwrap();
            person.push_embedded("addresses", address).unwrap();
        }

        prop_assert!(repo.revise(&mut person).unwrap());
        prop_assert!(!repo.revise(&mut person).unwrap());
        prop_assert_eq!(person.revisions().len(), 1);
    }

    #[test]
    fn only_changes_are_captured(names in prop::collection::vec(name_strategy(), 1..12)) {
        let (repo, clock) = test_repo();
        let mut person = repo.build("Person").unwrap();

        let mut expected = 0;
        let mut previous: Option<&String> = None;
        for name in &names {
            clock.advance(1_000);
            person.set("name", name.as_str()).unwrap();
            let appended = repo.revise(&mut person).unwrap();
            let changed = previous != Some(name);
            prop_assert_eq!(appended, changed);
            if changed {
                expected += 1;
            }
            previous = Some(name);
        }
        prop_assert_eq!(person.revisions().len(), expected);
    }

    #[test]
    fn reified_attributes_match_capture(names in prop::collection::vec(name_strategy(), 1..6)) {
        let (repo, _) = test_repo();
        let mut person = repo.build("Person").unwrap();
        for name in &names {
            person.set("name", name.as_str()).unwrap();
            repo.force_revise(&mut person).unwrap();
        }

        for revision in person.revisions() {
            let reified = revision.reify(repo.registry()).unwrap();
            prop_assert!(!reified.is_live());
            let attributes = capturable_attributes(repo.registry(), &reified).unwrap();
            prop_assert_eq!(&attributes, revision.attributes());
        }
    }

    #[test]
    fn revision_at_is_monotonic(
        gaps in prop::collection::vec(1i64..1_000, 1..8),
        queries in prop::collection::vec(0i64..10_000, 2..10),
    ) {
        let (repo, clock) = test_repo();
        let mut person = repo.build("Person").unwrap();
        let start = clock.now().as_micros();

        for (i, gap) in gaps.iter().enumerate() {
            clock.advance(*gap);
            person.set("n", i as u64).unwrap();
            repo.force_revise(&mut person).unwrap();
        }
        clock.advance(1_000);
        repo.save(&mut person).unwrap();

        let mut queries: Vec<_> = queries.into_iter().map(|q| Timestamp(start + q)).collect();
        queries.sort();

        let mut last_rank = 0u64;
        for at in queries {
            let resolved = person.revision_at(repo.registry(), at).unwrap();
            // Live resolves after every revision
            let rank = match resolved.current_revision() {
                Some(revision) => {
                    if at >= person.revisions()[0].captured_at() {
                        prop_assert!(revision.captured_at() <= at);
                    }
                    revision.idx()
                }
                None => u64::MAX,
            };
            prop_assert!(rank >= last_rank);
            last_rank = rank;
        }
    }
}
