use super::*;
use crate::phash::hash_file::HEADER_LEN;
use crate::types::Bound;
use std::sync::Arc;

/// One record on disk: marker + key + len + payload
const ON_DISK: u64 = 11 + RECORD_LEN as u64;

fn settings(dir: &Path, min_depth: Depth) -> PhashSettings {
    PhashSettings {
        enabled: true,
        store_path: dir.join("store.hsh"),
        merge_path: dir.join("merge.hsh"),
        target_size_bytes: 1 << 20,
        min_depth,
        archive_pruned: false,
    }
}

fn open(dir: &Path, min_depth: Depth) -> PersistentHash<HashFileBackend> {
    PersistentHash::new(HashFileBackend::new(), settings(dir, min_depth), SearchState::new())
}

fn exact(depth: Depth, value: i16) -> PersistedRecord {
    PersistedRecord {
        value,
        flags: BoundFlags::from(Bound::Exact),
        generation: 0,
        depth,
        mv: Move::from_u16(0x0101),
        eval: 0,
        margin: 0,
    }
}

fn root(depth: Depth, value: i16) -> PersistedRecord {
    PersistedRecord {
        flags: BoundFlags::new(Bound::Exact, true),
        ..exact(depth, value)
    }
}

mod transaction_tests {
    use super::*;

    #[test]
    fn test_store_needs_write_transaction() {
        let dir = tempfile::tempdir().unwrap();
        let mut ph = open(dir.path(), 10);

        assert!(!ph.store(1, exact(20, 0)));
        assert!(ph.begin_transaction(OpenMode::Write));
        // 二重に開かない
        assert!(!ph.begin_transaction(OpenMode::Write));
        assert!(ph.store(1, exact(20, 0)));
        ph.end_transaction();
        assert!(!ph.in_transaction());

        assert!(ph.begin_transaction(OpenMode::Read));
        assert!(!ph.store(2, exact(20, 0)));
        assert_eq!(ph.count(), 1);
        assert_eq!(ph.get(1), Some(exact(20, 0)));
        ph.end_transaction();
    }

    #[test]
    fn test_read_of_missing_store_opens_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut ph = open(dir.path(), 10);
        assert!(!ph.begin_transaction(OpenMode::Read));
        assert_eq!(ph.probe(1), PhashProbe::default());
        assert_eq!(ph.count(), 0);
    }

    #[test]
    fn test_disabled_does_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = settings(dir.path(), 10);
        config.enabled = false;
        let mut ph = PersistentHash::new(HashFileBackend::new(), config, SearchState::new());

        ph.init();
        assert!(!ph.begin_transaction(OpenMode::Write));
        ph.request_clear();
        assert_eq!(ph.pending_requests(), 0);
        assert!(!dir.path().join("store.hsh").exists());
    }

    #[test]
    fn test_configure_closes_open_transaction() {
        let dir = tempfile::tempdir().unwrap();
        let mut ph = open(dir.path(), 10);
        assert!(ph.begin_transaction(OpenMode::Write));
        ph.configure(settings(dir.path(), 12));
        assert!(!ph.in_transaction());
        assert_eq!(ph.settings().min_depth, 12);
    }
}

mod store_rule_tests {
    use super::*;

    #[test]
    fn test_min_depth_gate() {
        let dir = tempfile::tempdir().unwrap();
        let mut ph = open(dir.path(), 10);
        assert!(ph.begin_transaction(OpenMode::Write));

        assert!(!ph.store(0xA, exact(8, 0)));
        assert!(ph.store(0xA, exact(10, 0)));
        assert_eq!(ph.probe(0xA).depth, 10);
        ph.end_transaction();
    }

    #[test]
    fn test_shallower_rejected_equal_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let mut ph = open(dir.path(), 10);
        assert!(ph.begin_transaction(OpenMode::Write));

        assert!(ph.store(7, exact(20, 1)));
        assert!(!ph.store(7, exact(19, 2)));
        assert!(ph.store(7, exact(20, 3)));
        assert_eq!(ph.get(7).unwrap().value, 3);
        assert!(ph.store(7, exact(25, 4)));
        assert_eq!(ph.get(7).unwrap().depth, 25);
        ph.end_transaction();
    }

    #[test]
    fn test_root_record_is_pinned() {
        let dir = tempfile::tempdir().unwrap();
        let mut ph = open(dir.path(), 10);
        assert!(ph.begin_transaction(OpenMode::Write));

        assert!(ph.store(9, root(20, 1)));
        assert!(!ph.store(9, exact(20, 2)));
        assert!(ph.store(9, exact(21, 3)));
        assert!(!ph.probe(9).is_root);
        ph.end_transaction();
    }

    #[test]
    fn test_probe_reports_move_and_root() {
        let dir = tempfile::tempdir().unwrap();
        let mut ph = open(dir.path(), 10);
        assert!(ph.begin_transaction(OpenMode::Write));
        ph.store(3, root(30, 0));
        assert_eq!(
            ph.probe(3),
            PhashProbe {
                depth: 30,
                mv: Move::from_u16(0x0101),
                is_root: true
            }
        );
        assert_eq!(ph.probe(4), PhashProbe::default());
        ph.end_transaction();
    }
}

mod maintenance_tests {
    use super::*;

    fn seed(ph: &mut PersistentHash<HashFileBackend>, records: &[(u64, PersistedRecord)]) {
        assert!(ph.begin_transaction(OpenMode::Write));
        for (key, record) in records {
            assert!(ph.store(*key, *record));
        }
        ph.end_transaction();
    }

    fn count(ph: &mut PersistentHash<HashFileBackend>) -> usize {
        if !ph.begin_transaction(OpenMode::Read) {
            return 0;
        }
        let n = ph.count();
        ph.end_transaction();
        n
    }

    #[test]
    fn test_clear_runs_immediately_when_idle() {
        let dir = tempfile::tempdir().unwrap();
        let mut ph = open(dir.path(), 10);
        seed(&mut ph, &[(1, exact(20, 0)), (2, exact(20, 0))]);

        ph.request_clear();
        assert_eq!(ph.pending_requests(), 0);
        assert_eq!(count(&mut ph), 0);
    }

    #[test]
    fn test_requests_deferred_while_searching() {
        let dir = tempfile::tempdir().unwrap();
        let search = SearchState::new();
        let mut ph = PersistentHash::new(HashFileBackend::new(), settings(dir.path(), 10), search.clone());
        seed(&mut ph, &[(1, exact(20, 0))]);

        search.set_searching(true);
        ph.request_clear();
        ph.request_clear();
        ph.request_prune();
        assert_eq!(ph.pending_requests(), 2);
        assert_eq!(std::fs::metadata(dir.path().join("store.hsh")).unwrap().len(), HEADER_LEN + ON_DISK);

        search.set_searching(false);
        // 次のトランザクション開始時に処理される
        assert!(ph.begin_transaction(OpenMode::Read));
        assert_eq!(ph.pending_requests(), 0);
        assert_eq!(ph.count(), 0);
        ph.end_transaction();
    }

    #[test]
    fn test_request_during_transaction_is_queued() {
        let dir = tempfile::tempdir().unwrap();
        let mut ph = open(dir.path(), 10);
        assert!(ph.begin_transaction(OpenMode::Write));
        ph.store(1, exact(20, 0));
        ph.request_clear();
        assert_eq!(ph.pending_requests(), 1);
        assert_eq!(ph.count(), 1);
        ph.end_transaction();

        assert_eq!(count(&mut ph), 0);
    }

    #[test]
    fn test_merge_request() {
        let dir = tempfile::tempdir().unwrap();
        let mut ph = open(dir.path(), 10);
        seed(&mut ph, &[(1, exact(20, 1))]);

        let mut merge = HashFileBackend::new()
            .open(&dir.path().join("merge.hsh"), OpenMode::Write)
            .unwrap()
            .unwrap();
        merge.put(1, &exact(30, 2).encode()).unwrap();
        merge.put(2, &exact(15, 2).encode()).unwrap();
        merge.put(3, &exact(5, 2).encode()).unwrap();
        merge.commit().unwrap();
        drop(merge);

        ph.request_merge(None);
        assert!(ph.begin_transaction(OpenMode::Read));
        assert_eq!(ph.count(), 2);
        assert_eq!(ph.get(1).unwrap().depth, 30);
        assert_eq!(ph.get(2).unwrap().depth, 15);
        assert_eq!(ph.get(3), None);
        ph.end_transaction();
    }

    #[test]
    fn test_merge_of_missing_file_is_harmless() {
        let dir = tempfile::tempdir().unwrap();
        let mut ph = open(dir.path(), 10);
        seed(&mut ph, &[(1, exact(20, 1))]);
        ph.request_merge(Some(dir.path().join("absent.hsh")));
        assert_eq!(count(&mut ph), 1);
    }

    #[test]
    fn test_prune_request_with_archive() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = settings(dir.path(), 10);
        config.target_size_bytes = HEADER_LEN + 2 * ON_DISK;
        config.archive_pruned = true;
        let archive_path = config.archive_path();
        let mut ph = PersistentHash::new(HashFileBackend::new(), config, SearchState::new());

        let records: Vec<(u64, PersistedRecord)> = (0..6).map(|i| (i + 1, exact(10 + i as Depth, 0))).collect();
        seed(&mut ph, &records);

        ph.request_prune();
        assert!(ph.begin_transaction(OpenMode::Read));
        assert_eq!(ph.count(), 1);
        assert_eq!(ph.get(6).unwrap().depth, 15);
        assert!(ph.size_bytes() < HEADER_LEN + 2 * ON_DISK);
        ph.end_transaction();

        let archive = HashFileBackend::new().open(&archive_path, OpenMode::Read).unwrap().unwrap();
        assert_eq!(archive.len(), 5);
    }

    #[test]
    fn test_quit_compacts_and_keeps_records() {
        let dir = tempfile::tempdir().unwrap();
        let mut ph = open(dir.path(), 10);
        seed(&mut ph, &[(1, exact(20, 0)), (2, exact(30, 0))]);
        ph.quit();
        assert!(!ph.in_transaction());
        assert_eq!(
            std::fs::metadata(dir.path().join("store.hsh")).unwrap().len(),
            HEADER_LEN + 2 * ON_DISK
        );
        assert_eq!(count(&mut ph), 2);
    }

    #[test]
    fn test_init_migrates_legacy_store() {
        let dir = tempfile::tempdir().unwrap();
        let mut legacy = HashFileBackend::new()
            .open(&dir.path().join("store.hsh"), OpenMode::Write)
            .unwrap()
            .unwrap();
        let old = LegacyRecord {
            value: 77,
            bound: 3,
            depth: 30,
            mv: 0x0101,
            eval: 0,
            margin: 0,
        };
        legacy.put(42, &old.encode()).unwrap();
        legacy.commit().unwrap();
        drop(legacy);

        let mut ph = open(dir.path(), 10);
        ph.init();
        assert!(dir.path().join("store.hsh.old").exists());
        assert!(ph.begin_transaction(OpenMode::Read));
        let record = ph.get(42).unwrap();
        assert_eq!(record.value, 77);
        assert_eq!(record.depth, 30);
        ph.end_transaction();
    }
}

mod capacity_tests {
    use super::*;

    fn bounded(dir: &Path, capacity: u64) -> PersistentHash<HashFileBackend> {
        PersistentHash::new(HashFileBackend::bounded(capacity), settings(dir, 10), SearchState::new())
    }

    #[test]
    fn test_backpressure_prunes_shallowest() {
        let dir = tempfile::tempdir().unwrap();
        let mut ph = bounded(dir.path(), HEADER_LEN + 5 * ON_DISK);
        assert!(ph.begin_transaction(OpenMode::Write));
        for (key, depth) in [(1u64, 10), (2, 11), (3, 12), (4, 13)] {
            assert!(ph.store(key, exact(depth, 0)));
        }

        assert!(ph.store(5, exact(14, 0)));
        assert!(ph.is_enabled());
        assert_eq!(ph.count(), 4);
        assert_eq!(ph.get(1), None);
        assert_eq!(ph.get(5).unwrap().depth, 14);
        ph.end_transaction();
    }

    #[test]
    fn test_exhaustion_disables_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let mut ph = bounded(dir.path(), HEADER_LEN + 2 * ON_DISK);
        assert!(ph.begin_transaction(OpenMode::Write));
        // 刈り込み範囲より深いので空きを作れない
        assert!(ph.store(1, exact(120, 0)));
        assert!(ph.store(2, exact(120, 0)));
        assert!(!ph.store(3, exact(120, 0)));

        assert!(ph.is_exhausted());
        assert!(!ph.is_enabled());
        assert!(!ph.in_transaction());
        assert!(!ph.store(4, exact(120, 0)));
        assert!(!ph.begin_transaction(OpenMode::Read));

        // 書けた分は残っている
        let store = HashFileBackend::new()
            .open(&dir.path().join("store.hsh"), OpenMode::Read)
            .unwrap()
            .unwrap();
        assert_eq!(store.len(), 2);
    }

    fn write_merge_file(dir: &Path, keys: std::ops::RangeInclusive<u64>, depth: Depth) {
        let mut merge = HashFileBackend::new()
            .open(&dir.join("merge.hsh"), OpenMode::Write)
            .unwrap()
            .unwrap();
        for key in keys {
            merge.put(key, &exact(depth, 7).encode()).unwrap();
        }
        merge.commit().unwrap();
    }

    #[test]
    fn test_merge_makes_room_in_bounded_store() {
        let dir = tempfile::tempdir().unwrap();
        let mut ph = bounded(dir.path(), HEADER_LEN + 10 * ON_DISK);
        assert!(ph.begin_transaction(OpenMode::Write));
        for key in 1..=7u64 {
            assert!(ph.store(key, exact(10, 0)));
        }
        ph.end_transaction();
        write_merge_file(dir.path(), 101..=110, 120);

        ph.request_merge(None);
        assert!(ph.is_enabled());

        assert!(ph.begin_transaction(OpenMode::Read));
        assert_eq!(ph.count(), 10);
        for key in 101..=110u64 {
            assert_eq!(ph.get(key).unwrap().depth, 120);
        }
        // 浅いレコードが場所を空けた
        for key in 1..=7u64 {
            assert_eq!(ph.get(key), None);
        }
        ph.end_transaction();
    }

    #[test]
    fn test_merge_beyond_capacity_disables_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let mut ph = bounded(dir.path(), HEADER_LEN + 10 * ON_DISK);
        write_merge_file(dir.path(), 101..=111, 120);

        ph.request_merge(None);
        ph.request_prune();

        assert!(ph.is_exhausted());
        assert!(!ph.is_enabled());
        assert_eq!(ph.pending_requests(), 0);
        assert!(!ph.begin_transaction(OpenMode::Read));

        let store = HashFileBackend::new()
            .open(&dir.path().join("store.hsh"), OpenMode::Read)
            .unwrap()
            .unwrap();
        assert_eq!(store.len(), 10);
    }
}

mod cache_link_tests {
    use super::*;
    use crate::tt::{StoreParams, TranspositionTable};

    const KEY_A: u64 = 0x1234_5678_0000_0001;
    const KEY_B: u64 = 0x2345_6789_0000_0002;
    const KEY_C: u64 = 0x3456_789A_0000_0003;

    fn linked_table() -> (TranspositionTable, Arc<StagingTable>) {
        let mut tt = TranspositionTable::with_clusters(64);
        let staging = Arc::new(StagingTable::with_clusters(64));
        staging.configure(true, 10);
        tt.attach_staging(Arc::clone(&staging));
        (tt, staging)
    }

    #[test]
    fn test_export_fills_table_without_staging() {
        let dir = tempfile::tempdir().unwrap();
        let mut ph = open(dir.path(), 10);
        assert!(ph.begin_transaction(OpenMode::Write));
        ph.store(KEY_A, exact(20, 55));
        ph.store(KEY_B, root(30, -5));
        ph.end_transaction();

        let (tt, staging) = linked_table();
        assert!(ph.begin_transaction(OpenMode::Read));
        assert_eq!(ph.export_to_cache(&tt), 2);
        ph.end_transaction();

        let a = tt.probe(KEY_A).unwrap();
        assert_eq!((a.depth, a.value), (20, 55));
        assert!(a.bound().is_exact());
        assert!(tt.probe(KEY_B).unwrap().is_root());
        assert!(staging.is_empty());
    }

    #[test]
    fn test_import_persists_confirmed_entries() {
        let dir = tempfile::tempdir().unwrap();
        let mut ph = open(dir.path(), 10);
        let (tt, staging) = linked_table();

        let mv = Move::from_u16(0x0203);
        assert!(tt.store(KEY_A, StoreParams::new(40, Bound::Exact, 12, mv), true));
        assert!(tt.store(KEY_B, StoreParams::new(-8, Bound::Exact, 18, mv).root(), true));
        // staged but no longer in the table
        assert!(staging.offer(KEY_C, BoundFlags::from(Bound::Exact), 20, mv, 0));
        assert_eq!(staging.len(), 3);

        assert!(ph.begin_transaction(OpenMode::Write));
        let report = ph.import_from_cache(&tt, &staging);
        assert_eq!(
            report,
            ImportReport {
                stored: 2,
                root: 1,
                examined: 3
            }
        );
        assert!(staging.is_empty());

        let a = ph.get(KEY_A).unwrap();
        assert_eq!((a.value, a.depth, a.mv), (40, 12, mv));
        assert!(ph.probe(KEY_B).is_root);
        assert_eq!(ph.get(KEY_C), None);
        ph.end_transaction();
    }

    #[test]
    fn test_import_rechecks_the_table() {
        let dir = tempfile::tempdir().unwrap();
        let mut ph = open(dir.path(), 10);
        let (tt, staging) = linked_table();

        let mv = Move::from_u16(0x0203);
        tt.store(KEY_A, StoreParams::new(40, Bound::Exact, 12, mv), true);
        // 同じ深さの下限値で上書きされた
        tt.store(KEY_A, StoreParams::new(41, Bound::Lower, 12, mv), true);

        assert!(ph.begin_transaction(OpenMode::Write));
        let report = ph.import_from_cache(&tt, &staging);
        assert_eq!(report.examined, 1);
        assert_eq!(report.stored, 0);
        ph.end_transaction();
    }
}

mod exercise_tests {
    use super::*;

    #[test]
    fn test_exercise_writes_records() {
        let dir = tempfile::tempdir().unwrap();
        let mut ph = open(dir.path(), 10);
        assert_eq!(ph.exercise(50, true), 50);
        assert!(!ph.in_transaction());

        assert!(ph.begin_transaction(OpenMode::Read));
        assert_eq!(ph.count(), 50);
        ph.end_transaction();
    }

    #[test]
    fn test_exercise_fixed_depth_respects_min_depth() {
        let dir = tempfile::tempdir().unwrap();
        let mut ph = open(dir.path(), 30);
        assert_eq!(ph.exercise(5, false), 0);
    }
}

mod depth_properties {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig { cases: 24, .. ProptestConfig::default() })]

        #[test]
        fn prop_stored_depth_is_max_accepted(depths in prop::collection::vec(0i16..60, 1..12)) {
            let dir = tempfile::tempdir().unwrap();
            let mut ph = open(dir.path(), 10);
            prop_assert!(ph.begin_transaction(OpenMode::Write));
            for depth in &depths {
                ph.store(0xBEEF, exact(*depth, 0));
            }
            let expected = depths.iter().copied().filter(|d| *d >= 10).max();
            prop_assert_eq!(ph.get(0xBEEF).map(|r| r.depth), expected);
            ph.end_transaction();
        }
    }
}
