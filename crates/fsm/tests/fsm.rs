use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use replikv_fsm::{
    ClusterConfiguration, EntryPayload, Error, Fsm, FsmConfig, FsmConfigBuilder, LatestState,
    LogData, LogEntry, LogOperation, Server, TxnEntry,
};
use replikv_storage_memory::MemoryStorage;

fn new_fsm() -> (MemoryStorage, Fsm<MemoryStorage>) {
    let storage = MemoryStorage::new();
    let fsm = Fsm::new(storage.clone(), FsmConfig::default()).unwrap();
    (storage, fsm)
}

fn put(index: u64, term: u64, key: &str, value: &str) -> LogEntry {
    LogEntry::command(
        index,
        term,
        &LogData::new(vec![LogOperation::put(key, value.to_string())]),
    )
    .unwrap()
}

fn configuration(index: u64, term: u64, ids: &[&str]) -> LogEntry {
    let servers = ids
        .iter()
        .map(|id| Server::voter(*id, format!("{id}:8300")))
        .collect();
    LogEntry::configuration(index, term, &ClusterConfiguration::new(servers)).unwrap()
}

#[test]
fn test_batching() {
    let (_storage, fsm) = new_fsm();
    let mut rng = StdRng::seed_from_u64(0x5eed);

    let mut index = 0u64;
    let mut term = 1u64;
    let mut expected_keys = 0usize;
    let mut last_config = None;

    for _ in 0..50 {
        let batch_size = rng.gen_range(1..=20);
        let mut batch = Vec::with_capacity(batch_size);

        for _ in 0..batch_size {
            index += 1;
            if rng.gen_range(0..10) >= 8 {
                term += 1;
                let config = ClusterConfiguration::new(vec![Server::voter(
                    format!("server-{index}"),
                    format!("10.0.0.{}:8300", index % 255),
                )]);
                batch.push(LogEntry::configuration(index, term, &config).unwrap());
                last_config = Some((index, config));
            } else {
                let ops = (0..5)
                    .map(|j| LogOperation::put(format!("key-{index}-{j}"), format!("value-{j}")))
                    .collect();
                batch.push(LogEntry::command(index, term, &LogData::new(ops)).unwrap());
                expected_keys += 5;
            }
        }

        let responses = fsm.apply_batch(&batch);
        assert_eq!(responses.len(), batch.len());
        for (response, entry) in responses.iter().zip(&batch) {
            assert_eq!(response.index, entry.index);
            assert!(response.is_success(), "entry {} failed", entry.index);
        }
    }

    assert_eq!(fsm.list("").unwrap().len(), expected_keys);

    let latest = fsm.latest_state();
    assert_eq!(latest.index, index);
    assert_eq!(latest.term, term);

    let (config_index, mut config) = last_config.expect("at least one configuration entry");
    config.index = config_index;
    assert_eq!(latest.configuration, Some(config));
}

#[test]
fn test_list() {
    let (_storage, fsm) = new_fsm();

    let mut entries = Vec::new();
    for i in 0..10u64 {
        entries.push(put(2 * i + 1, 1, &format!("foo/{i}/bar"), "bar"));
        entries.push(put(2 * i + 2, 1, &format!("foo/{i}/baz"), "baz"));
    }
    assert!(fsm.apply_batch(&entries).iter().all(|r| r.is_success()));

    let mut children = fsm.list("foo/").unwrap();
    children.sort();
    let mut expected: Vec<String> = (0..10).map(|i| format!("{i}/")).collect();
    expected.sort();
    assert_eq!(children, expected);

    assert_eq!(fsm.list("").unwrap(), vec!["foo/"]);
    assert_eq!(fsm.list("foo/3/").unwrap(), vec!["bar", "baz"]);
    assert!(fsm.list("missing/").unwrap().is_empty());
}

#[test]
fn test_transaction_reads_before_writes() {
    let (_storage, fsm) = new_fsm();

    for i in 0..5 {
        fsm.put(&format!("foo/{i}"), format!("original-{i}")).unwrap();
    }

    let mut ops: Vec<TxnEntry> = (0..5).map(|i| TxnEntry::get(format!("foo/{i}"))).collect();
    ops.extend((0..5).map(|i| TxnEntry::put(format!("foo/{i}"), "lol")));

    fsm.transaction(&mut ops).unwrap();

    for (i, op) in ops.iter().take(5).enumerate() {
        assert_eq!(op.value, Some(Bytes::from(format!("original-{i}"))));
    }
    for i in 0..5 {
        assert_eq!(
            fsm.get(&format!("foo/{i}")).unwrap(),
            Some(Bytes::from("lol"))
        );
    }
}

#[test]
fn test_transaction_commit_failure_writes_nothing() {
    let (storage, fsm) = new_fsm();
    fsm.put("a", "1").unwrap();

    let mut ops = vec![TxnEntry::get("a"), TxnEntry::put("a", "2"), TxnEntry::delete("b")];
    storage.fail_next_commit();

    assert!(matches!(fsm.transaction(&mut ops), Err(Error::Storage(_))));
    assert_eq!(fsm.get("a").unwrap(), Some(Bytes::from("1")));
}

#[test]
fn test_commands_then_configuration() {
    let (_storage, fsm) = new_fsm();

    let entries = vec![
        put(1, 1, "a", "1"),
        put(2, 1, "b", "2"),
        put(3, 1, "c", "3"),
        configuration(4, 1, &["node-1", "node-2"]),
    ];

    let responses = fsm.apply_batch(&entries);
    assert_eq!(responses.len(), 4);
    assert!(responses.iter().all(|r| r.is_success()));

    let latest = fsm.latest_state();
    assert_eq!(latest.index, 4);
    assert_eq!(latest.term, 1);
    let config = latest.configuration.unwrap();
    assert_eq!(config.index, 4);
    assert!(config.contains("node-2"));

    assert_eq!(fsm.get("a").unwrap(), Some(Bytes::from("1")));
    assert_eq!(fsm.get("b").unwrap(), Some(Bytes::from("2")));
    assert_eq!(fsm.get("c").unwrap(), Some(Bytes::from("3")));
}

#[test]
fn test_configuration_survives_later_commands() {
    let (_storage, fsm) = new_fsm();

    fsm.apply_batch(&[configuration(1, 1, &["node-1"]), put(2, 1, "k", "v")]);
    fsm.apply_batch(&[put(3, 2, "k", "w")]);

    let latest = fsm.latest_state();
    assert_eq!((latest.index, latest.term), (3, 2));
    assert_eq!(latest.configuration.map(|c| c.index), Some(1));
}

#[test]
fn test_decode_error_is_isolated_and_position_advances() {
    let (_storage, fsm) = new_fsm();

    let entries = vec![
        put(1, 1, "before", "1"),
        LogEntry::new(2, 1, EntryPayload::Command(Bytes::from_static(b"not cbor"))),
        put(3, 1, "after", "3"),
    ];

    let responses = fsm.apply_batch(&entries);
    assert!(responses[0].is_success());
    assert!(matches!(responses[1].error, Some(Error::Decode(_))));
    assert!(responses[2].is_success());

    assert_eq!(fsm.get("before").unwrap(), Some(Bytes::from("1")));
    assert_eq!(fsm.get("after").unwrap(), Some(Bytes::from("3")));
    assert_eq!(fsm.latest_state().index, 3);
}

#[test]
fn test_trailing_decode_error_still_consumes_position() {
    let (_storage, fsm) = new_fsm();

    let entries = vec![
        put(1, 1, "k", "v"),
        LogEntry::new(2, 3, EntryPayload::Command(Bytes::from_static(b"\xff"))),
    ];
    let responses = fsm.apply_batch(&entries);
    assert!(!responses[1].is_success());

    let latest = fsm.latest_state();
    assert_eq!((latest.index, latest.term), (2, 3));
}

#[test]
fn test_configuration_decode_error_keeps_previous_configuration() {
    let (_storage, fsm) = new_fsm();

    fsm.apply(configuration(1, 1, &["node-1"]));
    let response = fsm.apply(LogEntry::new(
        2,
        1,
        EntryPayload::ConfigurationChange(Bytes::from_static(b"\x00garbage")),
    ));
    assert!(matches!(response.error, Some(Error::Decode(_))));

    let latest = fsm.latest_state();
    assert_eq!(latest.index, 2);
    let config = latest.configuration.unwrap();
    assert_eq!(config.index, 1);
    assert!(config.contains("node-1"));
}

#[test]
fn test_commit_failure_leaves_data_and_position_untouched() {
    let (storage, fsm) = new_fsm();

    assert!(fsm.apply_batch(&[put(1, 1, "a", "1")])[0].is_success());
    let before = fsm.latest_state();

    storage.fail_next_commit();
    let entries = vec![
        put(2, 1, "a", "2"),
        put(3, 1, "b", "3"),
        configuration(4, 2, &["node-9"]),
    ];
    let responses = fsm.apply_batch(&entries);

    assert_eq!(responses.len(), 3);
    for response in &responses {
        assert!(matches!(response.error, Some(Error::Storage(_))));
    }

    assert_eq!(fsm.latest_state(), before);
    assert_eq!(fsm.get("a").unwrap(), Some(Bytes::from("1")));
    assert_eq!(fsm.get("b").unwrap(), None);

    // A restart sees the same position
    let reopened = Fsm::new(storage.clone(), FsmConfig::default()).unwrap();
    assert_eq!(reopened.latest_state(), before);

    // The same batch applies cleanly on retry
    assert!(fsm.apply_batch(&entries).iter().all(|r| r.is_success()));
    assert_eq!(fsm.latest_state().index, 4);
}

#[test]
fn test_invalid_batch_is_rejected_without_writes() {
    let (storage, fsm) = new_fsm();
    let commits = storage.commit_count();

    let responses = fsm.apply_batch(&[put(1, 1, "a", "1"), put(1, 1, "b", "2")]);
    assert!(
        responses
            .iter()
            .all(|r| matches!(r.error, Some(Error::InvalidBatch(_))))
    );
    assert_eq!(storage.commit_count(), commits);
    assert_eq!(fsm.latest_state(), LatestState::default());
}

#[test]
fn test_validation_can_be_disabled() {
    let storage = MemoryStorage::new();
    let config = FsmConfigBuilder::new().validate_batches(false).build();
    let fsm = Fsm::new(storage, config).unwrap();

    let responses = fsm.apply_batch(&[put(5, 1, "a", "1"), put(9, 1, "b", "2")]);
    assert!(responses.iter().all(|r| r.is_success()));
    assert_eq!(fsm.latest_state().index, 9);
}

#[test]
fn test_replay_is_allowed() {
    let (storage, fsm) = new_fsm();

    fsm.apply_batch(&[put(1, 1, "a", "1"), put(2, 1, "a", "2")]);
    let commits = storage.commit_count();
    let responses = fsm.apply_batch(&[put(1, 1, "a", "1"), put(2, 1, "a", "2")]);

    assert!(responses.iter().all(|r| r.is_success()));
    assert_eq!(storage.commit_count(), commits);
    assert_eq!(fsm.get("a").unwrap(), Some(Bytes::from("2")));
    assert_eq!(fsm.latest_state().index, 2);
}

#[test]
fn test_stale_batch_does_not_rewind() {
    let (storage, fsm) = new_fsm();

    for i in 1..=10u64 {
        assert!(fsm.apply(put(i, 1, "a", &format!("v{i}"))).is_success());
    }
    let commits = storage.commit_count();

    let responses = fsm.apply_batch(&[put(2, 1, "a", "v2")]);
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].index, 2);
    assert!(responses[0].is_success());

    assert_eq!(fsm.latest_state().index, 10);
    assert_eq!(fsm.get("a").unwrap(), Some(Bytes::from("v10")));
    assert_eq!(storage.commit_count(), commits);
}

#[test]
fn test_overlapping_batch_applies_only_new_entries() {
    let (_storage, fsm) = new_fsm();

    fsm.apply_batch(&[put(1, 1, "a", "1"), put(2, 1, "b", "2")]);
    // Index 2 was applied; only 3 is new
    let responses = fsm.apply_batch(&[put(2, 1, "b", "stale"), put(3, 1, "c", "3")]);

    assert_eq!(
        responses.iter().map(|r| r.index).collect::<Vec<_>>(),
        vec![2, 3]
    );
    assert!(responses.iter().all(|r| r.is_success()));
    assert_eq!(fsm.get("b").unwrap(), Some(Bytes::from("2")));
    assert_eq!(fsm.get("c").unwrap(), Some(Bytes::from("3")));
    assert_eq!(fsm.latest_state().index, 3);
}

#[test]
fn test_gap_after_applied_index_is_rejected() {
    let (storage, fsm) = new_fsm();

    assert!(fsm.apply(put(1, 1, "a", "1")).is_success());
    let commits = storage.commit_count();

    let response = fsm.apply(put(7, 1, "b", "7"));
    assert!(matches!(response.error, Some(Error::InvalidBatch(_))));

    // The log continues normally from the applied index
    assert!(fsm.apply(put(2, 1, "a", "2")).is_success());

    assert_eq!(fsm.get("b").unwrap(), None);
    assert_eq!(fsm.latest_state().index, 2);
    assert_eq!(storage.commit_count(), commits + 1);
}

#[test]
fn test_term_below_applied_term_is_rejected() {
    let (_storage, fsm) = new_fsm();

    assert!(fsm.apply(put(1, 3, "a", "1")).is_success());
    let response = fsm.apply(put(2, 2, "a", "2"));

    assert!(matches!(response.error, Some(Error::InvalidBatch(_))));
    assert_eq!(fsm.get("a").unwrap(), Some(Bytes::from("1")));
    assert_eq!((fsm.latest_state().index, fsm.latest_state().term), (1, 3));
}

#[test]
fn test_delete_operations() {
    let (_storage, fsm) = new_fsm();

    let data = LogData::new(vec![
        LogOperation::put("x", "1"),
        LogOperation::put("y", "2"),
        LogOperation::delete("x"),
        LogOperation::delete("never-existed"),
    ]);
    assert!(fsm.apply(LogEntry::command(1, 1, &data).unwrap()).is_success());

    assert_eq!(fsm.get("x").unwrap(), None);
    assert_eq!(fsm.get("y").unwrap(), Some(Bytes::from("2")));
}

#[test]
fn test_direct_operations() {
    let (_storage, fsm) = new_fsm();

    fsm.put("dir/a", "1").unwrap();
    fsm.put("dir/b", "2").unwrap();
    fsm.put("dir/sub/c", "3").unwrap();
    fsm.put("other", "4").unwrap();

    let view = fsm.view().unwrap();
    assert_eq!(view.list("dir/").unwrap(), vec!["a", "b", "sub/"]);
    assert_eq!(
        view.keys_with_prefix("dir/").unwrap(),
        vec!["dir/a", "dir/b", "dir/sub/c"]
    );
    drop(view);

    fsm.delete("dir/a").unwrap();
    assert_eq!(fsm.get("dir/a").unwrap(), None);

    assert_eq!(fsm.delete_prefix("dir/").unwrap(), 2);
    assert!(fsm.list("dir/").unwrap().is_empty());
    assert_eq!(fsm.get("other").unwrap(), Some(Bytes::from("4")));

    // Direct writes do not move the applied position
    assert_eq!(fsm.latest_state(), LatestState::default());
}

#[test]
fn test_view_is_a_snapshot() {
    let (_storage, fsm) = new_fsm();
    fsm.put("k", "old").unwrap();

    let view = fsm.view().unwrap();
    assert!(fsm.apply(put(1, 1, "k", "new")).is_success());

    assert_eq!(view.get("k").unwrap(), Some(Bytes::from("old")));
    assert_eq!(fsm.get("k").unwrap(), Some(Bytes::from("new")));
}

#[test]
fn test_user_keys_do_not_collide_with_metadata() {
    let (_storage, fsm) = new_fsm();

    fsm.apply(put(1, 1, "latest_indexes", "user value"));

    assert_eq!(
        fsm.get("latest_indexes").unwrap(),
        Some(Bytes::from("user value"))
    );
    assert_eq!(fsm.latest_state().index, 1);
    assert_eq!(fsm.list("").unwrap(), vec!["latest_indexes"]);
}

#[test]
fn test_closed_fsm_refuses_operations() {
    let (_storage, fsm) = new_fsm();
    fsm.apply(put(1, 1, "k", "v"));

    fsm.close().unwrap();
    assert!(fsm.is_closed());
    // Closing twice is fine
    fsm.close().unwrap();

    assert_eq!(fsm.get("k"), Err(Error::Closed));
    assert_eq!(fsm.list(""), Err(Error::Closed));
    assert_eq!(fsm.put("k", "w"), Err(Error::Closed));
    assert_eq!(fsm.transaction(&mut [TxnEntry::get("k")]), Err(Error::Closed));
    assert_eq!(fsm.apply(put(2, 1, "k", "w")).error, Some(Error::Closed));

    // Position is still readable
    assert_eq!(fsm.latest_state().index, 1);
}

#[test]
fn test_failed_close_can_be_retried() {
    let (storage, fsm) = new_fsm();
    fsm.apply(put(1, 1, "k", "v"));

    storage.fail_next_shutdown();
    assert!(matches!(fsm.close(), Err(Error::Storage(_))));
    assert!(!fsm.is_closed());
    assert_eq!(fsm.get("k").unwrap(), Some(Bytes::from("v")));

    fsm.close().unwrap();
    assert!(fsm.is_closed());
    assert_eq!(fsm.get("k"), Err(Error::Closed));
}
