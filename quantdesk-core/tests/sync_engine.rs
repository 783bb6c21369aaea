//! Fetch-merge engine behavior against a scripted source.

mod common;

use common::*;
use quantdesk_core::data::schema::CLOSE;
use quantdesk_core::data::{
    update_all, ConstituentProvider, DataError, DatasetKind, FallbackMembership, LogProgress,
    MembershipSource, ParquetStore, Period, RowKey, SeriesRow, SeriesStore, SeriesTable,
    Symbol, SyncEngine,
};
use std::collections::BTreeMap;

fn closes(table: &SeriesTable) -> Vec<f64> {
    table.column(CLOSE)
}

#[test]
fn first_sync_fetches_requested_range_and_persists() {
    let provider =
        ScriptedProvider::new().with_series("000300", bars(d(2024, 1, 1), &[10.0, 11.0, 12.0]));
    let store = MemoryStore::new();
    let engine = SyncEngine::new(DatasetKind::IndexDaily, &provider, &store);

    let r = range(d(2023, 12, 1), d(2024, 1, 31));
    let outcome = engine.sync(&sym("000300"), r, Period::Daily).unwrap();

    assert_eq!(outcome.fetched, Some(r));
    assert_eq!(outcome.fetched_rows, 3);
    assert_eq!(outcome.table.len(), 3);
    assert_eq!(outcome.table.watermark(), Some(d(2024, 1, 3)));
    assert_eq!(store.writes(), 1);
}

#[test]
fn second_sync_is_idempotent_and_fetch_free() {
    let provider =
        ScriptedProvider::new().with_series("000300", bars(d(2024, 1, 1), &[10.0, 11.0, 12.0]));
    let store = MemoryStore::new();
    let engine = SyncEngine::new(DatasetKind::IndexDaily, &provider, &store);
    let r = range(d(2024, 1, 1), d(2024, 1, 3));

    let first = engine.sync(&sym("000300"), r, Period::Daily).unwrap();
    let calls_after_first = provider.calls();
    let second = engine.sync(&sym("000300"), r, Period::Daily).unwrap();

    assert_eq!(first.table, second.table);
    assert_eq!(provider.calls(), calls_after_first);
    assert_eq!(second.fetched, None);
    assert_eq!(store.writes(), 1);
}

#[test]
fn end_before_watermark_makes_no_remote_call() {
    let provider = ScriptedProvider::new();
    let store = MemoryStore::new();
    store.insert(
        SeriesTable::from_rows(
            DatasetKind::IndexDaily,
            bars(d(2024, 1, 1), &[10.0, 11.0, 12.0, 13.0, 14.0]),
        ),
        "000300",
    );
    let engine = SyncEngine::new(DatasetKind::IndexDaily, &provider, &store);

    let outcome = engine
        .sync(&sym("000300"), range(d(2020, 1, 1), d(2024, 1, 3)), Period::Daily)
        .unwrap();

    assert_eq!(provider.calls(), 0);
    assert_eq!(outcome.table.len(), 5);
}

#[test]
fn incremental_fetch_starts_after_watermark() {
    let provider = ScriptedProvider::new().with_series(
        "000300",
        bars(d(2024, 1, 1), &[10.0, 11.0, 12.0, 13.0, 14.0, 15.0, 16.0]),
    );
    let store = MemoryStore::new();
    store.insert(
        SeriesTable::from_rows(
            DatasetKind::IndexDaily,
            bars(d(2024, 1, 1), &[10.0, 11.0, 12.0, 13.0, 14.0]),
        ),
        "000300",
    );
    let engine = SyncEngine::new(DatasetKind::IndexDaily, &provider, &store);

    engine
        .sync(&sym("000300"), range(d(2020, 1, 1), d(2024, 1, 7)), Period::Daily)
        .unwrap();

    let requests = provider.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].1, range(d(2024, 1, 6), d(2024, 1, 7)));
}

#[test]
fn merge_appends_without_altering_existing_rows() {
    let existing = SeriesTable::from_rows(
        DatasetKind::IndexDaily,
        bars(d(2024, 1, 1), &[10.0, 11.0, 12.0, 13.0, 14.0]),
    );
    let provider =
        ScriptedProvider::new().with_series("000300", bars(d(2024, 1, 6), &[15.0, 16.0]));
    let store = MemoryStore::new();
    store.insert(existing.clone(), "000300");
    let engine = SyncEngine::new(DatasetKind::IndexDaily, &provider, &store);

    let outcome = engine
        .sync(&sym("000300"), range(d(2024, 1, 1), d(2024, 1, 7)), Period::Daily)
        .unwrap();

    assert_eq!(outcome.table.len(), 7);
    assert_eq!(outcome.table.first_date(), Some(d(2024, 1, 1)));
    assert_eq!(outcome.table.watermark(), Some(d(2024, 1, 7)));
    assert_eq!(closes(&outcome.table), vec![10.0, 11.0, 12.0, 13.0, 14.0, 15.0, 16.0]);
    for row in existing.rows() {
        assert_eq!(outcome.table.get(&row.key()), Some(row));
    }
}

#[test]
fn fetched_row_wins_on_date_collision() {
    let provider = ScriptedProvider::new().with_series("000300", bars(d(2024, 1, 6), &[15.0]));
    provider.set_overlap("000300", vec![bar(d(2024, 1, 5), 13.5)]);
    let store = MemoryStore::new();
    store.insert(
        SeriesTable::from_rows(
            DatasetKind::IndexDaily,
            bars(d(2024, 1, 1), &[10.0, 11.0, 12.0, 13.0, 13.0]),
        ),
        "000300",
    );
    let engine = SyncEngine::new(DatasetKind::IndexDaily, &provider, &store);

    let outcome = engine
        .sync(&sym("000300"), range(d(2024, 1, 1), d(2024, 1, 6)), Period::Daily)
        .unwrap();

    let key = RowKey {
        date: d(2024, 1, 5),
        constituent: None,
    };
    assert_eq!(outcome.table.get(&key).unwrap().get(CLOSE), Some(13.5));
    assert_eq!(outcome.table.len(), 6);
}

#[test]
fn multi_entity_row_without_primary_is_dropped() {
    let provider = ScriptedProvider::new().with_series(
        "000016",
        vec![
            bar(d(2024, 1, 2), 10.0).with_constituent("600000"),
            SeriesRow::new(d(2024, 1, 2))
                .with_constituent("600036")
                .with_value("volume", 100.0),
            bar(d(2024, 1, 2), 30.0).with_constituent("601318"),
        ],
    );
    let store = MemoryStore::new();
    let engine = SyncEngine::new(DatasetKind::IndexConstituents, &provider, &store);

    let outcome = engine
        .sync(&sym("000016"), range(d(2024, 1, 1), d(2024, 1, 2)), Period::Daily)
        .unwrap();

    assert_eq!(outcome.dropped_rows, 1);
    assert_eq!(outcome.table.len(), 2);
    assert_eq!(outcome.table.constituents(), vec!["600000".to_string(), "601318".to_string()]);
}

#[test]
fn single_entity_row_without_primary_fails_validation() {
    let provider = ScriptedProvider::new().with_series(
        "000300",
        vec![SeriesRow::new(d(2024, 1, 2)).with_value("volume", 100.0)],
    );
    let store = MemoryStore::new();
    let engine = SyncEngine::new(DatasetKind::IndexDaily, &provider, &store);

    let result = engine.sync(&sym("000300"), range(d(2024, 1, 1), d(2024, 1, 2)), Period::Daily);

    assert!(result.is_err());
    assert_eq!(store.writes(), 0);
}

#[test]
fn empty_fetch_leaves_store_untouched() {
    let provider = ScriptedProvider::new();
    let store = MemoryStore::new();
    store.insert(
        SeriesTable::from_rows(DatasetKind::IndexDaily, bars(d(2024, 1, 1), &[10.0])),
        "000300",
    );
    let engine = SyncEngine::new(DatasetKind::IndexDaily, &provider, &store);

    let outcome = engine
        .sync(&sym("000300"), range(d(2024, 1, 1), d(2024, 1, 9)), Period::Daily)
        .unwrap();

    assert_eq!(provider.calls(), 1);
    assert_eq!(outcome.fetched_rows, 0);
    assert_eq!(outcome.table.len(), 1);
    assert_eq!(store.writes(), 0);
}

#[test]
fn batch_continues_past_failing_symbol() {
    let provider = ScriptedProvider::new()
        .with_series("510300", bars(d(2024, 1, 1), &[4.0, 4.1]))
        .with_series("512880", bars(d(2024, 1, 1), &[1.0, 1.1]));
    provider.fail("159915");
    let store = MemoryStore::new();
    let engine = SyncEngine::new(DatasetKind::Etf, &provider, &store);
    let symbols = vec![sym("510300"), sym("159915"), sym("512880")];

    let summary = update_all(
        &engine,
        &symbols,
        range(d(2024, 1, 1), d(2024, 1, 2)),
        Period::Daily,
        &LogProgress,
    );

    assert_eq!(summary.total, 3);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 1);
    assert!(!summary.all_succeeded());
    assert_eq!(summary.errors[0].0, sym("159915"));
    assert!(store.load(DatasetKind::Etf, &sym("512880")).unwrap().is_some());
    assert!(store.load(DatasetKind::Etf, &sym("159915")).unwrap().is_none());
}

#[test]
fn constituent_provider_tags_rows_with_member() {
    let inner = ScriptedProvider::new()
        .with_series("600000", bars(d(2024, 1, 2), &[10.0, 10.5]))
        .with_series("601318", bars(d(2024, 1, 2), &[40.0, 41.0]));
    let members = BTreeMap::from([(sym("000016"), vec![sym("600000"), sym("601318")])]);
    let provider = ConstituentProvider::new(inner, members);
    let store = MemoryStore::new();
    let engine = SyncEngine::new(DatasetKind::IndexConstituents, &provider, &store);

    let outcome = engine
        .sync(&sym("000016"), range(d(2024, 1, 1), d(2024, 1, 3)), Period::Daily)
        .unwrap();

    assert_eq!(outcome.table.len(), 4);
    let key = RowKey {
        date: d(2024, 1, 3),
        constituent: Some("601318".into()),
    };
    assert_eq!(outcome.table.get(&key).unwrap().get(CLOSE), Some(41.0));
}

#[test]
fn constituent_failure_fails_whole_index() {
    let inner = ScriptedProvider::new().with_series("600000", bars(d(2024, 1, 2), &[10.0]));
    inner.fail("601318");
    let members = BTreeMap::from([(sym("000016"), vec![sym("600000"), sym("601318")])]);
    let provider = ConstituentProvider::new(inner, members);
    let store = MemoryStore::new();
    let engine = SyncEngine::new(DatasetKind::IndexConstituents, &provider, &store);

    let result = engine.sync(&sym("000016"), range(d(2024, 1, 1), d(2024, 1, 3)), Period::Daily);

    assert!(result.is_err());
    assert_eq!(store.writes(), 0);
}

#[test]
fn unknown_index_has_no_constituents() {
    let no_lists: BTreeMap<Symbol, Vec<Symbol>> = BTreeMap::new();
    let provider = ConstituentProvider::new(ScriptedProvider::new(), no_lists);
    let store = MemoryStore::new();
    let engine = SyncEngine::new(DatasetKind::IndexConstituents, &provider, &store);

    assert!(engine
        .sync(&sym("000905"), range(d(2024, 1, 1), d(2024, 1, 3)), Period::Daily)
        .is_err());
}

#[test]
fn parquet_store_survives_incremental_syncs() {
    let dir = tempfile::tempdir().unwrap();
    let store = ParquetStore::new(dir.path());
    let provider = ScriptedProvider::new()
        .with_series("399006", bars(d(2024, 1, 1), &[2000.0, 2010.0, 2020.0]));
    let engine = SyncEngine::new(DatasetKind::IndexDaily, &provider, &store);

    engine
        .sync(&sym("399006"), range(d(2024, 1, 1), d(2024, 1, 2)), Period::Daily)
        .unwrap();
    let second = engine
        .sync(&sym("399006"), range(d(2024, 1, 1), d(2024, 1, 3)), Period::Daily)
        .unwrap();

    assert_eq!(provider.requests()[1].1, range(d(2024, 1, 3), d(2024, 1, 3)));
    let reloaded = store.load(DatasetKind::IndexDaily, &sym("399006")).unwrap().unwrap();
    assert_eq!(reloaded, second.table);
    let meta = store.meta(DatasetKind::IndexDaily, &sym("399006")).unwrap();
    assert_eq!(meta.row_count, 3);
    assert_eq!(meta.watermark, d(2024, 1, 3));
}

#[test]
fn unavailable_source_is_not_called() {
    let provider = ScriptedProvider::new()
        .with_series("510300", bars(d(2024, 1, 1), &[4.0, 4.1]))
        .with_series("512880", bars(d(2024, 1, 1), &[1.0, 1.1]));
    let store = MemoryStore::new();
    store.insert(
        SeriesTable::from_rows(DatasetKind::Etf, bars(d(2024, 1, 1), &[1.0, 1.1])),
        "512880",
    );
    provider.block(true);
    let engine = SyncEngine::new(DatasetKind::Etf, &provider, &store);
    let r = range(d(2024, 1, 1), d(2024, 1, 2));

    let blocked = engine.sync(&sym("510300"), r, Period::Daily);
    assert!(matches!(blocked, Err(DataError::CircuitBreakerTripped)));
    let current = engine.sync(&sym("512880"), r, Period::Daily).unwrap();
    assert_eq!(current.fetched, None);
    assert_eq!(provider.calls(), 0);

    provider.block(false);
    engine.sync(&sym("510300"), r, Period::Daily).unwrap();
    assert_eq!(provider.calls(), 1);
}

#[test]
fn sync_succeeds_when_sidecar_cannot_be_written() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("index_daily/sym_000300.meta.json")).unwrap();
    let store = ParquetStore::new(dir.path());
    let provider =
        ScriptedProvider::new().with_series("000300", bars(d(2024, 1, 1), &[10.0, 11.0, 12.0]));
    let engine = SyncEngine::new(DatasetKind::IndexDaily, &provider, &store);

    engine
        .sync(&sym("000300"), range(d(2024, 1, 1), d(2024, 1, 3)), Period::Daily)
        .unwrap();

    let status = &store.status(DatasetKind::IndexDaily, &[sym("000300")])[0];
    assert!(status.stored);
    assert_eq!(status.row_count, Some(3));
    assert_eq!(status.watermark, Some(d(2024, 1, 3)));
}

struct Unreachable;

impl MembershipSource for Unreachable {
    fn members(&self, index: &Symbol) -> Result<Vec<Symbol>, DataError> {
        Err(DataError::NetworkUnreachable(format!("membership of {index}")))
    }
}

#[test]
fn configured_members_used_when_lookup_fails() {
    let inner = ScriptedProvider::new().with_series("600000", bars(d(2024, 1, 2), &[10.0, 10.5]));
    let configured = BTreeMap::from([(sym("000016"), vec![sym("600000")])]);
    let membership = FallbackMembership::new(Unreachable, configured);
    let provider = ConstituentProvider::new(inner, membership);
    let store = MemoryStore::new();
    let engine = SyncEngine::new(DatasetKind::IndexConstituents, &provider, &store);

    let outcome = engine
        .sync(&sym("000016"), range(d(2024, 1, 1), d(2024, 1, 3)), Period::Daily)
        .unwrap();

    assert_eq!(outcome.table.len(), 2);
    assert_eq!(outcome.table.constituents(), vec!["600000".to_string()]);
}
