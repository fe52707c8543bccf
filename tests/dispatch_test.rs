//! Integration tests for capability dispatch over in-memory cursors.
//!
//! These tests verify which path each record type takes, when post-unmarshal
//! hooks run, and how failures stop the pipeline.

use rand::Rng;
use rowscan::db::MemoryRow;
use rowscan::error::{BoxDynError, MappingError};
use rowscan::unmarshal::{FastScan, PostUnmarshal, ReflectiveMapper, Scan};
use rowscan::{Error, MemoryRows, QueryContext, RowCursor, Unmarshaler};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio_test::{assert_err, assert_ok};

/// Mapper that fails the test if it is ever consulted.
struct PanickingMapper;

impl<T> ReflectiveMapper<T, MemoryRow> for PanickingMapper {
    fn map_columns<'t>(
        &self,
        _target: &'t mut T,
        _columns: &[String],
    ) -> Result<Vec<&'t mut dyn Scan<MemoryRow>>, MappingError> {
        panic!("reflective mapper called for a fast-scan type");
    }
}

/// Mapper that counts its calls and maps columns onto `Plain` by name.
#[derive(Default)]
struct CountingMapper {
    calls: AtomicUsize,
    last_width: AtomicUsize,
}

impl ReflectiveMapper<Plain, MemoryRow> for CountingMapper {
    fn map_columns<'t>(
        &self,
        target: &'t mut Plain,
        columns: &[String],
    ) -> Result<Vec<&'t mut dyn Scan<MemoryRow>>, MappingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.last_width.store(columns.len(), Ordering::SeqCst);
        let Plain { id, label } = target;
        let mut id = Some(id);
        let mut label = Some(label);
        columns
            .iter()
            .map(|column| {
                let slot: Option<&'t mut dyn Scan<MemoryRow>> = match column.as_str() {
                    "id" => id.take().map(|v| v as &mut dyn Scan<MemoryRow>),
                    "label" => label.take().map(|v| v as &mut dyn Scan<MemoryRow>),
                    _ => None,
                };
                slot.ok_or_else(|| MappingError::UnknownColumn {
                    target: "Plain",
                    column: column.clone(),
                })
            })
            .collect()
    }
}

#[derive(Debug, Default)]
struct Plain {
    id: i64,
    label: String,
}

rowscan::impl_record!(Plain => MemoryRow);

#[derive(Debug, Default)]
struct Fast {
    id: i64,
    label: String,
}

impl FastScan<MemoryRow> for Fast {
    fn scan_fast(&mut self) -> Vec<&mut dyn Scan<MemoryRow>> {
        vec![&mut self.id as &mut dyn Scan<MemoryRow>, &mut self.label]
    }
}

rowscan::impl_record!(Fast => MemoryRow { fast_scan });

/// Fast-scan record with one slot more than the `rows` helper returns.
#[derive(Debug, Default)]
struct Wide {
    id: i64,
    label: String,
    extra: bool,
}

impl FastScan<MemoryRow> for Wide {
    fn scan_fast(&mut self) -> Vec<&mut dyn Scan<MemoryRow>> {
        vec![
            &mut self.id as &mut dyn Scan<MemoryRow>,
            &mut self.label,
            &mut self.extra,
        ]
    }
}

rowscan::impl_record!(Wide => MemoryRow { fast_scan });

/// Fast-scan type with a hook that records its calls and can fail on one row.
#[derive(Debug, Default)]
struct Hooked {
    id: i64,
    label: String,
    calls: Vec<(usize, usize)>,
    fail_at: Option<usize>,
}

impl FastScan<MemoryRow> for Hooked {
    fn scan_fast(&mut self) -> Vec<&mut dyn Scan<MemoryRow>> {
        vec![&mut self.id as &mut dyn Scan<MemoryRow>, &mut self.label]
    }
}

impl PostUnmarshal for Hooked {
    fn post_unmarshal(
        &mut self,
        _ctx: &QueryContext,
        row_index: usize,
        total_rows: usize,
    ) -> Result<(), BoxDynError> {
        self.calls.push((row_index, total_rows));
        if self.fail_at == Some(row_index) {
            return Err(format!("row {} rejected", row_index).into());
        }
        Ok(())
    }
}

rowscan::impl_record!(Hooked => MemoryRow { fast_scan, post_unmarshal });

/// Helper to build `n` rows of `(id, label)`
fn rows(n: usize) -> MemoryRows {
    MemoryRows::new(
        ["id", "label"],
        (0..n)
            .map(|i| vec![json!(i), json!(format!("row-{}", i))])
            .collect(),
    )
}

// =========================================================================
// Path selection
// =========================================================================

#[tokio::test]
async fn test_fast_scan_never_reaches_mapper() {
    let ctx = QueryContext::background();
    let mut cursor = rows(2);
    let mut dest: Vec<Fast> = Vec::new();

    let count = assert_ok!(
        Unmarshaler::new(PanickingMapper)
            .unmarshal_all(&ctx, &mut cursor, &mut dest)
            .await
    );

    assert_eq!(count, 2);
    assert_eq!(dest[1].id, 1);
    assert_eq!(dest[1].label, "row-1");
    assert_ok!(cursor.close().await);
}

#[tokio::test]
async fn test_reflective_path_called_once_per_row() {
    let ctx = QueryContext::background();
    let mut cursor = rows(3);
    let mut dest: Vec<Plain> = Vec::new();
    let unmarshaler = Unmarshaler::new(CountingMapper::default());

    let count = assert_ok!(unmarshaler.unmarshal_all(&ctx, &mut cursor, &mut dest).await);

    assert_eq!(count, 3);
    assert_eq!(dest.len(), 3);
    assert_eq!(unmarshaler.mapper().calls.load(Ordering::SeqCst), 3);
    assert_eq!(unmarshaler.mapper().last_width.load(Ordering::SeqCst), 2);
    assert_eq!(dest[2].id, 2);
    assert_eq!(dest[2].label, "row-2");
}

#[tokio::test]
async fn test_factory_builds_each_record() {
    let ctx = QueryContext::background();
    let mut cursor = rows(2);
    let mut dest: Vec<Hooked> = Vec::new();
    let mut created = 0;

    assert_ok!(
        Unmarshaler::new(PanickingMapper)
            .unmarshal_with(&ctx, &mut cursor, &mut dest, || {
                created += 1;
                Hooked::default()
            })
            .await
    );
    assert_eq!(created, 2);
}

// =========================================================================
// Failures during scanning
// =========================================================================

#[tokio::test]
async fn test_destination_count_mismatch_stops_scanning() {
    let ctx = QueryContext::background();
    let mut cursor = MemoryRows::new(
        ["id", "label", "extra"],
        vec![
            vec![json!(1), json!("a"), json!(true)],
            vec![json!(2), json!("b"), json!(false)],
        ],
    );
    let mut dest: Vec<Fast> = Vec::new();

    let err = assert_err!(
        Unmarshaler::new(PanickingMapper)
            .unmarshal_all(&ctx, &mut cursor, &mut dest)
            .await
    );

    assert!(matches!(
        err,
        Error::Mapping(MappingError::DestinationCount {
            columns: 3,
            destinations: 2
        })
    ));
    assert!(dest.is_empty());

    // The second row was never fetched
    assert!(cursor.advance().await);
    assert!(!cursor.advance().await);
}

#[tokio::test]
async fn test_too_many_destinations_is_mapping_error() {
    let ctx = QueryContext::background();
    let mut cursor = rows(2);
    let mut dest: Vec<Wide> = Vec::new();

    let err = assert_err!(
        Unmarshaler::new(PanickingMapper)
            .unmarshal_all(&ctx, &mut cursor, &mut dest)
            .await
    );

    assert!(matches!(
        err,
        Error::Mapping(MappingError::DestinationCount {
            columns: 2,
            destinations: 3
        })
    ));
    assert!(dest.is_empty());
}

#[tokio::test]
async fn test_decode_error_aborts() {
    let ctx = QueryContext::background();
    let mut cursor = MemoryRows::new(
        ["id", "label"],
        vec![vec![json!(1), json!("a")], vec![json!("two"), json!("b")]],
    );
    let mut dest: Vec<Hooked> = Vec::new();

    let err = assert_err!(
        Unmarshaler::new(PanickingMapper)
            .unmarshal_all(&ctx, &mut cursor, &mut dest)
            .await
    );

    assert!(matches!(err, Error::Driver(_)));
    assert_eq!(dest.len(), 1);
    assert!(dest[0].calls.is_empty());
}

#[tokio::test]
async fn test_cancellation_surfaces_from_cursor() {
    let ctx = QueryContext::background();
    ctx.cancel();
    let mut cursor = rows(3).with_context(ctx.clone());
    let mut dest: Vec<Fast> = Vec::new();

    let err = assert_err!(
        Unmarshaler::new(PanickingMapper)
            .unmarshal_all(&ctx, &mut cursor, &mut dest)
            .await
    );
    assert!(matches!(err, Error::Cancelled));
    assert!(dest.is_empty());

    // The unmarshaler took the error; the cursor stays stopped
    assert!(cursor.err().is_none());
    assert!(!cursor.advance().await);
    assert!(!cursor.next_result_set().await);
}

#[tokio::test]
async fn test_close_after_error_is_noop() {
    let ctx = QueryContext::background();
    let mut cursor = MemoryRows::new(["only"], vec![vec![json!(1)]]);
    let mut dest: Vec<Fast> = Vec::new();

    assert_err!(
        Unmarshaler::new(PanickingMapper)
            .unmarshal_all(&ctx, &mut cursor, &mut dest)
            .await
    );
    assert_ok!(cursor.close().await);
    assert_ok!(cursor.close().await);
    assert!(cursor.is_closed());
}

// =========================================================================
// Post-unmarshal hooks
// =========================================================================

#[tokio::test]
async fn test_post_unmarshal_runs_once_per_record_in_order() {
    let n = rand::thread_rng().gen_range(1..50);
    let ctx = QueryContext::background();
    let mut cursor = rows(n);
    let mut dest: Vec<Hooked> = Vec::new();

    let count = assert_ok!(
        Unmarshaler::new(PanickingMapper)
            .unmarshal_all(&ctx, &mut cursor, &mut dest)
            .await
    );

    assert_eq!(count, n);
    for (i, record) in dest.iter().enumerate() {
        assert_eq!(record.calls, vec![(i, n)], "record {} of {}", i, n);
        assert_eq!(record.id, i as i64);
    }
}

#[tokio::test]
async fn test_post_unmarshal_error_stops_remaining_hooks() {
    let n = rand::thread_rng().gen_range(3..20);
    let k = rand::thread_rng().gen_range(0..n - 1);
    let ctx = QueryContext::background();
    let mut cursor = rows(n);
    let mut dest: Vec<Hooked> = Vec::new();

    let err = assert_err!(
        Unmarshaler::new(PanickingMapper)
            .unmarshal_with(&ctx, &mut cursor, &mut dest, || Hooked {
                fail_at: Some(k),
                ..Default::default()
            })
            .await
    );

    match err {
        Error::PostProcess {
            row_index,
            total_rows,
            ..
        } => {
            assert_eq!(row_index, k);
            assert_eq!(total_rows, n);
        }
        other => panic!("unexpected error: {other}"),
    }

    // Every row was scanned before any hook ran
    assert_eq!(dest.len(), n);
    for (i, record) in dest.iter().enumerate() {
        if i <= k {
            assert_eq!(record.calls.len(), 1);
        } else {
            assert!(record.calls.is_empty(), "hook ran for row {}", i);
        }
    }
}

#[tokio::test]
async fn test_empty_result_runs_no_hooks() {
    let ctx = QueryContext::background();
    let mut cursor = rows(0);
    let mut dest: Vec<Hooked> = Vec::new();

    let count = assert_ok!(
        Unmarshaler::new(PanickingMapper)
            .unmarshal_all(&ctx, &mut cursor, &mut dest)
            .await
    );
    assert_eq!(count, 0);
}

#[tokio::test]
async fn test_multiple_result_sets_one_call_each() {
    let ctx = QueryContext::background();
    let mut cursor = rows(2).with_result_set(["id", "label"], vec![vec![json!(9), json!("x")]]);
    let mut first: Vec<Hooked> = Vec::new();
    let mut second: Vec<Hooked> = Vec::new();
    let unmarshaler = Unmarshaler::new(PanickingMapper);

    assert_eq!(
        assert_ok!(unmarshaler.unmarshal_all(&ctx, &mut cursor, &mut first).await),
        2
    );
    assert!(cursor.next_result_set().await);
    assert_eq!(
        assert_ok!(unmarshaler.unmarshal_all(&ctx, &mut cursor, &mut second).await),
        1
    );
    assert_eq!(second[0].calls, vec![(0, 1)]);
    assert_eq!(second[0].id, 9);
}
