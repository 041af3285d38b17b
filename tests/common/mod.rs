//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use smallvec::smallvec;
use spillway::executor::MaterializedScan;
use spillway::{ColumnDef, DataType, ExecConfig, ExecContext, Row, Schema, Value};
use tempfile::TempDir;

pub fn context(page_size: usize) -> (TempDir, ExecContext) {
    let dir = TempDir::new().expect("failed to create temp directory");
    let config = ExecConfig::builder()
        .page_size(page_size)
        .spill_dir(dir.path())
        .build()
        .expect("valid config");
    (dir, ExecContext::new(config))
}

/// Like `context`, with `buffer_pages` as the context's default budget.
pub fn context_with_budget(page_size: usize, buffer_pages: usize) -> (TempDir, ExecContext) {
    let dir = TempDir::new().expect("failed to create temp directory");
    let config = ExecConfig::builder()
        .page_size(page_size)
        .spill_dir(dir.path())
        .default_buffer_pages(buffer_pages)
        .build()
        .expect("valid config");
    (dir, ExecContext::new(config))
}

pub fn leftover_files(dir: &TempDir) -> Vec<String> {
    std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect()
}

/// `(k INT8, tag VARCHAR(8))`
pub fn keyed_schema() -> Schema {
    Schema::new(vec![
        ColumnDef::new("k", DataType::Int8),
        ColumnDef::varchar("tag", Some(8)),
    ])
}

pub fn keyed_rows(data: &[(Option<i64>, &str)]) -> Vec<Row> {
    data.iter()
        .map(|&(k, tag)| -> Row {
            smallvec![k.map_or(Value::Null, Value::Int), Value::from(tag.to_string())]
        })
        .collect()
}

pub fn keyed_scan(ctx: &ExecContext, rows: Vec<Row>) -> MaterializedScan {
    MaterializedScan::new(ctx.clone(), keyed_schema(), rows)
}

/// Rows with keys drawn from `0..distinct`, so small `distinct` values give
/// long runs of duplicates. About one row in twenty has a NULL key.
pub fn random_keyed(seed: u64, len: usize, distinct: i64) -> Vec<Row> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len)
        .map(|i| -> Row {
            let key = if rng.gen_ratio(1, 20) {
                Value::Null
            } else {
                Value::Int(rng.gen_range(0..distinct))
            };
            smallvec![key, Value::from(format!("r{}", i))]
        })
        .collect()
}

/// Rendering of a row that is easy to sort and compare.
pub fn render(row: &Row) -> String {
    row.iter()
        .map(|v| match v {
            Value::Null => "NULL".to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => format!("{:?}", f),
            other => other.as_text().unwrap_or("?").to_string(),
        })
        .collect::<Vec<_>>()
        .join("|")
}

pub fn rendered_sorted(rows: &[Row]) -> Vec<String> {
    let mut out: Vec<String> = rows.iter().map(render).collect();
    out.sort();
    out
}

/// Nested-loop reference join on `left[lk] = right[rk]`.
pub fn reference_join(left: &[Row], right: &[Row], lk: usize, rk: usize) -> Vec<String> {
    let mut out = Vec::new();
    for l in left {
        for r in right {
            if l[lk].join_eq(&r[rk]) {
                let joined: Row = l.iter().chain(r.iter()).cloned().collect();
                out.push(render(&joined));
            }
        }
    }
    out.sort();
    out
}
