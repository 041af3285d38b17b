//! # Join Equivalence Tests
//!
//! Every join strategy must produce the same multiset of rows as a naive
//! nested-loop reference, for any budget B >= 3 and any page size, while
//! never holding more than B pages.
//!
//! ```sh
//! cargo test --test join_equivalence
//! ```

mod common;

use common::*;
use smallvec::smallvec;
use spillway::executor::MaterializedScan;
use spillway::{
    collect_rows, BlockNestedLoopJoin, ColumnDef, DataType, ExecContext, Executor, HashJoin,
    JoinCondition, Row, Schema, SortMergeJoin, Value,
};

#[derive(Debug, Clone, Copy)]
enum Strategy {
    BlockNested,
    SortMerge,
    Hash,
}

const STRATEGIES: [Strategy; 3] = [Strategy::BlockNested, Strategy::SortMerge, Strategy::Hash];

/// Builds, drains and closes one join; returns its rows and the peak page
/// count of the join's own budget.
fn run_join(
    strategy: Strategy,
    ctx: &ExecContext,
    left: MaterializedScan,
    right: MaterializedScan,
    buffer_pages: usize,
) -> (Vec<Row>, usize) {
    let conditions = vec![JoinCondition::new(0, 0)];
    match strategy {
        Strategy::BlockNested => {
            let mut join =
                BlockNestedLoopJoin::new(ctx.clone(), left, right, conditions, buffer_pages);
            let rows = collect_rows(&mut join).unwrap();
            (rows, join.budget().peak())
        }
        Strategy::SortMerge => {
            let mut join = SortMergeJoin::new(ctx.clone(), left, right, conditions, buffer_pages);
            let rows = collect_rows(&mut join).unwrap();
            assert!(join.left_sort_budget().peak() <= buffer_pages);
            assert!(join.right_sort_budget().peak() <= buffer_pages);
            (rows, join.budget().peak())
        }
        Strategy::Hash => {
            let mut join = HashJoin::new(ctx.clone(), left, right, conditions, buffer_pages);
            let rows = collect_rows(&mut join).unwrap();
            (rows, join.budget().peak())
        }
    }
}

#[test]
fn concrete_scenario_for_every_strategy() {
    let left = keyed_rows(&[(Some(1), "a"), (Some(2), "b"), (Some(1), "c")]);
    let right = keyed_rows(&[(Some(1), "x"), (Some(3), "y")]);

    for strategy in STRATEGIES {
        let (dir, ctx) = context(4096);
        let (rows, peak) = run_join(
            strategy,
            &ctx,
            keyed_scan(&ctx, left.clone()),
            keyed_scan(&ctx, right.clone()),
            3,
        );
        assert_eq!(
            rendered_sorted(&rows),
            vec!["1|a|1|x".to_string(), "1|c|1|x".to_string()],
            "{:?}",
            strategy
        );
        assert!(peak <= 3, "{:?} peak {}", strategy, peak);
        assert!(leftover_files(&dir).is_empty(), "{:?}", strategy);
    }
}

#[test]
fn random_inputs_match_reference_across_budgets() {
    let cases = [(1, 3, 64), (2, 4, 64), (3, 5, 128), (4, 8, 256), (5, 3, 512)];
    for (seed, budget, page_size) in cases {
        let left = random_keyed(seed, 120, 15);
        let right = random_keyed(seed + 100, 90, 15);
        let expected = reference_join(&left, &right, 0, 0);

        for strategy in STRATEGIES {
            let (dir, ctx) = context(page_size);
            let (rows, peak) = run_join(
                strategy,
                &ctx,
                keyed_scan(&ctx, left.clone()),
                keyed_scan(&ctx, right.clone()),
                budget,
            );
            assert_eq!(
                rendered_sorted(&rows),
                expected,
                "{:?} B={} page={}",
                strategy,
                budget,
                page_size
            );
            assert!(peak <= budget, "{:?} peak {} > {}", strategy, peak, budget);
            assert!(leftover_files(&dir).is_empty());
        }
    }
}

#[test]
fn duplicate_heavy_keys_cross_page_boundaries() {
    // three keys, dozens of rows each, four rows per input page
    let left = random_keyed(11, 70, 3);
    let right = random_keyed(12, 55, 3);
    let expected = reference_join(&left, &right, 0, 0);

    for budget in [3, 4, 6] {
        for strategy in STRATEGIES {
            let (_dir, ctx) = context(64);
            let (rows, peak) = run_join(
                strategy,
                &ctx,
                keyed_scan(&ctx, left.clone()),
                keyed_scan(&ctx, right.clone()),
                budget,
            );
            assert_eq!(rendered_sorted(&rows), expected, "{:?} B={}", strategy, budget);
            assert!(peak <= budget);
        }
    }
}

#[test]
fn hash_join_fallback_stays_within_budget() {
    let (dir, ctx) = context(64);
    let left: Vec<Row> = random_keyed(21, 80, 1)
        .into_iter()
        .filter(|r| !r[0].is_null())
        .collect();
    let right = random_keyed(22, 30, 2);
    let expected = reference_join(&left, &right, 0, 0);

    let mut join = HashJoin::new(
        ctx.clone(),
        keyed_scan(&ctx, left),
        keyed_scan(&ctx, right),
        vec![JoinCondition::new(0, 0)],
        3,
    );
    let rows = collect_rows(&mut join).unwrap();
    assert_eq!(rendered_sorted(&rows), expected);
    assert!(join.fallback_count() >= 1);
    // the fallback join draws from the same budget, so this covers both
    assert!(join.budget().peak() <= 3, "peak {}", join.budget().peak());
    assert!(join.budget().peak_files() <= 3);
    assert_eq!(join.budget().in_use(), 0);
    assert!(leftover_files(&dir).is_empty());
}

#[test]
fn mixed_int_and_float_keys_agree_across_strategies() {
    let edge = 1i64 << 53;
    let left: Vec<Row> = [edge + 1, edge, 0, -1, 7]
        .iter()
        .enumerate()
        .map(|(i, &k)| -> Row { smallvec![Value::Int(k), Value::from(format!("l{}", i))] })
        .collect();
    let right: Vec<Row> = [edge as f64, (edge + 2) as f64, -0.0, 0.0, -1.0, 7.5, f64::NAN]
        .iter()
        .enumerate()
        .map(|(i, &k)| -> Row { smallvec![Value::Float(k), Value::from(format!("f{}", i))] })
        .collect();
    let right_schema = Schema::new(vec![
        ColumnDef::new("k", DataType::Float8),
        ColumnDef::varchar("tag", Some(8)),
    ]);

    let expected = reference_join(&left, &right, 0, 0);
    assert_eq!(
        expected,
        vec![
            "-1|l3|-1.0|f4".to_string(),
            "0|l2|-0.0|f2".to_string(),
            "0|l2|0.0|f3".to_string(),
            format!("{}|l1|{:?}|f0", edge, edge as f64),
        ]
    );

    for (budget, page_size) in [(3, 64), (6, 64), (3, 4096)] {
        for strategy in STRATEGIES {
            let (dir, ctx) = context(page_size);
            let right_scan =
                MaterializedScan::new(ctx.clone(), right_schema.clone(), right.clone());
            let (rows, peak) = run_join(
                strategy,
                &ctx,
                keyed_scan(&ctx, left.clone()),
                right_scan,
                budget,
            );
            assert_eq!(
                rendered_sorted(&rows),
                expected,
                "{:?} B={} page={}",
                strategy,
                budget,
                page_size
            );
            assert!(peak <= budget);
            assert!(leftover_files(&dir).is_empty());
        }
    }
}

#[test]
fn output_schema_is_left_then_right() {
    let (_dir, ctx) = context(4096);
    let join = SortMergeJoin::new(
        ctx.clone(),
        keyed_scan(&ctx, Vec::new()),
        keyed_scan(&ctx, Vec::new()),
        vec![JoinCondition::new(0, 0)],
        3,
    );
    let names: Vec<&str> = join.schema().columns().iter().map(|c| c.name()).collect();
    assert_eq!(names, vec!["k", "tag", "k", "tag"]);
}

#[test]
fn joins_compose_into_boxed_trees() {
    let (dir, ctx) = context(128);
    let a = keyed_rows(&[(Some(1), "a"), (Some(2), "b")]);
    let b = keyed_rows(&[(Some(1), "x"), (Some(2), "y"), (Some(2), "z")]);
    let c = keyed_rows(&[(Some(2), "q")]);

    let inner: Box<dyn Executor> = Box::new(HashJoin::new(
        ctx.clone(),
        keyed_scan(&ctx, a),
        keyed_scan(&ctx, b),
        vec![JoinCondition::new(0, 0)],
        4,
    ));
    let mut outer = SortMergeJoin::new(
        ctx.clone(),
        inner,
        keyed_scan(&ctx, c),
        vec![JoinCondition::new(2, 0)],
        3,
    );

    let rows = collect_rows(&mut outer).unwrap();
    assert_eq!(
        rendered_sorted(&rows),
        vec!["2|b|2|y|2|q".to_string(), "2|b|2|z|2|q".to_string()]
    );
    assert!(leftover_files(&dir).is_empty());
}
