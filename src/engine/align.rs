//! Phase 4: align-and-concatenate.
//!
//! Pre-order construction of the result. The accumulator starts as the
//! current node's expanded table; for each child, the child's subtree
//! result is built recursively, both sides are sorted into row-by-row
//! correspondence, and the child's columns are concatenated on.
//!
//! The accumulator sorts by the edge's join value and then all attributes,
//! so identical parent rows form contiguous groups. On the child side,
//! `copy_index` numbers each row's copies within its run, and
//! `alignment_key = foreign_sum + copy_index / local_mult` sends each
//! block of `local_mult` copies to the next matching parent group. After
//! both sorts, row `i` of each side describes the same join-result row.
//!
//! Sort effort is tracked separately for accumulator and child sorts;
//! counters reset at the start of each execution and publish afterwards.

use std::time::Instant;

use tracing::debug;

use crate::debug::{DebugSession, dump_opt};
use crate::dispatch::{Dispatcher, Opcode};
use crate::engine::stamp_join_attr;
use crate::error::ObliJoinError;
use crate::metrics::SortMetrics;
use crate::table::ObliviousTable;
use crate::tree::{JoinTree, NodeId};

pub fn run(
    tree: &JoinTree,
    dispatcher: &mut Dispatcher,
    session: &mut Option<DebugSession>,
    sorts: &mut SortMetrics,
) -> Result<ObliviousTable, ObliJoinError> {
    *sorts = SortMetrics::default();
    construct(tree, tree.root(), dispatcher, session, sorts)
}

fn construct(
    tree: &JoinTree,
    id: NodeId,
    dispatcher: &mut Dispatcher,
    session: &mut Option<DebugSession>,
    sorts: &mut SortMetrics,
) -> Result<ObliviousTable, ObliJoinError> {
    let mut accumulator = tree.table(id).clone();
    for &child in tree.children(id) {
        let child_result = construct(tree, child, dispatcher, session, sorts)?;
        let constraint = tree
            .node(child)
            .constraint
            .clone()
            .ok_or_else(|| ObliJoinError::MissingConstraint(tree.node(child).name.clone()))?;
        debug!(
            node = %tree.node(id).name,
            child = %tree.node(child).name,
            rows = accumulator.len(),
            "aligning child"
        );
        accumulator = align_and_concat(
            accumulator,
            child_result,
            &constraint.parent_column,
            dispatcher,
            session,
            sorts,
        )?;
    }
    Ok(accumulator)
}

fn align_and_concat(
    mut accumulator: ObliviousTable,
    mut child: ObliviousTable,
    parent_column: &str,
    dispatcher: &mut Dispatcher,
    session: &mut Option<DebugSession>,
    sorts: &mut SortMetrics,
) -> Result<ObliviousTable, ObliJoinError> {
    // Group identical parent rows for this edge's join value.
    stamp_join_attr(&mut accumulator, dispatcher, parent_column)?;
    let started = Instant::now();
    let crossings = dispatcher.crossings();
    accumulator.bitonic_sort(dispatcher, Opcode::CmpJoinThenOther)?;
    sorts
        .accumulator
        .add(started.elapsed(), dispatcher.crossings() - crossings);
    dump_opt(session, &accumulator, "align_step1_sorted");

    // Number each child row's copies within its run.
    child.map(dispatcher, Opcode::InitCopyIndex, [0; 4])?;
    child.linear_pass(dispatcher, Opcode::WinCopyIndex)?;
    dump_opt(session, &child, "align_step2_copy_indices");

    child.map(dispatcher, Opcode::ComputeAlignmentKey, [0; 4])?;
    dump_opt(session, &child, "align_step3_alignment_keys");

    let started = Instant::now();
    let crossings = dispatcher.crossings();
    child.bitonic_sort(dispatcher, Opcode::CmpAlignmentKey)?;
    sorts
        .child
        .add(started.elapsed(), dispatcher.crossings() - crossings);
    dump_opt(session, &child, "align_step4_sorted");

    let result = ObliviousTable::horizontal_concat(&accumulator, &child, dispatcher)?;
    dump_opt(session, &result, "align_step5_concatenated");
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::constraint::JoinConstraint;
    use crate::crypto::TupleCryptor;
    use crate::engine::{bottom_up, distribute, top_down};
    use crate::schema::Schema;

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(TupleCryptor::generate(), &EngineConfig::quiet()).unwrap()
    }

    fn table(name: &str, cols: Vec<&str>, rows: &[Vec<i64>]) -> ObliviousTable {
        ObliviousTable::from_rows(name, Schema::new(cols).unwrap(), rows)
    }

    fn run_pipeline(tree: &mut JoinTree, d: &mut Dispatcher) -> ObliviousTable {
        bottom_up::run(tree, d, &mut None).unwrap();
        top_down::run(tree, d, &mut None).unwrap();
        distribute::run(tree, d, &mut None).unwrap();
        let mut sorts = SortMetrics::default();
        run(tree, d, &mut None, &mut sorts).unwrap()
    }

    fn rows_of(t: &ObliviousTable) -> Vec<Vec<i64>> {
        let w = t.schema().width();
        let mut rows: Vec<Vec<i64>> = t
            .tuples()
            .iter()
            .map(|x| x.attributes[..w].to_vec())
            .collect();
        rows.sort();
        rows
    }

    #[test]
    fn test_chain_produces_join_rows() {
        let mut tree = JoinTree::new(
            "customer",
            table("customer", vec!["custkey"], &[vec![1], vec![2]]),
        );
        let root = tree.root();
        let orders = tree.add_child(
            root,
            "orders",
            table(
                "orders",
                vec!["o_custkey", "orderkey"],
                &[vec![1, 10], vec![1, 11], vec![2, 20]],
            ),
            JoinConstraint::equality("custkey", "o_custkey"),
        );
        tree.add_child(
            orders,
            "lineitem",
            table(
                "lineitem",
                vec!["l_orderkey"],
                &[vec![10], vec![10], vec![11], vec![30]],
            ),
            JoinConstraint::equality("orderkey", "l_orderkey"),
        );

        let mut d = dispatcher();
        let result = run_pipeline(&mut tree, &mut d);

        assert_eq!(
            result.schema().columns(),
            &["custkey", "o_custkey", "orderkey", "l_orderkey"]
        );
        assert_eq!(
            rows_of(&result),
            vec![
                vec![1, 1, 10, 10],
                vec![1, 1, 10, 10],
                vec![1, 1, 11, 11],
            ]
        );
    }

    #[test]
    fn test_star_cross_product_within_key() {
        let mut tree = JoinTree::new("hub", table("hub", vec!["k"], &[vec![1]]));
        let root = tree.root();
        tree.add_child(
            root,
            "a",
            table("a", vec!["ak", "av"], &[vec![1, 100], vec![1, 200]]),
            JoinConstraint::equality("k", "ak"),
        );
        tree.add_child(
            root,
            "b",
            table("b", vec!["bk", "bv"], &[vec![1, 7], vec![1, 8]]),
            JoinConstraint::equality("k", "bk"),
        );

        let mut d = dispatcher();
        let result = run_pipeline(&mut tree, &mut d);

        assert_eq!(
            rows_of(&result),
            vec![
                vec![1, 1, 100, 1, 7],
                vec![1, 1, 100, 1, 8],
                vec![1, 1, 200, 1, 7],
                vec![1, 1, 200, 1, 8],
            ]
        );
    }

    #[test]
    fn test_empty_result_keeps_full_schema() {
        let mut tree = JoinTree::new("p", table("p", vec!["k"], &[vec![1]]));
        let root = tree.root();
        tree.add_child(
            root,
            "c",
            table("c", vec!["ck"], &[vec![9]]),
            JoinConstraint::equality("k", "ck"),
        );

        let mut d = dispatcher();
        let result = run_pipeline(&mut tree, &mut d);
        assert!(result.is_empty());
        assert_eq!(result.schema().columns(), &["k", "ck"]);
    }

    #[test]
    fn test_sort_metrics_split_populated() {
        let mut tree = JoinTree::new("p", table("p", vec!["k"], &[vec![1], vec![2]]));
        let root = tree.root();
        tree.add_child(
            root,
            "c",
            table("c", vec!["ck"], &[vec![1], vec![2]]),
            JoinConstraint::equality("k", "ck"),
        );

        let mut d = dispatcher();
        bottom_up::run(&mut tree, &mut d, &mut None).unwrap();
        top_down::run(&mut tree, &mut d, &mut None).unwrap();
        distribute::run(&mut tree, &mut d, &mut None).unwrap();
        let mut sorts = SortMetrics::default();
        run(&tree, &mut d, &mut None, &mut sorts).unwrap();

        assert!(sorts.accumulator.crossings > 0);
        assert!(sorts.child.crossings > 0);
        assert_eq!(
            sorts.total_crossings(),
            sorts.accumulator.crossings + sorts.child.crossings
        );
    }
}
