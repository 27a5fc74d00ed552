//! Phase 2: final multiplicities.
//!
//! Pre-order from the root, whose rows start with
//! `final_mult := local_mult`. For each edge the child inherits, per row,
//! the sum of its matching parents' weights, where a parent's weight is
//! the number of completions of that parent *outside* the child's subtree:
//! `final_mult / d`, with `d` the parent's band interval over this child
//! (the quantity phase 1 computed for the edge, re-derived here because a
//! parent with several children folds all their intervals into one
//! `local_mult` product). The division is exact; a zero interval means
//! zero weight.
//!
//! The weighted stream mirrors phase 1 with the roles flipped: parents
//! are the `Source`s and each child row brackets its matching parents
//! with a reversed-interval `Start`/`End` pair. Each child row ends up
//! with `final_mult = local_mult × interval` and keeps the weight prefix
//! preceding its band (`foreign_sum`), which phase 4 uses to number the
//! parent groups its copies map onto.

use tracing::debug;

use crate::constraint::JoinConstraint;
use crate::debug::{DebugSession, dump_opt};
use crate::dispatch::{Dispatcher, Opcode, WEIGHT_CARRIED, WEIGHT_LOCAL_MULT};
use crate::engine::{FOREIGN_SCAN, LOCAL_SCAN, build_combined, interval_scan, stamp_join_attr};
use crate::error::ObliJoinError;
use crate::tree::{JoinTree, NodeId};

pub fn run(
    tree: &mut JoinTree,
    dispatcher: &mut Dispatcher,
    session: &mut Option<DebugSession>,
) -> Result<(), ObliJoinError> {
    let root = tree.root();
    tree.table_mut(root)
        .map(dispatcher, Opcode::InitFinalMultFromLocal, [0; 4])?;

    for id in tree.pre_order() {
        let Some(parent) = tree.parent(id) else {
            continue;
        };
        let constraint = tree
            .node(id)
            .constraint
            .clone()
            .ok_or_else(|| ObliJoinError::MissingConstraint(tree.node(id).name.clone()))?;
        debug!(
            parent = %tree.node(parent).name,
            child = %tree.node(id).name,
            "propagating final multiplicities"
        );
        propagate_final_multiplicities(tree, dispatcher, parent, id, &constraint, session)?;
    }
    Ok(())
}

fn propagate_final_multiplicities(
    tree: &mut JoinTree,
    dispatcher: &mut Dispatcher,
    parent: NodeId,
    child: NodeId,
    constraint: &JoinConstraint,
    session: &mut Option<DebugSession>,
) -> Result<(), ObliJoinError> {
    stamp_join_attr(tree.table_mut(parent), dispatcher, &constraint.parent_column)?;
    stamp_join_attr(tree.table_mut(child), dispatcher, &constraint.child_column)?;

    let parent_len = tree.table(parent).len();
    let child_len = tree.table(child).len();

    // Refresh each parent row's band interval over this child, then derive
    // its outside-completion weight.
    let mut interval_stream = build_combined(
        dispatcher,
        tree.table(child),
        WEIGHT_LOCAL_MULT,
        tree.table(parent),
        constraint.params(),
        "combined_interval",
    )?;
    dump_opt(session, &interval_stream, "topdown_step1_interval_combined");
    interval_scan(&mut interval_stream, dispatcher, LOCAL_SCAN, parent_len)?;
    interval_stream.parallel_pass(
        tree.table_mut(parent),
        dispatcher,
        Opcode::UpdateTargetInterval,
    )?;
    tree.table_mut(parent)
        .map(dispatcher, Opcode::ComputeForeignWeight, [0; 4])?;
    dump_opt(session, tree.table(parent), "topdown_step2_weights");

    // Weighted stream toward the child: the reversed constraint brackets,
    // for each child row, the parents whose band contains it.
    let reversed = constraint.reverse();
    let mut foreign_stream = build_combined(
        dispatcher,
        tree.table(parent),
        WEIGHT_CARRIED,
        tree.table(child),
        reversed.params(),
        "combined_foreign",
    )?;
    dump_opt(session, &foreign_stream, "topdown_step3_foreign_combined");
    interval_scan(&mut foreign_stream, dispatcher, FOREIGN_SCAN, child_len)?;
    dump_opt(session, &foreign_stream, "topdown_step4_foreign_sum");

    foreign_stream.parallel_pass(
        tree.table_mut(child),
        dispatcher,
        Opcode::UpdateTargetFinalMult,
    )?;
    dump_opt(session, tree.table(child), "topdown_step5_child_updated");
    Ok(())
}
