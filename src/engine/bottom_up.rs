//! Phase 1: local multiplicities.
//!
//! Post-order over the tree. For each edge, the parent's rows contribute a
//! `Start`/`End` pair at their band endpoints and the child's rows stream
//! through as weighted `Source`s; the interval read off each pair is the
//! number of subtree-join rows of the child falling inside that parent
//! row's band, and multiplies into the parent's `local_mult`.
//!
//! Leaves are covered by the metadata init, which sets `local_mult := 1`.
//! After the phase, `local_mult` of a row at node `v` equals the number of
//! join rows of `v`'s subtree that contain it.

use tracing::debug;

use crate::constraint::JoinConstraint;
use crate::debug::{DebugSession, dump_opt};
use crate::dispatch::{Dispatcher, Opcode, WEIGHT_LOCAL_MULT};
use crate::engine::{LOCAL_SCAN, build_combined, interval_scan, stamp_join_attr};
use crate::error::ObliJoinError;
use crate::tree::{JoinTree, NodeId};

pub fn run(
    tree: &mut JoinTree,
    dispatcher: &mut Dispatcher,
    session: &mut Option<DebugSession>,
) -> Result<(), ObliJoinError> {
    // Stamp positions and unit multiplicities everywhere first.
    for id in tree.pre_order() {
        tree.table_mut(id).init_meta(dispatcher)?;
    }

    for id in tree.post_order() {
        for child in tree.children(id).to_vec() {
            let constraint = tree
                .node(child)
                .constraint
                .clone()
                .ok_or_else(|| ObliJoinError::MissingConstraint(tree.node(child).name.clone()))?;
            debug!(
                parent = %tree.node(id).name,
                child = %tree.node(child).name,
                "computing local multiplicities"
            );
            compute_local_multiplicities(tree, dispatcher, id, child, &constraint, session)?;
        }
    }
    Ok(())
}

/// One edge: multiply each parent row's `local_mult` by the number of
/// child subtree-rows inside its band.
fn compute_local_multiplicities(
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
    let mut stream = build_combined(
        dispatcher,
        tree.table(child),
        WEIGHT_LOCAL_MULT,
        tree.table(parent),
        constraint.params(),
        "combined_local",
    )?;
    dump_opt(session, &stream, "bottomup_step1_combined");

    interval_scan(&mut stream, dispatcher, LOCAL_SCAN, parent_len)?;
    dump_opt(session, &stream, "bottomup_step2_intervals");

    stream.parallel_pass(
        tree.table_mut(parent),
        dispatcher,
        Opcode::UpdateTargetLocalMult,
    )?;
    dump_opt(session, tree.table(parent), "bottomup_step3_parent_updated");
    Ok(())
}
