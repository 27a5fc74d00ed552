//! Phase 3: distribute-expand.
//!
//! Each node's table is rewritten so that every row appears exactly
//! `final_mult` times, at constant cost per output slot:
//!
//! 1. exclusive prefix sum of `final_mult` gives each row its destination
//!    slot `dst_idx`; the last row yields the output size,
//! 2. rows with `final_mult = 0` are marked as padding and compacted to
//!    the back, the buffer is cut or padded to exactly the output size,
//! 3. stride-halving distribution passes route every row to `dst_idx`
//!    (after the pass at stride `d`, every row is within `d` of its
//!    destination),
//! 4. one expansion pass copies each row forward into the padding slots
//!    that follow it.

use tracing::debug;

use crate::debug::{DebugSession, dump_opt};
use crate::dispatch::{Dispatcher, Opcode};
use crate::error::ObliJoinError;
use crate::table::ObliviousTable;
use crate::tree::JoinTree;
use crate::tuple::{EncryptionStatus, TupleKind};

pub fn run(
    tree: &mut JoinTree,
    dispatcher: &mut Dispatcher,
    session: &mut Option<DebugSession>,
) -> Result<(), ObliJoinError> {
    for id in tree.pre_order() {
        let table = std::mem::take(tree.table_mut(id));
        let before = table.len();
        let expanded = expand_table(table, dispatcher, session)?;
        debug!(
            node = %tree.node(id).name,
            before,
            after = expanded.len(),
            "expanded"
        );
        *tree.table_mut(id) = expanded;
    }
    Ok(())
}

/// Expand one table to `Σ final_mult` rows.
pub fn expand_table(
    mut table: ObliviousTable,
    dispatcher: &mut Dispatcher,
    session: &mut Option<DebugSession>,
) -> Result<ObliviousTable, ObliJoinError> {
    if table.is_empty() {
        return Ok(table);
    }

    // Destination slots via exclusive prefix sum.
    table.map(dispatcher, Opcode::InitDstIdx, [0; 4])?;
    table.linear_pass(dispatcher, Opcode::WinComputeDstIdx)?;
    dump_opt(session, &table, "dist_step1_dst_idx");

    let last = &table.tuples()[table.len() - 1];
    let output = dispatcher.obtain_output_size(last)?;
    if output < 0 {
        return Err(ObliJoinError::ExpansionMismatch {
            node: table.name().to_string(),
            expected: 0,
            got: table.len(),
        });
    }
    let output = output as usize;
    if output == 0 {
        // Every row vanished from the join result.
        return Ok(ObliviousTable::new(table.name(), table.schema().clone()));
    }

    // Compact vanished rows to the back and size the buffer exactly.
    table.map(dispatcher, Opcode::MarkZeroMultPad, [0; 4])?;
    table.bitonic_sort(dispatcher, Opcode::CmpPadLast)?;
    dump_opt(session, &table, "dist_step2_compacted");

    if table.len() > output {
        table.truncate(output);
    } else if table.len() < output {
        let encrypted = match table.encryption_status() {
            EncryptionStatus::AllEncrypted => true,
            EncryptionStatus::AllPlaintext => false,
            EncryptionStatus::Mixed => {
                return Err(ObliJoinError::MixedEncryption {
                    phase: "distribute-expand",
                    node: table.name().to_string(),
                });
            }
        };
        let pads = dispatcher.create_pads(output - table.len(), TupleKind::DistPad, encrypted)?;
        for pad in pads {
            table.push(pad);
        }
    }
    if table.len() != output {
        return Err(ObliJoinError::ExpansionMismatch {
            node: table.name().to_string(),
            expected: output,
            got: table.len(),
        });
    }

    // Stamp slot positions; the routing condition compares destinations
    // against them inside the boundary.
    table.map(dispatcher, Opcode::InitIndex, [0; 4])?;
    table.linear_pass(dispatcher, Opcode::WinIndexInc)?;
    dump_opt(session, &table, "dist_step3_indexed");

    // Stride-halving distribution.
    let mut stride = if output > 1 {
        output.next_power_of_two() / 2
    } else {
        0
    };
    while stride >= 1 {
        table.distribute_pass(dispatcher, stride, Opcode::DistributeSwap)?;
        stride /= 2;
    }
    dump_opt(session, &table, "dist_step4_distributed");

    // Fill the padding runs with copies of the row preceding them.
    table.linear_pass(dispatcher, Opcode::WinExpandCopy)?;
    dump_opt(session, &table, "dist_step5_expanded");
    Ok(table)
}
