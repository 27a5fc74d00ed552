//! The four-phase join engine.
//!
//! Phases 1 and 2 share the dual-entry combined-stream machinery defined
//! here: a stream of weight-carrying `Source` entries merged with
//! `Start`/`End` boundary markers, sorted so that a prefix sum over the
//! weights turns band containment into an interval difference readable off
//! each `Start`/`End` pair.

pub mod align;
pub mod bottom_up;
pub mod distribute;
pub mod executor;
pub mod top_down;

use crate::dispatch::{Dispatcher, Opcode};
use crate::error::ObliJoinError;
use crate::schema::Schema;
use crate::table::ObliviousTable;
use crate::tuple::Openness;

/// Stamp `join_attr` on every tuple from the named schema column.
pub(crate) fn stamp_join_attr(
    table: &mut ObliviousTable,
    dispatcher: &mut Dispatcher,
    column: &str,
) -> Result<(), ObliJoinError> {
    let col = table
        .schema()
        .column_index(column)
        .ok_or_else(|| ObliJoinError::UnknownJoinColumn {
            node: table.name().to_string(),
            column: column.to_string(),
        })?;
    table.map(dispatcher, Opcode::SetJoinAttrFromCol, [col as i64, 0, 0, 0])
}

/// Field set a combined-stream scan operates on.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ScanOps {
    pub cumsum: Opcode,
    pub interval: Opcode,
}

/// Phase-1 field set (`local_cumsum` / `local_interval`).
pub(crate) const LOCAL_SCAN: ScanOps = ScanOps {
    cumsum: Opcode::WinLocalCumsum,
    interval: Opcode::WinLocalInterval,
};

/// Phase-2 field set (`foreign_sum` / `foreign_interval`).
pub(crate) const FOREIGN_SCAN: ScanOps = ScanOps {
    cumsum: Opcode::WinForeignSum,
    interval: Opcode::WinForeignInterval,
};

/// Build the combined stream for one edge.
///
/// Emits one `Source` per row of `sources` (weight per `weight_selector`),
/// and a `Start`/`End` pair per row of `bounds` at the given interval
/// endpoints. Boundary entries keep their row's `original_index` as the
/// back-pointer that later re-pairs them.
pub(crate) fn build_combined(
    dispatcher: &mut Dispatcher,
    sources: &ObliviousTable,
    weight_selector: i64,
    bounds: &ObliviousTable,
    endpoints: (i64, i64, Openness, Openness),
    name: &str,
) -> Result<ObliviousTable, ObliJoinError> {
    let (d1, d2, o1, o2) = endpoints;

    let mut stream = ObliviousTable::with_tuples(name, Schema::default(), Vec::new());

    let mut source_part =
        ObliviousTable::with_tuples(name, Schema::default(), sources.tuples().to_vec());
    source_part.map(dispatcher, Opcode::MakeSource, [weight_selector, 0, 0, 0])?;

    let mut start_part =
        ObliviousTable::with_tuples(name, Schema::default(), bounds.tuples().to_vec());
    start_part.map(dispatcher, Opcode::MakeStart, [d1, o1.code(), 0, 0])?;

    let mut end_part =
        ObliviousTable::with_tuples(name, Schema::default(), bounds.tuples().to_vec());
    end_part.map(dispatcher, Opcode::MakeEnd, [d2, o2.code(), 0, 0])?;

    for t in source_part.into_tuples() {
        stream.push(t);
    }
    for t in start_part.into_tuples() {
        stream.push(t);
    }
    for t in end_part.into_tuples() {
        stream.push(t);
    }

    stream.map(dispatcher, Opcode::InitStreamTemps, [0; 4])?;
    Ok(stream)
}

/// Run the interval computation over a combined stream and reduce it to
/// the `keep` `End` entries, one per boundary-side row in original order:
///
/// 1. sort by join value (boundary tie classes included),
/// 2. prefix-sum the `Source` weights,
/// 3. re-sort to put each `Start` next to its `End`,
/// 4. write each pair's difference into the `End`,
/// 5. re-sort `End`s to the front in original order and truncate.
pub(crate) fn interval_scan(
    stream: &mut ObliviousTable,
    dispatcher: &mut Dispatcher,
    ops: ScanOps,
    keep: usize,
) -> Result<(), ObliJoinError> {
    stream.bitonic_sort(dispatcher, Opcode::CmpJoinAttr)?;
    stream.linear_pass(dispatcher, ops.cumsum)?;
    stream.bitonic_sort(dispatcher, Opcode::CmpPairwise)?;
    stream.linear_pass(dispatcher, ops.interval)?;
    stream.bitonic_sort(dispatcher, Opcode::CmpEndFirst)?;
    stream.truncate(keep);
    Ok(())
}
