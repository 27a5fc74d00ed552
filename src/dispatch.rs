//! The trusted-boundary dispatcher.
//!
//! Every data-plane operation is expressed as an opcode applied to one or
//! two tuple slots. Callers batch operations (see [`crate::batch`]) and
//! submit them here; one submission models one crossing into the trusted
//! boundary: tuples that arrive encrypted are decrypted, the opcode is
//! applied to each operation in order, and tuples that arrived encrypted
//! are re-encrypted (with fresh nonces) before control returns.
//!
//! The opcode set is a closed enum dispatched by a single `match` — no
//! function pointers cross the boundary. Data-dependent moves go through
//! the branch-free helpers in [`crate::obl`], so the instruction sequence
//! of a submission depends only on the operation list, never on tuple
//! contents.
//!
//! With trace recording enabled, the dispatcher folds every
//! `(opcode, idx1, idx2)` it executes into a running xxh3 fingerprint;
//! two executions are access-pattern identical exactly when their
//! fingerprints and operation counts agree.

use std::cmp::Ordering;

use xxhash_rust::xxh3::Xxh3;

use crate::config::{EngineConfig, MAX_BATCH_OPS};
use crate::crypto::TupleCryptor;
use crate::error::ObliJoinError;
use crate::obl::{copy_payload_if, select_i64, swap_payload_if};
use crate::tuple::{MAX_ATTRS, Openness, Tuple, TupleKind};

/// Sentinel for "no second operand".
pub const NO_SECOND: u32 = u32::MAX;

/// Weight selector for [`Opcode::MakeSource`] (`params[0]`).
pub const WEIGHT_LOCAL_MULT: i64 = 0;
/// Keep the weight already present in `local_weight`.
pub const WEIGHT_CARRIED: i64 = 1;

/// The closed operation set of the trusted boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // ── Metadata initialisation ──────────────────────────────────────────
    /// Stamp `original_index` (`params[0]`) and reset multiplicities.
    InitMeta,
    /// `final_mult := local_mult` (root of the top-down phase).
    InitFinalMultFromLocal,
    InitCopyIndex,
    InitDstIdx,
    InitIndex,
    /// Seed prefix-sum scratch: a `Source`'s own weight, zero elsewhere.
    InitStreamTemps,

    // ── Boundary construction ────────────────────────────────────────────
    /// Turn a row copy into a weight-carrying stream entry
    /// (`params[0]`: weight selector).
    MakeSource,
    /// Turn a row copy into a lower boundary
    /// (`params[0]`: deviation, `params[1]`: openness code).
    MakeStart,
    /// Turn a row copy into an upper boundary (same parameters).
    MakeEnd,

    // ── Comparators (compare-and-swap; `params[0]`: ascending flag) ──────
    CmpJoinAttr,
    CmpJoinThenOther,
    CmpPairwise,
    CmpEndFirst,
    CmpPadLast,
    CmpAlignmentKey,

    // ── Distribution routing (`params[0]`: stride) ───────────────────────
    DistributeSwap,

    // ── Window functions (sequential two-slot windows) ───────────────────
    WinLocalCumsum,
    WinLocalInterval,
    WinComputeDstIdx,
    WinForeignSum,
    WinForeignInterval,
    WinCopyIndex,
    WinIndexInc,
    WinExpandCopy,

    // ── Per-tuple transforms ─────────────────────────────────────────────
    MarkZeroMultPad,
    ComputeAlignmentKey,
    /// `local_weight := final_mult / local_interval` (zero interval → 0).
    ComputeForeignWeight,
    CreateSortPad,
    CreateDistPad,
    /// `join_attr := attributes[params[0]]`.
    SetJoinAttrFromCol,

    // ── Row merging ──────────────────────────────────────────────────────
    /// Splice the second operand's attributes after the first's
    /// (`params[0]`: left width, `params[1]`: right width). Metadata stays
    /// with the first operand.
    ConcatAttrs,

    // ── Target updates (paired passes; second operand is the target) ─────
    /// `target.local_mult *= source.local_interval`.
    UpdateTargetLocalMult,
    /// `target.local_interval := source.local_interval`.
    UpdateTargetInterval,
    /// `target.final_mult := target.local_mult × source.foreign_interval`;
    /// `target.foreign_sum := source.foreign_sum`.
    UpdateTargetFinalMult,

    // ── Out-of-band reduction ────────────────────────────────────────────
    /// `dst_idx + final_mult` of the last tuple, returned to the caller.
    ObtainOutputSize,
}

impl Opcode {
    pub fn name(self) -> &'static str {
        match self {
            Opcode::InitMeta => "INIT_META",
            Opcode::InitFinalMultFromLocal => "INIT_FINAL_MULT_FROM_LOCAL",
            Opcode::InitCopyIndex => "INIT_COPY_IDX",
            Opcode::InitDstIdx => "INIT_DST_IDX",
            Opcode::InitIndex => "INIT_INDEX",
            Opcode::InitStreamTemps => "INIT_STREAM_TEMPS",
            Opcode::MakeSource => "MAKE_SOURCE",
            Opcode::MakeStart => "MAKE_START",
            Opcode::MakeEnd => "MAKE_END",
            Opcode::CmpJoinAttr => "CMP_JOIN_ATTR",
            Opcode::CmpJoinThenOther => "CMP_JOIN_THEN_OTHER",
            Opcode::CmpPairwise => "CMP_PAIRWISE",
            Opcode::CmpEndFirst => "CMP_END_FIRST",
            Opcode::CmpPadLast => "CMP_PAD_LAST",
            Opcode::CmpAlignmentKey => "CMP_ALIGNMENT_KEY",
            Opcode::DistributeSwap => "CMP_DISTRIBUTE",
            Opcode::WinLocalCumsum => "WIN_LOCAL_CUMSUM",
            Opcode::WinLocalInterval => "WIN_LOCAL_INTERVAL",
            Opcode::WinComputeDstIdx => "WIN_COMPUTE_DST_IDX",
            Opcode::WinForeignSum => "WIN_FOREIGN_SUM",
            Opcode::WinForeignInterval => "WIN_FOREIGN_INTERVAL",
            Opcode::WinCopyIndex => "WIN_COPY_INDEX",
            Opcode::WinIndexInc => "WIN_INDEX_INC",
            Opcode::WinExpandCopy => "WIN_EXPAND_COPY",
            Opcode::MarkZeroMultPad => "MARK_ZERO_MULT_PAD",
            Opcode::ComputeAlignmentKey => "COMPUTE_ALIGNMENT_KEY",
            Opcode::ComputeForeignWeight => "COMPUTE_FOREIGN_WEIGHT",
            Opcode::CreateSortPad => "CREATE_SORT_PAD",
            Opcode::CreateDistPad => "CREATE_DIST_PAD",
            Opcode::SetJoinAttrFromCol => "SET_JOIN_ATTR_FROM_COL",
            Opcode::ConcatAttrs => "CONCAT_ATTRS",
            Opcode::UpdateTargetLocalMult => "UPDATE_TARGET_LOCAL_MULT",
            Opcode::UpdateTargetInterval => "UPDATE_TARGET_INTERVAL",
            Opcode::UpdateTargetFinalMult => "UPDATE_TARGET_FINAL_MULT",
            Opcode::ObtainOutputSize => "OBTAIN_OUTPUT_SIZE",
        }
    }

    /// Whether the opcode consumes a second operand.
    pub fn is_binary(self) -> bool {
        matches!(
            self,
            Opcode::CmpJoinAttr
                | Opcode::CmpJoinThenOther
                | Opcode::CmpPairwise
                | Opcode::CmpEndFirst
                | Opcode::CmpPadLast
                | Opcode::CmpAlignmentKey
                | Opcode::DistributeSwap
                | Opcode::WinLocalCumsum
                | Opcode::WinLocalInterval
                | Opcode::WinComputeDstIdx
                | Opcode::WinForeignSum
                | Opcode::WinForeignInterval
                | Opcode::WinCopyIndex
                | Opcode::WinIndexInc
                | Opcode::WinExpandCopy
                | Opcode::ConcatAttrs
                | Opcode::UpdateTargetLocalMult
                | Opcode::UpdateTargetInterval
                | Opcode::UpdateTargetFinalMult
        )
    }

    fn tag(self) -> u8 {
        self as u8
    }
}

/// One operation inside a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOp {
    pub idx1: u32,
    pub idx2: u32,
    pub params: [i64; 4],
}

impl BatchOp {
    pub fn unary(idx: usize, params: [i64; 4]) -> BatchOp {
        BatchOp {
            idx1: idx as u32,
            idx2: NO_SECOND,
            params,
        }
    }

    pub fn pair(idx1: usize, idx2: usize, params: [i64; 4]) -> BatchOp {
        BatchOp {
            idx1: idx1 as u32,
            idx2: idx2 as u32,
            params,
        }
    }
}

/// Running totals over all submissions.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchStats {
    pub total_ops: u64,
    pub total_flushes: u64,
    pub total_tuples: u64,
    pub max_batch_reached: usize,
}

struct Trace {
    hash: Xxh3,
    ops: u64,
}

/// Owns the cipher key and executes batched submissions.
pub struct Dispatcher {
    cryptor: TupleCryptor,
    batch_ops: usize,
    crossings: u64,
    stats: BatchStats,
    trace: Option<Trace>,
}

impl Dispatcher {
    pub fn new(cryptor: TupleCryptor, config: &EngineConfig) -> Result<Dispatcher, ObliJoinError> {
        if config.batch_ops == 0 || config.batch_ops > MAX_BATCH_OPS {
            return Err(ObliJoinError::BatchCapacity {
                got: config.batch_ops,
                max: MAX_BATCH_OPS,
            });
        }
        Ok(Dispatcher {
            cryptor,
            batch_ops: config.batch_ops,
            crossings: 0,
            stats: BatchStats::default(),
            trace: config.record_trace.then(|| Trace {
                hash: Xxh3::new(),
                ops: 0,
            }),
        })
    }

    pub fn cryptor(&self) -> &TupleCryptor {
        &self.cryptor
    }

    /// Operations buffered per crossing.
    pub fn batch_capacity(&self) -> usize {
        self.batch_ops
    }

    /// Number of trusted-boundary crossings so far.
    pub fn crossings(&self) -> u64 {
        self.crossings
    }

    pub fn stats(&self) -> BatchStats {
        self.stats
    }

    /// Trace fingerprint, if recording is enabled.
    pub fn trace_digest(&self) -> Option<(u64, u64)> {
        self.trace.as_ref().map(|t| (t.hash.digest(), t.ops))
    }

    /// Apply `opcode` to every operation against the caller's tuple slots.
    ///
    /// Operations are chunked into crossings of at most the configured
    /// batch size; within and across chunks they apply strictly in order.
    pub fn submit(
        &mut self,
        tuples: &mut [Tuple],
        opcode: Opcode,
        ops: &[BatchOp],
    ) -> Result<(), ObliJoinError> {
        for chunk in ops.chunks(self.batch_ops.max(1)) {
            self.dispatch_chunk(tuples, opcode, chunk)?;
        }
        Ok(())
    }

    /// One crossing: gather the referenced tuples (deduplicated, in first
    /// use order), decrypt entrants, apply, re-encrypt, scatter back.
    fn dispatch_chunk(
        &mut self,
        tuples: &mut [Tuple],
        opcode: Opcode,
        ops: &[BatchOp],
    ) -> Result<(), ObliJoinError> {
        if ops.is_empty() {
            return Ok(());
        }

        // Dedup by tuple identity (slot index is identity here).
        let mut slot_of = std::collections::HashMap::with_capacity(ops.len() * 2);
        let mut origin: Vec<usize> = Vec::with_capacity(ops.len() * 2);
        let mut remapped: Vec<(u32, u32, [i64; 4])> = Vec::with_capacity(ops.len());

        let mut intern = |idx: u32| -> Result<u32, ObliJoinError> {
            let idx = idx as usize;
            if idx >= tuples.len() {
                return Err(ObliJoinError::InvalidOperands {
                    opcode: opcode.name(),
                    reason: format!("slot {idx} out of range (len {})", tuples.len()),
                });
            }
            Ok(*slot_of.entry(idx).or_insert_with(|| {
                origin.push(idx);
                (origin.len() - 1) as u32
            }))
        };

        for op in ops {
            let s1 = intern(op.idx1)?;
            let s2 = if op.idx2 == NO_SECOND {
                if opcode.is_binary() {
                    return Err(ObliJoinError::InvalidOperands {
                        opcode: opcode.name(),
                        reason: "missing second operand".into(),
                    });
                }
                NO_SECOND
            } else {
                intern(op.idx2)?
            };
            remapped.push((s1, s2, op.params));
            if let Some(trace) = &mut self.trace {
                trace.hash.update(&[opcode.tag()]);
                trace.hash.update(&op.idx1.to_le_bytes());
                trace.hash.update(&op.idx2.to_le_bytes());
                trace.ops += 1;
            }
        }

        // Gather, remembering which tuples entered encrypted.
        let mut buffer: Vec<Tuple> = origin.iter().map(|&i| tuples[i].clone()).collect();
        let entered_encrypted: Vec<bool> = buffer.iter().map(|t| t.is_encrypted).collect();
        for t in buffer.iter_mut().filter(|t| t.is_encrypted) {
            self.cryptor.decrypt(t)?;
        }

        for (s1, s2, params) in &remapped {
            if *s2 == NO_SECOND {
                apply_unary(opcode, &mut buffer[*s1 as usize], params)?;
            } else if s1 == s2 {
                return Err(ObliJoinError::InvalidOperands {
                    opcode: opcode.name(),
                    reason: "operands alias the same slot".into(),
                });
            } else {
                let (t1, t2) = pair_mut(&mut buffer, *s1 as usize, *s2 as usize);
                apply_binary(opcode, t1, t2, params)?;
            }
        }

        for (t, was) in buffer.iter_mut().zip(&entered_encrypted) {
            if *was {
                self.cryptor.encrypt(t)?;
            }
        }

        // Write back through the index mapping.
        for (slot, &idx) in origin.iter().enumerate() {
            tuples[idx] = buffer[slot].clone();
        }

        self.crossings += 1;
        self.stats.total_flushes += 1;
        self.stats.total_ops += ops.len() as u64;
        self.stats.total_tuples += origin.len() as u64;
        self.stats.max_batch_reached = self.stats.max_batch_reached.max(ops.len());
        Ok(())
    }

    /// Out-of-band size reduction: `dst_idx + final_mult` of `last`.
    pub fn obtain_output_size(&mut self, last: &Tuple) -> Result<i64, ObliJoinError> {
        let mut t = last.clone();
        if t.is_encrypted {
            self.cryptor.decrypt(&mut t)?;
        }
        if let Some(trace) = &mut self.trace {
            trace.hash.update(&[Opcode::ObtainOutputSize.tag()]);
            trace.ops += 1;
        }
        self.crossings += 1;
        self.stats.total_flushes += 1;
        Ok(t.dst_idx.saturating_add(t.final_mult))
    }

    /// Materialise `count` fresh padding tuples, encrypted when the owning
    /// table is encrypted. Zero-count calls perform no crossing.
    pub fn create_pads(
        &mut self,
        count: usize,
        kind: TupleKind,
        encrypted: bool,
    ) -> Result<Vec<Tuple>, ObliJoinError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let opcode = match kind {
            TupleKind::SortPad => Opcode::CreateSortPad,
            TupleKind::DistPad => Opcode::CreateDistPad,
            other => {
                return Err(ObliJoinError::InvalidOperands {
                    opcode: "CREATE_PAD",
                    reason: format!("{other:?} is not a padding kind"),
                });
            }
        };
        let mut pads = vec![Tuple::default(); count];
        let ops: Vec<BatchOp> = (0..count).map(|i| BatchOp::unary(i, [0; 4])).collect();
        self.submit(&mut pads, opcode, &ops)?;
        if encrypted {
            self.cryptor.encrypt_batch(&mut pads)?;
        }
        Ok(pads)
    }
}

fn pair_mut(buffer: &mut [Tuple], i: usize, j: usize) -> (&mut Tuple, &mut Tuple) {
    debug_assert_ne!(i, j);
    if i < j {
        let (a, b) = buffer.split_at_mut(j);
        (&mut a[i], &mut b[0])
    } else {
        let (a, b) = buffer.split_at_mut(i);
        (&mut b[0], &mut a[j])
    }
}

// ── Trusted-side transforms ────────────────────────────────────────────────

fn apply_unary(opcode: Opcode, t: &mut Tuple, params: &[i64; 4]) -> Result<(), ObliJoinError> {
    match opcode {
        Opcode::InitMeta => {
            t.set_kind(TupleKind::Target);
            t.set_openness(Openness::None);
            t.original_index = params[0];
            t.local_mult = 1;
            t.final_mult = 1;
            t.foreign_sum = 0;
            t.local_cumsum = 0;
            t.local_interval = 0;
            t.foreign_interval = 0;
            t.local_weight = 0;
            t.copy_index = 0;
            t.alignment_key = 0;
            t.dst_idx = 0;
            t.index = 0;
        }
        Opcode::InitFinalMultFromLocal => t.final_mult = t.local_mult,
        Opcode::InitCopyIndex => t.copy_index = 0,
        Opcode::InitDstIdx => t.dst_idx = 0,
        Opcode::InitIndex => t.index = 0,
        Opcode::InitStreamTemps => {
            let w = select_i64(t.is_source(), t.local_weight, 0);
            t.local_cumsum = w;
            t.foreign_sum = w;
            t.local_interval = 0;
            t.foreign_interval = 0;
        }
        Opcode::MakeSource => {
            t.set_kind(TupleKind::Source);
            t.set_openness(Openness::None);
            t.local_weight = select_i64(
                params[0] == WEIGHT_LOCAL_MULT,
                t.local_mult,
                t.local_weight,
            );
        }
        Opcode::MakeStart | Opcode::MakeEnd => {
            let kind = if opcode == Opcode::MakeStart {
                TupleKind::Start
            } else {
                TupleKind::End
            };
            let openness =
                Openness::from_code(params[1]).ok_or_else(|| ObliJoinError::InvalidOperands {
                    opcode: opcode.name(),
                    reason: format!("bad openness code {}", params[1]),
                })?;
            t.set_kind(kind);
            t.set_openness(openness);
            t.join_attr = t.join_attr.saturating_add(params[0]);
            t.local_weight = 0;
        }
        Opcode::MarkZeroMultPad => {
            t.kind = select_i64(t.final_mult == 0, TupleKind::DistPad.code(), t.kind);
        }
        Opcode::ComputeAlignmentKey => {
            let lm = select_i64(t.local_mult != 0, t.local_mult, 1);
            t.alignment_key = t.foreign_sum.saturating_add(t.copy_index / lm);
        }
        Opcode::ComputeForeignWeight => {
            let nonzero = t.local_interval != 0;
            let divisor = select_i64(nonzero, t.local_interval, 1);
            t.local_weight = select_i64(nonzero, t.final_mult / divisor, 0);
        }
        Opcode::CreateSortPad | Opcode::CreateDistPad => {
            let kind = if opcode == Opcode::CreateSortPad {
                TupleKind::SortPad
            } else {
                TupleKind::DistPad
            };
            *t = Tuple::default();
            t.set_kind(kind);
            t.local_mult = 0;
            t.final_mult = 0;
        }
        Opcode::SetJoinAttrFromCol => {
            let col = params[0];
            if !(0..MAX_ATTRS as i64).contains(&col) {
                return Err(ObliJoinError::InvalidOperands {
                    opcode: opcode.name(),
                    reason: format!("column index {col} out of range"),
                });
            }
            t.join_attr = t.attributes[col as usize];
        }
        other => {
            return Err(ObliJoinError::InvalidOperands {
                opcode: other.name(),
                reason: "not a unary opcode".into(),
            });
        }
    }
    Ok(())
}

fn apply_binary(
    opcode: Opcode,
    t1: &mut Tuple,
    t2: &mut Tuple,
    params: &[i64; 4],
) -> Result<(), ObliJoinError> {
    match opcode {
        // Compare-and-swap step of the bitonic network. `params[0]` is the
        // ascending flag of the network position.
        Opcode::CmpJoinAttr
        | Opcode::CmpJoinThenOther
        | Opcode::CmpPairwise
        | Opcode::CmpEndFirst
        | Opcode::CmpPadLast
        | Opcode::CmpAlignmentKey => {
            let ascending = params[0] != 0;
            let out_of_order = match compare(opcode, t1, t2) {
                Ordering::Greater => ascending,
                Ordering::Less => !ascending,
                Ordering::Equal => false,
            };
            swap_payload_if(out_of_order, t1, t2);
        }

        // Routing step of the distribution network: a real payload moves
        // forward by the stride when its destination is at or beyond the
        // partner slot and the partner holds padding. Slot indices stay
        // with their slots.
        Opcode::DistributeSwap => {
            let advance = !t1.is_padding() && t2.is_dist_pad() && t1.dst_idx >= t2.index;
            let (i1, i2) = (t1.index, t2.index);
            swap_payload_if(advance, t1, t2);
            t1.index = i1;
            t2.index = i2;
        }

        // Prefix sums over Source weights; boundary entries contribute zero
        // (their scratch was seeded to zero) and capture the running value.
        Opcode::WinLocalCumsum => {
            t2.local_cumsum = t2.local_cumsum.saturating_add(t1.local_cumsum);
        }
        Opcode::WinForeignSum => {
            t2.foreign_sum = t2.foreign_sum.saturating_add(t1.foreign_sum);
        }

        // After the pairwise sort each Start is immediately followed by its
        // End; the interval lands on the End entry.
        Opcode::WinLocalInterval => {
            let paired = t1.is_start() && t2.is_end() && t1.original_index == t2.original_index;
            t2.local_interval = select_i64(
                paired,
                t2.local_cumsum.saturating_sub(t1.local_cumsum),
                t2.local_interval,
            );
        }
        Opcode::WinForeignInterval => {
            let paired = t1.is_start() && t2.is_end() && t1.original_index == t2.original_index;
            t2.foreign_interval = select_i64(
                paired,
                t2.foreign_sum.saturating_sub(t1.foreign_sum),
                t2.foreign_interval,
            );
            // The End also inherits the Start's captured prefix: it is the
            // base of the tuple's parent-group numbering.
            t2.foreign_sum = select_i64(paired, t1.foreign_sum, t2.foreign_sum);
        }

        Opcode::WinComputeDstIdx => {
            t2.dst_idx = t1.dst_idx.saturating_add(t1.final_mult);
        }
        Opcode::WinCopyIndex => {
            let same_run = t1.original_index == t2.original_index;
            t2.copy_index = select_i64(same_run, t1.copy_index + 1, 0);
        }
        Opcode::WinIndexInc => {
            t2.index = t1.index + 1;
        }
        Opcode::WinExpandCopy => {
            let fill = t2.is_dist_pad();
            let slot = t2.index;
            copy_payload_if(fill, t1, t2);
            t2.index = slot;
        }

        Opcode::ConcatAttrs => {
            let (lw, rw) = (params[0], params[1]);
            if lw < 0 || rw < 0 || lw + rw > MAX_ATTRS as i64 {
                return Err(ObliJoinError::InvalidOperands {
                    opcode: opcode.name(),
                    reason: format!("widths {lw}+{rw} exceed the attribute capacity"),
                });
            }
            let (lw, rw) = (lw as usize, rw as usize);
            let right = t2.attributes;
            t1.attributes[lw..lw + rw].copy_from_slice(&right[..rw]);
        }

        Opcode::UpdateTargetLocalMult => {
            t2.local_mult = t2.local_mult.saturating_mul(t1.local_interval);
        }
        Opcode::UpdateTargetInterval => {
            t2.local_interval = t1.local_interval;
        }
        Opcode::UpdateTargetFinalMult => {
            t2.final_mult = t2.local_mult.saturating_mul(t1.foreign_interval);
            t2.foreign_sum = t1.foreign_sum;
        }

        other => {
            return Err(ObliJoinError::InvalidOperands {
                opcode: other.name(),
                reason: "not a binary opcode".into(),
            });
        }
    }
    Ok(())
}

// ── Comparator key orders ──────────────────────────────────────────────────

/// Boundary class at equal join values. The order makes the prefix sum
/// include a collocated Source exactly when the endpoint is closed:
/// an open End and a closed Start read the running sum *before* the
/// Source's contribution; an open Start and a closed End read it *after*.
fn stream_class(t: &Tuple) -> i64 {
    if t.is_start() {
        if t.openness == Openness::Closed.code() {
            1
        } else {
            3
        }
    } else if t.is_end() {
        if t.openness == Openness::Open.code() {
            0
        } else {
            4
        }
    } else {
        2
    }
}

fn compare(opcode: Opcode, a: &Tuple, b: &Tuple) -> Ordering {
    // Bitonic padding sorts last under every comparator.
    let pad = a.is_sort_pad().cmp(&b.is_sort_pad());
    match opcode {
        Opcode::CmpJoinAttr => pad
            .then(a.join_attr.cmp(&b.join_attr))
            .then(stream_class(a).cmp(&stream_class(b)))
            .then(a.original_index.cmp(&b.original_index))
            .then(a.kind.cmp(&b.kind)),

        Opcode::CmpJoinThenOther => pad
            .then(a.join_attr.cmp(&b.join_attr))
            .then(a.attributes.cmp(&b.attributes))
            .then(a.original_index.cmp(&b.original_index))
            .then(a.copy_index.cmp(&b.copy_index)),

        // Boundaries first, grouped per originating row, Start before End
        // (the kind codes order that way); Sources trail.
        Opcode::CmpPairwise => pad
            .then((!(a.is_start() || a.is_end())).cmp(&!(b.is_start() || b.is_end())))
            .then(a.original_index.cmp(&b.original_index))
            .then(a.kind.cmp(&b.kind))
            .then(a.join_attr.cmp(&b.join_attr)),

        Opcode::CmpEndFirst => pad
            .then((!a.is_end()).cmp(&!b.is_end()))
            .then(a.original_index.cmp(&b.original_index))
            .then(a.kind.cmp(&b.kind))
            .then(a.join_attr.cmp(&b.join_attr)),

        // Real rows in original order, then distribution padding, then
        // bitonic padding.
        Opcode::CmpPadLast => {
            let rank = |t: &Tuple| -> i64 {
                if t.is_sort_pad() {
                    2
                } else if t.is_dist_pad() {
                    1
                } else {
                    0
                }
            };
            rank(a)
                .cmp(&rank(b))
                .then(a.original_index.cmp(&b.original_index))
                .then(a.kind.cmp(&b.kind))
        }

        Opcode::CmpAlignmentKey => pad
            .then(a.alignment_key.cmp(&b.alignment_key))
            .then(a.original_index.cmp(&b.original_index))
            .then(a.copy_index.cmp(&b.copy_index)),

        _ => unreachable!("not a comparator opcode"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(TupleCryptor::generate(), &EngineConfig::quiet()).unwrap()
    }

    fn traced_dispatcher() -> Dispatcher {
        Dispatcher::new(TupleCryptor::generate(), &EngineConfig::quiet().with_trace()).unwrap()
    }

    fn row(join_attr: i64, original_index: i64) -> Tuple {
        let mut t = Tuple::default();
        t.join_attr = join_attr;
        t.original_index = original_index;
        t.local_mult = 1;
        t
    }

    // ── Stream class ordering ───────────────────────────────────────

    #[test]
    fn test_stream_class_tie_breaks() {
        let mut start_closed = row(5, 0);
        start_closed.set_kind(TupleKind::Start);
        start_closed.set_openness(Openness::Closed);
        let mut start_open = start_closed.clone();
        start_open.set_openness(Openness::Open);
        let mut end_closed = row(5, 0);
        end_closed.set_kind(TupleKind::End);
        end_closed.set_openness(Openness::Closed);
        let mut end_open = end_closed.clone();
        end_open.set_openness(Openness::Open);
        let mut source = row(5, 1);
        source.set_kind(TupleKind::Source);

        assert!(stream_class(&end_open) < stream_class(&start_closed));
        assert!(stream_class(&start_closed) < stream_class(&source));
        assert!(stream_class(&source) < stream_class(&start_open));
        assert!(stream_class(&start_open) < stream_class(&end_closed));
    }

    #[test]
    fn test_cmp_join_attr_orders_by_value_first() {
        let a = row(3, 9);
        let b = row(7, 0);
        assert_eq!(compare(Opcode::CmpJoinAttr, &a, &b), Ordering::Less);
    }

    #[test]
    fn test_sort_pad_last_under_every_comparator() {
        let mut pad = Tuple::default();
        pad.set_kind(TupleKind::SortPad);
        pad.join_attr = i64::MIN;
        let real = row(i64::MAX, 0);
        for op in [
            Opcode::CmpJoinAttr,
            Opcode::CmpJoinThenOther,
            Opcode::CmpPairwise,
            Opcode::CmpEndFirst,
            Opcode::CmpPadLast,
            Opcode::CmpAlignmentKey,
        ] {
            assert_eq!(compare(op, &real, &pad), Ordering::Less, "{op:?}");
        }
    }

    // ── Window functions ────────────────────────────────────────────

    #[test]
    fn test_window_cumsum_accumulates_sources_only() {
        let mut d = dispatcher();
        let mut tuples: Vec<Tuple> = (0..4)
            .map(|i| {
                let mut t = row(i, i);
                t.set_kind(TupleKind::Source);
                t.local_mult = 2;
                t
            })
            .collect();
        tuples[2].set_kind(TupleKind::Start); // contributes nothing

        let init: Vec<BatchOp> = (0..4).map(|i| BatchOp::unary(i, [0; 4])).collect();
        // Sources need their weight before seeding the scratch.
        d.submit(&mut tuples, Opcode::MakeSource, &[
            BatchOp::unary(0, [WEIGHT_LOCAL_MULT, 0, 0, 0]),
            BatchOp::unary(1, [WEIGHT_LOCAL_MULT, 0, 0, 0]),
            BatchOp::unary(3, [WEIGHT_LOCAL_MULT, 0, 0, 0]),
        ])
        .unwrap();
        d.submit(&mut tuples, Opcode::InitStreamTemps, &init).unwrap();
        let windows: Vec<BatchOp> = (0..3).map(|i| BatchOp::pair(i, i + 1, [0; 4])).collect();
        d.submit(&mut tuples, Opcode::WinLocalCumsum, &windows).unwrap();

        assert_eq!(tuples[0].local_cumsum, 2);
        assert_eq!(tuples[1].local_cumsum, 4);
        assert_eq!(tuples[2].local_cumsum, 4); // boundary captures, adds 0
        assert_eq!(tuples[3].local_cumsum, 6);
    }

    #[test]
    fn test_window_interval_lands_on_end() {
        let mut start = row(0, 7);
        start.set_kind(TupleKind::Start);
        start.local_cumsum = 3;
        let mut end = row(0, 7);
        end.set_kind(TupleKind::End);
        end.local_cumsum = 9;

        apply_binary(Opcode::WinLocalInterval, &mut start, &mut end, &[0; 4]).unwrap();
        assert_eq!(end.local_interval, 6);

        // Mismatched back-pointers leave the interval untouched.
        let mut other_end = row(0, 8);
        other_end.set_kind(TupleKind::End);
        other_end.local_cumsum = 9;
        other_end.local_interval = -1;
        apply_binary(Opcode::WinLocalInterval, &mut start, &mut other_end, &[0; 4]).unwrap();
        assert_eq!(other_end.local_interval, -1);
    }

    #[test]
    fn test_window_dst_idx_is_exclusive_prefix() {
        let mut d = dispatcher();
        let mut tuples: Vec<Tuple> = (0..3).map(|i| row(0, i)).collect();
        tuples[0].final_mult = 2;
        tuples[1].final_mult = 0;
        tuples[2].final_mult = 3;

        let init: Vec<BatchOp> = (0..3).map(|i| BatchOp::unary(i, [0; 4])).collect();
        d.submit(&mut tuples, Opcode::InitDstIdx, &init).unwrap();
        let windows: Vec<BatchOp> = (0..2).map(|i| BatchOp::pair(i, i + 1, [0; 4])).collect();
        d.submit(&mut tuples, Opcode::WinComputeDstIdx, &windows).unwrap();

        assert_eq!(tuples[0].dst_idx, 0);
        assert_eq!(tuples[1].dst_idx, 2);
        assert_eq!(tuples[2].dst_idx, 2);
        assert_eq!(d.obtain_output_size(&tuples[2]).unwrap(), 5);
    }

    #[test]
    fn test_copy_index_runs() {
        let mut a = row(0, 4);
        a.copy_index = 2;
        let mut b = row(0, 4);
        apply_binary(Opcode::WinCopyIndex, &mut a, &mut b, &[0; 4]).unwrap();
        assert_eq!(b.copy_index, 3);

        let mut c = row(0, 5);
        c.copy_index = 99;
        apply_binary(Opcode::WinCopyIndex, &mut b, &mut c, &[0; 4]).unwrap();
        assert_eq!(c.copy_index, 0);
    }

    #[test]
    fn test_expand_copy_fills_padding_and_keeps_slot() {
        let mut src = row(11, 3);
        src.index = 4;
        let mut pad = Tuple::default();
        pad.set_kind(TupleKind::DistPad);
        pad.index = 5;

        apply_binary(Opcode::WinExpandCopy, &mut src, &mut pad, &[0; 4]).unwrap();
        assert_eq!(pad.join_attr, 11);
        assert_eq!(pad.original_index, 3);
        assert!(pad.is_kind(TupleKind::Target));
        assert_eq!(pad.index, 5);

        // A real row is never overwritten.
        let mut real = row(99, 8);
        real.index = 6;
        apply_binary(Opcode::WinExpandCopy, &mut src, &mut real, &[0; 4]).unwrap();
        assert_eq!(real.join_attr, 99);
    }

    #[test]
    fn test_distribute_swap_respects_destination_and_padding() {
        let mut mover = row(1, 0);
        mover.dst_idx = 2;
        mover.index = 0;
        let mut pad = Tuple::default();
        pad.set_kind(TupleKind::DistPad);
        pad.index = 2;

        apply_binary(Opcode::DistributeSwap, &mut mover, &mut pad, &[2, 0, 0, 0]).unwrap();
        assert!(mover.is_dist_pad());
        assert!(pad.is_kind(TupleKind::Target));
        assert_eq!(mover.index, 0);
        assert_eq!(pad.index, 2);

        // Destination before the partner slot: no movement.
        let mut stayer = row(1, 1);
        stayer.dst_idx = 1;
        stayer.index = 0;
        let mut pad2 = Tuple::default();
        pad2.set_kind(TupleKind::DistPad);
        pad2.index = 2;
        apply_binary(Opcode::DistributeSwap, &mut stayer, &mut pad2, &[2, 0, 0, 0]).unwrap();
        assert!(stayer.is_kind(TupleKind::Target));
    }

    #[test]
    fn test_foreign_weight_division() {
        let mut t = row(0, 0);
        t.final_mult = 6;
        t.local_interval = 3;
        apply_unary(Opcode::ComputeForeignWeight, &mut t, &[0; 4]).unwrap();
        assert_eq!(t.local_weight, 2);

        t.local_interval = 0;
        apply_unary(Opcode::ComputeForeignWeight, &mut t, &[0; 4]).unwrap();
        assert_eq!(t.local_weight, 0);
    }

    #[test]
    fn test_make_boundaries_apply_deviation_and_openness() {
        let mut start = row(10, 2);
        apply_unary(
            Opcode::MakeStart,
            &mut start,
            &[-3, Openness::Open.code(), 0, 0],
        )
        .unwrap();
        assert!(start.is_start());
        assert_eq!(start.join_attr, 7);
        assert_eq!(start.openness, Openness::Open.code());

        let mut end = row(10, 2);
        apply_unary(
            Opcode::MakeEnd,
            &mut end,
            &[i64::MAX, Openness::Closed.code(), 0, 0],
        )
        .unwrap();
        assert_eq!(end.join_attr, i64::MAX); // saturates at the domain edge
    }

    // ── Dispatcher mechanics ────────────────────────────────────────

    #[test]
    fn test_submit_chunks_into_crossings() {
        let mut config = EngineConfig::quiet();
        config.batch_ops = 4;
        let mut d = Dispatcher::new(TupleCryptor::generate(), &config).unwrap();

        let mut tuples: Vec<Tuple> = (0..10).map(|i| row(i, i)).collect();
        let ops: Vec<BatchOp> = (0..10).map(|i| BatchOp::unary(i, [0; 4])).collect();
        d.submit(&mut tuples, Opcode::InitCopyIndex, &ops).unwrap();

        assert_eq!(d.crossings(), 3); // 4 + 4 + 2
        assert_eq!(d.stats().total_ops, 10);
        assert_eq!(d.stats().max_batch_reached, 4);
    }

    #[test]
    fn test_submit_preserves_encryption_state() {
        let mut d = dispatcher();
        let mut tuples = vec![row(1, 0), row(2, 1)];
        d.cryptor.encrypt(&mut tuples[1]).unwrap();

        let ops = vec![BatchOp::unary(0, [0; 4]), BatchOp::unary(1, [0; 4])];
        d.submit(&mut tuples, Opcode::InitCopyIndex, &ops).unwrap();

        assert!(!tuples[0].is_encrypted);
        assert!(tuples[1].is_encrypted);

        // The encrypted tuple was actually transformed.
        let mut t = tuples[1].clone();
        d.cryptor.decrypt(&mut t).unwrap();
        assert_eq!(t.copy_index, 0);
        assert_eq!(t.join_attr, 2);
    }

    #[test]
    fn test_dedup_applies_dependent_ops_in_order() {
        let mut d = dispatcher();
        let mut tuples = vec![row(0, 0), row(0, 1), row(0, 2)];
        tuples[0].index = 0;
        // Chained increments through a shared middle slot.
        let ops = vec![BatchOp::pair(0, 1, [0; 4]), BatchOp::pair(1, 2, [0; 4])];
        d.submit(&mut tuples, Opcode::WinIndexInc, &ops).unwrap();
        assert_eq!(tuples[1].index, 1);
        assert_eq!(tuples[2].index, 2);
        assert_eq!(d.stats().total_tuples, 3); // deduplicated gather
    }

    #[test]
    fn test_out_of_range_slot_rejected() {
        let mut d = dispatcher();
        let mut tuples = vec![row(0, 0)];
        let err = d
            .submit(&mut tuples, Opcode::InitCopyIndex, &[BatchOp::unary(5, [0; 4])])
            .unwrap_err();
        assert!(matches!(err, ObliJoinError::InvalidOperands { .. }));
    }

    #[test]
    fn test_binary_opcode_requires_second_operand() {
        let mut d = dispatcher();
        let mut tuples = vec![row(0, 0), row(1, 1)];
        let err = d
            .submit(&mut tuples, Opcode::WinIndexInc, &[BatchOp::unary(0, [0; 4])])
            .unwrap_err();
        assert!(matches!(err, ObliJoinError::InvalidOperands { .. }));
    }

    #[test]
    fn test_trace_fingerprint_depends_on_indices_not_values() {
        let run = |values: &[i64]| -> (u64, u64) {
            let mut d = traced_dispatcher();
            let mut tuples: Vec<Tuple> = values.iter().map(|&v| row(v, 0)).collect();
            let ops: Vec<BatchOp> = (0..tuples.len())
                .map(|i| BatchOp::unary(i, [0; 4]))
                .collect();
            d.submit(&mut tuples, Opcode::InitCopyIndex, &ops).unwrap();
            d.trace_digest().unwrap()
        };

        assert_eq!(run(&[1, 2, 3]), run(&[9, -4, 100]));
        assert_ne!(run(&[1, 2, 3]), run(&[1, 2, 3, 4]));
    }

    #[test]
    fn test_create_pads() {
        let mut d = dispatcher();
        let pads = d.create_pads(3, TupleKind::DistPad, false).unwrap();
        assert_eq!(pads.len(), 3);
        assert!(pads.iter().all(|p| p.is_dist_pad()));

        let sealed = d.create_pads(2, TupleKind::SortPad, true).unwrap();
        assert!(sealed.iter().all(|p| p.is_encrypted));

        assert!(d.create_pads(1, TupleKind::Target, false).is_err());
        assert!(d.create_pads(0, TupleKind::SortPad, false).unwrap().is_empty());
    }
}
