//! Tables and their oblivious primitives.
//!
//! An [`ObliviousTable`] owns a vector of fixed-shape tuples and a schema.
//! Every primitive has the same contract: its sequence of data-plane
//! accesses — which slots are touched, in which order, by which opcode —
//! is a function of input *sizes* only, never of tuple contents. All
//! content-dependent work happens inside the dispatcher.

use crate::batch::BatchCollector;
use crate::dispatch::{BatchOp, Dispatcher, Opcode};
use crate::error::ObliJoinError;
use crate::schema::Schema;
use crate::tuple::{EncryptionStatus, Tuple, TupleKind};

/// A named table of fixed-shape tuples.
#[derive(Debug, Clone, Default)]
pub struct ObliviousTable {
    name: String,
    schema: Schema,
    tuples: Vec<Tuple>,
}

impl ObliviousTable {
    pub fn new<S: Into<String>>(name: S, schema: Schema) -> ObliviousTable {
        ObliviousTable {
            name: name.into(),
            schema,
            tuples: Vec::new(),
        }
    }

    pub fn with_tuples<S: Into<String>>(
        name: S,
        schema: Schema,
        tuples: Vec<Tuple>,
    ) -> ObliviousTable {
        ObliviousTable {
            name: name.into(),
            schema,
            tuples,
        }
    }

    /// Load plaintext rows, stamping each tuple's `original_index` with its
    /// position.
    pub fn from_rows<S: Into<String>>(
        name: S,
        schema: Schema,
        rows: &[Vec<i64>],
    ) -> ObliviousTable {
        let tuples = rows
            .iter()
            .enumerate()
            .map(|(i, row)| {
                let mut t = Tuple::from_attributes(row);
                t.original_index = i as i64;
                t.local_mult = 1;
                t.final_mult = 1;
                t
            })
            .collect();
        ObliviousTable {
            name: name.into(),
            schema,
            tuples,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name<S: Into<String>>(&mut self, name: S) {
        self.name = name.into();
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }

    pub fn tuples(&self) -> &[Tuple] {
        &self.tuples
    }

    pub fn tuples_mut(&mut self) -> &mut [Tuple] {
        &mut self.tuples
    }

    pub fn into_tuples(self) -> Vec<Tuple> {
        self.tuples
    }

    pub fn push(&mut self, tuple: Tuple) {
        self.tuples.push(tuple);
    }

    pub fn truncate(&mut self, len: usize) {
        self.tuples.truncate(len);
    }

    /// Aggregate encryption state. An empty table is vacuously uniform and
    /// reports `AllPlaintext`.
    pub fn encryption_status(&self) -> EncryptionStatus {
        let mut iter = self.tuples.iter();
        let Some(first) = iter.next() else {
            return EncryptionStatus::AllPlaintext;
        };
        if iter.any(|t| t.is_encrypted != first.is_encrypted) {
            EncryptionStatus::Mixed
        } else if first.is_encrypted {
            EncryptionStatus::AllEncrypted
        } else {
            EncryptionStatus::AllPlaintext
        }
    }

    fn is_encrypted(&self) -> Result<bool, ObliJoinError> {
        match self.encryption_status() {
            EncryptionStatus::AllEncrypted => Ok(true),
            EncryptionStatus::AllPlaintext => Ok(false),
            EncryptionStatus::Mixed => Err(ObliJoinError::MixedEncryption {
                phase: "primitive",
                node: self.name.clone(),
            }),
        }
    }

    // ── Oblivious primitives ─────────────────────────────────────────────

    /// Apply one transform to every tuple independently.
    pub fn map(
        &mut self,
        dispatcher: &mut Dispatcher,
        opcode: Opcode,
        params: [i64; 4],
    ) -> Result<(), ObliJoinError> {
        let mut collector = BatchCollector::new(dispatcher, opcode);
        for i in 0..self.tuples.len() {
            collector.push(&mut self.tuples, BatchOp::unary(i, params))?;
        }
        collector.flush(&mut self.tuples)
    }

    /// [`Opcode::InitMeta`] over the whole table, stamping each row's
    /// position as its `original_index`.
    pub fn init_meta(&mut self, dispatcher: &mut Dispatcher) -> Result<(), ObliJoinError> {
        let mut collector = BatchCollector::new(dispatcher, Opcode::InitMeta);
        for i in 0..self.tuples.len() {
            collector.push(&mut self.tuples, BatchOp::unary(i, [i as i64, 0, 0, 0]))?;
        }
        collector.flush(&mut self.tuples)
    }

    /// Stream a window of two over the table, in order. The `i`-th step
    /// sees the mutations of the `(i-1)`-th, which is what makes prefix
    /// sums work; it is intrinsically sequential.
    pub fn linear_pass(
        &mut self,
        dispatcher: &mut Dispatcher,
        opcode: Opcode,
    ) -> Result<(), ObliJoinError> {
        if self.tuples.len() < 2 {
            return Ok(());
        }
        let mut collector = BatchCollector::new(dispatcher, opcode);
        for i in 0..self.tuples.len() - 1 {
            collector.push(&mut self.tuples, BatchOp::pair(i, i + 1, [0; 4]))?;
        }
        collector.flush(&mut self.tuples)
    }

    /// Apply a pair transform to `(self[i], other[i])` for every `i`.
    /// By convention `self` provides data and `other` is the update target.
    pub fn parallel_pass(
        &self,
        other: &mut ObliviousTable,
        dispatcher: &mut Dispatcher,
        opcode: Opcode,
    ) -> Result<(), ObliJoinError> {
        let n = self.tuples.len();
        if n != other.tuples.len() {
            return Err(ObliJoinError::LengthMismatch {
                op: "parallel_pass",
                left: n,
                right: other.tuples.len(),
            });
        }
        if n == 0 {
            return Ok(());
        }
        let mut combined: Vec<Tuple> = self
            .tuples
            .iter()
            .chain(other.tuples.iter())
            .cloned()
            .collect();
        let mut collector = BatchCollector::new(dispatcher, opcode);
        for i in 0..n {
            collector.push(&mut combined, BatchOp::pair(i, n + i, [0; 4]))?;
        }
        collector.flush(&mut combined)?;
        other.tuples = combined.split_off(n);
        Ok(())
    }

    /// Apply a pair transform to `(self[i], self[i + stride])` for every
    /// valid `i`, highest `i` first.
    ///
    /// The descending order matters for routing: a payload vacating its
    /// slot must be visible to the pair on its left within the same
    /// stride, since rows that still have to advance always sit to the
    /// right of rows that don't.
    pub fn distribute_pass(
        &mut self,
        dispatcher: &mut Dispatcher,
        stride: usize,
        opcode: Opcode,
    ) -> Result<(), ObliJoinError> {
        if stride == 0 || self.tuples.len() <= stride {
            return Ok(());
        }
        let mut collector = BatchCollector::new(dispatcher, opcode);
        for i in (0..self.tuples.len() - stride).rev() {
            collector.push(
                &mut self.tuples,
                BatchOp::pair(i, i + stride, [stride as i64, 0, 0, 0]),
            )?;
        }
        collector.flush(&mut self.tuples)
    }

    /// Batcher's bitonic network on `next_power_of_two(n)` slots.
    ///
    /// The padding count is recomputed at every call; padding tuples sort
    /// last under every comparator and are truncated away afterwards. The
    /// network is a fixed schedule of compare-and-swap steps, identical for
    /// every input of the same length. Not stable — callers break ties in
    /// the comparator.
    pub fn bitonic_sort(
        &mut self,
        dispatcher: &mut Dispatcher,
        opcode: Opcode,
    ) -> Result<(), ObliJoinError> {
        let n = self.tuples.len();
        if n <= 1 {
            return Ok(());
        }
        let padded = n.next_power_of_two();
        let encrypted = self.is_encrypted()?;
        let pads = dispatcher.create_pads(padded - n, TupleKind::SortPad, encrypted)?;
        self.tuples.extend(pads);

        let mut collector = BatchCollector::new(dispatcher, opcode);
        let mut k = 2;
        while k <= padded {
            let mut j = k / 2;
            while j >= 1 {
                for i in 0..padded {
                    let partner = i ^ j;
                    if partner > i {
                        let ascending = (i & k) == 0;
                        collector.push(
                            &mut self.tuples,
                            BatchOp::pair(i, partner, [ascending as i64, 0, 0, 0]),
                        )?;
                    }
                }
                j /= 2;
            }
            k *= 2;
        }
        collector.flush(&mut self.tuples)?;
        self.tuples.truncate(n);
        Ok(())
    }

    /// Row-wise concatenation of two equal-length tables.
    ///
    /// The result's schema is `left`'s followed by `right`'s; row `i`
    /// carries `left[i]`'s attributes followed by `right[i]`'s. Metadata
    /// fields take the left (accumulator) side's values. The attribute
    /// splice happens inside the trusted boundary — ciphertext cannot be
    /// merged across tuples.
    pub fn horizontal_concat(
        left: &ObliviousTable,
        right: &ObliviousTable,
        dispatcher: &mut Dispatcher,
    ) -> Result<ObliviousTable, ObliJoinError> {
        if left.len() != right.len() {
            return Err(ObliJoinError::LengthMismatch {
                op: "horizontal_concat",
                left: left.len(),
                right: right.len(),
            });
        }
        let schema = left.schema.concat(&right.schema)?;
        let left_width = left.schema.width() as i64;
        let right_width = right.schema.width() as i64;

        let n = left.len();
        let mut combined: Vec<Tuple> = left
            .tuples
            .iter()
            .chain(right.tuples.iter())
            .cloned()
            .collect();
        let mut collector = BatchCollector::new(dispatcher, Opcode::ConcatAttrs);
        for i in 0..n {
            collector.push(
                &mut combined,
                BatchOp::pair(i, n + i, [left_width, right_width, 0, 0]),
            )?;
        }
        collector.flush(&mut combined)?;
        combined.truncate(n);
        Ok(ObliviousTable {
            name: left.name.clone(),
            schema,
            tuples: combined,
        })
    }
}
