//! Operation batching.
//!
//! Primitives generate far more operations than it is affordable to cross
//! the trusted boundary for — a bitonic sort alone is `O(n log²n)`
//! compare-and-swap steps. The collector buffers operations against a tuple
//! slice and flushes them as full crossings: automatically whenever the
//! buffer reaches the dispatcher's batch capacity, and explicitly at the
//! end of the primitive. Operations apply strictly in push order, so
//! chained windows and multi-layer sort schedules batch safely.

use crate::dispatch::{BatchOp, Dispatcher, Opcode};
use crate::error::ObliJoinError;
use crate::tuple::Tuple;

/// Buffers operations for one opcode and flushes them in capacity-sized
/// crossings.
pub struct BatchCollector<'d> {
    dispatcher: &'d mut Dispatcher,
    opcode: Opcode,
    pending: Vec<BatchOp>,
}

impl<'d> BatchCollector<'d> {
    pub fn new(dispatcher: &'d mut Dispatcher, opcode: Opcode) -> BatchCollector<'d> {
        let capacity = dispatcher.batch_capacity();
        BatchCollector {
            dispatcher,
            opcode,
            pending: Vec::with_capacity(capacity),
        }
    }

    /// Queue one operation; flushes when the buffer is full.
    pub fn push(&mut self, tuples: &mut [Tuple], op: BatchOp) -> Result<(), ObliJoinError> {
        self.pending.push(op);
        if self.pending.len() >= self.dispatcher.batch_capacity() {
            self.flush(tuples)?;
        }
        Ok(())
    }

    /// Submit everything still buffered. Must be called before the
    /// collector goes out of scope. The buffer is cleared even when the
    /// submission fails — the execution is aborting anyway.
    pub fn flush(&mut self, tuples: &mut [Tuple]) -> Result<(), ObliJoinError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let pending = std::mem::take(&mut self.pending);
        let result = self.dispatcher.submit(tuples, self.opcode, &pending);
        if result.is_ok() {
            // Hand the allocation back for the next fill.
            self.pending = pending;
            self.pending.clear();
        }
        result
    }
}

impl Drop for BatchCollector<'_> {
    fn drop(&mut self) {
        // Flushing needs the tuple slice, so it cannot happen here.
        debug_assert!(
            self.pending.is_empty(),
            "BatchCollector dropped with {} pending operations",
            self.pending.len()
        );
    }
}
