//! Branch-free conditional moves.
//!
//! The data-dependent decisions inside the trusted boundary (comparator
//! swaps, distribution routing, expansion copies) go through these helpers
//! so that the executed instruction sequence does not depend on the
//! condition.

use crate::tuple::Tuple;

/// `if cond { a } else { b }` without a branch.
#[inline]
pub(crate) fn select_i64(cond: bool, a: i64, b: i64) -> i64 {
    let mask = -(cond as i64);
    (a & mask) | (b & !mask)
}

/// Swap the payloads of two tuples when `cond` holds.
///
/// Both payloads are always read and written in full.
#[inline]
pub(crate) fn swap_payload_if(cond: bool, a: &mut Tuple, b: &mut Tuple) {
    let mask = -(cond as i64);
    let mut wa = a.payload_words();
    let mut wb = b.payload_words();
    for (x, y) in wa.iter_mut().zip(wb.iter_mut()) {
        let diff = (*x ^ *y) & mask;
        *x ^= diff;
        *y ^= diff;
    }
    a.set_payload_words(&wa);
    b.set_payload_words(&wb);
}

/// Overwrite `dst`'s payload with `src`'s when `cond` holds.
#[inline]
pub(crate) fn copy_payload_if(cond: bool, src: &Tuple, dst: &mut Tuple) {
    let mask = -(cond as i64);
    let ws = src.payload_words();
    let mut wd = dst.payload_words();
    for (s, d) in ws.iter().zip(wd.iter_mut()) {
        *d = (*s & mask) | (*d & !mask);
    }
    dst.set_payload_words(&wd);
}
