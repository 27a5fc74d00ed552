//! Fixed-shape tuples.
//!
//! Every tuple in the engine has the same in-memory shape regardless of the
//! schema of the relation it belongs to: a fixed block of metadata counters
//! followed by a fixed-capacity attribute array. Oblivious primitives move
//! tuples bit-for-bit, so nothing about a tuple's size or layout may depend
//! on its contents.
//!
//! The `kind` and `openness` discriminants are stored as raw `i64` codes
//! rather than Rust enums: while a tuple is encrypted these fields hold
//! ciphertext, and the cipher transforms the whole payload uniformly as a
//! word array (see [`Tuple::payload_words`]).

use serde::{Deserialize, Serialize};

/// Fixed capacity of the attribute array.
pub const MAX_ATTRS: usize = 32;

/// Number of 64-bit payload words covered by the tuple cipher:
/// 15 metadata words plus the attribute array.
pub const PAYLOAD_WORDS: usize = 15 + MAX_ATTRS;

/// Role of a tuple within a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TupleKind {
    /// Bitonic-network padding; sorts last under every comparator.
    SortPad,
    /// Weight-carrying entry of a combined stream.
    Source,
    /// Lower boundary marker of a band interval.
    Start,
    /// Upper boundary marker of a band interval.
    End,
    /// Ordinary row of a relation.
    Target,
    /// Placeholder slot created by the distribute-expand phase.
    DistPad,
}

impl TupleKind {
    pub fn code(self) -> i64 {
        match self {
            TupleKind::SortPad => 0,
            TupleKind::Source => 1,
            TupleKind::Start => 2,
            TupleKind::End => 3,
            TupleKind::Target => 4,
            TupleKind::DistPad => 5,
        }
    }

    pub fn from_code(code: i64) -> Option<TupleKind> {
        match code {
            0 => Some(TupleKind::SortPad),
            1 => Some(TupleKind::Source),
            2 => Some(TupleKind::Start),
            3 => Some(TupleKind::End),
            4 => Some(TupleKind::Target),
            5 => Some(TupleKind::DistPad),
            _ => None,
        }
    }
}

/// Whether a boundary endpoint includes its own value.
///
/// Only meaningful on `Start`/`End` tuples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Openness {
    None,
    Closed,
    Open,
}

impl Openness {
    pub fn code(self) -> i64 {
        match self {
            Openness::None => 0,
            Openness::Closed => 1,
            Openness::Open => 2,
        }
    }

    pub fn from_code(code: i64) -> Option<Openness> {
        match code {
            0 => Some(Openness::None),
            1 => Some(Openness::Closed),
            2 => Some(Openness::Open),
            _ => None,
        }
    }
}

/// One row, with all persistent and scratch metadata inline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tuple {
    /// `TupleKind` code (ciphertext while encrypted).
    pub kind: i64,
    /// `Openness` code; only meaningful on boundary tuples.
    pub openness: i64,
    /// Join attribute after applying any boundary deviation.
    pub join_attr: i64,
    /// Position in the owning relation; stamped at load, never rewritten.
    pub original_index: i64,
    /// Number of subtree-join rows containing this tuple (phase 1).
    pub local_mult: i64,
    /// Number of full-join rows containing this tuple (phase 2).
    pub final_mult: i64,
    /// Weight-prefix before this tuple's band start (phase 2, phase 4).
    pub foreign_sum: i64,
    /// Running weight sum scratch (phase 1).
    pub local_cumsum: i64,
    /// Per-edge band interval scratch (phases 1 and 2).
    pub local_interval: i64,
    /// Weighted band interval scratch (phase 2).
    pub foreign_interval: i64,
    /// Weight a `Source` entry contributes to prefix sums.
    pub local_weight: i64,
    /// Ordinal of this copy within its original's run (phase 4).
    pub copy_index: i64,
    /// Sort key pairing child copies with parent groups (phase 4).
    pub alignment_key: i64,
    /// Destination slot of the first copy (phase 3).
    pub dst_idx: i64,
    /// Physical slot index; stays with the slot across distribution swaps.
    pub index: i64,
    /// Schema columns; unused slots are zero.
    pub attributes: [i64; MAX_ATTRS],
    /// Cryptographic state; never transformed by the cipher.
    pub is_encrypted: bool,
    /// Per-tuple cipher nonce; assigned on every encryption.
    pub nonce: u64,
}

impl Default for Tuple {
    fn default() -> Self {
        Tuple {
            kind: TupleKind::Target.code(),
            openness: Openness::None.code(),
            join_attr: 0,
            original_index: 0,
            local_mult: 0,
            final_mult: 0,
            foreign_sum: 0,
            local_cumsum: 0,
            local_interval: 0,
            foreign_interval: 0,
            local_weight: 0,
            copy_index: 0,
            alignment_key: 0,
            dst_idx: 0,
            index: 0,
            attributes: [0; MAX_ATTRS],
            is_encrypted: false,
            nonce: 0,
        }
    }
}

impl Tuple {
    /// Plaintext row carrying the given attribute values.
    pub fn from_attributes(values: &[i64]) -> Tuple {
        debug_assert!(values.len() <= MAX_ATTRS);
        let mut t = Tuple::default();
        t.attributes[..values.len()].copy_from_slice(values);
        t
    }

    pub fn set_kind(&mut self, kind: TupleKind) {
        self.kind = kind.code();
    }

    pub fn set_openness(&mut self, openness: Openness) {
        self.openness = openness.code();
    }

    /// Decoded kind. Only valid on plaintext tuples; ciphertext decodes
    /// to `None`.
    pub fn kind(&self) -> Option<TupleKind> {
        TupleKind::from_code(self.kind)
    }

    pub fn is_kind(&self, kind: TupleKind) -> bool {
        self.kind == kind.code()
    }

    pub fn is_source(&self) -> bool {
        self.is_kind(TupleKind::Source)
    }

    pub fn is_start(&self) -> bool {
        self.is_kind(TupleKind::Start)
    }

    pub fn is_end(&self) -> bool {
        self.is_kind(TupleKind::End)
    }

    pub fn is_sort_pad(&self) -> bool {
        self.is_kind(TupleKind::SortPad)
    }

    pub fn is_dist_pad(&self) -> bool {
        self.is_kind(TupleKind::DistPad)
    }

    pub fn is_padding(&self) -> bool {
        self.is_sort_pad() || self.is_dist_pad()
    }

    /// The payload as a fixed word array, in cipher order. `is_encrypted`
    /// and `nonce` are excluded.
    pub fn payload_words(&self) -> [i64; PAYLOAD_WORDS] {
        let mut w = [0i64; PAYLOAD_WORDS];
        w[0] = self.kind;
        w[1] = self.openness;
        w[2] = self.join_attr;
        w[3] = self.original_index;
        w[4] = self.local_mult;
        w[5] = self.final_mult;
        w[6] = self.foreign_sum;
        w[7] = self.local_cumsum;
        w[8] = self.local_interval;
        w[9] = self.foreign_interval;
        w[10] = self.local_weight;
        w[11] = self.copy_index;
        w[12] = self.alignment_key;
        w[13] = self.dst_idx;
        w[14] = self.index;
        w[15..].copy_from_slice(&self.attributes);
        w
    }

    /// Inverse of [`Tuple::payload_words`].
    pub fn set_payload_words(&mut self, w: &[i64; PAYLOAD_WORDS]) {
        self.kind = w[0];
        self.openness = w[1];
        self.join_attr = w[2];
        self.original_index = w[3];
        self.local_mult = w[4];
        self.final_mult = w[5];
        self.foreign_sum = w[6];
        self.local_cumsum = w[7];
        self.local_interval = w[8];
        self.foreign_interval = w[9];
        self.local_weight = w[10];
        self.copy_index = w[11];
        self.alignment_key = w[12];
        self.dst_idx = w[13];
        self.index = w[14];
        self.attributes.copy_from_slice(&w[15..]);
    }
}

/// Aggregate encryption state of a tuple collection.
///
/// `Mixed` between phases is an internal-consistency violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionStatus {
    AllPlaintext,
    AllEncrypted,
    Mixed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_code_roundtrip() {
        for kind in [
            TupleKind::SortPad,
            TupleKind::Source,
            TupleKind::Start,
            TupleKind::End,
            TupleKind::Target,
            TupleKind::DistPad,
        ] {
            assert_eq!(TupleKind::from_code(kind.code()), Some(kind));
        }
        assert_eq!(TupleKind::from_code(99), None);
    }

    #[test]
    fn test_openness_code_roundtrip() {
        for o in [Openness::None, Openness::Closed, Openness::Open] {
            assert_eq!(Openness::from_code(o.code()), Some(o));
        }
        assert_eq!(Openness::from_code(-1), None);
    }

    #[test]
    fn test_payload_words_roundtrip() {
        let mut t = Tuple::from_attributes(&[7, -3, 42]);
        t.set_kind(TupleKind::Start);
        t.set_openness(Openness::Open);
        t.join_attr = -99;
        t.original_index = 12;
        t.local_mult = 3;
        t.final_mult = 6;
        t.foreign_sum = 2;
        t.local_cumsum = 11;
        t.local_interval = 4;
        t.foreign_interval = 5;
        t.local_weight = 8;
        t.copy_index = 1;
        t.alignment_key = 9;
        t.dst_idx = 17;
        t.index = 13;

        let words = t.payload_words();
        let mut back = Tuple::default();
        back.set_payload_words(&words);

        // Crypto state is outside the payload.
        back.is_encrypted = t.is_encrypted;
        back.nonce = t.nonce;
        assert_eq!(back, t);
    }

    #[test]
    fn test_from_attributes_zero_fills() {
        let t = Tuple::from_attributes(&[1, 2]);
        assert_eq!(t.attributes[0], 1);
        assert_eq!(t.attributes[1], 2);
        assert_eq!(t.attributes[2], 0);
        assert!(t.is_kind(TupleKind::Target));
    }

    #[test]
    fn test_predicates() {
        let mut t = Tuple::default();
        t.set_kind(TupleKind::DistPad);
        assert!(t.is_dist_pad());
        assert!(t.is_padding());
        assert!(!t.is_sort_pad());
        t.set_kind(TupleKind::Source);
        assert!(t.is_source());
        assert!(!t.is_padding());
    }
}
