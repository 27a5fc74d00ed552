//! Error types for oblijoin.
//!
//! All failures are represented by [`ObliJoinError`] and propagated via
//! `Result<T, ObliJoinError>`; the orchestrator short-circuits on the first
//! failure and exposes it to the caller. Nothing is retried inside the core:
//! every error is fatal for the current execution, no partial results are
//! returned, and intermediate state is discarded.
//!
//! # Classification
//!
//! - **TreeShape** — structurally invalid join trees: missing root,
//!   missing constraints, unresolvable join columns, schema overflow.
//! - **EncryptionState** — a table was observed in a mixed encryption
//!   state, or a phase produced one.
//! - **Crypto** — the tuple cipher rejected an operation.
//! - **SizeMismatch** — paired primitives over unequal lengths, or a
//!   phase-3 length invariant violated. These detect bugs, not inputs.
//! - **Dispatcher** — a malformed trusted-boundary submission.
//! - **Resource** — configuration exceeding preallocated capacity.
//! - **Io** — CLI-layer file handling (CSV, plans, key files).

use std::fmt;

use crate::tuple::MAX_ATTRS;

/// Primary error type for the engine.
#[derive(Debug, thiserror::Error)]
pub enum ObliJoinError {
    // ── Tree shape ───────────────────────────────────────────────────────
    /// The join tree has no nodes.
    #[error("join tree has no root")]
    EmptyTree,

    /// A relation referenced by the plan does not exist in the tree.
    #[error("unknown relation: {0}")]
    UnknownRelation(String),

    /// A non-root node is missing its constraint to the parent.
    #[error("node {0}: missing join constraint to parent")]
    MissingConstraint(String),

    /// A join column could not be resolved against a node's schema.
    #[error("node {node}: unknown join column {column}")]
    UnknownJoinColumn { node: String, column: String },

    /// A node's table is empty (strict validation only).
    #[error("node {0}: empty table")]
    EmptyTable(String),

    /// A schema (or concatenation of schemas) exceeds the fixed capacity.
    #[error("schema width {0} exceeds the {MAX_ATTRS}-column tuple capacity")]
    SchemaOverflow(usize),

    // ── Encryption state ─────────────────────────────────────────────────
    /// A table contained both encrypted and plaintext tuples.
    #[error("{phase}: table {node} is in a mixed encryption state")]
    MixedEncryption { phase: &'static str, node: String },

    /// A table's uniform state disagreed with the deployment mode.
    #[error("{phase}: table {node} is {found}, expected {expected}")]
    WrongEncryptionState {
        phase: &'static str,
        node: String,
        expected: &'static str,
        found: &'static str,
    },

    // ── Crypto ───────────────────────────────────────────────────────────
    /// Encrypt was called on an already-encrypted tuple.
    #[error("tuple is already encrypted")]
    AlreadyEncrypted,

    /// Decrypt was called on a plaintext tuple.
    #[error("tuple is not encrypted")]
    NotEncrypted,

    /// Decryption produced an invalid tuple (wrong key or corrupt data).
    #[error("decryption produced invalid field codes (wrong key?)")]
    InvalidCiphertext,

    /// A malformed key file or key parameter.
    #[error("invalid cipher key: {0}")]
    InvalidKey(String),

    // ── Size mismatch ────────────────────────────────────────────────────
    /// A paired primitive was invoked over tables of different lengths.
    #[error("{op}: length mismatch ({left} vs {right})")]
    LengthMismatch {
        op: &'static str,
        left: usize,
        right: usize,
    },

    /// Phase 3 produced a table whose length disagrees with Σ final_mult.
    #[error("node {node}: expansion produced {got} rows, expected {expected}")]
    ExpansionMismatch {
        node: String,
        expected: usize,
        got: usize,
    },

    // ── Dispatcher ───────────────────────────────────────────────────────
    /// An operation referenced tuple slots outside the submitted buffer,
    /// or carried parameters the opcode cannot accept.
    #[error("dispatcher rejected {opcode}: {reason}")]
    InvalidOperands {
        opcode: &'static str,
        reason: String,
    },

    // ── Resource ─────────────────────────────────────────────────────────
    /// The configured batch capacity exceeds the preallocated maximum.
    #[error("batch capacity {got} exceeds maximum {max}")]
    BatchCapacity { got: usize, max: usize },

    // ── CLI layer ────────────────────────────────────────────────────────
    /// File system failure while reading or writing tables/plans/keys.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A table or plan file could not be parsed.
    #[error("parse error in {path}: {reason}")]
    Parse { path: String, reason: String },
}

/// Classification of an error for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    TreeShape,
    EncryptionState,
    Crypto,
    SizeMismatch,
    Dispatcher,
    Resource,
    Io,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::TreeShape => write!(f, "TREE_SHAPE"),
            ErrorKind::EncryptionState => write!(f, "ENCRYPTION_STATE"),
            ErrorKind::Crypto => write!(f, "CRYPTO"),
            ErrorKind::SizeMismatch => write!(f, "SIZE_MISMATCH"),
            ErrorKind::Dispatcher => write!(f, "DISPATCHER"),
            ErrorKind::Resource => write!(f, "RESOURCE"),
            ErrorKind::Io => write!(f, "IO"),
        }
    }
}

impl ObliJoinError {
    /// Classify the error for reporting.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ObliJoinError::EmptyTree
            | ObliJoinError::UnknownRelation(_)
            | ObliJoinError::MissingConstraint(_)
            | ObliJoinError::UnknownJoinColumn { .. }
            | ObliJoinError::EmptyTable(_)
            | ObliJoinError::SchemaOverflow(_) => ErrorKind::TreeShape,

            ObliJoinError::MixedEncryption { .. }
            | ObliJoinError::WrongEncryptionState { .. } => ErrorKind::EncryptionState,

            ObliJoinError::AlreadyEncrypted
            | ObliJoinError::NotEncrypted
            | ObliJoinError::InvalidCiphertext
            | ObliJoinError::InvalidKey(_) => ErrorKind::Crypto,

            ObliJoinError::LengthMismatch { .. } | ObliJoinError::ExpansionMismatch { .. } => {
                ErrorKind::SizeMismatch
            }

            ObliJoinError::InvalidOperands { .. } => ErrorKind::Dispatcher,

            ObliJoinError::BatchCapacity { .. } => ErrorKind::Resource,

            ObliJoinError::Io(_) | ObliJoinError::Parse { .. } => ErrorKind::Io,
        }
    }
}
