//! oblijoin — oblivious multi-way band joins over encrypted integer tables.
//!
//! Evaluates a rooted join tree whose edges carry band-interval predicates
//! (`child.attr ∈ parent.attr + [δ₁, δ₂]`, endpoints open or closed) and
//! returns the relational join result, while keeping the sequence of
//! data-plane operations — slots touched, opcodes issued, pass lengths — a
//! function of the input cardinalities and tree shape only. Attribute
//! values never influence the access pattern.
//!
//! # Theoretical Basis
//!
//! - **Krastnikov, Kerschbaum & Stebila (2020)**: "Efficient Oblivious
//!   Database Joins", PVLDB 13(12). The distribute-expand replication
//!   network and the dual-entry boundary technique.
//! - **Batcher (1968)**: "Sorting Networks and their Applications", AFIPS
//!   SJCC. The fixed-schedule bitonic sorting network behind every sort.
//!
//! # Pipeline
//!
//! 1. *Bottom-up* — per-subtree multiplicities via prefix sums over merged
//!    boundary/weight streams ([`engine::bottom_up`]).
//! 2. *Top-down* — whole-tree multiplicities propagated root-to-leaves
//!    ([`engine::top_down`]).
//! 3. *Distribute-expand* — each row replicated `final_mult` times at
//!    constant cost per output slot ([`engine::distribute`]).
//! 4. *Align-concat* — complementary sorts bring both sides into
//!    row-by-row correspondence before concatenation
//!    ([`engine::align`]).
//!
//! All tuple-content computation happens behind the batched
//! [`dispatch::Dispatcher`], which models the trusted boundary: tuples are
//! decrypted on entry, transformed, and re-encrypted on exit, with
//! thousands of operations amortised per crossing.

pub mod batch;
pub mod config;
pub mod constraint;
pub mod crypto;
pub mod debug;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod io;
pub mod metrics;
mod obl;
pub mod plan;
pub mod schema;
pub mod table;
pub mod tree;
pub mod tuple;

pub use config::{EngineConfig, EngineMode};
pub use constraint::{Bound, JoinConstraint};
pub use crypto::TupleCryptor;
pub use engine::executor::ObliviousJoin;
pub use error::{ErrorKind, ObliJoinError};
pub use schema::Schema;
pub use table::ObliviousTable;
pub use tree::{JoinTree, NodeId};
pub use tuple::{EncryptionStatus, Openness, Tuple, TupleKind};
