//! The orchestrator.
//!
//! Validates the tree, runs the four phases in order with encryption-state
//! assertions between them, and publishes execution metrics when the
//! result is returned. Any failure aborts the execution: no partial
//! results, no retries.

use std::path::Path;
use std::time::Instant;

use tracing::info;

use crate::config::{EngineConfig, EngineMode};
use crate::crypto::TupleCryptor;
use crate::debug::DebugSession;
use crate::dispatch::Dispatcher;
use crate::engine::{align, bottom_up, distribute, top_down};
use crate::error::ObliJoinError;
use crate::metrics::{ExecutionMetrics, PhaseMetrics, SortMetrics};
use crate::table::ObliviousTable;
use crate::tree::JoinTree;
use crate::tuple::EncryptionStatus;

/// The oblivious multi-way band join engine.
pub struct ObliviousJoin {
    config: EngineConfig,
    dispatcher: Dispatcher,
    metrics: ExecutionMetrics,
}

impl ObliviousJoin {
    /// Engine with a freshly generated cipher key.
    pub fn new(config: EngineConfig) -> Result<ObliviousJoin, ObliJoinError> {
        let cryptor = TupleCryptor::generate();
        Self::with_cryptor(config, cryptor)
    }

    /// Engine over an existing key (matching already-encrypted inputs).
    pub fn with_cryptor(
        config: EngineConfig,
        cryptor: TupleCryptor,
    ) -> Result<ObliviousJoin, ObliJoinError> {
        config.validate()?;
        let dispatcher = Dispatcher::new(cryptor, &config)?;
        Ok(ObliviousJoin {
            config,
            dispatcher,
            metrics: ExecutionMetrics::default(),
        })
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Metrics of the most recent execution.
    pub fn metrics(&self) -> &ExecutionMetrics {
        &self.metrics
    }

    /// Evaluate the join tree and return the result table.
    pub fn execute(&mut self, tree: &mut JoinTree) -> Result<ObliviousTable, ObliJoinError> {
        self.run(tree, &mut None)
    }

    /// Like [`ObliviousJoin::execute`], dumping labelled intermediate
    /// snapshots into a named session directory for post-mortems.
    pub fn execute_with_debug(
        &mut self,
        tree: &mut JoinTree,
        session_name: &str,
    ) -> Result<ObliviousTable, ObliJoinError> {
        let base = self.config.debug_dir.clone();
        let mut session = Some(DebugSession::open(Path::new(&base), session_name)?);
        self.run(tree, &mut session)
    }

    fn run(
        &mut self,
        tree: &mut JoinTree,
        session: &mut Option<DebugSession>,
    ) -> Result<ObliviousTable, ObliJoinError> {
        tree.validate()?;
        self.assert_tree_state(tree, "validate")?;

        self.metrics = ExecutionMetrics::default();
        let started = Instant::now();
        let crossings_before = self.dispatcher.crossings();

        let phase_start = Instant::now();
        let before = self.dispatcher.crossings();
        bottom_up::run(tree, &mut self.dispatcher, session)?;
        self.finish_phase("Bottom-Up", phase_start, before, tree.total_rows());
        self.assert_tree_state(tree, "Bottom-Up")?;

        let phase_start = Instant::now();
        let before = self.dispatcher.crossings();
        top_down::run(tree, &mut self.dispatcher, session)?;
        self.finish_phase("Top-Down", phase_start, before, tree.total_rows());
        self.assert_tree_state(tree, "Top-Down")?;

        let phase_start = Instant::now();
        let before = self.dispatcher.crossings();
        distribute::run(tree, &mut self.dispatcher, session)?;
        self.finish_phase("Distribute-Expand", phase_start, before, tree.total_rows());
        self.assert_tree_state(tree, "Distribute-Expand")?;

        let phase_start = Instant::now();
        let before = self.dispatcher.crossings();
        let mut sorts = SortMetrics::default();
        let result = align::run(tree, &mut self.dispatcher, session, &mut sorts)?;
        self.finish_phase("Align-Concat", phase_start, before, result.len());
        self.metrics.align_sorts = sorts;
        self.assert_table_state(&result, "Align-Concat")?;

        self.metrics.result_rows = result.len();
        self.metrics.total_wall = started.elapsed();
        self.metrics.total_crossings = self.dispatcher.crossings() - crossings_before;

        info!(
            rows = result.len(),
            crossings = self.metrics.total_crossings,
            wall_ms = self.metrics.total_wall.as_millis() as u64,
            "join complete"
        );
        if self.config.print_metrics {
            print!("{}", self.metrics.render());
        }
        Ok(result)
    }

    fn finish_phase(
        &mut self,
        name: &'static str,
        phase_start: Instant,
        crossings_before: u64,
        total_rows: usize,
    ) {
        self.metrics.phases.push(PhaseMetrics {
            name,
            wall: phase_start.elapsed(),
            crossings: self.dispatcher.crossings() - crossings_before,
            total_rows,
        });
    }

    fn assert_tree_state(&self, tree: &JoinTree, phase: &'static str) -> Result<(), ObliJoinError> {
        for id in tree.pre_order() {
            self.assert_table_state_named(tree.table(id), &tree.node(id).name, phase)?;
        }
        Ok(())
    }

    fn assert_table_state(
        &self,
        table: &ObliviousTable,
        phase: &'static str,
    ) -> Result<(), ObliJoinError> {
        self.assert_table_state_named(table, table.name(), phase)
    }

    /// Every non-empty table must be uniformly in the state the deployment
    /// mode dictates; `Mixed` is fatal wherever it appears.
    fn assert_table_state_named(
        &self,
        table: &ObliviousTable,
        node: &str,
        phase: &'static str,
    ) -> Result<(), ObliJoinError> {
        if table.is_empty() {
            return Ok(());
        }
        let status = table.encryption_status();
        let expected = match self.config.mode {
            EngineMode::Plaintext => EncryptionStatus::AllPlaintext,
            EngineMode::Encrypted => EncryptionStatus::AllEncrypted,
        };
        if status == EncryptionStatus::Mixed {
            return Err(ObliJoinError::MixedEncryption {
                phase,
                node: node.to_string(),
            });
        }
        if status != expected {
            return Err(ObliJoinError::WrongEncryptionState {
                phase,
                node: node.to_string(),
                expected: self.config.mode.as_str(),
                found: match status {
                    EncryptionStatus::AllPlaintext => "PLAINTEXT",
                    _ => "ENCRYPTED",
                },
            });
        }
        Ok(())
    }
}
