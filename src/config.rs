//! Engine configuration.
//!
//! All knobs are plain values with environment-variable overrides
//! (`OBLIJOIN_*`). The configuration is read once when the engine is
//! constructed; nothing is re-read mid-execution.

use crate::error::ObliJoinError;

/// Hard upper bound on operations per trusted-boundary crossing.
pub const MAX_BATCH_OPS: usize = 65_536;

/// Default operations per crossing. Crossings dominate cost, so the
/// default is deliberately in the thousands.
pub const DEFAULT_BATCH_OPS: usize = 8_192;

/// Deployment mode: whether node tables are expected to arrive (and stay)
/// encrypted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineMode {
    #[default]
    Plaintext,
    Encrypted,
}

impl EngineMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineMode::Plaintext => "PLAINTEXT",
            EngineMode::Encrypted => "ENCRYPTED",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self, ObliJoinError> {
        match s.to_uppercase().as_str() {
            "PLAINTEXT" => Ok(EngineMode::Plaintext),
            "ENCRYPTED" => Ok(EngineMode::Encrypted),
            other => Err(ObliJoinError::Parse {
                path: "OBLIJOIN_MODE".into(),
                reason: format!("unknown mode: {other}. Must be 'PLAINTEXT' or 'ENCRYPTED'"),
            }),
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Expected encryption state of every node table.
    pub mode: EngineMode,
    /// Operations buffered per trusted-boundary crossing.
    pub batch_ops: usize,
    /// Record the `(opcode, idx1, idx2)` submission trace fingerprint.
    pub record_trace: bool,
    /// Base directory for debug-session snapshots.
    pub debug_dir: String,
    /// Print the metrics report to stdout after each execution.
    pub print_metrics: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            mode: EngineMode::Plaintext,
            batch_ops: DEFAULT_BATCH_OPS,
            record_trace: false,
            debug_dir: "oblijoin-debug".to_string(),
            print_metrics: true,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `OBLIJOIN_*` environment variables:
    /// `OBLIJOIN_MODE`, `OBLIJOIN_BATCH_OPS`, `OBLIJOIN_TRACE`,
    /// `OBLIJOIN_DEBUG_DIR`, `OBLIJOIN_METRICS`.
    pub fn from_env() -> Result<EngineConfig, ObliJoinError> {
        let mut config = EngineConfig::default();
        if let Ok(mode) = std::env::var("OBLIJOIN_MODE") {
            config.mode = EngineMode::from_str(&mode)?;
        }
        if let Ok(n) = std::env::var("OBLIJOIN_BATCH_OPS") {
            config.batch_ops = n.parse().map_err(|_| ObliJoinError::Parse {
                path: "OBLIJOIN_BATCH_OPS".into(),
                reason: format!("not a number: {n}"),
            })?;
        }
        if let Ok(v) = std::env::var("OBLIJOIN_TRACE") {
            config.record_trace = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Ok(dir) = std::env::var("OBLIJOIN_DEBUG_DIR") {
            config.debug_dir = dir;
        }
        if let Ok(v) = std::env::var("OBLIJOIN_METRICS") {
            config.print_metrics = v != "0" && !v.eq_ignore_ascii_case("false");
        }
        config.validate()?;
        Ok(config)
    }

    /// Reject capacities the dispatcher's preallocated buffers cannot hold.
    pub fn validate(&self) -> Result<(), ObliJoinError> {
        if self.batch_ops == 0 || self.batch_ops > MAX_BATCH_OPS {
            return Err(ObliJoinError::BatchCapacity {
                got: self.batch_ops,
                max: MAX_BATCH_OPS,
            });
        }
        Ok(())
    }

    pub fn with_mode(mut self, mode: EngineMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_trace(mut self) -> Self {
        self.record_trace = true;
        self
    }

    /// Quiet configuration for tests and benchmarks.
    pub fn quiet() -> EngineConfig {
        EngineConfig {
            print_metrics: false,
            ..EngineConfig::default()
        }
    }
}
