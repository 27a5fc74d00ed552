//! CLI harness for the oblivious join engine.
//!
//! `run` loads a plan plus its tables, executes the join, and writes the
//! result; `encrypt`/`decrypt` convert between CSV tables and encrypted
//! table files under a key file. Exit code 0 on success; any failure
//! prints the error to stderr and exits non-zero.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use oblijoin::config::{EngineConfig, EngineMode};
use oblijoin::crypto::TupleCryptor;
use oblijoin::error::ObliJoinError;
use oblijoin::plan::JoinPlan;
use oblijoin::{ObliviousJoin, io};

#[derive(Parser)]
#[command(
    name = "oblijoin",
    version,
    about = "Oblivious multi-way band joins over encrypted integer tables"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute a join plan and write the result table.
    Run {
        /// Plan file (JSON).
        plan: PathBuf,
        /// Directory the plan's table files live in. Defaults to the
        /// plan's directory.
        #[arg(long)]
        data_dir: Option<PathBuf>,
        /// Result path. CSV unless it ends in `.json`.
        #[arg(long, short, default_value = "result.csv")]
        output: PathBuf,
        /// Inputs are encrypted table files under this key; the result
        /// stays encrypted.
        #[arg(long)]
        key_file: Option<PathBuf>,
        /// Dump per-step table snapshots into a named debug session.
        #[arg(long)]
        debug_session: Option<String>,
        /// Suppress the metrics report.
        #[arg(long)]
        quiet: bool,
    },
    /// Encrypt a CSV table into an encrypted table file.
    Encrypt {
        input: PathBuf,
        output: PathBuf,
        /// Key file; created with a fresh key if it does not exist.
        #[arg(long)]
        key_file: PathBuf,
    },
    /// Decrypt an encrypted table file back to CSV.
    Decrypt {
        input: PathBuf,
        output: PathBuf,
        #[arg(long)]
        key_file: PathBuf,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("oblijoin: [{}] {e}", e.kind());
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), ObliJoinError> {
    match cli.command {
        Command::Run {
            plan,
            data_dir,
            output,
            key_file,
            debug_session,
            quiet,
        } => {
            let data_dir = data_dir.unwrap_or_else(|| {
                plan.parent().map(PathBuf::from).unwrap_or_else(|| ".".into())
            });
            let parsed = JoinPlan::load(&plan)?;
            let mut tree = parsed.build_tree(&plan, &data_dir)?;
            if let Err(e) = tree.validate_strict() {
                // An empty relation is legal — the join is simply empty —
                // but worth flagging on a batch run.
                tracing::warn!("{e}");
            }

            let mut config = EngineConfig::from_env()?;
            config.print_metrics = !quiet;
            let cryptor = match &key_file {
                Some(path) => {
                    config.mode = EngineMode::Encrypted;
                    io::load_key(path)?
                }
                None => TupleCryptor::generate(),
            };
            let mut engine = ObliviousJoin::with_cryptor(config, cryptor)?;

            let result = match &debug_session {
                Some(session) => engine.execute_with_debug(&mut tree, session)?,
                None => engine.execute(&mut tree)?,
            };

            if output.extension().is_some_and(|e| e == "json") {
                io::save_table_file(&result, &output)?;
            } else if key_file.is_some() {
                // An encrypted result cannot be rendered as CSV.
                io::save_table_file(&result, &output.with_extension("json"))?;
            } else {
                io::save_csv(&result, &output)?;
            }
            Ok(())
        }

        Command::Encrypt {
            input,
            output,
            key_file,
        } => {
            let cryptor = if key_file.exists() {
                io::load_key(&key_file)?
            } else {
                let cryptor = TupleCryptor::generate();
                io::save_key(&cryptor, &key_file)?;
                cryptor
            };
            let mut table = io::load_csv(&input)?;
            io::encrypt_table(&mut table, &cryptor)?;
            io::save_table_file(&table, &output)
        }

        Command::Decrypt {
            input,
            output,
            key_file,
        } => {
            let cryptor = io::load_key(&key_file)?;
            let mut table = io::load_table_file(&input)?;
            io::decrypt_table(&mut table, &cryptor)?;
            io::save_csv(&table, &output)
        }
    }
}
