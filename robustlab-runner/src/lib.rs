//! RobustLab Runner: stress validation pipeline and audit aggregation.
//!
//! This crate builds on `robustlab-core` to provide:
//! - OOS blind split tester (train search, consensus, blind backtests)
//! - Walk-forward validator (rolling optimize/test windows)
//! - Fee/slippage sensitivity ensemble
//! - Stress report assembly and persistence
//! - Batch runner over datasets × strategies × filters × directions
//! - Audit event sinks and the multi-source audit-log aggregator

pub mod audit;
pub mod config;
pub mod fee_slippage;
pub mod oos;
pub mod report;
pub mod runner;
pub mod verdict;
pub mod walk_forward;

pub use audit::{
    summarize_files, AuditError, AuditInput, AuditPolicy, AuditSink, AuditSummary, CellAudit,
    FileAuditSink, MemorySink, NullSink, OutputFormat, SourceKind,
};
pub use config::{BacktestSection, ConfigError, StressConfig};
pub use fee_slippage::{derive_slippage_bps, run_fee_slippage, FeeSlippagePolicy, FeeSlippageReport};
pub use oos::{run_oos_blind, split_index, OosPolicy, OosReport};
pub use report::{StressInputs, StressReport, REPORT_FILE};
pub use runner::{plan_tasks, PipelineError, StressPipeline, StressTask, TaskOutcome};
pub use verdict::{Verdict, VerdictKind};
pub use walk_forward::{
    create_windows, resolve_window_sizes, run_walk_forward, WalkForwardPolicy, WalkForwardReport,
    WindowSpec,
};
