//! RobustLab Core: domain types, dataset loading, metrics, engine seams.
//!
//! This crate holds everything the validation pipeline needs below the
//! orchestration layer:
//! - Domain types (bars, params, trades, backtest results, seed runs)
//! - JSON dataset loader with hashing and interval inference
//! - Pure performance metrics and order statistics
//! - `BacktestEngine` / `CandidateSearch` traits with reference implementations

pub mod data;
pub mod domain;
pub mod engine;
pub mod metrics;
pub mod stats;
