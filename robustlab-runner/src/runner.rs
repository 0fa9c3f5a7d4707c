//! Batch stress runner: wires dataset loading, the three validators and the report.
//!
//! Tasks are the cross product datasets × strategies × filters × directions and
//! run strictly one after another. Each task owns a directory
//! `<out>/<dataset-stem>/<strategy>/<filter>_<direction>/` holding its
//! `stress_report.json` and `audit.log`. The first failing task aborts the batch.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};

use robustlab_core::data::{Dataset, DatasetError};
use robustlab_core::domain::{StrategyCatalog, StrategyDescriptor, TradeDirection, TradeFilter, UnknownStrategies};
use robustlab_core::engine::{BacktestEngine, CandidateSearch, EngineError};

use crate::audit::{AuditError, CellAudit, FileAuditSink, AUDIT_LOG_FILE};
use crate::config::{ConfigError, StressConfig};
use crate::fee_slippage::run_fee_slippage;
use crate::oos::run_oos_blind;
use crate::report::{ReportError, StressInputs, StressReport};
use crate::verdict::Verdict;
use crate::walk_forward::run_walk_forward;

/// Errors that abort a task (and with it the batch).
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    #[error(transparent)]
    UnknownStrategies(#[from] UnknownStrategies),
    #[error("dataset {dataset} has {bars} bars after trimming, at least {min_bars} are required")]
    InsufficientBars {
        dataset: String,
        bars: usize,
        min_bars: usize,
    },
    #[error("invalid walk-forward window sizing: {0}")]
    InvalidWindowSizing(String),
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Report(#[from] ReportError),
    #[error(transparent)]
    Audit(#[from] AuditError),
}

/// One unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StressTask {
    pub dataset: PathBuf,
    pub strategy: String,
    pub filter: TradeFilter,
    pub direction: TradeDirection,
}

impl StressTask {
    /// `<out>/<dataset-stem>/<strategy>/<filter>_<direction>`
    pub fn dir(&self, output_dir: &Path) -> PathBuf {
        let stem = self
            .dataset
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "dataset".to_string());
        output_dir
            .join(stem)
            .join(&self.strategy)
            .join(format!("{}_{}", self.filter, self.direction))
    }
}

/// Tasks in execution order: dataset, then strategy, then filter, then direction.
pub fn plan_tasks(datasets: &[PathBuf], config: &StressConfig) -> Vec<StressTask> {
    let mut tasks = Vec::new();
    for dataset in datasets {
        for strategy in &config.strategies {
            for &filter in &config.filters {
                for &direction in &config.directions {
                    tasks.push(StressTask {
                        dataset: dataset.clone(),
                        strategy: strategy.clone(),
                        filter,
                        direction,
                    });
                }
            }
        }
    }
    tasks
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutcome {
    pub task: StressTask,
    pub report_path: PathBuf,
    /// The report already existed and was returned unchanged.
    pub reused: bool,
    pub overall: Verdict,
}

pub struct StressPipeline<'a> {
    engine: &'a dyn BacktestEngine,
    search: &'a dyn CandidateSearch,
    catalog: &'a StrategyCatalog,
    config: &'a StressConfig,
}

impl<'a> StressPipeline<'a> {
    pub fn new(
        engine: &'a dyn BacktestEngine,
        search: &'a dyn CandidateSearch,
        catalog: &'a StrategyCatalog,
        config: &'a StressConfig,
    ) -> Self {
        Self {
            engine,
            search,
            catalog,
            config,
        }
    }

    /// Load a dataset, trim it to `max_bars` and enforce `min_bars`.
    pub fn load_dataset(&self, path: &Path) -> Result<Dataset, PipelineError> {
        let mut dataset = Dataset::load(path)?;
        if let Some(max_bars) = self.config.max_bars {
            dataset.trim_to_recent(max_bars);
        }
        if dataset.bars.len() < self.config.min_bars {
            return Err(PipelineError::InsufficientBars {
                dataset: path.display().to_string(),
                bars: dataset.bars.len(),
                min_bars: self.config.min_bars,
            });
        }
        if dataset.dropped_rows > 0 {
            warn!(dataset = %dataset.name, dropped = dataset.dropped_rows, "malformed rows dropped");
        }
        info!(
            dataset = %dataset.name,
            bars = dataset.bars.len(),
            interval = %dataset.interval,
            hash = %dataset.hash,
            "dataset loaded"
        );
        Ok(dataset)
    }

    /// Run every task for `datasets` into `output_dir`.
    pub fn run_batch(&self, datasets: &[PathBuf], output_dir: &Path, force: bool) -> Result<Vec<TaskOutcome>, PipelineError> {
        self.config.validate()?;
        if datasets.is_empty() {
            return Err(ConfigError::InvalidPolicy("no dataset given".into()).into());
        }
        if self.config.strategies.is_empty() {
            return Err(ConfigError::InvalidPolicy("no strategy given".into()).into());
        }
        let strategies = self.catalog.resolve(&self.config.strategies)?;

        let tasks = plan_tasks(datasets, self.config);
        info!(tasks = tasks.len(), output = %output_dir.display(), "stress batch start");

        let mut outcomes = Vec::with_capacity(tasks.len());
        let mut loaded: Option<(PathBuf, Dataset)> = None;
        for task in tasks {
            let dataset = match &loaded {
                Some((path, dataset)) if *path == task.dataset => dataset,
                _ => {
                    let dataset = self.load_dataset(&task.dataset)?;
                    &loaded.insert((task.dataset.clone(), dataset)).1
                }
            };
            let strategy = strategies
                .iter()
                .find(|s| s.key == task.strategy)
                .ok_or_else(|| UnknownStrategies(vec![task.strategy.clone()]))?;
            outcomes.push(self.run_task(&task, dataset, strategy, output_dir, force)?);
        }
        Ok(outcomes)
    }

    /// Run one task, or return its existing report unless `force` is set.
    pub fn run_task(
        &self,
        task: &StressTask,
        dataset: &Dataset,
        strategy: &StrategyDescriptor,
        output_dir: &Path,
        force: bool,
    ) -> Result<TaskOutcome, PipelineError> {
        let dir = task.dir(output_dir);
        if !force {
            if let Some(existing) = StressReport::load_existing(&dir)? {
                info!(dir = %dir.display(), verdict = ?existing.overall.verdict, "reusing existing report");
                return Ok(TaskOutcome {
                    task: task.clone(),
                    report_path: dir.join(crate::report::REPORT_FILE),
                    reused: true,
                    overall: existing.overall,
                });
            }
        }

        let report = self.compute_report(task, dataset, strategy, &dir)?;
        let report_path = report.persist(&dir)?;
        info!(
            strategy = %strategy.key,
            filter = %task.filter,
            direction = %task.direction,
            verdict = ?report.overall.verdict,
            reasons = ?report.overall.fail_reasons,
            "stress task finished"
        );
        Ok(TaskOutcome {
            task: task.clone(),
            report_path,
            reused: false,
            overall: report.overall,
        })
    }

    fn compute_report(
        &self,
        task: &StressTask,
        dataset: &Dataset,
        strategy: &StrategyDescriptor,
        dir: &Path,
    ) -> Result<StressReport, PipelineError> {
        let config = self.config;
        let settings = config.backtest.settings(task.filter, task.direction);
        let bars = &dataset.bars;

        let mut sink = FileAuditSink::open(&dir.join(AUDIT_LOG_FILE), true)?;
        let mut audit = CellAudit::new(&mut sink, &strategy.key, &dataset.interval);

        let oos = run_oos_blind(
            self.engine,
            self.search,
            bars,
            strategy,
            &config.seeds,
            &settings,
            &config.oos,
            &mut audit,
        )?;
        let walk_forward = run_walk_forward(
            self.engine,
            bars,
            dataset.bar_spacing_seconds(),
            strategy,
            &settings,
            &config.walk_forward,
        )?;
        let fee_slippage = run_fee_slippage(
            self.search,
            bars,
            dataset.median_close(),
            strategy,
            &config.seeds,
            &settings,
            &config.fee_slippage,
            &mut audit,
        )?;

        let inputs = StressInputs {
            dataset_path: task.dataset.display().to_string(),
            dataset_name: dataset.name.clone(),
            symbol: dataset.symbol.clone(),
            interval: dataset.interval.clone(),
            dataset_hash: dataset.hash.clone(),
            bar_count: bars.len(),
            dropped_rows: dataset.dropped_rows,
            first_bar_time: bars.first().map(|b| b.time),
            last_bar_time: bars.last().map(|b| b.time),
            strategy_key: strategy.key.clone(),
            filter: task.filter,
            direction: task.direction,
            seeds: config.seeds.clone(),
            settings,
        };
        Ok(StressReport::assemble(inputs, oos, walk_forward, fee_slippage))
    }
}
