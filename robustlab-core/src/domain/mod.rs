//! Domain types for RobustLab

pub mod bar;
pub mod params;
pub mod result;
pub mod search;
pub mod strategy;
pub mod trade;

pub use bar::{is_strictly_ordered, Bar};
pub use params::{ParamsError, StrategyParams};
pub use result::{BacktestResult, ResultSummary};
pub use search::{SearchAudit, SearchOutcome, SeedRun, NO_PASS, PASS};
pub use strategy::{
    BacktestSettings, StrategyCatalog, StrategyDescriptor, TradeDirection, TradeFilter,
    TradingCosts, UnknownStrategies,
};
pub use trade::{PositionSide, TradeRecord};
