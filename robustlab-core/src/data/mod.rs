//! Dataset loading: JSON ingestion, normalization, interval inference, hashing.

pub mod dataset;

pub use dataset::{compute_bar_hash, infer_interval, parse_time, Dataset, DatasetError};
