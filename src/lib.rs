//! # tflite-analyzer
//!
//! A lightweight static analyzer and optimizer for TFLite models.
//!
//! Given a serialized model with one primary subgraph, this crate can:
//! - parse it into an operator/tensor graph,
//! - find the operator execution order that minimises peak activation
//!   memory (memoized search over live-tensor subsets),
//! - rewrite the stored operator order in place by patching the
//!   subgraph's operator indirection table, leaving every other byte of
//!   the file untouched,
//! - report per-operator MAC counts, working-set composition and weight
//!   sizes as tables, CSV files and a stacked memory plot,
//! - cluster kernel weights into a fixed number of centroids, in place.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tflite_analyzer::{CostWeights, TfliteModel};
//!
//! let mut model = TfliteModel::load_from_file("model.tflite")?;
//! model.print_model_analysis(CostWeights::default());
//! model.optimize_memory()?;
//! model.write_to_file("model.opt.tflite")?;
//! # Ok::<(), tflite_analyzer::Error>(())
//! ```

pub mod cluster;
pub mod cost;
pub mod error;
pub mod flatbuffer;
pub mod graph;
pub mod model;
pub mod operation;
pub mod report;
pub mod rewriter;
pub mod schedule;
pub mod tensor;
pub mod types;

pub use cost::CostWeights;
pub use error::{Error, Result};
pub use graph::Graph;
pub use model::TfliteModel;
pub use operation::{Operator, PoolFilter};
pub use report::ScheduleRow;
pub use schedule::Schedule;
pub use tensor::Tensor;
pub use types::{ElementType, OpCode};
