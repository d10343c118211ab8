use thiserror::Error;

use crate::types::ElementType;

/// Custom error type for tflite-analyzer
#[derive(Debug, Error)]
pub enum Error {
    /// Flatbuffer parsing failed or a required field is absent
    #[error("malformed model: {0}")]
    MalformedModel(String),
    /// An operator declares something other than exactly one output tensor
    #[error("operator {op} declares {outputs} outputs; exactly one is supported")]
    MultiOutputUnsupported { op: usize, outputs: usize },
    /// An operator references a tensor index outside the tensor table
    #[error("operator {op} references tensor {index} outside the tensor table of length {len}")]
    DanglingReference { op: usize, index: i32, len: usize },
    /// Predecessor traversal revisited a tensor on its own path
    #[error("cycle detected through tensor {0}")]
    CycleDetected(usize),
    /// Buffer decoding requested for an element type without a decoder
    #[error("no decoder for element type {0:?}")]
    UnsupportedType(ElementType),
    /// An in-place edit fell outside the writable byte region
    #[error("cannot mutate serialized model: {0}")]
    UnwritableBuffer(String),
    /// A caller-supplied parameter is out of range
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// I/O error when reading or writing files
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// CSV serialization error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    /// Plot rendering error
    #[error("render error: {0}")]
    Render(String),
}

pub type Result<T> = std::result::Result<T, Error>;
