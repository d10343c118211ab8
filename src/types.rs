use std::fmt;

/// Tensor element types the analyzer understands.
///
/// The numeric codes are the `TensorType` values from the TFLite schema;
/// anything outside this closed set is rejected while building the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    F32,
    F16,
    I8,
    U8,
    I16,
    I32,
    I64,
}

impl ElementType {
    /// Map a raw schema type code to an element type
    pub fn from_type_code(code: i8) -> Option<Self> {
        match code {
            0 => Some(ElementType::F32),
            1 => Some(ElementType::F16),
            2 => Some(ElementType::I32),
            3 => Some(ElementType::U8),
            4 => Some(ElementType::I64),
            7 => Some(ElementType::I16),
            9 => Some(ElementType::I8),
            _ => None,
        }
    }

    /// Size of one element in bytes
    pub fn byte_size(&self) -> usize {
        match self {
            ElementType::I8 | ElementType::U8 => 1,
            ElementType::I16 | ElementType::F16 => 2,
            ElementType::I32 | ElementType::F32 => 4,
            ElementType::I64 => 8,
        }
    }

    /// Check if this is a floating point type
    pub fn is_float(&self) -> bool {
        matches!(self, ElementType::F16 | ElementType::F32)
    }
}

/// Builtin operator kinds.
///
/// Only the kinds the cost model and the weight clusterer care about get
/// their own variant; everything else is carried through as `Other` with
/// the raw builtin code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    Add,
    AveragePool2d,
    Conv2d,
    DepthwiseConv2d,
    FullyConnected,
    MaxPool2d,
    Mean,
    Other(i32),
}

impl OpCode {
    /// Map a resolved builtin operator code to an opcode
    pub fn from_builtin_code(code: i32) -> Self {
        match code {
            0 => OpCode::Add,
            1 => OpCode::AveragePool2d,
            3 => OpCode::Conv2d,
            4 => OpCode::DepthwiseConv2d,
            9 => OpCode::FullyConnected,
            17 => OpCode::MaxPool2d,
            40 => OpCode::Mean,
            other => OpCode::Other(other),
        }
    }

    /// Operators that carry a kernel tensor as their second input
    pub fn has_kernel(&self) -> bool {
        matches!(
            self,
            OpCode::Conv2d | OpCode::DepthwiseConv2d | OpCode::FullyConnected
        )
    }

    /// Operators whose filter geometry lives in pooling options
    pub fn is_pool(&self) -> bool {
        matches!(self, OpCode::AveragePool2d | OpCode::MaxPool2d)
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpCode::Add => write!(f, "ADD"),
            OpCode::AveragePool2d => write!(f, "AVERAGE_POOL_2D"),
            OpCode::Conv2d => write!(f, "CONV_2D"),
            OpCode::DepthwiseConv2d => write!(f, "DEPTHWISE_CONV_2D"),
            OpCode::FullyConnected => write!(f, "FULLY_CONNECTED"),
            OpCode::MaxPool2d => write!(f, "MAX_POOL_2D"),
            OpCode::Mean => write!(f, "MEAN"),
            OpCode::Other(code) => write!(f, "BUILTIN_{}", code),
        }
    }
}
