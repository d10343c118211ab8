use crate::OpCode;

/// Filter geometry for pooling operators, read out of the builtin options
/// table while building the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolFilter {
    pub width: usize,
    pub height: usize,
}

/// An operator node computing exactly one output tensor.
///
/// Input slots are positional; an absent entry stands for the −1 sentinel
/// the serialized form uses for optional inputs such as bias.
#[derive(Debug, Clone)]
pub struct Operator {
    /// Position in the current operator order
    pub id: usize,
    pub opcode: OpCode,
    /// Tensor ids, with optional inputs kept in place
    pub inputs: Vec<Option<usize>>,
    /// Tensor id of the single output
    pub output: usize,
    /// Pooling filter geometry, present for pool opcodes
    pub pool_filter: Option<PoolFilter>,
}

impl Operator {
    /// Tensor ids of the inputs that are actually present
    pub fn non_empty_inputs(&self) -> impl Iterator<Item = usize> + '_ {
        self.inputs.iter().flatten().copied()
    }

    /// The kernel tensor id for parameterised operators (second input)
    pub fn kernel_input(&self) -> Option<usize> {
        if self.opcode.has_kernel() {
            self.inputs.get(1).copied().flatten()
        } else {
            None
        }
    }
}
