use crate::graph::Graph;
use crate::operation::Operator;
use crate::{OpCode, Tensor};

/// Relative weighting of memory traffic against arithmetic when turning
/// load/compute counts into a single cost figure. The default counts
/// compute only.
#[derive(Debug, Clone, Copy)]
pub struct CostWeights {
    pub mem_access: u64,
    pub compute: u64,
}

impl Default for CostWeights {
    fn default() -> Self {
        CostWeights {
            mem_access: 0,
            compute: 1,
        }
    }
}

/// Weighted multiply-accumulate estimate for one operator.
///
/// Opcodes outside the cost table contribute zero, as do in-table
/// operators whose tensor ranks do not match the expected layout.
pub fn macs_for_op(graph: &Graph, op: &Operator, weights: CostWeights) -> u64 {
    let (loads, compute) = load_compute_counts(graph, op);
    weights.mem_access * loads + weights.compute * compute
}

/// Weight storage referenced by one operator: the cumulative stored size
/// of its constant inputs.
pub fn weight_bytes(graph: &Graph, op: &Operator) -> u64 {
    op.non_empty_inputs()
        .filter(|&t| graph.tensors[t].is_constant)
        .map(|t| graph.tensors[t].const_size())
        .sum()
}

fn dims4(tensor: &Tensor) -> Option<(u64, u64, u64, u64)> {
    match tensor.shape[..] {
        [a, b, c, d] => Some((a as u64, b as u64, c as u64, d as u64)),
        _ => None,
    }
}

fn load_compute_counts(graph: &Graph, op: &Operator) -> (u64, u64) {
    let tensor = |id: usize| &graph.tensors[id];
    let input = |slot: usize| op.inputs.get(slot).copied().flatten().map(tensor);
    let output = tensor(op.output);

    match op.opcode {
        OpCode::Conv2d => {
            let Some(kernel) = input(1) else {
                return (0, 0);
            };
            let (Some((o_c, k_h, k_w, i_c)), Some((n, o_h, o_w, _))) =
                (dims4(kernel), dims4(output))
            else {
                return (0, 0);
            };
            let work = n * o_h * o_w * o_c * k_h * k_w * i_c;
            let mut loads = 2 * work;
            if input(2).is_some() {
                loads += n * o_h * o_w * o_c;
            }
            (loads, work)
        }
        OpCode::DepthwiseConv2d => {
            let Some(kernel) = input(1) else {
                return (0, 0);
            };
            // depthwise kernels are laid out [_, k_h, k_w, c]
            let (Some((_, k_h, k_w, c)), Some((n, o_h, o_w, _))) = (dims4(kernel), dims4(output))
            else {
                return (0, 0);
            };
            let work = n * c * o_h * o_w * k_h * k_w;
            let mut loads = 2 * work;
            if input(2).is_some() {
                loads += n * c * o_h * o_w;
            }
            (loads, work)
        }
        OpCode::FullyConnected => {
            let Some(in_tensor) = input(0) else {
                return (0, 0);
            };
            let ([n, out_dim], Some(&in_dim)) = (&output.shape[..], in_tensor.shape.last()) else {
                return (0, 0);
            };
            let work = *n as u64 * in_dim as u64 * *out_dim as u64;
            let mut loads = 2 * work;
            if input(2).is_some() {
                loads += *n as u64 * *out_dim as u64;
            }
            (loads, work)
        }
        OpCode::MaxPool2d | OpCode::AveragePool2d => {
            let (Some((n, o_h, o_w, c)), Some(filter)) = (dims4(output), op.pool_filter) else {
                return (0, 0);
            };
            let work = n * o_h * o_w * c * filter.height as u64 * filter.width as u64;
            (work, work)
        }
        OpCode::Mean => {
            // global pooling: one pass over the input
            let Some((n, i_h, i_w, c)) = input(0).and_then(dims4) else {
                return (0, 0);
            };
            let work = n * i_h * i_w * c;
            (work, work)
        }
        OpCode::Add => {
            let num_terms = op.inputs.len() as u64;
            let elems_per_term = output.element_count() as u64;
            (
                num_terms * elems_per_term,
                num_terms.saturating_sub(1) * elems_per_term,
            )
        }
        _ => (0, 0),
    }
}
