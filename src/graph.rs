use std::collections::HashSet;

use crate::flatbuffer::ModelView;
use crate::operation::{Operator, PoolFilter};
use crate::tensor::Tensor;
use crate::{ElementType, Error, OpCode, Result};

/// The operator/tensor DAG of the model's primary subgraph.
///
/// Tensors and operators live in two owning vectors indexed by id; every
/// cross-reference is an index into one of them. `operators[i].id == i`
/// holds before and after any reordering.
#[derive(Debug, Clone)]
pub struct Graph {
    pub tensors: Vec<Tensor>,
    pub operators: Vec<Operator>,
    /// Tensor ids of the subgraph inputs
    pub inputs: Vec<usize>,
    /// Tensor ids of the subgraph outputs
    pub outputs: Vec<usize>,
}

impl Graph {
    /// Build the graph from a parsed model view (subgraph 0 only)
    pub(crate) fn from_model_view(view: &ModelView<'_>) -> Result<Self> {
        let subgraph = view.subgraph(0)?;

        let tensor_count = subgraph.tensor_count()?;
        let mut tensors = Vec::with_capacity(tensor_count);
        for id in 0..tensor_count {
            let tensor = subgraph.tensor(id)?;
            let type_code = tensor.type_code()?;
            let element_type = ElementType::from_type_code(type_code).ok_or_else(|| {
                Error::MalformedModel(format!(
                    "tensor {} has unsupported element type code {}",
                    id, type_code
                ))
            })?;
            let mut shape = Vec::new();
            for dim in tensor.shape()? {
                if dim <= 0 {
                    return Err(Error::MalformedModel(format!(
                        "tensor {} has non-positive dimension {}",
                        id, dim
                    )));
                }
                shape.push(dim as usize);
            }
            tensors.push(Tensor {
                id,
                name: tensor.name()?,
                shape,
                element_type,
                buffer: tensor.buffer_index()? as usize,
                producer: None,
                consumers: Vec::new(),
                is_constant: false,
                predecessors: HashSet::new(),
            });
        }

        let resolve = |op: usize, index: i32| -> Result<usize> {
            if index < 0 || index as usize >= tensor_count {
                return Err(Error::DanglingReference {
                    op,
                    index,
                    len: tensor_count,
                });
            }
            Ok(index as usize)
        };

        let operator_count = subgraph.operator_count()?;
        let mut operators = Vec::with_capacity(operator_count);
        for id in 0..operator_count {
            let entry = subgraph.operator(id)?;

            let outputs = entry.output_indices()?;
            if outputs.len() != 1 {
                return Err(Error::MultiOutputUnsupported {
                    op: id,
                    outputs: outputs.len(),
                });
            }
            let output = resolve(id, outputs[0])?;

            // the −1 sentinel marks an absent optional input; keep its slot
            let mut inputs = Vec::new();
            for index in entry.input_indices()? {
                if index == -1 {
                    inputs.push(None);
                } else {
                    inputs.push(Some(resolve(id, index)?));
                }
            }

            let opcode = OpCode::from_builtin_code(view.builtin_code(entry.opcode_index()?)?);
            let pool_filter = if opcode.is_pool() {
                entry.pool_filter()?.map(|(width, height)| PoolFilter {
                    width: width.max(0) as usize,
                    height: height.max(0) as usize,
                })
            } else {
                None
            };

            let operator = Operator {
                id,
                opcode,
                inputs,
                output,
                pool_filter,
            };

            if tensors[output].producer.is_some() {
                return Err(Error::MalformedModel(format!(
                    "tensor {} is produced by more than one operator",
                    output
                )));
            }
            tensors[output].producer = Some(id);
            for input in operator.non_empty_inputs() {
                tensors[input].consumers.push(id);
            }
            operators.push(operator);
        }

        let io = |indices: Vec<i32>| -> Result<Vec<usize>> {
            indices
                .into_iter()
                .map(|index| {
                    if index < 0 || index as usize >= tensor_count {
                        Err(Error::MalformedModel(format!(
                            "subgraph io index {} outside the tensor table of length {}",
                            index, tensor_count
                        )))
                    } else {
                        Ok(index as usize)
                    }
                })
                .collect()
        };
        let inputs = io(subgraph.input_indices()?)?;
        let outputs = io(subgraph.output_indices()?)?;

        for tensor in &mut tensors {
            tensor.is_constant = tensor.producer.is_none() && !inputs.contains(&tensor.id);
        }

        let mut graph = Graph {
            tensors,
            operators,
            inputs,
            outputs,
        };
        graph.compute_predecessors()?;
        Ok(graph)
    }

    /// Transitive producer closure of a tensor
    pub fn predecessors(&self, tensor: usize) -> &HashSet<usize> {
        &self.tensors[tensor].predecessors
    }

    /// Fill in the predecessor sets for every tensor reachable from a
    /// graph output.
    ///
    /// The traversal is an explicit worklist rather than recursion so deep
    /// graphs cannot exhaust the stack. Popping a tensor that is still in
    /// the expanding state means it reached itself, which is fatal.
    fn compute_predecessors(&mut self) -> Result<()> {
        const FRESH: u8 = 0;
        const EXPANDING: u8 = 1;
        const DONE: u8 = 2;

        let mut state = vec![FRESH; self.tensors.len()];
        let mut stack: Vec<(usize, bool)> = Vec::new();

        for &output in &self.outputs {
            stack.push((output, false));
            while let Some((tensor, expanded)) = stack.pop() {
                if expanded {
                    let mut predecessors = HashSet::new();
                    if let Some(producer) = self.tensors[tensor].producer {
                        for input in self.operators[producer].inputs.iter().flatten().copied() {
                            predecessors.insert(input);
                            predecessors.extend(self.tensors[input].predecessors.iter().copied());
                        }
                    }
                    self.tensors[tensor].predecessors = predecessors;
                    state[tensor] = DONE;
                    continue;
                }
                match state[tensor] {
                    DONE => continue,
                    EXPANDING => return Err(Error::CycleDetected(tensor)),
                    _ => {}
                }
                state[tensor] = EXPANDING;
                stack.push((tensor, true));
                if let Some(producer) = self.tensors[tensor].producer {
                    for input in self.operators[producer].inputs.iter().flatten() {
                        if state[*input] == FRESH {
                            stack.push((*input, false));
                        } else if state[*input] == EXPANDING {
                            return Err(Error::CycleDetected(*input));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Cumulative activation size of a set of tensors
    pub fn total_size(&self, tensors: impl IntoIterator<Item = usize>) -> u64 {
        tensors.into_iter().map(|t| self.tensors[t].size()).sum()
    }

    /// First-use step per tensor under the current operator order: the
    /// producing step, or 0 for producer-less tensors.
    pub fn first_used(&self) -> Vec<usize> {
        self.tensors
            .iter()
            .map(|t| t.producer.unwrap_or(0))
            .collect()
    }

    /// Last-use step per tensor under the current operator order: the
    /// latest consuming step, or the operator count for tensors that stay
    /// live through the end.
    pub fn last_used(&self) -> Vec<usize> {
        let end = self.operators.len();
        self.tensors
            .iter()
            .map(|t| t.consumers.iter().copied().max().unwrap_or(end))
            .collect()
    }

    /// Tensor ids live at execution step `step`, given the lifetime maps
    /// from [`first_used`](Self::first_used) and
    /// [`last_used`](Self::last_used).
    pub fn working_set(&self, step: usize, first_used: &[usize], last_used: &[usize]) -> Vec<usize> {
        self.tensors
            .iter()
            .map(|t| t.id)
            .filter(|&id| first_used[id] <= step && step <= last_used[id])
            .collect()
    }
}
