use std::collections::HashSet;
use std::fs;
use std::path::Path;

use tracing::info;

use crate::cost::{self, CostWeights};
use crate::flatbuffer::ModelView;
use crate::graph::Graph;
use crate::report::{self, ScheduleRow};
use crate::schedule::{self, Schedule};
use crate::tensor::decode_elements;
use crate::{Result, cluster, rewriter};

/// Main model container: the serialized bytes plus the graph built from
/// them.
///
/// The bytes stay owned here for the whole lifetime of the analysis so
/// the in-place passes (operator reordering, weight clustering) can
/// mutate them directly. Everything outside the regions they touch is
/// preserved byte for byte.
pub struct TfliteModel {
    model_bytes: Vec<u8>,
    graph: Graph,
    best_schedule: Option<Schedule>,
}

impl TfliteModel {
    /// Load a serialized model from a file path
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::load_from_bytes(fs::read(path)?)
    }

    /// Load a serialized model from owned bytes
    pub fn load_from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let graph = {
            let view = ModelView::parse(&bytes)?;
            Graph::from_model_view(&view)?
        };
        Ok(TfliteModel {
            model_bytes: bytes,
            graph,
            best_schedule: None,
        })
    }

    /// Write the (possibly patched) model bytes out
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::write(path, &self.model_bytes)?;
        Ok(())
    }

    /// The serialized model in its current state
    pub fn model_bytes(&self) -> &[u8] {
        &self.model_bytes
    }

    /// The operator/tensor graph of the primary subgraph
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// The memory-optimal schedule for this graph.
    ///
    /// The search result is cached; the first call pays for the subset
    /// search, later calls are free.
    pub fn best_peak_memory_usage(&mut self) -> &Schedule {
        self.best_schedule
            .get_or_insert_with(|| schedule::optimal_schedule(&self.graph))
    }

    /// Reorder the stored operators into the memory-optimal schedule by
    /// patching the serialized operator indirection table in place.
    ///
    /// A model that is already optimally ordered is left untouched.
    /// Running this twice is a no-op the second time.
    pub fn optimize_memory(&mut self) -> Result<()> {
        let (peak_bytes, order) = {
            let best = self.best_peak_memory_usage();
            (best.peak_bytes, best.order.clone())
        };
        let changed = rewriter::apply_operator_order(&mut self.model_bytes, &mut self.graph, &order)?;
        if changed {
            info!(peak_bytes, "reordered operators for minimal peak memory");
            // under the new numbering the optimal order is the identity
            if let Some(best) = &mut self.best_schedule {
                best.order = (0..order.len()).collect();
            }
        }
        Ok(())
    }

    /// Reorder the stored operators into an explicit order, patching the
    /// serialized indirection table in place. `order[i]` is the operator
    /// id (under the current order) to execute at position `i`.
    ///
    /// Returns `false` when the order already matches and nothing was
    /// written.
    pub fn reorder_operators(&mut self, order: &[usize]) -> Result<bool> {
        let changed = rewriter::apply_operator_order(&mut self.model_bytes, &mut self.graph, order)?;
        if changed {
            // the cached search result refers to the old numbering
            self.best_schedule = None;
        }
        Ok(changed)
    }

    /// Cluster the kernel weights of parameterised operators into
    /// `n_clusters` centroids, overwriting the stored buffers in place
    pub fn cluster_weights(&mut self, n_clusters: usize) -> Result<()> {
        cluster::cluster_weights(&mut self.model_bytes, &self.graph, n_clusters)
    }

    /// Decode the stored buffer backing a tensor into widened integer
    /// elements, or `None` for tensors without stored data (activations)
    pub fn tensor_data(&self, tensor_id: usize) -> Result<Option<Vec<i64>>> {
        let tensor = self.graph.tensors.get(tensor_id).ok_or_else(|| {
            crate::Error::InvalidArgument(format!("no tensor with id {}", tensor_id))
        })?;
        let view = ModelView::parse(&self.model_bytes)?;
        match view.buffer_region(tensor.buffer)? {
            Some(region) => decode_elements(tensor, &self.model_bytes[region]).map(Some),
            None => Ok(None),
        }
    }

    /// Peak activation memory of the *current* operator order
    pub fn peak_memory_usage(&self) -> u64 {
        self.execution_schedule(CostWeights::default())
            .iter()
            .map(|row| row.memory_bytes)
            .max()
            .unwrap_or(0)
    }

    /// Total weighted multiply-accumulate count over all operators
    pub fn inference_latency(&self, weights: CostWeights) -> u64 {
        self.graph
            .operators
            .iter()
            .map(|op| cost::macs_for_op(&self.graph, op, weights))
            .sum()
    }

    /// Per-step working sets and costs under the current operator order
    pub fn execution_schedule(&self, weights: CostWeights) -> Vec<ScheduleRow> {
        let first_used = self.graph.first_used();
        let last_used = self.graph.last_used();

        self.graph
            .operators
            .iter()
            .map(|op| {
                let working_set = self.graph.working_set(op.id, &first_used, &last_used);
                let memory_bytes = self.graph.total_size(working_set.iter().copied());

                let inputs: HashSet<usize> = op.non_empty_inputs().collect();
                let input_bytes = self.graph.total_size(inputs.iter().copied());
                let output_bytes = self.graph.tensors[op.output].size();
                let other_bytes = self.graph.total_size(
                    working_set
                        .iter()
                        .copied()
                        .filter(|t| !inputs.contains(t) && *t != op.output),
                );
                debug_assert_eq!(input_bytes + output_bytes + other_bytes, memory_bytes);

                ScheduleRow {
                    step: op.id,
                    output_name: self.graph.tensors[op.output].name.clone(),
                    live_tensors: working_set
                        .into_iter()
                        .filter(|&t| self.graph.tensors[t].size() != 0)
                        .collect(),
                    memory_bytes,
                    macs: cost::macs_for_op(&self.graph, op, weights),
                    weight_bytes: cost::weight_bytes(&self.graph, op),
                    input_bytes,
                    output_bytes,
                    other_bytes,
                }
            })
            .collect()
    }

    /// Print the tensor table and the execution schedule, followed by the
    /// totals. Returns `(total_macs, total_weight_bytes)`.
    pub fn print_model_analysis(&self, weights: CostWeights) -> (u64, u64) {
        println!("Tensor information (weights excluded):");
        println!("{}", report::render_tensor_table(&self.graph));
        println!();

        let rows = self.execution_schedule(weights);
        println!("Operator execution schedule:");
        println!("{}", report::render_schedule_table(&rows));

        let peak = rows.iter().map(|row| row.memory_bytes).max().unwrap_or(0);
        let total_macs: u64 = rows.iter().map(|row| row.macs).sum();
        let total_weight_bytes: u64 = rows.iter().map(|row| row.weight_bytes).sum();
        println!(
            "Current peak memory usage: {} B",
            report::group_digits(peak)
        );
        println!("Total MACs: {}", report::group_digits(total_macs));
        println!(
            "Total weight size: {}",
            report::group_digits(total_weight_bytes)
        );
        println!();

        (total_macs, total_weight_bytes)
    }

    /// Write `tensor_details.csv` and `execution_schedule_info.csv` into
    /// `folder`, creating it if needed
    pub fn write_csv_reports(&self, folder: impl AsRef<Path>, weights: CostWeights) -> Result<()> {
        let folder = folder.as_ref();
        fs::create_dir_all(folder)?;
        report::write_tensor_csv(&self.graph, &folder.join("tensor_details.csv"))?;
        report::write_schedule_csv(
            &self.execution_schedule(weights),
            &folder.join("execution_schedule_info.csv"),
        )
    }

    /// Render the per-step memory usage as a stacked bar chart
    pub fn plot_memory_usage(&self, path: impl AsRef<Path>) -> Result<()> {
        report::plot_memory_usage(
            &self.execution_schedule(CostWeights::default()),
            path.as_ref(),
        )
    }
}
