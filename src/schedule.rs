use std::collections::{BTreeSet, HashMap};

use tracing::debug;

use crate::graph::Graph;

/// Result of the memory-optimal ordering search
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    /// Peak activation footprint of the schedule in bytes
    pub peak_bytes: u64,
    /// Operator ids in execution order
    pub order: Vec<usize>,
}

/// Find the operator execution order minimising peak activation memory.
///
/// Backward subset search: a state is the set of tensors that must reside
/// in memory to satisfy everything scheduled after it, starting from the
/// graph outputs. At each state one producer is unapplied, replacing its
/// output with its inputs in the working set. Memoization is keyed by the
/// tensor set; the cache lives only for the duration of this call.
pub fn optimal_schedule(graph: &Graph) -> Schedule {
    let mut memo: HashMap<BTreeSet<usize>, (u64, Vec<usize>)> = HashMap::new();
    let outputs: BTreeSet<usize> = graph.outputs.iter().copied().collect();
    let (peak_bytes, order) = search(graph, outputs, &mut memo);
    debug!(
        states = memo.len(),
        peak_bytes, "operator order search finished"
    );
    Schedule { peak_bytes, order }
}

fn search(
    graph: &Graph,
    tensors: BTreeSet<usize>,
    memo: &mut HashMap<BTreeSet<usize>, (u64, Vec<usize>)>,
) -> (u64, Vec<usize>) {
    if let Some(hit) = memo.get(&tensors) {
        return hit.clone();
    }

    // producer-less members (graph inputs and constants) cannot be
    // unapplied; lift them out and carry their footprint on top of the
    // remaining search
    let producerless: Vec<usize> = tensors
        .iter()
        .copied()
        .filter(|&t| graph.tensors[t].producer.is_none())
        .collect();
    let result = if !producerless.is_empty() {
        let rest: BTreeSet<usize> = tensors
            .iter()
            .copied()
            .filter(|&t| graph.tensors[t].producer.is_some())
            .collect();
        let (upstream, order) = search(graph, rest, memo);
        let fixed = graph.total_size(producerless.iter().copied());
        (fixed + upstream, order)
    } else if tensors.is_empty() {
        (0, Vec::new())
    } else {
        let mut min_use = u64::MAX;
        let mut op_order = Vec::new();
        // try unapplying the producer of each working-set member; the
        // ordered iteration plus replace-on-equal makes ties resolve to
        // the largest tensor id, a total order, so results are
        // reproducible run to run
        for &t in &tensors {
            let Some(producer) = graph.tensors[t].producer else {
                continue;
            };
            // never unapply a producer whose output some other member
            // still depends on; this keeps each operator considered at
            // most once per path
            if tensors
                .iter()
                .filter(|&&r| r != t)
                .any(|&r| graph.predecessors(r).contains(&t))
            {
                continue;
            }
            let mut new_set: BTreeSet<usize> =
                tensors.iter().copied().filter(|&r| r != t).collect();
            new_set.extend(graph.operators[producer].non_empty_inputs());

            let (upstream, operators) = search(graph, new_set.clone(), memo);

            // the produced tensor briefly coexists with its inputs
            let mut in_memory = new_set;
            in_memory.insert(t);
            let mem_use = upstream.max(graph.total_size(in_memory));
            if mem_use <= min_use {
                min_use = mem_use;
                op_order = operators;
                op_order.push(producer);
            }
        }
        (min_use, op_order)
    };

    memo.insert(tensors, result.clone());
    result
}
