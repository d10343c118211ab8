use tracing::{debug, info};

use crate::flatbuffer::ModelView;
use crate::graph::Graph;
use crate::{Error, Result};

/// Reorder the serialized operator vector in place so the model
/// deserializes with `order[i]` (an operator id under the current order)
/// at position `i`.
///
/// The operator vector is an array of u32 offsets, each relative to its
/// own slot. Moving the offset stored at slot `j` into slot `i` therefore
/// needs a `4 * (j - i)` correction; the operator sub-tables themselves
/// never move. Returns `false` without touching anything when the order
/// already matches.
///
/// On success the in-memory graph is renumbered to match: operator ids
/// become their new positions, producer/consumer references follow, and
/// the operator vector is resorted so `operators[i].id == i` again.
pub(crate) fn apply_operator_order(
    bytes: &mut [u8],
    graph: &mut Graph,
    order: &[usize],
) -> Result<bool> {
    let count = graph.operators.len();
    if order.len() != count {
        return Err(Error::MalformedModel(format!(
            "schedule covers {} of {} operators; outputs do not reach the rest",
            order.len(),
            count
        )));
    }

    if (0..count).all(|position| order[position] == position) {
        info!("operator order is already optimal");
        return Ok(false);
    }

    let (slots_start, slot_count) = {
        let view = ModelView::parse(bytes)?;
        view.subgraph(0)?.operator_slots()?
    };
    if slot_count != count {
        return Err(Error::MalformedModel(format!(
            "operator vector holds {} entries, graph has {}",
            slot_count, count
        )));
    }
    let slots_end = slots_start + 4 * count;
    if slots_end > bytes.len() {
        return Err(Error::UnwritableBuffer(format!(
            "operator vector {}..{} exceeds the model of {} bytes",
            slots_start,
            slots_end,
            bytes.len()
        )));
    }

    let slot_pos = |index: usize| slots_start + 4 * index;
    let snapshot: Vec<u32> = (0..count)
        .map(|index| {
            let pos = slot_pos(index);
            u32::from_le_bytes([bytes[pos], bytes[pos + 1], bytes[pos + 2], bytes[pos + 3]])
        })
        .collect();

    for (position, &op_id) in order.iter().enumerate() {
        // the pointee stays put, so the slot movement is compensated in
        // the stored offset
        let new_offset = snapshot[op_id] as i64 + 4 * (op_id as i64 - position as i64);
        debug_assert!(new_offset > 0);
        let pos = slot_pos(position);
        bytes[pos..pos + 4].copy_from_slice(&(new_offset as u32).to_le_bytes());
    }

    // renumber the in-memory graph instead of rebuilding it
    let mut new_position = vec![0usize; count];
    for (position, &op_id) in order.iter().enumerate() {
        new_position[op_id] = position;
    }
    for operator in &mut graph.operators {
        operator.id = new_position[operator.id];
    }
    for tensor in &mut graph.tensors {
        if let Some(producer) = tensor.producer {
            tensor.producer = Some(new_position[producer]);
        }
        for consumer in &mut tensor.consumers {
            *consumer = new_position[*consumer];
        }
    }
    graph.operators.sort_by_key(|operator| operator.id);

    debug!(operators = count, "patched operator indirection table");
    Ok(true)
}
