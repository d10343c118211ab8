use std::collections::HashSet;

use crate::{ElementType, Error, Result};

/// A tensor in the model graph.
///
/// Producer and consumer references are operator ids, i.e. indices into
/// the owning graph's operator vector, so the tensor/operator cycle never
/// materialises as object references.
#[derive(Debug, Clone)]
pub struct Tensor {
    /// Position in the subgraph tensor table
    pub id: usize,
    pub name: String,
    pub shape: Vec<usize>,
    pub element_type: ElementType,
    /// Index into the model buffer table backing this tensor
    pub buffer: usize,
    /// Operator producing this tensor, if any
    pub producer: Option<usize>,
    /// Operators reading this tensor
    pub consumers: Vec<usize>,
    /// No producer and not a graph input: the tensor is a stored weight
    pub is_constant: bool,
    /// Transitive producer closure, filled in while building the graph
    pub(crate) predecessors: HashSet<usize>,
}

impl Tensor {
    /// Number of elements; scalars count as one
    pub fn element_count(&self) -> usize {
        self.shape.iter().product()
    }

    /// Activation footprint in bytes. Constants live in weight storage,
    /// not in activation memory, so they report zero.
    pub fn size(&self) -> u64 {
        if self.is_constant { 0 } else { self.const_size() }
    }

    /// Storage footprint in bytes regardless of constness
    pub fn const_size(&self) -> u64 {
        (self.element_count() * self.element_type.byte_size()) as u64
    }
}

/// Decode the little-endian bytes backing a tensor into widened integer
/// elements, flattened in storage order.
///
/// Unsigned 8-bit data is taken as-is; signed widths are reinterpreted
/// under little-endian ordering. Float widths have a known size but no
/// decoder here and fail with [`Error::UnsupportedType`].
pub fn decode_elements(tensor: &Tensor, bytes: &[u8]) -> Result<Vec<i64>> {
    let expected = tensor.element_count() * tensor.element_type.byte_size();
    if bytes.len() != expected {
        return Err(Error::MalformedModel(format!(
            "tensor {} expects {} buffer bytes, found {}",
            tensor.id,
            expected,
            bytes.len()
        )));
    }

    match tensor.element_type {
        ElementType::U8 => Ok(bytes.iter().map(|&b| b as i64).collect()),
        ElementType::I8 => Ok(bytes.iter().map(|&b| b as i8 as i64).collect()),
        ElementType::I16 => Ok(bytes
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]) as i64)
            .collect()),
        ElementType::I32 => Ok(bytes
            .chunks_exact(4)
            .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]) as i64)
            .collect()),
        ElementType::I64 => Ok(bytes
            .chunks_exact(8)
            .map(|c| i64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
            .collect()),
        ElementType::F16 | ElementType::F32 => Err(Error::UnsupportedType(tensor.element_type)),
    }
}

/// Re-encode widened integer elements into a tensor's storage type.
///
/// Values are narrowed with saturation so clustering centroids outside a
/// narrow type's range clamp instead of wrapping.
pub fn encode_elements(tensor: &Tensor, values: &[i64], out: &mut [u8]) -> Result<()> {
    let expected = tensor.element_count() * tensor.element_type.byte_size();
    if out.len() != expected || values.len() != tensor.element_count() {
        return Err(Error::UnwritableBuffer(format!(
            "tensor {} backing region does not match its shape",
            tensor.id
        )));
    }

    match tensor.element_type {
        ElementType::U8 => {
            for (slot, &v) in out.iter_mut().zip(values) {
                *slot = v.clamp(0, u8::MAX as i64) as u8;
            }
        }
        ElementType::I8 => {
            for (slot, &v) in out.iter_mut().zip(values) {
                *slot = v.clamp(i8::MIN as i64, i8::MAX as i64) as i8 as u8;
            }
        }
        ElementType::I16 => {
            for (chunk, &v) in out.chunks_exact_mut(2).zip(values) {
                let narrowed = v.clamp(i16::MIN as i64, i16::MAX as i64) as i16;
                chunk.copy_from_slice(&narrowed.to_le_bytes());
            }
        }
        ElementType::I32 => {
            for (chunk, &v) in out.chunks_exact_mut(4).zip(values) {
                let narrowed = v.clamp(i32::MIN as i64, i32::MAX as i64) as i32;
                chunk.copy_from_slice(&narrowed.to_le_bytes());
            }
        }
        ElementType::I64 => {
            for (chunk, &v) in out.chunks_exact_mut(8).zip(values) {
                chunk.copy_from_slice(&v.to_le_bytes());
            }
        }
        ElementType::F16 | ElementType::F32 => {
            return Err(Error::UnsupportedType(tensor.element_type));
        }
    }
    Ok(())
}
