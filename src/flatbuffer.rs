//! Centralised access to the TFLite flatbuffer container. Keep all direct
//! byte-offset arithmetic in here so the rest of the crate only sees typed
//! table views and absolute positions.
//!
//! Layout rules this module relies on: a table starts with an i32 pointing
//! back to its vtable; the vtable stores u16 field offsets keyed by slot
//! (`4 + 2 * field_id`); table, vector and string fields hold a u32 offset
//! relative to the field's own location; vector elements of table type are
//! u32 offsets relative to their own slot. The last rule is what the
//! in-place operator reordering exploits.

use std::ops::Range;

use crate::{Error, Result};

// Model table slots
const MODEL_OPERATOR_CODES: u16 = 6;
const MODEL_SUBGRAPHS: u16 = 8;
const MODEL_BUFFERS: u16 = 12;

// OperatorCode table slots
const OPERATOR_CODE_DEPRECATED_BUILTIN: u16 = 4;
const OPERATOR_CODE_BUILTIN: u16 = 10;

// SubGraph table slots
const SUBGRAPH_TENSORS: u16 = 4;
const SUBGRAPH_INPUTS: u16 = 6;
const SUBGRAPH_OUTPUTS: u16 = 8;
const SUBGRAPH_OPERATORS: u16 = 10;

// Tensor table slots
const TENSOR_SHAPE: u16 = 4;
const TENSOR_TYPE: u16 = 6;
const TENSOR_BUFFER: u16 = 8;
const TENSOR_NAME: u16 = 10;

// Operator table slots
const OPERATOR_OPCODE_INDEX: u16 = 4;
const OPERATOR_INPUTS: u16 = 6;
const OPERATOR_OUTPUTS: u16 = 8;
const OPERATOR_BUILTIN_OPTIONS: u16 = 12;

// Pool2DOptions table slots
const POOL2D_FILTER_WIDTH: u16 = 10;
const POOL2D_FILTER_HEIGHT: u16 = 12;

// Buffer table slots
const BUFFER_DATA: u16 = 4;

fn truncated(what: &str, pos: usize) -> Error {
    Error::MalformedModel(format!("{} at byte {} is out of bounds", what, pos))
}

fn read_u16(buf: &[u8], pos: usize) -> Result<u16> {
    buf.get(pos..pos + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .ok_or_else(|| truncated("u16", pos))
}

fn read_u32(buf: &[u8], pos: usize) -> Result<u32> {
    buf.get(pos..pos + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| truncated("u32", pos))
}

fn read_i32(buf: &[u8], pos: usize) -> Result<i32> {
    read_u32(buf, pos).map(|v| v as i32)
}

fn read_i8(buf: &[u8], pos: usize) -> Result<i8> {
    buf.get(pos)
        .map(|&b| b as i8)
        .ok_or_else(|| truncated("i8", pos))
}

/// A flatbuffer table at an absolute buffer position
#[derive(Clone, Copy)]
pub(crate) struct Table<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Table<'a> {
    fn at(buf: &'a [u8], pos: usize) -> Result<Self> {
        // resolve the vtable once to validate the table header
        let table = Table { buf, pos };
        table.vtable_pos()?;
        Ok(table)
    }

    fn vtable_pos(&self) -> Result<usize> {
        let soffset = read_i32(self.buf, self.pos)? as i64;
        let vtable = self.pos as i64 - soffset;
        if vtable < 0 || vtable as usize + 4 > self.buf.len() {
            return Err(truncated("vtable", self.pos));
        }
        Ok(vtable as usize)
    }

    /// Absolute position of a field's value, or `None` when the field is
    /// absent from this table's vtable.
    fn field_pos(&self, slot: u16) -> Result<Option<usize>> {
        let vtable = self.vtable_pos()?;
        let vtable_size = read_u16(self.buf, vtable)? as usize;
        let slot = slot as usize;
        if slot + 2 > vtable_size {
            return Ok(None);
        }
        let offset = read_u16(self.buf, vtable + slot)? as usize;
        if offset == 0 {
            Ok(None)
        } else {
            Ok(Some(self.pos + offset))
        }
    }

    fn u32_field(&self, slot: u16, default: u32) -> Result<u32> {
        match self.field_pos(slot)? {
            Some(pos) => read_u32(self.buf, pos),
            None => Ok(default),
        }
    }

    fn i32_field(&self, slot: u16, default: i32) -> Result<i32> {
        match self.field_pos(slot)? {
            Some(pos) => read_i32(self.buf, pos),
            None => Ok(default),
        }
    }

    fn i8_field(&self, slot: u16, default: i8) -> Result<i8> {
        match self.field_pos(slot)? {
            Some(pos) => read_i8(self.buf, pos),
            None => Ok(default),
        }
    }

    /// Follow an indirect field (table, vector or string offset)
    fn offset_field(&self, slot: u16) -> Result<Option<usize>> {
        match self.field_pos(slot)? {
            Some(pos) => {
                let target = pos + read_u32(self.buf, pos)? as usize;
                if target >= self.buf.len() {
                    return Err(truncated("offset target", pos));
                }
                Ok(Some(target))
            }
            None => Ok(None),
        }
    }

    fn table_field(&self, slot: u16) -> Result<Option<Table<'a>>> {
        match self.offset_field(slot)? {
            Some(pos) => Ok(Some(Table::at(self.buf, pos)?)),
            None => Ok(None),
        }
    }

    fn vector_field(&self, slot: u16) -> Result<Option<Vector<'a>>> {
        match self.offset_field(slot)? {
            Some(pos) => Ok(Some(Vector::at(self.buf, pos)?)),
            None => Ok(None),
        }
    }

    fn string_field(&self, slot: u16) -> Result<Option<&'a str>> {
        match self.offset_field(slot)? {
            Some(pos) => {
                let bytes = Vector::at(self.buf, pos)?.bytes()?;
                let s = std::str::from_utf8(bytes).map_err(|_| {
                    Error::MalformedModel(format!("string at byte {} is not valid UTF-8", pos))
                })?;
                Ok(Some(s))
            }
            None => Ok(None),
        }
    }
}

/// A flatbuffer vector: length prefix plus densely packed elements
#[derive(Clone, Copy)]
pub(crate) struct Vector<'a> {
    buf: &'a [u8],
    pos: usize,
    len: usize,
}

impl<'a> Vector<'a> {
    fn at(buf: &'a [u8], pos: usize) -> Result<Self> {
        let len = read_u32(buf, pos)? as usize;
        Ok(Vector { buf, pos, len })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Absolute position of the first element
    pub fn elements_pos(&self) -> usize {
        self.pos + 4
    }

    /// Contents of a u8 vector
    pub fn bytes(&self) -> Result<&'a [u8]> {
        self.buf
            .get(self.elements_pos()..self.elements_pos() + self.len)
            .ok_or_else(|| truncated("byte vector", self.pos))
    }

    /// Absolute byte range covered by a u8 vector's contents
    pub fn byte_region(&self) -> Range<usize> {
        self.elements_pos()..self.elements_pos() + self.len
    }

    fn i32_at(&self, index: usize) -> Result<i32> {
        if index >= self.len {
            return Err(truncated("vector element", self.pos));
        }
        read_i32(self.buf, self.elements_pos() + 4 * index)
    }

    /// Collect an i32 vector
    pub fn i32s(&self) -> Result<Vec<i32>> {
        (0..self.len).map(|i| self.i32_at(i)).collect()
    }

    /// Follow the table offset stored in element `index`
    pub fn table_at(&self, index: usize) -> Result<Table<'a>> {
        if index >= self.len {
            return Err(truncated("vector element", self.pos));
        }
        let slot = self.elements_pos() + 4 * index;
        let target = slot + read_u32(self.buf, slot)? as usize;
        if target >= self.buf.len() {
            return Err(truncated("vector table target", slot));
        }
        Table::at(self.buf, target)
    }
}

/// Read-only view over a serialized model
pub(crate) struct ModelView<'a> {
    root: Table<'a>,
}

impl<'a> ModelView<'a> {
    /// Resolve the root table of a serialized model
    pub fn parse(buf: &'a [u8]) -> Result<Self> {
        if buf.len() < 8 {
            return Err(Error::MalformedModel(
                "file is shorter than a flatbuffer header".to_string(),
            ));
        }
        let root_pos = read_u32(buf, 0)? as usize;
        if root_pos >= buf.len() {
            return Err(truncated("root table", 0));
        }
        Ok(ModelView {
            root: Table::at(buf, root_pos)?,
        })
    }

    pub fn subgraph(&self, index: usize) -> Result<SubGraphView<'a>> {
        let subgraphs = self
            .root
            .vector_field(MODEL_SUBGRAPHS)?
            .filter(|v| index < v.len())
            .ok_or_else(|| Error::MalformedModel(format!("model has no subgraph {}", index)))?;
        Ok(SubGraphView {
            table: subgraphs.table_at(index)?,
        })
    }

    /// Resolve an operator-code index to its builtin operator code
    pub fn builtin_code(&self, opcode_index: u32) -> Result<i32> {
        let codes = self
            .root
            .vector_field(MODEL_OPERATOR_CODES)?
            .ok_or_else(|| Error::MalformedModel("model has no operator codes".to_string()))?;
        let index = opcode_index as usize;
        if index >= codes.len() {
            return Err(Error::MalformedModel(format!(
                "opcode index {} outside the operator-code table of length {}",
                index,
                codes.len()
            )));
        }
        let code = codes.table_at(index)?;
        // builtin codes above 127 moved to a wider field; the effective
        // code is the larger of the two
        let deprecated = code.i8_field(OPERATOR_CODE_DEPRECATED_BUILTIN, 0)? as i32;
        let builtin = code.i32_field(OPERATOR_CODE_BUILTIN, 0)?;
        Ok(deprecated.max(builtin))
    }

    /// Absolute byte range of the data backing buffer `index`, if any
    pub fn buffer_region(&self, index: usize) -> Result<Option<Range<usize>>> {
        let buffers = self
            .root
            .vector_field(MODEL_BUFFERS)?
            .ok_or_else(|| Error::MalformedModel("model has no buffer table".to_string()))?;
        if index >= buffers.len() {
            return Err(Error::MalformedModel(format!(
                "buffer index {} outside the buffer table of length {}",
                index,
                buffers.len()
            )));
        }
        let buffer = buffers.table_at(index)?;
        match buffer.vector_field(BUFFER_DATA)? {
            Some(data) if data.len() > 0 => Ok(Some(data.byte_region())),
            _ => Ok(None),
        }
    }
}

/// Read-only view over one subgraph table
pub(crate) struct SubGraphView<'a> {
    table: Table<'a>,
}

impl<'a> SubGraphView<'a> {
    fn tensors(&self) -> Result<Vector<'a>> {
        self.table
            .vector_field(SUBGRAPH_TENSORS)?
            .ok_or_else(|| Error::MalformedModel("subgraph has no tensor table".to_string()))
    }

    fn operators(&self) -> Result<Vector<'a>> {
        self.table
            .vector_field(SUBGRAPH_OPERATORS)?
            .ok_or_else(|| Error::MalformedModel("subgraph has no operator vector".to_string()))
    }

    pub fn tensor_count(&self) -> Result<usize> {
        Ok(self.tensors()?.len())
    }

    pub fn operator_count(&self) -> Result<usize> {
        Ok(self.operators()?.len())
    }

    pub fn tensor(&self, index: usize) -> Result<TensorView<'a>> {
        Ok(TensorView {
            table: self.tensors()?.table_at(index)?,
        })
    }

    pub fn operator(&self, index: usize) -> Result<OperatorView<'a>> {
        Ok(OperatorView {
            table: self.operators()?.table_at(index)?,
        })
    }

    pub fn input_indices(&self) -> Result<Vec<i32>> {
        match self.table.vector_field(SUBGRAPH_INPUTS)? {
            Some(inputs) => inputs.i32s(),
            None => Ok(Vec::new()),
        }
    }

    pub fn output_indices(&self) -> Result<Vec<i32>> {
        match self.table.vector_field(SUBGRAPH_OUTPUTS)? {
            Some(outputs) => outputs.i32s(),
            None => Ok(Vec::new()),
        }
    }

    /// Absolute position of the operator vector's first offset slot plus
    /// the slot count. This is the indirection table the rewriter patches.
    pub fn operator_slots(&self) -> Result<(usize, usize)> {
        let operators = self.operators()?;
        Ok((operators.elements_pos(), operators.len()))
    }
}

/// Read-only view over one tensor table
pub(crate) struct TensorView<'a> {
    table: Table<'a>,
}

impl TensorView<'_> {
    pub fn shape(&self) -> Result<Vec<i32>> {
        match self.table.vector_field(TENSOR_SHAPE)? {
            Some(shape) => shape.i32s(),
            None => Ok(Vec::new()),
        }
    }

    pub fn type_code(&self) -> Result<i8> {
        self.table.i8_field(TENSOR_TYPE, 0)
    }

    pub fn buffer_index(&self) -> Result<u32> {
        self.table.u32_field(TENSOR_BUFFER, 0)
    }

    pub fn name(&self) -> Result<String> {
        Ok(self
            .table
            .string_field(TENSOR_NAME)?
            .unwrap_or_default()
            .to_string())
    }
}

/// Read-only view over one operator table
pub(crate) struct OperatorView<'a> {
    table: Table<'a>,
}

impl OperatorView<'_> {
    pub fn opcode_index(&self) -> Result<u32> {
        self.table.u32_field(OPERATOR_OPCODE_INDEX, 0)
    }

    pub fn input_indices(&self) -> Result<Vec<i32>> {
        match self.table.vector_field(OPERATOR_INPUTS)? {
            Some(inputs) => inputs.i32s(),
            None => Ok(Vec::new()),
        }
    }

    pub fn output_indices(&self) -> Result<Vec<i32>> {
        match self.table.vector_field(OPERATOR_OUTPUTS)? {
            Some(outputs) => outputs.i32s(),
            None => Ok(Vec::new()),
        }
    }

    /// Pooling filter geometry `(width, height)` from the builtin options
    pub fn pool_filter(&self) -> Result<Option<(i32, i32)>> {
        match self.table.table_field(OPERATOR_BUILTIN_OPTIONS)? {
            Some(options) => {
                let width = options.i32_field(POOL2D_FILTER_WIDTH, 0)?;
                let height = options.i32_field(POOL2D_FILTER_HEIGHT, 0)?;
                Ok(Some((width, height)))
            }
            None => Ok(None),
        }
    }
}
