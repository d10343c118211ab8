#![allow(dead_code)]

//! Serializes minimal, valid TFLite flatbuffers so scenarios can run
//! hermetically instead of against a checked-in model file.
//!
//! Objects are laid out referrer-first with forward u32 offsets patched
//! in at the end; every table gets its vtable immediately in front of it.

use std::collections::HashMap;

pub const TYPE_F32: i8 = 0;
pub const TYPE_I32: i8 = 2;
pub const TYPE_U8: i8 = 3;

pub struct TensorSpec {
    pub name: String,
    pub shape: Vec<i32>,
    pub type_code: i8,
    pub buffer: u32,
}

impl TensorSpec {
    /// Activation tensor: u8 elements backed by the empty buffer 0, so
    /// byte sizes equal element counts
    pub fn activation(name: &str, shape: &[i32]) -> Self {
        TensorSpec {
            name: name.to_string(),
            shape: shape.to_vec(),
            type_code: TYPE_U8,
            buffer: 0,
        }
    }

    pub fn with_type(mut self, type_code: i8) -> Self {
        self.type_code = type_code;
        self
    }

    pub fn with_buffer(mut self, buffer: u32) -> Self {
        self.buffer = buffer;
        self
    }
}

pub struct OperatorSpec {
    pub opcode_index: u32,
    pub inputs: Vec<i32>,
    pub outputs: Vec<i32>,
    pub pool_filter: Option<(i32, i32)>,
}

impl OperatorSpec {
    pub fn new(opcode_index: u32, inputs: &[i32], outputs: &[i32]) -> Self {
        OperatorSpec {
            opcode_index,
            inputs: inputs.to_vec(),
            outputs: outputs.to_vec(),
            pool_filter: None,
        }
    }

    pub fn with_pool_filter(mut self, width: i32, height: i32) -> Self {
        self.pool_filter = Some((width, height));
        self
    }
}

pub struct ModelSpec {
    /// Builtin operator codes; operators reference them by index
    pub opcodes: Vec<i32>,
    pub tensors: Vec<TensorSpec>,
    pub operators: Vec<OperatorSpec>,
    /// Subgraph input tensor ids
    pub inputs: Vec<i32>,
    /// Subgraph output tensor ids
    pub outputs: Vec<i32>,
    /// Buffer table contents; index 0 stays empty by convention
    pub buffers: Vec<Vec<u8>>,
}

impl ModelSpec {
    pub fn build(&self) -> Vec<u8> {
        let mut b = Builder::default();

        let root = b.new_id();
        let opcodes_vec = b.new_id();
        let subgraphs_vec = b.new_id();
        let buffers_vec = b.new_id();
        let subgraph = b.new_id();
        let tensors_vec = b.new_id();
        let inputs_vec = b.new_id();
        let outputs_vec = b.new_id();
        let operators_vec = b.new_id();

        let opcode_ids: Vec<u32> = self.opcodes.iter().map(|_| b.new_id()).collect();
        let buffer_ids: Vec<u32> = self.buffers.iter().map(|_| b.new_id()).collect();
        let buffer_data_ids: Vec<Option<u32>> = self
            .buffers
            .iter()
            .map(|data| if data.is_empty() { None } else { Some(b.new_id()) })
            .collect();
        let tensor_ids: Vec<u32> = self.tensors.iter().map(|_| b.new_id()).collect();
        let tensor_shape_ids: Vec<Option<u32>> = self
            .tensors
            .iter()
            .map(|t| if t.shape.is_empty() { None } else { Some(b.new_id()) })
            .collect();
        let tensor_name_ids: Vec<u32> = self.tensors.iter().map(|_| b.new_id()).collect();
        let op_ids: Vec<u32> = self.operators.iter().map(|_| b.new_id()).collect();
        let op_input_ids: Vec<u32> = self.operators.iter().map(|_| b.new_id()).collect();
        let op_output_ids: Vec<u32> = self.operators.iter().map(|_| b.new_id()).collect();
        let op_option_ids: Vec<Option<u32>> = self
            .operators
            .iter()
            .map(|op| op.pool_filter.map(|_| b.new_id()))
            .collect();

        // file header: root offset plus identifier
        b.push_offset(root);
        b.push_bytes(b"TFL3");

        b.write_table(
            root,
            &[
                (4, Field::U32(3)), // schema version
                (6, Field::Offset(opcodes_vec)),
                (8, Field::Offset(subgraphs_vec)),
                (12, Field::Offset(buffers_vec)),
            ],
        );

        b.write_table_vector(opcodes_vec, &opcode_ids);
        for (id, &code) in opcode_ids.iter().zip(&self.opcodes) {
            b.write_table(
                *id,
                &[
                    (4, Field::I8(code.min(127) as i8)),
                    (10, Field::I32(code)),
                ],
            );
        }

        b.write_table_vector(subgraphs_vec, &[subgraph]);
        b.write_table(
            subgraph,
            &[
                (4, Field::Offset(tensors_vec)),
                (6, Field::Offset(inputs_vec)),
                (8, Field::Offset(outputs_vec)),
                (10, Field::Offset(operators_vec)),
            ],
        );

        b.write_table_vector(tensors_vec, &tensor_ids);
        b.write_i32_vector(inputs_vec, &self.inputs);
        b.write_i32_vector(outputs_vec, &self.outputs);
        b.write_table_vector(operators_vec, &op_ids);

        for (i, tensor) in self.tensors.iter().enumerate() {
            let mut fields = vec![
                (6, Field::I8(tensor.type_code)),
                (8, Field::U32(tensor.buffer)),
                (10, Field::Offset(tensor_name_ids[i])),
            ];
            if let Some(shape_id) = tensor_shape_ids[i] {
                fields.push((4, Field::Offset(shape_id)));
            }
            b.write_table(tensor_ids[i], &fields);
            if let Some(shape_id) = tensor_shape_ids[i] {
                b.write_i32_vector(shape_id, &tensor.shape);
            }
            b.write_string(tensor_name_ids[i], &tensor.name);
        }

        for (i, op) in self.operators.iter().enumerate() {
            let mut fields = vec![
                (4, Field::U32(op.opcode_index)),
                (6, Field::Offset(op_input_ids[i])),
                (8, Field::Offset(op_output_ids[i])),
            ];
            if let Some(option_id) = op_option_ids[i] {
                fields.push((12, Field::Offset(option_id)));
            }
            b.write_table(op_ids[i], &fields);
            b.write_i32_vector(op_input_ids[i], &op.inputs);
            b.write_i32_vector(op_output_ids[i], &op.outputs);
            if let (Some(option_id), Some((width, height))) = (op_option_ids[i], op.pool_filter) {
                b.write_table(
                    option_id,
                    &[(10, Field::I32(width)), (12, Field::I32(height))],
                );
            }
        }

        b.write_table_vector(buffers_vec, &buffer_ids);
        for (i, data) in self.buffers.iter().enumerate() {
            match buffer_data_ids[i] {
                Some(data_id) => {
                    b.write_table(buffer_ids[i], &[(4, Field::Offset(data_id))]);
                    b.write_byte_vector(data_id, data);
                }
                None => b.write_table(buffer_ids[i], &[]),
            }
        }

        b.finish()
    }
}

/// `operators` chained operators, each consuming the previous tensor;
/// every tensor is `size` bytes. Builtin codes 60, 61, … keep the
/// operators distinguishable after reordering.
pub fn chain_model(operators: usize, size: i32) -> Vec<u8> {
    let mut tensors = vec![TensorSpec::activation("serving_default_input", &[size])];
    for i in 0..operators {
        tensors.push(TensorSpec::activation(&format!("chain/{}", i), &[size]));
    }
    ModelSpec {
        opcodes: (0..operators).map(|i| 60 + i as i32).collect(),
        tensors,
        operators: (0..operators)
            .map(|i| OperatorSpec::new(i as u32, &[i as i32], &[i as i32 + 1]))
            .collect(),
        inputs: vec![0],
        outputs: vec![operators as i32],
        buffers: vec![Vec::new()],
    }
    .build()
}

/// Two independent chains joined at the end, stored so the small branch
/// runs last and its 900-byte input stays pinned across the big chain.
/// The memory-optimal order runs the small branch first.
pub fn two_chain_model() -> Vec<u8> {
    ModelSpec {
        opcodes: vec![60, 61, 62, 63],
        tensors: vec![
            TensorSpec::activation("input_a", &[100]),
            TensorSpec::activation("input_b", &[900]),
            TensorSpec::activation("features", &[4900]),
            TensorSpec::activation("squeezed", &[100]),
            TensorSpec::activation("side", &[100]),
            TensorSpec::activation("joined", &[50]),
        ],
        operators: vec![
            OperatorSpec::new(0, &[0], &[2]),
            OperatorSpec::new(1, &[2], &[3]),
            OperatorSpec::new(2, &[1], &[4]),
            OperatorSpec::new(3, &[3, 4], &[5]),
        ],
        inputs: vec![0, 1],
        outputs: vec![5],
        buffers: vec![Vec::new()],
    }
    .build()
}

#[derive(Clone, Copy)]
enum Field {
    U32(u32),
    I32(i32),
    I8(i8),
    Offset(u32),
}

impl Field {
    fn size(&self) -> usize {
        match self {
            Field::I8(_) => 1,
            _ => 4,
        }
    }
}

#[derive(Default)]
struct Builder {
    buf: Vec<u8>,
    /// (position of a u32 offset, object it must point at)
    fixups: Vec<(usize, u32)>,
    positions: HashMap<u32, usize>,
    next_id: u32,
}

impl Builder {
    fn new_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn align(&mut self, alignment: usize) {
        while self.buf.len() % alignment != 0 {
            self.buf.push(0);
        }
    }

    fn push_u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    fn push_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    fn push_i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    fn push_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    fn push_offset(&mut self, target: u32) {
        self.fixups.push((self.buf.len(), target));
        self.push_u32(0);
    }

    fn write_table(&mut self, id: u32, fields: &[(u16, Field)]) {
        let mut fields = fields.to_vec();
        fields.sort_by_key(|(slot, _)| *slot);

        // lay the field data out after the 4-byte vtable back-reference
        let mut layout = Vec::new();
        let mut cursor = 4usize;
        for (slot, field) in &fields {
            while cursor % field.size() != 0 {
                cursor += 1;
            }
            layout.push((*slot, cursor, *field));
            cursor += field.size();
        }
        let table_size = cursor.next_multiple_of(4);
        let max_slot = fields.last().map(|(slot, _)| *slot).unwrap_or(2) as usize;
        let vtable_size = max_slot + 2;

        // land the table itself on a 4-byte boundary
        while (self.buf.len() + vtable_size) % 4 != 0 {
            self.buf.push(0);
        }
        let vtable_pos = self.buf.len();
        self.push_u16(vtable_size as u16);
        self.push_u16(table_size as u16);
        for slot in (4..vtable_size).step_by(2) {
            let entry = layout
                .iter()
                .find(|(s, _, _)| *s as usize == slot)
                .map(|(_, offset, _)| *offset as u16)
                .unwrap_or(0);
            self.push_u16(entry);
        }

        let table_pos = self.buf.len();
        self.positions.insert(id, table_pos);
        self.push_i32((table_pos - vtable_pos) as i32);
        let mut cursor = 4usize;
        for (_, offset, field) in layout {
            while cursor < offset {
                self.buf.push(0);
                cursor += 1;
            }
            match field {
                Field::U32(value) => self.push_u32(value),
                Field::I32(value) => self.push_i32(value),
                Field::I8(value) => self.buf.push(value as u8),
                Field::Offset(target) => self.push_offset(target),
            }
            cursor += field.size();
        }
        while cursor < table_size {
            self.buf.push(0);
            cursor += 1;
        }
    }

    fn write_table_vector(&mut self, id: u32, elements: &[u32]) {
        self.align(4);
        self.positions.insert(id, self.buf.len());
        self.push_u32(elements.len() as u32);
        for &element in elements {
            self.push_offset(element);
        }
    }

    fn write_i32_vector(&mut self, id: u32, values: &[i32]) {
        self.align(4);
        self.positions.insert(id, self.buf.len());
        self.push_u32(values.len() as u32);
        for &value in values {
            self.push_i32(value);
        }
    }

    fn write_byte_vector(&mut self, id: u32, bytes: &[u8]) {
        self.align(4);
        self.positions.insert(id, self.buf.len());
        self.push_u32(bytes.len() as u32);
        self.push_bytes(bytes);
    }

    fn write_string(&mut self, id: u32, value: &str) {
        self.align(4);
        self.positions.insert(id, self.buf.len());
        self.push_u32(value.len() as u32);
        self.push_bytes(value.as_bytes());
        self.buf.push(0);
    }

    fn finish(mut self) -> Vec<u8> {
        for (pos, id) in &self.fixups {
            let target = self.positions[id];
            assert!(target > *pos, "flatbuffer offsets must point forward");
            let relative = (target - pos) as u32;
            self.buf[*pos..pos + 4].copy_from_slice(&relative.to_le_bytes());
        }
        self.buf
    }
}
