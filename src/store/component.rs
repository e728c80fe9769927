//! Component Schemas and Columnar Storage
//!
//! A component is a named record of fields with fixed scalar types. The
//! store owns one column (a contiguous array sized `max_entities`) per
//! field, addressed by entity index. Registration order of components and
//! declaration order of fields are stable and are part of both the
//! snapshot layout and the state-hash order.

use serde::{Deserialize, Serialize};

use crate::core::fixed::Fixed;
use crate::error::{EngineError, EngineResult};

/// Scalar types a component field can hold.
///
/// Fixed-point values are declared as `I32`. `F32` exists for
/// render-only data; simulation logic must not branch on it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarType {
    /// signed 8-bit
    I8,
    /// signed 16-bit
    I16,
    /// signed 32-bit (also Q16.16 fixed-point)
    I32,
    /// unsigned 8-bit
    U8,
    /// unsigned 16-bit
    U16,
    /// unsigned 32-bit
    U32,
    /// 32-bit float (render-only data)
    F32,
}

impl ScalarType {
    /// Wire size of one element in bytes.
    pub const fn size_bytes(self) -> usize {
        match self {
            ScalarType::I8 | ScalarType::U8 => 1,
            ScalarType::I16 | ScalarType::U16 => 2,
            ScalarType::I32 | ScalarType::U32 | ScalarType::F32 => 4,
        }
    }
}

/// A single field value.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    /// signed 8-bit
    I8(i8),
    /// signed 16-bit
    I16(i16),
    /// signed 32-bit / fixed-point
    I32(i32),
    /// unsigned 8-bit
    U8(u8),
    /// unsigned 16-bit
    U16(u16),
    /// unsigned 32-bit
    U32(u32),
    /// 32-bit float (render-only)
    F32(f32),
}

impl Value {
    /// Scalar type of this value.
    pub const fn scalar_type(self) -> ScalarType {
        match self {
            Value::I8(_) => ScalarType::I8,
            Value::I16(_) => ScalarType::I16,
            Value::I32(_) => ScalarType::I32,
            Value::U8(_) => ScalarType::U8,
            Value::U16(_) => ScalarType::U16,
            Value::U32(_) => ScalarType::U32,
            Value::F32(_) => ScalarType::F32,
        }
    }

    /// Zero of the given type.
    pub const fn zero(ty: ScalarType) -> Self {
        match ty {
            ScalarType::I8 => Value::I8(0),
            ScalarType::I16 => Value::I16(0),
            ScalarType::I32 => Value::I32(0),
            ScalarType::U8 => Value::U8(0),
            ScalarType::U16 => Value::U16(0),
            ScalarType::U32 => Value::U32(0),
            ScalarType::F32 => Value::F32(0.0),
        }
    }

    /// Raw bit pattern widened to 32 bits: what the state hash folds.
    ///
    /// Signed values sign-extend, unsigned zero-extend, floats keep their
    /// IEEE bits.
    pub fn bits(self) -> u32 {
        match self {
            Value::I8(v) => v as i32 as u32,
            Value::I16(v) => v as i32 as u32,
            Value::I32(v) => v as u32,
            Value::U8(v) => v as u32,
            Value::U16(v) => v as u32,
            Value::U32(v) => v,
            Value::F32(v) => v.to_bits(),
        }
    }

    /// Interpret as fixed-point; errors on non-I32 fields.
    pub fn as_fixed(self) -> EngineResult<Fixed> {
        match self {
            Value::I32(v) => Ok(v),
            other => Err(EngineError::Programmer(format!(
                "expected i32/fixed field, found {:?}",
                other.scalar_type()
            ))),
        }
    }

    /// Append the little-endian wire encoding of this value.
    pub fn encode_le(self, out: &mut Vec<u8>) {
        match self {
            Value::I8(v) => out.push(v as u8),
            Value::U8(v) => out.push(v),
            Value::I16(v) => out.extend_from_slice(&v.to_le_bytes()),
            Value::U16(v) => out.extend_from_slice(&v.to_le_bytes()),
            Value::I32(v) => out.extend_from_slice(&v.to_le_bytes()),
            Value::U32(v) => out.extend_from_slice(&v.to_le_bytes()),
            Value::F32(v) => out.extend_from_slice(&v.to_bits().to_le_bytes()),
        }
    }

    /// Decode one value of the given type from `bytes` at `offset`,
    /// advancing the offset.
    pub fn decode_le(ty: ScalarType, bytes: &[u8], offset: &mut usize) -> EngineResult<Value> {
        let size = ty.size_bytes();
        let end = *offset + size;
        let slice = bytes
            .get(*offset..end)
            .ok_or_else(|| EngineError::Protocol("truncated column data".into()))?;
        *offset = end;
        Ok(match ty {
            ScalarType::I8 => Value::I8(slice[0] as i8),
            ScalarType::U8 => Value::U8(slice[0]),
            ScalarType::I16 => Value::I16(i16::from_le_bytes([slice[0], slice[1]])),
            ScalarType::U16 => Value::U16(u16::from_le_bytes([slice[0], slice[1]])),
            ScalarType::I32 => Value::I32(i32::from_le_bytes([
                slice[0], slice[1], slice[2], slice[3],
            ])),
            ScalarType::U32 => Value::U32(u32::from_le_bytes([
                slice[0], slice[1], slice[2], slice[3],
            ])),
            ScalarType::F32 => Value::F32(f32::from_bits(u32::from_le_bytes([
                slice[0], slice[1], slice[2], slice[3],
            ]))),
        })
    }
}

/// One contiguous column of `max_entities` slots for a single field.
#[derive(Clone, Debug)]
pub enum Column {
    /// i8 slots
    I8(Vec<i8>),
    /// i16 slots
    I16(Vec<i16>),
    /// i32 slots
    I32(Vec<i32>),
    /// u8 slots
    U8(Vec<u8>),
    /// u16 slots
    U16(Vec<u16>),
    /// u32 slots
    U32(Vec<u32>),
    /// f32 slots
    F32(Vec<f32>),
}

impl Column {
    /// Allocate a zero-filled column of the given type and capacity.
    pub fn new(ty: ScalarType, capacity: usize) -> Self {
        match ty {
            ScalarType::I8 => Column::I8(vec![0; capacity]),
            ScalarType::I16 => Column::I16(vec![0; capacity]),
            ScalarType::I32 => Column::I32(vec![0; capacity]),
            ScalarType::U8 => Column::U8(vec![0; capacity]),
            ScalarType::U16 => Column::U16(vec![0; capacity]),
            ScalarType::U32 => Column::U32(vec![0; capacity]),
            ScalarType::F32 => Column::F32(vec![0.0; capacity]),
        }
    }

    /// Scalar type stored by this column.
    pub const fn scalar_type(&self) -> ScalarType {
        match self {
            Column::I8(_) => ScalarType::I8,
            Column::I16(_) => ScalarType::I16,
            Column::I32(_) => ScalarType::I32,
            Column::U8(_) => ScalarType::U8,
            Column::U16(_) => ScalarType::U16,
            Column::U32(_) => ScalarType::U32,
            Column::F32(_) => ScalarType::F32,
        }
    }

    /// Read the slot at `index`.
    pub fn get(&self, index: usize) -> Value {
        match self {
            Column::I8(v) => Value::I8(v[index]),
            Column::I16(v) => Value::I16(v[index]),
            Column::I32(v) => Value::I32(v[index]),
            Column::U8(v) => Value::U8(v[index]),
            Column::U16(v) => Value::U16(v[index]),
            Column::U32(v) => Value::U32(v[index]),
            Column::F32(v) => Value::F32(v[index]),
        }
    }

    /// Write the slot at `index`; the value type must match the column.
    pub fn set(&mut self, index: usize, value: Value) -> EngineResult<()> {
        match (self, value) {
            (Column::I8(v), Value::I8(x)) => v[index] = x,
            (Column::I16(v), Value::I16(x)) => v[index] = x,
            (Column::I32(v), Value::I32(x)) => v[index] = x,
            (Column::U8(v), Value::U8(x)) => v[index] = x,
            (Column::U16(v), Value::U16(x)) => v[index] = x,
            (Column::U32(v), Value::U32(x)) => v[index] = x,
            (Column::F32(v), Value::F32(x)) => v[index] = x,
            (col, val) => {
                return Err(EngineError::Programmer(format!(
                    "type mismatch: column {:?}, value {:?}",
                    col.scalar_type(),
                    val.scalar_type()
                )))
            }
        }
        Ok(())
    }

    /// Fast path for fixed-point columns (the common case in simulation).
    #[inline]
    pub fn get_i32(&self, index: usize) -> EngineResult<i32> {
        match self {
            Column::I32(v) => Ok(v[index]),
            other => Err(EngineError::Programmer(format!(
                "expected i32 column, found {:?}",
                other.scalar_type()
            ))),
        }
    }

    /// Fast path for fixed-point columns.
    #[inline]
    pub fn set_i32(&mut self, index: usize, value: i32) -> EngineResult<()> {
        match self {
            Column::I32(v) => {
                v[index] = value;
                Ok(())
            }
            other => Err(EngineError::Programmer(format!(
                "expected i32 column, found {:?}",
                other.scalar_type()
            ))),
        }
    }
}

/// One declared field of a component.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FieldDef {
    /// Field name, unique within the component.
    pub name: String,
    /// Scalar type of the column.
    pub ty: ScalarType,
    /// Default value installed on entity creation.
    pub default: Value,
}

impl FieldDef {
    /// Declare a field with an explicit default.
    pub fn new(name: impl Into<String>, default: Value) -> Self {
        Self {
            name: name.into(),
            ty: default.scalar_type(),
            default,
        }
    }

    /// Declare a fixed-point field (the common case).
    pub fn fixed(name: impl Into<String>, default: Fixed) -> Self {
        Self::new(name, Value::I32(default))
    }
}

/// A registered component: ordered fields plus a stable index.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ComponentDef {
    /// Component name, unique in the store.
    pub name: String,
    /// Stable registration index; part of the serialization protocol.
    pub index: u16,
    /// Fields in declaration order.
    pub fields: Vec<FieldDef>,
}

impl ComponentDef {
    /// Position of a field by name.
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }
}

/// A registered entity type: a named composition of components with
/// resolved per-field defaults.
#[derive(Clone, Debug)]
pub struct EntityTypeDef {
    /// Type name, unique in the store.
    pub name: String,
    /// Stable registration index; part of the serialization protocol.
    pub index: u16,
    /// Component indices this type is composed of, ascending.
    pub components: Vec<u16>,
    /// Per component (parallel to `components`): resolved defaults per
    /// field, component defaults merged with type-level overrides.
    pub defaults: Vec<Vec<Value>>,
    /// Client-local type: excluded from snapshots and the state hash.
    pub sync_none: bool,
}

impl EntityTypeDef {
    /// Whether this type carries the given component.
    pub fn has_component(&self, component: u16) -> bool {
        self.components.binary_search(&component).is_ok()
    }
}

// =============================================================================
// TESTS
// =============================================================================
