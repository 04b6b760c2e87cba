//! Big-endian packing of fixed binary layouts.

use std::collections::BTreeMap;

use crate::error::{AppError, Result};

/// Binary type of one layout field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    U8,
    U16,
    /// Raw byte span of fixed width.
    Bytes(usize),
    /// Padding: consumed on unpack, zero filled on pack, never a key.
    Skip(usize),
}

impl FieldType {
    pub const fn width(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::U16 => 2,
            Self::Bytes(n) | Self::Skip(n) => n,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    pub ty: FieldType,
}

impl Field {
    pub const fn new(name: &'static str, ty: FieldType) -> Self {
        Self { name, ty }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    U8(u8),
    U16(u16),
    Bytes(Vec<u8>),
}

impl FieldValue {
    pub fn as_u8(&self) -> Option<u8> {
        match self {
            Self::U8(v) => Some(*v),
            _ => None,
        }
    }

    /// Integer value, widening `U8`.
    pub fn as_u16(&self) -> Option<u16> {
        match self {
            Self::U8(v) => Some(u16::from(*v)),
            Self::U16(v) => Some(*v),
            Self::Bytes(_) => None,
        }
    }
}

/// Decoded fields keyed by layout name.
pub type FieldMap = BTreeMap<&'static str, FieldValue>;

/// Total byte width of a layout.
pub fn layout_width(layout: &[Field]) -> usize {
    layout.iter().map(|f| f.ty.width()).sum()
}

/// Serialize `values` following `layout`.
///
/// Every non-skip field must be present with a matching type.
pub fn pack(layout: &[Field], values: &FieldMap) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(layout_width(layout));

    for field in layout {
        if let FieldType::Skip(n) = field.ty {
            out.resize(out.len() + n, 0);
            continue;
        }

        let value = values
            .get(field.name)
            .ok_or_else(|| AppError::decode(format!("missing field '{}'", field.name)))?;

        match (field.ty, value) {
            (FieldType::U8, FieldValue::U8(v)) => out.push(*v),
            (FieldType::U16, FieldValue::U16(v)) => out.extend_from_slice(&v.to_be_bytes()),
            (FieldType::Bytes(n), FieldValue::Bytes(b)) if b.len() == n => out.extend_from_slice(b),
            _ => {
                return Err(AppError::decode(format!(
                    "field '{}' does not fit {:?}",
                    field.name, field.ty
                )));
            }
        }
    }

    Ok(out)
}

/// Parse `bytes` following `layout`. The input must be exactly the layout width.
pub fn unpack(bytes: &[u8], layout: &[Field]) -> Result<FieldMap> {
    let expected = layout_width(layout);
    if bytes.len() != expected {
        return Err(AppError::decode(format!(
            "layout needs {expected} bytes, got {}",
            bytes.len()
        )));
    }

    let mut map = FieldMap::new();
    let mut offset = 0;

    for field in layout {
        let width = field.ty.width();
        let chunk = &bytes[offset..offset + width];
        offset += width;

        let value = match field.ty {
            FieldType::Skip(_) => continue,
            FieldType::U8 => FieldValue::U8(chunk[0]),
            FieldType::U16 => FieldValue::U16(u16::from_be_bytes([chunk[0], chunk[1]])),
            FieldType::Bytes(_) => FieldValue::Bytes(chunk.to_vec()),
        };
        map.insert(field.name, value);
    }

    Ok(map)
}
