//! Element descriptors for device buffers and the host types that map to them.

use std::fmt;

use serde::Serialize;

/// Element type of a device buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    U8,
    I8,
    I32,
    I64,
    F16,
    F32,
    F64,
}

impl DType {
    /// Size of one element in bytes.
    pub const fn itemsize(self) -> usize {
        match self {
            DType::U8 | DType::I8 => 1,
            DType::F16 => 2,
            DType::I32 | DType::F32 => 4,
            DType::I64 | DType::F64 => 8,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DType::U8 => "u8",
            DType::I8 => "i8",
            DType::I32 => "i32",
            DType::I64 => "i64",
            DType::F16 => "f16",
            DType::F32 => "f32",
            DType::F64 => "f64",
        }
    }

    /// Parse a dtype name as printed by [`DType::name`].
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "u8" => DType::U8,
            "i8" => DType::I8,
            "i32" => DType::I32,
            "i64" => DType::I64,
            "f16" | "half" => DType::F16,
            "f32" | "float" => DType::F32,
            "f64" | "double" => DType::F64,
            _ => return None,
        })
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A plain-old-data host element with a matching [`DType`].
///
/// Copies move raw bytes, so only `Pod` types qualify.
pub trait HostElement: bytemuck::Pod + Send + Sync {
    const DTYPE: DType;
}

impl HostElement for u8 {
    const DTYPE: DType = DType::U8;
}

impl HostElement for i8 {
    const DTYPE: DType = DType::I8;
}

impl HostElement for i32 {
    const DTYPE: DType = DType::I32;
}

impl HostElement for i64 {
    const DTYPE: DType = DType::I64;
}

impl HostElement for half::f16 {
    const DTYPE: DType = DType::F16;
}

impl HostElement for f32 {
    const DTYPE: DType = DType::F32;
}

impl HostElement for f64 {
    const DTYPE: DType = DType::F64;
}
