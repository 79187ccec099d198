use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Integer sample types a recording may carry on disk.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
pub enum Dtype {
    #[strum(to_string = "int16", serialize = "<i2", serialize = "i2")]
    Int16,
    #[strum(to_string = "int32", serialize = "<i4", serialize = "i4")]
    Int32,
}

impl Dtype {
    pub fn itemsize(self) -> usize {
        match self {
            Dtype::Int16 => 2,
            Dtype::Int32 => 4,
        }
    }

    /// Inclusive range of representable values.
    pub fn range(self) -> (i64, i64) {
        match self {
            Dtype::Int16 => (i16::MIN as i64, i16::MAX as i64),
            Dtype::Int32 => (i32::MIN as i64, i32::MAX as i64),
        }
    }

    pub fn clamp(self, value: i64) -> i32 {
        let (lo, hi) = self.range();
        value.clamp(lo, hi) as i32
    }

    /// Numpy array-interface type string, as written in array metadata.
    pub fn typestr(self) -> &'static str {
        match self {
            Dtype::Int16 => "<i2",
            Dtype::Int32 => "<i4",
        }
    }

    pub(crate) fn code(self) -> u8 {
        match self {
            Dtype::Int16 => 1,
            Dtype::Int32 => 2,
        }
    }

    pub(crate) fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Dtype::Int16),
            2 => Some(Dtype::Int32),
            _ => None,
        }
    }

    /// Decode little-endian samples, appending to `out`.
    pub fn read_le(self, bytes: &[u8], out: &mut Vec<i32>) {
        match self {
            Dtype::Int16 => out.extend(
                bytes
                    .chunks_exact(2)
                    .map(|b| i16::from_le_bytes([b[0], b[1]]) as i32),
            ),
            Dtype::Int32 => out.extend(
                bytes
                    .chunks_exact(4)
                    .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]])),
            ),
        }
    }
}
