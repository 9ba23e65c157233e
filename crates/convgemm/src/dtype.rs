//! Element types used for the byte estimates on convolution parameters.

use serde::{Deserialize, Serialize};

/// Scalar element type of a convolution operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    F32,
    F16,
    BF16,
    I8,
    I32,
}

impl DataType {
    /// Returns the number of bytes required per scalar element.
    pub fn size_in_bytes(self) -> u64 {
        match self {
            DataType::F32 | DataType::I32 => 4,
            DataType::F16 | DataType::BF16 => 2,
            DataType::I8 => 1,
        }
    }
}
