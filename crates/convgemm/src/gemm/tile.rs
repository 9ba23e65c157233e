//! Block tile configuration.

use serde::{Deserialize, Serialize};

use crate::descriptor::Index;
use crate::error::{Error, Result};

/// Which GEMM dimensions are right-padded up to a tile multiple.
///
/// The reduction dimension is always padded by the split-K sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GemmSpecialization {
    #[default]
    Default,
    MPadding,
    NPadding,
    #[serde(rename = "mn_padding")]
    MNPadding,
}

impl GemmSpecialization {
    pub fn pads_m(self) -> bool {
        matches!(self, GemmSpecialization::MPadding | GemmSpecialization::MNPadding)
    }

    pub fn pads_n(self) -> bool {
        matches!(self, GemmSpecialization::NPadding | GemmSpecialization::MNPadding)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GemmSpecialization::Default => "Default",
            GemmSpecialization::MPadding => "MPadding",
            GemmSpecialization::NPadding => "NPadding",
            GemmSpecialization::MNPadding => "MNPadding",
        }
    }
}

/// Work decomposition of one thread block.
///
/// A block computes an `m_per_block x n_per_block` tile of C, stepping
/// through the reduction `k0_per_block * k1` elements at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileConfig {
    pub block_size: Index,
    pub m_per_block: Index,
    pub n_per_block: Index,
    pub k0_per_block: Index,
    pub k1: Index,
    #[serde(default)]
    pub specialization: GemmSpecialization,
}

impl TileConfig {
    pub const fn new(
        block_size: Index,
        m_per_block: Index,
        n_per_block: Index,
        k0_per_block: Index,
        k1: Index,
    ) -> Self {
        Self {
            block_size,
            m_per_block,
            n_per_block,
            k0_per_block,
            k1,
            specialization: GemmSpecialization::Default,
        }
    }

    pub const fn with_specialization(mut self, specialization: GemmSpecialization) -> Self {
        self.specialization = specialization;
        self
    }

    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("block_size", self.block_size),
            ("m_per_block", self.m_per_block),
            ("n_per_block", self.n_per_block),
            ("k0_per_block", self.k0_per_block),
            ("k1", self.k1),
        ];
        for (name, value) in fields {
            if value < 1 {
                return Err(Error::unsupported(format!(
                    "tile {name} must be positive, got {value}"
                )));
            }
        }
        Ok(())
    }

    /// Human-readable instance name, e.g. `GemmTile<256, 128, 128, 4, 4, Default>`.
    pub fn type_string(&self) -> String {
        format!(
            "GemmTile<{}, {}, {}, {}, {}, {}>",
            self.block_size,
            self.m_per_block,
            self.n_per_block,
            self.k0_per_block,
            self.k1,
            self.specialization.as_str()
        )
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let tile: Self = serde_json::from_str(json)?;
        tile.validate()?;
        Ok(tile)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
