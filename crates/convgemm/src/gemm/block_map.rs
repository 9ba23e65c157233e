//! Mapping from a flat block id to the C tile and reduction batch it owns.

use crate::descriptor::{Index, Indices, StageBuilder, TensorDescriptor, Transform};
use crate::dims;
use crate::error::{Error, Result};
use crate::gemm::problem::GemmProblem;
use crate::gemm::tile::TileConfig;
use crate::math::ceil_div;

/// Block ids enumerate `(k_batch, m0, n0)` in row-major order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockToCTileMap {
    tiles: TensorDescriptor,
    blocks: TensorDescriptor,
}

impl BlockToCTileMap {
    pub fn new(problem: &GemmProblem, tile: &TileConfig) -> Result<Self> {
        tile.validate()?;
        let m0 = ceil_div(problem.m_padded(), tile.m_per_block);
        let n0 = ceil_div(problem.n_padded(), tile.n_per_block);
        Self::from_grid(problem.split_k.k_batch, m0, n0)
    }

    pub fn from_grid(k_batch: Index, m0: Index, n0: Index) -> Result<Self> {
        let tiles = TensorDescriptor::packed(&[k_batch, m0, n0])?;
        let mut merge = StageBuilder::new();
        merge.push(Transform::merge(&[k_batch, m0, n0])?, dims![0, 1, 2]);
        let blocks = merge.build(&tiles)?;
        Ok(Self { tiles, blocks })
    }

    pub fn grid_size(&self) -> Index {
        self.blocks.length(0)
    }

    /// `[k_batch, m0, n0]` owned by `block_id`.
    pub fn tile_index(&self, block_id: Index) -> Result<Indices> {
        if !(0..self.grid_size()).contains(&block_id) {
            return Err(Error::unsupported(format!(
                "block id {block_id} outside a grid of {}",
                self.grid_size()
            )));
        }
        self.blocks.calculate_source_index(&[block_id])
    }

    pub fn block_id(&self, k_batch: Index, m0: Index, n0: Index) -> Result<Index> {
        self.tiles.calculate_offset(&[k_batch, m0, n0])
    }
}
