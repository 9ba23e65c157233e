//! Split-K sizing.
//!
//! The reduction dimension of length `K_total` is padded to
//! `k_pad = k_batch * k0 * k1` and viewed as `(k_batch, k0, k1)`. Each of the
//! `k_batch` slices is reduced by its own set of blocks and the partial
//! results are accumulated into C.

use serde::{Deserialize, Serialize};

use crate::descriptor::Index;
use crate::error::{Error, Result};
use crate::gemm::tile::TileConfig;
use crate::math::ceil_div;

/// How many batches to split the reduction into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SplitK {
    /// One batch.
    #[default]
    Disabled,
    /// Fill `grid_size` blocks: as many batches as the M/N tiling leaves room for.
    Auto { grid_size: Index },
    /// As `Auto`, but never more batches than there are `k0_per_block * k1`
    /// chunks of the reduction.
    AutoClamped { grid_size: Index },
    /// Exactly `k_batch` batches.
    Fixed { k_batch: Index },
}

/// Derived split-K sizes for one GEMM problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SplitKPlan {
    pub k_total: Index,
    pub k_batch: Index,
    /// `k0` in units of `k0_per_block`.
    pub batch_len: Index,
    pub k0: Index,
    pub k1: Index,
    pub k_pad: Index,
}

impl SplitKPlan {
    pub fn new(m: Index, n: Index, k_total: Index, tile: &TileConfig, split_k: SplitK) -> Result<Self> {
        tile.validate()?;
        if m < 1 || n < 1 {
            return Err(Error::unsupported(format!(
                "GEMM of size {m}x{n} has no output"
            )));
        }
        if k_total < 1 {
            return Err(Error::unsupported("GEMM reduction length is zero"));
        }

        let gemm_k = ceil_div(k_total, tile.k1);
        let k_batch = match split_k {
            SplitK::Disabled => 1,
            SplitK::Auto { grid_size } => batches_for_grid(m, n, tile, grid_size)?,
            SplitK::AutoClamped { grid_size } => batches_for_grid(m, n, tile, grid_size)?
                .min(ceil_div(gemm_k, tile.k0_per_block)),
            SplitK::Fixed { k_batch } => {
                if k_batch < 1 {
                    return Err(Error::unsupported(format!(
                        "split-K batch count must be positive, got {k_batch}"
                    )));
                }
                k_batch
            }
        };
        let batch_len = ceil_div(gemm_k, tile.k0_per_block.saturating_mul(k_batch));
        let k0 = batch_len * tile.k0_per_block;
        let k_pad = k_batch
            .checked_mul(k0)
            .and_then(|len| len.checked_mul(tile.k1))
            .ok_or_else(|| {
                Error::unsupported(format!(
                    "{k_batch} split-K batches of {k0} x {} overflow the reduction length",
                    tile.k1
                ))
            })?;
        let plan = Self {
            k_total,
            k_batch,
            batch_len,
            k0,
            k1: tile.k1,
            k_pad,
        };
        log::debug!(
            "split-K for {m}x{n}x{k_total} ({split_k:?}): {} batches (k0 {}, k1 {}, padded K {})",
            plan.k_batch,
            plan.k0,
            plan.k1,
            plan.k_pad
        );
        Ok(plan)
    }

    /// Number of padding elements appended to the reduction.
    pub fn padding(&self) -> Index {
        self.k_pad - self.k_total
    }

    /// Partial results from several batches are summed into C.
    pub fn needs_accumulation(&self) -> bool {
        self.k_batch > 1
    }
}

/// `max(grid_size / GridMN, 1)` with `GridMN = max(M * N / (MPerBlock * NPerBlock), 1)`.
fn batches_for_grid(m: Index, n: Index, tile: &TileConfig, grid_size: Index) -> Result<Index> {
    if grid_size < 1 {
        return Err(Error::unsupported(format!(
            "split-K grid size must be positive, got {grid_size}"
        )));
    }
    let grid_mn = (m.saturating_mul(n) / tile.m_per_block.saturating_mul(tile.n_per_block)).max(1);
    Ok((grid_size / grid_mn).max(1))
}
