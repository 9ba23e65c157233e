//! A GEMM problem ready for a tiled kernel.

use serde::{Deserialize, Serialize};

use crate::descriptor::{Index, StageBuilder, TensorDescriptor, Transform};
use crate::dims;
use crate::error::{Error, Result};
use crate::gemm::split_k::{SplitK, SplitKPlan};
use crate::gemm::tile::TileConfig;
use crate::math::{ceil_div, round_up};

/// Logical GEMM extents before any padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GemmSizes {
    pub m: Index,
    pub n: Index,
    pub k_total: Index,
}

/// `C[m, n] += Σ A[kb, k0, m, k1] * B[kb, k0, n, k1]`.
///
/// * `a`: `[k_batch, k0, M', k1]`
/// * `b`: `[k_batch, k0, N', k1]`
/// * `c`: `[M', N']`
///
/// `M'`/`N'` are M/N right-padded to the tile when the tile's specialization
/// asks for it. Coordinates in any padding read as zero and are not written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GemmProblem {
    pub a: TensorDescriptor,
    pub b: TensorDescriptor,
    pub c: TensorDescriptor,
    pub sizes: GemmSizes,
    pub split_k: SplitKPlan,
}

impl GemmProblem {
    /// Finalises K-major operand views `a: (K, M)`, `b: (K, N)` and
    /// `c: (M, N)`: pads and splits K, and pads M/N if requested.
    pub fn from_k_major(
        a: &TensorDescriptor,
        b: &TensorDescriptor,
        c: &TensorDescriptor,
        tile: &TileConfig,
        split_k: SplitK,
    ) -> Result<Self> {
        for (name, desc) in [("A", a), ("B", b), ("C", c)] {
            if desc.num_dims() != 2 {
                return Err(Error::shape(
                    "GemmProblem",
                    format!("operand {name} must be 2-d, got {desc}"),
                ));
            }
        }
        let sizes = GemmSizes {
            m: c.length(0),
            n: c.length(1),
            k_total: a.length(0),
        };
        if b.length(0) != sizes.k_total || a.length(1) != sizes.m || b.length(1) != sizes.n {
            return Err(Error::shape(
                "GemmProblem",
                format!("operands {a} x {b} do not produce {c}"),
            ));
        }

        let plan = SplitKPlan::new(sizes.m, sizes.n, sizes.k_total, tile, split_k)?;
        let m_pad = if tile.specialization.pads_m() {
            round_up(sizes.m, tile.m_per_block) - sizes.m
        } else {
            0
        };
        let n_pad = if tile.specialization.pads_n() {
            round_up(sizes.n, tile.n_per_block) - sizes.n
        } else {
            0
        };

        let mut c_stage = StageBuilder::new();
        c_stage.push(right_pad_or_pass(sizes.m, m_pad)?, dims![0]);
        c_stage.push(right_pad_or_pass(sizes.n, n_pad)?, dims![1]);

        Ok(Self {
            a: split_reduction(a, &plan, m_pad)?,
            b: split_reduction(b, &plan, n_pad)?,
            c: c_stage.build(c)?,
            sizes,
            split_k: plan,
        })
    }

    pub fn m_padded(&self) -> Index {
        self.c.length(0)
    }

    pub fn n_padded(&self) -> Index {
        self.c.length(1)
    }

    /// Admission check a tiled kernel applies before launch.
    pub fn check_validity(&self, tile: &TileConfig) -> Result<()> {
        tile.validate()?;
        if self.a.num_dims() != 4 || self.b.num_dims() != 4 || self.c.num_dims() != 2 {
            return Err(Error::unsupported(format!(
                "operands {} x {} -> {} are not in [KBatch, K0, X, K1] form",
                self.a, self.b, self.c
            )));
        }
        let (a, b) = (self.a.lengths(), self.b.lengths());
        if a[0] != b[0] || a[1] != b[1] || a[3] != b[3] {
            return Err(Error::unsupported(format!(
                "A {a:?} and B {b:?} disagree on the reduction split"
            )));
        }
        if self.c.length(0) != a[2] || self.c.length(1) != b[2] {
            return Err(Error::unsupported(format!(
                "C {} does not match A {a:?} and B {b:?}",
                self.c
            )));
        }
        if a[3] != tile.k1 {
            return Err(Error::unsupported(format!(
                "K1 {} does not match tile K1 {}",
                a[3], tile.k1
            )));
        }
        let checks = [
            ("GemmM", self.m_padded(), "MPerBlock", tile.m_per_block),
            ("GemmN", self.n_padded(), "NPerBlock", tile.n_per_block),
            ("GemmK0", a[1], "K0PerBlock", tile.k0_per_block),
        ];
        for (what, value, tile_name, tile_value) in checks {
            if value % tile_value != 0 {
                return Err(Error::unsupported(format!(
                    "{what} {value} is not a multiple of {tile_name} {tile_value}"
                )));
            }
        }
        Ok(())
    }

    /// Number of blocks launched: one per C tile per reduction batch.
    pub fn grid_size(&self, tile: &TileConfig) -> Index {
        self.split_k.k_batch
            * ceil_div(self.m_padded(), tile.m_per_block)
            * ceil_div(self.n_padded(), tile.n_per_block)
    }

    /// Whether a block iterates over more than one K0 tile.
    pub fn has_main_k_block_loop(&self, tile: &TileConfig) -> bool {
        self.split_k.k0 / tile.k0_per_block > 1
    }
}

fn right_pad_or_pass(length: Index, pad: Index) -> Result<Transform> {
    if pad > 0 {
        Transform::right_pad(length, pad)
    } else {
        Transform::pass_through(length)
    }
}

/// `(K, X)` → `[k_batch, k0, X', k1]`.
fn split_reduction(
    desc: &TensorDescriptor,
    plan: &SplitKPlan,
    x_pad: Index,
) -> Result<TensorDescriptor> {
    let (k_total, x) = (desc.length(0), desc.length(1));
    let mut pad = StageBuilder::new();
    pad.push(right_pad_or_pass(k_total, plan.k_pad - k_total)?, dims![0]);
    pad.push(right_pad_or_pass(x, x_pad)?, dims![1]);
    let padded = pad.build(desc)?;

    let mut split = StageBuilder::new();
    split.push_at(
        Transform::unmerge(&[plan.k_batch, plan.k0, plan.k1])?,
        dims![0],
        dims![0, 1, 3],
    );
    split.push_at(Transform::pass_through(x + x_pad)?, dims![1], dims![2]);
    split.build(&padded)
}
