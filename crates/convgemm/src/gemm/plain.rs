//! Plain and strided-batch GEMM descriptors.

use serde::{Deserialize, Serialize};

use crate::descriptor::{Index, StageBuilder, TensorDescriptor, Transform};
use crate::dims;
use crate::error::{Error, Result};
use crate::gemm::problem::GemmProblem;
use crate::gemm::split_k::SplitK;
use crate::gemm::tile::TileConfig;

/// Storage order of a 2-d operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GemmLayout {
    RowMajor,
    ColumnMajor,
}

/// Layouts of A `(M, K)`, B `(K, N)` and C `(M, N)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GemmLayouts {
    pub a: GemmLayout,
    pub b: GemmLayout,
    pub c: GemmLayout,
}

impl GemmLayouts {
    pub const fn new(a: GemmLayout, b: GemmLayout, c: GemmLayout) -> Self {
        Self { a, b, c }
    }
}

/// Extents and leading-dimension strides of a plain GEMM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GemmShape {
    pub m: Index,
    pub n: Index,
    pub k: Index,
    pub stride_a: Index,
    pub stride_b: Index,
    pub stride_c: Index,
}

impl GemmShape {
    /// Shape with tightly packed operands.
    pub fn packed(m: Index, n: Index, k: Index, layouts: GemmLayouts) -> Self {
        let leading = |layout: GemmLayout, rows: Index, cols: Index| match layout {
            GemmLayout::RowMajor => cols,
            GemmLayout::ColumnMajor => rows,
        };
        Self {
            m,
            n,
            k,
            stride_a: leading(layouts.a, m, k),
            stride_b: leading(layouts.b, k, n),
            stride_c: leading(layouts.c, m, n),
        }
    }
}

fn matrix(
    operand: &'static str,
    rows: Index,
    cols: Index,
    stride: Index,
    layout: GemmLayout,
) -> Result<TensorDescriptor> {
    let (minor, strides) = match layout {
        GemmLayout::RowMajor => (cols, [stride, 1]),
        GemmLayout::ColumnMajor => (rows, [1, stride]),
    };
    if stride < minor {
        return Err(Error::shape(
            operand,
            format!("leading stride {stride} is smaller than the minor extent {minor}"),
        ));
    }
    TensorDescriptor::naive(&[rows, cols], &strides)
}

fn k_major_operands(
    m: Index,
    n: Index,
    k: Index,
    stride_a: Index,
    stride_b: Index,
    a_layout: GemmLayout,
    b_layout: GemmLayout,
) -> Result<(TensorDescriptor, TensorDescriptor)> {
    let a_m_k = matrix("A", m, k, stride_a, a_layout)?;
    let b_k_n = matrix("B", k, n, stride_b, b_layout)?;

    let mut transpose = StageBuilder::new();
    transpose.push_at(Transform::pass_through(k)?, dims![1], dims![0]);
    transpose.push_at(Transform::pass_through(m)?, dims![0], dims![1]);
    Ok((transpose.build(&a_m_k)?, b_k_n))
}

/// Builds the tiled descriptors of `C = A * B`.
pub fn make_gemm_problem(
    shape: GemmShape,
    layouts: GemmLayouts,
    tile: &TileConfig,
    split_k: SplitK,
) -> Result<GemmProblem> {
    let (a_k_m, b_k_n) = k_major_operands(
        shape.m,
        shape.n,
        shape.k,
        shape.stride_a,
        shape.stride_b,
        layouts.a,
        layouts.b,
    )?;
    let c_m_n = matrix("C", shape.m, shape.n, shape.stride_c, layouts.c)?;
    GemmProblem::from_k_major(&a_k_m, &b_k_n, &c_m_n, tile, split_k)
}

/// C stored as a strided `(M0, M1, N0, N1)` tensor and read as the matrix
/// `(M0 * M1, N0 * N1)`, e.g. an attention output written with its head
/// dimension transposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransposedOutput {
    /// `[M0, M1, N0, N1]`
    pub lengths: [Index; 4],
    /// Strides of `M0, M1, N0, N1`.
    pub strides: [Index; 4],
}

impl TransposedOutput {
    pub const fn new(lengths: [Index; 4], strides: [Index; 4]) -> Self {
        Self { lengths, strides }
    }

    /// `(M0, M1)` merged into M and `(N0, N1)` into N.
    pub fn descriptor(&self) -> Result<TensorDescriptor> {
        let [m0, m1, n0, n1] = self.lengths;
        let c = TensorDescriptor::naive(&self.lengths, &self.strides)?;
        let mut merge = StageBuilder::new();
        merge.push(Transform::merge(&[m0, m1])?, dims![0, 1]);
        merge.push(Transform::merge(&[n0, n1])?, dims![2, 3]);
        merge.build(&c)
    }
}

/// Plain A and B with a [`TransposedOutput`] C.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransposedGemmShape {
    pub k: Index,
    pub stride_a: Index,
    pub stride_b: Index,
    pub c: TransposedOutput,
}

/// Builds the tiled descriptors of `C = A * B` with C in the transposed
/// four-dimensional form.
pub fn make_transposed_gemm_problem(
    shape: TransposedGemmShape,
    a_layout: GemmLayout,
    b_layout: GemmLayout,
    tile: &TileConfig,
    split_k: SplitK,
) -> Result<GemmProblem> {
    let c_m_n = shape.c.descriptor()?;
    let (m, n) = (c_m_n.length(0), c_m_n.length(1));
    let (a_k_m, b_k_n) = k_major_operands(
        m,
        n,
        shape.k,
        shape.stride_a,
        shape.stride_b,
        a_layout,
        b_layout,
    )?;
    GemmProblem::from_k_major(&a_k_m, &b_k_n, &c_m_n, tile, split_k)
}

/// Per-operand base offsets of a strided batch of identical GEMMs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StridedBatchOffsets {
    pub batch_stride_a: Index,
    pub batch_stride_b: Index,
    pub batch_stride_c: Index,
}

impl StridedBatchOffsets {
    pub const fn new(batch_stride_a: Index, batch_stride_b: Index, batch_stride_c: Index) -> Self {
        Self {
            batch_stride_a,
            batch_stride_b,
            batch_stride_c,
        }
    }

    /// Batches packed back to back: each stride is the operand's element space.
    pub fn from_problem(problem: &GemmProblem) -> Self {
        Self::new(
            problem.a.element_space_size(),
            problem.b.element_space_size(),
            problem.c.element_space_size(),
        )
    }

    pub fn a_offset(&self, batch: Index) -> Index {
        batch * self.batch_stride_a
    }

    pub fn b_offset(&self, batch: Index) -> Index {
        batch * self.batch_stride_b
    }

    pub fn c_offset(&self, batch: Index) -> Index {
        batch * self.batch_stride_c
    }
}
