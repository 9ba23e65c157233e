//! Weight gradient as
//! `weight_grad[Y..·C, K] = input_window[N·Ho.., Y..·C]ᵀ * output_grad[N·Ho.., K]`.
//!
//! The reduction runs over batch and output positions, so large batches are
//! where split-K pays off.

use crate::conv::layout::ConvLayout;
use crate::conv::lowering::{merge_to_matrix, outer_then, packed_tensor, sliding_window};
use crate::conv::params::ConvParams;
use crate::descriptor::Index;
use crate::error::Result;
use crate::gemm::{GemmProblem, SplitK, TileConfig};

pub(crate) fn lower(
    params: &ConvParams,
    layout: ConvLayout,
    output_lengths: &[Index],
    tile: &TileConfig,
    split_k: SplitK,
) -> Result<GemmProblem> {
    let roles = layout.roles(params.num_spatial_dims);

    let window = sliding_window(params, layout, output_lengths)?;
    let a = merge_to_matrix(
        &window.desc,
        &outer_then(window.outer, &window.second),
        &layout.window_order(&window.first, window.channel),
    )?;

    let output_grad = packed_tensor(layout, params.n, params.k, output_lengths)?;
    let b = merge_to_matrix(
        &output_grad,
        &outer_then(roles.outer, &roles.spatial),
        &[roles.channel],
    )?;

    let weight_grad = packed_tensor(layout, params.k, params.c, &params.filter_lengths)?;
    let c = merge_to_matrix(
        &weight_grad,
        &layout.window_order(&roles.spatial, roles.channel),
        &[roles.outer],
    )?;

    GemmProblem::from_k_major(&a, &b, &c, tile, split_k)
}
