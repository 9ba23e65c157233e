//! Forward convolution as `output[N·Ho.., K] = input_window[N·Ho.., C·Y..] * weight[C·Y.., K]`.

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
        &layout.window_order(&window.first, window.channel),
        &outer_then(window.outer, &window.second),
    )?;

    let weight = packed_tensor(layout, params.k, params.c, &params.filter_lengths)?;
    let b = merge_to_matrix(
        &weight,
        &layout.window_order(&roles.spatial, roles.channel),
        &[roles.outer],
    )?;

    let output = packed_tensor(layout, params.n, params.k, output_lengths)?;
    let c = merge_to_matrix(
        &output,
        &outer_then(roles.outer, &roles.spatial),
        &[roles.channel],
    )?;

    GemmProblem::from_k_major(&a, &b, &c, tile, split_k)
}
