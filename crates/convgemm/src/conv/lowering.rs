//! Shared convolution lowering entry point and descriptor helpers.

use serde::{Deserialize, Serialize};

use crate::conv::layout::{ConvLayout, TensorRoles};
use crate::conv::params::{checked_extent, ConvParams};
use crate::conv::{backward_data, backward_weight, forward};
use crate::descriptor::{dims_iter, Dims, Index, Indices, StageBuilder, TensorDescriptor, Transform};
use crate::dims;
use crate::error::{Error, Result};
use crate::gemm::{GemmProblem, GemmSizes, SplitK, TileConfig};

/// Which convolution pass is lowered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvDirection {
    /// `output = conv(input, weight)`
    Forward,
    /// `input_grad = conv_transpose(output_grad, weight)`
    BackwardData,
    /// `weight_grad = correlate(input, output_grad)`
    BackwardWeight,
}

/// One of the three tensors of a convolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvTensor {
    Input,
    Weight,
    Output,
}

impl ConvDirection {
    /// Convolution tensors playing GEMM operands A, B and C.
    ///
    /// For the backward passes `Input`/`Output`/`Weight` name the gradient
    /// buffers of those tensors where they are being produced or consumed.
    pub fn operands(self) -> [ConvTensor; 3] {
        match self {
            ConvDirection::Forward => [ConvTensor::Input, ConvTensor::Weight, ConvTensor::Output],
            ConvDirection::BackwardData => {
                [ConvTensor::Output, ConvTensor::Weight, ConvTensor::Input]
            }
            ConvDirection::BackwardWeight => {
                [ConvTensor::Input, ConvTensor::Output, ConvTensor::Weight]
            }
        }
    }

    /// GEMM extents of the whole pass. Backward-data is split into one GEMM
    /// per filter phase; the sizes returned here are those of the undivided
    /// problem (`N * ΠHi`, `C`, `K * ΠY`).
    pub fn gemm_sizes(self, params: &ConvParams) -> Result<GemmSizes> {
        let outputs = params.output_lengths()?;
        let filter = &params.filter_lengths;
        let extent = |what: &str, scalar: Index, spatial: &[Index]| {
            let values: Vec<Index> = std::iter::once(scalar).chain(spatial.iter().copied()).collect();
            checked_extent(what, &values)
        };
        Ok(match self {
            ConvDirection::Forward => GemmSizes {
                m: extent("GEMM M", params.n, &outputs)?,
                n: params.k,
                k_total: extent("GEMM K", params.c, filter)?,
            },
            ConvDirection::BackwardData => GemmSizes {
                m: extent("GEMM M", params.n, &params.input_lengths)?,
                n: params.c,
                k_total: extent("GEMM K", params.k, filter)?,
            },
            ConvDirection::BackwardWeight => GemmSizes {
                m: extent("GEMM M", params.c, filter)?,
                n: params.k,
                k_total: extent("GEMM K", params.n, &outputs)?,
            },
        })
    }
}

/// One GEMM of a lowered convolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConvGemmProblem {
    /// Filter phase (`iYTilde, iXTilde, ...`) for backward-data; empty
    /// otherwise.
    pub filter_phase: Vec<Index>,
    pub gemm: GemmProblem,
}

/// Result of lowering one convolution pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConvGemm {
    pub direction: ConvDirection,
    pub layout: ConvLayout,
    pub output_lengths: Vec<Index>,
    pub problems: Vec<ConvGemmProblem>,
}

impl ConvGemm {
    /// The GEMM when the pass lowers to exactly one.
    pub fn single(&self) -> Option<&GemmProblem> {
        match self.problems.as_slice() {
            [only] => Some(&only.gemm),
            _ => None,
        }
    }

    /// Whether C must be zeroed before the GEMMs run: split-K accumulates
    /// partial sums, and backward-data leaves positions no phase reaches.
    pub fn requires_zeroed_output(&self) -> bool {
        self.direction == ConvDirection::BackwardData
            || self
                .problems
                .iter()
                .any(|problem| problem.gemm.split_k.needs_accumulation())
    }
}

/// Lowers one convolution pass onto tiled GEMM problems.
///
/// The three tensors are packed in `layout`. Every problem has the operand
/// shapes described on [`GemmProblem`].
pub fn lower_convolution(
    direction: ConvDirection,
    layout: ConvLayout,
    params: &ConvParams,
    tile: &TileConfig,
    split_k: SplitK,
) -> Result<ConvGemm> {
    params.validate()?;
    tile.validate()?;
    let output_lengths = params.output_lengths()?;
    let problems = match direction {
        ConvDirection::Forward => vec![ConvGemmProblem {
            filter_phase: Vec::new(),
            gemm: forward::lower(params, layout, &output_lengths, tile, split_k)?,
        }],
        ConvDirection::BackwardWeight => vec![ConvGemmProblem {
            filter_phase: Vec::new(),
            gemm: backward_weight::lower(params, layout, &output_lengths, tile, split_k)?,
        }],
        ConvDirection::BackwardData => {
            backward_data::lower(params, layout, &output_lengths, tile, split_k)?
        }
    };
    for problem in &problems {
        let sizes = problem.gemm.sizes;
        log::debug!(
            "{direction:?} {} phase {:?}: M {} N {} K {} (k_batch {}, k0 {}, padded K {})",
            layout.name(params.num_spatial_dims),
            problem.filter_phase,
            sizes.m,
            sizes.n,
            sizes.k_total,
            problem.gemm.split_k.k_batch,
            problem.gemm.split_k.k0,
            problem.gemm.split_k.k_pad
        );
    }
    Ok(ConvGemm {
        direction,
        layout,
        output_lengths,
        problems,
    })
}

/// Everything `lower_convolution` needs besides the problem itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LoweringConfig {
    #[serde(default)]
    pub layout: ConvLayout,
    pub tile: TileConfig,
    #[serde(default)]
    pub split_k: SplitK,
}

impl LoweringConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.tile.validate()?;
        Ok(config)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn lower(&self, direction: ConvDirection, params: &ConvParams) -> Result<ConvGemm> {
        lower_convolution(direction, self.layout, params, &self.tile, self.split_k)
    }
}

pub(crate) fn packed_tensor(
    layout: ConvLayout,
    outer: Index,
    channel: Index,
    spatial: &[Index],
) -> Result<TensorDescriptor> {
    TensorDescriptor::packed(&layout.tensor_lengths(outer, channel, spatial))
}

/// `[outer, spatial..]`: the row order shared by every operand indexed by
/// batch and spatial position.
pub(crate) fn outer_then(outer: usize, spatial: &[usize]) -> Dims {
    dims_iter([outer].into_iter().chain(spatial.iter().copied()))
}

fn merge_slots(desc: &TensorDescriptor, slots: &[usize]) -> Result<Transform> {
    match slots {
        [slot] => Transform::pass_through(desc.length(*slot)),
        _ => {
            let lengths: Indices = slots.iter().map(|&slot| desc.length(slot)).collect();
            Transform::merge(&lengths)
        }
    }
}

/// Collapses `desc` into a `(rows, cols)` matrix.
pub(crate) fn merge_to_matrix(
    desc: &TensorDescriptor,
    rows: &[usize],
    cols: &[usize],
) -> Result<TensorDescriptor> {
    let mut stage = StageBuilder::new();
    stage.push_at(merge_slots(desc, rows)?, dims_iter(rows.iter().copied()), dims![0]);
    stage.push_at(merge_slots(desc, cols)?, dims_iter(cols.iter().copied()), dims![1]);
    stage.build(desc)
}

/// A tensor whose spatial dimensions were each embedded into two.
pub(crate) struct SpatialEmbedding {
    pub desc: TensorDescriptor,
    pub outer: usize,
    pub channel: usize,
    /// Per spatial dimension, the slot of the first embedded coordinate.
    pub first: Vec<usize>,
    /// Per spatial dimension, the slot of the second embedded coordinate.
    pub second: Vec<usize>,
}

/// Optionally pads each spatial dimension of `desc`, then embeds spatial
/// dimension `i` into `embeds[i].0` with coefficients `embeds[i].1`.
pub(crate) fn embed_spatial(
    desc: &TensorDescriptor,
    roles: &TensorRoles,
    pads: Option<&[(Index, Index)]>,
    embeds: &[([Index; 2], [Index; 2])],
) -> Result<SpatialEmbedding> {
    let rank = roles.rank();
    if desc.num_dims() != rank || embeds.len() != roles.spatial.len() {
        return Err(Error::mapping(format!(
            "{desc} does not have {} spatial dimensions",
            embeds.len()
        )));
    }

    let padded = match pads {
        Some(pads) => {
            let mut stage = StageBuilder::new();
            for dim in 0..rank {
                let length = desc.length(dim);
                let transform = match roles.spatial_index(dim) {
                    Some(i) => Transform::pad(length, pads[i].0, pads[i].1)?,
                    None => Transform::pass_through(length)?,
                };
                stage.push(transform, dims![dim]);
            }
            stage.build(desc)?
        }
        None => desc.clone(),
    };

    let mut stage = StageBuilder::new();
    let (mut outer, mut channel) = (0, 0);
    let mut first = vec![0; embeds.len()];
    let mut second = vec![0; embeds.len()];
    for dim in 0..rank {
        if let Some(i) = roles.spatial_index(dim) {
            let (lengths, coefficients) = &embeds[i];
            let slots = stage.push(Transform::embed(lengths, coefficients)?, dims![dim]);
            first[i] = slots[0];
            second[i] = slots[1];
        } else if dim == roles.outer {
            outer = stage.pass(padded.length(dim), dim)?;
        } else {
            channel = stage.pass(padded.length(dim), dim)?;
        }
    }
    Ok(SpatialEmbedding {
        desc: stage.build(&padded)?,
        outer,
        channel,
        first,
        second,
    })
}

/// Sliding-window view of the input: slot `first[i]` is the filter tap and
/// `second[i]` the output position along spatial dimension `i`.
pub(crate) fn sliding_window(
    params: &ConvParams,
    layout: ConvLayout,
    output_lengths: &[Index],
) -> Result<SpatialEmbedding> {
    let roles = layout.roles(params.num_spatial_dims);
    let input = packed_tensor(layout, params.n, params.c, &params.input_lengths)?;
    let pads: Vec<(Index, Index)> = params
        .left_pads
        .iter()
        .copied()
        .zip(params.right_pads.iter().copied())
        .collect();
    let embeds: Vec<([Index; 2], [Index; 2])> = (0..params.num_spatial_dims)
        .map(|i| {
            (
                [params.filter_lengths[i], output_lengths[i]],
                [params.dilations[i], params.strides[i]],
            )
        })
        .collect();
    embed_spatial(&input, &roles, Some(pads.as_slice()), &embeds)
}
