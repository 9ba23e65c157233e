//! Data gradient, split into one GEMM per filter phase.
//!
//! Along a spatial dimension with stride `S` and dilation `D`, padded input
//! position `D * y + S * ho` is reached only by filter taps `y` from a single
//! residue class modulo `YTilde = S / gcd(S, D)`. Writing `y = YTilde * ydot +
//! ytilde` and `ho = htilde - (D / gcd) * ydot` turns each class `ytilde` into
//! a dense GEMM over `(ydot, K)` whose rows are `htilde`, and the padded input
//! position becomes `D * ytilde + S * htilde`.

use crate::conv::layout::{ConvLayout, TensorRoles};
use crate::conv::lowering::{
    embed_spatial, merge_to_matrix, outer_then, packed_tensor, ConvGemmProblem, SpatialEmbedding,
};
use crate::conv::params::ConvParams;
use crate::descriptor::{Index, StageBuilder, TensorDescriptor, Transform};
use crate::dims;
use crate::error::{Error, Result};
use crate::gemm::{GemmProblem, SplitK, TileConfig};
use crate::math::{ceil_div, gcd};

/// Stride/dilation decomposition of one spatial dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterPhaseGeometry {
    pub gcd: Index,
    /// Number of filter phases, `S / gcd(S, D)`.
    pub y_tilde: Index,
    /// Filter taps per phase, rounded up.
    pub y_dot: Index,
    /// Extent of the phase row coordinate before slicing.
    pub h_tilde: Index,
    /// Rows `[h_tilde_begin, h_tilde_end)` can touch the unpadded input.
    pub h_tilde_begin: Index,
    pub h_tilde_end: Index,
}

impl FilterPhaseGeometry {
    pub fn new(
        input: Index,
        filter: Index,
        output: Index,
        stride: Index,
        dilation: Index,
        left_pad: Index,
    ) -> Self {
        let gcd = gcd(stride, dilation);
        let y_tilde = stride / gcd;
        let y_dot = ceil_div(filter, y_tilde);
        let h_tilde = output + ceil_div(dilation * (filter - 1), stride);
        let h_tilde_begin = (left_pad - dilation * (y_tilde - 1)).max(0) / stride;
        let h_tilde_end = h_tilde.min(ceil_div(left_pad + input - 1, stride) + 1);
        Self {
            gcd,
            y_tilde,
            y_dot,
            h_tilde,
            h_tilde_begin,
            h_tilde_end,
        }
    }

    /// Taps of phase `i_y_tilde` that fall inside a filter of length `filter`.
    pub fn y_dot_slice(&self, filter: Index, i_y_tilde: Index) -> Index {
        if filter > i_y_tilde {
            ceil_div(filter - i_y_tilde, self.y_tilde)
        } else {
            0
        }
    }

    pub fn h_tilde_slice(&self) -> Index {
        self.h_tilde_end - self.h_tilde_begin
    }
}

/// Decomposition of every spatial dimension of `params`.
pub fn filter_phase_geometry(params: &ConvParams) -> Result<Vec<FilterPhaseGeometry>> {
    let outputs = params.output_lengths()?;
    Ok((0..params.num_spatial_dims)
        .map(|i| {
            FilterPhaseGeometry::new(
                params.input_lengths[i],
                params.filter_lengths[i],
                outputs[i],
                params.strides[i],
                params.dilations[i],
                params.left_pads[i],
            )
        })
        .collect())
}

/// What a phase does to one embedded coordinate.
#[derive(Debug, Clone, Copy)]
enum Restrict {
    Slice { begin: Index, end: Index },
    Freeze(Index),
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    Outer,
    Channel,
    First(usize),
    Second(usize),
}

/// An embedding after one phase's slices and freezes. Frozen coordinates
/// have no slot.
struct PhaseView {
    desc: TensorDescriptor,
    outer: usize,
    channel: usize,
    first: Vec<Option<usize>>,
    second: Vec<Option<usize>>,
}

fn restrict(
    embedding: &SpatialEmbedding,
    first: &[Restrict],
    second: &[Restrict],
) -> Result<PhaseView> {
    let desc = &embedding.desc;
    let mut roles = vec![None; desc.num_dims()];
    roles[embedding.outer] = Some(Slot::Outer);
    roles[embedding.channel] = Some(Slot::Channel);
    for (i, (&a, &b)) in embedding.first.iter().zip(&embedding.second).enumerate() {
        roles[a] = Some(Slot::First(i));
        roles[b] = Some(Slot::Second(i));
    }

    let mut stage = StageBuilder::new();
    let mut view_first = vec![None; first.len()];
    let mut view_second = vec![None; second.len()];
    let (mut outer, mut channel) = (0, 0);
    for (dim, role) in roles.into_iter().enumerate() {
        let length = desc.length(dim);
        let role = role.ok_or_else(|| Error::mapping(format!("slot {dim} of {desc} has no role")))?;
        match role {
            Slot::Outer => outer = stage.pass(length, dim)?,
            Slot::Channel => channel = stage.pass(length, dim)?,
            Slot::First(i) => view_first[i] = restrict_slot(&mut stage, length, dim, first[i])?,
            Slot::Second(i) => {
                view_second[i] = restrict_slot(&mut stage, length, dim, second[i])?
            }
        }
    }
    Ok(PhaseView {
        desc: stage.build(desc)?,
        outer,
        channel,
        first: view_first,
        second: view_second,
    })
}

fn restrict_slot(
    stage: &mut StageBuilder,
    length: Index,
    dim: usize,
    op: Restrict,
) -> Result<Option<usize>> {
    Ok(match op {
        Restrict::Slice { begin, end } => {
            Some(stage.push(Transform::slice(length, begin, end)?, dims![dim])[0])
        }
        Restrict::Freeze(index) => {
            stage.push(Transform::freeze(length, index)?, dims![dim]);
            None
        }
    })
}

fn slots(view: &[Option<usize>]) -> Result<Vec<usize>> {
    view.iter()
        .map(|slot| slot.ok_or_else(|| Error::mapping("frozen coordinate used in a merge")))
        .collect()
}

pub(crate) fn lower(
    params: &ConvParams,
    layout: ConvLayout,
    output_lengths: &[Index],
    tile: &TileConfig,
    split_k: SplitK,
) -> Result<Vec<ConvGemmProblem>> {
    let rank = params.num_spatial_dims;
    let roles: TensorRoles = layout.roles(rank);
    let geometry = filter_phase_geometry(params)?;
    if let Some(dim) = geometry.iter().position(|g| g.h_tilde_slice() < 1) {
        return Err(Error::unsupported(format!(
            "spatial dimension {dim} has no rows touching the input"
        )));
    }

    // ho = htilde - (D / gcd) * ydot, bounds enforced by a zero-width pad.
    let output_grad = packed_tensor(layout, params.n, params.k, output_lengths)?;
    let output_grad = embed_spatial(
        &output_grad,
        &roles,
        Some(vec![(0, 0); rank].as_slice()),
        &geometry
            .iter()
            .enumerate()
            .map(|(i, g)| ([g.y_dot, g.h_tilde], [-(params.dilations[i] / g.gcd), 1]))
            .collect::<Vec<_>>(),
    )?;

    // y = YTilde * ydot + ytilde
    let weight = packed_tensor(layout, params.k, params.c, &params.filter_lengths)?;
    let weight = embed_spatial(
        &weight,
        &roles,
        None,
        &geometry
            .iter()
            .map(|g| ([g.y_dot, g.y_tilde], [g.y_tilde, 1]))
            .collect::<Vec<_>>(),
    )?;

    // padded input position = D * ytilde + S * htilde
    let input_grad = packed_tensor(layout, params.n, params.c, &params.input_lengths)?;
    let pads: Vec<(Index, Index)> = params
        .left_pads
        .iter()
        .copied()
        .zip(params.right_pads.iter().copied())
        .collect();
    let input_grad = embed_spatial(
        &input_grad,
        &roles,
        Some(pads.as_slice()),
        &geometry
            .iter()
            .enumerate()
            .map(|(i, g)| ([g.y_tilde, g.h_tilde], [params.dilations[i], params.strides[i]]))
            .collect::<Vec<_>>(),
    )?;

    let rows: Vec<Restrict> = geometry
        .iter()
        .map(|g| Restrict::Slice {
            begin: g.h_tilde_begin,
            end: g.h_tilde_end,
        })
        .collect();

    let y_tildes: Vec<Index> = geometry.iter().map(|g| g.y_tilde).collect();
    let phases = Transform::merge(&y_tildes)?;
    let phase_count: Index = y_tildes.iter().product();
    let mut problems = Vec::new();
    for phase_id in 0..phase_count {
        let phase = phases.calculate_lower_index(&[phase_id])?;
        let y_dot_slices: Vec<Index> = geometry
            .iter()
            .zip(&phase)
            .enumerate()
            .map(|(i, (g, &i_y_tilde))| g.y_dot_slice(params.filter_lengths[i], i_y_tilde))
            .collect();
        if y_dot_slices.iter().any(|&taps| taps < 1) {
            log::trace!("filter phase {phase:?} has no taps");
            continue;
        }
        let taps: Vec<Restrict> = y_dot_slices
            .iter()
            .map(|&end| Restrict::Slice { begin: 0, end })
            .collect();
        let frozen: Vec<Restrict> = phase.iter().map(|&i| Restrict::Freeze(i)).collect();

        let a = restrict(&output_grad, &taps, &rows)?;
        let a = merge_to_matrix(
            &a.desc,
            &layout.window_order(&slots(&a.first)?, a.channel),
            &outer_then(a.outer, &slots(&a.second)?),
        )?;

        let b = restrict(&weight, &taps, &frozen)?;
        let b = merge_to_matrix(
            &b.desc,
            &layout.window_order(&slots(&b.first)?, b.outer),
            &[b.channel],
        )?;

        let c = restrict(&input_grad, &frozen, &rows)?;
        let c = merge_to_matrix(
            &c.desc,
            &outer_then(c.outer, &slots(&c.second)?),
            &[c.channel],
        )?;

        problems.push(ConvGemmProblem {
            filter_phase: phase.to_vec(),
            gemm: GemmProblem::from_k_major(&a, &b, &c, tile, split_k)?,
        });
    }
    if problems.is_empty() {
        return Err(Error::unsupported("every filter phase is empty"));
    }
    Ok(problems)
}
