#![allow(dead_code)]

use convgemm::conv::{ConvLayout, ConvParams, TensorRoles};
use convgemm::{GemmProblem, Index};

/// Small deterministic values in `[-5, 5]`.
pub fn fill(len: usize, seed: i64) -> Vec<i64> {
    (0..len as i64)
        .map(|i| (i * 7 + seed * 13 + (i * i) % 5) % 11 - 5)
        .collect()
}

/// Executes `problem` one scalar at a time, reading zero from padding and
/// dropping writes to padding, and accumulates into `c`.
pub fn run_gemm(problem: &GemmProblem, a: &[i64], b: &[i64], c: &mut [i64]) {
    let a_lengths = problem.a.lengths();
    let b_lengths = problem.b.lengths();
    let (k_batch, k0, m, k1) = (a_lengths[0], a_lengths[1], a_lengths[2], a_lengths[3]);
    let n = b_lengths[2];
    assert_eq!(&b_lengths[..2], &a_lengths[..2]);
    assert_eq!(b_lengths[3], k1);

    for im in 0..m {
        for jn in 0..n {
            let Some(c_offset) = problem
                .c
                .offset_if_valid(&[im, jn])
                .unwrap_or_else(|err| panic!("unexpected error: {err}"))
            else {
                continue;
            };
            let mut acc = 0;
            for kb in 0..k_batch {
                for ik0 in 0..k0 {
                    for ik1 in 0..k1 {
                        let a_value = read(problem, Operand::A, &[kb, ik0, im, ik1], a);
                        let b_value = read(problem, Operand::B, &[kb, ik0, jn, ik1], b);
                        acc += a_value * b_value;
                    }
                }
            }
            c[c_offset as usize] += acc;
        }
    }
}

enum Operand {
    A,
    B,
}

fn read(problem: &GemmProblem, operand: Operand, idx: &[Index], data: &[i64]) -> i64 {
    let desc = match operand {
        Operand::A => &problem.a,
        Operand::B => &problem.b,
    };
    desc.offset_if_valid(idx)
        .unwrap_or_else(|err| panic!("unexpected error: {err}"))
        .map_or(0, |offset| data[offset as usize])
}

/// All multi-indices of a box, row-major.
pub fn box_indices(lengths: &[Index]) -> Vec<Vec<Index>> {
    let mut out = vec![Vec::new()];
    for &len in lengths {
        out = out
            .into_iter()
            .flat_map(|prefix| {
                (0..len).map(move |i| {
                    let mut next = prefix.clone();
                    next.push(i);
                    next
                })
            })
            .collect();
    }
    out
}

/// Packed tensor in a convolution layout.
pub struct LayoutTensor {
    lengths: Vec<Index>,
    roles: TensorRoles,
}

impl LayoutTensor {
    pub fn new(layout: ConvLayout, outer: Index, channel: Index, spatial: &[Index]) -> Self {
        Self {
            lengths: layout.tensor_lengths(outer, channel, spatial),
            roles: layout.roles(spatial.len()),
        }
    }

    pub fn size(&self) -> usize {
        self.lengths.iter().product::<Index>() as usize
    }

    pub fn offset(&self, outer: Index, channel: Index, spatial: &[Index]) -> usize {
        let mut idx = vec![0; self.lengths.len()];
        idx[self.roles.outer] = outer;
        idx[self.roles.channel] = channel;
        for (&dim, &value) in self.roles.spatial.iter().zip(spatial) {
            idx[dim] = value;
        }
        idx.iter()
            .zip(&self.lengths)
            .fold(0, |acc, (i, len)| acc * len + i) as usize
    }
}

/// Direct convolution results for given input, weight and output-gradient
/// buffers.
pub struct DirectConv {
    pub input: LayoutTensor,
    pub weight: LayoutTensor,
    pub output: LayoutTensor,
    pub forward: Vec<i64>,
    pub backward_data: Vec<i64>,
    pub backward_weight: Vec<i64>,
}

pub fn direct_conv(
    params: &ConvParams,
    layout: ConvLayout,
    input_values: &[i64],
    weight_values: &[i64],
    output_grad_values: &[i64],
) -> DirectConv {
    let outputs = params
        .output_lengths()
        .unwrap_or_else(|err| panic!("unexpected error: {err}"));
    let input = LayoutTensor::new(layout, params.n, params.c, &params.input_lengths);
    let weight = LayoutTensor::new(layout, params.k, params.c, &params.filter_lengths);
    let output = LayoutTensor::new(layout, params.n, params.k, &outputs);
    let mut forward = vec![0; output.size()];
    let mut backward_data = vec![0; input.size()];
    let mut backward_weight = vec![0; weight.size()];

    let output_positions = box_indices(&outputs);
    let filter_taps = box_indices(&params.filter_lengths);
    for n in 0..params.n {
        for ho in &output_positions {
            for y in &filter_taps {
                let hi: Vec<Index> = (0..params.num_spatial_dims)
                    .map(|i| {
                        ho[i] * params.strides[i] + y[i] * params.dilations[i] - params.left_pads[i]
                    })
                    .collect();
                if hi
                    .iter()
                    .zip(&params.input_lengths)
                    .any(|(h, len)| *h < 0 || h >= len)
                {
                    continue;
                }
                for k in 0..params.k {
                    for c in 0..params.c {
                        let in_at = input.offset(n, c, &hi);
                        let wei_at = weight.offset(k, c, y);
                        let out_at = output.offset(n, k, ho);
                        forward[out_at] += input_values[in_at] * weight_values[wei_at];
                        backward_data[in_at] += output_grad_values[out_at] * weight_values[wei_at];
                        backward_weight[wei_at] += input_values[in_at] * output_grad_values[out_at];
                    }
                }
            }
        }
    }
    DirectConv {
        input,
        weight,
        output,
        forward,
        backward_data,
        backward_weight,
    }
}
