//! Convolution parameter record and output-shape arithmetic.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::descriptor::Index;
use crate::dtype::DataType;
use crate::error::{Error, Result};
use crate::math::checked_product;

/// Output length of one spatial dimension, or `None` when the dilated filter
/// does not fit into the padded input even once.
pub fn conv_output_length(
    input: Index,
    filter: Index,
    stride: Index,
    dilation: Index,
    left_pad: Index,
    right_pad: Index,
) -> Option<Index> {
    if input < 1 || filter < 1 || stride < 1 || dilation < 1 || left_pad < 0 || right_pad < 0 {
        return None;
    }
    let effective = (filter - 1).checked_mul(dilation)?.checked_add(1)?;
    let padded = input.checked_add(left_pad)?.checked_add(right_pad)?;
    if padded < effective {
        return None;
    }
    Some((padded - effective) / stride + 1)
}

/// N-dimensional convolution problem.
///
/// `k` is the number of output channels, `c` the number of input channels;
/// per-dimension vectors are ordered outermost spatial dimension first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConvParams {
    pub num_spatial_dims: usize,
    pub n: Index,
    pub k: Index,
    pub c: Index,
    pub filter_lengths: Vec<Index>,
    pub input_lengths: Vec<Index>,
    pub strides: Vec<Index>,
    pub dilations: Vec<Index>,
    pub left_pads: Vec<Index>,
    pub right_pads: Vec<Index>,
}

impl ConvParams {
    /// Unit stride and dilation, no padding.
    pub fn new(n: Index, k: Index, c: Index, filter_lengths: &[Index], input_lengths: &[Index]) -> Self {
        let rank = filter_lengths.len();
        Self {
            num_spatial_dims: rank,
            n,
            k,
            c,
            filter_lengths: filter_lengths.to_vec(),
            input_lengths: input_lengths.to_vec(),
            strides: vec![1; rank],
            dilations: vec![1; rank],
            left_pads: vec![0; rank],
            right_pads: vec![0; rank],
        }
    }

    pub fn with_strides(mut self, strides: &[Index]) -> Self {
        self.strides = strides.to_vec();
        self
    }

    pub fn with_dilations(mut self, dilations: &[Index]) -> Self {
        self.dilations = dilations.to_vec();
        self
    }

    pub fn with_pads(mut self, left_pads: &[Index], right_pads: &[Index]) -> Self {
        self.left_pads = left_pads.to_vec();
        self.right_pads = right_pads.to_vec();
        self
    }

    pub fn validate(&self) -> Result<()> {
        let rank = self.num_spatial_dims;
        if rank == 0 {
            return Err(Error::conv_params("at least one spatial dimension is required"));
        }
        let per_dim = [
            ("filter_lengths", &self.filter_lengths),
            ("input_lengths", &self.input_lengths),
            ("strides", &self.strides),
            ("dilations", &self.dilations),
            ("left_pads", &self.left_pads),
            ("right_pads", &self.right_pads),
        ];
        for (name, values) in per_dim {
            if values.len() != rank {
                return Err(Error::conv_params(format!(
                    "{name} has {} entries for {rank} spatial dimensions",
                    values.len()
                )));
            }
        }
        for (name, value) in [("N", self.n), ("K", self.k), ("C", self.c)] {
            if value < 1 {
                return Err(Error::conv_params(format!("{name} must be positive, got {value}")));
            }
        }
        for (name, values, min) in [
            ("filter length", &self.filter_lengths, 1),
            ("input length", &self.input_lengths, 1),
            ("stride", &self.strides, 1),
            ("dilation", &self.dilations, 1),
            ("left pad", &self.left_pads, 0),
            ("right pad", &self.right_pads, 0),
        ] {
            if let Some(value) = values.iter().find(|value| **value < min) {
                return Err(Error::conv_params(format!(
                    "{name} must be at least {min}, got {value}"
                )));
            }
        }
        for dim in 0..rank {
            if self.output_length(dim).is_none() {
                return Err(Error::conv_params(format!(
                    "spatial dimension {dim}: filter {} with dilation {} does not fit input {} padded by ({}, {})",
                    self.filter_lengths[dim],
                    self.dilations[dim],
                    self.input_lengths[dim],
                    self.left_pads[dim],
                    self.right_pads[dim]
                )));
            }
        }
        Ok(())
    }

    fn output_length(&self, dim: usize) -> Option<Index> {
        conv_output_length(
            self.input_lengths[dim],
            self.filter_lengths[dim],
            self.strides[dim],
            self.dilations[dim],
            self.left_pads[dim],
            self.right_pads[dim],
        )
    }

    /// Output spatial lengths (`Ho, Wo, ...`).
    pub fn output_lengths(&self) -> Result<Vec<Index>> {
        self.validate()?;
        Ok((0..self.num_spatial_dims)
            .map(|dim| self.output_length(dim).unwrap_or(0))
            .collect())
    }

    /// Multiply-adds counted twice: `2 * N * K * C * ΠY * ΠHo`.
    pub fn flops(&self) -> Result<u64> {
        let outputs = self.output_lengths()?;
        element_count(
            "FLOP count",
            [2, self.n, self.k, self.c]
                .iter()
                .chain(&self.filter_lengths)
                .chain(&outputs),
        )
    }

    /// Bytes touched reading input and weight and writing output once.
    pub fn bytes(&self, input: DataType, weight: DataType, output: DataType) -> Result<u64> {
        let outputs = self.output_lengths()?;
        let tensors = [
            (input, [self.n, self.c], &self.input_lengths),
            (weight, [self.k, self.c], &self.filter_lengths),
            (output, [self.n, self.k], &outputs),
        ];
        let total = tensors
            .into_iter()
            .try_fold(0u64, |total, (dtype, outer, spatial)| {
                let elements = element_count("byte count", outer.iter().chain(spatial))?;
                elements
                    .checked_mul(dtype.size_in_bytes())
                    .and_then(|bytes| total.checked_add(bytes))
                    .ok_or_else(|| Error::conv_params(format!("byte count of {self} overflows")))
            });
        total
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let params: Self = serde_json::from_str(json)?;
        params.validate()?;
        Ok(params)
    }
}

/// Product of non-negative extents as `u64`.
fn element_count<'a>(what: &str, values: impl IntoIterator<Item = &'a Index>) -> Result<u64> {
    values
        .into_iter()
        .try_fold(1u64, |acc, &value| {
            u64::try_from(value).ok().and_then(|value| acc.checked_mul(value))
        })
        .ok_or_else(|| Error::conv_params(format!("{what} overflows")))
}

/// Product of extents as an [`Index`], for GEMM sizes.
pub(crate) fn checked_extent(what: &str, values: &[Index]) -> Result<Index> {
    checked_product(values).ok_or_else(|| {
        Error::conv_params(format!("{what} of {values:?} overflows"))
    })
}

impl fmt::Display for ConvParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "conv{}d N={} K={} C={} filter={:?} input={:?} strides={:?} dilations={:?} pads={:?}/{:?}",
            self.num_spatial_dims,
            self.n,
            self.k,
            self.c,
            self.filter_lengths,
            self.input_lengths,
            self.strides,
            self.dilations,
            self.left_pads,
            self.right_pads
        )
    }
}
