//! Memory layouts of the three convolution tensors.

use serde::{Deserialize, Serialize};

use crate::descriptor::{Dims, Index};

/// Layout family shared by input, weight and output.
///
/// | layout | input | weight | output |
/// | --- | --- | --- | --- |
/// | `ChannelsLast` | `N Hi.. C` | `K Y.. C` | `N Ho.. K` |
/// | `ChannelsFirst` | `N C Hi..` | `K C Y..` | `N K Ho..` |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvLayout {
    #[default]
    ChannelsLast,
    ChannelsFirst,
}

/// Positions of the outer (`N` or `K`), channel and spatial dimensions of a
/// tensor in a given layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorRoles {
    pub outer: usize,
    pub channel: usize,
    pub spatial: Vec<usize>,
}

impl TensorRoles {
    pub fn rank(&self) -> usize {
        self.spatial.len() + 2
    }

    pub fn spatial_index(&self, dim: usize) -> Option<usize> {
        self.spatial.iter().position(|&d| d == dim)
    }
}

impl ConvLayout {
    pub fn roles(self, num_spatial_dims: usize) -> TensorRoles {
        match self {
            ConvLayout::ChannelsLast => TensorRoles {
                outer: 0,
                channel: num_spatial_dims + 1,
                spatial: (1..=num_spatial_dims).collect(),
            },
            ConvLayout::ChannelsFirst => TensorRoles {
                outer: 0,
                channel: 1,
                spatial: (2..num_spatial_dims + 2).collect(),
            },
        }
    }

    /// Lengths of a tensor with outer extent `outer`, `channel` channels and
    /// the given spatial extents, in this layout's dimension order.
    pub fn tensor_lengths(self, outer: Index, channel: Index, spatial: &[Index]) -> Vec<Index> {
        let roles = self.roles(spatial.len());
        let mut lengths = vec![0; roles.rank()];
        lengths[roles.outer] = outer;
        lengths[roles.channel] = channel;
        for (&dim, &len) in roles.spatial.iter().zip(spatial) {
            lengths[dim] = len;
        }
        lengths
    }

    /// Reduction order over a filter window: `(Y.., C)` channels-last,
    /// `(C, Y..)` channels-first. `filter` and `channel` are slots of a
    /// descriptor being merged.
    pub fn window_order(self, filter: &[usize], channel: usize) -> Dims {
        match self {
            ConvLayout::ChannelsLast => filter.iter().copied().chain([channel]).collect(),
            ConvLayout::ChannelsFirst => [channel].into_iter().chain(filter.iter().copied()).collect(),
        }
    }

    /// Layout name for `num_spatial_dims`, e.g. `NHWC_KYXC_NHWK`. Other ranks
    /// number their dimensions: `NS0S1S2S3C_KF0F1F2F3C_NS0S1S2S3K`.
    pub fn name(self, num_spatial_dims: usize) -> String {
        let (spatial_in, spatial_wei) = match num_spatial_dims {
            1..=3 => (
                "DHW"[3 - num_spatial_dims..].to_owned(),
                "ZYX"[3 - num_spatial_dims..].to_owned(),
            ),
            _ => (
                (0..num_spatial_dims).map(|i| format!("S{i}")).collect(),
                (0..num_spatial_dims).map(|i| format!("F{i}")).collect(),
            ),
        };
        let spatial_out = &spatial_in;
        match self {
            ConvLayout::ChannelsLast => {
                format!("N{spatial_in}C_K{spatial_wei}C_N{spatial_out}K")
            }
            ConvLayout::ChannelsFirst => {
                format!("NC{spatial_in}_KC{spatial_wei}_NK{spatial_out}")
            }
        }
    }
}
