//! Convolution parameters, layouts and the lowering onto GEMM problems.

pub mod backward_data;
mod backward_weight;
mod forward;
pub mod layout;
pub mod lowering;
pub mod params;

pub use backward_data::{filter_phase_geometry, FilterPhaseGeometry};
pub use layout::{ConvLayout, TensorRoles};
pub use lowering::{
    lower_convolution, ConvDirection, ConvGemm, ConvGemmProblem, ConvTensor, LoweringConfig,
};
pub use params::{conv_output_length, ConvParams};
