//! Coordinate-transform algebra for tensor descriptors and the lowering of
//! N-dimensional convolutions onto tiled, split-K GEMM problems.
//!
//! Everything here is host-side integer arithmetic: descriptors are built once
//! per problem and then evaluated (coordinate → offset) by whatever executes
//! the GEMM.

extern crate self as convgemm;

pub mod conv;
pub mod descriptor;
pub mod dtype;
pub mod error;
pub mod gemm;
pub mod math;

pub use conv::{
    lower_convolution, ConvDirection, ConvGemm, ConvGemmProblem, ConvLayout, ConvParams,
    LoweringConfig,
};
pub use descriptor::{
    transform_tensor_descriptor, Dims, Index, Indices, StageBuilder, TensorCoordinate,
    TensorDescriptor, Transform,
};
pub use dtype::DataType;
pub use error::{Error, Result};
pub use gemm::{GemmProblem, GemmSizes, SplitK, SplitKPlan, TileConfig};
