//! Tensor descriptors built from chains of coordinate transforms.

pub mod compose;
pub mod coordinate;
pub mod dims;
pub mod tensor;
pub mod transform;

pub use compose::{transform_tensor_descriptor, StageBuilder};
pub use coordinate::TensorCoordinate;
pub use dims::{dims_iter, Dims, Index, Indices};
pub use tensor::{TensorDescriptor, TransformStep};
pub use transform::Transform;
