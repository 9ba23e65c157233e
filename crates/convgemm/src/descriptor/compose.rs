//! Composition engine: wraps a descriptor in one more layer of transforms.

use crate::descriptor::dims::{Dims, Index, Indices};
use crate::descriptor::tensor::{TensorDescriptor, TransformStep};
use crate::descriptor::transform::Transform;
use crate::error::{Error, Result};

/// Builds a descriptor whose visible dimensions are the outputs of
/// `transforms`.
///
/// `lower_dims[i]` lists the visible dimensions of `source` consumed by
/// `transforms[i]`; `upper_dims[i]` lists the visible dimensions of the result
/// it produces. Every source dimension must be consumed exactly once and the
/// upper ids together must be a permutation of `0..n`.
pub fn transform_tensor_descriptor(
    source: &TensorDescriptor,
    transforms: Vec<Transform>,
    lower_dims: &[Dims],
    upper_dims: &[Dims],
) -> Result<TensorDescriptor> {
    if transforms.len() != lower_dims.len() || transforms.len() != upper_dims.len() {
        return Err(Error::mapping(format!(
            "{} transforms, {} lower id lists, {} upper id lists",
            transforms.len(),
            lower_dims.len(),
            upper_dims.len()
        )));
    }

    let source_dims = source.num_dims();
    let mut consumed = vec![false; source_dims];
    let mut total_upper = 0usize;
    for (i, ((transform, lower), upper)) in
        transforms.iter().zip(lower_dims).zip(upper_dims).enumerate()
    {
        if lower.len() != transform.num_lower_dims() || upper.len() != transform.num_upper_dims() {
            return Err(Error::mapping(format!(
                "transform {i} ({}) maps {} -> {} dimensions but was given {} lower and {} upper ids",
                transform.name(),
                transform.num_lower_dims(),
                transform.num_upper_dims(),
                lower.len(),
                upper.len()
            )));
        }
        for &dim in lower {
            if dim >= source_dims {
                return Err(Error::mapping(format!(
                    "transform {i} reads dimension {dim} of a {source_dims}-d descriptor"
                )));
            }
            if std::mem::replace(&mut consumed[dim], true) {
                return Err(Error::mapping(format!(
                    "source dimension {dim} is consumed more than once"
                )));
            }
        }
        total_upper += upper.len();
    }
    if let Some(dim) = consumed.iter().position(|used| !used) {
        return Err(Error::mapping(format!(
            "source dimension {dim} is not consumed by any transform"
        )));
    }

    let mut produced = vec![false; total_upper];
    for &dim in upper_dims.iter().flatten() {
        if dim >= total_upper || std::mem::replace(&mut produced[dim], true) {
            return Err(Error::mapping(format!(
                "upper ids {upper_dims:?} are not a permutation of 0..{total_upper}"
            )));
        }
    }

    for (transform, lower) in transforms.iter().zip(lower_dims) {
        transform.validate()?;
        let lengths: Indices = lower.iter().map(|&dim| source.length(dim)).collect();
        transform.check_lower_lengths(&lengths)?;
    }

    let mut steps = source.steps().to_vec();
    steps.reserve(transforms.len());
    let mut hidden_lengths = source.hidden_lengths().to_vec();
    let mut visible: Dims = smallvec::smallvec![0; total_upper];
    let source_visible = source.visible_hidden_ids();

    for ((transform, lower), upper) in transforms.into_iter().zip(lower_dims).zip(upper_dims) {
        let lower_hidden: Dims = lower.iter().map(|&dim| source_visible[dim]).collect();
        let mut upper_hidden = Dims::with_capacity(upper.len());
        for (&dim, length) in upper.iter().zip(transform.upper_lengths()) {
            let id = hidden_lengths.len();
            hidden_lengths.push(length);
            visible[dim] = id;
            upper_hidden.push(id);
        }
        steps.push(TransformStep {
            transform,
            lower: lower_hidden,
            upper: upper_hidden,
        });
    }

    let result = TensorDescriptor::from_parts(source, steps, hidden_lengths, visible);
    log::trace!("composed {source} into {result}");
    Ok(result)
}

/// Accumulates the transforms of one composition stage.
///
/// `push` gives each transform's outputs the next free visible slots, in call
/// order; `push_at` places them explicitly. A stage uses one style or the
/// other.
#[derive(Debug, Default, Clone)]
pub struct StageBuilder {
    transforms: Vec<Transform>,
    lower: Vec<Dims>,
    upper: Vec<Dims>,
    next: usize,
}

impl StageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `transform` reading `lower`; returns the slots it produces.
    pub fn push(&mut self, transform: Transform, lower: Dims) -> Dims {
        let count = transform.num_upper_dims();
        let upper: Dims = (self.next..self.next + count).collect();
        self.next += count;
        self.push_at(transform, lower, upper.clone());
        upper
    }

    pub fn push_at(&mut self, transform: Transform, lower: Dims, upper: Dims) {
        self.transforms.push(transform);
        self.lower.push(lower);
        self.upper.push(upper);
    }

    /// Shorthand for a pass-through of `dim` with length `length`.
    pub fn pass(&mut self, length: Index, dim: usize) -> Result<usize> {
        let upper = self.push(Transform::pass_through(length)?, crate::dims![dim]);
        Ok(upper[0])
    }

    pub fn build(self, source: &TensorDescriptor) -> Result<TensorDescriptor> {
        transform_tensor_descriptor(source, self.transforms, &self.lower, &self.upper)
    }
}
