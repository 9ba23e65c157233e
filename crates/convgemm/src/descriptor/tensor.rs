//! Flat tensor descriptor: an ordered list of transform steps over a table of
//! hidden dimensions.
//!
//! Hidden dimension 0 is always the flat element offset. Every step consumes
//! some hidden dimensions (its lower side) and produces new ones (its upper
//! side); the visible dimensions are the hidden dimensions produced last.
//! Evaluating an index walks the steps from newest to oldest.

use std::fmt;

use serde::Serialize;
use smallvec::{smallvec, SmallVec};

use crate::descriptor::compose::transform_tensor_descriptor;
use crate::descriptor::dims::{Dims, Index, Indices};
use crate::descriptor::transform::Transform;
use crate::error::{Error, Result};

pub(crate) type Hidden = SmallVec<[Index; 32]>;

/// One transform applied to hidden dimensions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransformStep {
    pub transform: Transform,
    /// Hidden ids the transform reads from.
    pub lower: Dims,
    /// Hidden ids the transform produces.
    pub upper: Dims,
}

/// Immutable description of how a logical multi-index maps to a memory offset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TensorDescriptor {
    steps: Vec<TransformStep>,
    hidden_lengths: Vec<Index>,
    visible: Dims,
    /// Visible hidden ids of the descriptor this one was built from.
    source_visible: Option<Dims>,
    /// Number of steps inherited from that descriptor.
    source_steps: usize,
    element_space_size: Index,
}

/// Row-major strides for `lengths`, with overflow checking.
pub fn packed_strides(lengths: &[Index]) -> Result<Indices> {
    let mut strides: Indices = smallvec![0; lengths.len()];
    let mut stride: Index = 1;
    for axis in (0..lengths.len()).rev() {
        strides[axis] = stride;
        stride = stride
            .checked_mul(lengths[axis])
            .ok_or_else(|| Error::shape("naive", format!("packed size of {lengths:?} overflows")))?;
    }
    Ok(strides)
}

impl TensorDescriptor {
    /// Strided descriptor directly over memory.
    pub fn naive(lengths: &[Index], strides: &[Index]) -> Result<Self> {
        if lengths.len() != strides.len() {
            return Err(Error::shape(
                "naive",
                format!("{} lengths but {} strides", lengths.len(), strides.len()),
            ));
        }
        if let Some(stride) = strides.iter().find(|stride| **stride < 0) {
            return Err(Error::shape(
                "naive",
                format!("strides must be non-negative, got {stride}"),
            ));
        }
        let embed = Transform::embed(lengths, strides)?;
        let element_space_size = lengths
            .iter()
            .zip(strides)
            .try_fold(1 as Index, |acc, (len, stride)| {
                (len - 1).checked_mul(*stride).and_then(|span| acc.checked_add(span))
            })
            .ok_or_else(|| {
                Error::shape(
                    "naive",
                    format!("element space of {lengths:?} with strides {strides:?} overflows"),
                )
            })?;

        let mut hidden_lengths = Vec::with_capacity(lengths.len() + 1);
        hidden_lengths.push(element_space_size);
        hidden_lengths.extend_from_slice(lengths);
        let visible: Dims = (1..=lengths.len()).collect();
        Ok(Self {
            steps: vec![TransformStep {
                transform: embed,
                lower: smallvec![0],
                upper: visible.clone(),
            }],
            hidden_lengths,
            visible,
            source_visible: None,
            source_steps: 0,
            element_space_size,
        })
    }

    /// Row-major contiguous descriptor.
    pub fn packed(lengths: &[Index]) -> Result<Self> {
        let strides = packed_strides(lengths)?;
        Self::naive(lengths, &strides)
    }

    pub(crate) fn from_parts(
        source: &TensorDescriptor,
        steps: Vec<TransformStep>,
        hidden_lengths: Vec<Index>,
        visible: Dims,
    ) -> Self {
        Self {
            steps,
            hidden_lengths,
            visible,
            source_visible: Some(source.visible.clone()),
            source_steps: source.steps.len(),
            element_space_size: source.element_space_size,
        }
    }

    /// Wraps this descriptor in one more layer of transforms.
    ///
    /// See [`transform_tensor_descriptor`].
    pub fn transform(
        &self,
        transforms: Vec<Transform>,
        lower_dims: &[Dims],
        upper_dims: &[Dims],
    ) -> Result<Self> {
        transform_tensor_descriptor(self, transforms, lower_dims, upper_dims)
    }

    pub fn num_dims(&self) -> usize {
        self.visible.len()
    }

    /// Length of visible dimension `dim`.
    ///
    /// # Panics
    /// Panics if `dim >= self.num_dims()`.
    pub fn length(&self, dim: usize) -> Index {
        self.hidden_lengths[self.visible[dim]]
    }

    pub fn lengths(&self) -> Indices {
        self.visible.iter().map(|&h| self.hidden_lengths[h]).collect()
    }

    /// Number of logical elements (product of visible lengths).
    pub fn element_size(&self) -> Index {
        self.lengths().iter().product()
    }

    /// Number of elements the underlying buffer must hold.
    pub fn element_space_size(&self) -> Index {
        self.element_space_size
    }

    pub fn steps(&self) -> &[TransformStep] {
        &self.steps
    }

    pub fn hidden_lengths(&self) -> &[Index] {
        &self.hidden_lengths
    }

    /// Hidden ids of the visible dimensions, in visible order.
    pub fn visible_hidden_ids(&self) -> &[usize] {
        &self.visible
    }

    /// Whether this descriptor sits directly on memory.
    pub fn is_naive(&self) -> bool {
        self.source_visible.is_none()
    }

    pub fn calculate_offset(&self, idx: &[Index]) -> Result<Index> {
        self.check_arity(idx)?;
        Ok(self.walk(idx, 0).0[0])
    }

    /// False when the walk passes through a pad region.
    pub fn is_valid_index(&self, idx: &[Index]) -> Result<bool> {
        self.check_arity(idx)?;
        Ok(self.walk(idx, 0).1)
    }

    /// Offset of `idx`, or `None` when it lies in a pad region.
    pub fn offset_if_valid(&self, idx: &[Index]) -> Result<Option<Index>> {
        self.check_arity(idx)?;
        let (hidden, valid) = self.walk(idx, 0);
        Ok(valid.then_some(hidden[0]))
    }

    /// Index into the descriptor this one was built from. A naive descriptor
    /// sits on the flat buffer, so its source index is `[offset]`.
    pub fn calculate_source_index(&self, idx: &[Index]) -> Result<Indices> {
        self.check_arity(idx)?;
        match &self.source_visible {
            Some(source) => {
                let (hidden, _) = self.walk(idx, self.source_steps);
                Ok(source.iter().map(|&h| hidden[h]).collect())
            }
            None => Ok(smallvec![self.walk(idx, 0).0[0]]),
        }
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    fn check_arity(&self, idx: &[Index]) -> Result<()> {
        if idx.len() != self.num_dims() {
            return Err(Error::shape(
                "TensorDescriptor",
                format!(
                    "index has {} coordinates, descriptor has {} dimensions",
                    idx.len(),
                    self.num_dims()
                ),
            ));
        }
        Ok(())
    }

    /// Evaluates every hidden coordinate reachable from `idx`, stopping before
    /// step `first_step`. Also reports whether any pad region was hit.
    pub(crate) fn walk(&self, idx: &[Index], first_step: usize) -> (Hidden, bool) {
        let mut hidden: Hidden = smallvec![0; self.hidden_lengths.len()];
        for (&h, &i) in self.visible.iter().zip(idx) {
            hidden[h] = i;
        }
        let mut valid = true;
        for step in self.steps[first_step..].iter().rev() {
            let upper: Indices = step.upper.iter().map(|&h| hidden[h]).collect();
            if !step.transform.is_always_valid() {
                valid &= step.transform.is_valid_upper_index(&upper);
            }
            let mut lower: Indices = smallvec![0; step.lower.len()];
            step.transform.lower_index_into(&upper, &mut lower);
            for (&h, &value) in step.lower.iter().zip(&lower) {
                hidden[h] = value;
            }
        }
        (hidden, valid)
    }
}

impl fmt::Display for TensorDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TensorDescriptor{:?}", self.lengths().as_slice())
    }
}
