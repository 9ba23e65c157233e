//! Cached coordinates for repeated evaluation against one descriptor.

use smallvec::smallvec;

use crate::descriptor::dims::{Index, Indices};
use crate::descriptor::tensor::{Hidden, TensorDescriptor};
use crate::error::{Error, Result};

/// Every hidden coordinate of one visible index, so that small moves only
/// re-evaluate the transforms they touch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorCoordinate {
    hidden: Hidden,
}

impl TensorCoordinate {
    pub fn new(desc: &TensorDescriptor, idx: &[Index]) -> Result<Self> {
        check_arity(desc, idx.len())?;
        let (hidden, _) = desc.walk(idx, 0);
        Ok(Self { hidden })
    }

    pub fn offset(&self) -> Index {
        self.hidden[0]
    }

    /// Current visible index.
    pub fn index(&self, desc: &TensorDescriptor) -> Indices {
        desc.visible_hidden_ids()
            .iter()
            .map(|&h| self.hidden[h])
            .collect()
    }

    /// False when the coordinate lies in a pad region.
    pub fn is_valid(&self, desc: &TensorDescriptor) -> bool {
        desc.steps()
            .iter()
            .filter(|step| !step.transform.is_always_valid())
            .all(|step| {
                let upper: Indices = step.upper.iter().map(|&h| self.hidden[h]).collect();
                step.transform.is_valid_upper_index(&upper)
            })
    }

    /// Moves the visible index by `step`, re-evaluating only transforms whose
    /// inputs changed.
    pub fn move_by(&mut self, desc: &TensorDescriptor, step: &[Index]) -> Result<()> {
        check_arity(desc, step.len())?;
        if self.hidden.len() != desc.hidden_lengths().len() {
            return Err(Error::shape(
                "TensorCoordinate",
                "coordinate was created for a different descriptor",
            ));
        }
        let mut changed: smallvec::SmallVec<[bool; 32]> = smallvec![false; self.hidden.len()];
        for (&h, &delta) in desc.visible_hidden_ids().iter().zip(step) {
            if delta != 0 {
                self.hidden[h] += delta;
                changed[h] = true;
            }
        }
        for transform_step in desc.steps().iter().rev() {
            if !transform_step.upper.iter().any(|&h| changed[h]) {
                continue;
            }
            let upper: Indices = transform_step
                .upper
                .iter()
                .map(|&h| self.hidden[h])
                .collect();
            let mut lower: Indices = smallvec![0; transform_step.lower.len()];
            transform_step.transform.lower_index_into(&upper, &mut lower);
            for (&h, &value) in transform_step.lower.iter().zip(&lower) {
                if self.hidden[h] != value {
                    self.hidden[h] = value;
                    changed[h] = true;
                }
            }
        }
        Ok(())
    }
}

fn check_arity(desc: &TensorDescriptor, len: usize) -> Result<()> {
    if len != desc.num_dims() {
        return Err(Error::shape(
            "TensorCoordinate",
            format!(
                "got {len} coordinates for a {}-d descriptor",
                desc.num_dims()
            ),
        ));
    }
    Ok(())
}
