//! Primitive coordinate transforms.
//!
//! A transform relates the *upper* coordinates it exposes to the *lower*
//! coordinates of the descriptor it wraps. The forward direction
//! (upper → lower) is what a kernel evaluates per access; the backward
//! direction only exists where the mapping is injective.

use std::cmp::Reverse;

use serde::{Deserialize, Serialize};
use smallvec::{smallvec, SmallVec};

use crate::descriptor::dims::{Index, Indices};
use crate::error::{Error, Result};
use crate::math::checked_product;

/// Bijective or affine index mapping between upper and lower dimensions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Transform {
    /// Identity on one dimension.
    PassThrough { length: Index },
    /// Extends one dimension by `left_pad` and `right_pad` elements; upper
    /// coordinates outside the wrapped extent land in the pad region.
    Pad {
        lower_length: Index,
        left_pad: Index,
        right_pad: Index,
    },
    /// Collapses several lower dimensions into one upper dimension.
    Merge { lower_lengths: Indices },
    /// Splits one lower dimension into several upper dimensions.
    Unmerge { upper_lengths: Indices },
    /// Affine combination `lower = Σ coefficients[i] * upper[i]`.
    Embed {
        upper_lengths: Indices,
        coefficients: Indices,
    },
    /// Exposes the window `[begin, end)` of one dimension.
    Slice {
        lower_length: Index,
        begin: Index,
        end: Index,
    },
    /// Pins one lower dimension to a constant; exposes no upper dimension.
    Freeze { lower_length: Index, index: Index },
}

impl Transform {
    pub fn pass_through(length: Index) -> Result<Self> {
        Transform::PassThrough { length }.validated()
    }

    pub fn pad(lower_length: Index, left_pad: Index, right_pad: Index) -> Result<Self> {
        Transform::Pad {
            lower_length,
            left_pad,
            right_pad,
        }
        .validated()
    }

    pub fn left_pad(lower_length: Index, left_pad: Index) -> Result<Self> {
        Self::pad(lower_length, left_pad, 0)
    }

    pub fn right_pad(lower_length: Index, right_pad: Index) -> Result<Self> {
        Self::pad(lower_length, 0, right_pad)
    }

    pub fn merge(lower_lengths: &[Index]) -> Result<Self> {
        Transform::Merge {
            lower_lengths: Indices::from_slice(lower_lengths),
        }
        .validated()
    }

    pub fn unmerge(upper_lengths: &[Index]) -> Result<Self> {
        Transform::Unmerge {
            upper_lengths: Indices::from_slice(upper_lengths),
        }
        .validated()
    }

    pub fn embed(upper_lengths: &[Index], coefficients: &[Index]) -> Result<Self> {
        Transform::Embed {
            upper_lengths: Indices::from_slice(upper_lengths),
            coefficients: Indices::from_slice(coefficients),
        }
        .validated()
    }

    pub fn slice(lower_length: Index, begin: Index, end: Index) -> Result<Self> {
        Transform::Slice {
            lower_length,
            begin,
            end,
        }
        .validated()
    }

    pub fn freeze(lower_length: Index, index: Index) -> Result<Self> {
        Transform::Freeze {
            lower_length,
            index,
        }
        .validated()
    }

    fn validated(self) -> Result<Self> {
        self.validate()?;
        Ok(self)
    }

    /// Short name used in error messages and descriptor dumps.
    pub fn name(&self) -> &'static str {
        match self {
            Transform::PassThrough { .. } => "PassThrough",
            Transform::Pad { .. } => "Pad",
            Transform::Merge { .. } => "Merge",
            Transform::Unmerge { .. } => "Unmerge",
            Transform::Embed { .. } => "Embed",
            Transform::Slice { .. } => "Slice",
            Transform::Freeze { .. } => "Freeze",
        }
    }

    /// Checks the transform's own parameters.
    pub fn validate(&self) -> Result<()> {
        let name = self.name();
        match self {
            Transform::PassThrough { length } => check_length(name, "length", *length),
            Transform::Pad {
                lower_length,
                left_pad,
                right_pad,
            } => {
                check_length(name, "lower length", *lower_length)?;
                if *left_pad < 0 || *right_pad < 0 {
                    return Err(Error::shape(
                        name,
                        format!("pads must be non-negative, got ({left_pad}, {right_pad})"),
                    ));
                }
                lower_length
                    .checked_add(*left_pad)
                    .and_then(|len| len.checked_add(*right_pad))
                    .map(|_| ())
                    .ok_or_else(|| Error::shape(name, "padded length overflows"))
            }
            Transform::Merge { lower_lengths } => check_lengths(name, lower_lengths),
            Transform::Unmerge { upper_lengths } => check_lengths(name, upper_lengths),
            Transform::Embed {
                upper_lengths,
                coefficients,
            } => {
                check_lengths(name, upper_lengths)?;
                if coefficients.len() != upper_lengths.len() {
                    return Err(Error::shape(
                        name,
                        format!(
                            "{} upper lengths but {} coefficients",
                            upper_lengths.len(),
                            coefficients.len()
                        ),
                    ));
                }
                Ok(())
            }
            Transform::Slice {
                lower_length,
                begin,
                end,
            } => {
                check_length(name, "lower length", *lower_length)?;
                if !(0 <= *begin && begin < end && end <= lower_length) {
                    return Err(Error::shape(
                        name,
                        format!("window [{begin}, {end}) is not inside [0, {lower_length})"),
                    ));
                }
                Ok(())
            }
            Transform::Freeze {
                lower_length,
                index,
            } => {
                check_length(name, "lower length", *lower_length)?;
                if !(0..*lower_length).contains(index) {
                    return Err(Error::shape(
                        name,
                        format!("index {index} is not inside [0, {lower_length})"),
                    ));
                }
                Ok(())
            }
        }
    }

    pub fn num_upper_dims(&self) -> usize {
        match self {
            Transform::Unmerge { upper_lengths } | Transform::Embed { upper_lengths, .. } => {
                upper_lengths.len()
            }
            Transform::Freeze { .. } => 0,
            _ => 1,
        }
    }

    pub fn num_lower_dims(&self) -> usize {
        match self {
            Transform::Merge { lower_lengths } => lower_lengths.len(),
            _ => 1,
        }
    }

    /// Lengths of the dimensions this transform exposes.
    pub fn upper_lengths(&self) -> Indices {
        match self {
            Transform::PassThrough { length } => smallvec![*length],
            Transform::Pad {
                lower_length,
                left_pad,
                right_pad,
            } => smallvec![lower_length + left_pad + right_pad],
            Transform::Merge { lower_lengths } => smallvec![lower_lengths.iter().product::<Index>()],
            Transform::Unmerge { upper_lengths } | Transform::Embed { upper_lengths, .. } => {
                upper_lengths.clone()
            }
            Transform::Slice { begin, end, .. } => smallvec![end - begin],
            Transform::Freeze { .. } => Indices::new(),
        }
    }

    /// Checks that the dimensions this transform consumes have the lengths it
    /// was built for.
    ///
    /// Embed accepts any source length: its reachable span may fall short of
    /// the source (a stride that does not divide the padded extent) or exceed
    /// it when a later slice or freeze restricts the domain.
    pub fn check_lower_lengths(&self, actual: &[Index]) -> Result<()> {
        let name = self.name();
        if actual.len() != self.num_lower_dims() {
            return Err(Error::shape(
                name,
                format!(
                    "expects {} lower dimensions, got {}",
                    self.num_lower_dims(),
                    actual.len()
                ),
            ));
        }
        let expected: Indices = match self {
            Transform::PassThrough { length } => smallvec![*length],
            Transform::Pad { lower_length, .. }
            | Transform::Slice { lower_length, .. }
            | Transform::Freeze { lower_length, .. } => smallvec![*lower_length],
            Transform::Merge { lower_lengths } => lower_lengths.clone(),
            Transform::Unmerge { upper_lengths } => smallvec![upper_lengths.iter().product::<Index>()],
            Transform::Embed { .. } => return Ok(()),
        };
        if expected.as_slice() != actual {
            return Err(Error::shape(
                name,
                format!("built for lower lengths {expected:?}, applied to {actual:?}"),
            ));
        }
        Ok(())
    }

    /// Maps an upper coordinate to the lower coordinate it reads from.
    pub fn calculate_lower_index(&self, upper: &[Index]) -> Result<Indices> {
        if upper.len() != self.num_upper_dims() {
            return Err(Error::shape(
                self.name(),
                format!(
                    "expects {} upper coordinates, got {}",
                    self.num_upper_dims(),
                    upper.len()
                ),
            ));
        }
        let mut lower: Indices = smallvec![0; self.num_lower_dims()];
        self.lower_index_into(upper, &mut lower);
        Ok(lower)
    }

    /// Unchecked forward mapping; `upper` and `lower` have the transform's
    /// arities.
    pub(crate) fn lower_index_into(&self, upper: &[Index], lower: &mut [Index]) {
        match self {
            Transform::PassThrough { .. } => lower[0] = upper[0],
            Transform::Pad { left_pad, .. } => lower[0] = upper[0] - left_pad,
            Transform::Merge { lower_lengths } => {
                let mut rest = upper[0];
                for i in (1..lower_lengths.len()).rev() {
                    lower[i] = rest.rem_euclid(lower_lengths[i]);
                    rest = rest.div_euclid(lower_lengths[i]);
                }
                lower[0] = rest;
            }
            Transform::Unmerge { upper_lengths } => {
                lower[0] = upper
                    .iter()
                    .zip(upper_lengths)
                    .fold(0, |acc, (idx, len)| acc * len + idx);
            }
            Transform::Embed { coefficients, .. } => {
                lower[0] = upper.iter().zip(coefficients).map(|(u, c)| u * c).sum();
            }
            Transform::Slice { begin, .. } => lower[0] = upper[0] + begin,
            Transform::Freeze { index, .. } => lower[0] = *index,
        }
    }

    /// Maps a lower coordinate back to the unique upper coordinate that reads
    /// it, or `None` when there is no such coordinate.
    pub fn calculate_upper_index(&self, lower: &[Index]) -> Result<Option<Indices>> {
        if lower.len() != self.num_lower_dims() {
            return Err(Error::shape(
                self.name(),
                format!(
                    "expects {} lower coordinates, got {}",
                    self.num_lower_dims(),
                    lower.len()
                ),
            ));
        }
        let upper: Option<Indices> = match self {
            Transform::PassThrough { length } => {
                (0..*length).contains(&lower[0]).then(|| smallvec![lower[0]])
            }
            Transform::Pad {
                lower_length,
                left_pad,
                ..
            } => (0..*lower_length)
                .contains(&lower[0])
                .then(|| smallvec![lower[0] + left_pad]),
            Transform::Merge { lower_lengths } => {
                let in_range = lower
                    .iter()
                    .zip(lower_lengths)
                    .all(|(idx, len)| (0..*len).contains(idx));
                in_range.then(|| {
                    smallvec![lower
                        .iter()
                        .zip(lower_lengths)
                        .fold(0, |acc, (idx, len)| acc * len + idx)]
                })
            }
            Transform::Unmerge { upper_lengths } => {
                let total: Index = upper_lengths.iter().product();
                (0..total).contains(&lower[0]).then(|| {
                    let mut upper: Indices = smallvec![0; upper_lengths.len()];
                    let mut rest = lower[0];
                    for i in (0..upper_lengths.len()).rev() {
                        upper[i] = rest % upper_lengths[i];
                        rest /= upper_lengths[i];
                    }
                    upper
                })
            }
            Transform::Embed {
                upper_lengths,
                coefficients,
            } => embed_preimage(upper_lengths, coefficients, lower[0]),
            Transform::Slice { begin, end, .. } => (*begin..*end)
                .contains(&lower[0])
                .then(|| smallvec![lower[0] - begin]),
            Transform::Freeze { index, .. } => (lower[0] == *index).then(Indices::new),
        };
        Ok(upper)
    }

    /// Whether `upper` maps to a lower coordinate inside the wrapped tensor.
    ///
    /// Only padding can leave the wrapped extent; reads from the pad region
    /// are zero-filled and writes are dropped by the consumer.
    pub fn is_valid_upper_index(&self, upper: &[Index]) -> bool {
        match self {
            Transform::Pad {
                lower_length,
                left_pad,
                ..
            } => upper
                .first()
                .is_some_and(|idx| (0..*lower_length).contains(&(idx - left_pad))),
            _ => true,
        }
    }

    pub fn is_always_valid(&self) -> bool {
        !matches!(self, Transform::Pad { .. })
    }
}

fn check_length(transform: &'static str, what: &str, length: Index) -> Result<()> {
    if length < 1 {
        return Err(Error::shape(
            transform,
            format!("{what} must be at least 1, got {length}"),
        ));
    }
    Ok(())
}

fn check_lengths(transform: &'static str, lengths: &[Index]) -> Result<()> {
    if lengths.is_empty() {
        return Err(Error::shape(transform, "needs at least one dimension"));
    }
    for len in lengths {
        check_length(transform, "dimension length", *len)?;
    }
    checked_product(lengths)
        .map(|_| ())
        .ok_or_else(|| Error::shape(transform, format!("product of {lengths:?} overflows")))
}

/// Inverts an embed when its coefficients address every upper coordinate
/// uniquely: sorted by magnitude, each coefficient must exceed the combined
/// reach of all smaller ones.
fn embed_preimage(upper_lengths: &[Index], coefficients: &[Index], lower: Index) -> Option<Indices> {
    let mut order: SmallVec<[usize; 6]> = (0..upper_lengths.len())
        .filter(|&i| upper_lengths[i] > 1)
        .collect();
    order.sort_by_key(|&i| Reverse(coefficients[i].abs()));

    let mut span = 0;
    for &i in order.iter().rev() {
        if coefficients[i].abs() <= span {
            return None;
        }
        span += coefficients[i].abs() * (upper_lengths[i] - 1);
    }

    let mut upper: Indices = smallvec![0; upper_lengths.len()];
    let mut rest = lower;
    for (pos, &i) in order.iter().enumerate() {
        let (mut lo, mut hi) = (0, 0);
        for &j in &order[pos + 1..] {
            let reach = coefficients[j] * (upper_lengths[j] - 1);
            if reach < 0 {
                lo += reach;
            } else {
                hi += reach;
            }
        }
        let coefficient = coefficients[i];
        let idx = if coefficient > 0 {
            (rest - lo).div_euclid(coefficient)
        } else {
            (hi - rest).div_euclid(-coefficient)
        };
        if !(0..upper_lengths[i]).contains(&idx) {
            return None;
        }
        upper[i] = idx;
        rest -= coefficient * idx;
    }
    (rest == 0).then_some(upper)
}
