//! Index and dimension-id containers.

use smallvec::SmallVec;

/// Signed coordinate, length, stride and offset type.
///
/// Signed so that coordinates inside a pad region, which map below zero in
/// the padded tensor, stay representable.
pub type Index = i64;

/// Multi-index or list of lengths.
pub type Indices = SmallVec<[Index; 6]>;

/// List of dimension ids handed to the composition engine.
pub type Dims = SmallVec<[usize; 4]>;

/// Collects dimension ids into a [`Dims`].
#[macro_export]
macro_rules! dims {
    ($($dim:expr),* $(,)?) => {{
        let mut tmp = $crate::descriptor::dims::Dims::new();
        $(tmp.push($dim as usize);)*
        tmp
    }};
}

/// Builds a [`Dims`] from any sequence.
pub fn dims_iter<I>(iter: I) -> Dims
where
    I: IntoIterator<Item = usize>,
{
    iter.into_iter().collect()
}
