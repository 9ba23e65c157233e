//! Integer helpers shared by the lowering code.

use crate::descriptor::Index;

/// `ceil(a / b)` for non-negative `a` and positive `b`.
pub fn ceil_div(a: Index, b: Index) -> Index {
    a / b + Index::from(a % b != 0)
}

/// Greatest common divisor; `gcd(0, b) == b`.
pub fn gcd(a: Index, b: Index) -> Index {
    let (mut a, mut b) = (a.abs(), b.abs());
    while b != 0 {
        let r = a % b;
        a = b;
        b = r;
    }
    a
}

/// Smallest multiple of `multiple` that is `>= value`.
pub fn round_up(value: Index, multiple: Index) -> Index {
    ceil_div(value, multiple) * multiple
}

/// Product of `values` with overflow checking.
pub fn checked_product(values: &[Index]) -> Option<Index> {
    values.iter().try_fold(1 as Index, |acc, v| acc.checked_mul(*v))
}
