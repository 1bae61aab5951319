use crate::common::*;

/// Scalar type of box coordinates.
pub trait Element: Float {
    /// Similarities at or below this value count as no overlap.
    fn overlap_eps() -> Self {
        <Self as NumCast>::from(1e-6).unwrap_or_else(Self::epsilon)
    }
}

impl<T> Element for T where T: Float {}
