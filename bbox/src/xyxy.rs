use super::Rect;
use crate::common::*;

/// Bounding box in `[xmin, ymin, xmax, ymax]` format.
///
/// The corners are ordered, i.e. `xmin <= xmax` and `ymin <= ymax`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct XYXY<T> {
    pub(crate) xmin: T,
    pub(crate) ymin: T,
    pub(crate) xmax: T,
    pub(crate) ymax: T,
}

impl<T> XYXY<T>
where
    T: Float,
{
    /// Clamp the corners into `[lower, upper]` on both axes.
    pub fn clamp(&self, lower: T, upper: T) -> Self {
        let clamp = |value: T| value.max(lower).min(upper);
        Self {
            xmin: clamp(self.xmin),
            ymin: clamp(self.ymin),
            xmax: clamp(self.xmax),
            ymax: clamp(self.ymax),
        }
    }
}

impl<T> Rect for XYXY<T>
where
    T: Copy + Num + PartialOrd,
{
    type Type = T;

    fn xmin(&self) -> Self::Type {
        self.xmin
    }

    fn ymin(&self) -> Self::Type {
        self.ymin
    }

    fn xmax(&self) -> Self::Type {
        self.xmax
    }

    fn ymax(&self) -> Self::Type {
        self.ymax
    }

    fn cx(&self) -> Self::Type {
        let two = T::one() + T::one();
        self.xmin + self.w() / two
    }

    fn cy(&self) -> Self::Type {
        let two = T::one() + T::one();
        self.ymin + self.h() / two
    }

    fn w(&self) -> Self::Type {
        self.xmax - self.xmin
    }

    fn h(&self) -> Self::Type {
        self.ymax - self.ymin
    }

    fn try_from_xyxy(xyxy: [Self::Type; 4]) -> Result<Self> {
        let [xmin, ymin, xmax, ymax] = xyxy;
        ensure!(
            xmax >= xmin && ymax >= ymin,
            "xmax >= xmin and ymax >= ymin must hold"
        );

        Ok(Self {
            xmin,
            ymin,
            xmax,
            ymax,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prelude::*;

    #[test]
    fn reject_unordered_corners() {
        assert!(XYXY::try_from_xyxy([1.0, 0.0, 0.0, 1.0]).is_err());
        assert!(XYXY::try_from_xyxy([0.0, 1.0, 1.0, 0.0]).is_err());
        assert!(XYXY::try_from_xyxy([0.0, 0.0, 0.0, 0.0]).is_ok());
    }

    #[test]
    fn clamp_to_unit_square() {
        let rect = XYXY::<f64>::from_xyxy([-0.25, 0.5, 1.5, 0.75]).clamp(0.0, 1.0);
        assert_eq!(rect.xyxy(), [0.0, 0.5, 1.0, 0.75]);
    }
}
