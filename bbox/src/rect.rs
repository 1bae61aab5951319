use super::XYXY;
use crate::common::*;

/// The generic axis-aligned rectangle.
pub trait Rect {
    type Type;

    fn xmin(&self) -> Self::Type;
    fn ymin(&self) -> Self::Type;
    fn xmax(&self) -> Self::Type;
    fn ymax(&self) -> Self::Type;
    fn cx(&self) -> Self::Type;
    fn cy(&self) -> Self::Type;
    fn w(&self) -> Self::Type;
    fn h(&self) -> Self::Type;

    fn try_from_xyxy(xyxy: [Self::Type; 4]) -> Result<Self>
    where
        Self: Sized;
}

pub trait RectNum: Rect
where
    Self::Type: Num + PartialOrd,
{
    fn from_xyxy(xyxy: [Self::Type; 4]) -> Self
    where
        Self: Sized,
    {
        Self::try_from_xyxy(xyxy).unwrap()
    }

    fn xyxy(&self) -> [Self::Type; 4] {
        [self.xmin(), self.ymin(), self.xmax(), self.ymax()]
    }

    fn area(&self) -> <Self::Type as Mul<Self::Type>>::Output
    where
        Self::Type: Mul<Self::Type>,
    {
        self.w() * self.h()
    }
}

pub trait RectFloat: RectNum
where
    Self::Type: Float,
{
    /// Compute the intersection rectangle, `None` if the rectangles do not overlap.
    fn intersect_with<R>(&self, other: &R) -> Option<XYXY<Self::Type>>
    where
        R: Rect<Type = Self::Type>,
    {
        let xmin = self.xmin().max(other.xmin());
        let ymin = self.ymin().max(other.ymin());
        let xmax = self.xmax().min(other.xmax());
        let ymax = self.ymax().min(other.ymax());
        (xmax > xmin && ymax > ymin).then(|| XYXY {
            xmin,
            ymin,
            xmax,
            ymax,
        })
    }

    fn intersection_area_with<R>(&self, other: &R) -> Self::Type
    where
        R: Rect<Type = Self::Type>,
    {
        self.intersect_with(other)
            .map(|rect| rect.area())
            .unwrap_or_else(Self::Type::zero)
    }

    /// Intersection over union.
    ///
    /// Degenerate rectangles (non-positive width or height) have zero overlap
    /// with anything, including themselves.
    fn iou_with<R>(&self, other: &R) -> Self::Type
    where
        R: Rect<Type = Self::Type>,
    {
        let zero = Self::Type::zero();
        let is_degenerate = |w: Self::Type, h: Self::Type| w <= zero || h <= zero;

        if is_degenerate(self.w(), self.h()) || is_degenerate(other.w(), other.h()) {
            return zero;
        }

        let inter_area = self.intersection_area_with(other);
        let union_area = self.area() + other.area() - inter_area;
        if union_area <= zero {
            return zero;
        }

        // guard against rounding pushing the ratio past one
        (inter_area / union_area).min(Self::Type::one())
    }
}

impl<T> RectNum for T
where
    T: Rect,
    T::Type: Num + PartialOrd,
{
}

impl<T> RectFloat for T
where
    T: Rect,
    T::Type: Float,
{
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::XYXY_;
    use approx::assert_abs_diff_eq;

    #[test]
    fn iou_identity_and_symmetry() {
        let a = XYXY::<f64>::from_xyxy([0.0, 0.0, 10.0, 10.0]);
        let b = XYXY::from_xyxy([5.0, 5.0, 15.0, 15.0]);

        assert_abs_diff_eq!(a.iou_with(&a), 1.0);
        assert_abs_diff_eq!(a.iou_with(&b), 25.0 / 175.0, epsilon = 1e-12);
        assert_abs_diff_eq!(a.iou_with(&b), b.iou_with(&a));
    }

    #[test]
    fn iou_disjoint_and_degenerate() {
        let a = XYXY::<f64>::from_xyxy([0.0, 0.0, 10.0, 10.0]);
        let far = XYXY::from_xyxy([20.0, 20.0, 30.0, 30.0]);
        let flat = XYXY::from_xyxy([0.0, 5.0, 10.0, 5.0]);
        let flipped = XYXY_ {
            xmin: 10.0,
            ymin: 10.0,
            xmax: 0.0,
            ymax: 0.0,
        };

        assert_eq!(a.iou_with(&far), 0.0);
        assert_eq!(a.iou_with(&flat), 0.0);
        assert_eq!(flat.iou_with(&flat), 0.0);
        assert_eq!(flipped.iou_with(&a), 0.0);
    }

    #[test]
    fn iou_single_precision() {
        let a = XYXY_::<f32>::from([0.0, 0.0, 2.0, 2.0]);
        let b = XYXY_::<f32>::from([1.0, 0.0, 3.0, 2.0]);
        assert_abs_diff_eq!(a.iou_with(&b), 1.0 / 3.0, epsilon = 1e-6);
        assert_eq!(a.intersection_area_with(&XYXY_::from([5.0, 5.0, 6.0, 6.0])), 0.0);
    }

    #[test]
    fn intersection_touching_edges() {
        let a = XYXY::<f64>::from_xyxy([0.0, 0.0, 1.0, 1.0]);
        let b = XYXY::from_xyxy([1.0, 0.0, 2.0, 1.0]);
        assert!(a.intersect_with(&b).is_none());
        assert_eq!(a.intersection_area_with(&b), 0.0);
    }
}
