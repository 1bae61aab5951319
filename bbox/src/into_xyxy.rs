use crate::{common::*, element::Element, rect::Rect, XYXY};

/// Unchecked bounding box in `[xmin, ymin, xmax, ymax]` format.
///
/// Corners may be unordered. Geometric queries through [Rect] still work,
/// with degenerate boxes reporting non-positive sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct XYXY_<T> {
    pub xmin: T,
    pub ymin: T,
    pub xmax: T,
    pub ymax: T,
}

impl<T> From<[T; 4]> for XYXY_<T> {
    fn from(from: [T; 4]) -> Self {
        let [xmin, ymin, xmax, ymax] = from;
        Self {
            xmin,
            ymin,
            xmax,
            ymax,
        }
    }
}

impl<T> Rect for XYXY_<T>
where
    T: Copy + Num + PartialOrd,
{
    type Type = T;

    fn xmin(&self) -> T {
        self.xmin
    }

    fn ymin(&self) -> T {
        self.ymin
    }

    fn xmax(&self) -> T {
        self.xmax
    }

    fn ymax(&self) -> T {
        self.ymax
    }

    fn cx(&self) -> T {
        let two = T::one() + T::one();
        self.xmin + self.w() / two
    }

    fn cy(&self) -> T {
        let two = T::one() + T::one();
        self.ymin + self.h() / two
    }

    fn w(&self) -> T {
        self.xmax - self.xmin
    }

    fn h(&self) -> T {
        self.ymax - self.ymin
    }

    fn try_from_xyxy(xyxy: [T; 4]) -> Result<Self> {
        Ok(xyxy.into())
    }
}

impl<T> TryFrom<XYXY_<T>> for XYXY<T>
where
    T: Element,
{
    type Error = anyhow::Error;

    fn try_from(from: XYXY_<T>) -> Result<Self, Self::Error> {
        Self::try_from(&from)
    }
}

impl<T> TryFrom<&XYXY_<T>> for XYXY<T>
where
    T: Element,
{
    type Error = anyhow::Error;

    fn try_from(from: &XYXY_<T>) -> Result<Self, Self::Error> {
        let XYXY_ {
            xmin,
            ymin,
            xmax,
            ymax,
        } = *from;
        Self::try_from_xyxy([xmin, ymin, xmax, ymax])
    }
}
