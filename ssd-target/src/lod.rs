//! Segment offsets ("level of detail") of batched arrays.

use crate::common::*;

/// Segment offsets partitioning the rows of a batched array into
/// per-instance groups.
///
/// The offsets start at zero and never decrease. Group `i` covers rows
/// `offsets[i]..offsets[i + 1]`, and the last offset is the total row count.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<usize>", into = "Vec<usize>")]
pub struct Lod(Vec<usize>);

impl Lod {
    pub fn try_from_offsets(offsets: Vec<usize>) -> Result<Self> {
        ensure_shape!(!offsets.is_empty(), "segment offsets must not be empty");
        ensure_shape!(
            offsets[0] == 0,
            "segment offsets must start at zero, got {:?}",
            offsets
        );
        ensure_shape!(
            offsets.iter().tuple_windows().all(|(lhs, rhs)| lhs <= rhs),
            "segment offsets must be non-decreasing, got {:?}",
            offsets
        );
        Ok(Self(offsets))
    }

    pub fn from_lengths<I>(lengths: I) -> Self
    where
        I: IntoIterator<Item = usize>,
    {
        let offsets = iter::once(0)
            .chain(lengths.into_iter().scan(0, |acc, len| {
                *acc += len;
                Some(*acc)
            }))
            .collect();
        Self(offsets)
    }

    /// A single group spanning `len` rows.
    pub fn single(len: usize) -> Self {
        Self(vec![0, len])
    }

    pub fn offsets(&self) -> &[usize] {
        &self.0
    }

    pub fn num_groups(&self) -> usize {
        self.0.len() - 1
    }

    pub fn total_len(&self) -> usize {
        *self.0.last().unwrap_or(&0)
    }

    pub fn group_len(&self, index: usize) -> usize {
        self.group(index).len()
    }

    pub fn group(&self, index: usize) -> Range<usize> {
        self.0[index]..self.0[index + 1]
    }

    pub fn groups(&self) -> impl Iterator<Item = Range<usize>> + '_ {
        self.0.iter().tuple_windows().map(|(&begin, &end)| begin..end)
    }

    pub fn lengths(&self) -> impl Iterator<Item = usize> + '_ {
        self.groups().map(|range| range.len())
    }

    /// Checks that the offsets cover exactly `num_rows` rows.
    pub fn ensure_covers(&self, num_rows: usize, what: &str) -> Result<()> {
        ensure_shape!(
            self.total_len() == num_rows,
            "segment offsets of {} cover {} rows, but it has {} rows",
            what,
            self.total_len(),
            num_rows
        );
        Ok(())
    }
}

impl TryFrom<Vec<usize>> for Lod {
    type Error = Error;

    fn try_from(from: Vec<usize>) -> Result<Self, Self::Error> {
        Self::try_from_offsets(from)
    }
}

impl From<Lod> for Vec<usize> {
    fn from(from: Lod) -> Self {
        from.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lod_from_lengths() {
        let lod = Lod::from_lengths([2, 0, 3]);
        assert_eq!(lod.offsets(), &[0, 2, 2, 5]);
        assert_eq!(lod.num_groups(), 3);
        assert_eq!(lod.total_len(), 5);
        assert_eq!(lod.groups().collect::<Vec<_>>(), vec![0..2, 2..2, 2..5]);
        assert_eq!(lod.lengths().collect::<Vec<_>>(), vec![2, 0, 3]);
    }

    #[test]
    fn lod_rejects_invalid_offsets() {
        assert!(Lod::try_from_offsets(vec![]).is_err());
        assert!(Lod::try_from_offsets(vec![1, 2]).is_err());
        assert!(Lod::try_from_offsets(vec![0, 3, 2]).is_err());
        assert!(Lod::try_from_offsets(vec![0]).is_ok());
    }

    #[test]
    fn lod_serde() {
        let lod: Lod = json5::from_str("[0, 1, 4]").unwrap();
        assert_eq!(lod, Lod::from_lengths([1, 3]));
        assert!(json5::from_str::<Lod>("[0, 4, 1]").is_err());
    }
}
