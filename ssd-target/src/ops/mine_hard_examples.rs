use crate::common::*;

pub use miner::*;
pub use negative_indices::*;

mod negative_indices {
    use super::*;

    /// Flat list of prior indices grouped by instance.
    #[derive(Debug, Clone, PartialEq, Eq, Getters)]
    pub struct NegativeIndices {
        #[get = "pub"]
        indices: Vec<usize>,
        #[get = "pub"]
        lod: Lod,
    }

    impl NegativeIndices {
        pub fn new(indices: Vec<usize>, lod: Lod) -> Result<Self> {
            lod.ensure_covers(indices.len(), "negative indices")?;
            Ok(Self { indices, lod })
        }

        /// Builds the indices from one list per instance.
        pub fn from_groups<I, G>(groups: I) -> Self
        where
            I: IntoIterator<Item = G>,
            G: IntoIterator<Item = usize>,
        {
            let mut lengths = vec![];
            let mut indices = vec![];
            groups.into_iter().for_each(|group| {
                let before = indices.len();
                indices.extend(group);
                lengths.push(indices.len() - before);
            });

            Self {
                indices,
                lod: Lod::from_lengths(lengths),
            }
        }

        pub fn num_groups(&self) -> usize {
            self.lod.num_groups()
        }

        pub fn group(&self, index: usize) -> &[usize] {
            &self.indices[self.lod.group(index)]
        }

        pub fn groups(&self) -> impl Iterator<Item = &[usize]> + '_ {
            self.lod.groups().map(move |range| &self.indices[range])
        }
    }
}

mod miner {
    use super::*;

    /// Strategy to pick negative examples.
    #[derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        EnumString,
        AsRefStr,
        Display,
    )]
    #[serde(rename_all = "snake_case")]
    #[strum(serialize_all = "snake_case")]
    pub enum MiningType {
        /// Pick the unmatched priors with the largest classification loss.
        MaxNegative,
        /// Sample a fixed number of hard examples. Not supported.
        HardExample,
    }

    #[derive(Debug, Clone)]
    pub struct HardNegativeMinerInit {
        pub mining_type: MiningType,
        pub neg_pos_ratio: f64,
        pub neg_dist_threshold: f64,
        pub sample_size: Option<usize>,
    }

    impl Default for HardNegativeMinerInit {
        fn default() -> Self {
            Self {
                mining_type: MiningType::MaxNegative,
                neg_pos_ratio: 3.0,
                neg_dist_threshold: 0.5,
                sample_size: None,
            }
        }
    }

    impl HardNegativeMinerInit {
        pub fn build(self) -> Result<HardNegativeMiner> {
            let Self {
                mining_type,
                neg_pos_ratio,
                neg_dist_threshold,
                sample_size,
            } = self;

            ensure_config!(
                mining_type == MiningType::MaxNegative,
                "only max_negative mining is supported, but got {}",
                mining_type
            );
            ensure_config!(
                neg_pos_ratio.is_finite() && neg_pos_ratio >= 0.0,
                "neg_pos_ratio must be a non-negative finite number"
            );
            ensure_config!(
                neg_dist_threshold.is_finite(),
                "neg_dist_threshold must be a finite number"
            );
            if let Some(sample_size) = sample_size {
                warn!(
                    "sample_size = {} is ignored by max_negative mining",
                    sample_size
                );
            }

            Ok(HardNegativeMiner {
                neg_pos_ratio,
                neg_dist_threshold: neg_dist_threshold as f32,
            })
        }
    }

    /// Hard negative example miner.
    #[derive(Debug, Clone, PartialEq, CopyGetters)]
    pub struct HardNegativeMiner {
        #[get_copy = "pub"]
        neg_pos_ratio: f64,
        #[get_copy = "pub"]
        neg_dist_threshold: f32,
    }

    #[derive(Debug, Clone, PartialEq)]
    pub struct MiningOutput {
        pub neg_indices: NegativeIndices,
        /// Match indices after mining, unchanged by max-negative mining.
        pub updated_match_indices: Array2<i32>,
    }

    impl HardNegativeMiner {
        /// Selects hard negatives per instance.
        ///
        /// Candidates are unmatched priors whose match distance is below
        /// `neg_dist_threshold`. They are ranked by `cls_loss` in descending
        /// order, ties by ascending prior index, and the first
        /// `floor(neg_pos_ratio * num_pos)` are kept. The selection of each
        /// instance is returned in ascending prior order.
        pub fn mine(
            &self,
            cls_loss: ArrayView2<'_, f32>,
            match_indices: ArrayView2<'_, i32>,
            match_dist: ArrayView2<'_, f32>,
        ) -> Result<MiningOutput> {
            let shape = match_indices.dim();
            ensure_shape!(
                cls_loss.dim() == shape && match_dist.dim() == shape,
                "cls_loss {:?}, match_indices {:?} and match_dist {:?} must have the same shape",
                cls_loss.shape(),
                match_indices.shape(),
                match_dist.shape()
            );

            let groups: Vec<Vec<usize>> = izip!(
                cls_loss.outer_iter(),
                match_indices.outer_iter(),
                match_dist.outer_iter()
            )
            .map(|(loss, indices, dist)| self.mine_instance(loss, indices, dist))
            .collect();

            debug!(
                "mined {} negatives over {} instances",
                groups.iter().map(Vec::len).sum::<usize>(),
                groups.len()
            );

            Ok(MiningOutput {
                neg_indices: NegativeIndices::from_groups(groups),
                updated_match_indices: match_indices.to_owned(),
            })
        }

        fn mine_instance(
            &self,
            loss: ArrayView1<'_, f32>,
            indices: ArrayView1<'_, i32>,
            dist: ArrayView1<'_, f32>,
        ) -> Vec<usize> {
            let num_pos = indices.iter().filter(|&&index| index >= 0).count();

            let mut candidates: Vec<(usize, f32)> = izip!(loss.iter(), indices.iter(), dist.iter())
                .enumerate()
                .filter(|&(_, (_, &index, &dist))| index == -1 && dist < self.neg_dist_threshold)
                .map(|(prior, (&loss, _, _))| (prior, loss))
                .collect();

            let num_neg = ((self.neg_pos_ratio * num_pos as f64).floor() as usize)
                .min(candidates.len());

            candidates.sort_by(|(lhs_prior, lhs_loss), (rhs_prior, rhs_loss)| {
                rhs_loss
                    .total_cmp(lhs_loss)
                    .then_with(|| lhs_prior.cmp(rhs_prior))
            });

            candidates
                .into_iter()
                .take(num_neg)
                .map(|(prior, _)| prior)
                .sorted()
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn miner(neg_pos_ratio: f64) -> HardNegativeMiner {
        HardNegativeMinerInit {
            neg_pos_ratio,
            ..Default::default()
        }
        .build()
        .unwrap()
    }

    #[test]
    fn picks_largest_losses() -> Result<()> {
        let cls_loss = array![[0.1, 0.9, 0.5, 0.7, 0.3, 0.8]];
        let match_indices = array![[0, -1, -1, -1, -1, 1]];
        let match_dist = array![[0.9, -1.0, -1.0, -1.0, -1.0, 0.6]];

        let output = miner(1.0).mine(cls_loss.view(), match_indices.view(), match_dist.view())?;
        assert_eq!(output.neg_indices.group(0), &[1, 3]);
        assert_eq!(output.updated_match_indices, match_indices);
        Ok(())
    }

    #[test]
    fn respects_ratio_and_distance_threshold() -> Result<()> {
        let cls_loss = array![[1.0, 2.0, 3.0, 4.0], [4.0, 3.0, 2.0, 1.0]];
        let match_indices = array![[0, -1, -1, -1], [-1, -1, -1, -1]];
        // prior 3 of instance 0 overlaps a ground truth box too much
        let match_dist = array![[0.8, -1.0, 0.2, 0.7], [-1.0, -1.0, -1.0, -1.0]];

        let output = miner(1.5).mine(cls_loss.view(), match_indices.view(), match_dist.view())?;

        assert_eq!(output.neg_indices.num_groups(), 2);
        assert_eq!(output.neg_indices.group(0), &[2]);
        // no positives, no negatives
        assert!(output.neg_indices.group(1).is_empty());
        Ok(())
    }

    #[test]
    fn ties_prefer_lower_prior_index() -> Result<()> {
        let cls_loss = array![[0.5, 0.5, 0.5, 0.5]];
        let match_indices = array![[-1, 0, -1, -1]];
        let match_dist = array![[-1.0, 1.0, -1.0, -1.0]];

        let output = miner(2.0).mine(cls_loss.view(), match_indices.view(), match_dist.view())?;
        assert_eq!(output.neg_indices.group(0), &[0, 2]);
        Ok(())
    }

    #[test]
    fn rejects_unsupported_mining_type() {
        let err = HardNegativeMinerInit {
            mining_type: MiningType::HardExample,
            sample_size: Some(64),
            ..Default::default()
        }
        .build()
        .unwrap_err();
        assert!(err.downcast_ref::<SsdError>().unwrap().is_config());
    }

    #[test]
    fn negative_indices_groups() -> Result<()> {
        let neg = NegativeIndices::from_groups(vec![vec![3, 5], vec![], vec![1]]);
        assert_eq!(neg.lod().offsets(), &[0, 2, 2, 3]);
        assert_eq!(neg.groups().collect::<Vec<_>>(), vec![&[3, 5][..], &[], &[1]]);

        assert!(NegativeIndices::new(vec![1, 2], Lod::from_lengths([1])).is_err());
        Ok(())
    }
}
