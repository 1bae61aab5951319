use crate::common::*;

/// The policy for columns left unmatched by the greedy one-to-one pass.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, AsRefStr, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MatchType {
    /// Leftover columns take their best row among all rows.
    Bipartite,
    /// Leftover columns take their best row if the similarity reaches the
    /// distance threshold.
    PerPrediction,
}

/// Column-to-row matching result of one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchOutput {
    /// `[batch, cols]` instance-local row index, or -1 if unmatched.
    pub match_indices: Array2<i32>,
    /// `[batch, cols]` similarity of the matched pair, or -1.0 if unmatched.
    pub match_dist: Array2<f32>,
}

/// Greedy bipartite matching over a similarity matrix.
///
/// `dist` is `[R, C]`, with rows partitioned into instances by `lod` (a
/// single instance when absent). Per instance, the globally largest
/// similarity among the remaining rows and unmatched columns is matched
/// repeatedly, removing its row and column, until the rows run out or no
/// positive similarity remains. Ties go to the first entry in row-major
/// order. Afterwards every unmatched column is matched to its best row over
/// all rows of the instance, so rows can repeat. With
/// [MatchType::PerPrediction] that second pass only accepts similarities of
/// at least `dist_threshold`.
///
/// Similarities below `1e-6` never produce a match.
pub fn bipartite_match(
    dist: ArrayView2<'_, f32>,
    lod: Option<&Lod>,
    match_type: MatchType,
    dist_threshold: f32,
) -> Result<MatchOutput> {
    let (num_rows, num_cols) = dist.dim();
    let single;
    let lod = match lod {
        Some(lod) => lod,
        None => {
            single = Lod::single(num_rows);
            &single
        }
    };
    lod.ensure_covers(num_rows, "the distance matrix")?;

    let batch_size = lod.num_groups();
    let mut match_indices = Array2::from_elem((batch_size, num_cols), -1);
    let mut match_dist = Array2::from_elem((batch_size, num_cols), -1.0);

    let fallback_threshold = match match_type {
        MatchType::Bipartite => None,
        MatchType::PerPrediction => Some(dist_threshold),
    };

    izip!(
        lod.groups(),
        match_indices.outer_iter_mut(),
        match_dist.outer_iter_mut()
    )
    .for_each(|(rows, mut indices, mut distances)| {
        let instance_dist = dist.slice(s![rows, ..]);
        greedy_match(instance_dist, indices.view_mut(), distances.view_mut());
        fallback_match(
            instance_dist,
            fallback_threshold,
            indices.view_mut(),
            distances.view_mut(),
        );
    });

    debug!(
        "matched {} of {} columns over {} instances",
        match_indices.iter().filter(|&&index| index >= 0).count(),
        match_indices.len(),
        batch_size
    );

    Ok(MatchOutput {
        match_indices,
        match_dist,
    })
}

fn greedy_match(
    dist: ArrayView2<'_, f32>,
    mut indices: ArrayViewMut1<'_, i32>,
    mut distances: ArrayViewMut1<'_, f32>,
) {
    let eps = f32::overlap_eps();
    let (num_rows, num_cols) = dist.dim();
    let mut row_pool: Vec<usize> = (0..num_rows).collect();

    while !row_pool.is_empty() {
        let mut best: Option<(usize, usize, f32)> = None;

        for (pool_index, &row) in row_pool.iter().enumerate() {
            for col in 0..num_cols {
                if indices[col] != -1 {
                    continue;
                }
                let value = dist[[row, col]];
                if value <= eps {
                    continue;
                }
                match best {
                    Some((_, _, best_value)) if value <= best_value => {}
                    _ => best = Some((pool_index, col, value)),
                }
            }
        }

        let (pool_index, col, value) = match best {
            Some(best) => best,
            None => break,
        };
        indices[col] = row_pool.remove(pool_index) as i32;
        distances[col] = value;
    }
}

fn fallback_match(
    dist: ArrayView2<'_, f32>,
    threshold: Option<f32>,
    mut indices: ArrayViewMut1<'_, i32>,
    mut distances: ArrayViewMut1<'_, f32>,
) {
    let eps = f32::overlap_eps();

    dist.axis_iter(Axis(1)).enumerate().for_each(|(col, column)| {
        if indices[col] != -1 {
            return;
        }

        let best = column
            .iter()
            .cloned()
            .enumerate()
            .filter(|&(_, value)| value > eps && threshold.map_or(true, |thresh| value >= thresh))
            .fold(None, |best: Option<(usize, f32)>, (row, value)| match best {
                Some((_, best_value)) if value <= best_value => best,
                _ => Some((row, value)),
            });

        if let Some((row, value)) = best {
            indices[col] = row as i32;
            distances[col] = value;
        }
    });
}
