use nalgebra::DMatrix;

/// Index of a feature in the previous frame paired with an index in the current one.
pub type Correspondence = (usize, usize);

/// Finds one-to-one correspondences between two descriptor sets.
///
/// Implementations may swap the dense search for an approximate index; the tracker only
/// relies on each index appearing in at most one pair.
pub trait DescriptorMatcher {
    fn match_descriptors(
        &self,
        previous: &DMatrix<f32>,
        current: &DMatrix<f32>,
    ) -> Vec<Correspondence>;
}

/// Mutual nearest neighbor matching over cosine similarity.
///
/// Rows of both descriptor sets must be unit normalized, so the dot product of two rows is
/// their cosine similarity. Similarities below `threshold` are suppressed before the
/// forward (row) and backward (column) arg-max, and a pair survives only when each side is
/// the other's best match. Ties resolve to the lowest index.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MutualNearestNeighbor {
    pub threshold: f32,
}

impl Default for MutualNearestNeighbor {
    fn default() -> Self {
        Self { threshold: 0.9 }
    }
}

impl MutualNearestNeighbor {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }
}

impl DescriptorMatcher for MutualNearestNeighbor {
    fn match_descriptors(
        &self,
        previous: &DMatrix<f32>,
        current: &DMatrix<f32>,
    ) -> Vec<Correspondence> {
        if previous.nrows() == 0 || current.nrows() == 0 {
            return Vec::new();
        }

        let similarity = similarity(previous, current)
            .map(|s| if s < self.threshold { 0.0 } else { s });

        let forward: Vec<usize> = (0..similarity.nrows())
            .map(|i| argmax(similarity.row(i).iter().copied()))
            .collect();
        let backward: Vec<usize> = (0..similarity.ncols())
            .map(|j| argmax(similarity.column(j).iter().copied()))
            .collect();

        forward
            .iter()
            .enumerate()
            .filter(|&(i, &j)| backward[j] == i)
            // a row whose entries were all suppressed still has an arg-max; it is not a match
            .filter(|&(i, &j)| similarity[(i, j)] > 0.0 && similarity[(i, j)] >= self.threshold)
            .map(|(i, &j)| (i, j))
            .collect()
    }
}

/// `N_1 x N_2` matrix of pairwise dot products.
pub fn similarity(a: &DMatrix<f32>, b: &DMatrix<f32>) -> DMatrix<f32> {
    a * b.transpose()
}

/// Scales every row to unit L2 norm, leaving all-zero rows untouched.
pub fn normalize_rows(descriptors: &mut DMatrix<f32>) {
    for mut row in descriptors.row_iter_mut() {
        let norm = row.norm();
        if norm > 0.0 && norm.is_finite() {
            row /= norm;
        }
    }
}

/// Index of the first maximum.
fn argmax(values: impl Iterator<Item = f32>) -> usize {
    let mut best = (0, f32::NEG_INFINITY);
    for (i, value) in values.enumerate() {
        if value > best.1 {
            best = (i, value);
        }
    }
    best.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_rows(rows: &[&[f32]]) -> DMatrix<f32> {
        let cols = rows[0].len();
        let flat: Vec<f32> = rows.iter().flat_map(|r| r.iter().copied()).collect();
        let mut matrix = DMatrix::from_row_slice(rows.len(), cols, &flat);
        normalize_rows(&mut matrix);
        matrix
    }

    fn descriptors() -> DMatrix<f32> {
        unit_rows(&[
            &[1.0, 0.0, 0.0, 0.0],
            &[0.0, 1.0, 0.0, 0.0],
            &[0.0, 0.0, 1.0, 0.2],
            &[0.1, 0.0, 0.0, 1.0],
            &[0.5, 0.5, 0.5, 0.5],
        ])
    }

    #[test]
    fn self_match_is_identity() {
        let d = descriptors();
        let matches = MutualNearestNeighbor::default().match_descriptors(&d, &d);
        assert_eq!(matches, (0..d.nrows()).map(|i| (i, i)).collect::<Vec<_>>());
    }

    #[test]
    fn matching_is_symmetric() {
        let a = descriptors();
        let b = unit_rows(&[
            &[0.5, 0.5, 0.5, 0.52],
            &[0.0, 0.02, 1.0, 0.2],
            &[0.98, 0.05, 0.0, 0.0],
            &[0.0, 0.0, 0.0, 1.0],
        ]);
        let matcher = MutualNearestNeighbor::default();
        let forward = matcher.match_descriptors(&a, &b);
        let mut backward: Vec<_> = matcher
            .match_descriptors(&b, &a)
            .into_iter()
            .map(|(j, i)| (i, j))
            .collect();
        backward.sort();

        assert!(!forward.is_empty());
        assert_eq!(forward, backward);
    }

    #[test]
    fn weak_similarities_never_match() {
        let a = unit_rows(&[&[1.0, 0.0], &[0.0, 1.0]]);
        let b = unit_rows(&[&[1.0, 1.0]]);
        // cos(45 deg) ~ 0.707 is below the acceptance threshold
        assert!(MutualNearestNeighbor::default().match_descriptors(&a, &b).is_empty());
        assert_eq!(
            MutualNearestNeighbor::new(0.7).match_descriptors(&a, &b),
            vec![(0, 0)]
        );
    }

    #[test]
    fn ties_resolve_to_the_lowest_index() {
        let a = unit_rows(&[&[1.0, 0.0]]);
        let b = unit_rows(&[&[1.0, 0.0], &[1.0, 0.0]]);
        assert_eq!(
            MutualNearestNeighbor::default().match_descriptors(&a, &b),
            vec![(0, 0)]
        );
    }

    #[test]
    fn empty_input_gives_no_matches() {
        let a = descriptors();
        let empty = DMatrix::<f32>::zeros(0, 4);
        let matcher = MutualNearestNeighbor::default();
        assert!(matcher.match_descriptors(&a, &empty).is_empty());
        assert!(matcher.match_descriptors(&empty, &a).is_empty());
    }
}
