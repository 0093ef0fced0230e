use nalgebra::{Matrix3, Point2, RowVector3, SMatrix, Vector2, Vector3};
use sample_consensus::{Estimator, Model};

use super::camera::{RelativePose, NUM_CONFIGURATIONS};

/// A correspondence `(x_1, x_2)` in normalized camera coordinates.
pub type PointPair = (Point2<f64>, Point2<f64>);

/// Relative singular value below which the 8-point system is treated as rank deficient.
const RANK_TOLERANCE: f64 = 1e-12;

/// Essential Matrix `E = [t]x R`, satisfying `x_2^T E x_1 = 0`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EssentialMatrix(pub Matrix3<f64>);

impl EssentialMatrix {
    /// Projects an arbitrary `3x3` estimate onto the essential manifold
    /// by forcing its singular values to `(1, 1, 0)`.
    pub fn from_estimate(estimate: Matrix3<f64>) -> Option<Self> {
        let (u, _, v) = ordered_svd(&estimate)?;
        let essential = u * Matrix3::from_diagonal(&Vector3::new(1.0, 1.0, 0.0)) * v.transpose();

        essential
            .iter()
            .all(|v| v.is_finite())
            .then_some(Self(essential))
    }

    /// `[t]x R` of a relative pose. Its singular values are `(1, 1, 0)` for a unit `t`.
    pub fn from_pose(pose: &RelativePose) -> Self {
        Self(pose.translation.cross_matrix() * pose.rotation)
    }

    /// Signed first order (Sampson) distance from the correspondence to the epipolar
    /// constraint, in normalized image units. `None` where the epipolar lines vanish.
    pub fn sampson_error(&self, data: &PointPair) -> Option<f64> {
        let src_homogenous = Vector3::new(data.0.x, data.0.y, 1.0);
        let dst_homogenous = Vector3::new(data.1.x, data.1.y, 1.0);
        let src_e = self.0 * src_homogenous;
        let dst_e = self.0.transpose() * dst_homogenous;
        let distance = dst_homogenous.dot(&src_e);

        let gradient =
            src_e.x * src_e.x + src_e.y * src_e.y + dst_e.x * dst_e.x + dst_e.y * dst_e.y;
        (gradient > f64::EPSILON).then(|| distance / gradient.sqrt())
    }

    /// Convert from Essential Matrix to Rt (Rotation and Translation)
    /// Reference: DIKU 3DCV2 lecture 16,
    /// https://ia601408.us.archive.org/view_archive.php?archive=/7/items/DIKU-3DCV2/
    ///
    /// The four candidates are `(R_1, t)`, `(R_1, -t)`, `(R_2, t)` and `(R_2, -t)`,
    /// where `t` has unit norm.
    pub fn extract_pose_configurations(&self) -> Option<[RelativePose; NUM_CONFIGURATIONS]> {
        let matrix_w = Matrix3::from_rows(&[
            RowVector3::new(0.0, -1.0, 0.0),
            RowVector3::new(1.0, 0.0, 0.0),
            RowVector3::new(0.0, 0.0, 1.0),
        ]);

        // U,d,V = svd(E), with both orthogonal factors turned into proper rotations.
        // E is only defined up to sign so flipping either factor keeps it valid.
        let (mut matrix_u, _, mut matrix_v) = ordered_svd(&self.0)?;
        if matrix_u.determinant() < 0.0 {
            matrix_u = -matrix_u;
        }
        if matrix_v.determinant() < 0.0 {
            matrix_v = -matrix_v;
        }
        let matrix_v_t = matrix_v.transpose();

        // R = U W V_T and R = U W_T V_T
        let rotation1 = matrix_u * matrix_w * matrix_v_t;
        let rotation2 = matrix_u * matrix_w.transpose() * matrix_v_t;

        // t = u_3 where: U[u_1, u_2, u_3]
        let camera_t = matrix_u.column(2).clone_owned();

        let candidate = |rotation: Matrix3<f64>, translation: Vector3<f64>| RelativePose {
            rotation,
            translation,
        };

        Some([
            candidate(rotation1, camera_t),
            candidate(rotation1, -camera_t),
            candidate(rotation2, camera_t),
            candidate(rotation2, -camera_t),
        ])
    }
}

impl Model<PointPair> for EssentialMatrix {
    /// Unsigned Sampson distance, in normalized image units.
    fn residual(&self, data: &PointPair) -> f64 {
        self.sampson_error(data).map_or(f64::INFINITY, f64::abs)
    }
}

/// Solves `x_2^T E x_1 = 0` in the least-squares sense over every pair supplied, then
/// projects the solution onto the essential manifold.
///
/// Both point sets are Hartley normalized first (centroid at the origin, mean distance
/// `sqrt(2)`), and the solution is mapped back with `T_2^T E T_1`.
///
/// `None` when fewer than eight pairs are given or the constraint matrix has more than
/// a one-dimensional nullspace (coincident or collinear points, planar degeneracies).
pub fn eight_point<I>(pairs: I) -> Option<EssentialMatrix>
where
    I: Iterator<Item = PointPair>,
{
    const COLUMNS: usize = 9;

    let pairs: Vec<PointPair> = pairs.collect();
    if pairs.len() < EightPoint::MIN_SAMPLES {
        return None;
    }
    let (src, dst): (Vec<_>, Vec<_>) = pairs.into_iter().unzip();
    let src_transform = hartley_normalization(&src)?;
    let dst_transform = hartley_normalization(&dst)?;

    // accumulate A^T A so any number of pairs fits in a fixed 9x9 system
    let mut normal = SMatrix::<f64, COLUMNS, COLUMNS>::zeros();
    for (x1, x2) in src.iter().zip(&dst) {
        let x1 = src_transform.transform_point(x1);
        let x2 = dst_transform.transform_point(x2);
        let row = SMatrix::<f64, 1, COLUMNS>::from_row_slice(&[
            x2.x * x1.x,
            x2.x * x1.y,
            x2.x,
            x2.y * x1.x,
            x2.y * x1.y,
            x2.y,
            x1.x,
            x1.y,
            1.0,
        ]);
        normal += row.transpose() * row;
    }

    // Solve for the nullspace of the constraint matrix.
    let svd = normal.svd(false, true);
    let matrix_v_t = svd.v_t?;
    let largest = svd.singular_values.max();
    let vanishing = svd
        .singular_values
        .iter()
        .filter(|&&s| s <= largest * RANK_TOLERANCE)
        .count();
    if !(largest > 0.0) || vanishing > 1 {
        return None;
    }

    // The nullspace is the right singular vector of the smallest singular value.
    let estimate = Matrix3::from_row_iterator(
        matrix_v_t
            .row(svd.singular_values.imin())
            .iter()
            .copied(),
    );

    let estimate = dst_transform.matrix().transpose() * estimate * src_transform.matrix();
    EssentialMatrix::from_estimate(estimate)
}

/// Similarity moving the centroid of `points` to the origin at a mean distance of `sqrt(2)`.
fn hartley_normalization(points: &[Point2<f64>]) -> Option<Similarity2> {
    let count = points.len() as f64;
    let centroid = points
        .iter()
        .fold(Vector2::zeros(), |sum: Vector2<f64>, point| sum + point.coords)
        / count;
    let spread = points
        .iter()
        .map(|point| (point.coords - centroid).norm())
        .sum::<f64>()
        / count;
    if !(spread > f64::EPSILON) {
        return None;
    }

    Some(Similarity2 {
        scale: std::f64::consts::SQRT_2 / spread,
        centroid,
    })
}

/// `x -> scale * (x - centroid)`
#[derive(Clone, Copy, Debug)]
struct Similarity2 {
    scale: f64,
    centroid: Vector2<f64>,
}

impl Similarity2 {
    fn transform_point(&self, point: &Point2<f64>) -> Point2<f64> {
        Point2::from((point.coords - self.centroid) * self.scale)
    }

    fn matrix(&self) -> Matrix3<f64> {
        let s = self.scale;
        Matrix3::new(
            s,
            0.0,
            -s * self.centroid.x,
            0.0,
            s,
            -s * self.centroid.y,
            0.0,
            0.0,
            1.0,
        )
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct EightPoint;

impl Estimator<PointPair> for EightPoint {
    const MIN_SAMPLES: usize = 8;
    type Model = EssentialMatrix;
    type ModelIter = Option<EssentialMatrix>;

    fn estimate<I>(&self, data: I) -> Self::ModelIter
    where
        I: Iterator<Item = PointPair> + Clone,
    {
        eight_point(data)
    }
}

/// SVD of a `3x3` matrix as `(U, S, V)` with singular values in descending order.
fn ordered_svd(matrix: &Matrix3<f64>) -> Option<(Matrix3<f64>, Vector3<f64>, Matrix3<f64>)> {
    let svd = matrix.svd(true, true);
    let matrix_u = svd.u?;
    let matrix_v = svd.v_t?.transpose();
    let values = svd.singular_values;

    let mut order = [0, 1, 2];
    order.sort_by(|&a, &b| values[b].total_cmp(&values[a]));

    let u_sorted = Matrix3::from_columns(&order.map(|i| matrix_u.column(i).clone_owned()));
    let v_sorted = Matrix3::from_columns(&order.map(|i| matrix_v.column(i).clone_owned()));
    let s_sorted = Vector3::new(values[order[0]], values[order[1]], values[order[2]]);

    Some((u_sorted, s_sorted, v_sorted))
}
