use nalgebra::{Matrix3x4, Matrix4, Point2, Point3};

use super::camera::{projection_from_pose, CameraIntrinsics};

/// Two-view Direct Linear Transform.
///
/// `camera_matrix1` and `camera_matrix2` project into the same coordinates as `x1_set` and
/// `x2_set` (pixels for `K [R | t]`, normalized rays for `[R | t]`). Every correspondence
/// gets an answer: near-zero parallax or points at infinity come back ill-conditioned or
/// non-finite, and filtering them is left to the caller.
pub fn triangulate_linear(
    camera_matrix1: &Matrix3x4<f64>,
    camera_matrix2: &Matrix3x4<f64>,
    x1_set: &[Point2<f64>],
    x2_set: &[Point2<f64>],
) -> Vec<Point3<f64>> {
    x1_set
        .iter()
        .zip(x2_set)
        .map(|(x1, x2)| {
            let matrix_a = Matrix4::from_rows(&[
                camera_matrix1.row(2) * x1.y - camera_matrix1.row(1),
                camera_matrix1.row(2) * x1.x - camera_matrix1.row(0),
                camera_matrix2.row(2) * x2.y - camera_matrix2.row(1),
                camera_matrix2.row(2) * x2.x - camera_matrix2.row(0),
            ]);

            // the solution is the right singular vector of the smallest singular value
            let svd = matrix_a.svd(false, true);
            let matrix_v_t = match svd.v_t {
                Some(v_t) => v_t,
                None => return Point3::new(f64::NAN, f64::NAN, f64::NAN),
            };
            let solution = matrix_v_t.row(svd.singular_values.imin());

            // convert to homogenous coordinates and back into euclidean
            Point3::new(solution[0], solution[1], solution[2]) / solution[3]
        })
        .collect()
}

/// Triangulates pixel correspondences between two absolute camera poses.
#[derive(Clone, Copy, Debug)]
pub struct Triangulator {
    intrinsics: CameraIntrinsics,
}

impl Triangulator {
    pub fn new(intrinsics: CameraIntrinsics) -> Self {
        Self { intrinsics }
    }

    /// The projection of each camera is the first three rows of its `4x4` pose.
    pub fn triangulate(
        &self,
        pose1: &Matrix4<f64>,
        pose2: &Matrix4<f64>,
        pixels1: &[Point2<f64>],
        pixels2: &[Point2<f64>],
    ) -> Vec<Point3<f64>> {
        let x1_set: Vec<_> = pixels1.iter().map(|p| self.intrinsics.normalize(p)).collect();
        let x2_set: Vec<_> = pixels2.iter().map(|p| self.intrinsics.normalize(p)).collect();

        triangulate_linear(
            &projection_from_pose(pose1),
            &projection_from_pose(pose2),
            &x1_set,
            &x2_set,
        )
    }
}
