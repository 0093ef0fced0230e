use nalgebra::{Matrix3, Matrix3x4, Matrix4, Point2, Point3, Vector3};
use serde::{Deserialize, Serialize};

use super::triangulation::triangulate_linear;

/// Pinhole camera intrinsics `K` with zero skew:
/// ```plain
/// | fx  0  cx |
/// |  0 fy  cy |
/// |  0  0   1 |
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

impl Default for CameraIntrinsics {
    /// Calibration of the board camera the recorded datasets were captured with.
    fn default() -> Self {
        Self {
            fx: 323.042_225_176_219_9,
            fy: 321.798_817_679_189_9,
            cx: 250.842_914_502_954_4,
            cy: 141.825_113_630_065_5,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum IntrinsicsError {
    InvalidFocalLength { fx: f64, fy: f64 },
    InvalidPrincipalPoint { cx: f64, cy: f64 },
    NonZeroSkew(f64),
    NotHomogeneous,
}

impl std::fmt::Display for IntrinsicsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IntrinsicsError::InvalidFocalLength { fx, fy } => {
                write!(f, "focal lengths must be finite and non-zero, got fx={fx} fy={fy}")
            }
            IntrinsicsError::InvalidPrincipalPoint { cx, cy } => {
                write!(f, "principal point must be finite, got cx={cx} cy={cy}")
            }
            IntrinsicsError::NonZeroSkew(skew) => write!(f, "expected zero skew, got {skew}"),
            IntrinsicsError::NotHomogeneous => write!(f, "last row of K must be [0, 0, 1]"),
        }
    }
}

impl std::error::Error for IntrinsicsError {}

impl CameraIntrinsics {
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Result<Self, IntrinsicsError> {
        Self { fx, fy, cx, cy }.validated()
    }

    /// Principal point at the image center, equal focal length on both axes.
    pub fn from_focal_and_size(
        focal: f64,
        width: f64,
        height: f64,
    ) -> Result<Self, IntrinsicsError> {
        Self::new(focal, focal, width / 2.0, height / 2.0)
    }

    pub fn from_matrix(k: &Matrix3<f64>) -> Result<Self, IntrinsicsError> {
        if k[(0, 1)] != 0.0 {
            return Err(IntrinsicsError::NonZeroSkew(k[(0, 1)]));
        }
        if k[(1, 0)] != 0.0 || k[(2, 0)] != 0.0 || k[(2, 1)] != 0.0 || k[(2, 2)] != 1.0 {
            return Err(IntrinsicsError::NotHomogeneous);
        }
        Self::new(k[(0, 0)], k[(1, 1)], k[(0, 2)], k[(1, 2)])
    }

    /// Checks the invariants a deserialized value may have skipped.
    pub fn validated(self) -> Result<Self, IntrinsicsError> {
        let focal_ok = |v: f64| v.is_finite() && v != 0.0;
        if !focal_ok(self.fx) || !focal_ok(self.fy) {
            return Err(IntrinsicsError::InvalidFocalLength {
                fx: self.fx,
                fy: self.fy,
            });
        }
        if !self.cx.is_finite() || !self.cy.is_finite() {
            return Err(IntrinsicsError::InvalidPrincipalPoint {
                cx: self.cx,
                cy: self.cy,
            });
        }
        Ok(self)
    }

    pub fn matrix(&self) -> Matrix3<f64> {
        Matrix3::new(self.fx, 0.0, self.cx, 0.0, self.fy, self.cy, 0.0, 0.0, 1.0)
    }

    /// `K^-1` in closed form, never singular for validated intrinsics.
    pub fn inverse(&self) -> Matrix3<f64> {
        Matrix3::new(
            1.0 / self.fx,
            0.0,
            -self.cx / self.fx,
            0.0,
            1.0 / self.fy,
            -self.cy / self.fy,
            0.0,
            0.0,
            1.0,
        )
    }

    /// Pixel coordinates to the `z = 1` plane of the camera frame.
    pub fn normalize(&self, pixel: &Point2<f64>) -> Point2<f64> {
        Point2::new((pixel.x - self.cx) / self.fx, (pixel.y - self.cy) / self.fy)
    }

    /// Camera-frame point to pixel coordinates, `None` behind the camera.
    pub fn project(&self, point: &Point3<f64>) -> Option<Point2<f64>> {
        if point.z <= 0.0 {
            return None;
        }
        Some(Point2::new(
            self.fx * point.x / point.z + self.cx,
            self.fy * point.y / point.z + self.cy,
        ))
    }
}

/// Rigid transform `x_2 = R x_1 + t` between two camera frames.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RelativePose {
    pub rotation: Matrix3<f64>,
    pub translation: Vector3<f64>,
}

impl RelativePose {
    pub fn identity() -> Self {
        Self {
            rotation: Matrix3::identity(),
            translation: Vector3::zeros(),
        }
    }

    /// Homogeneous `4x4` form `[R t; 0 1]`
    pub fn to_matrix(&self) -> Matrix4<f64> {
        let mut pose = Matrix4::identity();
        for r in 0..3 {
            for c in 0..3 {
                pose[(r, c)] = self.rotation[(r, c)];
            }
            pose[(r, 3)] = self.translation[r];
        }
        pose
    }

    /// Normalized-coordinate projection matrix `[R | t]`
    pub fn projection(&self) -> Matrix3x4<f64> {
        projection_from_pose(&self.to_matrix())
    }

    /// Maps a point from the first camera frame into the second.
    pub fn transform(&self, point: &Point3<f64>) -> Point3<f64> {
        Point3::from(self.rotation * point.coords + self.translation)
    }
}

/// Takes the first three rows of a homogeneous pose.
pub fn projection_from_pose(pose: &Matrix4<f64>) -> Matrix3x4<f64> {
    Matrix3x4::from_fn(|r, c| pose[(r, c)])
}

pub const NUM_CONFIGURATIONS: usize = 4;

/// Determines which Camera Pose is correct by evaluating the Cheirality Condition,
/// which is defined as when the transformed point lies in front of the camera.
/// Reference: http://users.cecs.anu.edu.au/~hartley/Papers/cheiral/revision/cheiral.pdf
///
/// Returns the index of the winning configuration together with the per-pair mask of points
/// that satisfied the condition under it.
pub fn disambiguate_camera_pose(
    configurations: &[RelativePose; NUM_CONFIGURATIONS],
    x1_set: &[Point2<f64>],
    x2_set: &[Point2<f64>],
) -> (usize, Vec<bool>) {
    // compute the mask for each configuration,
    // and then return the group with the most points in front of the camera views.
    let mut best: (usize, Vec<bool>, usize) = (0, vec![false; x1_set.len()], 0);
    for (i, pose) in configurations.iter().enumerate() {
        let mask = cheirality_mask(pose, x1_set, x2_set);
        let score = mask.iter().filter(|&&front| front).count();

        if score > best.2 {
            best = (i, mask, score);
        }
    }

    (best.0, best.1)
}

/// Triangulates every pair (in normalized coordinates) with the first camera at `[I | 0]`
/// and the second at `[R | t]`, then checks `X_3 > 0` (first camera) and
/// `r_3 X + t_3 > 0` (second camera).
pub fn cheirality_mask(
    pose: &RelativePose,
    x1_set: &[Point2<f64>],
    x2_set: &[Point2<f64>],
) -> Vec<bool> {
    let reference = RelativePose::identity().projection();
    triangulate_linear(&reference, &pose.projection(), x1_set, x2_set)
        .iter()
        .map(|x| {
            let finite = x.coords.iter().all(|v| v.is_finite());
            finite && x.z > 0.0 && pose.transform(x).z > 0.0
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Rotation3;

    #[test]
    fn intrinsics_round_trip_through_matrix() {
        let k = CameraIntrinsics::new(500.0, 480.0, 320.0, 240.0).unwrap();
        let back = CameraIntrinsics::from_matrix(&k.matrix()).unwrap();
        assert_eq!(k, back);

        let identity = k.matrix() * k.inverse();
        assert!((identity - Matrix3::identity()).norm() < 1e-12);
    }

    #[test]
    fn intrinsics_reject_malformed_matrices() {
        let skewed = Matrix3::new(500.0, 1.0, 320.0, 0.0, 500.0, 240.0, 0.0, 0.0, 1.0);
        assert_eq!(
            CameraIntrinsics::from_matrix(&skewed),
            Err(IntrinsicsError::NonZeroSkew(1.0))
        );

        let zero_focal = Matrix3::new(0.0, 0.0, 320.0, 0.0, 500.0, 240.0, 0.0, 0.0, 1.0);
        assert!(matches!(
            CameraIntrinsics::from_matrix(&zero_focal),
            Err(IntrinsicsError::InvalidFocalLength { .. })
        ));

        let bad_row = Matrix3::new(500.0, 0.0, 320.0, 0.0, 500.0, 240.0, 0.0, 0.0, 2.0);
        assert_eq!(
            CameraIntrinsics::from_matrix(&bad_row),
            Err(IntrinsicsError::NotHomogeneous)
        );
    }

    #[test]
    fn normalize_inverts_project() {
        let k = CameraIntrinsics::from_focal_and_size(400.0, 640.0, 480.0).unwrap();
        let point = Point3::new(0.3, -0.2, 2.0);
        let pixel = k.project(&point).unwrap();
        let ray = k.normalize(&pixel);
        assert!((ray.x - 0.15).abs() < 1e-12);
        assert!((ray.y + 0.1).abs() < 1e-12);
        assert!(k.project(&Point3::new(0.0, 0.0, -1.0)).is_none());
    }

    #[test]
    fn cheirality_selects_the_true_configuration() {
        let truth = RelativePose {
            rotation: *Rotation3::from_euler_angles(0.02, -0.05, 0.01).matrix(),
            translation: Vector3::new(-1.0, 0.1, 0.05).normalize(),
        };
        let flipped = RelativePose {
            translation: -truth.translation,
            ..truth
        };
        let points = [
            Point3::new(0.1, 0.2, 4.0),
            Point3::new(-0.5, 0.3, 5.0),
            Point3::new(0.7, -0.4, 6.0),
            Point3::new(-0.2, -0.6, 4.5),
        ];
        let x1: Vec<_> = points.iter().map(|p| Point2::new(p.x / p.z, p.y / p.z)).collect();
        let x2: Vec<_> = points
            .iter()
            .map(|p| truth.transform(p))
            .map(|p| Point2::new(p.x / p.z, p.y / p.z))
            .collect();

        let configurations = [flipped, truth, flipped, flipped];
        let (index, mask) = disambiguate_camera_pose(&configurations, &x1, &x2);
        assert_eq!(index, 1);
        assert!(mask.iter().all(|&front| front));

        // the mirrored baseline puts every point behind a camera
        assert!(cheirality_mask(&flipped, &x1, &x2).iter().all(|&front| !front));
    }
}
