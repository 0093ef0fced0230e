use log::debug;
use nalgebra::{DMatrix, Matrix4, Point2, Point3, Rotation3, Vector3};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal, StandardNormal};
use serde::{Deserialize, Serialize};

use super::{FrameSource, SourceError};
use crate::algorithms::{
    camera::{CameraIntrinsics, RelativePose},
    matching::normalize_rows,
};
use crate::slam::frame::Observations;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    pub points: usize,
    pub frames: usize,
    pub descriptor_dim: usize,
    /// Standard deviation of the gaussian noise added to every pixel coordinate.
    pub pixel_noise: f64,
    pub seed: u64,
    /// Sideways camera motion per frame, in world units.
    pub step: f64,
    /// Yaw per frame, in radians.
    pub yaw: f64,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            points: 50,
            frames: 3,
            descriptor_dim: 32,
            pixel_noise: 0.0,
            seed: 0,
            step: 0.2,
            yaw: 0.02,
        }
    }
}

/// Random landmarks seen by a camera sliding along the x axis.
///
/// Keypoint `j` of every frame is the projection of landmark `j`, and carries the same
/// descriptor in every frame.
pub struct SyntheticScene {
    intrinsics: CameraIntrinsics,
    config: SceneConfig,
    landmarks: Vec<Point3<f64>>,
    descriptors: DMatrix<f32>,
    noise_rng: ChaCha8Rng,
    next: usize,
}

impl SyntheticScene {
    pub fn new(intrinsics: CameraIntrinsics, config: SceneConfig) -> Result<Self, SourceError> {
        if config.descriptor_dim == 0 {
            return Err(SourceError::Malformed("descriptor_dim must be positive".to_string()));
        }
        if !(config.pixel_noise >= 0.0 && config.pixel_noise.is_finite()) {
            return Err(SourceError::Malformed(format!(
                "pixel_noise must be a finite non-negative value, got {}",
                config.pixel_noise
            )));
        }

        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        let landmarks: Vec<Point3<f64>> = (0..config.points)
            .map(|_| {
                Point3::new(
                    rng.gen_range(-2.0..2.0),
                    rng.gen_range(-1.5..1.5),
                    rng.gen_range(4.0..8.0),
                )
            })
            .collect();

        let mut descriptors =
            DMatrix::<f32>::from_fn(config.points, config.descriptor_dim, |_, _| {
                StandardNormal.sample(&mut rng)
            });
        normalize_rows(&mut descriptors);

        Ok(Self {
            noise_rng: ChaCha8Rng::seed_from_u64(config.seed.wrapping_add(1)),
            intrinsics,
            config,
            landmarks,
            descriptors,
            next: 0,
        })
    }

    pub fn landmarks(&self) -> &[Point3<f64>] {
        &self.landmarks
    }

    /// World to camera transform of frame `index`.
    pub fn camera_pose(&self, index: usize) -> Matrix4<f64> {
        let rotation = Rotation3::from_euler_angles(0.0, self.config.yaw * index as f64, 0.0);
        let center = Vector3::new(self.config.step * index as f64, 0.0, 0.0);
        RelativePose {
            rotation: *rotation.matrix(),
            translation: -(rotation * center),
        }
        .to_matrix()
    }

    /// Noise-free keypoints of frame `index`.
    pub fn project(&self, index: usize) -> Vec<Point2<f64>> {
        let pose = self.camera_pose(index);
        self.landmarks
            .iter()
            .filter_map(|landmark| {
                let camera = pose.transform_point(landmark);
                self.intrinsics.project(&camera)
            })
            .collect()
    }

    pub fn frame_count(&self) -> usize {
        self.config.frames
    }
}

impl FrameSource for SyntheticScene {
    fn next_frame(&mut self) -> Result<Option<Observations>, SourceError> {
        if self.next >= self.config.frames {
            return Ok(None);
        }

        let mut points = self.project(self.next);
        if points.len() != self.landmarks.len() {
            return Err(SourceError::Malformed(format!(
                "frame {}: {} landmarks fell behind the camera",
                self.next,
                self.landmarks.len() - points.len()
            )));
        }
        if self.config.pixel_noise > 0.0 {
            let noise = Normal::new(0.0, self.config.pixel_noise)
                .map_err(|err| SourceError::Malformed(err.to_string()))?;
            for point in &mut points {
                point.x += noise.sample(&mut self.noise_rng);
                point.y += noise.sample(&mut self.noise_rng);
            }
        }
        debug!("synthetic frame {} with {} keypoints", self.next, points.len());

        self.next += 1;
        Ok(Some(Observations::new(points, self.descriptors.clone())?))
    }
}
