use arrsac::Arrsac;
use log::{debug, trace};
use nalgebra::Point2;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use sample_consensus::{Consensus, Estimator, Model};

use super::{
    camera::{cheirality_mask, disambiguate_camera_pose, CameraIntrinsics, RelativePose},
    consensus::Ransac,
    essential::{EightPoint, EssentialMatrix, PointPair},
    refinement::refine_pose,
};
use crate::config::{ConsensusConfig, ConsensusMethod};

/// Soft failures of relative pose estimation. The tracker drops the frame and carries on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PoseError {
    InsufficientCorrespondences { found: usize, required: usize },
    /// No essential matrix could be fit (rank deficient or non-decomposable system).
    Degenerate,
    /// Too few correspondences lie in front of both cameras under every decomposition.
    Cheirality { in_front: usize, required: usize },
}

impl std::fmt::Display for PoseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoseError::InsufficientCorrespondences { found, required } => {
                write!(f, "insufficient correspondences: {found} < {required}")
            }
            PoseError::Degenerate => write!(f, "degenerate essential matrix fit"),
            PoseError::Cheirality { in_front, required } => write!(
                f,
                "only {in_front} correspondences in front of both cameras, need {required}"
            ),
        }
    }
}

impl std::error::Error for PoseError {}

/// Relative pose between two frames with the correspondences that support it.
#[derive(Clone, Debug)]
pub struct PoseEstimate {
    /// Translation is a unit direction: monocular scale is unobservable.
    pub pose: RelativePose,
    /// Aligned with the input correspondences.
    pub inliers: Vec<bool>,
}

impl PoseEstimate {
    pub fn inlier_count(&self) -> usize {
        self.inliers.iter().filter(|&&inlier| inlier).count()
    }
}

/// Rounds of nonlinear refinement and re-scoring after consensus.
const REFINEMENT_ROUNDS: usize = 4;

/// Estimates the relative motion `x_2 = R x_1 + t` from pixel correspondences.
pub struct PoseEstimator {
    intrinsics: CameraIntrinsics,
    config: ConsensusConfig,
    rng: ChaCha8Rng,
}

impl PoseEstimator {
    pub fn new(intrinsics: CameraIntrinsics, config: ConsensusConfig) -> Self {
        Self {
            intrinsics,
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            config,
        }
    }

    /// Robustly fits an essential matrix to `matches` (pixel coordinates, previous frame
    /// first) and decomposes it into the rotation and translation direction most
    /// correspondences agree with.
    ///
    /// A failed estimate leaves the sampling state as it was, so the next call draws the
    /// same samples it would have drawn without the failure.
    pub fn estimate(
        &mut self,
        matches: &[(Point2<f64>, Point2<f64>)],
    ) -> Result<PoseEstimate, PoseError> {
        let checkpoint = self.rng.clone();
        let estimate = self.fit(matches);
        if estimate.is_err() {
            self.rng = checkpoint;
        }
        estimate
    }

    fn fit(&mut self, matches: &[(Point2<f64>, Point2<f64>)]) -> Result<PoseEstimate, PoseError> {
        let required = EightPoint::MIN_SAMPLES;
        if matches.len() < required {
            return Err(PoseError::InsufficientCorrespondences {
                found: matches.len(),
                required,
            });
        }

        let normalized: Vec<PointPair> = matches
            .iter()
            .map(|(x1, x2)| (self.intrinsics.normalize(x1), self.intrinsics.normalize(x2)))
            .collect();

        let (essential, consensus_inliers) =
            self.consensus(&normalized).ok_or(PoseError::Degenerate)?;
        debug!(
            "consensus kept {} of {} correspondences",
            consensus_inliers.len(),
            normalized.len()
        );

        let configurations = essential
            .extract_pose_configurations()
            .ok_or(PoseError::Degenerate)?;
        let (x1_set, x2_set) = split(&normalized, &consensus_inliers);
        let (best, _) = disambiguate_camera_pose(&configurations, &x1_set, &x2_set);
        trace!("pose configuration {best} selected by cheirality");

        let (pose, inliers) = self.refine(configurations[best], consensus_inliers, &normalized);
        debug!("refinement kept {} correspondences", inliers.len());

        let (x1_set, x2_set) = split(&normalized, &inliers);
        let in_front = cheirality_mask(&pose, &x1_set, &x2_set);
        let mut mask = vec![false; normalized.len()];
        for (&index, &front) in inliers.iter().zip(&in_front) {
            mask[index] = front;
        }

        let supported = mask.iter().filter(|&&inlier| inlier).count();
        if supported < required {
            return Err(PoseError::Cheirality {
                in_front: supported,
                required,
            });
        }

        Ok(PoseEstimate {
            pose,
            inliers: mask,
        })
    }

    fn consensus(&mut self, normalized: &[PointPair]) -> Option<(EssentialMatrix, Vec<usize>)> {
        let threshold = self.config.threshold;
        match self.config.method {
            ConsensusMethod::Ransac => {
                let mut ransac = Ransac::new(threshold, &mut self.rng)
                    .probability(self.config.probability)
                    .max_iterations(self.config.max_iterations);
                run_consensus(&mut ransac, normalized)
            }
            ConsensusMethod::Arrsac => {
                // This is an ARRSAC (Adaptive Real-Time Random Sample Consensus) package,
                // which could perform as well or better than RANSAC.
                // https://people.inf.ethz.ch/pomarc/pubs/RaguramECCV08.pdf
                let mut arrsac = Arrsac::new(threshold, &mut self.rng);
                run_consensus(&mut arrsac, normalized)
            }
        }
    }

    /// Alternates nonlinear refinement of the pose over its inliers with re-scoring every
    /// correspondence, while the inlier set keeps growing.
    fn refine(
        &self,
        pose: RelativePose,
        inliers: Vec<usize>,
        normalized: &[PointPair],
    ) -> (RelativePose, Vec<usize>) {
        let mut current = (pose, inliers);
        for _ in 0..REFINEMENT_ROUNDS {
            let support: Vec<PointPair> = current.1.iter().map(|&i| normalized[i]).collect();
            let refined = refine_pose(current.0, &support);
            let refined_inliers = inlier_indices(
                &EssentialMatrix::from_pose(&refined),
                normalized,
                self.config.threshold,
            );
            if refined_inliers.len() < current.1.len() {
                break;
            }

            let grew = refined_inliers.len() > current.1.len();
            current = (refined, refined_inliers);
            if !grew {
                break;
            }
        }
        current
    }
}

fn run_consensus<C>(
    consensus: &mut C,
    normalized: &[PointPair],
) -> Option<(EssentialMatrix, Vec<usize>)>
where
    C: Consensus<EightPoint, PointPair>,
{
    consensus
        .model_inliers(&EightPoint, normalized.iter().copied())
        .map(|(model, inliers)| (model, inliers.into_iter().collect()))
}

fn inlier_indices(
    model: &EssentialMatrix,
    normalized: &[PointPair],
    threshold: f64,
) -> Vec<usize> {
    normalized
        .iter()
        .enumerate()
        .filter(|(_, pair)| model.residual(pair) < threshold)
        .map(|(i, _)| i)
        .collect()
}

fn split(normalized: &[PointPair], indices: &[usize]) -> (Vec<Point2<f64>>, Vec<Point2<f64>>) {
    indices.iter().map(|&i| normalized[i]).unzip()
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Matrix3, Point3, Rotation3, Vector3};
    use rand::Rng;
    use rand_distr::{Distribution, Normal};

    fn intrinsics() -> CameraIntrinsics {
        CameraIntrinsics::new(500.0, 500.0, 320.0, 240.0).unwrap()
    }

    fn truth() -> RelativePose {
        RelativePose {
            rotation: *Rotation3::from_euler_angles(0.02, -0.06, 0.03).matrix(),
            translation: Vector3::new(-1.0, 0.15, 0.1).normalize(),
        }
    }

    /// Pixel correspondences of random points seen from the origin and from `pose`.
    fn correspondences(
        pose: &RelativePose,
        count: usize,
        noise: f64,
        seed: u64,
    ) -> Vec<(Point2<f64>, Point2<f64>)> {
        let k = intrinsics();
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let noise = Normal::new(0.0, noise.max(f64::MIN_POSITIVE)).unwrap();
        (0..count)
            .map(|_| {
                let point = Point3::new(
                    rng.gen_range(-2.0..2.0),
                    rng.gen_range(-1.5..1.5),
                    rng.gen_range(4.0..9.0),
                );
                let mut x1 = k.project(&point).unwrap();
                let mut x2 = k.project(&pose.transform(&point)).unwrap();
                x1.x += noise.sample(&mut rng);
                x1.y += noise.sample(&mut rng);
                x2.x += noise.sample(&mut rng);
                x2.y += noise.sample(&mut rng);
                (x1, x2)
            })
            .collect()
    }

    fn rotation_error(a: &Matrix3<f64>, b: &Matrix3<f64>) -> f64 {
        (((a.transpose() * b).trace() - 1.0) / 2.0).clamp(-1.0, 1.0).acos()
    }

    fn direction_error(a: &Vector3<f64>, b: &Vector3<f64>) -> f64 {
        (a.dot(b) / (a.norm() * b.norm())).clamp(-1.0, 1.0).acos()
    }

    #[test]
    fn recovers_pose_from_noiseless_correspondences() {
        let matches = correspondences(&truth(), 60, 0.0, 1);
        let estimate = PoseEstimator::new(intrinsics(), ConsensusConfig::default())
            .estimate(&matches)
            .unwrap();

        assert_eq!(estimate.inliers.len(), matches.len());
        assert_eq!(estimate.inlier_count(), matches.len());
        assert!(rotation_error(&estimate.pose.rotation, &truth().rotation) < 1e-6);
        assert!(direction_error(&estimate.pose.translation, &truth().translation) < 1e-6);
        assert!((estimate.pose.translation.norm() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn recovers_pose_despite_noise_and_outliers() {
        let mut matches = correspondences(&truth(), 120, 0.1, 2);
        // corrupt every sixth correspondence
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        for pair in matches.iter_mut().step_by(6) {
            pair.1 = Point2::new(rng.gen_range(0.0..640.0), rng.gen_range(0.0..480.0));
        }

        let estimate = PoseEstimator::new(intrinsics(), ConsensusConfig::default())
            .estimate(&matches)
            .unwrap();

        let rotation = rotation_error(&estimate.pose.rotation, &truth().rotation);
        let direction = direction_error(&estimate.pose.translation, &truth().translation);
        assert!(rotation < 0.2f64.to_radians(), "rotation error {rotation}");
        assert!(direction < 2f64.to_radians(), "direction error {direction}");
        // 100 clean correspondences, 0.1 px noise against a 0.5 px threshold
        let inliers = estimate.inlier_count();
        assert!((95..=103).contains(&inliers), "inliers {inliers}");
        let corrupted_kept = estimate.inliers.iter().step_by(6).filter(|&&inlier| inlier).count();
        assert!(corrupted_kept <= 3);
    }

    #[test]
    fn arrsac_recovers_pose_from_noiseless_correspondences() {
        let matches = correspondences(&truth(), 60, 0.0, 4);
        let config = ConsensusConfig {
            method: ConsensusMethod::Arrsac,
            ..Default::default()
        };
        let estimate = PoseEstimator::new(intrinsics(), config).estimate(&matches).unwrap();

        assert!(rotation_error(&estimate.pose.rotation, &truth().rotation) < 1e-3);
        assert!(direction_error(&estimate.pose.translation, &truth().translation) < 1e-3);
    }

    #[test]
    fn fewer_than_eight_correspondences_fail_softly() {
        let matches = correspondences(&truth(), 7, 0.0, 5);
        let mut estimator = PoseEstimator::new(intrinsics(), ConsensusConfig::default());
        let result = estimator.estimate(&matches);
        assert_eq!(
            result.unwrap_err(),
            PoseError::InsufficientCorrespondences {
                found: 7,
                required: 8
            }
        );
    }

    #[test]
    fn coincident_points_fail_softly() {
        let pair = (Point2::new(100.0, 100.0), Point2::new(110.0, 100.0));
        let matches = vec![pair; 20];
        let mut estimator = PoseEstimator::new(intrinsics(), ConsensusConfig::default());
        let result = estimator.estimate(&matches);
        assert_eq!(result.unwrap_err(), PoseError::Degenerate);
    }

    #[test]
    fn failed_estimate_does_not_advance_sampling() {
        let degenerate = vec![(Point2::new(100.0, 100.0), Point2::new(110.0, 100.0)); 20];
        let matches = correspondences(&truth(), 80, 0.3, 6);

        let mut clean = PoseEstimator::new(intrinsics(), ConsensusConfig::default());
        let mut disturbed = PoseEstimator::new(intrinsics(), ConsensusConfig::default());
        assert_eq!(disturbed.estimate(&degenerate).unwrap_err(), PoseError::Degenerate);

        let expected = clean.estimate(&matches).unwrap();
        let actual = disturbed.estimate(&matches).unwrap();
        assert_eq!(expected.pose, actual.pose);
        assert_eq!(expected.inliers, actual.inliers);
    }
}
