use log::{debug, info, warn};
use nalgebra::Point3;
use serde::Serialize;

use crate::{
    algorithms::{
        camera::CameraIntrinsics,
        matching::{Correspondence, DescriptorMatcher, MutualNearestNeighbor},
        pose::{PoseError, PoseEstimator},
        triangulation::Triangulator,
    },
    config::TrackerConfig,
    slam::{
        frame::{Frame, ObservationError, Observations},
        landmarks::{LandmarkId, LandmarkStore, MapError},
        trajectory::Trajectory,
    },
};

/// Tracking states
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TrackingState {
    /// No frame cached yet; the next frame initializes the map.
    #[default]
    Uninitialized,
    /// A previous frame is cached and every new frame is matched against it.
    Tracking,
}

/// Why a frame was dropped. State is left exactly as it was before the call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DropReason {
    InsufficientMatches { found: usize, required: usize },
    PoseEstimation(PoseError),
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DropReason::InsufficientMatches { found, required } => {
                write!(f, "{found} mutual matches, need {required}")
            }
            DropReason::PoseEstimation(err) => write!(f, "pose estimation failed: {err}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// First frame of the session: every keypoint received a new id.
    Initialized,
    Tracked { correspondences: usize, inliers: usize },
    Dropped(DropReason),
}

/// Result of one `Tracker::update` call.
///
/// On success every keypoint of the frame is covered exactly once:
/// `matched_ids.len() + new_ids.len() == points.len()`. The initializing frame reports its
/// ids through `new_ids`. A dropped frame reports nothing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackingUpdate {
    pub outcome: UpdateOutcome,
    /// Ids carried over from the previous frame, in correspondence order.
    pub matched_ids: Vec<LandmarkId>,
    /// Ids allocated for keypoints without a surviving correspondence.
    pub new_ids: Vec<LandmarkId>,
}

impl TrackingUpdate {
    fn dropped(reason: DropReason) -> Self {
        Self {
            outcome: UpdateOutcome::Dropped(reason),
            matched_ids: Vec::new(),
            new_ids: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self.outcome, UpdateOutcome::Dropped(_))
    }
}

#[derive(Debug)]
pub enum TrackingError {
    Observation(ObservationError),
    Map(MapError),
}

impl std::fmt::Display for TrackingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackingError::Observation(err) => write!(f, "malformed observations: {err}"),
            TrackingError::Map(err) => write!(f, "map error: {err}"),
        }
    }
}

impl std::error::Error for TrackingError {}

impl From<ObservationError> for TrackingError {
    fn from(err: ObservationError) -> Self {
        TrackingError::Observation(err)
    }
}

impl From<MapError> for TrackingError {
    fn from(err: MapError) -> Self {
        TrackingError::Map(err)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LocalizedPoint {
    pub id: LandmarkId,
    pub position: [f64; 3],
}

/// Everything an external visualizer needs, in plain serializable form.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MapSnapshot {
    pub trajectory: Vec<[[f64; 4]; 4]>,
    pub points: Vec<LocalizedPoint>,
}

/// Frame-to-frame monocular tracker.
///
/// Owns the previous frame, the trajectory and the landmark store; all cross references
/// are landmark ids. Not reentrant: calls to `update` must be serialized by the caller.
pub struct Tracker<M = MutualNearestNeighbor> {
    config: TrackerConfig,
    intrinsics: CameraIntrinsics,
    matcher: M,
    pose_estimator: PoseEstimator,
    triangulator: Triangulator,
    landmarks: LandmarkStore,
    trajectory: Trajectory,
    /// The previous frame
    last_frame: Option<Frame>,
    /// Descriptor width fixed by the first non-empty frame of the session
    descriptor_dim: Option<usize>,
    /// Number of frames handed to `update`, dropped ones included
    frames_seen: usize,
}

impl Tracker<MutualNearestNeighbor> {
    pub fn new(intrinsics: CameraIntrinsics, config: TrackerConfig) -> Self {
        let matcher = MutualNearestNeighbor::new(config.match_threshold);
        Self::with_matcher(intrinsics, config, matcher)
    }
}

impl<M> Tracker<M>
where
    M: DescriptorMatcher,
{
    pub fn with_matcher(intrinsics: CameraIntrinsics, config: TrackerConfig, matcher: M) -> Self {
        Self {
            pose_estimator: PoseEstimator::new(intrinsics, config.consensus.clone()),
            triangulator: Triangulator::new(intrinsics),
            landmarks: LandmarkStore::new(config.position_update),
            trajectory: Trajectory::default(),
            last_frame: None,
            descriptor_dim: None,
            frames_seen: 0,
            config,
            intrinsics,
            matcher,
        }
    }

    pub fn state(&self) -> TrackingState {
        match self.last_frame {
            Some(_) => TrackingState::Tracking,
            None => TrackingState::Uninitialized,
        }
    }

    /// Runs one full cycle: matching, pose, triangulation and map update.
    ///
    /// Malformed observations are an error and leave all state untouched. Frames that
    /// cannot be tracked are reported as `UpdateOutcome::Dropped`, also without touching
    /// state, so the next frame is matched against the same cached frame.
    pub fn update(&mut self, observations: &Observations) -> Result<TrackingUpdate, TrackingError> {
        self.check(observations)?;

        let frame_index = self.frames_seen;
        self.frames_seen += 1;

        let update = match self.last_frame {
            None => self.initialize(observations, frame_index)?,
            Some(_) => self.track(observations, frame_index)?,
        };

        match &update.outcome {
            UpdateOutcome::Dropped(reason) => warn!("frame {frame_index} dropped: {reason}"),
            _ => info!(
                "frame {frame_index}: matched {}, new {}",
                update.matched_ids.len(),
                update.new_ids.len()
            ),
        }
        Ok(update)
    }

    fn check(&self, observations: &Observations) -> Result<(), ObservationError> {
        observations.validate()?;
        if let Some(expected) = self.descriptor_dim {
            if !observations.is_empty() && observations.descriptor_dim() != expected {
                return Err(ObservationError::DescriptorDimension {
                    expected,
                    found: observations.descriptor_dim(),
                });
            }
        }
        Ok(())
    }

    fn initialize(
        &mut self,
        observations: &Observations,
        frame_index: usize,
    ) -> Result<TrackingUpdate, TrackingError> {
        let ids = self.landmarks.allocate_ids(observations.len());
        for (index, &id) in ids.iter().enumerate() {
            self.landmarks.update_descriptor(id, observations.descriptor(index))?;
            self.landmarks.record_observation(id, frame_index)?;
        }

        self.cache(observations, ids.clone(), self.trajectory.latest());

        Ok(TrackingUpdate {
            outcome: UpdateOutcome::Initialized,
            matched_ids: Vec::new(),
            new_ids: ids,
        })
    }

    fn track(
        &mut self,
        observations: &Observations,
        frame_index: usize,
    ) -> Result<TrackingUpdate, TrackingError> {
        let last_frame = match &self.last_frame {
            Some(frame) => frame,
            None => return self.initialize(observations, frame_index),
        };

        // Find the mappings from the last frame onto the current frame.
        let correspondences = self
            .matcher
            .match_descriptors(&last_frame.observations.descriptors, &observations.descriptors);
        debug!("{} mutual matches", correspondences.len());

        let required = self.config.min_matches;
        if correspondences.len() < required {
            return Ok(TrackingUpdate::dropped(DropReason::InsufficientMatches {
                found: correspondences.len(),
                required,
            }));
        }

        let pixel_pairs: Vec<_> = correspondences
            .iter()
            .map(|&(i, j)| (last_frame.observations.points[i], observations.points[j]))
            .collect();
        let estimate = match self.pose_estimator.estimate(&pixel_pairs) {
            Ok(estimate) => estimate,
            Err(err) => return Ok(TrackingUpdate::dropped(DropReason::PoseEstimation(err))),
        };

        // remove the outliers from the matched data set
        let inliers: Vec<Correspondence> = correspondences
            .iter()
            .zip(&estimate.inliers)
            .filter_map(|(&pair, &inlier)| inlier.then_some(pair))
            .collect();
        let matched_ids: Vec<LandmarkId> = inliers
            .iter()
            .map(|&(i, _)| last_frame.landmark_ids[i])
            .collect();
        let (previous_pixels, current_pixels): (Vec<_>, Vec<_>) = inliers
            .iter()
            .map(|&(i, j)| (last_frame.observations.points[i], observations.points[j]))
            .unzip();
        let previous_pose = last_frame.pose;

        // From here on the frame is accepted and state is mutated.
        let current_pose = self.trajectory.compose(&estimate.pose.to_matrix());

        let mut assigned: Vec<Option<LandmarkId>> = vec![None; observations.len()];
        for (&(_, j), &id) in inliers.iter().zip(&matched_ids) {
            assigned[j] = Some(id);
        }
        let unmatched: Vec<usize> = (0..observations.len())
            .filter(|&j| assigned[j].is_none())
            .collect();
        let new_ids = self.landmarks.allocate_ids(unmatched.len());
        for (&j, &id) in unmatched.iter().zip(&new_ids) {
            assigned[j] = Some(id);
        }
        let landmark_ids: Vec<LandmarkId> = assigned.into_iter().flatten().collect();

        for (index, &id) in landmark_ids.iter().enumerate() {
            self.landmarks.update_descriptor(id, observations.descriptor(index))?;
            self.landmarks.record_observation(id, frame_index)?;
        }

        let points = self
            .triangulator
            .triangulate(&previous_pose, &current_pose, &previous_pixels, &current_pixels);
        let mut skipped = 0;
        for (&id, point) in matched_ids.iter().zip(points) {
            if is_finite(&point) {
                self.landmarks.update_position(id, point)?;
            } else {
                skipped += 1;
            }
        }
        if skipped > 0 {
            debug!("{skipped} triangulated points were not finite and left unstored");
        }

        self.cache(observations, landmark_ids, current_pose);

        Ok(TrackingUpdate {
            outcome: UpdateOutcome::Tracked {
                correspondences: correspondences.len(),
                inliers: matched_ids.len(),
            },
            matched_ids,
            new_ids,
        })
    }

    fn cache(
        &mut self,
        observations: &Observations,
        landmark_ids: Vec<LandmarkId>,
        pose: nalgebra::Matrix4<f64>,
    ) {
        if !observations.is_empty() {
            self.descriptor_dim.get_or_insert(observations.descriptor_dim());
        }
        self.last_frame = Some(Frame {
            observations: observations.clone(),
            landmark_ids,
            pose,
        });
    }

    pub fn get_localized_points(&self) -> Vec<(LandmarkId, Point3<f64>)> {
        self.landmarks.get_localized_points()
    }

    pub fn landmarks(&self) -> &LandmarkStore {
        &self.landmarks
    }

    pub fn trajectory(&self) -> &Trajectory {
        &self.trajectory
    }

    pub fn intrinsics(&self) -> &CameraIntrinsics {
        &self.intrinsics
    }

    /// Ids of the cached frame's keypoints, in keypoint order.
    pub fn last_frame_ids(&self) -> Option<&[LandmarkId]> {
        self.last_frame.as_ref().map(|frame| frame.landmark_ids.as_slice())
    }

    pub fn snapshot(&self) -> MapSnapshot {
        MapSnapshot {
            trajectory: self.trajectory.to_rows(),
            points: self
                .get_localized_points()
                .into_iter()
                .map(|(id, p)| LocalizedPoint {
                    id,
                    position: [p.x, p.y, p.z],
                })
                .collect(),
        }
    }
}

fn is_finite(point: &Point3<f64>) -> bool {
    point.coords.iter().all(|v| v.is_finite())
}
