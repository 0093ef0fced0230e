use nalgebra::Point3;
use serde::{Deserialize, Serialize};

/// Stable identity of a landmark. Allocated from a monotonic counter and never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LandmarkId(pub u64);

impl std::fmt::Display for LandmarkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How a freshly triangulated point is folded into a landmark's stored position.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionUpdate {
    /// `(old + new) / 2`: older observations decay geometrically.
    #[default]
    Halving,
    /// True incremental mean over every observation.
    RunningMean,
}

#[derive(Clone, Debug, Default)]
pub struct Landmark {
    descriptor: Vec<f32>,
    position: Option<Point3<f64>>,
    position_samples: u32,
    observations: u32,
    last_seen: Option<usize>,
}

impl Landmark {
    /// The most recently observed descriptor.
    pub fn descriptor(&self) -> &[f32] {
        &self.descriptor
    }

    pub fn position(&self) -> Option<Point3<f64>> {
        self.position
    }

    /// Number of frames this landmark has been seen in.
    pub fn observations(&self) -> u32 {
        self.observations
    }

    /// Index of the last frame that observed this landmark.
    pub fn last_seen(&self) -> Option<usize> {
        self.last_seen
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MapError {
    LandmarkNotFound(LandmarkId),
}

impl std::fmt::Display for MapError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MapError::LandmarkNotFound(id) => write!(f, "landmark not found: {id}"),
        }
    }
}

impl std::error::Error for MapError {}

/// Arena of landmarks indexed by id.
///
/// Ids are dense: the id of a landmark is its slot in the arena, so allocation is a push
/// and lookups never search.
#[derive(Clone, Debug, Default)]
pub struct LandmarkStore {
    landmarks: Vec<Landmark>,
    policy: PositionUpdate,
}

impl LandmarkStore {
    pub fn new(policy: PositionUpdate) -> Self {
        Self {
            landmarks: Vec::new(),
            policy,
        }
    }

    /// Returns `count` fresh ids, strictly greater than every id handed out before.
    pub fn allocate_ids(&mut self, count: usize) -> Vec<LandmarkId> {
        let first = self.landmarks.len();
        self.landmarks
            .resize_with(first + count, Landmark::default);
        (first..first + count).map(|id| LandmarkId(id as u64)).collect()
    }

    /// Last writer wins, no history is kept.
    pub fn update_descriptor(
        &mut self,
        id: LandmarkId,
        descriptor: Vec<f32>,
    ) -> Result<(), MapError> {
        self.get_mut(id)?.descriptor = descriptor;
        Ok(())
    }

    pub fn update_position(&mut self, id: LandmarkId, point: Point3<f64>) -> Result<(), MapError> {
        let policy = self.policy;
        let landmark = self.get_mut(id)?;

        landmark.position = Some(match (landmark.position, policy) {
            (None, _) => point,
            (Some(old), PositionUpdate::Halving) => Point3::from((old.coords + point.coords) / 2.0),
            (Some(old), PositionUpdate::RunningMean) => {
                let n = landmark.position_samples as f64;
                Point3::from((old.coords * n + point.coords) / (n + 1.0))
            }
        });
        landmark.position_samples += 1;
        Ok(())
    }

    pub fn record_observation(
        &mut self,
        id: LandmarkId,
        frame_index: usize,
    ) -> Result<(), MapError> {
        let landmark = self.get_mut(id)?;
        landmark.observations += 1;
        landmark.last_seen = Some(frame_index);
        Ok(())
    }

    /// Snapshot of every landmark with a position estimate, in id order.
    pub fn get_localized_points(&self) -> Vec<(LandmarkId, Point3<f64>)> {
        self.landmarks
            .iter()
            .enumerate()
            .filter_map(|(id, landmark)| landmark.position.map(|p| (LandmarkId(id as u64), p)))
            .collect()
    }

    pub fn get(&self, id: LandmarkId) -> Option<&Landmark> {
        self.landmarks.get(id.0 as usize)
    }

    fn get_mut(&mut self, id: LandmarkId) -> Result<&mut Landmark, MapError> {
        self.landmarks
            .get_mut(id.0 as usize)
            .ok_or(MapError::LandmarkNotFound(id))
    }

    /// Number of ids allocated so far.
    pub fn len(&self) -> usize {
        self.landmarks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.landmarks.is_empty()
    }
}
