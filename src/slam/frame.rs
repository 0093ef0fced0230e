use nalgebra::{DMatrix, Matrix4, Point2};

use super::landmarks::LandmarkId;

/// Keypoints and descriptors extracted from one image.
///
/// `descriptors` is `N x D` with one unit-normalized row per keypoint in `points`.
#[derive(Clone, Debug, PartialEq)]
pub struct Observations {
    pub points: Vec<Point2<f64>>,
    pub descriptors: DMatrix<f32>,
}

/// Malformed input from a frame source. Fatal for the call that received it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ObservationError {
    MismatchedRows { points: usize, descriptors: usize },
    EmptyDescriptor { rows: usize },
    DescriptorDimension { expected: usize, found: usize },
    NonFinitePoint { index: usize },
    NonFiniteDescriptor { row: usize },
}

impl std::fmt::Display for ObservationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObservationError::MismatchedRows { points, descriptors } => write!(
                f,
                "{points} keypoints but {descriptors} descriptor rows"
            ),
            ObservationError::EmptyDescriptor { rows } => {
                write!(f, "{rows} descriptor rows with zero columns")
            }
            ObservationError::DescriptorDimension { expected, found } => write!(
                f,
                "descriptor dimension changed from {expected} to {found}"
            ),
            ObservationError::NonFinitePoint { index } => {
                write!(f, "keypoint {index} is not finite")
            }
            ObservationError::NonFiniteDescriptor { row } => {
                write!(f, "descriptor row {row} is not finite")
            }
        }
    }
}

impl std::error::Error for ObservationError {}

impl Observations {
    pub fn new(
        points: Vec<Point2<f64>>,
        descriptors: DMatrix<f32>,
    ) -> Result<Self, ObservationError> {
        let observations = Self { points, descriptors };
        observations.validate()?;
        Ok(observations)
    }

    /// Builds from plain rows, e.g. the output of an external detector.
    pub fn from_rows(
        points: &[[f64; 2]],
        descriptors: &[Vec<f32>],
    ) -> Result<Self, ObservationError> {
        let dim = descriptors.first().map_or(0, |row| row.len());
        if let Some(row) = descriptors.iter().find(|row| row.len() != dim) {
            return Err(ObservationError::DescriptorDimension {
                expected: dim,
                found: row.len(),
            });
        }

        let flat: Vec<f32> = descriptors.iter().flatten().copied().collect();
        Self::new(
            points.iter().map(|&[x, y]| Point2::new(x, y)).collect(),
            DMatrix::from_row_slice(descriptors.len(), dim, &flat),
        )
    }

    pub fn validate(&self) -> Result<(), ObservationError> {
        if self.points.len() != self.descriptors.nrows() {
            return Err(ObservationError::MismatchedRows {
                points: self.points.len(),
                descriptors: self.descriptors.nrows(),
            });
        }
        if self.descriptors.nrows() > 0 && self.descriptors.ncols() == 0 {
            return Err(ObservationError::EmptyDescriptor {
                rows: self.descriptors.nrows(),
            });
        }
        if let Some(index) = self
            .points
            .iter()
            .position(|p| !(p.x.is_finite() && p.y.is_finite()))
        {
            return Err(ObservationError::NonFinitePoint { index });
        }
        if let Some(row) = self
            .descriptors
            .row_iter()
            .position(|row| row.iter().any(|v| !v.is_finite()))
        {
            return Err(ObservationError::NonFiniteDescriptor { row });
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn descriptor_dim(&self) -> usize {
        self.descriptors.ncols()
    }

    pub fn descriptor(&self, index: usize) -> Vec<f32> {
        self.descriptors.row(index).iter().copied().collect()
    }
}

/// The last successfully tracked frame, kept by the tracker to match the next one against.
#[derive(Clone, Debug)]
pub(crate) struct Frame {
    pub observations: Observations,
    /// One id per keypoint, aligned with `observations.points`.
    pub landmark_ids: Vec<LandmarkId>,
    pub pose: Matrix4<f64>,
}
