use std::path::{Path, PathBuf};

use log::debug;
use nalgebra::{DMatrix, Point2};
use serde::{Deserialize, Serialize};

use super::{FrameSource, SourceError};
use crate::slam::frame::Observations;

/// Layout and quantization of the on-disk descriptor dumps.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    pub descriptor_dim: usize,
    pub zero_point: f32,
    pub scale: f32,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            descriptor_dim: 96,
            zero_point: 142.0,
            scale: 0.146175,
        }
    }
}

/// Replays `keypoints_{i}.bin` / `descriptors_{i}.bin` pairs from a directory,
/// starting at `i = 0` and stopping at the first missing pair.
pub struct DirectoryReader {
    root: PathBuf,
    config: DirectoryConfig,
    frame_index: usize,
}

impl DirectoryReader {
    pub fn new(root: impl Into<PathBuf>, config: DirectoryConfig) -> Result<Self, SourceError> {
        let root = root.into();
        if !root.is_dir() {
            return Err(SourceError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("data folder does not exist: {}", root.display()),
            )));
        }
        if config.descriptor_dim == 0 {
            return Err(SourceError::Malformed("descriptor_dim must be positive".to_string()));
        }
        Ok(Self {
            root,
            config,
            frame_index: 0,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Index of the next frame to be read.
    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    fn read_frame(
        &self,
        keypoints_path: &Path,
        descriptors_path: &Path,
    ) -> Result<Observations, SourceError> {
        let keypoint_bytes = std::fs::read(keypoints_path)?;
        if keypoint_bytes.len() % 8 != 0 {
            return Err(SourceError::Malformed(format!(
                "{}: {} bytes is not a whole number of int32 (x, y) pairs",
                keypoints_path.display(),
                keypoint_bytes.len()
            )));
        }
        let coordinates: Vec<i32> = keypoint_bytes
            .chunks_exact(4)
            .map(|chunk| i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        // 2 x N: every x first, then every y
        let (xs, ys) = coordinates.split_at(coordinates.len() / 2);
        let points: Vec<Point2<f64>> = xs
            .iter()
            .zip(ys)
            .map(|(&x, &y)| Point2::new(x as f64, y as f64))
            .collect();

        let descriptor_bytes = std::fs::read(descriptors_path)?;
        let dim = self.config.descriptor_dim;
        if descriptor_bytes.len() != points.len() * dim {
            return Err(SourceError::Malformed(format!(
                "{}: expected {} x {dim} bytes, found {}",
                descriptors_path.display(),
                points.len(),
                descriptor_bytes.len()
            )));
        }
        let mut descriptors = DMatrix::from_row_iterator(
            points.len(),
            dim,
            descriptor_bytes
                .iter()
                .map(|&q| (q as f32 - self.config.zero_point) * self.config.scale),
        );
        shift_and_normalize_rows(&mut descriptors);

        Ok(Observations::new(points, descriptors)?)
    }
}

impl FrameSource for DirectoryReader {
    fn next_frame(&mut self) -> Result<Option<Observations>, SourceError> {
        let keypoints_path = self.root.join(format!("keypoints_{}.bin", self.frame_index));
        let descriptors_path = self.root.join(format!("descriptors_{}.bin", self.frame_index));
        if !keypoints_path.is_file() || !descriptors_path.is_file() {
            debug!("no frame {} in {}", self.frame_index, self.root.display());
            return Ok(None);
        }

        let observations = self.read_frame(&keypoints_path, &descriptors_path)?;
        self.frame_index += 1;
        Ok(Some(observations))
    }
}

/// Shifts every row so its minimum is zero, then scales it to unit L2 norm.
pub fn shift_and_normalize_rows(descriptors: &mut DMatrix<f32>) {
    for mut row in descriptors.row_iter_mut() {
        let min = row.min();
        row.add_scalar_mut(-min);
        let norm = row.norm().max(1e-15);
        row /= norm;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_are_shifted_then_normalized() {
        let mut descriptors = DMatrix::from_row_slice(2, 3, &[1.0, 4.0, 5.0, 2.0, 2.0, 2.0]);
        shift_and_normalize_rows(&mut descriptors);
        // [0, 3, 4] / 5
        assert!((descriptors[(0, 1)] - 0.6).abs() < 1e-6);
        assert!((descriptors[(0, 2)] - 0.8).abs() < 1e-6);
        assert_eq!(descriptors[(0, 0)], 0.0);
        // constant rows collapse to zero instead of dividing by zero
        assert!(descriptors.row(1).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn missing_folders_are_errors() {
        let result = DirectoryReader::new("/nonexistent/slamr/frames", DirectoryConfig::default());
        assert!(matches!(result, Err(SourceError::Io(_))));
    }
}
