//! Frame datagram shared with the existing visualizer.
//!
//! Layout, all little-endian:
//! `frame_id: i32 | kp_rows: i32 | kp_cols: i32 | desc_rows: i32 | desc_cols: i32 |
//!  keypoints: kp_rows * kp_cols i32 | descriptors: desc_rows * desc_cols f32`

use nalgebra::{DMatrix, Point2};

use crate::algorithms::matching::normalize_rows;
use crate::slam::frame::{ObservationError, Observations};

pub const HEADER_LEN: usize = 20;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WireError {
    TruncatedHeader { len: usize },
    NegativeDimension { field: &'static str, value: i32 },
    LengthMismatch { expected: usize, found: usize },
    /// Element counts do not match the declared shape.
    Shape { rows: usize, cols: usize, len: usize },
    KeypointColumns(usize),
    Overflow,
}

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WireError::TruncatedHeader { len } => {
                write!(f, "datagram of {len} bytes is shorter than the {HEADER_LEN} byte header")
            }
            WireError::NegativeDimension { field, value } => {
                write!(f, "{field} is negative ({value})")
            }
            WireError::LengthMismatch { expected, found } => {
                write!(f, "header announces {expected} bytes, datagram has {found}")
            }
            WireError::Shape { rows, cols, len } => {
                write!(f, "{len} values do not fill a {rows}x{cols} block")
            }
            WireError::KeypointColumns(cols) => write!(f, "keypoints need 2 columns, got {cols}"),
            WireError::Overflow => write!(f, "dimensions overflow the datagram size"),
        }
    }
}

impl std::error::Error for WireError {}

/// One frame as carried on the wire. Blocks are stored row-major.
#[derive(Clone, Debug, PartialEq)]
pub struct FramePacket {
    frame_id: i32,
    keypoint_shape: (usize, usize),
    keypoints: Vec<i32>,
    descriptor_shape: (usize, usize),
    descriptors: Vec<f32>,
}

impl FramePacket {
    pub fn new(
        frame_id: i32,
        keypoint_shape: (usize, usize),
        keypoints: Vec<i32>,
        descriptor_shape: (usize, usize),
        descriptors: Vec<f32>,
    ) -> Result<Self, WireError> {
        check_shape(keypoint_shape, keypoints.len())?;
        check_shape(descriptor_shape, descriptors.len())?;
        Ok(Self {
            frame_id,
            keypoint_shape,
            keypoints,
            descriptor_shape,
            descriptors,
        })
    }

    /// Keypoints are rounded to whole pixels, as the format stores integers.
    pub fn from_observations(frame_id: i32, observations: &Observations) -> Self {
        let keypoints = observations
            .points
            .iter()
            .flat_map(|p| [p.x.round() as i32, p.y.round() as i32])
            .collect();
        let descriptors = &observations.descriptors;
        let shape = (descriptors.nrows(), descriptors.ncols());
        Self {
            frame_id,
            keypoint_shape: (observations.len(), 2),
            keypoints,
            descriptor_shape: shape,
            descriptors: descriptors.transpose().as_slice().to_vec(),
        }
    }

    pub fn frame_id(&self) -> i32 {
        self.frame_id
    }

    pub fn keypoint_shape(&self) -> (usize, usize) {
        self.keypoint_shape
    }

    pub fn keypoints(&self) -> &[i32] {
        &self.keypoints
    }

    pub fn descriptor_shape(&self) -> (usize, usize) {
        self.descriptor_shape
    }

    pub fn descriptors(&self) -> &[f32] {
        &self.descriptors
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buffer =
            Vec::with_capacity(HEADER_LEN + 4 * (self.keypoints.len() + self.descriptors.len()));
        let header = [
            self.frame_id,
            self.keypoint_shape.0 as i32,
            self.keypoint_shape.1 as i32,
            self.descriptor_shape.0 as i32,
            self.descriptor_shape.1 as i32,
        ];
        for value in header.iter().chain(&self.keypoints) {
            buffer.extend_from_slice(&value.to_le_bytes());
        }
        for value in &self.descriptors {
            buffer.extend_from_slice(&value.to_le_bytes());
        }
        buffer
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() < HEADER_LEN {
            return Err(WireError::TruncatedHeader { len: bytes.len() });
        }
        let header: Vec<i32> = bytes[..HEADER_LEN]
            .chunks_exact(4)
            .map(|chunk| i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();

        let dimension = |field: &'static str, value: i32| {
            usize::try_from(value).map_err(|_| WireError::NegativeDimension { field, value })
        };
        let keypoint_shape = (
            dimension("keypoint rows", header[1])?,
            dimension("keypoint cols", header[2])?,
        );
        let descriptor_shape = (
            dimension("descriptor rows", header[3])?,
            dimension("descriptor cols", header[4])?,
        );

        let keypoint_count = keypoint_shape
            .0
            .checked_mul(keypoint_shape.1)
            .ok_or(WireError::Overflow)?;
        let descriptor_count = descriptor_shape
            .0
            .checked_mul(descriptor_shape.1)
            .ok_or(WireError::Overflow)?;
        let expected = keypoint_count
            .checked_add(descriptor_count)
            .and_then(|count| count.checked_mul(4))
            .and_then(|len| len.checked_add(HEADER_LEN))
            .ok_or(WireError::Overflow)?;
        if bytes.len() != expected {
            return Err(WireError::LengthMismatch {
                expected,
                found: bytes.len(),
            });
        }

        let (keypoint_bytes, descriptor_bytes) = bytes[HEADER_LEN..].split_at(4 * keypoint_count);
        let keypoints = keypoint_bytes
            .chunks_exact(4)
            .map(|chunk| i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        let descriptors = descriptor_bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();

        Ok(Self {
            frame_id: header[0],
            keypoint_shape,
            keypoints,
            descriptor_shape,
            descriptors,
        })
    }

    /// Converts to tracker input. Descriptor rows are scaled to unit length.
    pub fn into_observations(self) -> Result<Observations, PacketError> {
        let (rows, cols) = self.keypoint_shape;
        if cols != 2 {
            return Err(WireError::KeypointColumns(cols).into());
        }
        let points = self
            .keypoints
            .chunks_exact(2)
            .map(|xy| Point2::new(xy[0] as f64, xy[1] as f64))
            .collect::<Vec<_>>();
        debug_assert_eq!(points.len(), rows);

        let (desc_rows, desc_cols) = self.descriptor_shape;
        let mut descriptors = DMatrix::from_row_slice(desc_rows, desc_cols, &self.descriptors);
        normalize_rows(&mut descriptors);

        Ok(Observations::new(points, descriptors)?)
    }
}

/// Failure to turn a datagram into observations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PacketError {
    Wire(WireError),
    Observation(ObservationError),
}

impl std::fmt::Display for PacketError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PacketError::Wire(err) => write!(f, "{err}"),
            PacketError::Observation(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for PacketError {}

impl From<WireError> for PacketError {
    fn from(err: WireError) -> Self {
        PacketError::Wire(err)
    }
}

impl From<ObservationError> for PacketError {
    fn from(err: ObservationError) -> Self {
        PacketError::Observation(err)
    }
}

fn check_shape((rows, cols): (usize, usize), len: usize) -> Result<(), WireError> {
    let fits_header = i32::try_from(rows).is_ok() && i32::try_from(cols).is_ok();
    if !fits_header {
        return Err(WireError::Overflow);
    }
    if rows.checked_mul(cols) != Some(len) {
        return Err(WireError::Shape { rows, cols, len });
    }
    Ok(())
}
