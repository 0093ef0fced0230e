//! Monocular visual tracking frontend.
//!
//! Frames of keypoints and unit-length descriptors are matched against the previous frame,
//! the relative camera motion is recovered from an essential matrix, matched keypoints are
//! triangulated and every keypoint is assigned a persistent landmark id.
//!
//! ```no_run
//! use slamr::{sensors::synthetic::SyntheticScene, System, SessionConfig};
//!
//! let config = SessionConfig::default();
//! let mut scene = SyntheticScene::new(config.intrinsics, config.scene.clone()).unwrap();
//! let mut system = System::new(config.intrinsics, config.tracker);
//! let summary = system.run(&mut scene, None).unwrap();
//! println!("{summary:?}");
//! ```

pub mod algorithms;
pub mod config;
pub mod sensors;
pub mod slam;

pub use algorithms::camera::CameraIntrinsics;
pub use config::{SessionConfig, TrackerConfig};
pub use sensors::FrameSource;
pub use slam::{
    frame::Observations,
    landmarks::LandmarkId,
    system::{SessionSummary, System},
    tracker::{MapSnapshot, Tracker, TrackingUpdate, UpdateOutcome},
};
