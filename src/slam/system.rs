use log::{debug, info, warn};
use serde::Serialize;

use crate::{
    algorithms::camera::CameraIntrinsics,
    config::TrackerConfig,
    sensors::{udp::UdpBroadcaster, wire::FramePacket, FrameSource, SourceError},
    slam::{
        frame::Observations,
        tracker::{MapSnapshot, Tracker, TrackingError, TrackingUpdate},
    },
};

#[derive(Debug)]
pub enum SystemError {
    Source(SourceError),
    Tracking(TrackingError),
}

impl std::fmt::Display for SystemError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SystemError::Source(err) => write!(f, "{err}"),
            SystemError::Tracking(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for SystemError {}

impl From<SourceError> for SystemError {
    fn from(err: SourceError) -> Self {
        SystemError::Source(err)
    }
}

impl From<TrackingError> for SystemError {
    fn from(err: TrackingError) -> Self {
        SystemError::Tracking(err)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub frames_processed: usize,
    pub frames_dropped: usize,
    pub landmarks: usize,
    pub trajectory_len: usize,
}

/// Binds a frame source to a tracker for the lifetime of a session.
pub struct System {
    /// Receives frames and computes the associated camera pose.
    pub tracker: Tracker,
    broadcaster: Option<UdpBroadcaster>,
    next_frame_id: i32,
}

impl System {
    pub fn new(intrinsics: CameraIntrinsics, config: TrackerConfig) -> Self {
        Self {
            tracker: Tracker::new(intrinsics, config),
            broadcaster: None,
            next_frame_id: 0,
        }
    }

    /// Re-broadcast every successfully tracked frame.
    pub fn with_broadcaster(mut self, broadcaster: UdpBroadcaster) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    pub fn track_monocular(
        &mut self,
        observations: &Observations,
    ) -> Result<TrackingUpdate, TrackingError> {
        let frame_id = self.next_frame_id;
        self.next_frame_id = self.next_frame_id.wrapping_add(1);

        let update = self.tracker.update(observations)?;
        if update.is_success() {
            if let Some(broadcaster) = &self.broadcaster {
                let packet = FramePacket::from_observations(frame_id, observations);
                if let Err(err) = broadcaster.send(&packet) {
                    warn!("failed to broadcast frame {frame_id}: {err}");
                }
            }
        }
        Ok(update)
    }

    /// Pulls frames until the source is exhausted or `max_frames` have been handled.
    pub fn run<S>(
        &mut self,
        source: &mut S,
        max_frames: Option<usize>,
    ) -> Result<SessionSummary, SystemError>
    where
        S: FrameSource + ?Sized,
    {
        let mut summary = SessionSummary::default();
        while max_frames
            .map_or(true, |max| summary.frames_processed + summary.frames_dropped < max)
        {
            let observations = match source.next_frame()? {
                Some(observations) => observations,
                None => {
                    debug!("frame source exhausted");
                    break;
                }
            };

            if self.track_monocular(&observations)?.is_success() {
                summary.frames_processed += 1;
            } else {
                summary.frames_dropped += 1;
            }
        }

        summary.landmarks = self.tracker.landmarks().len();
        summary.trajectory_len = self.tracker.trajectory().len();
        info!(
            "session finished: {} frames tracked, {} dropped, {} landmarks",
            summary.frames_processed, summary.frames_dropped, summary.landmarks
        );
        Ok(summary)
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    /// Ends the session, handing back the final map.
    pub fn shutdown(self) -> MapSnapshot {
        self.tracker.snapshot()
    }
}
