use std::path::PathBuf;
use std::time::Duration;

use nalgebra::Point2;
use slamr::{
    config::TrackerConfig,
    sensors::{
        directory::{DirectoryConfig, DirectoryReader},
        synthetic::{SceneConfig, SyntheticScene},
        udp::{UdpBroadcaster, UdpReceiver},
        wire::FramePacket,
        FrameSource, SourceError,
    },
    CameraIntrinsics, Observations, System,
};

struct TempDir(PathBuf);

impl TempDir {
    fn new(name: &str) -> Self {
        let path = std::env::temp_dir().join(format!("slamr-{name}-{}", std::process::id()));
        std::fs::create_dir_all(&path).unwrap();
        Self(path)
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        std::fs::remove_dir_all(&self.0).ok();
    }
}

fn write_frame(dir: &TempDir, index: usize, xs: &[i32], ys: &[i32], descriptors: &[u8]) {
    let keypoints: Vec<u8> = xs.iter().chain(ys).flat_map(|v| v.to_le_bytes()).collect();
    std::fs::write(dir.0.join(format!("keypoints_{index}.bin")), keypoints).unwrap();
    std::fs::write(dir.0.join(format!("descriptors_{index}.bin")), descriptors).unwrap();
}

fn small_config() -> DirectoryConfig {
    DirectoryConfig {
        descriptor_dim: 4,
        ..DirectoryConfig::default()
    }
}

#[test]
fn directory_frames_are_read_until_a_pair_is_missing() {
    let dir = TempDir::new("replay");
    write_frame(&dir, 0, &[10, 20], &[30, 40], &[142, 142, 145, 146, 0, 255, 142, 142]);
    write_frame(&dir, 1, &[1], &[2], &[150, 142, 142, 142]);

    let mut reader = DirectoryReader::new(&dir.0, small_config()).unwrap();
    let first = reader.next_frame().unwrap().unwrap();
    assert_eq!(first.points, vec![Point2::new(10.0, 30.0), Point2::new(20.0, 40.0)]);
    assert_eq!(first.descriptor_dim(), 4);
    // (q - 142) * scale shifted to a zero minimum: [0, 0, 3, 4] * scale, then unit length
    let row = first.descriptor(0);
    assert!(row[0].abs() < 1e-6 && row[1].abs() < 1e-6);
    assert!((row[2] - 0.6).abs() < 1e-5);
    assert!((row[3] - 0.8).abs() < 1e-5);
    for row in first.descriptors.row_iter() {
        assert!((row.norm() - 1.0).abs() < 1e-5);
    }

    assert_eq!(reader.next_frame().unwrap().unwrap().len(), 1);
    assert!(reader.next_frame().unwrap().is_none());
    assert_eq!(reader.frame_index(), 2);
}

#[test]
fn truncated_descriptor_dumps_are_malformed() {
    let dir = TempDir::new("truncated");
    write_frame(&dir, 0, &[10, 20], &[30, 40], &[142; 7]);

    let mut reader = DirectoryReader::new(&dir.0, small_config()).unwrap();
    assert!(matches!(reader.next_frame(), Err(SourceError::Malformed(_))));
}

#[test]
fn datagrams_arrive_through_the_receiver() {
    let mut receiver = UdpReceiver::bind("127.0.0.1:0")
        .unwrap()
        .with_idle_timeout(Duration::from_secs(2));
    let broadcaster = UdpBroadcaster::new(receiver.local_addr()).unwrap();

    let observations = Observations::from_rows(
        &[[5.0, 6.0], [7.0, 8.0]],
        &[vec![3.0, 4.0], vec![0.0, 2.0]],
    )
    .unwrap();
    broadcaster.send(&FramePacket::from_observations(0, &observations)).unwrap();

    let received = receiver.next_frame().unwrap().unwrap();
    assert_eq!(received.points, observations.points);
    assert_eq!(received.descriptor(0), vec![0.6, 0.8]);
    assert_eq!(received.descriptor(1), vec![0.0, 1.0]);

    receiver.stop();
    assert!(receiver.next_frame().unwrap().is_none());
}

#[test]
fn garbage_datagrams_are_skipped() {
    let mut receiver = UdpReceiver::bind("127.0.0.1:0")
        .unwrap()
        .with_idle_timeout(Duration::from_secs(2));
    let socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    socket.send_to(&[1, 2, 3], receiver.local_addr()).unwrap();

    let observations = Observations::from_rows(&[[1.0, 2.0]], &[vec![1.0]]).unwrap();
    let packet = FramePacket::from_observations(4, &observations);
    socket.send_to(&packet.encode(), receiver.local_addr()).unwrap();

    let received = receiver.next_frame().unwrap().unwrap();
    assert_eq!(received.points, vec![Point2::new(1.0, 2.0)]);
}

#[test]
fn system_runs_a_synthetic_session_to_exhaustion() {
    let config = SceneConfig {
        frames: 4,
        ..SceneConfig::default()
    };
    let mut scene = SyntheticScene::new(CameraIntrinsics::default(), config).unwrap();
    let mut system = System::new(CameraIntrinsics::default(), TrackerConfig::default());

    let summary = system.run(&mut scene, None).unwrap();
    assert_eq!(summary.frames_processed, 4);
    assert_eq!(summary.frames_dropped, 0);
    assert_eq!(summary.landmarks, 50);
    assert_eq!(summary.trajectory_len, 4);

    let snapshot = system.shutdown();
    assert_eq!(snapshot.trajectory.len(), 4);
    assert_eq!(snapshot.points.len(), 50);
}

#[test]
fn system_stops_at_max_frames() {
    let mut scene =
        SyntheticScene::new(CameraIntrinsics::default(), SceneConfig::default()).unwrap();
    let mut system = System::new(CameraIntrinsics::default(), TrackerConfig::default());

    let summary = system.run(&mut scene, Some(2)).unwrap();
    assert_eq!(summary.frames_processed, 2);
    assert_eq!(summary.trajectory_len, 2);
    assert!(scene.next_frame().unwrap().is_some());
}

#[test]
fn system_broadcasts_tracked_frames() {
    let mut receiver = UdpReceiver::bind("127.0.0.1:0")
        .unwrap()
        .with_idle_timeout(Duration::from_secs(2));
    let broadcaster = UdpBroadcaster::new(receiver.local_addr()).unwrap();

    let mut scene =
        SyntheticScene::new(CameraIntrinsics::default(), SceneConfig::default()).unwrap();
    let mut system = System::new(CameraIntrinsics::default(), TrackerConfig::default())
        .with_broadcaster(broadcaster);
    let summary = system.run(&mut scene, None).unwrap();
    assert_eq!(summary.frames_processed, 3);

    let mut received = 0;
    while let Some(frame) = receiver.next_frame().unwrap() {
        assert_eq!(frame.len(), 50);
        received += 1;
    }
    assert_eq!(received, 3);
}
