use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use clap::{Args, Parser, Subcommand};
use log::info;

use slamr::sensors::{
    directory::DirectoryReader,
    synthetic::SyntheticScene,
    udp::{UdpBroadcaster, UdpReceiver},
    FrameSource,
};
use slamr::{SessionConfig, System};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Session configuration JSON
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Write the final trajectory and localized points to this JSON file
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    /// Re-broadcast every tracked frame to this address
    #[arg(long, global = true)]
    broadcast: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Track a directory of keypoints_{i}.bin / descriptors_{i}.bin dumps
    Replay { path: PathBuf },

    /// Track frame datagrams received over UDP
    Listen {
        /// Address to bind, e.g. 0.0.0.0:5005
        addr: String,

        /// Stop after this many frames
        #[arg(long)]
        max_frames: Option<usize>,

        /// Stop after this many seconds without a frame
        #[arg(long)]
        idle_secs: Option<u64>,
    },

    /// Track a generated scene
    Synthetic {
        #[arg(long)]
        frames: Option<usize>,

        #[arg(long)]
        points: Option<usize>,

        /// Gaussian pixel noise standard deviation
        #[arg(long)]
        noise: Option<f64>,

        #[arg(long)]
        seed: Option<u64>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let mut config = match &cli.common.config {
        Some(path) => SessionConfig::from_json_file(path)?,
        None => SessionConfig::default(),
    };

    let (mut source, max_frames): (Box<dyn FrameSource>, Option<usize>) = match cli.command {
        Command::Replay { path } => {
            let reader = DirectoryReader::new(path, config.directory.clone())?;
            (Box::new(reader), None)
        }
        Command::Listen {
            addr,
            max_frames,
            idle_secs,
        } => {
            let mut receiver = UdpReceiver::bind(addr.as_str())?;
            if let Some(secs) = idle_secs {
                receiver = receiver.with_idle_timeout(Duration::from_secs(secs));
            }
            info!("listening on {}", receiver.local_addr());
            (Box::new(receiver), max_frames)
        }
        Command::Synthetic {
            frames,
            points,
            noise,
            seed,
        } => {
            let scene = &mut config.scene;
            scene.frames = frames.unwrap_or(scene.frames);
            scene.points = points.unwrap_or(scene.points);
            scene.pixel_noise = noise.unwrap_or(scene.pixel_noise);
            scene.seed = seed.unwrap_or(scene.seed);
            (Box::new(SyntheticScene::new(config.intrinsics, config.scene.clone())?), None)
        }
    };

    let mut system = System::new(config.intrinsics, config.tracker.clone());
    if let Some(target) = &cli.common.broadcast {
        let broadcaster = UdpBroadcaster::new(target.as_str())?;
        info!("broadcasting tracked frames to {}", broadcaster.target());
        system = system.with_broadcaster(broadcaster);
    }

    let now = Instant::now();
    let summary = system.run(&mut source, max_frames)?;
    let duration_sec = now.elapsed().as_secs_f64();
    println!("{}", serde_json::to_string_pretty(&summary)?);
    println!("tracking took {duration_sec:.3} sec");

    let snapshot = system.shutdown();
    if let Some(path) = &cli.common.output {
        write_snapshot(path, &snapshot)?;
        info!(
            "wrote {} poses and {} points to {}",
            snapshot.trajectory.len(),
            snapshot.points.len(),
            path.display()
        );
    }
    Ok(())
}

fn write_snapshot(
    path: &Path,
    snapshot: &slamr::MapSnapshot,
) -> Result<(), Box<dyn std::error::Error>> {
    let json = serde_json::to_string_pretty(snapshot)?;
    std::fs::write(path, json)?;
    Ok(())
}
