use std::{error::Error, path::PathBuf};

use board_tracker::charuco::{render_board, render_camera_view, RenderParams};
use board_tracker::core::CameraIntrinsics;
use board_tracker::frames::{rgb_view_mut, to_luma_image, ImageFileSource};
use board_tracker::pose::PoseData;
use board_tracker::{FrameReport, PoseTarget, StaticCamera, TrackerConfig, TrackingCoordinator};
use clap::{Args, Parser, Subcommand};
#[cfg(not(feature = "tracing"))]
use log::LevelFilter;
use nalgebra::{Isometry3, Translation3, UnitQuaternion, Vector3};

/// ChArUco board tracking tools.
#[derive(Debug, Parser)]
#[command(author, version, about = "Render, synthesize and track ChArUco boards")]
struct Cli {
    /// Log at debug level.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON log lines (tracing builds only; level follows `RUST_LOG`).
    #[cfg(feature = "tracing")]
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Render a printable board PNG.
    Render {
        /// Tracker config JSON; defaults are used if omitted.
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long, default_value_t = 100)]
        px_per_square: u32,
        #[arg(long)]
        out: PathBuf,
    },
    /// Render the board as seen by a pinhole camera.
    Synth {
        #[arg(long)]
        config: Option<PathBuf>,
        #[command(flatten)]
        camera: CameraArgs,
        /// Board rotation as an axis-angle vector `x,y,z` (radians).
        #[arg(long, value_delimiter = ',', allow_hyphen_values = true, default_value = "0,0,0")]
        rvec: Vec<f64>,
        /// Board origin in the camera frame `x,y,z`.
        #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
        tvec: Vec<f64>,
        #[arg(long)]
        out: PathBuf,
    },
    /// Track the board over image frames and print one JSON report per frame.
    Track {
        #[arg(long)]
        config: Option<PathBuf>,
        #[command(flatten)]
        camera: CameraArgs,
        /// Write annotated frames into this directory.
        #[arg(long)]
        overlay_dir: Option<PathBuf>,
        #[arg(required = true)]
        frames: Vec<PathBuf>,
    },
}

/// Full-resolution pinhole intrinsics.
#[derive(Debug, Args)]
struct CameraArgs {
    #[arg(long)]
    width: u32,
    #[arg(long)]
    height: u32,
    #[arg(long)]
    fx: f64,
    /// Defaults to `fx`.
    #[arg(long)]
    fy: Option<f64>,
    /// Defaults to the image centre.
    #[arg(long)]
    cx: Option<f64>,
    #[arg(long)]
    cy: Option<f64>,
}

impl CameraArgs {
    fn intrinsics(&self) -> Result<CameraIntrinsics, Box<dyn Error>> {
        Ok(CameraIntrinsics::new(
            self.width,
            self.height,
            self.cx.unwrap_or((self.width as f64 - 1.0) * 0.5),
            self.cy.unwrap_or((self.height as f64 - 1.0) * 0.5),
            self.fx,
            self.fy.unwrap_or(self.fx),
        )?)
    }
}

/// Keeps the last pose the tracker produced.
#[derive(Debug, Default)]
struct LastPose(Option<PoseData>);

impl PoseTarget for LastPose {
    fn set_world_pose(&mut self, pose: &PoseData) {
        self.0 = Some(*pose);
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<TrackerConfig, Box<dyn Error>> {
    let config = match path {
        Some(path) => TrackerConfig::load_json(path)?,
        None => TrackerConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

fn vec3(values: &[f64], name: &str) -> Result<Vector3<f64>, Box<dyn Error>> {
    match values {
        [x, y, z] => Ok(Vector3::new(*x, *y, *z)),
        _ => Err(format!("--{name} expects three comma-separated values").into()),
    }
}

fn run_render(config: Option<&PathBuf>, px_per_square: u32, out: &PathBuf) -> Result<(), Box<dyn Error>> {
    let config = load_config(config)?;
    if config.dictionary.opencv_name().is_none() {
        log::warn!(
            "{} codes are not an OpenCV dictionary; track this board with board-tracker only",
            config.dictionary.name()
        );
    }
    let board = config.build_board()?;
    let img = render_board(&board, px_per_square, &RenderParams::default());
    to_luma_image(&img).save(out)?;
    log::info!("wrote {}x{} board to {}", img.width, img.height, out.display());
    Ok(())
}

fn run_synth(
    config: Option<&PathBuf>,
    camera: &CameraArgs,
    rvec: &[f64],
    tvec: &[f64],
    out: &PathBuf,
) -> Result<(), Box<dyn Error>> {
    let board = load_config(config)?.build_board()?;
    let k = camera.intrinsics()?;
    let pose = Isometry3::from_parts(
        Translation3::from(vec3(tvec, "tvec")?),
        UnitQuaternion::from_scaled_axis(vec3(rvec, "rvec")?),
    );
    let img = render_camera_view(&board, &k, &pose, &RenderParams::default());
    to_luma_image(&img).save(out)?;
    log::info!("wrote synthetic view to {}", out.display());
    Ok(())
}

fn run_track(
    config: Option<&PathBuf>,
    camera: &CameraArgs,
    overlay_dir: Option<&PathBuf>,
    frames: Vec<PathBuf>,
) -> Result<(), Box<dyn Error>> {
    let config = load_config(config)?;
    let count = frames.len();
    let mut tracker = TrackingCoordinator::new(
        config,
        ImageFileSource::new(frames),
        LastPose::default(),
        StaticCamera::default(),
    )?;
    tracker.initialize(camera.intrinsics()?)?;
    if let Some(dir) = overlay_dir {
        std::fs::create_dir_all(dir)?;
    }

    for index in 0..count {
        let outcome = tracker.tick();
        let report = FrameReport::new(index, &outcome, tracker.session());
        println!("{}", serde_json::to_string(&report)?);

        let (Some(dir), Some(session)) = (overlay_dir, tracker.session()) else {
            continue;
        };
        if let Some(frame) = tracker.frames().current() {
            let mut annotated = frame.clone();
            session.draw_overlay(&mut rgb_view_mut(&mut annotated));
            annotated.save(dir.join(format!("overlay_{index:04}.png")))?;
        }
    }

    let (_, last, _) = tracker.shutdown();
    match last.0 {
        Some(pose) => log::info!("last pose: {:?}", pose.position),
        None => log::info!("no pose estimated"),
    }
    Ok(())
}

#[cfg(feature = "tracing")]
fn init_logging(cli: &Cli) -> Result<(), Box<dyn Error>> {
    // RUST_LOG decides the level here.
    let _ = cli.verbose;
    board_tracker::core::init_tracing(cli.json_logs);
    Ok(())
}

#[cfg(not(feature = "tracing"))]
fn init_logging(cli: &Cli) -> Result<(), Box<dyn Error>> {
    let level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    board_tracker::core::init_with_level(level)?;
    Ok(())
}

fn main() {
    if let Err(err) = try_main() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logging(&cli)?;

    match cli.command {
        Command::Render {
            config,
            px_per_square,
            out,
        } => run_render(config.as_ref(), px_per_square, &out),
        Command::Synth {
            config,
            camera,
            rvec,
            tvec,
            out,
        } => run_synth(config.as_ref(), &camera, &rvec, &tvec, &out),
        Command::Track {
            config,
            camera,
            overlay_dir,
            frames,
        } => run_track(config.as_ref(), &camera, overlay_dir.as_ref(), frames),
    }
}
