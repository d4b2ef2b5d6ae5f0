use clap::{Parser, ValueEnum};
use evfield::{
    sim::{Block, FlashScene},
    CaptureSession, OrbitScan, PoseGrid, SessionConfig, SinkMode,
};
use nalgebra::{Rotation3, Vector3};
use std::{path::PathBuf, process::ExitCode};

/// Capture a synthetic flashing scene with one of the session variants.
#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Args {
    #[arg(long, value_enum, default_value_t = Mode::EventLightField)]
    mode: Mode,

    #[arg(short, long)]
    output: PathBuf,

    #[arg(long, default_value_t = 3)]
    rows: usize,

    #[arg(long, default_value_t = 3)]
    cols: usize,

    #[arg(long, default_value_t = 0.1)]
    base_x: f64,

    #[arg(long, default_value_t = 0.1)]
    base_y: f64,

    #[arg(long, default_value_t = 1)]
    start_frame: u32,

    #[arg(long, default_value_t = 24)]
    end_frame: u32,

    #[arg(long, default_value_t = 24.0)]
    frame_rate: f64,

    /// Lin-log brightness change required to emit an event.
    #[arg(long, default_value_t = 0.1)]
    threshold: f64,

    /// Frames per revolution of the galvo orbit.
    #[arg(long, default_value_t = 12.0)]
    frequency: f64,

    #[arg(long, default_value_t = 64)]
    width: u32,

    #[arg(long, default_value_t = 48)]
    height: u32,

    /// Write the dense event volume instead of streaming text logs.
    #[arg(long)]
    dense: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    Animation,
    LightField,
    Events,
    EventLightField,
    EventGalvo,
}

fn main() -> ExitCode {
    let args = Args::parse();

    match capture(&args) {
        Ok(renders) => {
            println!(
                "captured {} renders into {}",
                renders,
                args.output.display()
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("capture failed: {err}");
            ExitCode::FAILURE
        }
    }
}

fn capture(args: &Args) -> Result<u32, evfield::CaptureError> {
    let scene = FlashScene::new(
        args.width,
        args.height,
        0.2,
        Block {
            x: args.width / 4,
            y: args.height / 4,
            width: args.width / 2,
            height: args.height / 2,
            base: 0.2,
            boost: 0.6,
            from: (args.start_frame + args.end_frame) / 2,
            until: (args.start_frame + args.end_frame) / 2 + 2,
        },
    );

    let config = SessionConfig {
        camera_name: "flash".into(),
        output_path: args.output.clone(),
        start_frame: args.start_frame,
        end_frame: args.end_frame,
        frame_rate: args.frame_rate,
        event_threshold: args.threshold,
        ..SessionConfig::default()
    };

    let mode = match args.dense {
        true => SinkMode::Dense,
        false => SinkMode::Streaming,
    };

    let grid = || {
        PoseGrid::from_camera(
            Vector3::zeros(),
            Rotation3::identity(),
            args.rows,
            args.cols,
            args.base_x,
            args.base_y,
        )
    };

    let host = match args.mode {
        Mode::Animation => {
            let mut session = CaptureSession::animation(scene, config)?;
            session.run()?;
            session.into_host()
        }
        Mode::LightField => {
            let mut session = CaptureSession::light_field(scene, grid()?, config)?;
            session.run()?;
            session.into_host()
        }
        Mode::Events => {
            let mut session = CaptureSession::events(scene, config, mode)?;
            session.run()?;
            session.into_host()
        }
        Mode::EventLightField => {
            let mut session = CaptureSession::event_light_field(scene, grid()?, config, mode)?;
            session.run()?;
            session.into_host()
        }
        Mode::EventGalvo => {
            let orbit = OrbitScan::from_camera(
                Vector3::zeros(),
                Rotation3::identity(),
                args.base_x,
                args.base_y,
                args.frequency,
            )?;
            let mut session = CaptureSession::event_galvo(scene, orbit, config, mode)?;
            session.run()?;
            session.into_host()
        }
    };

    Ok(host.renders())
}
