//! Drives an event light-field capture with the polling entry points, the
//! way a timer-driven host application would.

use evfield::{
    sim::{Block, FlashScene},
    CaptureSession, PoseGrid, SessionConfig, SinkMode, Status,
};
use nalgebra::{Rotation3, Vector3};

fn main() -> Result<(), evfield::CaptureError> {
    let scene = FlashScene::new(
        64,
        48,
        0.2,
        Block {
            x: 16,
            y: 12,
            width: 32,
            height: 24,
            base: 0.2,
            boost: 0.5,
            from: 6,
            until: u32::MAX,
        },
    );

    let grid = PoseGrid::from_camera(
        Vector3::zeros(),
        Rotation3::identity(),
        2,
        2,
        0.1,
        0.1,
    )?;

    let config = SessionConfig {
        camera_name: "demo".into(),
        output_path: "out/poll_drive".into(),
        start_frame: 1,
        end_frame: 12,
        ..SessionConfig::default()
    };

    let mut session =
        CaptureSession::event_light_field(scene, grid, config, SinkMode::Streaming)?;

    // Each tick either starts a render or, while one is outstanding, does
    // nothing. FlashScene renders synchronously so every tick completes a
    // pose here.
    let mut ticks = 0u32;
    while session.poll()? == Status::Running {
        ticks += 1;
    }

    println!(
        "finished after {} ticks, {} renders",
        ticks,
        session.host().renders()
    );
    Ok(())
}
