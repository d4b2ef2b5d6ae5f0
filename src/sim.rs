//! Synthetic render hosts for tests and demos.

use crate::{error::CaptureError, image::PixelBuffer, session::RenderHost};
use nalgebra::Vector3;
use std::path::{Path, PathBuf};

/// An in-memory scene that renders a flat background with one rectangular
/// block, and brightens the block over a configured frame range.
///
/// Brightness does not depend on the camera position, so every pose in an
/// array observes the same flash. Camera, path and frame mutations are all
/// recorded, which lets tests check that a session restores the host state
/// it touched.
pub struct FlashScene {
    width: u32,
    height: u32,
    background: f32,
    block: Block,
    camera_position: Vector3<f64>,
    output_path: PathBuf,
    frame: u32,
    renders: u32,
    stills_requested: u32,
}

/// A pixel-aligned rectangle that flashes brighter on `[from, until)`.
#[derive(Clone, Copy, Debug)]
pub struct Block {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub base: f32,
    pub boost: f32,
    pub from: u32,
    pub until: u32,
}

impl Block {
    fn value_at(&self, frame: u32) -> f32 {
        match (self.from..self.until).contains(&frame) {
            true => self.base + self.boost,
            false => self.base,
        }
    }

    fn contains(&self, col: u32, row: u32) -> bool {
        (self.x..self.x + self.width).contains(&col)
            && (self.y..self.y + self.height).contains(&row)
    }
}

impl FlashScene {
    pub fn new(width: u32, height: u32, background: f32, block: Block) -> Self {
        Self {
            width,
            height,
            background,
            block,
            camera_position: Vector3::zeros(),
            output_path: PathBuf::from("/tmp/render"),
            frame: 1,
            renders: 0,
            stills_requested: 0,
        }
    }

    /// Renders performed so far.
    pub fn renders(&self) -> u32 {
        self.renders
    }

    /// Renders that were asked to write their own still.
    pub fn stills_requested(&self) -> u32 {
        self.stills_requested
    }

    pub fn frame(&self) -> u32 {
        self.frame
    }

    /// Rasterize the scene at the current frame.
    pub fn rasterize(&self) -> Result<PixelBuffer, CaptureError> {
        let block_value = self.block.value_at(self.frame);
        let mut data = Vec::with_capacity((self.width * self.height * 4) as usize);

        for row in 0..self.height {
            for col in 0..self.width {
                let value = match self.block.contains(col, row) {
                    true => block_value,
                    false => self.background,
                };
                data.extend_from_slice(&[value, value, value, 1.0]);
            }
        }

        PixelBuffer::new(self.width, self.height, 4, data)
    }
}

impl RenderHost for FlashScene {
    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn camera_position(&self) -> Vector3<f64> {
        self.camera_position
    }

    fn set_camera_position(&mut self, position: Vector3<f64>) {
        self.camera_position = position;
    }

    fn output_path(&self) -> PathBuf {
        self.output_path.clone()
    }

    fn set_output_path(&mut self, path: &Path) {
        self.output_path = path.to_path_buf();
    }

    fn set_frame(&mut self, frame: u32) {
        self.frame = frame;
    }

    fn request_render(&mut self, write_still: bool) -> Result<Option<PixelBuffer>, CaptureError> {
        self.renders += 1;
        if write_still {
            self.stills_requested += 1;
        }
        self.rasterize().map(Some)
    }
}
