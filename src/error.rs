use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("camera array must have at least one row and one column, got {rows}x{cols}")]
    DegenerateGrid { rows: usize, cols: usize },

    #[error("frame range is empty: start {start} is past end {end}")]
    EmptyFrameRange { start: u32, end: u32 },

    #[error("orbit frequency must be positive, got {0}")]
    BadFrequency(f64),

    #[error("frame rate must be positive, got {0}")]
    BadFrameRate(f64),

    #[error("pixel buffer holds {actual} samples but {width}x{height}x{channels} needs {expected}")]
    BufferSize {
        width: u32,
        height: u32,
        channels: u8,
        expected: usize,
        actual: usize,
    },

    #[error("expected 1, 3 or 4 channels per pixel, got {0}")]
    UnsupportedChannels(u8),

    #[error("render completed while no request was outstanding")]
    UnexpectedCompletion,

    #[error("render backend: {0}")]
    Backend(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),
}
