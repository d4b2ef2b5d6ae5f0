use crate::{
    detector::EventBatch,
    error::CaptureError,
    rig::PoseKey,
};
use std::{
    collections::HashMap,
    fs::{self, File},
    io::{BufWriter, Write},
    path::PathBuf,
};

/// Destination for the event batches a session produces.
///
/// Implementations differ in when data reaches the disk: the dense volume
/// holds everything in memory until `finish`, the streaming log appends as
/// batches arrive.
pub trait EventSink<K: PoseKey> {
    fn record(&mut self, key: K, batch: &EventBatch) -> Result<(), CaptureError>;

    /// Flush whatever this sink buffered. Called exactly once at teardown,
    /// for cancelled sessions as well as completed ones.
    fn finish(&mut self) -> Result<(), CaptureError>;
}

/// In-memory signed-byte event volume, flushed to a single NumPy `.npy`
/// artifact at session end.
///
/// Shape is `(height, width, frames)` for single-view sessions and
/// `(height, width, frames, rows, cols)` for light-field sessions, with
/// `frames = end_frame - start_frame`. The frame axis is indexed by
/// `frame - start_frame - 1`; the seeding frame at `start_frame` produces
/// no events and has no slot, and batches outside the configured range are
/// ignored.
pub struct DenseVolume {
    path: PathBuf,
    width: u32,
    height: u32,
    start_frame: u32,
    frames: usize,
    grid: Option<(usize, usize)>,
    data: Vec<i8>,
}

impl DenseVolume {
    /// A `(height, width, frames)` volume for a single tracked pose.
    pub fn single_view(
        path: PathBuf,
        width: u32,
        height: u32,
        start_frame: u32,
        end_frame: u32,
    ) -> Self {
        Self::build(path, width, height, start_frame, end_frame, None)
    }

    /// A `(height, width, frames, rows, cols)` volume for a pose grid.
    pub fn light_field(
        path: PathBuf,
        width: u32,
        height: u32,
        start_frame: u32,
        end_frame: u32,
        rows: usize,
        cols: usize,
    ) -> Self {
        Self::build(path, width, height, start_frame, end_frame, Some((rows, cols)))
    }

    fn build(
        path: PathBuf,
        width: u32,
        height: u32,
        start_frame: u32,
        end_frame: u32,
        grid: Option<(usize, usize)>,
    ) -> Self {
        let frames = end_frame.saturating_sub(start_frame) as usize;
        let (rows, cols) = grid.unwrap_or((1, 1));
        let len = height as usize * width as usize * frames * rows * cols;

        Self {
            path,
            width,
            height,
            start_frame,
            frames,
            grid,
            data: vec![0; len],
        }
    }

    fn shape(&self) -> Vec<usize> {
        let mut shape = vec![self.height as usize, self.width as usize, self.frames];
        if let Some((rows, cols)) = self.grid {
            shape.push(rows);
            shape.push(cols);
        }
        shape
    }

    pub fn as_slice(&self) -> &[i8] {
        self.data.as_slice()
    }

    /// Polarity recorded for `(row, col)` at `frame`, pose `(s, t)`.
    ///
    /// Frames outside the recorded range have no slot and read as zero.
    pub fn at(&self, row: usize, col: usize, frame: u32, s: usize, t: usize) -> i8 {
        if !self.holds(frame) {
            return 0;
        }

        let f = (frame - self.start_frame - 1) as usize;
        let (rows, cols) = self.grid.unwrap_or((1, 1));
        debug_assert!(s < rows && t < cols);

        let i = (((row * self.width as usize + col) * self.frames + f) * rows + s) * cols + t;
        self.data[i]
    }

    /// Whether `frame` has a slot on the volume's frame axis.
    fn holds(&self, frame: u32) -> bool {
        frame > self.start_frame && (frame - self.start_frame) as usize <= self.frames
    }
}

impl<K: PoseKey> EventSink<K> for DenseVolume {
    fn record(&mut self, key: K, batch: &EventBatch) -> Result<(), CaptureError> {
        // The seeding frame and anything past the configured range have no
        // slot on the frame axis.
        if !self.holds(batch.frame) {
            return Ok(());
        }

        let f = (batch.frame - self.start_frame - 1) as usize;
        let (rows, cols) = self.grid.unwrap_or((1, 1));
        let (s, t) = key.volume_pos();

        for event in &batch.events {
            // Undo the bottom-origin flip to index by buffer row.
            let row = (self.height - event.y) as usize;
            let col = event.x as usize;
            let i = (((row * self.width as usize + col) * self.frames + f) * rows + s) * cols + t;
            self.data[i] = event.polarity;
        }

        Ok(())
    }

    fn finish(&mut self) -> Result<(), CaptureError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = BufWriter::new(File::create(&self.path)?);
        file.write_all(&npy_header(&self.shape()))?;
        // i8 and u8 share a byte representation.
        let bytes: Vec<u8> = self.data.iter().map(|p| *p as u8).collect();
        file.write_all(&bytes)?;
        file.flush()?;
        Ok(())
    }
}

/// NumPy format 1.0 header for a C-order `|i1` array of `shape`.
fn npy_header(shape: &[usize]) -> Vec<u8> {
    let dims = shape
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    let dict = format!("{{'descr': '|i1', 'fortran_order': False, 'shape': ({dims}), }}");

    // Magic, version, u16 header length; the dict is padded with spaces so
    // the whole header is a multiple of 64 bytes and ends in a newline.
    let unpadded = 10 + dict.len() + 1;
    let padding = (64 - unpadded % 64) % 64;

    let mut header = Vec::with_capacity(unpadded + padding);
    header.extend_from_slice(b"\x93NUMPY\x01\x00");
    header.extend_from_slice(&((dict.len() + padding + 1) as u16).to_le_bytes());
    header.extend_from_slice(dict.as_bytes());
    header.extend(std::iter::repeat_n(b' ', padding));
    header.push(b'\n');
    header
}

/// Streams each batch to a per-pose text log as soon as it is observed.
///
/// Log files live at the path the pose key dictates (for grid keys,
/// `pose_<s>_<t>/pose_<s>_<t>.txt` under the session output directory) and
/// open lazily on the first batch for that pose. The first line records
/// `"<width> <height>"`; every event then appends
/// `"<timestamp> <x> <y> <polarity>"` with the timestamp printed to
/// microsecond precision.
pub struct StreamingLog<K: PoseKey> {
    base: PathBuf,
    width: u32,
    height: u32,
    logs: HashMap<K, BufWriter<File>>,
}

impl<K: PoseKey> StreamingLog<K> {
    pub fn new(base: PathBuf, width: u32, height: u32) -> Self {
        Self {
            base,
            width,
            height,
            logs: HashMap::new(),
        }
    }
}

impl<K: PoseKey> EventSink<K> for StreamingLog<K> {
    fn record(&mut self, key: K, batch: &EventBatch) -> Result<(), CaptureError> {
        let log = match self.logs.entry(key) {
            std::collections::hash_map::Entry::Occupied(entry) => entry.into_mut(),
            std::collections::hash_map::Entry::Vacant(entry) => {
                let path = key.log_path(&self.base);
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
                let mut log = BufWriter::new(File::create(path)?);
                writeln!(log, "{} {}", self.width, self.height)?;
                entry.insert(log)
            }
        };

        for event in &batch.events {
            writeln!(log, "{:.6} {} {} {}", event.t, event.x, event.y, event.polarity)?;
        }

        Ok(())
    }

    fn finish(&mut self) -> Result<(), CaptureError> {
        for log in self.logs.values_mut() {
            log.flush()?;
        }
        Ok(())
    }
}
