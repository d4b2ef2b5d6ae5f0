use crate::{
    detector::EventDetector,
    error::CaptureError,
    image::{LINLOG_THRESHOLD, PixelBuffer},
    rig::{OrbitScan, PoseGrid, PoseKey, StaticRig, Trajectory},
    sink::{DenseVolume, EventSink, StreamingLog},
};
use nalgebra::Vector3;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

/// The external renderer a capture session drives.
///
/// The session treats the host as exclusively owned for its lifetime: it
/// repositions the camera, redirects the still output path and advances the
/// frame cursor, and restores all three at teardown.
pub trait RenderHost {
    /// Configured output resolution `(width, height)` before scaling.
    fn resolution(&self) -> (u32, u32);

    /// Percentage scale applied to [`RenderHost::resolution`].
    fn resolution_percentage(&self) -> u32 {
        100
    }

    fn camera_position(&self) -> Vector3<f64>;

    fn set_camera_position(&mut self, position: Vector3<f64>);

    fn output_path(&self) -> PathBuf;

    fn set_output_path(&mut self, path: &Path);

    /// Move the host's time cursor to `frame`.
    fn set_frame(&mut self, frame: u32);

    /// Start a render of the current frame at the current camera pose.
    ///
    /// A synchronous host blocks and returns `Some(pixels)`; an
    /// asynchronous host returns `None` and later delivers the buffer
    /// through [`CaptureSession::on_render_complete`]. `write_still` asks
    /// the host to also save its own raster at the configured output path.
    fn request_render(&mut self, write_still: bool) -> Result<Option<PixelBuffer>, CaptureError>;
}

/// Render the current frame once, letting the host write the still.
pub fn render_still<R: RenderHost>(host: &mut R) -> Result<Option<PixelBuffer>, CaptureError> {
    host.request_render(true)
}

/// Parameters shared by every session variant.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SessionConfig {
    pub camera_name: String,
    pub output_path: PathBuf,
    /// First frame of the capture; the detector seeds its references here.
    pub start_frame: u32,
    /// Last frame of the capture, inclusive.
    pub end_frame: u32,
    pub frame_rate: f64,
    /// Lin-log brightness change required to emit an event.
    pub event_threshold: f64,
    /// Crossover of the photoreceptor response, 0-255 scale.
    pub linlog_threshold: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            camera_name: "camera".into(),
            output_path: PathBuf::from("out"),
            start_frame: 1,
            end_frame: 250,
            frame_rate: 24.0,
            event_threshold: 0.1,
            linlog_threshold: LINLOG_THRESHOLD,
        }
    }
}

/// Which output strategy an event-enabled session uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SinkMode {
    /// Accumulate polarities in memory, flush one `.npy` volume at the end.
    Dense,
    /// Append each batch to a per-pose text log as soon as it is observed.
    Streaming,
}

/// How stills are produced for each `(frame, pose)`.
enum StillPolicy {
    /// No still output.
    Skip,
    /// Host writes `<out>/animation/frame_<f:04>.png`.
    HostAnimation,
    /// Host writes at the `<out>/<s:02>_<t:02>` prefix.
    HostPosePrefix,
    /// Session writes `<out>/<pose dir>/<f:04>.png` from the read-back
    /// pixel buffer.
    PoseDir,
}

/// Mutable cursor state of a running session.
#[derive(Clone, Debug)]
pub struct SessionState {
    current_frame: u32,
    pose_progress: usize,
    rendering: bool,
    done: bool,
    cancelled: bool,
    finished: bool,
    width: u32,
    height: u32,
    saved_position: Vector3<f64>,
    saved_path: PathBuf,
}

impl SessionState {
    pub fn current_frame(&self) -> u32 {
        self.current_frame
    }

    pub fn pose_progress(&self) -> usize {
        self.pose_progress
    }

    pub fn is_rendering(&self) -> bool {
        self.rendering
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn was_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Scaled capture resolution `(width, height)`.
    pub fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Result of one cooperative [`CaptureSession::poll`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Running,
    Finished,
}

/// State machine driving renders across the `(frame, pose)` iteration
/// space.
///
/// The same machine serves both drive modes. A blocking host is driven by
/// [`CaptureSession::run`]; a polling host calls
/// [`CaptureSession::poll`] periodically (a poll while a render is
/// outstanding is a no-op) and [`CaptureSession::on_render_complete`] when
/// the host finishes a render. Both produce identical artifacts.
pub struct CaptureSession<R: RenderHost, T: Trajectory> {
    host: R,
    trajectory: T,
    config: SessionConfig,
    state: SessionState,
    detector: Option<EventDetector<T::Key>>,
    sink: Option<Box<dyn EventSink<T::Key>>>,
    still: StillPolicy,
    /// Whether this variant advances the host frame cursor.
    drive_frames: bool,
}

impl<R: RenderHost> CaptureSession<R, StaticRig> {
    /// Multi-frame animation capture; stills only, no event detection.
    pub fn animation(host: R, config: SessionConfig) -> Result<Self, CaptureError> {
        let session = Self::arm(host, StaticRig, config, StillPolicy::HostAnimation, true)?;
        fs::create_dir_all(session.config.output_path.join("animation"))?;
        Ok(session)
    }

    /// Single-view event capture across the configured frame range.
    pub fn events(host: R, config: SessionConfig, mode: SinkMode) -> Result<Self, CaptureError> {
        validate_event_config(&config)?;
        let mut session = Self::arm(host, StaticRig, config, StillPolicy::Skip, true)?;
        session.attach_detector(mode, None);
        Ok(session)
    }
}

impl<R: RenderHost> CaptureSession<R, PoseGrid> {
    /// Plain light-field capture: one still per pose at the current frame.
    pub fn light_field(
        host: R,
        grid: PoseGrid,
        mut config: SessionConfig,
    ) -> Result<Self, CaptureError> {
        // A single pass over the grid; the frame cursor is not driven.
        config.end_frame = config.start_frame;
        let session = Self::arm(host, grid, config, StillPolicy::HostPosePrefix, false)?;
        session.write_meta(None)?;
        Ok(session)
    }

    /// Light-field event capture: S x T independent reference buffers
    /// observed every frame, plus per-pose stills.
    pub fn event_light_field(
        host: R,
        grid: PoseGrid,
        config: SessionConfig,
        mode: SinkMode,
    ) -> Result<Self, CaptureError> {
        validate_event_config(&config)?;
        let mut session = Self::arm(host, grid, config, StillPolicy::PoseDir, true)?;
        let grid_dims = (session.trajectory.rows(), session.trajectory.cols());
        session.attach_detector(mode, Some(grid_dims));
        session.write_meta(Some(session.config.event_threshold))?;
        Ok(session)
    }

    fn write_meta(&self, threshold: Option<f64>) -> Result<(), CaptureError> {
        let mut file = BufWriter::new(File::create(
            self.config.output_path.join("param.txt"),
        )?);
        writeln!(file, "camera: {}", self.config.camera_name)?;
        writeln!(file, "num_x: {}", self.trajectory.cols())?;
        writeln!(file, "num_y: {}", self.trajectory.rows())?;
        writeln!(file, "base_x: {}", self.trajectory.base_x())?;
        writeln!(file, "base_y: {}", self.trajectory.base_y())?;
        if let Some(threshold) = threshold {
            writeln!(file, "threshold: {threshold}")?;
        }
        file.flush()?;
        Ok(())
    }
}

impl<R: RenderHost> CaptureSession<R, OrbitScan> {
    /// Rotating-trajectory (galvo) event capture: the pose is a function of
    /// the frame index and a single reference buffer is tracked.
    pub fn event_galvo(
        host: R,
        orbit: OrbitScan,
        config: SessionConfig,
        mode: SinkMode,
    ) -> Result<Self, CaptureError> {
        validate_event_config(&config)?;
        let mut session = Self::arm(host, orbit, config, StillPolicy::PoseDir, true)?;
        session.attach_detector(mode, None);
        Ok(session)
    }
}

fn validate_event_config(config: &SessionConfig) -> Result<(), CaptureError> {
    if config.end_frame <= config.start_frame {
        return Err(CaptureError::EmptyFrameRange {
            start: config.start_frame,
            end: config.end_frame,
        });
    }
    if config.frame_rate <= 0.0 {
        return Err(CaptureError::BadFrameRate(config.frame_rate));
    }
    Ok(())
}

impl<R: RenderHost, T: Trajectory> CaptureSession<R, T> {
    /// Armed transition: validate the configuration, size the capture from
    /// the host resolution, snapshot the host state to restore at teardown.
    fn arm(
        host: R,
        trajectory: T,
        config: SessionConfig,
        still: StillPolicy,
        drive_frames: bool,
    ) -> Result<Self, CaptureError> {
        if config.end_frame < config.start_frame {
            return Err(CaptureError::EmptyFrameRange {
                start: config.start_frame,
                end: config.end_frame,
            });
        }

        let (base_width, base_height) = host.resolution();
        let scale = host.resolution_percentage();
        let state = SessionState {
            current_frame: config.start_frame,
            pose_progress: 0,
            rendering: false,
            done: false,
            cancelled: false,
            finished: false,
            width: base_width * scale / 100,
            height: base_height * scale / 100,
            saved_position: host.camera_position(),
            saved_path: host.output_path(),
        };

        fs::create_dir_all(&config.output_path)?;

        Ok(Self {
            host,
            trajectory,
            config,
            state,
            detector: None,
            sink: None,
            still,
            drive_frames,
        })
    }

    fn attach_detector(&mut self, mode: SinkMode, grid: Option<(usize, usize)>) {
        self.detector = Some(EventDetector::new(
            self.config.event_threshold,
            self.config.frame_rate,
        ));

        let (width, height) = (self.state.width, self.state.height);
        self.sink = Some(match (mode, grid) {
            (SinkMode::Streaming, _) => Box::new(StreamingLog::new(
                self.config.output_path.clone(),
                width,
                height,
            )),
            (SinkMode::Dense, None) => Box::new(DenseVolume::single_view(
                self.config.output_path.join("event_buffer.npy"),
                width,
                height,
                self.config.start_frame,
                self.config.end_frame,
            )),
            (SinkMode::Dense, Some((rows, cols))) => Box::new(DenseVolume::light_field(
                self.config.output_path.join("event_buffer_lightfield.npy"),
                width,
                height,
                self.config.start_frame,
                self.config.end_frame,
                rows,
                cols,
            )),
        });
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn host(&self) -> &R {
        &self.host
    }

    /// Tear the session down if it has not been already, and hand back the
    /// host.
    pub fn into_host(mut self) -> R {
        if !self.state.finished {
            self.abort();
        }
        self.host
    }

    /// One cooperative step.
    ///
    /// While a render is outstanding this is a no-op; once the iteration
    /// space is exhausted (or the session was cancelled) it runs teardown
    /// and reports [`Status::Finished`].
    pub fn poll(&mut self) -> Result<Status, CaptureError> {
        if self.state.done {
            if !self.state.finished {
                self.teardown()?;
            }
            return Ok(Status::Finished);
        }

        if self.state.rendering {
            return Ok(Status::Running);
        }

        match self.begin_render() {
            Ok(()) => Ok(Status::Running),
            Err(err) => {
                self.abort();
                Err(err)
            }
        }
    }

    /// Completion signal from the host render pipeline.
    pub fn on_render_complete(&mut self, pixels: PixelBuffer) -> Result<(), CaptureError> {
        match self.advance(pixels) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.abort();
                Err(err)
            }
        }
    }

    /// Explicit cancellation; a normal terminal transition, not an error.
    ///
    /// An in-flight render is allowed to complete. The next poll runs the
    /// same teardown as a completed session, keeping whatever output
    /// accumulated so far.
    pub fn cancel(&mut self) {
        if !self.state.finished {
            self.state.cancelled = true;
            self.state.done = true;
        }
    }

    /// Drive the session to completion against a blocking host.
    pub fn run(&mut self) -> Result<(), CaptureError> {
        loop {
            match self.poll()? {
                Status::Finished => return Ok(()),
                Status::Running if self.state.rendering => {
                    self.abort();
                    return Err(CaptureError::Backend(
                        "blocking drive requires the host to return pixels from request_render"
                            .into(),
                    ));
                }
                Status::Running => {}
            }
        }
    }

    /// Rendering transition: position the camera and the output path for
    /// the current `(frame, pose)`, then issue the render request.
    fn begin_render(&mut self) -> Result<(), CaptureError> {
        let frame_offset = self.state.current_frame - self.config.start_frame;

        if self.drive_frames {
            self.host.set_frame(self.state.current_frame);
        }

        // The pose must be on the camera before the render is requested.
        if let Some(position) = self
            .trajectory
            .position(self.state.pose_progress, frame_offset)
        {
            self.host.set_camera_position(position);
        }

        let write_still = match self.still {
            StillPolicy::HostAnimation => {
                let path = self
                    .config
                    .output_path
                    .join("animation")
                    .join(format!("frame_{:04}.png", self.state.current_frame));
                self.host.set_output_path(&path);
                true
            }
            StillPolicy::HostPosePrefix => {
                let key = self.trajectory.key(self.state.pose_progress);
                self.host
                    .set_output_path(&self.config.output_path.join(key.padded_prefix()));
                true
            }
            StillPolicy::Skip | StillPolicy::PoseDir => false,
        };

        self.state.rendering = true;
        if let Some(pixels) = self.host.request_render(write_still)? {
            self.advance(pixels)?;
        }
        Ok(())
    }

    /// Advancing transition: consume the rendered buffer, then move the
    /// pose cursor, wrapping into the next frame when the grid is spent.
    fn advance(&mut self, pixels: PixelBuffer) -> Result<(), CaptureError> {
        if !self.state.rendering {
            return Err(CaptureError::UnexpectedCompletion);
        }

        let (width, height) = pixels.dimensions();
        if (width, height) != (self.state.width, self.state.height) {
            return Err(CaptureError::BufferSize {
                width: self.state.width,
                height: self.state.height,
                channels: pixels.channels(),
                expected: (self.state.width * self.state.height) as usize
                    * pixels.channels() as usize,
                actual: pixels.as_slice().len(),
            });
        }

        let key = self.trajectory.key(self.state.pose_progress);

        if let StillPolicy::PoseDir = self.still {
            let dir = self.config.output_path.join(key.artifact_dir());
            fs::create_dir_all(&dir)?;
            pixels.save_png(&dir.join(format!("{:04}.png", self.state.current_frame)))?;
        }

        if let Some(detector) = self.detector.as_mut() {
            let mapped = pixels
                .into_luma()
                .into_lin_log(self.config.linlog_threshold);
            let batch = detector.observe(key, self.state.current_frame, &mapped);
            if let Some(sink) = self.sink.as_mut() {
                sink.record(key, &batch)?;
            }
        }

        self.state.pose_progress += 1;
        if self.state.pose_progress >= self.trajectory.len() {
            self.state.pose_progress = 0;
            self.state.current_frame += 1;
        }

        self.state.rendering = false;
        self.state.done =
            self.state.cancelled || self.state.current_frame > self.config.end_frame;
        Ok(())
    }

    /// Converged teardown for `Done` and `Cancelled`: flush the sink, then
    /// restore the host camera, output path and frame cursor.
    fn teardown(&mut self) -> Result<(), CaptureError> {
        self.state.finished = true;
        let flushed = match self.sink.as_mut() {
            Some(sink) => sink.finish(),
            None => Ok(()),
        };
        self.restore_host();
        flushed
    }

    /// Best-effort teardown on a fatal error; the error itself is surfaced
    /// by the caller.
    fn abort(&mut self) {
        if self.state.finished {
            return;
        }
        self.state.done = true;
        self.state.finished = true;
        if let Some(sink) = self.sink.as_mut() {
            let _ = sink.finish();
        }
        self.restore_host();
    }

    fn restore_host(&mut self) {
        self.host.set_camera_position(self.state.saved_position);
        self.host.set_output_path(&self.state.saved_path);
        if self.drive_frames {
            self.host.set_frame(self.config.start_frame);
        }
    }
}
