//! Synthetic event-camera light-field capture.
//!
//! Emulates a dynamic vision sensor mounted on a multi-view rig: for each
//! pose in a camera array and each time frame, a render is requested from
//! an external host, the returned intensity image is mapped into a lin-log
//! brightness domain, and a sparse stream of per-pixel polarity events is
//! emitted wherever brightness moved by more than a threshold since the
//! last sample at that pose.
//!
//! The crate is organised around four pieces:
//!
//! - [`rig`] places cameras: a regular S x T [`rig::PoseGrid`], a rotating
//!   [`rig::OrbitScan`], or a fixed camera.
//! - [`image`] maps linear pixel intensities into the photoreceptor
//!   lin-log response.
//! - [`detector`] differences mapped frames against per-pose reference
//!   buffers and emits polarity events.
//! - [`session`] drives the `(frame, pose)` iteration space against a
//!   [`session::RenderHost`], writing stills, event logs or a dense event
//!   volume along the way.
//!
//! [`sim`] provides a small synthetic host for tests and demos.

pub mod detector;
pub mod error;
pub mod image;
pub mod rig;
pub mod session;
pub mod sim;
pub mod sink;

pub use detector::{Event, EventBatch, EventDetector};
pub use error::CaptureError;
pub use image::{LinLogImage, LumaImage, PixelBuffer};
pub use rig::{GridKey, OrbitScan, PoseGrid, PoseKey, StaticRig, Trajectory};
pub use session::{render_still, CaptureSession, RenderHost, SessionConfig, SinkMode, Status};
pub use sink::{DenseVolume, EventSink, StreamingLog};
