use crate::error::CaptureError;
use nalgebra::{Rotation3, Vector3};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::{
    f64::consts::TAU,
    fmt::Debug,
    hash::Hash,
    path::{Path, PathBuf},
};

/// Identifies one tracked pose inside a capture session.
///
/// The key also decides how per-pose artifacts are named on disk, since the
/// directory layout differs between the grid and single-view variants.
pub trait PoseKey: Copy + Eq + Hash + Debug + 'static {
    /// Directory under the session output path holding this pose's stills.
    fn artifact_dir(&self) -> String;

    /// Zero-padded `<s:02>_<t:02>` prefix used when the render host writes
    /// the still itself.
    fn padded_prefix(&self) -> String;

    /// Location of the streaming event log for this pose.
    fn log_path(&self, base: &Path) -> PathBuf;

    /// `(s, t)` placement inside a dense event volume.
    fn volume_pos(&self) -> (usize, usize);
}

/// Grid placement of a camera in the array, row `s`, column `t`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GridKey {
    pub s: usize,
    pub t: usize,
}

impl PoseKey for GridKey {
    fn artifact_dir(&self) -> String {
        format!("pose_{}_{}", self.s, self.t)
    }

    fn padded_prefix(&self) -> String {
        format!("{:02}_{:02}", self.s, self.t)
    }

    fn log_path(&self, base: &Path) -> PathBuf {
        base.join(self.artifact_dir())
            .join(format!("pose_{}_{}.txt", self.s, self.t))
    }

    fn volume_pos(&self) -> (usize, usize) {
        (self.s, self.t)
    }
}

/// Unit key for the single-view and galvo variants, which track exactly one
/// reference buffer.
impl PoseKey for () {
    fn artifact_dir(&self) -> String {
        "event_galvo".into()
    }

    fn padded_prefix(&self) -> String {
        String::new()
    }

    fn log_path(&self, base: &Path) -> PathBuf {
        base.join("events.txt")
    }

    fn volume_pos(&self) -> (usize, usize) {
        (0, 0)
    }
}

/// The set of camera positions a session visits within one frame.
///
/// The session asks for the next pose strictly before requesting the render
/// for it; `position` returning `None` leaves the host camera untouched.
pub trait Trajectory {
    type Key: PoseKey;

    /// Number of poses visited per frame.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reference-buffer key for the pose at `progress` in `[0, len)`.
    fn key(&self, progress: usize) -> Self::Key;

    /// Camera position for the pose at `progress`, `frame_offset` frames
    /// past the session start.
    fn position(&self, progress: usize, frame_offset: u32) -> Option<Vector3<f64>>;
}

/// A camera that never moves; animation and plain event capture.
#[derive(Clone, Copy, Debug, Default)]
pub struct StaticRig;

impl Trajectory for StaticRig {
    type Key = ();

    fn len(&self) -> usize {
        1
    }

    fn key(&self, _progress: usize) -> Self::Key {}

    fn position(&self, _progress: usize, _frame_offset: u32) -> Option<Vector3<f64>> {
        None
    }
}

/// A regular S x T camera array centred on a reference camera.
///
/// The array spans the full `base_x`/`base_y` distance between opposite
/// edges, so indices `(0, 0)` and `(S-1, T-1)` sit at extreme corners
/// symmetric about the origin. Axis directions are captured once at
/// construction and never re-derived mid-session.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PoseGrid {
    rows: usize,
    cols: usize,
    base_x: f64,
    base_y: f64,
    origin: Vector3<f64>,
    /// Horizontal half-baseline, `right * base_x`.
    dx: Vector3<f64>,
    /// Vertical half-baseline, `up * base_y`.
    dy: Vector3<f64>,
}

impl PoseGrid {
    /// Build a grid from the reference camera's world orientation.
    ///
    /// The horizontal axis points along the camera's negative local X and
    /// the vertical axis along its local Y.
    pub fn from_camera(
        origin: Vector3<f64>,
        orientation: Rotation3<f64>,
        rows: usize,
        cols: usize,
        base_x: f64,
        base_y: f64,
    ) -> Result<Self, CaptureError> {
        Self::with_axes(
            origin,
            orientation * Vector3::new(-1.0, 0.0, 0.0),
            orientation * Vector3::new(0.0, 1.0, 0.0),
            rows,
            cols,
            base_x,
            base_y,
        )
    }

    /// Build a grid from explicit unit axis directions.
    pub fn with_axes(
        origin: Vector3<f64>,
        right: Vector3<f64>,
        up: Vector3<f64>,
        rows: usize,
        cols: usize,
        base_x: f64,
        base_y: f64,
    ) -> Result<Self, CaptureError> {
        if rows == 0 || cols == 0 {
            return Err(CaptureError::DegenerateGrid { rows, cols });
        }

        Ok(Self {
            rows,
            cols,
            base_x,
            base_y,
            origin,
            dx: right * base_x,
            dy: up * base_y,
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn base_x(&self) -> f64 {
        self.base_x
    }

    pub fn base_y(&self) -> f64 {
        self.base_y
    }

    pub fn origin(&self) -> Vector3<f64> {
        self.origin
    }

    /// World position of the camera at row `s`, column `t`.
    ///
    /// Along a degenerate axis (`S = 1` or `T = 1`) the offset is exactly
    /// zero rather than a division by zero at the grid edge.
    pub fn position_of(&self, s: usize, t: usize) -> Vector3<f64> {
        let (rows, cols) = (self.rows as f64, self.cols as f64);

        let dx = match self.cols > 1 {
            true => self.dx * (2.0 * t as f64 / (cols - 1.0) - 1.0),
            false => Vector3::zeros(),
        };
        let dy = match self.rows > 1 {
            true => self.dy * (2.0 * s as f64 / (rows - 1.0) - 1.0),
            false => Vector3::zeros(),
        };

        self.origin + dx + dy
    }

    /// Row-major linear index of `(s, t)`.
    pub fn pos2idx(&self, s: usize, t: usize) -> usize {
        s * self.cols + t
    }

    /// Inverse of [`PoseGrid::pos2idx`].
    pub fn idx2pos(&self, index: usize) -> (usize, usize) {
        (index / self.cols, index % self.cols)
    }
}

impl Trajectory for PoseGrid {
    type Key = GridKey;

    fn len(&self) -> usize {
        self.rows * self.cols
    }

    fn key(&self, progress: usize) -> Self::Key {
        let (s, t) = self.idx2pos(progress);
        GridKey { s, t }
    }

    fn position(&self, progress: usize, _frame_offset: u32) -> Option<Vector3<f64>> {
        let (s, t) = self.idx2pos(progress);
        Some(self.position_of(s, t))
    }
}

/// A continuously rotating single-camera trajectory.
///
/// The camera traces an ellipse in the plane spanned by the grid axes, one
/// revolution every `frequency` frames.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct OrbitScan {
    origin: Vector3<f64>,
    dx: Vector3<f64>,
    dy: Vector3<f64>,
    frequency: f64,
}

impl OrbitScan {
    pub fn from_camera(
        origin: Vector3<f64>,
        orientation: Rotation3<f64>,
        base_x: f64,
        base_y: f64,
        frequency: f64,
    ) -> Result<Self, CaptureError> {
        if frequency <= 0.0 {
            return Err(CaptureError::BadFrequency(frequency));
        }

        Ok(Self {
            origin,
            dx: orientation * Vector3::new(-1.0, 0.0, 0.0) * base_x,
            dy: orientation * Vector3::new(0.0, 1.0, 0.0) * base_y,
            frequency,
        })
    }

    /// Camera position `frame_offset` frames into the scan.
    pub fn position_at(&self, frame_offset: u32) -> Vector3<f64> {
        let angle = TAU * frame_offset as f64 / self.frequency;
        self.origin + self.dx * angle.cos() + self.dy * angle.sin()
    }
}

impl Trajectory for OrbitScan {
    type Key = ();

    fn len(&self) -> usize {
        1
    }

    fn key(&self, _progress: usize) -> Self::Key {}

    fn position(&self, _progress: usize, frame_offset: u32) -> Option<Vector3<f64>> {
        Some(self.position_at(frame_offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use quickcheck_macros::quickcheck;
    use rstest::rstest;

    fn grid(rows: usize, cols: usize) -> PoseGrid {
        PoseGrid::with_axes(
            Vector3::new(1.0, 2.0, 3.0),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(0.0, 0.0, 1.0),
            rows,
            cols,
            0.1,
            0.2,
        )
        .unwrap()
    }

    #[rstest]
    #[case(2, 2)]
    #[case(3, 5)]
    #[case(7, 2)]
    fn corners_symmetric_about_origin(#[case] rows: usize, #[case] cols: usize) {
        let g = grid(rows, cols);
        let sum = g.position_of(0, 0) + g.position_of(rows - 1, cols - 1);
        assert_relative_eq!(sum, 2.0 * g.origin(), epsilon = 1e-12);
    }

    #[rstest]
    #[case(1, 4)]
    #[case(4, 1)]
    #[case(1, 1)]
    fn degenerate_axis_stays_on_origin(#[case] rows: usize, #[case] cols: usize) {
        let g = grid(rows, cols);
        for s in 0..rows {
            for t in 0..cols {
                let p = g.position_of(s, t);
                if rows == 1 {
                    assert_eq!(p.z, g.origin().z);
                }
                if cols == 1 {
                    assert_eq!(p.x, g.origin().x);
                }
            }
        }
    }

    #[test]
    fn baseline_spans_opposite_edges() {
        let g = grid(1, 3);
        assert_relative_eq!(g.position_of(0, 0).x, 1.0 - 0.1);
        assert_relative_eq!(g.position_of(0, 1).x, 1.0);
        assert_relative_eq!(g.position_of(0, 2).x, 1.0 + 0.1);
    }

    #[quickcheck]
    fn index_roundtrip(rows: u8, cols: u8, index: u16) -> bool {
        let (rows, cols) = (rows as usize + 1, cols as usize + 1);
        let g = grid(rows, cols);
        let index = index as usize % (rows * cols);
        let (s, t) = g.idx2pos(index);
        s < rows && t < cols && g.pos2idx(s, t) == index
    }

    #[test]
    fn rejects_degenerate_grid() {
        assert!(matches!(
            PoseGrid::with_axes(
                Vector3::zeros(),
                Vector3::x(),
                Vector3::z(),
                0,
                3,
                0.1,
                0.1
            ),
            Err(CaptureError::DegenerateGrid { rows: 0, cols: 3 })
        ));
    }

    #[test]
    fn grid_keys_are_row_major() {
        let g = grid(2, 3);
        assert_eq!(g.key(0), GridKey { s: 0, t: 0 });
        assert_eq!(g.key(2), GridKey { s: 0, t: 2 });
        assert_eq!(g.key(3), GridKey { s: 1, t: 0 });
    }

    #[test]
    fn orbit_period_matches_frequency() {
        let orbit = OrbitScan::from_camera(
            Vector3::zeros(),
            Rotation3::identity(),
            0.5,
            0.5,
            8.0,
        )
        .unwrap();

        assert_relative_eq!(orbit.position_at(0), orbit.position_at(8), epsilon = 1e-12);

        // A quarter revolution swaps the two basis directions.
        assert_relative_eq!(
            orbit.position_at(2),
            Vector3::new(0.0, 0.5, 0.0),
            epsilon = 1e-12
        );
        assert_relative_eq!(orbit.position_at(0), Vector3::new(-0.5, 0.0, 0.0));
    }

    #[test]
    fn rejects_zero_frequency() {
        assert!(matches!(
            OrbitScan::from_camera(Vector3::zeros(), Rotation3::identity(), 0.1, 0.1, 0.0),
            Err(CaptureError::BadFrequency(_))
        ));
    }
}
