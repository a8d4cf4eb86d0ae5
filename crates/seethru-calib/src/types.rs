//! Value types exchanged with the calibration flow.

use serde::{Deserialize, Serialize};

/// Which eye a reading or calibration belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Eye {
    /// Left eye.
    Left,
    /// Right eye.
    Right,
}

/// One user-confirmed alignment between the tracked target and the on-screen shape.
///
/// The pose is the camera-from-target transform reported by the tracker at the
/// moment the user confirmed the alignment, as a row-major 3x4 `[R | t]` in the
/// session's length unit. The shape is described in normalized display
/// coordinates: x and y in [-1, 1], y pointing down, origin at the centre.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationReading {
    /// Eye the shape was shown to.
    pub eye: Eye,
    /// Camera-from-target pose.
    pub target_pose: [[f64; 4]; 3],
    /// Horizontal half extent of the shape, as a fraction of the drawable range.
    pub shape_scale: f64,
    /// Centre of the shape; the display centre for scale-only shapes.
    #[serde(default)]
    pub shape_center: [f64; 2],
}

impl CalibrationReading {
    /// A reading of a shape drawn at the display centre.
    pub fn new(eye: Eye, target_pose: [[f64; 4]; 3], shape_scale: f64) -> Self {
        Self {
            eye,
            target_pose,
            shape_scale,
            shape_center: [0.0, 0.0],
        }
    }

    /// Set the shape centre.
    pub fn with_center(mut self, center: [f64; 2]) -> Self {
        self.shape_center = center;
        self
    }
}

/// How consistent the supplied calibration data is.
///
/// Ordered from worst to best: `None < VeryBad < Bad < Ok < Good`. `None` means
/// no assessment was possible, e.g. one eye had no readings or failed to fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ConsistencyGrade {
    /// No consistency data available.
    None,
    /// The user has likely not understood the calibration procedure.
    VeryBad,
    /// Unlikely to give a good experience.
    Bad,
    /// Likely usable; the user should review the result and consider repeating.
    Ok,
    /// Consistent data; a strong indicator of a good calibration.
    Good,
}

/// Pixel rectangle of the rendering surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    /// Left edge in pixels.
    pub x: usize,
    /// Top edge in pixels.
    pub y: usize,
    /// Width in pixels.
    pub width: usize,
    /// Height in pixels.
    pub height: usize,
}
