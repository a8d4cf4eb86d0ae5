//! Data-driven device profiles.
//!
//! Everything that differs between eyewear models lives in a [`DeviceProfile`]
//! record. The solver only ever sees the resolved record, never a device id.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::CalibrationError;

/// Per-device display and optics constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceProfile {
    /// Device identifier used as the lookup key.
    pub id: String,
    /// Smallest practical shape scale, in [0, 1].
    pub min_scale_hint: f64,
    /// Largest shape scale before edge distortion kicks in, in [0, 1].
    pub max_scale_hint: f64,
    /// Horizontal stretch introduced by the optics; 1.0 for none.
    pub aspect_correction: f64,
    /// Whether entering stereo joins both displays into one stretched surface.
    pub stereo_stretched: bool,
    /// Nominal horizontal field of view of one eye's display, in degrees.
    pub horizontal_fov_deg: f64,
    /// Translation of the default left camera-to-eye transform, in millimetres.
    pub left_eye_translation_mm: [f64; 3],
    /// Translation of the default right camera-to-eye transform, in millimetres.
    pub right_eye_translation_mm: [f64; 3],
    /// Near clip plane, in millimetres.
    pub near_clip_mm: f64,
    /// Far clip plane, in millimetres.
    pub far_clip_mm: f64,
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self {
            id: "generic-monocular".to_string(),
            min_scale_hint: 0.2,
            max_scale_hint: 0.8,
            aspect_correction: 1.0,
            stereo_stretched: false,
            horizontal_fov_deg: 30.0,
            // camera sits between the eyes, x right
            left_eye_translation_mm: [31.5, 0.0, 0.0],
            right_eye_translation_mm: [-31.5, 0.0, 0.0],
            near_clip_mm: 10.0,
            far_clip_mm: 5000.0,
        }
    }
}

impl DeviceProfile {
    /// Check that the constants describe a usable device.
    pub fn validate(&self) -> Result<(), CalibrationError> {
        let fail = |msg: String| Err(CalibrationError::InvalidConfiguration(msg));

        if self.id.is_empty() {
            return fail("device profile id is empty".to_string());
        }
        for (name, v) in [
            ("min_scale_hint", self.min_scale_hint),
            ("max_scale_hint", self.max_scale_hint),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return fail(format!("{}: {name} {v} outside [0, 1]", self.id));
            }
        }
        if self.min_scale_hint > self.max_scale_hint {
            return fail(format!(
                "{}: min_scale_hint {} exceeds max_scale_hint {}",
                self.id, self.min_scale_hint, self.max_scale_hint
            ));
        }
        if !(self.aspect_correction.is_finite() && self.aspect_correction > 0.0) {
            return fail(format!(
                "{}: aspect_correction must be positive, got {}",
                self.id, self.aspect_correction
            ));
        }
        if !(self.horizontal_fov_deg > 0.0 && self.horizontal_fov_deg < 180.0) {
            return fail(format!(
                "{}: horizontal_fov_deg {} outside (0, 180)",
                self.id, self.horizontal_fov_deg
            ));
        }
        if self
            .left_eye_translation_mm
            .iter()
            .chain(self.right_eye_translation_mm.iter())
            .any(|v| !v.is_finite())
        {
            return fail(format!("{}: eye translations must be finite", self.id));
        }
        if !(self.near_clip_mm > 0.0 && self.far_clip_mm > self.near_clip_mm)
            || !self.far_clip_mm.is_finite()
        {
            return fail(format!(
                "{}: clip planes need 0 < near < far, got near {} far {}",
                self.id, self.near_clip_mm, self.far_clip_mm
            ));
        }
        Ok(())
    }
}

/// Lookup table from device identifier to [`DeviceProfile`].
#[derive(Debug, Clone, Default)]
pub struct DeviceProfileTable {
    profiles: BTreeMap<String, DeviceProfile>,
}

impl DeviceProfileTable {
    /// Table holding the built-in generic profiles.
    pub fn builtin() -> Self {
        let monocular = DeviceProfile::default();
        let stereo = DeviceProfile {
            id: "generic-stereo".to_string(),
            ..DeviceProfile::default()
        };
        let stretched = DeviceProfile {
            id: "generic-stereo-stretched".to_string(),
            min_scale_hint: 0.3,
            max_scale_hint: 0.9,
            stereo_stretched: true,
            horizontal_fov_deg: 23.0,
            ..DeviceProfile::default()
        };

        let profiles = [monocular, stereo, stretched]
            .into_iter()
            .map(|p| (p.id.clone(), p))
            .collect();
        Self { profiles }
    }

    /// Built-in profiles extended (or overridden) by a JSON array of profiles.
    pub fn from_json_str(json: &str) -> Result<Self, CalibrationError> {
        let loaded: Vec<DeviceProfile> = serde_json::from_str(json)
            .map_err(|e| CalibrationError::InvalidConfiguration(format!("device profiles: {e}")))?;

        let mut table = Self::builtin();
        for profile in loaded {
            table.insert(profile)?;
        }
        Ok(table)
    }

    /// Same as [`DeviceProfileTable::from_json_str`], reading from a file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, CalibrationError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            CalibrationError::InvalidConfiguration(format!("{}: {e}", path.display()))
        })?;
        Self::from_json_str(&json)
    }

    /// Add a profile after validating it, replacing any profile with the same id.
    pub fn insert(&mut self, profile: DeviceProfile) -> Result<(), CalibrationError> {
        profile.validate()?;
        if let Some(previous) = self.profiles.insert(profile.id.clone(), profile) {
            log::debug!("device profile {} replaced", previous.id);
        }
        Ok(())
    }

    /// Look up a profile by device identifier.
    pub fn resolve(&self, id: &str) -> Result<&DeviceProfile, CalibrationError> {
        self.profiles
            .get(id)
            .ok_or_else(|| CalibrationError::InvalidConfiguration(format!("unknown device {id}")))
    }

    /// Known device identifiers, sorted.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }
}
