use std::io::Write;

use approx::assert_relative_eq;
use seethru_calib::{
    CalibrationError, CalibrationSession, DeviceProfile, DeviceProfileTable, Eye, LengthUnit,
    SessionState, Viewport,
};

#[test]
fn init_succeeds_once() -> Result<(), CalibrationError> {
    let mut session = CalibrationSession::new(DeviceProfile::default())?;
    session.init(1920, 1080, 80.0, 50.0)?;
    assert_eq!(session.state(), SessionState::Ready);

    assert_eq!(
        session.init(640, 480, 10.0, 10.0),
        Err(CalibrationError::AlreadyInitialized)
    );
    let config = session.config().expect("initialized");
    assert_eq!((config.surface_width, config.surface_height), (1920, 1080));
    assert_eq!(config.unit, LengthUnit::Millimeters);
    Ok(())
}

#[test]
fn invalid_init_leaves_session_uninitialized() -> Result<(), CalibrationError> {
    let mut session = CalibrationSession::new(DeviceProfile::default())?;

    for (w, h, tw, th) in [
        (0, 1080, 80.0, 50.0),
        (1920, 0, 80.0, 50.0),
        (1920, 1080, 0.0, 50.0),
        (1920, 1080, 80.0, -1.0),
        (1920, 1080, f64::NAN, 50.0),
    ] {
        assert!(matches!(
            session.init(w, h, tw, th),
            Err(CalibrationError::InvalidConfiguration(_))
        ));
        assert_eq!(session.state(), SessionState::Uninitialized);
        assert_eq!(
            session.get_max_scale_hint(),
            Err(CalibrationError::NotInitialized)
        );
    }

    // a valid init still works afterwards
    session.init(1920, 1080, 80.0, 50.0)?;
    assert_eq!(session.state(), SessionState::Ready);
    Ok(())
}

#[test]
fn hints_are_ordered_for_builtin_devices() -> Result<(), CalibrationError> {
    let table = DeviceProfileTable::builtin();
    for id in table.ids() {
        let mut session = CalibrationSession::new(table.resolve(id)?.clone())?;
        session.init(1920, 1080, 80.0, 50.0)?;
        let min = session.get_min_scale_hint()?;
        let max = session.get_max_scale_hint()?;
        assert!(0.0 <= min && min <= max && max <= 1.0, "{id}: {min} {max}");
    }
    Ok(())
}

#[test]
fn drawing_aspect_ratio_uses_aspect_correction() -> Result<(), CalibrationError> {
    let profile = DeviceProfile {
        id: "squeezed".to_string(),
        aspect_correction: 1.25,
        ..DeviceProfile::default()
    };
    let mut session = CalibrationSession::new(profile)?;
    session.init(1920, 1080, 80.0, 80.0)?;

    assert_relative_eq!(
        session.get_drawing_aspect_ratio(1920, 1080)?,
        1080.0 / 1920.0 / 1.25,
        epsilon = 1e-12
    );
    assert_relative_eq!(
        session.get_drawing_aspect_ratio(1000, 1000)?,
        0.8,
        epsilon = 1e-12
    );
    Ok(())
}

#[test]
fn stereo_stretched_devices_split_the_surface() -> Result<(), CalibrationError> {
    let table = DeviceProfileTable::builtin();
    let mut session = CalibrationSession::new(table.resolve("generic-stereo-stretched")?.clone())?;
    session.init(3841, 1080, 80.0, 50.0)?;

    assert!(session.is_stereo_stretched()?);
    let left = session.eye_viewport(Eye::Left)?;
    let right = session.eye_viewport(Eye::Right)?;
    assert_eq!(
        left,
        Viewport {
            x: 0,
            y: 0,
            width: 1920,
            height: 1080
        }
    );
    assert_eq!(right.x, 1920);
    assert_eq!(left.width + right.width, 3841);

    let mut mono = CalibrationSession::new(table.resolve("generic-stereo")?.clone())?;
    mono.init(1920, 1080, 80.0, 50.0)?;
    assert!(!mono.is_stereo_stretched()?);
    assert_eq!(mono.eye_viewport(Eye::Right)?.width, 1920);
    Ok(())
}

#[test]
fn default_calibration_comes_from_profile() -> Result<(), CalibrationError> {
    let mut session = CalibrationSession::new(DeviceProfile::default())?;
    session.init_with_unit(1920, 1080, 80.0, 50.0, LengthUnit::Millimeters)?;

    let left = session.default_calibration(Eye::Left)?;
    let right = session.default_calibration(Eye::Right)?;
    assert_eq!(left.parameters.translation, [31.5, 0.0, 0.0]);
    assert_eq!(right.parameters.translation, [-31.5, 0.0, 0.0]);
    assert_eq!(left.parameters.focal_scale, 1.0);
    assert_eq!(left.camera_to_eye_pose[0][3], 31.5);
    assert_eq!(left.intrinsics.near, 10.0);
    Ok(())
}

#[test]
fn profiles_load_from_file() -> Result<(), Box<dyn std::error::Error>> {
    let custom = DeviceProfile {
        id: "field-unit".to_string(),
        min_scale_hint: 0.25,
        max_scale_hint: 0.7,
        horizontal_fov_deg: 45.0,
        ..DeviceProfile::default()
    };
    let mut file = tempfile::NamedTempFile::new()?;
    file.write_all(serde_json::to_string_pretty(&vec![custom.clone()])?.as_bytes())?;

    let table = DeviceProfileTable::from_json_file(file.path())?;
    assert_eq!(table.resolve("field-unit")?, &custom);

    let mut session = CalibrationSession::new(table.resolve("field-unit")?.clone())?;
    session.init(1280, 720, 80.0, 50.0)?;
    assert_eq!(session.get_min_scale_hint()?, 0.25);
    assert_eq!(session.profile().id, "field-unit");

    assert!(DeviceProfileTable::from_json_file(file.path().with_extension("missing")).is_err());
    Ok(())
}

#[test]
fn invalid_profiles_are_rejected_on_load() -> Result<(), Box<dyn std::error::Error>> {
    let bad = DeviceProfile {
        id: "broken".to_string(),
        min_scale_hint: 0.9,
        max_scale_hint: 0.2,
        ..DeviceProfile::default()
    };
    let json = serde_json::to_string(&vec![bad])?;
    assert!(matches!(
        DeviceProfileTable::from_json_str(&json),
        Err(CalibrationError::InvalidConfiguration(_))
    ));
    Ok(())
}
