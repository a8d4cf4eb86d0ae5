use rand::{rngs::StdRng, SeedableRng};
use seethru_calib::synthetic::{default_shape_schedule, NoiseModel, SyntheticRig};
use seethru_calib::{
    CalibrationError, CalibrationReading, CalibrationSession, ConsistencyGrade, DeviceProfile,
    Eye, EyeParameters, EyeStatus, SolverParams,
};

fn session() -> Result<CalibrationSession, CalibrationError> {
    let mut session = CalibrationSession::new(DeviceProfile::default())?;
    session.init(1280, 720, 80.0, 50.0)?;
    Ok(session)
}

fn left_truth() -> EyeParameters {
    EyeParameters {
        focal_scale: 1.0,
        principal_point: [0.01, 0.005],
        translation: [31.5, 2.0, -3.0],
        roll: 0.5f64.to_radians(),
    }
}

fn mirrored(p: &EyeParameters) -> EyeParameters {
    EyeParameters {
        focal_scale: p.focal_scale,
        principal_point: [-p.principal_point[0], p.principal_point[1]],
        translation: [-p.translation[0], p.translation[1], p.translation[2]],
        roll: -p.roll,
    }
}

fn symmetric_rig(session: &CalibrationSession) -> Result<SyntheticRig, CalibrationError> {
    SyntheticRig::new(session, left_truth(), mirrored(&left_truth()))
}

fn noisy(
    rig: &SyntheticRig,
    eye: Eye,
    sigma: f64,
    seed: u64,
) -> Result<Vec<CalibrationReading>, CalibrationError> {
    rig.noisy_readings(
        eye,
        &default_shape_schedule(8, 0.2, 0.8),
        &NoiseModel::uniform(sigma),
        &mut StdRng::seed_from_u64(seed),
    )
}

#[test]
fn symmetric_clean_data_grades_good() -> Result<(), CalibrationError> {
    let session = session()?;
    let rig = symmetric_rig(&session)?;
    let schedule = default_shape_schedule(8, 0.2, 0.8);

    let stereo = session.get_projection_matrices(
        &rig.readings(Eye::Left, &schedule)?,
        &rig.readings(Eye::Right, &schedule)?,
    )?;

    assert_eq!(stereo.grade, ConsistencyGrade::Good);
    assert!(matches!(stereo.left.status, EyeStatus::Fitted(_)));
    assert!(matches!(stereo.right.status, EyeStatus::Fitted(_)));

    let metrics = stereo.metrics.expect("graded pair has metrics");
    assert!(metrics.left_split_half.is_some());
    assert!(metrics.right_split_half.is_some());
    assert!(metrics.score < 0.1);

    let right = stereo.calibration(Eye::Right).parameters;
    assert!((right.translation[0] + 31.5).abs() < 1e-2);
    Ok(())
}

#[test]
fn missing_eye_returns_defaults() -> Result<(), CalibrationError> {
    let session = session()?;
    let rig = symmetric_rig(&session)?;
    let left = rig.readings(Eye::Left, &default_shape_schedule(8, 0.2, 0.8))?;

    let stereo = session.get_projection_matrices(&left, &[])?;
    assert_eq!(stereo.grade, ConsistencyGrade::None);
    assert!(stereo.metrics.is_none());
    // the left eye is not fitted when the right one has nothing to compare with
    assert_eq!(stereo.left.status, EyeStatus::Skipped);
    assert_eq!(stereo.right.status, EyeStatus::NoReadings);
    for eye in [Eye::Left, Eye::Right] {
        assert_eq!(*stereo.calibration(eye), session.default_calibration(eye)?);
    }
    Ok(())
}

#[test]
fn failed_eye_returns_defaults() -> Result<(), CalibrationError> {
    let session = session()?;
    let rig = symmetric_rig(&session)?;
    let left = rig.readings(Eye::Left, &default_shape_schedule(8, 0.2, 0.8))?;
    let right = vec![rig.reading(Eye::Right, 0.5, [0.0, 0.0])?; 4];

    let stereo = session.get_projection_matrices(&left, &right)?;
    assert_eq!(stereo.grade, ConsistencyGrade::None);
    assert!(matches!(
        stereo.right.status,
        EyeStatus::Failed(CalibrationError::IllConditioned { .. })
    ));
    assert_eq!(
        *stereo.calibration(Eye::Left),
        session.default_calibration(Eye::Left)?
    );
    Ok(())
}

#[test]
fn diverged_eye_returns_defaults() -> Result<(), CalibrationError> {
    let session = session()?;
    let rig = symmetric_rig(&session)?;
    let left = rig.readings(Eye::Left, &default_shape_schedule(8, 0.2, 0.8))?;
    // targets behind the camera cannot be seen by the right eye
    let right: Vec<CalibrationReading> = [-250.0, -350.0, -450.0]
        .into_iter()
        .map(|z| {
            let pose = [
                [1.0, 0.0, 0.0, 0.0],
                [0.0, 1.0, 0.0, 0.0],
                [0.0, 0.0, 1.0, z],
            ];
            CalibrationReading::new(Eye::Right, pose, 0.4)
        })
        .collect();

    let stereo = session.get_projection_matrices(&left, &right)?;
    assert_eq!(stereo.grade, ConsistencyGrade::None);
    assert!(stereo.metrics.is_none());
    assert!(matches!(stereo.left.status, EyeStatus::Discarded(_)));
    assert!(matches!(
        stereo.right.status,
        EyeStatus::Failed(CalibrationError::SolverDivergence(_))
    ));
    for eye in [Eye::Left, Eye::Right] {
        assert_eq!(*stereo.calibration(eye), session.default_calibration(eye)?);
    }
    Ok(())
}

#[test]
fn unconverged_fits_are_not_graded() -> Result<(), CalibrationError> {
    let mut session =
        CalibrationSession::new(DeviceProfile::default())?.with_solver_params(SolverParams {
            max_iters: 1,
            ..Default::default()
        })?;
    session.init(1280, 720, 80.0, 50.0)?;
    let rig = symmetric_rig(&session)?;

    let stereo = session.get_projection_matrices(
        &noisy(&rig, Eye::Left, 0.003, 1)?,
        &noisy(&rig, Eye::Right, 0.003, 2)?,
    )?;
    assert_eq!(stereo.grade, ConsistencyGrade::None);
    for outcome in [&stereo.left, &stereo.right] {
        assert!(matches!(
            outcome.status,
            EyeStatus::Failed(CalibrationError::SolverDivergence(_))
        ));
    }
    Ok(())
}

#[test]
fn readings_for_the_wrong_eye_fail_that_eye() -> Result<(), CalibrationError> {
    let session = session()?;
    let rig = symmetric_rig(&session)?;
    let schedule = default_shape_schedule(8, 0.2, 0.8);
    let left = rig.readings(Eye::Left, &schedule)?;

    let stereo = session.get_projection_matrices(&left, &left)?;
    assert_eq!(stereo.grade, ConsistencyGrade::None);
    assert!(matches!(
        stereo.right.status,
        EyeStatus::Failed(CalibrationError::InvalidReading { index: 0, .. })
    ));
    Ok(())
}

#[test]
fn noisy_eye_lowers_the_grade() -> Result<(), CalibrationError> {
    let session = session()?;
    let rig = symmetric_rig(&session)?;

    let clean = session.get_projection_matrices(
        &noisy(&rig, Eye::Left, 0.0, 1)?,
        &noisy(&rig, Eye::Right, 0.0, 2)?,
    )?;
    let sloppy = session.get_projection_matrices(
        &noisy(&rig, Eye::Left, 0.0, 1)?,
        &noisy(&rig, Eye::Right, 0.05, 2)?,
    )?;

    assert_eq!(clean.grade, ConsistencyGrade::Good);
    assert!(sloppy.grade < clean.grade, "got {:?}", sloppy.grade);
    Ok(())
}

#[test]
fn grade_never_improves_with_more_noise() -> Result<(), CalibrationError> {
    let session = session()?;
    let rig = symmetric_rig(&session)?;

    let grades = [0.0, 0.003, 0.01, 0.03, 0.1]
        .into_iter()
        .map(|sigma| {
            let stereo = session.get_projection_matrices(
                &noisy(&rig, Eye::Left, sigma, 42)?,
                &noisy(&rig, Eye::Right, sigma, 43)?,
            )?;
            Ok(stereo.grade)
        })
        .collect::<Result<Vec<_>, CalibrationError>>()?;

    assert_eq!(grades[0], ConsistencyGrade::Good);
    assert!(grades[4] <= ConsistencyGrade::Bad, "grades {grades:?}");
    assert!(grades.windows(2).all(|w| w[1] <= w[0]), "grades {grades:?}");
    Ok(())
}

#[test]
fn asymmetric_eyes_are_flagged() -> Result<(), CalibrationError> {
    let session = session()?;
    let mut right = mirrored(&left_truth());
    // right eye sits 30mm deeper than the left
    right.translation[2] += 30.0;
    let rig = SyntheticRig::new(&session, left_truth(), right)?;
    let schedule = default_shape_schedule(8, 0.2, 0.8);

    let stereo = session.get_projection_matrices(
        &rig.readings(Eye::Left, &schedule)?,
        &rig.readings(Eye::Right, &schedule)?,
    )?;

    let metrics = stereo.metrics.expect("both eyes fitted");
    assert!(metrics.left_residual < 0.1 && metrics.right_residual < 0.1);
    assert!(metrics.symmetry > 3.0);
    assert!(stereo.grade < ConsistencyGrade::Good);
    Ok(())
}

#[test]
fn stereo_requires_init() -> Result<(), CalibrationError> {
    let session = CalibrationSession::new(DeviceProfile::default())?;
    assert_eq!(
        session.get_projection_matrices(&[], &[]),
        Err(CalibrationError::NotInitialized)
    );
    Ok(())
}
