use argh::FromArgs;
use rand::{rngs::StdRng, SeedableRng};
use seethru::calib::{
    synthetic::{default_shape_schedule, NoiseModel, SyntheticRig},
    CalibrationSession, DeviceProfileTable, Eye, EyeParameters,
};

/// Simulates a user calibrating both eyes and prints the stereo result as JSON
#[derive(Debug, FromArgs)]
struct Args {
    /// number of alignments per eye
    #[argh(option, short = 'n', default = "8")]
    readings: usize,

    /// standard deviation of the user's alignment error, in NDC
    #[argh(option, short = 's', default = "0.003")]
    noise: f64,

    /// device profile identifier
    #[argh(option, short = 'd', default = "String::from(\"generic-stereo\")")]
    device: String,

    /// JSON file with additional device profiles
    #[argh(option, short = 'p')]
    profiles: Option<String>,

    /// rendering surface width in pixels
    #[argh(option, default = "1920")]
    width: usize,

    /// rendering surface height in pixels
    #[argh(option, default = "1080")]
    height: usize,

    /// target width, in millimetres or metres
    #[argh(option, default = "80.0")]
    target_width: f64,

    /// target height, in millimetres or metres
    #[argh(option, default = "50.0")]
    target_height: f64,

    /// random seed of the simulated user
    #[argh(option, default = "42")]
    seed: u64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args: Args = argh::from_env();

    let table = match &args.profiles {
        Some(path) => DeviceProfileTable::from_json_file(path)?,
        None => DeviceProfileTable::builtin(),
    };
    let mut session = CalibrationSession::new(table.resolve(&args.device)?.clone())?;
    session.init(args.width, args.height, args.target_width, args.target_height)?;

    // the simulated user's eyes deviate a little from the device defaults
    let unit = session.config().map(|c| c.unit).ok_or("session not initialized")?;
    let user_eye = |eye: Eye, sign: f64| -> Result<EyeParameters, Box<dyn std::error::Error>> {
        let mut p = session.default_calibration(eye)?.parameters;
        p.focal_scale = 1.02;
        p.principal_point = [sign * 0.01, 0.004];
        p.translation[0] += sign * unit.convert_millimeters(1.5);
        p.translation[1] += unit.convert_millimeters(2.0);
        p.translation[2] -= unit.convert_millimeters(3.0);
        p.roll = sign * 0.3f64.to_radians();
        Ok(p)
    };
    let rig = SyntheticRig::new(&session, user_eye(Eye::Left, 1.0)?, user_eye(Eye::Right, -1.0)?)?;

    let schedule = default_shape_schedule(
        args.readings,
        session.get_min_scale_hint()?,
        session.get_max_scale_hint()?,
    );
    let noise = NoiseModel::uniform(args.noise);
    let mut rng = StdRng::seed_from_u64(args.seed);
    let left = rig.noisy_readings(Eye::Left, &schedule, &noise, &mut rng)?;
    let right = rig.noisy_readings(Eye::Right, &schedule, &noise, &mut rng)?;

    let stereo = session.get_projection_matrices(&left, &right)?;
    log::info!("consistency grade: {:?}", stereo.grade);

    println!("{}", serde_json::to_string_pretty(&stereo)?);

    Ok(())
}
