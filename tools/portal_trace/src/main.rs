use std::env;
use std::path::{Path, PathBuf};

use aperture_trace::accel::LinearAccel;
use aperture_trace::config::{SceneDescription, TraceSettings};
use aperture_trace::jobs::TraceJobs;
use aperture_trace::tracer::{TraceBudget, Tracer};
use tracing::info;

const USAGE: &str = "Usage: portal_trace --scene <level.toml> [--out <image.png>] [--settings <trace.toml>] [--width <px>] [--height <px>] [--threads <n>]";

struct Options {
    scene: PathBuf,
    out: PathBuf,
    settings: Option<PathBuf>,
    width: Option<u32>,
    height: Option<u32>,
    threads: Option<usize>,
}

fn main() {
    let _ = tracing_subscriber::fmt().with_target(false).try_init();

    let options = match parse_args(env::args().skip(1)) {
        Ok(Some(options)) => options,
        Ok(None) => {
            println!("{USAGE}");
            return;
        }
        Err(err) => {
            eprintln!("{err}");
            eprintln!("{USAGE}");
            std::process::exit(2);
        }
    };

    if let Err(err) = run(&options) {
        eprintln!("portal_trace error: {err}");
        std::process::exit(1);
    }
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Option<Options>, String> {
    let mut scene = None;
    let mut out = PathBuf::from("portal_trace.png");
    let mut settings = None;
    let mut width = None;
    let mut height = None;
    let mut threads = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--scene" => scene = Some(PathBuf::from(value_for(&mut args, "--scene")?)),
            "--out" => out = PathBuf::from(value_for(&mut args, "--out")?),
            "--settings" => settings = Some(PathBuf::from(value_for(&mut args, "--settings")?)),
            "--width" => width = Some(parse_number(&value_for(&mut args, "--width")?)?),
            "--height" => height = Some(parse_number(&value_for(&mut args, "--height")?)?),
            "--threads" => threads = Some(parse_number(&value_for(&mut args, "--threads")?)?),
            "--help" | "-h" => return Ok(None),
            other => return Err(format!("unknown argument: {other}")),
        }
    }

    let scene = scene.ok_or_else(|| "--scene is required".to_string())?;
    Ok(Some(Options {
        scene,
        out,
        settings,
        width,
        height,
        threads,
    }))
}

fn value_for(args: &mut impl Iterator<Item = String>, flag: &str) -> Result<String, String> {
    args.next().ok_or_else(|| format!("{flag} expects an argument"))
}

fn parse_number<T: std::str::FromStr>(value: &str) -> Result<T, String>
where
    T::Err: std::fmt::Display,
{
    value
        .parse::<T>()
        .map_err(|err| format!("invalid number '{value}': {err}"))
}

fn run(options: &Options) -> Result<(), String> {
    let mut settings = match &options.settings {
        Some(path) => TraceSettings::load(path)
            .map_err(|err| format!("failed to load {}: {err}", path.display()))?,
        None => TraceSettings::default(),
    };
    if let Some(width) = options.width {
        settings.width = width;
    }
    if let Some(height) = options.height {
        settings.height = height;
    }
    if let Some(threads) = options.threads {
        settings.worker_threads = threads;
    }
    let settings = settings.sanitize();

    let description = SceneDescription::load(&options.scene)
        .map_err(|err| format!("{}: {err}", options.scene.display()))?;
    let scene = description.build_scene(&settings);
    let camera = description.camera(&settings);
    let accel = LinearAccel::build(&scene);
    let tracer = Tracer::new(&scene, &accel, &settings);

    let jobs = TraceJobs::new(Some(settings.worker_threads))
        .map_err(|err| format!("failed to start worker pool: {err}"))?;
    let image = jobs.render(&tracer, &camera, TraceBudget::from_settings(&settings));

    save(&image, &options.out)?;
    info!("Wrote {}", options.out.display());
    Ok(())
}

fn save(image: &image::RgbImage, path: &Path) -> Result<(), String> {
    image
        .save(path)
        .map_err(|err| format!("failed to write {}: {err}", path.display()))
}
