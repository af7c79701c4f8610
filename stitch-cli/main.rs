use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use argh::FromArgs;
use stitch_cli::{ImageSource, MergeSession, MergeState};
use stitch_core::{DetectorKind, RasterImage, SessionConfig};

/// Feature-based image stitching
#[derive(Debug, FromArgs)]
struct Args {
    /// output image path
    #[argh(option, short = 'o', default = "PathBuf::from(\"stitched.png\")")]
    output: PathBuf,

    /// feature detector: sift or orb
    #[argh(option, short = 'd')]
    detector: Option<DetectorKind>,

    /// lowe ratio test threshold in (0, 1)
    #[argh(option, short = 'r')]
    ratio: Option<f32>,

    /// mean brightness below which an image is enhanced as a night shot
    #[argh(option)]
    night_threshold: Option<f64>,

    /// longest side images are downscaled to on load
    #[argh(option)]
    max_dimension: Option<u32>,

    /// configuration file (.json or .toml)
    #[argh(option, short = 'c')]
    config: Option<PathBuf>,

    #[argh(subcommand)]
    command: Command,
}

#[derive(Debug, FromArgs)]
#[argh(subcommand)]
enum Command {
    Panorama(PanoramaArgs),
    Blend(BlendArgs),
    SideBySide(SideBySideArgs),
    Matches(MatchesArgs),
    Preprocess(PreprocessArgs),
    Tune(TuneArgs),
    Enhance(EnhanceArgs),
    Config(ConfigArgs),
}

/// merge all images into one panorama
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "panorama")]
struct PanoramaArgs {
    /// input images, merged left to right
    #[argh(positional)]
    images: Vec<PathBuf>,
}

/// alpha-blend the first two images, aligned by features when possible
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "blend")]
struct BlendArgs {
    /// weight of the first image in [0, 1]
    #[argh(option, short = 'a')]
    alpha: Option<f32>,

    /// input images
    #[argh(positional)]
    images: Vec<PathBuf>,
}

/// lay images out left to right with blended seams
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "side-by-side")]
struct SideBySideArgs {
    /// input images
    #[argh(positional)]
    images: Vec<PathBuf>,
}

/// draw feature matches between two images
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "matches")]
struct MatchesArgs {
    /// first input image
    #[argh(positional)]
    first: PathBuf,

    /// second input image
    #[argh(positional)]
    second: PathBuf,
}

/// show an image next to its enhanced luminance
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "preprocess")]
struct PreprocessArgs {
    /// input image
    #[argh(positional)]
    image: PathBuf,
}

/// measure images and suggest enhancement parameters
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "tune")]
struct TuneArgs {
    /// input images
    #[argh(positional)]
    images: Vec<PathBuf>,
}

/// boost local contrast, sharpness and saturation of a merged image
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "enhance")]
struct EnhanceArgs {
    /// input image
    #[argh(positional)]
    image: PathBuf,
}

/// print the effective configuration
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "config")]
struct ConfigArgs {}

#[cfg(feature = "serde")]
fn load_config(path: &Path) -> Result<SessionConfig, Box<dyn std::error::Error>> {
    SessionConfig::load(path)
}

#[cfg(not(feature = "serde"))]
fn load_config(path: &Path) -> Result<SessionConfig, Box<dyn std::error::Error>> {
    Err(format!("cannot read {}: built without the serde feature", path.display()).into())
}

fn build_config(args: &Args) -> Result<SessionConfig, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => SessionConfig::default(),
    };
    if let Some(detector) = args.detector {
        config.detector = detector;
    }
    if let Some(ratio) = args.ratio {
        config.match_ratio = ratio;
    }
    if let Some(threshold) = args.night_threshold {
        config.night_threshold = threshold;
    }
    if let Some(max_dimension) = args.max_dimension {
        config.max_dimension = max_dimension;
    }
    config.validate()?;
    Ok(config)
}

fn load_session(config: SessionConfig, paths: &[PathBuf]) -> Result<MergeSession, Box<dyn std::error::Error>> {
    let mut session = stitch_cli::create_session(config)?;
    for path in paths {
        if !stitch_cli::add_image(&mut session, path.as_path()) {
            eprintln!("Skipping unreadable image {}", path.display());
        }
    }
    Ok(session)
}

fn save(result: Option<RasterImage>, output: &Path) -> ExitCode {
    let Some(img) = result else {
        eprintln!("No image was produced");
        return ExitCode::FAILURE;
    };
    match img.save(output) {
        Ok(()) => {
            println!("Saved {}x{} result to {}", img.width(), img.height(), output.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Failed to save {}: {}", output.display(), e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(feature = "serde")]
fn print_config(config: &SessionConfig) {
    println!("{}", config.summary());
    match config.to_json() {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Failed to serialise configuration: {}", e),
    }
}

#[cfg(not(feature = "serde"))]
fn print_config(config: &SessionConfig) {
    println!("{}", config.summary());
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args: Args = argh::from_env();

    let config = match build_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };
    log::debug!("{}", config.summary());

    let t0 = Instant::now();
    let code = match run(&args, config) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    };
    log::info!("Finished in {:.2?}", t0.elapsed());
    code
}

fn run(args: &Args, config: SessionConfig) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let code = match &args.command {
        Command::Panorama(cmd) => {
            let session = load_session(config, &cmd.images)?;
            let report = stitch_cli::merge_panorama_report(&session);
            for (idx, reason) in &report.skipped {
                eprintln!("Image {} was not merged: {}", idx, reason);
            }
            if report.state == MergeState::Failed {
                if let Some(e) = &report.error {
                    eprintln!("Panorama failed: {}", e);
                }
            }
            save(report.panorama, &args.output)
        }
        Command::Blend(cmd) => {
            let alpha = cmd.alpha.unwrap_or(config.blend_alpha);
            let session = load_session(config, &cmd.images)?;
            match stitch_cli::merge_aligned_blend(&session, alpha) {
                Ok(img) => save(Some(img), &args.output),
                Err(e) => {
                    eprintln!("Blend failed: {}", e);
                    ExitCode::FAILURE
                }
            }
        }
        Command::SideBySide(cmd) => {
            let session = load_session(config, &cmd.images)?;
            save(stitch_cli::merge_side_by_side(&session), &args.output)
        }
        Command::Matches(cmd) => {
            let session = load_session(config, &[cmd.first.clone(), cmd.second.clone()])?;
            save(stitch_cli::debug_matches(&session, 0, 1), &args.output)
        }
        Command::Preprocess(cmd) => {
            let session = load_session(config, std::slice::from_ref(&cmd.image))?;
            save(stitch_cli::debug_preprocessed(&session, 0), &args.output)
        }
        Command::Tune(cmd) => {
            let session = load_session(config.clone(), &cmd.images)?;
            let report = stitch_cli::tune_preprocessing(session.images(), &config);
            println!("{}", report.message);
            if report.success {
                let s = &report.statistics;
                println!(
                    "brightness {:.1}, contrast {:.2}, noise {:.1}, features {:.0}",
                    s.avg_brightness, s.avg_contrast, s.avg_noise, s.avg_features
                );
                for rec in &report.recommendations {
                    println!("- {}", rec);
                }
                print_config(&report.config);
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Command::Enhance(cmd) => {
            let img = ImageSource::from(cmd.image.as_path()).load()?;
            save(Some(stitch_cli::enhance_panorama(&img)), &args.output)
        }
        Command::Config(_) => {
            print_config(&config);
            ExitCode::SUCCESS
        }
    };
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::from_args(&["stitch"], args).unwrap()
    }

    #[test]
    fn test_overrides_are_applied() {
        let args = parse(&["--ratio", "0.6", "--max-dimension", "640", "config"]);
        assert!(matches!(args.command, Command::Config(_)));
        let config = build_config(&args).unwrap();
        assert_eq!(config.match_ratio, 0.6);
        assert_eq!(config.max_dimension, 640);
    }

    #[test]
    fn test_invalid_override_is_rejected() {
        let args = parse(&["--ratio", "1.5", "config"]);
        assert!(build_config(&args).is_err());
    }

    #[test]
    fn test_enhance_subcommand() {
        let args = parse(&["-o", "out.png", "enhance", "pano.png"]);
        assert_eq!(args.output, PathBuf::from("out.png"));
        match args.command {
            Command::Enhance(cmd) => assert_eq!(cmd.image, PathBuf::from("pano.png")),
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_merge_subcommands_take_image_lists() {
        let args = parse(&["blend", "-a", "0.3", "a.png", "b.png"]);
        match args.command {
            Command::Blend(cmd) => {
                assert_eq!(cmd.alpha, Some(0.3));
                assert_eq!(cmd.images.len(), 2);
            }
            other => panic!("unexpected command {:?}", other),
        }
        assert!(matches!(parse(&["side-by-side", "a.png"]).command, Command::SideBySide(_)));
    }
}
