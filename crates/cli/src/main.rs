mod manifest;

use std::path::{Path, PathBuf};
use std::process;

use clap::Parser;

use timelapse_core::encoding::domain::encoder_sink::{Codec, Container};
use timelapse_core::encoding::infrastructure::ffmpeg_encoder_sink::FfmpegEncoderSink;
use timelapse_core::imaging::infrastructure::image_file_decoder::ImageFileDecoder;
use timelapse_core::pipeline::build_config::BuildConfig;
use timelapse_core::pipeline::build_observer::{
    error_chain, BuildEvent, ChannelBuildObserver, CompositeBuildObserver,
};
use timelapse_core::pipeline::build_time_lapse_use_case::BuildTimeLapseUseCase;
use timelapse_core::pipeline::logging_build_observer::LoggingBuildObserver;
use timelapse_core::shared::canvas_size::CanvasSize;
use timelapse_core::shared::constants::{DEFAULT_FRAME_RATE, IMAGE_EXTENSIONS};
use timelapse_core::shared::frame_source::FrameSourceList;
use timelapse_core::shared::timestamp::FrameRate;

use manifest::Manifest;

/// Assemble still images into a time-lapse video.
#[derive(Parser)]
#[command(name = "timelapse")]
struct Cli {
    /// Input images (paths or file:// URIs), in frame order.
    frames: Vec<String>,

    /// Output video file (required unless the manifest names one).
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Frames per second [default: 30].
    #[arg(long)]
    fps: Option<u32>,

    /// Container: mp4, mov or mkv (default: from the output extension, else mp4).
    #[arg(long)]
    container: Option<String>,

    /// Codec: mpeg4 or h264 [default: mpeg4].
    #[arg(long)]
    codec: Option<String>,

    /// Output width. Every frame must match it.
    #[arg(long, requires = "height")]
    width: Option<u32>,

    /// Output height. Every frame must match it.
    #[arg(long, requires = "width")]
    height: Option<u32>,

    /// JSON manifest with frames and settings; flags override it.
    #[arg(long)]
    manifest: Option<PathBuf>,
}

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Error: {}", error_chain(&*e));
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let manifest = match &cli.manifest {
        Some(path) => Manifest::load(path)?,
        None => Manifest::default(),
    };
    let config = resolve_config(cli, manifest)?;
    warn_non_image_frames(config.sources.ids());

    let total = config.sources.len();
    let (channel, events) = ChannelBuildObserver::new();
    let observer = CompositeBuildObserver::new()
        .with(Box::new(channel))
        .with(Box::new(LoggingBuildObserver::default()));
    let handle = BuildTimeLapseUseCase::new(
        config,
        Box::new(ImageFileDecoder::new()),
        Box::new(FfmpegEncoderSink::new()),
        Box::new(observer),
        None,
    )
    .spawn()?;

    for event in events.iter() {
        match event {
            BuildEvent::Progress(progress) => {
                eprint!("\rEncoding frame {}/{total}", progress.completed);
            }
            _ => break,
        }
    }
    eprintln!();

    let outcome = handle
        .join()
        .map_err(|e| -> Box<dyn std::error::Error> { e })?;
    let output = outcome.into_result()?;
    log::info!("Output written to {}", output.display());
    Ok(())
}

/// Merges command-line flags over the manifest into a build configuration.
fn resolve_config(cli: Cli, manifest: Manifest) -> Result<BuildConfig, Box<dyn std::error::Error>> {
    let frames = if cli.frames.is_empty() {
        manifest.frames
    } else {
        cli.frames
    };
    if frames.is_empty() {
        return Err("No input frames given".into());
    }

    let output = cli
        .output
        .or(manifest.output)
        .ok_or("Output file is required (-o/--output)")?;

    let fps = cli.fps.or(manifest.fps).unwrap_or(DEFAULT_FRAME_RATE);
    let frame_rate = FrameRate::new(fps)
        .ok_or_else(|| format!("Frame rate must be a positive integer, got {fps}"))?;

    let container = match cli.container.or(manifest.container) {
        Some(name) => name.parse::<Container>()?,
        None => container_for(&output).unwrap_or_default(),
    };
    let codec = match cli.codec.or(manifest.codec) {
        Some(name) => name.parse::<Codec>()?,
        None => Codec::default(),
    };

    let dimensions = match (cli.width, cli.height) {
        (Some(width), Some(height)) => Some((width, height)),
        _ => manifest.canvas.map(|c| (c.width, c.height)),
    };

    let mut config = BuildConfig::new(FrameSourceList::new(frames), output)
        .with_frame_rate(frame_rate)
        .with_container(container)
        .with_codec(codec);
    if let Some((width, height)) = dimensions {
        let canvas = CanvasSize::new(width, height)
            .ok_or_else(|| format!("Canvas must be non-empty, got {width}x{height}"))?;
        config = config.with_canvas(canvas);
    }
    Ok(config)
}

fn container_for(output: &Path) -> Option<Container> {
    let ext = output.extension()?.to_str()?.to_lowercase();
    Container::ALL
        .iter()
        .copied()
        .find(|container| container.extension() == ext)
}

fn is_image(id: &str) -> bool {
    Path::new(id)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Frames are decoded by content, so an odd extension is only worth a warning.
fn warn_non_image_frames(ids: &[String]) {
    for id in ids.iter().filter(|id| !is_image(id)) {
        log::warn!("{id} does not have an image file extension");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("timelapse").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_flags_build_config() {
        let cli = parse(&[
            "a.png", "b.png", "-o", "out.mov", "--fps", "24", "--codec", "h264", "--width",
            "640", "--height", "480",
        ]);
        let config = resolve_config(cli, Manifest::default()).unwrap();

        assert_eq!(config.sources.len(), 2);
        assert_eq!(config.destination, PathBuf::from("out.mov"));
        assert_eq!(config.frame_rate.fps(), 24);
        assert_eq!(config.container, Container::Mov);
        assert_eq!(config.codec, Codec::H264);
        assert_eq!(config.canvas, CanvasSize::new(640, 480));
    }

    #[test]
    fn test_defaults() {
        let config = resolve_config(parse(&["a.png", "-o", "out.mp4"]), Manifest::default()).unwrap();
        assert_eq!(config.frame_rate.fps(), 30);
        assert_eq!(config.container, Container::Mp4);
        assert_eq!(config.codec, Codec::Mpeg4);
        assert!(config.canvas.is_none());
    }

    #[test]
    fn test_unknown_extension_falls_back_to_mp4() {
        let config = resolve_config(parse(&["a.png", "-o", "out.video"]), Manifest::default()).unwrap();
        assert_eq!(config.container, Container::Mp4);
    }

    #[test]
    fn test_flags_override_manifest() {
        let manifest = Manifest {
            frames: vec!["m1.png".into(), "m2.png".into(), "m3.png".into()],
            fps: Some(60),
            output: Some("manifest.mkv".into()),
            ..Manifest::default()
        };
        let config = resolve_config(parse(&["--fps", "25"]), manifest).unwrap();

        assert_eq!(config.sources.len(), 3);
        assert_eq!(config.frame_rate.fps(), 25);
        assert_eq!(config.destination, PathBuf::from("manifest.mkv"));
        assert_eq!(config.container, Container::Mkv);
    }

    #[test]
    fn test_missing_frames_is_error() {
        let err = resolve_config(parse(&["-o", "out.mp4"]), Manifest::default()).unwrap_err();
        assert_eq!(err.to_string(), "No input frames given");
    }

    #[test]
    fn test_missing_output_is_error() {
        let err = resolve_config(parse(&["a.png"]), Manifest::default()).unwrap_err();
        assert!(err.to_string().contains("Output file is required"));
    }

    #[test]
    fn test_zero_fps_is_error() {
        let err = resolve_config(parse(&["a.png", "-o", "out.mp4", "--fps", "0"]), Manifest::default())
            .unwrap_err();
        assert!(err.to_string().contains("Frame rate"));
    }

    #[test]
    fn test_zero_canvas_is_error() {
        let cli = parse(&["a.png", "-o", "o.mp4", "--width", "0", "--height", "10"]);
        assert!(resolve_config(cli, Manifest::default()).is_err());
    }

    #[test]
    fn test_width_requires_height() {
        let result = Cli::try_parse_from(["timelapse", "a.png", "-o", "o.mp4", "--width", "10"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_container_is_error() {
        let cli = parse(&["a.png", "-o", "o.mp4", "--container", "avi"]);
        let err = resolve_config(cli, Manifest::default()).unwrap_err();
        assert!(err.to_string().contains("unknown container"));
    }

    #[test]
    fn test_error_report_includes_frame_cause() {
        use timelapse_core::shared::build_error::{BuildError, FrameError};

        let error: Box<dyn std::error::Error> = Box::new(BuildError::Frame {
            index: 3,
            source_id: "x.png".into(),
            error: FrameError::EncodeFailed {
                cause: "invalid data".into(),
            },
        });
        assert_eq!(
            error_chain(&*error),
            "frame 3 (x.png): failed to encode the frame: invalid data"
        );
    }

    #[test]
    fn test_is_image() {
        assert!(is_image("/shots/IMG_0001.JPG"));
        assert!(is_image("file:///shots/a%20b.png"));
        assert!(!is_image("notes.txt"));
        assert!(!is_image("no_extension"));
    }
}
