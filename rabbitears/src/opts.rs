//! CLI options and the little grammars inside them.

use clap::Parser;
use rabbitears_core::controller::RandomOpts;
use std::path::PathBuf;
use thiserror::Error;

/// Extensions treated as video files rather than still images.
const VIDEO_EXTS: [&str; 13] = [
    "h264", "h265", "mpeg2", "mpeg4", "mp4", "mjpeg", "mpg", "vp8", "mov", "wmv", "flv", "avi",
    "mkv",
];

/// Smallest output dimension the engine geometry supports sensibly.
pub const MIN_SIZE: usize = 64;

/// An argument survived clap but failed semantic validation.
#[derive(Error, Debug)]
#[must_use]
pub enum ArgsError {
    #[error("malformed --control {0:?}: {1}")]
    Control(String, String),
    #[error("unknown source {0:?}")]
    Source(String),
    #[error("--size must be at least {MIN_SIZE}x{MIN_SIZE}, got {0}x{1}")]
    Size(usize, usize),
}

/// `rabbitears` CLI options.
#[derive(Parser, Debug)]
#[command(version, author, about, long_about = None)]
#[must_use]
pub struct Opts {
    /// Signal sources: an image or video path, `:cam[:N]`, or
    /// `:bars[:/path/to/logo.png]`.
    #[arg(long = "in", num_args = 1.., required = true, value_name = "SOURCE")]
    pub inputs: Vec<String>,
    /// Outputs: `:highgui` for an interactive window, anything else for a
    /// video file (`.avi` is Motion-JPEG, everything else MP4).
    #[arg(long = "out", num_args = 1.., required = true, value_name = "SINK")]
    pub outputs: Vec<String>,
    /// `:random[:key=val...]` with keys `duration`, `fps`, `powerup`,
    /// `fixsettings`, or a path to a JSON scenario.
    #[arg(long, value_name = "SPEC")]
    pub control: String,
    /// Output size; both dimensions must be at least 64.
    /// Defaults to the largest input's size, odd values rounded down.
    #[arg(long, num_args = 2, value_names = ["WIDTH", "HEIGHT"])]
    pub size: Vec<usize>,
    /// Random seed; 0 seeds from the wall clock.
    #[arg(long, default_value_t = 0)]
    pub seed: u64,
    /// Log verbosity, 0 (errors only) to 5.
    #[arg(long, default_value_t = 2)]
    pub verbose: u8,
    /// Engine worker threads; 0 means one per core.
    #[arg(long, default_value_t = 0)]
    pub threads: usize,
}

/// What `--control` resolved to.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlSpec {
    Random(RandomOpts),
    Scenario(PathBuf),
}

/// One `--in` source, classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    Still(PathBuf),
    Video(PathBuf),
    Camera(u32),
    Bars { logo: Option<PathBuf> },
}

/// One `--out` sink, classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkSpec {
    Window,
    File(PathBuf),
}

/// Parses the `--control` token: `:random[:key=val...]` or a scenario path.
pub fn parse_control(spec: &str) -> Result<ControlSpec, ArgsError> {
    let Some(rest) = spec.strip_prefix(':') else {
        return Ok(ControlSpec::Scenario(PathBuf::from(spec)));
    };
    let mut parts = rest.split(':');
    let kind = parts.next().unwrap_or_default();
    if kind != "random" {
        return Err(ArgsError::Control(
            spec.into(),
            format!("unknown controller {kind:?}"),
        ));
    }
    let mut opts = RandomOpts::default();
    for part in parts {
        match part.split_once('=') {
            Some(("duration", value)) => {
                opts.duration = value
                    .parse::<u32>()
                    .map_err(|err| ArgsError::Control(spec.into(), format!("duration: {err}")))?
                    as f64;
            }
            Some(("fps", value)) => {
                opts.fps = value
                    .parse::<u32>()
                    .map_err(|err| ArgsError::Control(spec.into(), format!("fps: {err}")))?
                    as f64;
            }
            None if part == "powerup" => opts.power_up_down = true,
            None if part == "fixsettings" => opts.fix_settings = true,
            _ => {
                return Err(ArgsError::Control(
                    spec.into(),
                    format!("unknown key {part:?}"),
                ));
            }
        }
    }
    if opts.fps <= 0.0 || opts.duration <= 0.0 {
        return Err(ArgsError::Control(
            spec.into(),
            "duration and fps must be positive".into(),
        ));
    }
    Ok(ControlSpec::Random(opts))
}

/// Classifies one `--in` source string.
pub fn parse_source(spec: &str) -> Result<SourceSpec, ArgsError> {
    if let Some(rest) = spec.strip_prefix(":cam") {
        let index = match rest.strip_prefix(':') {
            None if rest.is_empty() => 0,
            Some(n) => n.parse().map_err(|_| ArgsError::Source(spec.into()))?,
            _ => return Err(ArgsError::Source(spec.into())),
        };
        return Ok(SourceSpec::Camera(index));
    }
    if let Some(rest) = spec.strip_prefix(":bars") {
        let logo = match rest.strip_prefix(':') {
            None if rest.is_empty() => None,
            Some(path) if !path.is_empty() => Some(PathBuf::from(path)),
            _ => return Err(ArgsError::Source(spec.into())),
        };
        return Ok(SourceSpec::Bars { logo });
    }
    if spec.starts_with(':') {
        return Err(ArgsError::Source(spec.into()));
    }
    let path = PathBuf::from(spec);
    let is_video = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            let ext = ext.to_ascii_lowercase();
            VIDEO_EXTS.iter().any(|&v| v == ext)
        });
    Ok(if is_video {
        SourceSpec::Video(path)
    } else {
        SourceSpec::Still(path)
    })
}

/// Classifies one `--out` sink string.
#[must_use]
pub fn parse_sink(spec: &str) -> SinkSpec {
    if spec == ":highgui" {
        SinkSpec::Window
    } else {
        SinkSpec::File(PathBuf::from(spec))
    }
}

/// Validates an explicit `--size`.
pub fn validate_size(width: usize, height: usize) -> Result<(), ArgsError> {
    if width < MIN_SIZE || height < MIN_SIZE {
        return Err(ArgsError::Size(width, height));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_grammar() {
        assert!(matches!(
            parse_control(":random"),
            Ok(ControlSpec::Random(opts)) if opts == RandomOpts::default()
        ));
        let ControlSpec::Random(opts) =
            parse_control(":random:duration=2:fixsettings").expect("parse")
        else {
            panic!("not random");
        };
        assert_eq!(opts.duration, 2.0);
        assert!(opts.fix_settings);
        assert!(!opts.power_up_down);

        let ControlSpec::Random(opts) =
            parse_control(":random:duration=10:powerup:fps=25").expect("parse")
        else {
            panic!("not random");
        };
        assert_eq!(opts.fps, 25.0);
        assert!(opts.power_up_down);

        assert!(parse_control(":random:bogus=1").is_err());
        assert!(parse_control(":random:duration=abc").is_err());
        assert!(parse_control(":warp").is_err());
        assert_eq!(
            parse_control("scenario.json").expect("parse"),
            ControlSpec::Scenario(PathBuf::from("scenario.json"))
        );
    }

    #[test]
    fn source_classification() {
        assert_eq!(
            parse_source("movie.MP4").expect("video"),
            SourceSpec::Video(PathBuf::from("movie.MP4"))
        );
        assert_eq!(
            parse_source("clip.mkv").expect("video"),
            SourceSpec::Video(PathBuf::from("clip.mkv"))
        );
        assert_eq!(
            parse_source("photo.jpg").expect("still"),
            SourceSpec::Still(PathBuf::from("photo.jpg"))
        );
        assert_eq!(
            parse_source("noext").expect("still"),
            SourceSpec::Still(PathBuf::from("noext"))
        );
        assert_eq!(parse_source(":cam").expect("cam"), SourceSpec::Camera(0));
        assert_eq!(parse_source(":cam:2").expect("cam"), SourceSpec::Camera(2));
        assert_eq!(
            parse_source(":bars").expect("bars"),
            SourceSpec::Bars { logo: None }
        );
        assert_eq!(
            parse_source(":bars:/tmp/logo.png").expect("bars"),
            SourceSpec::Bars {
                logo: Some(PathBuf::from("/tmp/logo.png"))
            }
        );
        assert!(parse_source(":tuner").is_err());
        assert!(parse_source(":cam:x").is_err());
    }

    #[test]
    fn sink_classification() {
        assert_eq!(parse_sink(":highgui"), SinkSpec::Window);
        assert_eq!(
            parse_sink("out.mp4"),
            SinkSpec::File(PathBuf::from("out.mp4"))
        );
    }

    #[test]
    fn size_bounds() {
        assert!(validate_size(64, 64).is_ok());
        assert!(validate_size(66, 66).is_ok());
        assert!(validate_size(64, 63).is_err());
        assert!(validate_size(0, 480).is_err());
    }
}
