// Command line, layered over config.toml

use clap::Parser;
use std::path::PathBuf;

use crate::config::Config;

#[derive(Debug, Parser)]
#[command(name = "vk-samples", version, about = "Headless Vulkan feature samples")]
pub struct Args {
    /// Samples to run, in order (all when empty)
    pub samples: Vec<String>,

    /// Configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Frames to render per sample
    #[arg(short, long)]
    pub frames: Option<u32>,

    /// Save each sample's last frame as PNG into DIR
    #[arg(long, value_name = "DIR")]
    pub capture: Option<PathBuf>,

    /// List samples and exit
    #[arg(long)]
    pub list: bool,

    /// Enable the Khronos validation layer
    #[arg(long, conflicts_with = "no_validation")]
    pub validation: bool,

    /// Disable the Khronos validation layer
    #[arg(long)]
    pub no_validation: bool,

    /// Output size, e.g. 1280x720
    #[arg(long, value_name = "WxH", value_parser = parse_size)]
    pub size: Option<(u32, u32)>,

    /// Requested MSAA sample count
    #[arg(long)]
    pub msaa: Option<u32>,

    /// Animate by frame index (true) or wall-clock time (false)
    #[arg(long, value_name = "BOOL", num_args = 0..=1, default_missing_value = "true")]
    pub fixed_timestep: Option<bool>,
}

impl Args {
    /// Command line wins over the config file
    pub fn apply(&self, config: &mut Config) {
        if !self.samples.is_empty() {
            config.run.samples = self.samples.clone();
        }
        if let Some(frames) = self.frames {
            config.run.frames = frames;
        }
        if let Some(dir) = &self.capture {
            config.output.capture = true;
            config.output.capture_dir = dir.clone();
        }
        if self.validation {
            config.debug.validation_layers = true;
        }
        if self.no_validation {
            config.debug.validation_layers = false;
        }
        if let Some((width, height)) = self.size {
            config.output.width = width;
            config.output.height = height;
        }
        if let Some(samples) = self.msaa {
            config.graphics.msaa_samples = samples;
        }
        if let Some(fixed) = self.fixed_timestep {
            config.run.fixed_timestep = fixed;
        }
    }
}

fn parse_size(value: &str) -> Result<(u32, u32), String> {
    let (width, height) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{}'", value))?;
    let parse = |part: &str| {
        part.trim()
            .parse::<u32>()
            .map_err(|e| format!("invalid dimension '{}': {}", part, e))
    };
    Ok((parse(width)?, parse(height)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("vk-samples").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn no_arguments_leave_config_alone() {
        let mut config = Config::default();
        let before = format!("{:?}", config);
        parse(&[]).apply(&mut config);
        assert_eq!(format!("{:?}", config), before);
    }

    #[test]
    fn overrides_are_applied() {
        let mut config = Config::default();
        parse(&[
            "deferred",
            "cubemap",
            "--frames",
            "5",
            "--capture",
            "shots",
            "--size",
            "640x480",
            "--msaa",
            "8",
            "--no-validation",
            "--fixed-timestep",
        ])
        .apply(&mut config);

        assert_eq!(config.run.samples, vec!["deferred", "cubemap"]);
        assert_eq!(config.run.frames, 5);
        assert!(config.output.capture);
        assert_eq!(config.output.capture_dir, PathBuf::from("shots"));
        assert_eq!((config.output.width, config.output.height), (640, 480));
        assert_eq!(config.graphics.msaa_samples, 8);
        assert!(!config.debug.validation_layers);
        assert!(config.run.fixed_timestep);
    }

    #[test]
    fn wall_clock_timing_can_be_selected() {
        let mut config = Config::default();
        assert!(config.run.fixed_timestep);
        parse(&["--fixed-timestep=false"]).apply(&mut config);
        assert!(!config.run.fixed_timestep);

        parse(&["--fixed-timestep"]).apply(&mut config);
        assert!(config.run.fixed_timestep);
    }

    #[test]
    fn zero_frames_fail_validation() {
        let mut config = Config::default();
        parse(&["--frames", "0"]).apply(&mut config);
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_flags_conflict() {
        let result = Args::try_parse_from(["vk-samples", "--validation", "--no-validation"]);
        assert!(result.is_err());
    }

    #[rstest]
    #[case("1280x720", Some((1280, 720)))]
    #[case("64X64", Some((64, 64)))]
    #[case("1280", None)]
    #[case("axb", None)]
    fn sizes(#[case] input: &str, #[case] expected: Option<(u32, u32)>) {
        assert_eq!(parse_size(input).ok(), expected);
    }
}
