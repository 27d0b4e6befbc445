use std::path::PathBuf;

use clap::{Args, Parser};

use crate::app::AppConfig;
use crate::compositor::RenderMode;
use crate::device::Extent;
use crate::error::ConfigError;
use crate::eye_buffers::{DEFAULT_SAMPLE_COUNT, validate_sample_count};
use crate::runtime::{RuntimeKind, SimulatedConfig};
use crate::vr_system::ClipPlanes;

#[derive(Parser, Debug)]
#[command(
    name = "pointvr",
    author,
    version,
    about = "Stereo point-cloud viewer with a desktop preview mode"
)]
pub struct Cli {
    /// Raw little-endian f32 XYZRGB point cloud. A demo sphere is shown when omitted.
    #[arg(value_name = "FILE")]
    pub cloud: Option<PathBuf>,

    /// Desktop window size (e.g. `1280x720`).
    #[arg(long, value_name = "WIDTHxHEIGHT", value_parser = parse_size, default_value = "1280x720")]
    pub size: Extent,

    /// MSAA sample count for the eye render targets: 1, 2, 4 or 8.
    #[arg(long, value_name = "COUNT", value_parser = parse_samples, default_value_t = DEFAULT_SAMPLE_COUNT)]
    pub samples: u32,

    /// Near clip distance in meters.
    #[arg(long, default_value_t = 0.1)]
    pub near: f32,

    /// Far clip distance in meters.
    #[arg(long, default_value_t = 100.0)]
    pub far: f32,

    /// Vertical field of view of the desktop camera, in degrees.
    #[arg(long, value_name = "DEGREES", default_value_t = 70.0)]
    pub fov: f32,

    /// Start in desktop (Standard) mode even when a headset is available.
    #[arg(long)]
    pub standard: bool,

    /// Continue in desktop mode when VR cannot start instead of exiting.
    #[arg(long)]
    pub allow_desktop: bool,

    /// Use the software headset instead of the OpenXR runtime.
    #[arg(long)]
    pub simulate: bool,

    /// Log filter in `env_logger` syntax; overrides `RUST_LOG`.
    #[arg(long, value_name = "FILTER", env = "POINTVR_LOG")]
    pub log: Option<String>,

    #[command(flatten)]
    pub headset: HeadsetArgs,
}

/// Settings for the simulated headset (`--simulate`).
#[derive(Args, Debug)]
pub struct HeadsetArgs {
    /// Pretend no headset is connected.
    #[arg(long)]
    pub no_hmd: bool,

    /// Recommended per-eye render-target size reported by the headset.
    #[arg(long, value_name = "WIDTHxHEIGHT", value_parser = parse_size)]
    pub eye_size: Option<Extent>,

    /// Headset refresh rate in Hz.
    #[arg(long, value_name = "HZ", default_value_t = 90.0)]
    pub refresh: f32,

    /// Number of tracked controllers (0 to 2).
    #[arg(long, value_name = "COUNT", default_value_t = 2)]
    pub controllers: usize,

    /// Start without input focus, so frames are rendered but not submitted.
    #[arg(long)]
    pub unfocused: bool,
}

pub fn parse() -> Cli {
    Cli::parse()
}

pub fn parse_size(value: &str) -> Result<Extent, ConfigError> {
    let syntax = || ConfigError::SizeSyntax(value.to_string());
    let (width, height) = value
        .trim()
        .split_once(['x', 'X'])
        .ok_or_else(syntax)?;
    let width: u32 = width.trim().parse().map_err(|_| syntax())?;
    let height: u32 = height.trim().parse().map_err(|_| syntax())?;
    if width == 0 || height == 0 {
        return Err(ConfigError::ZeroSize { width, height });
    }
    Ok(Extent::new(width, height))
}

pub fn parse_samples(value: &str) -> Result<u32, String> {
    let samples: u32 = value
        .trim()
        .parse()
        .map_err(|_| format!("invalid sample count '{value}'"))?;
    validate_sample_count(samples).map_err(|err| err.to_string())
}

impl Cli {
    pub fn into_config(self) -> Result<AppConfig, ConfigError> {
        let clip = ClipPlanes::new(self.near, self.far)?;

        let mut headset = SimulatedConfig::new()
            .refresh_rate(self.headset.refresh)
            .controllers(self.headset.controllers)
            .input_focus(!self.headset.unfocused);
        if let Some(size) = self.headset.eye_size {
            headset = headset.render_target_size(size.width, size.height);
        }
        if self.headset.no_hmd {
            headset = headset.without_hmd();
        }

        let mode = if self.standard {
            RenderMode::Standard
        } else {
            RenderMode::Vr
        };

        let runtime = if self.simulate {
            RuntimeKind::Simulated
        } else {
            RuntimeKind::OpenXr
        };

        let mut config = AppConfig::new()
            .size(self.size.width, self.size.height)
            .samples(self.samples)
            .clip_planes(clip)
            .desktop_fov(self.fov)
            .start_mode(mode)
            .runtime(runtime)
            .allow_desktop_fallback(self.allow_desktop)
            .headset(headset);
        if let Some(path) = self.cloud {
            config = config.cloud(path);
        }
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_args(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("pointvr").chain(args.iter().copied()))
            .expect("arguments parse")
    }

    #[test]
    fn size_accepts_either_separator() {
        assert_eq!(parse_size("1280x720"), Ok(Extent::new(1280, 720)));
        assert_eq!(parse_size(" 800X600 "), Ok(Extent::new(800, 600)));
    }

    #[test]
    fn size_rejects_bad_input() {
        assert_eq!(
            parse_size("1280"),
            Err(ConfigError::SizeSyntax("1280".to_string()))
        );
        assert_eq!(
            parse_size("ax2"),
            Err(ConfigError::SizeSyntax("ax2".to_string()))
        );
        assert_eq!(
            parse_size("0x720"),
            Err(ConfigError::ZeroSize {
                width: 0,
                height: 720
            })
        );
    }

    #[test]
    fn defaults_map_to_vr_config() {
        let config = parse_args(&[]).into_config().expect("valid config");
        assert_eq!(config.samples, DEFAULT_SAMPLE_COUNT);
        assert_eq!(config.start_mode, RenderMode::Vr);
        assert_eq!(config.clip, ClipPlanes::default());
        assert!(config.cloud_path.is_none());
        assert_eq!(config.runtime, RuntimeKind::OpenXr);
        assert!(!config.allow_desktop_fallback);
        assert!(config.headset.hmd_present);
        assert!(config.headset.input_focus);
    }

    #[test]
    fn flags_reach_config() {
        let config = parse_args(&[
            "cloud.bin",
            "--standard",
            "--samples",
            "8",
            "--eye-size",
            "1000x1100",
            "--no-hmd",
            "--unfocused",
            "--simulate",
            "--allow-desktop",
            "--fov",
            "85",
        ])
        .into_config()
        .expect("valid config");

        assert_eq!(config.cloud_path, Some(PathBuf::from("cloud.bin")));
        assert_eq!(config.start_mode, RenderMode::Standard);
        assert_eq!(config.samples, 8);
        assert_eq!(config.headset.render_target_size, Extent::new(1000, 1100));
        assert!(!config.headset.hmd_present);
        assert!(!config.headset.input_focus);
        assert_eq!(config.runtime, RuntimeKind::Simulated);
        assert!(config.allow_desktop_fallback);
        assert_eq!(config.desktop_fov, 85.0);
    }

    #[test]
    fn unsupported_samples_are_rejected_by_parser() {
        let result = Cli::try_parse_from(["pointvr", "--samples", "3"]);
        assert!(result.is_err());
    }

    #[test]
    fn inverted_clip_planes_are_rejected() {
        let err = parse_args(&["--near", "5", "--far", "1"])
            .into_config()
            .expect_err("near beyond far");
        assert_eq!(err, ConfigError::ClipPlanes { near: 5.0, far: 1.0 });
    }
}
