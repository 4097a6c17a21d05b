//! Sensor configuration: depth mode, frame rate, and image synchronization.
//!
//! The configuration is chosen once at process start and never changes while
//! the device is running.  [`DeviceConfig::validate`] rejects combinations the
//! hardware cannot run, so a bad configuration fails before the device is
//! powered on.
//!
//! # Depth modes
//!
//! | Mode              | Resolution  | Valid range (mm) | Max FPS |
//! |-------------------|-------------|------------------|---------|
//! | `nfov-2x2binned`  | 320 x 288   | 500..=5460       | 30      |
//! | `nfov-unbinned`   | 640 x 576   | 500..=3860       | 30      |
//! | `wfov-2x2binned`  | 512 x 512   | 250..=2880       | 30      |
//! | `wfov-unbinned`   | 1024 x 1024 | 250..=2210       | 15      |
//! | `passive-ir`      | no depth    | –                | 30      |
//! | `off`             | no depth    | –                | 30      |

use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors for invalid or unparseable device configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The depth mode name is not recognised.
    #[error("unknown depth mode '{0}' (expected one of: nfov-2x2binned, nfov-unbinned, wfov-2x2binned, wfov-unbinned, passive-ir, off)")]
    UnknownDepthMode(String),

    /// The frame rate is not one the sensor supports at all.
    #[error("unsupported frame rate '{0}' (expected 5, 15 or 30)")]
    UnknownFrameRate(String),

    /// The frame rate is valid but too high for the chosen depth mode.
    #[error("depth mode {mode} supports at most {max_fps} FPS, requested {requested_fps}")]
    UnsupportedFrameRate {
        mode: DepthMode,
        max_fps: u32,
        requested_fps: u32,
    },

    /// Synchronized-only capture needs the color camera, which is not enabled.
    #[error("synchronized images require the color camera, which this server does not enable")]
    SyncRequiresColor,
}

// ── Depth mode ────────────────────────────────────────────────────────────────

/// Operating mode of the depth camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DepthMode {
    Off,
    #[serde(rename = "nfov-2x2binned")]
    Nfov2x2Binned,
    NfovUnbinned,
    #[serde(rename = "wfov-2x2binned")]
    Wfov2x2Binned,
    WfovUnbinned,
    PassiveIr,
}

impl DepthMode {
    /// Every mode, in declaration order.
    pub const ALL: [DepthMode; 6] = [
        DepthMode::Off,
        DepthMode::Nfov2x2Binned,
        DepthMode::NfovUnbinned,
        DepthMode::Wfov2x2Binned,
        DepthMode::WfovUnbinned,
        DepthMode::PassiveIr,
    ];

    /// The kebab-case name used on the command line and in config files.
    pub fn as_str(self) -> &'static str {
        match self {
            DepthMode::Off => "off",
            DepthMode::Nfov2x2Binned => "nfov-2x2binned",
            DepthMode::NfovUnbinned => "nfov-unbinned",
            DepthMode::Wfov2x2Binned => "wfov-2x2binned",
            DepthMode::WfovUnbinned => "wfov-unbinned",
            DepthMode::PassiveIr => "passive-ir",
        }
    }

    /// Depth image size as `(width, height)`, or `None` for modes that do not
    /// produce a depth image.
    pub fn resolution(self) -> Option<(u32, u32)> {
        match self {
            DepthMode::Nfov2x2Binned => Some((320, 288)),
            DepthMode::NfovUnbinned => Some((640, 576)),
            DepthMode::Wfov2x2Binned => Some((512, 512)),
            DepthMode::WfovUnbinned => Some((1024, 1024)),
            DepthMode::PassiveIr | DepthMode::Off => None,
        }
    }

    /// Operating range in millimetres, or `None` for modes without depth.
    pub fn range_mm(self) -> Option<RangeInclusive<u16>> {
        match self {
            DepthMode::Nfov2x2Binned => Some(500..=5460),
            DepthMode::NfovUnbinned => Some(500..=3860),
            DepthMode::Wfov2x2Binned => Some(250..=2880),
            DepthMode::WfovUnbinned => Some(250..=2210),
            DepthMode::PassiveIr | DepthMode::Off => None,
        }
    }

    /// Highest frame rate the mode can run at.
    pub fn max_frame_rate(self) -> FrameRate {
        match self {
            DepthMode::WfovUnbinned => FrameRate::Fps15,
            _ => FrameRate::Fps30,
        }
    }

    /// `true` if captures in this mode carry a depth image.
    pub fn produces_depth(self) -> bool {
        self.resolution().is_some()
    }
}

impl fmt::Display for DepthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DepthMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('_', "-");
        DepthMode::ALL
            .into_iter()
            .find(|mode| mode.as_str() == wanted)
            .ok_or_else(|| ConfigError::UnknownDepthMode(s.to_string()))
    }
}

// ── Frame rate ────────────────────────────────────────────────────────────────

/// Camera frame rate.  Stored in config files as a plain integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum FrameRate {
    Fps5,
    Fps15,
    Fps30,
}

impl FrameRate {
    /// Frames per second as an integer.
    pub fn as_u32(self) -> u32 {
        match self {
            FrameRate::Fps5 => 5,
            FrameRate::Fps15 => 15,
            FrameRate::Fps30 => 30,
        }
    }

    /// Time between two consecutive frames.
    pub fn period(self) -> std::time::Duration {
        std::time::Duration::from_micros(1_000_000 / u64::from(self.as_u32()))
    }
}

impl TryFrom<u32> for FrameRate {
    type Error = ConfigError;

    fn try_from(fps: u32) -> Result<Self, Self::Error> {
        match fps {
            5 => Ok(FrameRate::Fps5),
            15 => Ok(FrameRate::Fps15),
            30 => Ok(FrameRate::Fps30),
            other => Err(ConfigError::UnknownFrameRate(other.to_string())),
        }
    }
}

impl From<FrameRate> for u32 {
    fn from(rate: FrameRate) -> Self {
        rate.as_u32()
    }
}

impl fmt::Display for FrameRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u32())
    }
}

impl FromStr for FrameRate {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fps: u32 = s
            .trim()
            .parse()
            .map_err(|_| ConfigError::UnknownFrameRate(s.to_string()))?;
        FrameRate::try_from(fps)
    }
}

// ── Image synchronization ─────────────────────────────────────────────────────

/// Whether captures must contain every enabled image stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImageSync {
    /// Deliver captures as soon as any image is ready.
    #[default]
    Any,
    /// Deliver only captures in which all enabled images are present.
    SynchronizedOnly,
}

impl ImageSync {
    /// Maps the boolean `synchronized_images_only` switch onto the enum.
    pub fn from_flag(synchronized_only: bool) -> Self {
        if synchronized_only {
            ImageSync::SynchronizedOnly
        } else {
            ImageSync::Any
        }
    }
}

// ── Device configuration ──────────────────────────────────────────────────────

/// Fixed configuration the sensor is started with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceConfig {
    pub depth_mode: DepthMode,
    pub frame_rate: FrameRate,
    pub image_sync: ImageSync,
}

impl Default for DeviceConfig {
    /// Narrow field of view, unbinned, 30 FPS, unsynchronized.
    fn default() -> Self {
        Self {
            depth_mode: DepthMode::NfovUnbinned,
            frame_rate: FrameRate::Fps30,
            image_sync: ImageSync::Any,
        }
    }
}

impl DeviceConfig {
    /// Checks that the hardware can run this combination.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::UnsupportedFrameRate`] if the frame rate exceeds the
    ///   depth mode's maximum.
    /// - [`ConfigError::SyncRequiresColor`] if synchronized-only capture is
    ///   requested; the color camera is never enabled.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let max = self.depth_mode.max_frame_rate();
        if self.frame_rate > max {
            return Err(ConfigError::UnsupportedFrameRate {
                mode: self.depth_mode,
                max_fps: max.as_u32(),
                requested_fps: self.frame_rate.as_u32(),
            });
        }
        if self.image_sync == ImageSync::SynchronizedOnly {
            return Err(ConfigError::SyncRequiresColor);
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_nfov_unbinned_30fps_unsynchronized() {
        let cfg = DeviceConfig::default();
        assert_eq!(cfg.depth_mode, DepthMode::NfovUnbinned);
        assert_eq!(cfg.frame_rate, FrameRate::Fps30);
        assert_eq!(cfg.image_sync, ImageSync::Any);
    }

    #[test]
    fn test_default_config_is_valid() {
        assert_eq!(DeviceConfig::default().validate(), Ok(()));
    }

    #[test]
    fn test_nfov_unbinned_resolution() {
        assert_eq!(DepthMode::NfovUnbinned.resolution(), Some((640, 576)));
    }

    #[test]
    fn test_modes_without_depth_have_no_resolution() {
        assert!(!DepthMode::PassiveIr.produces_depth());
        assert!(!DepthMode::Off.produces_depth());
        assert!(DepthMode::PassiveIr.range_mm().is_none());
    }

    #[test]
    fn test_depth_mode_parses_every_name() {
        for mode in DepthMode::ALL {
            assert_eq!(mode.as_str().parse::<DepthMode>(), Ok(mode));
        }
    }

    #[test]
    fn test_depth_mode_parse_accepts_sdk_spelling() {
        assert_eq!(
            "NFOV_UNBINNED".parse::<DepthMode>(),
            Ok(DepthMode::NfovUnbinned)
        );
        assert_eq!(
            "wfov_2x2binned".parse::<DepthMode>(),
            Ok(DepthMode::Wfov2x2Binned)
        );
    }

    #[test]
    fn test_depth_mode_parse_rejects_unknown() {
        assert!(matches!(
            "ultra-wide".parse::<DepthMode>(),
            Err(ConfigError::UnknownDepthMode(_))
        ));
    }

    #[test]
    fn test_frame_rate_parse() {
        assert_eq!("15".parse::<FrameRate>(), Ok(FrameRate::Fps15));
        assert!(matches!(
            "60".parse::<FrameRate>(),
            Err(ConfigError::UnknownFrameRate(_))
        ));
        assert!("fast".parse::<FrameRate>().is_err());
    }

    #[test]
    fn test_frame_rate_period() {
        assert_eq!(FrameRate::Fps30.period().as_micros(), 33_333);
        assert_eq!(FrameRate::Fps5.period().as_millis(), 200);
    }

    #[test]
    fn test_wfov_unbinned_rejects_30fps() {
        // Arrange
        let cfg = DeviceConfig {
            depth_mode: DepthMode::WfovUnbinned,
            frame_rate: FrameRate::Fps30,
            image_sync: ImageSync::Any,
        };

        // Act / Assert
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::UnsupportedFrameRate {
                mode: DepthMode::WfovUnbinned,
                max_fps: 15,
                requested_fps: 30,
            })
        );
    }

    #[test]
    fn test_wfov_unbinned_accepts_15fps() {
        let cfg = DeviceConfig {
            depth_mode: DepthMode::WfovUnbinned,
            frame_rate: FrameRate::Fps15,
            image_sync: ImageSync::Any,
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_synchronized_only_is_rejected() {
        let cfg = DeviceConfig {
            image_sync: ImageSync::from_flag(true),
            ..DeviceConfig::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::SyncRequiresColor));
    }
}
