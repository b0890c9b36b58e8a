//! Pipeline configuration, validated once at construction.

use crate::{Error, Result};

/// Frame rate the binary retries with when the camera rejects the
/// requested rate.
pub const FALLBACK_FPS: u32 = 30;

/// Resolved capture and display geometry for the passthrough pipeline.
///
/// The capture frame holds both eyes side by side, so
/// `capture_width == 2 * eye_width` and `capture_height == eye_height`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// V4L2 device node, e.g. `/dev/video0`.
    pub device_path: String,
    /// Combined stereo capture width in pixels.
    pub capture_width: u32,
    /// Capture height in pixels.
    pub capture_height: u32,
    /// Width of one eye's content in pixels.
    pub eye_width: u32,
    /// Height of one eye's content in pixels.
    pub eye_height: u32,
    /// Requested camera frame rate.
    pub target_fps: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            device_path: "/dev/video0".to_string(),
            capture_width: 3200,
            capture_height: 1200,
            eye_width: 1600,
            eye_height: 1200,
            target_fps: 60,
        }
    }
}

impl PipelineConfig {
    /// Validate geometry and rate. Called once before any resource is
    /// created; a bad config is fatal to startup.
    pub fn validate(&self) -> Result<()> {
        if self.device_path.is_empty() {
            return Err(Error::config("device path is empty"));
        }
        if self.capture_width == 0
            || self.capture_height == 0
            || self.eye_width == 0
            || self.eye_height == 0
        {
            return Err(Error::config("zero-sized capture or eye dimension"));
        }
        if self.capture_width != self.eye_width * 2 {
            return Err(Error::config(format!(
                "capture width {} is not twice the eye width {}",
                self.capture_width, self.eye_width
            )));
        }
        if self.capture_height != self.eye_height {
            return Err(Error::config(format!(
                "capture height {} does not match eye height {}",
                self.capture_height, self.eye_height
            )));
        }
        if self.target_fps == 0 {
            return Err(Error::config("target fps is zero"));
        }
        Ok(())
    }

    /// Byte size of one converted RGBA eye image, which sizes the
    /// staging buffer.
    pub fn eye_rgba_bytes(&self) -> usize {
        self.eye_width as usize * self.eye_height as usize * 4
    }

    /// Same config with the frame rate replaced, for the fallback
    /// retry after a failed camera open.
    pub fn with_fps(&self, fps: u32) -> Self {
        Self {
            target_fps: fps,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_mismatched_eye_width() {
        let cfg = PipelineConfig {
            capture_width: 3000,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn rejects_mismatched_eye_height() {
        let cfg = PipelineConfig {
            eye_height: 1080,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn rejects_zero_fps() {
        let cfg = PipelineConfig {
            target_fps: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn staging_size_covers_one_eye() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.eye_rgba_bytes(), 1600 * 1200 * 4);
    }

    #[test]
    fn with_fps_only_changes_rate() {
        let cfg = PipelineConfig::default().with_fps(FALLBACK_FPS);
        assert_eq!(cfg.target_fps, 30);
        assert_eq!(cfg.capture_width, 3200);
    }
}
