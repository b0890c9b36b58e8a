//! Camera source abstraction for the passthrough pipeline.
//!
//! The pipeline consumes frames through [`FrameSource`] only; the
//! concrete V4L2 capture lives in [`v4l2`] and is Linux-only.

use stereopass_core::{PipelineConfig, Result, StereoFrame};

#[cfg(target_os = "linux")]
pub mod v4l2;

#[cfg(target_os = "linux")]
pub use v4l2::V4l2Camera;

/// One combined stereo frame per call, or a recoverable failure.
///
/// A failed read is not fatal: the scheduler skips the tick and tries
/// again. Implementations release the device when dropped.
pub trait FrameSource: Send {
    fn read_frame(&mut self) -> Result<StereoFrame>;
}

/// GStreamer launch description for the MJPEG capture path.
///
/// MJPEG is forced ahead of the resolution caps so the device keeps
/// its high frame rates, and the appsink holds a single buffer with
/// `drop=true` for lowest latency (stale frames are discarded, never
/// queued).
pub fn capture_pipeline_description(config: &PipelineConfig) -> String {
    format!(
        "v4l2src device={dev} ! image/jpeg,width={w},height={h},framerate={fps}/1 \
         ! jpegdec ! videoconvert ! video/x-raw,format=RGB,width={w},height={h} \
         ! appsink name=sink max-buffers=1 drop=true sync=false",
        dev = config.device_path,
        w = config.capture_width,
        h = config.capture_height,
        fps = config.target_fps,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_description_carries_geometry_and_rate() {
        let cfg = PipelineConfig::default();
        let desc = capture_pipeline_description(&cfg);
        assert!(desc.starts_with("v4l2src device=/dev/video0"));
        assert!(desc.contains("image/jpeg,width=3200,height=1200,framerate=60/1"));
        assert!(desc.contains("format=RGB,width=3200,height=1200"));
        assert!(desc.contains("max-buffers=1 drop=true"));
    }

    #[test]
    fn fallback_rate_appears_in_description() {
        let cfg = PipelineConfig::default().with_fps(30);
        assert!(capture_pipeline_description(&cfg).contains("framerate=30/1"));
    }
}
