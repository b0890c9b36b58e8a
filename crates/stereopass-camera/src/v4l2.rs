//! V4L2 stereo capture through a GStreamer appsink.

use bytes::Bytes;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use tracing::info;

use stereopass_core::{Error, PipelineConfig, Result, StereoFrame};

use crate::{capture_pipeline_description, FrameSource};

/// How long one read waits for the device before the tick is skipped.
const SAMPLE_TIMEOUT_MS: u64 = 100;

/// Stereo camera read through `v4l2src`. Owns the playing pipeline;
/// dropping it stops the pipeline and releases the device.
pub struct V4l2Camera {
    pipeline: gst::Pipeline,
    appsink: gst_app::AppSink,
    width: u32,
    height: u32,
}

impl V4l2Camera {
    /// Open the device at the configured geometry and rate. Fatal to
    /// startup on failure; the caller may retry with a lower rate.
    pub fn open(config: &PipelineConfig) -> Result<Self> {
        gst::init().map_err(|e| Error::camera(format!("gstreamer init: {e}")))?;

        let description = capture_pipeline_description(config);
        let pipeline = gst::parse::launch(&description)
            .map_err(|e| Error::camera(format!("gst parse: {e}")))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| Error::camera("gst pipeline downcast failed"))?;

        let appsink = pipeline
            .by_name("sink")
            .ok_or_else(|| Error::camera("gst appsink missing"))?
            .downcast::<gst_app::AppSink>()
            .map_err(|_| Error::camera("gst appsink type mismatch"))?;

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| Error::camera(format!("gst state: {e:?}")))?;

        info!(
            device = %config.device_path,
            width = config.capture_width,
            height = config.capture_height,
            fps = config.target_fps,
            "camera opened"
        );

        Ok(Self {
            pipeline,
            appsink,
            width: config.capture_width,
            height: config.capture_height,
        })
    }
}

impl FrameSource for V4l2Camera {
    fn read_frame(&mut self) -> Result<StereoFrame> {
        let sample = self
            .appsink
            .try_pull_sample(gst::ClockTime::from_mseconds(SAMPLE_TIMEOUT_MS))
            .ok_or_else(|| Error::camera("no frame within timeout"))?;

        let buffer = sample
            .buffer()
            .ok_or_else(|| Error::camera("gst sample missing buffer"))?;
        let map = buffer
            .map_readable()
            .map_err(|e| Error::camera(format!("gst map: {e}")))?;

        StereoFrame::new(self.width, self.height, Bytes::copy_from_slice(map.as_slice()))
            .ok_or_else(|| Error::camera("frame size does not match negotiated caps"))
    }
}

impl Drop for V4l2Camera {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}
