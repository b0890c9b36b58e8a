use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use stereopass_core::config::FALLBACK_FPS;
use stereopass_core::stats::TracingSink;
use stereopass_core::{init_tracing, PipelineConfig};
use stereopass_camera::FrameSource;
use stereopass_xr::PassthroughPipeline;

#[derive(Parser, Debug)]
#[command(name = "stereopass", about = "Stereo camera passthrough for OpenXR headsets")]
struct Args {
    /// Video capture device
    #[arg(long, env = "STEREOPASS_DEVICE", default_value = "/dev/video0")]
    device: String,
    /// Combined side-by-side capture width in pixels
    #[arg(long, default_value_t = 3200)]
    width: u32,
    /// Capture height in pixels
    #[arg(long, default_value_t = 1200)]
    height: u32,
    /// Requested capture rate in frames per second
    #[arg(long, default_value_t = 60)]
    fps: u32,
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let config = PipelineConfig {
        device_path: args.device,
        capture_width: args.width,
        capture_height: args.height,
        eye_width: args.width / 2,
        eye_height: args.height,
        target_fps: args.fps,
    };
    config.validate()?;

    let camera = open_camera(&config)?;
    let mut pipeline = PassthroughPipeline::new(config, camera, Box::new(TracingSink))?;
    pipeline.run()?;
    Ok(())
}

/// Open the capture device at the requested rate, falling back to
/// 30 fps when the device rejects the negotiation (common on USB
/// bandwidth-limited stereo cameras).
#[cfg(target_os = "linux")]
fn open_camera(config: &PipelineConfig) -> Result<Box<dyn FrameSource>> {
    use stereopass_camera::V4l2Camera;

    match V4l2Camera::open(config) {
        Ok(camera) => Ok(Box::new(camera)),
        Err(err) if config.target_fps != FALLBACK_FPS => {
            warn!(%err, fps = config.target_fps, "capture open failed, retrying at fallback rate");
            let fallback = config.with_fps(FALLBACK_FPS);
            let camera = V4l2Camera::open(&fallback)?;
            info!(fps = FALLBACK_FPS, "capture running at fallback rate");
            Ok(Box::new(camera))
        }
        Err(err) => Err(err.into()),
    }
}

#[cfg(not(target_os = "linux"))]
fn open_camera(_config: &PipelineConfig) -> Result<Box<dyn FrameSource>> {
    Err(anyhow::anyhow!("V4L2 capture is only available on Linux"))
}
