//! Top-level passthrough pipeline: initialization, the frame
//! scheduler main loop, and teardown.
//!
//! Initialization is fail-fast: any step that cannot acquire its
//! resource aborts startup. Teardown is Drop-driven in reverse
//! acquisition order and safe after a partial init.

use std::thread;
use std::time::Duration;

use ash::vk::{self, Handle};
use openxr as xr;
use tracing::{error, info, warn};

use stereopass_camera::FrameSource;
use stereopass_core::stats::{should_log_capture_failure, MetricsSink, PipelineCounters};
use stereopass_core::telemetry::{format_rpy, EulerAngles};
use stereopass_core::{Error, PipelineConfig, Result, StereoFrame};

use crate::compositor::composite_eye;
use crate::resources::{EyeTexture, StagingBuffer};
use crate::session::{SessionControl, SessionPhase, SessionTracker};
use crate::upload::upload_eye;
use crate::vulkan::{select_swapchain_format, VulkanContext};

const VIEW_COUNT: usize = 2;

/// Scheduler throttle while waiting for a renderable state; also
/// keeps the loop from spinning between compositor-paced frames.
const TICK_SLEEP: Duration = Duration::from_millis(1);

struct EyeSwapchain {
    handle: xr::Swapchain<xr::Vulkan>,
    images: Vec<vk::Image>,
    extent: vk::Extent2D,
}

struct XrSessionControl<'a> {
    session: &'a xr::Session<xr::Vulkan>,
}

impl SessionControl for XrSessionControl<'_> {
    fn begin_session(&mut self) -> Result<()> {
        self.session
            .begin(xr::ViewConfigurationType::PRIMARY_STEREO)
            .map(|_| ())
            .map_err(|e| Error::compositor(format!("session begin: {e:?}")))
    }

    fn end_session(&mut self) -> Result<()> {
        self.session
            .end()
            .map(|_| ())
            .map_err(|e| Error::compositor(format!("session end: {e:?}")))
    }
}

/// Owns every pipeline resource and drives the per-tick sequence:
/// poll events → capture → split → upload → composite → end frame.
///
/// Field order is load-bearing: swapchains, session objects and the
/// per-eye GPU resources must drop before the Vulkan device, and
/// everything before the OpenXR instance.
pub struct PassthroughPipeline {
    config: PipelineConfig,
    camera: Box<dyn FrameSource>,
    metrics: Box<dyn MetricsSink>,
    counters: PipelineCounters,
    tracker: SessionTracker,
    tick: u64,
    failed_reads: u64,
    rendered_frames: u64,
    event_buffer: xr::EventDataBuffer,

    swapchains: Vec<EyeSwapchain>,
    reference_space: xr::Space,
    frame_waiter: xr::FrameWaiter,
    frame_stream: xr::FrameStream<xr::Vulkan>,
    session: xr::Session<xr::Vulkan>,
    staging: StagingBuffer,
    eye_textures: [EyeTexture; 2],
    vk: VulkanContext,
    xr_instance: xr::Instance,
}

impl PassthroughPipeline {
    /// Run the ordered init sequence: OpenXR instance → system →
    /// Vulkan via the runtime → session → reference space →
    /// swapchains → staging buffer → eye textures. The camera is
    /// opened by the caller so it can apply its own rate fallback.
    pub fn new(
        config: PipelineConfig,
        camera: Box<dyn FrameSource>,
        metrics: Box<dyn MetricsSink>,
    ) -> Result<Self> {
        config.validate()?;

        let entry = unsafe { xr::Entry::load() }
            .map_err(|e| Error::compositor(format!("OpenXR loader: {e:?}")))?;
        let available = entry
            .enumerate_extensions()
            .map_err(|e| Error::compositor(format!("extension enumerate: {e:?}")))?;
        if !available.khr_vulkan_enable {
            return Err(Error::compositor("KHR_vulkan_enable not available"));
        }
        let mut exts = xr::ExtensionSet::default();
        exts.khr_vulkan_enable = true;

        let app_info = xr::ApplicationInfo {
            application_name: "Stereopass",
            application_version: 1,
            engine_name: "Stereopass",
            engine_version: 1,
            api_version: xr::Version::new(1, 0, 0),
        };
        let xr_instance = entry
            .create_instance(&app_info, &exts, &[])
            .map_err(|e| Error::compositor(format!("create_instance: {e:?}")))?;
        if let Ok(props) = xr_instance.properties() {
            info!(runtime = %props.runtime_name, "OpenXR runtime");
        }
        let system = xr_instance
            .system(xr::FormFactor::HEAD_MOUNTED_DISPLAY)
            .map_err(|e| Error::compositor(format!("system: {e:?}")))?;

        let vk = VulkanContext::new(&xr_instance, system)?;

        let session_info = xr::vulkan::SessionCreateInfo {
            instance: vk.instance.handle().as_raw() as *const _,
            physical_device: vk.physical_device.as_raw() as *const _,
            device: vk.device.handle().as_raw() as *const _,
            queue_family_index: vk.queue_family_index,
            queue_index: 0,
        };
        let (session, frame_waiter, frame_stream) = unsafe {
            xr_instance
                .create_session::<xr::Vulkan>(system, &session_info)
                .map_err(|e| Error::compositor(format!("create_session: {e:?}")))?
        };

        let reference_space = session
            .create_reference_space(
                xr::ReferenceSpaceType::LOCAL,
                xr::Posef {
                    orientation: xr::Quaternionf {
                        x: 0.0,
                        y: 0.0,
                        z: 0.0,
                        w: 1.0,
                    },
                    position: xr::Vector3f {
                        x: 0.0,
                        y: 0.0,
                        z: 0.0,
                    },
                },
            )
            .map_err(|e| Error::compositor(format!("reference space: {e:?}")))?;

        let formats = session
            .enumerate_swapchain_formats()
            .map_err(|e| Error::compositor(format!("swapchain formats: {e:?}")))?;
        let format = select_swapchain_format(&formats)?;
        info!(?format, "swapchain format selected");

        let view_configs = xr_instance
            .enumerate_view_configuration_views(system, xr::ViewConfigurationType::PRIMARY_STEREO)
            .map_err(|e| Error::compositor(format!("view configuration: {e:?}")))?;
        if view_configs.len() < VIEW_COUNT {
            return Err(Error::compositor(format!(
                "expected {VIEW_COUNT} views, runtime reports {}",
                view_configs.len()
            )));
        }

        let mut swapchains = Vec::with_capacity(VIEW_COUNT);
        for view in view_configs.iter().take(VIEW_COUNT) {
            let extent = vk::Extent2D {
                width: view.recommended_image_rect_width,
                height: view.recommended_image_rect_height,
            };
            let create_info = xr::SwapchainCreateInfo {
                create_flags: xr::SwapchainCreateFlags::EMPTY,
                usage_flags: xr::SwapchainUsageFlags::COLOR_ATTACHMENT
                    | xr::SwapchainUsageFlags::TRANSFER_DST,
                format: format.as_raw() as u32,
                sample_count: 1,
                width: extent.width,
                height: extent.height,
                face_count: 1,
                array_size: 1,
                mip_count: 1,
            };
            let handle = session
                .create_swapchain(&create_info)
                .map_err(|e| Error::compositor(format!("create_swapchain: {e:?}")))?;
            let images: Vec<vk::Image> = handle
                .enumerate_images()
                .map_err(|e| Error::compositor(format!("swapchain images: {e:?}")))?
                .into_iter()
                .map(vk::Image::from_raw)
                .collect();
            info!(
                eye = swapchains.len(),
                width = extent.width,
                height = extent.height,
                images = images.len(),
                "swapchain created"
            );
            swapchains.push(EyeSwapchain {
                handle,
                images,
                extent,
            });
        }

        let staging = StagingBuffer::new(&vk, config.eye_rgba_bytes())?;
        let eye_extent = vk::Extent2D {
            width: config.eye_width,
            height: config.eye_height,
        };
        let eye_textures = [
            EyeTexture::new(&vk, eye_extent, format)?,
            EyeTexture::new(&vk, eye_extent, format)?,
        ];

        info!("pipeline initialized");

        Ok(Self {
            config,
            camera,
            metrics,
            counters: PipelineCounters::default(),
            tracker: SessionTracker::new(),
            tick: 0,
            failed_reads: 0,
            rendered_frames: 0,
            event_buffer: xr::EventDataBuffer::new(),
            swapchains,
            reference_space,
            frame_waiter,
            frame_stream,
            session,
            staging,
            eye_textures,
            vk,
            xr_instance,
        })
    }

    /// Main loop: runs until the session state machine requests
    /// termination. A failed tick is logged and the loop continues;
    /// only event-queue failure is fatal.
    pub fn run(&mut self) -> Result<()> {
        info!(device = %self.config.device_path, "starting passthrough main loop");

        loop {
            self.poll_events()?;
            if self.tracker.quit_requested() {
                break;
            }
            self.tick = self.tick.wrapping_add(1);

            if self.tracker.rendering_allowed() {
                if let Err(err) = self.render_tick() {
                    error!(%err, "tick aborted");
                }
            } else if self.tick % 300 == 0 {
                info!(phase = ?self.tracker.phase(), "waiting for renderable session state");
            }

            if self.tick % 120 == 0 {
                self.metrics.record(&self.counters);
            }

            thread::sleep(TICK_SLEEP);
        }

        // Instance loss can leave the session begun; end it best-effort
        // so the runtime is not left holding the app.
        if self.tracker.session_active() {
            let _ = self.session.end();
        }
        self.metrics.record(&self.counters);
        info!("passthrough main loop ended");
        Ok(())
    }

    /// Drain all pending runtime events, non-blocking.
    fn poll_events(&mut self) -> Result<()> {
        while let Some(event) = self
            .xr_instance
            .poll_event(&mut self.event_buffer)
            .map_err(|e| Error::compositor(format!("poll_event: {e:?}")))?
        {
            match event {
                xr::Event::SessionStateChanged(e) => {
                    let next = SessionPhase::from_xr(e.state());
                    let mut control = XrSessionControl {
                        session: &self.session,
                    };
                    self.tracker.handle_state_change(next, &mut control);
                }
                xr::Event::InstanceLossPending(_) => self.tracker.handle_instance_loss(),
                _ => {}
            }
        }
        Ok(())
    }

    /// One rendering-eligible tick: capture → split → upload both
    /// eyes → composite and submit the frame.
    ///
    /// A failed read skips split/upload only; the frame is still
    /// submitted so the compositor keeps pacing the loop and holds the
    /// previous eye textures on screen.
    fn render_tick(&mut self) -> Result<()> {
        if let Some(frame) =
            capture_frame(self.camera.as_mut(), &mut self.counters, &mut self.failed_reads)
        {
            let (left, right) = frame.split();
            if upload_eye(&self.vk, &mut self.staging, &mut self.eye_textures[0], &left)? {
                self.counters.uploaded += 1;
            }
            if upload_eye(&self.vk, &mut self.staging, &mut self.eye_textures[1], &right)? {
                self.counters.uploaded += 1;
            }
        }

        self.submit_frame()
    }

    /// Wait/begin/end one compositor frame, blitting both eye
    /// textures into their surfaces when the runtime wants content.
    ///
    /// The frame is always ended, even when an eye fails mid-way; a
    /// partial frame is submitted empty (the runtime holds the last
    /// image).
    fn submit_frame(&mut self) -> Result<()> {
        let frame_state = self
            .frame_waiter
            .wait()
            .map_err(|e| Error::compositor(format!("wait_frame: {e:?}")))?;
        self.frame_stream
            .begin()
            .map_err(|e| Error::compositor(format!("begin_frame: {e:?}")))?;

        let mut layer_views: [xr::CompositionLayerProjectionView<xr::Vulkan>; VIEW_COUNT] = [
            xr::CompositionLayerProjectionView::new(),
            xr::CompositionLayerProjectionView::new(),
        ];
        let mut render_ok = false;
        let mut views = Vec::new();

        if frame_state.should_render {
            match self.session.locate_views(
                xr::ViewConfigurationType::PRIMARY_STEREO,
                frame_state.predicted_display_time,
                &self.reference_space,
            ) {
                Ok((_view_state, located)) if located.len() >= VIEW_COUNT => {
                    views = located;
                    render_ok = true;
                }
                Ok(_) => warn!("runtime located fewer views than expected"),
                Err(err) => error!(error = ?err, "locate_views failed"),
            }
        }

        if render_ok {
            self.rendered_frames += 1;
            if self.rendered_frames % 5 == 0 {
                let q = views[0].pose.orientation;
                let angles = EulerAngles::from_quaternion(q.w, q.x, q.y, q.z);
                info!("{}", format_rpy(angles));
            }

            for i in 0..VIEW_COUNT {
                if let Err(err) = Self::composite_one_eye(
                    &self.vk,
                    &mut self.swapchains[i],
                    &mut self.eye_textures[i],
                ) {
                    error!(%err, eye = i, "eye composite failed, dropping frame");
                    render_ok = false;
                    break;
                }
                layer_views[i] = xr::CompositionLayerProjectionView::new()
                    .pose(views[i].pose)
                    .fov(views[i].fov)
                    .sub_image(unsafe {
                        xr::SwapchainSubImage::from_raw(xr::sys::SwapchainSubImage {
                            swapchain: self.swapchains[i].handle.as_raw(),
                            image_rect: xr::Rect2Di {
                                offset: xr::Offset2Di { x: 0, y: 0 },
                                extent: xr::Extent2Di {
                                    width: self.swapchains[i].extent.width as i32,
                                    height: self.swapchains[i].extent.height as i32,
                                },
                            },
                            image_array_index: 0,
                        })
                    });
            }
        }

        if render_ok {
            let layer = xr::CompositionLayerProjection::new()
                .space(&self.reference_space)
                .views(&layer_views);
            let layers: [&xr::CompositionLayerBase<xr::Vulkan>; 1] = [&layer];
            self.frame_stream
                .end(
                    frame_state.predicted_display_time,
                    xr::EnvironmentBlendMode::OPAQUE,
                    &layers,
                )
                .map_err(|e| Error::compositor(format!("end_frame: {e:?}")))?;
            self.counters.rendered += 1;
        } else {
            self.frame_stream
                .end(
                    frame_state.predicted_display_time,
                    xr::EnvironmentBlendMode::OPAQUE,
                    &[],
                )
                .map_err(|e| Error::compositor(format!("end_frame: {e:?}")))?;
        }
        Ok(())
    }

    /// Acquire → wait → blit → release for one eye. The surface is
    /// never held past this call.
    fn composite_one_eye(
        vk_ctx: &VulkanContext,
        swapchain: &mut EyeSwapchain,
        texture: &mut EyeTexture,
    ) -> Result<()> {
        let image_index = swapchain
            .handle
            .acquire_image()
            .map_err(|e| Error::compositor(format!("acquire_image: {e:?}")))?;
        swapchain
            .handle
            .wait_image(xr::Duration::INFINITE)
            .map_err(|e| Error::compositor(format!("wait_image: {e:?}")))?;

        let result = composite_eye(
            vk_ctx,
            texture,
            swapchain.images[image_index as usize],
            swapchain.extent,
        );

        // Release even when the blit failed; a surface must never
        // outlive its tick.
        let released = swapchain
            .handle
            .release_image()
            .map_err(|e| Error::compositor(format!("release_image: {e:?}")));
        result.and(released)
    }
}

/// Capture phase of one tick. A failed read is counted, logged at most
/// once per 60 consecutive failures, and yields `None`; the scheduler
/// then re-presents the previous eye textures instead of stalling the
/// compositor handshake.
fn capture_frame(
    camera: &mut dyn FrameSource,
    counters: &mut PipelineCounters,
    failed_reads: &mut u64,
) -> Option<StereoFrame> {
    match camera.read_frame() {
        Ok(frame) => {
            *failed_reads = 0;
            counters.captured += 1;
            Some(frame)
        }
        Err(err) => {
            *failed_reads += 1;
            counters.dropped += 1;
            if should_log_capture_failure(*failed_reads) {
                warn!(%err, attempts = *failed_reads, "camera read failed");
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    struct FlakySource {
        fail: bool,
    }

    impl FrameSource for FlakySource {
        fn read_frame(&mut self) -> Result<StereoFrame> {
            if self.fail {
                Err(Error::camera("device gone"))
            } else {
                let data = Bytes::from(vec![0u8; 4 * 2 * 3]);
                Ok(StereoFrame::new(4, 2, data).unwrap())
            }
        }
    }

    #[test]
    fn failed_reads_yield_no_frame_but_never_abort() {
        let mut camera = FlakySource { fail: true };
        let mut counters = PipelineCounters::default();
        let mut failed_reads = 0;

        for _ in 0..120 {
            let frame = capture_frame(&mut camera, &mut counters, &mut failed_reads);
            assert!(frame.is_none());
        }
        assert_eq!(counters.dropped, 120);
        assert_eq!(counters.captured, 0);
        assert_eq!(failed_reads, 120);
    }

    #[test]
    fn successful_read_resets_failure_streak() {
        let mut camera = FlakySource { fail: true };
        let mut counters = PipelineCounters::default();
        let mut failed_reads = 0;

        capture_frame(&mut camera, &mut counters, &mut failed_reads);
        assert_eq!(failed_reads, 1);

        camera.fail = false;
        let frame = capture_frame(&mut camera, &mut counters, &mut failed_reads);
        assert!(frame.is_some());
        assert_eq!(failed_reads, 0);
        assert_eq!(counters.captured, 1);
        assert_eq!(counters.dropped, 1);
    }
}
