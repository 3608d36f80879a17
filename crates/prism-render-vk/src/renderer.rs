// SPDX-License-Identifier: CEPL-1.0
//! The frame loop: acquire, record, submit, present, and swapchain
//! recreation when the surface changes under us.
use crate::descriptor::DescriptorPool;
use crate::device::Device;
use crate::error::VkError;
use crate::frame::{FrameScheduler, FrameSync, FrameTicket};
use crate::instance::InstanceContext;
use crate::physical::pick_physical_device;
use crate::pipeline::{Pipeline, PipelineConfig};
use crate::render_image::RenderTargets;
use crate::render_pass::RenderPass;
use crate::shader::{Shader, ShaderInterface};
use crate::swapchain::{Acquired, Swapchain};
use crate::teardown::{teardown_plan, TeardownStep, SWAPCHAIN_TEARDOWN};
use crate::uniform::GlobalUniforms;
use crate::upload::{Material, Mesh, Texture};
use crate::MAX_FRAMES_IN_FLIGHT;
use anyhow::{anyhow, Context, Result};
use ash::vk;
use prism_math::glam::Mat4;
use prism_math::{GlobalUbo, MaterialUbo, PushConstants};
use prism_render::{FrameStatus, PipelineKind, RenderOptions, RenderSize, Renderer};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::mem::ManuallyDrop;
use tracing::{debug, info, trace, warn};

fn live<'a, T>(slot: &'a Option<T>, what: &str) -> Result<&'a T> {
    slot.as_ref()
        .ok_or_else(|| anyhow!("{what} is not available"))
}

/// Phong, unlit and wireframe, in [`PipelineKind::ALL`] order. The variants
/// are clones of the Phong configuration with one field swapped.
fn pipeline_variants(
    device: &Device,
    interface: &ShaderInterface,
    phong: &Shader,
    unlit: &Shader,
) -> Vec<Pipeline> {
    let mut cfg = PipelineConfig::new("phong", interface.set_layouts());
    cfg.set_shader(phong)
        .set_msaa(device.msaa_samples())
        .set_push_constants_size(std::mem::size_of::<PushConstants>() as u32);
    let phong = Pipeline::new(device.raw(), cfg);

    let mut unlit_p = phong.clone();
    unlit_p.config_mut().set_name("unlit").set_shader(unlit);

    let mut wire = phong.clone();
    wire.config_mut()
        .set_name("wireframe")
        .set_wireframe_mode(true)
        .set_cull_mode(vk::CullModeFlags::NONE);

    vec![phong, unlit_p, wire]
}

pub struct VkRenderer {
    scheduler: FrameScheduler,
    size: RenderSize,
    clear_color: [f32; 4],
    depth_format: vk::Format,
    /// Pipeline bound by the recording in progress.
    bound: PipelineKind,

    swapchain: Option<Swapchain>,
    targets: Option<RenderTargets>,
    render_pass: Option<RenderPass>,
    pipelines: Vec<Pipeline>,
    sync: Option<FrameSync>,
    white: Option<Texture>,
    default_material: Option<Material>,
    globals: Option<GlobalUniforms>,
    pool: Option<DescriptorPool>,
    shaders: Vec<Shader>,
    interface: Option<ShaderInterface>,

    // Released explicitly, last, by the teardown plan.
    device: ManuallyDrop<Device>,
    ctx: ManuallyDrop<InstanceContext>,
}

impl VkRenderer {
    pub fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        options: RenderOptions,
    ) -> Result<Self> {
        // Locals unwind in reverse on error, which is already a valid
        // destruction order.
        let ctx = InstanceContext::new(window, display)?;
        let info = pick_physical_device(&ctx)?;
        let device = Device::new(&ctx, &info, options.max_msaa_samples)?;
        let depth_format = device.find_depth_format()?;

        let interface = ShaderInterface::new(&device)?;
        let pool = DescriptorPool::new(&device)?;
        let phong = Shader::phong(&device)?;
        let unlit = Shader::unlit(&device)?;
        let pipelines = pipeline_variants(&device, &interface, &phong, &unlit);

        let sync = FrameSync::new(&device, MAX_FRAMES_IN_FLIGHT)?;
        let globals = GlobalUniforms::new(
            &device,
            &pool,
            interface.global.handle(),
            MAX_FRAMES_IN_FLIGHT,
        )?;
        let white = Texture::white(&device)?;
        let default_material = Material::new(
            &device,
            &pool,
            interface.material.handle(),
            &MaterialUbo::default(),
            &white,
            &white,
        )?;

        let mut r = Self {
            scheduler: FrameScheduler::new(MAX_FRAMES_IN_FLIGHT, options.vsync, options.pipeline),
            size,
            clear_color: options.clear_color,
            depth_format,
            bound: options.pipeline,
            swapchain: None,
            targets: None,
            render_pass: None,
            pipelines,
            sync: Some(sync),
            white: Some(white),
            default_material: Some(default_material),
            globals: Some(globals),
            pool: Some(pool),
            shaders: vec![phong, unlit],
            interface: Some(interface),
            device: ManuallyDrop::new(device),
            ctx: ManuallyDrop::new(ctx),
        };

        if size.is_zero() {
            r.scheduler.request_recreate();
        } else {
            let vsync = r.scheduler.apply_pending();
            r.build_swapchain_state(vsync)?;
        }
        info!(
            "vulkan renderer ready: {}x{}, pipeline {:?}, vsync {}",
            size.width, size.height, options.pipeline, options.vsync
        );
        Ok(r)
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn material_layout(&self) -> Result<vk::DescriptorSetLayout> {
        Ok(live(&self.interface, "shader interface")?.material.handle())
    }

    pub fn descriptor_pool(&self) -> Result<&DescriptorPool> {
        live(&self.pool, "descriptor pool")
    }

    pub fn white_texture(&self) -> Result<&Texture> {
        live(&self.white, "white texture")
    }

    pub fn swapchain_extent(&self) -> Option<vk::Extent2D> {
        self.swapchain.as_ref().map(Swapchain::extent)
    }

    pub fn vsync(&self) -> bool {
        self.scheduler.vsync()
    }

    pub fn pipeline(&self) -> PipelineKind {
        self.scheduler.pipeline()
    }

    pub fn wait_idle(&self) -> Result<()> {
        self.device.wait_idle()
    }

    /// Writes the current frame's copy. Call between `begin_frame` and
    /// `end_frame`, once the slot's fence has been waited on.
    pub fn update_globals(&self, ubo: &GlobalUbo) -> Result<()> {
        let ticket = self
            .scheduler
            .ticket()
            .ok_or_else(|| anyhow!("update_globals outside of a recording frame"))?;
        live(&self.globals, "global uniforms")?.update(ticket.frame, ubo)
    }

    pub fn begin_frame(&mut self) -> Result<FrameStatus> {
        if self.size.is_zero() {
            trace!("zero-sized surface; frame skipped");
            return Ok(FrameStatus::Skipped);
        }
        if self.swapchain.is_none() {
            self.scheduler.take_recreate();
            self.recreate_swapchain("surface restored")?;
        }

        self.scheduler.can_begin()?;
        let frame = self.scheduler.current();
        let sync = live(&self.sync, "frame sync")?;
        sync.wait(frame)?;
        self.scheduler.retire();
        self.scheduler.begin_acquire()?;

        let acquired =
            live(&self.swapchain, "swapchain")?.acquire_next_image(sync.image_available[frame])?;
        let image = match acquired {
            Acquired::OutOfDate => {
                self.scheduler.abandon_acquire();
                if self.scheduler.take_recreate() {
                    self.recreate_swapchain("acquire reported out of date")?;
                }
                return Ok(FrameStatus::Skipped);
            }
            Acquired::Image { index, suboptimal } => {
                if suboptimal {
                    trace!("acquired suboptimal image {index}");
                }
                index
            }
        };

        live(&self.sync, "frame sync")?.reset(frame)?;
        let ticket = self.scheduler.begin_recording(image)?;
        self.bound = self.scheduler.pipeline();
        self.record_begin(ticket)?;
        Ok(FrameStatus::Recording)
    }

    fn record_begin(&self, ticket: FrameTicket) -> Result<()> {
        let d = self.device.raw();
        let cmd = live(&self.sync, "frame sync")?.command_buffers[ticket.frame];
        let swapchain = live(&self.swapchain, "swapchain")?;
        let render_pass = live(&self.render_pass, "render pass")?;
        let globals = live(&self.globals, "global uniforms")?;
        let pipeline = &self.pipelines[self.bound.index()];

        let begin = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            ..Default::default()
        };
        // Matches the attachment order: msaa color, depth, resolve.
        let clears = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.clear_color,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.clear_color,
                },
            },
        ];
        let rp_begin = vk::RenderPassBeginInfo {
            s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
            render_pass: render_pass.handle(),
            framebuffer: swapchain.framebuffer(ticket.image),
            render_area: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: swapchain.extent(),
            },
            clear_value_count: clears.len() as u32,
            p_clear_values: clears.as_ptr(),
            ..Default::default()
        };

        unsafe {
            d.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .context("reset_command_buffer")?;
            d.begin_command_buffer(cmd, &begin)
                .context("begin_command_buffer")?;
            d.cmd_begin_render_pass(cmd, &rp_begin, vk::SubpassContents::INLINE);
            d.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline.handle());
            d.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline.layout(),
                0,
                &[globals.set(ticket.frame)],
                &[],
            );
        }
        Ok(())
    }

    /// Records one indexed draw. Without a material the white default is bound.
    pub fn draw(&self, model: &Mat4, mesh: &Mesh, material: Option<&Material>) {
        let Some(ticket) = self.scheduler.ticket() else {
            debug!("draw outside of a frame ignored");
            return;
        };
        let (Some(sync), Some(fallback)) = (&self.sync, &self.default_material) else {
            return;
        };
        let d = self.device.raw();
        let cmd = sync.command_buffers[ticket.frame];
        let layout = self.pipelines[self.bound.index()].layout();
        let set = material.unwrap_or(fallback).set();
        let pc = PushConstants::from_model(*model);

        unsafe {
            d.cmd_push_constants(
                cmd,
                layout,
                vk::ShaderStageFlags::VERTEX,
                0,
                bytemuck::bytes_of(&pc),
            );
            d.cmd_bind_descriptor_sets(cmd, vk::PipelineBindPoint::GRAPHICS, layout, 1, &[set], &[]);
            d.cmd_bind_vertex_buffers(cmd, 0, &[mesh.vertex_buffer()], &[0]);
            d.cmd_bind_index_buffer(cmd, mesh.index_buffer(), 0, vk::IndexType::UINT32);
            d.cmd_draw_indexed(cmd, mesh.index_count(), 1, 0, 0, 0);
        }
    }

    pub fn end_frame(&mut self) -> Result<()> {
        let Some(ticket) = self.scheduler.ticket() else {
            return Ok(());
        };
        let d = self.device.raw();
        let sync = live(&self.sync, "frame sync")?;
        let cmd = sync.command_buffers[ticket.frame];

        unsafe {
            d.cmd_end_render_pass(cmd);
            d.end_command_buffer(cmd).context("end_command_buffer")?;
        }

        let wait_stage = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: 1,
            p_wait_semaphores: &sync.image_available[ticket.frame],
            p_wait_dst_stage_mask: &wait_stage,
            command_buffer_count: 1,
            p_command_buffers: &cmd,
            signal_semaphore_count: 1,
            p_signal_semaphores: &sync.render_finished[ticket.frame],
            ..Default::default()
        };
        unsafe {
            d.queue_submit(
                self.device.graphics_queue(),
                std::slice::from_ref(&submit),
                sync.in_flight[ticket.frame],
            )
        }
        .map_err(VkError::Submit)?;
        self.scheduler.mark_submitted();

        let stale = live(&self.swapchain, "swapchain")?.present(
            self.device.present_queue(),
            sync.render_finished[ticket.frame],
            ticket.image,
        )?;
        if stale {
            self.scheduler.mark_stale();
        }
        self.scheduler.advance();

        // Stale results and requests collapse into one rebuild.
        let stale = self.scheduler.is_stale();
        if self.scheduler.take_recreate() {
            if self.size.is_zero() {
                self.scheduler.request_recreate();
            } else {
                let reason = if stale {
                    "present reported out of date or suboptimal"
                } else {
                    "resize or present-mode change"
                };
                self.recreate_swapchain(reason)?;
            }
        }
        Ok(())
    }

    fn recreate_swapchain(&mut self, reason: &str) -> Result<()> {
        self.device.wait_idle()?;
        for step in SWAPCHAIN_TEARDOWN {
            self.run_teardown(step, false);
        }
        let vsync = self.scheduler.apply_pending();
        self.build_swapchain_state(vsync)?;
        info!("swapchain recreated: {reason}");
        Ok(())
    }

    // STRICT ORDER: swapchain -> render pass -> pipelines -> render targets -> framebuffers.
    fn build_swapchain_state(&mut self, vsync: bool) -> Result<()> {
        let mut swapchain = Swapchain::new(&self.device, &self.ctx, self.size, vsync)?;
        let render_pass = RenderPass::new(
            &self.device,
            swapchain.format(),
            self.depth_format,
            self.device.msaa_samples(),
        )?;
        for p in &mut self.pipelines {
            p.build(render_pass.handle(), swapchain.extent())?;
        }
        let targets = RenderTargets::new(
            &self.device,
            swapchain.extent(),
            swapchain.format(),
            self.depth_format,
        )?;
        swapchain.create_framebuffers(render_pass.handle(), targets.color.view(), targets.depth.view())?;

        self.swapchain = Some(swapchain);
        self.render_pass = Some(render_pass);
        self.targets = Some(targets);
        Ok(())
    }

    /// `final_pass` also drops pipeline configurations; recreation keeps
    /// them for the rebuild.
    fn run_teardown(&mut self, step: TeardownStep, final_pass: bool) {
        trace!(?step, final_pass, "teardown");
        match step {
            TeardownStep::Framebuffers => {
                if let Some(sc) = self.swapchain.as_mut() {
                    sc.destroy_framebuffers();
                }
            }
            TeardownStep::SwapchainViews => {
                if let Some(sc) = self.swapchain.as_mut() {
                    sc.destroy_views();
                }
            }
            TeardownStep::Swapchain => self.swapchain = None,
            TeardownStep::RenderTargets => self.targets = None,
            TeardownStep::RenderPass => self.render_pass = None,
            TeardownStep::Pipelines => {
                if final_pass {
                    self.pipelines.clear();
                } else {
                    self.pipelines.iter_mut().for_each(Pipeline::cleanup);
                }
            }
            TeardownStep::FrameSync => self.sync = None,
            TeardownStep::Materials => {
                self.default_material = None;
                self.white = None;
            }
            TeardownStep::GlobalUniforms => self.globals = None,
            TeardownStep::DescriptorPool => self.pool = None,
            TeardownStep::Shaders => self.shaders.clear(),
            TeardownStep::SetLayouts => self.interface = None,
            // SAFETY: every object created from the device or instance is
            // gone by now, and neither field is touched again.
            TeardownStep::Device => unsafe { ManuallyDrop::drop(&mut self.device) },
            TeardownStep::Instance => unsafe { ManuallyDrop::drop(&mut self.ctx) },
        }
    }
}

impl Drop for VkRenderer {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            warn!("wait_idle before teardown failed: {e:#}");
        }
        for step in teardown_plan() {
            self.run_teardown(step, true);
        }
    }
}

impl Renderer for VkRenderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        options: RenderOptions,
    ) -> Result<Self> {
        VkRenderer::new(window, display, size, options)
    }

    fn on_framebuffer_resize(&mut self, size: RenderSize) {
        if size != self.size {
            debug!("framebuffer resized to {}x{}", size.width, size.height);
        }
        self.size = size;
        self.scheduler.request_recreate();
    }

    fn begin_frame(&mut self) -> Result<FrameStatus> {
        VkRenderer::begin_frame(self)
    }

    fn end_frame(&mut self) -> Result<()> {
        VkRenderer::end_frame(self)
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.clear_color = rgba;
    }

    fn set_vsync(&mut self, on: bool) {
        info!("vsync {} requested; applies on next swapchain rebuild", on);
        self.scheduler.set_vsync(on);
    }

    fn set_pipeline(&mut self, kind: PipelineKind) {
        info!("pipeline {:?} selected", kind);
        self.scheduler.set_pipeline(kind);
    }
}
