// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
mod config;
mod scene;

use anyhow::{Context, Result};
use clap::Parser;
use config::{load_cfg, AppCfg, Args};
use prism_core::{init_tracing, FpsCounter, FrameTimer};
use prism_math::glam::{Mat4, Vec3};
use prism_math::{Camera, GlobalUbo, MaterialUbo};
use prism_platform::{framebuffer_size, window_attributes};
use prism_render::{FrameStatus, RenderOptions, RenderSize, Renderer};
use prism_render_vk::{Material, Mesh, Texture, VkRenderer};
use tracing::{error, info};

use prism_platform::winit::{
    application::ApplicationHandler,
    event::{ElementState, KeyEvent, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    raw_window_handle::{HasDisplayHandle, HasWindowHandle},
    window::{Window, WindowId},
};

/// GPU objects owned by the demo. Dropped before the renderer.
struct Scene {
    cube: Mesh,
    material: Material,
    _diffuse: Texture,
}

impl Scene {
    fn new(r: &VkRenderer) -> Result<Self> {
        let device = r.device();
        let (vertices, indices) = scene::cube();
        let cube = Mesh::new(device, &vertices, &indices).context("cube mesh")?;
        let diffuse = Texture::from_rgba8(device, 256, 256, &scene::checker(256, 8))
            .context("checker texture")?;
        let params = MaterialUbo {
            specular: prism_math::glam::Vec4::splat(0.6),
            ..Default::default()
        };
        let material = Material::new(
            device,
            r.descriptor_pool()?,
            r.material_layout()?,
            &params,
            &diffuse,
            r.white_texture()?,
        )?;
        Ok(Self {
            cube,
            material,
            _diffuse: diffuse,
        })
    }

    fn release(self, r: &VkRenderer) -> Result<()> {
        self.material.release(r.descriptor_pool()?)
    }
}

struct App {
    cfg: AppCfg,
    options: RenderOptions,

    // Field order is drop order: scene, renderer, window.
    scene: Option<Scene>,
    renderer: Option<VkRenderer>,
    window: Option<Window>,

    render_size: RenderSize,
    paused: bool,
    camera: Camera,
    spin: f32,
    timer: FrameTimer,
    fps: FpsCounter,
}

impl App {
    fn new(cfg: AppCfg, options: RenderOptions) -> Self {
        Self {
            cfg,
            options,
            scene: None,
            renderer: None,
            window: None,
            render_size: RenderSize {
                width: 0,
                height: 0,
            },
            paused: false,
            camera: Camera::default(),
            spin: 0.0,
            timer: FrameTimer::new(),
            fps: FpsCounter::new(1.0),
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let w = &self.cfg.window;
        let window = event_loop
            .create_window(window_attributes(&w.title, w.width, w.height))
            .context("create_window")?;

        let (width, height) = framebuffer_size(&window);
        self.render_size = RenderSize { width, height };
        self.camera.set_viewport(width, height);

        let wh = window.window_handle().context("window_handle")?;
        let dh = window.display_handle().context("display_handle")?;
        let renderer = VkRenderer::new(&wh, &dh, self.render_size, self.options)?;
        let scene = Scene::new(&renderer)?;

        self.scene = Some(scene);
        self.renderer = Some(renderer);
        self.window = Some(window);
        Ok(())
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(r) = &self.renderer {
            if let Err(e) = r.wait_idle() {
                error!("wait_idle: {e:#}");
            }
            if let Some(scene) = self.scene.take() {
                if let Err(e) = scene.release(r) {
                    error!("scene release: {e:#}");
                }
            }
        }
        self.scene = None;
        self.renderer = None;
        self.window = None;
        event_loop.exit();
    }

    fn on_key(&mut self, event_loop: &ActiveEventLoop, key: KeyCode) {
        if key == KeyCode::Escape {
            self.shutdown(event_loop);
            return;
        }
        let Some(r) = self.renderer.as_mut() else {
            return;
        };
        match key {
            KeyCode::KeyV => {
                let on = !r.vsync();
                r.set_vsync(on);
            }
            KeyCode::KeyP => {
                let next = r.pipeline().next();
                r.set_pipeline(next);
            }
            _ => {}
        }
    }

    fn frame(&mut self) -> Result<()> {
        let (Some(r), Some(scene)) = (self.renderer.as_mut(), self.scene.as_ref()) else {
            return Ok(());
        };
        let dt = self.timer.tick();
        self.spin += dt * 0.8;

        if r.begin_frame()? == FrameStatus::Skipped {
            return Ok(());
        }

        let mut ubo = GlobalUbo::new(self.camera.view(), self.camera.projection());
        ubo.set_lights(&scene::lights());
        r.update_globals(&ubo)?;

        let model = Mat4::from_rotation_y(self.spin) * Mat4::from_rotation_x(self.spin * 0.5);
        r.draw(&model, &scene.cube, Some(&scene.material));
        let floor = Mat4::from_translation(Vec3::new(0.0, -1.0, 0.0))
            * Mat4::from_scale(Vec3::new(4.0, 0.1, 4.0));
        r.draw(&floor, &scene.cube, None);

        r.end_frame()?;

        if self.fps.update(dt) {
            info!(
                "fps ~ {} ({:.2} ms), pipeline {:?}",
                self.fps.fps(),
                self.fps.frame_time().as_secs_f64() * 1000.0,
                r.pipeline()
            );
        }
        Ok(())
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            if let Err(e) = self.init(event_loop) {
                error!("renderer init failed: {e:#}");
                event_loop.exit();
                return;
            }
            info!("config: {:?}", self.cfg);
        }
        self.paused = self.render_size.is_zero();
        if let Some(w) = &self.window {
            w.request_redraw();
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, window_id: WindowId, event: WindowEvent) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.shutdown(event_loop);
            }

            WindowEvent::Resized(new_size) => {
                self.render_size = RenderSize {
                    width: new_size.width,
                    height: new_size.height,
                };
                self.paused = self.render_size.is_zero();
                self.camera.set_viewport(new_size.width, new_size.height);
                if let Some(r) = self.renderer.as_mut() {
                    r.on_framebuffer_resize(self.render_size);
                }
            }

            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(code),
                        state: ElementState::Pressed,
                        repeat: false,
                        ..
                    },
                ..
            } => self.on_key(event_loop, code),

            WindowEvent::RedrawRequested => {
                if self.paused {
                    return;
                }
                if let Err(e) = self.frame() {
                    error!("frame failed: {e:#}");
                    self.shutdown(event_loop);
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        // Minimised: sleep until the next resize instead of spinning.
        if self.paused {
            event_loop.set_control_flow(ControlFlow::Wait);
            return;
        }
        event_loop.set_control_flow(ControlFlow::Poll);
        if let Some(w) = &self.window {
            w.request_redraw();
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let cfg = load_cfg(&args.config);
    let options = config::render_options(&cfg, &args);

    let event_loop: EventLoop<()> = EventLoop::new()?;
    let mut app = App::new(cfg, options);
    event_loop.run_app(&mut app)?;
    Ok(())
}
