// SPDX-License-Identifier: CEPL-1.0
pub use winit;

use winit::dpi::PhysicalSize;
use winit::window::{Window, WindowAttributes};

pub fn window_attributes(title: &str, width: u32, height: u32) -> WindowAttributes {
    Window::default_attributes()
        .with_title(title)
        .with_inner_size(PhysicalSize::new(width.max(1), height.max(1)))
}

/// Framebuffer size in physical pixels; zero while minimised on most platforms.
pub fn framebuffer_size(window: &Window) -> (u32, u32) {
    let size = window.inner_size();
    (size.width, size.height)
}
