// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use serde::Deserialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub fn is_zero(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Pipeline variants the renderer keeps warm; switching is a bind, not a rebuild.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineKind {
    #[default]
    Phong,
    Unlit,
    Wireframe,
}

impl PipelineKind {
    pub const ALL: [PipelineKind; 3] = [Self::Phong, Self::Unlit, Self::Wireframe];

    pub fn next(self) -> Self {
        match self {
            Self::Phong => Self::Unlit,
            Self::Unlit => Self::Wireframe,
            Self::Wireframe => Self::Phong,
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

#[derive(Clone, Copy, Debug)]
pub struct RenderOptions {
    pub vsync: bool,
    pub pipeline: PipelineKind,
    pub clear_color: [f32; 4],
    /// Upper bound on the multisample count; the device maximum still applies.
    pub max_msaa_samples: u32,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            vsync: true,
            pipeline: PipelineKind::Phong,
            clear_color: [0.01, 0.01, 0.01, 1.0],
            max_msaa_samples: 64,
        }
    }
}

/// Outcome of starting a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    /// A command buffer is recording; issue draws, then end the frame.
    Recording,
    /// Nothing was started (surface rebuilt or zero-sized); do not end the frame.
    Skipped,
}

pub trait Renderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        options: RenderOptions,
    ) -> Result<Self>
    where
        Self: Sized;

    /// Records the new framebuffer size; recreation happens inside the frame loop.
    fn on_framebuffer_resize(&mut self, size: RenderSize);
    fn begin_frame(&mut self) -> Result<FrameStatus>;
    fn end_frame(&mut self) -> Result<()>;
    fn set_clear_color(&mut self, rgba: [f32; 4]);
    fn set_vsync(&mut self, _on: bool) {}
    fn set_pipeline(&mut self, _kind: PipelineKind) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_kind_cycles_through_all() {
        let mut k = PipelineKind::default();
        let mut seen = Vec::new();
        for _ in 0..PipelineKind::ALL.len() {
            seen.push(k);
            k = k.next();
        }
        assert_eq!(seen, PipelineKind::ALL);
        assert_eq!(k, PipelineKind::Phong);
    }

    #[test]
    fn index_matches_table_position() {
        for (i, k) in PipelineKind::ALL.iter().enumerate() {
            assert_eq!(k.index(), i);
        }
    }

    #[test]
    fn zero_size_detection() {
        assert!(RenderSize { width: 0, height: 600 }.is_zero());
        assert!(!RenderSize { width: 1, height: 1 }.is_zero());
    }
}
