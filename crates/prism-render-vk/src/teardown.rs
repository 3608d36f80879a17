// SPDX-License-Identifier: CEPL-1.0
//! Destruction order. Recreation runs the swapchain-dependent prefix; the
//! renderer's drop runs the whole plan.

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TeardownStep {
    Framebuffers,
    SwapchainViews,
    Swapchain,
    RenderTargets,
    RenderPass,
    Pipelines,
    FrameSync,
    Materials,
    GlobalUniforms,
    DescriptorPool,
    Shaders,
    SetLayouts,
    Device,
    Instance,
}

/// Everything tied to the surface extent or format.
pub const SWAPCHAIN_TEARDOWN: [TeardownStep; 6] = [
    TeardownStep::Framebuffers,
    TeardownStep::SwapchainViews,
    TeardownStep::Swapchain,
    TeardownStep::RenderTargets,
    TeardownStep::RenderPass,
    TeardownStep::Pipelines,
];

pub fn teardown_plan() -> Vec<TeardownStep> {
    use TeardownStep::*;
    let mut plan = SWAPCHAIN_TEARDOWN.to_vec();
    plan.extend([
        FrameSync,
        Materials,
        GlobalUniforms,
        DescriptorPool,
        Shaders,
        SetLayouts,
        Device,
        Instance,
    ]);
    plan
}
