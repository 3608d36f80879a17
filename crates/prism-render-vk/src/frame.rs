// SPDX-License-Identifier: CEPL-1.0
//! Frame-in-flight bookkeeping. [`FrameScheduler`] is the CPU-side state
//! machine; [`FrameSync`] owns the fences, semaphores and command buffers it
//! indexes.
use crate::device::Device;
use anyhow::{bail, Context, Result};
use ash::vk;
use prism_render::PipelineKind;
use tracing::trace;

/// Upper bound on fence waits. Large enough to never fire on a healthy GPU.
pub const FENCE_TIMEOUT_NS: u64 = u64::MAX;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    /// Fence waited on; an image is being acquired for this slot.
    Acquiring,
    Recording,
    Submitted,
}

/// Frame slot being recorded and the presentable image it targets. The two
/// indices advance independently.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameTicket {
    pub frame: usize,
    pub image: u32,
}

#[derive(Debug)]
pub struct FrameScheduler {
    slots: Vec<SlotState>,
    current: usize,
    image: Option<u32>,
    recreate_requested: bool,
    stale: bool,
    vsync: bool,
    pending_vsync: Option<bool>,
    pipeline: PipelineKind,
}

impl FrameScheduler {
    pub fn new(frames: usize, vsync: bool, pipeline: PipelineKind) -> Self {
        Self {
            slots: vec![SlotState::Idle; frames.max(1)],
            current: 0,
            image: None,
            recreate_requested: false,
            stale: false,
            vsync,
            pending_vsync: None,
            pipeline,
        }
    }

    pub fn frames(&self) -> usize {
        self.slots.len()
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn slot(&self, frame: usize) -> SlotState {
        self.slots[frame]
    }

    /// Checked before the fence wait: a slot still open on the CPU has a
    /// reset fence that nothing will signal.
    pub fn can_begin(&self) -> Result<()> {
        let frame = self.current;
        match self.slots[frame] {
            SlotState::Idle | SlotState::Submitted => Ok(()),
            other => bail!("frame slot {frame} is {other:?}; end the open frame first"),
        }
    }

    /// Called once the current slot's fence has signaled.
    pub fn retire(&mut self) {
        if self.slots[self.current] == SlotState::Submitted {
            self.slots[self.current] = SlotState::Idle;
        }
    }

    pub fn begin_acquire(&mut self) -> Result<usize> {
        let frame = self.current;
        match self.slots[frame] {
            SlotState::Idle => {}
            other => bail!("frame slot {frame} is {other:?}; wait on its fence first"),
        }
        self.slots[frame] = SlotState::Acquiring;
        Ok(frame)
    }

    /// Acquire gave no image. Nothing was submitted, so the slot's fence is
    /// still signaled and the slot goes straight back to idle.
    pub fn abandon_acquire(&mut self) {
        if self.slots[self.current] == SlotState::Acquiring {
            self.slots[self.current] = SlotState::Idle;
        }
        self.stale = true;
    }

    pub fn begin_recording(&mut self, image: u32) -> Result<FrameTicket> {
        let frame = self.current;
        match self.slots[frame] {
            SlotState::Acquiring => {}
            other => bail!("frame slot {frame} is {other:?}; acquire an image first"),
        }
        self.slots[frame] = SlotState::Recording;
        self.image = Some(image);
        trace!(frame, image, "recording");
        Ok(FrameTicket { frame, image })
    }

    pub fn is_recording(&self) -> bool {
        self.slots[self.current] == SlotState::Recording
    }

    pub fn ticket(&self) -> Option<FrameTicket> {
        if !self.is_recording() {
            return None;
        }
        self.image.map(|image| FrameTicket {
            frame: self.current,
            image,
        })
    }

    pub fn mark_submitted(&mut self) {
        if self.slots[self.current] == SlotState::Recording {
            self.slots[self.current] = SlotState::Submitted;
        }
    }

    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.slots.len();
        self.image = None;
    }

    /// Slots holding work the GPU may not have finished.
    pub fn in_flight(&self) -> usize {
        self.slots.iter().filter(|&&s| s != SlotState::Idle).count()
    }

    pub fn request_recreate(&mut self) {
        self.recreate_requested = true;
    }

    /// Acquire or present reported the swapchain out of date or suboptimal.
    pub fn mark_stale(&mut self) {
        self.stale = true;
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// True at most once per burst of requests, whatever mix of resizes,
    /// stale results and present-mode changes raised it. A pending present
    /// mode stays due until [`Self::apply_pending`] consumes it.
    pub fn take_recreate(&mut self) -> bool {
        let requested = std::mem::take(&mut self.recreate_requested);
        let stale = std::mem::take(&mut self.stale);
        requested || stale || self.pending_vsync.is_some()
    }

    pub fn recreate_pending(&self) -> bool {
        self.recreate_requested || self.stale || self.pending_vsync.is_some()
    }

    /// Present mode in effect for the live swapchain.
    pub fn vsync(&self) -> bool {
        self.vsync
    }

    /// Queues a present-mode change for the next recreation. Switching back
    /// to the live mode first withdraws it.
    pub fn set_vsync(&mut self, on: bool) {
        self.pending_vsync = (on != self.vsync).then_some(on);
    }

    /// Called from inside recreation; returns the present mode to build with.
    pub fn apply_pending(&mut self) -> bool {
        if let Some(v) = self.pending_vsync.take() {
            self.vsync = v;
        }
        self.vsync
    }

    pub fn pipeline(&self) -> PipelineKind {
        self.pipeline
    }

    /// Bound from the next frame on; the current recording keeps its pipeline.
    pub fn set_pipeline(&mut self, kind: PipelineKind) {
        self.pipeline = kind;
    }
}

/// Per-slot synchronization objects, created once and kept across
/// swapchain recreation.
pub struct FrameSync {
    device: ash::Device,
    pool: vk::CommandPool,
    pub image_available: Vec<vk::Semaphore>,
    pub render_finished: Vec<vk::Semaphore>,
    pub in_flight: Vec<vk::Fence>,
    pub command_buffers: Vec<vk::CommandBuffer>,
}

impl FrameSync {
    pub fn new(device: &Device, frames: usize) -> Result<Self> {
        let d = device.raw();
        let mut out = Self {
            device: d.clone(),
            pool: device.command_pool(),
            image_available: Vec::with_capacity(frames),
            render_finished: Vec::with_capacity(frames),
            in_flight: Vec::with_capacity(frames),
            command_buffers: Vec::new(),
        };

        let sci = vk::SemaphoreCreateInfo {
            s_type: vk::StructureType::SEMAPHORE_CREATE_INFO,
            ..Default::default()
        };
        // Signaled so the first wait on each slot returns at once.
        let fci = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags: vk::FenceCreateFlags::SIGNALED,
            ..Default::default()
        };
        for _ in 0..frames {
            out.image_available
                .push(unsafe { d.create_semaphore(&sci, None) }.context("create_semaphore")?);
            out.render_finished
                .push(unsafe { d.create_semaphore(&sci, None) }.context("create_semaphore")?);
            out.in_flight
                .push(unsafe { d.create_fence(&fci, None) }.context("create_fence")?);
        }

        let ai = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: out.pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: frames as u32,
            ..Default::default()
        };
        out.command_buffers =
            unsafe { d.allocate_command_buffers(&ai) }.context("allocate_command_buffers")?;
        Ok(out)
    }

    pub fn wait(&self, frame: usize) -> Result<()> {
        unsafe {
            self.device
                .wait_for_fences(&[self.in_flight[frame]], true, FENCE_TIMEOUT_NS)
        }
        .context("wait_for_fences")
    }

    /// Only after an image was acquired; resetting earlier can leave the
    /// fence unsignaled forever if the frame is abandoned.
    pub fn reset(&self, frame: usize) -> Result<()> {
        unsafe { self.device.reset_fences(&[self.in_flight[frame]]) }.context("reset_fences")
    }
}

impl Drop for FrameSync {
    fn drop(&mut self) {
        unsafe {
            if !self.command_buffers.is_empty() {
                self.device
                    .free_command_buffers(self.pool, &self.command_buffers);
            }
            for &s in self.image_available.iter().chain(&self.render_finished) {
                self.device.destroy_semaphore(s, None);
            }
            for &f in &self.in_flight {
                self.device.destroy_fence(f, None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start(s: &mut FrameScheduler, image: u32) -> Result<FrameTicket> {
        s.can_begin()?;
        s.retire();
        s.begin_acquire()?;
        s.begin_recording(image)
    }

    fn run_frame(s: &mut FrameScheduler, image: u32) -> FrameTicket {
        let t = start(s, image).expect("slot idle");
        s.mark_submitted();
        s.advance();
        t
    }

    #[test]
    fn in_flight_never_exceeds_slot_count() {
        let mut s = FrameScheduler::new(2, true, PipelineKind::Phong);
        for i in 0..10 {
            // Simulate a GPU that never finishes: no retire.
            if s.begin_acquire().is_err() {
                break;
            }
            s.begin_recording(i).expect("acquiring");
            s.mark_submitted();
            s.advance();
            assert!(s.in_flight() <= 2);
        }
        assert_eq!(s.in_flight(), 2);
        // Slot 0 is still submitted; recording it again must wait.
        assert!(s.begin_acquire().is_err());
        s.retire();
        s.begin_acquire().expect("retired");
        assert!(s.begin_recording(0).is_ok());
        assert!(s.in_flight() <= 2);
    }

    #[test]
    fn frame_index_is_independent_of_image_index() {
        let mut s = FrameScheduler::new(2, true, PipelineKind::Phong);
        let images = [0, 1, 2, 0, 1, 2];
        let tickets: Vec<_> = images.iter().map(|&i| run_frame(&mut s, i)).collect();
        let frames: Vec<usize> = tickets.iter().map(|t| t.frame).collect();
        assert_eq!(frames, [0, 1, 0, 1, 0, 1]);
        let imgs: Vec<u32> = tickets.iter().map(|t| t.image).collect();
        assert_eq!(imgs, images);
    }

    #[test]
    fn burst_of_resizes_recreates_once() {
        let mut s = FrameScheduler::new(2, true, PipelineKind::Phong);
        assert!(!s.take_recreate());
        for _ in 0..5 {
            s.request_recreate();
        }
        assert!(s.take_recreate());
        assert!(!s.take_recreate());

        s.request_recreate();
        assert!(s.take_recreate());
        assert!(!s.recreate_pending());
    }

    #[test]
    fn vsync_toggle_waits_for_recreation() {
        let mut s = FrameScheduler::new(2, true, PipelineKind::Phong);
        start(&mut s, 0).expect("idle");

        s.set_vsync(false);
        // The frame in progress keeps the old mode.
        assert!(s.vsync());
        assert!(s.is_recording());
        s.mark_submitted();
        s.advance();

        assert!(s.take_recreate());
        assert!(!s.apply_pending());
        assert!(!s.vsync());
        // Nothing left to apply.
        assert!(!s.apply_pending());
    }

    #[test]
    fn toggling_back_before_recreation_cancels_the_rebuild() {
        let mut s = FrameScheduler::new(2, true, PipelineKind::Phong);
        s.set_vsync(false);
        assert!(s.recreate_pending());
        s.set_vsync(true);
        assert!(!s.recreate_pending());
        assert!(!s.take_recreate());
        assert!(s.apply_pending());

        // A resize raised alongside the toggle still rebuilds once.
        s.request_recreate();
        s.set_vsync(false);
        s.set_vsync(true);
        assert!(s.take_recreate());
        assert!(!s.take_recreate());
    }

    #[test]
    fn second_begin_is_refused_before_the_fence_wait() {
        let mut s = FrameScheduler::new(2, true, PipelineKind::Phong);
        start(&mut s, 0).expect("idle");
        assert!(s.can_begin().is_err());
        assert!(start(&mut s, 1).is_err());
        assert!(s.is_recording());

        s.mark_submitted();
        s.advance();
        s.can_begin().expect("next slot idle");
        start(&mut s, 1).expect("next slot idle");
        s.mark_submitted();
        s.advance();
        // Back on slot 0: submitted, so the fence wait is allowed.
        s.can_begin().expect("submitted slot may be waited on");
    }

    #[test]
    fn no_ticket_once_the_frame_has_ended() {
        let mut s = FrameScheduler::new(2, true, PipelineKind::Phong);
        start(&mut s, 0).expect("idle");
        assert_eq!(s.ticket().map(|t| t.frame), Some(0));
        s.mark_submitted();
        s.advance();
        // Slot 1 has not been waited on; nothing may write its uniforms.
        assert_eq!(s.current(), 1);
        assert_eq!(s.ticket(), None);
    }

    #[test]
    fn resize_then_out_of_date_acquire_rebuilds_once() {
        let mut s = FrameScheduler::new(2, true, PipelineKind::Phong);
        s.request_recreate();
        s.retire();
        s.begin_acquire().expect("idle");
        s.abandon_acquire();
        assert_eq!(s.slot(0), SlotState::Idle);
        assert!(s.is_stale());

        let rebuilds = (0..3).filter(|_| s.take_recreate()).count();
        assert_eq!(rebuilds, 1);
        // Next frame reuses the slot without a fence wait deadlock.
        start(&mut s, 0).expect("slot back to idle");
    }

    #[test]
    fn resize_then_suboptimal_present_rebuilds_once() {
        let mut s = FrameScheduler::new(2, true, PipelineKind::Phong);
        start(&mut s, 0).expect("idle");
        s.request_recreate();
        s.request_recreate();
        s.mark_submitted();
        s.mark_stale();
        s.advance();

        let rebuilds = (0..3).filter(|_| s.take_recreate()).count();
        assert_eq!(rebuilds, 1);
        assert!(!s.is_stale());
        assert!(!s.recreate_pending());
    }

    #[test]
    fn ticket_only_while_recording() {
        let mut s = FrameScheduler::new(2, true, PipelineKind::Unlit);
        assert_eq!(s.ticket(), None);
        start(&mut s, 3).expect("idle");
        assert_eq!(s.ticket(), Some(FrameTicket { frame: 0, image: 3 }));
        s.mark_submitted();
        assert_eq!(s.ticket(), None);
        assert_eq!(s.pipeline(), PipelineKind::Unlit);
    }
}
