use anyhow::Result;
use vulkanalia::prelude::v1_0::*;

use crate::renderer::RendererData;

/// Lifecycle of a command buffer. Every recording call checks the state it
/// requires and moves the buffer along; any transition outside of
/// [`CommandBufferState::can_transition`] is a programming error and asserts.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum CommandBufferState {
    Invalid,
    #[default]
    NotAllocated,
    Ready,
    Recording,
    InRenderpass,
    RecordingEnded,
    Submitted,
}

impl CommandBufferState {
    pub fn can_transition(self, next: CommandBufferState) -> bool {
        use CommandBufferState::*;

        matches!(
            (self, next),
            (NotAllocated, Ready)
                | (Ready, Recording)
                | (Recording, InRenderpass)
                | (InRenderpass, Recording)
                | (Recording, RecordingEnded)
                | (RecordingEnded, Submitted)
                | (Submitted, Ready)
                | (Ready, Ready)
                | (_, Invalid)
        )
    }
}

#[derive(Clone, Debug, Default)]
pub struct CommandBuffer {
    pub handle: vk::CommandBuffer,
    pub owner_pool: vk::CommandPool,
    pub state: CommandBufferState,
    pub is_primary: bool,
}

impl CommandBuffer {
    pub(crate) fn transition(&mut self, next: CommandBufferState) {
        assert!(
            self.state.can_transition(next),
            "Illegal command buffer transition: {:?} -> {:?}",
            self.state,
            next
        );
        self.state = next;
    }

    pub unsafe fn acquire(
        device: &Device,
        pool: vk::CommandPool,
        is_primary: bool,
    ) -> Result<Self> {
        let info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(if is_primary {
                vk::CommandBufferLevel::PRIMARY
            } else {
                vk::CommandBufferLevel::SECONDARY
            })
            .command_buffer_count(1);

        let handle = device.allocate_command_buffers(&info)?[0];

        let mut command_buffer = Self {
            handle,
            owner_pool: pool,
            state: CommandBufferState::NotAllocated,
            is_primary,
        };
        command_buffer.transition(CommandBufferState::Ready);

        Ok(command_buffer)
    }

    pub unsafe fn release(&mut self, device: &Device) {
        assert!(self.state != CommandBufferState::Invalid);

        device.free_command_buffers(self.owner_pool, &[self.handle]);
        self.handle = vk::CommandBuffer::null();
        self.transition(CommandBufferState::Invalid);
    }

    pub unsafe fn begin(
        &mut self,
        device: &Device,
        single_use: bool,
        renderpass_continue: bool,
        simultaneous_use: bool,
    ) -> Result<()> {
        let mut flags = vk::CommandBufferUsageFlags::empty();
        if single_use {
            flags |= vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT;
        }
        if renderpass_continue {
            flags |= vk::CommandBufferUsageFlags::RENDER_PASS_CONTINUE;
        }
        if simultaneous_use {
            flags |= vk::CommandBufferUsageFlags::SIMULTANEOUS_USE;
        }

        let info = vk::CommandBufferBeginInfo::builder().flags(flags);
        device.begin_command_buffer(self.handle, &info)?;
        self.transition(CommandBufferState::Recording);

        Ok(())
    }

    pub unsafe fn end(&mut self, device: &Device) -> Result<()> {
        assert!(
            self.state == CommandBufferState::Recording,
            "Ending a command buffer that is not recording ({:?}).",
            self.state
        );

        device.end_command_buffer(self.handle)?;
        self.transition(CommandBufferState::RecordingEnded);

        Ok(())
    }

    /// Records the transition to `Submitted`; the actual queue submission is
    /// the caller's business because it differs between the frame loop and
    /// scratch dispatch.
    pub fn mark_submitted(&mut self) {
        self.transition(CommandBufferState::Submitted);
    }

    pub fn reset(&mut self) {
        self.transition(CommandBufferState::Ready);
    }

    pub fn is_recording(&self) -> bool {
        matches!(
            self.state,
            CommandBufferState::Recording | CommandBufferState::InRenderpass
        )
    }
}

/// Each buffer allocated from the pool is independently resettable, which the
/// per-image reset in the frame loop relies on.
pub unsafe fn create_command_pool(device: &Device, data: &mut RendererData) -> Result<()> {
    let info = vk::CommandPoolCreateInfo::builder()
        .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
        .queue_family_index(data.graphics_queue_family);

    data.command_pool = device.create_command_pool(&info, None)?;

    Ok(())
}

/// One primary command buffer per swapchain image, regardless of how many
/// frames are allowed in flight.
pub unsafe fn create_command_buffers(device: &Device, data: &mut RendererData) -> Result<()> {
    data.command_buffers = (0..data.swapchain_images.len())
        .map(|_| CommandBuffer::acquire(device, data.command_pool, true))
        .collect::<Result<Vec<_>>>()?;

    Ok(())
}

/// Acquires a single-use command buffer that is already recording. Pair with
/// [`dispatch_scratch`].
pub unsafe fn acquire_scratch(device: &Device, pool: vk::CommandPool) -> Result<CommandBuffer> {
    let mut command_buffer = CommandBuffer::acquire(device, pool, true)?;
    command_buffer.begin(device, true, false, false)?;

    Ok(command_buffer)
}

/// Ends, submits and blocks on the given scratch buffer, then releases it.
/// The queue-wait-idle stands in for a fence; acknowledged as slow, kept for
/// its simplicity during one-shot copies and layout transitions.
pub unsafe fn dispatch_scratch(
    device: &Device,
    command_buffer: &mut CommandBuffer,
    queue: vk::Queue,
) -> Result<()> {
    command_buffer.end(device)?;

    let command_buffers = &[command_buffer.handle];
    let info = vk::SubmitInfo::builder().command_buffers(command_buffers);

    device.queue_submit(queue, &[info], vk::Fence::null())?;
    command_buffer.mark_submitted();

    device.queue_wait_idle(queue)?;
    command_buffer.release(device);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::CommandBufferState::*;
    use super::*;

    #[test]
    fn legal_transitions_are_accepted() {
        assert!(NotAllocated.can_transition(Ready));
        assert!(Ready.can_transition(Recording));
        assert!(Recording.can_transition(InRenderpass));
        assert!(InRenderpass.can_transition(Recording));
        assert!(Recording.can_transition(RecordingEnded));
        assert!(RecordingEnded.can_transition(Submitted));
        assert!(Submitted.can_transition(Ready));
    }

    #[test]
    fn every_state_may_be_invalidated() {
        for state in [
            Invalid,
            NotAllocated,
            Ready,
            Recording,
            InRenderpass,
            RecordingEnded,
            Submitted,
        ] {
            assert!(state.can_transition(Invalid));
        }
    }

    #[test]
    fn illegal_transitions_are_rejected() {
        assert!(!Ready.can_transition(Submitted));
        assert!(!Recording.can_transition(Submitted));
        assert!(!InRenderpass.can_transition(RecordingEnded));
        assert!(!Submitted.can_transition(Recording));
        assert!(!Invalid.can_transition(Ready));
        assert!(!RecordingEnded.can_transition(Recording));
    }

    #[test]
    #[should_panic(expected = "Illegal command buffer transition")]
    fn submitting_a_recording_buffer_asserts() {
        let mut command_buffer = CommandBuffer {
            state: Recording,
            ..Default::default()
        };
        command_buffer.mark_submitted();
    }
}
