use anyhow::Result;
use log::*;
use vulkanalia::prelude::v1_0::*;

use crate::renderer::RendererData;

/// A fence plus a CPU-side mirror of its signaled state. The mirror lets
/// `wait` return immediately for fences we already observed as signaled and
/// lets `reset` warn about resetting a fence nobody waited on.
#[derive(Clone, Debug, Default)]
pub struct Fence {
    pub handle: vk::Fence,
    pub signaled: bool,
}

impl Fence {
    /// Fences are created signaled by default so the first wait in the frame
    /// loop returns immediately.
    pub unsafe fn create(device: &Device, start_signaled: bool) -> Result<Self> {
        let flags = if start_signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let info = vk::FenceCreateInfo::builder().flags(flags);

        Ok(Self {
            handle: device.create_fence(&info, None)?,
            signaled: start_signaled,
        })
    }

    pub unsafe fn destroy(&mut self, device: &Device) {
        device.destroy_fence(self.handle, None);
        self.handle = vk::Fence::null();
        self.signaled = false;
    }

    /// Returns `true` once the fence is signaled. A timeout is logged and
    /// reported as `false`; it is the caller's call whether to drop the frame
    /// or retry. Device loss and out-of-memory results are real errors.
    pub unsafe fn wait(&mut self, device: &Device, timeout_ns: u64) -> Result<bool> {
        if self.signaled {
            return Ok(true);
        }

        match device.wait_for_fences(&[self.handle], true, timeout_ns) {
            Ok(vk::SuccessCode::TIMEOUT) => {
                warn!("Timed out waiting for fence after {}ns.", timeout_ns);
                Ok(false)
            }
            Ok(_) => {
                self.signaled = true;
                Ok(true)
            }
            Err(code) => Err(anyhow::anyhow!("Fence wait failed: {}", code)),
        }
    }

    pub unsafe fn reset(&mut self, device: &Device) -> Result<()> {
        if self.signaled {
            device.reset_fences(&[self.handle])?;
            self.signaled = false;
        } else {
            warn!("Resetting a fence that is unsignaled.");
        }

        Ok(())
    }
}

/// Synchronization layout:
///
/// Per frame slot (`0..max_frames_in_flight`):
/// - an image-available semaphore, signaled when the swapchain hands the slot
///   an image to render into;
/// - a render-idle fence, signaled when the GPU finishes the slot's commands.
///
/// Per image index (`0..image_count`):
/// - a presentation-complete semaphore the submit signals and the present
///   waits on;
/// - a frame-in-flight back-reference naming the slot whose fence currently
///   guards this image, so two slots can never collide on one image.
pub unsafe fn create_sync_objects(device: &Device, data: &mut RendererData) -> Result<()> {
    let semaphore_info = vk::SemaphoreCreateInfo::builder();

    for _ in 0..data.max_frames_in_flight {
        data.image_available_semaphores
            .push(device.create_semaphore(&semaphore_info, None)?);
        data.render_idle_fences.push(Fence::create(device, true)?);
    }

    for _ in 0..data.swapchain_images.len() {
        data.presentation_complete_semaphores
            .push(device.create_semaphore(&semaphore_info, None)?);
    }

    data.frame_in_flight_fences = vec![None; data.swapchain_images.len()];

    Ok(())
}

pub unsafe fn destroy_sync_objects(device: &Device, data: &mut RendererData) {
    data.image_available_semaphores
        .drain(..)
        .for_each(|s| device.destroy_semaphore(s, None));
    data.presentation_complete_semaphores
        .drain(..)
        .for_each(|s| device.destroy_semaphore(s, None));
    data.render_idle_fences
        .iter_mut()
        .for_each(|f| f.destroy(device));
    data.render_idle_fences.clear();
    data.frame_in_flight_fences.clear();
}
