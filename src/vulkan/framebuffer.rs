use anyhow::Result;
use vulkanalia::prelude::v1_0::*;

use super::render_pass::RenderPass;
use crate::renderer::RendererData;

/// A framebuffer and a snapshot of the attachment views it was created with.
/// The copy means the framebuffer stays coherent even if the caller's view
/// list is mutated afterwards.
#[derive(Clone, Debug, Default)]
pub struct Framebuffer {
    pub handle: vk::Framebuffer,
    pub attachments: Vec<vk::ImageView>,
}

pub unsafe fn create_framebuffer(
    device: &Device,
    render_pass: &RenderPass,
    attachments: &[vk::ImageView],
    width: u32,
    height: u32,
) -> Result<Framebuffer> {
    let framebuffer = Framebuffer {
        handle: vk::Framebuffer::null(),
        attachments: attachments.to_vec(),
    };

    let info = vk::FramebufferCreateInfo::builder()
        .render_pass(render_pass.handle)
        .attachments(&framebuffer.attachments)
        // The framebuffer's dimensions must match the swapchain images.
        .width(width)
        .height(height)
        .layers(1);

    let handle = device.create_framebuffer(&info, None)?;

    Ok(Framebuffer {
        handle,
        ..framebuffer
    })
}

pub unsafe fn destroy_framebuffer(device: &Device, framebuffer: &mut Framebuffer) {
    device.destroy_framebuffer(framebuffer.handle, None);
    framebuffer.handle = vk::Framebuffer::null();
    framebuffer.attachments.clear();
}

/// One framebuffer per swapchain image: the image's color view plus the
/// shared depth view when the swapchain carries a depth attachment.
pub unsafe fn create_framebuffers(device: &Device, data: &mut RendererData) -> Result<()> {
    data.framebuffers = data
        .swapchain_image_views
        .iter()
        .map(|view| {
            let mut attachments = vec![*view];
            if data.depth_format.is_some() {
                attachments.push(data.depth_image.view);
            }
            create_framebuffer(
                device,
                &data.render_pass,
                &attachments,
                data.framebuffer_width,
                data.framebuffer_height,
            )
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(())
}
