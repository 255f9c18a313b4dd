use anyhow::Result;
use log::*;
use vulkanalia::prelude::v1_0::*;

use super::commands::{CommandBuffer, CommandBufferState};
use crate::renderer::RendererData;

/// The main renderpass plus the render area and clear values it begins with.
/// The area is refreshed from the framebuffer size every frame.
#[derive(Clone, Debug, Default)]
pub struct RenderPass {
    pub handle: vk::RenderPass,
    pub offset: vk::Offset2D,
    pub size: vk::Extent2D,
    pub clear_color: [f32; 4],
    pub depth_clear: f32,
    pub stencil_clear: u32,
}

/// One subpass: a color attachment that clears on load and ends up ready to
/// present, plus a depth attachment when the swapchain carries one. A single
/// EXTERNAL -> 0 dependency orders color writes against whatever touched the
/// swapchain image before this pass.
pub unsafe fn create_render_pass(
    device: &Device,
    data: &mut RendererData,
    clear_color: [f32; 4],
    depth_clear: f32,
    stencil_clear: u32,
) -> Result<()> {
    let color_attachment = vk::AttachmentDescription::builder()
        .format(data.swapchain_format)
        .samples(vk::SampleCountFlags::_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
        .build();

    let color_attachment_ref = vk::AttachmentReference::builder()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);

    let mut attachments = vec![color_attachment];

    let color_attachments = &[color_attachment_ref];
    let mut subpass = vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(color_attachments);

    let depth_stencil_attachment_ref = vk::AttachmentReference::builder()
        .attachment(1)
        .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);

    if let Some(depth_format) = data.depth_format {
        attachments.push(
            vk::AttachmentDescription::builder()
                .format(depth_format)
                .samples(vk::SampleCountFlags::_1)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::DONT_CARE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                .build(),
        );

        subpass = subpass.depth_stencil_attachment(&depth_stencil_attachment_ref);
    }

    let dependency = vk::SubpassDependency::builder()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .dst_access_mask(
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        );

    let subpasses = &[subpass];
    let dependencies = &[dependency];
    let info = vk::RenderPassCreateInfo::builder()
        .attachments(&attachments)
        .subpasses(subpasses)
        .dependencies(dependencies);

    data.render_pass = RenderPass {
        handle: device.create_render_pass(&info, None)?,
        offset: vk::Offset2D { x: 0, y: 0 },
        size: vk::Extent2D {
            width: data.framebuffer_width,
            height: data.framebuffer_height,
        },
        clear_color,
        depth_clear,
        stencil_clear,
    };
    info!("Renderpass created.");

    Ok(())
}

pub unsafe fn destroy_render_pass(device: &Device, render_pass: &mut RenderPass) {
    if render_pass.handle != vk::RenderPass::null() {
        device.destroy_render_pass(render_pass.handle, None);
        render_pass.handle = vk::RenderPass::null();
    } else {
        warn!("Tried to destroy a renderpass that is not valid.");
    }
}

pub unsafe fn begin_render_pass(
    device: &Device,
    render_pass: &RenderPass,
    command_buffer: &mut CommandBuffer,
    framebuffer: vk::Framebuffer,
) {
    let clear_values = [
        vk::ClearValue {
            color: vk::ClearColorValue {
                float32: render_pass.clear_color,
            },
        },
        vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: render_pass.depth_clear,
                stencil: render_pass.stencil_clear,
            },
        },
    ];

    let info = vk::RenderPassBeginInfo::builder()
        .render_pass(render_pass.handle)
        .framebuffer(framebuffer)
        .render_area(vk::Rect2D {
            offset: render_pass.offset,
            extent: render_pass.size,
        })
        .clear_values(&clear_values);

    device.cmd_begin_render_pass(command_buffer.handle, &info, vk::SubpassContents::INLINE);
    command_buffer.transition(CommandBufferState::InRenderpass);
}

pub unsafe fn end_render_pass(device: &Device, command_buffer: &mut CommandBuffer) {
    device.cmd_end_render_pass(command_buffer.handle);
    command_buffer.transition(CommandBufferState::Recording);
}
