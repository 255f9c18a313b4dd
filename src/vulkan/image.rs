use anyhow::{anyhow, Result};
use log::*;
use vulkanalia::prelude::v1_0::*;

use super::buffer::{copy_data_into_buffer, create_buffer, destroy_buffer, Buffer};
use super::commands::{acquire_scratch, dispatch_scratch, CommandBuffer};
use super::device::find_memory_type_index;
use crate::renderer::RendererData;

/// A 2D image, its allocation and (optionally) its view. `layout` mirrors the
/// driver's view of the image and is updated by every recorded transition, so
/// callers never have to remember what layout an image is currently in.
#[derive(Clone, Debug, Default)]
pub struct Image {
    pub handle: vk::Image,
    pub memory: vk::DeviceMemory,
    pub view: vk::ImageView,
    pub format: vk::Format,
    pub layout: vk::ImageLayout,
    pub width: u32,
    pub height: u32,
}

pub unsafe fn create_image(
    device: &Device,
    data: &RendererData,
    width: u32,
    height: u32,
    format: vk::Format,
    tiling: vk::ImageTiling,
    usage: vk::ImageUsageFlags,
    properties: vk::MemoryPropertyFlags,
    aspects: vk::ImageAspectFlags,
    create_view: bool,
) -> Result<Image> {
    let info = vk::ImageCreateInfo::builder()
        .image_type(vk::ImageType::_2D)
        .extent(vk::Extent3D {
            width,
            height,
            depth: 1,
        })
        .mip_levels(1)
        .array_layers(1)
        .format(format)
        .tiling(tiling)
        .usage(usage)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .samples(vk::SampleCountFlags::_1)
        .sharing_mode(vk::SharingMode::EXCLUSIVE);

    let handle = device.create_image(&info, None)?;

    let requirements = device.get_image_memory_requirements(handle);
    let memory_info = vk::MemoryAllocateInfo::builder()
        .allocation_size(requirements.size)
        .memory_type_index(find_memory_type_index(
            &data.memory_properties,
            properties,
            requirements,
        )?);

    let memory = match device.allocate_memory(&memory_info, None) {
        Ok(memory) => memory,
        Err(code) => {
            error!("Failed to allocate image memory ({}x{}): {}", width, height, code);
            return Err(code.into());
        }
    };

    device.bind_image_memory(handle, memory, 0)?;

    let mut image = Image {
        handle,
        memory,
        view: vk::ImageView::null(),
        format,
        layout: vk::ImageLayout::UNDEFINED,
        width,
        height,
    };

    if create_view {
        image.view = create_image_view(device, image.handle, format, aspects)?;
    }

    Ok(image)
}

pub unsafe fn create_image_view(
    device: &Device,
    image: vk::Image,
    format: vk::Format,
    aspects: vk::ImageAspectFlags,
) -> Result<vk::ImageView> {
    let subresource_range = vk::ImageSubresourceRange::builder()
        .aspect_mask(aspects)
        .base_mip_level(0)
        .level_count(1)
        .base_array_layer(0)
        .layer_count(1);

    let info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(vk::ImageViewType::_2D)
        .format(format)
        .subresource_range(subresource_range);

    Ok(device.create_image_view(&info, None)?)
}

/// Releases view, memory and handle in that order, nulling each as it goes.
pub unsafe fn destroy_image(device: &Device, image: &mut Image) {
    if image.view != vk::ImageView::null() {
        device.destroy_image_view(image.view, None);
        image.view = vk::ImageView::null();
    }
    if image.memory != vk::DeviceMemory::null() {
        device.free_memory(image.memory, None);
        image.memory = vk::DeviceMemory::null();
    }
    if image.handle != vk::Image::null() {
        device.destroy_image(image.handle, None);
        image.handle = vk::Image::null();
    }
}

/// Records a pipeline barrier moving the image out of its current layout and
/// updates `image.layout` with it. Only the transitions the renderer actually
/// performs are supported; anything else is an error until it is added.
pub unsafe fn transition_image_layout(
    device: &Device,
    command_buffer: &CommandBuffer,
    image: &mut Image,
    new_layout: vk::ImageLayout,
) -> Result<()> {
    let (src_access_mask, dst_access_mask, src_stage_mask, dst_stage_mask) =
        match (image.layout, new_layout) {
            (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => (
                vk::AccessFlags::empty(),
                vk::AccessFlags::TRANSFER_WRITE,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::TRANSFER,
            ),
            (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => (
                vk::AccessFlags::TRANSFER_WRITE,
                vk::AccessFlags::SHADER_READ,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
            ),
            (old, new) => {
                return Err(anyhow!(
                    "Unsupported image layout transition: {:?} -> {:?}",
                    old,
                    new
                ))
            }
        };

    let subresource = vk::ImageSubresourceRange::builder()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .base_mip_level(0)
        .level_count(1)
        .base_array_layer(0)
        .layer_count(1);

    let barrier = vk::ImageMemoryBarrier::builder()
        .image(image.handle)
        .old_layout(image.layout)
        .new_layout(new_layout)
        // Not transferring ownership between queues.
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .subresource_range(subresource)
        .src_access_mask(src_access_mask)
        .dst_access_mask(dst_access_mask);

    device.cmd_pipeline_barrier(
        command_buffer.handle,
        src_stage_mask,
        dst_stage_mask,
        vk::DependencyFlags::empty(),
        &[] as &[vk::MemoryBarrier],
        &[] as &[vk::BufferMemoryBarrier],
        &[barrier],
    );

    image.layout = new_layout;

    Ok(())
}

/// Records a buffer-to-image copy covering the whole image. The image must
/// already be in TRANSFER_DST_OPTIMAL.
pub unsafe fn copy_image_from_buffer(
    device: &Device,
    command_buffer: &CommandBuffer,
    image: &Image,
    buffer: &Buffer,
) {
    let subresource = vk::ImageSubresourceLayers::builder()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .mip_level(0)
        .base_array_layer(0)
        .layer_count(1);

    let region = vk::BufferImageCopy::builder()
        .buffer_offset(0)
        // Zero row length and image height mean tightly packed pixel rows.
        .buffer_row_length(0)
        .buffer_image_height(0)
        .image_subresource(subresource)
        .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
        .image_extent(vk::Extent3D {
            width: image.width,
            height: image.height,
            depth: 1,
        });

    device.cmd_copy_buffer_to_image(
        command_buffer.handle,
        buffer.handle,
        image.handle,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        &[region],
    );
}

/// A sampled 2D texture: the image, its sampler and a generation counter that
/// consumers poll to notice re-uploads without locks.
#[derive(Clone, Debug, Default)]
pub struct Texture {
    pub image: Image,
    pub sampler: vk::Sampler,
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    pub generation: u32,
}

/// Builds a GPU texture from tightly packed RGBA8 pixels: staging buffer,
/// transition to TRANSFER_DST, copy, transition to SHADER_READ_ONLY, then a
/// nearest-filter repeat sampler. Bumps the generation on completion.
pub unsafe fn upload_texture(
    device: &Device,
    data: &RendererData,
    pixels: &[u8],
    width: u32,
    height: u32,
    channels: u32,
) -> Result<Texture> {
    let format = vk::Format::R8G8B8A8_UNORM;

    let mut staging_buffer = create_buffer(
        device,
        data,
        pixels.len() as vk::DeviceSize,
        vk::BufferUsageFlags::TRANSFER_SRC,
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        true,
    )?;
    copy_data_into_buffer(device, &mut staging_buffer, pixels, 0)?;

    let mut image = create_image(
        device,
        data,
        width,
        height,
        format,
        vk::ImageTiling::OPTIMAL,
        vk::ImageUsageFlags::TRANSFER_SRC
            | vk::ImageUsageFlags::TRANSFER_DST
            | vk::ImageUsageFlags::SAMPLED
            | vk::ImageUsageFlags::COLOR_ATTACHMENT,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
        vk::ImageAspectFlags::COLOR,
        true,
    )?;

    let mut command_buffer = acquire_scratch(device, data.command_pool)?;
    transition_image_layout(
        device,
        &command_buffer,
        &mut image,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
    )?;
    copy_image_from_buffer(device, &command_buffer, &image, &staging_buffer);
    transition_image_layout(
        device,
        &command_buffer,
        &mut image,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    )?;
    dispatch_scratch(device, &mut command_buffer, data.graphics_queue)?;

    destroy_buffer(device, &mut staging_buffer);

    let sampler_info = vk::SamplerCreateInfo::builder()
        .mag_filter(vk::Filter::NEAREST)
        .min_filter(vk::Filter::NEAREST)
        .address_mode_u(vk::SamplerAddressMode::REPEAT)
        .address_mode_v(vk::SamplerAddressMode::REPEAT)
        .address_mode_w(vk::SamplerAddressMode::REPEAT)
        .anisotropy_enable(false)
        .max_anisotropy(0.0)
        .border_color(vk::BorderColor::FLOAT_OPAQUE_BLACK)
        .unnormalized_coordinates(false)
        .compare_enable(false)
        .compare_op(vk::CompareOp::ALWAYS)
        .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
        .mip_lod_bias(0.0)
        .min_lod(0.0)
        .max_lod(0.0);
    let sampler = device.create_sampler(&sampler_info, None)?;

    Ok(Texture {
        image,
        sampler,
        width,
        height,
        channels,
        generation: 1,
    })
}

pub unsafe fn destroy_texture(device: &Device, texture: &mut Texture) {
    if texture.sampler != vk::Sampler::null() {
        device.destroy_sampler(texture.sampler, None);
        texture.sampler = vk::Sampler::null();
    }
    destroy_image(device, &mut texture.image);
}
