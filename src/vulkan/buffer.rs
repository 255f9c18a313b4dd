use std::ptr::copy_nonoverlapping as memcpy;

use anyhow::Result;
use log::*;
use vulkanalia::prelude::v1_0::*;

use super::commands::{acquire_scratch, dispatch_scratch};
use super::device::find_memory_type_index;
use crate::renderer::RendererData;

/// A GPU buffer and its backing allocation. `size` is fixed for the buffer's
/// lifetime; growing goes through [`resize_buffer`] which swaps in a fresh
/// allocation.
#[derive(Clone, Debug, Default)]
pub struct Buffer {
    pub handle: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
    pub memory_properties: vk::MemoryPropertyFlags,
    pub is_mapped: bool,
}

impl Buffer {
    pub fn is_valid(&self) -> bool {
        self.handle != vk::Buffer::null() && self.memory != vk::DeviceMemory::null()
    }
}

pub unsafe fn create_buffer(
    device: &Device,
    data: &RendererData,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    properties: vk::MemoryPropertyFlags,
    bind_on_create: bool,
) -> Result<Buffer> {
    let buffer_info = vk::BufferCreateInfo::builder()
        .size(size)
        .usage(usage)
        // Buffers are only ever touched from the graphics queue.
        .sharing_mode(vk::SharingMode::EXCLUSIVE);

    let handle = device.create_buffer(&buffer_info, None)?;

    let requirements = device.get_buffer_memory_requirements(handle);
    let memory_type_index = find_memory_type_index(&data.memory_properties, properties, requirements)?;

    let memory_info = vk::MemoryAllocateInfo::builder()
        .allocation_size(requirements.size)
        .memory_type_index(memory_type_index);

    let memory = match device.allocate_memory(&memory_info, None) {
        Ok(memory) => memory,
        Err(code) => {
            error!("Failed to allocate {} bytes of buffer memory: {}", size, code);
            return Err(code.into());
        }
    };

    let buffer = Buffer {
        handle,
        memory,
        size,
        usage,
        memory_properties: properties,
        is_mapped: false,
    };

    if bind_on_create {
        // A non-zero offset would have to respect requirements.alignment.
        device.bind_buffer_memory(buffer.handle, buffer.memory, 0)?;
    }

    Ok(buffer)
}

/// Frees the memory first, then the handle, and zeroes the struct so a stale
/// copy can't be mistaken for a live buffer.
pub unsafe fn destroy_buffer(device: &Device, buffer: &mut Buffer) {
    if !buffer.is_valid() {
        warn!("Destroying an invalid buffer; ignoring.");
        return;
    }

    device.free_memory(buffer.memory, None);
    device.destroy_buffer(buffer.handle, None);
    *buffer = Buffer::default();
}

pub unsafe fn map_buffer(
    device: &Device,
    buffer: &mut Buffer,
    offset: vk::DeviceSize,
    size: vk::DeviceSize,
) -> Result<*mut u8> {
    debug_assert!(buffer.is_valid());
    debug_assert!(!buffer.is_mapped, "Mapping an already-mapped buffer.");

    let memory = device.map_memory(buffer.memory, offset, size, vk::MemoryMapFlags::empty())?;
    buffer.is_mapped = true;

    Ok(memory.cast())
}

pub unsafe fn unmap_buffer(device: &Device, buffer: &mut Buffer) {
    debug_assert!(buffer.is_mapped, "Unmapping a buffer that is not mapped.");

    device.unmap_memory(buffer.memory);
    buffer.is_mapped = false;
}

/// Maps, copies and unmaps in one step. Only valid for host-visible buffers.
pub unsafe fn copy_data_into_buffer(
    device: &Device,
    buffer: &mut Buffer,
    bytes: &[u8],
    offset: vk::DeviceSize,
) -> Result<()> {
    let memory = map_buffer(device, buffer, offset, bytes.len() as vk::DeviceSize)?;
    memcpy(bytes.as_ptr(), memory, bytes.len());
    unmap_buffer(device, buffer);

    Ok(())
}

/// Blocking GPU-to-GPU copy through a scratch command buffer. The source must
/// carry TRANSFER_SRC usage and the destination TRANSFER_DST.
pub unsafe fn copy_buffer(
    device: &Device,
    source: &Buffer,
    source_offset: vk::DeviceSize,
    destination: &Buffer,
    destination_offset: vk::DeviceSize,
    size: vk::DeviceSize,
    queue: vk::Queue,
    pool: vk::CommandPool,
) -> Result<()> {
    device.queue_wait_idle(queue)?;

    let mut command_buffer = acquire_scratch(device, pool)?;

    let region = vk::BufferCopy::builder()
        .src_offset(source_offset)
        .dst_offset(destination_offset)
        .size(size);
    device.cmd_copy_buffer(command_buffer.handle, source.handle, destination.handle, &[region]);

    dispatch_scratch(device, &mut command_buffer, queue)?;

    Ok(())
}

/// Staged upload: host bytes land in a transient HOST_VISIBLE staging buffer
/// and are copied into the destination on the given queue. Blocks until the
/// copy retires.
pub unsafe fn upload_into_buffer(
    device: &Device,
    data: &RendererData,
    destination: &Buffer,
    bytes: &[u8],
    offset: vk::DeviceSize,
    queue: vk::Queue,
    pool: vk::CommandPool,
) -> Result<()> {
    let mut staging_buffer = create_buffer(
        device,
        data,
        bytes.len() as vk::DeviceSize,
        vk::BufferUsageFlags::TRANSFER_SRC,
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        true,
    )?;

    copy_data_into_buffer(device, &mut staging_buffer, bytes, 0)?;
    copy_buffer(
        device,
        &staging_buffer,
        0,
        destination,
        offset,
        bytes.len() as vk::DeviceSize,
        queue,
        pool,
    )?;
    destroy_buffer(device, &mut staging_buffer);

    Ok(())
}

/// Creates a replacement buffer of the new size, copies the old contents over,
/// waits for the device to go idle and swaps the new buffer in place.
pub unsafe fn resize_buffer(
    device: &Device,
    data: &RendererData,
    buffer: &mut Buffer,
    new_size: vk::DeviceSize,
    queue: vk::Queue,
    pool: vk::CommandPool,
) -> Result<()> {
    let new_buffer = create_buffer(
        device,
        data,
        new_size,
        buffer.usage,
        buffer.memory_properties,
        true,
    )?;

    copy_buffer(device, buffer, 0, &new_buffer, 0, buffer.size, queue, pool)?;

    device.device_wait_idle()?;
    destroy_buffer(device, buffer);
    *buffer = new_buffer;

    Ok(())
}
