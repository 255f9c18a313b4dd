use std::collections::HashSet;

use anyhow::{anyhow, Result};
use log::*;
use vulkanalia::prelude::v1_0::*;

use super::errors::SuitabilityError;
use super::queue::QueueFamilyIndices;
use super::swapchain::SwapchainSupport;
use crate::renderer::RendererData;

pub const DEVICE_EXTENSIONS: &[vk::ExtensionName] = &[vk::KHR_SWAPCHAIN_EXTENSION.name];

/// Depth formats in preference order. The first one whose linear or optimal
/// tiling advertises the depth-stencil attachment feature wins.
pub const DEPTH_FORMAT_CANDIDATES: &[vk::Format] = &[
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// Picks the first physical device that satisfies every requirement, in
/// enumeration order. Also caches the device memory properties and queue
/// family indices so later allocations don't have to requery them.
pub unsafe fn pick_physical_device(instance: &Instance, data: &mut RendererData) -> Result<()> {
    for physical_device in instance.enumerate_physical_devices()? {
        let properties = instance.get_physical_device_properties(physical_device);

        match check_physical_device(instance, data, physical_device) {
            Err(error) => warn!(
                "Skipping physical device ('{}'): {}",
                properties.device_name, error
            ),
            Ok(indices) => {
                info!("Selected physical device ('{}').", properties.device_name);
                log_device_details(instance, physical_device, &properties);

                data.physical_device = physical_device;
                data.memory_properties =
                    instance.get_physical_device_memory_properties(physical_device);
                data.graphics_queue_family = indices.graphics;
                data.present_queue_family = indices.present;
                data.compute_queue_family = indices.compute;
                data.transfer_queue_family = indices.transfer;

                data.depth_format = detect_depth_format(instance, physical_device);
                if data.depth_format.is_none() {
                    warn!("No supported depth format; the depth attachment is disabled.");
                }

                return Ok(());
            }
        }
    }

    Err(anyhow!("Failed to find a suitable physical device."))
}

pub unsafe fn check_physical_device(
    instance: &Instance,
    data: &RendererData,
    physical_device: vk::PhysicalDevice,
) -> Result<QueueFamilyIndices> {
    // The device must expose graphics, present, compute and transfer families.
    let indices = QueueFamilyIndices::get(instance, data, physical_device)?;

    // The device must be able to present at least one format with at least
    // one present mode.
    let support = SwapchainSupport::get(instance, data, physical_device)?;
    if support.formats.is_empty() || support.present_modes.is_empty() {
        return Err(anyhow!(SuitabilityError("Insufficient swapchain support.")));
    }

    check_physical_device_extensions(instance, physical_device)?;

    Ok(indices)
}

pub unsafe fn check_physical_device_extensions(
    instance: &Instance,
    physical_device: vk::PhysicalDevice,
) -> Result<()> {
    let extensions = instance
        .enumerate_device_extension_properties(physical_device, None)?
        .iter()
        .map(|e| e.extension_name)
        .collect::<HashSet<_>>();

    if DEVICE_EXTENSIONS.iter().all(|e| extensions.contains(e)) {
        Ok(())
    } else {
        Err(anyhow!(SuitabilityError(
            "Missing required device extensions."
        )))
    }
}

pub unsafe fn detect_depth_format(
    instance: &Instance,
    physical_device: vk::PhysicalDevice,
) -> Option<vk::Format> {
    DEPTH_FORMAT_CANDIDATES.iter().copied().find(|format| {
        let properties = instance.get_physical_device_format_properties(physical_device, *format);
        format_supports_depth_attachment(
            properties.linear_tiling_features,
            properties.optimal_tiling_features,
        )
    })
}

pub fn format_supports_depth_attachment(
    linear: vk::FormatFeatureFlags,
    optimal: vk::FormatFeatureFlags,
) -> bool {
    linear.contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
        || optimal.contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
}

unsafe fn log_device_details(
    instance: &Instance,
    physical_device: vk::PhysicalDevice,
    properties: &vk::PhysicalDeviceProperties,
) {
    info!("Device type: {:?}", properties.device_type);
    info!(
        "Driver version: {}.{}.{}",
        vk::version_major(properties.driver_version),
        vk::version_minor(properties.driver_version),
        vk::version_patch(properties.driver_version),
    );
    info!(
        "Vulkan API version: {}.{}.{}",
        vk::version_major(properties.api_version),
        vk::version_minor(properties.api_version),
        vk::version_patch(properties.api_version),
    );

    let memory = instance.get_physical_device_memory_properties(physical_device);
    for heap_index in 0..memory.memory_heap_count as usize {
        let heap = memory.memory_heaps[heap_index];
        let size_gb = heap.size as f32 / 1024.0 / 1024.0 / 1024.0;
        if heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL) {
            info!("Local GPU memory: {:.2} GB", size_gb);
        } else {
            info!("Shared GPU memory: {:.2} GB", size_gb);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_attachment_feature_is_accepted_on_either_tiling() {
        let feature = vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT;

        assert!(format_supports_depth_attachment(
            feature,
            vk::FormatFeatureFlags::empty()
        ));
        assert!(format_supports_depth_attachment(
            vk::FormatFeatureFlags::empty(),
            feature
        ));
        assert!(!format_supports_depth_attachment(
            vk::FormatFeatureFlags::SAMPLED_IMAGE,
            vk::FormatFeatureFlags::TRANSFER_DST
        ));
    }
}
