use std::collections::HashSet;

use anyhow::{anyhow, Result};
use log::*;
use vulkanalia::prelude::v1_0::*;

use super::physical_device::DEVICE_EXTENSIONS;
use crate::renderer::{RendererData, PORTABILITY_MACOS_VERSION, VALIDATION_ENABLED, VALIDATION_LAYER};

/// Opens the logical device with one queue per distinct queue family and
/// publishes the four queue handles. Most desktop hardware folds several of
/// the families together, so the create-info list is deduplicated first.
pub unsafe fn create_logical_device(
    entry: &Entry,
    instance: &Instance,
    data: &mut RendererData,
) -> Result<Device> {
    let mut unique_families = HashSet::new();
    unique_families.insert(data.graphics_queue_family);
    unique_families.insert(data.present_queue_family);
    unique_families.insert(data.compute_queue_family);
    unique_families.insert(data.transfer_queue_family);

    let queue_priorities = &[1.0];
    let queue_infos = unique_families
        .iter()
        .map(|family| {
            vk::DeviceQueueCreateInfo::builder()
                .queue_family_index(*family)
                .queue_priorities(queue_priorities)
                .build()
        })
        .collect::<Vec<_>>();

    let layers = if VALIDATION_ENABLED {
        vec![VALIDATION_LAYER.as_ptr()]
    } else {
        vec![]
    };

    let mut extensions = DEVICE_EXTENSIONS
        .iter()
        .map(|e| e.as_ptr())
        .collect::<Vec<_>>();

    // Required by the Vulkan SDK on macOS since 1.3.216.
    if cfg!(target_os = "macos") && entry.version()? >= PORTABILITY_MACOS_VERSION {
        extensions.push(vk::KHR_PORTABILITY_SUBSET_EXTENSION.name.as_ptr());
    }

    // The blending policy uses a logic op and texture samplers want
    // anisotropy available.
    let features = vk::PhysicalDeviceFeatures::builder()
        .logic_op(true)
        .sampler_anisotropy(true);

    let info = vk::DeviceCreateInfo::builder()
        .queue_create_infos(&queue_infos)
        .enabled_layer_names(&layers)
        .enabled_extension_names(&extensions)
        .enabled_features(&features);

    let device = instance.create_device(data.physical_device, &info, None)?;

    data.graphics_queue = device.get_device_queue(data.graphics_queue_family, 0);
    data.present_queue = device.get_device_queue(data.present_queue_family, 0);
    data.compute_queue = device.get_device_queue(data.compute_queue_family, 0);
    data.transfer_queue = device.get_device_queue(data.transfer_queue_family, 0);
    info!("Logical device created with queues gathered.");

    Ok(device)
}

pub unsafe fn find_memory_type_index(
    memory: &vk::PhysicalDeviceMemoryProperties,
    properties: vk::MemoryPropertyFlags,
    requirements: vk::MemoryRequirements,
) -> Result<u32> {
    get_memory_type_index(memory, properties, requirements.memory_type_bits).ok_or_else(|| {
        error!("Failed to find a suitable memory type.");
        anyhow!("Failed to find a suitable memory type.")
    })
}

/// Returns the first memory type whose bit is set in `type_filter` and whose
/// property flags contain all of the requested properties.
pub fn get_memory_type_index(
    memory: &vk::PhysicalDeviceMemoryProperties,
    properties: vk::MemoryPropertyFlags,
    type_filter: u32,
) -> Option<u32> {
    (0..memory.memory_type_count).find(|i| {
        let suitable = (type_filter & (1 << i)) != 0;
        let memory_type = memory.memory_types[*i as usize];

        suitable && memory_type.property_flags.contains(properties)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_properties(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut memory = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (index, flags) in types.iter().enumerate() {
            memory.memory_types[index] = vk::MemoryType {
                property_flags: *flags,
                heap_index: 0,
            };
        }
        memory
    }

    #[test]
    fn first_matching_memory_type_is_selected() {
        let memory = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ]);

        let index = get_memory_type_index(
            &memory,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            0b111,
        );
        assert_eq!(index, Some(1));
    }

    #[test]
    fn type_filter_excludes_otherwise_suitable_types() {
        let memory = memory_properties(&[
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ]);

        let index = get_memory_type_index(
            &memory,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            0b10,
        );
        assert_eq!(index, Some(1));
    }

    #[test]
    fn no_match_returns_none() {
        let memory = memory_properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);

        let index = get_memory_type_index(&memory, vk::MemoryPropertyFlags::HOST_VISIBLE, 0b1);
        assert_eq!(index, None);
    }
}
