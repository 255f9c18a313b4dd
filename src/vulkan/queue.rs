use anyhow::{anyhow, Result};
use vk::KhrSurfaceExtension;
use vulkanalia::prelude::v1_0::*;

use super::errors::SuitabilityError;
use crate::renderer::RendererData;

/// One queue family index per capability the renderer needs. The families
/// frequently alias each other on desktop hardware; the logical device only
/// opens one queue per distinct family.
#[derive(Copy, Clone, Debug)]
pub struct QueueFamilyIndices {
    pub graphics: u32,
    pub present: u32,
    pub compute: u32,
    pub transfer: u32,
}

impl QueueFamilyIndices {
    pub unsafe fn get(
        instance: &Instance,
        data: &RendererData,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Self> {
        let properties = instance.get_physical_device_queue_family_properties(physical_device);

        let mut present = None;
        for (index, _) in properties.iter().enumerate() {
            if instance.get_physical_device_surface_support_khr(
                physical_device,
                index as u32,
                data.surface,
            )? {
                present = Some(index as u32);
                break;
            }
        }

        let (graphics, compute, transfer) = select_queue_families(&properties);

        match (graphics, present, compute, transfer) {
            (Some(graphics), Some(present), Some(compute), Some(transfer)) => Ok(Self {
                graphics,
                present,
                compute,
                transfer,
            }),
            _ => Err(anyhow!(SuitabilityError("Missing required queue families."))),
        }
    }
}

/// Walks the queue families in order, taking the first family that advertises
/// GRAPHICS and the first that advertises COMPUTE. The transfer family goes to
/// the candidate with the lowest graphics+compute score, which biases the
/// selection toward a dedicated transfer queue when the hardware has one.
pub fn select_queue_families(
    properties: &[vk::QueueFamilyProperties],
) -> (Option<u32>, Option<u32>, Option<u32>) {
    let mut graphics = None;
    let mut compute = None;
    let mut transfer = None;
    let mut minimum_transfer_score = u8::MAX;

    for (index, family) in properties.iter().enumerate() {
        let mut transfer_score = 0u8;

        if family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
            if graphics.is_none() {
                graphics = Some(index as u32);
            }
            transfer_score += 1;
        }

        if family.queue_flags.contains(vk::QueueFlags::COMPUTE) {
            if compute.is_none() {
                compute = Some(index as u32);
            }
            transfer_score += 1;
        }

        if family.queue_flags.contains(vk::QueueFlags::TRANSFER)
            && transfer_score <= minimum_transfer_score
        {
            minimum_transfer_score = transfer_score;
            transfer = Some(index as u32);
        }
    }

    (graphics, compute, transfer)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn first_graphics_family_wins() {
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER),
        ];

        let (graphics, compute, _) = select_queue_families(&families);
        assert_eq!(graphics, Some(0));
        assert_eq!(compute, Some(0));
    }

    #[test]
    fn dedicated_transfer_family_is_preferred() {
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::TRANSFER),
        ];

        let (_, _, transfer) = select_queue_families(&families);
        assert_eq!(transfer, Some(1));
    }

    #[test]
    fn shared_transfer_family_is_accepted_when_nothing_better_exists() {
        let families =
            [family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER)];

        let (graphics, compute, transfer) = select_queue_families(&families);
        assert_eq!(graphics, Some(0));
        assert_eq!(compute, Some(0));
        assert_eq!(transfer, Some(0));
    }

    #[test]
    fn missing_capabilities_stay_unset() {
        let families = [family(vk::QueueFlags::TRANSFER)];

        let (graphics, compute, transfer) = select_queue_families(&families);
        assert_eq!(graphics, None);
        assert_eq!(compute, None);
        assert_eq!(transfer, Some(0));
    }
}
