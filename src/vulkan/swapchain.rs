use anyhow::Result;
use log::*;
use vk::{KhrSurfaceExtension, KhrSwapchainExtension};
use vulkanalia::prelude::v1_0::*;

use super::image::{create_image, create_image_view, destroy_image};
use crate::renderer::{RendererData, MAX_FRAMES_IN_FLIGHT};

#[derive(Clone, Debug)]
pub struct SwapchainSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupport {
    pub unsafe fn get(
        instance: &Instance,
        data: &RendererData,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Self> {
        Ok(Self {
            capabilities: instance
                .get_physical_device_surface_capabilities_khr(physical_device, data.surface)?,
            formats: instance
                .get_physical_device_surface_formats_khr(physical_device, data.surface)?,
            present_modes: instance
                .get_physical_device_surface_present_modes_khr(physical_device, data.surface)?,
        })
    }
}

pub fn get_swapchain_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    formats
        .iter()
        .copied()
        .find(|f| {
            f.format == vk::Format::R8G8B8A8_UNORM
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .unwrap_or_else(|| {
            warn!("Preferred surface format unavailable; falling back to the first advertised.");
            formats[0]
        })
}

/// MAILBOX when available; FIFO is the fallback Vulkan guarantees exists.
pub fn get_swapchain_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    modes
        .iter()
        .copied()
        .find(|m| *m == vk::PresentModeKHR::MAILBOX)
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// The surface dictates the extent unless it reports the u32::MAX sentinel,
/// in which case the caller-supplied size is clamped into the advertised
/// bounds.
pub fn get_swapchain_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    width: u32,
    height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D::builder()
            .width(width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ))
            .height(height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ))
            .build()
    }
}

pub fn get_swapchain_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let mut image_count = capabilities.min_image_count + 1;
    if capabilities.max_image_count != 0 && image_count > capabilities.max_image_count {
        image_count = capabilities.max_image_count;
    }
    image_count
}

pub fn max_frames_in_flight(image_count: u32) -> usize {
    (image_count as usize).min(MAX_FRAMES_IN_FLIGHT)
}

/// Creates the swapchain from the cached framebuffer size, passing any
/// previous swapchain along so the driver can recycle it during a rebuild.
pub unsafe fn create_swapchain(
    instance: &Instance,
    device: &Device,
    data: &mut RendererData,
) -> Result<()> {
    let support = SwapchainSupport::get(instance, data, data.physical_device)?;

    let surface_format = get_swapchain_surface_format(&support.formats);
    let present_mode = get_swapchain_present_mode(&support.present_modes);
    let extent = get_swapchain_extent(
        &support.capabilities,
        data.framebuffer_width,
        data.framebuffer_height,
    );
    let image_count = get_swapchain_image_count(&support.capabilities);

    let mut info = vk::SwapchainCreateInfoKHR::builder()
        .surface(data.surface)
        .min_image_count(image_count)
        .image_format(surface_format.format)
        .image_color_space(surface_format.color_space)
        .image_extent(extent)
        .image_array_layers(1)
        .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
        .pre_transform(support.capabilities.current_transform)
        // Opaque compositing with the windowing system.
        .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
        .present_mode(present_mode)
        .clipped(true)
        .old_swapchain(data.swapchain);

    let queue_family_indices = [data.graphics_queue_family, data.present_queue_family];
    if data.graphics_queue_family != data.present_queue_family {
        info = info
            .image_sharing_mode(vk::SharingMode::CONCURRENT)
            .queue_family_indices(&queue_family_indices);
    } else {
        info = info.image_sharing_mode(vk::SharingMode::EXCLUSIVE);
    }

    let old_swapchain = data.swapchain;
    data.swapchain = device.create_swapchain_khr(&info, None)?;
    if old_swapchain != vk::SwapchainKHR::null() {
        device.destroy_swapchain_khr(old_swapchain, None);
    }

    data.swapchain_images = device.get_swapchain_images_khr(data.swapchain)?;
    data.swapchain_format = surface_format.format;
    data.swapchain_extent = extent;
    data.max_frames_in_flight = max_frames_in_flight(data.swapchain_images.len() as u32);
    data.current_frame_index = 0;
    data.current_image_index = 0;

    info!(
        "Swapchain created: {} images, {:?}, {:?}, {}x{}.",
        data.swapchain_images.len(),
        data.swapchain_format,
        present_mode,
        extent.width,
        extent.height,
    );

    Ok(())
}

pub unsafe fn create_swapchain_image_views(device: &Device, data: &mut RendererData) -> Result<()> {
    data.swapchain_image_views = data
        .swapchain_images
        .iter()
        .map(|i| {
            create_image_view(
                device,
                *i,
                data.swapchain_format,
                vk::ImageAspectFlags::COLOR,
            )
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(())
}

/// The single depth image every framebuffer shares, when a depth format was
/// detected at device selection time.
pub unsafe fn create_depth_objects(device: &Device, data: &mut RendererData) -> Result<()> {
    let Some(depth_format) = data.depth_format else {
        return Ok(());
    };

    data.depth_image = create_image(
        device,
        data,
        data.swapchain_extent.width,
        data.swapchain_extent.height,
        depth_format,
        vk::ImageTiling::OPTIMAL,
        vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
        vk::ImageAspectFlags::DEPTH,
        true,
    )?;

    Ok(())
}

pub unsafe fn destroy_swapchain_objects(device: &Device, data: &mut RendererData) {
    destroy_image(device, &mut data.depth_image);

    data.swapchain_image_views
        .drain(..)
        .for_each(|v| device.destroy_image_view(v, None));
    data.swapchain_images.clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    #[test]
    fn preferred_surface_format_is_selected_when_advertised() {
        let formats = [
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];

        let selected = get_swapchain_surface_format(&formats);
        assert_eq!(selected.format, vk::Format::R8G8B8A8_UNORM);
        assert_eq!(selected.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
    }

    #[test]
    fn first_format_is_the_fallback() {
        let formats = [
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];

        let selected = get_swapchain_surface_format(&formats);
        assert_eq!(selected.format, vk::Format::B8G8R8A8_SRGB);
    }

    #[test]
    fn mailbox_wins_and_fifo_is_the_fallback() {
        assert_eq!(
            get_swapchain_present_mode(&[
                vk::PresentModeKHR::FIFO,
                vk::PresentModeKHR::MAILBOX,
                vk::PresentModeKHR::IMMEDIATE,
            ]),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            get_swapchain_present_mode(&[vk::PresentModeKHR::IMMEDIATE]),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn surface_extent_wins_unless_it_is_the_sentinel() {
        let mut capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 800,
                height: 600,
            },
            ..Default::default()
        };

        let extent = get_swapchain_extent(&capabilities, 1024, 768);
        assert_eq!((extent.width, extent.height), (800, 600));

        capabilities.current_extent = vk::Extent2D {
            width: u32::MAX,
            height: u32::MAX,
        };
        capabilities.min_image_extent = vk::Extent2D {
            width: 640,
            height: 480,
        };
        capabilities.max_image_extent = vk::Extent2D {
            width: 1920,
            height: 1080,
        };

        let extent = get_swapchain_extent(&capabilities, 4096, 100);
        assert_eq!((extent.width, extent.height), (1920, 480));
    }

    #[test]
    fn image_count_is_clamped_to_the_advertised_maximum() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 3,
            ..Default::default()
        };
        assert_eq!(get_swapchain_image_count(&capabilities), 3);

        let unbounded = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(get_swapchain_image_count(&unbounded), 3);
    }

    #[test]
    fn frames_in_flight_cap_at_three() {
        assert_eq!(max_frames_in_flight(2), 2);
        assert_eq!(max_frames_in_flight(3), 3);
        assert_eq!(max_frames_in_flight(8), 3);
    }
}
