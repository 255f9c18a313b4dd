use anyhow::{anyhow, Result};
use log::*;
use vk::{KhrSurfaceExtension, KhrSwapchainExtension};
use vulkanalia::loader::{LibloadingLoader, LIBRARY};
use vulkanalia::prelude::v1_0::*;
use vulkanalia::vk::ExtDebugUtilsExtension;
use vulkanalia::window as vk_window;
use vulkanalia::Version;
use winit::window::Window;

use crate::vulkan::commands::{create_command_buffers, create_command_pool, CommandBuffer};
use crate::vulkan::device::create_logical_device;
use crate::vulkan::framebuffer::{create_framebuffers, destroy_framebuffer, Framebuffer};
use crate::vulkan::image::Image;
use crate::vulkan::instance::create_instance;
use crate::vulkan::physical_device::{detect_depth_format, pick_physical_device};
use crate::vulkan::pipeline::PipelineCache;
use crate::vulkan::render_pass::{
    begin_render_pass, create_render_pass, destroy_render_pass, end_render_pass, RenderPass,
};
use crate::vulkan::swapchain::{
    create_depth_objects, create_swapchain, create_swapchain_image_views,
    destroy_swapchain_objects,
};
use crate::vulkan::sync::{create_sync_objects, destroy_sync_objects, Fence};

/// Cap on concurrently scheduled frames; the swapchain may lower it when it
/// has fewer images.
pub const MAX_FRAMES_IN_FLIGHT: usize = 3;
pub const VALIDATION_ENABLED: bool = cfg!(debug_assertions);
pub const VALIDATION_LAYER: vk::ExtensionName =
    vk::ExtensionName::from_bytes(b"VK_LAYER_KHRONOS_validation");
pub const PORTABILITY_MACOS_VERSION: Version = Version::new(1, 3, 216);

pub const DEFAULT_CLEAR_COLOR: [f32; 4] = [0.3, 0.2, 0.4, 1.0];

/// The Vulkan handles and bookkeeping the renderer threads through every
/// `create_*` call. Frame-slot arrays are indexed by `current_frame_index`,
/// image arrays by the index acquisition returns; the two cycle
/// independently.
#[derive(Debug, Default)]
pub struct RendererData {
    // Instance level.
    pub messenger: vk::DebugUtilsMessengerEXT,
    pub surface: vk::SurfaceKHR,
    pub physical_device: vk::PhysicalDevice,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub depth_format: Option<vk::Format>,

    // Queues and the graphics command pool.
    pub graphics_queue_family: u32,
    pub present_queue_family: u32,
    pub compute_queue_family: u32,
    pub transfer_queue_family: u32,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub compute_queue: vk::Queue,
    pub transfer_queue: vk::Queue,
    pub command_pool: vk::CommandPool,

    // Swapchain and the per-image resources that live and die with it.
    pub swapchain: vk::SwapchainKHR,
    pub swapchain_format: vk::Format,
    pub swapchain_extent: vk::Extent2D,
    pub swapchain_images: Vec<vk::Image>,
    pub swapchain_image_views: Vec<vk::ImageView>,
    pub depth_image: Image,
    pub max_frames_in_flight: usize,

    pub render_pass: RenderPass,
    pub framebuffers: Vec<Framebuffer>,
    pub command_buffers: Vec<CommandBuffer>,

    // Synchronization. Semaphores and fences are per frame slot; the
    // presentation-complete semaphores and the fence back-references are per
    // image index.
    pub image_available_semaphores: Vec<vk::Semaphore>,
    pub render_idle_fences: Vec<Fence>,
    pub presentation_complete_semaphores: Vec<vk::Semaphore>,
    /// For each image index, the frame slot whose fence currently guards it.
    pub frame_in_flight_fences: Vec<Option<usize>>,

    // Frame loop state.
    pub current_frame_index: usize,
    pub current_image_index: usize,
    pub framebuffer_width: u32,
    pub framebuffer_height: u32,
    pub cached_framebuffer_width: u32,
    pub cached_framebuffer_height: u32,
    pub current_framebuffer_size_generation: u64,
    pub last_framebuffer_size_generation: u64,
    pub recreating_swapchain: bool,

    pub pipeline_cache: PipelineCache,
}

/// The renderer: instance, device and all per-frame machinery. Constructed
/// explicitly by the application and threaded through every entry point; the
/// render thread owns everything in here.
pub struct Renderer {
    pub entry: Entry,
    pub instance: Instance,
    pub device: Device,
    pub data: RendererData,
}

impl Renderer {
    pub unsafe fn create(window: &Window, width: u32, height: u32) -> Result<Self> {
        let loader = LibloadingLoader::new(LIBRARY)?;
        let entry = Entry::new(loader).map_err(|b| anyhow!("{}", b))?;

        let mut data = RendererData {
            framebuffer_width: width,
            framebuffer_height: height,
            ..Default::default()
        };

        let instance = create_instance(window, &entry, &mut data)?;
        data.surface = vk_window::create_surface(&instance, &window, &window)?;
        pick_physical_device(&instance, &mut data)?;
        let device = create_logical_device(&entry, &instance, &mut data)?;
        create_command_pool(&device, &mut data)?;
        create_swapchain(&instance, &device, &mut data)?;
        create_swapchain_image_views(&device, &mut data)?;
        create_depth_objects(&device, &mut data)?;
        create_render_pass(&device, &mut data, DEFAULT_CLEAR_COLOR, 1.0, 0)?;
        create_framebuffers(&device, &mut data)?;
        create_command_buffers(&device, &mut data)?;
        create_sync_objects(&device, &mut data)?;
        info!("Renderer initialized.");

        Ok(Self {
            entry,
            instance,
            device,
            data,
        })
    }

    /// Callers report resizes here; the frame loop drains the new size at the
    /// next `begin_frame`.
    pub fn on_resize(&mut self, width: u32, height: u32) {
        self.data.cached_framebuffer_width = width;
        self.data.cached_framebuffer_height = height;
        self.data.current_framebuffer_size_generation += 1;
    }

    /// Starts a frame. Returns `Ok(false)` when the frame must be dropped
    /// (mid-rebuild, fence timeout, out-of-date swapchain); the caller should
    /// simply try again next iteration.
    pub unsafe fn begin_frame(&mut self) -> Result<bool> {
        let device = &self.device;
        let data = &mut self.data;

        if data.recreating_swapchain {
            device.device_wait_idle()?;
            info!("Recreating swapchain; dropping this frame.");
            return Ok(false);
        }

        if data.current_framebuffer_size_generation != data.last_framebuffer_size_generation {
            device.device_wait_idle()?;
            if !rebuild_swapchain(&self.instance, device, data)? {
                return Ok(false);
            }
        }

        // The slot's previous submission must retire before its command
        // buffer and semaphores can be reused.
        let slot = data.current_frame_index;
        if !data.render_idle_fences[slot].wait(device, u64::MAX)? {
            warn!("Frame fence wait failed; dropping this frame.");
            return Ok(false);
        }

        let result = device.acquire_next_image_khr(
            data.swapchain,
            u64::MAX,
            data.image_available_semaphores[slot],
            vk::Fence::null(),
        );

        let image_index = match result {
            Ok((image_index, vk::SuccessCode::SUBOPTIMAL_KHR)) => {
                // Still usable this frame; a rebuild can happen at present.
                image_index as usize
            }
            Ok((image_index, _)) => image_index as usize,
            Err(vk::ErrorCode::OUT_OF_DATE_KHR) => {
                rebuild_swapchain(&self.instance, device, data)?;
                return Ok(false);
            }
            Err(e) => return Err(anyhow!("Failed to acquire swapchain image: {}", e)),
        };
        data.current_image_index = image_index;

        let command_buffer = &mut data.command_buffers[image_index];
        command_buffer.reset();
        command_buffer.begin(device, false, false, false)?;

        // Negative height flips the viewport so clip space matches the GL
        // convention the engine's matrices assume.
        let viewport = vk::Viewport::builder()
            .x(0.0)
            .y(data.framebuffer_height as f32)
            .width(data.framebuffer_width as f32)
            .height(-(data.framebuffer_height as f32))
            .min_depth(0.0)
            .max_depth(1.0);
        let scissor = vk::Rect2D::builder()
            .offset(vk::Offset2D { x: 0, y: 0 })
            .extent(vk::Extent2D {
                width: data.framebuffer_width,
                height: data.framebuffer_height,
            })
            .build();

        device.cmd_set_viewport(command_buffer.handle, 0, &[viewport]);
        device.cmd_set_scissor(command_buffer.handle, 0, &[scissor]);

        data.render_pass.size = vk::Extent2D {
            width: data.framebuffer_width,
            height: data.framebuffer_height,
        };

        let framebuffer = data.framebuffers[image_index].handle;
        let RendererData {
            render_pass,
            command_buffers,
            ..
        } = data;
        begin_render_pass(
            device,
            render_pass,
            &mut command_buffers[image_index],
            framebuffer,
        );

        Ok(true)
    }

    /// Ends the frame: closes the renderpass and command buffer, resolves the
    /// per-image fence back-reference, submits and presents.
    pub unsafe fn end_frame(&mut self) -> Result<bool> {
        let device = &self.device;
        let data = &mut self.data;

        let slot = data.current_frame_index;
        let image_index = data.current_image_index;

        let command_buffer = &mut data.command_buffers[image_index];
        end_render_pass(device, command_buffer);
        command_buffer.end(device)?;

        // If another slot is still rendering into this image, wait for it;
        // two in-flight slots must never collide on one image index.
        if let Some(previous_slot) = data.frame_in_flight_fences[image_index] {
            data.render_idle_fences[previous_slot].wait(device, u64::MAX)?;
        }
        data.frame_in_flight_fences[image_index] = Some(slot);

        data.render_idle_fences[slot].reset(device)?;

        let wait_semaphores = &[data.image_available_semaphores[slot]];
        let wait_stages = &[vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = &[data.command_buffers[image_index].handle];
        let signal_semaphores = &[data.presentation_complete_semaphores[image_index]];
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(wait_semaphores)
            .wait_dst_stage_mask(wait_stages)
            .command_buffers(command_buffers)
            .signal_semaphores(signal_semaphores);

        device
            .queue_submit(
                data.graphics_queue,
                &[submit_info],
                data.render_idle_fences[slot].handle,
            )
            .map_err(|e| anyhow!("Queue submission failed: {}", e))?;
        data.command_buffers[image_index].mark_submitted();

        let swapchains = &[data.swapchain];
        let image_indices = &[image_index as u32];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(signal_semaphores)
            .swapchains(swapchains)
            .image_indices(image_indices);

        let present_result = device.queue_present_khr(data.present_queue, &present_info);
        match present_result {
            Ok(vk::SuccessCode::SUBOPTIMAL_KHR) | Err(vk::ErrorCode::OUT_OF_DATE_KHR) => {
                // Rebuild at the start of the next frame, through the same
                // path resize notifications take.
                if data.current_framebuffer_size_generation
                    == data.last_framebuffer_size_generation
                {
                    data.cached_framebuffer_width = data.framebuffer_width;
                    data.cached_framebuffer_height = data.framebuffer_height;
                    data.current_framebuffer_size_generation += 1;
                }
            }
            Ok(_) => {}
            Err(e) => return Err(anyhow!("Failed to present swapchain image: {}", e)),
        }

        data.current_frame_index = (slot + 1) % data.max_frames_in_flight;

        Ok(true)
    }

    pub fn current_command_buffer(&self) -> &CommandBuffer {
        &self.data.command_buffers[self.data.current_image_index]
    }

    /// Tears everything down in reverse creation order. The device must be
    /// idle; the caller waits before invoking this.
    pub unsafe fn destroy(&mut self) {
        let device = &self.device;
        let data = &mut self.data;

        data.pipeline_cache.destroy(device);

        destroy_sync_objects(device, data);
        data.command_buffers
            .iter_mut()
            .for_each(|cb| cb.release(device));
        data.command_buffers.clear();
        data.framebuffers
            .iter_mut()
            .for_each(|f| destroy_framebuffer(device, f));
        data.framebuffers.clear();
        destroy_render_pass(device, &mut data.render_pass);
        destroy_swapchain_objects(device, data);
        if data.swapchain != vk::SwapchainKHR::null() {
            device.destroy_swapchain_khr(data.swapchain, None);
            data.swapchain = vk::SwapchainKHR::null();
        }
        device.destroy_command_pool(data.command_pool, None);
        device.destroy_device(None);

        if VALIDATION_ENABLED {
            self.instance
                .destroy_debug_utils_messenger_ext(data.messenger, None);
        }
        self.instance.destroy_surface_khr(data.surface, None);
        self.instance.destroy_instance(None);
    }
}

/// Rebuilds the swapchain and everything keyed by image index. Declines while
/// a rebuild is already running and while the window has a zero dimension.
/// Afterwards every image has a fresh framebuffer and command buffer and no
/// fence back-reference.
pub unsafe fn rebuild_swapchain(
    instance: &Instance,
    device: &Device,
    data: &mut RendererData,
) -> Result<bool> {
    if data.recreating_swapchain {
        warn!("Swapchain rebuild requested while one is already running.");
        return Ok(false);
    }

    let (new_width, new_height) = if data.current_framebuffer_size_generation
        != data.last_framebuffer_size_generation
    {
        (
            data.cached_framebuffer_width,
            data.cached_framebuffer_height,
        )
    } else {
        (data.framebuffer_width, data.framebuffer_height)
    };

    if new_width == 0 || new_height == 0 {
        warn!(
            "Not rebuilding the swapchain for a zero-sized window ({}x{}).",
            new_width, new_height
        );
        return Ok(false);
    }

    data.recreating_swapchain = true;
    device.device_wait_idle()?;

    for fence in data.frame_in_flight_fences.iter_mut() {
        *fence = None;
    }

    // Surface properties may have changed along with the size.
    data.depth_format = detect_depth_format(instance, data.physical_device);

    data.command_buffers
        .iter_mut()
        .for_each(|cb| cb.release(device));
    data.command_buffers.clear();
    data.framebuffers
        .iter_mut()
        .for_each(|f| destroy_framebuffer(device, f));
    data.framebuffers.clear();
    destroy_sync_objects(device, data);
    destroy_swapchain_objects(device, data);

    data.framebuffer_width = new_width;
    data.framebuffer_height = new_height;
    data.cached_framebuffer_width = 0;
    data.cached_framebuffer_height = 0;
    data.last_framebuffer_size_generation = data.current_framebuffer_size_generation;

    create_swapchain(instance, device, data)?;
    create_swapchain_image_views(device, data)?;
    create_depth_objects(device, data)?;

    data.render_pass.offset = vk::Offset2D { x: 0, y: 0 };
    data.render_pass.size = vk::Extent2D {
        width: data.framebuffer_width,
        height: data.framebuffer_height,
    };

    create_framebuffers(device, data)?;
    create_command_buffers(device, data)?;
    create_sync_objects(device, data)?;

    data.recreating_swapchain = false;
    info!("Swapchain rebuilt.");

    Ok(true)
}
