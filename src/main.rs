use std::mem::size_of;
use std::path::Path;

use anyhow::Result;
use cgmath::{ortho, vec2, vec4, SquareMatrix};
use log::*;
use vulkanalia::prelude::v1_0::*;
use winit::dpi::LogicalSize;
use winit::event::{Event, WindowEvent};
use winit::event_loop::EventLoop;
use winit::window::{Window, WindowBuilder};

use kestrel::assets::manager::{AssetHandle, AssetManager};
use kestrel::renderer::Renderer;
use kestrel::vulkan::buffer::{create_buffer, destroy_buffer, upload_into_buffer, Buffer};
use kestrel::vulkan::shader::{
    bind_shader, update_all_sets, update_uniform_data, update_uniform_texture,
};
use kestrel::vulkan::vertex::{Mat4, Vertex};

const DEFAULT_ARCHIVE: &str = "res/assets.jfd";
const QUAD_INDEX_COUNT: u32 = 6;

/// Per-frame camera matrices, laid out exactly as the shader's Matrices
/// uniform block expects.
#[repr(C)]
#[derive(Copy, Clone, Debug)]
struct CameraMatrices {
    view: Mat4,
    projection: Mat4,
}

struct App {
    renderer: Renderer,
    assets: AssetManager,
    shader_handle: AssetHandle,
    texture_handle: AssetHandle,
    vertex_buffer: Buffer,
    index_buffer: Buffer,
}

impl App {
    unsafe fn create(window: &Window, archive_path: &Path) -> Result<Self> {
        let size = window.inner_size();
        let mut renderer = Renderer::create(window, size.width, size.height)?;

        let mut assets = AssetManager::new();
        let mut shader_handle = AssetHandle::invalid();
        let mut texture_handle = AssetHandle::invalid();

        match assets.load_archive_file(archive_path) {
            Ok(_) => {
                shader_handle = assets.acquire_handle("basic");
                texture_handle = assets.acquire_handle("player");

                for handle in [&shader_handle, &texture_handle] {
                    if handle.is_valid {
                        assets.acquire_ref(handle);
                        assets.queue_load(handle);
                    }
                }
                assets.process_load_queue();

                if shader_handle.is_valid {
                    assets.create_slot_shader(
                        &renderer.device,
                        &mut renderer.data,
                        &shader_handle,
                    )?;
                } else {
                    warn!("Shader 'basic' not found; rendering the clear color only.");
                }
                if texture_handle.is_valid {
                    assets.upload_slot_texture(&renderer.device, &renderer.data, &texture_handle)?;
                } else {
                    warn!("Texture 'player' not found; rendering the clear color only.");
                }
            }
            Err(error) => {
                warn!(
                    "Could not open archive '{}': {}; rendering the clear color only.",
                    archive_path.display(),
                    error
                );
            }
        }

        // A centered quad; two triangles sharing the diagonal.
        let vertices = [
            Vertex::new(
                vec4(100.0, -100.0, 0.0, 1.0),
                vec4(1.0, 0.0, 0.0, 1.0),
                vec2(1.0, 1.0),
            ),
            Vertex::new(
                vec4(100.0, 100.0, 0.0, 1.0),
                vec4(0.0, 1.0, 0.0, 1.0),
                vec2(1.0, 0.0),
            ),
            Vertex::new(
                vec4(-100.0, 100.0, 0.0, 1.0),
                vec4(0.0, 0.0, 1.0, 1.0),
                vec2(0.0, 0.0),
            ),
            Vertex::new(
                vec4(-100.0, -100.0, 0.0, 1.0),
                vec4(1.0, 0.0, 1.0, 1.0),
                vec2(0.0, 1.0),
            ),
        ];
        let indices: [u32; QUAD_INDEX_COUNT as usize] = [0, 1, 2, 2, 3, 0];

        let vertex_buffer = create_buffer(
            &renderer.device,
            &renderer.data,
            (size_of::<Vertex>() * vertices.len()) as u64,
            vk::BufferUsageFlags::VERTEX_BUFFER
                | vk::BufferUsageFlags::TRANSFER_DST
                | vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            true,
        )?;
        upload_into_buffer(
            &renderer.device,
            &renderer.data,
            &vertex_buffer,
            bytes_of(&vertices),
            0,
            renderer.data.graphics_queue,
            renderer.data.command_pool,
        )?;

        let index_buffer = create_buffer(
            &renderer.device,
            &renderer.data,
            (size_of::<u32>() * indices.len()) as u64,
            vk::BufferUsageFlags::INDEX_BUFFER
                | vk::BufferUsageFlags::TRANSFER_DST
                | vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            true,
        )?;
        upload_into_buffer(
            &renderer.device,
            &renderer.data,
            &index_buffer,
            bytes_of(&indices),
            0,
            renderer.data.graphics_queue,
            renderer.data.command_pool,
        )?;

        Ok(Self {
            renderer,
            assets,
            shader_handle,
            texture_handle,
            vertex_buffer,
            index_buffer,
        })
    }

    unsafe fn render(&mut self) -> Result<()> {
        if !self.renderer.begin_frame()? {
            return Ok(());
        }

        if self.shader_handle.is_valid && self.texture_handle.is_valid {
            self.draw_quad()?;
        }

        self.renderer.end_frame()?;

        Ok(())
    }

    unsafe fn draw_quad(&mut self) -> Result<()> {
        let device = &self.renderer.device;
        let data = &self.renderer.data;

        let width = data.framebuffer_width as f32;
        let height = data.framebuffer_height as f32;
        let matrices = CameraMatrices {
            view: Mat4::identity(),
            projection: ortho(
                width * -0.5,
                width * 0.5,
                height * -0.5,
                height * 0.5,
                -1.0,
                1.0,
            ),
        };

        let Some(texture) = self.assets.texture_for(&self.texture_handle).cloned() else {
            return Ok(());
        };
        let Some(shader) = self.assets.shader_for_mut(&self.shader_handle) else {
            return Ok(());
        };

        update_uniform_data(shader, "Matrices", bytes_of(&matrices));
        update_uniform_texture(shader, "TextureSampler", &texture);

        let shader = &*shader;
        bind_shader(device, data, shader);
        update_all_sets(device, data, shader)?;

        let command_buffer = self.renderer.current_command_buffer().handle;
        device.cmd_bind_vertex_buffers(command_buffer, 0, &[self.vertex_buffer.handle], &[0]);
        device.cmd_bind_index_buffer(command_buffer, self.index_buffer.handle, 0, vk::IndexType::UINT32);
        device.cmd_draw_indexed(command_buffer, QUAD_INDEX_COUNT, 1, 0, 0, 0);

        Ok(())
    }

    unsafe fn destroy(&mut self) {
        let device = &self.renderer.device;
        let _ = device.device_wait_idle();

        destroy_buffer(device, &mut self.vertex_buffer);
        destroy_buffer(device, &mut self.index_buffer);
        self.assets.destroy(device);
        self.renderer.destroy();
    }
}

fn bytes_of<T>(value: &T) -> &[u8] {
    unsafe { std::slice::from_raw_parts(value as *const T as *const u8, size_of::<T>()) }
}

fn main() -> Result<()> {
    pretty_env_logger::init();

    let archive_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_ARCHIVE.to_string());

    let event_loop = EventLoop::new()?;
    let window = WindowBuilder::new()
        .with_title("kestrel")
        .with_inner_size(LogicalSize::new(1024, 768))
        .build(&event_loop)?;

    let mut app = unsafe { App::create(&window, Path::new(&archive_path))? };
    let mut destroyed = false;

    event_loop.run(move |event, elwt| match event {
        Event::AboutToWait => window.request_redraw(),
        Event::WindowEvent { event, .. } => match event {
            WindowEvent::RedrawRequested if !elwt.exiting() && !destroyed => {
                unsafe { app.render() }.unwrap()
            }
            WindowEvent::Resized(size) => {
                app.renderer.on_resize(size.width, size.height);
            }
            WindowEvent::CloseRequested => {
                elwt.exit();
                destroyed = true;
                unsafe { app.destroy() };
            }
            _ => (),
        },
        _ => {}
    })?;

    Ok(())
}
