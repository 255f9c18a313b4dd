use std::ffi::CString;
use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::{anyhow, Result};
use log::*;
use spirv_reflect::types::{ReflectDescriptorType, ReflectShaderStageFlags};
use spirv_reflect::ShaderModule as ReflectShaderModule;
use vulkanalia::bytecode::Bytecode;
use vulkanalia::prelude::v1_0::*;

use super::buffer::{create_buffer, destroy_buffer, upload_into_buffer, Buffer};
use super::image::Texture;
use super::pipeline::{create_pipeline, Pipeline, PipelineState};
use crate::renderer::RendererData;

/// Fixed capacity for the view/sampler arrays a texture uniform can carry.
pub const MAX_BOUND_TEXTURES: usize = 16;

/// Device-independent lower bound every implementation must support.
pub const MAX_PUSH_CONSTANT_SIZE: u32 = 128;

/// Nvidia sometimes requires uniform buffers to be at least 256-byte aligned.
pub const UNIFORM_BUFFER_ALIGNMENT: u64 = 256;

static NEXT_SHADER_ID: AtomicU32 = AtomicU32::new(1);

/// Update-frequency class of a descriptor set. The set index in the shader
/// source is the contract: set 0 changes at most once a frame, set 1 between
/// draws, and instance-frequency data never appears as a descriptor set at
/// all; it travels as push constants.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SetType {
    Static = 0,
    Draw = 1,
    Instance = 2,
}

impl SetType {
    pub fn from_set_index(set_index: u32) -> Option<SetType> {
        match set_index {
            0 => Some(SetType::Static),
            1 => Some(SetType::Draw),
            _ => None,
        }
    }
}

/// One named shader input discovered by reflection. Buffer-like uniforms own
/// a host-side scratch copy of their data; texture uniforms own the view and
/// sampler handles that the next descriptor update will bind.
#[derive(Clone, Debug)]
pub struct Uniform {
    pub owner_shader_id: u32,
    pub name: String,
    pub set_type: SetType,
    pub binding_index: u32,
    pub descriptor_type: Option<vk::DescriptorType>,
    pub size: u32,
    pub is_texture: bool,
    pub push_constant_index: Option<usize>,
    pub data: Vec<u8>,
    pub image_views: Vec<vk::ImageView>,
    pub samplers: Vec<vk::Sampler>,
}

/// Per-set bookkeeping: the layout bindings, one descriptor set per swapchain
/// image and a single uniform buffer backing all of the set's buffer-like
/// bindings.
#[derive(Clone, Debug, Default)]
pub struct DescriptorSetInfo {
    pub is_valid: bool,
    pub set_index: u32,
    pub bindings: Vec<vk::DescriptorSetLayoutBinding>,
    pub binding_upload_size: u64,
    pub sets: Vec<vk::DescriptorSet>,
    pub buffer: Buffer,
}

#[derive(Debug)]
pub struct ShaderStage {
    pub stage: vk::ShaderStageFlags,
    pub entry_point: CString,
    pub module: vk::ShaderModule,
}

/// Everything derived from one compiled SPIR-V blob: reflected stages,
/// descriptor-set layouts, a descriptor pool, the named uniforms, the
/// push-constant ranges and the graphics pipeline.
#[derive(Debug, Default)]
pub struct Shader {
    pub id: u32,
    pub stages: Vec<ShaderStage>,
    pub layouts: Vec<vk::DescriptorSetLayout>,
    pub set_info: Vec<DescriptorSetInfo>,
    pub pool: vk::DescriptorPool,
    pub push_constant_ranges: Vec<vk::PushConstantRange>,
    pub uniforms: Vec<Uniform>,
    pub static_uniforms: Vec<usize>,
    pub draw_uniforms: Vec<usize>,
    pub instance_uniforms: Vec<usize>,
    pub pipeline: Pipeline,
}

impl Default for ShaderStage {
    fn default() -> Self {
        Self {
            stage: vk::ShaderStageFlags::empty(),
            entry_point: CString::new("main").unwrap(),
            module: vk::ShaderModule::null(),
        }
    }
}

pub fn align16(value: u32) -> u32 {
    (value + 15) & !15
}

pub fn align_up(value: u64, alignment: u64) -> u64 {
    (value + alignment - 1) & !(alignment - 1)
}

/// Push constants above the 128-byte floor fail here, at reflection time,
/// rather than at pipeline creation on some subset of devices.
pub fn validate_push_constant_block(name: &str, offset: u32, padded_size: u32) -> Result<()> {
    if padded_size > MAX_PUSH_CONSTANT_SIZE {
        return Err(anyhow!(
            "Push constant block '{}' is {} bytes; the supported maximum is {}.",
            name,
            padded_size,
            MAX_PUSH_CONSTANT_SIZE
        ));
    }
    if offset > MAX_PUSH_CONSTANT_SIZE {
        return Err(anyhow!(
            "Push constant block '{}' has offset {}; the supported maximum is {}.",
            name,
            offset,
            MAX_PUSH_CONSTANT_SIZE
        ));
    }
    Ok(())
}

pub fn convert_descriptor_type(reflect_type: ReflectDescriptorType) -> Option<vk::DescriptorType> {
    match reflect_type {
        ReflectDescriptorType::Sampler => Some(vk::DescriptorType::SAMPLER),
        ReflectDescriptorType::CombinedImageSampler => {
            Some(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
        }
        ReflectDescriptorType::SampledImage => Some(vk::DescriptorType::SAMPLED_IMAGE),
        ReflectDescriptorType::StorageImage => Some(vk::DescriptorType::STORAGE_IMAGE),
        ReflectDescriptorType::UniformTexelBuffer => Some(vk::DescriptorType::UNIFORM_TEXEL_BUFFER),
        ReflectDescriptorType::StorageTexelBuffer => Some(vk::DescriptorType::STORAGE_TEXEL_BUFFER),
        ReflectDescriptorType::UniformBuffer => Some(vk::DescriptorType::UNIFORM_BUFFER),
        ReflectDescriptorType::StorageBuffer => Some(vk::DescriptorType::STORAGE_BUFFER),
        ReflectDescriptorType::UniformBufferDynamic => {
            Some(vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC)
        }
        ReflectDescriptorType::StorageBufferDynamic => {
            Some(vk::DescriptorType::STORAGE_BUFFER_DYNAMIC)
        }
        ReflectDescriptorType::InputAttachment => Some(vk::DescriptorType::INPUT_ATTACHMENT),
        _ => None,
    }
}

pub fn convert_shader_stage(reflect_stage: ReflectShaderStageFlags) -> vk::ShaderStageFlags {
    let mut stage = vk::ShaderStageFlags::empty();
    if reflect_stage.contains(ReflectShaderStageFlags::VERTEX) {
        stage |= vk::ShaderStageFlags::VERTEX;
    }
    if reflect_stage.contains(ReflectShaderStageFlags::TESSELLATION_CONTROL) {
        stage |= vk::ShaderStageFlags::TESSELLATION_CONTROL;
    }
    if reflect_stage.contains(ReflectShaderStageFlags::TESSELLATION_EVALUATION) {
        stage |= vk::ShaderStageFlags::TESSELLATION_EVALUATION;
    }
    if reflect_stage.contains(ReflectShaderStageFlags::GEOMETRY) {
        stage |= vk::ShaderStageFlags::GEOMETRY;
    }
    if reflect_stage.contains(ReflectShaderStageFlags::FRAGMENT) {
        stage |= vk::ShaderStageFlags::FRAGMENT;
    }
    if reflect_stage.contains(ReflectShaderStageFlags::COMPUTE) {
        stage |= vk::ShaderStageFlags::COMPUTE;
    }
    stage
}

pub fn is_texture_descriptor(descriptor_type: vk::DescriptorType) -> bool {
    matches!(
        descriptor_type,
        vk::DescriptorType::SAMPLER
            | vk::DescriptorType::SAMPLED_IMAGE
            | vk::DescriptorType::STORAGE_IMAGE
            | vk::DescriptorType::COMBINED_IMAGE_SAMPLER
    )
}

/// Every descriptor type tally is multiplied by the image count so each
/// swapchain image gets its own copy of every set. A shader with no bindings
/// at all still gets a single uniform-buffer entry so pool creation succeeds;
/// kept for compatibility with the previous renderer.
pub fn descriptor_pool_sizes(
    type_counts: &[(vk::DescriptorType, u32)],
    image_count: u32,
) -> Vec<vk::DescriptorPoolSize> {
    let mut sizes = type_counts
        .iter()
        .filter(|(_, count)| *count > 0)
        .map(|(descriptor_type, count)| {
            vk::DescriptorPoolSize::builder()
                .type_(*descriptor_type)
                .descriptor_count(count * image_count)
                .build()
        })
        .collect::<Vec<_>>();

    if sizes.is_empty() {
        warn!("No descriptor pool sizes reflected; allocating a single UBO entry.");
        sizes.push(
            vk::DescriptorPoolSize::builder()
                .type_(vk::DescriptorType::UNIFORM_BUFFER)
                .descriptor_count(1)
                .build(),
        );
    }

    sizes
}

pub fn descriptor_pool_max_sets(set_count: u32, image_count: u32) -> u32 {
    (set_count * image_count).max(1)
}

/// Builds a complete shader from compiled SPIR-V: reflect the module, derive
/// the descriptor-set layouts and push-constant ranges, allocate pool, sets
/// and uniform buffers, compile the entry points and construct the pipeline.
pub unsafe fn create_shader(
    device: &Device,
    data: &mut RendererData,
    bytecode: &[u8],
) -> Result<Shader> {
    let module = ReflectShaderModule::load_u8_data(bytecode)
        .map_err(|e| anyhow!("Failed to reflect shader module: {}", e))?;

    let image_count = data.swapchain_images.len();
    let id = NEXT_SHADER_ID.fetch_add(1, Ordering::Relaxed);

    let mut shader = Shader {
        id,
        ..Default::default()
    };

    // Push constant blocks become Instance-frequency uniforms with host
    // scratch storage; their update mechanism is vkCmdPushConstants.
    let push_blocks = module
        .enumerate_push_constant_blocks(None)
        .map_err(|e| anyhow!("Failed to enumerate push constants: {}", e))?;
    for (push_constant_index, block) in push_blocks.iter().enumerate() {
        validate_push_constant_block(&block.name, block.offset, block.padded_size)?;

        let size = align16(block.padded_size);
        shader.push_constant_ranges.push(
            vk::PushConstantRange::builder()
                .stage_flags(vk::ShaderStageFlags::empty())
                .offset(block.offset)
                .size(size)
                .build(),
        );

        shader.instance_uniforms.push(shader.uniforms.len());
        shader.uniforms.push(Uniform {
            owner_shader_id: id,
            name: block.name.clone(),
            set_type: SetType::Instance,
            binding_index: 0,
            descriptor_type: None,
            size,
            is_texture: false,
            push_constant_index: Some(push_constant_index),
            data: vec![0; size as usize],
            image_views: Vec::new(),
            samplers: Vec::new(),
        });
    }

    // Descriptor sets. Only Static (0) and Draw (1) may appear; anything at
    // instance frequency has to be a push constant.
    let reflect_sets = module
        .enumerate_descriptor_sets(None)
        .map_err(|e| anyhow!("Failed to enumerate descriptor sets: {}", e))?;

    let mut type_counts: Vec<(vk::DescriptorType, u32)> = Vec::new();

    let set_count = reflect_sets.iter().map(|s| s.set + 1).max().unwrap_or(0);
    shader.set_info = (0..set_count)
        .map(|set_index| DescriptorSetInfo {
            set_index,
            ..Default::default()
        })
        .collect();

    for reflect_set in &reflect_sets {
        let set_type = SetType::from_set_index(reflect_set.set).ok_or_else(|| {
            anyhow!(
                "Descriptor set {} reflected; instance-frequency data must use push constants.",
                reflect_set.set
            )
        })?;

        let mut bindings = Vec::with_capacity(reflect_set.bindings.len());
        let mut set_buffer_size = 0u64;

        trace!(
            "Shader descriptor set {} has {} bindings.",
            reflect_set.set,
            reflect_set.bindings.len()
        );

        for binding in &reflect_set.bindings {
            let descriptor_type = convert_descriptor_type(binding.descriptor_type)
                .ok_or_else(|| anyhow!("Unsupported descriptor type in binding '{}'.", binding.name))?;
            let is_texture = is_texture_descriptor(descriptor_type);

            trace!(
                "Binding {} '{}' of type {:?}.",
                binding.binding,
                binding.name,
                descriptor_type
            );

            set_buffer_size += binding.block.padded_size as u64;

            let uniform_index = shader.uniforms.len();
            shader.uniforms.push(Uniform {
                owner_shader_id: id,
                name: binding.name.clone(),
                set_type,
                binding_index: binding.binding,
                descriptor_type: Some(descriptor_type),
                size: binding.block.padded_size,
                is_texture,
                push_constant_index: None,
                data: if is_texture {
                    Vec::new()
                } else {
                    vec![0; binding.block.padded_size as usize]
                },
                image_views: Vec::with_capacity(if is_texture { MAX_BOUND_TEXTURES } else { 0 }),
                samplers: Vec::with_capacity(if is_texture { MAX_BOUND_TEXTURES } else { 0 }),
            });
            match set_type {
                SetType::Static => shader.static_uniforms.push(uniform_index),
                SetType::Draw => shader.draw_uniforms.push(uniform_index),
                SetType::Instance => unreachable!(),
            }

            match type_counts.iter_mut().find(|(t, _)| *t == descriptor_type) {
                Some((_, count)) => *count += 1,
                None => type_counts.push((descriptor_type, 1)),
            }

            // Texture bindings are sampled from the fragment stage even when
            // the reflection data doesn't say so yet.
            let mut stage_flags = vk::ShaderStageFlags::empty();
            if is_texture {
                stage_flags |= vk::ShaderStageFlags::FRAGMENT;
            }

            bindings.push(
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(binding.binding)
                    .descriptor_type(descriptor_type)
                    .descriptor_count(binding.count)
                    .stage_flags(stage_flags)
                    .build(),
            );
        }

        let set_info = &mut shader.set_info[reflect_set.set as usize];
        set_info.is_valid = true;
        set_info.bindings = bindings;
        set_info.binding_upload_size = set_buffer_size;
    }

    // Merge each entry point's stage into the bindings of every set that
    // entry point uses.
    let entry_points = module
        .enumerate_entry_points()
        .map_err(|e| anyhow!("Failed to enumerate entry points: {}", e))?;
    for entry_point in &entry_points {
        let stage = convert_shader_stage(entry_point.shader_stage);

        for set_data in &entry_point.descriptor_sets {
            if let Some(set_info) = shader
                .set_info
                .iter_mut()
                .find(|s| s.set_index == set_data.set)
            {
                for binding in &mut set_info.bindings {
                    binding.stage_flags |= stage;
                }
            }
        }

        for range_index in 0..entry_point.used_push_constants.len() {
            if let Some(range) = shader.push_constant_ranges.get_mut(range_index) {
                range.stage_flags |= stage;
            }
        }
    }

    // Layouts, pool, per-image descriptor sets and the per-set uniform
    // buffers.
    for set_info in &mut shader.set_info {
        let info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&set_info.bindings);
        shader
            .layouts
            .push(device.create_descriptor_set_layout(&info, None)?);
    }

    let pool_sizes = descriptor_pool_sizes(&type_counts, image_count as u32);
    let pool_info = vk::DescriptorPoolCreateInfo::builder()
        .max_sets(descriptor_pool_max_sets(set_count, image_count as u32))
        .pool_sizes(&pool_sizes);
    shader.pool = device.create_descriptor_pool(&pool_info, None)?;

    for (set_index, set_info) in shader.set_info.iter_mut().enumerate() {
        let layouts = vec![shader.layouts[set_index]; image_count];
        let info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(shader.pool)
            .set_layouts(&layouts);
        set_info.sets = device.allocate_descriptor_sets(&info)?;

        if set_info.binding_upload_size > 0 {
            set_info.buffer = create_buffer(
                device,
                data,
                align_up(
                    set_info.binding_upload_size * image_count as u64,
                    UNIFORM_BUFFER_ALIGNMENT,
                ),
                vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::UNIFORM_BUFFER,
                vk::MemoryPropertyFlags::HOST_VISIBLE
                    | vk::MemoryPropertyFlags::HOST_COHERENT
                    | vk::MemoryPropertyFlags::DEVICE_LOCAL,
                true,
            )?;
        }
    }

    // One shader module per entry point, all from the same blob.
    for entry_point in &entry_points {
        trace!("Shader entry point '{}'.", entry_point.name);

        let bytecode = Bytecode::new(bytecode).map_err(|e| anyhow!("Invalid bytecode: {}", e))?;
        let info = vk::ShaderModuleCreateInfo::builder()
            .code_size(bytecode.code_size())
            .code(bytecode.code());

        shader.stages.push(ShaderStage {
            stage: convert_shader_stage(entry_point.shader_stage),
            entry_point: CString::new(entry_point.name.as_str())?,
            module: device.create_shader_module(&info, None)?,
        });
    }

    let stage_infos = shader
        .stages
        .iter()
        .map(|stage| {
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(stage.stage)
                .module(stage.module)
                .name(stage.entry_point.as_bytes_with_nul())
                .build()
        })
        .collect::<Vec<_>>();

    let state = PipelineState::for_shader(id);
    shader.pipeline = match data.pipeline_cache.get(&state) {
        Some(pipeline) => pipeline,
        None => {
            let pipeline = create_pipeline(
                device,
                &data.render_pass,
                &stage_infos,
                &shader.layouts,
                &shader.push_constant_ranges,
                &state,
                data.framebuffer_width,
                data.framebuffer_height,
            )?;
            data.pipeline_cache.insert(&state, pipeline);
            pipeline
        }
    };

    Ok(shader)
}

pub unsafe fn destroy_shader(device: &Device, shader: &mut Shader) {
    for stage in shader.stages.drain(..) {
        device.destroy_shader_module(stage.module, None);
    }
    for layout in shader.layouts.drain(..) {
        device.destroy_descriptor_set_layout(layout, None);
    }
    for set_info in shader.set_info.iter_mut() {
        if set_info.buffer.is_valid() {
            destroy_buffer(device, &mut set_info.buffer);
        }
    }
    if shader.pool != vk::DescriptorPool::null() {
        // Also frees every descriptor set allocated from it.
        device.destroy_descriptor_pool(shader.pool, None);
        shader.pool = vk::DescriptorPool::null();
    }
    // The pipeline is owned by the pipeline cache.
}

fn find_uniform_index(shader: &Shader, name: &str) -> usize {
    shader
        .uniforms
        .iter()
        .position(|u| u.name == name)
        .unwrap_or_else(|| panic!("Shader has no uniform named '{}'.", name))
}

/// Copies `bytes` into the uniform's host scratch. The next `update_set` (or
/// `update_instance_set` for push constants) makes it visible to draws.
pub fn update_uniform_data(shader: &mut Shader, name: &str, bytes: &[u8]) {
    let index = find_uniform_index(shader, name);
    let uniform = &mut shader.uniforms[index];

    assert!(
        !uniform.is_texture,
        "Uniform '{}' is a texture; use update_uniform_texture.",
        name
    );
    assert!(
        bytes.len() <= uniform.data.len(),
        "Uniform '{}' holds {} bytes; {} were supplied.",
        name,
        uniform.data.len(),
        bytes.len()
    );

    uniform.data[..bytes.len()].copy_from_slice(bytes);
}

pub fn read_uniform_data<'a>(shader: &'a Shader, name: &str) -> &'a [u8] {
    let index = find_uniform_index(shader, name);
    &shader.uniforms[index].data
}

pub fn update_uniform_texture(shader: &mut Shader, name: &str, texture: &Texture) {
    let index = find_uniform_index(shader, name);
    let uniform = &mut shader.uniforms[index];

    assert!(
        uniform.is_texture,
        "Uniform '{}' is not a texture; use update_uniform_data.",
        name
    );

    uniform.image_views.clear();
    uniform.samplers.clear();
    uniform.image_views.push(texture.image.view);
    uniform.samplers.push(texture.sampler);
}

pub unsafe fn bind_shader(device: &Device, data: &RendererData, shader: &Shader) {
    let command_buffer = &data.command_buffers[data.current_image_index];
    assert!(
        command_buffer.is_recording(),
        "Binding a pipeline outside of command recording."
    );
    assert!(shader.pipeline.handle != vk::Pipeline::null());

    device.cmd_bind_pipeline(
        command_buffer.handle,
        shader.pipeline.bind_point,
        shader.pipeline.handle,
    );
}

/// Packs the set's uniforms into a contiguous staging slice, uploads it into
/// the set's uniform buffer, then issues exactly one descriptor write batch
/// and one descriptor bind for the current image's set.
///
/// The upload blocks on the graphics queue; acknowledged as suboptimal and
/// kept because it is the behavior draws observe today.
pub unsafe fn update_set(
    device: &Device,
    data: &RendererData,
    shader: &Shader,
    set_type: SetType,
) -> Result<()> {
    if set_type == SetType::Instance {
        return update_instance_set(device, data, shader);
    }

    let set_index = set_type as usize;
    let Some(set_info) = shader.set_info.get(set_index) else {
        return Ok(());
    };
    if !set_info.is_valid {
        return Ok(());
    }

    let command_buffer = &data.command_buffers[data.current_image_index];
    assert!(
        command_buffer.is_recording(),
        "Descriptor updates require a recording command buffer."
    );

    let uniform_indices = match set_type {
        SetType::Static => &shader.static_uniforms,
        SetType::Draw => &shader.draw_uniforms,
        SetType::Instance => unreachable!(),
    };

    let mut staging = vec![0u8; set_info.buffer.size as usize];
    let mut write_offset = 0usize;
    let mut image_views: Vec<vk::ImageView> = Vec::new();
    let mut samplers: Vec<vk::Sampler> = Vec::new();

    for uniform_index in uniform_indices {
        let uniform = &shader.uniforms[*uniform_index];
        debug_assert!(uniform.owner_shader_id == shader.id);

        if uniform.is_texture {
            if uniform.image_views.is_empty() {
                warn!("Texture uniform '{}' has no texture bound.", uniform.name);
            }
            image_views.extend_from_slice(&uniform.image_views);
            samplers.extend_from_slice(&uniform.samplers);
        } else {
            staging[write_offset..write_offset + uniform.data.len()].copy_from_slice(&uniform.data);
            write_offset += uniform.size as usize;
        }
    }

    if set_info.buffer.is_valid() {
        upload_into_buffer(
            device,
            data,
            &set_info.buffer,
            &staging,
            0,
            data.graphics_queue,
            data.command_pool,
        )?;
    }

    let current_set = set_info.sets[data.current_image_index];

    let buffer_infos = [vk::DescriptorBufferInfo::builder()
        .buffer(set_info.buffer.handle)
        .offset(0)
        .range(set_info.binding_upload_size)
        .build()];
    let image_infos = [vk::DescriptorImageInfo::builder()
        .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
        .image_view(image_views.first().copied().unwrap_or_else(vk::ImageView::null))
        .sampler(samplers.first().copied().unwrap_or_else(vk::Sampler::null))
        .build()];

    let writes = set_info
        .bindings
        .iter()
        .map(|binding| {
            let write = vk::WriteDescriptorSet::builder()
                .dst_set(current_set)
                .dst_binding(binding.binding)
                .dst_array_element(0)
                .descriptor_type(binding.descriptor_type);
            if is_texture_descriptor(binding.descriptor_type) {
                write.image_info(&image_infos).build()
            } else {
                write.buffer_info(&buffer_infos).build()
            }
        })
        .collect::<Vec<_>>();

    // Some GPUs only support update-then-bind, never bind-then-update.
    device.update_descriptor_sets(&writes, &[] as &[vk::CopyDescriptorSet]);

    device.cmd_bind_descriptor_sets(
        command_buffer.handle,
        vk::PipelineBindPoint::GRAPHICS,
        shader.pipeline.layout,
        set_info.set_index,
        &[current_set],
        &[],
    );

    Ok(())
}

/// Pushes every instance uniform's scratch bytes through vkCmdPushConstants.
pub unsafe fn update_instance_set(
    device: &Device,
    data: &RendererData,
    shader: &Shader,
) -> Result<()> {
    let command_buffer = &data.command_buffers[data.current_image_index];
    assert!(
        command_buffer.is_recording(),
        "Push constant updates require a recording command buffer."
    );

    for uniform_index in &shader.instance_uniforms {
        let uniform = &shader.uniforms[*uniform_index];
        let range_index = uniform
            .push_constant_index
            .expect("Instance uniform without a push constant range.");
        let range = shader.push_constant_ranges[range_index];

        device.cmd_push_constants(
            command_buffer.handle,
            shader.pipeline.layout,
            range.stage_flags,
            range.offset,
            &uniform.data[..range.size as usize],
        );
    }

    Ok(())
}

/// Static, then Draw, then Instance.
pub unsafe fn update_all_sets(device: &Device, data: &RendererData, shader: &Shader) -> Result<()> {
    if !shader.static_uniforms.is_empty() {
        update_set(device, data, shader, SetType::Static)?;
    }
    if !shader.draw_uniforms.is_empty() {
        update_set(device, data, shader, SetType::Draw)?;
    }
    if !shader.instance_uniforms.is_empty() {
        update_instance_set(device, data, shader)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alignment_helpers_round_up() {
        assert_eq!(align16(0), 0);
        assert_eq!(align16(1), 16);
        assert_eq!(align16(16), 16);
        assert_eq!(align16(130), 144);
        assert_eq!(align_up(1, 256), 256);
        assert_eq!(align_up(256, 256), 256);
        assert_eq!(align_up(257, 256), 512);
    }

    #[test]
    fn oversized_push_constant_blocks_fail_at_reflection_time() {
        assert!(validate_push_constant_block("PushConstants", 0, 128).is_ok());
        assert!(validate_push_constant_block("PushConstants", 0, 160).is_err());
        assert!(validate_push_constant_block("PushConstants", 144, 16).is_err());
    }

    #[test]
    fn set_indices_map_to_frequencies() {
        assert_eq!(SetType::from_set_index(0), Some(SetType::Static));
        assert_eq!(SetType::from_set_index(1), Some(SetType::Draw));
        // Instance-frequency data is push constants only.
        assert_eq!(SetType::from_set_index(2), None);
        assert_eq!(SetType::from_set_index(3), None);
    }

    #[test]
    fn texture_descriptors_are_classified() {
        assert!(is_texture_descriptor(vk::DescriptorType::SAMPLER));
        assert!(is_texture_descriptor(vk::DescriptorType::SAMPLED_IMAGE));
        assert!(is_texture_descriptor(vk::DescriptorType::STORAGE_IMAGE));
        assert!(is_texture_descriptor(
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER
        ));
        assert!(!is_texture_descriptor(vk::DescriptorType::UNIFORM_BUFFER));
        assert!(!is_texture_descriptor(vk::DescriptorType::STORAGE_BUFFER));
    }

    #[test]
    fn pool_sizes_scale_with_the_image_count() {
        // Two UBOs and one combined image sampler on a 3-image swapchain.
        let sizes = descriptor_pool_sizes(
            &[
                (vk::DescriptorType::UNIFORM_BUFFER, 2),
                (vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 1),
            ],
            3,
        );

        assert_eq!(sizes.len(), 2);
        assert_eq!(sizes[0].type_, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(sizes[0].descriptor_count, 6);
        assert_eq!(sizes[1].type_, vk::DescriptorType::COMBINED_IMAGE_SAMPLER);
        assert_eq!(sizes[1].descriptor_count, 3);

        assert_eq!(descriptor_pool_max_sets(2, 3), 6);
    }

    #[test]
    fn empty_reflection_still_sizes_a_pool() {
        let sizes = descriptor_pool_sizes(&[], 3);
        assert_eq!(sizes.len(), 1);
        assert_eq!(sizes[0].type_, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(sizes[0].descriptor_count, 1);
        assert_eq!(descriptor_pool_max_sets(0, 3), 1);
    }

    #[test]
    fn uniform_data_round_trips_by_name() {
        let mut shader = Shader::default();
        shader.uniforms.push(Uniform {
            owner_shader_id: 1,
            name: "Matrices".into(),
            set_type: SetType::Static,
            binding_index: 0,
            descriptor_type: Some(vk::DescriptorType::UNIFORM_BUFFER),
            size: 16,
            is_texture: false,
            push_constant_index: None,
            data: vec![0; 16],
            image_views: Vec::new(),
            samplers: Vec::new(),
        });

        let bytes = [7u8; 16];
        update_uniform_data(&mut shader, "Matrices", &bytes);
        assert_eq!(read_uniform_data(&shader, "Matrices"), &bytes);
    }

    #[test]
    #[should_panic(expected = "no uniform named")]
    fn unknown_uniform_names_panic() {
        let mut shader = Shader::default();
        update_uniform_data(&mut shader, "Nope", &[0u8; 4]);
    }

    #[test]
    #[should_panic(expected = "holds 16 bytes")]
    fn oversized_uniform_updates_panic() {
        let mut shader = Shader::default();
        shader.uniforms.push(Uniform {
            owner_shader_id: 1,
            name: "Small".into(),
            set_type: SetType::Static,
            binding_index: 0,
            descriptor_type: Some(vk::DescriptorType::UNIFORM_BUFFER),
            size: 16,
            is_texture: false,
            push_constant_index: None,
            data: vec![0; 16],
            image_views: Vec::new(),
            samplers: Vec::new(),
        });
        update_uniform_data(&mut shader, "Small", &[0u8; 32]);
    }
}
