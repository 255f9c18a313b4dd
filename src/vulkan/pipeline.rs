use anyhow::Result;
use fxhash::FxHashMap;
use log::*;
use vulkanalia::prelude::v1_0::*;

use super::render_pass::RenderPass;
use super::vertex::Vertex;

#[derive(Copy, Clone, Debug)]
pub struct Pipeline {
    pub handle: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub bind_point: vk::PipelineBindPoint,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self {
            handle: vk::Pipeline::null(),
            layout: vk::PipelineLayout::null(),
            bind_point: vk::PipelineBindPoint::GRAPHICS,
        }
    }
}

/// The variable part of the fixed-function state. Everything else the
/// renderer bakes into every pipeline identically, so this plus the owning
/// shader is enough to identify a pipeline.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct PipelineState {
    pub shader_id: u32,
    pub wireframe: bool,
    pub depth_test: bool,
    pub depth_write: bool,
    pub blend_enabled: bool,
}

impl PipelineState {
    pub fn for_shader(shader_id: u32) -> Self {
        Self {
            shader_id,
            wireframe: false,
            depth_test: true,
            depth_write: true,
            blend_enabled: true,
        }
    }

    pub fn hash_value(&self) -> u64 {
        fxhash::hash64(self)
    }
}

/// Prebuilt pipelines keyed by the hash of their full state description.
/// The cache owns every pipeline it hands out; shaders keep copies of the
/// handles but destruction happens here, once, at shutdown.
#[derive(Debug, Default)]
pub struct PipelineCache {
    pipelines: FxHashMap<u64, Pipeline>,
}

impl PipelineCache {
    pub fn get(&self, state: &PipelineState) -> Option<Pipeline> {
        self.pipelines.get(&state.hash_value()).copied()
    }

    pub fn insert(&mut self, state: &PipelineState, pipeline: Pipeline) {
        self.pipelines.insert(state.hash_value(), pipeline);
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    pub unsafe fn destroy(&mut self, device: &Device) {
        for pipeline in self.pipelines.values() {
            device.destroy_pipeline(pipeline.handle, None);
            device.destroy_pipeline_layout(pipeline.layout, None);
        }
        self.pipelines.clear();
    }
}

/// Builds a graphics pipeline against the main renderpass. The fixed-function
/// policy is uniform across the renderer: triangle lists, one dynamic
/// viewport/scissor pair, back-face culling with counter-clockwise front
/// faces, depth LESS with test and write on, and premultiplied-style
/// srcAlpha/(1-srcAlpha) blending on both color and alpha.
pub unsafe fn create_pipeline(
    device: &Device,
    render_pass: &RenderPass,
    stages: &[vk::PipelineShaderStageCreateInfo],
    set_layouts: &[vk::DescriptorSetLayout],
    push_constant_ranges: &[vk::PushConstantRange],
    state: &PipelineState,
    width: u32,
    height: u32,
) -> Result<Pipeline> {
    let binding_descriptions = &[Vertex::binding_description()];
    let attribute_descriptions = Vertex::attribute_descriptions();
    let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::builder()
        .vertex_binding_descriptions(binding_descriptions)
        .vertex_attribute_descriptions(&attribute_descriptions);

    let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::builder()
        .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
        .primitive_restart_enable(false);

    // Flipped Y so clip space matches the GL convention the rest of the
    // engine assumes. Viewport and scissor are dynamic anyway.
    let viewport = vk::Viewport::builder()
        .x(0.0)
        .y(height as f32)
        .width(width as f32)
        .height(-(height as f32))
        .min_depth(0.0)
        .max_depth(1.0);

    let scissor = vk::Rect2D::builder()
        .offset(vk::Offset2D { x: 0, y: 0 })
        .extent(vk::Extent2D { width, height });

    let viewports = &[viewport];
    let scissors = &[scissor];
    let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
        .viewports(viewports)
        .scissors(scissors);

    let rasterization_state = vk::PipelineRasterizationStateCreateInfo::builder()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(if state.wireframe {
            vk::PolygonMode::LINE
        } else {
            vk::PolygonMode::FILL
        })
        .line_width(1.0)
        .cull_mode(vk::CullModeFlags::BACK)
        .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
        .depth_bias_enable(false);

    let multisample_state = vk::PipelineMultisampleStateCreateInfo::builder()
        .sample_shading_enable(false)
        .rasterization_samples(vk::SampleCountFlags::_1);

    let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::builder()
        .depth_test_enable(state.depth_test)
        .depth_write_enable(state.depth_write)
        .depth_compare_op(vk::CompareOp::LESS)
        .depth_bounds_test_enable(false)
        .stencil_test_enable(false);

    let attachment = vk::PipelineColorBlendAttachmentState::builder()
        .color_write_mask(vk::ColorComponentFlags::all())
        .blend_enable(state.blend_enabled)
        .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
        .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
        .color_blend_op(vk::BlendOp::ADD)
        .src_alpha_blend_factor(vk::BlendFactor::SRC_ALPHA)
        .dst_alpha_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
        .alpha_blend_op(vk::BlendOp::ADD);

    let attachments = &[attachment];

    // logicOpEnable with COPY is carried over from the previous renderer
    // verbatim; some drivers treat the combination as a no-op.
    let color_blend_state = vk::PipelineColorBlendStateCreateInfo::builder()
        .logic_op_enable(true)
        .logic_op(vk::LogicOp::COPY)
        .attachments(attachments);

    let dynamic_states = &[
        vk::DynamicState::VIEWPORT,
        vk::DynamicState::SCISSOR,
        vk::DynamicState::LINE_WIDTH,
    ];
    let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(dynamic_states);

    let layout_info = vk::PipelineLayoutCreateInfo::builder()
        .set_layouts(set_layouts)
        .push_constant_ranges(push_constant_ranges);
    let layout = device.create_pipeline_layout(&layout_info, None)?;

    let info = vk::GraphicsPipelineCreateInfo::builder()
        .stages(stages)
        .vertex_input_state(&vertex_input_state)
        .input_assembly_state(&input_assembly_state)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterization_state)
        .multisample_state(&multisample_state)
        .depth_stencil_state(&depth_stencil_state)
        .color_blend_state(&color_blend_state)
        .dynamic_state(&dynamic_state)
        .layout(layout)
        .render_pass(render_pass.handle)
        .subpass(0);

    let handle = device
        .create_graphics_pipelines(vk::PipelineCache::null(), &[info], None)?
        .0[0];
    info!("Graphics pipeline created.");

    Ok(Pipeline {
        handle,
        layout,
        bind_point: vk::PipelineBindPoint::GRAPHICS,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_states_hash_equal_and_distinct_states_differ() {
        let a = PipelineState::for_shader(7);
        let b = PipelineState::for_shader(7);
        let c = PipelineState {
            wireframe: true,
            ..PipelineState::for_shader(7)
        };
        let d = PipelineState::for_shader(8);

        assert_eq!(a.hash_value(), b.hash_value());
        assert_ne!(a.hash_value(), c.hash_value());
        assert_ne!(a.hash_value(), d.hash_value());
    }

    #[test]
    fn cache_round_trips_by_state() {
        let mut cache = PipelineCache::default();
        let state = PipelineState::for_shader(1);
        assert!(cache.get(&state).is_none());

        cache.insert(&state, Pipeline::default());
        assert!(cache.get(&state).is_some());
        assert!(cache.get(&PipelineState::for_shader(2)).is_none());
        assert_eq!(cache.len(), 1);
    }
}
