//! Shared canvas pipeline: shader compilation, push-descriptor layout and
//! the graphics pipeline object.

use std::ffi::CStr;
use std::sync::Arc;

use ash::vk;
use bytemuck::{Pod, Zeroable};

use crate::device::DeviceContext;
use crate::error::{GraphicsError, GraphicsResult};
use crate::resources::LayerVertex;

pub const CANVAS_SHADER: &str = include_str!("canvas.wgsl");

const VERTEX_ENTRY: &CStr = c"vs_main";
const FRAGMENT_ENTRY: &CStr = c"fs_main";

pub const UNIFORM_BINDING: u32 = 0;
pub const TEXTURE_BINDING: u32 = 1;
pub const SAMPLER_BINDING: u32 = 2;

/// Uniform block shared by every layer draw in a frame.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct CanvasUniforms {
    pub screen_size: [f32; 2],
    pub offset: [f32; 2],
    pub scale: f32,
    pub _pad: [f32; 3],
}

/// Compile WGSL to SPIR-V for one entry point.
pub fn compile_wgsl(
    source: &str,
    stage: naga::ShaderStage,
    entry_point: &str,
) -> GraphicsResult<Vec<u32>> {
    let module = naga::front::wgsl::parse_str(source).map_err(|e| {
        GraphicsError::ShaderCompilationFailed(format!("WGSL parse error: {e}"))
    })?;

    let mut validator = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    );
    let info = validator.validate(&module).map_err(|e| {
        GraphicsError::ShaderCompilationFailed(format!("Validation error: {e}"))
    })?;

    if !module
        .entry_points
        .iter()
        .any(|ep| ep.name == entry_point && ep.stage == stage)
    {
        return Err(GraphicsError::ShaderCompilationFailed(format!(
            "Entry point '{}' not found for stage {:?}",
            entry_point, stage
        )));
    }

    let options = naga::back::spv::Options {
        lang_version: (1, 3),
        flags: naga::back::spv::WriterFlags::empty(),
        ..Default::default()
    };
    let pipeline_options = naga::back::spv::PipelineOptions {
        shader_stage: stage,
        entry_point: entry_point.to_string(),
    };

    naga::back::spv::write_vec(&module, &info, &options, Some(&pipeline_options)).map_err(|e| {
        GraphicsError::ShaderCompilationFailed(format!("SPIR-V generation error: {e}"))
    })
}

fn create_shader_module(device: &ash::Device, spv: &[u32]) -> GraphicsResult<vk::ShaderModule> {
    let create_info = vk::ShaderModuleCreateInfo::default().code(spv);
    unsafe { device.create_shader_module(&create_info, None) }.map_err(|e| {
        GraphicsError::ShaderCompilationFailed(format!("Failed to create shader module: {:?}", e))
    })
}

pub(crate) fn descriptor_bindings() -> [vk::DescriptorSetLayoutBinding<'static>; 3] {
    [
        vk::DescriptorSetLayoutBinding::default()
            .binding(UNIFORM_BINDING)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::VERTEX),
        vk::DescriptorSetLayoutBinding::default()
            .binding(TEXTURE_BINDING)
            .descriptor_type(vk::DescriptorType::SAMPLED_IMAGE)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::FRAGMENT),
        vk::DescriptorSetLayoutBinding::default()
            .binding(SAMPLER_BINDING)
            .descriptor_type(vk::DescriptorType::SAMPLER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::FRAGMENT),
    ]
}

/// Standard alpha blending: `srcAlpha, 1 - srcAlpha` for color, `1, 0` for alpha.
pub(crate) fn alpha_blend_attachment() -> vk::PipelineColorBlendAttachmentState {
    vk::PipelineColorBlendAttachmentState::default()
        .blend_enable(true)
        .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
        .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
        .color_blend_op(vk::BlendOp::ADD)
        .src_alpha_blend_factor(vk::BlendFactor::ONE)
        .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
        .alpha_blend_op(vk::BlendOp::ADD)
        .color_write_mask(vk::ColorComponentFlags::RGBA)
}

pub(crate) const DYNAMIC_STATES: [vk::DynamicState; 7] = [
    vk::DynamicState::VIEWPORT,
    vk::DynamicState::SCISSOR,
    vk::DynamicState::CULL_MODE,
    vk::DynamicState::FRONT_FACE,
    vk::DynamicState::PRIMITIVE_TOPOLOGY,
    vk::DynamicState::DEPTH_TEST_ENABLE,
    vk::DynamicState::DEPTH_WRITE_ENABLE,
];

/// Descriptor layout, pipeline layout and pipeline for drawing layers into
/// a color target of one format.
pub struct CanvasPipeline {
    context: Arc<DeviceContext>,
    set_layout: vk::DescriptorSetLayout,
    layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
    color_format: vk::Format,
}

impl CanvasPipeline {
    pub fn new(context: &Arc<DeviceContext>, color_format: vk::Format) -> GraphicsResult<Self> {
        let vertex_spv =
            compile_wgsl(CANVAS_SHADER, naga::ShaderStage::Vertex, "vs_main")?;
        let fragment_spv =
            compile_wgsl(CANVAS_SHADER, naga::ShaderStage::Fragment, "fs_main")?;

        let device = context.device();

        let bindings = descriptor_bindings();
        let set_layout_info = vk::DescriptorSetLayoutCreateInfo::default()
            .flags(vk::DescriptorSetLayoutCreateFlags::PUSH_DESCRIPTOR_KHR)
            .bindings(&bindings);
        let set_layout = unsafe { device.create_descriptor_set_layout(&set_layout_info, None) }
            .map_err(|e| GraphicsError::from_vk(e, GraphicsError::PipelineCreationFailed))?;

        // Owns the layout objects from here so early returns clean up.
        let mut pipeline = Self {
            context: Arc::clone(context),
            set_layout,
            layout: vk::PipelineLayout::null(),
            pipeline: vk::Pipeline::null(),
            color_format,
        };

        let set_layouts = [set_layout];
        let layout_info = vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts);
        pipeline.layout = unsafe { device.create_pipeline_layout(&layout_info, None) }
            .map_err(|e| GraphicsError::from_vk(e, GraphicsError::PipelineCreationFailed))?;

        let vertex_module = create_shader_module(device, &vertex_spv)?;
        let fragment_module = match create_shader_module(device, &fragment_spv) {
            Ok(module) => module,
            Err(e) => {
                unsafe { device.destroy_shader_module(vertex_module, None) };
                return Err(e);
            }
        };

        let result = pipeline.create_pipeline(vertex_module, fragment_module);

        unsafe {
            device.destroy_shader_module(vertex_module, None);
            device.destroy_shader_module(fragment_module, None);
        }

        pipeline.pipeline = result?;
        log::debug!("Canvas pipeline created for {:?}", color_format);
        Ok(pipeline)
    }

    fn create_pipeline(
        &self,
        vertex_module: vk::ShaderModule,
        fragment_module: vk::ShaderModule,
    ) -> GraphicsResult<vk::Pipeline> {
        let shader_stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vertex_module)
                .name(VERTEX_ENTRY),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(fragment_module)
                .name(FRAGMENT_ENTRY),
        ];

        let binding_descriptions = [vk::VertexInputBindingDescription::default()
            .binding(0)
            .stride(LayerVertex::STRIDE)
            .input_rate(vk::VertexInputRate::VERTEX)];
        let attribute_descriptions = [
            vk::VertexInputAttributeDescription::default()
                .location(0)
                .binding(0)
                .format(vk::Format::R32G32_SFLOAT)
                .offset(std::mem::offset_of!(LayerVertex, position) as u32),
            vk::VertexInputAttributeDescription::default()
                .location(1)
                .binding(0)
                .format(vk::Format::R32G32_SFLOAT)
                .offset(std::mem::offset_of!(LayerVertex, uv) as u32),
        ];
        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&binding_descriptions)
            .vertex_attribute_descriptions(&attribute_descriptions);

        // Topology is dynamic; only the class must match.
        let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .depth_bias_enable(false);

        let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(false)
            .depth_write_enable(false)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let color_blend_attachments = [alpha_blend_attachment()];
        let color_blend_state = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&DYNAMIC_STATES);

        let color_formats = [self.color_format];
        let mut rendering_info =
            vk::PipelineRenderingCreateInfo::default().color_attachment_formats(&color_formats);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&input_assembly_state)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization_state)
            .multisample_state(&multisample_state)
            .depth_stencil_state(&depth_stencil_state)
            .color_blend_state(&color_blend_state)
            .dynamic_state(&dynamic_state)
            .layout(self.layout)
            .push_next(&mut rendering_info);

        let pipelines = unsafe {
            self.context.device().create_graphics_pipelines(
                vk::PipelineCache::null(),
                &[pipeline_info],
                None,
            )
        }
        .map_err(|(_, e)| GraphicsError::from_vk(e, GraphicsError::PipelineCreationFailed))?;

        pipelines.into_iter().next().ok_or_else(|| {
            GraphicsError::PipelineCreationFailed("Driver returned no pipeline".to_string())
        })
    }

    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    pub fn color_format(&self) -> vk::Format {
        self.color_format
    }
}

impl Drop for CanvasPipeline {
    fn drop(&mut self) {
        let device = self.context.device();
        unsafe {
            if self.pipeline != vk::Pipeline::null() {
                device.destroy_pipeline(self.pipeline, None);
            }
            if self.layout != vk::PipelineLayout::null() {
                device.destroy_pipeline_layout(self.layout, None);
            }
            device.destroy_descriptor_set_layout(self.set_layout, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_layout() {
        assert_eq!(std::mem::size_of::<CanvasUniforms>(), 32);
        assert_eq!(std::mem::offset_of!(CanvasUniforms, offset), 8);
        assert_eq!(std::mem::offset_of!(CanvasUniforms, scale), 16);
    }

    #[test]
    fn test_canvas_shader_compiles() {
        let vertex = compile_wgsl(CANVAS_SHADER, naga::ShaderStage::Vertex, "vs_main").unwrap();
        let fragment =
            compile_wgsl(CANVAS_SHADER, naga::ShaderStage::Fragment, "fs_main").unwrap();

        // SPIR-V magic number.
        assert_eq!(vertex[0], 0x0723_0203);
        assert_eq!(fragment[0], 0x0723_0203);
    }

    #[test]
    fn test_missing_entry_point_is_reported() {
        let err = compile_wgsl(CANVAS_SHADER, naga::ShaderStage::Vertex, "fs_main").unwrap_err();
        assert!(matches!(err, GraphicsError::ShaderCompilationFailed(_)));
    }

    #[test]
    fn test_invalid_source_is_reported() {
        let err = compile_wgsl("fn broken(", naga::ShaderStage::Vertex, "vs_main").unwrap_err();
        assert!(matches!(err, GraphicsError::ShaderCompilationFailed(_)));
    }

    #[test]
    fn test_bindings_match_shader() {
        let bindings = descriptor_bindings();
        assert_eq!(bindings[0].descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(bindings[1].descriptor_type, vk::DescriptorType::SAMPLED_IMAGE);
        assert_eq!(bindings[2].descriptor_type, vk::DescriptorType::SAMPLER);
        assert!(CANVAS_SHADER.contains("@binding(1) var layer_texture"));
    }

    #[test]
    fn test_blend_state() {
        let blend = alpha_blend_attachment();
        assert_eq!(blend.blend_enable, vk::TRUE);
        assert_eq!(blend.src_color_blend_factor, vk::BlendFactor::SRC_ALPHA);
        assert_eq!(blend.dst_color_blend_factor, vk::BlendFactor::ONE_MINUS_SRC_ALPHA);
        assert_eq!(blend.src_alpha_blend_factor, vk::BlendFactor::ONE);
        assert_eq!(blend.dst_alpha_blend_factor, vk::BlendFactor::ZERO);
        assert!(DYNAMIC_STATES.contains(&vk::DynamicState::CULL_MODE));
    }
}
