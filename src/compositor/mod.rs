//! Canvas compositing.
//!
//! [`CanvasCompositor`] keeps the ordered layer list and records one indexed
//! draw per layer into a color target. Paint order is list order: later
//! layers draw on top.

mod pipeline;
mod transform;

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;

pub use pipeline::{compile_wgsl, CanvasPipeline, CanvasUniforms, CANVAS_SHADER};
pub use transform::{CanvasTransform, Region};

use crate::device::{DeviceContext, GpuBuffer};
use crate::error::GraphicsResult;
use crate::render_target::RenderTarget;
use crate::resources::{LayerGpuResource, ResourceHandle, ResourceManager};

pub const CLEAR_COLOR: [f32; 4] = [0.8, 0.8, 0.8, 1.0];

pub const DEFAULT_CANVAS_SIZE: (u32, u32) = (800, 600);

/// What a recording pass drew.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrawStats {
    /// Index count of each draw, in submission order.
    pub index_counts: Vec<u32>,
}

impl DrawStats {
    pub fn draw_count(&self) -> usize {
        self.index_counts.len()
    }
}

/// Intersection of `region` with the target, as a scissor rectangle.
///
/// `None` when nothing of the region is visible.
pub fn region_scissor(region: Region, extent: vk::Extent2D) -> Option<vk::Rect2D> {
    let x0 = i64::from(region.x).max(0);
    let y0 = i64::from(region.y).max(0);
    let x1 = (i64::from(region.x) + i64::from(region.width)).min(i64::from(extent.width));
    let y1 = (i64::from(region.y) + i64::from(region.height)).min(i64::from(extent.height));

    if x1 <= x0 || y1 <= y0 {
        return None;
    }

    Some(vk::Rect2D {
        offset: vk::Offset2D {
            x: x0 as i32,
            y: y0 as i32,
        },
        extent: vk::Extent2D {
            width: (x1 - x0) as u32,
            height: (y1 - y0) as u32,
        },
    })
}

/// Records the canvas layers into a color target.
pub struct CanvasCompositor {
    context: Arc<DeviceContext>,
    pipeline: CanvasPipeline,
    sampler: vk::Sampler,
    uniforms: GpuBuffer,
    layers: Vec<ResourceHandle>,
    canvas_width: u32,
    canvas_height: u32,
    region: Region,
    transform: CanvasTransform,
}

impl CanvasCompositor {
    /// Create the shared pipeline for targets of `color_format`.
    pub fn new(context: &Arc<DeviceContext>, color_format: vk::Format) -> GraphicsResult<Self> {
        let pipeline = CanvasPipeline::new(context, color_format)?;
        let uniforms = context.create_buffer(
            "canvas uniforms",
            std::mem::size_of::<CanvasUniforms>() as vk::DeviceSize,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            MemoryLocation::CpuToGpu,
        )?;
        let sampler = context.create_simple_sampler()?;

        let (canvas_width, canvas_height) = DEFAULT_CANVAS_SIZE;
        let region = Region::default();

        Ok(Self {
            context: Arc::clone(context),
            pipeline,
            sampler,
            uniforms,
            layers: Vec::new(),
            canvas_width,
            canvas_height,
            region,
            transform: CanvasTransform::fit(canvas_width, canvas_height, region),
        })
    }

    /// Append a layer on top of the existing ones.
    pub fn add_layer(&mut self, handle: ResourceHandle) {
        self.layers.push(handle);
    }

    /// Remove a layer from the paint list. Returns `false` if it was absent.
    pub fn remove_layer(&mut self, handle: ResourceHandle) -> bool {
        let before = self.layers.len();
        self.layers.retain(|&h| h != handle);
        self.layers.len() != before
    }

    pub fn clear_layers(&mut self) {
        self.layers.clear();
    }

    pub fn layers(&self) -> &[ResourceHandle] {
        &self.layers
    }

    pub fn set_canvas_size(&mut self, width: u32, height: u32) {
        self.canvas_width = width;
        self.canvas_height = height;
        self.auto_fit_canvas();
    }

    pub fn canvas_size(&self) -> (u32, u32) {
        (self.canvas_width, self.canvas_height)
    }

    /// Set the output viewport in target pixels.
    pub fn set_region(&mut self, x: i32, y: i32, width: u32, height: u32) {
        self.region = Region::new(x, y, width, height);
        self.auto_fit_canvas();
    }

    pub fn region(&self) -> Region {
        self.region
    }

    /// Center the canvas in the region at the largest scale that shows all
    /// of it.
    pub fn auto_fit_canvas(&mut self) {
        self.transform = CanvasTransform::fit(self.canvas_width, self.canvas_height, self.region);
        log::debug!(
            "Canvas {}x{} in region {:?}: scale {}, offset {}",
            self.canvas_width,
            self.canvas_height,
            self.region,
            self.transform.scale,
            self.transform.offset
        );
    }

    pub fn transform(&self) -> CanvasTransform {
        self.transform
    }

    pub fn uniforms(&self) -> CanvasUniforms {
        CanvasUniforms {
            screen_size: self.region.size().to_array(),
            offset: self.transform.offset.to_array(),
            scale: self.transform.scale,
            _pad: [0.0; 3],
        }
    }

    /// Record all layers into `target`, clearing it first.
    ///
    /// `cmd` must be recording and `target` must be in color-attachment
    /// layout. Handles that no longer resolve to a layer are skipped.
    pub fn record_draw_commands(
        &mut self,
        cmd: vk::CommandBuffer,
        target: &RenderTarget,
        resources: &ResourceManager,
    ) -> GraphicsResult<DrawStats> {
        if target.format != self.pipeline.color_format() {
            log::info!(
                "Target format changed from {:?} to {:?}, rebuilding canvas pipeline",
                self.pipeline.color_format(),
                target.format
            );
            self.pipeline = CanvasPipeline::new(&self.context, target.format)?;
        }

        let uniforms = self.uniforms();
        self.uniforms.write(0, bytemuck::bytes_of(&uniforms))?;

        let device = self.context.device();
        let mut stats = DrawStats::default();

        let color_attachments = [target.clear_attachment(CLEAR_COLOR)];
        let rendering_info = vk::RenderingInfo::default()
            .render_area(target.render_area())
            .layer_count(1)
            .color_attachments(&color_attachments);

        unsafe { device.cmd_begin_rendering(cmd, &rendering_info) };

        let scissor = region_scissor(self.region, target.extent);
        if let Some(scissor) = scissor {
            let viewport = vk::Viewport {
                x: self.region.x as f32,
                y: self.region.y as f32,
                width: self.region.width as f32,
                height: self.region.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            };

            unsafe {
                device.cmd_bind_pipeline(
                    cmd,
                    vk::PipelineBindPoint::GRAPHICS,
                    self.pipeline.handle(),
                );
                device.cmd_set_viewport(cmd, 0, &[viewport]);
                device.cmd_set_scissor(cmd, 0, &[scissor]);
                device.cmd_set_cull_mode(cmd, vk::CullModeFlags::NONE);
                device.cmd_set_front_face(cmd, vk::FrontFace::COUNTER_CLOCKWISE);
                device.cmd_set_primitive_topology(cmd, vk::PrimitiveTopology::TRIANGLE_LIST);
                device.cmd_set_depth_test_enable(cmd, false);
                device.cmd_set_depth_write_enable(cmd, false);
            }

            for &handle in &self.layers {
                let Some(layer) = resources.get::<LayerGpuResource>(handle) else {
                    log::warn!("Skipping layer {}: handle no longer resolves", handle.id());
                    continue;
                };
                self.record_layer(cmd, layer);
                stats.index_counts.push(layer.index_count());
            }
        } else {
            log::debug!("Canvas region {:?} is outside the target", self.region);
        }

        unsafe { device.cmd_end_rendering(cmd) };

        Ok(stats)
    }

    fn record_layer(&self, cmd: vk::CommandBuffer, layer: &LayerGpuResource) {
        let buffer_info = [vk::DescriptorBufferInfo::default()
            .buffer(self.uniforms.handle())
            .offset(0)
            .range(self.uniforms.size())];
        let image_info = [vk::DescriptorImageInfo::default()
            .image_view(layer.view())
            .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)];
        let sampler_info = [vk::DescriptorImageInfo::default().sampler(self.sampler)];

        let writes = [
            vk::WriteDescriptorSet::default()
                .dst_binding(pipeline::UNIFORM_BINDING)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .buffer_info(&buffer_info),
            vk::WriteDescriptorSet::default()
                .dst_binding(pipeline::TEXTURE_BINDING)
                .descriptor_type(vk::DescriptorType::SAMPLED_IMAGE)
                .image_info(&image_info),
            vk::WriteDescriptorSet::default()
                .dst_binding(pipeline::SAMPLER_BINDING)
                .descriptor_type(vk::DescriptorType::SAMPLER)
                .image_info(&sampler_info),
        ];

        let device = self.context.device();
        unsafe {
            self.context.push_descriptor().cmd_push_descriptor_set(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.pipeline.layout(),
                0,
                &writes,
            );
            device.cmd_bind_vertex_buffers(cmd, 0, &[layer.vertex_buffer()], &[0]);
            device.cmd_bind_index_buffer(cmd, layer.index_buffer(), 0, vk::IndexType::UINT32);
            device.cmd_draw_indexed(cmd, layer.index_count(), 1, 0, 0, 0);
        }
    }
}

impl Drop for CanvasCompositor {
    fn drop(&mut self) {
        unsafe { self.context.device().destroy_sampler(self.sampler, None) };
    }
}
