//! GPU resources for one compositable canvas layer.

use std::any::Any;
use std::borrow::Cow;
use std::mem::ManuallyDrop;
use std::sync::Arc;

use ash::vk;
use bytemuck::{Pod, Zeroable};
use gpu_allocator::MemoryLocation;

use super::GpuResource;
use crate::device::{DeviceContext, GpuBuffer, GpuImage, ImageLayout};
use crate::error::{GraphicsError, GraphicsResult};

/// Canvas-space position and texture coordinate.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct LayerVertex {
    pub position: [f32; 2],
    pub uv: [f32; 2],
}

impl LayerVertex {
    pub const STRIDE: u32 = std::mem::size_of::<Self>() as u32;

    pub fn new(position: [f32; 2], uv: [f32; 2]) -> Self {
        Self { position, uv }
    }

    /// Axis-aligned quad of `width` x `height` canvas units at (`x`, `y`),
    /// with matching indices.
    pub fn quad(x: f32, y: f32, width: f32, height: f32) -> ([Self; 4], [u32; 6]) {
        (
            [
                Self::new([x, y], [0.0, 0.0]),
                Self::new([x + width, y], [1.0, 0.0]),
                Self::new([x + width, y + height], [1.0, 1.0]),
                Self::new([x, y + height], [0.0, 1.0]),
            ],
            [0, 1, 2, 2, 3, 0],
        )
    }
}

/// CPU-side pixels for a layer texture.
///
/// `pixels` holds `channels` bytes per texel as supplied (gray, gray+alpha,
/// RGB or RGBA). Layers are always sampled as four-channel textures, so the
/// data is widened to RGBA at upload.
#[derive(Debug, Clone)]
pub struct LayerImage {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    pub format: vk::Format,
}

impl LayerImage {
    /// Wrap tightly packed 8-bit pixels with 1 to 4 channels.
    pub fn new(pixels: Vec<u8>, width: u32, height: u32, channels: u32) -> Self {
        Self {
            pixels,
            width,
            height,
            channels,
            format: vk::Format::R8G8B8A8_UNORM,
        }
    }

    pub fn rgba8(pixels: Vec<u8>, width: u32, height: u32) -> Self {
        Self::new(pixels, width, height, 4)
    }

    /// Single-color image.
    pub fn solid(color: [u8; 4], width: u32, height: u32) -> Self {
        let texels = width as usize * height as usize;
        Self::rgba8(color.repeat(texels), width, height)
    }

    /// Upload as another four-channel format, such as sRGB or BGRA.
    pub fn with_format(mut self, format: vk::Format) -> Self {
        self.format = format;
        self
    }

    /// Size of the supplied pixel data.
    pub fn byte_len(&self) -> u64 {
        self.width as u64 * self.height as u64 * self.channels as u64
    }

    /// Size of the texture data after widening to four channels.
    pub fn upload_len(&self) -> u64 {
        self.width as u64 * self.height as u64 * 4
    }

    /// Check that the pixel data matches the declared size and format.
    pub fn validate(&self) -> GraphicsResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(GraphicsError::InvalidLayerData(format!(
                "image has zero extent {}x{}",
                self.width, self.height
            )));
        }
        if !(1..=4).contains(&self.channels) {
            return Err(GraphicsError::InvalidLayerData(format!(
                "unsupported channel count {}",
                self.channels
            )));
        }
        if self.pixels.len() as u64 != self.byte_len() {
            return Err(GraphicsError::InvalidLayerData(format!(
                "expected {} bytes for {}x{}x{}, got {}",
                self.byte_len(),
                self.width,
                self.height,
                self.channels,
                self.pixels.len()
            )));
        }
        if !is_layer_format(self.format) {
            return Err(GraphicsError::InvalidLayerData(format!(
                "unsupported layer format {:?}",
                self.format
            )));
        }
        Ok(())
    }

    /// Pixels as RGBA8. Gray expands to `g,g,g,255`, gray+alpha to
    /// `g,g,g,a` and RGB to `r,g,b,255`.
    ///
    /// Only meaningful for an image that passed [`Self::validate`].
    pub fn rgba_pixels(&self) -> Cow<'_, [u8]> {
        let texels = self.pixels.chunks_exact(self.channels.max(1) as usize);
        match self.channels {
            1 => Cow::Owned(texels.flat_map(|t| [t[0], t[0], t[0], u8::MAX]).collect()),
            2 => Cow::Owned(texels.flat_map(|t| [t[0], t[0], t[0], t[1]]).collect()),
            3 => Cow::Owned(texels.flat_map(|t| [t[0], t[1], t[2], u8::MAX]).collect()),
            _ => Cow::Borrowed(&self.pixels[..]),
        }
    }
}

/// Four-channel 8-bit formats a layer texture may use.
pub fn is_layer_format(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::R8G8B8A8_UNORM
            | vk::Format::R8G8B8A8_SRGB
            | vk::Format::B8G8R8A8_UNORM
            | vk::Format::B8G8R8A8_SRGB
    )
}

fn validate_geometry(vertices: &[LayerVertex], indices: &[u32]) -> GraphicsResult<()> {
    if vertices.is_empty() || indices.is_empty() {
        return Err(GraphicsError::InvalidLayerData(
            "layer geometry is empty".to_string(),
        ));
    }
    if let Some(bad) = indices.iter().find(|&&i| i as usize >= vertices.len()) {
        return Err(GraphicsError::InvalidLayerData(format!(
            "index {} out of range for {} vertices",
            bad,
            vertices.len()
        )));
    }
    Ok(())
}

/// A layer texture with its geometry, uploaded once and immutable after.
///
/// Replacing a layer's content means creating a new resource and releasing
/// the old handle.
pub struct LayerGpuResource {
    context: Arc<DeviceContext>,
    view: vk::ImageView,
    image: ManuallyDrop<GpuImage>,
    vertex_buffer: ManuallyDrop<GpuBuffer>,
    index_buffer: ManuallyDrop<GpuBuffer>,
    index_count: u32,
}

impl LayerGpuResource {
    /// Upload `image` and its geometry.
    ///
    /// Blocks until the texture copy has finished on the GPU. On failure
    /// everything created so far is released and the error is returned.
    pub fn create_from_image(
        context: &Arc<DeviceContext>,
        image: &LayerImage,
        vertices: &[LayerVertex],
        indices: &[u32],
    ) -> GraphicsResult<Self> {
        image.validate()?;
        validate_geometry(vertices, indices)?;

        let pixels = image.rgba_pixels();
        let mut staging = context.create_buffer(
            "layer staging",
            image.upload_len(),
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
        )?;
        staging.write(0, &pixels)?;

        let extent = vk::Extent2D {
            width: image.width,
            height: image.height,
        };
        let texture = context.create_image(
            "layer texture",
            extent,
            image.format,
            vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
        )?;

        context.immediate_submit(|cmd| {
            context.transition_image_layout(
                cmd,
                texture.handle(),
                ImageLayout::Undefined,
                ImageLayout::TransferDst,
            );

            let region = vk::BufferImageCopy::default()
                .buffer_offset(0)
                .buffer_row_length(0)
                .buffer_image_height(0)
                .image_subresource(vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: 0,
                    base_array_layer: 0,
                    layer_count: 1,
                })
                .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
                .image_extent(vk::Extent3D {
                    width: image.width,
                    height: image.height,
                    depth: 1,
                });

            unsafe {
                context.device().cmd_copy_buffer_to_image(
                    cmd,
                    staging.handle(),
                    texture.handle(),
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[region],
                );
            }

            context.transition_image_layout(
                cmd,
                texture.handle(),
                ImageLayout::TransferDst,
                ImageLayout::ShaderReadOnly,
            );
        })?;

        let vertex_buffer = context.create_buffer_init(
            "layer vertices",
            vk::BufferUsageFlags::VERTEX_BUFFER,
            bytemuck::cast_slice(vertices),
        )?;
        let index_buffer = context.create_buffer_init(
            "layer indices",
            vk::BufferUsageFlags::INDEX_BUFFER,
            bytemuck::cast_slice(indices),
        )?;

        drop(staging);

        let view = texture.create_view()?;

        log::debug!(
            "Uploaded layer {}x{} {:?}, {} vertices, {} indices",
            image.width,
            image.height,
            image.format,
            vertices.len(),
            indices.len()
        );

        Ok(Self {
            context: Arc::clone(context),
            view,
            image: ManuallyDrop::new(texture),
            vertex_buffer: ManuallyDrop::new(vertex_buffer),
            index_buffer: ManuallyDrop::new(index_buffer),
            index_count: indices.len() as u32,
        })
    }

    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.image.extent()
    }

    pub fn vertex_buffer(&self) -> vk::Buffer {
        self.vertex_buffer.handle()
    }

    pub fn index_buffer(&self) -> vk::Buffer {
        self.index_buffer.handle()
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }
}

impl GpuResource for LayerGpuResource {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn kind(&self) -> &'static str {
        "layer"
    }
}

impl Drop for LayerGpuResource {
    fn drop(&mut self) {
        // View before image, then both buffers.
        unsafe {
            self.context.device().destroy_image_view(self.view, None);
            ManuallyDrop::drop(&mut self.image);
            ManuallyDrop::drop(&mut self.vertex_buffer);
            ManuallyDrop::drop(&mut self.index_buffer);
        }
    }
}
