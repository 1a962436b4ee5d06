//! Allocator-backed buffers and images.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;

use super::barrier::color_subresource_range;
use super::DeviceContext;
use crate::error::{GraphicsError, GraphicsResult};

/// A buffer and the memory bound to it. Destroyed on drop.
pub struct GpuBuffer {
    context: Arc<DeviceContext>,
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    size: vk::DeviceSize,
}

impl GpuBuffer {
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Copy `data` into the mapped memory at `offset`.
    pub fn write(&mut self, offset: usize, data: &[u8]) -> GraphicsResult<()> {
        let size = self.size;
        let mapped = self
            .allocation
            .as_mut()
            .and_then(|allocation| allocation.mapped_slice_mut())
            .ok_or_else(|| {
                GraphicsError::BufferCreationFailed("Buffer memory is not host-visible".into())
            })?;

        let end = offset
            .checked_add(data.len())
            .filter(|end| *end as vk::DeviceSize <= size && *end <= mapped.len())
            .ok_or_else(|| {
                GraphicsError::BufferCreationFailed(format!(
                    "Write of {} bytes at offset {} exceeds buffer size {}",
                    data.len(),
                    offset,
                    size
                ))
            })?;

        mapped[offset..end].copy_from_slice(data);
        Ok(())
    }

    /// Read back mapped memory.
    pub fn read(&self) -> Option<&[u8]> {
        self.allocation
            .as_ref()
            .and_then(|allocation| allocation.mapped_slice())
            .map(|mapped| &mapped[..self.size as usize])
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        unsafe { self.context.device().destroy_buffer(self.buffer, None) };
        if let Some(allocation) = self.allocation.take() {
            if let Err(e) = self.context.allocator().lock().free(allocation) {
                log::warn!("Failed to free buffer memory: {}", e);
            }
        }
    }
}

/// A device-local 2D image and its memory. Destroyed on drop; views created
/// from it must be destroyed first.
pub struct GpuImage {
    context: Arc<DeviceContext>,
    image: vk::Image,
    allocation: Option<Allocation>,
    format: vk::Format,
    extent: vk::Extent2D,
}

impl GpuImage {
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Create a 2D color view over the whole image. The caller owns the view.
    pub fn create_view(&self) -> GraphicsResult<vk::ImageView> {
        self.context.create_image_view(self.image, self.format)
    }
}

impl Drop for GpuImage {
    fn drop(&mut self) {
        unsafe { self.context.device().destroy_image(self.image, None) };
        if let Some(allocation) = self.allocation.take() {
            if let Err(e) = self.context.allocator().lock().free(allocation) {
                log::warn!("Failed to free image memory: {}", e);
            }
        }
    }
}

impl DeviceContext {
    /// Allocate a buffer of `size` bytes in the given residency class.
    ///
    /// `CpuToGpu` memory is persistently mapped and needs no staging.
    pub fn create_buffer(
        self: &Arc<Self>,
        label: &str,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> GraphicsResult<GpuBuffer> {
        if size == 0 {
            return Err(GraphicsError::BufferCreationFailed(format!(
                "Buffer {label} has zero size"
            )));
        }

        let device = self.device();
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.create_buffer(&buffer_info, None) }
            .map_err(|e| GraphicsError::from_vk(e, GraphicsError::BufferCreationFailed))?;

        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };

        let allocation = match self.allocator().lock().allocate(&AllocationCreateDesc {
            name: label,
            requirements,
            location,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        }) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(GraphicsError::BufferCreationFailed(format!("{label}: {e}")));
            }
        };

        // From here on the buffer owns the allocation and cleans up on error.
        let gpu_buffer = GpuBuffer {
            context: Arc::clone(self),
            buffer,
            allocation: Some(allocation),
            size,
        };

        let allocation = gpu_buffer
            .allocation
            .as_ref()
            .ok_or_else(|| GraphicsError::BufferCreationFailed(label.to_string()))?;
        unsafe { device.bind_buffer_memory(buffer, allocation.memory(), allocation.offset()) }
            .map_err(|e| GraphicsError::from_vk(e, GraphicsError::BufferCreationFailed))?;

        Ok(gpu_buffer)
    }

    /// Allocate a host-visible buffer and fill it with `data`.
    pub fn create_buffer_init(
        self: &Arc<Self>,
        label: &str,
        usage: vk::BufferUsageFlags,
        data: &[u8],
    ) -> GraphicsResult<GpuBuffer> {
        let mut buffer = self.create_buffer(
            label,
            data.len() as vk::DeviceSize,
            usage,
            MemoryLocation::CpuToGpu,
        )?;
        buffer.write(0, data)?;
        Ok(buffer)
    }

    /// Allocate a device-local, optimally tiled 2D image.
    pub fn create_image(
        self: &Arc<Self>,
        label: &str,
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
    ) -> GraphicsResult<GpuImage> {
        if extent.width == 0 || extent.height == 0 {
            return Err(GraphicsError::TextureCreationFailed(format!(
                "Image {label} has zero extent"
            )));
        }

        let device = self.device();
        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .samples(vk::SampleCountFlags::TYPE_1);

        let image = unsafe { device.create_image(&image_info, None) }
            .map_err(|e| GraphicsError::from_vk(e, GraphicsError::TextureCreationFailed))?;

        let requirements = unsafe { device.get_image_memory_requirements(image) };

        let allocation = match self.allocator().lock().allocate(&AllocationCreateDesc {
            name: label,
            requirements,
            location: MemoryLocation::GpuOnly,
            linear: false,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        }) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.destroy_image(image, None) };
                return Err(GraphicsError::TextureCreationFailed(format!("{label}: {e}")));
            }
        };

        let gpu_image = GpuImage {
            context: Arc::clone(self),
            image,
            allocation: Some(allocation),
            format,
            extent,
        };

        let allocation = gpu_image
            .allocation
            .as_ref()
            .ok_or_else(|| GraphicsError::TextureCreationFailed(label.to_string()))?;
        unsafe { device.bind_image_memory(image, allocation.memory(), allocation.offset()) }
            .map_err(|e| GraphicsError::from_vk(e, GraphicsError::TextureCreationFailed))?;

        Ok(gpu_image)
    }

    /// Create a 2D color view of `image`.
    pub fn create_image_view(
        &self,
        image: vk::Image,
        format: vk::Format,
    ) -> GraphicsResult<vk::ImageView> {
        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .components(vk::ComponentMapping::default())
            .subresource_range(color_subresource_range());

        unsafe { self.device().create_image_view(&view_info, None) }
            .map_err(|e| GraphicsError::from_vk(e, GraphicsError::TextureCreationFailed))
    }

    /// Linear filtering, repeat addressing, no LOD clamp.
    pub fn create_simple_sampler(&self) -> GraphicsResult<vk::Sampler> {
        let sampler_info = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .anisotropy_enable(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .min_lod(0.0)
            .max_lod(vk::LOD_CLAMP_NONE)
            .border_color(vk::BorderColor::FLOAT_OPAQUE_BLACK);

        unsafe { self.device().create_sampler(&sampler_info, None) }
            .map_err(|e| GraphicsError::from_vk(e, GraphicsError::TextureCreationFailed))
    }
}
