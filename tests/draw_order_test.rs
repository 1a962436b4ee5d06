//! Layer paint order, checked by reading back an offscreen target.
//!
//! Two overlapping opaque layers are composited into a 64x64 image; the
//! overlap must show whichever layer comes later in the list. A single-channel
//! layer must come back gray, not red.
//!
//! ```bash
//! cargo test --test draw_order_test
//! ```

mod common;

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use rstest::rstest;
use winit::window::Window;

use canvas_gpu::device::ImageLayout;
use canvas_gpu::{
    CanvasCompositor, DeviceContext, GraphicsDevice, LayerGpuResource, LayerImage, LayerVertex,
    RenderTarget, ResourceHandle, ResourceManager,
};
use common::{assert_passed, run_scenario, Scenario};

const SIZE: u32 = 64;
const FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

const RED: [u8; 4] = [255, 0, 0, 255];
const GREEN: [u8; 4] = [0, 255, 0, 255];

fn upload(
    context: &Arc<DeviceContext>,
    resources: &mut ResourceManager,
    image: &LayerImage,
    x: f32,
    y: f32,
) -> Result<ResourceHandle, String> {
    let (vertices, indices) = LayerVertex::quad(x, y, 48.0, 48.0);
    let layer = LayerGpuResource::create_from_image(context, image, &vertices, &indices)
        .map_err(|e| e.to_string())?;
    resources.add(layer).map_err(|e| e.to_string())
}

/// Composite into `target` and copy the result back as tightly packed RGBA.
fn render_and_read(
    context: &Arc<DeviceContext>,
    compositor: &mut CanvasCompositor,
    resources: &ResourceManager,
    target: &RenderTarget,
) -> Result<Vec<u8>, String> {
    let readback = context
        .create_buffer(
            "readback",
            u64::from(SIZE * SIZE * 4),
            vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuToCpu,
        )
        .map_err(|e| e.to_string())?;

    let cmd = context.begin_one_shot().map_err(|e| e.to_string())?;
    context.transition_image_layout(
        cmd,
        target.image,
        ImageLayout::Undefined,
        ImageLayout::ColorAttachment,
    );
    let stats = compositor
        .record_draw_commands(cmd, target, resources)
        .map_err(|e| e.to_string())?;
    context.transition_image_layout(
        cmd,
        target.image,
        ImageLayout::ColorAttachment,
        ImageLayout::TransferSrc,
    );

    let region = vk::BufferImageCopy::default()
        .image_subresource(vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        })
        .image_extent(vk::Extent3D {
            width: SIZE,
            height: SIZE,
            depth: 1,
        });
    unsafe {
        context.device().cmd_copy_image_to_buffer(
            cmd,
            target.image,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            readback.handle(),
            &[region],
        );
    }
    context.submit_one_shot(cmd).map_err(|e| e.to_string())?;

    if stats.index_counts.iter().any(|&count| count != 6) {
        return Err(format!("expected only quads, got {:?}", stats));
    }

    readback
        .read()
        .map(<[u8]>::to_vec)
        .ok_or_else(|| "readback buffer is not mapped".to_string())
}

fn pixel(pixels: &[u8], x: u32, y: u32) -> [u8; 4] {
    let i = ((y * SIZE + x) * 4) as usize;
    [pixels[i], pixels[i + 1], pixels[i + 2], pixels[i + 3]]
}

fn expect_pixel(pixels: &[u8], x: u32, y: u32, expected: [u8; 4]) -> Result<(), String> {
    let actual = pixel(pixels, x, y);
    let close = actual
        .iter()
        .zip(expected)
        .all(|(&a, e)| a.abs_diff(e) <= 2);
    if close {
        Ok(())
    } else {
        Err(format!("pixel ({x}, {y}): expected {expected:?}, got {actual:?}"))
    }
}

struct DrawOrderScenario {
    resources: ResourceManager,
}

impl DrawOrderScenario {
    fn run(&mut self, device: &GraphicsDevice) -> Result<(), String> {
        let context = device.context();

        let image = context
            .create_image(
                "draw order target",
                vk::Extent2D {
                    width: SIZE,
                    height: SIZE,
                },
                FORMAT,
                vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC,
            )
            .map_err(|e| e.to_string())?;
        let view = image.create_view().map_err(|e| e.to_string())?;
        let target = RenderTarget {
            image: image.handle(),
            view,
            format: FORMAT,
            extent: image.extent(),
        };

        let result = self.check_order(context, &target);

        unsafe { context.device().destroy_image_view(view, None) };
        result
    }

    fn check_order(
        &mut self,
        context: &Arc<DeviceContext>,
        target: &RenderTarget,
    ) -> Result<(), String> {
        let mut compositor = CanvasCompositor::new(context, FORMAT).map_err(|e| e.to_string())?;
        compositor.set_canvas_size(SIZE, SIZE);
        compositor.set_region(0, 0, SIZE, SIZE);

        let red = upload(context, &mut self.resources, &LayerImage::solid(RED, 4, 4), 0.0, 0.0)?;
        let green = upload(
            context,
            &mut self.resources,
            &LayerImage::solid(GREEN, 4, 4),
            16.0,
            16.0,
        )?;

        compositor.add_layer(red);
        compositor.add_layer(green);
        let pixels = render_and_read(context, &mut compositor, &self.resources, target)?;
        expect_pixel(&pixels, 32, 32, GREEN)?;
        expect_pixel(&pixels, 8, 8, RED)?;
        expect_pixel(&pixels, 56, 56, GREEN)?;
        // Uncovered corner keeps the clear color.
        expect_pixel(&pixels, 60, 4, [204, 204, 204, 255])?;

        compositor.clear_layers();
        compositor.add_layer(green);
        compositor.add_layer(red);
        let pixels = render_and_read(context, &mut compositor, &self.resources, target)?;
        expect_pixel(&pixels, 32, 32, RED)?;
        expect_pixel(&pixels, 56, 56, GREEN)?;

        let gray_image = LayerImage::new(vec![128; 16], 4, 4, 1);
        let gray = upload(context, &mut self.resources, &gray_image, 0.0, 0.0)?;
        compositor.clear_layers();
        compositor.add_layer(gray);
        let pixels = render_and_read(context, &mut compositor, &self.resources, target)?;
        expect_pixel(&pixels, 8, 8, [128, 128, 128, 255])?;

        Ok(())
    }
}

impl Scenario for DrawOrderScenario {
    fn step(&mut self, _window: &Window, device: &mut GraphicsDevice) -> Result<bool, String> {
        self.run(device)?;
        Ok(true)
    }
}

#[rstest]
fn test_later_layers_draw_on_top() {
    let scenario = DrawOrderScenario {
        resources: ResourceManager::new(),
    };
    assert_passed(run_scenario(SIZE, SIZE, scenario));
}
