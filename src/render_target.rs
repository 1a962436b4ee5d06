//! Color targets recorded into by the compositor and overlays.

use ash::vk;

/// A color image and view to render into for one frame.
///
/// Swapchain targets are only valid for the swapchain generation they were
/// taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderTarget {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

impl RenderTarget {
    /// Full-target render area.
    pub fn render_area(&self) -> vk::Rect2D {
        vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: self.extent,
        }
    }

    /// Attachment that clears to `color` and stores the result.
    pub fn clear_attachment(&self, color: [f32; 4]) -> vk::RenderingAttachmentInfo<'static> {
        vk::RenderingAttachmentInfo::default()
            .image_view(self.view)
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                color: vk::ClearColorValue { float32: color },
            })
    }

    /// Attachment that keeps existing contents, for drawing on top.
    pub fn overlay_attachment(&self) -> vk::RenderingAttachmentInfo<'static> {
        vk::RenderingAttachmentInfo::default()
            .image_view(self.view)
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::LOAD)
            .store_op(vk::AttachmentStoreOp::STORE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> RenderTarget {
        RenderTarget {
            image: vk::Image::null(),
            view: vk::ImageView::null(),
            format: vk::Format::B8G8R8A8_SRGB,
            extent: vk::Extent2D {
                width: 800,
                height: 600,
            },
        }
    }

    #[test]
    fn test_render_area_covers_target() {
        let area = target().render_area();
        assert_eq!((area.offset.x, area.offset.y), (0, 0));
        assert_eq!((area.extent.width, area.extent.height), (800, 600));
    }

    #[test]
    fn test_overlay_attachment_loads_contents() {
        let target = target();
        assert_eq!(target.overlay_attachment().load_op, vk::AttachmentLoadOp::LOAD);
        assert_eq!(
            target.clear_attachment([0.0; 4]).load_op,
            vk::AttachmentLoadOp::CLEAR
        );
    }
}
