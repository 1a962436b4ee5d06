//! Canvas-to-viewport placement.

use glam::Vec2;

/// Viewport rectangle in output pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn size(&self) -> Vec2 {
        Vec2::new(self.width as f32, self.height as f32)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl Default for Region {
    fn default() -> Self {
        Self::new(0, 0, 800, 600)
    }
}

/// Uniform scale and offset placing the canvas inside a region.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CanvasTransform {
    pub scale: f32,
    pub offset: Vec2,
}

impl Default for CanvasTransform {
    fn default() -> Self {
        Self {
            scale: 1.0,
            offset: Vec2::ZERO,
        }
    }
}

impl CanvasTransform {
    /// Fit a `canvas_width` x `canvas_height` canvas entirely inside
    /// `region`, letterboxed and centered. The offset is relative to the
    /// region origin.
    ///
    /// Degenerate inputs yield the identity transform.
    pub fn fit(canvas_width: u32, canvas_height: u32, region: Region) -> Self {
        if canvas_width == 0 || canvas_height == 0 || region.is_empty() {
            return Self::default();
        }

        let canvas = Vec2::new(canvas_width as f32, canvas_height as f32);
        let region_size = region.size();
        let fit = region_size / canvas;
        let scale = fit.x.min(fit.y);
        let offset = (region_size - canvas * scale) / 2.0;

        Self { scale, offset }
    }

    /// Map a canvas-space point to region-relative pixels.
    pub fn apply(&self, point: Vec2) -> Vec2 {
        point * self.scale + self.offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const EPS: f32 = 1e-4;

    #[rstest]
    #[case(800, 600, 800, 600)]
    #[case(800, 600, 1024, 768)]
    #[case(100, 400, 800, 600)]
    #[case(1920, 1080, 640, 480)]
    #[case(3, 7, 11, 13)]
    #[case(4000, 100, 300, 900)]
    fn test_fit_is_min_ratio_and_centered(
        #[case] cw: u32,
        #[case] ch: u32,
        #[case] rw: u32,
        #[case] rh: u32,
    ) {
        let t = CanvasTransform::fit(cw, ch, Region::new(0, 0, rw, rh));

        let expected_scale = (rw as f32 / cw as f32).min(rh as f32 / ch as f32);
        assert!((t.scale - expected_scale).abs() < EPS);
        assert!((t.offset.x - (rw as f32 - cw as f32 * t.scale) / 2.0).abs() < EPS);
        assert!((t.offset.y - (rh as f32 - ch as f32 * t.scale) / 2.0).abs() < EPS);

        // Never cropped.
        let far = t.apply(Vec2::new(cw as f32, ch as f32));
        assert!(far.x <= rw as f32 + EPS && far.y <= rh as f32 + EPS);
        assert!(t.offset.x >= -EPS && t.offset.y >= -EPS);
    }

    #[test]
    fn test_same_size_is_identity() {
        let t = CanvasTransform::fit(800, 600, Region::default());
        assert_eq!(t.scale, 1.0);
        assert_eq!(t.offset, Vec2::ZERO);
    }

    #[test]
    fn test_letterbox_horizontal() {
        let t = CanvasTransform::fit(100, 100, Region::new(0, 0, 400, 200));
        assert_eq!(t.scale, 2.0);
        assert_eq!(t.offset, Vec2::new(100.0, 0.0));
    }

    #[test]
    fn test_region_origin_does_not_change_fit() {
        let a = CanvasTransform::fit(640, 480, Region::new(0, 0, 1000, 500));
        let b = CanvasTransform::fit(640, 480, Region::new(120, 40, 1000, 500));
        assert_eq!(a, b);
    }

    #[test]
    fn test_degenerate_inputs() {
        assert_eq!(
            CanvasTransform::fit(0, 600, Region::default()),
            CanvasTransform::default()
        );
        assert_eq!(
            CanvasTransform::fit(800, 600, Region::new(0, 0, 0, 10)),
            CanvasTransform::default()
        );
    }
}
