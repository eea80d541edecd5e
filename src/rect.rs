use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec4};

/// Axis-aligned rectangle given by two corners.
///
/// Laid out as four floats so it can be pushed to a `vec4` directly.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct Rect {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl Rect {
    pub const fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn from_corners(upper_left: Vec2, lower_right: Vec2) -> Self {
        Self::new(upper_left.x, upper_left.y, lower_right.x, lower_right.y)
    }

    pub fn from_origin_size(origin: Vec2, size: Vec2) -> Self {
        Self::from_corners(origin, origin + size)
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn upper_left(&self) -> Vec2 {
        Vec2::new(self.x1, self.y1)
    }

    pub fn lower_right(&self) -> Vec2 {
        Vec2::new(self.x2, self.y2)
    }

    pub fn to_vec4(&self) -> Vec4 {
        Vec4::new(self.x1, self.y1, self.x2, self.y2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_follow_corner_order() {
        let rect = Rect::new(1.0, 2.0, 3.0, 4.0);
        let floats: &[f32] = bytemuck::cast_slice(bytemuck::bytes_of(&rect));
        assert_eq!(floats, &[1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn origin_size() {
        let rect = Rect::from_origin_size(Vec2::new(10.0, 20.0), Vec2::new(5.0, 8.0));
        assert_eq!(rect, Rect::new(10.0, 20.0, 15.0, 28.0));
        assert_eq!(rect.width(), 5.0);
        assert_eq!(rect.height(), 8.0);
    }
}
