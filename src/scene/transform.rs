//! Root transform history

use glam::{Mat4, Quat, Vec3};

/// Transform for positioning a source in 3D space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    pub fn from_position_rotation(position: Vec3, rotation: Quat) -> Self {
        Self {
            position,
            rotation,
            ..Default::default()
        }
    }

    /// Local-to-world matrix
    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }

    /// Translate by an offset
    pub fn translate(&mut self, offset: Vec3) {
        self.position += offset;
    }

    /// Rotate around an axis
    pub fn rotate_axis(&mut self, axis: Vec3, angle: f32) {
        let delta = Quat::from_axis_angle(axis, angle);
        self.rotation = delta * self.rotation;
    }
}

/// World transform of the primary source's root, this frame and last frame.
///
/// `previous` always holds what `current` was one frame earlier. It only moves
/// forward in [`RootTransform::commit`], after the transfer has consumed both.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RootTransform {
    pub current: Mat4,
    pub previous: Mat4,
}

impl RootTransform {
    /// Both matrices start equal so the first frame carries no root motion.
    pub fn new(initial: Mat4) -> Self {
        Self {
            current: initial,
            previous: initial,
        }
    }

    pub fn set_current(&mut self, matrix: Mat4) {
        self.current = matrix;
    }

    pub fn commit(&mut self) {
        self.previous = self.current;
    }
}

impl Default for RootTransform {
    fn default() -> Self {
        Self::new(Mat4::IDENTITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_lags_one_frame() {
        let a = Mat4::from_translation(Vec3::X);
        let b = Mat4::from_translation(Vec3::Y);
        let mut root = RootTransform::new(a);
        assert_eq!(root.previous, root.current);

        root.set_current(b);
        assert_eq!(root.previous, a);
        root.commit();
        assert_eq!(root.previous, b);
        assert_eq!(root.current, b);
    }

    #[test]
    fn test_transform_matrix() {
        let mut t = Transform::from_position(Vec3::new(1.0, 2.0, 3.0));
        t.translate(Vec3::X);
        assert_eq!(t.matrix().transform_point3(Vec3::ZERO), Vec3::new(2.0, 2.0, 3.0));

        t.rotate_axis(Vec3::Y, std::f32::consts::FRAC_PI_2);
        let p = t.matrix().transform_point3(Vec3::X);
        assert!((p - Vec3::new(2.0, 2.0, 2.0)).length() < 1e-5);
    }
}
