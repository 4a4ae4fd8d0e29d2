//! Projective transforms used to fake the 3D card rotation on a flat surface.

use euclid::default::Transform3D;
use euclid::{Angle, point2, vec3};

/// Distance of the virtual camera from the surface plane, in pixels.
pub const CAMERA_DISTANCE: f32 = 576.0;

/// Row-vector 4×4 transform; `a.then(&b)` applies `a` first.
pub type Projective = Transform3D<f32>;

/// Card rotation about `center`: rotate about Z then Y (degrees) and look
/// at it through a pinhole camera, with the pivot kept in place.
pub fn card_flip(center: (f32, f32), angle_y: f32, angle_z: f32) -> Projective {
    let (cx, cy) = center;
    Transform3D::translation(-cx, -cy, 0.0)
        .then_rotate(0.0, 0.0, 1.0, Angle::degrees(angle_z))
        .then_rotate(0.0, 1.0, 0.0, Angle::degrees(angle_y))
        .then(&Transform3D::perspective(CAMERA_DISTANCE))
        .then_translate(vec3(cx, cy, 0.0))
}

/// Maps a point of the z = 0 plane, `None` when it lands behind the camera.
pub fn map_point(transform: &Projective, x: f32, y: f32) -> Option<(f32, f32)> {
    let p = transform
        .transform_point2d_homogeneous(point2(x, y))
        .to_point2d()?;
    Some((p.x, p.y))
}

/// Inverse of the homography `transform` induces on the z = 0 plane.
///
/// Screen points carry no depth, so the z row and column are dropped before
/// inverting. Returns `None` when the plane is seen edge-on.
pub fn plane_inverse(transform: &Projective) -> Option<Projective> {
    let t = transform;
    #[rustfmt::skip]
    let flat = Transform3D::new(
        t.m11, t.m12, 0.0, t.m14,
        t.m21, t.m22, 0.0, t.m24,
        0.0, 0.0, 1.0, 0.0,
        t.m41, t.m42, 0.0, t.m44,
    );
    // scale invariant: compare with the matrix normalised to m44 = 1
    let det = flat.determinant();
    let normalised = if t.m44.abs() > f32::EPSILON {
        det / (t.m44 * t.m44 * t.m44)
    } else {
        det
    };
    if !normalised.is_finite() || normalised.abs() < 1e-6 {
        return None;
    }
    flat.inverse()
}
