use glam::{Mat4, Vec3, Vec4};
use tracing::debug;

use crate::arena::PortalArena;
use crate::portal::{Plane, PortalId};
use crate::transform::PortalTransform;

/// Default vertical field of view in degrees.
pub const DEFAULT_FOV_Y_DEGREES: f32 = 45.0;
pub const DEFAULT_NEAR: f32 = 1.0;
pub const DEFAULT_FAR: f32 = 100.0;

/// The clip plane is pushed this far past the exit surface so geometry the
/// portal is mounted on never bleeds into the relayed view.
const PORTAL_CLIP_BIAS: f32 = 0.025;
const CLIP_DENOM_EPSILON: f32 = 1.0e-5;

/// Depth range of the target clip space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipDepth {
    /// OpenGL style, `z_ndc` in `[-1, 1]`.
    NegOneToOne,
    /// wgpu/D3D style, `z_ndc` in `[0, 1]`.
    ZeroToOne,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub eye: Vec3,
    pub look_at: Vec3,
    pub up: Vec3,
    /// Radians.
    pub fov_y: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Camera {
    pub fn new(eye: Vec3, look_at: Vec3, up: Vec3, aspect: f32) -> Self {
        Self {
            eye,
            look_at,
            up,
            fov_y: DEFAULT_FOV_Y_DEGREES.to_radians(),
            aspect,
            near: DEFAULT_NEAR,
            far: DEFAULT_FAR,
        }
    }

    pub fn forward(&self) -> Vec3 {
        (self.look_at - self.eye).normalize_or_zero()
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.eye, self.look_at, self.up)
    }

    pub fn projection_matrix(&self, depth: ClipDepth) -> Mat4 {
        let aspect = self.aspect.max(0.0001);
        let near = self.near.max(0.0001);
        let far = self.far.max(near + 0.0001);
        match depth {
            ClipDepth::NegOneToOne => Mat4::perspective_rh_gl(self.fov_y, aspect, near, far),
            ClipDepth::ZeroToOne => Mat4::perspective_rh(self.fov_y, aspect, near, far),
        }
    }
}

/// Everything needed to draw the scene as seen through one portal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RelayView {
    pub portal: PortalId,
    pub camera: Camera,
    pub view: Mat4,
    pub projection: Mat4,
    pub transform: PortalTransform,
}

/// The real camera carried through `transform`.
pub fn relay_camera(camera: &Camera, transform: &PortalTransform) -> Camera {
    Camera {
        eye: transform.transform_point(camera.eye),
        look_at: transform.transform_point(camera.look_at),
        up: transform.transform_direction(camera.up),
        ..*camera
    }
}

/// World-space plane `(n, d)` to view space.
pub fn plane_to_view(view: Mat4, plane: Vec4) -> Vec4 {
    view.inverse().transpose() * plane
}

/// Replaces the near plane of `projection` with `clip_plane` (view space,
/// camera on its negative side). Returns `None` when the plane is
/// degenerate for this projection.
pub fn oblique_clip(projection: Mat4, clip_plane: Vec4, depth: ClipDepth) -> Option<Mat4> {
    if !clip_plane.is_finite() || !projection.is_finite() {
        return None;
    }

    let corner = projection.inverse()
        * Vec4::new(clip_plane.x.signum(), clip_plane.y.signum(), 1.0, 1.0);
    let denom = clip_plane.dot(corner);
    if !denom.is_finite() || denom.abs() < CLIP_DENOM_EPSILON {
        return None;
    }

    let mut m = projection.to_cols_array_2d();
    match depth {
        ClipDepth::NegOneToOne => {
            let c = clip_plane * (2.0 / denom);
            m[0][2] = c.x - m[0][3];
            m[1][2] = c.y - m[1][3];
            m[2][2] = c.z - m[2][3];
            m[3][2] = c.w - m[3][3];
        }
        ClipDepth::ZeroToOne => {
            let c = clip_plane / denom;
            m[0][2] = c.x;
            m[1][2] = c.y;
            m[2][2] = c.z;
            m[3][2] = c.w;
        }
    }

    let clipped = Mat4::from_cols_array_2d(&m);
    clipped.is_finite().then_some(clipped)
}

/// Relay camera and clipped projection for looking through `portal`.
/// `None` when the portal is back-facing, not traversable, or the relay is
/// degenerate this frame.
pub fn relay_view(
    arena: &PortalArena,
    portal: PortalId,
    camera: &Camera,
    depth: ClipDepth,
) -> Option<RelayView> {
    let entry = arena.get(portal)?;
    if !entry.facing(camera.eye) {
        return None;
    }
    let transform = arena.transform(portal)?;
    let exit = arena.linked(portal)?;

    let relay = relay_camera(camera, &transform);
    let view = relay.view_matrix();
    if !view.is_finite() {
        debug!("Relay camera through portal {} is degenerate", portal.0);
        return None;
    }

    let clip_point = exit.position() + exit.forward() * PORTAL_CLIP_BIAS;
    let plane = Plane::from_point_normal(clip_point, exit.forward()).as_vec4();
    let Some(projection) = oblique_clip(relay.projection_matrix(depth), plane_to_view(view, plane), depth)
    else {
        debug!("Skipping relay through portal {}: singular clip plane", portal.0);
        return None;
    };

    Some(RelayView {
        portal,
        camera: relay,
        view,
        projection,
        transform,
    })
}

#[cfg(test)]
mod tests {
    use glam::{Mat4, Vec3, Vec4};

    use super::{oblique_clip, plane_to_view, relay_view, Camera, ClipDepth};
    use crate::arena::PortalArena;
    use crate::portal::orientation_for_surface;

    fn ndc_z(m: Mat4, p: Vec3) -> f32 {
        let clip = m * p.extend(1.0);
        clip.z / clip.w
    }

    fn camera_looking_down_neg_z() -> Camera {
        Camera::new(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y, 1.0)
    }

    #[test]
    fn clip_plane_becomes_the_near_plane() {
        let camera = camera_looking_down_neg_z();
        // Keeps everything at z <= -5.
        let plane = Vec4::new(0.0, 0.0, -1.0, -5.0);

        for (depth, near_ndc) in [(ClipDepth::NegOneToOne, -1.0), (ClipDepth::ZeroToOne, 0.0)] {
            let projection = oblique_clip(camera.projection_matrix(depth), plane, depth)
                .expect("plane in front of camera");
            for p in [Vec3::new(0.0, 0.0, -5.0), Vec3::new(1.0, 0.5, -5.0), Vec3::new(-2.0, 1.5, -5.0)] {
                assert!((ndc_z(projection, p) - near_ndc).abs() < 1e-4, "{depth:?} {p:?}");
            }
            assert!(ndc_z(projection, Vec3::new(0.0, 0.0, -10.0)) > near_ndc);
            assert!(ndc_z(projection, Vec3::new(0.0, 0.0, -3.0)) < near_ndc);
        }
    }

    #[test]
    fn degenerate_plane_is_rejected() {
        let camera = camera_looking_down_neg_z();
        let projection = camera.projection_matrix(ClipDepth::NegOneToOne);
        assert!(oblique_clip(projection, Vec4::ZERO, ClipDepth::NegOneToOne).is_none());
        assert!(oblique_clip(projection, Vec4::splat(f32::NAN), ClipDepth::NegOneToOne).is_none());
    }

    #[test]
    fn world_plane_moves_into_view_space() {
        let camera = Camera::new(Vec3::new(0.0, 0.0, 10.0), Vec3::ZERO, Vec3::Y, 1.0);
        let world = Vec4::new(0.0, 0.0, -1.0, 0.0);
        let view_plane = plane_to_view(camera.view_matrix(), world);
        // Camera sits ten units on the negative side.
        assert!((view_plane.w + 10.0).abs() < 1e-4);
        assert!((view_plane.z + 1.0).abs() < 1e-4);
    }

    fn facing_pair(open: bool) -> PortalArena {
        let mut arena = PortalArena::new();
        let facing_z = orientation_for_surface(Vec3::Z, Vec3::Y).expect("orientation");
        let facing_neg_x = orientation_for_surface(Vec3::NEG_X, Vec3::Y).expect("orientation");
        let a = arena.insert(Vec3::ZERO, Vec3::ONE, facing_z);
        let b = arena.insert(Vec3::new(20.0, 0.0, -10.0), Vec3::ONE, facing_neg_x);
        arena.link(a, b);
        arena.set_open(b, open);
        arena
    }

    #[test]
    fn relay_view_puts_exit_surface_on_near_plane() {
        let arena = facing_pair(true);
        let a = arena.ids().next().expect("portal a");
        let camera = Camera::new(Vec3::new(0.5, 1.0, 6.0), Vec3::ZERO, Vec3::Y, 1.5);

        let relay = relay_view(&arena, a, &camera, ClipDepth::ZeroToOne).expect("visible and open");
        let exit = arena.linked(a).expect("linked");
        assert!(!exit.facing(relay.camera.eye));

        let on_surface = exit.position() + exit.forward() * 0.025 + exit.up() * 0.5;
        let clip = relay.projection * relay.view * on_surface.extend(1.0);
        assert!((clip.z / clip.w).abs() < 1e-3);
    }

    #[test]
    fn closed_or_back_facing_portals_produce_no_relay() {
        let closed = facing_pair(false);
        let a = closed.ids().next().expect("portal a");
        let camera = Camera::new(Vec3::new(0.0, 1.0, 6.0), Vec3::ZERO, Vec3::Y, 1.0);
        assert!(relay_view(&closed, a, &camera, ClipDepth::NegOneToOne).is_none());

        let open = facing_pair(true);
        let behind = Camera::new(Vec3::new(0.0, 1.0, -6.0), Vec3::ZERO, Vec3::Y, 1.0);
        assert!(relay_view(&open, a, &behind, ClipDepth::NegOneToOne).is_none());
        assert!(relay_view(&open, a, &camera, ClipDepth::NegOneToOne).is_some());
    }
}
