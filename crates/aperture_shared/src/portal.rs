use glam::{Mat3, Mat4, Quat, Vec2, Vec3, Vec4};
use tracing::warn;

use crate::physics::{ActorHandle, Ray};

/// Quad-space axis the portal faces along.
pub const LOCAL_FORWARD: Vec3 = Vec3::Y;
/// Quad-space axis that points to the top edge of the portal.
pub const LOCAL_UP: Vec3 = Vec3::NEG_Z;

/// Half-size of the mouth volume along up/right and its depth in front of
/// the surface. Fixed regardless of the rendered scale.
pub const MOUTH_HALF_EXTENT: f32 = 2.0;

const DEGENERATE_EPSILON: f32 = 1.0e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortalId(pub usize);

impl PortalId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Half-space `normal · p + distance >= 0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    pub normal: Vec3,
    pub distance: f32,
}

impl Plane {
    pub fn from_point_normal(point: Vec3, normal: Vec3) -> Self {
        Self {
            normal,
            distance: -normal.dot(point),
        }
    }

    pub fn signed_distance(&self, point: Vec3) -> f32 {
        self.normal.dot(point) + self.distance
    }

    pub fn contains(&self, point: Vec3) -> bool {
        self.signed_distance(point) >= 0.0
    }

    pub fn as_vec4(&self) -> Vec4 {
        self.normal.extend(self.distance)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouthPlane {
    Front = 0,
    Up = 1,
    Down = 2,
    Right = 3,
    Left = 4,
}

const SIDE_PLANES: [MouthPlane; 4] = [
    MouthPlane::Up,
    MouthPlane::Down,
    MouthPlane::Right,
    MouthPlane::Left,
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PortalOutline {
    pub color: Vec3,
}

#[derive(Debug, Clone)]
pub struct Portal {
    id: PortalId,
    position: Vec3,
    orientation: Quat,
    pub scale: Vec3,
    forward: Vec3,
    up: Vec3,
    right: Vec3,
    mouth: [Plane; 5],
    pub open: bool,
    pub(crate) linked: Option<PortalId>,
    pub outline: Option<PortalOutline>,
    /// Static actor the portal was last fired onto.
    pub surface: Option<ActorHandle>,
    /// Strength of the light relayed out of this portal, refreshed with the
    /// portal lights.
    pub intensity: f32,
    /// Color used when the portal is drawn as a solid surface.
    pub color: Vec3,
}

impl Portal {
    pub fn new(id: PortalId, position: Vec3, scale: Vec3, orientation: Quat) -> Self {
        let mut portal = Self {
            id,
            position: Vec3::ZERO,
            orientation: Quat::IDENTITY,
            scale,
            forward: LOCAL_FORWARD,
            up: LOCAL_UP,
            right: LOCAL_UP.cross(LOCAL_FORWARD),
            mouth: [Plane::from_point_normal(Vec3::ZERO, Vec3::ZERO); 5],
            open: true,
            linked: None,
            outline: None,
            surface: None,
            intensity: 0.0,
            color: Vec3::ONE,
        };
        portal.set_position(position, orientation);
        portal
    }

    pub fn id(&self) -> PortalId {
        self.id
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn orientation(&self) -> Quat {
        self.orientation
    }

    pub fn forward(&self) -> Vec3 {
        self.forward
    }

    pub fn up(&self) -> Vec3 {
        self.up
    }

    pub fn right(&self) -> Vec3 {
        self.right
    }

    pub fn linked(&self) -> Option<PortalId> {
        self.linked
    }

    pub fn mouth_plane(&self, plane: MouthPlane) -> Plane {
        self.mouth[plane as usize]
    }

    /// Moves the portal and rebuilds the cached axes and mouth planes.
    /// A non-finite or zero-length orientation keeps the previous one.
    pub fn set_position(&mut self, position: Vec3, orientation: Quat) {
        let orientation = if orientation.is_finite() && orientation.length() > DEGENERATE_EPSILON {
            orientation.normalize()
        } else {
            warn!(
                "Portal {:?} given degenerate orientation {orientation:?}; keeping {:?}",
                self.id, self.orientation
            );
            self.orientation
        };

        self.position = position;
        self.orientation = orientation;
        self.forward = (orientation * LOCAL_FORWARD).normalize();
        self.up = (orientation * LOCAL_UP).normalize();
        self.right = self.up.cross(self.forward).normalize();
        self.mouth = self.build_mouth_planes();
    }

    fn build_mouth_planes(&self) -> [Plane; 5] {
        let reach = MOUTH_HALF_EXTENT;
        let p = self.position;
        [
            Plane::from_point_normal(p + self.forward * reach, -self.forward),
            Plane::from_point_normal(p + self.up * reach, -self.up),
            Plane::from_point_normal(p - self.up * reach, self.up),
            Plane::from_point_normal(p + self.right * reach, -self.right),
            Plane::from_point_normal(p - self.right * reach, self.right),
        ]
    }

    /// The oriented surface plane, positive on the side the portal faces.
    pub fn surface_plane(&self) -> Plane {
        Plane::from_point_normal(self.position, self.forward)
    }

    pub fn facing(&self, point: Vec3) -> bool {
        (point - self.position).dot(self.forward) > 0.0
    }

    pub fn point_in_bounds(&self, point: Vec3) -> bool {
        self.mouth.iter().all(|plane| plane.contains(point))
    }

    /// Mouth test without the front plane, so points slightly behind or in
    /// front of the cut still count.
    pub fn point_in_side_bounds(&self, point: Vec3) -> bool {
        SIDE_PLANES
            .iter()
            .all(|plane| self.mouth_plane(*plane).contains(point))
    }

    /// Half width and half height of the rendered quad.
    pub fn half_extents(&self) -> Vec2 {
        Vec2::new(self.scale.x.abs(), self.scale.z.abs())
    }

    pub fn model_matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.orientation, self.position)
    }

    /// World-space corners of the visual quad, counter-clockwise seen from
    /// the front.
    pub fn quad_corners(&self) -> [Vec3; 4] {
        let half = self.half_extents();
        let right = self.right * half.x;
        let up = self.up * half.y;
        [
            self.position - right - up,
            self.position + right - up,
            self.position + right + up,
            self.position - right + up,
        ]
    }

    /// Intersects `ray` with the visual quad, returning the distance along
    /// the ray. Both sides of the quad count.
    pub fn intersect_quad(&self, ray: &Ray, t_max: f32) -> Option<f32> {
        let denom = ray.direction.dot(self.forward);
        if denom.abs() < DEGENERATE_EPSILON {
            return None;
        }
        let t = (self.position - ray.origin).dot(self.forward) / denom;
        if !t.is_finite() || t <= 0.0 || t > t_max {
            return None;
        }
        self.quad_contains(ray.at(t)).then_some(t)
    }

    pub fn quad_contains(&self, point: Vec3) -> bool {
        let local = point - self.position;
        let half = self.half_extents();
        local.dot(self.right).abs() <= half.x && local.dot(self.up).abs() <= half.y
    }
}

/// Orientation whose forward axis is `normal` and whose up axis is as close
/// to `up_hint` as the surface allows.
pub fn orientation_for_surface(normal: Vec3, up_hint: Vec3) -> Option<Quat> {
    let forward = normal.normalize_or_zero();
    if forward == Vec3::ZERO {
        return None;
    }

    let mut up = up_hint - forward * up_hint.dot(forward);
    if up.length_squared() < DEGENERATE_EPSILON {
        // Floors and ceilings: fall back to any axis in the surface plane.
        up = forward.any_orthonormal_vector();
    }
    let up = up.normalize();

    let local_basis = Mat3::from_cols(LOCAL_FORWARD, LOCAL_UP, LOCAL_FORWARD.cross(LOCAL_UP));
    let world_basis = Mat3::from_cols(forward, up, forward.cross(up));
    Some(Quat::from_mat3(&(world_basis * local_basis.transpose())).normalize())
}

#[cfg(test)]
mod tests {
    use glam::{Quat, Vec3};

    use super::{orientation_for_surface, Portal, PortalId, MOUTH_HALF_EXTENT};
    use crate::physics::Ray;

    fn facing_pos_z() -> Quat {
        orientation_for_surface(Vec3::Z, Vec3::Y).expect("valid surface orientation")
    }

    #[test]
    fn set_position_caches_axes() {
        let portal = Portal::new(PortalId(0), Vec3::new(1.0, 2.0, 3.0), Vec3::ONE, facing_pos_z());
        assert!(portal.forward().abs_diff_eq(Vec3::Z, 1e-5));
        assert!(portal.up().abs_diff_eq(Vec3::Y, 1e-5));
        assert!(portal.right().abs_diff_eq(Vec3::X, 1e-5));
    }

    #[test]
    fn facing_uses_signed_distance_along_forward() {
        let portal = Portal::new(PortalId(0), Vec3::ZERO, Vec3::ONE, facing_pos_z());
        assert!(portal.facing(Vec3::new(0.0, 0.0, 0.5)));
        assert!(!portal.facing(Vec3::new(0.0, 0.0, -0.5)));
        assert!(!portal.facing(Vec3::ZERO));
    }

    #[test]
    fn mouth_membership_ignores_visual_scale() {
        for scale in [Vec3::splat(0.25), Vec3::ONE, Vec3::new(6.0, 1.0, 9.0)] {
            let portal = Portal::new(PortalId(0), Vec3::ZERO, scale, facing_pos_z());
            assert!(portal.point_in_bounds(Vec3::ZERO));

            let beyond = MOUTH_HALF_EXTENT + 0.1;
            assert!(!portal.point_in_bounds(Vec3::new(0.0, beyond, 0.0)));
            assert!(!portal.point_in_bounds(Vec3::new(0.0, -beyond, 0.0)));
            assert!(!portal.point_in_bounds(Vec3::new(beyond, 0.0, 0.0)));
            assert!(!portal.point_in_bounds(Vec3::new(-beyond, 0.0, 0.0)));
            assert!(!portal.point_in_bounds(Vec3::new(0.0, 0.0, beyond)));

            let inside = MOUTH_HALF_EXTENT - 0.1;
            assert!(portal.point_in_bounds(Vec3::new(inside, -inside, inside)));
        }
    }

    #[test]
    fn side_bounds_skip_the_front_plane() {
        let portal = Portal::new(PortalId(0), Vec3::ZERO, Vec3::ONE, facing_pos_z());
        let far_in_front = Vec3::new(0.0, 1.0, MOUTH_HALF_EXTENT + 3.0);
        assert!(!portal.point_in_bounds(far_in_front));
        assert!(portal.point_in_side_bounds(far_in_front));
        assert!(portal.point_in_side_bounds(Vec3::new(0.5, 0.5, -0.3)));
        assert!(!portal.point_in_side_bounds(Vec3::new(0.0, 5.0, -0.3)));
    }

    #[test]
    fn firing_onto_a_floor_faces_away_from_it() {
        let hit = Vec3::new(10.0, 2.0, 0.0);
        let normal = Vec3::Y;
        let orientation = orientation_for_surface(normal, Vec3::Y).expect("floor orientation");
        let portal = Portal::new(PortalId(0), hit, Vec3::ONE, orientation);

        assert!(portal.forward().abs_diff_eq(normal, 1e-5));
        assert!(portal.facing(hit + normal * 0.01));
        assert!(!portal.facing(hit - normal * 0.01));
    }

    #[test]
    fn degenerate_orientation_keeps_previous_pose() {
        let mut portal = Portal::new(PortalId(0), Vec3::ZERO, Vec3::ONE, facing_pos_z());
        portal.set_position(Vec3::X, Quat::from_xyzw(0.0, 0.0, 0.0, 0.0));
        assert_eq!(portal.position(), Vec3::X);
        assert!(portal.forward().abs_diff_eq(Vec3::Z, 1e-5));
    }

    #[test]
    fn quad_intersection_respects_scale() {
        let portal = Portal::new(PortalId(0), Vec3::ZERO, Vec3::new(1.0, 1.0, 3.0), facing_pos_z());
        let toward = Ray::new(Vec3::new(0.0, 2.5, 5.0), Vec3::NEG_Z);
        let t = portal.intersect_quad(&toward, 100.0).expect("inside the tall quad");
        assert!((t - 5.0).abs() < 1e-5);

        let outside = Ray::new(Vec3::new(1.5, 0.0, 5.0), Vec3::NEG_Z);
        assert!(portal.intersect_quad(&outside, 100.0).is_none());
        assert_eq!(portal.quad_corners().len(), 4);
    }
}
