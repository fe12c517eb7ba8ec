use glam::{Mat4, Quat, Vec3};

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct AABB {
    pub min: Vec3,
    pub max: Vec3,
}

impl AABB {
    pub const EMPTY: AABB = AABB {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Self {
        points.into_iter().fold(Self::EMPTY, |bounds, point| AABB {
            min: bounds.min.min(point),
            max: bounds.max.max(point),
        })
    }

    pub fn intersects(&self, other: &AABB) -> bool {
        self.min.x < other.max.x
            && self.max.x > other.min.x
            && self.min.y < other.max.y
            && self.max.y > other.min.y
            && self.min.z < other.max.z
            && self.max.z > other.min.z
    }

    pub fn union(&self, other: &AABB) -> AABB {
        AABB {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Slab test. Returns the entry distance along `ray` when the box is hit
    /// before `t_max`; a ray starting inside the box reports `0.0`.
    pub fn intersect_ray(&self, ray: &Ray, t_max: f32) -> Option<f32> {
        let inv_dir = ray.direction.recip();
        let t0 = (self.min - ray.origin) * inv_dir;
        let t1 = (self.max - ray.origin) * inv_dir;
        let t_near = t0.min(t1).max_element().max(0.0);
        let t_far = t0.max(t1).min_element().min(t_max);
        if t_near <= t_far {
            Some(t_near)
        } else {
            None
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
}

impl Ray {
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self { origin, direction }
    }

    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }
}

/// Opaque handle to an actor owned by the physics engine.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActorHandle(pub u32);

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Pose {
    pub position: Vec3,
    pub orientation: Quat,
}

impl Default for Pose {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            orientation: Quat::IDENTITY,
        }
    }
}

impl Pose {
    pub fn new(position: Vec3, orientation: Quat) -> Self {
        Self {
            position,
            orientation,
        }
    }

    pub fn to_mat4(&self) -> Mat4 {
        Mat4::from_rotation_translation(self.orientation, self.position)
    }
}

/// The slice of the physics engine's rigid-body API the portal core needs:
/// pose and linear velocity reads and writes.
pub trait RigidBody {
    fn actor(&self) -> ActorHandle;
    fn pose(&self) -> Pose;
    fn set_pose(&mut self, pose: Pose);
    fn linear_velocity(&self) -> Vec3;
    fn set_linear_velocity(&mut self, velocity: Vec3);
}

/// Plain body state, used where no engine actor backs an entity (tests,
/// scripted movers).
#[derive(Debug, Clone, PartialEq)]
pub struct KinematicBody {
    pub actor: ActorHandle,
    pub pose: Pose,
    pub velocity: Vec3,
}

impl KinematicBody {
    pub fn new(actor: ActorHandle, position: Vec3) -> Self {
        Self {
            actor,
            pose: Pose::new(position, Quat::IDENTITY),
            velocity: Vec3::ZERO,
        }
    }

    pub fn integrate(&mut self, dt: f32) {
        self.pose.position += self.velocity * dt;
    }
}

impl RigidBody for KinematicBody {
    fn actor(&self) -> ActorHandle {
        self.actor
    }

    fn pose(&self) -> Pose {
        self.pose
    }

    fn set_pose(&mut self, pose: Pose) {
        self.pose = pose;
    }

    fn linear_velocity(&self) -> Vec3 {
        self.velocity
    }

    fn set_linear_velocity(&mut self, velocity: Vec3) {
        self.velocity = velocity;
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ContactPoint {
    pub position: Vec3,
    pub ignored: bool,
}

/// Contact points reported between two actors before the solver runs.
#[derive(Debug, Clone, PartialEq)]
pub struct ContactPair {
    pub actors: [ActorHandle; 2],
    pub points: Vec<ContactPoint>,
}

impl ContactPair {
    pub fn new(a: ActorHandle, b: ActorHandle, positions: impl IntoIterator<Item = Vec3>) -> Self {
        Self {
            actors: [a, b],
            points: positions
                .into_iter()
                .map(|position| ContactPoint {
                    position,
                    ignored: false,
                })
                .collect(),
        }
    }

    pub fn ignored_count(&self) -> usize {
        self.points.iter().filter(|point| point.ignored).count()
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct RaycastHit {
    pub point: Vec3,
    pub normal: Vec3,
    pub actor: ActorHandle,
    pub distance: f32,
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::{ActorHandle, ContactPair, KinematicBody, Ray, RigidBody, AABB};

    #[test]
    fn aabb_collision_detection() {
        let a = AABB {
            min: Vec3::new(0.0, 0.0, 0.0),
            max: Vec3::new(1.0, 1.0, 1.0),
        };
        let b = AABB {
            min: Vec3::new(0.5, 0.25, 0.5),
            max: Vec3::new(1.5, 1.25, 1.5),
        };
        let c = AABB {
            min: Vec3::new(1.0, 1.0, 1.0),
            max: Vec3::new(2.0, 2.0, 2.0),
        };

        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
        assert_eq!(a.union(&c).max, Vec3::splat(2.0));
    }

    #[test]
    fn slab_test_reports_entry_distance() {
        let bounds = AABB::from_points([Vec3::new(-1.0, -1.0, 4.0), Vec3::new(1.0, 1.0, 6.0)]);
        let ray = Ray::new(Vec3::ZERO, Vec3::Z);
        let t = bounds.intersect_ray(&ray, 100.0).expect("ray should enter the box");
        assert!((t - 4.0).abs() < 1e-5);

        assert!(bounds.intersect_ray(&ray, 3.0).is_none());
        let miss = Ray::new(Vec3::new(5.0, 0.0, 0.0), Vec3::Z);
        assert!(bounds.intersect_ray(&miss, 100.0).is_none());
    }

    #[test]
    fn kinematic_body_integrates_velocity() {
        let mut body = KinematicBody::new(ActorHandle(3), Vec3::new(0.0, 1.0, 0.0));
        body.set_linear_velocity(Vec3::new(0.0, 0.0, 5.0));
        body.integrate(0.5);
        assert_eq!(body.pose().position, Vec3::new(0.0, 1.0, 2.5));
        assert_eq!(body.actor(), ActorHandle(3));
    }

    #[test]
    fn contact_pair_starts_with_no_ignored_points() {
        let pair = ContactPair::new(ActorHandle(1), ActorHandle(2), [Vec3::ZERO, Vec3::X]);
        assert_eq!(pair.points.len(), 2);
        assert_eq!(pair.ignored_count(), 0);
    }
}
