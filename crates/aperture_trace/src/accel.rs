use aperture_shared::physics::{Ray, AABB};
use glam::Vec3;

use crate::scene::{ObjectKind, Scene, Triangle};

/// Hits closer than this to the ray origin are treated as self-hits.
pub const RAY_EPSILON: f32 = 1.0e-3;
/// Hits within this distance of each other are coincident.
pub const COINCIDENT_DISTANCE: f32 = 1.0e-4;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceHit {
    pub object: usize,
    pub kind: ObjectKind,
    pub distance: f32,
    pub point: Vec3,
    /// Geometric normal of the triangle that was hit, not yet flipped
    /// toward the ray.
    pub normal: Vec3,
}

impl SurfaceHit {
    /// Whether `self` should replace `current` as the closest hit.
    pub fn beats(&self, current: &SurfaceHit) -> bool {
        if (self.distance - current.distance).abs() < COINCIDENT_DISTANCE {
            let (mine, theirs) = (self.kind.hit_precedence(), current.kind.hit_precedence());
            if mine != theirs {
                return mine < theirs;
            }
        }
        self.distance < current.distance
    }
}

/// Closest-hit queries over a frozen scene. Shared by every tracing thread.
pub trait Accelerator: Sync {
    fn closest_hit(&self, ray: &Ray, t_max: f32) -> Option<SurfaceHit>;

    fn occluded(&self, ray: &Ray, t_max: f32) -> bool {
        self.closest_hit(ray, t_max).is_some()
    }
}

struct AccelObject {
    kind: ObjectKind,
    bounds: AABB,
    triangles: Vec<Triangle>,
}

/// Reference accelerator: a bounds check per object, then every triangle.
pub struct LinearAccel {
    objects: Vec<AccelObject>,
}

impl LinearAccel {
    pub fn build(scene: &Scene) -> Self {
        let objects = scene
            .objects
            .iter()
            .map(|object| AccelObject {
                kind: object.kind,
                bounds: padded(object.bounds),
                triangles: object.triangles.clone(),
            })
            .collect();
        Self { objects }
    }
}

/// Flat quads have zero-thickness bounds; pad so the slab test still
/// accepts rays that graze them.
fn padded(bounds: AABB) -> AABB {
    AABB {
        min: bounds.min - Vec3::splat(COINCIDENT_DISTANCE),
        max: bounds.max + Vec3::splat(COINCIDENT_DISTANCE),
    }
}

impl Accelerator for LinearAccel {
    fn closest_hit(&self, ray: &Ray, t_max: f32) -> Option<SurfaceHit> {
        let mut best: Option<SurfaceHit> = None;
        for (index, object) in self.objects.iter().enumerate() {
            let reach = best.map_or(t_max, |hit| (hit.distance + COINCIDENT_DISTANCE).min(t_max));
            if object.bounds.intersect_ray(ray, reach).is_none() {
                continue;
            }
            for triangle in &object.triangles {
                let Some(distance) = triangle.intersect(ray, RAY_EPSILON, t_max) else {
                    continue;
                };
                let candidate = SurfaceHit {
                    object: index,
                    kind: object.kind,
                    distance,
                    point: ray.at(distance),
                    normal: triangle.normal(),
                };
                if best.map_or(true, |current| candidate.beats(&current)) {
                    best = Some(candidate);
                }
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use aperture_shared::physics::Ray;
    use aperture_shared::portal::PortalId;
    use glam::Vec3;

    use super::{Accelerator, LinearAccel};
    use crate::scene::{Material, ObjectKind, Scene, SceneObject};

    fn coincident_scene() -> Scene {
        let mut scene = Scene::default();
        scene.add_wall(Vec3::new(0.0, 0.0, -5.1), Vec3::new(5.0, 5.0, 0.1), Material::default());
        scene.push(SceneObject::quad(
            ObjectKind::PortalOutline {
                portal: PortalId(0),
                color: Vec3::X,
            },
            Material::default(),
            Vec3::new(0.0, 0.0, -5.0),
            Vec3::X * 1.5,
            Vec3::Y * 1.5,
        ));
        scene.push(SceneObject::quad(
            ObjectKind::Portal(PortalId(0)),
            Material::default(),
            Vec3::new(0.0, 0.0, -5.0),
            Vec3::X,
            Vec3::Y,
        ));
        scene
    }

    #[test]
    fn coincident_hits_prefer_portal_then_outline() {
        let scene = coincident_scene();
        let accel = LinearAccel::build(&scene);

        let center = accel
            .closest_hit(&Ray::new(Vec3::ZERO, Vec3::NEG_Z), 100.0)
            .expect("hits the stack");
        assert_eq!(center.kind, ObjectKind::Portal(PortalId(0)));

        let ring = accel
            .closest_hit(&Ray::new(Vec3::new(1.25, 0.0, 0.0), Vec3::NEG_Z), 100.0)
            .expect("hits the outline");
        assert!(matches!(ring.kind, ObjectKind::PortalOutline { .. }));

        let wall = accel
            .closest_hit(&Ray::new(Vec3::new(3.0, 0.0, 0.0), Vec3::NEG_Z), 100.0)
            .expect("hits the wall");
        assert_eq!(wall.kind, ObjectKind::Wall);
    }

    #[test]
    fn t_max_limits_occlusion() {
        let scene = coincident_scene();
        let accel = LinearAccel::build(&scene);
        let ray = Ray::new(Vec3::new(3.0, 0.0, 0.0), Vec3::NEG_Z);
        assert!(accel.occluded(&ray, 10.0));
        assert!(!accel.occluded(&ray, 4.0));
    }
}
