use aperture_shared::physics::Ray;
use aperture_shared::portal::PortalId;
use aperture_shared::visibility::Camera;
use glam::Vec3;

use crate::accel::{Accelerator, SurfaceHit, RAY_EPSILON};
use crate::config::TraceSettings;
use crate::scene::{Material, ObjectKind, Scene};

/// Remaining recursion for one ray. Portal hops and reflection bounces are
/// counted separately so two facing portals cannot starve reflections or
/// loop forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceBudget {
    pub bounces: u32,
    pub portal_hops: u32,
}

impl TraceBudget {
    pub fn from_settings(settings: &TraceSettings) -> Self {
        Self {
            bounces: settings.max_bounces,
            portal_hops: settings.max_portal_hops,
        }
    }
}

pub struct Tracer<'a, A: Accelerator> {
    scene: &'a Scene,
    accel: &'a A,
    settings: &'a TraceSettings,
}

impl<'a, A: Accelerator> Tracer<'a, A> {
    pub fn new(scene: &'a Scene, accel: &'a A, settings: &'a TraceSettings) -> Self {
        Self {
            scene,
            accel,
            settings,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.settings.width, self.settings.height)
    }

    /// Ray through the center of pixel `(x, y)`, with `y` growing downward.
    pub fn primary_ray(&self, camera: &Camera, x: u32, y: u32) -> Ray {
        let width = self.settings.width.max(1) as f32;
        let height = self.settings.height.max(1) as f32;
        let aspect = width / height;
        let angle = (camera.fov_y * 0.5).tan();

        let px = (2.0 * ((x as f32 + 0.5) / width) - 1.0) * angle * aspect;
        let py = (1.0 - 2.0 * ((y as f32 + 0.5) / height)) * angle;

        let forward = camera.forward();
        let right = forward.cross(camera.up).normalize_or(Vec3::X);
        let up = right.cross(forward);
        Ray::new(camera.eye, (right * px + up * py + forward).normalize())
    }

    pub fn trace_color(&self, ray: &Ray, budget: TraceBudget) -> Vec3 {
        let Some(hit) = self.accel.closest_hit(ray, f32::INFINITY) else {
            return self.scene.background;
        };

        match hit.kind {
            ObjectKind::Portal(portal) => self.trace_portal(portal, ray, &hit, budget),
            ObjectKind::PortalOutline { color, .. } => color,
            ObjectKind::Wall | ObjectKind::Box => self.shade(ray, &hit, budget),
        }
    }

    fn trace_portal(&self, portal: PortalId, ray: &Ray, hit: &SurfaceHit, budget: TraceBudget) -> Vec3 {
        let Some(transform) = self.scene.arena.transform(portal) else {
            // Closed or unlinked: an ordinary opaque surface.
            return self.shade(ray, hit, budget);
        };
        if budget.portal_hops == 0 {
            return self.scene.arena.get(portal).map_or(self.scene.background, |p| {
                p.outline.map_or(p.color, |outline| outline.color)
            });
        }

        let origin = transform.transform_point(hit.point);
        let direction = transform.transform_direction(ray.direction).normalize_or(ray.direction);
        let relayed = Ray::new(origin, direction);
        self.trace_color(
            &relayed,
            TraceBudget {
                portal_hops: budget.portal_hops - 1,
                ..budget
            },
        )
    }

    fn shade(&self, ray: &Ray, hit: &SurfaceHit, budget: TraceBudget) -> Vec3 {
        let material = self
            .scene
            .objects
            .get(hit.object)
            .map_or_else(Material::default, |object| object.material);
        let material = match hit.kind {
            ObjectKind::Portal(portal) => self
                .scene
                .arena
                .get(portal)
                .map_or(material, |p| Material { color: p.color, ..material }),
            _ => material,
        };

        let normal = if hit.normal.dot(ray.direction) > 0.0 {
            -hit.normal
        } else {
            hit.normal
        };
        let point = hit.point + normal * RAY_EPSILON;

        let mut color = material.ambient * material.color;
        for light in &self.scene.lights {
            if self.light_visible(point, light.position) {
                color += blinn_phong(&material, normal, ray.direction, light.position - point) * light.intensity;
            }
        }

        let light_settings = self.scene.arena.light_settings();
        for portal_light in self.scene.arena.portal_lights() {
            let radiance = portal_light.radiance_at(point, light_settings);
            if radiance == Vec3::ZERO {
                continue;
            }
            if let Some(virtual_light) = self.portal_light_visible(point, portal_light.source, portal_light.portal) {
                color += blinn_phong(&material, normal, ray.direction, virtual_light - point) * radiance;
            }
        }

        if material.reflectivity > 0.0 && budget.bounces > 0 {
            let reflected_dir = ray.direction - 2.0 * ray.direction.dot(normal) * normal;
            let reflected = self.trace_color(
                &Ray::new(point, reflected_dir.normalize_or(normal)),
                TraceBudget {
                    bounces: budget.bounces - 1,
                    ..budget
                },
            );
            color = color.lerp(reflected, material.reflectivity.clamp(0.0, 1.0));
        }
        color
    }

    /// Direct line of sight from `point` to `light`.
    pub fn light_visible(&self, point: Vec3, light: Vec3) -> bool {
        let to_light = light - point;
        let distance = to_light.length();
        if distance <= RAY_EPSILON {
            return true;
        }
        let ray = Ray::new(point, to_light / distance);
        !self.accel.occluded(&ray, distance - RAY_EPSILON)
    }

    /// Whether `light` reaches `point` by passing out of `portal`. Returns
    /// where the light appears to be from `point` when it does.
    pub fn portal_light_visible(&self, point: Vec3, light: Vec3, portal: PortalId) -> Option<Vec3> {
        let arena = &self.scene.arena;
        let entry = arena.get(portal)?;
        let exit = arena.linked(portal)?;
        if !entry.facing(point) || !exit.facing(light) {
            return None;
        }
        let into_entry = arena.transform(exit.id())?;
        let into_exit = arena.transform(portal)?;

        let virtual_light = into_entry.transform_point(light);
        let to_virtual = virtual_light - point;
        let distance = to_virtual.length();
        if distance <= RAY_EPSILON {
            return None;
        }
        let ray = Ray::new(point, to_virtual / distance);

        // Cheap plane test before any traversal.
        entry.intersect_quad(&ray, distance)?;

        let hit = self.accel.closest_hit(&ray, distance)?;
        if hit.kind != ObjectKind::Portal(portal) {
            return None;
        }

        let continued_from = into_exit.transform_point(hit.point);
        let remaining = light - continued_from;
        let remaining_distance = remaining.length();
        if remaining_distance > RAY_EPSILON {
            let continued = Ray::new(continued_from, remaining / remaining_distance);
            if self.accel.occluded(&continued, remaining_distance - RAY_EPSILON) {
                return None;
            }
        }
        Some(virtual_light)
    }
}

fn blinn_phong(material: &Material, normal: Vec3, view_dir: Vec3, to_light: Vec3) -> Vec3 {
    let light_dir = to_light.normalize_or_zero();
    let diffuse = material.diffuse * material.color * normal.dot(light_dir).max(0.0);
    let half = (light_dir - view_dir).normalize_or_zero();
    let specular = material.specular * normal.dot(half).max(0.0).powf(material.shininess);
    diffuse + specular
}
