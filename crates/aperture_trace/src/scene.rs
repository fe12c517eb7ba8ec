use aperture_shared::arena::PortalArena;
use aperture_shared::lighting::PointLight;
use aperture_shared::physics::{Ray, AABB};
use aperture_shared::portal::{Portal, PortalId};
use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Outline quads extend this far past the portal quad on every side.
pub const OUTLINE_MARGIN: f32 = 0.15;

const TRIANGLE_EPSILON: f32 = 1.0e-7;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Material {
    #[serde(default = "default_ambient")]
    pub ambient: Vec3,
    #[serde(default = "default_diffuse")]
    pub diffuse: Vec3,
    #[serde(default = "default_specular")]
    pub specular: Vec3,
    #[serde(default = "default_shininess")]
    pub shininess: f32,
    #[serde(default = "default_color")]
    pub color: Vec3,
    /// Fraction of the reflected ray mixed into the surface color.
    #[serde(default)]
    pub reflectivity: f32,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            ambient: default_ambient(),
            diffuse: default_diffuse(),
            specular: default_specular(),
            shininess: default_shininess(),
            color: default_color(),
            reflectivity: 0.0,
        }
    }
}

impl Material {
    /// Unlit surface that always shows `color`.
    pub fn flat(color: Vec3) -> Self {
        Self {
            ambient: Vec3::ONE,
            diffuse: Vec3::ZERO,
            specular: Vec3::ZERO,
            shininess: 1.0,
            color,
            reflectivity: 0.0,
        }
    }
}

fn default_ambient() -> Vec3 {
    Vec3::splat(0.15)
}

fn default_diffuse() -> Vec3 {
    Vec3::splat(0.7)
}

fn default_specular() -> Vec3 {
    Vec3::splat(0.2)
}

fn default_shininess() -> f32 {
    32.0
}

fn default_color() -> Vec3 {
    Vec3::splat(0.8)
}

/// Every kind of surface the tracer can hit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ObjectKind {
    Wall,
    Box,
    Portal(PortalId),
    PortalOutline { portal: PortalId, color: Vec3 },
}

impl ObjectKind {
    /// Lower wins when two hits are coincident.
    pub fn hit_precedence(self) -> u8 {
        match self {
            Self::Portal(_) => 0,
            Self::PortalOutline { .. } => 1,
            Self::Wall | Self::Box => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Triangle {
    pub vertices: [Vec3; 3],
}

impl Triangle {
    pub fn new(a: Vec3, b: Vec3, c: Vec3) -> Self {
        Self { vertices: [a, b, c] }
    }

    pub fn normal(&self) -> Vec3 {
        let [a, b, c] = self.vertices;
        (b - a).cross(c - a).normalize_or_zero()
    }

    /// Moller-Trumbore. Returns the distance along `ray` for hits in
    /// `(t_min, t_max)`.
    pub fn intersect(&self, ray: &Ray, t_min: f32, t_max: f32) -> Option<f32> {
        let [a, b, c] = self.vertices;
        let edge1 = b - a;
        let edge2 = c - a;
        let p = ray.direction.cross(edge2);
        let det = edge1.dot(p);
        if det.abs() < TRIANGLE_EPSILON {
            return None;
        }
        let inv_det = 1.0 / det;
        let s = ray.origin - a;
        let u = s.dot(p) * inv_det;
        if !(0.0..=1.0).contains(&u) {
            return None;
        }
        let q = s.cross(edge1);
        let v = ray.direction.dot(q) * inv_det;
        if v < 0.0 || u + v > 1.0 {
            return None;
        }
        let t = edge2.dot(q) * inv_det;
        (t > t_min && t < t_max).then_some(t)
    }
}

#[derive(Debug, Clone)]
pub struct SceneObject {
    pub kind: ObjectKind,
    pub material: Material,
    pub triangles: Vec<Triangle>,
    pub bounds: AABB,
}

impl SceneObject {
    pub fn from_triangles(kind: ObjectKind, material: Material, triangles: Vec<Triangle>) -> Self {
        let bounds = AABB::from_points(triangles.iter().flat_map(|tri| tri.vertices));
        Self {
            kind,
            material,
            triangles,
            bounds,
        }
    }

    /// Two-triangle quad spanning `center ± right ± up`.
    pub fn quad(kind: ObjectKind, material: Material, center: Vec3, right: Vec3, up: Vec3) -> Self {
        let corners = [
            center - right - up,
            center + right - up,
            center + right + up,
            center - right + up,
        ];
        Self::from_triangles(kind, material, quad_triangles(corners).to_vec())
    }

    /// Axis-aligned box.
    pub fn cuboid(kind: ObjectKind, material: Material, center: Vec3, half_extents: Vec3) -> Self {
        let h = half_extents;
        let faces = [
            (Vec3::X, Vec3::Y * h.y, Vec3::Z * h.z, h.x),
            (Vec3::Y, Vec3::Z * h.z, Vec3::X * h.x, h.y),
            (Vec3::Z, Vec3::X * h.x, Vec3::Y * h.y, h.z),
        ];
        let mut triangles = Vec::with_capacity(12);
        for (axis, right, up, reach) in faces {
            for side in [1.0, -1.0] {
                let face_center = center + axis * (reach * side);
                triangles.extend(quad_triangles([
                    face_center - right - up,
                    face_center + right - up,
                    face_center + right + up,
                    face_center - right + up,
                ]));
            }
        }
        Self::from_triangles(kind, material, triangles)
    }

    pub fn portal(portal: &Portal) -> Self {
        let half = portal.half_extents();
        Self::quad(
            ObjectKind::Portal(portal.id()),
            Material::flat(portal.color),
            portal.position(),
            portal.right() * half.x,
            portal.up() * half.y,
        )
    }

    pub fn outline(portal: &Portal, color: Vec3) -> Self {
        let half = portal.half_extents() + OUTLINE_MARGIN;
        Self::quad(
            ObjectKind::PortalOutline {
                portal: portal.id(),
                color,
            },
            Material::flat(color),
            portal.position(),
            portal.right() * half.x,
            portal.up() * half.y,
        )
    }
}

fn quad_triangles(corners: [Vec3; 4]) -> [Triangle; 2] {
    let [a, b, c, d] = corners;
    [Triangle::new(a, b, c), Triangle::new(a, c, d)]
}

/// Frozen scene read by every tracing thread.
#[derive(Debug, Clone, Default)]
pub struct Scene {
    pub objects: Vec<SceneObject>,
    pub lights: Vec<PointLight>,
    pub arena: PortalArena,
    pub background: Vec3,
}

impl Scene {
    pub fn new(arena: PortalArena) -> Self {
        let mut scene = Self {
            lights: arena.scene_lights().to_vec(),
            arena,
            ..Self::default()
        };
        scene.add_portal_geometry();
        scene
    }

    pub fn add_wall(&mut self, center: Vec3, half_extents: Vec3, material: Material) -> usize {
        self.push(SceneObject::cuboid(ObjectKind::Wall, material, center, half_extents))
    }

    pub fn add_box(&mut self, center: Vec3, half_extents: Vec3, material: Material) -> usize {
        self.push(SceneObject::cuboid(ObjectKind::Box, material, center, half_extents))
    }

    pub fn add_light(&mut self, light: PointLight) {
        self.lights.push(light);
        self.arena.set_scene_lights(&self.lights);
    }

    pub fn push(&mut self, object: SceneObject) -> usize {
        self.objects.push(object);
        self.objects.len() - 1
    }

    pub fn portal_object(&self, portal: PortalId) -> Option<&SceneObject> {
        self.objects
            .iter()
            .find(|object| object.kind == ObjectKind::Portal(portal))
    }

    fn add_portal_geometry(&mut self) {
        let mut geometry = Vec::new();
        for portal in self.arena.iter() {
            geometry.push(SceneObject::portal(portal));
            if let Some(outline) = portal.outline {
                geometry.push(SceneObject::outline(portal, outline.color));
            }
        }
        self.objects.extend(geometry);
    }
}
