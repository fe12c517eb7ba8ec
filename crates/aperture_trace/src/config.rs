use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use aperture_shared::arena::{PortalArena, PortalRecord};
use aperture_shared::lighting::PointLight;
use aperture_shared::visibility::{Camera, DEFAULT_FOV_Y_DEGREES};
use glam::Vec3;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::scene::{Material, Scene};

const MIN_DIMENSION: u32 = 1;
const MAX_DIMENSION: u32 = 8192;
const MIN_FOV: f32 = 10.0;
const MAX_FOV: f32 = 150.0;
const MAX_BOUNCES: u32 = 16;
const MAX_PORTAL_HOPS: u32 = 64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceSettings {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    /// Vertical field of view in degrees.
    #[serde(default = "default_fov")]
    pub fov: f32,
    #[serde(default = "default_max_bounces")]
    pub max_bounces: u32,
    #[serde(default = "default_max_portal_hops")]
    pub max_portal_hops: u32,
    /// Zero lets rayon pick.
    #[serde(default)]
    pub worker_threads: usize,
    #[serde(default = "default_background")]
    pub background: Vec3,
}

impl Default for TraceSettings {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            fov: default_fov(),
            max_bounces: default_max_bounces(),
            max_portal_hops: default_max_portal_hops(),
            worker_threads: 0,
            background: default_background(),
        }
    }
}

impl TraceSettings {
    pub fn sanitize(mut self) -> Self {
        self.width = self.width.clamp(MIN_DIMENSION, MAX_DIMENSION);
        self.height = self.height.clamp(MIN_DIMENSION, MAX_DIMENSION);
        self.fov = self.fov.clamp(MIN_FOV, MAX_FOV);
        self.max_bounces = self.max_bounces.min(MAX_BOUNCES);
        self.max_portal_hops = self.max_portal_hops.min(MAX_PORTAL_HOPS);
        self.background = self.background.clamp(Vec3::ZERO, Vec3::ONE);
        self
    }

    pub fn load(path: &Path) -> io::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let parsed = toml::from_str::<Self>(&contents).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("failed to deserialize trace settings: {e}"),
            )
        })?;
        Ok(parsed.sanitize())
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        let settings = self.clone().sanitize();
        let serialized = toml::to_string_pretty(&settings).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("failed to serialize trace settings: {e}"),
            )
        })?;
        fs::write(path, serialized)
    }

    pub fn load_or_create(path: &Path) -> Self {
        match Self::load(path) {
            Ok(settings) => settings,
            Err(err) => {
                if err.kind() != io::ErrorKind::NotFound {
                    warn!("Failed to load trace settings from {}: {err}", path.display());
                }
                let settings = Self::default();
                if let Err(save_err) = settings.save(path) {
                    warn!(
                        "Failed to write default trace settings to {}: {save_err}",
                        path.display()
                    );
                }
                settings
            }
        }
    }
}

fn default_width() -> u32 {
    640
}

fn default_height() -> u32 {
    480
}

fn default_fov() -> f32 {
    DEFAULT_FOV_Y_DEGREES
}

fn default_max_bounces() -> u32 {
    3
}

fn default_max_portal_hops() -> u32 {
    8
}

fn default_background() -> Vec3 {
    Vec3::ZERO
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraDescription {
    pub eye: Vec3,
    pub look_at: Vec3,
    #[serde(default = "default_up")]
    pub up: Vec3,
}

fn default_up() -> Vec3 {
    Vec3::Y
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolidDescription {
    pub center: Vec3,
    pub half_extents: Vec3,
    #[serde(default)]
    pub material: Material,
}

/// A level as written in TOML: solids, portals, lights and the viewpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneDescription {
    pub camera: CameraDescription,
    #[serde(default)]
    pub walls: Vec<SolidDescription>,
    #[serde(default)]
    pub boxes: Vec<SolidDescription>,
    #[serde(default)]
    pub portals: Vec<PortalRecord>,
    #[serde(default)]
    pub lights: Vec<PointLight>,
}

#[derive(Debug)]
pub enum SceneLoadError {
    Io(io::Error),
    Parse(toml::de::Error),
    Invalid(String),
}

impl fmt::Display for SceneLoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "failed to read scene: {err}"),
            Self::Parse(err) => write!(f, "failed to parse scene: {err}"),
            Self::Invalid(reason) => write!(f, "invalid scene: {reason}"),
        }
    }
}

impl std::error::Error for SceneLoadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Parse(err) => Some(err),
            Self::Invalid(_) => None,
        }
    }
}

impl SceneDescription {
    pub fn load(path: &Path) -> Result<Self, SceneLoadError> {
        let contents = fs::read_to_string(path).map_err(SceneLoadError::Io)?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, SceneLoadError> {
        let description = toml::from_str::<Self>(contents).map_err(SceneLoadError::Parse)?;
        description.validate()?;
        Ok(description)
    }

    fn validate(&self) -> Result<(), SceneLoadError> {
        if (self.camera.look_at - self.camera.eye).length_squared() <= f32::EPSILON {
            return Err(SceneLoadError::Invalid(
                "camera eye and look_at coincide".to_string(),
            ));
        }
        let solids = self.walls.iter().chain(self.boxes.iter());
        if let Some(bad) = solids.into_iter().find(|solid| solid.half_extents.min_element() < 0.0) {
            return Err(SceneLoadError::Invalid(format!(
                "negative half extents {:?} at {:?}",
                bad.half_extents, bad.center
            )));
        }
        Ok(())
    }

    pub fn camera(&self, settings: &TraceSettings) -> Camera {
        let mut camera = Camera::new(
            self.camera.eye,
            self.camera.look_at,
            self.camera.up,
            settings.width as f32 / settings.height.max(1) as f32,
        );
        camera.fov_y = settings.fov.to_radians();
        camera
    }

    pub fn build_scene(&self, settings: &TraceSettings) -> Scene {
        let arena = PortalArena::from_records(&self.portals);
        let mut scene = Scene::new(arena);
        scene.background = settings.background;
        for wall in &self.walls {
            scene.add_wall(wall.center, wall.half_extents, wall.material);
        }
        for solid in &self.boxes {
            scene.add_box(solid.center, solid.half_extents, solid.material);
        }
        for light in &self.lights {
            scene.add_light(*light);
        }
        info!(
            "Scene built: {} objects, {} portals, {} lights",
            scene.objects.len(),
            scene.arena.len(),
            scene.lights.len()
        );
        scene
    }
}
