use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Deepest portal-in-portal nesting the renderer supports.
pub const MAX_RENDER_RECURSION_DEPTH: u32 = 1;

const MIN_FALL_FLOOR: f32 = -10_000.0;
const MAX_FALL_FLOOR: f32 = 0.0;
const MAX_DEPTH_BIAS: i32 = 64;
const MAX_SLOPE_BIAS: f32 = 16.0;
const MIN_LIGHT_DISTANCE: f32 = 0.0;
const MAX_LIGHT_DISTANCE: f32 = 1_000.0;
const MIN_CUTOFF_DEGREES: f32 = 1.0;
const MAX_CUTOFF_DEGREES: f32 = 89.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortalSettings {
    /// Entities below this world height respawn.
    #[serde(default = "default_fall_floor")]
    pub fall_floor: f32,
    #[serde(default = "default_render_recursion_depth")]
    pub render_recursion_depth: u32,
    /// Depth bias applied when writing portal quads into the stencil.
    #[serde(default = "default_stencil_depth_bias")]
    pub stencil_depth_bias: i32,
    #[serde(default = "default_stencil_slope_bias")]
    pub stencil_slope_bias: f32,
    #[serde(default = "default_portal_light_min_distance")]
    pub portal_light_min_distance: f32,
    #[serde(default = "default_portal_light_max_distance")]
    pub portal_light_max_distance: f32,
    #[serde(default = "default_portal_light_inner_cutoff")]
    pub portal_light_inner_cutoff: f32,
    #[serde(default = "default_portal_light_outer_cutoff")]
    pub portal_light_outer_cutoff: f32,
}

impl Default for PortalSettings {
    fn default() -> Self {
        Self {
            fall_floor: default_fall_floor(),
            render_recursion_depth: default_render_recursion_depth(),
            stencil_depth_bias: default_stencil_depth_bias(),
            stencil_slope_bias: default_stencil_slope_bias(),
            portal_light_min_distance: default_portal_light_min_distance(),
            portal_light_max_distance: default_portal_light_max_distance(),
            portal_light_inner_cutoff: default_portal_light_inner_cutoff(),
            portal_light_outer_cutoff: default_portal_light_outer_cutoff(),
        }
    }
}

impl PortalSettings {
    pub fn sanitize(mut self) -> Self {
        self.fall_floor = self.fall_floor.clamp(MIN_FALL_FLOOR, MAX_FALL_FLOOR);
        self.render_recursion_depth = self.render_recursion_depth.min(MAX_RENDER_RECURSION_DEPTH);
        self.stencil_depth_bias = self.stencil_depth_bias.clamp(-MAX_DEPTH_BIAS, MAX_DEPTH_BIAS);
        self.stencil_slope_bias = self.stencil_slope_bias.clamp(-MAX_SLOPE_BIAS, MAX_SLOPE_BIAS);
        self.portal_light_min_distance = self
            .portal_light_min_distance
            .clamp(MIN_LIGHT_DISTANCE, MAX_LIGHT_DISTANCE);
        self.portal_light_max_distance = self
            .portal_light_max_distance
            .clamp(MIN_LIGHT_DISTANCE, MAX_LIGHT_DISTANCE);
        if self.portal_light_max_distance <= self.portal_light_min_distance {
            self.portal_light_max_distance = self.portal_light_min_distance + 1.0;
        }
        self.portal_light_inner_cutoff = self
            .portal_light_inner_cutoff
            .clamp(MIN_CUTOFF_DEGREES, MAX_CUTOFF_DEGREES);
        self.portal_light_outer_cutoff = self
            .portal_light_outer_cutoff
            .clamp(self.portal_light_inner_cutoff, MAX_CUTOFF_DEGREES);
        self
    }

    pub fn load(path: &Path) -> io::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let parsed = toml::from_str::<Self>(&contents).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("failed to deserialize portal settings: {e}"),
            )
        })?;
        Ok(parsed.sanitize())
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        let settings = self.clone().sanitize();
        let serialized = toml::to_string_pretty(&settings).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("failed to serialize portal settings: {e}"),
            )
        })?;
        fs::write(path, serialized)
    }

    /// Loads `path`, writing defaults back when it is missing or unreadable.
    pub fn load_or_create(path: &Path) -> Self {
        match Self::load(path) {
            Ok(settings) => settings,
            Err(err) => {
                if err.kind() != io::ErrorKind::NotFound {
                    warn!("Failed to load portal settings from {}: {err}", path.display());
                }
                let settings = Self::default();
                if let Err(save_err) = settings.save(path) {
                    warn!(
                        "Failed to write default portal settings to {}: {save_err}",
                        path.display()
                    );
                }
                settings
            }
        }
    }
}

fn default_fall_floor() -> f32 {
    -50.0
}

fn default_render_recursion_depth() -> u32 {
    1
}

fn default_stencil_depth_bias() -> i32 {
    -2
}

fn default_stencil_slope_bias() -> f32 {
    -1.0
}

fn default_portal_light_min_distance() -> f32 {
    5.0
}

fn default_portal_light_max_distance() -> f32 {
    30.0
}

fn default_portal_light_inner_cutoff() -> f32 {
    30.0
}

fn default_portal_light_outer_cutoff() -> f32 {
    45.0
}
