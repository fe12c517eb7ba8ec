use std::fmt;

use glam::{Quat, Vec3};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::lighting::{compute_portal_lights, PointLight, PortalLight};
use crate::physics::RaycastHit;
use crate::portal::{orientation_for_surface, Portal, PortalId, PortalOutline, MOUTH_HALF_EXTENT};
use crate::settings::PortalSettings;
use crate::transform::PortalTransform;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortalColor {
    Orange,
    Blue,
}

impl PortalColor {
    pub fn index(self) -> usize {
        match self {
            Self::Orange => 0,
            Self::Blue => 1,
        }
    }

    pub fn other(self) -> Self {
        match self {
            Self::Orange => Self::Blue,
            Self::Blue => Self::Orange,
        }
    }

    pub fn id(self) -> PortalId {
        PortalId(self.index())
    }

    pub fn outline_color(self) -> Vec3 {
        match self {
            Self::Orange => Vec3::new(1.0, 0.5, 0.0),
            Self::Blue => Vec3::new(0.0, 0.5, 1.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlacementError {
    UnknownPortal(PortalId),
    DegenerateSurface { normal: Vec3 },
    Overlaps { other: PortalId },
}

impl fmt::Display for PlacementError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownPortal(id) => write!(f, "no portal with id {}", id.0),
            Self::DegenerateSurface { normal } => {
                write!(f, "cannot orient a portal on surface normal {normal:?}")
            }
            Self::Overlaps { other } => {
                write!(f, "placement overlaps the mouth of portal {}", other.0)
            }
        }
    }
}

impl std::error::Error for PlacementError {}

/// A portal as listed in a level description. `rotation` is `[w, x, y, z]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortalRecord {
    pub id: u32,
    pub linked_id: u32,
    pub position: Vec3,
    #[serde(default = "default_record_scale")]
    pub scale: Vec3,
    #[serde(default = "default_record_rotation")]
    pub rotation: [f32; 4],
    #[serde(default = "default_record_open")]
    pub open: bool,
    #[serde(default)]
    pub outline: Option<Vec3>,
}

fn default_record_scale() -> Vec3 {
    Vec3::ONE
}

fn default_record_rotation() -> [f32; 4] {
    [1.0, 0.0, 0.0, 0.0]
}

fn default_record_open() -> bool {
    true
}

impl PortalRecord {
    pub fn orientation(&self) -> Quat {
        let [w, x, y, z] = self.rotation;
        Quat::from_xyzw(x, y, z, w)
    }
}

/// Owns every portal in the session. Partners are referenced by `PortalId`,
/// and links are kept symmetric by going through `link`/`unlink`.
#[derive(Debug, Clone, Default)]
pub struct PortalArena {
    portals: Vec<Portal>,
    scene_lights: Vec<PointLight>,
    light_settings: PortalSettings,
    portal_lights: Vec<PortalLight>,
}

impl PortalArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arena holding the linked orange/blue pair at ids 0 and 1, both closed
    /// until fired.
    pub fn with_player_portals() -> Self {
        let mut arena = Self::new();
        for color in [PortalColor::Orange, PortalColor::Blue] {
            let id = arena.insert(Vec3::ZERO, Vec3::ONE, Quat::IDENTITY);
            debug_assert_eq!(id, color.id());
            if let Some(portal) = arena.get_mut(id) {
                portal.open = false;
                portal.outline = Some(PortalOutline {
                    color: color.outline_color(),
                });
                portal.color = color.outline_color();
            }
        }
        arena.link(PortalColor::Orange.id(), PortalColor::Blue.id());
        arena
    }

    /// Builds world portals from level records. Each record gets the next
    /// id in listing order; a record whose `linked_id` names an earlier
    /// record is linked to it.
    pub fn from_records(records: &[PortalRecord]) -> Self {
        let mut arena = Self::new();
        let mut by_record: FxHashMap<u32, PortalId> = FxHashMap::default();

        for record in records {
            let id = arena.insert(record.position, record.scale, record.orientation());
            if let Some(portal) = arena.get_mut(id) {
                portal.open = record.open;
                portal.outline = record.outline.map(|color| PortalOutline { color });
            }
            if by_record.insert(record.id, id).is_some() {
                warn!("Duplicate portal record id {}; later entry wins", record.id);
            }

            if record.linked_id == record.id {
                warn!("Portal record {} links to itself; leaving it unlinked", record.id);
                continue;
            }
            if let Some(&partner) = by_record.get(&record.linked_id) {
                arena.link(id, partner);
            }
        }

        for (index, record) in records.iter().enumerate() {
            let id = PortalId(index);
            let linked = arena.get(id).and_then(Portal::linked);
            if linked.is_none() && record.linked_id != record.id && !by_record.contains_key(&record.linked_id) {
                warn!(
                    "Portal record {} links to missing id {}; leaving it unlinked",
                    record.id, record.linked_id
                );
            }
        }

        info!("Loaded {} portals from level records", arena.len());
        arena
    }

    pub fn insert(&mut self, position: Vec3, scale: Vec3, orientation: Quat) -> PortalId {
        let id = PortalId(self.portals.len());
        self.portals.push(Portal::new(id, position, scale, orientation));
        id
    }

    pub fn len(&self) -> usize {
        self.portals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.portals.is_empty()
    }

    pub fn get(&self, id: PortalId) -> Option<&Portal> {
        self.portals.get(id.0)
    }

    pub fn get_mut(&mut self, id: PortalId) -> Option<&mut Portal> {
        self.portals.get_mut(id.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Portal> {
        self.portals.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = PortalId> {
        (0..self.portals.len()).map(PortalId)
    }

    /// Links `a` and `b` to each other, detaching whatever either was
    /// linked to before.
    pub fn link(&mut self, a: PortalId, b: PortalId) {
        if a == b || self.get(a).is_none() || self.get(b).is_none() {
            warn!("Refusing to link portal {} with {}", a.0, b.0);
            return;
        }
        self.unlink(a);
        self.unlink(b);
        if let Some(portal) = self.get_mut(a) {
            portal.linked = Some(b);
        }
        if let Some(portal) = self.get_mut(b) {
            portal.linked = Some(a);
        }
        self.refresh_portal_lights();
    }

    pub fn unlink(&mut self, id: PortalId) {
        let previous = self.get_mut(id).and_then(|portal| portal.linked.take());
        if let Some(partner) = previous.and_then(|partner| self.get_mut(partner)) {
            if partner.linked == Some(id) {
                partner.linked = None;
            }
        }
        self.refresh_portal_lights();
    }

    pub fn linked(&self, id: PortalId) -> Option<&Portal> {
        self.get(id)
            .and_then(Portal::linked)
            .and_then(|partner| self.get(partner))
    }

    /// Open, linked, and the partner is open too.
    pub fn is_traversable(&self, id: PortalId) -> bool {
        let Some(portal) = self.get(id) else {
            return false;
        };
        portal.open && self.linked(id).is_some_and(|partner| partner.open)
    }

    /// Transform from `id` into its partner; `None` unless traversable.
    pub fn transform(&self, id: PortalId) -> Option<PortalTransform> {
        if !self.is_traversable(id) {
            return None;
        }
        let portal = self.get(id)?;
        let partner = self.linked(id)?;
        PortalTransform::between(portal, partner)
    }

    pub fn set_open(&mut self, id: PortalId, open: bool) {
        if let Some(portal) = self.get_mut(id) {
            portal.open = open;
        }
        self.refresh_portal_lights();
    }

    pub fn set_position(&mut self, id: PortalId, position: Vec3, orientation: Quat) {
        if let Some(portal) = self.get_mut(id) {
            portal.set_position(position, orientation);
        }
        self.refresh_portal_lights();
    }

    /// Scene lights that may shine through portals. Portal lights follow
    /// them from here on.
    pub fn set_scene_lights(&mut self, lights: &[PointLight]) {
        self.scene_lights = lights.to_vec();
        self.refresh_portal_lights();
    }

    pub fn set_light_settings(&mut self, settings: &PortalSettings) {
        self.light_settings = settings.clone();
        self.refresh_portal_lights();
    }

    pub fn scene_lights(&self) -> &[PointLight] {
        &self.scene_lights
    }

    pub fn light_settings(&self) -> &PortalSettings {
        &self.light_settings
    }

    pub fn portal_lights(&self) -> &[PortalLight] {
        &self.portal_lights
    }

    /// Rebuilds every portal light and stores the strongest one per portal
    /// in `Portal::intensity`.
    fn refresh_portal_lights(&mut self) {
        let lights = compute_portal_lights(self, &self.scene_lights, &self.light_settings);
        for portal in &mut self.portals {
            portal.intensity = lights
                .iter()
                .filter(|light| light.portal == portal.id())
                .map(|light| light.intensity)
                .fold(0.0, f32::max);
        }
        self.portal_lights = lights;
    }

    /// Moves `id` onto the surface a raycast hit, facing out along the hit
    /// normal with its up axis near `up_hint`, then opens it.
    pub fn fire(&mut self, id: PortalId, hit: &RaycastHit, up_hint: Vec3) -> Result<(), PlacementError> {
        if self.get(id).is_none() {
            return Err(PlacementError::UnknownPortal(id));
        }
        let orientation = orientation_for_surface(hit.normal, up_hint)
            .ok_or(PlacementError::DegenerateSurface { normal: hit.normal })?;

        if let Some(other) = self.overlapping_portal(id, hit.point) {
            debug!("Rejected placement of portal {} over portal {}", id.0, other.0);
            return Err(PlacementError::Overlaps { other });
        }

        let portal = self.get_mut(id).ok_or(PlacementError::UnknownPortal(id))?;
        portal.set_position(hit.point, orientation);
        portal.surface = Some(hit.actor);
        portal.open = true;
        self.refresh_portal_lights();
        info!(
            "Portal {} placed at ({:.2}, {:.2}, {:.2})",
            id.0, hit.point.x, hit.point.y, hit.point.z
        );
        Ok(())
    }

    /// First open portal other than `id` whose mouth would share volume with
    /// a mouth centered at `center`.
    fn overlapping_portal(&self, id: PortalId, center: Vec3) -> Option<PortalId> {
        self.portals
            .iter()
            .filter(|other| other.id() != id && other.open)
            .find(|other| {
                let delta = center - other.position();
                delta.dot(other.right()).abs() < 2.0 * MOUTH_HALF_EXTENT
                    && delta.dot(other.up()).abs() < 2.0 * MOUTH_HALF_EXTENT
                    && delta.dot(other.forward()).abs() < MOUTH_HALF_EXTENT
            })
            .map(Portal::id)
    }
}
