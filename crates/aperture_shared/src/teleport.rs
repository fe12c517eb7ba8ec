use glam::Vec3;
use tracing::{debug, info};

use crate::arena::PortalArena;
use crate::entity::{MovableBox, Player};
use crate::physics::RigidBody;
use crate::portal::PortalId;
use crate::settings::PortalSettings;
use crate::transform::PortalTransform;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TouchingEntry {
    pub portal: PortalId,
    /// Whether the reference point was in front of the portal when the set
    /// was built.
    pub facing: bool,
}

/// Traversable portals whose mouth volume holds an entity's reference
/// point, in ascending portal id order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TouchingSet {
    entries: Vec<TouchingEntry>,
}

impl TouchingSet {
    /// Rebuilds the set for `point` and hands back the previous one.
    pub fn rebuild(&mut self, arena: &PortalArena, point: Vec3) -> TouchingSet {
        let entries = arena
            .iter()
            .filter(|portal| arena.is_traversable(portal.id()) && portal.point_in_bounds(point))
            .map(|portal| TouchingEntry {
                portal: portal.id(),
                facing: portal.facing(point),
            })
            .collect();
        TouchingSet {
            entries: std::mem::replace(&mut self.entries, entries),
        }
    }

    pub fn contains(&self, portal: PortalId) -> bool {
        self.entries.iter().any(|entry| entry.portal == portal)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TouchingEntry> {
        self.entries.iter()
    }

    pub fn portals(&self) -> impl Iterator<Item = PortalId> + '_ {
        self.entries.iter().map(|entry| entry.portal)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Anything the teleport pass can move through a portal.
pub trait Teleportable {
    fn reference_point(&self) -> Vec3;
    fn touching(&self) -> &TouchingSet;
    fn touching_mut(&mut self) -> &mut TouchingSet;
    /// Moves position, orientation and velocity through `transform`.
    fn apply_transform(&mut self, transform: &PortalTransform);
    /// Back to the spawn pose with zero velocity and nothing touched.
    fn respawn(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepOutcome {
    Stayed,
    Crossed {
        from: PortalId,
        to: PortalId,
        transform: PortalTransform,
    },
    Respawned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeleportSubject {
    Player,
    Box(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeleportEvent {
    Crossed {
        subject: TeleportSubject,
        from: PortalId,
        to: PortalId,
    },
    Respawned {
        subject: TeleportSubject,
    },
}

#[derive(Debug, Clone)]
pub struct TeleportController {
    fall_floor: f32,
}

impl TeleportController {
    pub fn new(settings: &PortalSettings) -> Self {
        Self {
            fall_floor: settings.fall_floor,
        }
    }

    /// Runs the per-tick crossing test for one entity. At most one portal
    /// is crossed per call.
    pub fn step<E: Teleportable>(&self, arena: &PortalArena, entity: &mut E) -> StepOutcome {
        let point = entity.reference_point();
        if point.y < self.fall_floor {
            entity.respawn();
            return StepOutcome::Respawned;
        }

        let previous = entity.touching_mut().rebuild(arena, point);
        for entry in previous.iter() {
            let Some(portal) = arena.get(entry.portal) else {
                continue;
            };
            if portal.facing(point) {
                continue;
            }
            let Some(transform) = arena.transform(entry.portal) else {
                continue;
            };
            let Some(to) = portal.linked() else {
                continue;
            };

            entity.apply_transform(&transform);
            let arrived = entity.reference_point();
            entity.touching_mut().rebuild(arena, arrived);
            return StepOutcome::Crossed {
                from: entry.portal,
                to,
                transform,
            };
        }
        StepOutcome::Stayed
    }

    /// Teleport pass for one physics tick: the player first (carrying a
    /// held box along), then every box that is not being held.
    pub fn tick<B: RigidBody>(
        &self,
        arena: &PortalArena,
        player: &mut Player<B>,
        boxes: &mut [MovableBox<B>],
    ) -> Vec<TeleportEvent> {
        let mut events = Vec::new();

        match self.step(arena, player) {
            StepOutcome::Crossed {
                from,
                to,
                transform,
            } => {
                info!("Player crossed portal {} -> {}", from.0, to.0);
                if let Some(held) = player.held.as_mut() {
                    held.frame = transform.transform_matrix(held.frame);
                    if let Some(carried) = boxes.get_mut(held.box_index) {
                        carried.apply_transform(&transform);
                        let point = carried.reference_point();
                        carried.touching_mut().rebuild(arena, point);
                    }
                }
                events.push(TeleportEvent::Crossed {
                    subject: TeleportSubject::Player,
                    from,
                    to,
                });
            }
            StepOutcome::Respawned => {
                info!("Player fell below {:.1}; respawning", self.fall_floor);
                player.held = None;
                events.push(TeleportEvent::Respawned {
                    subject: TeleportSubject::Player,
                });
            }
            StepOutcome::Stayed => {}
        }

        let held_index = player.held.as_ref().map(|held| held.box_index);
        for (index, movable) in boxes.iter_mut().enumerate() {
            if held_index == Some(index) {
                let point = movable.reference_point();
                movable.touching_mut().rebuild(arena, point);
                continue;
            }
            let subject = TeleportSubject::Box(index);
            match self.step(arena, movable) {
                StepOutcome::Crossed { from, to, .. } => {
                    debug!("Box {index} crossed portal {} -> {}", from.0, to.0);
                    events.push(TeleportEvent::Crossed { subject, from, to });
                }
                StepOutcome::Respawned => {
                    events.push(TeleportEvent::Respawned { subject });
                }
                StepOutcome::Stayed => {}
            }
        }
        events
    }
}
