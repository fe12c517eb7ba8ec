use rustc_hash::FxHashMap;
use tracing::trace;

use crate::arena::PortalArena;
use crate::physics::{ActorHandle, ContactPair};
use crate::teleport::TouchingSet;

/// Contact-modification hook: drops contacts between an entity and the wall
/// behind a portal it is passing through.
pub struct ContactFilter<'a> {
    arena: &'a PortalArena,
    touching: FxHashMap<ActorHandle, &'a TouchingSet>,
}

impl<'a> ContactFilter<'a> {
    pub fn new(arena: &'a PortalArena) -> Self {
        Self {
            arena,
            touching: FxHashMap::default(),
        }
    }

    /// Registers the touching set owned by the entity behind `actor`.
    pub fn register(&mut self, actor: ActorHandle, touching: &'a TouchingSet) {
        self.touching.insert(actor, touching);
    }

    /// Marks ignored points in `pair` and returns how many were newly
    /// ignored.
    pub fn modify(&self, pair: &mut ContactPair) -> usize {
        let [first, second] = pair.actors;
        let mut ignored = 0;

        for (owner, other) in [(first, second), (second, first)] {
            let Some(touching) = self.touching.get(&owner) else {
                continue;
            };
            // A portal whose partner is closed is an ordinary wall.
            let live = touching
                .portals()
                .filter(|id| self.arena.is_traversable(*id))
                .filter_map(|id| self.arena.get(id));
            for portal in live {
                for point in pair.points.iter_mut().filter(|point| !point.ignored) {
                    let against_surface = portal.surface == Some(other);
                    if portal.point_in_side_bounds(point.position)
                        && (against_surface || !portal.facing(point.position))
                    {
                        point.ignored = true;
                        ignored += 1;
                    }
                }
            }
        }

        if ignored > 0 {
            trace!(
                "Ignored {ignored} contacts between actors {} and {}",
                first.0,
                second.0
            );
        }
        ignored
    }
}
