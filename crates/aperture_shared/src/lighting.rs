use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::arena::PortalArena;
use crate::portal::PortalId;
use crate::settings::PortalSettings;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointLight {
    pub position: Vec3,
    #[serde(default = "default_light_intensity")]
    pub intensity: Vec3,
}

fn default_light_intensity() -> Vec3 {
    Vec3::ONE
}

/// Light leaking out of a portal mouth from a scene light on the far side
/// of its partner. Radiates from the portal along its forward axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PortalLight {
    pub portal: PortalId,
    pub position: Vec3,
    pub direction: Vec3,
    pub intensity: f32,
    pub color: Vec3,
    /// The scene light feeding this one.
    pub source: Vec3,
    /// Where the source light appears to be when seen through the portal.
    pub virtual_position: Vec3,
}

impl PortalLight {
    /// Spotlight cone weight in `[0, 1]` for `point`.
    pub fn cone_factor(&self, point: Vec3, settings: &PortalSettings) -> f32 {
        let to_point = (point - self.position).normalize_or_zero();
        let cos_angle = to_point.dot(self.direction);
        let cos_inner = settings.portal_light_inner_cutoff.to_radians().cos();
        let cos_outer = settings.portal_light_outer_cutoff.to_radians().cos();
        let span = cos_inner - cos_outer;
        if span <= f32::EPSILON {
            return if cos_angle >= cos_inner { 1.0 } else { 0.0 };
        }
        ((cos_angle - cos_outer) / span).clamp(0.0, 1.0)
    }

    pub fn radiance_at(&self, point: Vec3, settings: &PortalSettings) -> Vec3 {
        self.color * self.intensity * self.cone_factor(point, settings)
    }
}

/// 1 up to `min`, 0 from `max`, linear in between.
pub fn distance_falloff(distance: f32, min: f32, max: f32) -> f32 {
    if max <= min {
        return if distance <= min { 1.0 } else { 0.0 };
    }
    (1.0 - (distance - min) / (max - min)).clamp(0.0, 1.0)
}

/// One light per traversable portal and scene light facing its partner
/// that is close enough to reach it. Ordered by portal id, then by the
/// order of `lights`.
pub fn compute_portal_lights(
    arena: &PortalArena,
    lights: &[PointLight],
    settings: &PortalSettings,
) -> Vec<PortalLight> {
    let mut portal_lights = Vec::new();
    for portal in arena.iter() {
        let Some(exit) = arena.linked(portal.id()) else {
            continue;
        };
        // Light entering the partner comes out of `portal`.
        let Some(into_portal) = arena.transform(exit.id()) else {
            continue;
        };

        for light in lights.iter().filter(|light| exit.facing(light.position)) {
            let intensity = distance_falloff(
                light.position.distance(exit.position()),
                settings.portal_light_min_distance,
                settings.portal_light_max_distance,
            );
            if intensity <= 0.0 {
                continue;
            }
            portal_lights.push(PortalLight {
                portal: portal.id(),
                position: portal.position(),
                direction: portal.forward(),
                intensity,
                color: light.intensity,
                source: light.position,
                virtual_position: into_portal.transform_point(light.position),
            });
        }
    }
    portal_lights
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::{distance_falloff, PointLight};
    use crate::arena::PortalArena;
    use crate::physics::{ActorHandle, RaycastHit};
    use crate::portal::{orientation_for_surface, PortalId};

    #[test]
    fn falloff_is_linear_between_bounds() {
        assert_eq!(distance_falloff(2.0, 5.0, 30.0), 1.0);
        assert_eq!(distance_falloff(30.0, 5.0, 30.0), 0.0);
        assert!((distance_falloff(17.5, 5.0, 30.0) - 0.5).abs() < 1e-6);
        assert_eq!(distance_falloff(100.0, 5.0, 30.0), 0.0);
    }

    fn pair() -> PortalArena {
        let mut arena = PortalArena::new();
        let facing_z = orientation_for_surface(Vec3::Z, Vec3::Y).expect("orientation");
        let facing_neg_z = orientation_for_surface(Vec3::NEG_Z, Vec3::Y).expect("orientation");
        let a = arena.insert(Vec3::ZERO, Vec3::ONE, facing_z);
        let b = arena.insert(Vec3::new(0.0, 0.0, 50.0), Vec3::ONE, facing_neg_z);
        arena.link(a, b);
        arena
    }

    #[test]
    fn light_in_front_of_partner_shines_out_of_portal() {
        let mut arena = pair();
        arena.set_scene_lights(&[PointLight {
            position: Vec3::new(0.0, 0.0, 40.0),
            intensity: Vec3::new(1.0, 0.9, 0.8),
        }]);
        let settings = arena.light_settings().clone();

        let from_a = arena
            .portal_lights()
            .iter()
            .find(|light| light.portal == PortalId(0))
            .copied()
            .expect("portal a relays the light");

        assert!((from_a.intensity - 0.8).abs() < 1e-5);
        assert!(from_a.direction.abs_diff_eq(Vec3::Z, 1e-5));
        assert_eq!(from_a.source, Vec3::new(0.0, 0.0, 40.0));
        assert!(from_a.virtual_position.abs_diff_eq(Vec3::new(0.0, 0.0, -10.0), 1e-4));
        assert!((arena.get(PortalId(0)).expect("exists").intensity - 0.8).abs() < 1e-5);

        let on_axis = from_a.radiance_at(Vec3::new(0.0, 0.0, 10.0), &settings);
        let outside_cone = from_a.radiance_at(Vec3::new(10.0, 0.0, 1.0), &settings);
        assert!(on_axis.x > 0.0);
        assert_eq!(outside_cone, Vec3::ZERO);
    }

    #[test]
    fn closing_a_portal_drops_its_lights() {
        let mut arena = pair();
        arena.set_scene_lights(&[PointLight {
            position: Vec3::new(0.0, 0.0, 45.0),
            intensity: Vec3::ONE,
        }]);
        assert!(!arena.portal_lights().is_empty());

        arena.set_open(PortalId(1), false);
        assert!(arena.portal_lights().is_empty());
        assert!(arena.iter().all(|portal| portal.intensity == 0.0));
    }

    #[test]
    fn firing_a_portal_refreshes_its_light() {
        let mut arena = pair();
        arena.set_scene_lights(&[PointLight {
            position: Vec3::new(0.0, 0.0, 35.0),
            intensity: Vec3::ONE,
        }]);
        let before = arena.get(PortalId(0)).expect("exists").intensity;
        assert!((before - 0.6).abs() < 1e-5);

        // Move B next to the light: A now relays it at full strength.
        let hit = RaycastHit {
            point: Vec3::new(0.0, 0.0, 37.0),
            normal: Vec3::NEG_Z,
            actor: ActorHandle(9),
            distance: 1.0,
        };
        arena.fire(PortalId(1), &hit, Vec3::Y).expect("placement");
        let after = arena.get(PortalId(0)).expect("exists").intensity;
        assert_eq!(after, 1.0);
        let light = arena.portal_lights().first().expect("relayed light");
        assert!(light.virtual_position.abs_diff_eq(Vec3::new(0.0, 0.0, -2.0), 1e-4));
    }
}
