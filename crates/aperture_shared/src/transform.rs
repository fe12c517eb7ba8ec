use std::f32::consts::PI;

use glam::{Mat3, Mat4, Quat, Vec3};
use tracing::debug;

use crate::physics::Pose;
use crate::portal::Portal;

/// Rigid map from one portal's frame into its partner's frame.
///
/// Built as `Translate(L.pos) * Rotate(PI, L.up) * Rotate(L.q) * Rotate(P.q^-1) * Translate(-P.pos)`,
/// applied right to left. Stepping into `P` from its front comes out of
/// `L` from its front, so the transform for the reverse direction is the
/// inverse of this one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PortalTransform {
    matrix: Mat4,
}

impl PortalTransform {
    /// Transform for crossing `entered` and arriving at `exit`. The two
    /// portals must be linked; degenerate input yields `None`.
    pub fn between(entered: &Portal, exit: &Portal) -> Option<Self> {
        debug_assert_eq!(
            entered.linked(),
            Some(exit.id()),
            "portal transform requested for an unlinked pair"
        );
        if entered.linked() != Some(exit.id()) {
            return None;
        }

        let matrix = Mat4::from_translation(exit.position())
            * Mat4::from_quat(Quat::from_axis_angle(exit.up(), PI))
            * Mat4::from_quat(exit.orientation())
            * Mat4::from_quat(entered.orientation().inverse())
            * Mat4::from_translation(-entered.position());

        if !matrix.is_finite() {
            debug!(
                "Skipping degenerate transform {:?} -> {:?}",
                entered.id(),
                exit.id()
            );
            return None;
        }
        Some(Self { matrix })
    }

    pub fn matrix(&self) -> Mat4 {
        self.matrix
    }

    pub fn transform_point(&self, point: Vec3) -> Vec3 {
        self.matrix.transform_point3(point)
    }

    pub fn transform_direction(&self, direction: Vec3) -> Vec3 {
        self.matrix.transform_vector3(direction)
    }

    pub fn rotation(&self) -> Quat {
        Quat::from_mat3(&Mat3::from_mat4(self.matrix)).normalize()
    }

    pub fn transform_orientation(&self, orientation: Quat) -> Quat {
        (self.rotation() * orientation).normalize()
    }

    pub fn transform_pose(&self, pose: Pose) -> Pose {
        Pose::new(
            self.transform_point(pose.position),
            self.transform_orientation(pose.orientation),
        )
    }

    /// Carries a world-space frame (a held item's hold frame, a ghost model)
    /// through the portal.
    pub fn transform_matrix(&self, frame: Mat4) -> Mat4 {
        self.matrix * frame
    }

    pub fn inverse(&self) -> Self {
        Self {
            matrix: self.matrix.inverse(),
        }
    }
}

#[cfg(test)]
mod tests {
    use glam::{Mat4, Quat, Vec3};

    use super::PortalTransform;
    use crate::portal::{orientation_for_surface, Portal, PortalId};

    fn approx_vec(a: Vec3, b: Vec3) -> bool {
        a.abs_diff_eq(b, 1e-4)
    }

    fn linked_pair(a_pos: Vec3, a_rot: Quat, b_pos: Vec3, b_rot: Quat) -> (Portal, Portal) {
        let mut a = Portal::new(PortalId(0), a_pos, Vec3::ONE, a_rot);
        let mut b = Portal::new(PortalId(1), b_pos, Vec3::ONE, b_rot);
        a.linked = Some(b.id());
        b.linked = Some(a.id());
        (a, b)
    }

    fn facing(normal: Vec3) -> Quat {
        orientation_for_surface(normal, Vec3::Y).expect("valid facing")
    }

    #[test]
    fn round_trip_is_identity() {
        let a_rot = Quat::from_euler(glam::EulerRot::YXZ, 0.3, -0.7, 0.2);
        let b_rot = Quat::from_euler(glam::EulerRot::YXZ, -1.1, 0.4, 2.0);
        let (a, b) = linked_pair(Vec3::new(3.0, -2.0, 7.0), a_rot, Vec3::new(-5.0, 4.0, 1.5), b_rot);

        let there = PortalTransform::between(&a, &b).expect("linked");
        let back = PortalTransform::between(&b, &a).expect("linked");
        let round_trip = back.matrix() * there.matrix();
        assert!(round_trip.abs_diff_eq(Mat4::IDENTITY, 1e-4));

        let point = Vec3::new(0.5, 9.0, -3.0);
        assert!(approx_vec(back.transform_point(there.transform_point(point)), point));
        assert!(back.inverse().matrix().abs_diff_eq(there.matrix(), 1e-4));
    }

    #[test]
    fn entering_forward_exits_along_partner_forward() {
        let (a, b) = linked_pair(
            Vec3::ZERO,
            facing(Vec3::Z),
            Vec3::new(4.0, 0.0, -9.0),
            facing(Vec3::X),
        );
        let t = PortalTransform::between(&a, &b).expect("linked");

        // Walking into A means moving against its forward axis.
        let exit_dir = t.transform_direction(-a.forward());
        assert!(approx_vec(exit_dir, b.forward()));
        assert!(approx_vec(t.transform_point(a.position()), b.position()));

        let just_behind_a = a.position() - a.forward() * 0.25;
        assert!(b.facing(t.transform_point(just_behind_a)));
    }

    #[test]
    fn crossing_between_parallel_portals() {
        let (a, b) = linked_pair(
            Vec3::ZERO,
            facing(Vec3::Z),
            Vec3::new(0.0, 0.0, 50.0),
            facing(Vec3::Z),
        );
        let t = PortalTransform::between(&a, &b).expect("linked");

        let position = t.transform_point(Vec3::new(0.0, 1.0, -0.1));
        let velocity = t.transform_direction(Vec3::new(0.0, 0.0, 5.0));
        assert!(approx_vec(position, Vec3::new(0.0, 1.0, 50.1)));
        assert!(approx_vec(velocity, Vec3::new(0.0, 0.0, -5.0)));
    }

    #[test]
    fn opposite_facing_portals_translate_only() {
        let (a, b) = linked_pair(
            Vec3::ZERO,
            facing(Vec3::Z),
            Vec3::new(0.0, 0.0, 50.0),
            facing(Vec3::NEG_Z),
        );
        let t = PortalTransform::between(&a, &b).expect("linked");

        let velocity = t.transform_direction(Vec3::new(0.0, 0.0, -5.0));
        assert!(approx_vec(velocity, Vec3::new(0.0, 0.0, -5.0)));
        assert!(approx_vec(
            t.transform_point(Vec3::new(0.0, 1.0, -0.1)),
            Vec3::new(0.0, 1.0, 49.9)
        ));
    }

    #[test]
    fn orientation_follows_rotation_part() {
        let (a, b) = linked_pair(
            Vec3::ZERO,
            facing(Vec3::Z),
            Vec3::new(10.0, 0.0, 0.0),
            facing(Vec3::X),
        );
        let t = PortalTransform::between(&a, &b).expect("linked");
        let look = Quat::IDENTITY;
        let carried = t.transform_orientation(look);
        assert!(approx_vec(carried * Vec3::NEG_Z, t.transform_direction(Vec3::NEG_Z)));
    }
}
