use glam::{Mat4, Vec3};

use crate::arena::PortalArena;
use crate::physics::{KinematicBody, Pose, RigidBody};
use crate::teleport::{Teleportable, TouchingSet};
use crate::transform::PortalTransform;
use crate::visibility::Camera;

/// A box the player is carrying, and the world frame it is held at.
#[derive(Debug, Clone, PartialEq)]
pub struct HeldItem {
    pub box_index: usize,
    pub frame: Mat4,
}

#[derive(Debug, Clone)]
pub struct Player<B = KinematicBody> {
    pub body: B,
    pub look_direction: Vec3,
    pub up: Vec3,
    pub eye_height: f32,
    pub held: Option<HeldItem>,
    pub touching: TouchingSet,
    spawn: Pose,
    spawn_look: Vec3,
}

impl<B: RigidBody> Player<B> {
    /// Spawns where `body` currently stands, looking down -Z.
    pub fn new(body: B, eye_height: f32) -> Self {
        let spawn = body.pose();
        Self {
            body,
            look_direction: Vec3::NEG_Z,
            up: Vec3::Y,
            eye_height,
            held: None,
            touching: TouchingSet::default(),
            spawn,
            spawn_look: Vec3::NEG_Z,
        }
    }

    pub fn eye(&self) -> Vec3 {
        self.body.pose().position + self.up * self.eye_height
    }

    pub fn camera(&self, aspect: f32) -> Camera {
        let eye = self.eye();
        Camera::new(eye, eye + self.look_direction, self.up, aspect)
    }
}

impl<B: RigidBody> Teleportable for Player<B> {
    fn reference_point(&self) -> Vec3 {
        self.body.pose().position
    }

    fn touching(&self) -> &TouchingSet {
        &self.touching
    }

    fn touching_mut(&mut self) -> &mut TouchingSet {
        &mut self.touching
    }

    fn apply_transform(&mut self, transform: &PortalTransform) {
        carry_body(&mut self.body, transform);
        self.look_direction = transform
            .transform_direction(self.look_direction)
            .normalize_or(self.look_direction);
        self.up = transform.transform_direction(self.up).normalize_or(self.up);
    }

    fn respawn(&mut self) {
        self.body.set_pose(self.spawn);
        self.body.set_linear_velocity(Vec3::ZERO);
        self.look_direction = self.spawn_look;
        self.up = Vec3::Y;
        self.touching.clear();
    }
}

#[derive(Debug, Clone)]
pub struct MovableBox<B = KinematicBody> {
    pub body: B,
    pub half_extents: Vec3,
    pub touching: TouchingSet,
    spawn: Pose,
}

impl<B: RigidBody> MovableBox<B> {
    pub fn new(body: B, half_extents: Vec3) -> Self {
        let spawn = body.pose();
        Self {
            body,
            half_extents,
            touching: TouchingSet::default(),
            spawn,
        }
    }

    pub fn model_matrix(&self) -> Mat4 {
        let pose = self.body.pose();
        Mat4::from_scale_rotation_translation(self.half_extents * 2.0, pose.orientation, pose.position)
    }

    /// Copies of the box drawn on the far side of every traversable portal
    /// whose mouth it is inside.
    pub fn ghost_models(&self, arena: &PortalArena) -> Vec<Mat4> {
        let model = self.model_matrix();
        self.touching
            .portals()
            .filter_map(|portal| arena.transform(portal))
            .map(|transform| transform.transform_matrix(model))
            .collect()
    }
}

impl<B: RigidBody> Teleportable for MovableBox<B> {
    fn reference_point(&self) -> Vec3 {
        self.body.pose().position
    }

    fn touching(&self) -> &TouchingSet {
        &self.touching
    }

    fn touching_mut(&mut self) -> &mut TouchingSet {
        &mut self.touching
    }

    fn apply_transform(&mut self, transform: &PortalTransform) {
        carry_body(&mut self.body, transform);
    }

    fn respawn(&mut self) {
        self.body.set_pose(self.spawn);
        self.body.set_linear_velocity(Vec3::ZERO);
        self.touching.clear();
    }
}

fn carry_body<B: RigidBody>(body: &mut B, transform: &PortalTransform) {
    let pose = transform.transform_pose(body.pose());
    let velocity = transform.transform_direction(body.linear_velocity());
    body.set_pose(pose);
    body.set_linear_velocity(velocity);
}
