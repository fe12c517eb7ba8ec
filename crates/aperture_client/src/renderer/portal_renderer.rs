use aperture_shared::arena::PortalArena;
use aperture_shared::portal::Portal;
use aperture_shared::settings::{PortalSettings, MAX_RENDER_RECURSION_DEPTH};
use aperture_shared::visibility::{relay_view, Camera, ClipDepth, RelayView};
use glam::{Mat4, Vec3};
use tracing::{debug, warn};

use crate::renderer::{DepthBias, PortalRenderBackend, QuadFill, ScenePass, StencilMode};

/// Outline quads are the portal quad grown by this factor; the stencil
/// keeps only the ring outside the portal itself.
const OUTLINE_SCALE: f32 = 1.15;
/// 8-bit stencil, zero is reserved for "no portal".
const MAX_STENCIL_SLOTS: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderState {
    Main,
    StencilWrite,
    StencilMaskedDraw,
    Done,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Portals the scene was drawn through.
    pub relayed: u32,
    /// Open portals facing away from the camera.
    pub culled: u32,
    /// Open portals whose relay was degenerate this frame; they are drawn
    /// solid instead.
    pub skipped: u32,
    /// Portals drawn as solid surfaces outside the relay passes.
    pub solid: u32,
}

struct Slot {
    reference: u32,
    relay: RelayView,
}

pub struct PortalRenderer {
    state: RenderState,
    recursion_depth: u32,
    depth_bias: DepthBias,
    clip_depth: ClipDepth,
}

impl PortalRenderer {
    pub fn new(settings: &PortalSettings, clip_depth: ClipDepth) -> Self {
        Self {
            state: RenderState::Done,
            recursion_depth: settings.render_recursion_depth.min(MAX_RENDER_RECURSION_DEPTH),
            depth_bias: DepthBias {
                constant: settings.stencil_depth_bias,
                slope_scale: settings.stencil_slope_bias,
            },
            clip_depth,
        }
    }

    pub fn state(&self) -> RenderState {
        self.state
    }

    pub fn recursion_depth(&self) -> u32 {
        self.recursion_depth
    }

    /// Draws one frame. `ghosts` are the model matrices of box copies
    /// standing in partner mouths (see `MovableBox::ghost_models`); they are
    /// drawn after every scene pass.
    pub fn render_frame<R: PortalRenderBackend>(
        &mut self,
        backend: &mut R,
        arena: &PortalArena,
        camera: &Camera,
        ghosts: &[Mat4],
    ) -> FrameStats {
        let mut stats = FrameStats::default();

        self.state = RenderState::Main;
        let solid = self.draw_main(backend, arena, camera, ghosts);
        stats.solid = solid;

        self.state = RenderState::StencilWrite;
        let slots = self.write_stencil(backend, arena, camera, &mut stats);

        self.state = RenderState::StencilMaskedDraw;
        for slot in &slots {
            backend.set_stencil(StencilMode::Equal {
                reference: slot.reference,
            });
            backend.clear_depth();
            backend.set_camera(slot.relay.view, slot.relay.projection);
            let pass = ScenePass::Relay {
                portal: slot.relay.portal,
            };
            backend.draw_scene(pass);
            draw_ghosts(backend, pass, ghosts);
            // Portals seen through a portal are not recursed into.
            for portal in arena.iter() {
                draw_solid(backend, portal);
            }
        }
        stats.relayed = slots.len() as u32;

        backend.set_stencil(StencilMode::Disabled);
        self.state = RenderState::Done;
        stats
    }

    fn draw_main<R: PortalRenderBackend>(
        &self,
        backend: &mut R,
        arena: &PortalArena,
        camera: &Camera,
        ghosts: &[Mat4],
    ) -> u32 {
        backend.set_stencil(StencilMode::Disabled);
        backend.set_depth_bias(None);
        backend.set_camera(camera.view_matrix(), camera.projection_matrix(self.clip_depth));
        backend.draw_scene(ScenePass::Main);
        draw_ghosts(backend, ScenePass::Main, ghosts);

        let mut solid = 0;
        for portal in arena.iter() {
            if self.recursion_depth > 0 && arena.is_traversable(portal.id()) {
                continue;
            }
            draw_solid(backend, portal);
            solid += 1;
        }
        solid
    }

    fn write_stencil<R: PortalRenderBackend>(
        &self,
        backend: &mut R,
        arena: &PortalArena,
        camera: &Camera,
        stats: &mut FrameStats,
    ) -> Vec<Slot> {
        let mut slots = Vec::new();
        if self.recursion_depth == 0 {
            return slots;
        }

        for portal in arena.iter().filter(|portal| arena.is_traversable(portal.id())) {
            if !portal.facing(camera.eye) {
                stats.culled += 1;
                continue;
            }
            if slots.len() == MAX_STENCIL_SLOTS {
                warn!("Out of stencil slots; portal {} not drawn", portal.id().0);
                break;
            }
            let Some(relay) = relay_view(arena, portal.id(), camera, self.clip_depth) else {
                debug!("Portal {} drawn solid this frame", portal.id().0);
                backend.set_stencil(StencilMode::Disabled);
                draw_solid(backend, portal);
                stats.skipped += 1;
                stats.solid += 1;
                continue;
            };

            let reference = slots.len() as u32 + 1;
            backend.set_stencil(StencilMode::Write { reference });
            backend.set_depth_bias(Some(self.depth_bias));
            backend.draw_portal_quad(portal.id(), portal.model_matrix(), QuadFill::Mask);
            backend.set_depth_bias(None);

            if let Some(outline) = portal.outline {
                backend.set_stencil(StencilMode::NotEqual { reference });
                backend.draw_outline(portal.id(), outline_model(portal), outline.color);
            }
            slots.push(Slot { reference, relay });
        }
        slots
    }
}

fn outline_model(portal: &Portal) -> Mat4 {
    portal.model_matrix() * Mat4::from_scale(Vec3::new(OUTLINE_SCALE, 1.0, OUTLINE_SCALE))
}

fn draw_ghosts<R: PortalRenderBackend>(backend: &mut R, pass: ScenePass, ghosts: &[Mat4]) {
    if !ghosts.is_empty() {
        backend.draw_ghosts(pass, ghosts);
    }
}

fn draw_solid<R: PortalRenderBackend>(backend: &mut R, portal: &Portal) {
    if let Some(outline) = portal.outline {
        backend.draw_outline(portal.id(), outline_model(portal), outline.color);
    }
    backend.draw_portal_quad(
        portal.id(),
        portal.model_matrix(),
        QuadFill::Solid {
            color: portal.color,
        },
    );
}

#[cfg(test)]
mod tests {
    use aperture_shared::arena::PortalArena;
    use aperture_shared::portal::{orientation_for_surface, PortalId, PortalOutline};
    use aperture_shared::settings::PortalSettings;
    use aperture_shared::visibility::{Camera, ClipDepth};
    use glam::{Mat4, Vec3};

    use super::{PortalRenderer, RenderState};
    use crate::renderer::{QuadFill, RecordingBackend, RenderCommand, ScenePass, StencilMode};

    fn pair(b_open: bool) -> PortalArena {
        let mut arena = PortalArena::new();
        let facing_z = orientation_for_surface(Vec3::Z, Vec3::Y).expect("orientation");
        let a = arena.insert(Vec3::ZERO, Vec3::ONE, facing_z);
        let b = arena.insert(Vec3::new(0.0, 0.0, 50.0), Vec3::ONE, facing_z);
        arena.link(a, b);
        arena.set_open(b, b_open);
        if let Some(portal) = arena.get_mut(a) {
            portal.outline = Some(PortalOutline {
                color: Vec3::new(1.0, 0.5, 0.0),
            });
        }
        arena
    }

    fn camera() -> Camera {
        Camera::new(Vec3::new(0.0, 1.0, 10.0), Vec3::ZERO, Vec3::Y, 1.0)
    }

    fn index_of(commands: &[RenderCommand], wanted: &RenderCommand) -> usize {
        commands
            .iter()
            .position(|command| command == wanted)
            .unwrap_or_else(|| panic!("missing {wanted:?}"))
    }

    fn stencil_reference_for(commands: &[RenderCommand], portal: PortalId) -> Option<u32> {
        let mut pending = None;
        for command in commands {
            match command {
                RenderCommand::SetStencil(StencilMode::Write { reference }) => pending = Some(*reference),
                RenderCommand::DrawPortalQuad {
                    portal: drawn,
                    fill: QuadFill::Mask,
                    ..
                } if *drawn == portal => return pending,
                _ => {}
            }
        }
        None
    }

    #[test]
    fn closed_pair_is_drawn_solid_without_relays() {
        let arena = pair(false);
        let mut renderer = PortalRenderer::new(&PortalSettings::default(), ClipDepth::ZeroToOne);
        let mut backend = RecordingBackend::new();

        let stats = renderer.render_frame(&mut backend, &arena, &camera(), &[]);

        assert_eq!(stats.relayed, 0);
        assert_eq!(stats.solid, 2);
        assert_eq!(backend.scene_passes(), vec![ScenePass::Main]);
        assert!(!backend
            .commands
            .iter()
            .any(|command| matches!(command, RenderCommand::SetStencil(StencilMode::Write { .. }))));
        assert_eq!(renderer.state(), RenderState::Done);
    }

    #[test]
    fn facing_portal_is_masked_then_drawn_through() {
        let arena = pair(true);
        let mut renderer = PortalRenderer::new(&PortalSettings::default(), ClipDepth::ZeroToOne);
        let mut backend = RecordingBackend::new();

        let stats = renderer.render_frame(&mut backend, &arena, &camera(), &[]);

        // B faces the same way as A, so the camera sits behind it.
        assert_eq!(stats.relayed, 1);
        assert_eq!(stats.culled, 1);
        assert_eq!(stats.solid, 0);
        assert_eq!(
            backend.scene_passes(),
            vec![ScenePass::Main, ScenePass::Relay { portal: PortalId(0) }]
        );

        let commands = &backend.commands;
        let write = index_of(commands, &RenderCommand::SetStencil(StencilMode::Write { reference: 1 }));
        let outline = index_of(commands, &RenderCommand::SetStencil(StencilMode::NotEqual { reference: 1 }));
        let masked = index_of(commands, &RenderCommand::SetStencil(StencilMode::Equal { reference: 1 }));
        let clear = index_of(commands, &RenderCommand::ClearDepth);
        let relay = index_of(commands, &RenderCommand::DrawScene(ScenePass::Relay { portal: PortalId(0) }));
        assert!(write < outline && outline < masked && masked < clear && clear < relay);
        assert_eq!(stencil_reference_for(commands, PortalId(0)), Some(1));
        assert_eq!(stencil_reference_for(commands, PortalId(1)), None);

        let solid_after_relay = commands[relay..]
            .iter()
            .filter(|command| {
                matches!(command, RenderCommand::DrawPortalQuad { fill: QuadFill::Solid { .. }, .. })
            })
            .count();
        assert_eq!(solid_after_relay, 2);
    }

    #[test]
    fn degenerate_relay_falls_back_to_solid() {
        let arena = pair(true);
        let mut renderer = PortalRenderer::new(&PortalSettings::default(), ClipDepth::ZeroToOne);
        let mut backend = RecordingBackend::new();
        // Up along the view axis leaves the relay camera without a basis.
        let camera = Camera::new(Vec3::new(0.0, 1.0, 10.0), Vec3::new(0.0, 1.0, 0.0), Vec3::Z, 1.0);

        let stats = renderer.render_frame(&mut backend, &arena, &camera, &[]);

        assert_eq!(stats.relayed, 0);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.solid, 1);
        assert_eq!(backend.scene_passes(), vec![ScenePass::Main]);
        assert!(backend.commands.iter().any(|command| matches!(
            command,
            RenderCommand::DrawPortalQuad {
                portal: PortalId(0),
                fill: QuadFill::Solid { .. },
                ..
            }
        )));
    }

    #[test]
    fn box_ghosts_follow_every_scene_pass() {
        let arena = pair(true);
        let mut renderer = PortalRenderer::new(&PortalSettings::default(), ClipDepth::ZeroToOne);
        let mut backend = RecordingBackend::new();
        let ghosts = [Mat4::from_translation(Vec3::new(0.0, 1.0, 50.5))];

        renderer.render_frame(&mut backend, &arena, &camera(), &ghosts);

        let drawn: Vec<ScenePass> = backend
            .commands
            .iter()
            .filter_map(|command| match command {
                RenderCommand::DrawGhosts { pass, models } => {
                    assert_eq!(models.as_slice(), &ghosts[..]);
                    Some(*pass)
                }
                _ => None,
            })
            .collect();
        assert_eq!(drawn, backend.scene_passes());

        let mut plain = RecordingBackend::new();
        renderer.render_frame(&mut plain, &arena, &camera(), &[]);
        assert!(!plain
            .commands
            .iter()
            .any(|command| matches!(command, RenderCommand::DrawGhosts { .. })));
    }

    #[test]
    fn zero_recursion_draws_open_portals_solid() {
        let arena = pair(true);
        let settings = PortalSettings {
            render_recursion_depth: 0,
            ..PortalSettings::default()
        };
        let mut renderer = PortalRenderer::new(&settings, ClipDepth::NegOneToOne);
        let mut backend = RecordingBackend::new();

        let stats = renderer.render_frame(&mut backend, &arena, &camera(), &[]);
        assert_eq!(stats.relayed, 0);
        assert_eq!(stats.solid, 2);
        assert_eq!(backend.scene_passes(), vec![ScenePass::Main]);
    }

    #[test]
    fn recursion_depth_is_clamped() {
        let settings = PortalSettings {
            render_recursion_depth: 9,
            ..PortalSettings::default()
        };
        let renderer = PortalRenderer::new(&settings, ClipDepth::ZeroToOne);
        assert_eq!(renderer.recursion_depth(), 1);
    }
}
