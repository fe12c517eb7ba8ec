pub mod gpu;
pub mod portal_renderer;

use aperture_shared::portal::PortalId;
use glam::{Mat4, Vec3};

/// Stencil test/op pair for the draws that follow. References are the
/// 1-based portal slot numbers assigned during the stencil write pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StencilMode {
    Disabled,
    /// Always pass, replace the stencil value with `reference`.
    Write { reference: u32 },
    /// Draw only where the stencil equals `reference`.
    Equal { reference: u32 },
    /// Draw only where the stencil differs from `reference`.
    NotEqual { reference: u32 },
}

impl StencilMode {
    pub fn reference(self) -> u32 {
        match self {
            Self::Disabled => 0,
            Self::Write { reference } | Self::Equal { reference } | Self::NotEqual { reference } => {
                reference
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthBias {
    pub constant: i32,
    pub slope_scale: f32,
}

/// Which camera the scene is being drawn for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenePass {
    Main,
    Relay { portal: PortalId },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum QuadFill {
    /// Stencil only, color writes off.
    Mask,
    Solid { color: Vec3 },
}

/// What the portal renderer needs from the graphics layer.
pub trait PortalRenderBackend {
    fn set_camera(&mut self, view: Mat4, projection: Mat4);
    fn set_stencil(&mut self, mode: StencilMode);
    fn set_depth_bias(&mut self, bias: Option<DepthBias>);
    /// Resets depth to the far plane wherever the current stencil test
    /// passes.
    fn clear_depth(&mut self);
    fn draw_scene(&mut self, pass: ScenePass);
    /// Movable-box copies on the far side of portals the boxes sit in,
    /// drawn with the same camera and stencil as the scene pass.
    fn draw_ghosts(&mut self, pass: ScenePass, models: &[Mat4]);
    fn draw_portal_quad(&mut self, portal: PortalId, model: Mat4, fill: QuadFill);
    fn draw_outline(&mut self, portal: PortalId, model: Mat4, outline_color: Vec3);
}

#[derive(Debug, Clone, PartialEq)]
pub enum RenderCommand {
    SetCamera { view: Mat4, projection: Mat4 },
    SetStencil(StencilMode),
    SetDepthBias(Option<DepthBias>),
    ClearDepth,
    DrawScene(ScenePass),
    DrawGhosts { pass: ScenePass, models: Vec<Mat4> },
    DrawPortalQuad { portal: PortalId, model: Mat4, fill: QuadFill },
    DrawOutline { portal: PortalId, model: Mat4, outline_color: Vec3 },
}

/// Backend that only records the calls it receives. Used for headless
/// runs and for checking pass ordering.
#[derive(Debug, Default)]
pub struct RecordingBackend {
    pub commands: Vec<RenderCommand>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scene_passes(&self) -> Vec<ScenePass> {
        self.commands
            .iter()
            .filter_map(|command| match command {
                RenderCommand::DrawScene(pass) => Some(*pass),
                _ => None,
            })
            .collect()
    }
}

impl PortalRenderBackend for RecordingBackend {
    fn set_camera(&mut self, view: Mat4, projection: Mat4) {
        self.commands.push(RenderCommand::SetCamera { view, projection });
    }

    fn set_stencil(&mut self, mode: StencilMode) {
        self.commands.push(RenderCommand::SetStencil(mode));
    }

    fn set_depth_bias(&mut self, bias: Option<DepthBias>) {
        self.commands.push(RenderCommand::SetDepthBias(bias));
    }

    fn clear_depth(&mut self) {
        self.commands.push(RenderCommand::ClearDepth);
    }

    fn draw_scene(&mut self, pass: ScenePass) {
        self.commands.push(RenderCommand::DrawScene(pass));
    }

    fn draw_ghosts(&mut self, pass: ScenePass, models: &[Mat4]) {
        self.commands.push(RenderCommand::DrawGhosts {
            pass,
            models: models.to_vec(),
        });
    }

    fn draw_portal_quad(&mut self, portal: PortalId, model: Mat4, fill: QuadFill) {
        self.commands.push(RenderCommand::DrawPortalQuad { portal, model, fill });
    }

    fn draw_outline(&mut self, portal: PortalId, model: Mat4, outline_color: Vec3) {
        self.commands.push(RenderCommand::DrawOutline {
            portal,
            model,
            outline_color,
        });
    }
}
