use std::cell::Cell;
use std::mem;
use std::num::NonZeroU64;

use aperture_shared::portal::PortalId;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};
use tracing::warn;

use crate::renderer::{DepthBias, PortalRenderBackend, QuadFill, ScenePass, StencilMode};

pub const PORTAL_DEPTH_STENCIL_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth24PlusStencil8;

/// Dynamic-offset stride; the WebGPU default for
/// `min_uniform_buffer_offset_alignment`.
const UNIFORM_SLOT_STRIDE: u64 = 256;
const CAMERA_SLOTS: u32 = 16;
const PARAMS_SLOTS: u32 = 256;

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct CameraUniform {
    pub view_proj: [[f32; 4]; 4],
}

impl CameraUniform {
    pub fn new(view: Mat4, projection: Mat4) -> Self {
        Self {
            view_proj: (projection * view).to_cols_array_2d(),
        }
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct PortalParamsUniform {
    pub model: [[f32; 4]; 4],
    /// Fill or outline color; alpha is always one.
    pub color: [f32; 4],
}

impl PortalParamsUniform {
    pub fn new(model: Mat4, color: Vec3) -> Self {
        Self {
            model: model.to_cols_array_2d(),
            color: color.extend(1.0).to_array(),
        }
    }
}

/// Stencil comparison used by a pipeline; the reference value itself is
/// set per draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StencilTest {
    Always,
    Equal,
    NotEqual,
}

impl StencilTest {
    pub fn for_mode(mode: StencilMode) -> Self {
        match mode {
            StencilMode::Disabled | StencilMode::Write { .. } => Self::Always,
            StencilMode::Equal { .. } => Self::Equal,
            StencilMode::NotEqual { .. } => Self::NotEqual,
        }
    }

    fn compare(self) -> wgpu::CompareFunction {
        match self {
            Self::Always => wgpu::CompareFunction::Always,
            Self::Equal => wgpu::CompareFunction::Equal,
            Self::NotEqual => wgpu::CompareFunction::NotEqual,
        }
    }

    fn index(self) -> usize {
        match self {
            Self::Always => 0,
            Self::Equal => 1,
            Self::NotEqual => 2,
        }
    }
}

fn stencil_state(compare: wgpu::CompareFunction, pass_op: wgpu::StencilOperation) -> wgpu::StencilState {
    let face = wgpu::StencilFaceState {
        compare,
        fail_op: wgpu::StencilOperation::Keep,
        depth_fail_op: wgpu::StencilOperation::Keep,
        pass_op,
    };
    wgpu::StencilState {
        front: face,
        back: face,
        read_mask: 0xff,
        write_mask: 0xff,
    }
}

/// Depth/stencil state for colored portal geometry under `test`.
pub fn solid_depth_stencil(test: StencilTest) -> wgpu::DepthStencilState {
    wgpu::DepthStencilState {
        format: PORTAL_DEPTH_STENCIL_FORMAT,
        depth_write_enabled: true,
        depth_compare: wgpu::CompareFunction::LessEqual,
        stencil: stencil_state(test.compare(), wgpu::StencilOperation::Keep),
        bias: wgpu::DepthBiasState::default(),
    }
}

/// Writes the reference into the stencil wherever the quad passes the depth
/// test, without touching depth.
pub fn mask_depth_stencil(bias: Option<DepthBias>) -> wgpu::DepthStencilState {
    let bias = bias.map_or_else(wgpu::DepthBiasState::default, |bias| wgpu::DepthBiasState {
        constant: bias.constant,
        slope_scale: bias.slope_scale,
        clamp: 0.0,
    });
    wgpu::DepthStencilState {
        format: PORTAL_DEPTH_STENCIL_FORMAT,
        depth_write_enabled: false,
        depth_compare: wgpu::CompareFunction::LessEqual,
        stencil: stencil_state(wgpu::CompareFunction::Always, wgpu::StencilOperation::Replace),
        bias,
    }
}

/// Pushes depth back to the far plane inside the stencil mask.
pub fn depth_reset_depth_stencil() -> wgpu::DepthStencilState {
    wgpu::DepthStencilState {
        format: PORTAL_DEPTH_STENCIL_FORMAT,
        depth_write_enabled: true,
        depth_compare: wgpu::CompareFunction::Always,
        stencil: stencil_state(wgpu::CompareFunction::Equal, wgpu::StencilOperation::Keep),
        bias: wgpu::DepthBiasState::default(),
    }
}

fn slot_offset(slot: u32) -> wgpu::DynamicOffset {
    (u64::from(slot) * UNIFORM_SLOT_STRIDE) as wgpu::DynamicOffset
}

/// Uniform buffer carved into fixed slots addressed by dynamic offset, so
/// every draw in a pass keeps its own values.
struct UniformRing {
    buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    capacity: u32,
    cursor: Cell<u32>,
}

impl UniformRing {
    fn new<T: Pod>(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        capacity: u32,
        label: &str,
    ) -> Self {
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: u64::from(capacity) * UNIFORM_SLOT_STRIDE,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &buffer,
                    offset: 0,
                    size: NonZeroU64::new(mem::size_of::<T>() as u64),
                }),
            }],
        });
        Self {
            buffer,
            bind_group,
            capacity,
            cursor: Cell::new(0),
        }
    }

    fn push<T: Pod>(&self, queue: &wgpu::Queue, value: &T) -> Option<wgpu::DynamicOffset> {
        let slot = self.cursor.get();
        if slot >= self.capacity {
            return None;
        }
        self.cursor.set(slot + 1);
        let offset = slot_offset(slot);
        queue.write_buffer(&self.buffer, u64::from(offset), bytemuck::bytes_of(value));
        Some(offset)
    }

    fn reset(&self) {
        self.cursor.set(0);
    }
}

fn uniform_layout<T>(device: &wgpu::Device, label: &str) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(label),
        entries: &[wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: true,
                min_binding_size: NonZeroU64::new(mem::size_of::<T>() as u64),
            },
            count: None,
        }],
    })
}

/// Pipelines and uniform storage for portal quads, outlines and the
/// in-mask depth reset.
pub struct PortalGpu {
    solid: [wgpu::RenderPipeline; 3],
    mask: wgpu::RenderPipeline,
    mask_biased: wgpu::RenderPipeline,
    depth_reset: wgpu::RenderPipeline,
    camera_ring: UniformRing,
    params_ring: UniformRing,
}

impl PortalGpu {
    pub fn new(device: &wgpu::Device, color_format: wgpu::TextureFormat, bias: DepthBias) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Portal Shader"),
            source: wgpu::ShaderSource::Wgsl(
                include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/portal.wgsl")).into(),
            ),
        });

        let camera_layout = uniform_layout::<CameraUniform>(device, "Portal Camera Bind Group Layout");
        let params_layout =
            uniform_layout::<PortalParamsUniform>(device, "Portal Params Bind Group Layout");
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Portal Pipeline Layout"),
            bind_group_layouts: &[&camera_layout, &params_layout],
            push_constant_ranges: &[],
        });

        let build = |label: &str,
                     vertex_entry: &str,
                     fragment_entry: &str,
                     write_mask: wgpu::ColorWrites,
                     depth_stencil: wgpu::DepthStencilState| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(label),
                layout: Some(&layout),
                vertex: wgpu::VertexState {
                    module: &shader,
                    entry_point: Some(vertex_entry),
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    buffers: &[],
                },
                fragment: Some(wgpu::FragmentState {
                    module: &shader,
                    entry_point: Some(fragment_entry),
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: color_format,
                        blend: None,
                        write_mask,
                    })],
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    strip_index_format: None,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: None,
                    unclipped_depth: false,
                    polygon_mode: wgpu::PolygonMode::Fill,
                    conservative: false,
                },
                depth_stencil: Some(depth_stencil),
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            })
        };

        let solid = [StencilTest::Always, StencilTest::Equal, StencilTest::NotEqual].map(|test| {
            build(
                "Portal Solid Pipeline",
                "vs_quad",
                "fs_solid",
                wgpu::ColorWrites::ALL,
                solid_depth_stencil(test),
            )
        });
        let mask = build(
            "Portal Mask Pipeline",
            "vs_quad",
            "fs_none",
            wgpu::ColorWrites::empty(),
            mask_depth_stencil(None),
        );
        let mask_biased = build(
            "Portal Biased Mask Pipeline",
            "vs_quad",
            "fs_none",
            wgpu::ColorWrites::empty(),
            mask_depth_stencil(Some(bias)),
        );
        let depth_reset = build(
            "Portal Depth Reset Pipeline",
            "vs_fullscreen",
            "fs_none",
            wgpu::ColorWrites::empty(),
            depth_reset_depth_stencil(),
        );

        Self {
            solid,
            mask,
            mask_biased,
            depth_reset,
            camera_ring: UniformRing::new::<CameraUniform>(
                device,
                &camera_layout,
                CAMERA_SLOTS,
                "Portal Camera Uniforms",
            ),
            params_ring: UniformRing::new::<PortalParamsUniform>(
                device,
                &params_layout,
                PARAMS_SLOTS,
                "Portal Params Uniforms",
            ),
        }
    }

    /// Rewinds the uniform slots; call once per frame before recording.
    pub fn begin_frame(&self) {
        self.camera_ring.reset();
        self.params_ring.reset();
    }
}

/// What the scene callback is asked to draw.
#[derive(Debug, Clone, Copy)]
pub enum SceneDraw<'m> {
    Scene(ScenePass),
    /// Box copies standing in partner mouths, one model matrix each.
    Ghosts { pass: ScenePass, models: &'m [Mat4] },
}

/// Drives one wgpu render pass for the portal renderer. Scene geometry and
/// ghost boxes are drawn by `draw_scene`, which gets the pass, what to draw,
/// and the stencil mode its own pipelines must honor.
pub struct GpuPortalBackend<'a, 'pass, S>
where
    S: FnMut(&mut wgpu::RenderPass<'pass>, SceneDraw<'_>, StencilMode, &CameraUniform),
{
    pass: &'a mut wgpu::RenderPass<'pass>,
    queue: &'a wgpu::Queue,
    gpu: &'a PortalGpu,
    draw_scene: S,
    stencil: StencilMode,
    biased: bool,
    camera: CameraUniform,
    camera_offset: Option<wgpu::DynamicOffset>,
}

impl<'a, 'pass, S> GpuPortalBackend<'a, 'pass, S>
where
    S: FnMut(&mut wgpu::RenderPass<'pass>, SceneDraw<'_>, StencilMode, &CameraUniform),
{
    pub fn new(
        pass: &'a mut wgpu::RenderPass<'pass>,
        queue: &'a wgpu::Queue,
        gpu: &'a PortalGpu,
        draw_scene: S,
    ) -> Self {
        Self {
            pass,
            queue,
            gpu,
            draw_scene,
            stencil: StencilMode::Disabled,
            biased: false,
            camera: CameraUniform::new(Mat4::IDENTITY, Mat4::IDENTITY),
            camera_offset: None,
        }
    }

    fn bind_draw(&mut self, pipeline: &'a wgpu::RenderPipeline, params: &PortalParamsUniform) -> bool {
        let Some(camera_offset) = self.camera_offset else {
            return false;
        };
        let Some(params_offset) = self.gpu.params_ring.push(self.queue, params) else {
            warn!("Portal params uniforms exhausted; dropping draw");
            return false;
        };
        self.pass.set_pipeline(pipeline);
        self.pass.set_stencil_reference(self.stencil.reference());
        self.pass.set_bind_group(0, &self.gpu.camera_ring.bind_group, &[camera_offset]);
        self.pass.set_bind_group(1, &self.gpu.params_ring.bind_group, &[params_offset]);
        true
    }

    fn solid_pipeline(&self) -> &'a wgpu::RenderPipeline {
        let gpu: &'a PortalGpu = self.gpu;
        &gpu.solid[StencilTest::for_mode(self.stencil).index()]
    }
}

impl<'a, 'pass, S> PortalRenderBackend for GpuPortalBackend<'a, 'pass, S>
where
    S: FnMut(&mut wgpu::RenderPass<'pass>, SceneDraw<'_>, StencilMode, &CameraUniform),
{
    fn set_camera(&mut self, view: Mat4, projection: Mat4) {
        self.camera = CameraUniform::new(view, projection);
        self.camera_offset = self.gpu.camera_ring.push(self.queue, &self.camera);
        if self.camera_offset.is_none() {
            warn!("Portal camera uniforms exhausted; later draws are dropped");
        }
    }

    fn set_stencil(&mut self, mode: StencilMode) {
        self.stencil = mode;
        self.pass.set_stencil_reference(mode.reference());
    }

    fn set_depth_bias(&mut self, bias: Option<DepthBias>) {
        self.biased = bias.is_some();
    }

    fn clear_depth(&mut self) {
        let params = PortalParamsUniform::new(Mat4::IDENTITY, Vec3::ZERO);
        let gpu = self.gpu;
        if self.bind_draw(&gpu.depth_reset, &params) {
            self.pass.draw(0..3, 0..1);
        }
    }

    fn draw_scene(&mut self, pass: ScenePass) {
        (self.draw_scene)(&mut *self.pass, SceneDraw::Scene(pass), self.stencil, &self.camera);
    }

    fn draw_ghosts(&mut self, pass: ScenePass, models: &[Mat4]) {
        (self.draw_scene)(&mut *self.pass, SceneDraw::Ghosts { pass, models }, self.stencil, &self.camera);
    }

    fn draw_portal_quad(&mut self, _portal: PortalId, model: Mat4, fill: QuadFill) {
        let gpu = self.gpu;
        let (pipeline, color) = match fill {
            QuadFill::Mask if self.biased => (&gpu.mask_biased, Vec3::ZERO),
            QuadFill::Mask => (&gpu.mask, Vec3::ZERO),
            QuadFill::Solid { color } => (self.solid_pipeline(), color),
        };
        if self.bind_draw(pipeline, &PortalParamsUniform::new(model, color)) {
            self.pass.draw(0..6, 0..1);
        }
    }

    fn draw_outline(&mut self, _portal: PortalId, model: Mat4, outline_color: Vec3) {
        let pipeline = self.solid_pipeline();
        if self.bind_draw(pipeline, &PortalParamsUniform::new(model, outline_color)) {
            self.pass.draw(0..6, 0..1);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::mem;

    use glam::{Mat4, Vec3};

    use super::{
        depth_reset_depth_stencil, mask_depth_stencil, slot_offset, solid_depth_stencil, CameraUniform,
        PortalParamsUniform, StencilTest, UNIFORM_SLOT_STRIDE,
    };
    use crate::renderer::{DepthBias, StencilMode};

    #[test]
    fn uniforms_fit_in_one_slot() {
        assert_eq!(mem::size_of::<CameraUniform>(), 64);
        assert_eq!(mem::size_of::<PortalParamsUniform>(), 80);
        assert!(mem::size_of::<PortalParamsUniform>() as u64 <= UNIFORM_SLOT_STRIDE);
        assert_eq!(slot_offset(3), 768);
    }

    #[test]
    fn params_carry_outline_color() {
        let params = PortalParamsUniform::new(Mat4::from_translation(Vec3::X), Vec3::new(1.0, 0.5, 0.0));
        assert_eq!(params.color, [1.0, 0.5, 0.0, 1.0]);
        assert_eq!(params.model[3], [1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn mask_replaces_stencil_without_writing_depth() {
        let state = mask_depth_stencil(Some(DepthBias {
            constant: -2,
            slope_scale: -1.0,
        }));
        assert!(!state.depth_write_enabled);
        assert_eq!(state.stencil.front.pass_op, wgpu::StencilOperation::Replace);
        assert_eq!(state.stencil.front.compare, wgpu::CompareFunction::Always);
        assert_eq!(state.bias.constant, -2);
        assert_eq!(mask_depth_stencil(None).bias.constant, 0);
    }

    #[test]
    fn stencil_modes_map_to_compare_functions() {
        assert_eq!(StencilTest::for_mode(StencilMode::Disabled), StencilTest::Always);
        assert_eq!(
            StencilTest::for_mode(StencilMode::Equal { reference: 2 }),
            StencilTest::Equal
        );
        let ring = solid_depth_stencil(StencilTest::for_mode(StencilMode::NotEqual { reference: 1 }));
        assert_eq!(ring.stencil.front.compare, wgpu::CompareFunction::NotEqual);
        assert_eq!(ring.stencil.front.pass_op, wgpu::StencilOperation::Keep);

        let reset = depth_reset_depth_stencil();
        assert_eq!(reset.depth_compare, wgpu::CompareFunction::Always);
        assert_eq!(reset.stencil.front.compare, wgpu::CompareFunction::Equal);
    }
}
