//! Seam to the host application's real-time 3D renderer.
//!
//! The crate does not own a GPU abstraction: it assumes an engine that
//! exposes camera objects (clonable and parentable), render targets,
//! command-buffer draw hooks and scene-node transforms. [`Engine`] is the
//! contract the compositing passes execute against; tests drive it with a
//! recording fake.

use serde::{Deserialize, Serialize};

use crate::error::StagelinkResult;
use crate::math::{Mat4, Quat, Vec3};
use crate::protocol::{RenderingPipelineKind, TextureColorSpace, TextureDevice, TransformRec};

/// Handle to a camera object owned by the host engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CameraId(pub u32);

/// Handle to a scene node (transform) owned by the host engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

/// Handle to a render target owned through [`Engine`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TargetId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MeshId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MaterialId(pub u32);

/// Opaque shader object reference, as handed out by a
/// [`ShaderSource`](crate::shaders::ShaderSource).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ShaderHandle(pub u64);

/// Static facts about a camera, re-read every frame (the rendering path can
/// change at runtime).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraInfo {
    pub near_clip: f32,
    pub far_clip: f32,
    pub vertical_fov: f32,
    pub pipeline: RenderingPipelineKind,
}

impl CameraInfo {
    pub fn is_deferred(&self) -> bool {
        self.pipeline == RenderingPipelineKind::Deferred
    }
}

/// Camera placement and projection for one pass.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraPose {
    /// Camera local-to-world, already composed with the stage transform.
    pub world: Mat4,
    pub projection: Mat4,
    pub layer_mask: u32,
}

/// Requested render target allocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TargetDesc {
    pub width: i32,
    pub height: i32,
    pub depth_bits: i32,
}

/// Procedural meshes the passes draw with.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MeshDesc {
    /// Full-screen quad.
    Quad,
    /// Tessellated quad used as the clip-plane surface.
    ClipPlane {
        cols: u32,
        rows: u32,
        extent: f32,
    },
    /// Unit box, used as the debug camera marker.
    Box { size: Vec3 },
}

/// Camera event a deferred draw is attached to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CameraHook {
    AfterForwardOpaque,
    BeforeImageEffects,
    AfterForwardAlpha,
    AfterEverything,
}

/// Global shader keywords toggled around the passes so shaders can
/// specialize for mixed-reality output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderKeyword {
    MixedReality,
    Background,
    Foreground,
}

/// Which color channels a material writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColorMask {
    All,
    Alpha,
}

/// Source/destination of a deferred blit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlitSurface {
    /// Whatever target is currently bound on the camera.
    Active,
    Target(TargetId),
}

/// Host engine contract. All calls are synchronous and cheap; none may block
/// indefinitely. Cleanup contracts:
///
/// - [`Engine::end_camera_render`] must restore the clear flags, background
///   color and bound target captured by the matching
///   [`Engine::begin_camera_render`].
/// - [`Engine::blit`] must leave the previously bound render target bound.
pub trait Engine {
    /// Host frame counter; drives interlacing parity and the pose lease.
    fn frame_count(&self) -> u64;

    /// Seconds since host startup, for the debug frame stamp.
    fn time_since_startup(&self) -> f64;

    /// Graphics device kind reported in published texture descriptors.
    fn device(&self) -> TextureDevice;

    // Scene graph -----------------------------------------------------------

    /// Clones a reference camera under an optional parent, stripping the
    /// named behaviours from the clone. The clone starts disabled; it only
    /// renders when the passes ask it to.
    fn clone_camera(
        &mut self,
        reference: CameraId,
        parent: Option<NodeId>,
        exclude_behaviours: &[String],
    ) -> StagelinkResult<CameraId>;

    fn destroy_camera(&mut self, camera: CameraId);

    fn camera_info(&self, camera: CameraId) -> StagelinkResult<CameraInfo>;

    fn set_camera_pose(&mut self, camera: CameraId, pose: &CameraPose);

    fn local_to_world(&self, node: NodeId) -> Mat4;

    fn world_to_local(&self, node: NodeId) -> Mat4;

    fn node_world_pose(&self, node: NodeId) -> (Vec3, Quat, Vec3);

    fn set_node_local(&mut self, node: NodeId, transform: &TransformRec);

    /// Local-to-world of the node a camera sits on.
    fn camera_local_to_world(&self, camera: CameraId) -> Mat4;

    // GPU resources ---------------------------------------------------------

    fn create_target(&mut self, desc: TargetDesc) -> StagelinkResult<TargetId>;

    fn destroy_target(&mut self, target: TargetId);

    /// Short-lived target from the engine's temporary pool; must be released
    /// the same frame.
    fn acquire_temp_target(&mut self, desc: TargetDesc) -> StagelinkResult<TargetId>;

    fn release_temp_target(&mut self, target: TargetId);

    fn native_texture(&self, target: TargetId) -> u64;

    fn target_color_space(&self, target: TargetId) -> TextureColorSpace;

    fn create_mesh(&mut self, desc: MeshDesc) -> MeshId;

    fn destroy_mesh(&mut self, mesh: MeshId);

    fn create_material(&mut self, shader: ShaderHandle) -> MaterialId;

    fn destroy_material(&mut self, material: MaterialId);

    fn set_material_color(&mut self, material: MaterialId, color: [f32; 4]);

    fn set_material_color_mask(&mut self, material: MaterialId, mask: ColorMask);

    fn set_material_texture(&mut self, material: MaterialId, target: TargetId);

    fn set_material_tessellation(&mut self, material: MaterialId, tessellation: f32);

    // Pass execution --------------------------------------------------------

    /// Binds a target and optionally switches the camera to a solid clear
    /// color, capturing the previous state.
    fn begin_camera_render(&mut self, camera: CameraId, target: TargetId, clear: Option<[f32; 4]>);

    /// Renders the scene through the camera, honouring enqueued hooks.
    fn render_camera(&mut self, camera: CameraId) -> StagelinkResult<()>;

    /// Restores the state captured by [`Engine::begin_camera_render`].
    fn end_camera_render(&mut self, camera: CameraId);

    /// Attaches a mesh draw to a camera event for the next render.
    fn enqueue_draw(
        &mut self,
        camera: CameraId,
        hook: CameraHook,
        mesh: MeshId,
        transform: Mat4,
        material: MaterialId,
    );

    /// Attaches a blit to a camera event for the next render.
    fn enqueue_blit(
        &mut self,
        camera: CameraId,
        hook: CameraHook,
        from: BlitSurface,
        to: BlitSurface,
        material: Option<MaterialId>,
    );

    /// Drops every hook previously enqueued on the camera.
    fn clear_hooks(&mut self, camera: CameraId);

    /// Immediate blit between targets.
    fn blit(&mut self, from: TargetId, to: TargetId, material: Option<MaterialId>);

    fn fog_color(&self) -> [f32; 4];

    fn set_fog_color(&mut self, color: [f32; 4]);

    fn set_shader_keyword(&mut self, keyword: ShaderKeyword, enabled: bool);

    /// One-shot mesh draw visible only to the given camera (debug marker).
    fn draw_gizmo(&mut self, camera: CameraId, mesh: MeshId, transform: Mat4, material: MaterialId);

    /// Burns a line of text into a target (debug frame stamp).
    fn draw_overlay_text(&mut self, target: TargetId, text: &str);
}
