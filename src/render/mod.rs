//! Mixed-reality spectator rendering.
//!
//! [`MixedRealityRenderer`] owns everything a live session needs: the cloned
//! spectator camera, the procedural meshes and materials the passes draw
//! with, the render targets handed to the compositor and the pose lease. Its
//! [`render`](MixedRealityRenderer::render) method runs the whole per-frame
//! sequence at end of frame.

pub mod debug;
pub mod exec;
pub mod plan;
pub mod targets;

use tracing::{error, trace};

use crate::arbiter::FrameArbiter;
use crate::bridge::BridgeChannel;
use crate::engine::{CameraId, Engine, MeshDesc};
use crate::error::{StagelinkError, StagelinkResult};
use crate::hooks::{FrameContext, RenderHooks};
use crate::math::{Mat4, Quat, Vec3};
use crate::protocol::{
    Features, GAME_RANK, GroundPlane, InputFrame, OutputFrame, Pose, Resolution, TrackedSpace,
};
use crate::render::exec::{MaterialSet, MeshSet, PassContext, execute_pass};
use crate::render::plan::{PlanInputs, TargetRole, compile};
use crate::render::targets::TargetSet;
use crate::setup::SetupConfig;
use crate::shaders::{ShaderCatalog, ShaderKind, ShaderSource};

const CLIP_PLANE_SEGMENTS: u32 = 10;
const CLIP_PLANE_EXTENT: f32 = 1000.0;

/// Live rendering state for one activation.
#[derive(Debug)]
pub struct MixedRealityRenderer {
    camera: CameraId,
    meshes: MeshSet,
    materials: MaterialSet,
    targets: TargetSet,
    arbiter: FrameArbiter,
    input: InputFrame,
    resolution: Resolution,
}

impl MixedRealityRenderer {
    /// Clones the spectator camera and creates the pass assets. Fails
    /// without touching the engine if the configuration has no HMD camera or
    /// a compositing shader cannot be resolved.
    pub fn new(
        engine: &mut dyn Engine,
        config: &SetupConfig,
        catalog: &ShaderCatalog,
        source: &dyn ShaderSource,
    ) -> StagelinkResult<Self> {
        let hmd = config
            .hmd_camera
            .ok_or_else(|| StagelinkError::validation("hmd camera is not set"))?;

        let shader = |kind: ShaderKind| {
            catalog.get(kind, source).ok_or_else(|| {
                StagelinkError::asset(format!("shader {} unavailable", kind.asset_name()))
            })
        };
        let clip_plane_simple = shader(ShaderKind::ClipPlaneSimple)?;
        let clip_plane_simple_debug = shader(ShaderKind::ClipPlaneSimpleDebug)?;
        let clip_plane_complex = shader(ShaderKind::ClipPlaneComplex)?;
        let clip_plane_complex_debug = shader(ShaderKind::ClipPlaneComplexDebug)?;
        let write_opaque_to_alpha = shader(ShaderKind::WriteOpaqueToAlpha)?;
        let combine_alpha = shader(ShaderKind::CombineAlpha)?;
        let write = shader(ShaderKind::Write)?;
        let force_forward = shader(ShaderKind::ForceForwardRendering)?;

        let reference = config.camera_prefab.unwrap_or(hmd);
        let camera = engine.clone_camera(reference, config.stage, &config.exclude_behaviours)?;

        let meshes = MeshSet {
            quad: engine.create_mesh(MeshDesc::Quad),
            clip_plane: engine.create_mesh(MeshDesc::ClipPlane {
                cols: CLIP_PLANE_SEGMENTS,
                rows: CLIP_PLANE_SEGMENTS,
                extent: CLIP_PLANE_EXTENT,
            }),
            marker: engine.create_mesh(MeshDesc::Box { size: Vec3::ONE }),
        };
        let materials = MaterialSet {
            clip_plane_simple: engine.create_material(clip_plane_simple),
            clip_plane_simple_debug: engine.create_material(clip_plane_simple_debug),
            clip_plane_complex: engine.create_material(clip_plane_complex),
            clip_plane_complex_debug: engine.create_material(clip_plane_complex_debug),
            write_opaque_to_alpha: engine.create_material(write_opaque_to_alpha),
            combine_alpha: engine.create_material(combine_alpha),
            write: engine.create_material(write),
            force_forward: engine.create_material(force_forward),
        };

        Ok(MixedRealityRenderer {
            camera,
            meshes,
            materials,
            targets: TargetSet::default(),
            arbiter: FrameArbiter::new(),
            input: InputFrame::default(),
            resolution: Resolution::ZERO,
        })
    }

    /// The input frame as of the last synchronization.
    pub fn input(&self) -> &InputFrame {
        &self.input
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn can_set_pose(&self) -> bool {
        self.arbiter.can_set_pose(&self.input)
    }

    /// Requests the spectator pose for this render tick. Position and
    /// rotation are stage-local unless `world_space` asks for conversion
    /// through the stage node.
    pub fn set_pose(
        &mut self,
        engine: &mut dyn Engine,
        config: &SetupConfig,
        position: Vec3,
        rotation: Quat,
        vertical_fov: f32,
        world_space: bool,
    ) -> bool {
        let (local_position, local_rotation) = if world_space {
            let world_to_stage = config
                .stage
                .map(|node| engine.world_to_local(node))
                .unwrap_or(Mat4::IDENTITY);
            (
                world_to_stage.transform_point(position),
                world_to_stage.rotate_quaternion(rotation),
            )
        } else {
            (position, rotation)
        };

        let near = self.input.pose.near_clip;
        let far = self.input.pose.far_clip;
        let pose = Pose {
            projection: Mat4::perspective(vertical_fov, self.resolution.aspect(), near, far),
            local_position,
            local_rotation,
            vertical_fov,
            near_clip: near,
            far_clip: far,
            unused0: 0,
            unused1: 0,
        };
        self.arbiter.request_pose(&self.input, pose, engine.frame_count())
    }

    /// Publishes the ground plane, converting from world space through the
    /// stage node when asked.
    pub fn set_ground_plane(
        &mut self,
        engine: &mut dyn Engine,
        channel: &mut BridgeChannel,
        config: &SetupConfig,
        distance: f32,
        normal: Vec3,
        world_space: bool,
    ) -> bool {
        let normal = if world_space {
            let world_to_stage = config
                .stage
                .map(|node| engine.world_to_local(node))
                .unwrap_or(Mat4::IDENTITY);
            world_to_stage.transform_vector(normal)
        } else {
            normal
        };
        channel.set_ground_plane(GroundPlane { distance, normal })
    }

    /// Runs the full frame sequence: synchronize state with the compositor,
    /// render the planned passes and submit the output frame. Pass failures
    /// are reported after the frame is still submitted.
    pub fn render(
        &mut self,
        engine: &mut dyn Engine,
        channel: &mut BridgeChannel,
        config: &SetupConfig,
        hooks: &mut RenderHooks,
    ) -> StagelinkResult<()> {
        let tick = engine.frame_count();
        channel.resolution(&mut self.resolution);
        let info = engine.camera_info(self.camera)?;

        self.arbiter.apply_claim(&mut self.input, tick, Some((info.near_clip, info.far_clip)));
        channel.update_input_frame(&mut self.input);
        self.arbiter.observe_synced(&self.input);

        // The compositor drives the stage transform node while it outranks
        // the game on the stage sub-field.
        if self.input.priority.stage > GAME_RANK {
            if let Some(node) = config.stage_transform {
                engine.set_node_local(node, &self.input.stage_transform);
            }
        }

        self.targets.sync(engine, self.input.features(), self.resolution, &self.input.clip_plane);

        let context = FrameContext {
            frame_index: tick,
            input: self.input,
            resolution: self.resolution,
        };
        hooks.pre_render.emit(&context);

        let stage_to_world = config
            .stage
            .map(|node| engine.local_to_world(node))
            .unwrap_or(Mat4::IDENTITY);
        let hmd_to_world = (self.input.features().contains(Features::DEBUG_CLIP_PLANE))
            .then(|| config.hmd_camera.map(|hmd| engine.camera_local_to_world(hmd)))
            .flatten();
        let plan = compile(&PlanInputs {
            frame_index: tick,
            elapsed_seconds: engine.time_since_startup(),
            input: &self.input,
            stage_to_world,
            layer_mask: config.spectator_layer_mask,
            deferred: info.is_deferred(),
            fix_post_effects_alpha: config.fix_post_effects_alpha,
            has_background: self.targets.get(TargetRole::Background).is_some(),
            has_foreground: self.targets.get(TargetRole::Foreground).is_some(),
            has_optimized: self.targets.get(TargetRole::Optimized).is_some(),
            has_complex_clip: self.targets.complex_clip().is_some(),
            hmd_to_world,
        });
        trace!(tick, passes = plan.passes.len(), "rendering frame");

        let mut outcome = Ok(());
        for pass in &plan.passes {
            match pass.target {
                TargetRole::Background => hooks.pre_background.emit(&context),
                TargetRole::Foreground => hooks.pre_foreground.emit(&context),
                TargetRole::Optimized => {}
            }
            let ctx = PassContext {
                camera: self.camera,
                stage_to_world,
                targets: &self.targets,
                meshes: &self.meshes,
                materials: &self.materials,
            };
            if let Err(err) = execute_pass(engine, channel, pass, &ctx) {
                error!(target = ?pass.target, %err, "pass failed");
                if outcome.is_ok() {
                    outcome = Err(err);
                }
            }
            match pass.target {
                TargetRole::Background => hooks.post_background.emit(&context),
                TargetRole::Foreground => hooks.post_foreground.emit(&context),
                TargetRole::Optimized => {}
            }
        }

        let output = OutputFrame::new(info.pipeline, self.tracked_space(engine, config));
        channel.write_output_frame(&output);
        channel.publish_textures();
        channel.signal_frame_ready();
        channel.frame_tick();

        hooks.post_render.emit(&context);
        outcome
    }

    fn tracked_space(&self, engine: &dyn Engine, config: &SetupConfig) -> TrackedSpace {
        match config.stage {
            Some(node) => {
                let (world_position, world_rotation, local_scale) = engine.node_world_pose(node);
                TrackedSpace {
                    world_position,
                    world_rotation,
                    local_scale,
                    local_to_world: engine.local_to_world(node),
                    world_to_local: engine.world_to_local(node),
                }
            }
            None => TrackedSpace::default(),
        }
    }

    /// Releases the pose claim and destroys every engine asset this renderer
    /// created.
    pub fn release(&mut self, engine: &mut dyn Engine, channel: &mut BridgeChannel) {
        self.arbiter.release(&mut self.input);
        channel.update_input_frame(&mut self.input);

        self.targets.release(engine);
        engine.destroy_mesh(self.meshes.quad);
        engine.destroy_mesh(self.meshes.clip_plane);
        engine.destroy_mesh(self.meshes.marker);
        for material in [
            self.materials.clip_plane_simple,
            self.materials.clip_plane_simple_debug,
            self.materials.clip_plane_complex,
            self.materials.clip_plane_complex_debug,
            self.materials.write_opaque_to_alpha,
            self.materials.combine_alpha,
            self.materials.write,
            self.materials.force_forward,
        ] {
            engine.destroy_material(material);
        }
        engine.destroy_camera(self.camera);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::MemoryHost;
    use crate::engine::NodeId;
    use crate::protocol::{Priority, tag};
    use crate::render::exec::tests_support::RecordingEngine;
    use crate::shaders::tests_catalog::full_catalog;

    fn config() -> SetupConfig {
        SetupConfig {
            hmd_camera: Some(CameraId(1)),
            stage: Some(NodeId(2)),
            stage_transform: Some(NodeId(3)),
            ..SetupConfig::default()
        }
    }

    fn renderer(engine: &mut RecordingEngine) -> MixedRealityRenderer {
        let (catalog, source) = full_catalog();
        MixedRealityRenderer::new(engine, &config(), &catalog, &source).unwrap()
    }

    #[test]
    fn creation_requires_an_hmd_camera() {
        let mut engine = RecordingEngine::default();
        let (catalog, source) = full_catalog();
        let config = SetupConfig::default();
        let err = MixedRealityRenderer::new(&mut engine, &config, &catalog, &source).unwrap_err();
        assert!(matches!(err, StagelinkError::Validation(_)));
        assert!(engine.cloned_cameras.is_empty());
    }

    #[test]
    fn camera_clone_uses_prefab_parent_and_excludes() {
        let mut engine = RecordingEngine::default();
        let _renderer = renderer(&mut engine);
        let (_, parent, excludes) = engine.cloned_cameras[0].clone();
        assert_eq!(parent, Some(NodeId(2)));
        assert_eq!(excludes, SetupConfig::default().exclude_behaviours);
    }

    #[test]
    fn render_submits_output_and_advances_the_frame() {
        let mut engine = RecordingEngine::default();
        let mut renderer = renderer(&mut engine);
        let host = MemoryHost::new();
        host.set_active(true);
        host.set_enabled_features(Features::BACKGROUND_RENDER);
        host.seed_local_record(
            crate::protocol::RESOLUTION_SLOT,
            tag("SDKRes"),
            &Resolution { width: 640, height: 360 },
        );
        let mut channel = BridgeChannel::new(Box::new(host.clone()));
        let mut hooks = RenderHooks::default();

        renderer.render(&mut engine, &mut channel, &config(), &mut hooks).unwrap();

        assert!(host.frame_object_bytes(tag("OUTFRAME")).is_some());
        assert!(host.texture_bytes(tag("BGCTEX")).is_some());
        assert_eq!(host.plugin_events(), 1);
        assert_eq!(host.frame_ticks(), 1);
        assert_eq!(renderer.resolution(), Resolution { width: 640, height: 360 });
    }

    #[test]
    fn compositor_owned_stage_rank_moves_the_stage_transform() {
        let mut engine = RecordingEngine::default();
        let mut renderer = renderer(&mut engine);
        let host = MemoryHost::new();
        host.set_active(true);
        let mut channel = BridgeChannel::new(Box::new(host.clone()));
        let mut hooks = RenderHooks::default();

        renderer.render(&mut engine, &mut channel, &config(), &mut hooks).unwrap();
        // Released rank sits above the game rank, so the compositor owns it.
        assert_eq!(renderer.input().priority.stage, Priority::released().stage);
        assert_eq!(engine.node_transforms.len(), 1);
        assert_eq!(engine.node_transforms[0].0, NodeId(3));
    }

    #[test]
    fn release_destroys_all_created_assets() {
        let mut engine = RecordingEngine::default();
        let mut renderer = renderer(&mut engine);
        let mut channel = BridgeChannel::detached();

        renderer.release(&mut engine, &mut channel);
        assert_eq!(engine.destroyed_cameras.len(), 1);
        assert_eq!(engine.destroyed_meshes.len(), 3);
        assert_eq!(engine.destroyed_materials.len(), 8);
    }

    #[test]
    fn pose_request_lands_when_renewed_on_the_render_tick() {
        let mut engine = RecordingEngine::default();
        let mut renderer = renderer(&mut engine);
        let host = MemoryHost::new();
        host.set_active(true);
        host.set_controller_pose_rank(Some(0));
        let mut channel = BridgeChannel::new(Box::new(host.clone()));
        let mut hooks = RenderHooks::default();

        // First frame establishes frame context.
        renderer.render(&mut engine, &mut channel, &config(), &mut hooks).unwrap();
        assert!(renderer.can_set_pose());

        let requested = renderer.set_pose(
            &mut engine,
            &config(),
            Vec3 { x: 1.0, y: 2.0, z: 3.0 },
            Quat::IDENTITY,
            70.0,
            false,
        );
        assert!(requested);
        renderer.render(&mut engine, &mut channel, &config(), &mut hooks).unwrap();
        let input = renderer.input();
        assert!((input.pose.local_position.x - 1.0).abs() < 1e-6);
        assert!((input.pose.vertical_fov - 70.0).abs() < 1e-6);
        // Near/far always track the active camera.
        assert!((input.pose.near_clip - 0.1).abs() < 1e-6);
        assert!((input.pose.far_clip - 900.0).abs() < 1e-6);
    }
}
