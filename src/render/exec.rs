//! Plan execution against the host engine.
//!
//! Walks a [`PassPlan`] step by step, translating it into engine calls. All
//! decisions were made at planning time; this module only resolves handles,
//! borrows temporary targets and guarantees that camera, fog and keyword
//! state is restored however the pass ends.

use std::collections::HashMap;

use tracing::{debug, error, warn};

use crate::bridge::BridgeChannel;
use crate::engine::{
    BlitSurface, CameraId, CameraHook, ColorMask, Engine, MaterialId, MeshId, ShaderKeyword,
    TargetDesc, TargetId,
};
use crate::error::StagelinkResult;
use crate::math::Mat4;
use crate::protocol::TextureDescriptor;
use crate::render::plan::{MaterialRole, PassPlan, PassStep, TargetRole, TempSlot};
use crate::render::targets::{TargetHandle, TargetSet};

/// Meshes created once per activation.
#[derive(Clone, Copy, Debug)]
pub struct MeshSet {
    pub quad: MeshId,
    pub clip_plane: MeshId,
    pub marker: MeshId,
}

/// Materials created once per activation, one per compositing shader.
#[derive(Clone, Copy, Debug)]
pub struct MaterialSet {
    pub clip_plane_simple: MaterialId,
    pub clip_plane_simple_debug: MaterialId,
    pub clip_plane_complex: MaterialId,
    pub clip_plane_complex_debug: MaterialId,
    pub write_opaque_to_alpha: MaterialId,
    pub combine_alpha: MaterialId,
    pub write: MaterialId,
    pub force_forward: MaterialId,
}

impl MaterialSet {
    pub fn get(&self, role: MaterialRole) -> MaterialId {
        match role {
            MaterialRole::ClipPlaneSimple => self.clip_plane_simple,
            MaterialRole::ClipPlaneSimpleDebug => self.clip_plane_simple_debug,
            MaterialRole::ClipPlaneComplex => self.clip_plane_complex,
            MaterialRole::ClipPlaneComplexDebug => self.clip_plane_complex_debug,
            MaterialRole::WriteOpaqueToAlpha => self.write_opaque_to_alpha,
            MaterialRole::CombineAlpha => self.combine_alpha,
            MaterialRole::Write => self.write,
            MaterialRole::ForceForward => self.force_forward,
        }
    }
}

/// Shared handles a pass executes with.
pub struct PassContext<'a> {
    pub camera: CameraId,
    /// Stage local-to-world the pose is expressed relative to.
    pub stage_to_world: Mat4,
    pub targets: &'a TargetSet,
    pub meshes: &'a MeshSet,
    pub materials: &'a MaterialSet,
}

const MARKER_TINT: [f32; 4] = [1.0, 0.0, 0.0, 0.5];

fn camera_pose(pass: &PassPlan, ctx: &PassContext<'_>) -> crate::engine::CameraPose {
    let local = Mat4::translate(pass.pose.local_position)
        * Mat4::rotate(pass.pose.local_rotation);
    crate::engine::CameraPose {
        world: ctx.stage_to_world * local,
        projection: pass.pose.projection,
        layer_mask: pass.layer_mask,
    }
}

fn layer_keyword(target: TargetRole) -> ShaderKeyword {
    match target {
        // The optimized pass renders the full scene, like the background.
        TargetRole::Background | TargetRole::Optimized => ShaderKeyword::Background,
        TargetRole::Foreground => ShaderKeyword::Foreground,
    }
}

/// Executes one pass. A missing target or failed temp borrow skips the pass
/// without failing the frame; scene render errors propagate after cleanup.
pub fn execute_pass(
    engine: &mut dyn Engine,
    channel: &mut BridgeChannel,
    pass: &PassPlan,
    ctx: &PassContext<'_>,
) -> StagelinkResult<()> {
    let Some(target) = ctx.targets.get(pass.target).copied() else {
        debug!(target = ?pass.target, "pass target missing, skipping");
        return Ok(());
    };

    let mut temps: HashMap<TempSlot, TargetId> = HashMap::new();
    for slot in &pass.temps {
        let desc = TargetDesc { width: target.width, height: target.height, depth_bits: 0 };
        match engine.acquire_temp_target(desc) {
            Ok(id) => {
                temps.insert(*slot, id);
            }
            Err(err) => {
                error!(target = ?pass.target, slot = ?slot, %err, "temp target borrow failed, skipping pass");
                for id in temps.into_values() {
                    engine.release_temp_target(id);
                }
                return Ok(());
            }
        }
    }

    let saved_fog = if pass.neutralize_fog {
        let fog = engine.fog_color();
        engine.set_fog_color([fog[0], fog[1], fog[2], 0.0]);
        Some(fog)
    } else {
        None
    };
    let keyword = layer_keyword(pass.target);
    engine.set_shader_keyword(ShaderKeyword::MixedReality, true);
    engine.set_shader_keyword(keyword, true);

    engine.set_camera_pose(ctx.camera, &camera_pose(pass, ctx));
    engine.begin_camera_render(ctx.camera, target.id, pass.clear);

    let result = run_steps(engine, channel, pass, ctx, &target, &temps);

    engine.end_camera_render(ctx.camera);
    engine.clear_hooks(ctx.camera);
    engine.set_shader_keyword(keyword, false);
    engine.set_shader_keyword(ShaderKeyword::MixedReality, false);
    if let Some(fog) = saved_fog {
        engine.set_fog_color(fog);
    }
    for id in temps.into_values() {
        engine.release_temp_target(id);
    }

    result
}

fn run_steps(
    engine: &mut dyn Engine,
    channel: &mut BridgeChannel,
    pass: &PassPlan,
    ctx: &PassContext<'_>,
    target: &TargetHandle,
    temps: &HashMap<TempSlot, TargetId>,
) -> StagelinkResult<()> {
    let mut result = Ok(());
    for step in &pass.steps {
        match step {
            PassStep::WriteOpaqueToAlpha { hook, mask } => {
                engine.set_material_color_mask(ctx.materials.write_opaque_to_alpha, *mask);
                engine.enqueue_draw(
                    ctx.camera,
                    *hook,
                    ctx.meshes.quad,
                    Mat4::IDENTITY,
                    ctx.materials.write_opaque_to_alpha,
                );
            }
            PassStep::ClearAlpha { hook } => {
                engine.set_material_color_mask(ctx.materials.write, ColorMask::Alpha);
                engine.enqueue_draw(
                    ctx.camera,
                    *hook,
                    ctx.meshes.quad,
                    Mat4::IDENTITY,
                    ctx.materials.write,
                );
            }
            PassStep::DrawClipPlane { hook, draw } => {
                let material = ctx.materials.get(draw.material);
                engine.set_material_color(material, draw.tint);
                engine.set_material_color_mask(material, draw.mask);
                if let Some(tessellation) = draw.tessellation {
                    engine.set_material_tessellation(material, tessellation);
                }
                if draw.height_map {
                    match ctx.targets.complex_clip() {
                        Some(map) => engine.set_material_texture(material, map.id),
                        None => {
                            warn!("height-mapped clip plane without a height map target");
                            continue;
                        }
                    }
                }
                engine.enqueue_draw(ctx.camera, *hook, ctx.meshes.clip_plane, draw.transform, material);
            }
            PassStep::CaptureToTemp { hook, slot } => {
                if let Some(temp) = temps.get(slot) {
                    engine.enqueue_blit(
                        ctx.camera,
                        *hook,
                        BlitSurface::Active,
                        BlitSurface::Target(*temp),
                        None,
                    );
                }
            }
            PassStep::ApplyTemp { hook, slot, mask } => {
                if let Some(temp) = temps.get(slot) {
                    engine.set_material_texture(ctx.materials.write, *temp);
                    engine.set_material_color_mask(ctx.materials.write, *mask);
                    engine.enqueue_blit(
                        ctx.camera,
                        *hook,
                        BlitSurface::Target(*temp),
                        BlitSurface::Active,
                        Some(ctx.materials.write),
                    );
                }
            }
            PassStep::CombineAlpha { hook, slot } => {
                if let Some(temp) = temps.get(slot) {
                    engine.set_material_texture(ctx.materials.combine_alpha, *temp);
                    engine.set_material_color_mask(ctx.materials.combine_alpha, ColorMask::Alpha);
                    engine.enqueue_blit(
                        ctx.camera,
                        *hook,
                        BlitSurface::Target(*temp),
                        BlitSurface::Active,
                        Some(ctx.materials.combine_alpha),
                    );
                }
            }
            PassStep::ForceForward => {
                engine.enqueue_draw(
                    ctx.camera,
                    CameraHook::AfterForwardOpaque,
                    ctx.meshes.quad,
                    Mat4::IDENTITY,
                    ctx.materials.force_forward,
                );
            }
            PassStep::PublishTexture { id } => {
                let descriptor = TextureDescriptor::color_buffer(
                    *id,
                    engine.native_texture(target.id),
                    engine.device(),
                    engine.target_color_space(target.id),
                    target.width,
                    target.height,
                );
                channel.publish_texture(&descriptor);
            }
            PassStep::RenderScene => {
                if let Err(err) = engine.render_camera(ctx.camera) {
                    error!(target = ?pass.target, %err, "scene render failed");
                    result = Err(err);
                    break;
                }
            }
            PassStep::RecoverAlpha { slot } => {
                if let Some(temp) = temps.get(slot) {
                    engine.set_material_color_mask(ctx.materials.write, ColorMask::Alpha);
                    engine.blit(*temp, target.id, Some(ctx.materials.write));
                }
            }
            PassStep::DebugMarker { transform } => {
                let material = ctx.materials.clip_plane_simple_debug;
                engine.set_material_color(material, MARKER_TINT);
                engine.draw_gizmo(ctx.camera, ctx.meshes.marker, *transform, material);
            }
            PassStep::FrameStamp { text } => {
                engine.draw_overlay_text(target.id, text);
            }
        }
    }
    result
}
