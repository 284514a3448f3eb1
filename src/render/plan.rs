//! Per-frame pass planning.
//!
//! [`compile`] turns the compositor's requested features plus local state
//! into a [`FramePlan`]: an explicit list of passes and steps with all
//! gating, interlacing and alpha-repair decisions already made. Execution
//! ([`super::exec`]) then walks the plan against the engine without making
//! any decisions of its own, which keeps everything branchy testable without
//! a GPU.

use crate::engine::{CameraHook, ColorMask};
use crate::math::Mat4;
use crate::protocol::{Features, InputFrame, Pose, TextureId};
use crate::render::debug;

/// Render target roles owned by the renderer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetRole {
    Background,
    Foreground,
    Optimized,
}

/// Temporary targets a pass borrows from the engine pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TempSlot {
    /// Scene alpha captured after opaque geometry.
    CapturedAlpha,
    /// Frame copy taken before image effects run.
    PostProcess,
}

/// Meshes referenced by plan steps.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MeshRole {
    Quad,
    ClipPlane,
    Marker,
}

/// Materials referenced by plan steps, one per compositing shader.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MaterialRole {
    ClipPlaneSimple,
    ClipPlaneSimpleDebug,
    ClipPlaneComplex,
    ClipPlaneComplexDebug,
    WriteOpaqueToAlpha,
    CombineAlpha,
    Write,
    ForceForward,
}

/// One deferred clip-plane surface draw.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClipPlaneDraw {
    pub transform: Mat4,
    pub material: MaterialRole,
    pub mask: ColorMask,
    pub tint: [f32; 4],
    /// Tessellation factor, set for the complex (height-mapped) surface.
    pub tessellation: Option<f32>,
    /// Sample the compositor-written height map.
    pub height_map: bool,
}

/// One step of a pass, in execution order.
#[derive(Clone, Debug, PartialEq)]
pub enum PassStep {
    /// Draw a quad writing scene opaque coverage into the alpha channel.
    WriteOpaqueToAlpha { hook: CameraHook, mask: ColorMask },
    /// Draw a quad clearing the alpha channel.
    ClearAlpha { hook: CameraHook },
    DrawClipPlane { hook: CameraHook, draw: ClipPlaneDraw },
    /// Copy the camera's active surface into a temp slot.
    CaptureToTemp { hook: CameraHook, slot: TempSlot },
    /// Draw the temp slot back over the active surface.
    ApplyTemp { hook: CameraHook, slot: TempSlot, mask: ColorMask },
    /// Merge captured alpha back into the final image.
    CombineAlpha { hook: CameraHook, slot: TempSlot },
    /// Collapse deferred shading to forward for this camera.
    ForceForward,
    /// Hand the pass target's descriptor to the compositor.
    PublishTexture { id: TextureId },
    /// Scene render through the pass camera.
    RenderScene,
    /// Immediate blit restoring alpha from a temp slot after the render.
    RecoverAlpha { slot: TempSlot },
    /// Draw the camera marker gizmo.
    DebugMarker { transform: Mat4 },
    /// Burn the frame stamp into the pass target.
    FrameStamp { text: String },
}

/// One camera pass over the scene.
#[derive(Clone, Debug, PartialEq)]
pub struct PassPlan {
    pub target: TargetRole,
    pub pose: Pose,
    pub layer_mask: u32,
    /// Solid clear color, when the pass must start from transparent.
    pub clear: Option<[f32; 4]>,
    /// Zero fog alpha for the duration of the pass.
    pub neutralize_fog: bool,
    /// Temp targets to acquire before the steps and release after.
    pub temps: Vec<TempSlot>,
    pub steps: Vec<PassStep>,
}

/// Full plan for one host frame.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FramePlan {
    pub passes: Vec<PassPlan>,
}

/// Everything [`compile`] decides from.
#[derive(Clone, Debug)]
pub struct PlanInputs<'a> {
    pub frame_index: u64,
    pub elapsed_seconds: f64,
    pub input: &'a InputFrame,
    /// Stage local-to-world, composed into clip-plane and marker transforms.
    pub stage_to_world: Mat4,
    pub layer_mask: u32,
    /// The pass camera currently renders deferred.
    pub deferred: bool,
    pub fix_post_effects_alpha: bool,
    /// Targets that exist this frame; passes without one are skipped.
    pub has_background: bool,
    pub has_foreground: bool,
    pub has_optimized: bool,
    pub has_complex_clip: bool,
    /// HMD local-to-world when a debug marker should be drawn.
    pub hmd_to_world: Option<Mat4>,
}

const CLEAR_TRANSPARENT: [f32; 4] = [0.0, 0.0, 0.0, 0.0];
const CLIP_PLANE_TINT: [f32; 4] = [0.0, 1.0, 0.0, 0.5];
const GROUND_PLANE_TINT: [f32; 4] = [0.0, 0.0, 1.0, 0.5];

impl<'a> PlanInputs<'a> {
    fn features(&self) -> Features {
        self.input.features()
    }

    fn debug_enabled(&self) -> bool {
        self.features().contains(Features::DEBUG_CLIP_PLANE)
    }

    fn override_post_processing(&self) -> bool {
        self.features().contains(Features::OVERRIDE_POST_PROCESSING)
    }

    fn ground_plane_requested(&self) -> bool {
        self.features().contains(Features::GROUND_CLIP_PLANE)
    }

    fn complex_clip_requested(&self) -> bool {
        self.features().contains(Features::COMPLEX_CLIP_PLANE) && self.has_complex_clip
    }

    /// Interlacing renders background on even host frames and foreground on
    /// odd ones; the optimized pass is unaffected.
    fn interlace_allows(&self, target: TargetRole) -> bool {
        if !self.features().contains(Features::INTERLACED_RENDER) {
            return true;
        }
        match target {
            TargetRole::Background => self.frame_index % 2 == 0,
            TargetRole::Foreground => self.frame_index % 2 == 1,
            TargetRole::Optimized => true,
        }
    }

    fn clip_plane_transform(&self) -> Mat4 {
        self.stage_to_world * self.input.clip_plane.transform
    }

    fn ground_plane_transform(&self) -> Mat4 {
        self.stage_to_world * self.input.ground_clip_plane.transform
    }

    fn clip_plane_draw(&self, mask: ColorMask, debug: bool) -> ClipPlaneDraw {
        let complex = self.complex_clip_requested();
        let material = match (complex, debug) {
            (false, false) => MaterialRole::ClipPlaneSimple,
            (false, true) => MaterialRole::ClipPlaneSimpleDebug,
            (true, false) => MaterialRole::ClipPlaneComplex,
            (true, true) => MaterialRole::ClipPlaneComplexDebug,
        };
        ClipPlaneDraw {
            transform: self.clip_plane_transform(),
            material,
            mask,
            tint: CLIP_PLANE_TINT,
            tessellation: complex.then_some(self.input.clip_plane.tessellation),
            height_map: complex,
        }
    }

    fn ground_plane_draw(&self, mask: ColorMask, debug: bool) -> ClipPlaneDraw {
        ClipPlaneDraw {
            transform: self.ground_plane_transform(),
            material: if debug {
                MaterialRole::ClipPlaneSimpleDebug
            } else {
                MaterialRole::ClipPlaneSimple
            },
            mask,
            tint: GROUND_PLANE_TINT,
            tessellation: None,
            height_map: false,
        }
    }

    fn push_debug_steps(&self, steps: &mut Vec<PassStep>) {
        if let Some(hmd) = self.hmd_to_world {
            steps.push(PassStep::DebugMarker { transform: debug::marker_transform(hmd) });
        }
    }

    fn push_frame_stamp(&self, steps: &mut Vec<PassStep>) {
        steps.push(PassStep::FrameStamp {
            text: debug::frame_stamp_text(self.frame_index, self.elapsed_seconds),
        });
    }
}

/// Plans the background pass: the full scene, optionally with the
/// post-processing override.
fn compile_background(inputs: &PlanInputs<'_>) -> PassPlan {
    let mut temps = Vec::new();
    let mut steps = Vec::new();
    let debug = inputs.debug_enabled();

    if inputs.override_post_processing() {
        temps.push(TempSlot::PostProcess);
        steps.push(PassStep::CaptureToTemp {
            hook: CameraHook::BeforeImageEffects,
            slot: TempSlot::PostProcess,
        });
        steps.push(PassStep::ApplyTemp {
            hook: CameraHook::AfterEverything,
            slot: TempSlot::PostProcess,
            mask: ColorMask::All,
        });
    }

    steps.push(PassStep::PublishTexture { id: TextureId::BackgroundColor });
    if debug {
        inputs.push_debug_steps(&mut steps);
    }
    steps.push(PassStep::RenderScene);
    if debug {
        inputs.push_frame_stamp(&mut steps);
    }

    PassPlan {
        target: TargetRole::Background,
        pose: inputs.input.pose,
        layer_mask: inputs.layer_mask,
        clear: None,
        neutralize_fog: false,
        temps,
        steps,
    }
}

/// Plans the foreground pass: geometry in front of the clip plane with a
/// clean alpha channel for compositing.
fn compile_foreground(inputs: &PlanInputs<'_>) -> PassPlan {
    let mut temps = vec![TempSlot::CapturedAlpha];
    let mut steps = Vec::new();
    let debug = inputs.debug_enabled();

    steps.push(PassStep::WriteOpaqueToAlpha {
        hook: CameraHook::AfterForwardOpaque,
        mask: ColorMask::All,
    });
    steps.push(PassStep::DrawClipPlane {
        hook: CameraHook::AfterForwardOpaque,
        draw: inputs.clip_plane_draw(ColorMask::All, debug),
    });
    if inputs.ground_plane_requested() {
        steps.push(PassStep::DrawClipPlane {
            hook: CameraHook::AfterForwardOpaque,
            draw: inputs.ground_plane_draw(ColorMask::All, debug),
        });
    }
    steps.push(PassStep::CaptureToTemp {
        hook: CameraHook::AfterForwardOpaque,
        slot: TempSlot::CapturedAlpha,
    });

    let override_pp = inputs.override_post_processing();
    if override_pp || inputs.fix_post_effects_alpha {
        temps.push(TempSlot::PostProcess);
        steps.push(PassStep::CaptureToTemp {
            hook: CameraHook::BeforeImageEffects,
            slot: TempSlot::PostProcess,
        });
        steps.push(PassStep::ApplyTemp {
            hook: CameraHook::AfterEverything,
            slot: TempSlot::PostProcess,
            mask: if override_pp { ColorMask::All } else { ColorMask::Alpha },
        });
    }
    steps.push(PassStep::CombineAlpha {
        hook: CameraHook::AfterEverything,
        slot: TempSlot::CapturedAlpha,
    });
    if inputs.deferred {
        steps.push(PassStep::ForceForward);
    }

    steps.push(PassStep::PublishTexture { id: TextureId::ForegroundColor });
    if debug {
        inputs.push_debug_steps(&mut steps);
    }
    steps.push(PassStep::RenderScene);
    if debug {
        inputs.push_frame_stamp(&mut steps);
    }

    PassPlan {
        target: TargetRole::Foreground,
        pose: inputs.input.pose,
        layer_mask: inputs.layer_mask,
        clear: Some(CLEAR_TRANSPARENT),
        neutralize_fog: true,
        temps,
        steps,
    }
}

/// Plans the optimized single-target pass: a normal color image whose alpha
/// channel carries foreground coverage.
fn compile_optimized(inputs: &PlanInputs<'_>) -> PassPlan {
    let mut steps = Vec::new();
    let debug = inputs.debug_enabled();

    steps.push(PassStep::ClearAlpha { hook: CameraHook::AfterForwardAlpha });
    steps.push(PassStep::WriteOpaqueToAlpha {
        hook: CameraHook::AfterForwardAlpha,
        mask: ColorMask::Alpha,
    });
    steps.push(PassStep::DrawClipPlane {
        hook: CameraHook::AfterForwardAlpha,
        draw: inputs.clip_plane_draw(ColorMask::Alpha, debug),
    });
    if inputs.ground_plane_requested() {
        steps.push(PassStep::DrawClipPlane {
            hook: CameraHook::AfterForwardAlpha,
            draw: inputs.ground_plane_draw(ColorMask::Alpha, debug),
        });
    }
    steps.push(PassStep::CaptureToTemp {
        hook: CameraHook::AfterForwardAlpha,
        slot: TempSlot::CapturedAlpha,
    });
    if inputs.deferred {
        steps.push(PassStep::ForceForward);
    }

    steps.push(PassStep::PublishTexture { id: TextureId::OptimizedColor });
    if debug {
        inputs.push_debug_steps(&mut steps);
    }
    steps.push(PassStep::RenderScene);
    // Image effects overwrite alpha; restore the captured coverage.
    steps.push(PassStep::RecoverAlpha { slot: TempSlot::CapturedAlpha });
    if debug {
        inputs.push_frame_stamp(&mut steps);
    }

    PassPlan {
        target: TargetRole::Optimized,
        pose: inputs.input.pose,
        layer_mask: inputs.layer_mask,
        clear: None,
        neutralize_fog: false,
        temps: vec![TempSlot::CapturedAlpha],
        steps,
    }
}

/// Builds the frame's pass list from the compositor's requested features and
/// the targets that actually exist.
pub fn compile(inputs: &PlanInputs<'_>) -> FramePlan {
    let features = inputs.features();
    let mut passes = Vec::new();

    if features.contains(Features::BACKGROUND_RENDER)
        && inputs.has_background
        && inputs.interlace_allows(TargetRole::Background)
    {
        passes.push(compile_background(inputs));
    }
    if features.contains(Features::FOREGROUND_RENDER)
        && inputs.has_foreground
        && inputs.interlace_allows(TargetRole::Foreground)
    {
        passes.push(compile_foreground(inputs));
    }
    if features.contains(Features::OPTIMIZED_RENDER) && inputs.has_optimized {
        passes.push(compile_optimized(inputs));
    }

    FramePlan { passes }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::InputFrame;

    fn frame_with(features: Features) -> InputFrame {
        let mut frame = InputFrame::default();
        frame.set_features(features);
        frame
    }

    fn inputs<'a>(frame: &'a InputFrame) -> PlanInputs<'a> {
        PlanInputs {
            frame_index: 0,
            elapsed_seconds: 0.0,
            input: frame,
            stage_to_world: Mat4::IDENTITY,
            layer_mask: !0,
            deferred: false,
            fix_post_effects_alpha: false,
            has_background: true,
            has_foreground: true,
            has_optimized: true,
            has_complex_clip: false,
            hmd_to_world: None,
        }
    }

    fn targets(plan: &FramePlan) -> Vec<TargetRole> {
        plan.passes.iter().map(|pass| pass.target).collect()
    }

    #[test]
    fn features_gate_passes() {
        let frame = frame_with(Features::BACKGROUND_RENDER | Features::FOREGROUND_RENDER);
        let plan = compile(&inputs(&frame));
        assert_eq!(targets(&plan), vec![TargetRole::Background, TargetRole::Foreground]);

        let frame = frame_with(Features::OPTIMIZED_RENDER);
        let plan = compile(&inputs(&frame));
        assert_eq!(targets(&plan), vec![TargetRole::Optimized]);

        let frame = frame_with(Features::empty());
        assert!(compile(&inputs(&frame)).passes.is_empty());
    }

    #[test]
    fn missing_target_skips_pass() {
        let frame = frame_with(Features::BACKGROUND_RENDER | Features::FOREGROUND_RENDER);
        let mut inputs = inputs(&frame);
        inputs.has_foreground = false;
        assert_eq!(targets(&compile(&inputs)), vec![TargetRole::Background]);
    }

    #[test]
    fn interlacing_alternates_background_and_foreground() {
        let frame = frame_with(
            Features::BACKGROUND_RENDER
                | Features::FOREGROUND_RENDER
                | Features::OPTIMIZED_RENDER
                | Features::INTERLACED_RENDER,
        );
        let mut even = inputs(&frame);
        even.frame_index = 4;
        assert_eq!(targets(&compile(&even)), vec![TargetRole::Background, TargetRole::Optimized]);

        let mut odd = inputs(&frame);
        odd.frame_index = 5;
        assert_eq!(targets(&compile(&odd)), vec![TargetRole::Foreground, TargetRole::Optimized]);
    }

    #[test]
    fn foreground_clears_to_transparent_and_neutralizes_fog() {
        let frame = frame_with(Features::FOREGROUND_RENDER);
        let plan = compile(&inputs(&frame));
        let pass = &plan.passes[0];
        assert_eq!(pass.clear, Some([0.0, 0.0, 0.0, 0.0]));
        assert!(pass.neutralize_fog);
        assert!(pass.temps.contains(&TempSlot::CapturedAlpha));
        assert!(
            pass.steps
                .iter()
                .any(|step| matches!(step, PassStep::CombineAlpha { slot: TempSlot::CapturedAlpha, .. }))
        );
    }

    #[test]
    fn background_override_post_processing_captures_and_reapplies() {
        let frame = frame_with(Features::BACKGROUND_RENDER | Features::OVERRIDE_POST_PROCESSING);
        let plan = compile(&inputs(&frame));
        let pass = &plan.passes[0];
        assert!(pass.temps.contains(&TempSlot::PostProcess));
        assert!(pass.steps.iter().any(|step| matches!(
            step,
            PassStep::ApplyTemp { slot: TempSlot::PostProcess, mask: ColorMask::All, .. }
        )));
    }

    #[test]
    fn fix_post_effects_alpha_reapplies_alpha_only() {
        let frame = frame_with(Features::FOREGROUND_RENDER);
        let mut inputs = inputs(&frame);
        inputs.fix_post_effects_alpha = true;
        let plan = compile(&inputs);
        assert!(plan.passes[0].steps.iter().any(|step| matches!(
            step,
            PassStep::ApplyTemp { slot: TempSlot::PostProcess, mask: ColorMask::Alpha, .. }
        )));
    }

    #[test]
    fn complex_clip_plane_selects_height_mapped_material() {
        let frame = frame_with(Features::FOREGROUND_RENDER | Features::COMPLEX_CLIP_PLANE);
        let mut inputs = inputs(&frame);
        inputs.has_complex_clip = true;
        let plan = compile(&inputs);
        let draw = plan.passes[0]
            .steps
            .iter()
            .find_map(|step| match step {
                PassStep::DrawClipPlane { draw, .. } => Some(*draw),
                _ => None,
            })
            .unwrap();
        assert_eq!(draw.material, MaterialRole::ClipPlaneComplex);
        assert!(draw.height_map);
        assert!(draw.tessellation.is_some());
    }

    #[test]
    fn complex_clip_plane_without_height_map_target_falls_back_to_simple() {
        let frame = frame_with(Features::FOREGROUND_RENDER | Features::COMPLEX_CLIP_PLANE);
        let plan = compile(&inputs(&frame));
        let draw = plan.passes[0]
            .steps
            .iter()
            .find_map(|step| match step {
                PassStep::DrawClipPlane { draw, .. } => Some(*draw),
                _ => None,
            })
            .unwrap();
        assert_eq!(draw.material, MaterialRole::ClipPlaneSimple);
        assert!(!draw.height_map);
    }

    #[test]
    fn ground_plane_adds_second_clip_surface() {
        let frame = frame_with(Features::FOREGROUND_RENDER | Features::GROUND_CLIP_PLANE);
        let plan = compile(&inputs(&frame));
        let draws: Vec<_> = plan.passes[0]
            .steps
            .iter()
            .filter(|step| matches!(step, PassStep::DrawClipPlane { .. }))
            .collect();
        assert_eq!(draws.len(), 2);
    }

    #[test]
    fn deferred_camera_forces_forward_rendering() {
        let frame = frame_with(Features::FOREGROUND_RENDER | Features::OPTIMIZED_RENDER);
        let mut inputs = inputs(&frame);
        inputs.deferred = true;
        let plan = compile(&inputs);
        for pass in &plan.passes {
            assert!(pass.steps.iter().any(|step| matches!(step, PassStep::ForceForward)));
        }
    }

    #[test]
    fn debug_feature_adds_marker_and_frame_stamp() {
        let frame = frame_with(Features::BACKGROUND_RENDER | Features::DEBUG_CLIP_PLANE);
        let mut debug_inputs = inputs(&frame);
        debug_inputs.hmd_to_world = Some(Mat4::IDENTITY);
        debug_inputs.frame_index = 12;
        debug_inputs.elapsed_seconds = 61.25;
        let plan = compile(&debug_inputs);
        let steps = &plan.passes[0].steps;
        assert!(steps.iter().any(|step| matches!(step, PassStep::DebugMarker { .. })));
        assert!(steps.iter().any(|step| matches!(step, PassStep::FrameStamp { .. })));

        let plain_frame = frame_with(Features::BACKGROUND_RENDER | Features::FOREGROUND_RENDER);
        let plain = compile(&inputs(&plain_frame));
        for pass in &plain.passes {
            assert!(!pass.steps.iter().any(|step| matches!(step, PassStep::FrameStamp { .. })));
        }
    }

    #[test]
    fn optimized_pass_recovers_alpha_after_render() {
        let frame = frame_with(Features::OPTIMIZED_RENDER);
        let plan = compile(&inputs(&frame));
        let steps = &plan.passes[0].steps;
        let render_at = steps.iter().position(|s| matches!(s, PassStep::RenderScene)).unwrap();
        let recover_at =
            steps.iter().position(|s| matches!(s, PassStep::RecoverAlpha { .. })).unwrap();
        assert!(recover_at > render_at);
    }

    #[test]
    fn clip_plane_transform_composes_stage_transform() {
        let mut frame = frame_with(Features::FOREGROUND_RENDER);
        frame.clip_plane.transform =
            Mat4::translate(crate::math::Vec3 { x: 0.0, y: 0.0, z: 2.0 });
        let mut inputs = inputs(&frame);
        inputs.stage_to_world =
            Mat4::translate(crate::math::Vec3 { x: 5.0, y: 0.0, z: 0.0 });
        let plan = compile(&inputs);
        let draw = plan.passes[0]
            .steps
            .iter()
            .find_map(|step| match step {
                PassStep::DrawClipPlane { draw, .. } => Some(*draw),
                _ => None,
            })
            .unwrap();
        let origin = draw.transform.transform_point(crate::math::Vec3::ZERO);
        assert!((origin.x - 5.0).abs() < 1e-5);
        assert!((origin.z - 2.0).abs() < 1e-5);
    }
}
