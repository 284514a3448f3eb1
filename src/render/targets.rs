//! Render target lifecycle for the compositing passes.

use tracing::{debug, error};

use crate::engine::{Engine, TargetDesc, TargetId};
use crate::protocol::{ClipPlane, Features, Resolution};
use crate::render::plan::TargetRole;

/// One owned target plus the size it was allocated at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TargetHandle {
    pub id: TargetId,
    pub width: i32,
    pub height: i32,
}

/// Targets owned by the renderer, resized and released as the compositor's
/// requested features and resolution change.
#[derive(Debug, Default)]
pub struct TargetSet {
    background: Option<TargetHandle>,
    foreground: Option<TargetHandle>,
    optimized: Option<TargetHandle>,
    /// Height map the compositor writes for the complex clip plane. Sized
    /// from the clip-plane record, not the output resolution.
    complex_clip: Option<TargetHandle>,
}

const COLOR_DEPTH_BITS: i32 = 24;

fn sync_slot(
    engine: &mut dyn Engine,
    slot: &mut Option<TargetHandle>,
    wanted: bool,
    width: i32,
    height: i32,
    depth_bits: i32,
    label: &str,
) {
    if !wanted || width <= 0 || height <= 0 {
        if let Some(handle) = slot.take() {
            debug!(label, "releasing render target");
            engine.destroy_target(handle.id);
        }
        return;
    }
    if let Some(handle) = slot {
        if handle.width == width && handle.height == height {
            return;
        }
        engine.destroy_target(handle.id);
        *slot = None;
    }
    match engine.create_target(TargetDesc { width, height, depth_bits }) {
        Ok(id) => {
            debug!(label, width, height, "allocated render target");
            *slot = Some(TargetHandle { id, width, height });
        }
        Err(err) => {
            error!(label, width, height, %err, "render target allocation failed");
        }
    }
}

impl TargetSet {
    /// Brings the owned targets in line with the requested features. A slot
    /// whose allocation fails stays empty, which skips its pass for the
    /// frame.
    pub fn sync(
        &mut self,
        engine: &mut dyn Engine,
        features: Features,
        resolution: Resolution,
        clip_plane: &ClipPlane,
    ) {
        let width = resolution.width;
        let height = resolution.height;
        sync_slot(
            engine,
            &mut self.background,
            features.contains(Features::BACKGROUND_RENDER),
            width,
            height,
            COLOR_DEPTH_BITS,
            "background",
        );
        sync_slot(
            engine,
            &mut self.foreground,
            features.contains(Features::FOREGROUND_RENDER),
            width,
            height,
            COLOR_DEPTH_BITS,
            "foreground",
        );
        sync_slot(
            engine,
            &mut self.optimized,
            features.contains(Features::OPTIMIZED_RENDER),
            width,
            height,
            COLOR_DEPTH_BITS,
            "optimized",
        );
        sync_slot(
            engine,
            &mut self.complex_clip,
            features.contains(Features::COMPLEX_CLIP_PLANE),
            clip_plane.width,
            clip_plane.height,
            0,
            "complex_clip",
        );
    }

    pub fn get(&self, role: TargetRole) -> Option<&TargetHandle> {
        match role {
            TargetRole::Background => self.background.as_ref(),
            TargetRole::Foreground => self.foreground.as_ref(),
            TargetRole::Optimized => self.optimized.as_ref(),
        }
    }

    pub fn complex_clip(&self) -> Option<&TargetHandle> {
        self.complex_clip.as_ref()
    }

    pub fn release(&mut self, engine: &mut dyn Engine) {
        for slot in [
            &mut self.background,
            &mut self.foreground,
            &mut self.optimized,
            &mut self.complex_clip,
        ] {
            if let Some(handle) = slot.take() {
                engine.destroy_target(handle.id);
            }
        }
    }
}
