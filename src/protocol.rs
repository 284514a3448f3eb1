//! Wire-level protocol shared with the external compositor.
//!
//! Records exchanged through the bridge are fixed-layout `#[repr(C)]` structs
//! addressed by a `(slot, tag, timestamp)` triple. Padding inside the records
//! that carry 8-byte fields is explicit so the layout is exact on every
//! platform and the structs stay [`bytemuck::Pod`].

use bytemuck::{Pod, Zeroable};

use crate::math::{Mat4, Quat, Vec3};

/// Identifier reported to the compositor in the SDKID metadata string.
pub const SDK_ID: &str = "SL7KQ2VD0XMR8JW1HTGY5PCZB3NA4EF6";
/// Version reported in the SDKVER metadata string.
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Slot carrying the compositor-side ground plane record.
pub const GROUND_PLANE_SLOT: i32 = 2;
/// Slot carrying the one-shot application metadata strings.
pub const METADATA_SLOT: i32 = 5;
/// Slot carrying the compositor's composited viewfinder texture.
pub const VIEWFINDER_SLOT: i32 = 11;
/// Slot carrying the capture resolution the compositor expects.
pub const RESOLUTION_SLOT: i32 = 15;

/// Timestamp value requesting the most recent version of a record.
pub const LATEST: u64 = u64::MAX;

/// Offset between the bridge tick epoch and the host tick epoch.
pub const EPOCH_OFFSET_TICKS: u64 = 621_355_968_000_000_000;

/// Converts a raw bridge timestamp to the host epoch.
///
/// Applied on every timestamp read; the conversion is a pure function of the
/// raw value, so converting the same raw input twice yields the same result.
pub fn to_host_epoch(raw_ticks: u64) -> u64 {
    raw_ticks + EPOCH_OFFSET_TICKS
}

/// Packs up to 8 ASCII characters of a name into a channel tag.
///
/// Byte `i` of the name lands at bit `i * 8`. Names longer than 8 characters
/// are truncated, so two names sharing their first 8 characters alias to the
/// same tag; this is an accepted property of the protocol, not a bug.
/// Pre-compute tags for hot paths.
pub fn tag(name: &str) -> u64 {
    let mut out = 0u64;
    for (i, b) in name.bytes().take(8).enumerate() {
        out |= u64::from(b) << (i * 8);
    }
    out
}

/// Rank at and below which the host application may write a sub-field.
pub const GAME_RANK: i8 = 63;
/// Rank written by [`Priority::released`]; strictly above the game rank, so a
/// released sub-field is no longer host-settable until control is granted
/// again.
pub const RELEASED_RANK: i8 = 64;

bitflags::bitflags! {
    /// Capabilities negotiated per frame through the input frame.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct Features: u64 {
        const BACKGROUND_RENDER = 1;
        const FOREGROUND_RENDER = 1 << 1;
        const COMPLEX_CLIP_PLANE = 1 << 2;
        const BACKGROUND_DEPTH_RENDER = 1 << 3;
        const OVERRIDE_POST_PROCESSING = 1 << 4;
        const FIX_FOREGROUND_ALPHA = 1 << 5;
        const GROUND_CLIP_PLANE = 1 << 6;
        const RELEASE_CONTROL = 1 << 15;
        const OPTIMIZED_RENDER = 1 << 28;
        const INTERLACED_RENDER = 1 << 29;
        const DEBUG_CLIP_PLANE = 1 << 48;
    }
}

/// Per-sub-field ownership arbitration ranks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct Priority {
    pub pose: i8,
    pub clip_plane: i8,
    pub stage: i8,
    pub resolution: i8,
    pub feature: i8,
    pub near_far_adjustment: i8,
    pub ground_plane: i8,
    pub reserved: i8,
}

impl Priority {
    /// Every sub-field relinquished. Near/far stays at the game rank; it is
    /// always derived from the active camera, never from the compositor.
    pub fn released() -> Self {
        Self {
            pose: RELEASED_RANK,
            clip_plane: RELEASED_RANK,
            stage: RELEASED_RANK,
            resolution: RELEASED_RANK,
            feature: RELEASED_RANK,
            near_far_adjustment: GAME_RANK,
            ground_plane: RELEASED_RANK,
            reserved: RELEASED_RANK,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::released()
    }
}

/// Camera pose as exchanged with the compositor.
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Pose {
    pub projection: Mat4,
    pub local_position: Vec3,
    pub local_rotation: Quat,
    pub vertical_fov: f32,
    pub near_clip: f32,
    pub far_clip: f32,
    pub unused0: i32,
    pub unused1: i32,
}

impl Pose {
    pub const IDENTITY_FOV: f32 = 90.0;
}

impl Default for Pose {
    fn default() -> Self {
        Self {
            projection: Mat4::perspective(Self::IDENTITY_FOV, 1.0, 0.01, 1000.0),
            local_position: Vec3::ZERO,
            local_rotation: Quat::IDENTITY,
            vertical_fov: Self::IDENTITY_FOV,
            near_clip: 0.01,
            far_clip: 1000.0,
            unused0: 0,
            unused1: 0,
        }
    }
}

/// Clip-plane geometry: transform in stage-local space plus height-map
/// dimensions and tessellation for the complex variant.
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct ClipPlane {
    pub transform: Mat4,
    pub width: i32,
    pub height: i32,
    pub tessellation: f32,
}

/// Local position/rotation/scale triplet.
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct TransformRec {
    pub local_position: Vec3,
    pub local_rotation: Quat,
    pub local_scale: Vec3,
}

impl Default for TransformRec {
    fn default() -> Self {
        Self {
            local_position: Vec3::ZERO,
            local_rotation: Quat::IDENTITY,
            local_scale: Vec3::ONE,
        }
    }
}

/// Compositor-owned frame state, re-synchronized wholesale every rendered
/// frame. `frame_id` is assigned by the bridge; `reference_frame` carries the
/// id of the frame this one extends.
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct InputFrame {
    pub pose: Pose,
    pub clip_plane: ClipPlane,
    pub stage_transform: TransformRec,
    _pad0: u32,
    features: u64,
    pub ground_clip_plane: ClipPlane,
    _pad1: u32,
    pub frame_id: u64,
    pub reference_frame: u64,
    pub priority: Priority,
}

impl InputFrame {
    pub fn features(&self) -> Features {
        Features::from_bits_truncate(self.features)
    }

    pub fn set_features(&mut self, features: Features) {
        self.features = features.bits();
    }

    /// Claims pose ownership for exactly the current frame.
    pub fn obtain_control(&mut self) {
        self.priority = Priority::released();
        self.priority.pose = GAME_RANK;
    }

    /// Relinquishes every claim; ranks land strictly above the game rank.
    pub fn release_control(&mut self) {
        self.priority = Priority::released();
    }
}

impl Default for InputFrame {
    fn default() -> Self {
        Self {
            pose: Pose::default(),
            clip_plane: ClipPlane::default(),
            stage_transform: TransformRec::default(),
            _pad0: 0,
            features: 0,
            ground_clip_plane: ClipPlane::default(),
            _pad1: 0,
            frame_id: 0,
            reference_frame: 0,
            priority: Priority::released(),
        }
    }
}

/// Rendering pipeline kind reported in the output frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u32)]
pub enum RenderingPipelineKind {
    #[default]
    Undefined = 0,
    Forward = 1,
    Deferred = 2,
    VertexLit = 3,
    Universal = 4,
    HighDefinition = 5,
}

/// World-space description of the tracked play space.
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct TrackedSpace {
    pub world_position: Vec3,
    pub world_rotation: Quat,
    pub local_scale: Vec3,
    pub local_to_world: Mat4,
    pub world_to_local: Mat4,
}

impl Default for TrackedSpace {
    fn default() -> Self {
        Self {
            world_position: Vec3::ZERO,
            world_rotation: Quat::IDENTITY,
            local_scale: Vec3::ZERO,
            local_to_world: Mat4::IDENTITY,
            world_to_local: Mat4::IDENTITY,
        }
    }
}

/// Host-produced frame description, written once per rendered frame under
/// the `OUTFRAME` tag.
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct OutputFrame {
    rendering_pipeline: u32,
    pub tracked_space: TrackedSpace,
}

impl OutputFrame {
    pub fn new(pipeline: RenderingPipelineKind, tracked_space: TrackedSpace) -> Self {
        Self {
            rendering_pipeline: pipeline as u32,
            tracked_space,
        }
    }

    pub fn rendering_pipeline(&self) -> RenderingPipelineKind {
        match self.rendering_pipeline {
            1 => RenderingPipelineKind::Forward,
            2 => RenderingPipelineKind::Deferred,
            3 => RenderingPipelineKind::VertexLit,
            4 => RenderingPipelineKind::Universal,
            5 => RenderingPipelineKind::HighDefinition,
            _ => RenderingPipelineKind::Undefined,
        }
    }
}

/// Capture resolution the compositor expects; drives render-target sizing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct Resolution {
    pub width: i32,
    pub height: i32,
}

impl Resolution {
    pub const ZERO: Self = Self {
        width: 0,
        height: 0,
    };

    pub fn aspect(&self) -> f32 {
        if self.height > 0 {
            self.width as f32 / self.height as f32
        } else {
            1.0
        }
    }
}

/// Plane distance + normal in the active stage's local space.
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct GroundPlane {
    pub distance: f32,
    pub normal: Vec3,
}

impl Default for GroundPlane {
    fn default() -> Self {
        Self {
            distance: 0.0,
            normal: Vec3::UP,
        }
    }
}

/// Logical buffer a published texture belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum TextureId {
    Undefined = 0,
    BackgroundColor = 10,
    ForegroundColor = 20,
    OptimizedColor = 30,
}

impl TextureId {
    /// Channel tag the descriptor is published under.
    pub fn tag_name(self) -> &'static str {
        match self {
            Self::Undefined => "",
            Self::BackgroundColor => "BGCTEX",
            Self::ForegroundColor => "FGCTEX",
            Self::OptimizedColor => "OPTTEX",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u32)]
pub enum TextureDevice {
    #[default]
    Undefined = 0,
    Raw = 1,
    Directx = 2,
    Opengl = 3,
    Vulkan = 4,
    Metal = 5,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u32)]
pub enum TextureColorSpace {
    #[default]
    Undefined = 0,
    Linear = 1,
    Srgb = 2,
}

const TEXTURE_KIND_COLOR_BUFFER: u32 = 1;
const TEXTURE_FORMAT_ARGB32: u32 = 10;

/// Descriptor for one published color buffer. References but does not own
/// the underlying GPU resource.
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct TextureDescriptor {
    id: u32,
    _pad: u32,
    pub texture_handle: u64,
    pub shared_handle: u64,
    device: u32,
    kind: u32,
    format: u32,
    color_space: u32,
    pub width: i32,
    pub height: i32,
}

impl TextureDescriptor {
    pub fn color_buffer(
        id: TextureId,
        texture_handle: u64,
        device: TextureDevice,
        color_space: TextureColorSpace,
        width: i32,
        height: i32,
    ) -> Self {
        Self {
            id: id as u32,
            _pad: 0,
            texture_handle,
            shared_handle: 0,
            device: device as u32,
            kind: TEXTURE_KIND_COLOR_BUFFER,
            format: TEXTURE_FORMAT_ARGB32,
            color_space: color_space as u32,
            width,
            height,
        }
    }

    pub fn id(&self) -> TextureId {
        match self.id {
            10 => TextureId::BackgroundColor,
            20 => TextureId::ForegroundColor,
            30 => TextureId::OptimizedColor,
            _ => TextureId::Undefined,
        }
    }
}

/// Static application/engine metadata submitted once on activation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ApplicationOutput {
    pub supported_features: Features,
    pub engine_name: String,
    pub engine_version: String,
    pub application_name: String,
    pub application_version: String,
    pub xr_device_name: String,
    pub graphics_api: String,
    pub sdk_id: String,
    pub sdk_version: String,
}

impl ApplicationOutput {
    pub fn new(application_name: impl Into<String>, application_version: impl Into<String>) -> Self {
        Self {
            supported_features: Features::BACKGROUND_RENDER
                | Features::FOREGROUND_RENDER
                | Features::OVERRIDE_POST_PROCESSING
                | Features::FIX_FOREGROUND_ALPHA,
            application_name: application_name.into(),
            application_version: application_version.into(),
            sdk_id: SDK_ID.to_string(),
            sdk_version: SDK_VERSION.to_string(),
            ..Self::default()
        }
    }
}
