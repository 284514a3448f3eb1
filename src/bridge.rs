//! Transport to the external compositor process.
//!
//! [`BridgeHost`] is the seam to the native bridge library (conceptually a
//! fixed C ABI). Every entry point has an absence default, so a host built
//! without the library, or running while no compositor is attached, degrades
//! to "no data" instead of failing — this is a normal condition, re-probed
//! every frame.
//!
//! [`BridgeChannel`] layers the typed protocol on top: records are encoded to
//! their exact wire layout for the duration of one host call and never
//! retained past it.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use bytemuck::Pod;
use tracing::{debug, warn};

use crate::protocol::{
    ApplicationOutput, Features, GroundPlane, GROUND_PLANE_SLOT, InputFrame, LATEST, METADATA_SLOT,
    OutputFrame, Resolution, RESOLUTION_SLOT, TextureDescriptor, VIEWFINDER_SLOT, tag,
    to_host_epoch,
};

/// One versioned record as handed back by the native layer.
#[derive(Clone, Debug)]
pub struct ChannelRecord {
    pub bytes: Vec<u8>,
    /// Raw bridge-epoch ticks; convert with [`to_host_epoch`] before use.
    pub raw_timestamp: u64,
}

/// Native entry points of the bridge library.
///
/// Default method bodies model the library being absent: false/zero/none,
/// never an error. Implementations override what they support.
pub trait BridgeHost {
    fn is_capture_active(&self) -> bool {
        false
    }

    fn capture_width(&self) -> i32 {
        0
    }

    fn capture_height(&self) -> i32 {
        0
    }

    fn acquire_frame(&mut self, _timestamp: u64) -> i32 {
        -2
    }

    fn release_frame(&mut self) -> i32 {
        -2
    }

    fn current_time_ticks(&self) -> u64 {
        0
    }

    fn channel_object(&self, _slot: i32, _tag: u64, _timestamp: u64) -> Option<ChannelRecord> {
        None
    }

    fn compositor_channel_object(
        &self,
        _slot: i32,
        _tag: u64,
        _timestamp: u64,
    ) -> Option<ChannelRecord> {
        None
    }

    fn add_object_to_channel(&mut self, _slot: i32, _bytes: &[u8], _tag: u64) -> i32 {
        -2
    }

    fn add_object_to_compositor_channel(&mut self, _slot: i32, _bytes: &[u8], _tag: u64) -> i32 {
        -2
    }

    fn add_object_to_frame(&mut self, _bytes: &[u8], _tag: u64) -> i32 {
        -2
    }

    fn add_string_to_channel(&mut self, _slot: i32, _value: &str, _tag: u64) -> i32 {
        -2
    }

    fn add_texture(&mut self, _descriptor: &[u8], _tag: u64) -> i32 {
        -2
    }

    fn publish_textures(&mut self) {}

    fn issue_plugin_event(&mut self) {}

    fn new_frame(&mut self) -> i32 {
        -2
    }

    fn update_input_frame(&mut self, _frame: &[u8]) -> Option<Vec<u8>> {
        None
    }

    fn set_feature(&mut self, _bits: u64) -> u64 {
        0
    }

    fn clear_feature(&mut self, _bits: u64) -> u64 {
        0
    }
}

/// The bridge library is not present at all.
#[derive(Clone, Copy, Debug, Default)]
pub struct StubHost;

impl BridgeHost for StubHost {}

#[derive(Debug, Default)]
struct MemoryHostState {
    active: bool,
    time_ticks: u64,
    frame_counter: u64,
    last_frame_id: u64,
    reference_skew: u64,
    features: u64,
    /// Pose rank imposed by a simulated external controller.
    controller_pose_rank: Option<i8>,
    local: HashMap<(i32, u64), Vec<(u64, Vec<u8>)>>,
    compositor: HashMap<(i32, u64), Vec<(u64, Vec<u8>)>>,
    strings: HashMap<(i32, u64), String>,
    frame_objects: HashMap<u64, Vec<u8>>,
    textures: HashMap<u64, Vec<u8>>,
    plugin_events: u32,
    publishes: u32,
    frame_ticks: u32,
    last_input: Option<InputFrame>,
}

/// In-memory compositor double for tests and local development.
///
/// Clones share state, so a test can keep a handle while the channel owns
/// another (everything runs on one logical thread; see the concurrency notes
/// in the crate docs).
#[derive(Clone, Debug, Default)]
pub struct MemoryHost {
    state: Rc<RefCell<MemoryHostState>>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates the compositor attaching or detaching.
    pub fn set_active(&self, active: bool) {
        self.state.borrow_mut().active = active;
    }

    /// Advances the bridge clock.
    pub fn set_time_ticks(&self, ticks: u64) {
        self.state.borrow_mut().time_ticks = ticks;
    }

    /// Feature bits the compositor enables for the next synchronized frame.
    pub fn set_enabled_features(&self, features: Features) {
        self.state.borrow_mut().features = features.bits();
    }

    /// Simulates another controller holding the pose at the given rank.
    pub fn set_controller_pose_rank(&self, rank: Option<i8>) {
        self.state.borrow_mut().controller_pose_rank = rank;
    }

    /// Makes the next synchronized frame reference a frame id the host never
    /// saw, as happens when external frames are dropped.
    pub fn set_reference_skew(&self, skew: u64) {
        self.state.borrow_mut().reference_skew = skew;
    }

    /// Publishes a record on the host-readable (local) channel.
    pub fn seed_local_record<T: Pod>(&self, slot: i32, tag: u64, value: &T) {
        let mut state = self.state.borrow_mut();
        let ts = state.time_ticks;
        state
            .local
            .entry((slot, tag))
            .or_default()
            .push((ts, bytemuck::bytes_of(value).to_vec()));
    }

    /// Publishes a record on the compositor channel.
    pub fn seed_compositor_record<T: Pod>(&self, slot: i32, tag: u64, value: &T) {
        let mut state = self.state.borrow_mut();
        let ts = state.time_ticks;
        state
            .compositor
            .entry((slot, tag))
            .or_default()
            .push((ts, bytemuck::bytes_of(value).to_vec()));
    }

    pub fn string_record(&self, slot: i32, tag: u64) -> Option<String> {
        self.state.borrow().strings.get(&(slot, tag)).cloned()
    }

    pub fn compositor_record_bytes(&self, slot: i32, tag: u64) -> Option<Vec<u8>> {
        let state = self.state.borrow();
        let versions = state.compositor.get(&(slot, tag))?;
        versions.last().map(|(_, bytes)| bytes.clone())
    }

    pub fn frame_object_bytes(&self, tag: u64) -> Option<Vec<u8>> {
        self.state.borrow().frame_objects.get(&tag).cloned()
    }

    pub fn texture_bytes(&self, tag: u64) -> Option<Vec<u8>> {
        self.state.borrow().textures.get(&tag).cloned()
    }

    pub fn plugin_events(&self) -> u32 {
        self.state.borrow().plugin_events
    }

    pub fn frame_ticks(&self) -> u32 {
        self.state.borrow().frame_ticks
    }

    /// The frame most recently published through `update_input_frame`, after
    /// the host-side merge.
    pub fn last_input_frame(&self) -> Option<InputFrame> {
        self.state.borrow().last_input
    }

    pub fn last_frame_id(&self) -> u64 {
        self.state.borrow().last_frame_id
    }

    fn lookup(
        map: &HashMap<(i32, u64), Vec<(u64, Vec<u8>)>>,
        slot: i32,
        tag: u64,
        timestamp: u64,
    ) -> Option<ChannelRecord> {
        let versions = map.get(&(slot, tag))?;
        let (ts, bytes) = if timestamp == LATEST {
            versions.last()?
        } else {
            versions.iter().rev().find(|(ts, _)| *ts == timestamp)?
        };
        Some(ChannelRecord {
            bytes: bytes.clone(),
            raw_timestamp: *ts,
        })
    }
}

impl BridgeHost for MemoryHost {
    fn is_capture_active(&self) -> bool {
        self.state.borrow().active
    }

    fn current_time_ticks(&self) -> u64 {
        self.state.borrow().time_ticks
    }

    fn channel_object(&self, slot: i32, tag: u64, timestamp: u64) -> Option<ChannelRecord> {
        if !self.state.borrow().active {
            return None;
        }
        MemoryHost::lookup(&self.state.borrow().local, slot, tag, timestamp)
    }

    fn compositor_channel_object(
        &self,
        slot: i32,
        tag: u64,
        timestamp: u64,
    ) -> Option<ChannelRecord> {
        if !self.state.borrow().active {
            return None;
        }
        MemoryHost::lookup(&self.state.borrow().compositor, slot, tag, timestamp)
    }

    fn add_object_to_channel(&mut self, slot: i32, bytes: &[u8], tag: u64) -> i32 {
        let mut state = self.state.borrow_mut();
        if !state.active {
            return -2;
        }
        let ts = state.time_ticks;
        state
            .local
            .entry((slot, tag))
            .or_default()
            .push((ts, bytes.to_vec()));
        0
    }

    fn add_object_to_compositor_channel(&mut self, slot: i32, bytes: &[u8], tag: u64) -> i32 {
        let mut state = self.state.borrow_mut();
        if !state.active {
            return -2;
        }
        let ts = state.time_ticks;
        state
            .compositor
            .entry((slot, tag))
            .or_default()
            .push((ts, bytes.to_vec()));
        0
    }

    fn add_object_to_frame(&mut self, bytes: &[u8], tag: u64) -> i32 {
        let mut state = self.state.borrow_mut();
        if !state.active {
            return -2;
        }
        state.frame_objects.insert(tag, bytes.to_vec());
        0
    }

    fn add_string_to_channel(&mut self, slot: i32, value: &str, tag: u64) -> i32 {
        let mut state = self.state.borrow_mut();
        if !state.active {
            return -2;
        }
        state.strings.insert((slot, tag), value.to_string());
        0
    }

    fn add_texture(&mut self, descriptor: &[u8], tag: u64) -> i32 {
        let mut state = self.state.borrow_mut();
        if !state.active {
            return -2;
        }
        state.textures.insert(tag, descriptor.to_vec());
        0
    }

    fn publish_textures(&mut self) {
        self.state.borrow_mut().publishes += 1;
    }

    fn issue_plugin_event(&mut self) {
        self.state.borrow_mut().plugin_events += 1;
    }

    fn new_frame(&mut self) -> i32 {
        let mut state = self.state.borrow_mut();
        if !state.active {
            return -2;
        }
        state.frame_ticks += 1;
        0
    }

    fn update_input_frame(&mut self, frame: &[u8]) -> Option<Vec<u8>> {
        let mut state = self.state.borrow_mut();
        if !state.active {
            return None;
        }
        let mut merged: InputFrame = bytemuck::try_pod_read_unaligned(frame).ok()?;
        state.frame_counter += 1;
        merged.reference_frame = state.last_frame_id.wrapping_add(state.reference_skew);
        merged.frame_id = state.frame_counter;
        merged.set_features(Features::from_bits_truncate(state.features));
        if let Some(rank) = state.controller_pose_rank {
            merged.priority.pose = rank;
        }
        state.last_frame_id = merged.frame_id;
        state.last_input = Some(merged);
        Some(bytemuck::bytes_of(&merged).to_vec())
    }

    fn set_feature(&mut self, bits: u64) -> u64 {
        let mut state = self.state.borrow_mut();
        state.features |= bits;
        state.features
    }

    fn clear_feature(&mut self, bits: u64) -> u64 {
        let mut state = self.state.borrow_mut();
        state.features &= !bits;
        state.features
    }
}

/// Tags the channel uses on hot paths, packed once.
struct KnownTags {
    out_frame: u64,
    sdk_resolution: u64,
    set_ground: u64,
    out_texture: u64,
}

impl KnownTags {
    fn pack() -> Self {
        Self {
            out_frame: tag("OUTFRAME"),
            sdk_resolution: tag("SDKRes"),
            set_ground: tag("SetGND"),
            out_texture: tag("OUTTEX"),
        }
    }
}

/// Typed accessors over a [`BridgeHost`].
pub struct BridgeChannel {
    host: Box<dyn BridgeHost>,
    tags: KnownTags,
}

impl BridgeChannel {
    pub fn new(host: Box<dyn BridgeHost>) -> Self {
        Self {
            host,
            tags: KnownTags::pack(),
        }
    }

    /// Channel with no bridge library behind it; every read yields no data.
    pub fn detached() -> Self {
        Self::new(Box::new(StubHost))
    }

    /// Single round-trip activity probe, run every host frame.
    pub fn is_external_active(&self) -> bool {
        self.host.is_capture_active()
    }

    /// Current bridge time in host-epoch ticks.
    pub fn current_time(&self) -> u64 {
        to_host_epoch(self.host.current_time_ticks())
    }

    /// Reads a record from the host-side channel. Absence is a normal
    /// condition and yields `None`.
    pub fn read_record<T: Pod>(&self, slot: i32, tag: u64, timestamp: u64) -> Option<T> {
        decode(self.host.channel_object(slot, tag, timestamp)?)
    }

    /// Reads a record from the compositor's channel.
    pub fn read_compositor_record<T: Pod>(&self, slot: i32, tag: u64, timestamp: u64) -> Option<T> {
        decode(self.host.compositor_channel_object(slot, tag, timestamp)?)
    }

    /// Host-epoch timestamp of the newest version of a record, if any.
    pub fn record_time(&self, slot: i32, tag: u64) -> Option<u64> {
        let rec = self.host.channel_object(slot, tag, LATEST)?;
        Some(to_host_epoch(rec.raw_timestamp))
    }

    pub fn write_record<T: Pod>(&mut self, slot: i32, value: &T, tag: u64) -> bool {
        self.host
            .add_object_to_channel(slot, bytemuck::bytes_of(value), tag)
            >= 0
    }

    pub fn write_compositor_record<T: Pod>(&mut self, slot: i32, value: &T, tag: u64) -> bool {
        self.host
            .add_object_to_compositor_channel(slot, bytemuck::bytes_of(value), tag)
            >= 0
    }

    pub fn write_string(&mut self, tag_name: &str, value: &str, slot: i32) -> bool {
        self.host.add_string_to_channel(slot, value, tag(tag_name)) >= 0
    }

    pub fn write_texture(&mut self, descriptor: &TextureDescriptor, tag: u64) -> bool {
        self.host.add_texture(bytemuck::bytes_of(descriptor), tag) >= 0
    }

    /// Publishes a color-buffer descriptor under the tag its logical id maps
    /// to (`BGCTEX`/`FGCTEX`/`OPTTEX`).
    pub fn publish_texture(&mut self, descriptor: &TextureDescriptor) -> bool {
        let name = descriptor.id().tag_name();
        if name.is_empty() {
            warn!("refusing to publish texture with undefined buffer id");
            return false;
        }
        self.write_texture(descriptor, tag(name))
    }

    /// Writes the host's per-frame output record to the current frame.
    pub fn write_output_frame(&mut self, frame: &OutputFrame) -> bool {
        self.host
            .add_object_to_frame(bytemuck::bytes_of(frame), self.tags.out_frame)
            >= 0
    }

    /// Publishes the host's claim and synchronizes the compositor-owned
    /// input frame in place. Returns `false` (leaving an empty frame) when no
    /// compositor is attached.
    pub fn update_input_frame(&mut self, frame: &mut InputFrame) -> bool {
        let published = bytemuck::bytes_of(frame).to_vec();
        match self.host.update_input_frame(&published) {
            Some(bytes) => match bytemuck::try_pod_read_unaligned(&bytes) {
                Ok(merged) => {
                    *frame = merged;
                    true
                }
                Err(_) => {
                    warn!(
                        got = bytes.len(),
                        want = std::mem::size_of::<InputFrame>(),
                        "input frame size mismatch, treating as absent"
                    );
                    *frame = InputFrame::default();
                    false
                }
            },
            None => {
                *frame = InputFrame::default();
                false
            }
        }
    }

    /// Reads the capture resolution the compositor expects.
    pub fn resolution(&self, out: &mut Resolution) -> bool {
        match self.read_record(RESOLUTION_SLOT, self.tags.sdk_resolution, LATEST) {
            Some(res) => {
                *out = res;
                true
            }
            None => false,
        }
    }

    /// The compositor's own composited output, when it publishes one.
    pub fn viewfinder_texture(&self) -> Option<TextureDescriptor> {
        self.read_compositor_record(VIEWFINDER_SLOT, self.tags.out_texture, LATEST)
    }

    /// Publishes the ground plane in stage-local space.
    pub fn set_ground_plane(&mut self, plane: GroundPlane) -> bool {
        let tag = self.tags.set_ground;
        self.write_compositor_record(GROUND_PLANE_SLOT, &plane, tag)
    }

    /// Publishes the static application metadata strings. Called once per
    /// activation.
    pub fn submit_application_output(&mut self, output: &ApplicationOutput) {
        let support = format!("{:?}", output.supported_features);
        let pairs: [(&str, &str); 9] = [
            ("APPNAME", &output.application_name),
            ("APPVER", &output.application_version),
            ("ENGNAME", &output.engine_name),
            ("ENGVER", &output.engine_version),
            ("GFXAPI", &output.graphics_api),
            ("SDKID", &output.sdk_id),
            ("SDKVER", &output.sdk_version),
            ("SUPPORT", &support),
            ("XRNAME", &output.xr_device_name),
        ];
        for (key, value) in pairs {
            if !self.write_string(key, value, METADATA_SLOT) {
                debug!(key, "metadata string not accepted (compositor absent?)");
            }
        }
    }

    /// Advances the compositor to the next frame. Commit of the previous
    /// frame happens implicitly here; the protocol deliberately offers no
    /// early-commit entry point, which could stall the compositor pipeline.
    pub fn frame_tick(&mut self) {
        self.host.new_frame();
    }

    /// Signals the GPU-side plugin that this frame's textures are final.
    pub fn signal_frame_ready(&mut self) {
        self.host.issue_plugin_event();
    }

    pub fn publish_textures(&mut self) {
        self.host.publish_textures();
    }

    pub fn set_features(&mut self, features: Features) -> Features {
        Features::from_bits_truncate(self.host.set_feature(features.bits()))
    }

    pub fn clear_features(&mut self, features: Features) -> Features {
        Features::from_bits_truncate(self.host.clear_feature(features.bits()))
    }
}

fn decode<T: Pod>(rec: ChannelRecord) -> Option<T> {
    match bytemuck::try_pod_read_unaligned(&rec.bytes) {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(
                got = rec.bytes.len(),
                want = std::mem::size_of::<T>(),
                "channel record size mismatch, treating as absent"
            );
            None
        }
    }
}
