//! Integration configuration and its invalidation state machine.
//!
//! Scene references that the cloned camera is built from (HMD camera, stage
//! root, camera prefab, excluded behaviours) cannot change out from under an
//! in-flight frame. Writes to those fields are staged and applied at a single
//! point in the per-frame tick; while anything is staged the setup reports
//! itself invalid, which tears the active session down for one tick and
//! rebuilds it against the new references.

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::engine::{CameraId, NodeId};

bitflags::bitflags! {
    /// Which camera-affecting fields have a staged change.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct InvalidationFlags: u32 {
        const HMD_CAMERA = 1;
        const STAGE = 1 << 1;
        const CAMERA_PREFAB = 1 << 2;
        const EXCLUDE_BEHAVIOURS = 1 << 3;
    }
}

fn default_layer_mask() -> u32 {
    !0
}

fn default_exclude_behaviours() -> Vec<String> {
    vec!["AudioListener".to_string(), "Collider".to_string()]
}

/// Declarative description of how the integration attaches to the scene.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SetupConfig {
    /// Camera the spectator view is derived from. Required.
    pub hmd_camera: Option<CameraId>,
    /// Tracked-space origin node. Strongly recommended.
    pub stage: Option<NodeId>,
    /// Node the compositor moves when it owns the stage transform.
    pub stage_transform: Option<NodeId>,
    /// Pre-configured camera to clone instead of the HMD camera.
    pub camera_prefab: Option<CameraId>,
    /// Layers the spectator camera renders.
    pub spectator_layer_mask: u32,
    /// Behaviour names stripped from the cloned camera.
    pub exclude_behaviours: Vec<String>,
    pub disable_standard_assets: bool,
    /// Repair alpha wrecked by post-processing on the foreground layer.
    pub fix_post_effects_alpha: bool,
}

impl Default for SetupConfig {
    fn default() -> Self {
        SetupConfig {
            hmd_camera: None,
            stage: None,
            stage_transform: None,
            camera_prefab: None,
            spectator_layer_mask: default_layer_mask(),
            exclude_behaviours: default_exclude_behaviours(),
            disable_standard_assets: false,
            fix_post_effects_alpha: false,
        }
    }
}

/// One staged change to a camera-affecting field.
#[derive(Clone, Debug, PartialEq)]
enum ConfigChange {
    HmdCamera(Option<CameraId>),
    Stage(Option<NodeId>),
    CameraPrefab(Option<CameraId>),
    ExcludeBehaviours(Vec<String>),
}

impl ConfigChange {
    fn flag(&self) -> InvalidationFlags {
        match self {
            ConfigChange::HmdCamera(_) => InvalidationFlags::HMD_CAMERA,
            ConfigChange::Stage(_) => InvalidationFlags::STAGE,
            ConfigChange::CameraPrefab(_) => InvalidationFlags::CAMERA_PREFAB,
            ConfigChange::ExcludeBehaviours(_) => InvalidationFlags::EXCLUDE_BEHAVIOURS,
        }
    }
}

/// Active configuration plus the staged-change queue.
#[derive(Debug, Default)]
pub struct Setup {
    active: SetupConfig,
    pending: Vec<ConfigChange>,
    invalidate: InvalidationFlags,
}

impl Setup {
    pub fn new(config: SetupConfig) -> Self {
        Setup { active: config, pending: Vec::new(), invalidate: InvalidationFlags::empty() }
    }

    /// The configuration frames are currently rendered against. Staged
    /// changes are not visible here until [`Setup::apply_pending`] runs.
    pub fn config(&self) -> &SetupConfig {
        &self.active
    }

    pub fn invalidation_flags(&self) -> InvalidationFlags {
        self.invalidate
    }

    pub fn has_pending(&self) -> bool {
        !self.invalidate.is_empty()
    }

    pub fn set_hmd_camera(&mut self, camera: Option<CameraId>) {
        if camera.is_none() {
            warn!("hmd camera cleared, session will not be able to activate");
        }
        if self.active.hmd_camera == camera
            && !self.invalidate.contains(InvalidationFlags::HMD_CAMERA)
        {
            return;
        }
        self.stage(ConfigChange::HmdCamera(camera));
    }

    pub fn set_stage(&mut self, stage: Option<NodeId>) {
        if stage.is_none() {
            warn!("stage cleared, tracked-space placement will assume world origin");
        }
        if self.active.stage == stage && !self.invalidate.contains(InvalidationFlags::STAGE) {
            return;
        }
        self.stage(ConfigChange::Stage(stage));
    }

    pub fn set_camera_prefab(&mut self, prefab: Option<CameraId>) {
        if self.active.camera_prefab == prefab
            && !self.invalidate.contains(InvalidationFlags::CAMERA_PREFAB)
        {
            return;
        }
        self.stage(ConfigChange::CameraPrefab(prefab));
    }

    pub fn set_exclude_behaviours(&mut self, behaviours: Vec<String>) {
        if self.active.exclude_behaviours == behaviours
            && !self.invalidate.contains(InvalidationFlags::EXCLUDE_BEHAVIOURS)
        {
            return;
        }
        self.stage(ConfigChange::ExcludeBehaviours(behaviours));
    }

    // Fields below do not affect the cloned camera and take effect
    // immediately.

    pub fn set_stage_transform(&mut self, node: Option<NodeId>) {
        self.active.stage_transform = node;
    }

    pub fn set_spectator_layer_mask(&mut self, mask: u32) {
        self.active.spectator_layer_mask = mask;
    }

    pub fn set_disable_standard_assets(&mut self, disable: bool) {
        self.active.disable_standard_assets = disable;
    }

    pub fn set_fix_post_effects_alpha(&mut self, fix: bool) {
        self.active.fix_post_effects_alpha = fix;
    }

    fn stage(&mut self, change: ConfigChange) {
        let flag = change.flag();
        self.pending.retain(|staged| staged.flag() != flag);
        self.pending.push(change);
        self.invalidate |= flag;
    }

    /// Applies every staged change at once. Returns true if anything was
    /// applied.
    pub fn apply_pending(&mut self) -> bool {
        if self.pending.is_empty() {
            return false;
        }
        for change in self.pending.drain(..) {
            match change {
                ConfigChange::HmdCamera(camera) => self.active.hmd_camera = camera,
                ConfigChange::Stage(stage) => self.active.stage = stage,
                ConfigChange::CameraPrefab(prefab) => self.active.camera_prefab = prefab,
                ConfigChange::ExcludeBehaviours(behaviours) => {
                    self.active.exclude_behaviours = behaviours;
                }
            }
        }
        self.invalidate = InvalidationFlags::empty();
        true
    }

    /// Whether the active configuration can host a session. False while any
    /// change is staged, so a reconfiguration always passes through one
    /// inactive tick.
    pub fn is_valid(&self) -> bool {
        if !self.invalidate.is_empty() {
            return false;
        }
        if self.active.hmd_camera.is_none() {
            error!("hmd camera is not set");
            return false;
        }
        if self.active.stage.is_none() {
            warn!("stage is not set, assuming world origin");
        }
        if self.active.spectator_layer_mask == 0 {
            warn!("spectator layer mask is zero, spectator output will be empty");
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_setup() -> Setup {
        let setup = Setup::new(SetupConfig {
            hmd_camera: Some(CameraId(1)),
            stage: Some(NodeId(2)),
            ..SetupConfig::default()
        });
        assert!(setup.is_valid());
        setup
    }

    #[test]
    fn staged_change_is_invisible_until_applied() {
        let mut setup = valid_setup();
        setup.set_hmd_camera(Some(CameraId(9)));
        assert_eq!(setup.config().hmd_camera, Some(CameraId(1)));
        assert!(setup.has_pending());
        assert!(!setup.is_valid());

        assert!(setup.apply_pending());
        assert_eq!(setup.config().hmd_camera, Some(CameraId(9)));
        assert!(!setup.has_pending());
        assert!(setup.is_valid());
    }

    #[test]
    fn equal_value_write_is_a_no_op() {
        let mut setup = valid_setup();
        setup.set_stage(Some(NodeId(2)));
        assert!(!setup.has_pending());
        assert!(!setup.apply_pending());
    }

    #[test]
    fn later_write_replaces_staged_value_of_same_kind() {
        let mut setup = valid_setup();
        setup.set_camera_prefab(Some(CameraId(5)));
        setup.set_camera_prefab(Some(CameraId(6)));
        setup.apply_pending();
        assert_eq!(setup.config().camera_prefab, Some(CameraId(6)));
    }

    #[test]
    fn writing_back_the_active_value_still_applies_when_staged() {
        let mut setup = valid_setup();
        setup.set_hmd_camera(Some(CameraId(9)));
        // Reverting to the active value must not silently drop the staged
        // state; the apply point still runs and clears it.
        setup.set_hmd_camera(Some(CameraId(1)));
        assert!(setup.has_pending());
        assert!(setup.apply_pending());
        assert_eq!(setup.config().hmd_camera, Some(CameraId(1)));
        assert!(setup.is_valid());
    }

    #[test]
    fn changes_apply_atomically() {
        let mut setup = valid_setup();
        setup.set_hmd_camera(Some(CameraId(10)));
        setup.set_stage(Some(NodeId(20)));
        setup.set_exclude_behaviours(vec!["Collider".to_string()]);

        assert_eq!(setup.config().hmd_camera, Some(CameraId(1)));
        assert_eq!(setup.config().stage, Some(NodeId(2)));

        setup.apply_pending();
        assert_eq!(setup.config().hmd_camera, Some(CameraId(10)));
        assert_eq!(setup.config().stage, Some(NodeId(20)));
        assert_eq!(setup.config().exclude_behaviours, vec!["Collider".to_string()]);
    }

    #[test]
    fn missing_hmd_camera_is_invalid() {
        let setup = Setup::new(SetupConfig::default());
        assert!(!setup.is_valid());
    }

    #[test]
    fn non_camera_fields_take_effect_immediately() {
        let mut setup = valid_setup();
        setup.set_spectator_layer_mask(0x0f);
        setup.set_fix_post_effects_alpha(true);
        assert!(!setup.has_pending());
        assert_eq!(setup.config().spectator_layer_mask, 0x0f);
        assert!(setup.config().fix_post_effects_alpha);
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = SetupConfig {
            hmd_camera: Some(CameraId(3)),
            stage_transform: Some(NodeId(7)),
            fix_post_effects_alpha: true,
            ..SetupConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: SetupConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
