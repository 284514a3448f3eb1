//! Capture session lifecycle.
//!
//! A [`Session`] becomes active when three conditions hold at the same time:
//! the setup is valid, the session is enabled, and an external compositor is
//! attached. Activation is edge-triggered; the session submits its metadata,
//! builds a [`MixedRealityRenderer`] and fires the activation callbacks, and
//! tears everything down again the moment any condition fails.

use tracing::{debug, error};

use crate::bridge::BridgeChannel;
use crate::engine::Engine;
use crate::error::StagelinkResult;
use crate::hooks::{ObserverId, Observers, RenderHooks};
use crate::math::{Quat, Vec3};
use crate::protocol::ApplicationOutput;
use crate::render::MixedRealityRenderer;
use crate::setup::{Setup, SetupConfig};
use crate::shaders::{ShaderCatalog, ShaderSource};

pub struct Session {
    channel: BridgeChannel,
    setup: Setup,
    application: ApplicationOutput,
    hooks: RenderHooks,
    activated: Observers<()>,
    deactivated: Observers<()>,
    shader_source: Box<dyn ShaderSource>,
    renderer: Option<MixedRealityRenderer>,
    enabled: bool,
    was_ready: bool,
}

impl Session {
    pub fn new(
        channel: BridgeChannel,
        config: SetupConfig,
        application: ApplicationOutput,
        shader_source: Box<dyn ShaderSource>,
    ) -> Self {
        Session {
            channel,
            setup: Setup::new(config),
            application,
            hooks: RenderHooks::default(),
            activated: Observers::default(),
            deactivated: Observers::default(),
            shader_source,
            renderer: None,
            enabled: false,
            was_ready: false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.renderer.is_some()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn setup_mut(&mut self) -> &mut Setup {
        &mut self.setup
    }

    pub fn channel_mut(&mut self) -> &mut BridgeChannel {
        &mut self.channel
    }

    pub fn hooks_mut(&mut self) -> &mut RenderHooks {
        &mut self.hooks
    }

    pub fn on_activated(&mut self, callback: impl FnMut(&()) + 'static) -> ObserverId {
        self.activated.add(callback)
    }

    pub fn on_deactivated(&mut self, callback: impl FnMut(&()) + 'static) -> ObserverId {
        self.deactivated.add(callback)
    }

    /// Enables or disables the session, re-evaluating readiness at once.
    pub fn set_enabled(&mut self, engine: &mut dyn Engine, enabled: bool) {
        self.enabled = enabled;
        self.update_ready(engine);
    }

    /// Per-frame update: re-evaluates readiness, then applies staged
    /// configuration changes. A reconfiguration therefore deactivates for
    /// one tick and comes back up against the new references.
    pub fn tick(&mut self, engine: &mut dyn Engine) {
        self.update_ready(engine);
        self.setup.apply_pending();
    }

    /// End-of-frame render, once scene cameras are done for the frame.
    pub fn end_of_frame(&mut self, engine: &mut dyn Engine) -> StagelinkResult<()> {
        if !self.enabled {
            return Ok(());
        }
        match self.renderer.as_mut() {
            Some(renderer) => {
                renderer.render(engine, &mut self.channel, self.setup.config(), &mut self.hooks)
            }
            None => Ok(()),
        }
    }

    pub fn can_set_pose(&self) -> bool {
        self.renderer.as_ref().is_some_and(MixedRealityRenderer::can_set_pose)
    }

    /// Requests the spectator pose for this render tick; see
    /// [`MixedRealityRenderer::set_pose`].
    pub fn set_pose(
        &mut self,
        engine: &mut dyn Engine,
        position: Vec3,
        rotation: Quat,
        vertical_fov: f32,
        world_space: bool,
    ) -> bool {
        match self.renderer.as_mut() {
            Some(renderer) => renderer.set_pose(
                engine,
                self.setup.config(),
                position,
                rotation,
                vertical_fov,
                world_space,
            ),
            None => false,
        }
    }

    pub fn set_ground_plane(
        &mut self,
        engine: &mut dyn Engine,
        distance: f32,
        normal: Vec3,
        world_space: bool,
    ) -> bool {
        match self.renderer.as_mut() {
            Some(renderer) => renderer.set_ground_plane(
                engine,
                &mut self.channel,
                self.setup.config(),
                distance,
                normal,
                world_space,
            ),
            None => false,
        }
    }

    fn update_ready(&mut self, engine: &mut dyn Engine) {
        let ready =
            self.enabled && self.setup.is_valid() && self.channel.is_external_active();
        if ready == self.was_ready {
            return;
        }
        if ready {
            match self.activate(engine) {
                // Only a successful activation latches; a failed one is
                // retried on the next tick.
                Ok(()) => self.was_ready = true,
                Err(err) => error!(%err, "activation failed"),
            }
        } else {
            self.deactivate(engine);
            self.was_ready = false;
        }
    }

    fn activate(&mut self, engine: &mut dyn Engine) -> StagelinkResult<()> {
        debug!("activating capture session");
        self.channel.submit_application_output(&self.application);
        let catalog = ShaderCatalog::load(self.shader_source.as_mut());
        let renderer = MixedRealityRenderer::new(
            engine,
            self.setup.config(),
            &catalog,
            self.shader_source.as_ref(),
        )?;
        self.renderer = Some(renderer);
        self.activated.emit(&());
        Ok(())
    }

    fn deactivate(&mut self, engine: &mut dyn Engine) {
        if self.renderer.is_none() {
            return;
        }
        debug!("deactivating capture session");
        // Callbacks run while session state is still intact.
        self.deactivated.emit(&());
        if let Some(mut renderer) = self.renderer.take() {
            renderer.release(engine, &mut self.channel);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::bridge::MemoryHost;
    use crate::engine::{CameraId, NodeId};
    use crate::protocol::{METADATA_SLOT, tag};
    use crate::render::exec::tests_support::RecordingEngine;
    use crate::shaders::tests_catalog::full_catalog;

    fn config() -> SetupConfig {
        SetupConfig {
            hmd_camera: Some(CameraId(1)),
            stage: Some(NodeId(2)),
            ..SetupConfig::default()
        }
    }

    fn session(host: &MemoryHost) -> Session {
        let (_, source) = full_catalog();
        Session::new(
            BridgeChannel::new(Box::new(host.clone())),
            config(),
            ApplicationOutput::new("demo", "1.0"),
            Box::new(source),
        )
    }

    #[test]
    fn activates_only_when_all_conditions_hold() {
        let host = MemoryHost::new();
        let mut engine = RecordingEngine::default();
        let mut session = session(&host);

        // Enabled but no compositor.
        session.set_enabled(&mut engine, true);
        assert!(!session.is_active());

        host.set_active(true);
        session.tick(&mut engine);
        assert!(session.is_active());

        host.set_active(false);
        session.tick(&mut engine);
        assert!(!session.is_active());
    }

    #[test]
    fn activation_edges_fire_callbacks_once() {
        let host = MemoryHost::new();
        let mut engine = RecordingEngine::default();
        let mut session = session(&host);
        let activations = Rc::new(RefCell::new(0));
        let deactivations = Rc::new(RefCell::new(0));
        let up = Rc::clone(&activations);
        let down = Rc::clone(&deactivations);
        session.on_activated(move |_| *up.borrow_mut() += 1);
        session.on_deactivated(move |_| *down.borrow_mut() += 1);

        host.set_active(true);
        session.set_enabled(&mut engine, true);
        session.tick(&mut engine);
        session.tick(&mut engine);
        assert_eq!(*activations.borrow(), 1);

        session.set_enabled(&mut engine, false);
        session.tick(&mut engine);
        assert_eq!(*deactivations.borrow(), 1);
        assert_eq!(*activations.borrow(), 1);
    }

    #[test]
    fn activation_submits_application_metadata() {
        let host = MemoryHost::new();
        let mut engine = RecordingEngine::default();
        let mut session = session(&host);

        host.set_active(true);
        session.set_enabled(&mut engine, true);
        assert_eq!(
            host.string_record(METADATA_SLOT, tag("APPNAME")).as_deref(),
            Some("demo")
        );
        assert_eq!(
            host.string_record(METADATA_SLOT, tag("SDKID")).as_deref(),
            Some(crate::protocol::SDK_ID)
        );
    }

    #[test]
    fn deactivation_destroys_renderer_assets() {
        let host = MemoryHost::new();
        let mut engine = RecordingEngine::default();
        let mut session = session(&host);

        host.set_active(true);
        session.set_enabled(&mut engine, true);
        assert!(session.is_active());

        session.set_enabled(&mut engine, false);
        assert_eq!(engine.destroyed_cameras.len(), 1);
        assert_eq!(engine.destroyed_materials.len(), 8);
    }

    #[test]
    fn config_change_recreates_the_renderer() {
        let host = MemoryHost::new();
        let mut engine = RecordingEngine::default();
        let mut session = session(&host);

        host.set_active(true);
        session.set_enabled(&mut engine, true);
        assert_eq!(engine.cloned_cameras.len(), 1);

        session.setup_mut().set_hmd_camera(Some(CameraId(9)));
        // Staged change: this tick deactivates and applies the change.
        session.tick(&mut engine);
        assert!(!session.is_active());
        // Next tick reactivates against the new camera.
        session.tick(&mut engine);
        assert!(session.is_active());
        assert_eq!(engine.cloned_cameras.len(), 2);
    }

    #[test]
    fn end_of_frame_renders_only_while_active() {
        let host = MemoryHost::new();
        let mut engine = RecordingEngine::default();
        let mut session = session(&host);

        session.end_of_frame(&mut engine).unwrap();
        assert_eq!(host.frame_ticks(), 0);

        host.set_active(true);
        session.set_enabled(&mut engine, true);
        session.end_of_frame(&mut engine).unwrap();
        assert_eq!(host.frame_ticks(), 1);

        session.set_enabled(&mut engine, false);
        session.end_of_frame(&mut engine).unwrap();
        assert_eq!(host.frame_ticks(), 1);
    }

    #[test]
    fn invalid_setup_never_activates() {
        let host = MemoryHost::new();
        host.set_active(true);
        let mut engine = RecordingEngine::default();
        let (_, source) = full_catalog();
        let mut session = Session::new(
            BridgeChannel::new(Box::new(host.clone())),
            SetupConfig::default(),
            ApplicationOutput::new("demo", "1.0"),
            Box::new(source),
        );
        session.set_enabled(&mut engine, true);
        session.tick(&mut engine);
        assert!(!session.is_active());
    }
}
