#![forbid(unsafe_code)]

pub mod arbiter;
pub mod bridge;
pub mod engine;
pub mod error;
pub mod hooks;
pub mod math;
pub mod protocol;
pub mod render;
pub mod session;
pub mod setup;
pub mod shaders;

pub use arbiter::FrameArbiter;
pub use bridge::{BridgeChannel, BridgeHost, MemoryHost, StubHost};
pub use engine::{CameraId, Engine, NodeId};
pub use error::{StagelinkError, StagelinkResult};
pub use hooks::{ObserverId, Observers, RenderHooks};
pub use math::{Mat4, Quat, Vec3};
pub use protocol::{ApplicationOutput, Features, InputFrame, Pose, Resolution};
pub use render::MixedRealityRenderer;
pub use session::Session;
pub use setup::{Setup, SetupConfig};
pub use shaders::{ShaderCatalog, ShaderKind, ShaderSource};
