pub mod bridge;
pub mod config;
pub mod error;
pub mod host;
pub mod native;
pub mod pump;
pub mod registry;
pub mod resolver;
pub mod session;
pub mod sink;
pub mod subsystem;

pub use bridge::{LifecycleState, TitleBridge};
pub use config::BridgeSettings;
pub use error::{BridgeError, BridgeResult, NativeError, NativeResult};
pub use host::{EMIT, EventTarget, HostEvent, HostValue};
pub use registry::{BridgeRegistry, BridgeToken};
pub use sink::{EventSink, SinkBinding};
