//! Interface contracts of the native title-session component.
//!
//! A backend implements these traits over whatever the component really is
//! (a shared library in [`ffi`], an in-process double in tests). Releasing a
//! native reference is dropping the value that holds it.

pub mod ffi;
pub mod wide;

use crate::error::NativeResult;
use crate::sink::SinkBinding;
use crate::subsystem::Subsystem;
use std::path::Path;
use std::sync::Arc;

/// Identity of a native interface, used when asking for detailed error info.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterfaceId(&'static str);

impl InterfaceId {
    /// The primary title-manager interface
    pub const TITLE_MANAGER: InterfaceId = InterfaceId("IGSTitleManager");

    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    pub fn name(&self) -> &'static str {
        self.0
    }
}

/// Outcome of one unit of async-processor work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpStatus {
    /// A unit ran (or the wait elapsed); keep pumping
    Worked,
    /// The processor has been closed and will do no more work
    Closed,
}

/// Token returned by [`ResolutionContext::activate`], handed back on deactivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivationCookie(pub usize);

/// A private side-by-side resolution context.
pub trait ResolutionContext {
    fn activate(&self) -> NativeResult<ActivationCookie>;
    fn deactivate(&self, cookie: ActivationCookie);
}

/// Creates resolution contexts and instantiates the component.
pub trait ComponentActivator {
    type Context: ResolutionContext;

    /// Process-wide subsystem this backend needs initialized while any bridge lives.
    fn subsystem(&self) -> Arc<Subsystem>;

    /// Build a private resolution context from a descriptor file.
    fn create_context(&self, descriptor: &Path) -> NativeResult<Self::Context>;

    /// Instantiate the component, inside `context` when given (the caller keeps it
    /// activated for the duration of the call), otherwise through default system
    /// resolution.
    fn instantiate(&self, context: Option<&Self::Context>) -> NativeResult<Box<dyn TitleManager>>;
}

/// Primary interface of the component.
pub trait TitleManager: Send {
    fn client(&self) -> NativeResult<Arc<dyn TitleClient>>;

    /// Query the optional error-info support interface.
    fn error_info(&self) -> NativeResult<Box<dyn ErrorInfoSupport>>;
}

pub trait ErrorInfoSupport: Send {
    /// Register interest in detailed error info for `interface`.
    fn interface_supports_error_info(&self, interface: InterfaceId) -> NativeResult<bool>;
}

/// Client sub-interface: owns the async processor and the event connection.
pub trait TitleClient: Send + Sync {
    fn create_async_processor(&self) -> NativeResult<Arc<dyn AsyncProcessor>>;

    /// Connect the five callback slots. Callbacks fire on the pump thread.
    fn advise(&self, binding: SinkBinding) -> NativeResult<()>;

    /// Disconnect the callback slots. No callback may start after this returns.
    fn unadvise(&self) -> NativeResult<()>;
}

/// Queue of asynchronous native work.
///
/// `process` is only ever called from the pump thread. `close` may be called
/// from the thread tearing the bridge down and must make a blocked `process`
/// return.
pub trait AsyncProcessor: Send + Sync {
    fn process(&self) -> NativeResult<PumpStatus>;
    fn close(&self);
}
