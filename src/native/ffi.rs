//! Shared-library backend for the native component.
//!
//! A component build is a shared library exporting one symbol,
//! `title_manager_component() -> *const ComponentVTable`. The table's function
//! pointers implement the interface contracts in [`crate::native`].
//!
//! The private resolution descriptor is a TOML file naming the library of the
//! versioned build, relative to the descriptor:
//!
//! ```toml
//! [component]
//! library = "bin/x64/TitleManager.dll"
//! ```
//!
//! Creating the context reads the descriptor, activating it loads that library.
//! System resolution loads [`BridgeSettings::system_library`] by name through
//! the platform loader's search path.
//!
//! [`BridgeSettings::system_library`]: crate::config::BridgeSettings::system_library

use super::wide::wide_units;
use super::{
    ActivationCookie, AsyncProcessor, ComponentActivator, ErrorInfoSupport, InterfaceId,
    PumpStatus, ResolutionContext, TitleClient, TitleManager,
};
use crate::error::{LockResultExt, NativeError, NativeResult};
use crate::registry::{BridgeRegistry, BridgeToken};
use crate::sink::{EventSink, SinkBinding};
use crate::subsystem::{NoSubsystem, Subsystem};
use libloading::{Library, Symbol};
use serde::Deserialize;
use std::ffi::{CString, c_char, c_int, c_void};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock, Mutex};

/// Exported entry point every component build provides
pub const ENTRY_SYMBOL: &str = "title_manager_component";

/// Layout version of [`ComponentVTable`] this crate understands
pub const ABI_VERSION: u32 = 1;

pub const STATUS_OK: c_int = 0;
/// `process` return value: a unit ran, keep pumping
pub const PROCESS_WORKED: c_int = 0;
/// `process` return value: the processor is closed
pub const PROCESS_CLOSED: c_int = 1;

/// Callback table handed to `advise`. `owner` carries the bridge token.
#[repr(C)]
pub struct SinkVTable {
    pub owner: *mut c_void,
    pub on_command: unsafe extern "C" fn(*mut c_void, c_int),
    pub on_disconnect: unsafe extern "C" fn(*mut c_void),
    pub on_pick_result: unsafe extern "C" fn(*mut c_void, *const u16),
    pub on_zone_state_changed: unsafe extern "C" fn(*mut c_void, *const u16, bool),
    pub on_message: unsafe extern "C" fn(*mut c_void, *const u16),
}

/// Function table exported by a component build.
#[repr(C)]
pub struct ComponentVTable {
    pub abi_version: u32,
    pub create: unsafe extern "C" fn() -> *mut c_void,
    pub release: unsafe extern "C" fn(*mut c_void),
    pub get_client: unsafe extern "C" fn(*mut c_void, *mut *mut c_void) -> c_int,
    pub release_client: unsafe extern "C" fn(*mut c_void),
    pub create_async_processor: unsafe extern "C" fn(*mut c_void, *mut *mut c_void) -> c_int,
    pub release_async_processor: unsafe extern "C" fn(*mut c_void),
    pub process: unsafe extern "C" fn(*mut c_void) -> c_int,
    pub close: unsafe extern "C" fn(*mut c_void),
    pub advise: unsafe extern "C" fn(*mut c_void, *const SinkVTable) -> c_int,
    pub unadvise: unsafe extern "C" fn(*mut c_void) -> c_int,
    pub supports_error_info: Option<unsafe extern "C" fn(*mut c_void, *const c_char) -> c_int>,
}

/// Errors from loading a component build or reading its descriptor.
#[derive(Debug, thiserror::Error)]
pub enum FfiError {
    #[error("failed to load library at {path}: {source}")]
    LoadFailed {
        path: PathBuf,
        source: libloading::Error,
    },

    #[error("required symbol '{symbol}' not found in {path}")]
    SymbolNotFound { path: PathBuf, symbol: String },

    #[error("{path} returned a null component table")]
    NullTable { path: PathBuf },

    #[error("{path} implements ABI version {found}, expected {expected}")]
    AbiMismatch {
        path: PathBuf,
        found: u32,
        expected: u32,
    },

    #[error("descriptor error in {path}: {message}")]
    Descriptor { path: PathBuf, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<FfiError> for NativeError {
    fn from(err: FfiError) -> Self {
        NativeError::new("load component", err.to_string())
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Descriptor {
    component: DescriptorComponent,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DescriptorComponent {
    library: PathBuf,
}

/// Read a descriptor and return the library path it names, resolved against
/// the descriptor's directory.
pub fn read_descriptor(path: &Path) -> Result<PathBuf, FfiError> {
    let text = std::fs::read_to_string(path)?;
    let descriptor: Descriptor = toml::from_str(&text).map_err(|e| FfiError::Descriptor {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    let base = path.parent().unwrap_or_else(|| Path::new(""));
    Ok(base.join(descriptor.component.library))
}

static FFI_SUBSYSTEM: LazyLock<Arc<Subsystem>> = LazyLock::new(|| Subsystem::new(NoSubsystem));

/// Activator for component builds shipped as shared libraries.
pub struct FfiActivator {
    system_library: String,
}

impl FfiActivator {
    pub fn new(system_library: impl Into<String>) -> Self {
        Self {
            system_library: system_library.into(),
        }
    }
}

impl ComponentActivator for FfiActivator {
    type Context = FfiContext;

    fn subsystem(&self) -> Arc<Subsystem> {
        FFI_SUBSYSTEM.clone()
    }

    fn create_context(&self, descriptor: &Path) -> NativeResult<FfiContext> {
        let library = read_descriptor(descriptor)?;
        log::debug!(
            target: "title_bridge::ffi",
            "Descriptor {} names {}",
            descriptor.display(),
            library.display()
        );
        Ok(FfiContext {
            library,
            loaded: Mutex::new(None),
            active: AtomicUsize::new(0),
        })
    }

    fn instantiate(&self, context: Option<&FfiContext>) -> NativeResult<Box<dyn TitleManager>> {
        let component = match context {
            Some(context) => context.component()?,
            None => LoadedComponent::load(Path::new(&self.system_library))?,
        };
        component.create_manager()
    }
}

/// Private resolution context pinned to one library path.
pub struct FfiContext {
    library: PathBuf,
    loaded: Mutex<Option<Arc<LoadedComponent>>>,
    /// Number of activations not yet deactivated
    active: AtomicUsize,
}

impl FfiContext {
    pub fn library(&self) -> &Path {
        &self.library
    }

    fn component(&self) -> NativeResult<Arc<LoadedComponent>> {
        if self.active.load(Ordering::Acquire) == 0 {
            return Err(NativeError::new(
                "instantiate",
                "resolution context is not active",
            ));
        }
        let loaded = self
            .loaded
            .lock()
            .recover_poison("ffi::context");
        loaded
            .clone()
            .ok_or_else(|| NativeError::new("instantiate", "component not loaded"))
    }
}

impl ResolutionContext for FfiContext {
    fn activate(&self) -> NativeResult<ActivationCookie> {
        let mut loaded = self
            .loaded
            .lock()
            .recover_poison("ffi::context");
        if loaded.is_none() {
            *loaded = Some(LoadedComponent::load(&self.library)?);
        }
        let depth = self.active.fetch_add(1, Ordering::AcqRel) + 1;
        Ok(ActivationCookie(depth))
    }

    fn deactivate(&self, _cookie: ActivationCookie) {
        let _ = self
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }
}

/// A loaded library and its component table.
struct LoadedComponent {
    table: NonNull<ComponentVTable>,
    _library: Library,
}

// SAFETY: the table is immutable data owned by `_library`, which stays loaded
// for as long as this value (and every interface holding an Arc to it) lives.
unsafe impl Send for LoadedComponent {}
unsafe impl Sync for LoadedComponent {}

impl LoadedComponent {
    fn load(path: &Path) -> Result<Arc<Self>, FfiError> {
        // SAFETY: loading runs the library's initializers; component builds are
        // trusted native code by contract.
        let library = unsafe { Library::new(path) }.map_err(|source| FfiError::LoadFailed {
            path: path.to_path_buf(),
            source,
        })?;

        let raw = unsafe {
            let entry: Symbol<unsafe extern "C" fn() -> *const ComponentVTable> = library
                .get(ENTRY_SYMBOL.as_bytes())
                .map_err(|_| FfiError::SymbolNotFound {
                    path: path.to_path_buf(),
                    symbol: ENTRY_SYMBOL.to_string(),
                })?;
            entry()
        };
        let table = NonNull::new(raw.cast_mut()).ok_or_else(|| FfiError::NullTable {
            path: path.to_path_buf(),
        })?;

        // SAFETY: non-null table returned by the entry point, valid while loaded.
        let found = unsafe { table.as_ref() }.abi_version;
        if found != ABI_VERSION {
            return Err(FfiError::AbiMismatch {
                path: path.to_path_buf(),
                found,
                expected: ABI_VERSION,
            });
        }

        log::debug!(target: "title_bridge::ffi", "Loaded component from {}", path.display());
        Ok(Arc::new(Self {
            table,
            _library: library,
        }))
    }

    fn table(&self) -> &ComponentVTable {
        // SAFETY: see the Send/Sync justification above.
        unsafe { self.table.as_ref() }
    }

    fn create_manager(self: &Arc<Self>) -> NativeResult<Box<dyn TitleManager>> {
        let raw = guarded("create", || unsafe { (self.table().create)() })?;
        let raw = RawHandle::new(raw, "create")?;
        Ok(Box::new(FfiManager {
            component: Arc::clone(self),
            raw,
        }))
    }
}

/// Non-null native object pointer.
#[derive(Clone, Copy)]
struct RawHandle(NonNull<c_void>);

// SAFETY: native objects are free-threaded by contract; the bridge serializes
// every call that the contract does not allow concurrently.
unsafe impl Send for RawHandle {}
unsafe impl Sync for RawHandle {}

impl RawHandle {
    fn new(ptr: *mut c_void, operation: &'static str) -> NativeResult<Self> {
        NonNull::new(ptr)
            .map(Self)
            .ok_or_else(|| NativeError::new(operation, "returned a null object"))
    }

    fn as_ptr(self) -> *mut c_void {
        self.0.as_ptr()
    }
}

/// Run a foreign call, turning a Rust panic raised inside it into an error.
fn guarded<T>(operation: &'static str, call: impl FnOnce() -> T) -> NativeResult<T> {
    catch_unwind(AssertUnwindSafe(call))
        .map_err(|_| NativeError::new(operation, "panicked across the native boundary"))
}

fn check(operation: &'static str, status: c_int) -> NativeResult<()> {
    if status == STATUS_OK {
        Ok(())
    } else {
        Err(NativeError::code(operation, status))
    }
}

fn process_status(status: c_int) -> NativeResult<PumpStatus> {
    match status {
        PROCESS_WORKED => Ok(PumpStatus::Worked),
        PROCESS_CLOSED => Ok(PumpStatus::Closed),
        other => Err(NativeError::code("processAsync", other)),
    }
}

/// Owner value carried in the callback table. A token that does not fit a
/// pointer is refused rather than truncated into another bridge's token.
fn owner_pointer(token: BridgeToken) -> NativeResult<*mut c_void> {
    usize::try_from(token.get())
        .map(|raw| raw as *mut c_void)
        .map_err(|_| NativeError::new("advise", format!("{token} does not fit a pointer")))
}

fn owner_token(owner: *mut c_void) -> Option<BridgeToken> {
    u64::try_from(owner as usize)
        .ok()
        .and_then(BridgeToken::from_raw)
}

struct FfiManager {
    component: Arc<LoadedComponent>,
    raw: RawHandle,
}

impl TitleManager for FfiManager {
    fn client(&self) -> NativeResult<Arc<dyn TitleClient>> {
        let mut out: *mut c_void = ptr::null_mut();
        let status = guarded("getClient", || unsafe {
            (self.component.table().get_client)(self.raw.as_ptr(), &mut out)
        })?;
        check("getClient", status)?;
        Ok(Arc::new(FfiClient {
            component: Arc::clone(&self.component),
            raw: RawHandle::new(out, "getClient")?,
            callbacks: Mutex::new(None),
        }))
    }

    fn error_info(&self) -> NativeResult<Box<dyn ErrorInfoSupport>> {
        let query = self.component.table().supports_error_info.ok_or_else(|| {
            NativeError::new("QueryInterface(ISupportErrorInfo)", "not implemented")
        })?;
        Ok(Box::new(FfiErrorInfo {
            _component: Arc::clone(&self.component),
            manager: self.raw,
            query,
        }))
    }
}

impl Drop for FfiManager {
    fn drop(&mut self) {
        let _ = guarded("release", || unsafe {
            (self.component.table().release)(self.raw.as_ptr())
        });
    }
}

/// Borrows the manager's object; the session releases it before the manager.
struct FfiErrorInfo {
    _component: Arc<LoadedComponent>,
    manager: RawHandle,
    query: unsafe extern "C" fn(*mut c_void, *const c_char) -> c_int,
}

impl ErrorInfoSupport for FfiErrorInfo {
    fn interface_supports_error_info(&self, interface: InterfaceId) -> NativeResult<bool> {
        let name = CString::new(interface.name())
            .map_err(|e| NativeError::new("InterfaceSupportsErrorInfo", e.to_string()))?;
        let status = guarded("InterfaceSupportsErrorInfo", || unsafe {
            (self.query)(self.manager.as_ptr(), name.as_ptr())
        })?;
        Ok(status == STATUS_OK)
    }
}

struct FfiClient {
    component: Arc<LoadedComponent>,
    raw: RawHandle,
    /// Callback table lent to the component while advised
    callbacks: Mutex<Option<Box<SinkVTable>>>,
}

// SAFETY: `SinkVTable::owner` is a token value, not a pointer to Rust data.
unsafe impl Send for FfiClient {}
unsafe impl Sync for FfiClient {}

impl TitleClient for FfiClient {
    fn create_async_processor(&self) -> NativeResult<Arc<dyn AsyncProcessor>> {
        let mut out: *mut c_void = ptr::null_mut();
        let status = guarded("createAsyncProcessor", || unsafe {
            (self.component.table().create_async_processor)(self.raw.as_ptr(), &mut out)
        })?;
        check("createAsyncProcessor", status)?;
        Ok(Arc::new(FfiProcessor {
            component: Arc::clone(&self.component),
            raw: RawHandle::new(out, "createAsyncProcessor")?,
            closed: AtomicBool::new(false),
        }))
    }

    fn advise(&self, binding: SinkBinding) -> NativeResult<()> {
        let table = Box::new(SinkVTable {
            owner: owner_pointer(binding.token)?,
            on_command: sink_command,
            on_disconnect: sink_disconnect,
            on_pick_result: sink_pick_result,
            on_zone_state_changed: sink_zone_state_changed,
            on_message: sink_message,
        });
        let mut callbacks = self
            .callbacks
            .lock()
            .recover_poison("ffi::client::advise");
        let status = guarded("advise", || unsafe {
            (self.component.table().advise)(self.raw.as_ptr(), &*table)
        })?;
        check("advise", status)?;
        *callbacks = Some(table);
        Ok(())
    }

    fn unadvise(&self) -> NativeResult<()> {
        let mut callbacks = self
            .callbacks
            .lock()
            .recover_poison("ffi::client::unadvise");
        if callbacks.is_none() {
            return Ok(());
        }
        let status = guarded("unadvise", || unsafe {
            (self.component.table().unadvise)(self.raw.as_ptr())
        })?;
        check("unadvise", status)?;
        // The component no longer references the table.
        callbacks.take();
        Ok(())
    }
}

impl Drop for FfiClient {
    fn drop(&mut self) {
        let _ = guarded("releaseClient", || unsafe {
            (self.component.table().release_client)(self.raw.as_ptr())
        });
    }
}

struct FfiProcessor {
    component: Arc<LoadedComponent>,
    raw: RawHandle,
    closed: AtomicBool,
}

impl AsyncProcessor for FfiProcessor {
    fn process(&self) -> NativeResult<PumpStatus> {
        let status = guarded("processAsync", || unsafe {
            (self.component.table().process)(self.raw.as_ptr())
        })?;
        process_status(status)
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = guarded("close", || unsafe {
            (self.component.table().close)(self.raw.as_ptr())
        });
    }
}

impl Drop for FfiProcessor {
    fn drop(&mut self) {
        let _ = guarded("releaseAsyncProcessor", || unsafe {
            (self.component.table().release_async_processor)(self.raw.as_ptr())
        });
    }
}

/// Resolve a callback's owner value to a live sink and run `deliver` on it.
fn with_sink(owner: *mut c_void, callback: &'static str, deliver: impl FnOnce(&EventSink)) {
    let Some(token) = owner_token(owner) else {
        return;
    };
    let Some(sink) = BridgeRegistry::global().lookup(token) else {
        log::trace!(
            target: "title_bridge::ffi",
            "'{}' for stale owner {}",
            callback,
            token
        );
        return;
    };
    if catch_unwind(AssertUnwindSafe(|| deliver(sink.as_ref()))).is_err() {
        log::error!(target: "title_bridge::ffi", "'{}' callback panicked", callback);
    }
}

unsafe extern "C" fn sink_command(owner: *mut c_void, code: c_int) {
    with_sink(owner, "command", |sink| sink.on_command(code));
}

unsafe extern "C" fn sink_disconnect(owner: *mut c_void) {
    with_sink(owner, "disconnect", |sink| sink.on_disconnect());
}

unsafe extern "C" fn sink_pick_result(owner: *mut c_void, xml: *const u16) {
    // SAFETY: the component passes a NUL-terminated string valid for the call.
    let xml = unsafe { wide_units(xml) };
    with_sink(owner, "pickResult", |sink| sink.on_pick_result(xml));
}

unsafe extern "C" fn sink_zone_state_changed(owner: *mut c_void, zone: *const u16, state: bool) {
    // SAFETY: as above.
    let zone = unsafe { wide_units(zone) };
    with_sink(owner, "zoneStateChanged", |sink| {
        sink.on_zone_state_changed(zone, state)
    });
}

unsafe extern "C" fn sink_message(owner: *mut c_void, message: *const u16) {
    // SAFETY: as above.
    let message = unsafe { wide_units(message) };
    with_sink(owner, "message", |sink| sink.on_message(message));
}
