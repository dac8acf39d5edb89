//! In-process stand-in for the native title-session component.
//!
//! Every native call and release is appended to a journal so tests can assert
//! construction and teardown order. Events queued with [`FakeNative::fire`] are
//! delivered by the fake processor, i.e. on the bridge's pump thread.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;
use title_bridge::NativeError;
use title_bridge::native::{
    ActivationCookie, AsyncProcessor, ComponentActivator, ErrorInfoSupport, InterfaceId,
    PumpStatus, ResolutionContext, TitleClient, TitleManager,
};
use title_bridge::subsystem::{Subsystem, SubsystemHooks};
use title_bridge::{NativeResult, SinkBinding};

pub type Journal = Arc<Mutex<Vec<String>>>;

fn note(journal: &Journal, entry: impl Into<String>) {
    journal.lock().unwrap().push(entry.into());
}

/// Failure switches, all off by default.
#[derive(Debug, Default, Clone)]
pub struct Behavior {
    pub fail_context: bool,
    pub fail_activation: bool,
    pub fail_private_instantiate: bool,
    pub fail_system_instantiate: bool,
    pub fail_client: bool,
    pub fail_processor: bool,
    pub no_error_info: bool,
    pub fail_advise: bool,
}

#[derive(Debug, Clone)]
pub enum FakeEvent {
    Command(i32),
    Disconnect,
    PickResult(String),
    ZoneStateChanged(String, bool),
    Message(String),
}

#[derive(Default)]
struct PumpQueue {
    pending: VecDeque<FakeEvent>,
    closed: bool,
    binding: Option<SinkBinding>,
}

#[derive(Default)]
struct Shared {
    queue: Mutex<PumpQueue>,
    wake: Condvar,
    descriptor: Mutex<Option<PathBuf>>,
}

pub struct FakeNative {
    behavior: Behavior,
    journal: Journal,
    shared: Arc<Shared>,
    subsystem: Arc<Subsystem>,
}

struct JournalHooks(Journal);

impl SubsystemHooks for JournalHooks {
    fn initialize(&self) -> NativeResult<()> {
        note(&self.0, "subsystem init");
        Ok(())
    }

    fn uninitialize(&self) {
        note(&self.0, "subsystem uninit");
    }
}

impl FakeNative {
    pub fn new(behavior: Behavior) -> Self {
        let journal = Journal::default();
        Self {
            behavior,
            subsystem: Subsystem::new(JournalHooks(journal.clone())),
            journal,
            shared: Arc::default(),
        }
    }

    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().unwrap().clone()
    }

    pub fn journal_contains(&self, entry: &str) -> bool {
        self.journal().iter().any(|e| e == entry)
    }

    /// Descriptor path the bridge asked for, if any.
    pub fn descriptor(&self) -> Option<PathBuf> {
        self.shared.descriptor.lock().unwrap().clone()
    }

    /// Binding the client was advised with, while advised.
    pub fn binding(&self) -> Option<SinkBinding> {
        self.shared.queue.lock().unwrap().binding.clone()
    }

    pub fn subsystem_users(&self) -> usize {
        self.subsystem.users()
    }

    /// Queue a native event for the pump thread to deliver.
    pub fn fire(&self, event: FakeEvent) {
        self.shared.queue.lock().unwrap().pending.push_back(event);
        self.shared.wake.notify_all();
    }
}

pub struct FakeContext {
    journal: Journal,
    fail_activation: bool,
}

impl ResolutionContext for FakeContext {
    fn activate(&self) -> NativeResult<ActivationCookie> {
        if self.fail_activation {
            return Err(NativeError::new("ActivateActCtx", "refused"));
        }
        note(&self.journal, "activate");
        Ok(ActivationCookie(1))
    }

    fn deactivate(&self, _cookie: ActivationCookie) {
        note(&self.journal, "deactivate");
    }
}

impl ComponentActivator for FakeNative {
    type Context = FakeContext;

    fn subsystem(&self) -> Arc<Subsystem> {
        self.subsystem.clone()
    }

    fn create_context(&self, descriptor: &Path) -> NativeResult<FakeContext> {
        *self.shared.descriptor.lock().unwrap() = Some(descriptor.to_path_buf());
        if self.behavior.fail_context {
            return Err(NativeError::new("CreateActCtx", "INVALID_HANDLE_VALUE"));
        }
        note(&self.journal, "create context");
        Ok(FakeContext {
            journal: self.journal.clone(),
            fail_activation: self.behavior.fail_activation,
        })
    }

    fn instantiate(&self, context: Option<&FakeContext>) -> NativeResult<Box<dyn TitleManager>> {
        let (entry, fail) = match context {
            Some(_) => (
                "instantiate private",
                self.behavior.fail_private_instantiate,
            ),
            None => ("instantiate system", self.behavior.fail_system_instantiate),
        };
        if fail {
            return Err(NativeError::code("CoCreateInstance", 0x8004_0154_u32 as i32));
        }
        note(&self.journal, entry);
        Ok(Box::new(FakeManager {
            behavior: self.behavior.clone(),
            journal: self.journal.clone(),
            shared: self.shared.clone(),
        }))
    }
}

struct FakeManager {
    behavior: Behavior,
    journal: Journal,
    shared: Arc<Shared>,
}

impl TitleManager for FakeManager {
    fn client(&self) -> NativeResult<Arc<dyn TitleClient>> {
        if self.behavior.fail_client {
            return Err(NativeError::code("getClient", -1));
        }
        note(&self.journal, "get client");
        Ok(Arc::new(FakeClient {
            behavior: self.behavior.clone(),
            journal: self.journal.clone(),
            shared: self.shared.clone(),
        }))
    }

    fn error_info(&self) -> NativeResult<Box<dyn ErrorInfoSupport>> {
        if self.behavior.no_error_info {
            return Err(NativeError::new("QueryInterface", "E_NOINTERFACE"));
        }
        note(&self.journal, "query error info");
        Ok(Box::new(FakeErrorInfo(self.journal.clone())))
    }
}

impl Drop for FakeManager {
    fn drop(&mut self) {
        note(&self.journal, "release primary");
    }
}

struct FakeErrorInfo(Journal);

impl ErrorInfoSupport for FakeErrorInfo {
    fn interface_supports_error_info(&self, interface: InterfaceId) -> NativeResult<bool> {
        note(&self.0, format!("error info for {}", interface.name()));
        Ok(true)
    }
}

impl Drop for FakeErrorInfo {
    fn drop(&mut self) {
        note(&self.0, "release error info");
    }
}

struct FakeClient {
    behavior: Behavior,
    journal: Journal,
    shared: Arc<Shared>,
}

impl TitleClient for FakeClient {
    fn create_async_processor(&self) -> NativeResult<Arc<dyn AsyncProcessor>> {
        if self.behavior.fail_processor {
            return Err(NativeError::code("createAsyncProcessor", -1));
        }
        note(&self.journal, "create processor");
        Ok(Arc::new(FakeProcessor {
            journal: self.journal.clone(),
            shared: self.shared.clone(),
        }))
    }

    fn advise(&self, binding: SinkBinding) -> NativeResult<()> {
        if self.behavior.fail_advise {
            return Err(NativeError::code("advise", -1));
        }
        note(&self.journal, "advise");
        self.shared.queue.lock().unwrap().binding = Some(binding);
        self.shared.wake.notify_all();
        Ok(())
    }

    fn unadvise(&self) -> NativeResult<()> {
        note(&self.journal, "unadvise");
        self.shared.queue.lock().unwrap().binding = None;
        Ok(())
    }
}

impl Drop for FakeClient {
    fn drop(&mut self) {
        note(&self.journal, "release client");
    }
}

struct FakeProcessor {
    journal: Journal,
    shared: Arc<Shared>,
}

impl AsyncProcessor for FakeProcessor {
    fn process(&self) -> NativeResult<PumpStatus> {
        let mut queue = self.shared.queue.lock().unwrap();
        loop {
            if queue.closed {
                return Ok(PumpStatus::Closed);
            }
            if queue.binding.is_some() && !queue.pending.is_empty() {
                let event = queue.pending.pop_front();
                let binding = queue.binding.clone();
                drop(queue);
                if let (Some(event), Some(binding)) = (event, binding) {
                    deliver(&binding, event);
                }
                return Ok(PumpStatus::Worked);
            }
            let (guard, timeout) = self
                .shared
                .wake
                .wait_timeout(queue, Duration::from_millis(20))
                .unwrap();
            queue = guard;
            if timeout.timed_out() {
                return Ok(PumpStatus::Worked);
            }
        }
    }

    fn close(&self) {
        note(&self.journal, "close processor");
        self.shared.queue.lock().unwrap().closed = true;
        self.shared.wake.notify_all();
    }
}

impl Drop for FakeProcessor {
    fn drop(&mut self) {
        note(&self.journal, "release processor");
    }
}

fn deliver(binding: &SinkBinding, event: FakeEvent) {
    let sink = &binding.sink;
    match event {
        FakeEvent::Command(code) => sink.on_command(code),
        FakeEvent::Disconnect => sink.on_disconnect(),
        FakeEvent::PickResult(xml) => sink.on_pick_result(&super::utf16(&xml)),
        FakeEvent::ZoneStateChanged(zone, state) => {
            sink.on_zone_state_changed(&super::utf16(&zone), state)
        }
        FakeEvent::Message(text) => sink.on_message(&super::utf16(&text)),
    }
}
