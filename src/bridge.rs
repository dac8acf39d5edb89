//! Lifecycle controller: builds a bridge in order and tears it down in reverse.
//!
//! Construction: subsystem lease → resolve → instantiate → client/processor →
//! pump worker → event sink. Teardown: stop the pump → disconnect the sink →
//! release interfaces → release the subsystem lease.

use crate::config::BridgeSettings;
use crate::error::{BridgeError, BridgeResult, NativeError};
use crate::host::{EventQueue, EventTarget, HostEvent, event_queue};
use crate::native::ComponentActivator;
use crate::pump::{PumpState, PumpWorker};
use crate::registry::{BridgeRegistry, BridgeToken};
use crate::resolver;
use crate::session::SessionHandle;
use crate::sink::AttachedSink;
use crate::subsystem::SubsystemLease;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Resolving,
    Instantiated,
    Connected,
    Closing,
    Released,
}

/// One session wrapping exactly one native component instance.
///
/// Events are observed by calling [`TitleBridge::dispatch_pending`] (or the
/// `*_event` methods) from the host's own execution context.
pub struct TitleBridge {
    state: LifecycleState,
    component: String,
    token: BridgeToken,
    events: Option<EventQueue>,
    sink: Option<AttachedSink>,
    pump: Option<PumpWorker>,
    session: SessionHandle,
    lease: Option<SubsystemLease>,
}

impl TitleBridge {
    /// Construct a connected bridge.
    ///
    /// `install_dir` is the directory the bridge binary was loaded from. Any
    /// fatal step aborts construction; resources acquired up to that point are
    /// released in reverse order before the error is returned.
    pub fn open<A: ComponentActivator>(
        activator: &A,
        install_dir: &Path,
        settings: &BridgeSettings,
    ) -> BridgeResult<Self> {
        settings.validate()?;
        let mut state = LifecycleState::Uninitialized;

        // Locals drop in reverse declaration order, which is the release order
        // required when a later step fails.
        let lease = activator
            .subsystem()
            .acquire()
            .map_err(BridgeError::Subsystem)?;

        advance(&mut state, LifecycleState::Resolving);
        let primary = resolver::resolve_component(activator, install_dir, settings)?;
        advance(&mut state, LifecycleState::Instantiated);

        let session = SessionHandle::open(primary)?;
        let (client, processor) = match (session.client(), session.processor()) {
            (Some(client), Some(processor)) => (client, processor),
            _ => {
                return Err(BridgeError::Session(NativeError::new(
                    "open session",
                    "session released during construction",
                )));
            }
        };

        let (route, events) = event_queue(settings.event_queue_capacity);
        let mut pump = PumpWorker::start(processor)?;

        let sink = match AttachedSink::attach(BridgeRegistry::global(), client, route) {
            Ok(sink) => sink,
            Err(err) => {
                pump.stop();
                return Err(BridgeError::Sink(err));
            }
        };
        let token = sink.token();
        advance(&mut state, LifecycleState::Connected);
        log::info!(
            target: "title_bridge::lifecycle",
            "{} connected as {}",
            settings.component,
            token
        );

        Ok(Self {
            state,
            component: settings.component.clone(),
            token,
            events: Some(events),
            sink: Some(sink),
            pump: Some(pump),
            session,
            lease: Some(lease),
        })
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn token(&self) -> BridgeToken {
        self.token
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    /// State of the pump worker; `Stopped` once the bridge is closed.
    pub fn pump_state(&self) -> PumpState {
        self.pump
            .as_ref()
            .map_or(PumpState::Stopped, PumpWorker::state)
    }

    /// Emit every queued event to `target` as `emit(name, args...)`.
    ///
    /// Returns the number of events delivered; always zero after `close`.
    pub fn dispatch_pending(&mut self, target: &mut dyn EventTarget) -> usize {
        self.events
            .as_mut()
            .map_or(0, |events| events.dispatch_pending(target))
    }

    /// Next queued event, without waiting.
    pub fn try_next_event(&mut self) -> Option<HostEvent> {
        self.events.as_mut().and_then(EventQueue::try_next)
    }

    /// Wait for the next event. Resolves to `None` once the bridge is closed.
    pub async fn next_event(&mut self) -> Option<HostEvent> {
        match self.events.as_mut() {
            Some(events) => events.next().await,
            None => None,
        }
    }

    /// Tear the bridge down. Blocks until the pump thread has exited.
    ///
    /// Calling it again, or dropping the bridge afterwards, does nothing.
    pub fn close(&mut self) {
        if matches!(self.state, LifecycleState::Closing | LifecycleState::Released) {
            return;
        }
        advance(&mut self.state, LifecycleState::Closing);

        if let Some(events) = self.events.as_mut() {
            events.close();
        }
        if let Some(mut pump) = self.pump.take() {
            pump.stop();
        }
        if let Some(mut sink) = self.sink.take() {
            sink.disconnect();
        }
        self.session.release();
        self.events = None;
        self.lease = None;

        advance(&mut self.state, LifecycleState::Released);
        log::info!(
            target: "title_bridge::lifecycle",
            "{} ({}) released",
            self.component,
            self.token
        );
    }
}

impl Drop for TitleBridge {
    fn drop(&mut self) {
        self.close();
    }
}

fn advance(state: &mut LifecycleState, next: LifecycleState) {
    log::debug!(
        target: "title_bridge::lifecycle",
        "{:?} -> {:?}",
        state,
        next
    );
    *state = next;
}
