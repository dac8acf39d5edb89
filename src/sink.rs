//! Foreign event sink: the five native callbacks, translated for the host.
//!
//! Callbacks run on the pump thread. Each one builds a [`HostEvent`] and admits
//! it to the host queue; nothing here touches the host directly.

use crate::error::NativeResult;
use crate::host::{EventRoute, HostEvent};
use crate::native::TitleClient;
use crate::native::wide::wide_to_string;
use crate::registry::{BridgeRegistry, BridgeToken};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Receives native callbacks for one bridge instance.
pub struct EventSink {
    /// Raw owner token; zero once the sink has been disconnected.
    owner: AtomicU64,
    route: EventRoute,
}

impl EventSink {
    pub(crate) fn new(owner: BridgeToken, route: EventRoute) -> Self {
        Self {
            owner: AtomicU64::new(owner.get()),
            route,
        }
    }

    /// Token of the owning bridge, or `None` after disconnection.
    pub fn owner(&self) -> Option<BridgeToken> {
        BridgeToken::from_raw(self.owner.load(Ordering::Acquire))
    }

    pub fn is_connected(&self) -> bool {
        self.owner().is_some()
    }

    pub(crate) fn clear_owner(&self) -> Option<BridgeToken> {
        BridgeToken::from_raw(self.owner.swap(0, Ordering::AcqRel))
    }

    pub fn on_command(&self, code: i32) {
        self.forward(HostEvent::Command(code));
    }

    pub fn on_disconnect(&self) {
        self.forward(HostEvent::Disconnect);
    }

    pub fn on_pick_result(&self, xml: &[u16]) {
        self.forward(HostEvent::PickResult(wide_to_string(xml)));
    }

    pub fn on_zone_state_changed(&self, zone: &[u16], state: bool) {
        self.forward(HostEvent::ZoneStateChanged {
            zone: wide_to_string(zone),
            state,
        });
    }

    pub fn on_message(&self, message: &[u16]) {
        self.forward(HostEvent::Message(wide_to_string(message)));
    }

    fn forward(&self, event: HostEvent) {
        let Some(owner) = self.owner() else {
            log::trace!(
                target: "title_bridge::sink",
                "Ignoring '{}' on a disconnected sink",
                event.name()
            );
            return;
        };
        log::trace!(target: "title_bridge::sink", "{} <- {}", owner, event.name());
        self.route.deliver(event);
    }
}

/// What a native client receives on `advise`: the owner token for the callback
/// table and the sink the token resolves to.
#[derive(Clone)]
pub struct SinkBinding {
    pub token: BridgeToken,
    pub sink: Arc<EventSink>,
}

/// A sink registered with both the bridge registry and the native client.
pub(crate) struct AttachedSink {
    registry: &'static BridgeRegistry,
    client: Arc<dyn TitleClient>,
    sink: Arc<EventSink>,
    token: BridgeToken,
    connected: bool,
}

impl AttachedSink {
    /// Register a sink for `route` and connect it to `client`.
    ///
    /// On failure the registration is rolled back and the sink is left inert.
    pub(crate) fn attach(
        registry: &'static BridgeRegistry,
        client: Arc<dyn TitleClient>,
        route: EventRoute,
    ) -> NativeResult<Self> {
        let (token, sink) = registry.register(route);
        let binding = SinkBinding {
            token,
            sink: sink.clone(),
        };
        if let Err(err) = client.advise(binding) {
            sink.clear_owner();
            registry.unregister(token);
            return Err(err);
        }
        Ok(Self {
            registry,
            client,
            sink,
            token,
            connected: true,
        })
    }

    pub(crate) fn token(&self) -> BridgeToken {
        self.token
    }

    /// Unregister the callback slots from the client, then make the sink inert.
    pub(crate) fn disconnect(&mut self) {
        if !self.connected {
            return;
        }
        self.connected = false;
        if let Err(err) = self.client.unadvise() {
            log::warn!(
                target: "title_bridge::sink",
                "Native client refused to disconnect {}: {}",
                self.token,
                err
            );
        }
        self.sink.clear_owner();
        self.registry.unregister(self.token);
    }
}

impl Drop for AttachedSink {
    fn drop(&mut self) {
        self.disconnect();
    }
}
