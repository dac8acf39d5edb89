//! Host-facing side of the bridge.
//!
//! Native events arrive on the pump thread and are admitted to a bounded
//! queue. The host drains that queue on its own execution context and sees
//! each event as one `emit(name, args...)` call on its [`EventTarget`].

use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Host method every event is dispatched through
pub const EMIT: &str = "emit";

/// An argument passed to the host callback surface.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum HostValue {
    String(String),
    Integer(i64),
    Bool(bool),
}

impl From<&str> for HostValue {
    fn from(value: &str) -> Self {
        HostValue::String(value.to_string())
    }
}

impl From<String> for HostValue {
    fn from(value: String) -> Self {
        HostValue::String(value)
    }
}

impl From<i32> for HostValue {
    fn from(value: i32) -> Self {
        HostValue::Integer(i64::from(value))
    }
}

impl From<bool> for HostValue {
    fn from(value: bool) -> Self {
        HostValue::Bool(value)
    }
}

/// One native notification, already converted to host encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    Command(i32),
    Disconnect,
    PickResult(String),
    ZoneStateChanged { zone: String, state: bool },
    Message(String),
}

impl HostEvent {
    /// Event name passed as the first `emit` argument
    pub fn name(&self) -> &'static str {
        match self {
            HostEvent::Command(_) => "command",
            HostEvent::Disconnect => "disconnect",
            HostEvent::PickResult(_) => "pickResult",
            HostEvent::ZoneStateChanged { .. } => "zoneStateChanged",
            HostEvent::Message(_) => "message",
        }
    }

    /// Full `emit` argument list: the event name followed by the payload.
    pub fn emit_args(&self) -> Vec<HostValue> {
        let mut args = vec![HostValue::from(self.name())];
        match self {
            HostEvent::Command(code) => args.push((*code).into()),
            HostEvent::Disconnect => {}
            HostEvent::PickResult(xml) => args.push(xml.clone().into()),
            HostEvent::ZoneStateChanged { zone, state } => {
                args.push(zone.clone().into());
                args.push((*state).into());
            }
            HostEvent::Message(text) => args.push(text.clone().into()),
        }
        args
    }
}

/// The host object events are delivered to.
pub trait EventTarget {
    fn call(&mut self, method: &str, args: Vec<HostValue>);
}

impl<F> EventTarget for F
where
    F: FnMut(&str, Vec<HostValue>),
{
    fn call(&mut self, method: &str, args: Vec<HostValue>) {
        self(method, args)
    }
}

/// Deliver `event` to `target` as a single `emit` call.
pub fn emit(target: &mut dyn EventTarget, event: &HostEvent) {
    target.call(EMIT, event.emit_args());
}

/// Create the worker→host queue.
pub(crate) fn event_queue(capacity: usize) -> (EventRoute, EventQueue) {
    let (tx, rx) = mpsc::channel(capacity);
    (EventRoute { tx }, EventQueue { rx })
}

/// Producer half, held by the event sink on the pump thread.
#[derive(Clone)]
pub(crate) struct EventRoute {
    tx: mpsc::Sender<HostEvent>,
}

impl EventRoute {
    /// Admit `event` to the queue, blocking while it is full.
    ///
    /// A caller running inside an async runtime must not block it, so there the
    /// event is admitted only if there is room. Returns `false` when the event
    /// was not admitted.
    pub(crate) fn deliver(&self, event: HostEvent) -> bool {
        if Handle::try_current().is_ok() {
            return self.deliver_without_blocking(event);
        }
        let name = event.name();
        match self.tx.blocking_send(event) {
            Ok(()) => true,
            Err(_) => {
                log::debug!(
                    target: "title_bridge::sink",
                    "Host queue closed; dropping '{}' event",
                    name
                );
                false
            }
        }
    }

    fn deliver_without_blocking(&self, event: HostEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                log::warn!(
                    target: "title_bridge::sink",
                    "Host queue full on a runtime thread; dropping '{}' event",
                    event.name()
                );
                false
            }
            Err(TrySendError::Closed(event)) => {
                log::debug!(
                    target: "title_bridge::sink",
                    "Host queue closed; dropping '{}' event",
                    event.name()
                );
                false
            }
        }
    }
}

/// Consumer half, drained on the host's execution context.
pub(crate) struct EventQueue {
    rx: mpsc::Receiver<HostEvent>,
}

impl EventQueue {
    pub(crate) fn try_next(&mut self) -> Option<HostEvent> {
        self.rx.try_recv().ok()
    }

    pub(crate) async fn next(&mut self) -> Option<HostEvent> {
        self.rx.recv().await
    }

    /// Emit every queued event to `target`, in arrival order.
    pub(crate) fn dispatch_pending(&mut self, target: &mut dyn EventTarget) -> usize {
        let mut delivered = 0;
        while let Some(event) = self.try_next() {
            emit(target, &event);
            delivered += 1;
        }
        delivered
    }

    /// Refuse further events and wake a producer blocked on a full queue.
    pub(crate) fn close(&mut self) {
        self.rx.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_args_follow_fixed_order() {
        assert_eq!(
            HostEvent::Command(42).emit_args(),
            vec![HostValue::from("command"), HostValue::Integer(42)]
        );
        assert_eq!(
            HostEvent::Disconnect.emit_args(),
            vec![HostValue::from("disconnect")]
        );
        assert_eq!(
            HostEvent::ZoneStateChanged {
                zone: "ArenaA".into(),
                state: true
            }
            .emit_args(),
            vec![
                HostValue::from("zoneStateChanged"),
                HostValue::from("ArenaA"),
                HostValue::Bool(true)
            ]
        );
    }

    #[test]
    fn host_values_serialize_untagged() {
        let json = serde_json::to_string(&HostEvent::PickResult("<r/>".into()).emit_args()).unwrap();
        assert_eq!(json, r#"["pickResult","<r/>"]"#);
    }

    #[test]
    fn dispatch_pending_preserves_order_and_uses_emit() {
        let (route, mut queue) = event_queue(8);
        assert!(route.deliver(HostEvent::Command(1)));
        assert!(route.deliver(HostEvent::Message("hi".into())));
        assert!(route.deliver(HostEvent::Disconnect));

        let mut calls = Vec::new();
        let mut target = |method: &str, args: Vec<HostValue>| calls.push((method.to_string(), args));
        assert_eq!(queue.dispatch_pending(&mut target), 3);

        let names: Vec<_> = calls.iter().map(|(_, args)| args[0].clone()).collect();
        assert!(calls.iter().all(|(method, _)| method == EMIT));
        assert_eq!(
            names,
            vec![
                HostValue::from("command"),
                HostValue::from("message"),
                HostValue::from("disconnect")
            ]
        );
    }

    #[test]
    fn deliver_after_close_is_refused() {
        let (route, mut queue) = event_queue(1);
        queue.close();
        assert!(!route.deliver(HostEvent::Disconnect));
        assert!(queue.try_next().is_none());
    }

    #[test]
    fn close_releases_producer_blocked_on_full_queue() {
        let (route, mut queue) = event_queue(1);
        assert!(route.deliver(HostEvent::Command(1)));

        let producer = std::thread::spawn(move || route.deliver(HostEvent::Command(2)));
        std::thread::sleep(std::time::Duration::from_millis(50));
        queue.close();

        assert!(!producer.join().unwrap());
    }

    #[tokio::test]
    async fn deliver_on_runtime_thread_queues_without_blocking() {
        let (route, mut queue) = event_queue(1);

        assert!(route.deliver(HostEvent::Command(5)));
        // Full: refused instead of blocking the runtime.
        assert!(!route.deliver(HostEvent::Command(6)));

        assert_eq!(queue.next().await, Some(HostEvent::Command(5)));
        assert!(queue.try_next().is_none());
    }

    #[test]
    fn deliver_inside_block_on_does_not_panic() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let (route, mut queue) = event_queue(4);

        let admitted = runtime.block_on(async { route.deliver(HostEvent::Command(7)) });

        assert!(admitted);
        assert_eq!(queue.try_next(), Some(HostEvent::Command(7)));
    }
}
