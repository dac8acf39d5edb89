//! Registry of live bridge instances, keyed by owner token.
//!
//! Native callbacks carry an opaque owner value. Backends put a [`BridgeToken`]
//! there and resolve it through this registry, so a token whose bridge has been
//! torn down resolves to nothing instead of a dangling instance.

use crate::host::EventRoute;
use crate::sink::EventSink;
use dashmap::DashMap;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

static GLOBAL: LazyLock<BridgeRegistry> = LazyLock::new(BridgeRegistry::new);

/// Identity of one bridge instance. Never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BridgeToken(NonZeroU64);

impl BridgeToken {
    pub(crate) fn next() -> Self {
        let value = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
        // Starts at 1 and would need 2^64 bridges to wrap.
        Self(NonZeroU64::new(value).unwrap_or(NonZeroU64::MIN))
    }

    /// Raw value, suitable for an owner pointer in a native callback table.
    pub fn get(self) -> u64 {
        self.0.get()
    }

    /// Rebuild a token from its raw value. Zero is never a valid token.
    pub fn from_raw(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }
}

impl std::fmt::Display for BridgeToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "bridge#{}", self.0)
    }
}

/// Thread-safe map from token to the live event sink of that bridge.
#[derive(Default)]
pub struct BridgeRegistry {
    live: DashMap<BridgeToken, Arc<EventSink>>,
}

impl BridgeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry used by bridges and native callback trampolines.
    pub fn global() -> &'static BridgeRegistry {
        &GLOBAL
    }

    /// Allocate a token and register a sink forwarding to `route`.
    pub(crate) fn register(&self, route: EventRoute) -> (BridgeToken, Arc<EventSink>) {
        let token = BridgeToken::next();
        let sink = Arc::new(EventSink::new(token, route));
        self.live.insert(token, sink.clone());
        log::debug!(target: "title_bridge::registry", "Registered {}", token);
        (token, sink)
    }

    pub fn lookup(&self, token: BridgeToken) -> Option<Arc<EventSink>> {
        self.live.get(&token).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, token: BridgeToken) -> bool {
        self.live.contains_key(&token)
    }

    /// Remove `token`. Returns whether it was registered.
    pub fn unregister(&self, token: BridgeToken) -> bool {
        let removed = self.live.remove(&token).is_some();
        if removed {
            log::debug!(target: "title_bridge::registry", "Unregistered {}", token);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::event_queue;

    #[test]
    fn tokens_are_unique_and_nonzero() {
        let a = BridgeToken::next();
        let b = BridgeToken::next();
        assert_ne!(a, b);
        assert!(a.get() > 0);
        assert_eq!(BridgeToken::from_raw(a.get()), Some(a));
        assert_eq!(BridgeToken::from_raw(0), None);
    }

    #[test]
    fn register_lookup_unregister() {
        let registry = BridgeRegistry::new();
        let (route, _queue) = event_queue(4);

        let (token, sink) = registry.register(route);
        assert_eq!(sink.owner(), Some(token));
        assert!(registry.contains(token));
        assert!(Arc::ptr_eq(&registry.lookup(token).unwrap(), &sink));

        assert!(registry.unregister(token));
        assert!(!registry.unregister(token));
        assert!(registry.lookup(token).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn stale_token_is_not_mistaken_for_new_instance() {
        let registry = BridgeRegistry::new();
        let (first_route, _first_queue) = event_queue(4);
        let first = registry.register(first_route).0;
        registry.unregister(first);

        let (second_route, _second_queue) = event_queue(4);
        let second = registry.register(second_route).0;

        assert_ne!(first, second);
        assert!(registry.lookup(first).is_none());
        assert!(registry.lookup(second).is_some());
    }
}
