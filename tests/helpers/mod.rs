//! Shared test helpers for bridge integration tests.
//!
//! Note: We use `helpers/mod.rs` instead of the modern `helpers.rs` + `helpers/` pattern
//! because Cargo auto-discovers top-level `.rs` files in `tests/` as integration tests.

#![allow(dead_code)]

pub mod fake_native;

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use title_bridge::{EventTarget, HostValue, TitleBridge};

/// Records every host call it receives.
#[derive(Default)]
pub struct RecordingTarget {
    pub calls: Vec<(String, Vec<HostValue>)>,
}

impl EventTarget for RecordingTarget {
    fn call(&mut self, method: &str, args: Vec<HostValue>) {
        self.calls.push((method.to_string(), args));
    }
}

impl RecordingTarget {
    /// Argument lists of all `emit` calls, in order.
    pub fn emitted(&self) -> Vec<Vec<HostValue>> {
        self.calls
            .iter()
            .filter(|(method, _)| method == "emit")
            .map(|(_, args)| args.clone())
            .collect()
    }
}

/// Dispatch until `target` has seen `count` calls. Panics after 5 seconds.
pub fn drain_until(bridge: &mut TitleBridge, target: &mut RecordingTarget, count: usize) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while target.calls.len() < count {
        bridge.dispatch_pending(target);
        assert!(
            Instant::now() < deadline,
            "expected {} host calls, got {}",
            count,
            target.calls.len()
        );
        std::thread::sleep(Duration::from_millis(1));
    }
}

/// `<root>/build/Release`, the usual place for a built bridge module.
pub fn install_dir(root: &Path) -> PathBuf {
    root.join("build").join("Release")
}

pub fn utf16(text: &str) -> Vec<u16> {
    text.encode_utf16().collect()
}
