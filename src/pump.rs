//! Background thread that pumps the native async processor.

use crate::native::{AsyncProcessor, PumpStatus};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread::JoinHandle;

const PUMP_THREAD_NAME: &str = "title-bridge-pump";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpState {
    Running,
    Stopping,
    Stopped,
}

impl PumpState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => PumpState::Running,
            1 => PumpState::Stopping,
            _ => PumpState::Stopped,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            PumpState::Running => 0,
            PumpState::Stopping => 1,
            PumpState::Stopped => 2,
        }
    }
}

/// One pump thread bound to one processor.
///
/// While the thread runs, only it calls `process`; `stop` is the sole other
/// caller into the processor, and only through `close`.
pub struct PumpWorker {
    processor: Arc<dyn AsyncProcessor>,
    state: Arc<AtomicU8>,
    handle: Option<JoinHandle<()>>,
}

impl PumpWorker {
    pub fn start(processor: Arc<dyn AsyncProcessor>) -> io::Result<Self> {
        let state = Arc::new(AtomicU8::new(PumpState::Running.as_u8()));
        let handle = {
            let processor = Arc::clone(&processor);
            let state = Arc::clone(&state);
            std::thread::Builder::new()
                .name(PUMP_THREAD_NAME.to_string())
                .spawn(move || pump(processor.as_ref(), &state))?
        };
        log::debug!(target: "title_bridge::pump", "Pump worker started");
        Ok(Self {
            processor,
            state,
            handle: Some(handle),
        })
    }

    pub fn state(&self) -> PumpState {
        PumpState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Close the processor and wait for the pump thread to exit.
    ///
    /// Blocks until the thread has observed the close. Calling it again is a no-op.
    pub fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let _ = self.state.compare_exchange(
            PumpState::Running.as_u8(),
            PumpState::Stopping.as_u8(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        self.processor.close();
        if handle.join().is_err() {
            log::error!(target: "title_bridge::pump", "Pump worker panicked");
        }
        self.state
            .store(PumpState::Stopped.as_u8(), Ordering::Release);
        log::debug!(target: "title_bridge::pump", "Pump worker stopped");
    }
}

impl Drop for PumpWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn pump(processor: &dyn AsyncProcessor, state: &AtomicU8) {
    loop {
        match processor.process() {
            Ok(PumpStatus::Worked) => {}
            Ok(PumpStatus::Closed) => break,
            // Work-unit failures belong to the component; keep pumping.
            Err(err) => log::trace!(target: "title_bridge::pump", "{}", err),
        }
        if PumpState::from_u8(state.load(Ordering::Acquire)) != PumpState::Running {
            break;
        }
    }
    state.store(PumpState::Stopped.as_u8(), Ordering::Release);
}
