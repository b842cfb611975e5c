//! In-process line transport. `pair()` returns two connected ends; bytes
//! written on one are readable on the other.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use tetra_traits::LineTransport;

use crate::error::HwError;

type Queue = Arc<Mutex<VecDeque<u8>>>;

/// Fault switches shared by both ends of a pair.
#[derive(Debug, Default)]
pub struct LoopbackFaults {
    failing: AtomicBool,
    reopens: AtomicU32,
}

impl LoopbackFaults {
    /// While set, every read and write fails with `Disconnected`.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    pub fn is_failing(&self) -> bool {
        self.failing.load(Ordering::Relaxed)
    }

    pub fn reopen_count(&self) -> u32 {
        self.reopens.load(Ordering::Relaxed)
    }
}

#[derive(Debug)]
pub struct LoopbackTransport {
    rx: Queue,
    tx: Queue,
    faults: Arc<LoopbackFaults>,
}

impl LoopbackTransport {
    pub fn pair() -> (Self, Self) {
        let a_to_b: Queue = Arc::default();
        let b_to_a: Queue = Arc::default();
        let faults = Arc::new(LoopbackFaults::default());
        let a = Self {
            rx: Arc::clone(&b_to_a),
            tx: Arc::clone(&a_to_b),
            faults: Arc::clone(&faults),
        };
        let b = Self {
            rx: a_to_b,
            tx: b_to_a,
            faults,
        };
        (a, b)
    }

    pub fn faults(&self) -> Arc<LoopbackFaults> {
        Arc::clone(&self.faults)
    }

    /// Push raw bytes to the peer, bypassing line framing.
    pub fn write_raw(&mut self, bytes: &[u8]) -> Result<(), HwError> {
        self.check()?;
        let mut q = self.tx.lock().map_err(|_| HwError::Disconnected)?;
        q.extend(bytes);
        Ok(())
    }

    /// Bytes waiting to be read on this end.
    pub fn pending(&self) -> usize {
        self.rx.lock().map(|q| q.len()).unwrap_or(0)
    }

    fn check(&self) -> Result<(), HwError> {
        if self.faults.is_failing() {
            return Err(HwError::Disconnected);
        }
        Ok(())
    }
}

impl LineTransport for LoopbackTransport {
    fn read_available(
        &mut self,
        buf: &mut [u8],
    ) -> Result<usize, Box<dyn std::error::Error + Send + Sync>> {
        self.check()?;
        let mut q = self.rx.lock().map_err(|_| HwError::Disconnected)?;
        let n = buf.len().min(q.len());
        for (slot, b) in buf.iter_mut().zip(q.drain(..n)) {
            *slot = b;
        }
        Ok(n)
    }

    fn write_line(&mut self, line: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.check()?;
        let mut q = self.tx.lock().map_err(|_| HwError::Disconnected)?;
        q.extend(line.as_bytes());
        q.push_back(b'\n');
        Ok(())
    }

    /// Clears the fault flag, as a fresh handle would.
    fn reopen(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.faults.reopens.fetch_add(1, Ordering::Relaxed);
        self.faults.set_failing(false);
        Ok(())
    }
}
