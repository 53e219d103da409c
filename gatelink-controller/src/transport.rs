//! Transport Port: slot-addressed reads and writes
//!
//! A [`SlotTransport`] is supplied by whoever owns the BLE connection. The
//! engine only ever talks to it through a [`SlotLink`], which caches resolved
//! handles, keeps at most one operation outstanding per slot and picks the
//! write mode.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use gatelink_proto::{Slot, SlotCapabilities};

use crate::config::ControllerConfig;
use crate::error::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    WithResponse,
    /// Fire-and-forget, no completion from the peer
    WithoutResponse,
}

/// Consumed capability: a connected peer with addressable slots
///
/// Implementations correlate completions by slot alone, so they must never
/// see two operations on the same handle at once. [`SlotLink`] guarantees it.
#[async_trait]
pub trait SlotTransport: Send + Sync {
    type Handle: Clone + Send + Sync + 'static;

    fn resolve(&self, slot: Slot) -> Result<Self::Handle, TransportError>;

    fn capabilities(&self, handle: &Self::Handle) -> SlotCapabilities;

    async fn write(&self, handle: &Self::Handle, data: &[u8], mode: WriteMode) -> Result<(), TransportError>;

    async fn read(&self, handle: &Self::Handle) -> Result<Vec<u8>, TransportError>;
}

/// Applies a per-operation deadline to another transport
///
/// An elapsed deadline surfaces as [`TransportError::Timeout`], which the
/// engine handles like any other link failure.
pub struct Deadline<T> {
    inner: T,
    timeout: Duration,
}

impl<T: SlotTransport> Deadline<T> {
    pub fn new(inner: T, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

#[async_trait]
impl<T: SlotTransport> SlotTransport for Deadline<T> {
    type Handle = T::Handle;

    fn resolve(&self, slot: Slot) -> Result<Self::Handle, TransportError> {
        self.inner.resolve(slot)
    }

    fn capabilities(&self, handle: &Self::Handle) -> SlotCapabilities {
        self.inner.capabilities(handle)
    }

    async fn write(&self, handle: &Self::Handle, data: &[u8], mode: WriteMode) -> Result<(), TransportError> {
        tokio::time::timeout(self.timeout, self.inner.write(handle, data, mode))
            .await
            .map_err(|_| TransportError::Timeout)?
    }

    async fn read(&self, handle: &Self::Handle) -> Result<Vec<u8>, TransportError> {
        tokio::time::timeout(self.timeout, self.inner.read(handle))
            .await
            .map_err(|_| TransportError::Timeout)?
    }
}

/// The engine's view of a transport
pub struct SlotLink<T: SlotTransport> {
    transport: T,
    handles: Mutex<HashMap<Slot, T::Handle>>,
    // one entry per slot ever used; holding the lock = operation outstanding
    pending: Mutex<HashMap<Slot, Arc<tokio::sync::Mutex<()>>>>,
    unacked_threshold: usize,
    settle_delay: Duration,
}

impl<T: SlotTransport> SlotLink<T> {
    pub fn new(transport: T, config: &ControllerConfig) -> Self {
        Self {
            transport,
            handles: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            unacked_threshold: config.write_without_response_threshold,
            settle_delay: config.settle_delay(),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    fn handle(&self, slot: Slot) -> Result<T::Handle, TransportError> {
        let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = handles.get(&slot) {
            return Ok(handle.clone());
        }
        let handle = self.transport.resolve(slot)?;
        handles.insert(slot, handle.clone());
        Ok(handle)
    }

    fn slot_lock(&self, slot: Slot) -> Arc<tokio::sync::Mutex<()>> {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.entry(slot).or_default().clone()
    }

    /// Mode used for a payload of `len` bytes on a slot with `caps`
    pub fn write_mode(&self, caps: SlotCapabilities, len: usize) -> Option<WriteMode> {
        if caps.write_without_response && (len > self.unacked_threshold || !caps.write) {
            Some(WriteMode::WithoutResponse)
        } else if caps.write {
            Some(WriteMode::WithResponse)
        } else {
            None
        }
    }

    pub async fn write(&self, slot: Slot, data: &[u8]) -> Result<(), TransportError> {
        let handle = self.handle(slot)?;
        let mode = self
            .write_mode(self.transport.capabilities(&handle), data.len())
            .ok_or(TransportError::Unsupported { slot, op: "write" })?;

        let lock = self.slot_lock(slot);
        let _outstanding = lock.lock().await;
        log::trace!("write {slot} ({} bytes, {mode:?})", data.len());
        self.transport.write(&handle, data, mode).await?;
        if mode == WriteMode::WithoutResponse {
            // nothing acknowledges this write; give the peer time to apply it
            tokio::time::sleep(self.settle_delay).await;
        }
        Ok(())
    }

    pub async fn read(&self, slot: Slot) -> Result<Vec<u8>, TransportError> {
        let handle = self.handle(slot)?;
        if !self.transport.capabilities(&handle).read {
            return Err(TransportError::Unsupported { slot, op: "read" });
        }

        let lock = self.slot_lock(slot);
        let _outstanding = lock.lock().await;
        let value = self.transport.read(&handle).await?;
        log::trace!("read {slot} ({} bytes)", value.len());
        Ok(value)
    }

    /// Read a slot the device may not expose; absent becomes `None`
    pub async fn read_optional(&self, slot: Slot) -> Result<Option<Vec<u8>>, TransportError> {
        match self.read(slot).await {
            Ok(value) => Ok(Some(value)),
            Err(TransportError::SlotNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::{Op, SimulatedGate};

    fn link(gate: &SimulatedGate) -> SlotLink<SimulatedGate> {
        SlotLink::new(gate.clone(), &ControllerConfig::default())
    }

    #[test]
    fn write_mode_selection() {
        let link = link(&SimulatedGate::new());
        let both = Slot::Authenticate.capabilities();
        let acked = Slot::ClientNonce.capabilities();
        let read_only = Slot::Nonce.capabilities();

        assert_eq!(link.write_mode(both, 64), Some(WriteMode::WithoutResponse));
        assert_eq!(link.write_mode(both, 21), Some(WriteMode::WithoutResponse));
        assert_eq!(link.write_mode(both, 20), Some(WriteMode::WithResponse));
        assert_eq!(link.write_mode(acked, 32), Some(WriteMode::WithResponse));
        assert_eq!(link.write_mode(read_only, 1), None);

        let unacked_only = SlotCapabilities { write_without_response: true, ..Default::default() };
        assert_eq!(link.write_mode(unacked_only, 1), Some(WriteMode::WithoutResponse));
    }

    #[tokio::test(start_paused = true)]
    async fn unacknowledged_write_waits_for_settle_delay() {
        let gate = SimulatedGate::new();
        let link = link(&gate);

        let before = tokio::time::Instant::now();
        link.write(Slot::Authenticate, &[0u8; 64]).await.unwrap();
        assert!(before.elapsed() >= Duration::from_millis(100));

        let before = tokio::time::Instant::now();
        link.write(Slot::ClientNonce, &[0u8; 32]).await.unwrap();
        assert!(before.elapsed() < Duration::from_millis(100));

        assert_eq!(
            gate.journal()[0],
            Op::Write(Slot::Authenticate, vec![0u8; 64], WriteMode::WithoutResponse)
        );
    }

    #[tokio::test]
    async fn rejects_unsupported_directions() {
        let link = link(&SimulatedGate::new());
        assert_eq!(
            link.write(Slot::Nonce, &[0]).await,
            Err(TransportError::Unsupported { slot: Slot::Nonce, op: "write" })
        );
        assert_eq!(
            link.read(Slot::Management).await,
            Err(TransportError::Unsupported { slot: Slot::Management, op: "read" })
        );
    }

    #[tokio::test]
    async fn missing_slots() {
        let gate = SimulatedGate::new();
        gate.remove_slot(Slot::Perm);
        let link = link(&gate);
        assert_eq!(link.read_optional(Slot::Perm).await, Ok(None));
        assert_eq!(link.read(Slot::Perm).await, Err(TransportError::SlotNotFound(Slot::Perm)));
    }

    #[tokio::test(start_paused = true)]
    async fn same_slot_operations_never_overlap() {
        let gate = SimulatedGate::new();
        gate.set_latency(Duration::from_millis(5));
        let link = link(&gate);

        let one = 1u32.to_le_bytes();
        let two = 2u32.to_le_bytes();
        let (a, b, c) = tokio::join!(
            link.write(Slot::ManagementParamVal, &one),
            link.write(Slot::ManagementParamVal, &two),
            link.read(Slot::ManagementParamVal),
        );
        a.unwrap();
        b.unwrap();
        c.unwrap();
        assert_eq!(gate.overlapping_ops(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn different_slots_may_overlap() {
        let gate = SimulatedGate::new();
        gate.set_latency(Duration::from_millis(20));
        let link = link(&gate);

        let start = tokio::time::Instant::now();
        let (a, b) = tokio::join!(link.read(Slot::Nonce), link.read(Slot::Perm));
        a.unwrap();
        b.unwrap();
        assert!(start.elapsed() < Duration::from_millis(40));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_maps_to_timeout() {
        let gate = SimulatedGate::new();
        gate.set_latency(Duration::from_secs(10));
        let link = SlotLink::new(
            Deadline::new(gate.clone(), Duration::from_secs(1)),
            &ControllerConfig::default(),
        );
        assert_eq!(link.read(Slot::Nonce).await, Err(TransportError::Timeout));
    }
}
