//! Mock transport provider for testing
//!
//! Opens succeed unless a failure has been scripted. Sent frames are
//! recorded per hardware key, and inbound frames or faults can be injected
//! into whichever link is currently open on a key.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use canmux_core::{
    CanFrame, CanTransport, FrameSink, HardwareDescriptor, LinkId, OpenOptions, TransportError,
    TransportProvider,
};

use crate::provider::check_frame;

#[derive(Default)]
struct MockState {
    open_script: Mutex<VecDeque<Result<(), TransportError>>>,
    send_script: Mutex<VecDeque<TransportError>>,
    open_count: AtomicUsize,
    close_count: AtomicUsize,
    /// hardware key -> sink of the live link
    live: Mutex<HashMap<String, FrameSink>>,
    sent: Mutex<Vec<(String, CanFrame)>>,
}

/// Scriptable [`TransportProvider`]; clones share state
#[derive(Clone, Default)]
pub struct MockTransportProvider {
    state: Arc<MockState>,
}

impl MockTransportProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the outcome of the next open; unscripted opens succeed
    pub fn script_open(&self, outcome: Result<(), TransportError>) {
        self.state.open_script.lock().push_back(outcome);
    }

    /// Fail the next `count` opens
    pub fn fail_opens(&self, count: usize, reason: &str) {
        for _ in 0..count {
            self.script_open(Err(TransportError::ConnectionFailed(reason.to_string())));
        }
    }

    /// Fail the next send on any link
    pub fn fail_next_send(&self, error: TransportError) {
        self.state.send_script.lock().push_back(error);
    }

    pub fn open_count(&self) -> usize {
        self.state.open_count.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.state.close_count.load(Ordering::SeqCst)
    }

    pub fn is_open(&self, hardware_key: &str) -> bool {
        self.state.live.lock().contains_key(hardware_key)
    }

    /// Link currently open on a key
    pub fn link(&self, hardware_key: &str) -> Option<LinkId> {
        self.state.live.lock().get(hardware_key).map(|sink| sink.link())
    }

    /// Sink of the live link on a key; a clone stays usable after the link closes
    pub fn sink(&self, hardware_key: &str) -> Option<FrameSink> {
        self.state.live.lock().get(hardware_key).cloned()
    }

    /// Frames sent on a key, in send order
    pub fn sent(&self, hardware_key: &str) -> Vec<CanFrame> {
        self.state
            .sent
            .lock()
            .iter()
            .filter(|(key, _)| key == hardware_key)
            .map(|(_, frame)| frame.clone())
            .collect()
    }

    pub fn sent_count(&self) -> usize {
        self.state.sent.lock().len()
    }

    /// Deliver a frame as if received on the live link of `hardware_key`
    pub fn inject(&self, hardware_key: &str, frame: CanFrame) -> bool {
        match self.sink(hardware_key) {
            Some(sink) => sink.try_deliver(frame),
            None => false,
        }
    }

    /// Report an asynchronous fault on the live link of `hardware_key`
    pub fn fault(&self, hardware_key: &str, reason: &str) -> bool {
        match self.sink(hardware_key) {
            Some(sink) => sink.try_report_fault(reason),
            None => false,
        }
    }
}

#[async_trait]
impl TransportProvider for MockTransportProvider {
    async fn open(
        &self,
        hardware: &HardwareDescriptor,
        options: &OpenOptions,
        sink: FrameSink,
    ) -> Result<Box<dyn CanTransport>, TransportError> {
        self.state.open_count.fetch_add(1, Ordering::SeqCst);
        let outcome = self.state.open_script.lock().pop_front().unwrap_or(Ok(()));
        outcome?;

        let key = hardware.key();
        let link = sink.link();
        self.state.live.lock().insert(key.clone(), sink);
        tracing::debug!(hardware_key = %key, link = %link, "Mock transport opened");

        Ok(Box::new(MockTransport {
            key,
            link,
            options: options.clone(),
            state: self.state.clone(),
            closed: false,
        }))
    }
}

struct MockTransport {
    key: String,
    link: LinkId,
    options: OpenOptions,
    state: Arc<MockState>,
    closed: bool,
}

#[async_trait]
impl CanTransport for MockTransport {
    async fn send(&self, frame: &CanFrame) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::ConnectionClosed);
        }
        if let Some(error) = self.state.send_script.lock().pop_front() {
            return Err(error);
        }
        check_frame(frame, &self.options)?;
        self.state.sent.lock().push((self.key.clone(), frame.clone()));
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.state.close_count.fetch_add(1, Ordering::SeqCst);
        let mut live = self.state.live.lock();
        if live.get(&self.key).is_some_and(|sink| sink.link() == self.link) {
            live.remove(&self.key);
        }
        Ok(())
    }
}
