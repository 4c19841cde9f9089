//! Virtual CAN bus
//!
//! Always available. Transmitted frames are accepted and dropped; when
//! traffic simulation is on, a background task feeds a fixed set of vehicle
//! messages into the sink at their nominal periods.
//!
//! Each channel has a [`VirtualChannel`] handle that outlives individual
//! opens. It injects frames and error frames into the open channel and
//! switches simulated messages on and off or changes their periods.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use canmux_core::{CanFrame, CanTransport, FrameSink, LinkId, OpenOptions, TransportError};

use crate::provider::check_frame;
use crate::settings::VirtualBusSettings;

/// Poll granularity of the traffic generator
const GENERATOR_TICK: Duration = Duration::from_millis(10);

/// Simulated message kinds with their nominal periods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulatedMessage {
    EngineRpm,
    VehicleSpeed,
    BodyControl,
    Electrical,
    Climate,
    DiagnosticRequest,
    DiagnosticResponse,
}

impl SimulatedMessage {
    pub const ALL: [SimulatedMessage; 7] = [
        SimulatedMessage::EngineRpm,
        SimulatedMessage::VehicleSpeed,
        SimulatedMessage::BodyControl,
        SimulatedMessage::Electrical,
        SimulatedMessage::Climate,
        SimulatedMessage::DiagnosticRequest,
        SimulatedMessage::DiagnosticResponse,
    ];

    pub fn frame_id(&self) -> u32 {
        match self {
            SimulatedMessage::EngineRpm => 0x100,
            SimulatedMessage::VehicleSpeed => 0x101,
            SimulatedMessage::BodyControl => 0x200,
            SimulatedMessage::Electrical => 0x300,
            SimulatedMessage::Climate => 0x400,
            SimulatedMessage::DiagnosticRequest => 0x7E0,
            SimulatedMessage::DiagnosticResponse => 0x7E8,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SimulatedMessage::EngineRpm => "Engine_RPM",
            SimulatedMessage::VehicleSpeed => "Vehicle_Speed",
            SimulatedMessage::BodyControl => "Body_Control",
            SimulatedMessage::Electrical => "Electrical",
            SimulatedMessage::Climate => "Climate",
            SimulatedMessage::DiagnosticRequest => "Diagnostic_Request",
            SimulatedMessage::DiagnosticResponse => "Diagnostic_Response",
        }
    }

    pub fn period_ms(&self) -> u64 {
        match self {
            SimulatedMessage::EngineRpm => 500,
            SimulatedMessage::VehicleSpeed => 1000,
            SimulatedMessage::BodyControl => 2000,
            SimulatedMessage::Electrical => 5000,
            SimulatedMessage::Climate => 10_000,
            SimulatedMessage::DiagnosticRequest | SimulatedMessage::DiagnosticResponse => 20_000,
        }
    }
}

/// Slowly drifting vehicle state behind the generated payloads
#[derive(Debug)]
pub struct VehicleSimulation {
    rng: StdRng,
    speed_kmh: f64,
    door_state: u8,
    counter: u8,
}

impl VehicleSimulation {
    pub fn new(rng: StdRng) -> Self {
        Self {
            rng,
            speed_kmh: 0.0,
            door_state: 0,
            counter: 0,
        }
    }

    pub fn payload(&mut self, message: SimulatedMessage) -> [u8; 8] {
        let rng = &mut self.rng;
        match message {
            SimulatedMessage::EngineRpm => {
                let rpm: u16 = rng.gen_range(1700..=2900);
                let [hi, lo] = rpm.to_be_bytes();
                [
                    hi,
                    lo,
                    rng.gen_range(20..=80),
                    rng.gen_range(80..=95),
                    rng.gen_range(10..=90),
                    0,
                    0,
                    0,
                ]
            }
            SimulatedMessage::VehicleSpeed => {
                self.speed_kmh = (self.speed_kmh + rng.gen_range(-2.0..=2.0)).clamp(0.0, 120.0);
                // 0.01 km/h resolution
                let [hi, lo] = ((self.speed_kmh * 100.0) as u16).to_be_bytes();
                [hi, lo, 0x12, 0x34, 0x56, 0x78, 0, 0]
            }
            SimulatedMessage::BodyControl => {
                if rng.gen_bool(0.02) {
                    self.door_state ^= 1 << rng.gen_range(0..4);
                }
                let lights = (rng.gen_range(0..=1u8) << 4) | (rng.gen_range(0..=1u8) << 3);
                [self.door_state, rng.gen_range(20..=100), lights, 0, 0, 0, 0, 0]
            }
            SimulatedMessage::Electrical => {
                // 0.1 V resolution, 10.0..15.0 V
                let voltage: u8 = rng.gen_range(100..=150);
                [rng.gen_range(10..=100), voltage, rng.gen(), rng.gen(), 0, 0, 0, 0]
            }
            SimulatedMessage::Climate => [
                rng.gen_range(18..=25),
                rng.gen_range(15..=30),
                rng.gen_range(0..=3),
                rng.gen_range(0..=1),
                rng.gen_range(0..=1),
                0,
                0,
                0,
            ],
            SimulatedMessage::DiagnosticRequest | SimulatedMessage::DiagnosticResponse => {
                self.counter = self.counter.wrapping_add(1);
                [0x00, rng.gen_range(0..=100), self.counter, 0x55, 0xAA, 0, 0, 0]
            }
        }
    }
}

/// Schedule entry of one simulated message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulatedMessageStatus {
    pub frame_id: u32,
    pub name: &'static str,
    pub period_ms: u64,
    pub enabled: bool,
}

#[derive(Debug)]
struct ChannelState {
    sink: Option<FrameSink>,
    schedule: Vec<SimulatedMessageStatus>,
}

/// Control handle for one virtual channel
///
/// Cloning shares the channel. Schedule changes persist across reopens and
/// apply to a running simulation on its next tick.
#[derive(Debug, Clone)]
pub struct VirtualChannel {
    name: String,
    state: Arc<Mutex<ChannelState>>,
}

impl VirtualChannel {
    pub fn new(name: impl Into<String>, settings: &VirtualBusSettings) -> Self {
        let schedule = SimulatedMessage::ALL
            .iter()
            .map(|m| SimulatedMessageStatus {
                frame_id: m.frame_id(),
                name: m.name(),
                period_ms: settings.scaled_period(m.period_ms()).as_millis() as u64,
                enabled: true,
            })
            .collect();
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(ChannelState {
                sink: None,
                schedule,
            })),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// A transport is currently open on this channel
    pub fn is_open(&self) -> bool {
        self.state.lock().sink.is_some()
    }

    /// Deliver `frame` as if it arrived from the bus; `false` when the
    /// channel is not open or the inbound queue is full
    pub fn inject(&self, frame: CanFrame) -> bool {
        let sink = self.state.lock().sink.clone();
        match sink {
            Some(sink) => {
                tracing::debug!(
                    channel = %self.name,
                    frame_id = format_args!("0x{:X}", frame.id),
                    error = frame.error,
                    "Injecting virtual frame"
                );
                sink.try_deliver(frame)
            }
            None => false,
        }
    }

    pub fn inject_error_frame(&self) -> bool {
        self.inject(CanFrame::error_frame())
    }

    /// `false` when `frame_id` is not a simulated message
    pub fn set_message_enabled(&self, frame_id: u32, enabled: bool) -> bool {
        self.update(frame_id, |entry| entry.enabled = enabled)
    }

    /// Actual period, not scaled by the traffic speedup; at least 1 ms
    pub fn set_message_period(&self, frame_id: u32, period_ms: u64) -> bool {
        self.update(frame_id, |entry| entry.period_ms = period_ms.max(1))
    }

    pub fn messages(&self) -> Vec<SimulatedMessageStatus> {
        self.state.lock().schedule.clone()
    }

    fn update(&self, frame_id: u32, apply: impl FnOnce(&mut SimulatedMessageStatus)) -> bool {
        let mut state = self.state.lock();
        match state.schedule.iter_mut().find(|e| e.frame_id == frame_id) {
            Some(entry) => {
                apply(entry);
                true
            }
            None => false,
        }
    }

    fn attach(&self, sink: FrameSink) {
        self.state.lock().sink = Some(sink);
    }

    /// Only the link that attached may detach, so a late drop of an old
    /// transport leaves a newer one in place
    fn detach(&self, link: LinkId) {
        let mut state = self.state.lock();
        if state.sink.as_ref().is_some_and(|s| s.link() == link) {
            state.sink = None;
        }
    }

    fn schedule(&self) -> Vec<SimulatedMessageStatus> {
        self.state.lock().schedule.clone()
    }
}

/// Transport bound to one virtual channel
pub struct VirtualTransport {
    channel: VirtualChannel,
    link: LinkId,
    options: OpenOptions,
    traffic: Option<JoinHandle<()>>,
}

impl VirtualTransport {
    pub fn open(
        channel: &VirtualChannel,
        options: &OpenOptions,
        settings: &VirtualBusSettings,
        sink: FrameSink,
    ) -> Self {
        let link = sink.link();
        channel.attach(sink.clone());
        let traffic = settings
            .simulate_traffic
            .then(|| tokio::spawn(run_traffic(channel.clone(), sink)));

        tracing::info!(
            channel = %channel.name(),
            simulate_traffic = settings.simulate_traffic,
            "Virtual CAN channel opened"
        );

        Self {
            channel: channel.clone(),
            link,
            options: options.clone(),
            traffic,
        }
    }

    pub fn is_simulating(&self) -> bool {
        self.traffic.as_ref().is_some_and(|h| !h.is_finished())
    }

    fn stop(&mut self) -> bool {
        self.channel.detach(self.link);
        match self.traffic.take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }
}

async fn run_traffic(channel: VirtualChannel, sink: FrameSink) {
    let mut sim = VehicleSimulation::new(StdRng::from_entropy());
    let mut last_sent: Vec<Option<Instant>> = vec![None; SimulatedMessage::ALL.len()];
    let mut ticker = tokio::time::interval(GENERATOR_TICK);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        let now = Instant::now();
        let schedule = channel.schedule();
        for (i, (message, entry)) in SimulatedMessage::ALL.iter().zip(&schedule).enumerate() {
            if !entry.enabled {
                continue;
            }
            let period = Duration::from_millis(entry.period_ms);
            let due = last_sent[i].map_or(true, |t| now.duration_since(t) >= period);
            if !due {
                continue;
            }
            let frame = CanFrame::standard(message.frame_id(), sim.payload(*message).to_vec());
            if !sink.deliver(frame).await {
                tracing::debug!(network_id = %sink.network_id(), "Virtual traffic receiver gone");
                return;
            }
            last_sent[i] = Some(now);
        }
    }
}

#[async_trait]
impl CanTransport for VirtualTransport {
    async fn send(&self, frame: &CanFrame) -> Result<(), TransportError> {
        check_frame(frame, &self.options)?;
        tracing::trace!(
            channel = %self.channel.name(),
            frame_id = format_args!("0x{:X}", frame.id),
            "Virtual transmit"
        );
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.stop() {
            tracing::debug!(channel = %self.channel.name(), "Virtual traffic stopped");
        }
        Ok(())
    }
}

impl Drop for VirtualTransport {
    fn drop(&mut self) {
        self.stop();
    }
}
