//! Raw SocketCAN transport
//!
//! The interface must already be configured (`ip link set can0 up type can
//! bitrate 500000`); bit timing and listen-only mode are interface settings
//! and are not changed from here.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use socketcan::{
    CanAnyFrame, CanDataFrame, CanFdFrame, CanFdSocket, CanRemoteFrame, EmbeddedFrame, ExtendedId,
    Frame, Id, Socket, SocketOptions, StandardId,
};
use tokio::task::JoinHandle;

use canmux_core::{CanFrame, CanTransport, FrameSink, OpenOptions, TransportError};

use crate::provider::check_frame;

/// How often the reader re-checks the stop flag
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// How long `close` waits for the reader before detaching it
const READER_JOIN_GRACE: Duration = Duration::from_millis(500);

pub struct SocketCanTransport {
    interface: String,
    options: OpenOptions,
    socket: Arc<CanFdSocket>,
    stop: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

impl SocketCanTransport {
    pub async fn open(
        interface: &str,
        options: &OpenOptions,
        sink: FrameSink,
    ) -> Result<Self, TransportError> {
        let iface = interface.to_string();
        let error_frames = options.error_frames;
        let socket = tokio::task::spawn_blocking(move || open_socket(&iface, error_frames))
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("Open task join error: {}", e)))??;

        if options.listen_only {
            tracing::debug!(
                interface = %interface,
                "Listen-only is enforced by the manager; the interface itself stays active"
            );
        }

        let socket = Arc::new(socket);
        let stop = Arc::new(AtomicBool::new(false));
        let reader = {
            let socket = socket.clone();
            let stop = stop.clone();
            let interface = interface.to_string();
            tokio::task::spawn_blocking(move || read_loop(&interface, &socket, &stop, &sink))
        };

        tracing::info!(
            interface = %interface,
            bitrate = options.bitrate,
            fd = options.protocol.is_fd(),
            "SocketCAN interface opened"
        );

        Ok(Self {
            interface: interface.to_string(),
            options: options.clone(),
            socket,
            stop,
            reader: Some(reader),
        })
    }
}

fn open_socket(interface: &str, error_frames: bool) -> Result<CanFdSocket, TransportError> {
    // FD socket reads both classic and FD frames
    let socket = CanFdSocket::open(interface).map_err(|e| {
        TransportError::ConnectionFailed(format!("Failed to open {}: {}", interface, e))
    })?;
    socket.set_read_timeout(READ_TIMEOUT).map_err(|e| {
        TransportError::InvalidConfig(format!("Failed to set read timeout: {}", e))
    })?;
    if error_frames {
        socket.set_error_filter_accept_all().map_err(|e| {
            TransportError::InvalidConfig(format!("Failed to enable error frames: {}", e))
        })?;
    }
    Ok(socket)
}

fn read_loop(interface: &str, socket: &CanFdSocket, stop: &AtomicBool, sink: &FrameSink) {
    while !stop.load(Ordering::SeqCst) {
        match socket.read_frame() {
            Ok(frame) => {
                if !forward(sink, convert_frame(frame)) {
                    break;
                }
            }
            Err(ref e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(e) => {
                tracing::error!(interface = %interface, error = %e, "SocketCAN read error");
                report_fault(sink, stop, format!("Read error on {}: {}", interface, e));
                break;
            }
        }
    }
    tracing::debug!(interface = %interface, "SocketCAN reader stopped");
}

/// Queue a frame without waiting; `false` once the manager is gone
///
/// The manager drains the queue on the task that closes this transport, so
/// the reader must never block on a full queue. Overflow drops the frame.
fn forward(sink: &FrameSink, frame: CanFrame) -> bool {
    sink.try_deliver(frame) || !sink.is_closed()
}

/// Retry a fault until it is queued, the transport is closing or the manager is gone
fn report_fault(sink: &FrameSink, stop: &AtomicBool, reason: String) {
    while !sink.try_report_fault(reason.clone()) {
        if sink.is_closed() || stop.load(Ordering::SeqCst) {
            return;
        }
        std::thread::sleep(READ_TIMEOUT);
    }
}

/// Wait for the reader to stop; `false` when it was detached after `grace`
async fn join_reader(interface: &str, reader: JoinHandle<()>, grace: Duration) -> bool {
    match tokio::time::timeout(grace, reader).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::warn!(interface = %interface, error = %e, "SocketCAN reader join failed");
            true
        }
        Err(_) => {
            tracing::warn!(
                interface = %interface,
                grace_ms = grace.as_millis() as u64,
                "SocketCAN reader did not stop in time, detaching it"
            );
            false
        }
    }
}

fn convert_frame(frame: CanAnyFrame) -> CanFrame {
    match frame {
        CanAnyFrame::Normal(f) => {
            CanFrame::new(f.raw_id() & 0x1FFF_FFFF, f.data().to_vec(), f.is_extended())
        }
        CanAnyFrame::Fd(f) => {
            CanFrame::new(f.raw_id() & 0x1FFF_FFFF, f.data().to_vec(), f.is_extended()).with_fd(true)
        }
        CanAnyFrame::Remote(f) => CanFrame {
            remote: true,
            ..CanFrame::new(f.raw_id() & 0x1FFF_FFFF, Vec::new(), f.is_extended())
        },
        // Error class bits live in the identifier
        CanAnyFrame::Error(f) => CanFrame {
            id: f.raw_id() & 0x1FFF_FFFF,
            ..CanFrame::error_frame()
        },
    }
}

fn frame_id(frame: &CanFrame) -> Result<Id, TransportError> {
    let id = if frame.extended {
        ExtendedId::new(frame.id).map(Id::Extended)
    } else {
        u16::try_from(frame.id)
            .ok()
            .and_then(StandardId::new)
            .map(Id::Standard)
    };
    id.ok_or_else(|| TransportError::InvalidFrame(format!("Invalid CAN ID: 0x{:X}", frame.id)))
}

fn write_frame(socket: &CanFdSocket, frame: &CanFrame) -> Result<(), TransportError> {
    let id = frame_id(frame)?;
    let invalid = || TransportError::InvalidFrame(format!("Cannot build frame 0x{:X}", frame.id));
    let result = if frame.remote {
        let remote = CanRemoteFrame::new_remote(id, frame.data.len()).ok_or_else(invalid)?;
        socket.write_frame(&remote)
    } else if frame.fd {
        let fd = CanFdFrame::new(id, &frame.data).ok_or_else(invalid)?;
        socket.write_frame(&fd)
    } else {
        let data = CanDataFrame::new(id, &frame.data).ok_or_else(invalid)?;
        socket.write_frame(&data)
    };
    result.map_err(|e| TransportError::SendFailed(format!("Write error: {}", e)))
}

#[async_trait]
impl CanTransport for SocketCanTransport {
    async fn send(&self, frame: &CanFrame) -> Result<(), TransportError> {
        if self.stop.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }
        check_frame(frame, &self.options)?;

        let socket = self.socket.clone();
        let frame = frame.clone();
        tokio::task::spawn_blocking(move || write_frame(&socket, &frame))
            .await
            .map_err(|e| TransportError::SendFailed(format!("Send task join error: {}", e)))?
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(reader) = self.reader.take() {
            // Reader wakes within one read timeout
            join_reader(&self.interface, reader, READER_JOIN_GRACE).await;
            tracing::info!(interface = %self.interface, "SocketCAN interface closed");
        }
        Ok(())
    }
}

impl Drop for SocketCanTransport {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canmux_core::{LinkEvent, LinkId};
    use tokio::sync::mpsc;

    #[test]
    fn test_frame_id_ranges() {
        assert!(matches!(frame_id(&CanFrame::standard(0x7FF, vec![])), Ok(Id::Standard(_))));
        assert!(frame_id(&CanFrame::standard(0x800, vec![])).is_err());
        assert!(matches!(
            frame_id(&CanFrame::extended(0x18DA_F110, vec![])),
            Ok(Id::Extended(_))
        ));
        assert!(frame_id(&CanFrame::extended(0x2000_0000, vec![])).is_err());
    }

    #[test]
    fn test_convert_data_frame() {
        let id = Id::Standard(StandardId::new(0x123).unwrap());
        let frame = CanDataFrame::new(id, &[1, 2, 3]).unwrap();
        let converted = convert_frame(CanAnyFrame::Normal(frame));
        assert_eq!(converted, CanFrame::standard(0x123, vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn test_forward_drops_on_full_queue_and_stops_when_closed() {
        let (tx, mut rx) = mpsc::channel(1);
        let sink = FrameSink::new("net", LinkId::next(), tx);

        assert!(forward(&sink, CanFrame::standard(0x1, vec![])));
        // Full queue: frame dropped, reader keeps going
        assert!(forward(&sink, CanFrame::standard(0x2, vec![])));
        assert!(matches!(
            rx.try_recv().map(|m| m.event),
            Ok(LinkEvent::Frame(frame)) if frame.id == 0x1
        ));
        assert!(rx.try_recv().is_err());

        drop(rx);
        assert!(!forward(&sink, CanFrame::standard(0x3, vec![])));
    }

    #[tokio::test]
    async fn test_close_detaches_reader_stuck_on_full_queue() {
        let (tx, mut rx) = mpsc::channel(1);
        let sink = FrameSink::new("net", LinkId::next(), tx);
        assert!(sink.try_deliver(CanFrame::standard(0x1, vec![])));

        // A reader parked on a queue only the closing task could drain
        let reader = tokio::task::spawn_blocking(move || {
            sink.blocking_deliver(CanFrame::standard(0x2, vec![]));
        });
        let started = std::time::Instant::now();
        assert!(!join_reader("vcan0", reader, Duration::from_millis(50)).await);
        assert!(started.elapsed() < Duration::from_secs(2));

        // Draining lets the detached reader finish on its own
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_join_reader_waits_for_prompt_exit() {
        let reader = tokio::task::spawn_blocking(|| std::thread::sleep(Duration::from_millis(10)));
        assert!(join_reader("vcan0", reader, READER_JOIN_GRACE).await);
    }
}
