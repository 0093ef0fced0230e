use std::{
    io::ErrorKind,
    net::{SocketAddr, ToSocketAddrs, UdpSocket},
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, RecvTimeoutError},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use log::{debug, trace, warn};

use super::{wire::FramePacket, FrameSource, SourceError};
use crate::slam::frame::Observations;

/// Largest UDP payload.
const MAX_DATAGRAM: usize = 65535;
const READ_TIMEOUT: Duration = Duration::from_millis(500);

/// Receives frame datagrams on a background thread.
///
/// Undecodable datagrams are logged and skipped. The source is exhausted once the
/// receive thread has stopped and every queued frame has been handed out.
pub struct UdpReceiver {
    local_addr: SocketAddr,
    frames: Receiver<Observations>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    idle_timeout: Option<Duration>,
}

impl UdpReceiver {
    pub fn bind(addr: impl ToSocketAddrs) -> Result<Self, SourceError> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_broadcast(true)?;
        socket.set_read_timeout(Some(READ_TIMEOUT))?;
        let local_addr = socket.local_addr()?;

        let (sender, frames) = mpsc::channel();
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();

        let handle = thread::spawn(move || {
            let mut buffer = vec![0u8; MAX_DATAGRAM];
            while !thread_stop.load(Ordering::Relaxed) {
                let (len, from) = match socket.recv_from(&mut buffer) {
                    Ok(received) => received,
                    Err(err)
                        if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
                    {
                        continue
                    }
                    Err(err) => {
                        warn!("udp receive failed: {err}");
                        break;
                    }
                };
                trace!("received {len} bytes from {from}");

                let observations = match FramePacket::decode(&buffer[..len])
                    .map_err(Into::into)
                    .and_then(FramePacket::into_observations)
                {
                    Ok(observations) => observations,
                    Err(err) => {
                        warn!("dropping datagram from {from}: {err}");
                        continue;
                    }
                };
                if sender.send(observations).is_err() {
                    break;
                }
            }
            debug!("udp receiver on {local_addr} stopped");
        });

        Ok(Self {
            local_addr,
            frames,
            stop,
            handle: Some(handle),
            idle_timeout: None,
        })
    }

    /// Report exhaustion when no frame arrives for `timeout`.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Signals the receive thread and waits for it. Frames already queued stay readable.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("udp receive thread panicked");
            }
        }
    }
}

impl FrameSource for UdpReceiver {
    fn next_frame(&mut self) -> Result<Option<Observations>, SourceError> {
        let frame = match self.idle_timeout {
            Some(timeout) => match self.frames.recv_timeout(timeout) {
                Ok(frame) => Some(frame),
                Err(RecvTimeoutError::Timeout) => {
                    debug!("no frame within {timeout:?}, stopping");
                    self.stop();
                    self.frames.try_recv().ok()
                }
                Err(RecvTimeoutError::Disconnected) => None,
            },
            None => self.frames.recv().ok(),
        };
        Ok(frame)
    }
}

impl Drop for UdpReceiver {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Sends frame datagrams to a fixed target, typically a broadcast address.
pub struct UdpBroadcaster {
    socket: UdpSocket,
    target: SocketAddr,
}

impl UdpBroadcaster {
    pub fn new(target: impl ToSocketAddrs) -> Result<Self, SourceError> {
        let target = target.to_socket_addrs()?.next().ok_or_else(|| {
            SourceError::Io(std::io::Error::new(
                ErrorKind::InvalidInput,
                "broadcast target did not resolve",
            ))
        })?;
        let bind_addr: SocketAddr = if target.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(bind_addr)?;
        socket.set_broadcast(true)?;
        Ok(Self { socket, target })
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    pub fn send(&self, packet: &FramePacket) -> Result<usize, SourceError> {
        let bytes = packet.encode();
        if bytes.len() > MAX_DATAGRAM {
            return Err(SourceError::Malformed(format!(
                "frame {} encodes to {} bytes, more than one datagram",
                packet.frame_id(),
                bytes.len()
            )));
        }
        Ok(self.socket.send_to(&bytes, self.target)?)
    }
}
