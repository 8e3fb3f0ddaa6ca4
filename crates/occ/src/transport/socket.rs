// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! TCP simulator transport.
//!
//! Instead of a board, a TCP listener waits for one peer (a packet
//! generator or a recorded stream) and buffers whatever it sends. The
//! buffer is linear: acknowledging moves the unconsumed tail to the front.
//!
//! The peer is accepted lazily, whenever a data call finds none connected.

use super::capability::BoardCapabilities;
use super::status::{RingStatus, StatusFlags};
use super::{CancelToken, Result, Transport, TransportError, WaitOutcome};
use crate::config::{STATUS_RECORD_VERSION, WAIT_POLL_SLICE};
use crate::ring::align_up;
use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::thread;
use std::time::{Duration, Instant};

/// Largest packet a simulator peer is expected to send.
pub const MAX_SOCKET_PACKET: usize = 1800 * 8;

/// Receive buffer size (1000 maximum-size packets).
pub const SOCKET_BUFFER_SIZE: usize = 1000 * MAX_SOCKET_PACKET;

/// Delay between checks for a peer or for receive being enabled.
const ACCEPT_POLL: Duration = Duration::from_millis(1);

/// Transport fed by a TCP peer.
#[derive(Debug)]
pub struct SocketTransport {
    listener: TcpListener,
    client: Option<TcpStream>,
    buffer: Vec<u8>,
    len: usize,
    caps: BoardCapabilities,
    rx_enabled: bool,
    err_pkts: bool,
}

impl SocketTransport {
    /// Listen on `address` (`host:port`, e.g. `localhost:7654`).
    ///
    /// # Errors
    ///
    /// [`TransportError::InvalidArgument`] when the address does not
    /// resolve, [`TransportError::Io`] when binding fails.
    pub fn listen(address: &str) -> Result<Self> {
        Self::with_buffer_size(address, SOCKET_BUFFER_SIZE)
    }

    /// Same as [`Self::listen`] with a custom buffer size.
    ///
    /// # Errors
    ///
    /// See [`Self::listen`].
    pub fn with_buffer_size(address: &str, buffer_size: usize) -> Result<Self> {
        let addr: SocketAddr = address
            .to_socket_addrs()
            .map_err(|_| TransportError::InvalidArgument("socket address"))?
            .find(SocketAddr::is_ipv4)
            .ok_or(TransportError::InvalidArgument("socket address"))?;

        let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;
        socket.listen(1)?;
        let listener: TcpListener = socket.into();
        listener.set_nonblocking(true)?;

        log::debug!("[dta] simulator listening on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            client: None,
            buffer: vec![0u8; buffer_size],
            len: 0,
            caps: BoardCapabilities::simulator(),
            rx_enabled: false,
            err_pkts: false,
        })
    }

    /// Bound address (useful after listening on port 0).
    ///
    /// # Errors
    ///
    /// Returns the OS error.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    /// Accept a waiting peer without blocking.
    fn check_client(&mut self) -> Result<bool> {
        if self.client.is_some() {
            return Ok(true);
        }
        match self.listener.accept() {
            Ok((stream, peer)) => {
                stream.set_nonblocking(false)?;
                log::debug!("[dta] simulator peer {} connected", peer);
                self.client = Some(stream);
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
            Err(e) => Err(TransportError::Io(e)),
        }
    }

    fn drop_client(&mut self, why: &str) {
        if self.client.take().is_some() {
            log::debug!("[dta] simulator peer dropped: {}", why);
        }
    }

    /// Bytes buffered and not yet acknowledged.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.len
    }
}

fn remaining(deadline: Option<Instant>) -> Option<Duration> {
    match deadline {
        Some(deadline) => deadline.checked_duration_since(Instant::now()),
        None => Some(WAIT_POLL_SLICE),
    }
}

impl Transport for SocketTransport {
    fn capabilities(&self) -> &BoardCapabilities {
        &self.caps
    }

    fn reset(&mut self) -> Result<()> {
        self.len = 0;
        self.rx_enabled = false;
        self.drop_client("reset");
        Ok(())
    }

    fn enable_receive(&mut self, enable: bool) -> Result<()> {
        self.rx_enabled = enable;
        Ok(())
    }

    fn enable_error_packets(&mut self, enable: bool) -> Result<()> {
        self.err_pkts = enable;
        Ok(())
    }

    fn send(&mut self, data: &[u8]) -> Result<()> {
        let padded_len = align_up(data.len(), 4);
        if data.is_empty() || padded_len > self.caps.max_send_len() {
            return Err(TransportError::InvalidArgument("send length"));
        }
        if !self.check_client()? {
            return Err(TransportError::Closed);
        }
        let mut frame = data.to_vec();
        frame.resize(padded_len, 0);
        let result = match self.client.as_mut() {
            Some(stream) => stream.write_all(&frame),
            None => return Err(TransportError::Closed),
        };
        result.map_err(|e| {
            self.drop_client("write failed");
            TransportError::Io(e)
        })
    }

    fn wait_for_data(
        &mut self,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<WaitOutcome<'_>> {
        let deadline = Instant::now().checked_add(timeout);

        while !self.rx_enabled || !self.check_client()? {
            if cancel.is_cancelled() {
                return Ok(WaitOutcome::Cancelled);
            }
            if remaining(deadline).is_none() {
                return Ok(WaitOutcome::TimedOut);
            }
            thread::sleep(ACCEPT_POLL);
        }

        if self.len == self.buffer.len() {
            // Full: hand everything back, the caller has to acknowledge.
            return Ok(WaitOutcome::Data(&self.buffer[..self.len]));
        }

        loop {
            if cancel.is_cancelled() {
                return Ok(WaitOutcome::Cancelled);
            }
            let Some(left) = remaining(deadline) else {
                return Ok(WaitOutcome::TimedOut);
            };
            let slice = left.min(WAIT_POLL_SLICE).max(Duration::from_millis(1));
            let Some(stream) = self.client.as_mut() else {
                return Err(TransportError::ConnectionReset);
            };
            stream.set_read_timeout(Some(slice))?;
            match stream.read(&mut self.buffer[self.len..]) {
                Ok(0) => {
                    self.drop_client("peer closed");
                    return Err(TransportError::ConnectionReset);
                }
                Ok(n) => {
                    self.len += n;
                    break;
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock
                            | io::ErrorKind::TimedOut
                            | io::ErrorKind::Interrupted
                    ) => {}
                Err(e) => {
                    self.drop_client("read failed");
                    return Err(TransportError::Io(e));
                }
            }
        }
        Ok(WaitOutcome::Data(&self.buffer[..self.len]))
    }

    fn advance_consumer(&mut self, len: usize) -> Result<()> {
        if len % 4 != 0 {
            return Err(TransportError::InvalidArgument("acknowledge must be 4-byte aligned"));
        }
        let len = len.min(self.len);
        self.buffer.copy_within(len..self.len, 0);
        self.len -= len;
        Ok(())
    }

    fn status(&mut self) -> Result<RingStatus> {
        let mut flags = StatusFlags::OPTICAL_PRESENT;
        flags.set(StatusFlags::RX_ENABLED, self.rx_enabled);
        flags.set(StatusFlags::RX_MSG, self.len > 0);
        flags.set(StatusFlags::ERR_PKTS_ENABLED, self.err_pkts);
        Ok(RingStatus {
            occ_ver: STATUS_RECORD_VERSION,
            board_type: self.caps.board.raw(),
            firmware_ver: self.caps.firmware_ver,
            status: flags,
            dq_size: self.buffer.len() as u32,
            dq_used: self.len as u32,
            ..RingStatus::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::build_event_packet;

    #[test]
    fn test_loopback_over_tcp() {
        let mut transport = SocketTransport::with_buffer_size("127.0.0.1:0", 64 * 1024).unwrap();
        transport.enable_receive(true).unwrap();
        let addr = transport.local_addr().unwrap();

        let frame = build_event_packet(16);
        let sent = frame.clone();
        let peer = thread::spawn(move || {
            let mut stream = TcpStream::connect(addr).unwrap();
            stream.write_all(&sent).unwrap();
            let mut echo = [0u8; 8];
            stream.read_exact(&mut echo).unwrap();
            echo
        });

        let cancel = CancelToken::new();
        let mut got = Vec::new();
        while got.len() < frame.len() {
            match transport.wait_for_data(Duration::from_secs(5), &cancel).unwrap() {
                WaitOutcome::Data(data) => got = data.to_vec(),
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(got, frame);
        assert!(transport.is_connected());
        transport.advance_consumer(frame.len()).unwrap();
        assert_eq!(transport.pending(), 0);

        transport.send(&[1, 2, 3, 4, 5]).unwrap();
        assert_eq!(peer.join().unwrap(), [1, 2, 3, 4, 5, 0, 0, 0]);
    }

    #[test]
    fn test_ack_moves_tail_to_front() {
        let mut transport = SocketTransport::with_buffer_size("127.0.0.1:0", 64).unwrap();
        transport.buffer[..12].copy_from_slice(&[1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3]);
        transport.len = 12;
        assert!(matches!(
            transport.advance_consumer(3),
            Err(TransportError::InvalidArgument(_))
        ));
        transport.advance_consumer(4).unwrap();
        assert_eq!(&transport.buffer[..8], &[2, 2, 2, 2, 3, 3, 3, 3]);
        transport.advance_consumer(64).unwrap();
        assert_eq!(transport.pending(), 0);
    }

    #[test]
    fn test_wait_without_peer_times_out() {
        let mut transport = SocketTransport::with_buffer_size("127.0.0.1:0", 64).unwrap();
        transport.enable_receive(true).unwrap();
        assert_eq!(
            transport
                .wait_for_data(Duration::from_millis(20), &CancelToken::new())
                .unwrap(),
            WaitOutcome::TimedOut
        );
        let status = transport.status().unwrap();
        assert_eq!(status.board_type, 15);
        assert!(status.status.contains(StatusFlags::RX_ENABLED));
    }
}
