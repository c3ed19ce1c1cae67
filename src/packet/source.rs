// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Where packets come from.

use std::{
    collections::VecDeque,
    fs::File,
    io::{BufReader, ErrorKind, Read},
    net::{ToSocketAddrs, UdpSocket},
    thread,
    time::Duration,
};

use log::debug;

use super::{Packet, PacketError, PacketHeader, MAX_PACKET_SIZE};
use crate::constants::{PACKET_HEADER_SIZE, POLL_INTERVAL};

/// A stream of raw packets from one board.
pub trait PacketSource: Send {
    /// Read the next packet into `buf` (replacing its contents). `Ok(false)`
    /// means that the stream has ended. Errors of kind
    /// [`ErrorKind::WouldBlock`] or [`ErrorKind::TimedOut`] mean that nothing
    /// arrived in time, and the caller may try again.
    fn read_packet(&mut self, buf: &mut Vec<u8>) -> std::io::Result<bool>;
}

/// Open a source from its description: `udp:<address>` binds a UDP socket,
/// `file:<path>` reads a recording of concatenated packets.
pub fn open_source(description: &str) -> Result<Box<dyn PacketSource>, PacketError> {
    if let Some(addr) = description.strip_prefix("udp:") {
        Ok(Box::new(UdpSource::bind(addr)?))
    } else if let Some(path) = description.strip_prefix("file:") {
        debug!("Reading packets from {path}");
        let file = File::open(path)?;
        Ok(Box::new(ReaderSource::new(BufReader::new(file))))
    } else {
        Err(PacketError::UnknownSource(description.to_string()))
    }
}

/// One datagram per packet.
pub struct UdpSource {
    socket: UdpSocket,
}

impl UdpSource {
    pub fn bind<A: ToSocketAddrs>(addr: A) -> std::io::Result<UdpSource> {
        let socket = UdpSocket::bind(addr)?;
        // Readers must wake up now and then to notice a stop request.
        socket.set_read_timeout(Some(POLL_INTERVAL))?;
        debug!("Listening for packets on {}", socket.local_addr()?);
        Ok(UdpSource { socket })
    }

    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.socket.local_addr()
    }
}

impl PacketSource for UdpSource {
    fn read_packet(&mut self, buf: &mut Vec<u8>) -> std::io::Result<bool> {
        buf.resize(MAX_PACKET_SIZE, 0);
        let n = self.socket.recv(buf)?;
        buf.truncate(n);
        Ok(true)
    }
}

/// A byte stream of concatenated packets, e.g. a recording on disk.
pub struct ReaderSource<R> {
    reader: R,
}

impl<R: Read + Send> ReaderSource<R> {
    pub fn new(reader: R) -> ReaderSource<R> {
        ReaderSource { reader }
    }
}

impl<R: Read + Send> PacketSource for ReaderSource<R> {
    fn read_packet(&mut self, buf: &mut Vec<u8>) -> std::io::Result<bool> {
        buf.resize(PACKET_HEADER_SIZE, 0);

        // A clean end of stream can only happen between packets.
        let mut filled = 0;
        while filled < PACKET_HEADER_SIZE {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) if filled == 0 => return Ok(false),
                Ok(0) => return Err(ErrorKind::UnexpectedEof.into()),
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => (),
                Err(e) => return Err(e),
            }
        }

        // Without a sane header, the stream can't be framed any more.
        let header = PacketHeader::parse(buf)
            .map_err(|e| std::io::Error::new(ErrorKind::InvalidData, e.to_string()))?;
        buf.resize(PACKET_HEADER_SIZE + header.payload_size(), 0);
        self.reader.read_exact(&mut buf[PACKET_HEADER_SIZE..])?;
        Ok(true)
    }
}

/// Packets held in memory, for tests and replays.
#[derive(Default)]
pub struct VecSource {
    packets: VecDeque<Vec<u8>>,

    /// Wait this long before handing out each packet.
    interval: Option<Duration>,

    /// Once the packets are exhausted, keep timing out rather than ending the
    /// stream, like a board that has gone quiet.
    stall: bool,
}

impl VecSource {
    pub fn new<'a, I>(packets: I) -> VecSource
    where
        I: IntoIterator<Item = &'a Packet>,
    {
        VecSource {
            packets: packets.into_iter().map(Packet::encode).collect(),
            ..Default::default()
        }
    }

    /// Add raw bytes, which need not be a valid packet.
    pub fn push_bytes(&mut self, bytes: Vec<u8>) {
        self.packets.push_back(bytes);
    }

    pub fn with_interval(mut self, interval: Duration) -> VecSource {
        self.interval = Some(interval);
        self
    }

    pub fn stall_at_end(mut self) -> VecSource {
        self.stall = true;
        self
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }
}

impl PacketSource for VecSource {
    fn read_packet(&mut self, buf: &mut Vec<u8>) -> std::io::Result<bool> {
        match self.packets.pop_front() {
            Some(packet) => {
                if let Some(interval) = self.interval {
                    thread::sleep(interval);
                }
                *buf = packet;
                Ok(true)
            }
            None if self.stall => {
                thread::sleep(POLL_INTERVAL);
                Err(ErrorKind::TimedOut.into())
            }
            None => Ok(false),
        }
    }
}
