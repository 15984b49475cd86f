//! UDP time broadcast for slave processes
//!
//! Each datagram is a small JSON object, `{"status":"play","time":12.48}`,
//! where `time` is the master's position in seconds.

use std::net::{SocketAddr, UdpSocket};

use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 34456;
pub const DEFAULT_INTERVAL_MS: u64 = 20;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Play,
    Pause,
}

#[derive(Clone, Copy, PartialEq, Debug, Serialize, Deserialize)]
pub struct SyncDatagram {
    pub status: SyncStatus,
    pub time: f64,
}

impl SyncDatagram {
    pub fn to_bytes(&self) -> Vec<u8> {
        // serializing two plain fields cannot fail
        serde_json::to_vec(self).unwrap_or_default()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Connectionless sender bound to an ephemeral local port.
pub(crate) struct Broadcaster {
    socket: UdpSocket,
    target: SocketAddr,
}

impl Broadcaster {
    pub fn bind(target: SocketAddr) -> std::io::Result<Self> {
        if target.port() == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "broadcast target needs a port",
            ));
        }
        let socket = UdpSocket::bind(("0.0.0.0", 0))?;
        socket.set_broadcast(true)?;
        Ok(Self { socket, target })
    }

    pub fn send(&self, datagram: &SyncDatagram) -> std::io::Result<usize> {
        self.socket.send_to(&datagram.to_bytes(), self.target)
    }

    #[inline]
    pub fn target(&self) -> SocketAddr {
        self.target
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_format() {
        let d = SyncDatagram { status: SyncStatus::Pause, time: 1.5 };
        assert_eq!(d.to_bytes(), br#"{"status":"pause","time":1.5}"#.to_vec());
        let parsed = SyncDatagram::from_bytes(br#"{"status":"play","time":0.0}"#).unwrap();
        assert_eq!(parsed.status, SyncStatus::Play);
        assert_eq!(parsed.time, 0.0);
    }

    #[test]
    fn sends_to_loopback() {
        let rx = UdpSocket::bind("127.0.0.1:0").unwrap();
        let tx = Broadcaster::bind(rx.local_addr().unwrap()).unwrap();
        let d = SyncDatagram { status: SyncStatus::Play, time: 2.0 };
        tx.send(&d).unwrap();
        let mut buf = [0u8; 128];
        let n = rx.recv(&mut buf).unwrap();
        assert_eq!(SyncDatagram::from_bytes(&buf[..n]).unwrap(), d);
    }
}
