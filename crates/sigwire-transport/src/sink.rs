//! Outgoing datagram sinks.
//!
//! The [`Endpoint`](crate::Endpoint) never writes to a socket directly. It
//! hands encoded bytes to a [`DatagramSink`], which is a real
//! [`tokio::net::UdpSocket`] in production and a [`MemorySink`] in tests.

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use sigwire_protocol::{Codec, Message, OscCodec};

/// Writes one datagram without blocking.
///
/// Returns the number of bytes written. Implementations must not retry
/// or queue: a full socket buffer is reported as an error.
pub trait DatagramSink: Send + Sync + 'static {
    fn try_send_to(&self, data: &[u8], dest: SocketAddr) -> io::Result<usize>;
}

impl DatagramSink for tokio::net::UdpSocket {
    fn try_send_to(&self, data: &[u8], dest: SocketAddr) -> io::Result<usize> {
        tokio::net::UdpSocket::try_send_to(self, data, dest)
    }
}

/// One datagram captured by a [`MemorySink`].
#[derive(Debug, Clone, PartialEq)]
pub struct SentDatagram {
    pub dest: SocketAddr,
    pub message: Message,
}

/// A sink that records decoded messages instead of sending them.
///
/// Clones share the same record, so a test can keep one clone and give
/// the other to an endpoint.
///
/// ```
/// use sigwire_protocol::{Codec, Message, OscCodec};
/// use sigwire_transport::{DatagramSink, MemorySink};
///
/// let sink = MemorySink::new();
/// let bytes = OscCodec.encode(&Message::flag("/osc/ping")).unwrap();
/// sink.try_send_to(&bytes, "127.0.0.1:9".parse().unwrap()).unwrap();
///
/// assert_eq!(sink.take()[0].message.address, "/osc/ping");
/// assert!(sink.sent().is_empty());
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    sent: Arc<Mutex<Vec<SentDatagram>>>,
    fail: Arc<Mutex<bool>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything sent so far, oldest first.
    pub fn sent(&self) -> Vec<SentDatagram> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns and clears the record.
    pub fn take(&self) -> Vec<SentDatagram> {
        std::mem::take(&mut *self.sent.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Messages sent to `address`, in order.
    pub fn sent_to_address(&self, address: &str) -> Vec<SentDatagram> {
        self.sent()
            .into_iter()
            .filter(|d| d.message.address == address)
            .collect()
    }

    /// Makes every following send fail with `BrokenPipe`.
    pub fn set_failing(&self, fail: bool) {
        *self.fail.lock().unwrap_or_else(PoisonError::into_inner) = fail;
    }

    /// Wraps a clone for handing to an endpoint.
    pub fn shared(&self) -> Arc<dyn DatagramSink> {
        Arc::new(self.clone())
    }
}

impl DatagramSink for MemorySink {
    fn try_send_to(&self, data: &[u8], dest: SocketAddr) -> io::Result<usize> {
        if *self.fail.lock().unwrap_or_else(PoisonError::into_inner) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink set to fail"));
        }
        let messages = OscCodec
            .decode(data)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let mut sent = self.sent.lock().unwrap_or_else(PoisonError::into_inner);
        for message in messages {
            sent.push(SentDatagram { dest, message });
        }
        Ok(data.len())
    }
}
