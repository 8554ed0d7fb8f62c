//! The UDP endpoint: one bound socket, its URL, a default destination and
//! the dispatch table.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sigwire_protocol::{Codec, ErrorCode, IntoArgs, Message, OscCodec, Tag};
use tokio::net::UdpSocket;
use tracing::{debug, error, info, trace, warn};

use crate::{ActiveFlag, DatagramSink, Dispatcher, Incoming, OscUrl, RouteKey, TransportError};

/// Receive buffer size: the largest UDP payload a 16-bit length field
/// allows, so IPv6 datagrams are never cut short.
const MAX_DATAGRAM: usize = 65_535;

/// Settings for [`Endpoint::bind`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Local interface to bind.
    pub bind_ip: IpAddr,
    /// Port name. `None` picks an ephemeral port.
    pub port: Option<String>,
    /// Host written into our URL. Defaults to the bound IP, or
    /// `127.0.0.1` when bound to the unspecified address.
    pub advertised_host: Option<String>,
    /// URL of the default destination (a coordinator, a relay target).
    pub default_remote: Option<String>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: None,
            advertised_host: None,
            default_remote: None,
        }
    }
}

impl EndpointConfig {
    fn port_number(&self) -> Result<u16, TransportError> {
        match &self.port {
            None => Ok(0),
            Some(name) => name
                .parse()
                .map_err(|_| TransportError::InvalidUrl(format!("port name {name:?} is not a number"))),
        }
    }
}

/// Owns one transport endpoint.
///
/// `R` is the owner's route type, stored in the dispatch table. It must
/// be constructible from a [`Tag`] so the endpoint can install its
/// default `/error` and `/reply` routes.
pub struct Endpoint<R> {
    sink: Arc<dyn DatagramSink>,
    codec: Arc<dyn Codec>,
    local_addr: SocketAddr,
    url: OscUrl,
    default_addr: Option<SocketAddr>,
    active: ActiveFlag,
    dispatcher: Dispatcher<R>,
}

impl<R: Clone + From<Tag>> Endpoint<R> {
    /// Creates the socket, computes its URL, and installs the default
    /// routes.
    ///
    /// Returns the endpoint (the sending half) and a [`Receiver`] for the
    /// dispatch loop.
    ///
    /// # Errors
    /// [`TransportError::Bind`] if the socket can't be created,
    /// [`TransportError::InvalidUrl`] for a bad port name or default
    /// remote.
    pub async fn bind(config: &EndpointConfig) -> Result<(Self, Receiver), TransportError> {
        let requested = SocketAddr::new(config.bind_ip, config.port_number()?);
        let socket = UdpSocket::bind(requested).await.map_err(|source| TransportError::Bind {
            addr: requested.to_string(),
            source,
        })?;
        let socket = Arc::new(socket);
        let local_addr = socket.local_addr().map_err(|source| TransportError::Bind {
            addr: requested.to_string(),
            source,
        })?;

        let host = match &config.advertised_host {
            Some(h) => h.clone(),
            None if local_addr.ip().is_unspecified() => Ipv4Addr::LOCALHOST.to_string(),
            None => local_addr.ip().to_string(),
        };
        let url = OscUrl::new(host, local_addr.port());

        let sink: Arc<dyn DatagramSink> = socket.clone();
        let mut endpoint = Self::with_sink(sink, local_addr);
        endpoint.url = url;
        if let Some(remote) = &config.default_remote {
            endpoint.set_default_url(remote).await?;
        }

        info!(url = %endpoint.url, "endpoint bound");
        Ok((endpoint, Receiver::new(socket)))
    }

    /// Builds an endpoint over an arbitrary sink. Used by tests to run
    /// protocol logic against a [`MemorySink`](crate::MemorySink).
    pub fn with_sink(sink: Arc<dyn DatagramSink>, local_addr: SocketAddr) -> Self {
        let mut endpoint = Self {
            sink,
            codec: Arc::new(OscCodec),
            local_addr,
            url: OscUrl::from_socket_addr(local_addr),
            default_addr: None,
            active: ActiveFlag::default(),
            dispatcher: Dispatcher::new(),
        };
        endpoint.register_default_handlers();
        endpoint
    }

    /// Installs the `/error`, `/reply ss` and `/reply ssss` routes.
    ///
    /// Owners that want different handling re-register the same tags
    /// afterwards (last registration wins) or remove them.
    pub fn register_default_handlers(&mut self) {
        for tag in [Tag::Error, Tag::Reply, Tag::ReplyEx] {
            self.dispatcher.insert_tag(tag, R::from(tag));
        }
    }
}

impl<R: Clone> Endpoint<R> {
    // -----------------------------------------------------------------------
    // Identity
    // -----------------------------------------------------------------------

    /// Our own URL, e.g. `osc.udp://127.0.0.1:41234/`.
    pub fn url(&self) -> &OscUrl {
        &self.url
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn default_addr(&self) -> Option<SocketAddr> {
        self.default_addr
    }

    pub fn set_default_addr(&mut self, addr: Option<SocketAddr>) {
        self.default_addr = addr;
    }

    /// Resolves and stores a default destination URL.
    ///
    /// # Errors
    /// [`TransportError::InvalidUrl`] if the URL doesn't parse or resolve.
    pub async fn set_default_url(&mut self, url: &str) -> Result<SocketAddr, TransportError> {
        let addr = OscUrl::parse(url)?.resolve().await?;
        self.default_addr = Some(addr);
        Ok(addr)
    }

    /// Stores a default destination URL whose host is an IP literal.
    /// Never blocks.
    ///
    /// # Errors
    /// [`TransportError::InvalidUrl`] if the URL doesn't parse or its host
    /// needs a name lookup.
    pub fn set_default_numeric_url(&mut self, url: &str) -> Result<SocketAddr, TransportError> {
        let addr = OscUrl::parse(url)?.numeric_addr()?;
        self.default_addr = Some(addr);
        Ok(addr)
    }

    pub fn active(&self) -> &ActiveFlag {
        &self.active
    }

    pub fn is_active(&self) -> bool {
        self.active.get()
    }

    pub fn set_active(&self, active: bool) {
        self.active.set(active);
    }

    /// Replaces the codec. Peers on the wire expect [`OscCodec`].
    pub fn set_codec(&mut self, codec: Arc<dyn Codec>) {
        self.codec = codec;
    }

    // -----------------------------------------------------------------------
    // Dispatch table
    // -----------------------------------------------------------------------

    /// Registers a route for a tag's address and signature.
    pub fn add_dispatch_handler(&mut self, tag: Tag, route: R) -> bool {
        let added = self.dispatcher.insert_tag(tag, route);
        if !added {
            warn!(?tag, "cannot route an unregistered tag");
        }
        added
    }

    /// Registers a route for an arbitrary address. `signature: None`
    /// accepts any argument list.
    pub fn add_route(&mut self, address: &str, signature: Option<&str>, route: R) {
        trace!(address, ?signature, "route added");
        self.dispatcher.insert(RouteKey::new(address, signature), route);
    }

    pub fn remove_route(&mut self, address: &str, signature: Option<&str>) -> Option<R> {
        self.dispatcher.remove(&RouteKey::new(address, signature))
    }

    pub fn remove_routes_where(&mut self, pred: impl FnMut(&R) -> bool) -> usize {
        self.dispatcher.remove_where(pred)
    }

    pub fn set_fallback(&mut self, route: R) {
        self.dispatcher.set_fallback(route);
    }

    /// Candidate routes for a message, most specific first.
    pub fn route(&self, message: &Message) -> Vec<R> {
        self.dispatcher.candidates(message)
    }

    pub fn dispatcher(&self) -> &Dispatcher<R> {
        &self.dispatcher
    }

    // -----------------------------------------------------------------------
    // Sending
    // -----------------------------------------------------------------------

    /// Encodes and writes one message. Returns the bytes written.
    ///
    /// # Errors
    /// [`TransportError::Protocol`] if the message can't be encoded,
    /// [`TransportError::SendFailed`] if the write fails. Not retried.
    pub fn send_message(&self, dest: SocketAddr, message: &Message) -> Result<usize, TransportError> {
        let bytes = self.codec.encode(message)?;
        match self.sink.try_send_to(&bytes, dest) {
            Ok(n) => {
                trace!(%dest, address = %message.address, bytes = n, "sent");
                Ok(n)
            }
            Err(source) => {
                error!(%dest, address = %message.address, error = %source, "send failed");
                Err(TransportError::SendFailed { addr: dest, source })
            }
        }
    }

    /// Sends `address` with `args` to `dest`.
    pub fn send(&self, dest: SocketAddr, address: &str, args: impl IntoArgs) -> Result<usize, TransportError> {
        self.send_message(dest, &Message::new(address, args))
    }

    /// Sends a registered tag, checking the arguments against its
    /// signature first.
    pub fn send_tag(&self, dest: SocketAddr, tag: Tag, args: impl IntoArgs) -> Result<usize, TransportError> {
        self.send_message(dest, &Message::for_tag(tag, args)?)
    }

    /// Sends to the default destination.
    ///
    /// # Errors
    /// [`TransportError::NoDestination`] if no default is set.
    pub fn send_default(&self, address: &str, args: impl IntoArgs) -> Result<usize, TransportError> {
        let dest = self.default_addr.ok_or(TransportError::NoDestination)?;
        self.send(dest, address, args)
    }

    fn resolve_dest(&self, dest: Option<SocketAddr>) -> Result<SocketAddr, TransportError> {
        dest.or(self.default_addr).ok_or(TransportError::NoDestination)
    }

    /// Sends `/error (replied_to, code, text)` to `dest`, or to the default
    /// address when `dest` is `None`.
    pub fn error_send(
        &self,
        dest: Option<SocketAddr>,
        replied_to: &str,
        code: ErrorCode,
        text: &str,
    ) -> Result<usize, TransportError> {
        let dest = self.resolve_dest(dest)?;
        self.send_tag(dest, Tag::Error, (replied_to, code.code(), text))
    }

    /// Sends `/reply (replied_to, text)` to `dest`, or to the default
    /// address when `dest` is `None`.
    pub fn reply_send(&self, dest: Option<SocketAddr>, replied_to: &str, text: &str) -> Result<usize, TransportError> {
        let dest = self.resolve_dest(dest)?;
        self.send_tag(dest, Tag::Reply, (replied_to, text))
    }
}

// ---------------------------------------------------------------------------
// Receiver
// ---------------------------------------------------------------------------

/// The receiving half of a bound endpoint. Owned by the dispatch loop.
pub struct Receiver {
    socket: Arc<UdpSocket>,
    codec: OscCodec,
    buf: Vec<u8>,
}

impl Receiver {
    fn new(socket: Arc<UdpSocket>) -> Self {
        Self {
            socket,
            codec: OscCodec,
            buf: vec![0; MAX_DATAGRAM],
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Waits up to `timeout` for a datagram, then drains everything
    /// already queued without blocking.
    ///
    /// Returns the decoded messages in arrival order, possibly none.
    /// Undecodable datagrams are logged and skipped. Cancel-safe: the only
    /// await point is the first receive.
    pub async fn wait(&mut self, timeout: Duration) -> Vec<Incoming> {
        let mut out = Vec::new();
        match tokio::time::timeout(timeout, self.socket.recv_from(&mut self.buf)).await {
            Err(_elapsed) => return out,
            Ok(Err(e)) => {
                warn!(error = %e, "receive failed");
                return out;
            }
            Ok(Ok((n, source))) => self.decode_into(n, source, &mut out),
        }
        loop {
            match self.socket.try_recv_from(&mut self.buf) {
                Ok((n, source)) => self.decode_into(n, source, &mut out),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!(error = %e, "receive failed");
                    break;
                }
            }
        }
        out
    }

    fn decode_into(&self, n: usize, source: SocketAddr, out: &mut Vec<Incoming>) {
        match self.codec.decode(&self.buf[..n]) {
            Ok(messages) => {
                for message in messages {
                    debug!(%source, address = %message.address, signature = %message.signature(), "received");
                    out.push(Incoming::new(message, source));
                }
            }
            Err(e) => warn!(%source, error = %e, "undecodable datagram dropped"),
        }
    }
}
