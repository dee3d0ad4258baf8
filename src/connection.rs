//! The per-flow state machine. One `Connection` owns both sockets, both
//! buffers and both watchers of a single client↔backend flow and advances
//! monotonically along the normal or terminating path.
//!
//! `read_data`/`write_data` style handlers with interest recomputed and
//! `poll.registry().reregister`'d after every event, generalized from a
//! request/response cycle to a raw byte relay with two independent halves.

use std::fmt;
use std::io::{self, Read, Write};
use std::rc::Rc;

use mio::event::{Event, Source};
use mio::net::{TcpStream, UnixStream};
use mio::{Interest, Registry, Token};

use proxy_log::{debug, errors, info};

use crate::address::Address;
use crate::buffer::{is_transient, Buffer};
use crate::listener::{ClientStream, Listener};
use crate::protocol::ParseOutcome;

/// Where an accepted client connection came from: a real socket address for
/// TCP listeners, or nothing identifying for Unix listeners (mio's
/// `UnixListener::accept` rarely yields a named peer address).
#[derive(Debug, Clone, Copy)]
pub enum PeerAddr {
    Tcp(std::net::SocketAddr),
    Unix,
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerAddr::Tcp(a) => write!(f, "{}", a),
            PeerAddr::Unix => write!(f, "<unix peer>"),
        }
    }
}

impl Read for ClientStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            ClientStream::Tcp(s) => s.read(buf),
            ClientStream::Unix(s) => s.read(buf),
        }
    }
}

impl Write for ClientStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            ClientStream::Tcp(s) => s.write(buf),
            ClientStream::Unix(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            ClientStream::Tcp(s) => s.flush(),
            ClientStream::Unix(s) => s.flush(),
        }
    }
}

impl Source for ClientStream {
    fn register(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        match self {
            ClientStream::Tcp(s) => s.register(registry, token, interests),
            ClientStream::Unix(s) => s.register(registry, token, interests),
        }
    }

    fn reregister(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        match self {
            ClientStream::Tcp(s) => s.reregister(registry, token, interests),
            ClientStream::Unix(s) => s.reregister(registry, token, interests),
        }
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        match self {
            ClientStream::Tcp(s) => s.deregister(registry),
            ClientStream::Unix(s) => s.deregister(registry),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Accepted,
    Parsed,
    Resolved,
    Connected,
    ServerClosed,
    ClientClosed,
    Closed,
}

impl State {
    pub fn client_open(self) -> bool {
        matches!(
            self,
            State::Accepted | State::Parsed | State::Resolved | State::Connected | State::ServerClosed
        )
    }

    pub fn server_open(self) -> bool {
        matches!(self, State::Connected | State::ClientClosed)
    }
}

/// Which half a readiness event arrived for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Half {
    Client,
    Server,
}

/// A non-blocking stream to a literal backend address. Dispatches to the
/// right mio transport depending on the tagged `Address` the table
/// resolved to.
pub enum ServerStream {
    Tcp(TcpStream),
    Unix(UnixStream),
}

impl ServerStream {
    fn connect(addr: &Address) -> io::Result<Self> {
        match addr {
            Address::V4(a) => Ok(ServerStream::Tcp(TcpStream::connect((*a).into())?)),
            Address::V6(a) => Ok(ServerStream::Tcp(TcpStream::connect((*a).into())?)),
            Address::Unix(path) => Ok(ServerStream::Unix(UnixStream::connect(path)?)),
            Address::Hostname(..) => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "cannot connect to an unresolved hostname backend",
            )),
        }
    }

    /// For `Tcp`, `connect()` having returned `Ok` doesn't mean the TCP
    /// handshake finished — callers must still check `take_error`/writable
    /// readiness the way non-blocking connects always do.
    fn take_error(&self) -> io::Result<Option<io::Error>> {
        match self {
            ServerStream::Tcp(s) => s.take_error(),
            ServerStream::Unix(s) => s.take_error(),
        }
    }
}

impl Read for ServerStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            ServerStream::Tcp(s) => s.read(buf),
            ServerStream::Unix(s) => s.read(buf),
        }
    }
}

impl Write for ServerStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            ServerStream::Tcp(s) => s.write(buf),
            ServerStream::Unix(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            ServerStream::Tcp(s) => s.flush(),
            ServerStream::Unix(s) => s.flush(),
        }
    }
}

impl mio::event::Source for ServerStream {
    fn register(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        match self {
            ServerStream::Tcp(s) => s.register(registry, token, interests),
            ServerStream::Unix(s) => s.register(registry, token, interests),
        }
    }

    fn reregister(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        match self {
            ServerStream::Tcp(s) => s.reregister(registry, token, interests),
            ServerStream::Unix(s) => s.reregister(registry, token, interests),
        }
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        match self {
            ServerStream::Tcp(s) => s.deregister(registry),
            ServerStream::Unix(s) => s.deregister(registry),
        }
    }
}

pub struct ClientHalf {
    pub stream: ClientStream,
    pub addr: PeerAddr,
    pub buf: Buffer,
    registered: Option<Interest>,
    pub bytes_recv: u64,
    pub bytes_sent: u64,
}

pub struct ServerHalf {
    pub stream: ServerStream,
    pub addr: Address,
    pub buf: Buffer,
    registered: Option<Interest>,
    pub bytes_recv: u64,
    pub bytes_sent: u64,
}

pub struct Connection {
    pub token: Token,
    pub state: State,
    pub client: ClientHalf,
    pub server: Option<ServerHalf>,
    pub hostname: Option<String>,
    pub listener: Rc<Listener>,
    resolved_address: Option<Address>,
}

const CLIENT_TOKEN_OFFSET: usize = 0;
const SERVER_TOKEN_OFFSET: usize = 1;

/// Encodes a connection's arena index into the two mio tokens it owns.
pub fn client_token(index: usize) -> Token {
    Token(index * 2 + CLIENT_TOKEN_OFFSET)
}

pub fn server_token(index: usize) -> Token {
    Token(index * 2 + SERVER_TOKEN_OFFSET)
}

pub fn index_and_half_of(token: Token) -> (usize, Half) {
    let t = token.0;
    if t % 2 == SERVER_TOKEN_OFFSET {
        (t / 2, Half::Server)
    } else {
        (t / 2, Half::Client)
    }
}

/// Moves a half's watcher registration to `desired`, `None` meaning
/// stopped entirely. Picks `register`/`reregister`/`deregister` based on
/// the currently tracked registration, since `reregister`ing a socket
/// that was just deregistered (or vice versa) is a mio error.
fn apply_interest(
    stream: &mut impl Source,
    token: Token,
    registered: &mut Option<Interest>,
    desired: Option<Interest>,
    registry: &Registry,
) {
    match (*registered, desired) {
        (None, None) => {}
        (Some(_), None) => {
            let _ = registry.deregister(stream);
            *registered = None;
        }
        (None, Some(want)) => {
            let _ = registry.register(stream, token, want);
            *registered = Some(want);
        }
        (Some(cur), Some(want)) => {
            if cur != want {
                let _ = registry.reregister(stream, token, want);
                *registered = Some(want);
            }
        }
    }
}

/// Unconditionally stops a half's watcher, if it is currently registered.
fn deregister(stream: &mut impl Source, registered: &mut Option<Interest>, registry: &Registry) {
    if registered.is_some() {
        let _ = registry.deregister(stream);
        *registered = None;
    }
}

impl Connection {
    pub fn new(index: usize, stream: ClientStream, addr: PeerAddr, listener: Rc<Listener>) -> Self {
        Self {
            token: client_token(index),
            state: State::Accepted,
            client: ClientHalf {
                stream,
                addr,
                buf: Buffer::with_capacity(crate::buffer::DEFAULT_CAPACITY),
                registered: None,
                bytes_recv: 0,
                bytes_sent: 0,
            },
            server: None,
            hostname: None,
            listener,
            resolved_address: None,
        }
    }

    fn index(&self) -> usize {
        self.token.0 / 2
    }

    /// Registers the client watcher for READ only, as required right after
    /// `accept`.
    pub fn register_initial(&mut self, registry: &Registry) -> io::Result<()> {
        let token = client_token(self.index());
        registry.register(&mut self.client.stream, token, Interest::READABLE)?;
        self.client.registered = Some(Interest::READABLE);
        Ok(())
    }

    /// Drives the state machine forward as far as it will go in one pass,
    /// then recomputes watcher interest for every still-open half. Folded
    /// into one entry point since a single reactor callback here may cross
    /// several states at once (e.g. parse, resolve and connect all
    /// completing off of the same readable event).
    pub fn on_event(&mut self, registry: &Registry, half: Half, event: &Event) {
        self.service_event(half, event);

        loop {
            let advanced = match self.state {
                State::Accepted => self.try_parse(),
                State::Parsed => self.try_resolve(),
                State::Resolved => self.try_connect(registry),
                _ => false,
            };
            if !advanced {
                break;
            }
        }

        self.reap_half_closes();
        self.sync_interests(registry);
    }

    fn service_event(&mut self, half: Half, event: &Event) {
        if self.state == State::Closed {
            return;
        }
        match half {
            Half::Client => {
                if event.is_readable() && self.state.client_open() {
                    self.read_client();
                }
                if event.is_writable() && self.state.client_open() {
                    self.write_client();
                }
            }
            Half::Server => {
                if event.is_writable() && self.state == State::Resolved {
                    // Non-blocking connect() completion notification.
                    self.finish_connect();
                }
                if event.is_readable() && self.state.server_open() {
                    self.read_server();
                }
                if event.is_writable() && self.state.server_open() {
                    self.write_server();
                }
            }
        }
    }

    fn read_client(&mut self) {
        match self.client.buf.recv(&mut self.client.stream) {
            Ok(None) => {} // buffer full: backpressure, not EOF
            Ok(Some(0)) => self.close_client_half("client EOF"),
            Ok(Some(n)) => self.client.bytes_recv += n as u64,
            Err(e) if is_transient(&e) => {}
            Err(e) => self.close_client_half(&format!("client read error: {e}")),
        }
    }

    fn write_client(&mut self) {
        let Some(server) = self.server.as_mut() else { return };
        match server.buf.send(&mut self.client.stream) {
            Ok(n) => self.client.bytes_sent += n as u64,
            Err(e) if is_transient(&e) => {}
            Err(e) => self.close_client_half(&format!("client write error: {e}")),
        }
    }

    fn read_server(&mut self) {
        let Some(server) = self.server.as_mut() else { return };
        match server.buf.recv(&mut server.stream) {
            Ok(None) => {} // buffer full: backpressure, not EOF
            Ok(Some(0)) => self.close_server_half("backend EOF"),
            Ok(Some(n)) => server.bytes_recv += n as u64,
            Err(e) if is_transient(&e) => {}
            Err(e) => {
                let msg = format!("backend read error: {e}");
                self.close_server_half(&msg);
            }
        }
    }

    fn write_server(&mut self) {
        let Some(server) = self.server.as_mut() else { return };
        match self.client.buf.send(&mut server.stream) {
            Ok(n) => server.bytes_sent += n as u64,
            Err(e) if is_transient(&e) => {}
            Err(e) => {
                let msg = format!("backend write error: {e}");
                self.close_server_half(&msg);
            }
        }
    }

    fn try_parse(&mut self) -> bool {
        let mut peeked = vec![0u8; crate::protocol::MAX_PEEK];
        let n = self.client.buf.peek(&mut peeked);
        peeked.truncate(n);

        match self.listener.protocol.parse(&peeked) {
            ParseOutcome::Incomplete => {
                if n >= crate::protocol::MAX_PEEK {
                    self.handle_unparseable("handshake did not fit in peek window")
                } else {
                    false
                }
            }
            ParseOutcome::Hostname(host) => {
                debug!("parsed hostname '{}' from {}", host, self.client.addr);
                self.hostname = Some(host);
                self.state = State::Parsed;
                true
            }
            ParseOutcome::NoHostname | ParseOutcome::Malformed => self.handle_unparseable("no hostname in request"),
        }
    }

    /// Routes a parse failure to the listener's fallback backend if it has
    /// one, otherwise closes the connection. Returns whether the state
    /// advanced to RESOLVED, so the caller's drive loop knows to continue
    /// straight on to `try_connect` in the same pass.
    fn handle_unparseable(&mut self, reason: &str) -> bool {
        match self.listener.fallback.clone() {
            Some(fallback) => {
                info!(
                    "{}: {} from {}, using fallback {}",
                    reason, "parse failure", self.client.addr, fallback
                );
                self.resolved_address = Some(fallback);
                self.state = State::Resolved;
                true
            }
            None => {
                errors!("{}: closing connection from {}", reason, self.client.addr);
                self.close_without_backend();
                false
            }
        }
    }

    fn try_resolve(&mut self) -> bool {
        // hostname is Some in every state >= Parsed.
        let hostname = self.hostname.clone().expect("PARSED connection without a hostname");

        match self.listener.table.lookup(&hostname) {
            Some(addr) if addr.is_literal() => {
                self.resolved_address = Some(addr.clone());
                self.state = State::Resolved;
                true
            }
            Some(addr) => {
                errors!(
                    "routing failure: '{}' resolves to non-literal backend {} for {}",
                    hostname, addr, self.client.addr
                );
                self.close_without_backend();
                false
            }
            None => match self.listener.fallback.clone() {
                Some(fallback) => {
                    self.resolved_address = Some(fallback);
                    self.state = State::Resolved;
                    true
                }
                None => {
                    errors!(
                        "routing failure: no table entry for '{}' from {}",
                        hostname, self.client.addr
                    );
                    self.close_without_backend();
                    false
                }
            },
        }
    }

    /// Kicks off the non-blocking `connect()` the first time state reaches
    /// RESOLVED. Stays in RESOLVED (registered for WRITABLE only) until the
    /// completion event arrives; `finish_connect` is what actually promotes
    /// the connection to CONNECTED. Returns `false` either way since a
    /// connect attempt in flight never advances the state in the same pass
    /// it was issued.
    fn try_connect(&mut self, registry: &Registry) -> bool {
        if self.server.is_some() {
            return false;
        }
        let Some(addr) = self.resolved_address.clone() else {
            return false;
        };

        match ServerStream::connect(&addr) {
            Ok(mut stream) => {
                let token = server_token(self.index());
                if let Err(e) = registry.register(&mut stream, token, Interest::WRITABLE) {
                    errors!("failed to register backend socket for {}: {}", addr, e);
                    self.state = State::ServerClosed;
                    return false;
                }
                self.server = Some(ServerHalf {
                    stream,
                    addr,
                    buf: Buffer::with_capacity(crate::buffer::DEFAULT_CAPACITY),
                    registered: Some(Interest::WRITABLE),
                    bytes_recv: 0,
                    bytes_sent: 0,
                });
                false
            }
            Err(e) => {
                errors!("connect to backend {} failed: {}", addr, e);
                self.state = State::ServerClosed;
                false
            }
        }
    }

    /// Non-blocking `connect()` succeeded at the syscall boundary but may
    /// still fail asynchronously (ECONNREFUSED etc); the first writable
    /// event on the backend socket tells us which. Promotes RESOLVED to
    /// CONNECTED on success.
    fn finish_connect(&mut self) {
        let Some(server) = self.server.as_ref() else { return };
        match server.stream.take_error() {
            Ok(None) => {
                self.state = State::Connected;
            }
            Ok(Some(e)) => {
                errors!("connect to backend {} failed: {}", server.addr, e);
                self.close_server_half("async connect failure");
            }
            Err(e) => {
                errors!("failed to query connect result for {}: {}", server.addr, e);
                self.close_server_half("async connect failure");
            }
        }
    }

    fn close_client_half(&mut self, reason: &str) {
        if !self.state.client_open() {
            return;
        }
        debug!("closing client half of {}: {}", self.client.addr, reason);
        let _ = self.client.stream.flush();
        self.state = State::ClientClosed;
    }

    fn close_server_half(&mut self, reason: &str) {
        if matches!(self.state, State::ServerClosed | State::Closed) {
            return;
        }
        if let Some(server) = &self.server {
            debug!("closing backend half to {}: {}", server.addr, reason);
        }
        self.state = State::ServerClosed;
    }

    /// Pre-CONNECTED failure with no backend socket ever opened.
    fn close_without_backend(&mut self) {
        self.state = State::Closed;
    }

    /// Once a half has closed, the other half's outbound buffer must drain
    /// before the whole connection reaches Closed.
    fn reap_half_closes(&mut self) {
        match self.state {
            State::ClientClosed => {
                if self.client.buf.is_empty() {
                    self.state = State::Closed;
                }
            }
            State::ServerClosed => {
                if self.server.as_ref().map(|s| s.buf.is_empty()).unwrap_or(true) {
                    self.state = State::Closed;
                }
            }
            _ => {}
        }
    }

    fn sync_interests(&mut self, registry: &Registry) {
        let index = self.index();

        if self.state.client_open() {
            let want_read = self.client.buf.room() > 0;
            let want_write = self.server.as_ref().map(|s| !s.buf.is_empty()).unwrap_or(false);
            // A buffer full with nothing to flush wants neither: the
            // watcher is stopped entirely until the other half's activity
            // (a drain or an arrival) makes one of these true again.
            let desired = match (want_read, want_write) {
                (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
                (true, false) => Some(Interest::READABLE),
                (false, true) => Some(Interest::WRITABLE),
                (false, false) => None,
            };
            apply_interest(
                &mut self.client.stream,
                client_token(index),
                &mut self.client.registered,
                desired,
                registry,
            );
        } else {
            deregister(&mut self.client.stream, &mut self.client.registered, registry);
        }

        // A RESOLVED connection with a server socket already present is
        // mid-connect: keep its WRITABLE registration untouched rather than
        // tearing it down, since `server_open()` only covers CONNECTED and
        // CLIENT_CLOSED.
        let connecting = self.state == State::Resolved && self.server.is_some();

        if self.state.server_open() {
            if let Some(server) = &mut self.server {
                let want_read = server.buf.room() > 0;
                let want_write = !self.client.buf.is_empty();
                let desired = match (want_read, want_write) {
                    (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
                    (true, false) => Some(Interest::READABLE),
                    (false, true) => Some(Interest::WRITABLE),
                    (false, false) => None,
                };
                apply_interest(
                    &mut server.stream,
                    server_token(index),
                    &mut server.registered,
                    desired,
                    registry,
                );
            }
        } else if connecting {
            // Leave the WRITABLE-only registration from try_connect alone.
        } else if let Some(server) = &mut self.server {
            deregister(&mut server.stream, &mut server.registered, registry);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state == State::Closed
    }

    /// Forced close used on shutdown: closes whichever sockets remain open
    /// without waiting for buffers to drain.
    pub fn force_close(&mut self, registry: &Registry) {
        if self.server.is_some() {
            if let Some(server) = &mut self.server {
                let _ = registry.deregister(&mut server.stream);
            }
            self.server = None;
        }
        if self.client.registered.is_some() {
            let _ = registry.deregister(&mut self.client.stream);
            self.client.registered = None;
        }
        self.state = State::Closed;
    }

    pub fn describe(&self) -> String {
        format!(
            "{:?} client={} client_buf={}B server_buf={}B hostname={}",
            self.state,
            self.client.addr,
            self.client.buf.len(),
            self.server.as_ref().map(|s| s.buf.len()).unwrap_or(0),
            self.hostname.as_deref().unwrap_or("-")
        )
    }
}
