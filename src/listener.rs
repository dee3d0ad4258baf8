//! Bound listening socket plus the routing context every connection it
//! accepts needs: which protocol to dissect with, which table to route
//! through, and the fallback backend.

use std::io;
use std::net::SocketAddr;
use std::rc::Rc;

use mio::net::{TcpListener, TcpStream, UnixListener, UnixStream};
use mio::{Interest, Registry, Token};

use proxy_log::{errors, info};

use crate::address::Address;
use crate::config::ListenerConfig;
use crate::connection::PeerAddr;
use crate::protocol::Protocol;
use crate::table::Table;

/// An accepted client stream, tagged the same way a routed backend stream
/// is, so a `Connection` can own either kind from either end.
pub enum ClientStream {
    Tcp(TcpStream),
    Unix(UnixStream),
}

/// The socket kind a listener binds: TCP for IPv4/IPv6 literals, Unix for
/// `unix:<path>` listener addresses. Hostname listener addresses make no
/// sense (there's nothing to bind) and are rejected at construction.
enum ListeningSocket {
    Tcp(TcpListener),
    Unix(UnixListener),
}

impl ListeningSocket {
    fn register(&mut self, registry: &Registry, token: Token) -> io::Result<()> {
        match self {
            ListeningSocket::Tcp(l) => registry.register(l, token, Interest::READABLE),
            ListeningSocket::Unix(l) => registry.register(l, token, Interest::READABLE),
        }
    }

    fn accept(&self) -> io::Result<(ClientStream, PeerAddr)> {
        match self {
            ListeningSocket::Tcp(l) => l.accept().map(|(s, a)| (ClientStream::Tcp(s), PeerAddr::Tcp(a))),
            ListeningSocket::Unix(l) => l.accept().map(|(s, _)| (ClientStream::Unix(s), PeerAddr::Unix)),
        }
    }
}

pub struct Listener {
    listening: ListeningSocket,
    pub token: Token,
    pub protocol: Protocol,
    pub table: Rc<Table>,
    pub fallback: Option<Address>,
    pub bind_addr: Address,
}

impl Listener {
    pub fn bind(
        config: &ListenerConfig,
        token: Token,
        table: Rc<Table>,
        registry: &Registry,
    ) -> io::Result<Rc<Listener>> {
        let mut listening = match &config.address {
            Address::V4(_) | Address::V6(_) => {
                let socket_addr: SocketAddr = config.address.to_socket_addr().expect("literal address");
                ListeningSocket::Tcp(TcpListener::bind(socket_addr)?)
            }
            Address::Unix(path) => {
                let _ = std::fs::remove_file(path);
                ListeningSocket::Unix(UnixListener::bind(path)?)
            }
            Address::Hostname(..) => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("listener address '{}' is neither a literal IP nor a unix: path", config.address),
                ));
            }
        };
        listening.register(registry, token)?;

        info!("listening on {} ({:?})", config.address, config.protocol);

        let protocol = match config.protocol {
            crate::config::Protocol::Tls => Protocol::Tls,
            crate::config::Protocol::Http => Protocol::Http,
        };

        Ok(Rc::new(Listener {
            listening,
            token,
            protocol,
            table,
            fallback: config.fallback.clone(),
            bind_addr: config.address.clone(),
        }))
    }

    /// Accepts every pending connection. Transient accept failures are
    /// swallowed; the caller supplies `on_accept` to register the new
    /// connection's client watcher and insert it into the registry.
    pub fn accept_all(&self, mut on_accept: impl FnMut(ClientStream, PeerAddr)) {
        loop {
            match self.listening.accept() {
                Ok((stream, addr)) => on_accept(stream, addr),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    errors!("accept() failed on {}: {}", self.bind_addr, e);
                    break;
                }
            }
        }
    }
}
