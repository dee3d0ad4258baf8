//! The single-threaded reactor: owns every listener and the connection
//! registry, translates mio readiness events into state-machine advances,
//! and implements the forced-shutdown path.
//!
//! One `Poll` instance, one thread: accept sockets and connection sockets
//! share the same token space, split by range, and a single blocking
//! `poll()` call drains whatever is ready before the loop blocks again.

use std::collections::HashMap;
use std::rc::Rc;

use mio::{Events, Poll, Token};

use proxy_log::{errors, info};

use crate::config::Config;
use crate::connection::{self, Half};
use crate::error::Result;
use crate::listener::Listener;
use crate::registry::ConnectionRegistry;
use crate::table::Table;

/// Connection tokens occupy `[0, LISTENER_TOKEN_BASE)`; above that is
/// reserved for listener accept sockets. A real deployment's connection
/// count will never approach this, so the two ranges never collide.
const LISTENER_TOKEN_BASE: usize = 1 << 40;

pub struct Server {
    listeners: Vec<Rc<Listener>>,
    registry: ConnectionRegistry,
}

impl Server {
    pub fn new(config: &Config, poll: &Poll) -> Result<Server> {
        let mut tables: HashMap<Option<String>, Rc<Table>> = HashMap::new();
        for table_config in &config.tables {
            tables.insert(table_config.name.clone(), Rc::new(Table::from_config(table_config)));
        }

        let mut listeners = Vec::new();
        for (i, listener_config) in config.listeners.iter().enumerate() {
            let table = tables
                .get(&listener_config.table)
                .cloned()
                .ok_or_else(|| format!("listener has no matching table '{:?}'", listener_config.table))?;

            let token = Token(LISTENER_TOKEN_BASE + i);
            let listener = Listener::bind(listener_config, token, table, poll.registry())?;
            listeners.push(listener);
        }

        Ok(Server {
            listeners,
            registry: ConnectionRegistry::new(),
        })
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// Runs the event loop forever. Each `poll()` wakeup is drained fully
    /// before blocking again; every event either feeds a listener's
    /// `accept_all` or a connection's `on_event`.
    pub fn run(&mut self, poll: &mut Poll) -> Result<()> {
        let mut events = Events::with_capacity(1024);
        loop {
            poll.poll(&mut events, None)?;
            self.dispatch(poll, &events);
        }
    }

    /// Runs at most `max_turns` poll iterations with the given timeout,
    /// for tests and for `-t`-style bounded driving.
    pub fn run_bounded(&mut self, poll: &mut Poll, max_turns: usize, timeout: std::time::Duration) -> Result<()> {
        let mut events = Events::with_capacity(1024);
        for _ in 0..max_turns {
            poll.poll(&mut events, Some(timeout))?;
            self.dispatch(poll, &events);
        }
        Ok(())
    }

    fn dispatch(&mut self, poll: &Poll, events: &Events) {
        for event in events.iter() {
            let token = event.token();
            if token.0 >= LISTENER_TOKEN_BASE {
                self.accept_on(token.0 - LISTENER_TOKEN_BASE, poll);
                continue;
            }

            let (index, half) = connection::index_and_half_of(token);
            self.service_connection(poll, index, half, event);
        }
        self.registry.reap_closed();
    }

    fn accept_on(&mut self, listener_index: usize, poll: &Poll) {
        let Some(listener) = self.listeners.get(listener_index).cloned() else {
            return;
        };
        let conns = &mut self.registry;
        listener.accept_all(|stream, addr| {
            info!("accepted connection from {} on {}", addr, listener.bind_addr);
            let listener = Rc::clone(&listener);
            conns.insert(move |index| {
                let mut conn = connection::Connection::new(index, stream, addr, listener);
                if let Err(e) = conn.register_initial(poll.registry()) {
                    errors!("failed to register client watcher for {}: {}", addr, e);
                }
                conn
            });
        });
    }

    fn service_connection(&mut self, poll: &Poll, index: usize, half: Half, event: &mio::event::Event) {
        let Some(conn) = self.registry.get_mut(index) else {
            return;
        };
        conn.on_event(poll.registry(), half, event);
        if conn.is_closed() {
            self.registry.remove(index);
        } else {
            self.registry.touch(index);
        }
    }

    /// Closes every live connection's sockets. Safe to call after the loop
    /// has stopped dispatching events, e.g. on a requested shutdown.
    pub fn shutdown(&mut self, poll: &Poll) {
        self.registry.free_all(poll.registry());
    }

    pub fn dump_connections(&self) -> std::io::Result<std::path::PathBuf> {
        self.registry.dump_to_tempfile()
    }
}
