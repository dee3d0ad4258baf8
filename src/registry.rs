//! Reactor-owned ordered sequence of live connections. New connections are
//! inserted at the head; the just-serviced connection is moved to the head
//! after every event, so the tail is a least-recently-active ordering an
//! external reaper could walk.
//!
//! Realized as a generation-free slab (`Vec<Slot>`) with a doubly linked
//! order list threaded through `prev`/`next` indices, avoiding a raw
//! back-pointer: a watcher's token encodes a slab index (see
//! `connection::{client_token, server_token}`), not a pointer.

use std::io::Write as _;
use std::time::{SystemTime, UNIX_EPOCH};

use mio::Registry;

use proxy_log::info;

use crate::connection::Connection;

struct Slot {
    conn: Option<Connection>,
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Default)]
pub struct ConnectionRegistry {
    slots: Vec<Slot>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    fn unlink(&mut self, index: usize) {
        let (prev, next) = {
            let slot = &self.slots[index];
            (slot.prev, slot.next)
        };
        match prev {
            Some(p) => self.slots[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.slots[n].prev = prev,
            None => self.tail = prev,
        }
        self.slots[index].prev = None;
        self.slots[index].next = None;
    }

    fn link_at_head(&mut self, index: usize) {
        self.slots[index].prev = None;
        self.slots[index].next = self.head;
        if let Some(old_head) = self.head {
            self.slots[old_head].prev = Some(index);
        }
        self.head = Some(index);
        if self.tail.is_none() {
            self.tail = Some(index);
        }
    }

    /// Inserts a connection, returning the slab index that the caller must
    /// use to derive its client/server tokens. Linked in at the head.
    pub fn insert(&mut self, build: impl FnOnce(usize) -> Connection) -> usize {
        let index = if let Some(i) = self.free.pop() {
            i
        } else {
            self.slots.push(Slot {
                conn: None,
                prev: None,
                next: None,
            });
            self.slots.len() - 1
        };

        let conn = build(index);
        self.slots[index].conn = Some(conn);
        self.link_at_head(index);
        self.len += 1;
        index
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Connection> {
        self.slots.get_mut(index).and_then(|s| s.conn.as_mut())
    }

    /// Moves a just-serviced connection to the head.
    pub fn touch(&mut self, index: usize) {
        if self.head == Some(index) {
            return;
        }
        self.unlink(index);
        self.link_at_head(index);
    }

    /// Removes and returns a CLOSED connection, if present at `index`.
    pub fn remove(&mut self, index: usize) -> Option<Connection> {
        if self.slots.get(index).and_then(|s| s.conn.as_ref()).is_none() {
            return None;
        }
        self.unlink(index);
        let conn = self.slots[index].conn.take();
        self.free.push(index);
        self.len -= 1;
        conn
    }

    /// Removes every connection whose state has reached CLOSED, returning
    /// how many were reaped. Called after each reactor turn.
    pub fn reap_closed(&mut self) -> usize {
        let mut closed = Vec::new();
        let mut cursor = self.head;
        while let Some(i) = cursor {
            cursor = self.slots[i].next;
            if self.slots[i].conn.as_ref().map(|c| c.is_closed()).unwrap_or(false) {
                closed.push(i);
            }
        }
        let n = closed.len();
        for i in closed {
            self.remove(i);
        }
        n
    }

    /// Iterates head (most recently active) to tail (least recently
    /// active), the ordering an idle reaper would walk from the back.
    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        let mut cursor = self.head;
        std::iter::from_fn(move || {
            let i = cursor?;
            cursor = self.slots[i].next;
            self.slots[i].conn.as_ref()
        })
    }

    /// Forced shutdown path: closes every remaining socket and empties the
    /// registry. Safe to call after the reactor has stopped dispatching
    /// events.
    pub fn free_all(&mut self, registry: &Registry) {
        let mut cursor = self.head;
        while let Some(i) = cursor {
            cursor = self.slots[i].next;
            if let Some(conn) = self.slots[i].conn.as_mut() {
                conn.force_close(registry);
            }
        }
        let indices: Vec<usize> = (0..self.slots.len())
            .filter(|i| self.slots[*i].conn.is_some())
            .collect();
        for i in indices {
            self.remove(i);
        }
    }

    /// Writes a human-readable snapshot to a fresh temp file and returns
    /// its path.
    pub fn dump_to_tempfile(&self) -> std::io::Result<std::path::PathBuf> {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
        let path = std::env::temp_dir().join(format!(
            "sni-table-proxy-connections-{}-{}.log",
            std::process::id(),
            now.as_nanos()
        ));
        let mut file = std::fs::File::create(&path)?;
        for conn in self.iter() {
            writeln!(file, "{}", conn.describe())?;
        }
        info!("wrote connection snapshot to {}", path.display());
        Ok(path)
    }
}
