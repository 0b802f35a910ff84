//! Idle connection reuse.
//!
//! Keyed by origin (host, port). Only plain-HTTP connections whose final
//! response was keep-alive eligible are ever checked in; the eligibility
//! decision lives with the exchange, the pool just shelves what it is given.

use std::collections::VecDeque;
use std::hash::{Hash, Hasher};

use dashmap::DashMap;

use crate::socket::client::Connection;

/// Idle connections per origin kept at most.
const PER_ORIGIN_LIMIT: usize = 6;

#[derive(Default)]
pub struct ConnectionPool {
    shelves: DashMap<u64, VecDeque<Connection>>,
}

/// Pool key for an origin.
pub fn origin_key(host: &str, port: u16) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    host.hash(&mut hasher);
    port.hash(&mut hasher);
    hasher.finish()
}

impl ConnectionPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take an idle connection for the origin, discarding any that died
    /// while shelved. Checked-out connections never remain in the pool.
    pub fn checkout(&self, key: u64) -> Option<Connection> {
        let mut shelf = self.shelves.get_mut(&key)?;
        while let Some(mut conn) = shelf.pop_front() {
            if conn.is_alive() {
                conn.mark_reused();
                return Some(conn);
            }
        }
        None
    }

    pub fn checkin(&self, key: u64, conn: Connection) {
        let mut shelf = self.shelves.entry(key).or_default();
        if shelf.len() < PER_ORIGIN_LIMIT {
            shelf.push_back(conn);
        }
    }

    pub fn idle_count(&self) -> usize {
        self.shelves.iter().map(|shelf| shelf.len()).sum()
    }

    /// Drop every idle connection.
    pub fn clear(&self) {
        self.shelves.clear();
    }
}
