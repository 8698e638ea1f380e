//! Client-side statement cache.
//!
//! Statements are cached by [`StatementKey`] with LRU eviction. A cached
//! entry keeps the server cursor id so re-execution skips the parse phase.
//! Evicted or invalidated cursors are not closed inline; their ids are
//! tombstoned and the engine piggybacks a close-cursors call on the next
//! round trip.

use indexmap::IndexMap;
use std::time::Instant;

use crate::statement::{Statement, StatementKey};

#[derive(Debug)]
struct CacheEntry {
    statement: Statement,
    in_use: bool,
    last_used: Instant,
}

/// LRU statement cache with tombstoned cursor reaping.
#[derive(Debug)]
pub struct StatementCache {
    entries: IndexMap<StatementKey, CacheEntry>,
    capacity: usize,
    tombstoned_cursors: Vec<u16>,
}

impl StatementCache {
    /// A cache holding up to `capacity` statements. Zero disables caching.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: IndexMap::with_capacity(capacity),
            capacity,
            tombstoned_cursors: Vec::new(),
        }
    }

    /// Whether caching is enabled.
    pub fn enabled(&self) -> bool {
        self.capacity > 0
    }

    /// Number of cached statements.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Take a statement for execution. The entry is marked in-use until
    /// [`StatementCache::give_back`]; a second taker misses and parses
    /// fresh.
    pub fn take(&mut self, key: &StatementKey) -> Option<Statement> {
        if self.capacity == 0 {
            return None;
        }
        let entry = self.entries.get_mut(key)?;
        entry.last_used = Instant::now();
        if entry.in_use {
            tracing::trace!(sql = %key.sql, "cache entry busy, parsing fresh");
            return None;
        }
        entry.in_use = true;
        tracing::trace!(sql = %key.sql, cursor_id = entry.statement.cursor_id(), "statement cache hit");
        Some(entry.statement.clone())
    }

    /// Return a statement after execution, inserting or refreshing its
    /// entry. DDL is never cached; neither are statements without a server
    /// cursor.
    pub fn give_back(&mut self, key: StatementKey, statement: Statement) {
        if self.capacity == 0 {
            if statement.cursor_id() != 0 {
                self.tombstoned_cursors.push(statement.cursor_id());
            }
            return;
        }
        if statement.is_ddl() || statement.cursor_id() == 0 {
            if let Some(entry) = self.entries.get_mut(&key) {
                entry.in_use = false;
            }
            return;
        }

        if let Some(entry) = self.entries.get_mut(&key) {
            entry.statement = statement;
            entry.in_use = false;
            entry.last_used = Instant::now();
            return;
        }

        if self.entries.len() >= self.capacity {
            self.evict_lru();
        }
        tracing::trace!(sql = %key.sql, cursor_id = statement.cursor_id(), "caching statement");
        self.entries.insert(
            key,
            CacheEntry {
                statement,
                in_use: false,
                last_used: Instant::now(),
            },
        );
    }

    /// Drop an entry (explicit re-prepare), tombstoning its cursor.
    pub fn remove(&mut self, key: &StatementKey) {
        if let Some(entry) = self.entries.shift_remove(key) {
            if entry.statement.cursor_id() != 0 {
                self.tombstoned_cursors.push(entry.statement.cursor_id());
            }
        }
    }

    /// Mark a cached statement's plan invalid after a reparse-class server
    /// error. The cursor id is tombstoned and the entry reset so the next
    /// execution parses fresh.
    pub fn invalidate(&mut self, key: &StatementKey) {
        if let Some(entry) = self.entries.get_mut(key) {
            let cursor = entry.statement.cursor_id();
            if cursor != 0 {
                self.tombstoned_cursors.push(cursor);
            }
            entry.statement.invalidate_cursor();
            entry.in_use = false;
            tracing::trace!(sql = %key.sql, cursor_id = cursor, "statement invalidated");
        }
    }

    /// Cursor ids whose server-side close should ride on the next round
    /// trip. Draining hands ownership to the caller.
    pub fn drain_tombstones(&mut self) -> Vec<u16> {
        std::mem::take(&mut self.tombstoned_cursors)
    }

    /// Whether any cursors await a piggybacked close.
    pub fn has_tombstones(&self) -> bool {
        !self.tombstoned_cursors.is_empty()
    }

    /// Clear everything, tombstoning every cached cursor. Used on session
    /// changes.
    pub fn clear(&mut self) {
        for (_, entry) in self.entries.drain(..) {
            if entry.statement.cursor_id() != 0 {
                self.tombstoned_cursors.push(entry.statement.cursor_id());
            }
        }
        tracing::debug!("statement cache cleared");
    }

    fn evict_lru(&mut self) {
        let victim = self
            .entries
            .iter()
            .filter(|(_, e)| !e.in_use)
            .min_by_key(|(_, e)| e.last_used)
            .map(|(k, _)| k.clone());
        match victim {
            Some(key) => {
                if let Some(entry) = self.entries.shift_remove(&key) {
                    let cursor = entry.statement.cursor_id();
                    if cursor != 0 {
                        self.tombstoned_cursors.push(cursor);
                    }
                    tracing::trace!(sql = %key.sql, cursor_id = cursor, "evicted LRU statement");
                }
            }
            None => tracing::warn!("statement cache full and every entry in use"),
        }
    }
}
