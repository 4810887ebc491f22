//! KV counter-store adapter: the narrow interface the cost, budget, and
//! workflow subsystems run against.
//!
//! The contract mirrors a Redis-class store: strings with TTLs, atomic
//! counters, MULTI/EXEC-style transactions ([`KvStore::exec`]), optimistic
//! concurrency ([`KvStore::version`] + [`KvStore::exec_if_unchanged`], the
//! typed rendition of WATCH…EXEC), sets, sorted sets, hashes, and
//! approximate cardinality. [`MemoryKv`] is the in-process implementation
//! and test double; a networked adapter implements the same trait.

mod memory;

pub use memory::MemoryKv;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Adapter-level failure.
#[derive(Debug, Error)]
pub enum KvError {
    /// Operation applied to a key holding a different data type.
    #[error("wrong type for key {0}")]
    WrongType(String),

    /// String value could not be parsed as a number for incr/incrbyfloat.
    #[error("value at key {0} is not a number")]
    NotANumber(String),

    /// Backend transport or protocol failure.
    #[error("kv backend: {0}")]
    Backend(String),
}

/// One operation inside a transaction.
#[derive(Debug, Clone)]
pub enum KvOp {
    Set { key: String, value: String, ttl: Option<Duration>, nx: bool },
    Del { key: String },
    Incr { key: String, by: i64 },
    IncrByFloat { key: String, by: f64 },
    Expire { key: String, ttl: Duration, nx: bool },
    Sadd { key: String, member: String },
    Zadd { key: String, score: f64, member: String },
    Hset { key: String, field: String, value: String },
    HincrBy { key: String, field: String, by: i64 },
    HincrByFloat { key: String, field: String, by: f64 },
    Pfadd { key: String, member: String },
}

/// Reply for one transaction operation.
#[derive(Debug, Clone, PartialEq)]
pub enum KvReply {
    Ok,
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl KvReply {
    pub fn as_float(&self) -> Option<f64> {
        match self {
            KvReply::Float(f) => Some(*f),
            KvReply::Int(i) => Some(*i as f64),
            _ => None,
        }
    }
}

/// Minimum adapter API (spec'd against Redis semantics).
#[async_trait]
pub trait KvStore: Send + Sync {
    // -- strings / counters -------------------------------------------------

    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;

    /// Returns false when `nx` is set and the key already existed. A set
    /// without `ttl` clears any existing expiry.
    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
        nx: bool,
    ) -> Result<bool, KvError>;

    /// Returns whether the key existed.
    async fn del(&self, key: &str) -> Result<bool, KvError>;

    async fn incr(&self, key: &str, by: i64) -> Result<i64, KvError>;

    async fn incr_by_float(&self, key: &str, by: f64) -> Result<f64, KvError>;

    /// Returns false when the key does not exist, or when `nx` is set and
    /// the key already carries an expiry.
    async fn expire(&self, key: &str, ttl: Duration, nx: bool) -> Result<bool, KvError>;

    async fn exists(&self, key: &str) -> Result<bool, KvError>;

    // -- transactions -------------------------------------------------------

    /// Applies all operations atomically (MULTI/EXEC) and returns one reply
    /// per operation.
    async fn exec(&self, ops: Vec<KvOp>) -> Result<Vec<KvReply>, KvError>;

    /// Watch token for optimistic concurrency: changes whenever the key is
    /// mutated. A missing key reads as version 0.
    async fn version(&self, key: &str) -> Result<u64, KvError>;

    /// Applies `ops` atomically iff every watched key still has the given
    /// version. Returns `None` when a watched key changed (the caller
    /// retries the whole read-check-commit loop).
    async fn exec_if_unchanged(
        &self,
        watched: &[(String, u64)],
        ops: Vec<KvOp>,
    ) -> Result<Option<Vec<KvReply>>, KvError>;

    // -- sets ---------------------------------------------------------------

    async fn sadd(&self, key: &str, member: &str) -> Result<bool, KvError>;

    async fn smembers(&self, key: &str) -> Result<Vec<String>, KvError>;

    /// Glob-style key scan (`*` wildcard). Single-pass stores may return
    /// everything with a zero continuation cursor.
    async fn scan(&self, cursor: u64, pattern: &str, count: usize)
        -> Result<(u64, Vec<String>), KvError>;

    // -- sorted sets --------------------------------------------------------

    /// Returns true when the member was newly added.
    async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<bool, KvError>;

    /// Members in `[start, stop]` rank range (negative indices from the
    /// end), score-ascending, or descending when `rev`.
    async fn zrange(
        &self,
        key: &str,
        start: i64,
        stop: i64,
        rev: bool,
    ) -> Result<Vec<(String, f64)>, KvError>;

    async fn zrangebyscore(&self, key: &str, min: f64, max: f64)
        -> Result<Vec<(String, f64)>, KvError>;

    /// Returns the number of members removed.
    async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> Result<u64, KvError>;

    async fn zcard(&self, key: &str) -> Result<u64, KvError>;

    // -- hashes -------------------------------------------------------------

    /// Returns true when the field was newly created.
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<bool, KvError>;

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, KvError>;

    async fn hgetall(&self, key: &str) -> Result<BTreeMap<String, String>, KvError>;

    async fn hincrby(&self, key: &str, field: &str, by: i64) -> Result<i64, KvError>;

    async fn hincrbyfloat(&self, key: &str, field: &str, by: f64) -> Result<f64, KvError>;

    // -- approximate cardinality -------------------------------------------

    /// Returns true when the estimate changed.
    async fn pfadd(&self, key: &str, member: &str) -> Result<bool, KvError>;

    async fn pfcount(&self, key: &str) -> Result<u64, KvError>;

    async fn pfmerge(&self, dest: &str, sources: &[String]) -> Result<(), KvError>;
}

/// Redis-style glob match supporting `*` (any run) and `?` (any one char).
pub(crate) fn glob_match(pattern: &str, key: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let k: Vec<char> = key.chars().collect();
    // Two-pointer with backtracking on the last `*`.
    let (mut pi, mut ki) = (0usize, 0usize);
    let (mut star, mut star_k) = (None::<usize>, 0usize);
    while ki < k.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == k[ki]) {
            pi += 1;
            ki += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some(pi);
            star_k = ki;
            pi += 1;
        } else if let Some(s) = star {
            pi = s + 1;
            star_k += 1;
            ki = star_k;
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_star_and_literal() {
        assert!(glob_match("cost:daily:user:*", "cost:daily:user:u1"));
        assert!(!glob_match("cost:daily:user:*", "cost:daily:tier:1"));
        assert!(glob_match("*", "anything"));
        assert!(glob_match("a*c*", "abcabc"));
        assert!(!glob_match("a*c", "ab"));
        assert!(glob_match("exact", "exact"));
        assert!(glob_match("a?c", "abc"));
    }
}
