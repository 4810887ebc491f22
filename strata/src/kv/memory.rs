//! In-process [`KvStore`]: a single locked map with lazy TTL expiry and
//! per-key version counters. Not persistent.
//!
//! This is the single-process default and the test double. Expiry is lazy:
//! an expired entry is dropped the next time any operation touches it or a
//! scan walks past it.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::{glob_match, KvError, KvOp, KvReply, KvStore};

#[derive(Debug, Clone)]
enum Slot {
    Str(String),
    Set(HashSet<String>),
    ZSet(HashMap<String, f64>),
    Hash(HashMap<String, String>),
    /// Exact set standing in for an HLL sketch; cardinality is precise,
    /// which is a permitted estimator.
    Hll(HashSet<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    slot: Slot,
    expires_at: Option<Instant>,
    version: u64,
}

#[derive(Default)]
struct Shared {
    map: HashMap<String, Entry>,
    /// Monotonic mutation counter; stamped onto entries as their version.
    clock: u64,
}

impl Shared {
    fn purge(&mut self, key: &str) {
        if let Some(entry) = self.map.get(key) {
            if entry.expires_at.is_some_and(|at| at <= Instant::now()) {
                self.map.remove(key);
            }
        }
    }

    fn live(&mut self, key: &str) -> Option<&mut Entry> {
        self.purge(key);
        self.map.get_mut(key)
    }

    fn touch(&mut self, key: &str) -> u64 {
        self.clock += 1;
        let clock = self.clock;
        if let Some(entry) = self.map.get_mut(key) {
            entry.version = clock;
        }
        clock
    }

    fn entry_or_insert(&mut self, key: &str, slot: impl FnOnce() -> Slot) -> &mut Entry {
        self.purge(key);
        self.clock += 1;
        let clock = self.clock;
        self.map.entry(key.to_string()).or_insert_with(|| Entry {
            slot: slot(),
            expires_at: None,
            version: clock,
        })
    }

    fn apply(&mut self, op: &KvOp) -> Result<KvReply, KvError> {
        match op {
            KvOp::Set { key, value, ttl, nx } => {
                self.purge(key);
                if *nx && self.map.contains_key(key.as_str()) {
                    return Ok(KvReply::Bool(false));
                }
                self.clock += 1;
                let version = self.clock;
                self.map.insert(
                    key.clone(),
                    Entry {
                        slot: Slot::Str(value.clone()),
                        expires_at: ttl.map(|t| Instant::now() + t),
                        version,
                    },
                );
                Ok(KvReply::Bool(true))
            }
            KvOp::Del { key } => {
                self.purge(key);
                let existed = self.map.remove(key.as_str()).is_some();
                Ok(KvReply::Bool(existed))
            }
            KvOp::Incr { key, by } => {
                let current = match self.live(key) {
                    None => 0,
                    Some(Entry { slot: Slot::Str(s), .. }) => {
                        s.parse::<i64>().map_err(|_| KvError::NotANumber(key.clone()))?
                    }
                    Some(_) => return Err(KvError::WrongType(key.clone())),
                };
                let next = current + by;
                self.set_str_preserving_ttl(key, next.to_string());
                Ok(KvReply::Int(next))
            }
            KvOp::IncrByFloat { key, by } => {
                let current = match self.live(key) {
                    None => 0.0,
                    Some(Entry { slot: Slot::Str(s), .. }) => {
                        s.parse::<f64>().map_err(|_| KvError::NotANumber(key.clone()))?
                    }
                    Some(_) => return Err(KvError::WrongType(key.clone())),
                };
                let next = current + by;
                self.set_str_preserving_ttl(key, format!("{}", next));
                Ok(KvReply::Float(next))
            }
            KvOp::Expire { key, ttl, nx } => {
                let Some(entry) = self.live(key) else {
                    return Ok(KvReply::Bool(false));
                };
                if *nx && entry.expires_at.is_some() {
                    return Ok(KvReply::Bool(false));
                }
                entry.expires_at = Some(Instant::now() + *ttl);
                self.touch(key);
                Ok(KvReply::Bool(true))
            }
            KvOp::Sadd { key, member } => {
                let entry = self.entry_or_insert(key, || Slot::Set(HashSet::new()));
                let Slot::Set(set) = &mut entry.slot else {
                    return Err(KvError::WrongType(key.clone()));
                };
                let added = set.insert(member.clone());
                self.touch(key);
                Ok(KvReply::Bool(added))
            }
            KvOp::Zadd { key, score, member } => {
                let entry = self.entry_or_insert(key, || Slot::ZSet(HashMap::new()));
                let Slot::ZSet(zset) = &mut entry.slot else {
                    return Err(KvError::WrongType(key.clone()));
                };
                let added = zset.insert(member.clone(), *score).is_none();
                self.touch(key);
                Ok(KvReply::Bool(added))
            }
            KvOp::Hset { key, field, value } => {
                let entry = self.entry_or_insert(key, || Slot::Hash(HashMap::new()));
                let Slot::Hash(hash) = &mut entry.slot else {
                    return Err(KvError::WrongType(key.clone()));
                };
                let created = hash.insert(field.clone(), value.clone()).is_none();
                self.touch(key);
                Ok(KvReply::Bool(created))
            }
            KvOp::HincrBy { key, field, by } => {
                let entry = self.entry_or_insert(key, || Slot::Hash(HashMap::new()));
                let Slot::Hash(hash) = &mut entry.slot else {
                    return Err(KvError::WrongType(key.clone()));
                };
                let current = match hash.get(field.as_str()) {
                    None => 0,
                    Some(s) => s.parse::<i64>().map_err(|_| KvError::NotANumber(key.clone()))?,
                };
                let next = current + by;
                hash.insert(field.clone(), next.to_string());
                self.touch(key);
                Ok(KvReply::Int(next))
            }
            KvOp::HincrByFloat { key, field, by } => {
                let entry = self.entry_or_insert(key, || Slot::Hash(HashMap::new()));
                let Slot::Hash(hash) = &mut entry.slot else {
                    return Err(KvError::WrongType(key.clone()));
                };
                let current = match hash.get(field.as_str()) {
                    None => 0.0,
                    Some(s) => s.parse::<f64>().map_err(|_| KvError::NotANumber(key.clone()))?,
                };
                let next = current + by;
                hash.insert(field.clone(), format!("{}", next));
                self.touch(key);
                Ok(KvReply::Float(next))
            }
            KvOp::Pfadd { key, member } => {
                let entry = self.entry_or_insert(key, || Slot::Hll(HashSet::new()));
                let Slot::Hll(hll) = &mut entry.slot else {
                    return Err(KvError::WrongType(key.clone()));
                };
                let changed = hll.insert(member.clone());
                self.touch(key);
                Ok(KvReply::Bool(changed))
            }
        }
    }

    /// Overwrites the string value, keeping expiry (incr semantics).
    fn set_str_preserving_ttl(&mut self, key: &str, value: String) {
        self.clock += 1;
        let clock = self.clock;
        match self.map.get_mut(key) {
            Some(entry) => {
                entry.slot = Slot::Str(value);
                entry.version = clock;
            }
            None => {
                self.map.insert(
                    key.to_string(),
                    Entry { slot: Slot::Str(value), expires_at: None, version: clock },
                );
            }
        }
    }
}

/// In-memory KV store. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct MemoryKv {
    state: Arc<Mutex<Shared>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let mut state = self.lock();
        match state.live(key) {
            None => Ok(None),
            Some(Entry { slot: Slot::Str(s), .. }) => Ok(Some(s.clone())),
            Some(_) => Err(KvError::WrongType(key.to_string())),
        }
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
        nx: bool,
    ) -> Result<bool, KvError> {
        let op = KvOp::Set { key: key.to_string(), value: value.to_string(), ttl, nx };
        match self.lock().apply(&op)? {
            KvReply::Bool(b) => Ok(b),
            _ => unreachable!("set reply is boolean"),
        }
    }

    async fn del(&self, key: &str) -> Result<bool, KvError> {
        let op = KvOp::Del { key: key.to_string() };
        match self.lock().apply(&op)? {
            KvReply::Bool(b) => Ok(b),
            _ => unreachable!("del reply is boolean"),
        }
    }

    async fn incr(&self, key: &str, by: i64) -> Result<i64, KvError> {
        let op = KvOp::Incr { key: key.to_string(), by };
        match self.lock().apply(&op)? {
            KvReply::Int(i) => Ok(i),
            _ => unreachable!("incr reply is integer"),
        }
    }

    async fn incr_by_float(&self, key: &str, by: f64) -> Result<f64, KvError> {
        let op = KvOp::IncrByFloat { key: key.to_string(), by };
        match self.lock().apply(&op)? {
            KvReply::Float(f) => Ok(f),
            _ => unreachable!("incrbyfloat reply is float"),
        }
    }

    async fn expire(&self, key: &str, ttl: Duration, nx: bool) -> Result<bool, KvError> {
        let op = KvOp::Expire { key: key.to_string(), ttl, nx };
        match self.lock().apply(&op)? {
            KvReply::Bool(b) => Ok(b),
            _ => unreachable!("expire reply is boolean"),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, KvError> {
        let mut state = self.lock();
        Ok(state.live(key).is_some())
    }

    async fn exec(&self, ops: Vec<KvOp>) -> Result<Vec<KvReply>, KvError> {
        let mut state = self.lock();
        let mut replies = Vec::with_capacity(ops.len());
        for op in &ops {
            replies.push(state.apply(op)?);
        }
        Ok(replies)
    }

    async fn version(&self, key: &str) -> Result<u64, KvError> {
        let mut state = self.lock();
        Ok(state.live(key).map(|entry| entry.version).unwrap_or(0))
    }

    async fn exec_if_unchanged(
        &self,
        watched: &[(String, u64)],
        ops: Vec<KvOp>,
    ) -> Result<Option<Vec<KvReply>>, KvError> {
        let mut state = self.lock();
        for (key, version) in watched {
            let current = state.live(key).map(|entry| entry.version).unwrap_or(0);
            if current != *version {
                return Ok(None);
            }
        }
        let mut replies = Vec::with_capacity(ops.len());
        for op in &ops {
            replies.push(state.apply(op)?);
        }
        Ok(Some(replies))
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<bool, KvError> {
        let op = KvOp::Sadd { key: key.to_string(), member: member.to_string() };
        match self.lock().apply(&op)? {
            KvReply::Bool(b) => Ok(b),
            _ => unreachable!("sadd reply is boolean"),
        }
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, KvError> {
        let mut state = self.lock();
        match state.live(key) {
            None => Ok(Vec::new()),
            Some(Entry { slot: Slot::Set(set), .. }) => {
                let mut members: Vec<String> = set.iter().cloned().collect();
                members.sort();
                Ok(members)
            }
            Some(_) => Err(KvError::WrongType(key.to_string())),
        }
    }

    async fn scan(
        &self,
        _cursor: u64,
        pattern: &str,
        _count: usize,
    ) -> Result<(u64, Vec<String>), KvError> {
        let mut state = self.lock();
        let now = Instant::now();
        state.map.retain(|_, entry| !entry.expires_at.is_some_and(|at| at <= now));
        let mut keys: Vec<String> =
            state.map.keys().filter(|key| glob_match(pattern, key)).cloned().collect();
        keys.sort();
        Ok((0, keys))
    }

    async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<bool, KvError> {
        let op = KvOp::Zadd { key: key.to_string(), score, member: member.to_string() };
        match self.lock().apply(&op)? {
            KvReply::Bool(b) => Ok(b),
            _ => unreachable!("zadd reply is boolean"),
        }
    }

    async fn zrange(
        &self,
        key: &str,
        start: i64,
        stop: i64,
        rev: bool,
    ) -> Result<Vec<(String, f64)>, KvError> {
        let mut state = self.lock();
        let mut members = match state.live(key) {
            None => return Ok(Vec::new()),
            Some(Entry { slot: Slot::ZSet(zset), .. }) => {
                zset.iter().map(|(m, s)| (m.clone(), *s)).collect::<Vec<_>>()
            }
            Some(_) => return Err(KvError::WrongType(key.to_string())),
        };
        members.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal).then(a.0.cmp(&b.0)));
        if rev {
            members.reverse();
        }
        let len = members.len() as i64;
        let clamp = |i: i64| -> i64 {
            if i < 0 {
                (len + i).max(0)
            } else {
                i.min(len)
            }
        };
        let from = clamp(start);
        let to = clamp(stop).min(len - 1);
        if len == 0 || from > to {
            return Ok(Vec::new());
        }
        Ok(members[from as usize..=to as usize].to_vec())
    }

    async fn zrangebyscore(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> Result<Vec<(String, f64)>, KvError> {
        let mut state = self.lock();
        let mut members = match state.live(key) {
            None => return Ok(Vec::new()),
            Some(Entry { slot: Slot::ZSet(zset), .. }) => zset
                .iter()
                .filter(|(_, s)| **s >= min && **s <= max)
                .map(|(m, s)| (m.clone(), *s))
                .collect::<Vec<_>>(),
            Some(_) => return Err(KvError::WrongType(key.to_string())),
        };
        members.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal).then(a.0.cmp(&b.0)));
        Ok(members)
    }

    async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> Result<u64, KvError> {
        let mut state = self.lock();
        let removed = match state.live(key) {
            None => 0,
            Some(Entry { slot: Slot::ZSet(zset), .. }) => {
                let before = zset.len();
                zset.retain(|_, s| *s < min || *s > max);
                (before - zset.len()) as u64
            }
            Some(_) => return Err(KvError::WrongType(key.to_string())),
        };
        if removed > 0 {
            state.touch(key);
        }
        Ok(removed)
    }

    async fn zcard(&self, key: &str) -> Result<u64, KvError> {
        let mut state = self.lock();
        match state.live(key) {
            None => Ok(0),
            Some(Entry { slot: Slot::ZSet(zset), .. }) => Ok(zset.len() as u64),
            Some(_) => Err(KvError::WrongType(key.to_string())),
        }
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<bool, KvError> {
        let op = KvOp::Hset {
            key: key.to_string(),
            field: field.to_string(),
            value: value.to_string(),
        };
        match self.lock().apply(&op)? {
            KvReply::Bool(b) => Ok(b),
            _ => unreachable!("hset reply is boolean"),
        }
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, KvError> {
        let mut state = self.lock();
        match state.live(key) {
            None => Ok(None),
            Some(Entry { slot: Slot::Hash(hash), .. }) => Ok(hash.get(field).cloned()),
            Some(_) => Err(KvError::WrongType(key.to_string())),
        }
    }

    async fn hgetall(&self, key: &str) -> Result<BTreeMap<String, String>, KvError> {
        let mut state = self.lock();
        match state.live(key) {
            None => Ok(BTreeMap::new()),
            Some(Entry { slot: Slot::Hash(hash), .. }) => {
                Ok(hash.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            }
            Some(_) => Err(KvError::WrongType(key.to_string())),
        }
    }

    async fn hincrby(&self, key: &str, field: &str, by: i64) -> Result<i64, KvError> {
        let op = KvOp::HincrBy { key: key.to_string(), field: field.to_string(), by };
        match self.lock().apply(&op)? {
            KvReply::Int(i) => Ok(i),
            _ => unreachable!("hincrby reply is integer"),
        }
    }

    async fn hincrbyfloat(&self, key: &str, field: &str, by: f64) -> Result<f64, KvError> {
        let op = KvOp::HincrByFloat { key: key.to_string(), field: field.to_string(), by };
        match self.lock().apply(&op)? {
            KvReply::Float(f) => Ok(f),
            _ => unreachable!("hincrbyfloat reply is float"),
        }
    }

    async fn pfadd(&self, key: &str, member: &str) -> Result<bool, KvError> {
        let op = KvOp::Pfadd { key: key.to_string(), member: member.to_string() };
        match self.lock().apply(&op)? {
            KvReply::Bool(b) => Ok(b),
            _ => unreachable!("pfadd reply is boolean"),
        }
    }

    async fn pfcount(&self, key: &str) -> Result<u64, KvError> {
        let mut state = self.lock();
        match state.live(key) {
            None => Ok(0),
            Some(Entry { slot: Slot::Hll(hll), .. }) => Ok(hll.len() as u64),
            Some(_) => Err(KvError::WrongType(key.to_string())),
        }
    }

    async fn pfmerge(&self, dest: &str, sources: &[String]) -> Result<(), KvError> {
        let mut state = self.lock();
        let mut merged: HashSet<String> = HashSet::new();
        for source in sources {
            match state.live(source) {
                None => {}
                Some(Entry { slot: Slot::Hll(hll), .. }) => merged.extend(hll.iter().cloned()),
                Some(_) => return Err(KvError::WrongType(source.clone())),
            }
        }
        let entry = state.entry_or_insert(dest, || Slot::Hll(HashSet::new()));
        let Slot::Hll(hll) = &mut entry.slot else {
            return Err(KvError::WrongType(dest.to_string()));
        };
        hll.extend(merged);
        state.touch(dest);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_nx_semantics() {
        let kv = MemoryKv::new();
        assert!(kv.set("k", "1", None, false).await.unwrap());
        assert!(!kv.set("k", "2", None, true).await.unwrap());
        assert_eq!(kv.get("k").await.unwrap().as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn ttl_expires_lazily() {
        let kv = MemoryKv::new();
        kv.set("k", "v", Some(Duration::from_millis(20)), false).await.unwrap();
        assert!(kv.exists("k").await.unwrap());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(!kv.exists("k").await.unwrap());
        assert_eq!(kv.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn expire_nx_only_sets_when_no_ttl() {
        let kv = MemoryKv::new();
        kv.set("k", "v", None, false).await.unwrap();
        assert!(kv.expire("k", Duration::from_secs(60), true).await.unwrap());
        assert!(!kv.expire("k", Duration::from_secs(1), true).await.unwrap());
        assert!(kv.expire("k", Duration::from_secs(1), false).await.unwrap());
    }

    #[tokio::test]
    async fn incr_by_float_accumulates_preserving_ttl() {
        let kv = MemoryKv::new();
        kv.set("n", "1.5", Some(Duration::from_secs(60)), false).await.unwrap();
        let v = kv.incr_by_float("n", 0.25).await.unwrap();
        assert!((v - 1.75).abs() < 1e-9);
        // Expiry survives the increment.
        assert!(!kv.expire("n", Duration::from_secs(1), true).await.unwrap());
    }

    #[tokio::test]
    async fn incr_on_non_number_errors() {
        let kv = MemoryKv::new();
        kv.set("s", "abc", None, false).await.unwrap();
        assert!(matches!(kv.incr("s", 1).await, Err(KvError::NotANumber(_))));
    }

    #[tokio::test]
    async fn exec_is_atomic_per_call() {
        let kv = MemoryKv::new();
        let replies = kv
            .exec(vec![
                KvOp::IncrByFloat { key: "a".into(), by: 1.0 },
                KvOp::IncrByFloat { key: "b".into(), by: 2.0 },
                KvOp::Expire { key: "a".into(), ttl: Duration::from_secs(60), nx: true },
            ])
            .await
            .unwrap();
        assert_eq!(replies[0].as_float(), Some(1.0));
        assert_eq!(replies[1].as_float(), Some(2.0));
        assert_eq!(replies[2], KvReply::Bool(true));
    }

    #[tokio::test]
    async fn exec_if_unchanged_aborts_on_concurrent_write() {
        let kv = MemoryKv::new();
        kv.set("k", "0", None, false).await.unwrap();
        let version = kv.version("k").await.unwrap();

        // A write in between invalidates the watch.
        kv.incr_by_float("k", 1.0).await.unwrap();
        let aborted = kv
            .exec_if_unchanged(
                &[("k".to_string(), version)],
                vec![KvOp::IncrByFloat { key: "k".into(), by: 1.0 }],
            )
            .await
            .unwrap();
        assert!(aborted.is_none());

        // Fresh version commits.
        let version = kv.version("k").await.unwrap();
        let committed = kv
            .exec_if_unchanged(
                &[("k".to_string(), version)],
                vec![KvOp::IncrByFloat { key: "k".into(), by: 1.0 }],
            )
            .await
            .unwrap();
        assert!(committed.is_some());
        assert_eq!(kv.get("k").await.unwrap().as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn watch_missing_key_observes_creation() {
        let kv = MemoryKv::new();
        let version = kv.version("ghost").await.unwrap();
        assert_eq!(version, 0);
        kv.set("ghost", "now exists", None, false).await.unwrap();
        let aborted = kv
            .exec_if_unchanged(&[("ghost".to_string(), version)], vec![])
            .await
            .unwrap();
        assert!(aborted.is_none());
    }

    #[tokio::test]
    async fn scan_matches_glob() {
        let kv = MemoryKv::new();
        kv.set("cost:daily:user:u1", "1", None, false).await.unwrap();
        kv.set("cost:daily:user:u2", "2", None, false).await.unwrap();
        kv.set("cost:daily:tier:1", "3", None, false).await.unwrap();
        let (cursor, keys) = kv.scan(0, "cost:daily:user:*", 100).await.unwrap();
        assert_eq!(cursor, 0);
        assert_eq!(keys, vec!["cost:daily:user:u1", "cost:daily:user:u2"]);
    }

    #[tokio::test]
    async fn zset_rank_ranges() {
        let kv = MemoryKv::new();
        kv.zadd("z", 1.0, "a").await.unwrap();
        kv.zadd("z", 3.0, "c").await.unwrap();
        kv.zadd("z", 2.0, "b").await.unwrap();
        let asc = kv.zrange("z", 0, -1, false).await.unwrap();
        assert_eq!(asc.iter().map(|(m, _)| m.as_str()).collect::<Vec<_>>(), vec!["a", "b", "c"]);
        let top2 = kv.zrange("z", 0, 1, true).await.unwrap();
        assert_eq!(top2.iter().map(|(m, _)| m.as_str()).collect::<Vec<_>>(), vec!["c", "b"]);
        assert_eq!(kv.zcard("z").await.unwrap(), 3);
        assert_eq!(kv.zremrangebyscore("z", 2.0, 3.0).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn hash_counters() {
        let kv = MemoryKv::new();
        assert!(kv.hset("h", "name", "x").await.unwrap());
        assert!(!kv.hset("h", "name", "y").await.unwrap());
        assert_eq!(kv.hincrby("h", "hits", 2).await.unwrap(), 2);
        let sum = kv.hincrbyfloat("h", "spend", 0.5).await.unwrap();
        assert!((sum - 0.5).abs() < 1e-9);
        let all = kv.hgetall("h").await.unwrap();
        assert_eq!(all.get("hits").map(String::as_str), Some("2"));
    }

    #[tokio::test]
    async fn hll_counts_distinct() {
        let kv = MemoryKv::new();
        assert!(kv.pfadd("u", "alice").await.unwrap());
        assert!(!kv.pfadd("u", "alice").await.unwrap());
        kv.pfadd("u", "bob").await.unwrap();
        assert_eq!(kv.pfcount("u").await.unwrap(), 2);
        kv.pfadd("v", "carol").await.unwrap();
        kv.pfmerge("all", &["u".to_string(), "v".to_string()]).await.unwrap();
        assert_eq!(kv.pfcount("all").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn wrong_type_is_rejected() {
        let kv = MemoryKv::new();
        kv.sadd("s", "m").await.unwrap();
        assert!(matches!(kv.get("s").await, Err(KvError::WrongType(_))));
        assert!(matches!(kv.incr("s", 1).await, Err(KvError::WrongType(_))));
    }
}
