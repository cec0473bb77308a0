//! In-process broker for local runs and tests.
//!
//! Queues are single-partition logs held in memory. Retention can be simulated
//! with [`MemoryBroker::truncate_before`], and any operation can be made to fail
//! once with [`MemoryBroker::fail_next`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;

use super::{
    Broker, BrokerAddress, BrokerError, ConsumerIdentity, LeaderConnection, Message, Offset,
    QueueName,
};

const LEADER: &str = "memory";
const DEFAULT_FETCH_MAX_BYTES: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    LocateLeader,
    Connect,
    ReadCommitted,
    Commit,
    FetchEarliest,
    Fetch,
    Append,
}

#[derive(Default)]
struct Log {
    earliest: Offset,
    records: Vec<Bytes>,
}

impl Log {
    fn end(&self) -> Offset {
        self.earliest + self.records.len() as Offset
    }
}

#[derive(Default)]
struct State {
    logs: HashMap<String, Log>,
    committed: HashMap<(String, String), i64>,
    failures: HashMap<Operation, String>,
    commit_writes: usize,
}

impl State {
    fn check(&mut self, operation: Operation) -> Result<(), BrokerError> {
        match self.failures.remove(&operation) {
            Some(reason) => Err(BrokerError::Unavailable(reason)),
            None => Ok(()),
        }
    }

    fn log(&self, queue: &QueueName) -> Result<&Log, BrokerError> {
        self.logs
            .get(queue.as_str())
            .ok_or_else(|| BrokerError::UnknownQueue(queue.to_string()))
    }
}

#[derive(Clone)]
pub struct MemoryBroker {
    state: Arc<Mutex<State>>,
    open_connections: Arc<AtomicUsize>,
    fetch_max_bytes: usize,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            state: Default::default(),
            open_connections: Default::default(),
            fetch_max_bytes: DEFAULT_FETCH_MAX_BYTES,
        }
    }

    pub fn with_fetch_max_bytes(mut self, fetch_max_bytes: usize) -> Self {
        self.fetch_max_bytes = fetch_max_bytes;
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        lock(&self.state)
    }

    /// Creates an empty queue. No-op if it already exists.
    pub fn create_queue(&self, queue: &str) {
        self.state().logs.entry(queue.to_owned()).or_default();
    }

    /// Drops every record below `offset`, like broker-side retention would.
    pub fn truncate_before(&self, queue: &str, offset: Offset) {
        let mut state = self.state();
        let log = state.logs.entry(queue.to_owned()).or_default();
        let offset = offset.min(log.end());
        if offset > log.earliest {
            let dropped = usize::try_from(offset - log.earliest).unwrap_or(usize::MAX);
            log.records.drain(..dropped.min(log.records.len()));
            log.earliest = offset;
        }
    }

    /// Overwrites the stored position, including values a real store would
    /// only hold as sentinels.
    pub fn set_committed(&self, consumer: &str, queue: &str, raw: i64) {
        self.state()
            .committed
            .insert((consumer.to_owned(), queue.to_owned()), raw);
    }

    pub fn committed(&self, consumer: &str, queue: &str) -> Option<i64> {
        self.state()
            .committed
            .get(&(consumer.to_owned(), queue.to_owned()))
            .copied()
    }

    /// Makes the next call of `operation` fail with `reason`.
    pub fn fail_next(&self, operation: Operation, reason: &str) {
        self.state().failures.insert(operation, reason.to_owned());
    }

    /// Number of commit writes that reached the store.
    pub fn commit_writes(&self) -> usize {
        self.state().commit_writes
    }

    pub fn open_connections(&self) -> usize {
        self.open_connections.load(Ordering::SeqCst)
    }
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn locate_leader(&self, queue: &QueueName) -> Result<BrokerAddress, BrokerError> {
        let mut state = self.state();
        state.check(Operation::LocateLeader)?;
        state.log(queue)?;
        Ok(BrokerAddress::new(LEADER, 0))
    }

    async fn connect(
        &self,
        leader: &BrokerAddress,
        consumer: &ConsumerIdentity,
    ) -> Result<Box<dyn LeaderConnection>, BrokerError> {
        self.state().check(Operation::Connect)?;
        if leader.as_str() != BrokerAddress::new(LEADER, 0).as_str() {
            return Err(BrokerError::Unavailable(format!("no broker at {leader}")));
        }

        self.open_connections.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryConnection {
            state: self.state.clone(),
            consumer: consumer.clone(),
            open_connections: self.open_connections.clone(),
            fetch_max_bytes: self.fetch_max_bytes,
        }))
    }

    async fn fetch_earliest(&self, queue: &QueueName) -> Result<Offset, BrokerError> {
        let mut state = self.state();
        state.check(Operation::FetchEarliest)?;
        Ok(state.log(queue)?.earliest)
    }

    async fn append(&self, queue: &QueueName, payload: Bytes) -> Result<(), BrokerError> {
        let mut state = self.state();
        state.check(Operation::Append)?;
        // Writes create missing queues, as a broker with topic auto-creation does
        state
            .logs
            .entry(queue.to_string())
            .or_default()
            .records
            .push(payload);
        Ok(())
    }
}

struct MemoryConnection {
    state: Arc<Mutex<State>>,
    consumer: ConsumerIdentity,
    open_connections: Arc<AtomicUsize>,
    fetch_max_bytes: usize,
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.open_connections.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl LeaderConnection for MemoryConnection {
    async fn read_committed(&self, queue: &QueueName) -> Result<Option<i64>, BrokerError> {
        let committed = {
            let mut state = lock(&self.state);
            state.check(Operation::ReadCommitted)?;
            let key = (self.consumer.to_string(), queue.to_string());
            state.committed.get(&key).copied()
        };

        // Give other requests a turn, as the round trip to a real store would
        tokio::task::yield_now().await;
        Ok(committed)
    }

    async fn commit(&self, queue: &QueueName, next_offset: Offset) -> Result<(), BrokerError> {
        let mut state = lock(&self.state);
        state.check(Operation::Commit)?;
        let raw = i64::try_from(next_offset)
            .map_err(|_| BrokerError::Unavailable(format!("offset {next_offset} overflows")))?;
        state
            .committed
            .insert((self.consumer.to_string(), queue.to_string()), raw);
        state.commit_writes += 1;
        Ok(())
    }

    async fn fetch(&self, queue: &QueueName, start: Offset) -> Result<Vec<Message>, BrokerError> {
        let mut state = lock(&self.state);
        state.check(Operation::Fetch)?;
        let log = state.log(queue)?;

        // Positions below retention resume from the oldest record
        let start = start.max(log.earliest);
        let skip = usize::try_from(start - log.earliest).unwrap_or(usize::MAX);

        let mut batch = Vec::new();
        let mut bytes = 0;
        for (index, payload) in log.records.iter().enumerate().skip(skip) {
            if !batch.is_empty() && bytes + payload.len() > self.fetch_max_bytes {
                break;
            }
            bytes += payload.len();
            batch.push(Message {
                offset: log.earliest + index as Offset,
                payload: payload.clone(),
            });
        }
        Ok(batch)
    }
}
