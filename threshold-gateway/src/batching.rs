//! Keyed batching of values.
//!
//! Values are grouped by a key. A group is emitted as one batch once it has been
//! quiet for `batch_delay`, once it has been open for `batch_max_delay`, or as soon
//! as it holds `batch_max_size` values, whichever comes first. Without a delay,
//! batching is off and every value is emitted on its own.
//!
//! [`Batcher`] is the bookkeeping, driven with explicit instants so it can be tested
//! without a runtime. [`run_batcher`] drives it from a channel with a single timer.

use conf::Conf;
use std::{collections::HashMap, hash::Hash, time::Duration};
use tokio::{
    sync::mpsc::{UnboundedReceiver, UnboundedSender},
    time::{Instant, sleep_until},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Config options for batching outgoing notifications.
#[derive(Clone, Conf, Debug, Default)]
#[conf(serde)]
pub struct BatchConfig {
    /// Emit a batch once no new value with its key has arrived for this long (e.g. 30s).
    /// If omitted, values are not batched.
    #[conf(long, env, value_parser = humantime::parse_duration, serde(use_value_parser))]
    pub batch_delay: Option<Duration>,
    /// Emit a batch at the latest this long after its first value arrived.
    /// Only used together with a batch delay.
    #[conf(long, env, value_parser = humantime::parse_duration, serde(use_value_parser))]
    pub batch_max_delay: Option<Duration>,
    /// Emit a batch as soon as it holds this many values.
    /// Only used together with a batch delay.
    #[conf(long, env)]
    pub batch_max_size: Option<usize>,
}

#[derive(Debug)]
struct Group<V> {
    /// Order in which groups were opened, so batches come out oldest first
    seq: u64,
    items: Vec<V>,
    opened: Instant,
    last: Instant,
}

impl<V> Group<V> {
    fn deadline(&self, delay: Duration, max_delay: Option<Duration>) -> Instant {
        let idle = self.last + delay;
        match max_delay {
            Some(max_delay) => idle.min(self.opened + max_delay),
            None => idle,
        }
    }
}

/// Groups values by key and decides when each group is complete.
pub struct Batcher<K, V> {
    config: BatchConfig,
    key_fn: Box<dyn Fn(&V) -> K + Send>,
    groups: HashMap<K, Group<V>>,
    next_seq: u64,
}

impl<K, V> Batcher<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new(config: BatchConfig, key_fn: impl Fn(&V) -> K + Send + 'static) -> Self {
        Self {
            config,
            key_fn: Box::new(key_fn),
            groups: HashMap::new(),
            next_seq: 0,
        }
    }

    /// Add a value that arrived at `now`, returning any batches that are complete.
    ///
    /// Groups whose deadline passed before `now` are emitted first. A value that
    /// arrives exactly at its group's deadline still joins that group.
    pub fn add(&mut self, value: V, now: Instant) -> Vec<Vec<V>> {
        if self.config.batch_delay.is_none() {
            return vec![vec![value]];
        }

        let mut batches = self.take_where(|deadline| deadline < now);

        let key = (self.key_fn)(&value);
        let next_seq = &mut self.next_seq;
        let group = self.groups.entry(key.clone()).or_insert_with(|| {
            *next_seq += 1;
            Group {
                seq: *next_seq,
                items: Vec::new(),
                opened: now,
                last: now,
            }
        });
        group.items.push(value);
        group.last = now;

        let full = self
            .config
            .batch_max_size
            .is_some_and(|max_size| group.items.len() >= max_size);
        if full && let Some(group) = self.groups.remove(&key) {
            batches.push(group.items);
        }

        batches
    }

    /// Emit every group whose deadline is at or before `now`.
    pub fn flush_expired(&mut self, now: Instant) -> Vec<Vec<V>> {
        self.take_where(|deadline| deadline <= now)
    }

    /// The earliest instant at which some group will be complete.
    pub fn next_deadline(&self) -> Option<Instant> {
        let delay = self.config.batch_delay?;
        self.groups
            .values()
            .map(|group| group.deadline(delay, self.config.batch_max_delay))
            .min()
    }

    /// Emit every open group, regardless of deadlines.
    pub fn drain(&mut self) -> Vec<Vec<V>> {
        self.take_where(|_| true)
    }

    /// Number of values waiting in open groups.
    pub fn pending(&self) -> usize {
        self.groups.values().map(|group| group.items.len()).sum()
    }

    fn take_where(&mut self, due: impl Fn(Instant) -> bool) -> Vec<Vec<V>> {
        let Some(delay) = self.config.batch_delay else {
            return Vec::new();
        };
        let max_delay = self.config.batch_max_delay;

        let due_keys: Vec<K> = self
            .groups
            .iter()
            .filter(|(_, group)| due(group.deadline(delay, max_delay)))
            .map(|(key, _)| key.clone())
            .collect();

        let mut due_groups: Vec<Group<V>> = due_keys
            .iter()
            .filter_map(|key| self.groups.remove(key))
            .collect();
        due_groups.sort_by_key(|group| group.seq);
        due_groups.into_iter().map(|group| group.items).collect()
    }
}

/// Batch values from `rx` and send complete batches to `tx`.
///
/// Runs until the token is cancelled or `rx` is closed, then emits whatever is
/// still pending.
pub async fn run_batcher<K, V>(
    mut batcher: Batcher<K, V>,
    mut rx: UnboundedReceiver<V>,
    tx: UnboundedSender<Vec<V>>,
    token: CancellationToken,
) where
    K: Eq + Hash + Clone,
{
    loop {
        let next_deadline = batcher.next_deadline();
        let batches = tokio::select! {
            _ = token.cancelled() => break,
            maybe_value = rx.recv() => match maybe_value {
                Some(value) => batcher.add(value, Instant::now()),
                None => break,
            },
            _ = sleep_until(next_deadline.unwrap_or_else(Instant::now)), if next_deadline.is_some() => {
                batcher.flush_expired(Instant::now())
            }
        };

        for batch in batches {
            if tx.send(batch).is_err() {
                warn!("Batch receiver is gone, stopping batcher");
                return;
            }
        }
    }

    let pending = batcher.pending();
    let remaining = batcher.drain();
    debug!(
        "Batcher stopping, flushing {pending} pending values in {} batches",
        remaining.len()
    );
    for batch in remaining {
        if tx.send(batch).is_err() {
            warn!("Batch receiver is gone, dropping pending batches");
            return;
        }
    }
}
