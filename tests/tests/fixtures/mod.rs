//! Shared cluster fixtures: a KV state machine and an in-memory router
//! that wires several [`RaftGroup`] runtimes together, with partitioning
//! and crash/restart support.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::Once;
use std::time::Duration;

use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use serde::Deserialize;
use serde::Serialize;
use tokio::time::sleep;
use tokio::time::Instant;

use keelraft::CommitOutcome;
use keelraft::Endpoint;
use keelraft::LogIndex;
use keelraft::MemStore;
use keelraft::QueryPolicy;
use keelraft::RaftConfig;
use keelraft::RaftError;
use keelraft::RaftGroup;
use keelraft::RaftMessage;
use keelraft::RaftNodeBuilder;
use keelraft::Role;
use keelraft::StateMachine;
use keelraft::StoreError;
use keelraft::Transport;

static INIT_TRACING: Once = Once::new();

/// Installs a fmt subscriber once per test process. `RUST_LOG` filters.
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Timings small enough for tests, long enough to survive a loaded CI box.
pub fn fast_config() -> RaftConfig {
    RaftConfig {
        min_election_timeout: Duration::from_millis(150),
        max_election_timeout: Duration::from_millis(300),
        leader_heartbeat_period: Duration::from_millis(50),
        leader_heartbeat_timeout: Duration::from_millis(600),
        report_publish_period: Duration::from_millis(200),
        ..RaftConfig::default()
    }
}

// --- KV state machine -------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum KvOp {
    Put { key: String, value: String },
    Get { key: String },
}

pub fn kv_put(key: &str, value: &str) -> KvOp {
    KvOp::Put {
        key: key.to_string(),
        value: value.to_string(),
    }
}

pub fn kv_get(key: &str) -> KvOp {
    KvOp::Get {
        key: key.to_string(),
    }
}

/// Number of KV pairs per snapshot chunk, kept tiny so snapshot transfers
/// exercise the multi-chunk path.
const PAIRS_PER_CHUNK: usize = 4;

#[derive(Default)]
pub struct KvStore {
    data: BTreeMap<String, String>,
}

impl StateMachine for KvStore {
    type Operation = KvOp;
    type Response = Option<String>;

    fn apply(&mut self, _log_index: LogIndex, operation: &KvOp) -> Option<String> {
        match operation {
            KvOp::Put { key, value } => {
                self.data.insert(key.clone(), value.clone());
                Some(value.clone())
            }
            KvOp::Get { key } => self.data.get(key).cloned(),
        }
    }

    fn run_operation(&self, operation: &KvOp) -> Option<String> {
        match operation {
            KvOp::Put { .. } => None,
            KvOp::Get { key } => self.data.get(key).cloned(),
        }
    }

    fn take_snapshot(&self, _log_index: LogIndex) -> Vec<Vec<u8>> {
        let pairs: Vec<(&String, &String)> = self.data.iter().collect();
        pairs
            .chunks(PAIRS_PER_CHUNK)
            .map(|chunk| serde_json::to_vec(chunk).expect("kv pairs serialize"))
            .collect()
    }

    fn install_snapshot(&mut self, _log_index: LogIndex, chunks: &[Vec<u8>]) -> Result<(), StoreError> {
        self.data.clear();
        for chunk in chunks {
            if chunk.is_empty() {
                continue;
            }
            let pairs: Vec<(String, String)> =
                serde_json::from_slice(chunk).map_err(StoreError::new)?;
            self.data.extend(pairs);
        }
        Ok(())
    }
}

// --- in-memory router -------------------------------------------------------

#[derive(Default)]
struct RouterInner {
    targets: Mutex<BTreeMap<String, RaftGroup<KvStore>>>,
    blocked: Mutex<BTreeSet<(String, String)>>,
}

#[derive(Clone)]
pub struct RouterTransport {
    sender_id: String,
    inner: Arc<RouterInner>,
}

impl Transport<KvOp> for RouterTransport {
    fn send(&self, target: &Endpoint, message: RaftMessage<KvOp>) {
        let blocked = {
            let blocked = self.inner.blocked.lock().unwrap();
            blocked.contains(&(self.sender_id.clone(), target.id().to_string()))
                || blocked.contains(&(target.id().to_string(), self.sender_id.clone()))
        };
        if blocked {
            return;
        }
        let group = self.inner.targets.lock().unwrap().get(target.id()).cloned();
        if let Some(group) = group {
            group.handle_message(message);
        }
    }
}

/// A whole test cluster: one [`RaftGroup`] per member, all connected
/// through one in-memory network.
pub struct RaftRouter {
    config: RaftConfig,
    inner: Arc<RouterInner>,
    groups: BTreeMap<String, RaftGroup<KvStore>>,
    endpoints: BTreeMap<String, Endpoint>,
    stores: BTreeMap<String, MemStore<KvOp>>,
    next_seed: u64,
}

impl RaftRouter {
    pub fn new(config: RaftConfig) -> Self {
        init_tracing();
        Self {
            config,
            inner: Arc::new(RouterInner::default()),
            groups: BTreeMap::new(),
            endpoints: BTreeMap::new(),
            stores: BTreeMap::new(),
            next_seed: 1,
        }
    }

    /// Boots a fresh `n`-member cluster, every member a voter.
    pub fn new_cluster(n: usize) -> Result<Self> {
        let mut router = Self::new(fast_config());
        let members: BTreeSet<Endpoint> = (1..=n)
            .map(|i| Endpoint::new(format!("n{i}"), format!("mem://n{i}")))
            .collect();
        for member in &members {
            router.spawn_node(member.id(), members.clone())?;
        }
        Ok(router)
    }

    pub fn endpoint(&self, id: &str) -> Endpoint {
        self.endpoints.get(id).cloned().unwrap_or_else(|| {
            Endpoint::new(id, format!("mem://{id}"))
        })
    }

    pub fn group(&self, id: &str) -> RaftGroup<KvStore> {
        self.groups.get(id).expect("unknown node").clone()
    }

    pub fn store(&self, id: &str) -> MemStore<KvOp> {
        self.stores.get(id).expect("unknown node").clone()
    }

    pub fn node_ids(&self) -> Vec<String> {
        self.groups.keys().cloned().collect()
    }

    /// Spawns a member. `initial` is persisted on first boot only; a node
    /// restarted from an existing store restores instead.
    pub fn spawn_node(&mut self, id: &str, initial: BTreeSet<Endpoint>) -> Result<()> {
        let endpoint = Endpoint::new(id, format!("mem://{id}"));
        self.endpoints.insert(id.to_string(), endpoint.clone());
        let store = self
            .stores
            .entry(id.to_string())
            .or_insert_with(MemStore::new)
            .clone();
        let transport = RouterTransport {
            sender_id: id.to_string(),
            inner: self.inner.clone(),
        };
        let seed = self.next_seed;
        self.next_seed += 1;

        let node = RaftNodeBuilder::new("it-group", endpoint, store, KvStore::default(), transport)
            .with_config(self.config.clone())
            .with_initial_members(initial)
            .with_rng_seed(seed)
            .build()
            .context("building node")?;
        let group = RaftGroup::spawn(node);
        self.inner
            .targets
            .lock()
            .unwrap()
            .insert(id.to_string(), group.clone());
        self.groups.insert(id.to_string(), group);
        Ok(())
    }

    /// Stops a member's event loop and unplugs it from the network.
    pub async fn shutdown(&mut self, id: &str) {
        if let Some(group) = self.groups.remove(id) {
            group.shutdown().await;
        }
        self.inner.targets.lock().unwrap().remove(id);
    }

    /// Restarts a member from its surviving store.
    pub fn restart_node(&mut self, id: &str) -> Result<()> {
        self.spawn_node(id, BTreeSet::new())
    }

    pub fn isolate(&self, id: &str) {
        let mut blocked = self.inner.blocked.lock().unwrap();
        for other in self.groups.keys() {
            if other != id {
                blocked.insert((id.to_string(), other.clone()));
            }
        }
    }

    pub fn heal(&self) {
        self.inner.blocked.lock().unwrap().clear();
    }

    /// Waits until some member reports itself leader; with competing
    /// claims, the highest term wins.
    pub async fn wait_for_leader(&self, timeout: Duration) -> Result<String> {
        let deadline = Instant::now() + timeout;
        loop {
            let mut best: Option<(u64, String)> = None;
            for (id, group) in &self.groups {
                if let Ok(report) = group.report().await {
                    if report.role == Role::Leader {
                        let candidate = (report.term, id.clone());
                        if best.as_ref().map(|b| candidate.0 > b.0).unwrap_or(true) {
                            best = Some(candidate);
                        }
                    }
                }
            }
            if let Some((_, id)) = best {
                return Ok(id);
            }
            if Instant::now() > deadline {
                bail!("no leader elected within {timeout:?}");
            }
            sleep(Duration::from_millis(25)).await;
        }
    }

    /// Waits for a leader other than `old`.
    pub async fn wait_for_new_leader(&self, old: &str, timeout: Duration) -> Result<String> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Ok(id) = self.wait_for_leader(Duration::from_millis(100)).await {
                if id != old {
                    return Ok(id);
                }
            }
            if Instant::now() > deadline {
                bail!("no new leader (other than {old}) within {timeout:?}");
            }
        }
    }

    /// Writes through whichever node currently leads, retrying across
    /// leadership churn. Returns the commit index.
    pub async fn put(&self, key: &str, value: &str) -> Result<LogIndex> {
        for _ in 0..100 {
            let leader = self.wait_for_leader(Duration::from_secs(5)).await?;
            match self.group(&leader).submit(kv_put(key, value)).await {
                Ok(CommitOutcome { commit_index, .. }) => return Ok(commit_index),
                Err(RaftError::NotLeader { .. })
                | Err(RaftError::CannotReplicate { .. })
                | Err(RaftError::IndeterminateState { .. }) => {
                    sleep(Duration::from_millis(50)).await;
                }
                Err(e) => bail!("put {key} failed: {e}"),
            }
        }
        bail!("put {key} did not commit");
    }

    /// Eventual-consistency read on a specific member.
    pub async fn read_from(
        &self,
        id: &str,
        key: &str,
        min_commit_index: LogIndex,
    ) -> Result<Option<String>> {
        let outcome = self
            .group(id)
            .query(kv_get(key), QueryPolicy::EventualConsistency, min_commit_index)
            .await?;
        Ok(outcome.result)
    }

    /// Waits until `id` has applied at least `commit_index`.
    pub async fn wait_for_applied(&self, id: &str, commit_index: LogIndex, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Ok(report) = self.group(id).report().await {
                if report.log.last_applied >= commit_index {
                    return Ok(());
                }
            }
            if Instant::now() > deadline {
                bail!("{id} did not apply {commit_index} within {timeout:?}");
            }
            sleep(Duration::from_millis(25)).await;
        }
    }
}
