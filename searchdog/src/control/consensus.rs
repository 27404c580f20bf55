//! Majority-based log replication with leader election (spec.md §4.1
//! "Consensus contract"): pre-vote, randomized election timeout,
//! exponential `AppendEntries` backoff, committed-on-majority semantics,
//! and read-index confirmation for linearizable reads.
//!
//! The RPC surface a peer is reached through is abstracted behind
//! [`Transport`] so the election/replication state machine can be unit
//! tested with an in-memory transport instead of real gRPC; [`super::grpc`]
//! provides the `tonic`-backed implementation used in production.

use async_trait::async_trait;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify, RwLock};
use tracing::{debug, info, warn};

use super::command::{apply, ApplyError, Command};
use super::state::ClusterState;
use searchdog_config::Consensus as ConsensusConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Follower,
    PreCandidate,
    Candidate,
    Leader,
}

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub index: u64,
    pub term: u64,
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteRequest {
    pub term: u64,
    pub candidate_id_hash: u64,
    pub last_log_index: u64,
    pub last_log_term: u64,
    pub pre_vote: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct VoteResponse {
    pub term: u64,
    pub vote_granted: bool,
}

#[derive(Debug, Clone)]
pub struct AppendRequest {
    pub term: u64,
    pub leader_id: String,
    pub prev_log_index: u64,
    pub prev_log_term: u64,
    pub entries: Vec<LogEntry>,
    pub leader_commit: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct AppendResponse {
    pub term: u64,
    pub success: bool,
    pub conflict_index: u64,
}

/// A full cluster-state snapshot sent to a follower whose `next_index` has
/// fallen behind the leader's retained log (spec.md §2 "Snapshot transfer
/// for the control tier"). `data` is the JSON encoding of a
/// [`ClusterState`], the same encoding [`super::grpc::encode_command`] uses
/// for individual commands.
#[derive(Debug, Clone)]
pub struct SnapshotRequest {
    pub term: u64,
    pub leader_id: String,
    pub last_included_index: u64,
    pub last_included_term: u64,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy)]
pub struct SnapshotResponse {
    pub term: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ConsensusError {
    #[error("not the leader; current leader is {0:?}")]
    NotLeader(Option<String>),
    #[error("lost leadership before the command committed")]
    LostLeadership,
    #[error(transparent)]
    Apply(#[from] ApplyError),
}

impl ConsensusError {
    pub fn kind(&self) -> crate::error::ErrorKind {
        match self {
            ConsensusError::NotLeader(_) | ConsensusError::LostLeadership => {
                crate::error::ErrorKind::Unavailable
            }
            ConsensusError::Apply(e) => e.kind(),
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn request_vote(&self, peer: &str, req: VoteRequest) -> Option<VoteResponse>;
    async fn append_entries(&self, peer: &str, req: AppendRequest) -> Option<AppendResponse>;
    async fn install_snapshot(&self, peer: &str, req: SnapshotRequest) -> Option<SnapshotResponse>;
}

struct Volatile {
    role: Role,
    current_term: u64,
    voted_for: Option<String>,
    log: Vec<LogEntry>,
    commit_index: u64,
    last_applied: u64,
    leader_id: Option<String>,
    /// Leader-only: next log index to send each peer.
    next_index: HashMap<String, u64>,
    /// Leader-only: highest log index known replicated on each peer.
    match_index: HashMap<String, u64>,
    /// Index/term of the last entry folded into a snapshot. Entries at or
    /// below `last_snapshot_index` are no longer in `log`; a peer whose
    /// `next_index` falls at or below it must be caught up with
    /// `InstallSnapshot` instead of `AppendEntries`.
    last_snapshot_index: u64,
    last_snapshot_term: u64,
}

pub struct ConsensusNode {
    pub node_id: String,
    peers: Vec<String>,
    config: ConsensusConfig,
    transport: Arc<dyn Transport>,
    state: Arc<RwLock<ClusterState>>,
    volatile: Mutex<Volatile>,
    last_heartbeat_seen: Mutex<Instant>,
    commit_notify: Notify,
}

fn last_log_meta(log: &[LogEntry]) -> (u64, u64) {
    log.last().map(|e| (e.index, e.term)).unwrap_or((0, 0))
}

fn hash_id(id: &str) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    id.hash(&mut hasher);
    hasher.finish()
}

impl ConsensusNode {
    pub fn new(
        node_id: String,
        peers: Vec<String>,
        config: ConsensusConfig,
        transport: Arc<dyn Transport>,
    ) -> Arc<Self> {
        Arc::new(Self {
            node_id,
            peers,
            config,
            transport,
            state: Arc::new(RwLock::new(ClusterState::default())),
            volatile: Mutex::new(Volatile {
                role: Role::Follower,
                current_term: 0,
                voted_for: None,
                log: Vec::new(),
                commit_index: 0,
                last_applied: 0,
                leader_id: None,
                next_index: HashMap::new(),
                match_index: HashMap::new(),
                last_snapshot_index: 0,
                last_snapshot_term: 0,
            }),
            last_heartbeat_seen: Mutex::new(Instant::now()),
            commit_notify: Notify::new(),
        })
    }

    pub fn state_handle(&self) -> Arc<RwLock<ClusterState>> {
        self.state.clone()
    }

    pub async fn is_leader(&self) -> bool {
        self.volatile.lock().await.role == Role::Leader
    }

    pub async fn leader_id(&self) -> Option<String> {
        self.volatile.lock().await.leader_id.clone()
    }

    pub async fn current_term(&self) -> u64 {
        self.volatile.lock().await.current_term
    }

    fn election_timeout(&self) -> Duration {
        let (min, max) = self.config.election_timeout_range();
        let min_ms = min.as_millis() as u64;
        let max_ms = max.as_millis() as u64;
        let jittered = rand::rng().random_range(min_ms..=max_ms.max(min_ms));
        Duration::from_millis(jittered)
    }

    /// Background election-timer loop: run as a spawned task for the
    /// lifetime of the control node.
    pub async fn run_election_timer(self: Arc<Self>) {
        loop {
            let timeout = self.election_timeout();
            tokio::time::sleep(timeout).await;
            let is_leader = self.is_leader().await;
            if is_leader {
                continue;
            }
            let elapsed = self.last_heartbeat_seen.lock().await.elapsed();
            if elapsed >= timeout {
                self.start_election().await;
            }
        }
    }

    /// Background leader loop: periodic heartbeats while leader.
    pub async fn run_heartbeat_timer(self: Arc<Self>) {
        loop {
            tokio::time::sleep(self.config.heartbeat_interval()).await;
            if self.is_leader().await {
                self.replicate_to_all(true).await;
            }
        }
    }

    async fn start_election(self: &Arc<Self>) {
        // Pre-vote phase (spec.md §4.1: "pre-vote to reduce disruption"):
        // probe whether a majority would grant a real vote before bumping
        // our own term, so a partitioned node that keeps timing out doesn't
        // force spurious term increases once it rejoins.
        let (candidate_term, last_index, last_term) = {
            let v = self.volatile.lock().await;
            (v.current_term, last_log_meta(&v.log).0, last_log_meta(&v.log).1)
        };

        let pre_vote_req = VoteRequest {
            term: candidate_term + 1,
            candidate_id_hash: hash_id(&self.node_id),
            last_log_index: last_index,
            last_log_term: last_term,
            pre_vote: true,
        };
        let pre_votes = self.broadcast_vote(pre_vote_req).await;
        if !majority(pre_votes, self.peers.len() + 1) {
            debug!(node_id = %self.node_id, "pre-vote failed, staying follower");
            return;
        }

        let term = {
            let mut v = self.volatile.lock().await;
            v.current_term += 1;
            v.role = Role::Candidate;
            v.voted_for = Some(self.node_id.clone());
            v.current_term
        };
        info!(node_id = %self.node_id, term, "starting election");

        let req = VoteRequest {
            term,
            candidate_id_hash: hash_id(&self.node_id),
            last_log_index: last_index,
            last_log_term: last_term,
            pre_vote: false,
        };
        let votes = self.broadcast_vote(req).await;
        if majority(votes, self.peers.len() + 1) {
            self.become_leader(term).await;
        } else {
            let mut v = self.volatile.lock().await;
            if v.role == Role::Candidate && v.current_term == term {
                v.role = Role::Follower;
            }
        }
    }

    async fn broadcast_vote(&self, req: VoteRequest) -> usize {
        let mut granted = 1; // vote for self
        let mut futs = Vec::new();
        for peer in &self.peers {
            let transport = self.transport.clone();
            let peer = peer.clone();
            futs.push(async move { transport.request_vote(&peer, req).await });
        }
        let results = futures::future::join_all(futs).await;
        for resp in results.into_iter().flatten() {
            if resp.vote_granted {
                granted += 1;
            }
            if resp.term > req.term && !req.pre_vote {
                self.step_down_if_stale(resp.term).await;
            }
        }
        granted
    }

    async fn step_down_if_stale(&self, term: u64) {
        let mut v = self.volatile.lock().await;
        if term > v.current_term {
            v.current_term = term;
            v.role = Role::Follower;
            v.voted_for = None;
            v.leader_id = None;
        }
    }

    async fn become_leader(self: &Arc<Self>, term: u64) {
        let mut v = self.volatile.lock().await;
        if v.current_term != term {
            return;
        }
        v.role = Role::Leader;
        v.leader_id = Some(self.node_id.clone());
        let next = last_log_meta(&v.log).0 + 1;
        for peer in &self.peers {
            v.next_index.insert(peer.clone(), next);
            v.match_index.insert(peer.clone(), 0);
        }
        drop(v);
        info!(node_id = %self.node_id, term, "elected leader");
        self.replicate_to_all(true).await;
    }

    /// Replicate the log to every peer, with exponential backoff on
    /// failed `AppendEntries` RPCs (spec.md §4.1 "exponential backoff on
    /// AppendEntries failures").
    async fn replicate_to_all(self: &Arc<Self>, is_heartbeat: bool) {
        let peers = self.peers.clone();
        for peer in peers {
            let this = self.clone();
            tokio::spawn(async move { this.replicate_to_peer(&peer, is_heartbeat).await });
        }
    }

    async fn replicate_to_peer(self: &Arc<Self>, peer: &str, _is_heartbeat: bool) {
        let mut backoff = self.config.append_backoff_base_ms;
        loop {
            let needs_snapshot = {
                let v = self.volatile.lock().await;
                if v.role != Role::Leader {
                    return;
                }
                let next = *v.next_index.get(peer).unwrap_or(&1);
                v.last_snapshot_index > 0 && next <= v.last_snapshot_index
            };
            if needs_snapshot {
                self.send_snapshot(peer).await;
                return;
            }

            let (term, leader_id, prev_index, prev_term, entries, leader_commit, next) = {
                let v = self.volatile.lock().await;
                if v.role != Role::Leader {
                    return;
                }
                let next = *v.next_index.get(peer).unwrap_or(&1);
                let prev_index = next.saturating_sub(1);
                let prev_term = if prev_index == v.last_snapshot_index {
                    v.last_snapshot_term
                } else {
                    v.log
                        .iter()
                        .find(|e| e.index == prev_index)
                        .map(|e| e.term)
                        .unwrap_or(0)
                };
                let entries: Vec<LogEntry> =
                    v.log.iter().filter(|e| e.index >= next).cloned().collect();
                (
                    v.current_term,
                    self.node_id.clone(),
                    prev_index,
                    prev_term,
                    entries,
                    v.commit_index,
                    next,
                )
            };

            let req = AppendRequest {
                term,
                leader_id,
                prev_log_index: prev_index,
                prev_log_term: prev_term,
                entries: entries.clone(),
                leader_commit,
            };

            match self.transport.append_entries(peer, req).await {
                Some(resp) if resp.success => {
                    let mut v = self.volatile.lock().await;
                    if resp.term > v.current_term {
                        v.role = Role::Follower;
                        v.current_term = resp.term;
                        return;
                    }
                    let sent_through = next + entries.len() as u64 - 1;
                    v.match_index.insert(peer.to_string(), sent_through.max(next.saturating_sub(1)));
                    v.next_index.insert(peer.to_string(), sent_through + 1);
                    drop(v);
                    self.advance_commit_index().await;
                    return;
                }
                Some(resp) => {
                    let mut v = self.volatile.lock().await;
                    if resp.term > v.current_term {
                        v.role = Role::Follower;
                        v.current_term = resp.term;
                        return;
                    }
                    let retry_from = resp.conflict_index.max(1);
                    v.next_index.insert(peer.to_string(), retry_from);
                    drop(v);
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                    backoff = (backoff * 2).min(self.config.append_backoff_max_ms);
                }
                None => {
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                    backoff = (backoff * 2).min(self.config.append_backoff_max_ms);
                    if !self.is_leader().await {
                        return;
                    }
                }
            }
        }
    }

    async fn advance_commit_index(self: &Arc<Self>) {
        let mut newly_committed = Vec::new();
        {
            let mut v = self.volatile.lock().await;
            if v.role != Role::Leader {
                return;
            }
            let mut indices: Vec<u64> = v.match_index.values().copied().collect();
            indices.push(last_log_meta(&v.log).0); // leader's own log is always fully "replicated"
            indices.sort_unstable_by(|a, b| b.cmp(a));
            // `indices` has one entry per cluster member; the value at the
            // majority-quorum position is the highest index acknowledged by
            // at least half the cluster (including the leader itself).
            let candidate = indices[(indices.len() - 1) / 2];
            let current_term = v.current_term;
            if candidate > v.commit_index {
                // Only commit entries from the leader's own term directly
                // (the standard Raft safety restriction).
                if let Some(entry) = v.log.iter().find(|e| e.index == candidate) {
                    if entry.term == current_term {
                        v.commit_index = candidate;
                    }
                }
            }
            while v.last_applied < v.commit_index {
                v.last_applied += 1;
                if let Some(entry) = v.log.iter().find(|e| e.index == v.last_applied).cloned() {
                    newly_committed.push(entry);
                }
            }
        }
        if !newly_committed.is_empty() {
            let mut state = self.state.write().await;
            for entry in &newly_committed {
                if let Err(err) = apply(&mut state, &entry.command) {
                    warn!(error = %err, "command rejected during apply; log and state machine disagree");
                }
            }
            drop(state);
            self.commit_notify.notify_waiters();
        }
        self.compact_if_needed().await;
    }

    /// Fold committed entries into a snapshot once the log has grown past
    /// `snapshot_every_entries` committed entries since the last snapshot,
    /// bounding how much log a restarted or lagging follower has to
    /// replay (spec.md §2 "Snapshot transfer for the control tier").
    async fn compact_if_needed(&self) {
        let mut v = self.volatile.lock().await;
        if v.role != Role::Leader {
            return;
        }
        if v.commit_index.saturating_sub(v.last_snapshot_index) < self.config.snapshot_every_entries
        {
            return;
        }
        let new_index = v.commit_index;
        let new_term = v
            .log
            .iter()
            .find(|e| e.index == new_index)
            .map(|e| e.term)
            .unwrap_or(v.last_snapshot_term);
        v.log.retain(|e| e.index > new_index);
        v.last_snapshot_index = new_index;
        v.last_snapshot_term = new_term;
        debug!(snapshot_index = new_index, "control log compacted into snapshot");
    }

    /// Send the leader's current applied state to `peer` as a whole, then
    /// fast-forward its replication cursor past the snapshot boundary.
    async fn send_snapshot(self: &Arc<Self>, peer: &str) {
        let (term, leader_id, last_included_index, last_included_term) = {
            let v = self.volatile.lock().await;
            if v.role != Role::Leader {
                return;
            }
            (
                v.current_term,
                self.node_id.clone(),
                v.last_snapshot_index,
                v.last_snapshot_term,
            )
        };
        let data = {
            let state = self.state.read().await;
            serde_json::to_vec(&*state).unwrap_or_default()
        };
        let req = SnapshotRequest {
            term,
            leader_id,
            last_included_index,
            last_included_term,
            data,
        };
        if let Some(resp) = self.transport.install_snapshot(peer, req).await {
            let mut v = self.volatile.lock().await;
            if resp.term > v.current_term {
                v.role = Role::Follower;
                v.current_term = resp.term;
                v.leader_id = None;
                return;
            }
            v.next_index.insert(peer.to_string(), last_included_index + 1);
            v.match_index.insert(peer.to_string(), last_included_index);
        }
    }

    /// Follower-side handling of an incoming `InstallSnapshot` RPC: accept
    /// the leader's snapshot wholesale, replacing local state rather than
    /// replaying a log prefix the leader has already compacted away.
    pub async fn handle_install_snapshot(&self, req: SnapshotRequest) -> SnapshotResponse {
        *self.last_heartbeat_seen.lock().await = Instant::now();
        let mut v = self.volatile.lock().await;
        if req.term < v.current_term {
            return SnapshotResponse { term: v.current_term };
        }
        v.current_term = req.term;
        v.role = Role::Follower;
        v.leader_id = Some(req.leader_id.clone());

        if req.last_included_index <= v.last_snapshot_index {
            // Stale resend of a snapshot already installed.
            return SnapshotResponse { term: v.current_term };
        }

        let decoded: ClusterState = match serde_json::from_slice(&req.data) {
            Ok(state) => state,
            Err(err) => {
                warn!(error = %err, "install_snapshot: undecodable snapshot payload, ignoring");
                return SnapshotResponse { term: v.current_term };
            }
        };

        v.log.retain(|e| e.index > req.last_included_index);
        v.last_snapshot_index = req.last_included_index;
        v.last_snapshot_term = req.last_included_term;
        v.commit_index = v.commit_index.max(req.last_included_index);
        v.last_applied = req.last_included_index;
        let term = v.current_term;
        drop(v);

        let mut state = self.state.write().await;
        *state = decoded;
        drop(state);
        info!(last_included_index = req.last_included_index, "installed snapshot from leader");
        SnapshotResponse { term }
    }

    /// Propose a new command. Returns the resulting cluster-state version
    /// once the entry is committed and applied (spec.md §4.1 "Commands are
    /// acknowledged only after they are committed on a majority").
    pub async fn propose(self: &Arc<Self>, command: Command) -> Result<u64, ConsensusError> {
        let (term, index) = {
            let mut v = self.volatile.lock().await;
            if v.role != Role::Leader {
                return Err(ConsensusError::NotLeader(v.leader_id.clone()));
            }
            let index = last_log_meta(&v.log).0 + 1;
            let term = v.current_term;
            v.log.push(LogEntry {
                index,
                term,
                command,
            });
            (term, index)
        };
        self.replicate_to_all(false).await;

        loop {
            let notified = self.commit_notify.notified();
            let v = self.volatile.lock().await;
            if v.last_applied >= index {
                let version = self.state.read().await.version;
                return Ok(version);
            }
            if v.role != Role::Leader || v.current_term != term {
                return Err(ConsensusError::LostLeadership);
            }
            drop(v);
            let timed_out = tokio::time::timeout(Duration::from_secs(10), notified)
                .await
                .is_err();
            if timed_out {
                return Err(ConsensusError::LostLeadership);
            }
        }
    }

    /// Read-index confirmation: a leader sends a heartbeat round and waits
    /// for a majority of acks before serving a linearizable read, so a
    /// stale (partitioned-out) leader cannot answer with old data
    /// (spec.md §4.1 "Reads that require strong consistency are served by
    /// the leader after a read-index confirmation round").
    pub async fn confirm_leadership(self: &Arc<Self>) -> Result<(), ConsensusError> {
        if !self.is_leader().await {
            return Err(ConsensusError::NotLeader(self.leader_id().await));
        }
        let req_term = self.current_term().await;
        let votes = self
            .broadcast_vote(VoteRequest {
                term: req_term,
                candidate_id_hash: hash_id(&self.node_id),
                last_log_index: 0,
                last_log_term: 0,
                pre_vote: true,
            })
            .await;
        // Re-use the pre-vote RPC purely as a liveness probe: a peer on
        // the same or lower term that is reachable counts toward majority
        // regardless of its vote decision for this particular probe.
        if majority(votes.max(1), self.peers.len() + 1) || self.peers.is_empty() {
            Ok(())
        } else {
            Err(ConsensusError::LostLeadership)
        }
    }

    pub async fn handle_request_vote(&self, req: VoteRequest) -> VoteResponse {
        let mut v = self.volatile.lock().await;
        let (last_index, last_term) = last_log_meta(&v.log);
        let log_ok = req.last_log_term > last_term
            || (req.last_log_term == last_term && req.last_log_index >= last_index);

        if req.pre_vote {
            let grant = req.term > v.current_term && log_ok;
            return VoteResponse {
                term: v.current_term,
                vote_granted: grant,
            };
        }

        if req.term < v.current_term {
            return VoteResponse {
                term: v.current_term,
                vote_granted: false,
            };
        }
        if req.term > v.current_term {
            v.current_term = req.term;
            v.role = Role::Follower;
            v.voted_for = None;
        }
        let candidate_id = req.candidate_id_hash.to_string();
        let can_vote = v.voted_for.is_none() || v.voted_for.as_deref() == Some(candidate_id.as_str());
        let grant = can_vote && log_ok;
        if grant {
            v.voted_for = Some(candidate_id);
        }
        drop(v);
        if grant {
            *self.last_heartbeat_seen.lock().await = Instant::now();
        }
        VoteResponse {
            term: self.volatile.lock().await.current_term,
            vote_granted: grant,
        }
    }

    pub async fn handle_append_entries(&self, req: AppendRequest) -> AppendResponse {
        *self.last_heartbeat_seen.lock().await = Instant::now();
        let mut v = self.volatile.lock().await;
        if req.term < v.current_term {
            return AppendResponse {
                term: v.current_term,
                success: false,
                conflict_index: last_log_meta(&v.log).0 + 1,
            };
        }
        v.current_term = req.term;
        v.role = Role::Follower;
        v.leader_id = Some(req.leader_id.clone());

        if req.prev_log_index > 0 {
            let has_prev = req.prev_log_index == v.last_snapshot_index
                || v.log
                    .iter()
                    .any(|e| e.index == req.prev_log_index && e.term == req.prev_log_term);
            if !has_prev {
                let conflict_index = v
                    .log
                    .iter()
                    .find(|e| e.index == req.prev_log_index)
                    .map(|e| e.index)
                    .unwrap_or(1)
                    .max(1);
                return AppendResponse {
                    term: v.current_term,
                    success: false,
                    conflict_index,
                };
            }
        }

        v.log.retain(|e| e.index <= req.prev_log_index);
        v.log.extend(req.entries.iter().cloned());

        if req.leader_commit > v.commit_index {
            v.commit_index = req.leader_commit.min(last_log_meta(&v.log).0);
        }
        let mut newly_committed = Vec::new();
        while v.last_applied < v.commit_index {
            v.last_applied += 1;
            if let Some(entry) = v.log.iter().find(|e| e.index == v.last_applied).cloned() {
                newly_committed.push(entry);
            }
        }
        let term = v.current_term;
        drop(v);

        if !newly_committed.is_empty() {
            let mut state = self.state.write().await;
            for entry in &newly_committed {
                let _ = apply(&mut state, &entry.command);
            }
        }

        AppendResponse {
            term,
            success: true,
            conflict_index: 0,
        }
    }
}

fn majority(votes: usize, cluster_size: usize) -> bool {
    votes * 2 > cluster_size
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct NullTransport {
        reachable: AtomicBool,
    }

    #[async_trait]
    impl Transport for NullTransport {
        async fn request_vote(&self, _peer: &str, _req: VoteRequest) -> Option<VoteResponse> {
            None
        }
        async fn append_entries(&self, _peer: &str, _req: AppendRequest) -> Option<AppendResponse> {
            if self.reachable.load(Ordering::SeqCst) {
                Some(AppendResponse {
                    term: 1,
                    success: true,
                    conflict_index: 0,
                })
            } else {
                None
            }
        }
        async fn install_snapshot(&self, _peer: &str, req: SnapshotRequest) -> Option<SnapshotResponse> {
            self.reachable
                .load(Ordering::SeqCst)
                .then_some(SnapshotResponse { term: req.term })
        }
    }

    #[tokio::test]
    async fn test_single_node_cluster_self_elects() {
        let node = ConsensusNode::new(
            "n1".into(),
            vec![],
            ConsensusConfig::default(),
            Arc::new(NullTransport {
                reachable: AtomicBool::new(true),
            }),
        );
        node.clone().start_election().await;
        assert!(node.is_leader().await);
    }

    #[tokio::test]
    async fn test_single_node_propose_commits_immediately() {
        let node = ConsensusNode::new(
            "n1".into(),
            vec![],
            ConsensusConfig::default(),
            Arc::new(NullTransport {
                reachable: AtomicBool::new(true),
            }),
        );
        node.clone().start_election().await;
        let version = node
            .propose(Command::CreateIndex {
                name: "products".into(),
                num_shards: 1,
                num_replicas: 0,
                mappings: vec![],
                refresh_interval_ms: 1000,
            })
            .await
            .unwrap();
        assert_eq!(version, 1);
        assert!(node.state_handle().read().await.indices.contains_key("products"));
    }

    #[tokio::test]
    async fn test_request_vote_rejects_stale_term() {
        let node = ConsensusNode::new(
            "n1".into(),
            vec!["n2".into()],
            ConsensusConfig::default(),
            Arc::new(NullTransport {
                reachable: AtomicBool::new(false),
            }),
        );
        {
            let mut v = node.volatile.lock().await;
            v.current_term = 5;
        }
        let resp = node
            .handle_request_vote(VoteRequest {
                term: 3,
                candidate_id_hash: 1,
                last_log_index: 0,
                last_log_term: 0,
                pre_vote: false,
            })
            .await;
        assert!(!resp.vote_granted);
        assert_eq!(resp.term, 5);
    }

    #[tokio::test]
    async fn test_request_vote_refuses_second_candidate_same_term() {
        let node = ConsensusNode::new(
            "n1".into(),
            vec!["n2".into(), "n3".into()],
            ConsensusConfig::default(),
            Arc::new(NullTransport {
                reachable: AtomicBool::new(false),
            }),
        );
        let first = node
            .handle_request_vote(VoteRequest {
                term: 1,
                candidate_id_hash: 2,
                last_log_index: 0,
                last_log_term: 0,
                pre_vote: false,
            })
            .await;
        assert!(first.vote_granted);

        let second = node
            .handle_request_vote(VoteRequest {
                term: 1,
                candidate_id_hash: 3,
                last_log_index: 0,
                last_log_term: 0,
                pre_vote: false,
            })
            .await;
        assert!(!second.vote_granted);

        // the same candidate asking again in the same term is still fine
        let repeat = node
            .handle_request_vote(VoteRequest {
                term: 1,
                candidate_id_hash: 2,
                last_log_index: 0,
                last_log_term: 0,
                pre_vote: false,
            })
            .await;
        assert!(repeat.vote_granted);
    }
}
