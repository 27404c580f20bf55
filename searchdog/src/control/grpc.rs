//! [`Transport`] implementation backed by real `MasterService` gRPC calls
//! to peer control nodes, and the conversions between the wire types in
//! `searchdog-proto::master` and the in-process [`super::consensus`] types.

use async_trait::async_trait;
use dashmap::DashMap;
use tonic::transport::Channel;

use super::consensus::{
    AppendRequest, AppendResponse, LogEntry, SnapshotRequest, SnapshotResponse, Transport,
    VoteRequest, VoteResponse,
};
use searchdog_proto::master::master_service_client::MasterServiceClient;
use searchdog_proto::master::{
    AppendEntriesRequest, InstallSnapshotRequest, LogEntry as WireLogEntry, RequestVoteRequest,
};

/// Lazily-connected, cached gRPC client per peer address.
pub struct GrpcTransport {
    clients: DashMap<String, MasterServiceClient<Channel>>,
}

impl GrpcTransport {
    pub fn new() -> Self {
        Self {
            clients: DashMap::new(),
        }
    }

    async fn client(&self, peer: &str) -> Option<MasterServiceClient<Channel>> {
        if let Some(existing) = self.clients.get(peer) {
            return Some(existing.clone());
        }
        let endpoint = format!("http://{peer}");
        let client = MasterServiceClient::connect(endpoint).await.ok()?;
        self.clients.insert(peer.to_string(), client.clone());
        Some(client)
    }
}

impl Default for GrpcTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn encode_command(command: &crate::control::command::Command) -> Vec<u8> {
    serde_json::to_vec(command).unwrap_or_default()
}

pub fn decode_command(bytes: &[u8]) -> Option<crate::control::command::Command> {
    serde_json::from_slice(bytes).ok()
}

#[async_trait]
impl Transport for GrpcTransport {
    async fn request_vote(&self, peer: &str, req: VoteRequest) -> Option<VoteResponse> {
        let mut client = self.client(peer).await?;
        let resp = client
            .request_vote(RequestVoteRequest {
                term: req.term,
                candidate_id: req.candidate_id_hash.to_string(),
                last_log_index: req.last_log_index,
                last_log_term: req.last_log_term,
                pre_vote: req.pre_vote,
            })
            .await
            .ok()?
            .into_inner();
        Some(VoteResponse {
            term: resp.term,
            vote_granted: resp.vote_granted,
        })
    }

    async fn append_entries(&self, peer: &str, req: AppendRequest) -> Option<AppendResponse> {
        let mut client = self.client(peer).await?;
        let entries = req
            .entries
            .iter()
            .map(|e| WireLogEntry {
                index: e.index,
                term: e.term,
                command: encode_command(&e.command),
            })
            .collect();
        let resp = client
            .append_entries(AppendEntriesRequest {
                term: req.term,
                leader_id: req.leader_id,
                prev_log_index: req.prev_log_index,
                prev_log_term: req.prev_log_term,
                entries,
                leader_commit: req.leader_commit,
            })
            .await
            .ok()?
            .into_inner();
        Some(AppendResponse {
            term: resp.term,
            success: resp.success,
            conflict_index: resp.conflict_index,
        })
    }

    async fn install_snapshot(&self, peer: &str, req: SnapshotRequest) -> Option<SnapshotResponse> {
        let mut client = self.client(peer).await?;
        let resp = client
            .install_snapshot(InstallSnapshotRequest {
                term: req.term,
                leader_id: req.leader_id,
                last_included_index: req.last_included_index,
                last_included_term: req.last_included_term,
                data: req.data,
            })
            .await
            .ok()?
            .into_inner();
        Some(SnapshotResponse { term: resp.term })
    }
}

pub(super) fn decode_entries(entries: Vec<WireLogEntry>) -> Vec<LogEntry> {
    entries
        .into_iter()
        .filter_map(|e| {
            decode_command(&e.command).map(|command| LogEntry {
                index: e.index,
                term: e.term,
                command,
            })
        })
        .collect()
}
