// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Hub Server
//!
//! The hub process: one local TCP endpoint speaking newline-delimited JSON.
//!
//! Two kinds of peers connect:
//! - **front ends and probes** send requests (`HEALTH_CHECK`, `user_request`,
//!   ...) and read one reply per request;
//! - **agent workers** send `REGISTER_AGENT` once, after which the hub writes
//!   routed `user_request` lines to them and reads `agent_response`,
//!   `specialist_response` or `error` lines back, correlated by `request_id`.
//!   Only the worker a request went to may answer it.
//!
//! A routed request waits for its worker's reply up to the relay timeout.
//! A worker that disconnects (or is replaced by a newer registration for the
//! same agent) fails every request still waiting on it.

use chrono::Utc;
use futures::{SinkExt, StreamExt};
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio_util::codec::{Framed, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::agent::{AgentId, AgentTable};
use crate::domain::error::HubResult;
use crate::domain::protocol::{encode, HubReply, HubRequest, RequestEnvelope, PROTOCOL_VERSION};
use crate::infrastructure::hub_client::MAX_FRAME_LEN;

pub const DEFAULT_RELAY_TIMEOUT: Duration = Duration::from_millis(2500);

const WORKER_QUEUE: usize = 32;

struct WorkerHandle {
    id: u64,
    outbox: mpsc::Sender<String>,
}

struct PendingRelay {
    worker: u64,
    reply: oneshot::Sender<HubReply>,
}

struct HubState {
    started: Instant,
    table: Arc<AgentTable>,
    relay_timeout: Duration,
    /// Registered instance ids with the number of connections using each
    instances: RwLock<BTreeMap<String, usize>>,
    workers: Mutex<HashMap<AgentId, WorkerHandle>>,
    pending: Mutex<HashMap<Uuid, PendingRelay>>,
    next_worker: AtomicU64,
}

/// Per-connection role, fixed by the first registration it sends.
#[derive(Default)]
struct Session {
    instance: Option<String>,
    worker: Option<(AgentId, u64, mpsc::Receiver<String>)>,
}

pub struct HubServer {
    listener: TcpListener,
    table: AgentTable,
    relay_timeout: Duration,
}

impl HubServer {
    pub async fn bind(addr: &str, table: AgentTable) -> HubResult<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            table,
            relay_timeout: DEFAULT_RELAY_TIMEOUT,
        })
    }

    /// How long a routed request waits for its worker.
    pub fn with_relay_timeout(mut self, timeout: Duration) -> Self {
        self.relay_timeout = timeout;
        self
    }

    pub fn local_addr(&self) -> HubResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` is cancelled.
    pub async fn serve(self, shutdown: CancellationToken) -> HubResult<()> {
        info!("Hub listening on {}", self.local_addr()?);

        let state = Arc::new(HubState {
            started: Instant::now(),
            table: Arc::new(self.table),
            relay_timeout: self.relay_timeout,
            instances: RwLock::new(BTreeMap::new()),
            workers: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            next_worker: AtomicU64::new(1),
        });

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let state = state.clone();
                        let token = shutdown.child_token();
                        tokio::spawn(async move {
                            handle_connection(state, stream, peer, token).await;
                        });
                    }
                    Err(e) => warn!("Failed to accept connection: {}", e),
                },
            }
        }

        info!("Hub shutting down");
        Ok(())
    }
}

async fn handle_connection(state: Arc<HubState>, stream: TcpStream, peer: SocketAddr, shutdown: CancellationToken) {
    debug!(%peer, "Connection opened");
    let mut framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_FRAME_LEN));
    let mut session = Session::default();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            relayed = async {
                match session.worker.as_mut() {
                    Some((_, _, inbox)) => inbox.recv().await,
                    None => std::future::pending::<Option<String>>().await,
                }
            } => match relayed {
                Some(line) => {
                    if let Err(e) = framed.send(line).await {
                        warn!(%peer, "Failed to relay request to worker: {}", e);
                        break;
                    }
                }
                None => {
                    // Replaced by a newer worker for the same agent
                    if let Some((agent, _, _)) = session.worker.take() {
                        info!(%peer, agent = %agent, "Worker superseded; connection stays open");
                    }
                }
            },
            incoming = framed.next() => match incoming {
                Some(Ok(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    if let Some(reply) = handle_line(&state, &mut session, &line).await {
                        let encoded = match encode(&reply) {
                            Ok(encoded) => encoded,
                            Err(e) => {
                                error!("Failed to encode reply: {}", e);
                                continue;
                            }
                        };
                        if let Err(e) = framed.send(encoded).await {
                            debug!(%peer, "Failed to write reply: {}", e);
                            break;
                        }
                    }
                }
                Some(Err(e)) => {
                    warn!(%peer, "Dropping connection: {}", e);
                    break;
                }
                None => break,
            },
        }
    }

    cleanup_session(&state, session).await;
    debug!(%peer, "Connection closed");
}

/// Returns the reply to write back, if any. Worker replies are consumed by
/// the relay and produce nothing on the worker's own connection.
async fn handle_line(state: &HubState, session: &mut Session, line: &str) -> Option<HubReply> {
    if let Some((agent, worker, _)) = &session.worker {
        if let Ok(reply) = serde_json::from_str::<HubReply>(line) {
            complete_relay(state, agent, *worker, reply).await;
            return None;
        }
    }

    let request = match serde_json::from_str::<HubRequest>(line) {
        Ok(request) => request,
        Err(e) => return Some(HubReply::error(format!("Invalid request: {}", e))),
    };

    metrics::counter!("ensemble_hub_requests_total", "type" => request.name()).increment(1);
    Some(dispatch(state, session, request).await)
}

async fn dispatch(state: &HubState, session: &mut Session, request: HubRequest) -> HubReply {
    let uptime_seconds = state.started.elapsed().as_secs();

    match request {
        HubRequest::HealthCheck => HubReply::HealthResponse {
            status: "healthy".to_string(),
            uptime_seconds,
            version: PROTOCOL_VERSION.to_string(),
        },
        HubRequest::StatusCheck => {
            let instances = state.instances.read().await.len();
            let mut agents_connected: Vec<AgentId> = state.workers.lock().await.keys().cloned().collect();
            agents_connected.sort();
            HubReply::StatusResponse {
                uptime_seconds,
                instances,
                agents_connected,
            }
        }
        HubRequest::GetConnections => {
            let instances: Vec<String> = state.instances.read().await.keys().cloned().collect();
            HubReply::Connections {
                count: instances.len(),
                instances,
            }
        }
        HubRequest::GetUptime => HubReply::Uptime { uptime_seconds },
        HubRequest::GetVersion => HubReply::Version {
            version: PROTOCOL_VERSION.to_string(),
        },
        HubRequest::Ping => HubReply::Pong { timestamp: Utc::now() },
        HubRequest::RegisterInstance {
            instance_id,
            project_path,
        } => {
            info!(instance = %instance_id, project = ?project_path, "Instance registered");
            let mut instances = state.instances.write().await;
            if let Some(previous) = session.instance.replace(instance_id.clone()) {
                release_instance(&mut instances, &previous);
            }
            *instances.entry(instance_id.clone()).or_insert(0) += 1;
            HubReply::Registered { id: instance_id }
        }
        HubRequest::ListAgents => HubReply::AgentList {
            agents: state.table.agents().to_vec(),
        },
        HubRequest::RegisterAgent { agent_id } => register_worker(state, session, agent_id).await,
        HubRequest::UserRequest(envelope) => relay(state, envelope).await,
    }
}

async fn register_worker(state: &HubState, session: &mut Session, agent: AgentId) -> HubReply {
    if state.table.get(&agent).is_none() {
        return HubReply::error(format!("Unknown agent '{}'", agent));
    }
    if session.worker.is_some() {
        return HubReply::error("Connection is already registered as a worker");
    }

    let id = state.next_worker.fetch_add(1, Ordering::Relaxed);
    let (outbox, inbox) = mpsc::channel(WORKER_QUEUE);
    let previous = state
        .workers
        .lock()
        .await
        .insert(agent.clone(), WorkerHandle { id, outbox });

    if let Some(previous) = previous {
        warn!(agent = %agent, "Replacing previously registered worker");
        fail_pending_for(state, previous.id).await;
    }

    info!(agent = %agent, worker = id, "Agent worker registered");
    session.worker = Some((agent.clone(), id, inbox));
    HubReply::Registered { id: agent.to_string() }
}

async fn relay(state: &HubState, envelope: RequestEnvelope) -> HubReply {
    let agent = envelope.agent.clone();
    let request_id = envelope.request_id;

    if state.table.get(&agent).is_none() {
        return HubReply::error(format!("Unknown agent '{}'", agent));
    }

    let worker = state
        .workers
        .lock()
        .await
        .get(&agent)
        .map(|w| (w.id, w.outbox.clone()));
    let Some((worker_id, outbox)) = worker else {
        return HubReply::error(format!("No worker connected for agent '{}'", agent));
    };

    let line = match encode(&HubRequest::UserRequest(envelope)) {
        Ok(line) => line,
        Err(e) => return HubReply::error(format!("Failed to encode request: {}", e)),
    };

    let (reply_tx, reply_rx) = oneshot::channel();
    match state.pending.lock().await.entry(request_id) {
        Entry::Occupied(_) => {
            warn!(agent = %agent, %request_id, "Duplicate request id rejected");
            return HubReply::error(format!("Request {} is already in flight", request_id));
        }
        Entry::Vacant(slot) => {
            slot.insert(PendingRelay {
                worker: worker_id,
                reply: reply_tx,
            });
        }
    }

    if outbox.send(line).await.is_err() {
        state.pending.lock().await.remove(&request_id);
        return HubReply::error(format!("Worker for agent '{}' is gone", agent));
    }
    debug!(agent = %agent, %request_id, "Relayed request to worker");

    match tokio::time::timeout(state.relay_timeout, reply_rx).await {
        Ok(Ok(reply)) => reply,
        Ok(Err(_)) => HubReply::error(format!("Worker for agent '{}' disconnected", agent)),
        Err(_) => {
            state.pending.lock().await.remove(&request_id);
            warn!(agent = %agent, %request_id, "Worker did not answer in time");
            HubReply::error(format!(
                "Agent '{}' did not answer within {:?}",
                agent, state.relay_timeout
            ))
        }
    }
}

/// Hand a worker's reply to the waiting requester. Only the worker the
/// request was relayed to may answer it.
async fn complete_relay(state: &HubState, agent: &AgentId, worker: u64, reply: HubReply) {
    let Some(request_id) = reply.request_id() else {
        warn!(agent = %agent, "Worker reply without request_id dropped");
        return;
    };
    let mut pending = state.pending.lock().await;
    match pending.entry(request_id) {
        Entry::Occupied(slot) if slot.get().worker == worker => {
            // Receiver may have timed out in the meantime
            let _ = slot.remove().reply.send(reply);
        }
        Entry::Occupied(_) => {
            warn!(agent = %agent, %request_id, "Reply from a worker that was not asked dropped");
        }
        Entry::Vacant(_) => debug!(agent = %agent, %request_id, "Late or unknown worker reply dropped"),
    }
}

fn release_instance(instances: &mut BTreeMap<String, usize>, instance: &str) {
    if let Some(count) = instances.get_mut(instance) {
        *count -= 1;
        if *count == 0 {
            instances.remove(instance);
        }
    }
}

/// Drop every pending relay owned by `worker`; their waiters see a closed channel.
async fn fail_pending_for(state: &HubState, worker: u64) {
    state.pending.lock().await.retain(|_, pending| pending.worker != worker);
}

async fn cleanup_session(state: &HubState, session: Session) {
    if let Some(instance) = session.instance {
        release_instance(&mut *state.instances.write().await, &instance);
        info!(instance = %instance, "Instance disconnected");
    }

    if let Some((agent, id, _)) = session.worker {
        let mut workers = state.workers.lock().await;
        if workers.get(&agent).is_some_and(|w| w.id == id) {
            workers.remove(&agent);
            info!(agent = %agent, "Agent worker disconnected");
        }
        drop(workers);
        fail_pending_for(state, id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::protocol::AgentReply;
    use crate::infrastructure::hub_client::HubClient;

    type Conn = Framed<TcpStream, LinesCodec>;

    async fn start_hub(relay_timeout: Duration) -> (String, CancellationToken) {
        let server = HubServer::bind("127.0.0.1:0", AgentTable::builtin())
            .await
            .unwrap()
            .with_relay_timeout(relay_timeout);
        let addr = server.local_addr().unwrap().to_string();
        let token = CancellationToken::new();
        tokio::spawn(server.serve(token.clone()));
        (addr, token)
    }

    async fn connect(addr: &str) -> Conn {
        Framed::new(TcpStream::connect(addr).await.unwrap(), LinesCodec::new())
    }

    async fn exchange(conn: &mut Conn, line: &str) -> serde_json::Value {
        conn.send(line.to_string()).await.unwrap();
        let reply = conn.next().await.unwrap().unwrap();
        serde_json::from_str(&reply).unwrap()
    }

    async fn register_worker(addr: &str, agent: &str) -> Conn {
        let mut worker = connect(addr).await;
        let reply = exchange(&mut worker, &format!(r#"{{"type":"REGISTER_AGENT","agent_id":"{}"}}"#, agent)).await;
        assert_eq!(reply["type"], "registered");
        worker
    }

    /// Answer one routed request with a fixed reply.
    async fn answer_one(worker: &mut Conn, name: &str, content: &str) -> RequestEnvelope {
        let line = worker.next().await.unwrap().unwrap();
        let request: HubRequest = serde_json::from_str(&line).unwrap();
        let HubRequest::UserRequest(envelope) = request else {
            panic!("expected user_request, got {}", line);
        };
        let reply = HubReply::AgentResponse {
            request_id: Some(envelope.request_id),
            reply: AgentReply {
                emoji: String::new(),
                name: name.to_string(),
                content: content.to_string(),
            },
        };
        worker.send(encode(&reply).unwrap()).await.unwrap();
        envelope
    }

    #[tokio::test]
    async fn test_answers_basic_requests() {
        let (addr, token) = start_hub(DEFAULT_RELAY_TIMEOUT).await;
        let mut conn = connect(&addr).await;

        let health = exchange(&mut conn, r#"{"type":"HEALTH_CHECK"}"#).await;
        assert_eq!(health["type"], "health_response");
        assert_eq!(health["status"], "healthy");
        assert_eq!(health["version"], PROTOCOL_VERSION);

        assert_eq!(exchange(&mut conn, r#"{"type":"PING"}"#).await["type"], "pong");
        assert_eq!(exchange(&mut conn, r#"{"type":"GET_VERSION"}"#).await["version"], PROTOCOL_VERSION);
        assert_eq!(exchange(&mut conn, r#"{"type":"GET_UPTIME"}"#).await["type"], "uptime");

        let agents = exchange(&mut conn, r#"{"type":"LIST_AGENTS"}"#).await;
        assert_eq!(agents["agents"][0]["id"], "alex");

        token.cancel();
    }

    #[tokio::test]
    async fn test_invalid_json_keeps_connection_open() {
        let (addr, token) = start_hub(DEFAULT_RELAY_TIMEOUT).await;
        let mut conn = connect(&addr).await;

        let reply = exchange(&mut conn, "this is not json").await;
        assert_eq!(reply["type"], "error");

        let reply = exchange(&mut conn, r#"{"type":"NOT_A_COMMAND"}"#).await;
        assert_eq!(reply["type"], "error");

        let health = exchange(&mut conn, r#"{"type":"HEALTH_CHECK"}"#).await;
        assert_eq!(health["type"], "health_response");
        token.cancel();
    }

    #[tokio::test]
    async fn test_instance_registry_follows_connections() {
        let (addr, token) = start_hub(DEFAULT_RELAY_TIMEOUT).await;
        let mut instance = connect(&addr).await;
        let reply = exchange(
            &mut instance,
            r#"{"type":"REGISTER_INSTANCE","instance_id":"editor-1","project_path":"/src/app"}"#,
        )
        .await;
        assert_eq!(reply["id"], "editor-1");

        let mut observer = connect(&addr).await;
        let connections = exchange(&mut observer, r#"{"type":"GET_CONNECTIONS"}"#).await;
        assert_eq!(connections["count"], 1);
        assert_eq!(connections["instances"][0], "editor-1");

        drop(instance);
        tokio::time::sleep(Duration::from_millis(100)).await;
        let status = exchange(&mut observer, r#"{"type":"STATUS_CHECK"}"#).await;
        assert_eq!(status["instances"], 0);
        token.cancel();
    }

    #[tokio::test]
    async fn test_relays_user_request_to_worker() {
        let (addr, token) = start_hub(DEFAULT_RELAY_TIMEOUT).await;
        let mut worker = register_worker(&addr, "sherlock").await;

        let worker_task = tokio::spawn(async move {
            let envelope = answer_one(&mut worker, "Sherlock", "found it").await;
            (envelope, worker)
        });

        let client = HubClient::new(addr.clone(), Duration::from_secs(3));
        let envelope = RequestEnvelope::new("cli", AgentId::new("sherlock"), "check this bug", None);
        let request_id = envelope.request_id;
        let reply = client.send(&HubRequest::UserRequest(envelope)).await.unwrap();

        match reply {
            HubReply::AgentResponse { request_id: rid, reply } => {
                assert_eq!(rid, Some(request_id));
                assert_eq!(reply.content, "found it");
            }
            other => panic!("unexpected reply: {:?}", other),
        }
        let (seen, _worker) = worker_task.await.unwrap();
        assert_eq!(seen.message, "check this bug");

        let status = client.send(&HubRequest::StatusCheck).await.unwrap();
        assert!(matches!(
            status,
            HubReply::StatusResponse { ref agents_connected, .. } if agents_connected == &vec![AgentId::new("sherlock")]
        ));
        token.cancel();
    }

    #[tokio::test]
    async fn test_user_request_without_worker_is_an_error() {
        let (addr, token) = start_hub(DEFAULT_RELAY_TIMEOUT).await;
        let client = HubClient::new(addr, Duration::from_secs(1));

        let envelope = RequestEnvelope::new("cli", AgentId::new("marie"), "metrics report", None);
        let reply = client.send(&HubRequest::UserRequest(envelope)).await.unwrap();
        assert!(matches!(reply, HubReply::Error { ref message, .. } if message.contains("marie")));
        token.cancel();
    }

    #[tokio::test]
    async fn test_unknown_agent_registration_is_rejected() {
        let (addr, token) = start_hub(DEFAULT_RELAY_TIMEOUT).await;
        let mut conn = connect(&addr).await;
        let reply = exchange(&mut conn, r#"{"type":"REGISTER_AGENT","agent_id":"moriarty"}"#).await;
        assert_eq!(reply["type"], "error");
        token.cancel();
    }

    #[tokio::test]
    async fn test_silent_worker_hits_relay_timeout() {
        let (addr, token) = start_hub(Duration::from_millis(200)).await;
        let _worker = register_worker(&addr, "edison").await;

        let client = HubClient::new(addr, Duration::from_secs(2));
        let envelope = RequestEnvelope::new("cli", AgentId::new("edison"), "implement it", None);
        let reply = client.send(&HubRequest::UserRequest(envelope)).await.unwrap();

        assert!(matches!(reply, HubReply::Error { ref message, .. } if message.contains("did not answer")));
        token.cancel();
    }

    #[tokio::test]
    async fn test_worker_disconnect_fails_pending_request() {
        let (addr, token) = start_hub(Duration::from_secs(5)).await;
        let mut worker = register_worker(&addr, "leonardo").await;

        let worker_task = tokio::spawn(async move {
            // Read the request, then hang up without answering
            let _ = worker.next().await;
        });

        let client = HubClient::new(addr, Duration::from_secs(3));
        let envelope = RequestEnvelope::new("cli", AgentId::new("leonardo"), "architecture?", None);
        let started = std::time::Instant::now();
        let reply = client.send(&HubRequest::UserRequest(envelope)).await.unwrap();
        worker_task.await.unwrap();

        assert!(matches!(reply, HubReply::Error { ref message, .. } if message.contains("disconnected")));
        assert!(started.elapsed() < Duration::from_secs(3));
        token.cancel();
    }

    #[tokio::test]
    async fn test_newer_worker_replaces_older() {
        let (addr, token) = start_hub(DEFAULT_RELAY_TIMEOUT).await;
        let _old = register_worker(&addr, "alex").await;
        let mut new = register_worker(&addr, "alex").await;

        let worker_task = tokio::spawn(async move {
            answer_one(&mut new, "Alex", "from the new worker").await;
            new
        });

        let client = HubClient::new(addr, Duration::from_secs(3));
        let envelope = RequestEnvelope::new("cli", AgentId::new("alex"), "roadmap?", None);
        let reply = client.send(&HubRequest::UserRequest(envelope)).await.unwrap();

        assert!(matches!(
            reply,
            HubReply::AgentResponse { ref reply, .. } if reply.content == "from the new worker"
        ));
        let _new = worker_task.await.unwrap();
        token.cancel();
    }

    #[tokio::test]
    async fn test_instance_ids_are_counted_per_connection() {
        let (addr, token) = start_hub(DEFAULT_RELAY_TIMEOUT).await;
        let mut first = connect(&addr).await;
        exchange(&mut first, r#"{"type":"REGISTER_INSTANCE","instance_id":"editor-1"}"#).await;
        exchange(&mut first, r#"{"type":"REGISTER_INSTANCE","instance_id":"editor-2"}"#).await;

        let mut second = connect(&addr).await;
        exchange(&mut second, r#"{"type":"REGISTER_INSTANCE","instance_id":"editor-2"}"#).await;

        let mut observer = connect(&addr).await;
        let connections = exchange(&mut observer, r#"{"type":"GET_CONNECTIONS"}"#).await;
        assert_eq!(connections["count"], 1);
        assert_eq!(connections["instances"][0], "editor-2");

        drop(first);
        tokio::time::sleep(Duration::from_millis(100)).await;
        let connections = exchange(&mut observer, r#"{"type":"GET_CONNECTIONS"}"#).await;
        assert_eq!(connections["instances"][0], "editor-2");

        drop(second);
        tokio::time::sleep(Duration::from_millis(100)).await;
        let status = exchange(&mut observer, r#"{"type":"STATUS_CHECK"}"#).await;
        assert_eq!(status["instances"], 0);
        token.cancel();
    }

    #[tokio::test]
    async fn test_only_the_addressed_worker_can_answer() {
        let (addr, token) = start_hub(Duration::from_secs(2)).await;
        let mut sherlock = register_worker(&addr, "sherlock").await;
        let mut edison = register_worker(&addr, "edison").await;

        let envelope = RequestEnvelope::new("cli", AgentId::new("sherlock"), "who broke the build?", None);
        let request_id = envelope.request_id;

        let intruder = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let forged = HubReply::AgentResponse {
                request_id: Some(request_id),
                reply: AgentReply {
                    emoji: String::new(),
                    name: "Edison".to_string(),
                    content: "forged".to_string(),
                },
            };
            edison.send(encode(&forged).unwrap()).await.unwrap();
            edison
        });
        let addressed = tokio::spawn(async move {
            let line = sherlock.next().await.unwrap().unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
            let HubRequest::UserRequest(envelope) = serde_json::from_str(&line).unwrap() else {
                panic!("expected user_request, got {}", line);
            };
            let reply = HubReply::AgentResponse {
                request_id: Some(envelope.request_id),
                reply: AgentReply {
                    emoji: String::new(),
                    name: "Sherlock".to_string(),
                    content: "the parser change".to_string(),
                },
            };
            sherlock.send(encode(&reply).unwrap()).await.unwrap();
            sherlock
        });

        let client = HubClient::new(addr, Duration::from_secs(3));
        let reply = client.send(&HubRequest::UserRequest(envelope)).await.unwrap();

        assert!(matches!(
            reply,
            HubReply::AgentResponse { ref reply, .. } if reply.name == "Sherlock" && reply.content == "the parser change"
        ));
        let _edison = intruder.await.unwrap();
        let _sherlock = addressed.await.unwrap();
        token.cancel();
    }

    #[tokio::test]
    async fn test_in_flight_request_id_cannot_be_reused() {
        let (addr, token) = start_hub(Duration::from_secs(2)).await;
        let mut worker = register_worker(&addr, "marie").await;

        let envelope = RequestEnvelope::new("cli", AgentId::new("marie"), "metrics report", None);
        let duplicate = envelope.clone();

        let first_client = HubClient::new(addr.clone(), Duration::from_secs(3));
        let first = tokio::spawn(async move { first_client.send(&HubRequest::UserRequest(envelope)).await });

        // The first request is now waiting on the worker
        let line = worker.next().await.unwrap().unwrap();

        let second_client = HubClient::new(addr, Duration::from_secs(3));
        let rejected = second_client.send(&HubRequest::UserRequest(duplicate)).await.unwrap();
        assert!(matches!(rejected, HubReply::Error { ref message, .. } if message.contains("already in flight")));

        let HubRequest::UserRequest(seen) = serde_json::from_str(&line).unwrap() else {
            panic!("expected user_request, got {}", line);
        };
        let reply = HubReply::AgentResponse {
            request_id: Some(seen.request_id),
            reply: AgentReply {
                emoji: String::new(),
                name: "Marie".to_string(),
                content: "numbers are up".to_string(),
            },
        };
        worker.send(encode(&reply).unwrap()).await.unwrap();

        let answered = first.await.unwrap().unwrap();
        assert!(matches!(answered, HubReply::AgentResponse { ref reply, .. } if reply.content == "numbers are up"));
        token.cancel();
    }

    #[tokio::test]
    async fn test_worker_error_fails_its_request_without_waiting() {
        let (addr, token) = start_hub(Duration::from_secs(5)).await;
        let mut worker = register_worker(&addr, "leonardo").await;

        let worker_task = tokio::spawn(async move {
            let line = worker.next().await.unwrap().unwrap();
            let HubRequest::UserRequest(envelope) = serde_json::from_str(&line).unwrap() else {
                panic!("expected user_request, got {}", line);
            };
            let failure = HubReply::Error {
                message: "design tool crashed".to_string(),
                request_id: Some(envelope.request_id),
            };
            worker.send(encode(&failure).unwrap()).await.unwrap();
            worker
        });

        let client = HubClient::new(addr, Duration::from_secs(3));
        let envelope = RequestEnvelope::new("cli", AgentId::new("leonardo"), "architecture?", None);
        let started = std::time::Instant::now();
        let reply = client.send(&HubRequest::UserRequest(envelope)).await.unwrap();

        assert!(matches!(reply, HubReply::Error { ref message, .. } if message == "design tool crashed"));
        assert!(started.elapsed() < Duration::from_secs(2));
        let _worker = worker_task.await.unwrap();
        token.cancel();
    }
}
