// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Integration tests for message routing through a live hub
//!
//! The router classifies free text, the hub relays it to a registered agent
//! worker, and the worker's reply comes back as a response envelope.

use futures::{SinkExt, StreamExt};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec};
use tokio_util::sync::CancellationToken;

use ensemble_core::application::router::{EnvelopeStatus, MessageRouter};
use ensemble_core::domain::agent::{AgentId, AgentTable};
use ensemble_core::domain::protocol::{encode, AgentReply, HubReply, HubRequest, RequestEnvelope};
use ensemble_core::infrastructure::hub_client::HubClient;
use ensemble_core::presentation::hub_server::HubServer;

type Conn = Framed<TcpStream, LinesCodec>;

async fn start_hub() -> (String, CancellationToken) {
    let server = HubServer::bind("127.0.0.1:0", AgentTable::builtin())
        .await
        .unwrap()
        .with_relay_timeout(Duration::from_millis(500));
    let addr = server.local_addr().unwrap().to_string();
    let token = CancellationToken::new();
    tokio::spawn(server.serve(token.clone()));
    (addr, token)
}

fn router(addr: &str) -> MessageRouter {
    MessageRouter::new(
        Arc::new(AgentTable::builtin()),
        HubClient::new(addr, Duration::from_secs(1)),
    )
    .with_instance_id("ensemble-test")
}

async fn register_worker(addr: &str, agent: &str) -> Conn {
    let mut worker = Framed::new(TcpStream::connect(addr).await.unwrap(), LinesCodec::new());
    let register = HubRequest::RegisterAgent {
        agent_id: AgentId::new(agent),
    };
    worker.send(encode(&register).unwrap()).await.unwrap();
    let reply: HubReply = serde_json::from_str(&worker.next().await.unwrap().unwrap()).unwrap();
    assert!(matches!(reply, HubReply::Registered { .. }));
    worker
}

/// Receive one routed request and answer it with `build(envelope)`.
async fn answer_with<F>(mut worker: Conn, build: F) -> RequestEnvelope
where
    F: FnOnce(&RequestEnvelope) -> HubReply,
{
    let line = worker.next().await.unwrap().unwrap();
    let HubRequest::UserRequest(envelope) = serde_json::from_str(&line).unwrap() else {
        panic!("expected user_request, got {}", line);
    };
    worker.send(encode(&build(&envelope)).unwrap()).await.unwrap();
    envelope
}

fn reply(emoji: &str, name: &str, content: &str) -> AgentReply {
    AgentReply {
        emoji: emoji.to_string(),
        name: name.to_string(),
        content: content.to_string(),
    }
}

#[tokio::test]
async fn test_addressed_text_reaches_the_named_agent() {
    let (addr, token) = start_hub().await;
    let worker = register_worker(&addr, "sherlock").await;
    let worker_task = tokio::spawn(answer_with(worker, |envelope| HubReply::AgentResponse {
        request_id: Some(envelope.request_id),
        reply: reply("🔍", "Sherlock", "two flaky tests found"),
    }));

    let envelope = router(&addr)
        .route("sherlock, can you check the test suite?", Some(Path::new("/src/app")))
        .await
        .unwrap();

    assert_eq!(envelope.status, EnvelopeStatus::Ok);
    assert_eq!(envelope.render(), "🔍 Sherlock: two flaky tests found");

    let request = worker_task.await.unwrap();
    assert_eq!(request.message, "sherlock, can you check the test suite?");
    assert_eq!(request.instance_id, "ensemble-test");
    assert_eq!(request.project_path.as_deref(), Some("/src/app"));
    token.cancel();
}

#[tokio::test]
async fn test_specialist_reply_is_folded_into_primary_content() {
    let (addr, token) = start_hub().await;
    let worker = register_worker(&addr, "alex").await;
    let worker_task = tokio::spawn(answer_with(worker, |envelope| HubReply::SpecialistResponse {
        request_id: Some(envelope.request_id),
        primary: reply("🎯", "Alex", "handing this to Edison"),
        specialist: reply("🔧", "Edison", "patched the parser"),
    }));

    let envelope = router(&addr).route("hello team", None).await.unwrap();

    assert!(envelope.is_ok());
    assert_eq!(envelope.name, "Alex");
    assert_eq!(
        envelope.content,
        "handing this to Edison\n\n🔧 Edison: patched the parser"
    );
    worker_task.await.unwrap();
    token.cancel();
}

#[tokio::test]
async fn test_agent_without_worker_yields_error_envelope() {
    let (addr, token) = start_hub().await;

    let envelope = router(&addr).route("edison please implement this", None).await.unwrap();

    assert_eq!(envelope.status, EnvelopeStatus::Error);
    assert!(envelope.content.contains("edison"));
    token.cancel();
}

#[tokio::test]
async fn test_plain_text_is_not_routed() {
    let (addr, token) = start_hub().await;
    assert!(router(&addr).route("just thinking out loud", None).await.is_none());
    token.cancel();
}
