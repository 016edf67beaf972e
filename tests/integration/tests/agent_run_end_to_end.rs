use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use httpmock::prelude::*;
use nexus_agent::{
    AgentApiClient, AgentApiConfig, HttpStreamTransport, StreamTransportConfig,
    StreamTransportMode,
};
use nexus_chain::{
    AccountMeta, Hash, Instruction, KeypairSigner, Message, Pubkey, RpcClient, RpcClientConfig,
    SigningContext, Transaction, TransactionSigner,
};
use nexus_orchestrator::{
    BroadcastRoute, RelayBroadcaster, RoutedBroadcaster, RunOrchestrator, RunOrchestratorConfig,
    RunPhase, RunSnapshot,
};
use nexus_policy::{
    derive_policy_addresses, load_policy, FileKeyValueStore, PolicyManager, PolicyVaultClient,
    Protocol, SavePolicyInput, VaultPolicySync,
};
use serde_json::json;
use tokio::sync::watch;

const API_KEY: &str = "e2e-key";

fn agent_client(server: &MockServer) -> Arc<AgentApiClient> {
    Arc::new(
        AgentApiClient::new(AgentApiConfig {
            api_base: format!("{}/api", server.base_url()),
            api_key: API_KEY.to_string(),
            request_timeout_ms: 5_000,
        })
        .expect("agent client"),
    )
}

fn polling_transport(server: &MockServer) -> Arc<HttpStreamTransport> {
    Arc::new(
        HttpStreamTransport::new(&StreamTransportConfig {
            api_base: format!("{}/api", server.base_url()),
            api_key: API_KEY.to_string(),
            mode: StreamTransportMode::Polling,
            ..StreamTransportConfig::default()
        })
        .expect("transport"),
    )
}

fn rpc_client(server: &MockServer) -> Arc<RpcClient> {
    Arc::new(
        RpcClient::new(RpcClientConfig {
            endpoint: server.url("/"),
            request_timeout_ms: 5_000,
            ..RpcClientConfig::default()
        })
        .expect("rpc client"),
    )
}

fn swap_transaction(payer: Pubkey) -> Transaction {
    let instruction = Instruction::new(
        Pubkey::new_from_array([61; 32]),
        vec![9, 9, 9],
        vec![
            AccountMeta::new(payer, true),
            AccountMeta::new_readonly(Pubkey::new_from_array([62; 32]), false),
        ],
    );
    let message =
        Message::compile(&payer, &[instruction], Hash::new_from_array([2; 32])).expect("message");
    Transaction::new_unsigned(message)
}

async fn wait_until_settled(updates: &mut watch::Receiver<RunSnapshot>) -> RunSnapshot {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let snapshot = updates.borrow_and_update().clone();
            if snapshot.phase != RunPhase::Running {
                return snapshot;
            }
            updates.changed().await.expect("orchestrator alive");
        }
    })
    .await
    .expect("run settles")
}

fn sse(events: &[serde_json::Value]) -> String {
    events
        .iter()
        .map(|event| format!("data: {event}\n\n"))
        .collect()
}

#[tokio::test]
async fn integration_intent_streams_signs_and_relays_transaction() {
    let server = MockServer::start();
    let signer = Arc::new(KeypairSigner::from_secret_bytes(&[21; 32]));
    let unsigned = swap_transaction(signer.pubkey());
    let expected_signed = signer
        .sign_transaction(unsigned.clone(), SigningContext::default())
        .await
        .expect("sign")
        .to_base64()
        .expect("encode");

    let execute_mock = server.mock(|when, then| {
        when.method(POST)
            .path("/api/agent/execute")
            .header("x-api-key", API_KEY)
            .json_body(json!({
                "intent": "swap 0.1 SOL to USDC",
                "pubkey": signer.pubkey().to_string()
            }));
        then.status(200).json_body(json!({
            "runId": "run-e2e",
            "steps": [{ "type": "step", "node": "parse_intent", "label": "Parsing intent", "status": "success" }]
        }));
    });
    let stream_mock = server.mock(|when, then| {
        when.method(GET)
            .path("/api/agent/run-e2e/stream")
            .header("x-api-key", API_KEY);
        then.status(200)
            .header("content-type", "text/event-stream")
            .body(sse(&[
                json!({ "type": "step", "step": { "node": "quote", "label": "Fetching Jupiter quote", "status": "running" } }),
                json!({ "type": "heartbeat" }),
                json!({ "type": "step", "node": "simulate", "label": "Simulating", "status": "success" }),
                json!({
                    "type": "complete",
                    "result": {
                        "runId": "run-e2e",
                        "steps": [],
                        "unsignedTx": unsigned.to_base64().expect("encode"),
                        "simulation": { "fee": 0.000005, "outAmount": 14.2, "priceImpact": "0.01%" }
                    }
                }),
            ]));
    });
    let relay_mock = server.mock(|when, then| {
        when.method(POST)
            .path("/api/agent/broadcast")
            .json_body(json!({ "signedTx": expected_signed }));
        then.status(200).json_body(json!({ "signature": "sig-e2e" }));
    });

    let agent = agent_client(&server);
    let orchestrator = RunOrchestrator::new(
        agent.clone(),
        polling_transport(&server),
        signer.clone(),
        Arc::new(RelayBroadcaster::new(agent)),
        RunOrchestratorConfig::default(),
    );
    let mut updates = orchestrator.subscribe();

    orchestrator.execute_intent("swap 0.1 SOL to USDC").await;
    let settled = wait_until_settled(&mut updates).await;

    execute_mock.assert();
    stream_mock.assert();
    assert_eq!(settled.phase, RunPhase::AwaitingApproval);
    let nodes: Vec<&str> = settled.steps.iter().map(|step| step.node.as_str()).collect();
    assert_eq!(nodes, vec!["parse_intent", "quote", "simulate"]);
    assert_eq!(
        settled
            .result
            .as_ref()
            .and_then(|result| result.simulation.as_ref())
            .map(|simulation| simulation.price_impact.as_str()),
        Some("0.01%")
    );

    orchestrator.approve_transaction().await;

    relay_mock.assert();
    let confirmed = orchestrator.snapshot();
    assert_eq!(confirmed.phase, RunPhase::Confirmed);
    assert_eq!(confirmed.confirmed_signature.as_deref(), Some("sig-e2e"));
}

#[tokio::test]
async fn integration_policy_rejection_surfaces_reason_without_signing() {
    let server = MockServer::start();
    let signer = Arc::new(KeypairSigner::from_secret_bytes(&[22; 32]));
    server.mock(|when, then| {
        when.method(POST).path("/api/agent/execute");
        then.status(200)
            .json_body(json!({ "runId": "run-rejected", "steps": [] }));
    });
    server.mock(|when, then| {
        when.method(GET).path("/api/agent/run-rejected/stream");
        then.status(200)
            .header("content-type", "text/event-stream")
            .body(sse(&[json!({
                "type": "complete",
                "result": {
                    "runId": "run-rejected",
                    "steps": [],
                    "rejection": {
                        "reason": "Action exceeds your daily limit by 4.5000 SOL.",
                        "policyField": "dailyLimit"
                    }
                }
            })]));
    });
    let relay_mock = server.mock(|when, then| {
        when.method(POST).path("/api/agent/broadcast");
        then.status(200).json_body(json!({ "signature": "never" }));
    });

    let agent = agent_client(&server);
    let orchestrator = RunOrchestrator::new(
        agent.clone(),
        polling_transport(&server),
        signer,
        Arc::new(RelayBroadcaster::new(agent)),
        RunOrchestratorConfig::default(),
    );
    let mut updates = orchestrator.subscribe();

    orchestrator.execute_intent("swap 5 SOL to USDC").await;
    let settled = wait_until_settled(&mut updates).await;
    orchestrator.approve_transaction().await;

    assert_eq!(settled.phase, RunPhase::Rejected);
    assert_eq!(
        settled.error.as_deref(),
        Some("Action exceeds your daily limit by 4.5000 SOL.")
    );
    assert_eq!(orchestrator.snapshot().phase, RunPhase::Rejected);
    relay_mock.assert_hits(0);
}

#[tokio::test]
async fn integration_stream_failure_status_ends_the_run() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/api/agent/execute");
        then.status(200)
            .json_body(json!({ "runId": "run-gone", "steps": [] }));
    });
    server.mock(|when, then| {
        when.method(GET).path("/api/agent/run-gone/stream");
        then.status(404).body("unknown run");
    });

    let agent = agent_client(&server);
    let orchestrator = RunOrchestrator::new(
        agent.clone(),
        polling_transport(&server),
        Arc::new(KeypairSigner::from_secret_bytes(&[23; 32])),
        Arc::new(RelayBroadcaster::new(agent)),
        RunOrchestratorConfig::default(),
    );
    let mut updates = orchestrator.subscribe();

    orchestrator.execute_intent("swap 0.1 SOL to USDC").await;
    let settled = wait_until_settled(&mut updates).await;

    assert_eq!(settled.phase, RunPhase::Error);
    assert_eq!(settled.error.as_deref(), Some("Agent stream failed: 404"));
}

#[tokio::test]
async fn integration_policy_save_syncs_vault_through_relay() {
    let agent_server = MockServer::start();
    let ledger = MockServer::start();
    let tempdir = tempfile::tempdir().expect("tempdir");
    let program = Pubkey::new_from_array([42; 32]);
    let signer = Arc::new(KeypairSigner::from_secret_bytes(&[24; 32]));
    let addresses = derive_policy_addresses(&program, &signer.pubkey()).expect("derive");

    ledger.mock(|when, then| {
        when.method(POST)
            .body_includes("\"method\":\"getAccountInfo\"")
            .body_includes(addresses.profile.to_string());
        then.status(200).json_body(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {
                "context": { "slot": 3 },
                "value": { "data": [BASE64.encode([1_u8; 16]), "base64"] }
            }
        }));
    });
    ledger.mock(|when, then| {
        when.method(POST).body_includes("\"method\":\"getLatestBlockhash\"");
        then.status(200).json_body(json!({
            "jsonrpc": "2.0",
            "id": 2,
            "result": {
                "context": { "slot": 3 },
                "value": { "blockhash": Hash::new_from_array([6; 32]).to_string(), "lastValidBlockHeight": 50 }
            }
        }));
    });
    let relay_mock = agent_server.mock(|when, then| {
        when.method(POST)
            .path("/api/agent/broadcast")
            .body_includes("signedTx");
        then.status(200).json_body(json!({ "signature": "sig-policy" }));
    });

    let rpc = rpc_client(&ledger);
    let program_id = program.to_string();
    let vault = PolicyVaultClient::new(Some(program_id.as_str()), rpc.clone()).expect("vault");
    let broadcaster = Arc::new(RoutedBroadcaster::new(
        rpc,
        RelayBroadcaster::new(agent_client(&agent_server)),
        BroadcastRoute::Relay,
    ));
    let store = Arc::new(FileKeyValueStore::new(tempdir.path().join("store.json")));
    let mut manager = PolicyManager::load(
        store.clone(),
        Arc::new(VaultPolicySync::new(vault, signer, broadcaster)),
    )
    .expect("manager");

    let outcome = manager
        .save(&SavePolicyInput {
            daily_limit_sol: 2.0,
            allowed_protocols: vec![Protocol::Jupiter, Protocol::SplTransfer],
            is_active: true,
        })
        .await
        .expect("save");

    relay_mock.assert();
    assert!(outcome.ok && outcome.synced);
    assert_eq!(outcome.signature.as_deref(), Some("sig-policy"));
    let stored = load_policy(store.as_ref()).expect("reload");
    assert_eq!(stored.daily_limit_lamports, 2_000_000_000);
    assert_eq!(
        stored.allowed_protocols,
        vec![Protocol::Jupiter, Protocol::SplTransfer]
    );
}
