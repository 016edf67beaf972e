use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use httpmock::prelude::*;
use nexus_chain::{Hash, Pubkey, RpcClient, RpcClientConfig};
use nexus_policy::{
    derive_policy_addresses, encode_vault_account, PolicyRecord, PolicyVaultAccount,
    PolicyVaultClient, PolicyVaultError, Protocol,
};
use serde_json::json;

fn program() -> Pubkey {
    Pubkey::new_from_array([42; 32])
}

fn vault_client(server: &MockServer) -> PolicyVaultClient {
    let rpc = RpcClient::new(RpcClientConfig {
        endpoint: server.url("/"),
        request_timeout_ms: 5_000,
        ..RpcClientConfig::default()
    })
    .expect("rpc");
    let program_id = program().to_string();
    PolicyVaultClient::new(Some(program_id.as_str()), Arc::new(rpc)).expect("vault client")
}

#[tokio::test]
async fn integration_fetch_policy_reads_vault_over_json_rpc() {
    let server = MockServer::start();
    let owner = Pubkey::new_from_array([5; 32]);
    let addresses = derive_policy_addresses(&program(), &owner).expect("derive");
    let account = PolicyVaultAccount {
        owner,
        policy: PolicyRecord {
            daily_limit_lamports: 3_000_000_000,
            daily_spent_lamports: 4_000_000_000,
            allowed_protocols: vec![Protocol::SplTransfer],
            is_active: true,
        },
    };
    let vault_mock = server.mock(|when, then| {
        when.method(POST)
            .body_includes("\"method\":\"getAccountInfo\"")
            .body_includes(addresses.vault.to_string());
        then.status(200).json_body(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {
                "context": { "slot": 1 },
                "value": { "data": [BASE64.encode(encode_vault_account(&account)), "base64"] }
            }
        }));
    });

    let fetched = vault_client(&server)
        .fetch_policy(&owner)
        .await
        .expect("fetch")
        .expect("vault exists");

    vault_mock.assert();
    assert_eq!(fetched, account);
    assert!(fetched.policy.daily_spent_lamports > fetched.policy.daily_limit_lamports);
}

#[tokio::test]
async fn integration_update_plan_checks_profile_and_uses_latest_blockhash() {
    let server = MockServer::start();
    let owner = Pubkey::new_from_array([5; 32]);
    let addresses = derive_policy_addresses(&program(), &owner).expect("derive");
    let blockhash = Hash::new_from_array([8; 32]);

    let profile_mock = server.mock(|when, then| {
        when.method(POST)
            .body_includes("\"method\":\"getAccountInfo\"")
            .body_includes(addresses.profile.to_string());
        then.status(200).json_body(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": { "context": { "slot": 1 }, "value": null }
        }));
    });
    server.mock(|when, then| {
        when.method(POST).body_includes("\"method\":\"getLatestBlockhash\"");
        then.status(200).json_body(json!({
            "jsonrpc": "2.0",
            "id": 2,
            "result": {
                "context": { "slot": 1 },
                "value": { "blockhash": blockhash.to_string(), "lastValidBlockHeight": 10 }
            }
        }));
    });

    let plan = vault_client(&server)
        .build_update_transaction(&owner, &PolicyRecord::default())
        .await
        .expect("plan");

    profile_mock.assert();
    assert!(plan.initializes_profile);
    assert_eq!(plan.recent_blockhash, blockhash);
    assert_eq!(plan.transaction.message.instructions.len(), 2);
    assert_eq!(plan.transaction.message.account_keys[0], owner);
}

#[tokio::test]
async fn regression_corrupt_vault_data_surfaces_codec_error() {
    let server = MockServer::start();
    let owner = Pubkey::new_from_array([5; 32]);
    let mut data = encode_vault_account(&PolicyVaultAccount {
        owner,
        policy: PolicyRecord::default(),
    });
    data[40] = 77;
    server.mock(|when, then| {
        when.method(POST).body_includes("\"method\":\"getAccountInfo\"");
        then.status(200).json_body(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {
                "context": { "slot": 1 },
                "value": { "data": [BASE64.encode(&data), "base64"] }
            }
        }));
    });

    let error = vault_client(&server)
        .fetch_policy(&owner)
        .await
        .expect_err("unsupported version");
    assert!(matches!(error, PolicyVaultError::Codec(_)));
    assert!(error.to_string().contains("unsupported policy payload version: 77"));
}
