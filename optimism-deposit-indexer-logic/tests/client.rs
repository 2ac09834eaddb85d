mod helpers;

use alloy_primitives::{address, Address, Bytes, B256, U256};
use alloy_sol_types::{SolCall, SolValue};
use chrono::DateTime;
use helpers::eth_mock_server::{deposit_log_response, EthMockServer};
use optimism_deposit_indexer_logic::{abi::SystemConfig, client::L1Client, deposit};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::{
    collections::{BTreeSet, HashMap},
    time::Duration,
};
use wiremock::{
    matchers::{body_partial_json, method},
    Mock, ResponseTemplate,
};

const PORTAL: Address = address!("0xbEb5Fc579115071764c7423A4f12eDde41f106Ed");
const SYSTEM_CONFIG: Address = address!("0x229047fed2591dbec1eF1118d64F7aF3dB9EB290");

fn topic(address: Address) -> String {
    address.into_word().to_string()
}

/// ABI-encoded `opaqueData` payload: mint = value = 1 wei, 21k gas, no
/// calldata.
fn opaque_data_hex() -> String {
    let mut opaque = vec![0u8; 73];
    opaque[31] = 1;
    opaque[63] = 1;
    opaque[64..72].copy_from_slice(&21_000u64.to_be_bytes());
    const_hex::encode_prefixed(Bytes::from(opaque).abi_encode())
}

fn sample_log(block_number: u64, log_index: u64, removed: bool) -> serde_json::Value {
    deposit_log_response(
        &PORTAL.to_string(),
        block_number,
        &B256::repeat_byte(0x11).to_string(),
        &B256::repeat_byte(0x77).to_string(),
        log_index,
        &topic(Address::repeat_byte(0xaa)),
        &topic(Address::repeat_byte(0xbb)),
        &opaque_data_hex(),
        removed,
    )
}

#[tokio::test]
async fn reads_the_system_config_contract() {
    let mock = EthMockServer::start().await;
    mock.set_call(
        SystemConfig::optimismPortalCall::SELECTOR,
        json!(PORTAL.into_word().to_string()),
    );
    mock.set_call(
        SystemConfig::startBlockCall::SELECTOR,
        json!(B256::from(U256::from(100)).to_string()),
    );

    let client = L1Client::connect(&mock.uri()).await.unwrap();
    let (portal, start_block) = client.system_config_params(SYSTEM_CONFIG).await.unwrap();

    assert_eq!(portal, PORTAL);
    assert_eq!(start_block, 100);
}

#[tokio::test]
async fn reads_the_safe_head() {
    let mock = EthMockServer::start().await;
    mock.set_block("safe", 1_700, 1_700_000_000);

    let client = L1Client::connect(&mock.uri()).await.unwrap();
    assert_eq!(client.safe_block_number().await.unwrap(), 1_700);
}

#[tokio::test]
async fn retries_transient_log_failures() {
    let mock = EthMockServer::start().await;
    mock.set_result("eth_getLogs", json!([]));
    // The first two attempts hit a broken transport, the third succeeds.
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "eth_getLogs" })))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&mock.server)
        .await;

    let client = L1Client::connect(&mock.uri()).await.unwrap();
    let logs = client.deposit_logs_in_range(PORTAL, 100, 600).await.unwrap();
    assert!(logs.is_empty());
}

#[tokio::test]
async fn gives_up_after_three_attempts() {
    let mock = EthMockServer::start().await;

    let client = L1Client::connect(&mock.uri()).await.unwrap();
    let err = client
        .deposit_logs_in_range(PORTAL, 100, 600)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("failed to fetch deposit logs"));
}

#[tokio::test]
async fn fetched_logs_derive_into_records() {
    let mock = EthMockServer::start().await;
    mock.set_result("eth_getLogs", json!([sample_log(1_502, 5, false)]));

    let client = L1Client::connect(&mock.uri()).await.unwrap();
    let logs = client
        .deposit_logs_in_range(PORTAL, 1_500, 1_700)
        .await
        .unwrap();
    assert_eq!(logs.len(), 1);

    let record = deposit::record_from_log(&logs[0], 0x7e, &HashMap::new()).unwrap();
    assert_eq!(record.l1_block_number, 1_502);
    assert_eq!(record.l1_transaction_origin, Address::repeat_byte(0xaa));
    assert_eq!(record.l1_transaction_hash, B256::repeat_byte(0x77));
    assert!(record.l1_block_timestamp.is_none());
}

#[tokio::test]
async fn drives_the_filter_lifecycle() {
    let mock = EthMockServer::start().await;
    mock.set_result("eth_newFilter", json!("0x10"));
    mock.set_result(
        "eth_getFilterChanges",
        json!([sample_log(1_500, 0, true), sample_log(1_502, 1, false)]),
    );
    mock.set_result("eth_uninstallFilter", json!(true));

    let client = L1Client::connect(&mock.uri()).await.unwrap();
    let filter_id = client.install_deposit_filter(PORTAL, 1_700).await.unwrap();
    assert_eq!(filter_id, U256::from(0x10));

    let logs = client.filter_changes(filter_id).await.unwrap();
    assert_eq!(logs.len(), 2);
    assert!(logs[0].removed);
    assert!(!logs[1].removed);

    assert!(client.uninstall_filter(filter_id).await.unwrap());
}

#[tokio::test]
async fn filter_polls_are_not_retried() {
    let mock = EthMockServer::start().await;
    // No eth_getFilterChanges mock: the node answers "filter not found".

    let client = L1Client::connect(&mock.uri()).await.unwrap();
    let before = std::time::Instant::now();
    client.filter_changes(U256::from(0x10)).await.unwrap_err();
    // A single attempt, no backoff.
    assert!(before.elapsed() < Duration::from_millis(400));
}

#[tokio::test]
async fn resolves_block_timestamps_in_one_batch() {
    let mock = EthMockServer::start().await;
    mock.set_block("0x64", 100, 1_000);
    mock.set_block("0x65", 101, 1_012);

    let client = L1Client::connect(&mock.uri()).await.unwrap();
    let timestamps = client
        .block_timestamps(&BTreeSet::from([100, 101]))
        .await
        .unwrap();

    assert_eq!(timestamps.len(), 2);
    assert_eq!(timestamps[&100], DateTime::from_timestamp(1_000, 0).unwrap());
    assert_eq!(timestamps[&101], DateTime::from_timestamp(1_012, 0).unwrap());
}

#[tokio::test]
async fn timestamp_lookup_fails_when_a_block_is_missing() {
    let mock = EthMockServer::start().await;
    mock.set_block("0x64", 100, 1_000);

    let client = L1Client::connect(&mock.uri()).await.unwrap();
    client
        .block_timestamps(&BTreeSet::from([100, 101]))
        .await
        .unwrap_err();
}

#[tokio::test]
async fn estimates_the_block_cadence() {
    let mock = EthMockServer::start().await;
    mock.set_block("0xc8", 200, 5_000);
    mock.set_block("0x64", 100, 3_800);

    let client = L1Client::connect(&mock.uri()).await.unwrap();
    // 12 seconds per block across the window, halved.
    assert_eq!(
        client.block_interval(200).await.unwrap(),
        Duration::from_secs(6)
    );
}
