use serde_json::{json, Value};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};
use wiremock::{matchers::method, Mock, MockServer, Request, Respond, ResponseTemplate};

/// A wiremock-backed JSON-RPC endpoint understanding the methods the fetcher
/// issues, including batched `eth_getBlockByNumber` requests.
///
/// Canned results are registered per method; blocks are keyed by the number
/// tag they are requested with (`"safe"`, `"latest"`, `"0x66"`, ...), and
/// `eth_call` results by calldata selector. Anything unregistered gets a
/// JSON-RPC error response.
pub struct EthMockServer {
    pub server: MockServer,
    state: Arc<Mutex<RpcState>>,
}

#[derive(Default)]
struct RpcState {
    results: HashMap<String, Value>,
    blocks: HashMap<String, Value>,
    calls: Vec<(String, Value)>,
}

struct RpcResponder {
    state: Arc<Mutex<RpcState>>,
}

impl Respond for RpcResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = serde_json::from_slice(&request.body).expect("request is not JSON-RPC");
        match body {
            Value::Array(calls) => {
                let responses: Vec<Value> = calls.iter().map(|call| self.answer(call)).collect();
                ResponseTemplate::new(200).set_body_json(responses)
            }
            call => ResponseTemplate::new(200).set_body_json(self.answer(&call)),
        }
    }
}

impl RpcResponder {
    fn answer(&self, call: &Value) -> Value {
        let id = call["id"].clone();
        let rpc_method = call["method"].as_str().unwrap_or_default();
        let state = self.state.lock().unwrap();

        let result = match rpc_method {
            "eth_getBlockByNumber" => {
                let tag = call["params"][0].as_str().unwrap_or_default();
                state.blocks.get(tag).cloned()
            }
            "eth_call" => {
                let request = &call["params"][0];
                let data = request
                    .get("input")
                    .or_else(|| request.get("data"))
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                state
                    .calls
                    .iter()
                    .find(|(selector, _)| data.starts_with(selector.as_str()))
                    .map(|(_, result)| result.clone())
            }
            other => state.results.get(other).cloned(),
        };

        match result {
            Some(result) => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
            None => json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": -32601, "message": format!("not mocked: {rpc_method}") },
            }),
        }
    }
}

impl EthMockServer {
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        let state = Arc::new(Mutex::new(RpcState::default()));

        Mock::given(method("POST"))
            .respond_with(RpcResponder {
                state: state.clone(),
            })
            .mount(&server)
            .await;

        Self { server, state }
    }

    pub fn uri(&self) -> String {
        self.server.uri()
    }

    /// Registers the result returned for every request of `rpc_method`.
    pub fn set_result(&self, rpc_method: &str, result: Value) {
        self.state
            .lock()
            .unwrap()
            .results
            .insert(rpc_method.to_string(), result);
    }

    /// Drops the canned result for `rpc_method`, so requests start failing.
    pub fn clear_result(&self, rpc_method: &str) {
        self.state.lock().unwrap().results.remove(rpc_method);
    }

    /// Registers a block served for `eth_getBlockByNumber` with the given tag.
    pub fn set_block(&self, tag: &str, number: u64, timestamp: u64) {
        self.state
            .lock()
            .unwrap()
            .blocks
            .insert(tag.to_string(), create_block_response(number, timestamp));
    }

    /// Registers an `eth_call` result keyed by the 4-byte selector.
    pub fn set_call(&self, selector: [u8; 4], result: Value) {
        self.state
            .lock()
            .unwrap()
            .calls
            .push((const_hex::encode_prefixed(selector), result));
    }
}

fn create_block_response(number: u64, timestamp: u64) -> Value {
    json!({
        "number": format!("0x{number:x}"),
        "hash": "0x143a3787fe8c25e3e97e83d33d5cf873222b977b250399ac663c0a452ef40b68",
        "parentHash": "0x0000000000000000000000000000000000000000000000000000000000000000",
        "nonce": "0x0000000000000000",
        "sha3Uncles": "0x1dcc4de8dec75d7aab85b567b6ccd41ad312451b948a7413f0a142fd40d49347",
        "logsBloom": format!("0x{}", "00".repeat(256)),
        "transactionsRoot": "0x56e81f171bcc55a6ff8345e692c0f86e5b48e01b996cadc001622fb5e363b421",
        "stateRoot": "0xd7f8974fb5ac78d9ac099b9ad5018bedc2ce0a72dad1827a1709da30580f0544",
        "receiptsRoot": "0x56e81f171bcc55a6ff8345e692c0f86e5b48e01b996cadc001622fb5e363b421",
        "miner": "0x0000000000000000000000000000000000000000",
        "difficulty": "0x0",
        "totalDifficulty": "0x0",
        "extraData": "0x",
        "size": "0x200",
        "gasLimit": "0x1c9c380",
        "gasUsed": "0x0",
        "timestamp": format!("0x{timestamp:x}"),
        "transactions": [],
        "uncles": [],
        "mixHash": "0x143a3787fe8c25e3e97e83d33d5cf873222b977b250399ac663c0a452ef40b68",
    })
}

/// A `TransactionDeposited` log as returned by `eth_getLogs` and
/// `eth_getFilterChanges`.
#[allow(clippy::too_many_arguments)]
pub fn deposit_log_response(
    portal: &str,
    block_number: u64,
    block_hash: &str,
    transaction_hash: &str,
    log_index: u64,
    from_topic: &str,
    to_topic: &str,
    opaque_data: &str,
    removed: bool,
) -> Value {
    json!({
        "address": portal,
        "topics": [
            "0xb3813568d9991fc951961fcb4c784893574240a28925604d09fc577c55bb7c32",
            from_topic,
            to_topic,
            "0x0000000000000000000000000000000000000000000000000000000000000000",
        ],
        "data": opaque_data,
        "blockNumber": format!("0x{block_number:x}"),
        "blockHash": block_hash,
        "transactionHash": transaction_hash,
        "transactionIndex": "0x0",
        "logIndex": format!("0x{log_index:x}"),
        "removed": removed,
    })
}
