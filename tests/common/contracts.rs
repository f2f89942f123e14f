use std::sync::Arc;

use ethabi::ParamType;
use xbridge_runtime::types::Response;
use xbridge_runtime::{BridgeError, NativeCodeRegistry, NativeContext, NativeContract};

/// Host imports, bump allocator and constant strings shared by the wasm test contracts.
///
/// Constant strings:
/// `key` 16, `value` 19, `owner` 24, `request` 29, `data` 36, `not found` 40, `boom` 49,
/// `stored` 53, `payload` 59, `hello` 66. Offsets 0 and 4 are return pointer slots.
const WAT_PRELUDE: &str = r#"
  (import "env" "get_object" (func $get_object (param i32 i32 i32) (result i64)))
  (import "env" "put_object" (func $put_object (param i32 i32 i32 i32)))
  (import "env" "argument" (func $argument (param i32 i32 i32) (result i64)))
  (import "env" "set_output" (func $set_output (param i32 i32 i32 i32 i32)))
  (import "env" "contract_call" (func $contract_call (param i32 i32 i32) (result i32)))
  (import "env" "emit_event" (func $emit_event (param i32 i32 i32 i32)))
  (import "env" "log" (func $log (param i32 i32)))
  (import "env" "sha256" (func $sha256 (param i32 i32 i32) (result i32)))
  (memory (export "memory") 1)
  (data (i32.const 16) "keyvalueownerrequestdatanot foundboomstoredpayloadhello")
  (global $heap (mut i32) (i32.const 1024))
  (func (export "alloc") (param $size i32) (result i32)
    (local $ptr i32)
    (local.set $ptr (global.get $heap))
    (global.set $heap (i32.add (global.get $heap) (local.get $size)))
    (local.get $ptr))
"#;

const WAT_KV_METHODS: &str = r#"
  (func (export "_initialize")
    (local $len i64)
    (local.set $len (call $argument (i32.const 24) (i32.const 5) (i32.const 0)))
    (if (i64.ge_s (local.get $len) (i64.const 0))
      (then (call $put_object (i32.const 24) (i32.const 5) (i32.load (i32.const 0)) (i32.wrap_i64 (local.get $len)))))
    (call $set_output (i32.const 200) (i32.const 0) (i32.const 0) (i32.const 0) (i32.const 0)))

  (func (export "_put")
    (local $klen i32) (local $vlen i32)
    (local.set $klen (i32.wrap_i64 (call $argument (i32.const 16) (i32.const 3) (i32.const 0))))
    (local.set $vlen (i32.wrap_i64 (call $argument (i32.const 19) (i32.const 5) (i32.const 4))))
    (call $put_object (i32.load (i32.const 0)) (local.get $klen) (i32.load (i32.const 4)) (local.get $vlen))
    (call $set_output (i32.const 200) (i32.const 0) (i32.const 0) (i32.load (i32.const 4)) (local.get $vlen)))

  (func (export "_get")
    (local $klen i32) (local $vlen i64)
    (local.set $klen (i32.wrap_i64 (call $argument (i32.const 16) (i32.const 3) (i32.const 0))))
    (local.set $vlen (call $get_object (i32.load (i32.const 0)) (local.get $klen) (i32.const 4)))
    (if (i64.lt_s (local.get $vlen) (i64.const 0))
      (then (call $set_output (i32.const 404) (i32.const 40) (i32.const 9) (i32.const 0) (i32.const 0)))
      (else (call $set_output (i32.const 200) (i32.const 0) (i32.const 0) (i32.load (i32.const 4)) (i32.wrap_i64 (local.get $vlen))))))
"#;

const WAT_MISC_METHODS: &str = r#"
  (func (export "_fail")
    (call $set_output (i32.const 500) (i32.const 49) (i32.const 4) (i32.const 0) (i32.const 0)))

  (func (export "_noop"))

  (func (export "_loop")
    (loop $forever (br $forever)))

  (func (export "_event")
    (call $emit_event (i32.const 53) (i32.const 6) (i32.const 59) (i32.const 7))
    (call $log (i32.const 66) (i32.const 5))
    (call $set_output (i32.const 200) (i32.const 0) (i32.const 0) (i32.const 0) (i32.const 0)))

  (func (export "_call")
    (local $len i32) (local $rlen i32)
    (local.set $len (i32.wrap_i64 (call $argument (i32.const 29) (i32.const 7) (i32.const 0))))
    (local.set $rlen (call $contract_call (i32.load (i32.const 0)) (local.get $len) (i32.const 4)))
    (call $set_output (i32.const 200) (i32.const 0) (i32.const 0) (i32.load (i32.const 4)) (local.get $rlen)))

  (func (export "_sha")
    (local $len i32) (local $dlen i32)
    (local.set $len (i32.wrap_i64 (call $argument (i32.const 36) (i32.const 4) (i32.const 0))))
    (local.set $dlen (call $sha256 (i32.load (i32.const 0)) (local.get $len) (i32.const 4)))
    (call $set_output (i32.const 200) (i32.const 0) (i32.const 0) (i32.load (i32.const 4)) (local.get $dlen)))
"#;

/// key value contract exercising storage, events, nested calls and crypto.
pub fn wasm_kv_contract() -> Vec<u8> {
    let wat = format!("(module {WAT_PRELUDE} {WAT_KV_METHODS} {WAT_MISC_METHODS})");
    wat::parse_str(wat).unwrap()
}

/// second version of the key value contract: `_get` always answers `v2`.
pub fn wasm_kv_contract_v2() -> Vec<u8> {
    let wat = format!(
        r#"(module {WAT_PRELUDE}
  (data (i32.const 80) "v2")
  (func (export "_get")
    (call $set_output (i32.const 200) (i32.const 0) (i32.const 0) (i32.const 80) (i32.const 2))))"#
    );
    wat::parse_str(wat).unwrap()
}

/// a contract using floating point, refused by the non determinism filter.
pub fn wasm_float_contract() -> Vec<u8> {
    let wat = format!(
        r#"(module {WAT_PRELUDE}
  (func (export "_initialize")
    (drop (f64.add (f64.const 1) (f64.const 2)))))"#
    );
    wat::parse_str(wat).unwrap()
}

/// Native contract keeping a counter under `count`. `initialize` also counts its own runs under
/// `initialized`.
pub struct Counter;

impl Counter {
    fn count(ctx: &NativeContext) -> Result<u64, BridgeError> {
        let value = ctx.get_object(b"count")?.unwrap_or_else(|| b"0".to_vec());
        Ok(String::from_utf8_lossy(&value).parse().unwrap_or_default())
    }
}

impl NativeContract for Counter {
    fn invoke(&self, method: &str, ctx: &mut NativeContext) -> Result<Response, BridgeError> {
        match method {
            "initialize" => {
                let start = ctx.arg("start")?.unwrap_or_else(|| b"0".to_vec());
                ctx.put_object(b"count", &start)?;
                let runs = ctx
                    .get_object(b"initialized")?
                    .map(|v| String::from_utf8_lossy(&v).parse::<u64>().unwrap_or_default())
                    .unwrap_or_default();
                ctx.put_object(b"initialized", (runs + 1).to_string().as_bytes())?;
                if let Some(creator) = ctx.arg("creator")? {
                    ctx.put_object(b"creator", &creator)?;
                }
                Ok(Response::ok(start))
            }
            "increase" => {
                let delta: u64 = ctx
                    .arg("delta")?
                    .map(|d| String::from_utf8_lossy(&d).parse().unwrap_or(1))
                    .unwrap_or(1);
                let count = Self::count(ctx)? + delta;
                ctx.put_object(b"count", count.to_string().as_bytes())?;
                Ok(Response::ok(count.to_string()))
            }
            "get" => Ok(Response::ok(Self::count(ctx)?.to_string())),
            "creator" => match ctx.get_object(b"creator")? {
                Some(creator) => Ok(Response::ok(creator)),
                None => Ok(Response::error("no creator")),
            },
            "deny" => Ok(Response {
                status: 403,
                message: "denied".to_string(),
                body: Vec::new(),
            }),
            "transfer" => {
                let to = String::from_utf8_lossy(&ctx.arg("to")?.unwrap_or_default()).to_string();
                let amount = String::from_utf8_lossy(&ctx.arg("amount")?.unwrap_or_default()).to_string();
                ctx.transfer(&to, &amount)?;
                Ok(Response::ok("transferred"))
            }
            "spin" => loop {
                ctx.get_object(b"count")?;
            },
            "scan" => {
                for i in 0..5u8 {
                    ctx.put_object(&[b'k', b'0' + i], &[i + 1])?;
                }
                let items = ctx.new_iterator(b"k1", b"k4", 0)?;
                let keys: Vec<String> = items
                    .iter()
                    .map(|item| String::from_utf8_lossy(&item.key).to_string())
                    .collect();
                Ok(Response::ok(keys.join(",")))
            }
            "event" => {
                ctx.emit_event("counted", b"1")?;
                ctx.log("counted once")?;
                Ok(Response::ok(Vec::new()))
            }
            _ => Ok(Response::error(format!("unknown method {method}"))),
        }
    }
}

/// Native contract forwarding a call along a chain of contracts.
///
/// `relay` takes `chain`, a comma separated list of contract names. It calls `relay` on the first
/// one with the rest of the list, and answers `done` at the end of the chain. `mark` does the same
/// after storing the list it got under `visited`.
pub struct Relay;

impl Relay {
    fn forward(ctx: &mut NativeContext, method: &str) -> Result<Response, BridgeError> {
        let chain = String::from_utf8_lossy(&ctx.arg("chain")?.unwrap_or_default()).to_string();
        match chain.split_once(',') {
            _ if chain.is_empty() => Ok(Response::ok("done")),
            Some((next, rest)) => ctx.call("native", next, method, vec![("chain".to_string(), rest.as_bytes().to_vec())]),
            None => ctx.call("native", &chain, method, vec![("chain".to_string(), Vec::new())]),
        }
    }
}

impl NativeContract for Relay {
    fn invoke(&self, method: &str, ctx: &mut NativeContext) -> Result<Response, BridgeError> {
        match method {
            "initialize" => Ok(Response::ok(Vec::new())),
            "relay" => Self::forward(ctx, "relay"),
            "mark" => {
                let chain = ctx.arg("chain")?.unwrap_or_default();
                ctx.put_object(b"visited", &chain)?;
                Self::forward(ctx, "mark")
            }
            "call" => {
                let module = String::from_utf8_lossy(&ctx.arg("module")?.unwrap_or_default()).to_string();
                let contract = String::from_utf8_lossy(&ctx.arg("contract")?.unwrap_or_default()).to_string();
                let method = String::from_utf8_lossy(&ctx.arg("method")?.unwrap_or_default()).to_string();
                ctx.call(&module, &contract, &method, Vec::new())
            }
            _ => Ok(Response::error(format!("unknown method {method}"))),
        }
    }
}

pub const COUNTER_CODE: &str = "counter";
pub const RELAY_CODE: &str = "relay";

pub fn native_codes() -> NativeCodeRegistry {
    let codes = NativeCodeRegistry::new();
    codes.register(COUNTER_CODE, Arc::new(Counter));
    codes.register(RELAY_CODE, Arc::new(Relay));
    codes
}

pub const STORAGE_ABI: &str = r#"[
    {"type":"constructor","inputs":[{"name":"initial","type":"uint256"}],"stateMutability":"nonpayable"},
    {"type":"function","name":"store","inputs":[{"name":"num","type":"uint256"}],"outputs":[],"stateMutability":"nonpayable"},
    {"type":"function","name":"retrieve","inputs":[],"outputs":[{"name":"value","type":"uint256"}],"stateMutability":"view"},
    {"type":"event","name":"Stored","inputs":[{"name":"num","type":"uint256","indexed":false}],"anonymous":false}
]"#;

/// runtime bytecode of the storage contract: `store(uint256)` writes slot 0 and logs `Stored`,
/// `retrieve()` returns slot 0, anything else reverts.
pub fn evm_storage_runtime() -> Vec<u8> {
    let topic = ethabi::long_signature("Stored", &[ParamType::Uint(256)]);
    let mut code = vec![
        0x60, 0x00, 0x35, // calldataload(0)
        0x60, 0xe0, 0x1c, // shr 224
        0x80, // dup selector
        0x63, 0x60, 0x57, 0x36, 0x1d, // push4 store
        0x14, 0x60, 29, 0x57, // eq, jumpi store
        0x63, 0x2e, 0x64, 0xce, 0xc1, // push4 retrieve
        0x14, 0x60, 79, 0x57, // eq, jumpi retrieve
        0x60, 0x00, 0x80, 0xfd, // revert(0, 0)
        0x5b, // store:
        0x60, 0x04, 0x35, 0x80, // calldataload(4), dup
        0x60, 0x00, 0x55, // sstore(0, value)
        0x60, 0x00, 0x52, // mstore(0, value)
        0x7f, // push32 topic
    ];
    code.extend_from_slice(topic.as_bytes());
    code.extend_from_slice(&[
        0x60, 0x20, 0x60, 0x00, 0xa1, // log1(0, 32, topic)
        0x00, // stop
        0x5b, // retrieve:
        0x60, 0x00, 0x54, // sload(0)
        0x60, 0x00, 0x52, // mstore(0, value)
        0x60, 0x20, 0x60, 0x00, 0xf3, // return(0, 32)
    ]);
    code
}

/// deploy bytecode of the storage contract. The constructor stores its last 32 bytes of code, the
/// `initial` argument, into slot 0 and returns the runtime bytecode.
pub fn evm_storage_init() -> Vec<u8> {
    let runtime = evm_storage_runtime();
    let mut code = vec![
        0x60,
        runtime.len() as u8, // push1 runtime length
        0x80, // dup
        0x60, 26, // push1 runtime offset
        0x60, 0x00, 0x39, // codecopy(0, 26, len)
        0x60, 0x20, 0x60, 0x20, 0x38, 0x03, // 32, codesize - 32
        0x60, 0x80, 0x39, // codecopy(0x80, codesize - 32, 32)
        0x60, 0x80, 0x51, // mload(0x80)
        0x60, 0x00, 0x55, // sstore(0, initial)
        0x60, 0x00, 0xf3, // return(0, len)
    ];
    code.extend(runtime);
    code
}

/// a 32 byte big endian word.
pub fn evm_word(value: u64) -> Vec<u8> {
    let mut word = vec![0u8; 24];
    word.extend_from_slice(&value.to_be_bytes());
    word
}

/// deploy bytecode whose constructor only returns `runtime`.
pub fn evm_deploy_code(runtime: &[u8]) -> Vec<u8> {
    let mut code = vec![
        0x60,
        runtime.len() as u8, // push1 runtime length
        0x80, // dup
        0x60, 11, // push1 runtime offset
        0x60, 0x00, 0x39, // codecopy(0, 11, len)
        0x60, 0x00, 0xf3, // return(0, len)
    ];
    code.extend_from_slice(runtime);
    code
}

/// the user every payer call sends value to.
pub const EVM_PAYEE: [u8; 20] = [0x22; 20];

/// runtime bytecode sending 5 to [EVM_PAYEE] on any call, returning the success flag of the call.
pub fn evm_payer_runtime() -> Vec<u8> {
    let mut code = vec![
        0x60, 0x00, 0x60, 0x00, 0x60, 0x00, 0x60, 0x00, // no return data, no call data
        0x60, 0x05, // value
        0x73, // push20 payee
    ];
    code.extend_from_slice(&EVM_PAYEE);
    code.extend_from_slice(&[
        0x5a, 0xf1, // call(gas, payee, 5, 0, 0, 0, 0)
        0x60, 0x00, 0x52, // mstore(0, success)
        0x60, 0x20, 0x60, 0x00, 0xf3, // return(0, 32)
    ]);
    code
}
