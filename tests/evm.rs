use primitive_types::H160;
use xbridge_runtime::code_provider::{contract_abi_key, contract_code_key, CONTRACT_BUCKET};
use xbridge_runtime::contract::evm::address::evm_address_to_xchain;
use xbridge_runtime::contract::evm::{EVM_INPUT, EVM_JSON_ENCODED};
use xbridge_runtime::types::ContractEvent;
use xbridge_runtime::{BridgeError, Limits};

use crate::common::{
    args, evm_deploy_code, evm_payer_runtime, evm_storage_init, evm_storage_runtime, evm_word,
    TestEnv, EVM_PAYEE, STORAGE_ABI, TEST_LIMITS,
};

mod common;

const STORE_SELECTOR: [u8; 4] = [0x60, 0x57, 0x36, 0x1d];
const RETRIEVE_SELECTOR: [u8; 4] = [0x2e, 0x64, 0xce, 0xc1];

/// deploys the storage contract with raw bytecode, the constructor argument appended to the code.
fn storage_env(initial: u64) -> TestEnv {
    let env = TestEnv::new();
    let mut code = evm_storage_init();
    code.extend(evm_word(initial));
    env.deploy("storage", "evm", &code, &[], Some(STORAGE_ABI)).unwrap();
    env
}

fn store_call_data(value: u64) -> Vec<u8> {
    let mut data = STORE_SELECTOR.to_vec();
    data.extend(evm_word(value));
    data
}

/// The constructor runs once, and the runtime bytecode it returns replaces the deployed code.
#[test]
fn test_deploy_runs_constructor() {
    let env = storage_env(7);
    assert_eq!(
        env.store.get_value(CONTRACT_BUCKET, &contract_code_key("storage")).unwrap(),
        evm_storage_runtime()
    );
    assert_eq!(
        env.store.get_value(CONTRACT_BUCKET, &contract_abi_key("storage")).unwrap(),
        STORAGE_ABI.as_bytes().to_vec()
    );
    assert_eq!(env.store.get_value("storage", &[0u8; 32]).unwrap(), evm_word(7));

    let call = env.invoke(
        "evm",
        "storage",
        "retrieve",
        args(&[(EVM_INPUT, &RETRIEVE_SELECTOR)]),
        TEST_LIMITS,
    );
    assert_eq!(call.body(), evm_word(7));
    assert!(call.used.cpu > 21_000);
}

#[test]
fn test_store_emits_event() {
    let env = storage_env(7);
    let call = env.invoke("evm", "storage", "store", args(&[(EVM_INPUT, &store_call_data(42))]), TEST_LIMITS);
    assert!(call.body().is_empty());
    assert_eq!(
        call.events,
        vec![ContractEvent {
            contract: "storage".to_string(),
            name: "Stored".to_string(),
            body: br#"["42"]"#.to_vec(),
        }]
    );
    assert_eq!(env.store.get_value("storage", &[0u8; 32]).unwrap(), evm_word(42));

    let call = env.invoke("evm", "storage", "store", args(&[(EVM_INPUT, &store_call_data(0))]), TEST_LIMITS);
    assert!(call.result.is_ok());
    assert!(env.store.get_value("storage", &[0u8; 32]).is_none());
}

#[test]
fn test_json_encoded_calls() {
    let env = TestEnv::new();
    let code = hex::encode(evm_storage_init());
    env.deploy(
        "storage",
        "evm",
        code.as_bytes(),
        &[(EVM_INPUT, r#"{"initial":"5"}"#), (EVM_JSON_ENCODED, "true")],
        Some(STORAGE_ABI),
    )
    .unwrap();
    assert_eq!(env.store.get_value("storage", &[0u8; 32]).unwrap(), evm_word(5));

    let json = |input: &str| args(&[(EVM_INPUT, input.as_bytes()), (EVM_JSON_ENCODED, b"true")]);
    let call = env.invoke("evm", "storage", "retrieve", json("{}"), TEST_LIMITS);
    assert_eq!(call.body(), br#"[{"value":"5"}]"#.to_vec());

    let call = env.invoke("evm", "storage", "store", json(r#"{"num":"42"}"#), TEST_LIMITS);
    assert_eq!(call.body(), b"[]".to_vec());
    assert_eq!(call.events[0].body, br#"["42"]"#.to_vec());

    let call = env.invoke("evm", "storage", "store", json("{}"), TEST_LIMITS);
    assert!(matches!(call.result, Err(BridgeError::Abi(msg)) if msg.contains("num")));

    let call = env.invoke("evm", "storage", "burn", json("{}"), TEST_LIMITS);
    assert!(matches!(call.result, Err(BridgeError::Abi(_))));
}

#[test]
fn test_revert_is_contract_error() {
    let env = storage_env(7);
    let call = env.invoke(
        "evm",
        "storage",
        "unknown",
        args(&[(EVM_INPUT, &[0xde, 0xad, 0xbe, 0xef])]),
        TEST_LIMITS,
    );
    assert!(matches!(call.result, Err(BridgeError::Contract { status: 500, .. })));
}

/// Gas is metered against the cpu limit, and nothing is written when it runs out.
#[test]
fn test_out_of_gas() {
    let env = storage_env(7);
    let limits = Limits::new(21_500, 0, 1024 * 1024, 0);
    let call = env.invoke("evm", "storage", "store", args(&[(EVM_INPUT, &store_call_data(42))]), limits);
    assert!(matches!(call.result, Err(BridgeError::OutOfCpuLimit)));
    assert!(call.cache.lock().pending("storage", &[0u8; 32]).is_none());
    assert!(call.events.is_empty());
}

#[test]
fn test_json_mode_requires_abi() {
    let env = TestEnv::new();
    let mut code = evm_storage_init();
    code.extend(evm_word(1));
    env.deploy("storage", "evm", &code, &[], None).unwrap();

    let call = env.invoke(
        "evm",
        "storage",
        "retrieve",
        args(&[(EVM_INPUT, b"{}"), (EVM_JSON_ENCODED, b"true")]),
        TEST_LIMITS,
    );
    assert!(matches!(call.result, Err(BridgeError::Abi(_))));

    // without an ABI, events keep the raw log data
    let call = env.invoke("evm", "storage", "store", args(&[(EVM_INPUT, &store_call_data(3))]), TEST_LIMITS);
    assert_eq!(call.events[0].body, evm_word(3));
    assert_eq!(call.events[0].name.len(), 64);
}

/// Value a contract sends with CALL is moved on the model cache.
#[test]
fn test_call_value_is_transferred() {
    let env = TestEnv::new();
    env.deploy("payer", "evm", &evm_deploy_code(&evm_payer_runtime()), &[], None)
        .unwrap();
    env.store.set_balance("payer", 100);
    let payee = evm_address_to_xchain(&H160(EVM_PAYEE));

    let call = env.invoke("evm", "payer", "pay", args(&[]), TEST_LIMITS);
    assert_eq!(call.body(), evm_word(1));
    assert_eq!(call.cache.lock().balance("payer"), 95u32.into());
    assert_eq!(env.store.balance("payer"), 95u32.into());
    assert_eq!(env.store.balance(&payee), 5u32.into());

    // the interpreter refuses a call worth more than the balance, and nothing moves
    env.store.set_balance("payer", 3);
    let call = env.invoke("evm", "payer", "pay", args(&[]), TEST_LIMITS);
    assert_eq!(call.body(), evm_word(0));
    assert_eq!(env.store.balance("payer"), 3u32.into());
    assert_eq!(env.store.balance(&payee), 5u32.into());
}
