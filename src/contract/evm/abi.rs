/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! abi encodes JSON call arguments into evm call data and decodes return data and logs, using the
//! ABI stored with the contract.
//!
//! Arguments arrive as a JSON object mapping parameter names to values. String values are handed
//! to the lenient tokenizer as they are; any other JSON value is tokenized from its JSON text.

use std::collections::HashMap;

use ethabi::token::{LenientTokenizer, Tokenizer};
use ethabi::{Contract, Param, RawLog, Token};
use primitive_types::H256;
use serde_json::Value;

use crate::error::BridgeError;

pub fn load(abi: &[u8]) -> Result<Contract, BridgeError> {
    Contract::load(abi).map_err(abi_error)
}

/// call data of `method` with the arguments of `input`.
pub fn encode_call(abi: &Contract, method: &str, input: Option<&[u8]>) -> Result<Vec<u8>, BridgeError> {
    let function = abi.function(method).map_err(abi_error)?;
    let tokens = tokenize(&function.inputs, input)?;
    function.encode_input(&tokens).map_err(abi_error)
}

/// constructor input: `code` followed by the encoded constructor arguments of `input`.
pub fn encode_constructor(abi: &Contract, code: Vec<u8>, input: Option<&[u8]>) -> Result<Vec<u8>, BridgeError> {
    match abi.constructor() {
        Some(constructor) => {
            let tokens = tokenize(&constructor.inputs, input)?;
            constructor.encode_input(code, &tokens).map_err(abi_error)
        }
        None => Ok(code),
    }
}

/// decodes the return data of `method` into a JSON array of `{name: value}` objects.
pub fn decode_output(abi: &Contract, method: &str, output: &[u8]) -> Result<Vec<u8>, BridgeError> {
    let function = abi.function(method).map_err(abi_error)?;
    let tokens = function.decode_output(output).map_err(abi_error)?;
    let values: Vec<HashMap<&str, String>> = function
        .outputs
        .iter()
        .zip(tokens.iter())
        .map(|(param, token)| HashMap::from([(param.name.as_str(), token_to_string(token))]))
        .collect();
    serde_json::to_vec(&values).map_err(|e| BridgeError::Abi(e.to_string()))
}

/// name and JSON body of the event matching the first topic of a log, if the ABI declares one.
pub fn decode_event(abi: &Contract, topics: &[H256], data: &[u8]) -> Option<(String, Vec<u8>)> {
    let signature = ethabi::Hash::from_slice(topics.first()?.as_bytes());
    let event = abi.events().find(|event| event.signature() == signature)?;
    let log = event
        .parse_log(RawLog {
            topics: topics
                .iter()
                .map(|topic| ethabi::Hash::from_slice(topic.as_bytes()))
                .collect(),
            data: data.to_vec(),
        })
        .ok()?;
    let values: Vec<String> = log.params.iter().map(|param| token_to_string(&param.value)).collect();
    let body = serde_json::to_vec(&values).ok()?;
    Some((event.name.clone(), body))
}

fn tokenize(params: &[Param], input: Option<&[u8]>) -> Result<Vec<Token>, BridgeError> {
    let args: HashMap<String, Value> = match input {
        Some(input) if !input.is_empty() => {
            serde_json::from_slice(input).map_err(|e| BridgeError::Abi(e.to_string()))?
        }
        _ => HashMap::new(),
    };
    params
        .iter()
        .map(|param| {
            let value = args
                .get(&param.name)
                .ok_or_else(|| BridgeError::Abi(format!("missing argument {}", param.name)))?;
            let text = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            LenientTokenizer::tokenize(&param.kind, &text).map_err(abi_error)
        })
        .collect()
}

// Integers render in decimal, bytes and addresses as bare hex.
fn token_to_string(token: &Token) -> String {
    match token {
        Token::Uint(value) => value.to_string(),
        Token::Int(value) if value.bit(255) => format!("-{}", (!*value).overflowing_add(ethabi::Uint::one()).0),
        Token::Int(value) => value.to_string(),
        Token::Bytes(bytes) | Token::FixedBytes(bytes) => hex::encode(bytes),
        Token::Address(address) => hex::encode(address.as_bytes()),
        other => other.to_string(),
    }
}

fn abi_error(e: ethabi::Error) -> BridgeError {
    BridgeError::Abi(e.to_string())
}
