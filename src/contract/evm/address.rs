/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! address translates between the three kinds of chain identities and the 20-byte evm address.
//!
//! | identity         | example                        | evm address                              |
//! |------------------|--------------------------------|------------------------------------------|
//! | user address     | base58(1 ‖ 20 bytes ‖ checksum)| the 20 bytes                             |
//! | contract name    | `counter`                      | `1111` ‖ `-` padding ‖ name (20 ascii)   |
//! | contract account | `XC1234567890123456@xuper`     | `1112` ‖ the 16 digits (20 ascii)        |
//!
//! The prefixes keep the three families disjoint on the evm side.

use primitive_types::H160;

use crate::error::BridgeError;
use crate::hash::double_sha256;

const CONTRACT_NAME_PREFIX: &[u8; 4] = b"1111";
const CONTRACT_ACCOUNT_PREFIX: &[u8; 4] = b"1112";
const CONTRACT_NAME_PADDING: u8 = b'-';

const ACCOUNT_PREFIX: &str = "XC";
const ACCOUNT_NUMBER_LEN: usize = 16;
const ACCOUNT_CHAIN_SEPARATOR: char = '@';
const DEFAULT_CHAIN: &str = "xuper";

const ADDRESS_VERSION: u8 = 1;
const CHECKSUM_LEN: usize = 4;

pub const MIN_CONTRACT_NAME_LEN: usize = 4;
pub const MAX_CONTRACT_NAME_LEN: usize = 16;

/// AddressType is the kind of identity an evm address stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressType {
    Xchain,
    ContractName,
    ContractAccount,
}

impl AddressType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AddressType::Xchain => "xchain",
            AddressType::ContractName => "contract-name",
            AddressType::ContractAccount => "contract-account",
        }
    }
}

/// a contract name is 4 to 16 characters: a letter or `_` first, then letters, digits, `_` or `.`,
/// and a letter, digit or `_` last.
pub fn is_valid_contract_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    if bytes.len() < MIN_CONTRACT_NAME_LEN || bytes.len() > MAX_CONTRACT_NAME_LEN {
        return false;
    }
    let first = bytes[0];
    let last = bytes[bytes.len() - 1];
    (first.is_ascii_alphabetic() || first == b'_')
        && (last.is_ascii_alphanumeric() || last == b'_')
        && bytes[1..bytes.len() - 1]
            .iter()
            .all(|b| b.is_ascii_alphanumeric() || *b == b'_' || *b == b'.')
}

/// a contract account is `XC`, 16 digits, `@` and a non empty chain name.
pub fn is_contract_account(account: &str) -> bool {
    let Some(number) = account.strip_prefix(ACCOUNT_PREFIX) else {
        return false;
    };
    let Some((digits, chain)) = number.split_once(ACCOUNT_CHAIN_SEPARATOR) else {
        return false;
    };
    digits.len() == ACCOUNT_NUMBER_LEN
        && digits.bytes().all(|b| b.is_ascii_digit())
        && !chain.is_empty()
}

/// the 20 bytes carried by a base58 user address.
pub fn xchain_to_evm_address(address: &str) -> Result<H160, BridgeError> {
    let raw = bs58::decode(address)
        .into_vec()
        .map_err(|_| BridgeError::BadAddress)?;
    if raw.len() < 1 + H160::len_bytes() {
        return Err(BridgeError::BadAddress);
    }
    Ok(H160::from_slice(&raw[1..1 + H160::len_bytes()]))
}

pub fn evm_address_to_xchain(address: &H160) -> String {
    let mut raw = Vec::with_capacity(1 + H160::len_bytes() + CHECKSUM_LEN);
    raw.push(ADDRESS_VERSION);
    raw.extend_from_slice(address.as_bytes());
    let checksum = double_sha256(&raw);
    raw.extend_from_slice(&checksum[..CHECKSUM_LEN]);
    bs58::encode(raw).into_string()
}

pub fn contract_name_to_evm_address(name: &str) -> Result<H160, BridgeError> {
    if !is_valid_contract_name(name) {
        return Err(BridgeError::BadContractName);
    }
    let mut raw = [CONTRACT_NAME_PADDING; 20];
    raw[..4].copy_from_slice(CONTRACT_NAME_PREFIX);
    raw[20 - name.len()..].copy_from_slice(name.as_bytes());
    Ok(H160(raw))
}

pub fn evm_address_to_contract_name(address: &H160) -> Result<String, BridgeError> {
    let body = &address.as_bytes()[4..];
    let name = match body.iter().rposition(|b| *b == CONTRACT_NAME_PADDING) {
        Some(pos) => &body[pos + 1..],
        None => body,
    };
    String::from_utf8(name.to_vec()).map_err(|_| BridgeError::BadAddress)
}

pub fn contract_account_to_evm_address(account: &str) -> Result<H160, BridgeError> {
    if !is_contract_account(account) {
        return Err(BridgeError::BadAddress);
    }
    let digits = &account.as_bytes()[ACCOUNT_PREFIX.len()..ACCOUNT_PREFIX.len() + ACCOUNT_NUMBER_LEN];
    let mut raw = [0u8; 20];
    raw[..4].copy_from_slice(CONTRACT_ACCOUNT_PREFIX);
    raw[4..].copy_from_slice(digits);
    Ok(H160(raw))
}

/// the contract account of `address`, on the default chain.
pub fn evm_address_to_contract_account(address: &H160) -> Result<String, BridgeError> {
    let digits = std::str::from_utf8(&address.as_bytes()[4..]).map_err(|_| BridgeError::BadAddress)?;
    Ok(format!("{ACCOUNT_PREFIX}{digits}{ACCOUNT_CHAIN_SEPARATOR}{DEFAULT_CHAIN}"))
}

/// the identity behind an evm address, told apart by its prefix.
pub fn determine_evm_address(address: &H160) -> Result<(String, AddressType), BridgeError> {
    let prefix = &address.as_bytes()[..4];
    if prefix == CONTRACT_ACCOUNT_PREFIX {
        Ok((evm_address_to_contract_account(address)?, AddressType::ContractAccount))
    } else if prefix == CONTRACT_NAME_PREFIX {
        Ok((evm_address_to_contract_name(address)?, AddressType::ContractName))
    } else {
        Ok((evm_address_to_xchain(address), AddressType::Xchain))
    }
}

/// the evm address of a chain identity: contract account, then contract name, then user address.
pub fn determine_xchain_address(identity: &str) -> Result<(H160, AddressType), BridgeError> {
    if is_contract_account(identity) {
        Ok((contract_account_to_evm_address(identity)?, AddressType::ContractAccount))
    } else if is_valid_contract_name(identity) {
        Ok((contract_name_to_evm_address(identity)?, AddressType::ContractName))
    } else {
        Ok((xchain_to_evm_address(identity)?, AddressType::Xchain))
    }
}

/// the evm address of a transaction initiator, which is either a contract account or a user.
pub fn initiator_to_evm_address(initiator: &str) -> Result<H160, BridgeError> {
    if is_contract_account(initiator) {
        contract_account_to_evm_address(initiator)
    } else {
        xchain_to_evm_address(initiator)
    }
}
