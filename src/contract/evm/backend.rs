/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! backend exposes the model cache and the chain core to the evm executor.
//!
//! Storage of a contract lives in the bucket named after the contract, keyed by the 32-byte slot.
//! Code is read from the `contract` bucket, except for the callee of the running call whose code
//! is given by the instance. Balances are read from the chain core. Value moved out of a contract
//! during an execution is written back as transfers on the model cache.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use evm::backend::{Apply, Backend, Basic};
use num_bigint::{BigInt, BigUint, Sign};
use primitive_types::{H160, H256, U256};

use super::address::{determine_evm_address, AddressType};
use crate::code_provider::{contract_code_key, CONTRACT_BUCKET};
use crate::error::{BridgeError, ModelError};
use crate::model::{ChainCore, ModelCacheRef};

/// AccountChange is what an execution changed on one account, detached from the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountChange {
    pub address: H160,
    pub balance: U256,
    pub storage: Vec<(H256, H256)>,
}

/// the account changes of an execution. Self destructs are dropped.
pub fn collect_changes<A, I>(values: A) -> Vec<AccountChange>
where
    A: IntoIterator<Item = Apply<I>>,
    I: IntoIterator<Item = (H256, H256)>,
{
    values
        .into_iter()
        .filter_map(|apply| match apply {
            Apply::Modify {
                address,
                basic,
                storage,
                ..
            } => Some(AccountChange {
                address,
                balance: basic.balance,
                storage: storage.into_iter().collect(),
            }),
            Apply::Delete { address } => {
                tracing::warn!(address = ?address, "self destruct ignored");
                None
            }
        })
        .collect()
}

pub struct ModelBackend {
    cache: ModelCacheRef,
    core: Arc<dyn ChainCore>,
    origin: H160,
    gas_limit: u64,
    /// callee of the running call and the code it runs
    callee: (H160, Vec<u8>),
}

impl ModelBackend {
    pub fn new(
        cache: ModelCacheRef,
        core: Arc<dyn ChainCore>,
        origin: H160,
        gas_limit: u64,
        callee: (H160, Vec<u8>),
    ) -> Self {
        Self {
            cache,
            core,
            origin,
            gas_limit,
            callee,
        }
    }

    /// writes the changes of an execution to the model cache: value moved out of contracts, then
    /// storage. A zero word deletes the slot.
    ///
    /// `settled` is the top level call as (caller, callee, value). The transaction moves that
    /// value before the execution, so it is not transferred again.
    pub fn apply(&self, changes: &[AccountChange], settled: (H160, H160, U256)) -> Result<(), BridgeError> {
        self.apply_transfers(changes, settled)?;
        let mut cache = self.cache.lock();
        for change in changes {
            let Some(name) = Self::contract_name(&change.address) else {
                continue;
            };
            for (slot, value) in &change.storage {
                if value.is_zero() {
                    cache.del(&name, slot.as_bytes())?;
                } else {
                    cache.put(&name, slot.as_bytes(), value.as_bytes())?;
                }
            }
        }
        Ok(())
    }

    // Balance changes are netted per account, then senders are paired with receivers in address
    // order. Only a contract name can send; other senders were settled by the transaction.
    fn apply_transfers(
        &self,
        changes: &[AccountChange],
        (caller, callee, value): (H160, H160, U256),
    ) -> Result<(), BridgeError> {
        let mut net: BTreeMap<H160, BigInt> = BTreeMap::new();
        for change in changes {
            let before = self.basic(change.address).balance;
            if before != change.balance {
                *net.entry(change.address).or_default() += to_bigint(change.balance) - to_bigint(before);
            }
        }
        if !value.is_zero() {
            *net.entry(caller).or_default() += to_bigint(value);
            *net.entry(callee).or_default() -= to_bigint(value);
        }

        let mut senders = Vec::new();
        let mut receivers = VecDeque::new();
        for (address, delta) in net {
            match delta.sign() {
                Sign::Minus => senders.push((address, -delta)),
                Sign::Plus => receivers.push_back((address, delta)),
                Sign::NoSign => {}
            }
        }

        let mut cache = self.cache.lock();
        for (from, mut remaining) in senders {
            while remaining.sign() == Sign::Plus {
                let Some((to, available)) = receivers.front_mut() else {
                    break;
                };
                let amount = remaining.clone().min(available.clone());
                remaining -= &amount;
                *available -= &amount;
                let exhausted = available.sign() == Sign::NoSign;
                let to = *to;
                if exhausted {
                    receivers.pop_front();
                }

                let Some(sender) = Self::contract_name(&from) else {
                    continue;
                };
                let (receiver, _) = determine_evm_address(&to)?;
                tracing::debug!(from = %sender, to = %receiver, amount = %amount, "evm transfer");
                cache.transfer(&sender, &receiver, amount.magnitude())?;
            }
        }
        Ok(())
    }

    fn contract_name(address: &H160) -> Option<String> {
        match determine_evm_address(address) {
            Ok((name, AddressType::ContractName)) => Some(name),
            _ => None,
        }
    }

    fn last_block_height(&self) -> i64 {
        self.core.query_last_block().map(|b| b.height).unwrap_or_default()
    }
}

impl Backend for ModelBackend {
    fn gas_price(&self) -> U256 {
        U256::zero()
    }

    fn origin(&self) -> H160 {
        self.origin
    }

    fn block_hash(&self, number: U256) -> H256 {
        if number > U256::from(i64::MAX as u64) {
            return H256::zero();
        }
        match self.core.query_block_by_height(number.as_u64() as i64) {
            Ok(block) => word(&block.blockid),
            Err(_) => H256::zero(),
        }
    }

    fn block_number(&self) -> U256 {
        U256::from(self.last_block_height().max(0) as u64)
    }

    fn block_coinbase(&self) -> H160 {
        H160::zero()
    }

    /// seconds; block timestamps are kept in nanoseconds.
    fn block_timestamp(&self) -> U256 {
        let timestamp = self
            .core
            .query_last_block()
            .map(|b| b.timestamp)
            .unwrap_or_default();
        U256::from((timestamp / 1_000_000_000).max(0) as u64)
    }

    fn block_difficulty(&self) -> U256 {
        U256::zero()
    }

    fn block_randomness(&self) -> Option<H256> {
        None
    }

    fn block_gas_limit(&self) -> U256 {
        U256::from(self.gas_limit)
    }

    fn block_base_fee_per_gas(&self) -> U256 {
        U256::zero()
    }

    fn chain_id(&self) -> U256 {
        U256::zero()
    }

    fn exists(&self, address: H160) -> bool {
        !self.code(address).is_empty() || !self.basic(address).balance.is_zero()
    }

    fn basic(&self, address: H160) -> Basic {
        let balance = determine_evm_address(&address)
            .ok()
            .and_then(|(identity, _)| self.core.get_balance(&identity).ok())
            .map(|balance| to_u256(&balance))
            .unwrap_or_default();
        Basic {
            balance,
            nonce: U256::zero(),
        }
    }

    fn code(&self, address: H160) -> Vec<u8> {
        if address == self.callee.0 {
            return self.callee.1.clone();
        }
        let Some(name) = Self::contract_name(&address) else {
            return Vec::new();
        };
        let result = self.cache.lock().get(CONTRACT_BUCKET, &contract_code_key(&name));
        result.map(|data| data.value).unwrap_or_default()
    }

    fn storage(&self, address: H160, index: H256) -> H256 {
        let Some(name) = Self::contract_name(&address) else {
            return H256::zero();
        };
        let result = self.cache.lock().get(&name, index.as_bytes());
        match result {
            Ok(data) => word(&data.value),
            Err(ModelError::NotFound) => H256::zero(),
            Err(e) => {
                tracing::warn!(contract = %name, error = %e, "fail to read evm storage");
                H256::zero()
            }
        }
    }

    fn original_storage(&self, address: H160, index: H256) -> Option<H256> {
        Some(self.storage(address, index))
    }
}

// Right aligns up to 32 bytes into a word.
fn word(bytes: &[u8]) -> H256 {
    let bytes = &bytes[bytes.len().saturating_sub(32)..];
    let mut word = H256::zero();
    word.as_bytes_mut()[32 - bytes.len()..].copy_from_slice(bytes);
    word
}

fn to_bigint(value: U256) -> BigInt {
    let mut bytes = [0u8; 32];
    value.to_big_endian(&mut bytes);
    BigInt::from_bytes_be(Sign::Plus, &bytes)
}

fn to_u256(value: &BigUint) -> U256 {
    let bytes = value.to_bytes_be();
    if bytes.len() > 32 {
        U256::MAX
    } else {
        U256::from_big_endian(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_right_aligns() {
        assert_eq!(word(&[]), H256::zero());
        assert_eq!(word(&[1]), H256::from_low_u64_be(1));
        let long = [7u8; 40];
        assert_eq!(word(&long), H256::repeat_byte(7));
    }

    #[test]
    fn huge_balance_saturates() {
        assert_eq!(to_u256(&BigUint::from(5u32)), U256::from(5));
        let huge = BigUint::from(1u32) << 300;
        assert_eq!(to_u256(&huge), U256::MAX);
    }

    #[test]
    fn self_destruct_is_dropped() {
        let address = H160::repeat_byte(1);
        let values: Vec<Apply<Vec<(H256, H256)>>> = vec![
            Apply::Delete { address },
            Apply::Modify {
                address,
                basic: Basic {
                    balance: U256::from(3),
                    nonce: U256::zero(),
                },
                code: None,
                storage: vec![(H256::zero(), H256::repeat_byte(2))],
                reset_storage: false,
            },
        ];
        assert_eq!(
            collect_changes(values),
            vec![AccountChange {
                address,
                balance: U256::from(3),
                storage: vec![(H256::zero(), H256::repeat_byte(2))],
            }]
        );
        assert_eq!(to_bigint(U256::from(7)), BigInt::from(7));
        assert_eq!(to_bigint(U256::zero()), BigInt::from(0));
    }
}
