/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! model defines the interfaces this crate requires from its external collaborators:
//! - [StateReader]: read access to committed chain state,
//! - [ModelCache]: the transaction scoped read/write set contracts read and mutate,
//! - [ChainCore]: ledger queries and permission checks.
//!
//! All contract storage operations are bucket scoped by contract name.

use std::sync::Arc;

use num_bigint::BigUint;
use parking_lot::Mutex;

use crate::error::ModelError;
use crate::types::{Block, ContractEvent, Transaction};

/// VersionedData is a value read from state together with the transaction output that produced it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionedData {
    pub bucket: String,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub ref_txid: Vec<u8>,
    pub ref_offset: i32,
}

/// PureData is an entry of a write set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PureData {
    pub bucket: String,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// Read access to a key value store.
pub trait StateReader: Send + Sync {
    /// returns [ModelError::NotFound] if the key is absent.
    fn get(&self, bucket: &str, key: &[u8]) -> Result<VersionedData, ModelError>;
}

pub type ModelIter<'a> = Box<dyn Iterator<Item = Result<VersionedData, ModelError>> + 'a>;

/// ModelCache is the read/write set of one transaction.
pub trait ModelCache: Send {
    fn get(&mut self, bucket: &str, key: &[u8]) -> Result<VersionedData, ModelError>;

    fn put(&mut self, bucket: &str, key: &[u8], value: &[u8]) -> Result<(), ModelError>;

    fn del(&mut self, bucket: &str, key: &[u8]) -> Result<(), ModelError>;

    /// range scan over `[start, limit)` in `bucket`.
    fn select<'a>(
        &'a mut self,
        bucket: &str,
        start: &[u8],
        limit: &[u8],
    ) -> Result<ModelIter<'a>, ModelError>;

    fn transfer(&mut self, from: &str, to: &str, amount: &BigUint) -> Result<(), ModelError>;

    /// returns (read set, write set)
    fn get_rw_sets(&self) -> (Vec<VersionedData>, Vec<PureData>);

    fn add_event(&mut self, _event: ContractEvent) {}
}

/// ModelCacheRef is the handle to the read/write set shared by one call tree.
pub type ModelCacheRef = Arc<Mutex<dyn ModelCache>>;

/// ChainCore is the ledger side collaborator.
pub trait ChainCore: Send + Sync {
    fn query_transaction(&self, txid: &[u8]) -> Result<Transaction, ModelError>;

    fn query_block(&self, blockid: &[u8]) -> Result<Block, ModelError>;

    fn query_last_block(&self) -> Result<Block, ModelError>;

    fn query_block_by_height(&self, height: i64) -> Result<Block, ModelError>;

    fn get_balance(&self, address: &str) -> Result<BigUint, ModelError>;

    fn verify_contract_permission(
        &self,
        initiator: &str,
        auth_require: &[String],
        contract: &str,
        method: &str,
    ) -> Result<bool, ModelError>;

    fn get_account_addresses(&self, account: &str) -> Result<Vec<String>, ModelError>;
}

/// CacheReader reads through the pending write set of a [ModelCache].
#[derive(Clone)]
pub struct CacheReader(pub ModelCacheRef);

impl StateReader for CacheReader {
    fn get(&self, bucket: &str, key: &[u8]) -> Result<VersionedData, ModelError> {
        self.0.lock().get(bucket, key)
    }
}

/// disk used by the write set: the sum of the sizes of its keys and values.
pub fn model_cache_disk_used(cache: &dyn ModelCache) -> i64 {
    let (_, wset) = cache.get_rw_sets();
    wset.iter()
        .map(|w| (w.key.len() + w.value.len()) as i64)
        .sum()
}
