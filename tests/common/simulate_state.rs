use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use num_bigint::BigUint;
use parking_lot::Mutex;
use xbridge_runtime::model::{ChainCore, ModelCache, ModelIter, PureData, StateReader, VersionedData};
use xbridge_runtime::types::{Block, ContractEvent, Transaction};
use xbridge_runtime::ModelError;

type StateKey = (String, Vec<u8>);

/// Committed key value state.
#[derive(Default)]
pub struct SimulateStore {
    inner: Mutex<BTreeMap<StateKey, Vec<u8>>>,
    balances: Mutex<HashMap<String, BigUint>>,
}

impl SimulateStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn get_value(&self, bucket: &str, key: &[u8]) -> Option<Vec<u8>> {
        self.inner.lock().get(&(bucket.to_string(), key.to_vec())).cloned()
    }

    pub fn set_value(&self, bucket: &str, key: &[u8], value: &[u8]) {
        self.inner
            .lock()
            .insert((bucket.to_string(), key.to_vec()), value.to_vec());
    }

    pub fn balance(&self, address: &str) -> BigUint {
        self.balances.lock().get(address).cloned().unwrap_or_default()
    }

    pub fn set_balance(&self, address: &str, amount: u64) {
        self.balances
            .lock()
            .insert(address.to_string(), BigUint::from(amount));
    }

    /// applies the write set and the balance changes of a transaction.
    pub fn commit(&self, cache: &SimulateModelCache) {
        let mut inner = self.inner.lock();
        for ((bucket, key), value) in &cache.writes {
            match value {
                Some(value) => {
                    inner.insert((bucket.clone(), key.clone()), value.clone());
                }
                None => {
                    inner.remove(&(bucket.clone(), key.clone()));
                }
            }
        }
        let mut balances = self.balances.lock();
        for (address, balance) in &cache.balances {
            balances.insert(address.clone(), balance.clone());
        }
    }
}

impl StateReader for SimulateStore {
    fn get(&self, bucket: &str, key: &[u8]) -> Result<VersionedData, ModelError> {
        self.get_value(bucket, key)
            .map(|value| VersionedData {
                bucket: bucket.to_string(),
                key: key.to_vec(),
                value,
                ..Default::default()
            })
            .ok_or(ModelError::NotFound)
    }
}

/// Read/write set of one transaction over a [SimulateStore]. A deleted key is a write of `None`.
pub struct SimulateModelCache {
    store: Arc<SimulateStore>,
    reads: BTreeMap<StateKey, VersionedData>,
    writes: BTreeMap<StateKey, Option<Vec<u8>>>,
    balances: HashMap<String, BigUint>,
    pub events: Vec<ContractEvent>,
}

impl SimulateModelCache {
    pub fn new(store: Arc<SimulateStore>) -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self {
            store,
            reads: BTreeMap::new(),
            writes: BTreeMap::new(),
            balances: HashMap::new(),
            events: Vec::new(),
        }))
    }

    pub fn pending(&self, bucket: &str, key: &[u8]) -> Option<Option<Vec<u8>>> {
        self.writes.get(&(bucket.to_string(), key.to_vec())).cloned()
    }

    pub fn balance(&self, address: &str) -> BigUint {
        self.balances
            .get(address)
            .cloned()
            .unwrap_or_else(|| self.store.balance(address))
    }
}

impl ModelCache for SimulateModelCache {
    fn get(&mut self, bucket: &str, key: &[u8]) -> Result<VersionedData, ModelError> {
        let state_key = (bucket.to_string(), key.to_vec());
        match self.writes.get(&state_key) {
            Some(Some(value)) => {
                return Ok(VersionedData {
                    bucket: bucket.to_string(),
                    key: key.to_vec(),
                    value: value.clone(),
                    ..Default::default()
                })
            }
            Some(None) => return Err(ModelError::NotFound),
            None => {}
        }
        let data = self.store.get(bucket, key)?;
        self.reads.insert(state_key, data.clone());
        Ok(data)
    }

    fn put(&mut self, bucket: &str, key: &[u8], value: &[u8]) -> Result<(), ModelError> {
        self.writes
            .insert((bucket.to_string(), key.to_vec()), Some(value.to_vec()));
        Ok(())
    }

    fn del(&mut self, bucket: &str, key: &[u8]) -> Result<(), ModelError> {
        self.writes.insert((bucket.to_string(), key.to_vec()), None);
        Ok(())
    }

    fn select<'a>(
        &'a mut self,
        bucket: &str,
        start: &[u8],
        limit: &[u8],
    ) -> Result<ModelIter<'a>, ModelError> {
        let in_range = |b: &str, k: &[u8]| b == bucket && k >= start && (limit.is_empty() || k < limit);

        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = self
            .store
            .inner
            .lock()
            .iter()
            .filter(|((b, k), _)| in_range(b, k))
            .map(|((_, k), v)| (k.clone(), v.clone()))
            .collect();
        for ((b, k), v) in &self.writes {
            if !in_range(b, k) {
                continue;
            }
            match v {
                Some(v) => merged.insert(k.clone(), v.clone()),
                None => merged.remove(k),
            };
        }

        let bucket = bucket.to_string();
        Ok(Box::new(merged.into_iter().map(move |(key, value)| {
            Ok(VersionedData {
                bucket: bucket.clone(),
                key,
                value,
                ..Default::default()
            })
        })))
    }

    fn transfer(&mut self, from: &str, to: &str, amount: &BigUint) -> Result<(), ModelError> {
        let from_balance = self.balance(from);
        if &from_balance < amount {
            return Err(ModelError::Other("balance not enough".to_string()));
        }
        let to_balance = self.balance(to);
        self.balances.insert(from.to_string(), from_balance - amount);
        self.balances.insert(to.to_string(), to_balance + amount);
        Ok(())
    }

    fn get_rw_sets(&self) -> (Vec<VersionedData>, Vec<PureData>) {
        let reads = self.reads.values().cloned().collect();
        let writes = self
            .writes
            .iter()
            .map(|((bucket, key), value)| PureData {
                bucket: bucket.clone(),
                key: key.clone(),
                value: value.clone().unwrap_or_default(),
            })
            .collect();
        (reads, writes)
    }

    fn add_event(&mut self, event: ContractEvent) {
        self.events.push(event);
    }
}

/// Ledger of blocks and transactions, with per contract permission denial.
#[derive(Default)]
pub struct SimulateChain {
    pub store: Arc<SimulateStore>,
    pub blocks: Vec<Block>,
    pub transactions: HashMap<Vec<u8>, Transaction>,
    pub denied_contracts: HashSet<String>,
    pub accounts: HashMap<String, Vec<String>>,
}

impl SimulateChain {
    pub fn new(store: Arc<SimulateStore>) -> Self {
        Self {
            store,
            ..Default::default()
        }
    }
}

impl ChainCore for SimulateChain {
    fn query_transaction(&self, txid: &[u8]) -> Result<Transaction, ModelError> {
        self.transactions.get(txid).cloned().ok_or(ModelError::NotFound)
    }

    fn query_block(&self, blockid: &[u8]) -> Result<Block, ModelError> {
        self.blocks
            .iter()
            .find(|block| block.blockid == blockid)
            .cloned()
            .ok_or(ModelError::NotFound)
    }

    fn query_last_block(&self) -> Result<Block, ModelError> {
        self.blocks.last().cloned().ok_or(ModelError::NotFound)
    }

    fn query_block_by_height(&self, height: i64) -> Result<Block, ModelError> {
        self.blocks
            .iter()
            .find(|block| block.height == height)
            .cloned()
            .ok_or(ModelError::NotFound)
    }

    fn get_balance(&self, address: &str) -> Result<BigUint, ModelError> {
        Ok(self.store.balance(address))
    }

    fn verify_contract_permission(
        &self,
        _initiator: &str,
        _auth_require: &[String],
        contract: &str,
        _method: &str,
    ) -> Result<bool, ModelError> {
        Ok(!self.denied_contracts.contains(contract))
    }

    fn get_account_addresses(&self, account: &str) -> Result<Vec<String>, ModelError> {
        self.accounts.get(account).cloned().ok_or(ModelError::NotFound)
    }
}
