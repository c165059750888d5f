// Copyright (c) 2024 The Sortcoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::primitives::{Address, BlockHeader, ShardBody};
use log::warn;
use rocksdb::{Options, WriteBatch, DB};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::thread;
use std::time::Duration;
use triomphe::Arc;

/// Bounded retry for transient read failures
const READ_RETRIES: usize = 3;
const READ_BACKOFF_MS: u64 = 50;

#[derive(Debug)]
pub enum StoreErr {
    /// Rocksdb error after retries were exhausted
    RocksDB(rocksdb::Error),

    /// Stored bytes failed to decode
    CorruptData,
}

impl From<rocksdb::Error> for StoreErr {
    fn from(other: rocksdb::Error) -> Self {
        Self::RocksDB(other)
    }
}

/// Open the node database, creating it if missing
pub fn open_db<P: AsRef<Path>>(path: P) -> Result<Arc<DB>, StoreErr> {
    let mut opts = Options::default();
    opts.create_if_missing(true);
    opts.set_keep_log_file_num(1);
    let db = DB::open(&opts, path)?;
    Ok(Arc::new(db))
}

/// Typed access to the persisted chain layout. Values are JSON documents;
/// the key scheme is part of the node's on-disk contract:
///
/// * `account-` ‖ pubkey          → account state
/// * `block-header-` ‖ height     → header
/// * `block-{h}-shard-{s}`        → one shard body per key
/// * `undo-{h}`                   → prior account values touched at `h`
/// * `tip`                        → canonical head header
///
/// Shard bodies are stored one per key so a commit never materializes the
/// whole block in a single value.
#[derive(Clone)]
pub struct ChainStore {
    db: Arc<DB>,
}

impl ChainStore {
    #[must_use]
    pub fn new(db: Arc<DB>) -> Self {
        Self { db }
    }

    #[must_use]
    pub fn account_key(address: &Address) -> Vec<u8> {
        let mut key = b"account-".to_vec();
        key.extend_from_slice(&address.0);
        key
    }

    #[must_use]
    pub fn header_key(height: u64) -> Vec<u8> {
        format!("block-header-{height}").into_bytes()
    }

    #[must_use]
    pub fn shard_key(height: u64, shard: usize) -> Vec<u8> {
        format!("block-{height}-shard-{shard}").into_bytes()
    }

    #[must_use]
    pub fn undo_key(height: u64) -> Vec<u8> {
        format!("undo-{height}").into_bytes()
    }

    pub const TIP_KEY: &'static [u8] = b"tip";

    /// Read with bounded backoff; transient errors are retried before they
    /// surface.
    pub fn get_raw(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreErr> {
        let mut attempt = 0;
        loop {
            match self.db.get(key) {
                Ok(value) => return Ok(value),
                Err(err) if attempt + 1 < READ_RETRIES => {
                    attempt += 1;
                    warn!("storage read failed (attempt {attempt}): {err}");
                    thread::sleep(Duration::from_millis(READ_BACKOFF_MS * attempt as u64));
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    pub fn get_json<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>, StoreErr> {
        match self.get_raw(key)? {
            None => Ok(None),
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|_| StoreErr::CorruptData),
        }
    }

    pub fn stage_json<T: Serialize>(batch: &mut WriteBatch, key: Vec<u8>, value: &T) {
        // Serializing our own types cannot fail.
        let bytes = serde_json::to_vec(value).unwrap();
        batch.put(key, bytes);
    }

    pub fn write(&self, batch: WriteBatch) -> Result<(), StoreErr> {
        self.db.write(batch)?;
        Ok(())
    }

    pub fn header_at(&self, height: u64) -> Result<Option<BlockHeader>, StoreErr> {
        self.get_json(&Self::header_key(height))
    }

    pub fn shard_body(&self, height: u64, shard: usize) -> Result<Option<ShardBody>, StoreErr> {
        self.get_json(&Self::shard_key(height, shard))
    }

    pub fn tip(&self) -> Result<Option<BlockHeader>, StoreErr> {
        self.get_json(Self::TIP_KEY)
    }

    pub fn stage_header(batch: &mut WriteBatch, header: &BlockHeader) {
        Self::stage_json(batch, Self::header_key(header.height), header);
    }

    pub fn stage_shard(batch: &mut WriteBatch, height: u64, shard: usize, body: &ShardBody) {
        Self::stage_json(batch, Self::shard_key(height, shard), body);
    }

    pub fn stage_tip(batch: &mut WriteBatch, header: &BlockHeader) {
        Self::stage_json(batch, Self::TIP_KEY.to_vec(), header);
    }

    /// Delete the shard bodies and undo record at `height`; the header is
    /// retained forever.
    pub fn prune_body(&self, height: u64, num_shards: usize) -> Result<(), StoreErr> {
        let mut batch = WriteBatch::default();
        for shard in 0..num_shards {
            batch.delete(Self::shard_key(height, shard));
        }
        batch.delete(Self::undo_key(height));
        self.write(batch)
    }

    /// Reclaim disk space after a stretch of pruning
    pub fn compact(&self) {
        self.db.compact_range::<&[u8], &[u8]>(None, None);
    }
}

#[cfg(test)]
pub(crate) fn temp_db() -> Arc<DB> {
    let mut path = std::env::temp_dir();
    path.push(hex::encode(rand::random::<[u8; 16]>()));
    path.push("sortcoin-test");
    open_db(path).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::Hash256;

    #[test]
    fn header_round_trips_through_store() {
        let store = ChainStore::new(temp_db());
        let mut header = BlockHeader::genesis_mainnet();
        header.height = 12;

        let mut batch = WriteBatch::default();
        ChainStore::stage_header(&mut batch, &header);
        store.write(batch).unwrap();

        assert_eq!(store.header_at(12).unwrap(), Some(header));
        assert_eq!(store.header_at(13).unwrap(), None);
    }

    #[test]
    fn shard_bodies_are_stored_one_per_key() {
        let store = ChainStore::new(temp_db());
        let body = ShardBody::empty();

        let mut batch = WriteBatch::default();
        ChainStore::stage_shard(&mut batch, 3, 0, &body);
        ChainStore::stage_shard(&mut batch, 3, 9, &body);
        store.write(batch).unwrap();

        assert!(store.shard_body(3, 0).unwrap().is_some());
        assert!(store.shard_body(3, 9).unwrap().is_some());
        assert!(store.shard_body(3, 1).unwrap().is_none());
        assert_ne!(ChainStore::shard_key(3, 0), ChainStore::shard_key(3, 1));
    }

    #[test]
    fn prune_removes_bodies_but_not_headers() {
        let store = ChainStore::new(temp_db());
        let mut header = BlockHeader::genesis_mainnet();
        header.height = 5;

        let mut batch = WriteBatch::default();
        ChainStore::stage_header(&mut batch, &header);
        ChainStore::stage_shard(&mut batch, 5, 2, &ShardBody::empty());
        store.write(batch).unwrap();

        store.prune_body(5, 10).unwrap();
        assert!(store.shard_body(5, 2).unwrap().is_none());
        assert!(store.header_at(5).unwrap().is_some());
    }

    #[test]
    fn tip_round_trips() {
        let store = ChainStore::new(temp_db());
        assert!(store.tip().unwrap().is_none());

        let header = BlockHeader::genesis_mainnet();
        let mut batch = WriteBatch::default();
        ChainStore::stage_tip(&mut batch, &header);
        store.write(batch).unwrap();
        assert_eq!(store.tip().unwrap(), Some(header));
    }

    #[test]
    fn account_keys_embed_the_raw_address() {
        let address = Address(Hash256::hash_from_slice(b"addr").0);
        let key = ChainStore::account_key(&address);
        assert!(key.starts_with(b"account-"));
        assert_eq!(key.len(), 8 + 32);
    }
}
