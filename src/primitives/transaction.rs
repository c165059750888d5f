// Copyright (c) 2024 The Sortcoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::primitives::{sha256, verify, Address, Hash256, Keypair, Signature};
use serde::{Deserialize, Serialize};

/// Canonical encoded size of a transaction with an empty payload
pub const TX_BASE_BYTES: usize = 32 + 32 + 32 + 8 + 8 + 8 + 8 + 64 + 4;

#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    /// Content hash: `SHA256(signing bytes)`. Does not cover fee, gas or the
    /// signature.
    pub id: Hash256,
    /// All-zero sender denotes the coinbase / system transaction
    pub sender: Address,
    pub receiver: Address,
    pub amount: u64,
    pub fee: u64,
    pub gas: u64,
    pub nonce: u64,
    /// Ed25519 signature over the signing bytes; all-zero for coinbase
    pub signature: Signature,
    /// Opaque bytes, carried for external consumers
    #[serde(default)]
    pub payload: Vec<u8>,
}

impl Transaction {
    /// Coinbase transaction minting `amount` to `receiver`.
    ///
    /// The nonce carries the block height so every height produces a distinct
    /// id. Coinbase bypasses the nonce and balance rules at application time.
    #[must_use]
    pub fn coinbase(receiver: Address, amount: u64, height: u64) -> Self {
        let mut tx = Self {
            id: Hash256::zero(),
            sender: Address::zero(),
            receiver,
            amount,
            fee: 0,
            gas: 0,
            nonce: height,
            signature: Signature::zero(),
            payload: vec![],
        };
        tx.id = tx.compute_id();
        tx
    }

    #[must_use]
    pub fn is_coinbase(&self) -> bool {
        self.sender.is_zero()
    }

    /// Bytes covered by the signature and the id:
    /// `sender ‖ receiver ‖ amount (u64 LE) ‖ nonce (u64 LE) ‖ payload`.
    ///
    /// Fee and gas are auxiliary metadata and deliberately excluded. The
    /// layout is consensus-visible and must be bit-exact across nodes.
    #[must_use]
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(80 + self.payload.len());
        buf.extend_from_slice(&self.sender.0);
        buf.extend_from_slice(&self.receiver.0);
        buf.extend_from_slice(&self.amount.to_le_bytes());
        buf.extend_from_slice(&self.nonce.to_le_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    #[must_use]
    pub fn compute_id(&self) -> Hash256 {
        sha256(self.signing_bytes())
    }

    /// Sign with `keypair`, setting sender, signature and id
    pub fn sign(&mut self, keypair: &Keypair) {
        self.sender = keypair.address();
        self.signature = keypair.sign(&self.signing_bytes());
        self.id = self.compute_id();
    }

    #[must_use]
    pub fn verify_signature(&self) -> bool {
        verify(&self.sender, &self.signing_bytes(), &self.signature)
    }

    /// Stateless validity: id integrity, non-zero amount, no self-transfer
    /// and a valid signature. Coinbase transactions skip the signature and
    /// self-transfer rules. Nonce and balance are checked against state
    /// elsewhere.
    pub fn validate(&self) -> Result<(), TxVerifyErr> {
        if self.id != self.compute_id() {
            return Err(TxVerifyErr::InvalidId);
        }

        if self.amount == 0 {
            return Err(TxVerifyErr::ZeroAmount);
        }

        if !self.is_coinbase() {
            if self.sender == self.receiver {
                return Err(TxVerifyErr::SelfTransfer);
            }

            if !self.verify_signature() {
                return Err(TxVerifyErr::InvalidSignature);
            }
        }

        Ok(())
    }

    /// Canonical full encoding, fixed little-endian layout:
    /// `id ‖ sender ‖ receiver ‖ amount ‖ fee ‖ gas ‖ nonce ‖ signature ‖
    /// payload_len (u32 LE) ‖ payload`.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(TX_BASE_BYTES + self.payload.len());
        buf.extend_from_slice(&self.id.0);
        buf.extend_from_slice(&self.sender.0);
        buf.extend_from_slice(&self.receiver.0);
        buf.extend_from_slice(&self.amount.to_le_bytes());
        buf.extend_from_slice(&self.fee.to_le_bytes());
        buf.extend_from_slice(&self.gas.to_le_bytes());
        buf.extend_from_slice(&self.nonce.to_le_bytes());
        buf.extend_from_slice(&self.signature.0);
        buf.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, &'static str> {
        if bytes.len() < TX_BASE_BYTES {
            return Err("transaction too short");
        }

        let mut cursor = Cursor { bytes, pos: 0 };
        let id = Hash256(cursor.take_32()?);
        let sender = Address(cursor.take_32()?);
        let receiver = Address(cursor.take_32()?);
        let amount = cursor.take_u64()?;
        let fee = cursor.take_u64()?;
        let gas = cursor.take_u64()?;
        let nonce = cursor.take_u64()?;
        let signature = Signature(cursor.take_64()?);
        let payload_len = cursor.take_u32()? as usize;
        let payload = cursor.take_vec(payload_len)?;

        if cursor.pos != bytes.len() {
            return Err("trailing bytes after transaction");
        }

        Ok(Self {
            id,
            sender,
            receiver,
            amount,
            fee,
            gas,
            nonce,
            signature,
            payload,
        })
    }

    /// Canonical encoded size in bytes
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        TX_BASE_BYTES + self.payload.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxVerifyErr {
    /// Id does not match the content hash
    InvalidId,

    /// Zero-amount transfer
    ZeroAmount,

    /// Sender and receiver are the same non-coinbase account
    SelfTransfer,

    /// Signature does not verify against the sender key
    InvalidSignature,
}

pub(crate) struct Cursor<'a> {
    pub bytes: &'a [u8],
    pub pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn take(&mut self, n: usize) -> Result<&'a [u8], &'static str> {
        if self.pos + n > self.bytes.len() {
            return Err("unexpected end of input");
        }
        let out = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn take_32(&mut self) -> Result<[u8; 32], &'static str> {
        let mut out = [0; 32];
        out.copy_from_slice(self.take(32)?);
        Ok(out)
    }

    pub fn take_64(&mut self) -> Result<[u8; 64], &'static str> {
        let mut out = [0; 64];
        out.copy_from_slice(self.take(64)?);
        Ok(out)
    }

    pub fn take_u32(&mut self) -> Result<u32, &'static str> {
        let mut out = [0; 4];
        out.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(out))
    }

    pub fn take_u64(&mut self) -> Result<u64, &'static str> {
        let mut out = [0; 8];
        out.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(out))
    }

    pub fn take_i64(&mut self) -> Result<i64, &'static str> {
        let mut out = [0; 8];
        out.copy_from_slice(self.take(8)?);
        Ok(i64::from_le_bytes(out))
    }

    pub fn take_vec(&mut self, n: usize) -> Result<Vec<u8>, &'static str> {
        Ok(self.take(n)?.to_vec())
    }
}
