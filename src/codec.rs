// Copyright (c) 2024 The Sortcoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Upper bound on a single wire message: a full shard body plus envelope
/// headroom. Larger payloads are rejected before they touch a decoder.
pub const CODEC_BYTES_LIMIT: usize = crate::consensus::MAX_BLOCK_SIZE + 1024 * 1024;

#[derive(Debug)]
pub enum CodecErr {
    /// Message exceeds `CODEC_BYTES_LIMIT`
    TooLarge(usize),

    /// Payload is not a valid document for the expected type
    Malformed,
}

/// Encode a wire value. Topic messages are JSON documents; the canonical
/// signing layouts in `primitives` are separate and unaffected by this
/// encoding.
pub fn encode_to_vec<T: Serialize>(val: &T) -> Result<Vec<u8>, CodecErr> {
    serde_json::to_vec(val).map_err(|_| CodecErr::Malformed)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecErr> {
    if bytes.len() > CODEC_BYTES_LIMIT {
        return Err(CodecErr::TooLarge(bytes.len()));
    }
    serde_json::from_slice(bytes).map_err(|_| CodecErr::Malformed)
}
