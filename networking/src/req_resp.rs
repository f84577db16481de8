use std::io;
use std::io::{Read, Write};

use alloy_primitives::Bytes;
use alloy_rlp::{Decodable, Encodable, RlpDecodable, RlpEncodable};
use containers::{BlockRecord, NodeHash, TrieName, TrieNode};
use snap::read::FrameDecoder;
use snap::write::FrameEncoder;

use crate::sync::config::{MAX_BLOCKS_PER_REQUEST, MAX_NODES_PER_REQUEST};

pub const NODES_BY_HASH_PROTOCOL_V1: &str = "/fastsync/req/nodes_by_hash/1/rlp_snappy";
pub const BLOCKS_BY_RANGE_PROTOCOL_V1: &str = "/fastsync/req/blocks_by_range/1/rlp_snappy";
pub const ROOT_HASH_PROTOCOL_V1: &str = "/fastsync/req/root_hash/1/rlp_snappy";
pub const LATEST_HEIGHT_PROTOCOL_V1: &str = "/fastsync/req/latest_height/1/rlp_snappy";

const NODES_BY_HASH_TAG: u8 = 0x01;
const BLOCKS_BY_RANGE_TAG: u8 = 0x02;
const ROOT_HASH_TAG: u8 = 0x03;
const LATEST_HEIGHT_TAG: u8 = 0x04;
const ERROR_TAG: u8 = 0xff;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("snappy framing failed: {0}")]
    Io(#[from] io::Error),
    #[error("empty message")]
    Empty,
    #[error("unknown message tag {0:#04x}")]
    UnknownTag(u8),
    #[error("rlp decoding failed: {0}")]
    Rlp(#[from] alloy_rlp::Error),
    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),
    #[error("too many items requested: {requested} > {max}")]
    TooLarge { requested: u64, max: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, RlpEncodable, RlpDecodable)]
struct BlockRange {
    from: u64,
    to: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, RlpEncodable, RlpDecodable)]
struct RootHashQuery {
    trie: TrieName,
    height: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncRequest {
    NodesByHash(Vec<NodeHash>),
    BlocksByRange { from: u64, to: u64 },
    RootHash { trie: TrieName, height: u64 },
    LatestHeight,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncResponse {
    Nodes(Vec<TrieNode>),
    Blocks(Vec<BlockRecord>),
    RootHash(NodeHash),
    LatestHeight(u64),
    Error(String),
}

impl SyncRequest {
    pub fn protocol(&self) -> &'static str {
        match self {
            SyncRequest::NodesByHash(_) => NODES_BY_HASH_PROTOCOL_V1,
            SyncRequest::BlocksByRange { .. } => BLOCKS_BY_RANGE_PROTOCOL_V1,
            SyncRequest::RootHash { .. } => ROOT_HASH_PROTOCOL_V1,
            SyncRequest::LatestHeight => LATEST_HEIGHT_PROTOCOL_V1,
        }
    }
}

/// Wire codec of the fast sync protocols.
///
/// A message is a one-byte tag followed by the RLP payload, compressed with
/// Snappy framing.
#[derive(Clone, Default)]
pub struct SyncCodec;

impl SyncCodec {
    /// Compress data using Snappy framing format
    fn compress(data: &[u8]) -> io::Result<Vec<u8>> {
        let mut encoder = FrameEncoder::new(Vec::new());
        encoder.write_all(data)?;
        encoder
            .into_inner()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("Snappy framing failed: {e}")))
    }

    /// Decompress data using Snappy framing format
    fn decompress(data: &[u8]) -> io::Result<Vec<u8>> {
        let mut decoder = FrameDecoder::new(data);
        let mut decompressed = Vec::new();
        decoder.read_to_end(&mut decompressed)?;
        Ok(decompressed)
    }

    fn frame(tag: u8, payload: &dyn Encodable) -> io::Result<Vec<u8>> {
        let mut bytes = vec![tag];
        payload.encode(&mut bytes);
        Self::compress(&bytes)
    }

    fn unframe(data: &[u8]) -> Result<(u8, Vec<u8>), CodecError> {
        if data.is_empty() {
            return Err(CodecError::Empty);
        }
        let mut bytes = Self::decompress(data)?;
        if bytes.is_empty() {
            return Err(CodecError::Empty);
        }
        let payload = bytes.split_off(1);
        Ok((bytes[0], payload))
    }

    fn decode_payload<T: Decodable>(payload: &[u8]) -> Result<T, CodecError> {
        let mut buf = payload;
        let value = T::decode(&mut buf)?;
        if !buf.is_empty() {
            return Err(CodecError::TrailingBytes(buf.len()));
        }
        Ok(value)
    }

    pub fn encode_request(request: &SyncRequest) -> Result<Vec<u8>, CodecError> {
        let framed = match request {
            SyncRequest::NodesByHash(hashes) => Self::frame(NODES_BY_HASH_TAG, hashes)?,
            SyncRequest::BlocksByRange { from, to } => Self::frame(
                BLOCKS_BY_RANGE_TAG,
                &BlockRange {
                    from: *from,
                    to: *to,
                },
            )?,
            SyncRequest::RootHash { trie, height } => Self::frame(
                ROOT_HASH_TAG,
                &RootHashQuery {
                    trie: *trie,
                    height: *height,
                },
            )?,
            SyncRequest::LatestHeight => Self::frame(LATEST_HEIGHT_TAG, &Bytes::new())?,
        };
        Ok(framed)
    }

    pub fn decode_request(data: &[u8]) -> Result<SyncRequest, CodecError> {
        let (tag, payload) = Self::unframe(data)?;
        match tag {
            NODES_BY_HASH_TAG => {
                let hashes: Vec<NodeHash> = Self::decode_payload(&payload)?;
                if hashes.len() > MAX_NODES_PER_REQUEST {
                    return Err(CodecError::TooLarge {
                        requested: hashes.len() as u64,
                        max: MAX_NODES_PER_REQUEST as u64,
                    });
                }
                Ok(SyncRequest::NodesByHash(hashes))
            }
            BLOCKS_BY_RANGE_TAG => {
                let BlockRange { from, to } = Self::decode_payload(&payload)?;
                let requested = to.saturating_add(1).saturating_sub(from);
                if requested > MAX_BLOCKS_PER_REQUEST {
                    return Err(CodecError::TooLarge {
                        requested,
                        max: MAX_BLOCKS_PER_REQUEST,
                    });
                }
                Ok(SyncRequest::BlocksByRange { from, to })
            }
            ROOT_HASH_TAG => {
                let RootHashQuery { trie, height } = Self::decode_payload(&payload)?;
                Ok(SyncRequest::RootHash { trie, height })
            }
            LATEST_HEIGHT_TAG => {
                let _: Bytes = Self::decode_payload(&payload)?;
                Ok(SyncRequest::LatestHeight)
            }
            other => Err(CodecError::UnknownTag(other)),
        }
    }

    pub fn encode_response(response: &SyncResponse) -> Result<Vec<u8>, CodecError> {
        let framed = match response {
            SyncResponse::Nodes(nodes) => Self::frame(NODES_BY_HASH_TAG, nodes)?,
            SyncResponse::Blocks(blocks) => Self::frame(BLOCKS_BY_RANGE_TAG, blocks)?,
            SyncResponse::RootHash(root) => Self::frame(ROOT_HASH_TAG, root)?,
            SyncResponse::LatestHeight(height) => Self::frame(LATEST_HEIGHT_TAG, height)?,
            SyncResponse::Error(message) => Self::frame(ERROR_TAG, &message.as_str())?,
        };
        Ok(framed)
    }

    pub fn decode_response(data: &[u8]) -> Result<SyncResponse, CodecError> {
        let (tag, payload) = Self::unframe(data)?;
        let response = match tag {
            NODES_BY_HASH_TAG => SyncResponse::Nodes(Self::decode_payload(&payload)?),
            BLOCKS_BY_RANGE_TAG => SyncResponse::Blocks(Self::decode_payload(&payload)?),
            ROOT_HASH_TAG => SyncResponse::RootHash(Self::decode_payload(&payload)?),
            LATEST_HEIGHT_TAG => SyncResponse::LatestHeight(Self::decode_payload(&payload)?),
            ERROR_TAG => SyncResponse::Error(Self::decode_payload(&payload)?),
            other => return Err(CodecError::UnknownTag(other)),
        };
        Ok(response)
    }
}
