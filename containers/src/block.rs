use crate::merkle::merkle_root;
use alloy_primitives::{keccak256, Bytes, B256};
use alloy_rlp::{RlpDecodable, RlpEncodable};
use k256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};

#[derive(Clone, Debug, Default, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct BlockHeader {
    pub index: u64,
    pub prev_block_hash: B256,
    pub merkle_root: B256,
    /// Aggregate hash of the six trie roots after this block.
    pub state_hash: B256,
    pub timestamp: u64,
    pub nonce: u64,
}

impl BlockHeader {
    /// Hash of the header encoding. A block is identified by it.
    pub fn keccak(&self) -> B256 {
        keccak256(alloy_rlp::encode(self))
    }
}

/// A validator's ECDSA signature over the block hash.
#[derive(Clone, Debug, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct ValidatorSignature {
    /// SEC1-encoded secp256k1 public key.
    pub public_key: Bytes,
    /// 64-byte `r ‖ s` signature.
    pub signature: Bytes,
}

#[derive(Clone, Debug, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct BlockRecord {
    pub header: BlockHeader,
    pub hash: B256,
    pub transaction_hashes: Vec<B256>,
    pub signatures: Vec<ValidatorSignature>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BlockError {
    #[error("block hash {declared} does not match header hash {computed}")]
    HashMismatch { declared: B256, computed: B256 },
    #[error("block {index} has no previous block hash")]
    MissingPrevHash { index: u64 },
    #[error("merkle root {declared} does not match transactions root {computed}")]
    MerkleRootMismatch { declared: B256, computed: B256 },
    #[error("block {index} carries no signatures")]
    MissingSignatures { index: u64 },
    #[error("signature #{position} is invalid")]
    InvalidSignature { position: usize },
    #[error("failed to sign block: {0}")]
    Signing(String),
}

impl BlockRecord {
    /// Build a block from its header and transactions.
    ///
    /// The header's merkle root is overwritten with the root of
    /// `transaction_hashes`, then every signer signs the resulting hash.
    pub fn seal(
        mut header: BlockHeader,
        transaction_hashes: Vec<B256>,
        signers: &[SigningKey],
    ) -> Result<Self, BlockError> {
        header.merkle_root = merkle_root(&transaction_hashes);
        let hash = header.keccak();
        let signatures = signers
            .iter()
            .map(|key| sign_hash(key, &hash))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            header,
            hash,
            transaction_hashes,
            signatures,
        })
    }

    pub fn height(&self) -> u64 {
        self.header.index
    }

    pub fn is_genesis(&self) -> bool {
        self.header.index == 0
    }

    /// Self-contained integrity checks of a block received from an untrusted peer.
    ///
    /// Linkage to the previous block is not checked here because it needs the
    /// already verified chain.
    pub fn verify(&self) -> Result<(), BlockError> {
        let computed = self.header.keccak();
        if self.hash != computed {
            return Err(BlockError::HashMismatch {
                declared: self.hash,
                computed,
            });
        }
        if !self.is_genesis() && self.header.prev_block_hash.is_zero() {
            return Err(BlockError::MissingPrevHash {
                index: self.header.index,
            });
        }
        let computed = merkle_root(&self.transaction_hashes);
        if self.header.merkle_root != computed {
            return Err(BlockError::MerkleRootMismatch {
                declared: self.header.merkle_root,
                computed,
            });
        }
        self.verify_signatures()
    }

    /// Check every signature against the block hash.
    ///
    /// The validator set at the block's height is not known during fast sync,
    /// so only the signatures themselves are checked.
    pub fn verify_signatures(&self) -> Result<(), BlockError> {
        if !self.is_genesis() && self.signatures.is_empty() {
            return Err(BlockError::MissingSignatures {
                index: self.header.index,
            });
        }

        for (position, entry) in self.signatures.iter().enumerate() {
            let invalid = |_| BlockError::InvalidSignature { position };
            let key = VerifyingKey::from_sec1_bytes(&entry.public_key).map_err(invalid)?;
            let signature = Signature::from_slice(&entry.signature).map_err(invalid)?;
            key.verify_prehash(self.hash.as_slice(), &signature)
                .map_err(invalid)?;
        }
        Ok(())
    }
}

fn sign_hash(key: &SigningKey, hash: &B256) -> Result<ValidatorSignature, BlockError> {
    let signature: Signature = key
        .sign_prehash(hash.as_slice())
        .map_err(|e| BlockError::Signing(e.to_string()))?;

    Ok(ValidatorSignature {
        public_key: Bytes::copy_from_slice(key.verifying_key().to_encoded_point(true).as_bytes()),
        signature: Bytes::copy_from_slice(&signature.to_bytes()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_rlp::Decodable;

    fn signer() -> SigningKey {
        SigningKey::from_slice(&[7u8; 32]).unwrap()
    }

    fn block(index: u64, prev: B256) -> BlockRecord {
        let header = BlockHeader {
            index,
            prev_block_hash: prev,
            timestamp: 1_700_000_000 + index,
            ..Default::default()
        };
        BlockRecord::seal(header, vec![B256::repeat_byte(index as u8 + 1)], &[signer()]).unwrap()
    }

    #[test]
    fn test_sealed_block_verifies() {
        let genesis = block(0, B256::ZERO);
        assert_eq!(genesis.verify(), Ok(()));
        let next = block(1, genesis.hash);
        assert_eq!(next.verify(), Ok(()));
    }

    #[test]
    fn test_tampered_header_rejected() {
        let mut b = block(3, B256::repeat_byte(9));
        b.header.timestamp += 1;
        assert!(matches!(b.verify(), Err(BlockError::HashMismatch { .. })));
    }

    #[test]
    fn test_missing_prev_hash_rejected() {
        let b = block(3, B256::ZERO);
        assert_eq!(b.verify(), Err(BlockError::MissingPrevHash { index: 3 }));
    }

    #[test]
    fn test_merkle_mismatch_rejected() {
        let mut b = block(2, B256::repeat_byte(9));
        b.transaction_hashes.push(B256::repeat_byte(0xaa));
        assert!(matches!(b.verify(), Err(BlockError::MerkleRootMismatch { .. })));
    }

    #[test]
    fn test_foreign_signature_rejected() {
        let mut b = block(2, B256::repeat_byte(9));
        let other = block(5, B256::repeat_byte(9));
        b.signatures[0].signature = other.signatures[0].signature.clone();
        assert_eq!(b.verify(), Err(BlockError::InvalidSignature { position: 0 }));
    }

    #[test]
    fn test_unsigned_block_rejected() {
        let header = BlockHeader {
            index: 4,
            prev_block_hash: B256::repeat_byte(1),
            ..Default::default()
        };
        let b = BlockRecord::seal(header, vec![], &[]).unwrap();
        assert_eq!(b.verify(), Err(BlockError::MissingSignatures { index: 4 }));
    }

    #[test]
    fn test_block_decodes_from_rlp() {
        let b = block(1, B256::repeat_byte(4));
        let encoded = alloy_rlp::encode(&b);
        assert_eq!(BlockRecord::decode(&mut encoded.as_slice()).unwrap(), b);
    }
}
