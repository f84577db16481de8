use alloy_primitives::{keccak256, B256};

/// Merkle root over transaction hashes.
///
/// Pairs are hashed as `keccak256(left ‖ right)`; an odd hash at the end of a
/// level is carried up unchanged. An empty list has the zero root.
pub fn merkle_root(hashes: &[B256]) -> B256 {
    if hashes.is_empty() {
        return B256::ZERO;
    }

    let mut level = hashes.to_vec();
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| match pair {
                [left, right] => {
                    let mut buf = [0u8; 64];
                    buf[..32].copy_from_slice(left.as_slice());
                    buf[32..].copy_from_slice(right.as_slice());
                    keccak256(buf)
                }
                [single] => *single,
                _ => unreachable!("chunks(2) yields one or two items"),
            })
            .collect();
    }
    level[0]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash_pair(left: B256, right: B256) -> B256 {
        keccak256([left.as_slice(), right.as_slice()].concat())
    }

    #[test]
    fn test_empty_root_is_zero() {
        assert_eq!(merkle_root(&[]), B256::ZERO);
    }

    #[test]
    fn test_single_hash_is_root() {
        let h = B256::repeat_byte(5);
        assert_eq!(merkle_root(&[h]), h);
    }

    #[test]
    fn test_odd_leaf_is_carried() {
        let (a, b, c) = (B256::repeat_byte(1), B256::repeat_byte(2), B256::repeat_byte(3));
        assert_eq!(merkle_root(&[a, b, c]), hash_pair(hash_pair(a, b), c));
    }

    #[test]
    fn test_order_matters() {
        let (a, b) = (B256::repeat_byte(1), B256::repeat_byte(2));
        assert_ne!(merkle_root(&[a, b]), merkle_root(&[b, a]));
    }
}
