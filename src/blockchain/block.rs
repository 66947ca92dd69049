use serde::Serialize;
use sha2::{Digest, Sha256};

use super::{now_secs, GENESIS_PAYLOAD, GENESIS_PREV_HASH};

/// An unsealed candidate: every block field except the nonce the search
/// must find and the hash that nonce produces.
#[derive(Debug, Clone)]
pub struct BlockTemplate {
    pub index: u64,
    pub payload: String,
    pub timestamp: f64,
    pub previous_hash: String,
    pub difficulty: u32,
}

impl BlockTemplate {
    /// Hash this candidate under the given nonce. Pure; no side effects.
    pub fn hash_with(&self, nonce: u64) -> String {
        compute_hash(
            self.index,
            &self.payload,
            self.timestamp,
            &self.previous_hash,
            self.difficulty,
            nonce,
        )
    }

    /// Seal the candidate with a nonce, fixing its hash permanently.
    pub fn seal(self, nonce: u64) -> Block {
        let hash = self.hash_with(nonce);
        Block {
            index: self.index,
            payload: self.payload,
            timestamp: self.timestamp,
            previous_hash: self.previous_hash,
            difficulty: self.difficulty,
            nonce,
            hash,
        }
    }
}

/// A sealed block. Immutable: the only ways to obtain one are
/// `BlockTemplate::seal` and `Block::genesis`, and nothing mutates it after.
#[derive(Debug, Clone, Serialize)]
pub struct Block {
    index: u64,
    payload: String,
    timestamp: f64,
    previous_hash: String,
    difficulty: u32,
    nonce: u64,
    hash: String,
}

impl Block {
    /// Create the genesis block (first block in the chain).
    pub fn genesis(difficulty: u32) -> Self {
        BlockTemplate {
            index: 0,
            payload: GENESIS_PAYLOAD.to_string(),
            timestamp: now_secs(),
            previous_hash: GENESIS_PREV_HASH.to_string(),
            difficulty,
        }
        .seal(0)
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    pub fn previous_hash(&self) -> &str {
        &self.previous_hash
    }

    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Recompute the SHA-256 hash of this block from its fields
    /// (excluding the stored `hash` itself).
    pub fn compute_hash(&self) -> String {
        compute_hash(
            self.index,
            &self.payload,
            self.timestamp,
            &self.previous_hash,
            self.difficulty,
            self.nonce,
        )
    }
}

#[cfg(test)]
impl Block {
    /// Test-only constructor that takes the stored hash at face value.
    pub(crate) fn forged(template: BlockTemplate, nonce: u64, hash: String) -> Self {
        Self {
            index: template.index,
            payload: template.payload,
            timestamp: template.timestamp,
            previous_hash: template.previous_hash,
            difficulty: template.difficulty,
            nonce,
            hash,
        }
    }
}

/// SHA-256 over the canonical `:`-separated concatenation of the block
/// fields, hex-encoded.
fn compute_hash(
    index: u64,
    payload: &str,
    timestamp: f64,
    previous_hash: &str,
    difficulty: u32,
    nonce: u64,
) -> String {
    let preimage =
        format!("{index}:{payload}:{timestamp}:{previous_hash}:{difficulty}:{nonce}");
    let mut hasher = Sha256::new();
    hasher.update(preimage.as_bytes());
    hex::encode(hasher.finalize())
}

/// True iff the hash's first `difficulty` hex characters are all '0'.
pub fn meets_difficulty(hash: &str, difficulty: u32) -> bool {
    hash.chars().take(difficulty as usize).all(|c| c == '0')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::HASH_HEX_LEN;

    fn template() -> BlockTemplate {
        BlockTemplate {
            index: 1,
            payload: "Block 1 Data".into(),
            timestamp: 1_700_000_000.25,
            previous_hash: "ab".repeat(32),
            difficulty: 2,
        }
    }

    #[test]
    fn genesis_has_valid_hash() {
        let b = Block::genesis(1);
        assert_eq!(b.index(), 0);
        assert_eq!(b.previous_hash(), GENESIS_PREV_HASH);
        assert_eq!(b.nonce(), 0);
        assert_eq!(b.hash(), b.compute_hash());
        assert_eq!(b.hash().len(), HASH_HEX_LEN);
    }

    #[test]
    fn sealing_is_deterministic() {
        let a = template().seal(42);
        let b = template().seal(42);
        assert_eq!(a.hash(), b.hash());
        assert_eq!(a.hash(), a.compute_hash());
    }

    #[test]
    fn every_field_feeds_the_hash() {
        let base = template().seal(7);
        let mut tampered = template();
        tampered.payload = "Block 1 Dat4".into();
        assert_ne!(base.hash(), tampered.seal(7).hash());

        let mut tampered = template();
        tampered.timestamp += 0.000_001;
        assert_ne!(base.hash(), tampered.seal(7).hash());

        assert_ne!(base.hash(), template().seal(8).hash());
    }

    #[test]
    fn meets_difficulty_checks_hex_prefix() {
        assert!(meets_difficulty("00ab3f", 2));
        assert!(meets_difficulty("00ab3f", 0));
        assert!(!meets_difficulty("00ab3f", 3));
        assert!(!meets_difficulty("a0ab3f", 1));
    }
}
