use log::{debug, info};
use thiserror::Error;

use super::block::{meets_difficulty, Block, BlockTemplate};
use super::{now_secs, GENESIS_PAYLOAD, GENESIS_PREV_HASH, MAX_TIMESTAMP_SKEW_SECS};

/// Why `append` refused a candidate. The chain is untouched in every case;
/// the caller must re-mine against the unchanged head.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AppendError {
    #[error("wrong index: expected {expected}, got {actual}")]
    WrongIndex { expected: u64, actual: u64 },
    #[error("previous hash {actual} does not match head {expected}")]
    PreviousHashMismatch { expected: String, actual: String },
    #[error("stored hash {stored} does not match block contents")]
    HashMismatch { stored: String },
    #[error("timestamp {timestamp} outside window [{min}, {max}]")]
    TimestampOutOfRange { timestamp: f64, min: f64, max: f64 },
}

/// In-memory append-only chain with Proof-of-Work difficulty retargeting.
///
/// Single linear history: no removal, no reordering, no fork tracking.
#[derive(Debug)]
pub struct Blockchain {
    chain: Vec<Block>,
    difficulty: u32,
    creation_interval_secs: f64,
    adjustment_interval: usize,
}

impl Blockchain {
    /// Initialize a new blockchain with a genesis block.
    pub fn new(
        initial_difficulty: u32,
        creation_interval_secs: f64,
        adjustment_interval: usize,
    ) -> Self {
        Self {
            chain: vec![Block::genesis(initial_difficulty)],
            difficulty: initial_difficulty,
            creation_interval_secs,
            adjustment_interval,
        }
    }

    /// Return the last block in the chain.
    pub fn last_block(&self) -> &Block {
        self.chain
            .last()
            .expect("chain always holds at least the genesis block")
    }

    pub fn blocks(&self) -> &[Block] {
        &self.chain
    }

    pub fn len(&self) -> usize {
        self.chain.len()
    }

    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    /// Build the next unsealed candidate against the current head.
    pub fn next_template(&self, payload: String) -> BlockTemplate {
        let head = self.last_block();
        BlockTemplate {
            index: head.index() + 1,
            payload,
            timestamp: now_secs(),
            previous_hash: head.hash().to_string(),
            difficulty: self.difficulty,
        }
    }

    /// Validate a sealed candidate against the head and append it.
    ///
    /// Checks, in order: index continuity, previous-hash linkage, hash
    /// integrity, timestamp window. On success the candidate is appended
    /// and the difficulty retargets on adjustment boundaries.
    pub fn append(&mut self, candidate: Block) -> Result<(), AppendError> {
        let head = self.last_block();

        let expected_index = head.index() + 1;
        if candidate.index() != expected_index {
            return Err(AppendError::WrongIndex {
                expected: expected_index,
                actual: candidate.index(),
            });
        }

        if candidate.previous_hash() != head.hash() {
            return Err(AppendError::PreviousHashMismatch {
                expected: head.hash().to_string(),
                actual: candidate.previous_hash().to_string(),
            });
        }

        if candidate.compute_hash() != candidate.hash() {
            return Err(AppendError::HashMismatch {
                stored: candidate.hash().to_string(),
            });
        }

        let max = now_secs() + MAX_TIMESTAMP_SKEW_SECS;
        let min = head.timestamp() - MAX_TIMESTAMP_SKEW_SECS;
        if candidate.timestamp() > max || candidate.timestamp() < min {
            return Err(AppendError::TimestampOutOfRange {
                timestamp: candidate.timestamp(),
                min,
                max,
            });
        }

        debug!(
            "appended block #{} (hash={}, nonce={})",
            candidate.index(),
            candidate.hash(),
            candidate.nonce()
        );
        self.chain.push(candidate);

        let next = self.retarget();
        if next != self.difficulty {
            info!("difficulty retarget: {} -> {}", self.difficulty, next);
        }
        self.difficulty = next;

        Ok(())
    }

    /// Difficulty for the next block. Only adjustment boundaries
    /// (`len % adjustment_interval == 0`) change the value; between
    /// boundaries this returns the current difficulty unchanged, so
    /// repeated calls are idempotent.
    pub fn retarget(&self) -> u32 {
        if self.chain.len() % self.adjustment_interval != 0 {
            return self.difficulty;
        }

        // Threshold controller: compare the observed production time of the
        // last window against the expected time and step by at most one.
        // Deliberately coarser than proportional retargeting schemes.
        let reference = &self.chain[self.chain.len() - self.adjustment_interval];
        let expected = self.creation_interval_secs * self.adjustment_interval as f64;
        let actual = self.last_block().timestamp() - reference.timestamp();

        if actual < expected / 2.0 {
            reference.difficulty() + 1
        } else if actual > expected * 2.0 {
            reference.difficulty().saturating_sub(1).max(1)
        } else {
            reference.difficulty()
        }
    }

    /// Total work across the chain: `Σ 2^difficulty` per block. Used as a
    /// scalar ranking key for "most total work" between replicas.
    pub fn cumulative_difficulty(&self) -> u128 {
        self.chain.iter().map(|b| 1u128 << b.difficulty()).sum()
    }

    /// Validate the entire chain: genesis shape, linkage, hash integrity
    /// and each mined block's own difficulty target.
    pub fn is_valid_chain(&self) -> bool {
        let genesis = match self.chain.first() {
            Some(b) => b,
            None => return false,
        };
        if genesis.index() != 0
            || genesis.payload() != GENESIS_PAYLOAD
            || genesis.previous_hash() != GENESIS_PREV_HASH
            || genesis.hash() != genesis.compute_hash()
        {
            return false;
        }

        for pair in self.chain.windows(2) {
            let (prev, current) = (&pair[0], &pair[1]);
            if current.index() != prev.index() + 1 {
                return false;
            }
            if current.previous_hash() != prev.hash() {
                return false;
            }
            if current.hash() != current.compute_hash() {
                return false;
            }
            if !meets_difficulty(current.hash(), current.difficulty()) {
                return false;
            }
        }

        true
    }
}

#[cfg(test)]
impl Blockchain {
    /// Test-only constructor that installs a prepared chain.
    pub(crate) fn with_chain(
        chain: Vec<Block>,
        difficulty: u32,
        creation_interval_secs: f64,
        adjustment_interval: usize,
    ) -> Self {
        Self {
            chain,
            difficulty,
            creation_interval_secs,
            adjustment_interval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Seal the chain's next candidate with a difficulty-satisfying nonce.
    fn mine_next(bc: &Blockchain, payload: &str) -> Block {
        let template = bc.next_template(payload.to_string());
        let mut nonce = 0u64;
        while !meets_difficulty(&template.hash_with(nonce), template.difficulty) {
            nonce += 1;
        }
        template.seal(nonce)
    }

    /// Linked chain with explicit timestamps; hashes are honest, the
    /// difficulty target is not (irrelevant for retarget arithmetic).
    fn forged_chain(genesis_ts: f64, timestamps: &[f64], difficulty: u32) -> Vec<Block> {
        let genesis = BlockTemplate {
            index: 0,
            payload: GENESIS_PAYLOAD.to_string(),
            timestamp: genesis_ts,
            previous_hash: GENESIS_PREV_HASH.to_string(),
            difficulty,
        }
        .seal(0);
        let mut blocks = vec![genesis];
        for (i, &ts) in timestamps.iter().enumerate() {
            let template = BlockTemplate {
                index: i as u64 + 1,
                payload: format!("Block {} Data", i + 1),
                timestamp: ts,
                previous_hash: blocks.last().unwrap().hash().to_string(),
                difficulty,
            };
            blocks.push(template.seal(0));
        }
        blocks
    }

    #[test]
    fn append_accepts_a_well_formed_candidate() {
        let mut bc = Blockchain::new(1, 10.0, 10);
        let block = mine_next(&bc, "Block 1 Data");
        assert!(bc.append(block).is_ok());
        assert_eq!(bc.len(), 2);
        assert!(bc.is_valid_chain());
    }

    #[test]
    fn append_rejects_wrong_index() {
        let mut bc = Blockchain::new(1, 10.0, 10);
        let mut template = bc.next_template("Block 1 Data".into());
        template.index = 5;
        let err = bc.append(template.seal(0)).unwrap_err();
        assert_eq!(
            err,
            AppendError::WrongIndex {
                expected: 1,
                actual: 5
            }
        );
        assert_eq!(bc.len(), 1);
    }

    #[test]
    fn append_rejects_broken_linkage() {
        let mut bc = Blockchain::new(1, 10.0, 10);
        let mut template = bc.next_template("Block 1 Data".into());
        template.previous_hash = "ff".repeat(32);
        let err = bc.append(template.seal(0)).unwrap_err();
        assert!(matches!(err, AppendError::PreviousHashMismatch { .. }));
        assert_eq!(bc.len(), 1);
    }

    #[test]
    fn append_rejects_tampered_hash() {
        let mut bc = Blockchain::new(1, 10.0, 10);
        let template = bc.next_template("Block 1 Data".into());
        let candidate = Block::forged(template, 0, "0".repeat(64));
        let err = bc.append(candidate).unwrap_err();
        assert!(matches!(err, AppendError::HashMismatch { .. }));
        assert_eq!(bc.len(), 1);
    }

    #[test]
    fn append_rejects_timestamps_outside_the_window() {
        let mut bc = Blockchain::new(1, 10.0, 10);

        let mut template = bc.next_template("Block 1 Data".into());
        template.timestamp = now_secs() + MAX_TIMESTAMP_SKEW_SECS + 5.0;
        let err = bc.append(template.seal(0)).unwrap_err();
        assert!(matches!(err, AppendError::TimestampOutOfRange { .. }));

        let mut template = bc.next_template("Block 1 Data".into());
        template.timestamp = bc.last_block().timestamp() - MAX_TIMESTAMP_SKEW_SECS - 5.0;
        let err = bc.append(template.seal(0)).unwrap_err();
        assert!(matches!(err, AppendError::TimestampOutOfRange { .. }));

        assert_eq!(bc.len(), 1);
    }

    #[test]
    fn fast_window_raises_difficulty_by_one() {
        // Five blocks land with near-zero elapsed time against an expected
        // window of 10 * 5 = 50 seconds.
        let mut bc = Blockchain::new(1, 10.0, 5);
        for i in 1..5 {
            let block = mine_next(&bc, &format!("Block {i} Data"));
            bc.append(block).unwrap();
        }
        assert_eq!(bc.len(), 5);
        assert_eq!(bc.difficulty(), 2);
    }

    #[test]
    fn slow_window_lowers_difficulty_by_one() {
        let start = now_secs() - 1_000.0;
        // 4 gaps of 26s: actual = 104 > expected * 2 = 100
        let timestamps: Vec<f64> = (1..5).map(|i| start + i as f64 * 26.0).collect();
        let bc = Blockchain::with_chain(forged_chain(start, &timestamps, 3), 3, 10.0, 5);
        assert_eq!(bc.retarget(), 2);
    }

    #[test]
    fn difficulty_never_drops_below_one() {
        let start = now_secs() - 1_000.0;
        let timestamps: Vec<f64> = (1..5).map(|i| start + i as f64 * 30.0).collect();
        let bc = Blockchain::with_chain(forged_chain(start, &timestamps, 1), 1, 10.0, 5);
        assert_eq!(bc.retarget(), 1);
    }

    #[test]
    fn retarget_is_idempotent_between_boundaries() {
        let mut bc = Blockchain::new(1, 10.0, 5);
        for i in 1..3 {
            let block = mine_next(&bc, &format!("Block {i} Data"));
            bc.append(block).unwrap();
        }
        // len = 3, not a boundary: repeated calls return the same value
        let first = bc.retarget();
        assert_eq!(first, bc.difficulty());
        assert_eq!(bc.retarget(), first);
        assert_eq!(bc.retarget(), first);
    }

    #[test]
    fn cumulative_difficulty_sums_powers_of_two() {
        let mut bc = Blockchain::new(1, 10.0, 100);
        assert_eq!(bc.cumulative_difficulty(), 2);
        for i in 1..4 {
            let block = mine_next(&bc, &format!("Block {i} Data"));
            bc.append(block).unwrap();
        }
        // genesis + three mined blocks, all difficulty 1
        assert_eq!(bc.cumulative_difficulty(), 4 * 2);
    }

    #[test]
    fn higher_average_difficulty_outranks_equal_length() {
        let light = Blockchain::with_chain(forged_chain(0.0, &[1.0, 2.0], 1), 1, 10.0, 100);
        let heavy = Blockchain::with_chain(forged_chain(0.0, &[1.0, 2.0], 3), 3, 10.0, 100);
        assert_eq!(light.len(), heavy.len());
        assert!(heavy.cumulative_difficulty() > light.cumulative_difficulty());
    }

    #[test]
    fn chain_validation_walks_every_link() {
        let mut bc = Blockchain::new(1, 10.0, 10);
        for i in 1..4 {
            let block = mine_next(&bc, &format!("Block {i} Data"));
            bc.append(block).unwrap();
        }
        assert!(bc.is_valid_chain());

        // splice in a block whose linkage is broken
        let mut blocks = bc.blocks().to_vec();
        let orphan = BlockTemplate {
            index: 4,
            payload: "Block 4 Data".into(),
            timestamp: now_secs(),
            previous_hash: "ee".repeat(32),
            difficulty: 1,
        }
        .seal(0);
        blocks.push(orphan);
        let broken = Blockchain::with_chain(blocks, 1, 10.0, 10);
        assert!(!broken.is_valid_chain());
    }
}
