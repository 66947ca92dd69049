pub mod block;
pub mod model;

pub use block::{meets_difficulty, Block, BlockTemplate};
pub use model::{AppendError, Blockchain};

use chrono::Utc;

/// Number of hex characters in a SHA-256 digest.
pub const HASH_HEX_LEN: usize = 64;

/// Payload of the genesis block.
pub const GENESIS_PAYLOAD: &str = "Genesis Block";

/// Previous-hash sentinel carried by the genesis block (all-zero digest).
pub const GENESIS_PREV_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// Difficulty the chain starts at (leading zero hex digits).
pub const INITIAL_DIFFICULTY: u32 = 1;

/// Tolerated clock skew when validating candidate timestamps.
pub const MAX_TIMESTAMP_SKEW_SECS: f64 = 60.0;

/// Current wall-clock time as real-valued seconds since the Unix epoch.
pub fn now_secs() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
