//! Multithreaded nonce search over one candidate block.
//!
//! A fixed pool of worker threads is created once per [`Miner`] and reused
//! for every round. Each round hands the pool a fresh cancellation token and
//! a fresh single-assignment result slot; the first worker to find a
//! qualifying nonce fills the slot, every other worker observes it and
//! stops. Cancellation is observed mid-search, so an external stop ends a
//! round promptly instead of waiting for the round to finish on its own.

mod worker;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, RecvTimeoutError, Sender};
use log::debug;

use crate::blockchain::{Block, BlockTemplate};

/// How often the round driver polls its interruption source while waiting
/// for the workers.
const INTERRUPT_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// The winning (nonce, hash, worker) triple for one round.
#[derive(Debug, Clone)]
pub struct Solution {
    pub nonce: u64,
    pub hash: String,
    pub worker_id: usize,
}

/// Outcome of one mining round.
#[derive(Debug)]
pub enum MineOutcome {
    Sealed(Block),
    Cancelled,
}

/// One round's work order, shared by every worker in the pool.
struct RoundWork {
    template: Arc<BlockTemplate>,
    cancel: Arc<AtomicBool>,
    slot: Arc<OnceLock<Solution>>,
    done: Sender<usize>,
}

/// Fixed-size pool of nonce-search workers, reused across rounds.
///
/// The nonce space is partitioned into disjoint residue classes: worker `i`
/// of `k` tries `i, i + k, i + 2k, …`, so no nonce is ever tried twice in a
/// round. Dropping the miner shuts the pool down and joins every thread.
pub struct Miner {
    work_txs: Vec<Sender<RoundWork>>,
    handles: Vec<JoinHandle<()>>,
    threads: usize,
}

impl Miner {
    /// Spawn a pool of `threads` workers (at least one).
    pub fn new(threads: usize) -> Self {
        assert!(threads >= 1, "miner needs at least one worker thread");
        let mut work_txs = Vec::with_capacity(threads);
        let mut handles = Vec::with_capacity(threads);
        for worker_id in 0..threads {
            let (tx, rx) = unbounded::<RoundWork>();
            let handle = thread::Builder::new()
                .name(format!("miner-{worker_id}"))
                .spawn(move || worker::run(worker_id, threads as u64, rx))
                .expect("spawn miner worker");
            work_txs.push(tx);
            handles.push(handle);
        }
        Self {
            work_txs,
            handles,
            threads,
        }
    }

    /// Run one round: search for a nonce sealing `template`, or abort once
    /// `interrupted` reports true.
    ///
    /// `interrupted` is polled while the round is in flight; a round that
    /// observed an interruption returns [`MineOutcome::Cancelled`] and
    /// commits nothing, even if a qualifying nonce had already been found.
    /// The round returns only after every worker has acknowledged it, so no
    /// in-flight search ever leaks into the next round.
    pub fn mine<F>(&self, template: BlockTemplate, mut interrupted: F) -> MineOutcome
    where
        F: FnMut() -> bool,
    {
        let template = Arc::new(template);
        let cancel = Arc::new(AtomicBool::new(false));
        let slot: Arc<OnceLock<Solution>> = Arc::new(OnceLock::new());
        let (done_tx, done_rx) = unbounded::<usize>();

        for tx in &self.work_txs {
            tx.send(RoundWork {
                template: Arc::clone(&template),
                cancel: Arc::clone(&cancel),
                slot: Arc::clone(&slot),
                done: done_tx.clone(),
            })
            .expect("miner pool is running");
        }
        drop(done_tx);

        let mut acked = 0;
        let mut was_interrupted = false;
        while acked < self.threads {
            match done_rx.recv_timeout(INTERRUPT_POLL_INTERVAL) {
                Ok(_) => acked += 1,
                Err(RecvTimeoutError::Timeout) => {
                    if !was_interrupted && interrupted() {
                        was_interrupted = true;
                        cancel.store(true, Ordering::Relaxed);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    panic!("miner worker pool hung up mid-round")
                }
            }
        }

        if was_interrupted {
            return MineOutcome::Cancelled;
        }
        match slot.get() {
            Some(solution) => {
                debug!(
                    "worker {} sealed block #{} with nonce {}",
                    solution.worker_id, template.index, solution.nonce
                );
                let sealed = (*template).clone().seal(solution.nonce);
                debug_assert_eq!(sealed.hash(), solution.hash);
                MineOutcome::Sealed(sealed)
            }
            None => MineOutcome::Cancelled,
        }
    }

    /// Run one round with no interruption source; always seals.
    pub fn mine_to_completion(&self, template: BlockTemplate) -> Block {
        match self.mine(template, || false) {
            MineOutcome::Sealed(block) => block,
            MineOutcome::Cancelled => unreachable!("round had no interruption source"),
        }
    }
}

impl Drop for Miner {
    fn drop(&mut self) {
        // closing the work channels lets every worker fall out of its loop
        self.work_txs.clear();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::{meets_difficulty, Blockchain};

    #[test]
    fn four_workers_seal_exactly_one_result() {
        let bc = Blockchain::new(2, 10.0, 10);
        let template = bc.next_template("Block 1 Data".into());

        let miner = Miner::new(4);
        let block = miner.mine_to_completion(template);
        assert!(block.hash().starts_with("00"));
        assert_eq!(block.hash(), block.compute_hash());
        assert!(meets_difficulty(block.hash(), 2));
    }

    #[test]
    fn interrupted_round_is_cancelled() {
        let bc = Blockchain::new(60, 10.0, 10);
        let template = bc.next_template("Block 1 Data".into());

        // a 60-zero target will not be met; the round must end via the
        // interruption source instead
        let miner = Miner::new(2);
        let outcome = miner.mine(template, || true);
        assert!(matches!(outcome, MineOutcome::Cancelled));
    }

    #[test]
    fn pool_is_reused_across_rounds() {
        let mut bc = Blockchain::new(1, 10.0, 10);
        let miner = Miner::new(3);
        for i in 1..=3 {
            let block = miner.mine_to_completion(
                bc.next_template(format!("Block {i} Data")),
            );
            bc.append(block).unwrap();
        }
        assert_eq!(bc.len(), 4);
        assert!(bc.is_valid_chain());
    }
}
