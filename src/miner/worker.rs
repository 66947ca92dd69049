use std::sync::atomic::Ordering;

use crossbeam_channel::Receiver;
use log::debug;

use crate::blockchain::meets_difficulty;

use super::{RoundWork, Solution};

/// Nonces tried between checks of the external cancellation token. The
/// result slot is cheaper to read and is checked on every iteration.
const CANCEL_CHECK_STRIDE: u64 = 64;

/// Worker loop: serve rounds until the pool's work channel closes.
pub(super) fn run(worker_id: usize, stride: u64, work_rx: Receiver<RoundWork>) {
    while let Ok(work) = work_rx.recv() {
        search(worker_id, stride, &work);
        let _ = work.done.send(worker_id);
    }
}

/// Search this worker's residue class of the nonce space until a solution
/// is recorded (by anyone) or the round is cancelled.
fn search(worker_id: usize, stride: u64, work: &RoundWork) {
    let mut nonce = worker_id as u64;
    let mut since_check = 0u64;
    loop {
        if work.slot.get().is_some() {
            return;
        }
        if since_check == 0 && work.cancel.load(Ordering::Relaxed) {
            return;
        }

        let hash = work.template.hash_with(nonce);
        if meets_difficulty(&hash, work.template.difficulty) {
            let solution = Solution {
                nonce,
                hash,
                worker_id,
            };
            // first write wins; a losing worker just stops
            if work.slot.set(solution).is_ok() {
                debug!("worker {worker_id} found nonce {nonce}");
            }
            return;
        }

        nonce = nonce.wrapping_add(stride);
        since_check = (since_check + 1) % CANCEL_CHECK_STRIDE;
    }
}
