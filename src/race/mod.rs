use std::thread;
use std::time::Instant;

use log::{debug, info, warn};
use thiserror::Error;

use crate::blockchain::Blockchain;
use crate::config::Settings;
use crate::miner::{MineOutcome, Miner};
use crate::transport::{ChannelTransport, Signal, Transport, TransportError};

/// Rank that opens the race and reports the result.
pub const COORDINATOR: usize = 0;

#[derive(Debug, Error)]
pub enum RaceError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("rank {rank}: unexpected {signal:?} from rank {from_rank} before the start")]
    BadStart {
        rank: usize,
        from_rank: usize,
        signal: Signal,
    },
}

/// Why a participant left its mining loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaceEnd {
    ReachedTarget,
    Stopped,
    Rejected,
}

/// Winner as decided at the coordinator rank: the participant reporting
/// the most cumulative work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaceOutcome {
    pub winner: usize,
    pub best: u128,
    pub values: Vec<u128>,
}

/// Per-participant summary after a race.
#[derive(Debug)]
pub struct RaceReport {
    pub rank: usize,
    pub chain_len: usize,
    pub cumulative: u128,
    pub end: RaceEnd,
    /// `Some` only at the coordinator rank.
    pub outcome: Option<RaceOutcome>,
}

/// One race participant: an independent chain and miner pair plus a
/// transport endpoint. Workers never exchange blocks or chain state, only
/// the start barrier, the stop broadcast and one scalar result each.
pub struct RaceWorker<T: Transport> {
    transport: T,
    chain: Blockchain,
    miner: Miner,
    target_len: usize,
}

impl<T: Transport> RaceWorker<T> {
    pub fn new(transport: T, chain: Blockchain, miner: Miner, target_len: usize) -> Self {
        Self {
            transport,
            chain,
            miner,
            target_len,
        }
    }

    /// Drive this participant through a full race: start barrier, mining
    /// loop, then the result gather.
    pub fn run(mut self) -> Result<RaceReport, RaceError> {
        self.start_barrier()?;
        let end = self.mine_until_stopped()?;

        let cumulative = self.chain.cumulative_difficulty();
        let outcome = match self.transport.gather(cumulative, COORDINATOR)? {
            Some(values) => {
                let outcome = pick_winner(values);
                debug!("gathered cumulative work by rank: {:?}", outcome.values);
                info!(
                    "race over: rank {} wins with cumulative work {}",
                    outcome.winner, outcome.best
                );
                Some(outcome)
            }
            None => None,
        };

        Ok(RaceReport {
            rank: self.transport.rank(),
            chain_len: self.chain.len(),
            cumulative,
            end,
            outcome,
        })
    }

    /// Everyone blocks until the coordinator has released the field, so
    /// elapsed-time comparisons start from a common instant.
    fn start_barrier(&self) -> Result<(), RaceError> {
        let rank = self.transport.rank();
        if rank == COORDINATOR {
            for dest in 0..self.transport.world_size() {
                if dest != COORDINATOR {
                    self.transport.send(Signal::Go, dest)?;
                }
            }
        } else {
            let (source, signal) = self.transport.recv()?;
            if signal != Signal::Go {
                return Err(RaceError::BadStart {
                    rank,
                    from_rank: source,
                    signal,
                });
            }
        }
        Ok(())
    }

    fn mine_until_stopped(&mut self) -> Result<RaceEnd, RaceError> {
        let rank = self.transport.rank();
        loop {
            if self.chain.len() >= self.target_len {
                self.broadcast_stop()?;
                info!("rank {rank}: reached target length {}", self.target_len);
                return Ok(RaceEnd::ReachedTarget);
            }

            // an inbound stop ends the race before any further mining
            if self.transport.probe() {
                let (source, _) = self.transport.recv()?;
                info!("rank {rank}: stop received from rank {source}");
                return Ok(RaceEnd::Stopped);
            }

            let template = self
                .chain
                .next_template(format!("Block {} Data", self.chain.len()));
            let round = Instant::now();
            // a stop arriving mid-search cancels the round; the discarded
            // work is picked up as a stop at the top of the loop
            match self.miner.mine(template, || self.transport.probe()) {
                MineOutcome::Cancelled => continue,
                MineOutcome::Sealed(block) => match self.chain.append(block) {
                    Ok(()) => info!(
                        "rank {}: block #{} appended in {:.2}s (difficulty {})",
                        rank,
                        self.chain.len() - 1,
                        round.elapsed().as_secs_f64(),
                        self.chain.last_block().difficulty()
                    ),
                    Err(err) => {
                        // run-ending for this participant; the race goes on
                        warn!("rank {rank}: mined block rejected: {err}");
                        return Ok(RaceEnd::Rejected);
                    }
                },
            }
        }
    }

    fn broadcast_stop(&self) -> Result<(), TransportError> {
        for dest in 0..self.transport.world_size() {
            if dest != self.transport.rank() {
                self.transport.send(Signal::Stop, dest)?;
            }
        }
        Ok(())
    }
}

/// Highest cumulative work wins; ties go to the lowest rank.
pub fn pick_winner(values: Vec<u128>) -> RaceOutcome {
    assert!(!values.is_empty(), "gather yields one value per rank");
    let mut winner = 0;
    let mut best = values[0];
    for (rank, &value) in values.iter().enumerate().skip(1) {
        if value > best {
            winner = rank;
            best = value;
        }
    }
    RaceOutcome {
        winner,
        best,
        values,
    }
}

/// Run a full race on an in-memory hub, one thread per participant.
/// Returns the outcome reported at the coordinator rank.
pub fn run_race(settings: &Settings) -> Result<RaceOutcome, RaceError> {
    let endpoints = ChannelTransport::hub(settings.workers);
    let mut handles = Vec::with_capacity(settings.workers);
    for transport in endpoints {
        let rank = transport.rank();
        let chain = Blockchain::new(
            settings.initial_difficulty,
            settings.creation_interval_secs,
            settings.adjustment_interval,
        );
        let worker = RaceWorker::new(
            transport,
            chain,
            Miner::new(settings.threads),
            settings.target_len,
        );
        let handle = thread::Builder::new()
            .name(format!("race-{rank}"))
            .spawn(move || worker.run())
            .expect("spawn race participant");
        handles.push(handle);
    }

    let mut outcome = None;
    for handle in handles {
        let report = handle.join().expect("race participant panicked")?;
        info!(
            "rank {}: final length {}, cumulative work {} ({:?})",
            report.rank, report.chain_len, report.cumulative, report.end
        );
        if let Some(o) = report.outcome {
            outcome = Some(o);
        }
    }
    Ok(outcome.expect("coordinator reports an outcome"))
}
