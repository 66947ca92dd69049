mod blockchain;
mod config;
mod miner;
mod race;
mod transport;

use std::env;
use std::time::Instant;

use anyhow::Context;
use dotenvy::dotenv;
use log::info;

use blockchain::Blockchain;
use config::{Mode, Settings};
use miner::Miner;

fn main() {
    let _ = dotenv();
    env_logger::init();

    if let Err(err) = run() {
        eprintln!("fatal: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let settings =
        Settings::from_env_and_args(env::args().skip(1)).context("invalid configuration")?;
    info!(
        "starting: mode={:?} target={} threads={} creation_interval={}s adjustment_interval={}",
        settings.mode,
        settings.target_len,
        settings.threads,
        settings.creation_interval_secs,
        settings.adjustment_interval
    );

    match settings.mode {
        Mode::Solo => run_solo(&settings),
        Mode::Race => run_race(&settings),
    }
}

/// Mine a single chain up to the target length on this process alone.
fn run_solo(settings: &Settings) -> anyhow::Result<()> {
    let mut chain = Blockchain::new(
        settings.initial_difficulty,
        settings.creation_interval_secs,
        settings.adjustment_interval,
    );
    let miner = Miner::new(settings.threads);
    let started = Instant::now();

    while chain.len() < settings.target_len {
        let template = chain.next_template(format!("Block {} Data", chain.len()));
        let round = Instant::now();
        let block = miner.mine_to_completion(template);
        chain.append(block).context("mined block rejected")?;
        info!(
            "block #{} sealed in {:.2}s (difficulty {}, nonce {})",
            chain.len() - 1,
            round.elapsed().as_secs_f64(),
            chain.last_block().difficulty(),
            chain.last_block().nonce()
        );
    }

    anyhow::ensure!(chain.is_valid_chain(), "finished chain failed validation");
    println!(
        "chain complete: length {}, difficulty {}, cumulative work {}, {:.2}s elapsed",
        chain.len(),
        chain.difficulty(),
        chain.cumulative_difficulty(),
        started.elapsed().as_secs_f64()
    );

    if settings.dump_chain {
        let json =
            serde_json::to_string_pretty(chain.blocks()).context("serialize chain")?;
        println!("{json}");
    }
    Ok(())
}

/// Race independent replicas to the target length and report the winner.
fn run_race(settings: &Settings) -> anyhow::Result<()> {
    let started = Instant::now();
    let outcome = race::run_race(settings).context("race failed")?;
    println!(
        "best chain: rank {} (cumulative work {})",
        outcome.winner, outcome.best
    );
    println!("total race time: {:.2}s", started.elapsed().as_secs_f64());
    Ok(())
}
