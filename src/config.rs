use std::env;

use thiserror::Error;

use crate::blockchain::{HASH_HEX_LEN, INITIAL_DIFFICULTY};

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{name} must be positive (got {value:?})")]
    NotPositive { name: &'static str, value: String },
    #[error("{name}: cannot parse {value:?}")]
    Unparsable { name: &'static str, value: String },
    #[error("initial difficulty {0} must stay below the 64-hex-digit digest length")]
    DifficultyTooHigh(u32),
    #[error("unknown mode {0:?} (expected \"solo\" or \"race\")")]
    UnknownMode(String),
    #[error("race mode needs at least two workers (got {0})")]
    TooFewWorkers(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Solo,
    Race,
}

/// Runtime settings, read once at startup and immutable afterwards.
#[derive(Debug, Clone)]
pub struct Settings {
    pub mode: Mode,
    /// Target chain length, genesis included.
    pub target_len: usize,
    /// Mining threads per chain.
    pub threads: usize,
    /// Participants in race mode.
    pub workers: usize,
    /// Intended seconds between blocks.
    pub creation_interval_secs: f64,
    /// Blocks between difficulty adjustments.
    pub adjustment_interval: usize,
    pub initial_difficulty: u32,
    /// Print the final chain as JSON (solo mode).
    pub dump_chain: bool,
}

impl Settings {
    /// Built-in defaults: solo mode, every CPU mining.
    pub fn defaults() -> Self {
        Self {
            mode: Mode::Solo,
            target_len: 10,
            threads: num_cpus::get().max(1),
            workers: 3,
            creation_interval_secs: 10.0,
            adjustment_interval: 10,
            initial_difficulty: INITIAL_DIFFICULTY,
            dump_chain: false,
        }
    }

    /// Read settings from the environment (`.env` supported by the caller),
    /// apply the positional overrides `<target_blocks> [threads]`, then
    /// validate. Any violation is fatal before mining begins.
    pub fn from_env_and_args<I>(mut args: I) -> Result<Self, ConfigError>
    where
        I: Iterator<Item = String>,
    {
        let mut settings = Self::defaults();

        if let Some(v) = read_env("RUN_MODE") {
            settings.mode = parse_mode(&v)?;
        }
        if let Some(v) = read_env("TARGET_BLOCKS") {
            settings.target_len = parse_positive("TARGET_BLOCKS", &v)? as usize;
        }
        if let Some(v) = read_env("MINER_THREADS") {
            settings.threads = parse_positive("MINER_THREADS", &v)? as usize;
        }
        if let Some(v) = read_env("RACE_WORKERS") {
            settings.workers = parse_positive("RACE_WORKERS", &v)? as usize;
        }
        if let Some(v) = read_env("CREATION_INTERVAL_SECS") {
            settings.creation_interval_secs = parse_positive_secs("CREATION_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = read_env("ADJUSTMENT_INTERVAL") {
            settings.adjustment_interval = parse_positive("ADJUSTMENT_INTERVAL", &v)? as usize;
        }
        if let Some(v) = read_env("INITIAL_DIFFICULTY") {
            let parsed = parse_positive("INITIAL_DIFFICULTY", &v)?;
            settings.initial_difficulty =
                u32::try_from(parsed).map_err(|_| ConfigError::Unparsable {
                    name: "INITIAL_DIFFICULTY",
                    value: v,
                })?;
        }
        if let Some(v) = read_env("DUMP_CHAIN") {
            settings.dump_chain = parse_flag(&v);
        }

        if let Some(v) = args.next() {
            settings.target_len = parse_positive("target_blocks", &v)? as usize;
        }
        if let Some(v) = args.next() {
            settings.threads = parse_positive("threads", &v)? as usize;
        }

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("TARGET_BLOCKS", self.target_len)?;
        positive("MINER_THREADS", self.threads)?;
        positive("RACE_WORKERS", self.workers)?;
        positive("ADJUSTMENT_INTERVAL", self.adjustment_interval)?;
        positive("INITIAL_DIFFICULTY", self.initial_difficulty as usize)?;
        if !(self.creation_interval_secs > 0.0) {
            return Err(ConfigError::NotPositive {
                name: "CREATION_INTERVAL_SECS",
                value: self.creation_interval_secs.to_string(),
            });
        }
        if self.initial_difficulty as usize >= HASH_HEX_LEN {
            return Err(ConfigError::DifficultyTooHigh(self.initial_difficulty));
        }
        if self.mode == Mode::Race && self.workers < 2 {
            return Err(ConfigError::TooFewWorkers(self.workers));
        }
        Ok(())
    }
}

fn positive(name: &'static str, value: usize) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::NotPositive {
            name,
            value: value.to_string(),
        });
    }
    Ok(())
}

fn read_env(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_positive(name: &'static str, value: &str) -> Result<u64, ConfigError> {
    let parsed: u64 = value.trim().parse().map_err(|_| ConfigError::Unparsable {
        name,
        value: value.to_string(),
    })?;
    if parsed == 0 {
        return Err(ConfigError::NotPositive {
            name,
            value: value.to_string(),
        });
    }
    Ok(parsed)
}

fn parse_positive_secs(name: &'static str, value: &str) -> Result<f64, ConfigError> {
    let parsed: f64 = value.trim().parse().map_err(|_| ConfigError::Unparsable {
        name,
        value: value.to_string(),
    })?;
    if !(parsed > 0.0) {
        return Err(ConfigError::NotPositive {
            name,
            value: value.to_string(),
        });
    }
    Ok(parsed)
}

fn parse_mode(value: &str) -> Result<Mode, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "solo" => Ok(Mode::Solo),
        "race" => Ok(Mode::Race),
        _ => Err(ConfigError::UnknownMode(value.to_string())),
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positive_integers_parse() {
        assert_eq!(parse_positive("N", "12").unwrap(), 12);
        assert_eq!(parse_positive("N", " 3 ").unwrap(), 3);
        assert!(matches!(
            parse_positive("N", "0"),
            Err(ConfigError::NotPositive { .. })
        ));
        assert!(matches!(
            parse_positive("N", "-4"),
            Err(ConfigError::Unparsable { .. })
        ));
        assert!(matches!(
            parse_positive("N", "ten"),
            Err(ConfigError::Unparsable { .. })
        ));
    }

    #[test]
    fn interval_seconds_must_be_positive() {
        assert_eq!(parse_positive_secs("S", "2.5").unwrap(), 2.5);
        assert!(matches!(
            parse_positive_secs("S", "0"),
            Err(ConfigError::NotPositive { .. })
        ));
        assert!(matches!(
            parse_positive_secs("S", "NaN"),
            Err(ConfigError::NotPositive { .. })
        ));
    }

    #[test]
    fn modes_parse_case_insensitively() {
        assert_eq!(parse_mode("solo").unwrap(), Mode::Solo);
        assert_eq!(parse_mode("RACE").unwrap(), Mode::Race);
        assert!(matches!(
            parse_mode("cluster"),
            Err(ConfigError::UnknownMode(_))
        ));
    }

    #[test]
    fn positional_arguments_override() {
        let args = ["7".to_string(), "2".to_string()];
        let settings = Settings::from_env_and_args(args.into_iter()).unwrap();
        assert_eq!(settings.target_len, 7);
        assert_eq!(settings.threads, 2);
    }

    #[test]
    fn unreachable_difficulty_is_fatal() {
        let mut settings = Settings::defaults();
        settings.initial_difficulty = HASH_HEX_LEN as u32;
        assert_eq!(
            settings.validate(),
            Err(ConfigError::DifficultyTooHigh(HASH_HEX_LEN as u32))
        );
    }

    #[test]
    fn race_mode_needs_company() {
        let mut settings = Settings::defaults();
        settings.mode = Mode::Race;
        settings.workers = 1;
        assert_eq!(settings.validate(), Err(ConfigError::TooFewWorkers(1)));
    }

    #[test]
    fn zeroed_parameters_are_fatal() {
        let mut settings = Settings::defaults();
        settings.adjustment_interval = 0;
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::NotPositive { .. })
        ));
    }
}
