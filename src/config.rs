use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveDate;
use serde::Deserialize;
use thiserror::Error;

use crate::model::{OptionType, Position};
use crate::quotes::SourceKind;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Position file contains no positions")]
    NoPositions,

    #[error("Position #{index} has an empty underlying")]
    EmptyUnderlying { index: usize },

    #[error("Position #{index} ({underlying}) has invalid expiry `{value}` (expected YYYY-MM-DD)")]
    BadExpiry {
        index: usize,
        underlying: String,
        value: String,
    },

    #[error("Position #{index} ({underlying}): {reason}")]
    BadType {
        index: usize,
        underlying: String,
        reason: String,
    },

    #[error("Position #{index} ({underlying}) has invalid strike {value}")]
    BadStrike {
        index: usize,
        underlying: String,
        value: f64,
    },

    #[error("Position #{index} ({underlying}) has invalid cost_per_contract {value}")]
    BadCost {
        index: usize,
        underlying: String,
        value: f64,
    },

    #[error("Duplicate position `{symbol_key}`")]
    DuplicatePosition { symbol_key: String },

    #[error("Environment variable {name}=`{value}` is not a valid number")]
    BadEnv { name: &'static str, value: String },
}

// ── Position file ───────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct PositionFile {
    #[serde(default)]
    positions: Vec<RawPosition>,
}

#[derive(Debug, Deserialize)]
struct RawPosition {
    underlying: String,
    expiry: String,
    #[serde(rename = "type")]
    option_type: String,
    strike: f64,
    contracts: i64,
    cost_per_contract: f64,
}

/// Load and fully validate the position file, collecting every problem.
pub fn load_positions(path: &Path) -> Result<Vec<Position>, Vec<ConfigError>> {
    let contents = std::fs::read_to_string(path).map_err(|source| {
        vec![ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }]
    })?;
    parse_positions(&contents)
}

pub fn parse_positions(contents: &str) -> Result<Vec<Position>, Vec<ConfigError>> {
    let file: PositionFile =
        serde_json::from_str(contents).map_err(|e| vec![ConfigError::Json(e)])?;

    if file.positions.is_empty() {
        return Err(vec![ConfigError::NoPositions]);
    }

    let mut errors = Vec::new();
    let mut positions = Vec::with_capacity(file.positions.len());
    let mut seen = HashSet::new();

    for (index, raw) in file.positions.into_iter().enumerate() {
        match validate_position(index, raw) {
            Ok(pos) => {
                if seen.insert(pos.symbol_key()) {
                    positions.push(pos);
                } else {
                    errors.push(ConfigError::DuplicatePosition {
                        symbol_key: pos.symbol_key(),
                    });
                }
            }
            Err(mut errs) => errors.append(&mut errs),
        }
    }

    if errors.is_empty() {
        Ok(positions)
    } else {
        Err(errors)
    }
}

fn validate_position(index: usize, raw: RawPosition) -> Result<Position, Vec<ConfigError>> {
    let underlying = raw.underlying.trim().to_uppercase();
    if underlying.is_empty() {
        return Err(vec![ConfigError::EmptyUnderlying { index }]);
    }

    let mut errors = Vec::new();

    let expiry = NaiveDate::parse_from_str(raw.expiry.trim(), "%Y-%m-%d")
        .map_err(|_| ConfigError::BadExpiry {
            index,
            underlying: underlying.clone(),
            value: raw.expiry.clone(),
        });
    let option_type = raw
        .option_type
        .parse::<OptionType>()
        .map_err(|reason| ConfigError::BadType {
            index,
            underlying: underlying.clone(),
            reason,
        });

    if !raw.strike.is_finite() || raw.strike <= 0.0 {
        errors.push(ConfigError::BadStrike {
            index,
            underlying: underlying.clone(),
            value: raw.strike,
        });
    }
    if !raw.cost_per_contract.is_finite() || raw.cost_per_contract < 0.0 {
        errors.push(ConfigError::BadCost {
            index,
            underlying: underlying.clone(),
            value: raw.cost_per_contract,
        });
    }

    match (expiry, option_type) {
        (Ok(expiry), Ok(option_type)) if errors.is_empty() => Ok(Position {
            underlying,
            expiry,
            option_type,
            strike: raw.strike,
            contracts: raw.contracts,
            cost_per_contract: raw.cost_per_contract,
        }),
        (expiry, option_type) => {
            errors.extend(expiry.err());
            errors.extend(option_type.err());
            Err(errors)
        }
    }
}

// ── Tuning ──────────────────────────────────────────────────────────

/// Preset for retry budget and pacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum RunMode {
    /// Small retry budget, short pauses. For interactive use.
    Fast,
    /// Large retry budget, long pauses and a start-up stagger. For schedulers.
    Careful,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    pub max_retries: u32,
    pub base_sleep: Duration,
    pub jitter: Duration,
    pub min_sleep: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PacingConfig {
    /// Politeness delay between underlyings.
    pub underlying_pause: Duration,
    /// Upper bound of the random delay before the first network call.
    /// Zero disables the stagger.
    pub stagger_max: Duration,
}

impl RunMode {
    pub fn retry(self) -> RetryConfig {
        match self {
            RunMode::Fast => RetryConfig {
                max_retries: 3,
                base_sleep: Duration::from_millis(1000),
                jitter: Duration::from_millis(500),
                min_sleep: Duration::from_millis(200),
            },
            RunMode::Careful => RetryConfig {
                max_retries: 6,
                base_sleep: Duration::from_millis(2000),
                jitter: Duration::from_millis(1000),
                min_sleep: Duration::from_millis(200),
            },
        }
    }

    pub fn pacing(self) -> PacingConfig {
        match self {
            RunMode::Fast => PacingConfig {
                underlying_pause: Duration::from_millis(500),
                stagger_max: Duration::ZERO,
            },
            RunMode::Careful => PacingConfig {
                underlying_pause: Duration::from_millis(2000),
                stagger_max: Duration::from_secs(45),
            },
        }
    }
}

/// Everything a run needs, resolved once at startup.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub positions_path: PathBuf,
    pub data_dir: PathBuf,
    pub source: SourceKind,
    pub mode: RunMode,
    pub retry: RetryConfig,
    pub pacing: PacingConfig,
}

impl TrackerConfig {
    /// Build from CLI values, then apply `TRACKER_*` environment overrides.
    pub fn from_cli(
        positions_path: PathBuf,
        data_dir: PathBuf,
        source: SourceKind,
        mode: RunMode,
        no_stagger: bool,
    ) -> Result<Self, ConfigError> {
        let mut config = TrackerConfig {
            positions_path,
            data_dir,
            source,
            mode,
            retry: mode.retry(),
            pacing: mode.pacing(),
        };
        config.apply_overrides(|name| std::env::var(name).ok())?;
        if no_stagger {
            config.pacing.stagger_max = Duration::ZERO;
        }
        Ok(config)
    }

    fn apply_overrides(
        &mut self,
        lookup: impl Fn(&'static str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let read = |name: &'static str| -> Result<Option<u64>, ConfigError> {
            match lookup(name) {
                None => Ok(None),
                Some(value) => value
                    .trim()
                    .parse::<u64>()
                    .map(Some)
                    .map_err(|_| ConfigError::BadEnv { name, value }),
            }
        };

        if let Some(n) = read("TRACKER_MAX_RETRIES")? {
            self.retry.max_retries = n.clamp(1, 20) as u32;
        }
        if let Some(ms) = read("TRACKER_BASE_SLEEP_MS")? {
            self.retry.base_sleep = Duration::from_millis(ms);
        }
        if let Some(ms) = read("TRACKER_JITTER_MS")? {
            self.retry.jitter = Duration::from_millis(ms);
        }
        if let Some(ms) = read("TRACKER_UNDERLYING_PAUSE_MS")? {
            self.pacing.underlying_pause = Duration::from_millis(ms);
        }
        if let Some(secs) = read("TRACKER_STAGGER_MAX_SECS")? {
            self.pacing.stagger_max = Duration::from_secs(secs);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    const GOOD: &str = r#"{
        "positions": [
            {"underlying": "aapl", "expiry": "2025-09-19", "type": "call",
             "strike": 200, "contracts": 2, "cost_per_contract": 4.10},
            {"underlying": "SPY", "expiry": "2025-12-19", "type": "P",
             "strike": 500.5, "contracts": -1, "cost_per_contract": 7.25}
        ]
    }"#;

    #[test]
    fn test_parse_positions() {
        let positions = parse_positions(GOOD).unwrap();
        assert_eq!(positions.len(), 2);
        assert_eq!(positions[0].underlying, "AAPL");
        assert_eq!(positions[0].option_type, OptionType::Call);
        assert_eq!(positions[1].option_type, OptionType::Put);
        assert_eq!(positions[1].contracts, -1);
        assert_eq!(positions[1].symbol_key(), "SPY 2025-12-19 P 500.5");
    }

    #[test]
    fn test_collects_all_errors() {
        let bad = r#"{"positions": [
            {"underlying": "AAPL", "expiry": "09/19/2025", "type": "call",
             "strike": -5, "contracts": 1, "cost_per_contract": 1.0},
            {"underlying": "MSFT", "expiry": "2025-09-19", "type": "swap",
             "strike": 300, "contracts": 1, "cost_per_contract": 1.0}
        ]}"#;
        let errors = parse_positions(bad).unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors.iter().any(|e| matches!(e, ConfigError::BadExpiry { index: 0, .. })));
        assert!(errors.iter().any(|e| matches!(e, ConfigError::BadStrike { index: 0, .. })));
        assert!(errors.iter().any(|e| matches!(e, ConfigError::BadType { index: 1, .. })));
    }

    #[test]
    fn test_rejects_duplicates_and_empty() {
        let dup = r#"{"positions": [
            {"underlying": "AAPL", "expiry": "2025-09-19", "type": "call",
             "strike": 200, "contracts": 1, "cost_per_contract": 1.0},
            {"underlying": "aapl", "expiry": "2025-09-19", "type": "c",
             "strike": 200.0, "contracts": 3, "cost_per_contract": 2.0}
        ]}"#;
        let errors = parse_positions(dup).unwrap_err();
        assert!(matches!(errors[0], ConfigError::DuplicatePosition { .. }));

        let errors = parse_positions(r#"{"positions": []}"#).unwrap_err();
        assert!(matches!(errors[0], ConfigError::NoPositions));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = TrackerConfig {
            positions_path: PathBuf::from("positions.json"),
            data_dir: PathBuf::from("data"),
            source: SourceKind::Yahoo,
            mode: RunMode::Fast,
            retry: RunMode::Fast.retry(),
            pacing: RunMode::Fast.pacing(),
        };
        let env: HashMap<&str, &str> = [
            ("TRACKER_MAX_RETRIES", "5"),
            ("TRACKER_UNDERLYING_PAUSE_MS", "0"),
        ]
        .into_iter()
        .collect();

        config
            .apply_overrides(|name| env.get(name).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.pacing.underlying_pause, Duration::ZERO);
        assert_eq!(config.retry.base_sleep, RunMode::Fast.retry().base_sleep);

        let err = config
            .apply_overrides(|name| (name == "TRACKER_JITTER_MS").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::BadEnv { name: "TRACKER_JITTER_MS", .. }));
    }
}
