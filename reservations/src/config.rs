//! Configuration management for the reservation system.
//!
//! Loads configuration from environment variables with sensible defaults.
//! The binary loads `.env` with `dotenvy` before calling [`Config::from_env`].

use crate::types::{Money, RoomId};
use std::env;
use thiserror::Error;

/// Configuration failures. Fatal at startup.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable is set but cannot be parsed.
    #[error("Invalid value for {var}: {value:?} ({reason})")]
    Invalid {
        /// Variable name
        var: &'static str,
        /// Raw value
        value: String,
        /// What was wrong with it
        reason: String,
    },
}

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Rooms the arbiter knows about
    pub rooms: Vec<RoomId>,
    /// Billing rate
    pub price_per_minute: Money,
    /// Parallel lanes per consumer
    pub consumer_lanes: usize,
    /// Log filter used when `RUST_LOG` is unset
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rooms: (1..=6).map(RoomId::new).collect(),
            price_per_minute: Money::from_cents(4),
            consumer_lanes: 4,
            log_filter: "roomledger=info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `ROOMLEDGER_ROOMS` | `1,2,3,4,5,6` |
    /// | `ROOMLEDGER_PRICE_PER_MINUTE` | `0.04` |
    /// | `ROOMLEDGER_CONSUMER_LANES` | `4` |
    /// | `ROOMLEDGER_LOG` | `roomledger=info` |
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for a variable that is set but malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for a variable that is set but malformed.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let rooms = match lookup("ROOMLEDGER_ROOMS") {
            Some(raw) => parse_rooms(&raw)?,
            None => defaults.rooms,
        };

        let price_per_minute = match lookup("ROOMLEDGER_PRICE_PER_MINUTE") {
            Some(raw) => Money::from_decimal_str(raw.trim()).map_err(|e| ConfigError::Invalid {
                var: "ROOMLEDGER_PRICE_PER_MINUTE",
                value: raw.clone(),
                reason: e.to_string(),
            })?,
            None => defaults.price_per_minute,
        };

        let consumer_lanes = match lookup("ROOMLEDGER_CONSUMER_LANES") {
            Some(raw) => match raw.trim().parse::<usize>() {
                Ok(lanes) if lanes > 0 => lanes,
                _ => {
                    return Err(ConfigError::Invalid {
                        var: "ROOMLEDGER_CONSUMER_LANES",
                        value: raw,
                        reason: "expected a positive integer".to_string(),
                    });
                }
            },
            None => defaults.consumer_lanes,
        };

        let log_filter = lookup("ROOMLEDGER_LOG").unwrap_or(defaults.log_filter);

        Ok(Self {
            rooms,
            price_per_minute,
            consumer_lanes,
            log_filter,
        })
    }
}

fn parse_rooms(raw: &str) -> Result<Vec<RoomId>, ConfigError> {
    let invalid = |reason: String| ConfigError::Invalid {
        var: "ROOMLEDGER_ROOMS",
        value: raw.to_string(),
        reason,
    };

    let mut rooms = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let room = part
            .parse::<u32>()
            .map_err(|e| invalid(format!("{part}: {e}")))?;
        let room = RoomId::new(room);
        if !rooms.contains(&room) {
            rooms.push(room);
        }
    }
    if rooms.is_empty() {
        return Err(invalid("no rooms listed".to_string()));
    }
    Ok(rooms)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)] // Test code

    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |var: &str| vars.get(var).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.rooms.len(), 6);
        assert_eq!(config.price_per_minute.to_string(), "0.04");
    }

    #[test]
    fn reads_every_variable() {
        let config = Config::from_lookup(lookup(&[
            ("ROOMLEDGER_ROOMS", "3, 7,3"),
            ("ROOMLEDGER_PRICE_PER_MINUTE", "0.10"),
            ("ROOMLEDGER_CONSUMER_LANES", "2"),
            ("ROOMLEDGER_LOG", "debug"),
        ]))
        .unwrap();

        assert_eq!(config.rooms, vec![RoomId::new(3), RoomId::new(7)]);
        assert_eq!(config.price_per_minute, Money::from_cents(10));
        assert_eq!(config.consumer_lanes, 2);
        assert_eq!(config.log_filter, "debug");
    }

    #[test]
    fn malformed_values_are_errors() {
        for (var, value) in [
            ("ROOMLEDGER_ROOMS", "one,two"),
            ("ROOMLEDGER_ROOMS", " , "),
            ("ROOMLEDGER_PRICE_PER_MINUTE", "cheap"),
            ("ROOMLEDGER_CONSUMER_LANES", "0"),
        ] {
            let result = Config::from_lookup(lookup(&[(var, value)]));
            assert!(
                matches!(&result, Err(ConfigError::Invalid { var: v, .. }) if *v == var),
                "{var}={value:?} gave {result:?}"
            );
        }
    }
}
