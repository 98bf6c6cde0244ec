//! TOML configuration for the tunable knobs the problems expose. Every field
//! has a default matching the constant the module would use anyway, so an
//! empty config file is valid.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::cash::Money;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PracticeConfig {
    pub booking: BookingCfg,
    pub scheduler: SchedulerCfg,
    pub atm: AtmCfg,
    pub parking: ParkingCfg,
    pub library: LibraryCfg,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct BookingCfg {
    /// Seat hold time-to-live in seconds.
    pub hold_ttl_secs: u64,
    /// Background sweep interval in seconds.
    pub sweep_interval_secs: u64,
}

impl Default for BookingCfg {
    fn default() -> Self {
        Self {
            hold_ttl_secs: 300,
            sweep_interval_secs: 30,
        }
    }
}

impl BookingCfg {
    pub fn hold_ttl(&self) -> Duration {
        Duration::from_secs(self.hold_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerCfg {
    /// 0 means "one per CPU".
    pub workers: usize,
    pub backoff_base_ms: u64,
    pub drain_on_shutdown: bool,
}

impl Default for SchedulerCfg {
    fn default() -> Self {
        Self {
            workers: 0,
            backoff_base_ms: 100,
            drain_on_shutdown: true,
        }
    }
}

impl SchedulerCfg {
    pub fn to_scheduler_config(&self) -> crate::scheduler::SchedulerConfig {
        crate::scheduler::SchedulerConfig {
            workers: if self.workers == 0 {
                num_cpus::get()
            } else {
                self.workers
            },
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            drain_on_shutdown: self.drain_on_shutdown,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct AtmCfg {
    pub daily_limit_cents: i64,
}

impl Default for AtmCfg {
    fn default() -> Self {
        Self {
            daily_limit_cents: 50_000,
        }
    }
}

impl AtmCfg {
    pub fn daily_limit(&self) -> Money {
        Money::from_cents(self.daily_limit_cents)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ParkingCfg {
    pub car_hourly_cents: i64,
    pub motorcycle_hourly_cents: i64,
    pub bus_hourly_cents: i64,
}

impl Default for ParkingCfg {
    fn default() -> Self {
        Self {
            car_hourly_cents: 300,
            motorcycle_hourly_cents: 100,
            bus_hourly_cents: 800,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct LibraryCfg {
    pub loan_days: i64,
    pub daily_fine_cents: i64,
    pub max_loans: usize,
}

impl Default for LibraryCfg {
    fn default() -> Self {
        Self {
            loan_days: 14,
            daily_fine_cents: 25,
            max_loans: 5,
        }
    }
}

impl LibraryCfg {
    pub fn to_loan_policy(&self) -> crate::library::LoanPolicy {
        crate::library::LoanPolicy {
            loan_days: self.loan_days,
            daily_fine: Money::from_cents(self.daily_fine_cents),
            max_loans: self.max_loans,
        }
    }
}

impl PracticeConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: PracticeConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make a module misbehave rather than letting
    /// them surface as weird runtime behavior.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.booking.hold_ttl_secs == 0 {
            return Err(ConfigError::Invalid(
                "booking.hold_ttl_secs must be at least 1".into(),
            ));
        }
        if self.booking.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "booking.sweep_interval_secs must be at least 1".into(),
            ));
        }
        if self.scheduler.backoff_base_ms == 0 {
            return Err(ConfigError::Invalid(
                "scheduler.backoff_base_ms must be at least 1".into(),
            ));
        }
        if self.atm.daily_limit_cents <= 0 {
            return Err(ConfigError::Invalid(
                "atm.daily_limit_cents must be positive".into(),
            ));
        }
        for (name, cents) in [
            ("parking.car_hourly_cents", self.parking.car_hourly_cents),
            (
                "parking.motorcycle_hourly_cents",
                self.parking.motorcycle_hourly_cents,
            ),
            ("parking.bus_hourly_cents", self.parking.bus_hourly_cents),
        ] {
            if cents < 0 {
                return Err(ConfigError::Invalid(format!("{name} must not be negative")));
            }
        }
        if self.library.loan_days <= 0 {
            return Err(ConfigError::Invalid(
                "library.loan_days must be at least 1".into(),
            ));
        }
        if self.library.daily_fine_cents < 0 {
            return Err(ConfigError::Invalid(
                "library.daily_fine_cents must not be negative".into(),
            ));
        }
        if self.library.max_loans == 0 {
            return Err(ConfigError::Invalid(
                "library.max_loans must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
