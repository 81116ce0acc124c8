//! ---
//! eb_section: "02-pacing-scheduling"
//! eb_subsection: "module"
//! eb_type: "source"
//! eb_scope: "code"
//! eb_description: "Rate spec grammar and limiter configuration."
//! eb_version: "v0.0.0-prealpha"
//! eb_owner: "tbd"
//! ---
use std::fmt;
use std::str::FromStr;

use crate::error::RateSpecError;

/// Highest supported rate; schedule arithmetic is done in whole nanoseconds.
pub const MAX_RATE: f64 = 1_000_000_000.0;

/// Burst ratio applied when a spec names only a rate.
pub const DEFAULT_BURST_RATIO: f64 = 1.1;

/// How a limiter treats cycles that are already late when they ask to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PacingMode {
    /// Late cycles start immediately but the schedule never shifts.
    #[default]
    Strict,
    /// Late cycles re-anchor the schedule at the current instant.
    Co,
    /// Late cycles catch up no faster than `rate * burst_ratio`.
    Hybrid,
}

impl PacingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PacingMode::Strict => "strict",
            PacingMode::Co => "co",
            PacingMode::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for PacingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PacingMode {
    type Err = RateSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(PacingMode::Strict),
            "co" => Ok(PacingMode::Co),
            "hybrid" => Ok(PacingMode::Hybrid),
            other => Err(RateSpecError::UnknownMode(other.to_owned())),
        }
    }
}

/// Validated configuration of one rate limiter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimiterConfig {
    pub target_rate: f64,
    pub burst_ratio: f64,
    pub mode: PacingMode,
    /// Every `modulo` grants a late schedule is re-anchored at the current instant.
    pub modulo: Option<u64>,
}

impl RateLimiterConfig {
    pub fn new(target_rate: f64) -> Result<Self, RateSpecError> {
        let config = Self {
            target_rate,
            burst_ratio: DEFAULT_BURST_RATIO,
            mode: PacingMode::Strict,
            modulo: None,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_burst_ratio(mut self, burst_ratio: f64) -> Result<Self, RateSpecError> {
        self.burst_ratio = burst_ratio;
        self.validate()?;
        Ok(self)
    }

    pub fn with_mode(mut self, mode: PacingMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_modulo(mut self, modulo: u64) -> Result<Self, RateSpecError> {
        self.modulo = Some(modulo);
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), RateSpecError> {
        if !(self.target_rate > 0.0) {
            return Err(RateSpecError::NonPositiveRate(self.target_rate));
        }
        if self.target_rate > MAX_RATE || !self.target_rate.is_finite() {
            return Err(RateSpecError::RateTooHigh(self.target_rate));
        }
        if !(self.burst_ratio >= 1.0) || !self.burst_ratio.is_finite() {
            return Err(RateSpecError::BurstBelowOne(self.burst_ratio));
        }
        if self.modulo == Some(0) {
            return Err(RateSpecError::ZeroModulo);
        }
        Ok(())
    }
}

impl fmt::Display for RateLimiterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.target_rate, self.burst_ratio, self.mode)?;
        if let Some(modulo) = self.modulo {
            write!(f, ",{}", modulo)?;
        }
        Ok(())
    }
}

/// Parsed form of the `<rate>[,<burst>[,<mode>[,<modulo>]]]` grammar.
///
/// The burst ratio stays optional so callers can substitute their own
/// default (see [`RateSpec::to_config`]). Fields are separated by `,` only;
/// `;` separates activity parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateSpec {
    pub rate: f64,
    pub burst_ratio: Option<f64>,
    pub mode: PacingMode,
    /// Re-anchor a late schedule every `modulo` grants.
    pub modulo: Option<u64>,
}

impl RateSpec {
    pub fn to_config(&self, default_burst_ratio: f64) -> Result<RateLimiterConfig, RateSpecError> {
        let config = RateLimiterConfig {
            target_rate: self.rate,
            burst_ratio: self.burst_ratio.unwrap_or(default_burst_ratio),
            mode: self.mode,
            modulo: self.modulo,
        };
        config.validate()?;
        Ok(config)
    }
}

impl FromStr for RateSpec {
    type Err = RateSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(RateSpecError::Empty);
        }
        let fields: Vec<&str> = trimmed.split(',').map(str::trim).collect();
        if fields.len() > 4 {
            return Err(RateSpecError::TooManyFields {
                spec: trimmed.to_owned(),
            });
        }

        let rate = parse_number("rate", fields[0])?;
        let burst_ratio = fields
            .get(1)
            .filter(|field| !field.is_empty())
            .map(|field| parse_number("burst ratio", field))
            .transpose()?;
        let mode = match fields.get(2) {
            Some(field) => field.parse()?,
            None => PacingMode::default(),
        };
        let modulo = fields
            .get(3)
            .map(|field| {
                field.parse::<u64>().map_err(|_| RateSpecError::InvalidNumber {
                    field: "modulo",
                    value: (*field).to_owned(),
                })
            })
            .transpose()?;

        let spec = RateSpec {
            rate,
            burst_ratio,
            mode,
            modulo,
        };
        spec.to_config(burst_ratio.unwrap_or(DEFAULT_BURST_RATIO))?;
        Ok(spec)
    }
}

impl fmt::Display for RateSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.rate)?;
        if let Some(burst) = self.burst_ratio {
            write!(f, ",{}", burst)?;
        } else if self.mode != PacingMode::default() || self.modulo.is_some() {
            write!(f, ",{}", DEFAULT_BURST_RATIO)?;
        }
        if self.mode != PacingMode::default() || self.modulo.is_some() {
            write!(f, ",{}", self.mode)?;
        }
        if let Some(modulo) = self.modulo {
            write!(f, ",{}", modulo)?;
        }
        Ok(())
    }
}

fn parse_number(field: &'static str, value: &str) -> Result<f64, RateSpecError> {
    value
        .parse::<f64>()
        .map_err(|_| RateSpecError::InvalidNumber {
            field,
            value: value.to_owned(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_only_defaults_to_strict() {
        let spec: RateSpec = "1000".parse().unwrap();
        assert_eq!(spec.rate, 1000.0);
        assert_eq!(spec.burst_ratio, None);
        assert_eq!(spec.mode, PacingMode::Strict);
        let config = spec.to_config(1.25).unwrap();
        assert_eq!(config.burst_ratio, 1.25);
    }

    #[test]
    fn full_spec_tolerates_whitespace() {
        let spec: RateSpec = " 1000 , 1.5 , HYBRID ".parse().unwrap();
        assert_eq!(spec.burst_ratio, Some(1.5));
        assert_eq!(spec.mode, PacingMode::Hybrid);
        let spec: RateSpec = "250,1.0,co".parse().unwrap();
        assert_eq!(spec.mode, PacingMode::Co);
        assert_eq!(spec.to_string(), "250,1,co");
    }

    #[test]
    fn semicolons_do_not_separate_rate_fields() {
        assert!(matches!(
            "1000;1.5;co".parse::<RateSpec>(),
            Err(RateSpecError::InvalidNumber { field: "rate", .. })
        ));
    }

    #[test]
    fn modulo_is_the_optional_fourth_field() {
        let spec: RateSpec = "1000,1.1,strict,500".parse().unwrap();
        assert_eq!(spec.modulo, Some(500));
        assert_eq!(spec.to_config(1.1).unwrap().modulo, Some(500));
        assert_eq!(spec.to_string(), "1000,1.1,strict,500");
        assert_eq!(
            "1000,1.1,strict,0".parse::<RateSpec>(),
            Err(RateSpecError::ZeroModulo)
        );
        assert!(matches!(
            "1000,1.1,co,often".parse::<RateSpec>(),
            Err(RateSpecError::InvalidNumber { field: "modulo", .. })
        ));
    }

    #[test]
    fn invalid_specs_are_rejected() {
        assert_eq!("".parse::<RateSpec>(), Err(RateSpecError::Empty));
        assert_eq!("0".parse::<RateSpec>(), Err(RateSpecError::NonPositiveRate(0.0)));
        assert_eq!(
            "-5".parse::<RateSpec>(),
            Err(RateSpecError::NonPositiveRate(-5.0))
        );
        assert_eq!(
            "2e9".parse::<RateSpec>(),
            Err(RateSpecError::RateTooHigh(2e9))
        );
        assert_eq!(
            "100,0.5".parse::<RateSpec>(),
            Err(RateSpecError::BurstBelowOne(0.5))
        );
        assert_eq!(
            "100,1.5,lazy".parse::<RateSpec>(),
            Err(RateSpecError::UnknownMode("lazy".into()))
        );
        assert!(matches!(
            "100,1.5,co,10,extra".parse::<RateSpec>(),
            Err(RateSpecError::TooManyFields { .. })
        ));
        assert!(matches!(
            "fast".parse::<RateSpec>(),
            Err(RateSpecError::InvalidNumber { field: "rate", .. })
        ));
        assert!("NaN".parse::<RateSpec>().is_err());
    }

    #[test]
    fn modulo_must_be_positive() {
        let config = RateLimiterConfig::new(10.0).unwrap();
        assert_eq!(config.with_modulo(0), Err(RateSpecError::ZeroModulo));
        assert_eq!(config.with_modulo(100).unwrap().modulo, Some(100));
    }
}
