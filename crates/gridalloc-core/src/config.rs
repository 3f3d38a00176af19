//! Problem description and validation.
//!
//! An [`OptimizerConfig`] is the complete, immutable description of one
//! allocation problem: the run parameters plus one [`ItemConfig`] per
//! machine. It is validated once per solve via [`OptimizerConfig::check`];
//! the solvers assume a checked configuration.

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

/// Rule used to derive the per-machine preferred operating point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationType {
    /// `r[i] = assigned_factor[i] * U`
    Proportional,
    /// Surplus distributed by remaining head-room, deficit by current load.
    #[default]
    Margin,
}

impl fmt::Display for AllocationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocationType::Proportional => write!(f, "proportional"),
            AllocationType::Margin => write!(f, "margin"),
        }
    }
}

impl FromStr for AllocationType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "proportional" => Ok(AllocationType::Proportional),
            "margin" => Ok(AllocationType::Margin),
            other => Err(ConfigError::TypeOutOfRange(other.to_string())),
        }
    }
}

impl TryFrom<u8> for AllocationType {
    type Error = ConfigError;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        match raw {
            0 => Ok(AllocationType::Proportional),
            1 => Ok(AllocationType::Margin),
            other => Err(ConfigError::TypeOutOfRange(other.to_string())),
        }
    }
}

/// Backend used by the refinement stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefinerBackendKind {
    /// Exact box-and-equality quadratic program (pure-Rust conic solver).
    #[default]
    Qp,
    /// Exterior penalty method with L-BFGS.
    PenaltyLbfgs,
}

impl fmt::Display for RefinerBackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefinerBackendKind::Qp => write!(f, "qp"),
            RefinerBackendKind::PenaltyLbfgs => write!(f, "penalty-lbfgs"),
        }
    }
}

impl FromStr for RefinerBackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "qp" => Ok(RefinerBackendKind::Qp),
            "penalty-lbfgs" | "lbfgs" => Ok(RefinerBackendKind::PenaltyLbfgs),
            other => Err(ConfigError::AlgorithmOutOfRange(other.to_string())),
        }
    }
}

impl TryFrom<u8> for RefinerBackendKind {
    type Error = ConfigError;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        match raw {
            0 => Ok(RefinerBackendKind::Qp),
            1 => Ok(RefinerBackendKind::PenaltyLbfgs),
            other => Err(ConfigError::AlgorithmOutOfRange(other.to_string())),
        }
    }
}

/// A forbidden operating band.
///
/// The open interval `(lower, upper)` is infeasible; the endpoints
/// themselves are valid operating points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Resonance {
    pub lower: f32,
    pub upper: f32,
}

impl Resonance {
    pub fn new(lower: f32, upper: f32) -> Self {
        Self { lower, upper }
    }

    /// True when `x` lies strictly inside the forbidden band.
    #[inline]
    pub fn contains_open(&self, x: f32) -> bool {
        x > self.lower && x < self.upper
    }

    /// True when `x` lies inside the band, endpoints included.
    #[inline]
    pub fn contains_closed(&self, x: f32) -> bool {
        x >= self.lower && x <= self.upper
    }
}

/// Capacity description of one machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemConfig {
    /// Stable machine identifier; keys the machine in state and output.
    pub index: u32,
    /// Machines with `enabled = false` are excluded from the problem.
    pub enabled: bool,
    /// Minimal capacity.
    pub lower_bound: f32,
    /// Maximal capacity.
    pub upper_bound: f32,
    /// Proportional-allocation weight in `[0, 1]`.
    pub assigned_factor: f32,
    /// Forbidden bands, sorted ascending, pairwise non-overlapping, all
    /// inside `[lower_bound, upper_bound]`.
    #[serde(default)]
    pub resonances: Vec<Resonance>,
}

impl ItemConfig {
    /// Width of the capacity interval.
    #[inline]
    pub fn capacity_span(&self) -> f32 {
        self.upper_bound - self.lower_bound
    }

    /// True when `value` is a valid operating point for this machine:
    /// inside the capacity interval and not strictly inside any resonance.
    pub fn is_feasible(&self, value: f32) -> bool {
        if value < self.lower_bound || value > self.upper_bound {
            return false;
        }
        !self.resonances.iter().any(|zone| zone.contains_open(value))
    }
}

/// Complete description of one allocation problem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Policy-reference rule.
    pub allocation_type: AllocationType,
    /// DP grid step along the cumulative-sum axis, `>= 1.0`.
    pub allocation_resolution: f32,
    /// Run the nonlinear refinement stage after the coarse DP.
    pub refiner_enabled: bool,
    /// Which minimiser backs the refinement stage.
    pub refiner_backend: RefinerBackendKind,
    /// Fan the DP columns out over a thread pool.
    pub multi_threaded_dp: bool,
    /// Try the closed-form small-load adjustment before the DP.
    pub small_load_enabled: bool,
    /// Dead-band for the small-load fast path.
    pub small_load_dead_size: f32,
    /// One entry per machine, in configuration order.
    pub items: Vec<ItemConfig>,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            allocation_type: AllocationType::Margin,
            allocation_resolution: 10.0,
            refiner_enabled: false,
            refiner_backend: RefinerBackendKind::default(),
            multi_threaded_dp: false,
            small_load_enabled: false,
            small_load_dead_size: 100.0,
            items: Vec::new(),
        }
    }
}

impl OptimizerConfig {
    /// The enabled items, in configuration order.
    pub fn enabled_items(&self) -> impl Iterator<Item = &ItemConfig> {
        self.items.iter().filter(|item| item.enabled)
    }

    /// Validate the configuration. Returns the first violation found.
    ///
    /// The solvers are never run against an unchecked configuration; the
    /// orchestrator calls this once per solve.
    pub fn check(&self) -> Result<(), ConfigError> {
        if self.allocation_resolution < 1.0 {
            return Err(ConfigError::ResolutionTooLow(self.allocation_resolution));
        }

        let mut first_enabled = None;
        let mut factor_sum = 0.0f32;
        for (position, item) in self.items.iter().enumerate() {
            if !item.enabled {
                continue;
            }
            first_enabled.get_or_insert(position);

            if item.lower_bound >= item.upper_bound {
                return Err(ConfigError::BoundsInverted { index: item.index });
            }
            if !(0.0..=1.0).contains(&item.assigned_factor) {
                return Err(ConfigError::FactorOutOfRange { index: item.index });
            }
            factor_sum += item.assigned_factor;

            let mut previous_upper = f32::NEG_INFINITY;
            for zone in &item.resonances {
                if zone.lower > zone.upper
                    || zone.lower < item.lower_bound
                    || zone.upper > item.upper_bound
                    || zone.lower < previous_upper
                {
                    return Err(ConfigError::ResonanceOutOfBand { index: item.index });
                }
                previous_upper = zone.upper;
            }
        }

        if first_enabled != Some(0) {
            return Err(ConfigError::FirstEnabledNotZero);
        }
        if factor_sum > 1.1 {
            return Err(ConfigError::FactorSumExceeded(factor_sum));
        }
        Ok(())
    }
}

// Process-wide configuration snapshot. Write-once, diagnostics only: the
// solvers receive their configuration explicitly and never read this.
static GLOBAL_CONFIG: OnceCell<OptimizerConfig> = OnceCell::new();

/// Install the process-wide configuration snapshot.
///
/// Returns `false` when a snapshot was already installed; the first
/// installation wins.
pub fn install_global_config(config: OptimizerConfig) -> bool {
    GLOBAL_CONFIG.set(config).is_ok()
}

/// Read the process-wide configuration snapshot, if one was installed.
pub fn global_config() -> Option<&'static OptimizerConfig> {
    GLOBAL_CONFIG.get()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(index: u32, lower: f32, upper: f32, factor: f32) -> ItemConfig {
        ItemConfig {
            index,
            enabled: true,
            lower_bound: lower,
            upper_bound: upper,
            assigned_factor: factor,
            resonances: Vec::new(),
        }
    }

    fn two_machine_config() -> OptimizerConfig {
        OptimizerConfig {
            items: vec![item(0, 0.0, 100.0, 0.5), item(1, 0.0, 100.0, 0.5)],
            ..OptimizerConfig::default()
        }
    }

    #[test]
    fn default_config_matches_legacy_defaults() {
        let config = OptimizerConfig::default();
        assert_eq!(config.allocation_type, AllocationType::Margin);
        assert_eq!(config.allocation_resolution, 10.0);
        assert!(!config.refiner_enabled);
        assert!(!config.multi_threaded_dp);
        assert!(!config.small_load_enabled);
        assert_eq!(config.small_load_dead_size, 100.0);
    }

    #[test]
    fn valid_config_passes() {
        assert!(two_machine_config().check().is_ok());
    }

    #[test]
    fn resolution_below_one_is_rejected() {
        let mut config = two_machine_config();
        config.allocation_resolution = 0.5;
        assert_eq!(config.check(), Err(ConfigError::ResolutionTooLow(0.5)));
    }

    #[test]
    fn inverted_bounds_are_rejected() {
        let mut config = two_machine_config();
        config.items[1].lower_bound = 200.0;
        assert_eq!(
            config.check(),
            Err(ConfigError::BoundsInverted { index: 1 })
        );
    }

    #[test]
    fn factor_outside_unit_interval_is_rejected() {
        let mut config = two_machine_config();
        config.items[0].assigned_factor = 1.5;
        assert_eq!(
            config.check(),
            Err(ConfigError::FactorOutOfRange { index: 0 })
        );
    }

    #[test]
    fn resonance_leaving_the_band_is_rejected() {
        let mut config = two_machine_config();
        config.items[0].resonances = vec![Resonance::new(50.0, 120.0)];
        assert_eq!(
            config.check(),
            Err(ConfigError::ResonanceOutOfBand { index: 0 })
        );
    }

    #[test]
    fn overlapping_resonances_are_rejected() {
        let mut config = two_machine_config();
        config.items[0].resonances =
            vec![Resonance::new(10.0, 40.0), Resonance::new(30.0, 60.0)];
        assert_eq!(
            config.check(),
            Err(ConfigError::ResonanceOutOfBand { index: 0 })
        );
    }

    #[test]
    fn disabled_first_item_is_rejected() {
        let mut config = two_machine_config();
        config.items[0].enabled = false;
        assert_eq!(config.check(), Err(ConfigError::FirstEnabledNotZero));
    }

    #[test]
    fn empty_enabled_set_is_rejected() {
        let mut config = two_machine_config();
        for item in &mut config.items {
            item.enabled = false;
        }
        assert_eq!(config.check(), Err(ConfigError::FirstEnabledNotZero));
    }

    #[test]
    fn factor_sum_past_limit_is_rejected() {
        let mut config = two_machine_config();
        config.items[0].assigned_factor = 0.9;
        config.items[1].assigned_factor = 0.9;
        assert!(matches!(
            config.check(),
            Err(ConfigError::FactorSumExceeded(_))
        ));
    }

    #[test]
    fn disabled_items_do_not_count_toward_the_factor_sum() {
        let mut config = two_machine_config();
        config.items.push(ItemConfig {
            enabled: false,
            assigned_factor: 1.0,
            ..item(2, 0.0, 100.0, 1.0)
        });
        assert!(config.check().is_ok());
    }

    #[test]
    fn resonance_endpoints_are_feasible() {
        let machine = ItemConfig {
            resonances: vec![Resonance::new(20.0, 40.0)],
            ..item(0, 0.0, 100.0, 0.5)
        };
        assert!(machine.is_feasible(20.0));
        assert!(machine.is_feasible(40.0));
        assert!(!machine.is_feasible(30.0));
        assert!(!machine.is_feasible(-1.0));
        assert!(!machine.is_feasible(101.0));
    }

    #[test]
    fn selectors_parse_from_strings() {
        assert_eq!(
            "proportional".parse::<AllocationType>().unwrap(),
            AllocationType::Proportional
        );
        assert_eq!(
            "qp".parse::<RefinerBackendKind>().unwrap(),
            RefinerBackendKind::Qp
        );
        assert!(matches!(
            "nonsense".parse::<AllocationType>(),
            Err(ConfigError::TypeOutOfRange(_))
        ));
        assert!(matches!(
            "nonsense".parse::<RefinerBackendKind>(),
            Err(ConfigError::AlgorithmOutOfRange(_))
        ));
    }

    #[test]
    fn selectors_parse_from_raw_discriminants() {
        assert_eq!(
            AllocationType::try_from(0u8).unwrap(),
            AllocationType::Proportional
        );
        assert!(matches!(
            AllocationType::try_from(2u8),
            Err(ConfigError::TypeOutOfRange(_))
        ));
        assert!(matches!(
            RefinerBackendKind::try_from(9u8),
            Err(ConfigError::AlgorithmOutOfRange(_))
        ));
    }

    #[test]
    fn config_round_trips_through_serde() {
        let config = two_machine_config();
        let json = serde_json::to_string(&config).unwrap();
        let back: OptimizerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
