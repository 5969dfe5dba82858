use std::time::Duration;
use std::str::FromStr;
use anyhow::Result;

use crate::Error;
use crate::data::Time;

/// How a schedule is priced.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CostKind {
  /// Sum of pickup waits and dropoff delays.
  WaitDelay,
  /// Time until the last waypoint is served.
  Duration,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SolverKind {
  Exact,
  Greedy,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ContinuityMode {
  /// Requests already being picked up have no "unassigned" option.
  Hard,
  /// Leaving them unassigned is allowed but penalised by `continuity_weight`.
  Relaxed,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Objective {
  MinCost,
  MaxCoverage,
}

macro_rules! impl_from_str {
  ($t:ty { $($s:literal => $v:expr),+ $(,)? }) => {
    impl FromStr for $t {
      type Err = String;

      fn from_str(s: &str) -> Result<Self, Self::Err> {
        return match s {
          $($s => Ok($v),)+
          _ => Err(format!("invalid string: {}", s)),
        };
      }
    }
  };
}

impl_from_str!(CostKind { "wait-delay" => CostKind::WaitDelay, "duration" => CostKind::Duration });
impl_from_str!(SolverKind { "exact" => SolverKind::Exact, "greedy" => SolverKind::Greedy });
impl_from_str!(ContinuityMode { "hard" => ContinuityMode::Hard, "relaxed" => ContinuityMode::Relaxed });
impl_from_str!(Objective { "cost" => Objective::MinCost, "coverage" => Objective::MaxCoverage });


#[derive(Debug, Clone)]
pub struct EngineConfig {
  pub cost: CostKind,
  /// Multiple of the travel-time standard deviation added to every arrival before the
  /// deadline test.  Zero gives the deterministic test.
  pub deadline_buffer: f64,
}

impl Default for EngineConfig {
  fn default() -> Self {
    EngineConfig { cost: CostKind::WaitDelay, deadline_buffer: 0.0 }
  }
}

#[derive(Debug, Clone)]
pub struct EnumerationConfig {
  pub max_trip_size: usize,
  /// Wall-clock budget for one vehicle's table in one cycle.
  pub vehicle_budget: Duration,
  /// Recover trips from the previous cycle's table before searching.
  pub reuse: bool,
  /// Only the `n` requests with the earliest pickup ETA are considered per vehicle.
  pub max_candidates: Option<usize>,
  /// Keep only the `n` cheapest plans of every trip as bases for the next size.
  pub max_plans_per_trip: Option<usize>,
}

impl Default for EnumerationConfig {
  fn default() -> Self {
    EnumerationConfig {
      max_trip_size: 4,
      vehicle_budget: Duration::from_millis(200),
      reuse: true,
      max_candidates: Some(30),
      max_plans_per_trip: None,
    }
  }
}

#[derive(Debug, Clone)]
pub struct AssignmentConfig {
  pub solver: SolverKind,
  pub solver_budget: Duration,
  pub continuity: ContinuityMode,
  pub objective: Objective,
  /// Lower bound on the cost of leaving a request unassigned.
  pub unassigned_penalty: f64,
  pub continuity_weight: f64,
}

impl Default for AssignmentConfig {
  fn default() -> Self {
    AssignmentConfig {
      solver: SolverKind::Exact,
      solver_budget: Duration::from_secs(5),
      continuity: ContinuityMode::Hard,
      objective: Objective::MinCost,
      unassigned_penalty: 1e6,
      continuity_weight: 10.0,
    }
  }
}

/// Bounds used to derive `latest_pickup = Tr + max_wait` and
/// `latest_dropoff = Tr + Ts + max_delay`.
#[derive(Debug, Copy, Clone)]
pub struct DeadlineBounds {
  pub max_wait: Time,
  pub max_delay: Time,
}

impl Default for DeadlineBounds {
  fn default() -> Self {
    DeadlineBounds { max_wait: 300, max_delay: 600 }
  }
}

#[derive(Debug, Clone)]
pub struct DispatchConfig {
  pub engine: EngineConfig,
  pub enumeration: EnumerationConfig,
  pub assignment: AssignmentConfig,
  pub deadlines: DeadlineBounds,
  /// Seconds between dispatch cycles.
  pub interval: Time,
  pub vehicle_capacity: u8,
  /// Send idle vehicles toward requests left unassigned.
  pub rebalance: bool,
}

impl Default for DispatchConfig {
  fn default() -> Self {
    DispatchConfig {
      engine: Default::default(),
      enumeration: Default::default(),
      assignment: Default::default(),
      deadlines: Default::default(),
      interval: 30,
      vehicle_capacity: 4,
      rebalance: true,
    }
  }
}

fn ensure(cond: bool, msg: &'static str) -> Result<()> {
  if cond { Ok(()) } else { Err(Error::InvalidConfig(msg).into()) }
}

impl DispatchConfig {
  pub fn validate(&self) -> Result<()> {
    let b = self.engine.deadline_buffer;
    ensure(b.is_finite() && b >= 0.0, "deadline buffer must be finite and non-negative")?;
    ensure(self.enumeration.max_trip_size >= 1, "max trip size must be at least 1")?;
    ensure(self.enumeration.max_candidates != Some(0), "max candidates must be positive")?;
    ensure(self.enumeration.max_plans_per_trip != Some(0), "max plans per trip must be positive")?;
    let p = self.assignment.unassigned_penalty;
    ensure(p.is_finite() && p >= 0.0, "unassigned penalty must be finite and non-negative")?;
    let w = self.assignment.continuity_weight;
    ensure(w.is_finite() && w >= 1.0, "continuity weight must be at least 1")?;
    ensure(self.interval > 0, "dispatch interval must be positive")?;
    ensure(self.vehicle_capacity > 0, "vehicle capacity must be positive")?;
    Ok(())
  }
}


#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn default_is_valid() {
    assert!(DispatchConfig::default().validate().is_ok());
  }

  #[test]
  fn rejects_nonsense() {
    let mut c = DispatchConfig::default();
    c.engine.deadline_buffer = -1.0;
    assert!(c.validate().is_err());

    let mut c = DispatchConfig::default();
    c.enumeration.max_trip_size = 0;
    assert!(c.validate().is_err());

    let mut c = DispatchConfig::default();
    c.assignment.continuity_weight = f64::NAN;
    assert!(c.validate().is_err());

    let mut c = DispatchConfig::default();
    c.vehicle_capacity = 0;
    let err = c.validate().unwrap_err();
    assert!(err.to_string().contains("capacity"));
  }

  #[test]
  fn parse_kinds() {
    assert_eq!("duration".parse::<CostKind>(), Ok(CostKind::Duration));
    assert_eq!("relaxed".parse::<ContinuityMode>(), Ok(ContinuityMode::Relaxed));
    assert!("ilp".parse::<SolverKind>().is_err());
  }
}
