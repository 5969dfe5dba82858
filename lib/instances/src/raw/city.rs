pub type Time = f64;

/// One directed arc of a travel-time table, as it appears on disk.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawArc {
  pub origin: usize,
  pub dest: usize,
  pub duration: Time,
  pub distance: f64,
  /// Standard deviation of the travel time, zero for deterministic tables.
  pub std: Time,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArcTable {
  pub arcs: Vec<RawArc>,
}

/// One line of a trip log.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawRequest {
  pub time: Time,
  pub origin: usize,
  pub dest: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestLog {
  pub requests: Vec<RawRequest>,
}
