use super::{Node, Time, Length, TravelTable};

/// Origin -> destination travel queries.  `None` means there is no route between the two nodes.
pub trait TravelTimeOracle: Sync {
  fn duration(&self, origin: Node, dest: Node) -> Option<Time>;

  fn distance(&self, origin: Node, dest: Node) -> Option<Length>;

  /// Standard deviation of the travel time, zero for deterministic oracles.
  fn duration_std(&self, origin: Node, dest: Node) -> Option<Time> {
    self.duration(origin, dest).map(|_| 0)
  }
}

impl TravelTimeOracle for TravelTable {
  #[inline]
  fn duration(&self, origin: Node, dest: Node) -> Option<Time> {
    if origin == dest { return Some(0); }
    self.get(origin, dest).map(|a| a.duration)
  }

  #[inline]
  fn distance(&self, origin: Node, dest: Node) -> Option<Length> {
    if origin == dest { return Some(0); }
    self.get(origin, dest).map(|a| a.distance)
  }

  #[inline]
  fn duration_std(&self, origin: Node, dest: Node) -> Option<Time> {
    if origin == dest { return Some(0); }
    self.get(origin, dest).map(|a| a.duration_std)
  }
}


#[cfg(test)]
mod tests {
  use super::*;
  use crate::data::Arc;

  #[test]
  fn table_oracle() {
    let mut t = TravelTable::default();
    t.insert(0, 1, Arc { duration: 30, distance: 250, duration_std: 4 });
    assert_eq!(t.duration(0, 1), Some(30));
    assert_eq!(t.distance(0, 1), Some(250));
    assert_eq!(t.duration_std(0, 1), Some(4));
    assert_eq!(t.duration(1, 0), None);
    assert_eq!(t.duration(7, 7), Some(0));
  }
}
