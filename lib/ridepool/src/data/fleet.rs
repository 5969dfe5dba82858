use std::fmt;
use std::ops::Deref;
use std::collections::BTreeSet;
use super::{Node, Time, Length};

#[derive(PartialEq, Eq, Hash, Copy, Clone, Debug, Ord, PartialOrd)]
pub struct RequestId(pub u32);

#[derive(PartialEq, Eq, Hash, Copy, Clone, Debug, Ord, PartialOrd)]
pub struct VehicleId(pub u32);

impl fmt::Display for RequestId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "r{}", self.0) }
}

impl fmt::Display for VehicleId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "v{}", self.0) }
}


#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum RequestStatus {
  Pending,
  Picking,
  Onboard,
  Complete,
  WalkAway,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Request {
  pub id: RequestId,
  pub origin: Node,
  pub destination: Node,
  /// `Tr`
  pub request_time: Time,
  /// `Ts`, unimpeded origin -> destination travel time
  pub shortest_time: Time,
  /// `Clp`
  pub latest_pickup: Time,
  /// `Cld`
  pub latest_dropoff: Time,
  pub status: RequestStatus,
  pub pickup_time: Option<Time>,
  pub dropoff_time: Option<Time>,
}

impl Request {
  /// Pending or Picking: still a candidate for assignment.
  #[inline]
  pub fn is_active(&self) -> bool {
    matches!(self.status, RequestStatus::Pending | RequestStatus::Picking)
  }

  #[inline]
  pub fn is_terminal(&self) -> bool {
    matches!(self.status, RequestStatus::Complete | RequestStatus::WalkAway)
  }

  pub fn pickup(&self) -> Waypoint {
    Waypoint {
      request: self.id,
      action: Action::Pickup,
      node: self.origin,
      deadline: self.latest_pickup,
      reference: self.request_time,
    }
  }

  pub fn dropoff(&self) -> Waypoint {
    Waypoint {
      request: self.id,
      action: Action::Dropoff,
      node: self.destination,
      deadline: self.latest_dropoff,
      reference: self.request_time + self.shortest_time,
    }
  }

  pub fn wait_time(&self) -> Option<Time> {
    self.pickup_time.map(|t| t.saturating_sub(self.request_time))
  }

  /// Extra in-vehicle + waiting time over the direct trip.
  pub fn delay(&self) -> Option<Time> {
    self.dropoff_time.map(|t| t.saturating_sub(self.request_time + self.shortest_time))
  }
}


#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Action {
  Pickup,
  Dropoff,
  RebalanceTarget,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct Waypoint {
  pub request: RequestId,
  pub action: Action,
  pub node: Node,
  pub deadline: Time,
  /// Earliest sensible service time; lateness against it is the waypoint's cost.
  pub reference: Time,
}

impl Waypoint {
  pub fn rebalance(request: RequestId, node: Node) -> Waypoint {
    Waypoint { request, action: Action::RebalanceTarget, node, deadline: Time::MAX, reference: 0 }
  }

  /// Load change when the waypoint is served.
  #[inline]
  pub fn load_delta(&self) -> i32 {
    match self.action {
      Action::Pickup => 1,
      Action::Dropoff => -1,
      Action::RebalanceTarget => 0,
    }
  }
}


/// Ordered waypoints a vehicle executes.
#[derive(Debug, Clone, Default, Eq, PartialEq, Hash)]
pub struct Schedule(Vec<Waypoint>);

impl Schedule {
  pub fn new() -> Self { Schedule(Vec::new()) }

  pub fn legs(&self) -> &[Waypoint] { &self.0 }

  pub fn into_legs(self) -> Vec<Waypoint> { self.0 }

  /// Request ids with a waypoint in the schedule, sorted.
  pub fn request_ids(&self) -> Vec<RequestId> {
    let ids: BTreeSet<_> = self.0.iter()
      .filter(|w| w.action != Action::RebalanceTarget)
      .map(|w| w.request)
      .collect();
    ids.into_iter().collect()
  }

  /// Keep only the waypoints for which `keep` holds.
  pub fn filtered(&self, mut keep: impl FnMut(&Waypoint) -> bool) -> Schedule {
    Schedule(self.0.iter().copied().filter(|w| keep(w)).collect())
  }

  pub(crate) fn pop_front(&mut self) -> Option<Waypoint> {
    if self.0.is_empty() { None } else { Some(self.0.remove(0)) }
  }
}

impl Deref for Schedule {
  type Target = [Waypoint];
  fn deref(&self) -> &[Waypoint] { &self.0 }
}

impl From<Vec<Waypoint>> for Schedule {
  fn from(legs: Vec<Waypoint>) -> Self { Schedule(legs) }
}

impl std::iter::FromIterator<Waypoint> for Schedule {
  fn from_iter<I: IntoIterator<Item=Waypoint>>(iter: I) -> Self { Schedule(iter.into_iter().collect()) }
}


/// An id-sorted set of requests proposed to be served jointly by one vehicle.
#[derive(Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Default)]
pub struct Trip(Box<[RequestId]>);

impl Trip {
  pub fn empty() -> Trip { Trip(Box::new([])) }

  pub fn single(r: RequestId) -> Trip { Trip(Box::new([r])) }

  pub fn len(&self) -> usize { self.0.len() }

  pub fn is_empty(&self) -> bool { self.0.is_empty() }

  pub fn ids(&self) -> &[RequestId] { &self.0 }

  #[inline]
  pub fn contains(&self, r: &RequestId) -> bool { self.0.binary_search(r).is_ok() }

  /// Sorted merge of two trips.
  pub fn union(&self, other: &Trip) -> Trip {
    let (a, b) = (&self.0, &other.0);
    let mut out = Vec::with_capacity(a.len() + b.len());
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
      match a[i].cmp(&b[j]) {
        std::cmp::Ordering::Less => { out.push(a[i]); i += 1; }
        std::cmp::Ordering::Greater => { out.push(b[j]); j += 1; }
        std::cmp::Ordering::Equal => { out.push(a[i]); i += 1; j += 1; }
      }
    }
    out.extend_from_slice(&a[i..]);
    out.extend_from_slice(&b[j..]);
    Trip(out.into_boxed_slice())
  }

  pub fn without(&self, r: RequestId) -> Trip {
    self.0.iter().copied().filter(|&x| x != r).collect()
  }

  /// Requests of `self` absent from `other`.
  pub fn difference<'a>(&'a self, other: &'a Trip) -> impl Iterator<Item=RequestId> + 'a {
    self.0.iter().copied().filter(move |r| !other.contains(r))
  }

  pub fn is_subset_of(&self, ids: &crate::Set<RequestId>) -> bool {
    self.0.iter().all(|r| ids.contains(r))
  }
}

impl std::iter::FromIterator<RequestId> for Trip {
  fn from_iter<I: IntoIterator<Item=RequestId>>(iter: I) -> Self {
    let mut ids: Vec<_> = iter.into_iter().collect();
    ids.sort_unstable();
    ids.dedup();
    Trip(ids.into_boxed_slice())
  }
}

impl fmt::Debug for Trip {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_set().entries(self.0.iter().map(|r| r.0)).finish()
  }
}


#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum VehicleStatus {
  Idle,
  Working,
  Rebalancing,
}

/// The part of a vehicle the search reads.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct VehicleState {
  /// Node the vehicle is at, or heading to when `time_to_next > 0`.
  pub node: Node,
  pub time_to_next: Time,
  pub load: u8,
  pub capacity: u8,
}

#[derive(Debug, Clone)]
pub struct Vehicle {
  pub id: VehicleId,
  pub capacity: u8,
  pub node: Node,
  pub time_to_next: Time,
  pub load: u8,
  pub schedule: Schedule,
  pub onboard: BTreeSet<RequestId>,
  pub status: VehicleStatus,
  pub distance_travelled: Length,
}

impl Vehicle {
  pub fn new(id: VehicleId, node: Node, capacity: u8) -> Vehicle {
    Vehicle {
      id,
      capacity,
      node,
      time_to_next: 0,
      load: 0,
      schedule: Schedule::new(),
      onboard: BTreeSet::new(),
      status: VehicleStatus::Idle,
      distance_travelled: 0,
    }
  }

  pub fn state(&self) -> VehicleState {
    VehicleState { node: self.node, time_to_next: self.time_to_next, load: self.load, capacity: self.capacity }
  }

  /// Committed legs restricted to the dropoffs of onboard requests.
  pub fn base_schedule(&self) -> Schedule {
    let base = self.schedule.filtered(|w| w.action == Action::Dropoff && self.onboard.contains(&w.request));
    debug_assert_eq!(base.len(), self.onboard.len(), "onboard request without a dropoff");
    base
  }

  /// Replace the committed schedule and derive the status from it.
  pub fn commit(&mut self, schedule: Schedule) {
    self.schedule = schedule;
    self.refresh_status();
  }

  pub(crate) fn refresh_status(&mut self) {
    self.status = if self.schedule.is_empty() {
      VehicleStatus::Idle
    } else if self.schedule.iter().all(|w| w.action == Action::RebalanceTarget) {
      VehicleStatus::Rebalancing
    } else {
      VehicleStatus::Working
    };
  }
}


/// A waypoint reached by the position simulator.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Event {
  pub request: RequestId,
  pub action: Action,
  pub time: Time,
}


#[cfg(test)]
mod tests {
  use super::*;

  fn trip(ids: &[u32]) -> Trip { ids.iter().map(|&i| RequestId(i)).collect() }

  #[test]
  fn trip_set_ops() {
    let a = trip(&[3, 1]);
    let b = trip(&[2, 3]);
    assert_eq!(a.ids(), &[RequestId(1), RequestId(3)]);
    assert_eq!(a.union(&b), trip(&[1, 2, 3]));
    assert_eq!(a.union(&b).without(RequestId(3)), trip(&[1, 2]));
    assert_eq!(b.difference(&a).collect::<Vec<_>>(), vec![RequestId(2)]);
    assert!(a.contains(&RequestId(3)));
    assert!(!a.contains(&RequestId(2)));
    assert_eq!(trip(&[5, 5]).len(), 1);
  }

  #[test]
  fn base_schedule_keeps_onboard_dropoffs() {
    let r = |id: u32| super::super::fixtures::request(id, 0, 1, 0, 100, 300, 50);
    let mut v = Vehicle::new(VehicleId(0), 0, 4);
    v.onboard.insert(RequestId(1));
    v.load = 1;
    v.commit(vec![r(2).pickup(), r(1).dropoff(), r(2).dropoff()].into());
    assert_eq!(v.status, VehicleStatus::Working);
    assert_eq!(v.base_schedule().legs(), &[r(1).dropoff()]);

    v.commit(vec![Waypoint::rebalance(RequestId(9), 3)].into());
    assert_eq!(v.status, VehicleStatus::Rebalancing);
  }
}
