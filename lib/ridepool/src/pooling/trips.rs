use std::collections::BTreeSet;
use std::time::Instant;
use tracing::*;

use crate::*;
use crate::data::*;
use crate::config::{EngineConfig, EnumerationConfig};
use super::schedule::{self, Insertion, Plan, Probe};
use super::preprocessing::{nearest_candidates, quick_reject};

/// A feasible trip for one vehicle with every plan found for it.
#[derive(Debug, Clone)]
pub struct TripEntry {
  pub trip: Trip,
  pub best: Plan,
  pub feasible: Vec<Plan>,
}

impl TripEntry {
  /// `None` if there are no plans.  With a `limit`, only the cheapest plans are kept.
  pub(super) fn from_plans(trip: Trip, mut plans: Vec<Plan>, limit: Option<usize>) -> Option<TripEntry> {
    if let Some(n) = limit {
      plans.sort_by_key(|p| p.cost);
      plans.truncate(n);
    }
    let best = plans.iter().min_by_key(|p| p.cost)?.clone();
    return Some(TripEntry { trip, best, feasible: plans });
  }

  fn from_insertion(trip: Trip, ins: Insertion, limit: Option<usize>) -> Option<TripEntry> {
    Self::from_plans(trip, ins.feasible, limit)
  }
}

#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct EnumerationStats {
  pub insert_calls: usize,
  pub quick_rejects: usize,
  pub pruned: usize,
  pub recovered: usize,
}

/// Feasible trips of one vehicle for one cycle.
#[derive(Debug, Clone)]
pub struct TripTable {
  pub vehicle: VehicleId,
  pub now: Time,
  /// Onboard requests when the table was built.
  pub onboard: BTreeSet<RequestId>,
  /// The vehicle's committed legs restricted to onboard requests.
  pub keep: Plan,
  /// `levels[k - 1]` holds the trips of size `k`.
  pub levels: Vec<Vec<TripEntry>>,
  /// False if the time budget ran out before the search finished.
  pub complete: bool,
  pub stats: EnumerationStats,
}

impl TripTable {
  pub fn entries(&self) -> impl Iterator<Item=&TripEntry> {
    self.levels.iter().flatten()
  }

  pub fn level(&self, size: usize) -> &[TripEntry] {
    match size.checked_sub(1).and_then(|k| self.levels.get(k)) {
      Some(l) => l.as_slice(),
      None => &[],
    }
  }

  pub fn get(&self, trip: &Trip) -> Option<&TripEntry> {
    self.level(trip.len()).iter().find(|e| &e.trip == trip)
  }

  pub fn len(&self) -> usize {
    self.levels.iter().map(Vec::len).sum()
  }

  pub fn is_empty(&self) -> bool { self.len() == 0 }

  /// Union of the request ids of all trips.
  pub fn request_ids(&self) -> Set<RequestId> {
    self.entries().flat_map(|e| e.trip.ids().iter().copied()).collect()
  }
}


pub struct Enumerator<'a> {
  pub oracle: &'a dyn TravelTimeOracle,
  pub engine: &'a EngineConfig,
  pub config: &'a EnumerationConfig,
}

impl<'a> Enumerator<'a> {
  pub fn new(oracle: &'a dyn TravelTimeOracle, engine: &'a EngineConfig, config: &'a EnumerationConfig) -> Self {
    Enumerator { oracle, engine, config }
  }

  /// Build the feasible-trip table of `vehicle`.  With reuse enabled and a table of the same
  /// vehicle from the previous cycle, trips are first recovered from it and only the trips that
  /// were not recovered are searched.
  #[instrument(level="debug", skip_all, fields(vehicle=%vehicle.id, now=now))]
  pub fn enumerate_trips(&self, vehicle: &Vehicle, candidates: &[&Request], now: Time, previous: Option<&TripTable>) -> TripTable {
    let started = Instant::now();
    let cutoff = started + self.config.vehicle_budget;
    let probe = Probe::new(self.oracle, vehicle.state(), now, self.engine);
    let mut stats = EnumerationStats::default();
    let base = vehicle.base_schedule();

    let (keep, on_time) = match schedule::check(&probe, &base) {
      Ok(cost) => (Plan { schedule: base, cost }, true),
      Err(v) => {
        // insertions are still possible behind the late waypoint
        warn!(?v, "committed legs are no longer feasible");
        match schedule::price(&probe, &base) {
          Ok(cost) => (Plan { schedule: base, cost }, false),
          Err(v) => {
            error!(?v, "committed legs cannot be followed");
            return TripTable {
              vehicle: vehicle.id,
              now,
              onboard: vehicle.onboard.clone(),
              keep: Plan { schedule: base, cost: 0 },
              levels: Vec::new(),
              complete: true,
              stats,
            };
          }
        }
      }
    };

    let pool: Vec<&Request> = match self.config.max_candidates {
      Some(n) => nearest_candidates(self.oracle, &probe.state, now, candidates, Some(n)),
      None => candidates.to_vec(),
    };
    let by_id: Map<RequestId, &Request> = pool.iter().map(|r| (r.id, *r)).collect();

    let mut levels = match previous {
      Some(prev) if self.config.reuse && on_time && prev.vehicle == vehicle.id => {
        let levels = self.recover(&probe, vehicle, prev, &by_id, &mut stats);
        debug!(recovered=stats.recovered, previous_complete=prev.complete);
        levels
      }
      _ => Vec::new(),
    };

    let complete = self.grow(&probe, &keep.schedule, &pool, &by_id, &mut levels, &mut stats, cutoff);
    while levels.last().map_or(false, Vec::is_empty) {
      levels.pop();
    }

    let table = TripTable {
      vehicle: vehicle.id,
      now,
      onboard: vehicle.onboard.clone(),
      keep,
      levels,
      complete,
      stats,
    };
    if !complete {
      debug!(budget=?self.config.vehicle_budget, "time budget exhausted, table is partial");
    }
    debug!(trips=table.len(), insert_calls=stats.insert_calls, quick_rejects=stats.quick_rejects, pruned=stats.pruned,
      elapsed=?started.elapsed(), "trip table built");
    return table;
  }

  /// Grow `levels` from size 1 upwards, skipping trips already in `levels`.  Returns false
  /// when cut off by the time budget.
  fn grow(&self,
          probe: &Probe,
          base: &Schedule,
          pool: &[&Request],
          by_id: &Map<RequestId, &Request>,
          levels: &mut Vec<Vec<TripEntry>>,
          stats: &mut EnumerationStats,
          cutoff: Instant) -> bool {
    let limit = self.config.max_plans_per_trip;
    if levels.is_empty() {
      levels.push(Vec::new());
    }

    let base = std::slice::from_ref(base);
    let recovered: Set<RequestId> = levels[0].iter().map(|e| e.trip.ids()[0]).collect();
    for &r in pool {
      if recovered.contains(&r.id) { continue; }
      if quick_reject(self.oracle, &probe.state, probe.now, r) {
        trace!(request=%r.id, "quick reject");
        stats.quick_rejects += 1;
        continue;
      }
      if Instant::now() >= cutoff { return false; }
      stats.insert_calls += 1;
      let ins = schedule::insert(probe, base, r);
      if let Some(e) = TripEntry::from_insertion(Trip::single(r.id), ins, limit) {
        levels[0].push(e);
      }
    }

    for k in 2..=self.config.max_trip_size {
      if levels[k - 2].is_empty() { break; }
      if levels.len() < k {
        levels.push(Vec::new());
      }
      let (lower, upper) = levels.split_at_mut(k - 1);
      let prev = &lower[k - 2];
      let current = &mut upper[0];

      let known: Set<&Trip> = prev.iter().map(|e| &e.trip).collect();
      let mut seen: Set<Trip> = current.iter().map(|e| e.trip.clone()).collect();
      let _s = trace_span!("size", k, prev=prev.len()).entered();

      for (idx, a) in prev.iter().enumerate() {
        for b in &prev[idx + 1..] {
          let trip = a.trip.union(&b.trip);
          if trip.len() != k || seen.contains(&trip) { continue; }
          seen.insert(trip.clone());

          if !trip.ids().iter().all(|&r| known.contains(&trip.without(r))) {
            trace!(?trip, "pruned");
            stats.pruned += 1;
            continue;
          }

          let (parent, other) = if a.feasible.len() <= b.feasible.len() { (a, b) } else { (b, a) };
          let request = match other.trip.difference(&parent.trip).next().and_then(|r| by_id.get(&r)) {
            Some(&r) => r,
            None => {
              error!(?trip, "missing request for trip");
              debug_assert!(false, "missing request for trip {:?}", trip);
              continue;
            }
          };

          if Instant::now() >= cutoff { return false; }
          stats.insert_calls += 1;
          let ins = schedule::insert(probe, parent.feasible.iter().map(|p| &p.schedule), request);
          if let Some(e) = TripEntry::from_insertion(trip, ins, limit) {
            trace!(trip=?e.trip, cost=e.best.cost, "feasible trip");
            current.push(e);
          }
        }
      }
    }
    return true;
  }
}


#[cfg(test)]
mod tests {
  use super::*;
  use crate::init_test_logging;
  use crate::data::fixtures::*;
  use crate::pooling::invariants::assert_schedule_valid;
  use std::time::Duration;
  use proptest::prelude::*;

  fn trip(ids: &[u32]) -> Trip { ids.iter().map(|&i| RequestId(i)).collect() }

  fn config(max_trip_size: usize) -> EnumerationConfig {
    EnumerationConfig {
      max_trip_size,
      vehicle_budget: Duration::from_secs(60),
      reuse: false,
      max_candidates: None,
      max_plans_per_trip: None,
    }
  }

  #[test]
  fn pooling_scenario() {
    let _g = init_test_logging(None::<&str>);
    let city = two_node_city();
    let engine = EngineConfig::default();
    let cfg = config(4);
    let en = Enumerator::new(&city, &engine, &cfg);
    let (r1, r2) = r1_r2();
    let v = idle_vehicle(0, A, 2);

    let table = en.enumerate_trips(&v, &[&r1, &r2], 0, None);
    assert!(table.complete);
    assert_eq!(table.level(1).len(), 2);
    for e in table.level(1) {
      assert_eq!(e.best.schedule.len(), 2);
    }
    let pair = table.get(&trip(&[1, 2])).expect("pooled trip should be feasible");
    assert_eq!(pair.best.schedule.len(), 4);
    assert_eq!(pair.best.cost, 80);
    assert_eq!(pair.best.schedule[0].request, RequestId(1));
    assert_eq!(pair.best.schedule[0].action, Action::Pickup);
    assert!(table.level(3).is_empty());
    assert_eq!(table.len(), 3);
    assert!(table.keep.schedule.is_empty());
  }

  #[test]
  fn quick_reject_skips_engine() {
    let _g = init_test_logging(None::<&str>);
    let city = two_node_city();
    let engine = EngineConfig::default();
    let cfg = config(4);
    let en = Enumerator::new(&city, &engine, &cfg);
    let (r1, r2) = r1_r2();
    let r3 = request(3, FAR, A, 0, 5, 2000, 1000);
    let v = idle_vehicle(0, A, 2);

    let table = en.enumerate_trips(&v, &[&r1, &r2, &r3], 0, None);
    assert_eq!(table.stats.quick_rejects, 1);
    // two singles and the one pair
    assert_eq!(table.stats.insert_calls, 3);
    assert!(!table.request_ids().contains(&RequestId(3)));
    assert_eq!(table.len(), 3);
  }

  #[test]
  fn empty_candidates_give_empty_table() {
    let city = two_node_city();
    let engine = EngineConfig::default();
    let cfg = config(4);
    let en = Enumerator::new(&city, &engine, &cfg);
    let table = en.enumerate_trips(&idle_vehicle(0, A, 2), &[], 0, None);
    assert!(table.is_empty());
    assert!(table.complete);
    assert_eq!(table.stats, EnumerationStats::default());
  }

  #[test]
  fn trip_size_bound() {
    let city = two_node_city();
    let engine = EngineConfig::default();
    let cfg = config(1);
    let en = Enumerator::new(&city, &engine, &cfg);
    let (r1, r2) = r1_r2();
    let table = en.enumerate_trips(&idle_vehicle(0, A, 2), &[&r1, &r2], 0, None);
    assert_eq!(table.len(), 2);
    assert!(table.level(2).is_empty());
  }

  #[test]
  fn zero_budget_gives_partial_table() {
    let city = two_node_city();
    let engine = EngineConfig::default();
    let cfg = EnumerationConfig { vehicle_budget: Duration::from_secs(0), ..config(4) };
    let en = Enumerator::new(&city, &engine, &cfg);
    let (r1, r2) = r1_r2();
    let table = en.enumerate_trips(&idle_vehicle(0, A, 2), &[&r1, &r2], 0, None);
    assert!(!table.complete);
    assert!(table.is_empty());
  }

  #[test]
  fn plan_limit_keeps_cheapest() {
    let city = two_node_city();
    let engine = EngineConfig::default();
    let cfg = EnumerationConfig { max_plans_per_trip: Some(1), ..config(2) };
    let en = Enumerator::new(&city, &engine, &cfg);
    let (r1, r2) = r1_r2();
    let table = en.enumerate_trips(&idle_vehicle(0, A, 2), &[&r1, &r2], 0, None);
    let pair = table.get(&trip(&[1, 2])).unwrap();
    assert_eq!(pair.feasible.len(), 1);
    assert_eq!(pair.feasible[0], pair.best);
  }

  #[test]
  fn onboard_rider_goes_first() {
    let city = two_node_city();
    let engine = EngineConfig::default();
    let cfg = config(3);
    let en = Enumerator::new(&city, &engine, &cfg);
    let (r1, r2) = r1_r2();
    // capacity 1 and already carrying someone to B
    let mut v = idle_vehicle(0, A, 1);
    let rider = request(9, A, B, 0, 0, 60, 50);
    v.onboard.insert(rider.id);
    v.load = 1;
    v.commit(vec![rider.dropoff()].into());

    let table = en.enumerate_trips(&v, &[&r1, &r2], 0, None);
    assert_eq!(table.keep.schedule.legs(), &[rider.dropoff()]);
    assert_eq!(table.keep.cost, 0);
    assert_eq!(table.len(), 3);
    for e in table.entries() {
      assert_eq!(e.best.schedule[0], rider.dropoff());
      assert_schedule_valid(&city, v.state(), 0, &v.onboard, &e.best.schedule);
    }
    let pair = table.get(&trip(&[1, 2])).unwrap();
    let order: Vec<_> = pair.best.schedule.iter().map(|w| (w.request.0, w.action)).collect();
    assert_eq!(order, vec![
      (9, Action::Dropoff), (2, Action::Pickup), (2, Action::Dropoff), (1, Action::Pickup), (1, Action::Dropoff),
    ]);
    assert_eq!(pair.feasible.len(), 1);
    assert_eq!(pair.best.cost, 280);
  }

  #[test]
  fn late_onboard_dropoff_still_admits_requests() {
    let _g = init_test_logging(None::<&str>);
    let city = two_node_city();
    let engine = EngineConfig::default();
    let cfg = config(2);
    let en = Enumerator::new(&city, &engine, &cfg);
    let (r1, _) = r1_r2();
    // the rider cannot reach B before 50
    let rider = request(9, A, B, 0, 0, 30, 50);
    let mut v = idle_vehicle(0, A, 2);
    v.onboard.insert(rider.id);
    v.load = 1;
    v.commit(vec![rider.dropoff()].into());

    let table = en.enumerate_trips(&v, &[&r1], 0, None);
    assert_eq!(table.keep.schedule.legs(), &[rider.dropoff()]);
    assert_eq!(table.keep.cost, 0);
    let e = table.get(&trip(&[1])).expect("R1 fits behind the late dropoff");
    assert_eq!(e.feasible.len(), 1);
    assert_eq!(e.best.schedule.legs(), &[rider.dropoff(), r1.pickup(), r1.dropoff()]);
    assert_eq!(e.best.cost, 200);
  }

  fn arb_requests(n: usize) -> impl Strategy<Value=Vec<Request>> {
    prop::collection::vec((0..9u32, 1..9u32, 0..60u32, 120..400u32, 60..500u32), 1..=n)
      .prop_map(|v| {
        let city = TravelTable::grid(3, 3, 60, 100);
        v.into_iter().enumerate().map(|(k, (o, shift, tr, wait, delay))| {
          let d = (o + shift) % 9;
          let ts = city.duration(o, d).unwrap();
          request(k as u32, o, d, tr, tr + wait, tr + ts + delay, ts)
        }).collect()
      })
  }

  proptest! {
    #![proptest_config(ProptestConfig::with_cases(25))]
    #[test]
    fn pruning_soundness(requests in arb_requests(6), capacity in 1..4u8, node in 0..9u32) {
      init_test_logging(None::<&str>);
      let city = TravelTable::grid(3, 3, 60, 100);
      let engine = EngineConfig::default();
      let cfg = config(4);
      let en = Enumerator::new(&city, &engine, &cfg);
      let v = idle_vehicle(0, node, capacity);
      let pool: Vec<_> = requests.iter().collect();
      let table = en.enumerate_trips(&v, &pool, 0, None);
      let probe = Probe::new(&city, v.state(), 0, &engine);

      for e in table.entries() {
        prop_assert_eq!(e.best.schedule.request_ids(), e.trip.ids().to_vec());
        for plan in &e.feasible {
          assert_schedule_valid(&city, v.state(), 0, &v.onboard, &plan.schedule);
        }
        if e.trip.len() < 2 { continue; }
        for &r in e.trip.ids() {
          let sub = e.trip.without(r);
          prop_assert!(table.get(&sub).is_some(), "{:?} missing subtrip {:?}", e.trip, sub);
          // dropping a request never breaks a schedule on a metric city
          let reduced = e.best.schedule.filtered(|w| w.request != r);
          prop_assert!(schedule::check(&probe, &reduced).is_ok());
        }
      }
    }
  }
}
