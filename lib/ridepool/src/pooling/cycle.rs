use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use rayon::prelude::*;
use anyhow::Result;
use tracing::*;

use crate::*;
use crate::data::*;
use crate::data::Event;
use super::preprocessing::{derive_request, pickup_eta};
use super::trips::{Enumerator, TripTable};
use super::assign::{candidate_edges, Commit, Optimizer, SolverUsed};
use super::sim::PositionSimulator;

/// What happened in one dispatch cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
  pub now: Time,
  /// Requests up for assignment.
  pub pool: usize,
  pub walked_away: usize,
  pub trips: usize,
  pub edges: usize,
  pub commits: usize,
  pub matched: usize,
  pub unassigned: usize,
  /// Requests being picked up that lost their vehicle and went back to Pending.
  pub reverted: usize,
  pub rebalanced: usize,
  pub solver: SolverUsed,
  pub cost: Cost,
  pub elapsed: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct Summary {
  pub cycles: usize,
  pub requests: usize,
  pub served: usize,
  pub walked_away: usize,
  /// Neither served nor walked away when the run stopped.
  pub unfinished: usize,
  pub service_rate: f64,
  pub mean_wait: f64,
  pub mean_delay: f64,
  pub distance: u64,
}

fn mean(xs: impl Iterator<Item=Time>) -> f64 {
  let (n, total) = xs.fold((0u64, 0u64), |(n, total), x| (n + 1, total + x as u64));
  if n == 0 { 0.0 } else { total as f64 / n as f64 }
}


/// Owns the fleet and the requests and runs the dispatch cycles over them.
pub struct Dispatcher<'a> {
  oracle: &'a dyn TravelTimeOracle,
  config: DispatchConfig,
  optimizer: Optimizer,
  vehicles: Vec<Vehicle>,
  requests: BTreeMap<RequestId, Request>,
  /// Trip tables of the last cycle, in vehicle order.
  previous: Arc<Vec<TripTable>>,
  next_id: u32,
  cycles: usize,
}

impl<'a> Dispatcher<'a> {
  pub fn new(oracle: &'a dyn TravelTimeOracle, config: DispatchConfig, vehicles: Vec<Vehicle>) -> Result<Self> {
    config.validate()?;
    let optimizer = Optimizer::new(config.assignment.clone());
    Ok(Dispatcher {
      oracle,
      config,
      optimizer,
      vehicles,
      requests: BTreeMap::new(),
      previous: Arc::new(Vec::new()),
      next_id: 0,
      cycles: 0,
    })
  }

  pub fn vehicles(&self) -> &[Vehicle] { &self.vehicles }

  pub fn request(&self, id: RequestId) -> Option<&Request> { self.requests.get(&id) }

  pub fn requests(&self) -> impl Iterator<Item=&Request> { self.requests.values() }

  /// Turn trip records into Pending requests.  Returns the ids of the accepted ones.
  pub fn ingest(&mut self, records: &[TripRecord]) -> Vec<RequestId> {
    let mut accepted = Vec::with_capacity(records.len());
    for rec in records {
      let id = RequestId(self.next_id);
      self.next_id += 1;
      if let Some(r) = derive_request(id, rec, self.oracle, &self.config.deadlines) {
        trace!(%id, origin=r.origin, dest=r.destination, clp=r.latest_pickup, cld=r.latest_dropoff, "new request");
        self.requests.insert(id, r);
        accepted.push(id);
      }
    }
    accepted
  }

  fn walk_away(&mut self, now: Time) -> usize {
    let mut n = 0;
    for r in self.requests.values_mut() {
      if r.status == RequestStatus::Pending && now > r.latest_pickup {
        trace!(request=%r.id, "walk away");
        r.status = RequestStatus::WalkAway;
        n += 1;
      }
    }
    n
  }

  /// One full cycle: walk-aways, trip enumeration for every vehicle, assignment, commit and
  /// rebalancing.
  #[instrument(level="info", skip(self), fields(cycle=self.cycles))]
  pub fn dispatch_cycle(&mut self, now: Time) -> CycleReport {
    let started = Instant::now();
    self.cycles += 1;
    let walked_away = self.walk_away(now);

    let previous = Arc::clone(&self.previous);
    let prev_by_vehicle: Map<VehicleId, &TripTable> = previous.iter().map(|t| (t.vehicle, t)).collect();

    let (tables, assignment, pool_size) = {
      let pool: Vec<&Request> = self.requests.values().filter(|r| r.is_active()).collect();
      let continuity: Set<RequestId> = pool.iter()
        .filter(|r| r.status == RequestStatus::Picking)
        .map(|r| r.id)
        .collect();

      let enumerator = Enumerator::new(self.oracle, &self.config.engine, &self.config.enumeration);
      let tables: Vec<TripTable> = self.vehicles.par_iter()
        .map(|v| enumerator.enumerate_trips(v, &pool, now, prev_by_vehicle.get(&v.id).copied()))
        .collect();
      debug!(trips=tables.iter().map(TripTable::len).sum::<usize>(), incomplete=tables.iter().filter(|t| !t.complete).count(), "enumeration done");

      let edges = candidate_edges(&tables);
      let assignment = self.optimizer.optimize_assignment(&edges, &pool, &continuity, now);
      (tables, assignment, pool.len())
    };
    let trips = tables.iter().map(TripTable::len).sum();
    let edges = tables.len() + trips;
    let cost = assignment.total_cost();

    let mut commits: Map<VehicleId, Commit> = assignment.commits.into_iter().map(|c| (c.vehicle, c)).collect();
    let ncommits = commits.len();
    for v in self.vehicles.iter_mut() {
      match commits.remove(&v.id) {
        Some(c) => v.commit(c.plan.schedule),
        None if v.status == VehicleStatus::Rebalancing => {}
        None => {
          let base = v.base_schedule();
          v.commit(base);
        }
      }
    }

    let mut reverted = 0;
    for r in self.requests.values_mut() {
      if assignment.matched.contains(&r.id) {
        r.status = RequestStatus::Picking;
      } else if r.status == RequestStatus::Picking {
        warn!(request=%r.id, "request lost its vehicle, back to pending");
        r.status = RequestStatus::Pending;
        reverted += 1;
      }
    }

    let rebalanced = if self.config.rebalance { self.rebalance(now) } else { 0 };

    self.previous = Arc::new(tables);

    let report = CycleReport {
      now,
      pool: pool_size,
      walked_away,
      trips,
      edges,
      commits: ncommits,
      matched: assignment.matched.len(),
      unassigned: assignment.unassigned.len(),
      reverted,
      rebalanced,
      solver: assignment.solver,
      cost,
      elapsed: started.elapsed(),
    };
    info!(?report);
    return report;
  }

  /// Send idle vehicles towards the origins of requests left unassigned, closest vehicle
  /// first.
  fn rebalance(&mut self, now: Time) -> usize {
    let waiting: Vec<(RequestId, Node)> = self.requests.values()
      .filter(|r| r.status == RequestStatus::Pending)
      .map(|r| (r.id, r.origin))
      .collect();
    let mut taken = Set::default();
    let mut moved = 0;

    for (request, origin) in waiting {
      let closest = self.vehicles.iter()
        .enumerate()
        .filter(|(i, v)| v.status == VehicleStatus::Idle && !taken.contains(i))
        .filter_map(|(i, v)| pickup_eta(self.oracle, &v.state(), now, origin).map(|eta| (eta, v.id, i)))
        .min();
      let (_, _, i) = match closest {
        Some(c) => c,
        None => {
          trace!(%request, "no idle vehicle reaches the origin");
          continue;
        }
      };
      taken.insert(i);
      let v = &mut self.vehicles[i];
      if v.node != origin || v.time_to_next > 0 {
        trace!(vehicle=%v.id, %request, to=origin, "rebalance");
        v.commit(vec![Waypoint::rebalance(request, origin)].into());
        moved += 1;
      }
    }
    moved
  }

  /// Move the fleet from `now` to `target` and apply the pickups and dropoffs on the way.
  pub fn advance(&mut self, sim: &dyn PositionSimulator, now: Time, target: Time) -> Vec<Event> {
    let mut events = Vec::new();
    for v in self.vehicles.iter_mut() {
      events.extend(sim.advance(v, now, target));
    }
    for e in &events {
      let r = match self.requests.get_mut(&e.request) {
        Some(r) => r,
        None => {
          error!(request=%e.request, "event for unknown request");
          continue;
        }
      };
      match e.action {
        Action::Pickup => {
          r.status = RequestStatus::Onboard;
          r.pickup_time = Some(e.time);
        }
        Action::Dropoff => {
          r.status = RequestStatus::Complete;
          r.dropoff_time = Some(e.time);
        }
        Action::RebalanceTarget => {}
      }
    }
    events.sort_by_key(|e| (e.time, e.request));
    events
  }

  /// Replay a trip log (sorted by time) cycle by cycle until every request has finished or
  /// the last deadline has passed.
  #[instrument(level="info", skip_all, fields(records=records.len()))]
  pub fn run(&mut self, records: &[TripRecord], sim: &dyn PositionSimulator) -> Summary {
    let interval = self.config.interval;
    let mut now = records.first().map_or(0, |r| r.time);
    let mut next = 0;

    loop {
      let end = records[next..].iter().position(|r| r.time > now).map_or(records.len(), |k| next + k);
      self.ingest(&records[next..end]);
      next = end;

      self.dispatch_cycle(now);
      self.advance(sim, now, now + interval);
      now += interval;

      if next < records.len() { continue; }
      if self.requests.values().all(Request::is_terminal) { break; }
      let horizon = self.requests.values().map(|r| r.latest_dropoff).max().unwrap_or(0);
      if now > horizon + interval {
        warn!(now, horizon, "stopping with unfinished requests");
        break;
      }
    }
    return self.summary();
  }

  pub fn summary(&self) -> Summary {
    let count = |s: RequestStatus| self.requests.values().filter(|r| r.status == s).count();
    let served = count(RequestStatus::Complete);
    let walked_away = count(RequestStatus::WalkAway);
    let requests = self.requests.len();
    let done = || self.requests.values().filter(|r| r.status == RequestStatus::Complete);
    Summary {
      cycles: self.cycles,
      requests,
      served,
      walked_away,
      unfinished: requests - served - walked_away,
      service_rate: if requests == 0 { 0.0 } else { served as f64 / requests as f64 },
      mean_wait: mean(done().filter_map(Request::wait_time)),
      mean_delay: mean(done().filter_map(Request::delay)),
      distance: self.vehicles.iter().map(|v| v.distance_travelled as u64).sum(),
    }
  }
}


#[cfg(test)]
mod tests {
  use super::*;
  use crate::init_test_logging;
  use crate::data::fixtures::*;
  use crate::config::DeadlineBounds;
  use crate::pooling::sim::RouteFollower;

  fn config() -> DispatchConfig {
    DispatchConfig {
      deadlines: DeadlineBounds { max_wait: 100, max_delay: 200 },
      interval: 30,
      ..Default::default()
    }
  }

  fn record(time: Time, origin: Node, dest: Node) -> TripRecord {
    TripRecord { time, origin, dest }
  }

  #[test]
  fn run_pools_two_requests() -> Result<()> {
    let _g = init_test_logging(None::<&str>);
    let city = two_node_city();
    let sim = RouteFollower::new(&city);
    let mut d = Dispatcher::new(&city, config(), vec![idle_vehicle(0, A, 2)])?;
    let summary = d.run(&[record(0, A, B), record(10, B, A)], &sim);

    assert_eq!(summary.cycles, 4);
    assert_eq!((summary.requests, summary.served, summary.walked_away, summary.unfinished), (2, 2, 0, 0));
    assert_eq!(summary.service_rate, 1.0);
    // r1 waits 0, r2 waits 40; r1 arrives on time, r2 40s late
    assert_eq!(summary.mean_wait, 20.0);
    assert_eq!(summary.mean_delay, 20.0);
    assert_eq!(summary.distance, 1000);

    let r1 = d.request(RequestId(0)).unwrap();
    assert_eq!((r1.pickup_time, r1.dropoff_time), (Some(0), Some(50)));
    let r2 = d.request(RequestId(1)).unwrap();
    assert_eq!((r2.pickup_time, r2.dropoff_time), (Some(50), Some(100)));
    assert_eq!(d.vehicles()[0].status, VehicleStatus::Idle);
    Ok(())
  }

  #[test]
  fn first_cycle_commits_pooled_trip() -> Result<()> {
    let city = two_node_city();
    let mut d = Dispatcher::new(&city, config(), vec![idle_vehicle(0, A, 2)])?;
    let ids = d.ingest(&[record(0, A, B), record(10, B, A)]);
    assert_eq!(ids, vec![RequestId(0), RequestId(1)]);

    let report = d.dispatch_cycle(10);
    assert_eq!((report.pool, report.commits, report.matched, report.unassigned), (2, 1, 2, 0));
    assert_eq!(report.solver, SolverUsed::Exact);
    assert_eq!(report.cost, 120);
    assert!(d.requests().all(|r| r.status == RequestStatus::Picking));
    let v = &d.vehicles()[0];
    assert_eq!(v.status, VehicleStatus::Working);
    assert_eq!(v.schedule.len(), 4);
    assert_eq!(d.previous.len(), 1);

    // nothing changed: the same trip is kept and nobody reverts
    let again = d.dispatch_cycle(10);
    assert_eq!((again.matched, again.reverted), (2, 0));
    assert!(d.previous[0].stats.recovered > 0);
    Ok(())
  }

  #[test]
  fn unreachable_request_walks_away() -> Result<()> {
    let _g = init_test_logging(None::<&str>);
    let city = two_node_city();
    let sim = RouteFollower::new(&city);
    let mut d = Dispatcher::new(&city, config(), vec![idle_vehicle(0, FAR, 2)])?;
    d.ingest(&[record(0, A, B)]);

    let report = d.dispatch_cycle(0);
    assert_eq!((report.trips, report.matched, report.unassigned), (0, 0, 1));
    assert_eq!(report.rebalanced, 1);
    assert_eq!(d.vehicles()[0].status, VehicleStatus::Rebalancing);

    d.advance(&sim, 0, 150);
    let report = d.dispatch_cycle(150);
    assert_eq!(report.walked_away, 1);
    assert_eq!(report.pool, 0);
    assert_eq!(d.request(RequestId(0)).unwrap().status, RequestStatus::WalkAway);
    Ok(())
  }

  #[test]
  fn rebalance_skips_unreachable_origin() -> Result<()> {
    let city = two_node_city();
    let mut d = Dispatcher::new(&city, config(), vec![idle_vehicle(0, A, 2)])?;
    // node 3 has no arcs at all
    d.requests.insert(RequestId(0), request(0, 3, A, 0, 100, 300, 50));
    d.requests.insert(RequestId(1), request(1, B, A, 0, 100, 300, 50));

    assert_eq!(d.rebalance(0), 1);
    let v = &d.vehicles()[0];
    assert_eq!(v.status, VehicleStatus::Rebalancing);
    assert_eq!(v.schedule.legs(), &[Waypoint::rebalance(RequestId(1), B)]);
    Ok(())
  }

  #[test]
  fn lost_pickup_reverts_to_pending() -> Result<()> {
    let city = two_node_city();
    let cfg = DispatchConfig { rebalance: false, ..config() };
    let mut d = Dispatcher::new(&city, cfg, vec![idle_vehicle(0, FAR, 2)])?;
    d.ingest(&[record(0, A, B)]);
    if let Some(r) = d.requests.get_mut(&RequestId(0)) {
      r.status = RequestStatus::Picking;
    }
    let report = d.dispatch_cycle(0);
    assert_eq!(report.reverted, 1);
    assert_eq!(report.rebalanced, 0);
    assert_eq!(d.request(RequestId(0)).unwrap().status, RequestStatus::Pending);
    assert_eq!(d.vehicles()[0].status, VehicleStatus::Idle);
    Ok(())
  }

  #[test]
  fn empty_cycles_change_nothing() -> Result<()> {
    let city = two_node_city();
    let mut d = Dispatcher::new(&city, config(), vec![idle_vehicle(0, A, 2), idle_vehicle(1, B, 2)])?;
    for now in &[0, 0, 30] {
      let report = d.dispatch_cycle(*now);
      assert_eq!((report.pool, report.commits, report.rebalanced), (0, 0, 0));
      assert_eq!(report.solver, SolverUsed::Exact);
    }
    assert!(d.vehicles().iter().all(|v| v.status == VehicleStatus::Idle && v.schedule.is_empty()));
    assert_eq!(d.summary().service_rate, 0.0);
    Ok(())
  }

  #[test]
  fn invalid_config_rejected() {
    let city = two_node_city();
    let cfg = DispatchConfig { interval: 0, ..config() };
    assert!(Dispatcher::new(&city, cfg, Vec::new()).is_err());
  }
}
