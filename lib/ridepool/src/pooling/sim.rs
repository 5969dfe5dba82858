use tracing::*;

use crate::data::*;
use crate::data::Event;

/// Moves vehicles along their committed schedules between two dispatch cycles.
pub trait PositionSimulator: Sync {
  /// Advance `vehicle` from `now` to `target`, serving the waypoints it reaches on the way.
  /// Served waypoints are removed from the vehicle's schedule.
  fn advance(&self, vehicle: &mut Vehicle, now: Time, target: Time) -> Vec<Event>;
}

/// Follows the schedule node to node at oracle travel times.  A vehicle never waits at a
/// waypoint, and a leg cut short by `target` is remembered in `time_to_next`.
#[derive(Clone, Copy)]
pub struct RouteFollower<'a> {
  oracle: &'a dyn TravelTimeOracle,
}

impl<'a> RouteFollower<'a> {
  pub fn new(oracle: &'a dyn TravelTimeOracle) -> Self {
    RouteFollower { oracle }
  }

  /// Serve every waypoint at the head of the schedule located where the vehicle stands.
  fn serve_here(&self, vehicle: &mut Vehicle, t: Time, events: &mut Vec<Event>) {
    while vehicle.schedule.first().map_or(false, |w| w.node == vehicle.node) {
      let w = match vehicle.schedule.pop_front() {
        Some(w) => w,
        None => break,
      };
      match w.action {
        Action::Pickup => {
          vehicle.onboard.insert(w.request);
          vehicle.load += 1;
          debug_assert!(vehicle.load <= vehicle.capacity);
        }
        Action::Dropoff => {
          if !vehicle.onboard.remove(&w.request) {
            error!(vehicle=%vehicle.id, request=%w.request, "dropoff of a request that is not onboard");
            debug_assert!(false, "dropoff of {} which is not onboard", w.request);
          }
          vehicle.load = vehicle.load.saturating_sub(1);
        }
        Action::RebalanceTarget => {
          trace!(vehicle=%vehicle.id, node=vehicle.node, "rebalance target reached");
          continue;
        }
      }
      trace!(vehicle=%vehicle.id, request=%w.request, action=?w.action, t);
      events.push(Event { request: w.request, action: w.action, time: t });
    }
  }
}

impl<'a> PositionSimulator for RouteFollower<'a> {
  fn advance(&self, vehicle: &mut Vehicle, now: Time, target: Time) -> Vec<Event> {
    let mut events = Vec::new();
    let mut t = now;

    loop {
      if vehicle.time_to_next > 0 {
        if t + vehicle.time_to_next > target {
          vehicle.time_to_next -= target.saturating_sub(t);
          break;
        }
        t += vehicle.time_to_next;
        vehicle.time_to_next = 0;
      }

      self.serve_here(vehicle, t, &mut events);

      let next = match vehicle.schedule.first() {
        Some(w) => w.node,
        None => break,
      };
      match self.oracle.duration(vehicle.node, next) {
        Some(d) => {
          vehicle.distance_travelled += self.oracle.distance(vehicle.node, next).unwrap_or(0);
          vehicle.node = next;
          vehicle.time_to_next = d;
        }
        None => {
          error!(vehicle=%vehicle.id, from=vehicle.node, to=next, "no route to next waypoint, vehicle stopped");
          break;
        }
      }
    }

    vehicle.refresh_status();
    return events;
  }
}


#[cfg(test)]
mod tests {
  use super::*;
  use crate::data::fixtures::*;
  use crate::init_test_logging;

  #[test]
  fn follow_pooled_schedule() {
    let _g = init_test_logging(None::<&str>);
    let city = two_node_city();
    let sim = RouteFollower::new(&city);
    let (r1, r2) = r1_r2();
    let mut v = idle_vehicle(0, A, 2);
    v.commit(vec![r1.pickup(), r1.dropoff(), r2.pickup(), r2.dropoff()].into());

    let events = sim.advance(&mut v, 0, 30);
    assert_eq!(events, vec![Event { request: r1.id, action: Action::Pickup, time: 0 }]);
    assert_eq!((v.node, v.time_to_next, v.load), (B, 20, 1));
    assert_eq!(v.distance_travelled, 500);
    assert_eq!(v.status, VehicleStatus::Working);

    let events = sim.advance(&mut v, 30, 60);
    assert_eq!(events, vec![
      Event { request: r1.id, action: Action::Dropoff, time: 50 },
      Event { request: r2.id, action: Action::Pickup, time: 50 },
    ]);
    assert_eq!((v.node, v.time_to_next, v.load), (A, 40, 1));
    assert!(v.onboard.contains(&r2.id));

    let events = sim.advance(&mut v, 60, 200);
    assert_eq!(events, vec![Event { request: r2.id, action: Action::Dropoff, time: 100 }]);
    assert_eq!((v.node, v.time_to_next, v.load), (A, 0, 0));
    assert_eq!(v.distance_travelled, 1000);
    assert_eq!(v.status, VehicleStatus::Idle);
  }

  #[test]
  fn rebalance_target_is_silent() {
    let city = two_node_city();
    let sim = RouteFollower::new(&city);
    let mut v = idle_vehicle(0, A, 2);
    v.commit(vec![Waypoint::rebalance(RequestId(5), B)].into());
    assert_eq!(v.status, VehicleStatus::Rebalancing);
    assert!(sim.advance(&mut v, 0, 60).is_empty());
    assert_eq!((v.node, v.time_to_next), (B, 0));
    assert_eq!(v.status, VehicleStatus::Idle);
  }

  #[test]
  fn idle_vehicle_stays_put() {
    let city = two_node_city();
    let sim = RouteFollower::new(&city);
    let mut v = idle_vehicle(0, B, 2);
    assert!(sim.advance(&mut v, 0, 1000).is_empty());
    assert_eq!((v.node, v.time_to_next, v.distance_travelled), (B, 0, 0));
  }

  #[test]
  fn arrival_exactly_at_target() {
    let city = two_node_city();
    let sim = RouteFollower::new(&city);
    let (r1, _) = r1_r2();
    let mut v = idle_vehicle(0, A, 2);
    v.onboard.insert(r1.id);
    v.load = 1;
    v.commit(vec![r1.dropoff()].into());
    let events = sim.advance(&mut v, 0, 50);
    assert_eq!(events, vec![Event { request: r1.id, action: Action::Dropoff, time: 50 }]);
    assert!(v.onboard.is_empty());
  }
}
