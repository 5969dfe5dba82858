use std::collections::BTreeSet;
use std::collections::hash_map::Entry;
use tracing::*;

use crate::*;
use crate::data::*;
use super::schedule::{self, Plan, Probe};
use super::trips::{Enumerator, EnumerationStats, TripEntry, TripTable};

impl<'a> Enumerator<'a> {
  /// Carry trips of `previous` over to the current cycle.
  ///
  /// A trip survives if each of its requests is either still waiting (in `pool`) or has boarded
  /// this vehicle since.  Pickups of boarded requests and every waypoint of requests that have
  /// alighted are stripped, and each plan is re-checked against the vehicle's current state.
  /// Trips whose subtrips did not survive are dropped so that the result still satisfies the
  /// subtrip pruning rule.
  #[instrument(level="debug", skip_all, fields(previous=previous.len()))]
  pub(super) fn recover(&self,
                        probe: &Probe,
                        vehicle: &Vehicle,
                        previous: &TripTable,
                        pool: &Map<RequestId, &Request>,
                        stats: &mut EnumerationStats) -> Vec<Vec<TripEntry>> {
    let boarded: BTreeSet<RequestId> = vehicle.onboard.difference(&previous.onboard).copied().collect();
    let alighted: BTreeSet<RequestId> = previous.onboard.difference(&vehicle.onboard).copied().collect();
    let known = previous.request_ids();
    trace!(?boarded, ?alighted);

    let mut merged: Map<Trip, Vec<Plan>> = Map::default();
    let mut order = Vec::new();

    for e in previous.entries() {
      if !e.trip.ids().iter().all(|r| pool.contains_key(r) || boarded.contains(r)) {
        continue;
      }
      let trip: Trip = e.trip.ids().iter().copied().filter(|r| !boarded.contains(r)).collect();
      if trip.is_empty() { continue; }

      let plans: Vec<_> = e.feasible.iter()
        .filter_map(|p| {
          let s = p.schedule.filtered(|w| {
            !alighted.contains(&w.request) && !(w.action == Action::Pickup && boarded.contains(&w.request))
          });
          let carries_all = vehicle.onboard.iter()
            .all(|r| s.iter().any(|w| w.request == *r && w.action == Action::Dropoff));
          if !carries_all { return None; }
          schedule::check(probe, &s).ok().map(|cost| Plan { schedule: s, cost })
        })
        .collect();
      if plans.is_empty() {
        trace!(trip=?e.trip, "no plan survived");
        continue;
      }

      match merged.entry(trip) {
        Entry::Vacant(slot) => {
          order.push(slot.key().clone());
          slot.insert(plans);
        }
        Entry::Occupied(slot) => slot.into_mut().extend(plans),
      }
    }

    let limit = self.config.max_plans_per_trip;
    let mut levels: Vec<Vec<TripEntry>> = Vec::new();
    for trip in order {
      if trip.len() > self.config.max_trip_size { continue; }
      if !trip.is_subset_of(&known) {
        error!(?trip, "recovered trip contains requests the previous table never had");
        debug_assert!(false, "recovered trip {:?} is not a subset of the previous table", trip);
        continue;
      }
      let mut plans = merged.remove(&trip).unwrap_or_default();
      let mut seen = Set::default();
      plans.retain(|p| seen.insert(p.schedule.clone()));

      if let Some(e) = TripEntry::from_plans(trip, plans, limit) {
        let k = e.trip.len();
        if levels.len() < k {
          levels.resize_with(k, Vec::new);
        }
        levels[k - 1].push(e);
      }
    }

    for k in 1..levels.len() {
      let (lower, upper) = levels.split_at_mut(k);
      let below: Set<&Trip> = lower[k - 1].iter().map(|e| &e.trip).collect();
      upper[0].retain(|e| e.trip.ids().iter().all(|&r| below.contains(&e.trip.without(r))));
    }
    while levels.last().map_or(false, Vec::is_empty) {
      levels.pop();
    }

    stats.recovered = levels.iter().map(Vec::len).sum();
    return levels;
  }
}
