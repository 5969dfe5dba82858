use tracing::*;

use crate::data::*;
use crate::config::{CostKind, EngineConfig};

pub mod preprocessing;
pub mod trips;
pub mod reuse;
pub mod assign;
pub mod ilp;
pub mod sim;
pub mod cycle;

pub use trips::{Enumerator, TripEntry, TripTable};
pub use assign::{Assignment, CandidateEdge, Optimizer};
pub use cycle::Dispatcher;

pub mod schedule {
    use super::*;

    /// A feasible schedule and its cost.
    #[derive(Debug, Clone, Eq, PartialEq)]
    pub struct Plan {
        pub schedule: Schedule,
        pub cost: Cost,
    }

    /// Result of inserting one request into a set of base schedules.
    #[derive(Debug, Clone, Default)]
    pub struct Insertion {
        /// Cheapest of `feasible`, the first generated one on ties.
        pub best: Option<Plan>,
        pub feasible: Vec<Plan>,
    }

    /// Everything a feasibility pass reads about the vehicle and the current cycle.
    #[derive(Clone, Copy)]
    pub struct Probe<'a> {
        pub oracle: &'a dyn TravelTimeOracle,
        pub state: VehicleState,
        pub now: Time,
        pub cost: CostKind,
        pub deadline_buffer: f64,
    }

    impl<'a> Probe<'a> {
        pub fn new(oracle: &'a dyn TravelTimeOracle, state: VehicleState, now: Time, config: &EngineConfig) -> Self {
            Probe { oracle, state, now, cost: config.cost, deadline_buffer: config.deadline_buffer }
        }

        /// Earliest time the vehicle can leave `state.node`.
        #[inline]
        pub fn start_time(&self) -> Time {
            self.now + self.state.time_to_next
        }

        #[inline]
        fn buffer(&self, variance: u64) -> Time {
            if variance == 0 { return 0; }
            (self.deadline_buffer * (variance as f64).sqrt()).ceil() as Time
        }
    }

    /// Why a trial schedule was rejected.
    #[derive(Debug, Copy, Clone, Eq, PartialEq)]
    pub enum Violation {
        OverCapacity,
        NewPickupTooLate,
        NewDropoffTooLate,
        /// An existing waypoint between the new pickup and the new dropoff is late.
        ExistingTooLateBeforeDrop,
        /// An existing waypoint after the new dropoff is late.
        ExistingTooLateAfterDrop,
        NoRoute,
    }

    #[derive(Debug, Copy, Clone, Eq, PartialEq)]
    enum Control {
        /// Try the next `(i, j)`.
        Skip,
        /// Stop the dropoff sweep and move the pickup.
        NextPickup,
        /// Give up on the current base schedule.
        StopBase,
    }

    impl Violation {
        fn control(self) -> Control {
            match self {
                Violation::OverCapacity => Control::NextPickup,
                Violation::NewPickupTooLate => Control::StopBase,
                Violation::NewDropoffTooLate => Control::NextPickup,
                Violation::ExistingTooLateBeforeDrop => Control::NextPickup,
                Violation::ExistingTooLateAfterDrop => Control::Skip,
                Violation::NoRoute => Control::Skip,
            }
        }
    }

    #[derive(Debug, Copy, Clone)]
    struct Inserted {
        request: RequestId,
        pickup: usize,
        dropoff: usize,
    }

    /// `base` with `pickup` placed at index `i` and `dropoff` at index `j` of the result.
    struct Splice<'s> {
        base: &'s [Waypoint],
        pickup: Waypoint,
        dropoff: Waypoint,
        i: usize,
        j: usize,
    }

    impl<'s> Splice<'s> {
        #[inline]
        fn len(&self) -> usize { self.base.len() + 2 }

        #[inline]
        fn get(&self, k: usize) -> Waypoint {
            if k < self.i { self.base[k] }
            else if k == self.i { self.pickup }
            else if k < self.j { self.base[k - 1] }
            else if k == self.j { self.dropoff }
            else { self.base[k - 2] }
        }

        fn materialize(&self) -> Schedule {
            (0..self.len()).map(|k| self.get(k)).collect()
        }
    }

    fn classify(k: usize, w: &Waypoint, new: Option<Inserted>) -> Violation {
        match new {
            Some(n) if w.request == n.request && w.action != Action::RebalanceTarget => {
                if k == n.pickup { Violation::NewPickupTooLate } else { Violation::NewDropoffTooLate }
            }
            Some(n) if k > n.dropoff => Violation::ExistingTooLateAfterDrop,
            _ => Violation::ExistingTooLateBeforeDrop,
        }
    }

    /// Single forward pass: capacity over the whole sequence, then arrival times.  Deadlines
    /// are tested from index `first_checked` onwards.
    fn forward_pass(probe: &Probe, len: usize, at: impl Fn(usize) -> Waypoint, first_checked: usize, new: Option<Inserted>) -> Result<Cost, Violation> {
        let mut load = probe.state.load as i32;
        let capacity = probe.state.capacity as i32;
        for k in 0..len {
            load += at(k).load_delta();
            if load < 0 || load > capacity {
                return Err(Violation::OverCapacity);
            }
        }

        let stochastic = probe.deadline_buffer > 0.0;
        let mut t = probe.start_time();
        let mut variance = 0u64;
        let mut node = probe.state.node;
        let mut cost: Cost = 0;

        for k in 0..len {
            let w = at(k);
            t += probe.oracle.duration(node, w.node).ok_or(Violation::NoRoute)?;
            if stochastic {
                let s = probe.oracle.duration_std(node, w.node).unwrap_or(0) as u64;
                variance += s * s;
            }
            node = w.node;

            if k >= first_checked && t.saturating_add(probe.buffer(variance)) > w.deadline {
                return Err(classify(k, &w, new));
            }
            if probe.cost == CostKind::WaitDelay && w.action != Action::RebalanceTarget {
                cost += t.saturating_sub(w.reference) as Cost;
            }
        }

        if probe.cost == CostKind::Duration {
            cost = (t - probe.now) as Cost;
        }
        Ok(cost)
    }

    /// `base` with the pickup of `request` at index `i` and its dropoff at index `j` of the
    /// result, `i < j`.  Deadlines before `i` are not tested.
    pub fn place(probe: &Probe, base: &Schedule, request: &Request, i: usize, j: usize) -> Result<Plan, Violation> {
        debug_assert!(i < j && j <= base.len() + 1);
        let splice = Splice { base: base.legs(), pickup: request.pickup(), dropoff: request.dropoff(), i, j };
        let new = Inserted { request: request.id, pickup: i, dropoff: j };
        let cost = forward_pass(probe, splice.len(), |k| splice.get(k), i, Some(new))?;
        Ok(Plan { schedule: splice.materialize(), cost })
    }

    /// Try every pickup/dropoff placement of `request` in every base schedule.  All feasible
    /// results are returned, in generation order.
    #[instrument(level = "trace", skip(probe, bases, request), fields(request = %request.id))]
    pub fn insert<'s>(probe: &Probe, bases: impl IntoIterator<Item=&'s Schedule>, request: &Request) -> Insertion {
        let mut feasible = Vec::new();

        'base: for base in bases {
            debug_assert!(base.iter().all(|w| w.request != request.id));
            let n = base.len();
            for i in 0..=n {
                for j in (i + 1)..=(n + 1) {
                    match place(probe, base, request, i, j) {
                        Ok(plan) => {
                            trace!(i, j, cost = plan.cost, "feasible");
                            feasible.push(plan);
                        }
                        Err(v) => {
                            trace!(i, j, ?v, "infeasible");
                            match v.control() {
                                Control::Skip => continue,
                                Control::NextPickup => break,
                                Control::StopBase => continue 'base,
                            }
                        }
                    }
                }
            }
        }

        let best = feasible.iter().min_by_key(|p| p.cost).cloned();
        Insertion { best, feasible }
    }

    /// Full feasibility pass over an existing schedule.  Late waypoints are reported as
    /// `ExistingTooLateBeforeDrop`.
    #[inline]
    pub fn check(probe: &Probe, schedule: &Schedule) -> Result<Cost, Violation> {
        forward_pass(probe, schedule.len(), |k| schedule[k], 0, None)
    }

    /// Cost of following `schedule` with deadlines ignored.
    pub fn price(probe: &Probe, schedule: &Schedule) -> Result<Cost, Violation> {
        forward_pass(probe, schedule.len(), |k| schedule[k], usize::MAX, None)
    }
}
