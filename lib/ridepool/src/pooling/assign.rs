use std::cmp::Reverse;
use std::collections::BTreeSet;
use std::fmt;
use tracing::*;

use crate::*;
use crate::data::*;
use crate::config::{AssignmentConfig, ContinuityMode, Objective, SolverKind};
use super::schedule::Plan;
use super::trips::TripTable;
use super::ilp::ExactIlp;

/// One vehicle serving one trip with one plan.  An empty trip is the vehicle's
/// "keep current legs" option.
#[derive(Debug, Clone)]
pub struct CandidateEdge {
  pub vehicle: VehicleId,
  pub trip: Trip,
  pub plan: Plan,
}

impl CandidateEdge {
  #[inline]
  pub fn is_keep(&self) -> bool { self.trip.is_empty() }
}

/// Flatten trip tables into edges: each vehicle's keep edge followed by its trips' best plans.
pub fn candidate_edges(tables: &[TripTable]) -> Vec<CandidateEdge> {
  let mut edges = Vec::with_capacity(tables.iter().map(|t| t.len() + 1).sum());
  for t in tables {
    edges.push(CandidateEdge { vehicle: t.vehicle, trip: Trip::empty(), plan: t.keep.clone() });
    edges.extend(t.entries().map(|e| CandidateEdge { vehicle: t.vehicle, trip: e.trip.clone(), plan: e.best.clone() }));
  }
  return edges;
}


/// Extra information a scorer may use.
#[derive(Debug, Copy, Clone)]
pub struct ScoreContext {
  pub now: Time,
  /// Requests in the pool this cycle.
  pub pool_size: usize,
}

/// Prices an edge for the assignment objective.  Lower is better.
pub trait TripScorer: Send + Sync {
  fn score(&self, vehicle: VehicleId, trip: &Trip, plan: &Plan, ctx: &ScoreContext) -> f64;
}

/// Scores an edge by its schedule cost.
#[derive(Debug, Default, Copy, Clone)]
pub struct PlanCost;

impl TripScorer for PlanCost {
  fn score(&self, _vehicle: VehicleId, _trip: &Trip, plan: &Plan, _ctx: &ScoreContext) -> f64 {
    plan.cost as f64
  }
}


/// Solver-independent 0-1 formulation.  Edge `e` has variable `x_e`, request `r` optionally
/// has an "unassigned" variable `u_r`:
///
/// ```text
/// min   sum_e weights[e] x_e + sum_r unassigned[r] u_r
/// s.t.  sum_{e in vehicles[v]} x_e <= 1          for every vehicle v
///       sum_{e in covering[r]} x_e + u_r == 1    for every request r
/// ```
#[derive(Debug, Clone)]
pub struct Problem<'e> {
  pub edges: &'e [CandidateEdge],
  pub weights: Vec<f64>,
  pub vehicles: Vec<Vec<usize>>,
  pub requests: Vec<RequestId>,
  pub covering: Vec<Vec<usize>>,
  /// `None` if the request has no unassigned option.
  pub unassigned: Vec<Option<f64>>,
  /// Number of continuity requests in each edge.
  pub priority: Vec<usize>,
}

/// Picks a conflict-free set of edge indices.  `None` if no answer was found.
pub trait AssignmentSolver {
  fn solve(&self, problem: &Problem) -> Option<Vec<usize>>;
}

/// Largest trips first, then cheapest; single pass.
#[derive(Debug, Default, Copy, Clone)]
pub struct Greedy;

impl AssignmentSolver for Greedy {
  #[instrument(level="debug", name="greedy", skip_all, fields(edges=problem.edges.len()))]
  fn solve(&self, problem: &Problem) -> Option<Vec<usize>> {
    let edges = problem.edges;
    let mut order: Vec<usize> = (0..edges.len()).collect();
    order.sort_by(|&a, &b| {
      let key = |e: usize| (Reverse(problem.priority[e]), Reverse(edges[e].trip.len()));
      key(a).cmp(&key(b))
        .then_with(|| problem.weights[a].total_cmp(&problem.weights[b]))
        .then_with(|| edges[a].vehicle.cmp(&edges[b].vehicle))
        .then_with(|| edges[a].trip.cmp(&edges[b].trip))
    });

    let mut used_vehicles = Set::default();
    let mut used_requests = Set::default();
    let mut chosen = Vec::new();
    for e in order {
      let edge = &edges[e];
      if used_vehicles.contains(&edge.vehicle) || edge.trip.ids().iter().any(|r| used_requests.contains(r)) {
        continue;
      }
      used_vehicles.insert(edge.vehicle);
      used_requests.extend(edge.trip.ids().iter().copied());
      chosen.push(e);
    }
    return Some(chosen);
  }
}


#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SolverUsed {
  None,
  Exact,
  Greedy,
  /// The exact solver failed or ran out of time.
  GreedyFallback,
}

/// A selected edge other than a keep edge.
#[derive(Debug, Clone)]
pub struct Commit {
  pub vehicle: VehicleId,
  pub trip: Trip,
  pub plan: Plan,
}

#[derive(Debug, Clone)]
pub struct Assignment {
  /// Sorted by vehicle.
  pub commits: Vec<Commit>,
  pub matched: BTreeSet<RequestId>,
  pub unassigned: BTreeSet<RequestId>,
  pub solver: SolverUsed,
}

impl Assignment {
  pub fn total_cost(&self) -> Cost {
    self.commits.iter().map(|c| c.plan.cost).sum()
  }
}


pub struct Optimizer {
  pub config: AssignmentConfig,
  scorer: Box<dyn TripScorer>,
}

impl fmt::Debug for Optimizer {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Optimizer").field("config", &self.config).finish()
  }
}

impl Optimizer {
  pub fn new(config: AssignmentConfig) -> Self {
    Optimizer { config, scorer: Box::new(PlanCost) }
  }

  pub fn with_scorer(config: AssignmentConfig, scorer: Box<dyn TripScorer>) -> Self {
    Optimizer { config, scorer }
  }

  /// Edge weights are scores relative to the vehicle's keep edge.  The unassigned penalty is
  /// at least twice the largest weight magnitude plus one so that serving a request always
  /// beats dropping it.
  pub fn build_problem<'e>(&self, edges: &'e [CandidateEdge], pool: &[&Request], continuity: &Set<RequestId>, now: Time) -> Problem<'e> {
    let ctx = ScoreContext { now, pool_size: pool.len() };
    let mut requests: Vec<RequestId> = pool.iter().map(|r| r.id).collect();
    requests.sort_unstable();
    requests.dedup();
    let index: Map<RequestId, usize> = requests.iter().enumerate().map(|(i, &r)| (r, i)).collect();

    let scores: Vec<f64> = edges.iter().map(|e| self.scorer.score(e.vehicle, &e.trip, &e.plan, &ctx)).collect();
    let mut baseline: Map<VehicleId, f64> = Map::default();
    for (e, &s) in edges.iter().zip(&scores) {
      if e.is_keep() {
        baseline.insert(e.vehicle, s);
      }
    }
    let weights: Vec<f64> = match self.config.objective {
      Objective::MaxCoverage => vec![0.0; edges.len()],
      Objective::MinCost => edges.iter().zip(&scores)
        .map(|(e, &s)| s - baseline.get(&e.vehicle).copied().unwrap_or(0.0))
        .collect(),
    };

    let mut vehicle_index: Map<VehicleId, usize> = Map::default();
    let mut vehicles: Vec<Vec<usize>> = Vec::new();
    let mut covering = vec![Vec::new(); requests.len()];
    for (i, e) in edges.iter().enumerate() {
      let v = *vehicle_index.entry(e.vehicle).or_insert_with(|| {
        vehicles.push(Vec::new());
        vehicles.len() - 1
      });
      vehicles[v].push(i);
      for r in e.trip.ids() {
        match index.get(r) {
          Some(&k) => covering[k].push(i),
          None => {
            error!(vehicle=%e.vehicle, request=%r, "edge serves a request outside the pool");
            debug_assert!(false, "edge serves {} which is not in the pool", r);
          }
        }
      }
    }

    let largest = weights.iter().fold(0.0f64, |m, w| m.max(w.abs()));
    let penalty = self.config.unassigned_penalty.max(2.0 * largest + 1.0);
    let unassigned = requests.iter().zip(&covering)
      .map(|(r, cover)| {
        if !continuity.contains(r) || cover.is_empty() {
          return Some(penalty);
        }
        match self.config.continuity {
          ContinuityMode::Hard => None,
          ContinuityMode::Relaxed => Some(penalty * self.config.continuity_weight),
        }
      })
      .collect();
    let priority = edges.iter()
      .map(|e| e.trip.ids().iter().filter(|r| continuity.contains(r)).count())
      .collect();

    return Problem { edges, weights, vehicles, requests, covering, unassigned, priority };
  }

  /// Select a conflict-free set of edges.  `continuity` holds the requests currently being
  /// picked up; they keep an edge whenever one exists.
  #[instrument(level="info", skip_all, fields(edges=edges.len(), pool=pool.len(), continuity=continuity.len()))]
  pub fn optimize_assignment(&self, edges: &[CandidateEdge], pool: &[&Request], continuity: &Set<RequestId>, now: Time) -> Assignment {
    let all: BTreeSet<RequestId> = pool.iter().map(|r| r.id).collect();
    if edges.is_empty() {
      return Assignment { commits: Vec::new(), matched: BTreeSet::new(), unassigned: all, solver: SolverUsed::None };
    }

    let problem = self.build_problem(edges, pool, continuity, now);
    let (chosen, solver) = match self.config.solver {
      SolverKind::Greedy => (Greedy.solve(&problem), SolverUsed::Greedy),
      SolverKind::Exact => match ExactIlp::new(self.config.solver_budget).solve(&problem) {
        Some(c) => (Some(c), SolverUsed::Exact),
        None => {
          warn!("exact assignment failed, falling back to greedy");
          (Greedy.solve(&problem), SolverUsed::GreedyFallback)
        }
      },
    };
    let chosen = conflict_free(edges, chosen.unwrap_or_default());

    let mut commits: Vec<Commit> = chosen.into_iter()
      .map(|e| &edges[e])
      .filter(|e| !e.is_keep())
      .map(|e| Commit { vehicle: e.vehicle, trip: e.trip.clone(), plan: e.plan.clone() })
      .collect();
    commits.sort_by_key(|c| c.vehicle);

    let matched: BTreeSet<RequestId> = commits.iter().flat_map(|c| c.trip.ids().iter().copied()).collect();
    let unassigned: BTreeSet<RequestId> = all.difference(&matched).copied().collect();

    for (r, cover) in problem.requests.iter().zip(&problem.covering) {
      if continuity.contains(r) && !cover.is_empty() && !matched.contains(r) {
        warn!(request=%r, ?solver, "continuity breach: request being picked up lost its vehicle");
      }
    }
    info!(commits=commits.len(), matched=matched.len(), unassigned=unassigned.len(), ?solver, "assignment");
    return Assignment { commits, matched, unassigned, solver };
  }
}

/// Drop selected edges that clash with an earlier selection.
fn conflict_free(edges: &[CandidateEdge], chosen: Vec<usize>) -> Vec<usize> {
  let mut vehicles = Set::default();
  let mut requests = Set::default();
  chosen.into_iter()
    .filter(|&e| {
      let edge = &edges[e];
      let clash = !vehicles.insert(edge.vehicle) || edge.trip.ids().iter().any(|r| requests.contains(r));
      if clash {
        error!(vehicle=%edge.vehicle, trip=?edge.trip, "conflicting edge selected");
        debug_assert!(false, "conflicting edge selected");
        return false;
      }
      requests.extend(edge.trip.ids().iter().copied());
      true
    })
    .collect()
}
