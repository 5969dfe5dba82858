use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Mutex, OnceLock, PoisonError};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};
use good_lp::{default_solver, variable, variables, Expression, Solution, SolverModel, Variable};
use tracing::*;

use super::assign::{AssignmentSolver, Problem};

/// Owned copy of the formulation, handed to the solver thread.
#[derive(Debug, Clone)]
struct IlpJob {
    weights: Vec<f64>,
    vehicles: Vec<Vec<usize>>,
    covering: Vec<Vec<usize>>,
    unassigned: Vec<Option<f64>>,
}

impl IlpJob {
    /// Without requests only keep edges remain, and those need no selection.
    fn is_trivial(&self) -> bool {
        self.weights.is_empty() || self.covering.is_empty()
    }
}

impl<'e> From<&Problem<'e>> for IlpJob {
    fn from(p: &Problem<'e>) -> Self {
        IlpJob {
            weights: p.weights.clone(),
            vehicles: p.vehicles.clone(),
            covering: p.covering.clone(),
            unassigned: p.unassigned.clone(),
        }
    }
}

fn run_job(job: IlpJob) -> Option<Vec<usize>> {
    if job.is_trivial() {
        return Some(Vec::new());
    }

    let mut vars = variables!();
    let xs: Vec<Variable> = (0..job.weights.len())
        .map(|e| vars.add(variable().binary().name(format!("x_{}", e))))
        .collect();
    let us: Vec<Option<Variable>> = job.unassigned.iter().enumerate()
        .map(|(r, c)| c.map(|_| vars.add(variable().binary().name(format!("u_{}", r)))))
        .collect();

    let objective = xs.iter().zip(&job.weights)
        .fold(Expression::from(0.0), |acc, (&x, &w)| acc + w * x);
    let objective = us.iter().zip(&job.unassigned)
        .fold(objective, |acc, pair| match pair {
            (Some(u), Some(c)) => acc + *c * *u,
            _ => acc,
        });

    let mut prob = vars.minimise(objective).using(default_solver);

    for group in &job.vehicles {
        if group.len() <= 1 { continue; }
        let sum = group.iter().fold(Expression::from(0.0), |acc, &e| acc + xs[e]);
        prob.add_constraint(sum.leq(1.0));
    }

    for (r, group) in job.covering.iter().enumerate() {
        let mut sum = group.iter().fold(Expression::from(0.0), |acc, &e| acc + xs[e]);
        if let Some(u) = us[r] {
            sum = sum + u;
        }
        prob.add_constraint(sum.eq(1.0));
    }

    let solution = match prob.solve() {
        Ok(s) => s,
        Err(e) => {
            debug!(%e, "no solution");
            return None;
        }
    };

    let chosen = xs.iter().enumerate()
        .filter(|(_, &x)| solution.value(x) >= 0.5)
        .map(|(e, _)| e)
        .collect();
    Some(chosen)
}

/// A job for the worker.  Jobs dequeued at or after their deadline are dropped unsolved.
struct Req {
    job: IlpJob,
    deadline: Instant,
    reply: Sender<Option<Vec<usize>>>,
}

/// The one solver thread of the process, `None` if it could not be started.
static WORKER: OnceLock<Option<Sender<Req>>> = OnceLock::new();
/// Deadline of the job the worker is solving right now.
static CURRENT: Mutex<Option<Instant>> = Mutex::new(None);

fn set_current(deadline: Option<Instant>) {
    *CURRENT.lock().unwrap_or_else(PoisonError::into_inner) = deadline;
}

#[inline]
fn free_at(current: Option<Instant>, now: Instant) -> bool {
    current.map_or(true, |deadline| now <= deadline)
}

/// False while the worker is still solving a job whose caller has stopped waiting.
pub fn is_free() -> bool {
    let current = *CURRENT.lock().unwrap_or_else(PoisonError::into_inner);
    free_at(current, Instant::now())
}

fn spawn_worker() -> Option<Sender<Req>> {
    let (tx, rx) = channel();
    match thread::Builder::new().name("ilp-worker".into()).spawn(move || worker_loop(rx)) {
        Ok(_) => Some(tx),
        Err(e) => {
            error!(%e, "cannot start solver thread");
            None
        }
    }
}

fn worker_loop(rx: Receiver<Req>) {
    while let Ok(req) = rx.recv() {
        if Instant::now() >= req.deadline {
            trace!("expired job dropped");
            continue;
        }
        set_current(Some(req.deadline));
        let Req { job, reply, .. } = req;
        let res = catch_unwind(AssertUnwindSafe(|| run_job(job)));
        set_current(None);
        let _ = reply.send(res.ok().flatten());
    }
}

/// Queue `job` on the worker and wait at most `budget` for the answer.
fn try_run(job: IlpJob, budget: Duration) -> Result<Option<Vec<usize>>, RecvTimeoutError> {
    let worker = WORKER.get_or_init(spawn_worker).as_ref().ok_or(RecvTimeoutError::Disconnected)?;
    let (reply, rx) = channel();
    let deadline = Instant::now() + budget;
    worker.send(Req { job, deadline, reply }).map_err(|_| RecvTimeoutError::Disconnected)?;
    rx.recv_timeout(budget)
}

/// Exact 0-1 solve with `good_lp`, bounded by a wall-clock budget.  All solves share one
/// worker thread.  When the budget runs out the caller gets `None` and the worker finishes the
/// job in the background; until it does, further solves return `None` right away.
#[derive(Debug, Copy, Clone)]
pub struct ExactIlp {
    pub budget: Duration,
}

impl ExactIlp {
    pub fn new(budget: Duration) -> Self {
        ExactIlp { budget }
    }
}

impl AssignmentSolver for ExactIlp {
    #[instrument(level="debug", name="ilp", skip_all, fields(edges=problem.edges.len(), requests=problem.requests.len()))]
    fn solve(&self, problem: &Problem) -> Option<Vec<usize>> {
        let job = IlpJob::from(problem);
        if job.is_trivial() {
            return Some(Vec::new());
        }
        if !is_free() {
            warn!("solver still busy with an abandoned problem");
            return None;
        }

        let started = Instant::now();
        match try_run(job, self.budget) {
            Ok(Some(chosen)) => {
                debug!(elapsed=?started.elapsed(), selected=chosen.len(), "solved");
                Some(chosen)
            }
            Ok(None) => {
                warn!("solver failed or problem infeasible");
                None
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(budget=?self.budget, "solver timed out");
                None
            }
            Err(RecvTimeoutError::Disconnected) => {
                error!("solver thread unavailable");
                None
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::init_test_logging;

    fn job(weights: Vec<f64>, vehicles: Vec<Vec<usize>>, covering: Vec<Vec<usize>>, unassigned: Vec<Option<f64>>) -> IlpJob {
        IlpJob { weights, vehicles, covering, unassigned }
    }

    #[test]
    fn picks_cheapest_cover() {
        init_test_logging(None::<&str>);
        // one vehicle: serve {0}, {1} or {0, 1}
        let j = job(
            vec![5.0, 3.0, 9.0],
            vec![vec![0, 1, 2]],
            vec![vec![0, 2], vec![1, 2]],
            vec![Some(100.0), Some(100.0)],
        );
        assert_eq!(run_job(j), Some(vec![2]));
    }

    #[test]
    fn hard_requests_must_be_covered() {
        // two vehicles competing for request 0, request 1 only served by vehicle 0
        let j = job(
            vec![1.0, 50.0, 2.0],
            vec![vec![0, 1], vec![2]],
            vec![vec![0, 2], vec![1]],
            vec![Some(1000.0), None],
        );
        assert_eq!(run_job(j), Some(vec![1, 2]));
    }

    #[test]
    fn infeasible_is_none() {
        let j = job(
            vec![1.0, 1.0],
            vec![vec![0, 1]],
            vec![vec![0], vec![1]],
            vec![None, None],
        );
        assert_eq!(run_job(j), None);
    }

    fn pair_job() -> IlpJob {
        job(vec![5.0, 3.0, 9.0], vec![vec![0, 1, 2]], vec![vec![0, 2], vec![1, 2]], vec![Some(100.0), Some(100.0)])
    }

    #[test]
    fn worker_outlives_expired_jobs() {
        init_test_logging(None::<&str>);
        for _ in 0..10 {
            // nothing to wait for: either dropped by the worker or abandoned by the caller
            assert!(try_run(pair_job(), Duration::from_millis(0)).is_err());
        }
        assert_eq!(try_run(pair_job(), Duration::from_secs(30)), Ok(Some(vec![2])));
        assert!(is_free());
    }

    #[test]
    fn busy_only_past_deadline() {
        let now = Instant::now();
        assert!(free_at(None, now));
        assert!(free_at(Some(now + Duration::from_secs(1)), now));
        assert!(!free_at(Some(now), now + Duration::from_millis(1)));
    }
}
