use json;
use rayon::ThreadPoolBuilder;
use rand::{Rng, SeedableRng, rngs::StdRng};
use std::path::PathBuf;
use std::time::Duration;
use itertools::Itertools;
use anyhow::{bail, Result};
use tracing::*;

use ridepool::*;
use ridepool::config::*;
use ridepool::data::*;
use ridepool::pooling::Dispatcher;
use ridepool::pooling::cycle::Summary;
use ridepool::pooling::sim::RouteFollower;

mod common;
use common::*;

use structopt::StructOpt;

#[derive(Debug, StructOpt)]
enum Scenario {
    /// Instance from a dataset directory holding INDEX.txt, NAME.tt and NAME.req files
    File {
        #[structopt(parse(from_os_str))]
        dir: PathBuf,
        /// Instance name, or its position in INDEX.txt
        instance: String,
    },
    /// Manhattan grid city with uniformly random requests
    Grid {
        #[structopt(long, default_value="10", validator=at_least(1))]
        width: usize,
        #[structopt(long, default_value="10", validator=at_least(1))]
        height: usize,
        #[structopt(long, default_value="60")]
        block_time: Time,
        #[structopt(long, default_value="100")]
        block_length: Length,
        #[structopt(long, default_value="200")]
        requests: usize,
        /// Requests arrive uniformly over [0, horizon) seconds
        #[structopt(long, default_value="3600", validator=at_least(1))]
        horizon: Time,
        #[structopt(long, default_value="0")]
        seed: u64,
    },
}

#[derive(Debug, StructOpt)]
struct ClArgs {
    #[structopt(subcommand)]
    scenario: Scenario,
    /// Worker threads, all cores if not given
    #[structopt(long, short="c", validator=at_least(1))]
    cpus: Option<usize>,
    #[structopt(long, short="n", default_value="10", validator=at_least(1))]
    vehicles: usize,
    #[structopt(long, default_value="4", validator=at_least(1u8))]
    capacity: u8,
    /// Seconds between dispatch cycles
    #[structopt(long, default_value="30", validator=at_least(1))]
    interval: Time,
    #[structopt(long, default_value="300")]
    max_wait: Time,
    #[structopt(long, default_value="600")]
    max_delay: Time,
    #[structopt(long, parse(try_from_str), possible_values=&["wait-delay", "duration"], default_value="wait-delay")]
    cost: CostKind,
    /// Deadline buffer coefficient applied to travel time standard deviations
    #[structopt(long, default_value="0", validator=at_least(0.0))]
    buffer: f64,
    #[structopt(long, default_value="4", validator=at_least(1))]
    max_trip_size: usize,
    /// Enumeration time budget per vehicle
    #[structopt(long, default_value="200")]
    vehicle_budget_ms: u64,
    #[structopt(long="no-reuse", parse(from_flag=std::ops::Not::not))]
    reuse: bool,
    /// Closest requests considered per vehicle, 0 for all
    #[structopt(long, default_value="30")]
    max_candidates: usize,
    #[structopt(long, validator=at_least(1))]
    max_plans: Option<usize>,
    #[structopt(long, parse(try_from_str), possible_values=&["exact", "greedy"], default_value="exact")]
    solver: SolverKind,
    #[structopt(long, default_value="5000")]
    solver_budget_ms: u64,
    #[structopt(long, parse(try_from_str), possible_values=&["hard", "relaxed"], default_value="hard")]
    continuity: ContinuityMode,
    #[structopt(long, parse(try_from_str), possible_values=&["cost", "coverage"], default_value="cost")]
    objective: Objective,
    #[structopt(long="no-rebalance", parse(from_flag=std::ops::Not::not))]
    rebalance: bool,
    #[structopt(flatten)]
    output: OutputOptions,
}

impl ClArgs {
    fn dispatch_config(&self) -> DispatchConfig {
        let defaults = DispatchConfig::default();
        DispatchConfig {
            engine: EngineConfig { cost: self.cost, deadline_buffer: self.buffer },
            enumeration: EnumerationConfig {
                max_trip_size: self.max_trip_size,
                vehicle_budget: Duration::from_millis(self.vehicle_budget_ms),
                reuse: self.reuse,
                max_candidates: if self.max_candidates == 0 { None } else { Some(self.max_candidates) },
                max_plans_per_trip: self.max_plans,
            },
            assignment: AssignmentConfig {
                solver: self.solver,
                solver_budget: Duration::from_millis(self.solver_budget_ms),
                continuity: self.continuity,
                objective: self.objective,
                ..defaults.assignment
            },
            deadlines: DeadlineBounds { max_wait: self.max_wait, max_delay: self.max_delay },
            interval: self.interval,
            vehicle_capacity: self.capacity,
            rebalance: self.rebalance,
        }
    }
}


fn grid_city(width: usize, height: usize, block_time: Time, block_length: Length, requests: usize, horizon: Time, seed: u64) -> Result<CityInstance> {
    let travel = TravelTable::grid(width, height, block_time, block_length);
    let n = travel.num_nodes as Node;
    if n < 2 {
        bail!("a grid city needs at least two intersections");
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let requests = (0..requests)
        .map(|_| {
            let origin = rng.gen_range(0..n);
            let dest = (origin + rng.gen_range(1..n)) % n;
            TripRecord { time: rng.gen_range(0..horizon), origin, dest }
        })
        .sorted_by_key(|r| r.time)
        .collect_vec();
    Ok(CityInstance { id: format!("grid-{}x{}-{}", width, height, seed), travel, requests })
}

fn load_scenario(scenario: &Scenario) -> Result<CityInstance> {
    match scenario {
        Scenario::File { dir, instance } => match instance.parse::<usize>() {
            Ok(idx) => get_city_instance_by_index(dir, idx),
            Err(_) => get_city_instance_by_name(dir, instance),
        },
        &Scenario::Grid { width, height, block_time, block_length, requests, horizon, seed } =>
            grid_city(width, height, block_time, block_length, requests, horizon, seed),
    }
}

/// Vehicles spread evenly over the node ids.
fn spread_fleet(travel: &TravelTable, n: usize, capacity: u8) -> Result<Vec<Vehicle>> {
    if travel.num_nodes == 0 {
        bail!("travel table is empty");
    }
    Ok((0..n)
        .map(|i| Vehicle::new(VehicleId(i as u32), (i * travel.num_nodes / n) as Node, capacity))
        .collect())
}


fn summary_json(s: &Summary) -> json::JsonValue {
    json::object! {
        cycles: s.cycles,
        requests: s.requests,
        served: s.served,
        walked_away: s.walked_away,
        unfinished: s.unfinished,
        service_rate: s.service_rate,
        mean_wait: s.mean_wait,
        mean_delay: s.mean_delay,
        distance: s.distance,
    }
}

fn request_json(r: &Request) -> json::JsonValue {
    json::object! {
        id: r.id.0,
        origin: r.origin,
        dest: r.destination,
        status: format!("{:?}", r.status),
        request_time: r.request_time,
        pickup_time: r.pickup_time,
        dropoff_time: r.dropoff_time,
        wait: r.wait_time(),
        delay: r.delay(),
    }
}

fn report_json(fmt: ReportFormat, summary: &Summary, dispatcher: &Dispatcher) -> json::JsonValue {
    match fmt {
        ReportFormat::Summary => summary_json(summary),
        ReportFormat::Full => {
            let requests: json::JsonValue = dispatcher.requests().map(request_json).collect_vec().into();
            json::object! {
                summary: summary_json(summary),
                requests: requests,
            }
        }
    }
}


fn main() -> Result<()> {
    let args : ClArgs = StructOpt::from_args();
    let _g = init_logging(args.output.log.clone())?;
    debug!(?args);
    if let Some(cpus) = args.cpus {
        ThreadPoolBuilder::new().num_threads(cpus).build_global()?;
    }

    let config = args.dispatch_config();
    let city = load_scenario(&args.scenario)?;
    info!(id=%city.id, nodes=city.travel.num_nodes, requests=city.requests.len(), "scenario loaded");

    let fleet = spread_fleet(&city.travel, args.vehicles, config.vehicle_capacity)?;
    let sim = RouteFollower::new(&city.travel);
    let mut dispatcher = Dispatcher::new(&city.travel, config, fleet)?;
    let summary = dispatcher.run(&city.requests, &sim);
    info!(?summary, "run finished");

    write_report(&args.output, &report_json(args.output.fmt, &summary, &dispatcher))?;
    Ok(())
}
