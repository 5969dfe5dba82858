use tracing::*;

use crate::data::*;
use crate::config::DeadlineBounds;

/// Turn a trip log record into a Pending request with derived deadlines.  Records whose
/// origin and destination are not connected are dropped.
pub fn derive_request(id: RequestId, record: &TripRecord, oracle: &dyn TravelTimeOracle, bounds: &DeadlineBounds) -> Option<Request> {
    let shortest_time = match oracle.duration(record.origin, record.dest) {
        Some(t) => t,
        None => {
            warn!(%id, origin=record.origin, dest=record.dest, "no route for request, rejected");
            return None;
        }
    };
    let tr = record.time;
    return Some(Request {
        id,
        origin: record.origin,
        destination: record.dest,
        request_time: tr,
        shortest_time,
        latest_pickup: tr + bounds.max_wait,
        latest_dropoff: tr + shortest_time + bounds.max_delay,
        status: RequestStatus::Pending,
        pickup_time: None,
        dropoff_time: None,
    });
}

/// Earliest time a vehicle in `state` can be at `node`.
#[inline]
pub fn pickup_eta(oracle: &dyn TravelTimeOracle, state: &VehicleState, now: Time, node: Node) -> Option<Time> {
    oracle.duration(state.node, node).map(|d| now + state.time_to_next + d)
}

/// True if the vehicle cannot reach the origin before the latest pickup even when empty.
#[inline]
pub fn quick_reject(oracle: &dyn TravelTimeOracle, state: &VehicleState, now: Time, request: &Request) -> bool {
    match pickup_eta(oracle, state, now, request.origin) {
        Some(t) => t > request.latest_pickup,
        None => true,
    }
}

/// The requests a vehicle should consider this cycle: reachable in time, closest pickup first
/// (ties by id), at most `limit` of them.
#[instrument(level="trace", skip(oracle, requests))]
pub fn nearest_candidates<'r>(oracle: &dyn TravelTimeOracle, state: &VehicleState, now: Time, requests: &[&'r Request], limit: Option<usize>) -> Vec<&'r Request> {
    let mut reachable: Vec<_> = requests.iter()
        .filter_map(|&r| {
            let eta = pickup_eta(oracle, state, now, r.origin)?;
            if eta > r.latest_pickup { None } else { Some((eta, r)) }
        })
        .collect();
    reachable.sort_by_key(|&(eta, r)| (eta, r.id));
    if let Some(n) = limit {
        reachable.truncate(n);
    }
    trace!(count=reachable.len());
    reachable.into_iter().map(|(_, r)| r).collect()
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::fixtures::*;
    use crate::init_test_logging;

    fn idle(node: Node) -> VehicleState {
        VehicleState { node, time_to_next: 0, load: 0, capacity: 2 }
    }

    #[test]
    fn deadlines_from_bounds() {
        init_test_logging(None::<&str>);
        let city = two_node_city();
        let bounds = DeadlineBounds { max_wait: 120, max_delay: 240 };
        let r = derive_request(RequestId(4), &TripRecord { time: 30, origin: A, dest: B }, &city, &bounds).unwrap();
        assert_eq!(r.shortest_time, 50);
        assert_eq!(r.latest_pickup, 150);
        assert_eq!(r.latest_dropoff, 320);
        assert_eq!(r.status, RequestStatus::Pending);

        let mut sparse = TravelTable::default();
        sparse.insert(A, B, Arc { duration: 5, distance: 5, duration_std: 0 });
        assert!(derive_request(RequestId(5), &TripRecord { time: 0, origin: B, dest: A }, &sparse, &bounds).is_none());
    }

    #[test]
    fn far_pickup_rejected() {
        let city = two_node_city();
        let r3 = request(3, FAR, A, 0, 5, 2000, 1000);
        assert!(quick_reject(&city, &idle(A), 0, &r3));
        let (r1, r2) = r1_r2();
        assert!(!quick_reject(&city, &idle(A), 0, &r1));
        assert!(!quick_reject(&city, &idle(A), 0, &r2));
        let moving = VehicleState { time_to_next: 80, ..idle(A) };
        assert!(quick_reject(&city, &moving, 0, &r2));
    }

    #[test]
    fn candidates_sorted_by_eta() {
        let city = two_node_city();
        let (r1, r2) = r1_r2();
        let r0 = request(0, B, A, 0, 200, 400, 50);
        let r3 = request(3, FAR, A, 0, 5, 2000, 1000);
        let pool = vec![&r3, &r2, &r0, &r1];
        let ids = |v: Vec<&Request>| v.iter().map(|r| r.id.0).collect::<Vec<_>>();

        assert_eq!(ids(nearest_candidates(&city, &idle(A), 0, &pool, None)), vec![1, 0, 2]);
        assert_eq!(ids(nearest_candidates(&city, &idle(A), 0, &pool, Some(2))), vec![1, 0]);
        assert!(nearest_candidates(&city, &idle(A), 0, &[], None).is_empty());
    }
}
