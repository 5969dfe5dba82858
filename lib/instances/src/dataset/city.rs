use super::*;
use crate::parsers::{ParseInstance, ArcTableFmt, RequestLogFmt};
use crate::raw::city::{ArcTable, RequestLog};
use crate::Map;
use crate::raw::{
  metrics::{dist_matrix_pp, Euclidean, Manhattan},
  FromRaw
};

pub type Time = u32;
pub type Length = u32;
pub type Node = u32;

fn round_time(t: f64) -> Time { t.round() as Time }

fn round_length(l: f64) -> Length { l.round() as Length }


#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Arc {
  pub duration: Time,
  pub distance: Length,
  pub duration_std: Time,
}

/// Precomputed origin -> destination travel table.  Pairs without an entry have no route.
#[derive(Default, Debug, Clone, Eq, PartialEq)]
pub struct TravelTable {
  pub num_nodes: usize,
  pub arcs: Map<(Node, Node), Arc>,
}

impl TravelTable {
  pub fn insert(&mut self, origin: Node, dest: Node, arc: Arc) {
    self.num_nodes = self.num_nodes.max(origin.max(dest) as usize + 1);
    self.arcs.insert((origin, dest), arc);
  }

  #[inline]
  pub fn get(&self, origin: Node, dest: Node) -> Option<&Arc> {
    self.arcs.get(&(origin, dest))
  }

  /// Complete table over planar coordinates (metres), travelling at `speed` metres per second.
  pub fn from_coords(coords: &[(f64, f64)], speed: f64) -> TravelTable {
    let dist = dist_matrix_pp(Euclidean(), coords, |d| d);
    let mut table = TravelTable { num_nodes: coords.len(), arcs: Map::default() };
    for ((i, j), d) in dist {
      table.arcs.insert((i as Node, j as Node), Arc {
        duration: round_time(d / speed),
        distance: round_length(d),
        duration_std: 0,
      });
    }
    table
  }

  /// Manhattan grid city of `width * height` intersections, node `y * width + x`.
  pub fn grid(width: usize, height: usize, block_time: Time, block_length: Length) -> TravelTable {
    let coords: Vec<(i64, i64)> = (0..height)
      .flat_map(|y| (0..width).map(move |x| (x as i64, y as i64)))
      .collect();
    let blocks = dist_matrix_pp(Manhattan(), &coords, |d| d.round() as u32);
    let mut table = TravelTable { num_nodes: coords.len(), arcs: Map::default() };
    for ((i, j), b) in blocks {
      table.arcs.insert((i as Node, j as Node), Arc {
        duration: b * block_time,
        distance: b * block_length,
        duration_std: 0,
      });
    }
    table
  }
}

impl FromRaw<ArcTable> for TravelTable {
  fn from_raw(raw: ArcTable, _id: Cow<str>) -> TravelTable {
    let mut table = TravelTable::default();
    for a in raw.arcs {
      table.insert(a.origin as Node, a.dest as Node, Arc {
        duration: round_time(a.duration),
        distance: round_length(a.distance),
        duration_std: round_time(a.std),
      });
    }
    table
  }
}


#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct TripRecord {
  pub time: Time,
  pub origin: Node,
  pub dest: Node,
}

impl FromRaw<RequestLog> for Vec<TripRecord> {
  fn from_raw(raw: RequestLog, _id: Cow<str>) -> Self {
    raw.requests.into_iter()
      .map(|r| TripRecord { time: round_time(r.time), origin: r.origin as Node, dest: r.dest as Node })
      .collect()
  }
}


#[derive(Debug, Clone)]
pub struct CityInstance {
  pub id: String,
  pub travel: TravelTable,
  /// Sorted by request time.
  pub requests: Vec<TripRecord>,
}

impl CityInstance {
  pub fn load(arc_file: impl AsRef<Path>, request_file: impl AsRef<Path>, id: Cow<str>) -> Result<CityInstance> {
    let arcs = ArcTable::parse(ArcTableFmt(arc_file.as_ref()))?;
    let log = RequestLog::parse(RequestLogFmt(request_file.as_ref()))?;
    Ok(CityInstance {
      travel: TravelTable::from_raw(arcs, id.clone()),
      requests: Vec::<TripRecord>::from_raw(log, id.clone()),
      id: id.into_owned(),
    })
  }
}

/// City instances stored as `NAME.tt` (arc table) and `NAME.req` (trip log).
pub enum CityLayout {}

impl Dataset for StdLayout<CityLayout> {
  type Instance = CityInstance;

  fn load_instance(&self, idx: usize) -> Result<Self::Instance> {
    let name = self.index_to_name(idx)?;
    let arcs = self.instance_file(idx, "tt")?;
    let reqs = self.instance_file(idx, "req")?;
    CityInstance::load(&arcs, &reqs, name)
      .with_context(|| format!("failed to load instance {}", idx))
  }
}


#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn grid_distances() {
    let t = TravelTable::grid(3, 2, 60, 100);
    assert_eq!(t.num_nodes, 6);
    assert_eq!(t.arcs.len(), 36);
    // (0,0) -> (2,1)
    assert_eq!(t.get(0, 5), Some(&Arc { duration: 180, distance: 300, duration_std: 0 }));
    assert_eq!(t.get(4, 4).map(|a| a.duration), Some(0));
  }

  #[test]
  fn coords_table() {
    let t = TravelTable::from_coords(&[(0.0, 0.0), (300.0, 400.0)], 10.0);
    assert_eq!(t.get(0, 1).map(|a| (a.duration, a.distance)), Some((50, 500)));
    assert_eq!(t.get(1, 0).map(|a| a.duration), Some(50));
  }

  #[test]
  fn raw_table_is_sparse() -> Result<()> {
    let raw = ArcTable::from_text("0 1 50 400\n3 0 10.4 80 2.6\n")?;
    let t = TravelTable::from_raw(raw, Cow::Borrowed("t"));
    assert_eq!(t.num_nodes, 4);
    assert_eq!(t.get(3, 0), Some(&Arc { duration: 10, distance: 80, duration_std: 3 }));
    assert_eq!(t.get(1, 0), None);
    Ok(())
  }

  #[test]
  fn layout_round_trip() -> Result<()> {
    let dir = std::env::temp_dir().join(format!("instances-layout-{}", std::process::id()));
    std::fs::create_dir_all(&dir)?;
    std::fs::write(dir.join("INDEX.txt"), "tiny\n")?;
    std::fs::write(dir.join("tiny.tt"), "0 1 50 400\n1 0 50 400\n")?;
    std::fs::write(dir.join("tiny.req"), "5 1 0\n0 0 1\n")?;

    let layout: StdLayout<CityLayout> = StdLayout::new(&dir)?;
    assert_eq!(layout.len(), 1);
    assert_eq!(layout.name_to_index("tiny")?, 0);
    assert!(layout.name_to_index("missing").is_err());
    assert!(layout.load_instance(1).is_err());

    let city = layout.load_by_name("tiny")?;
    assert_eq!(city.id, "tiny");
    assert_eq!(city.requests[0], TripRecord { time: 0, origin: 0, dest: 1 });
    assert_eq!(city.travel.get(1, 0).map(|a| a.duration), Some(50));
    std::fs::remove_dir_all(&dir)?;
    Ok(())
  }
}
