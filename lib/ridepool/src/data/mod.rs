use std::path::Path;
use anyhow::Result;
use instances::dataset::{city::CityLayout, Dataset, StdLayout};

pub use instances::dataset::city::{
  Time,
  Length,
  Node,
  Arc,
  TravelTable,
  TripRecord,
  CityInstance,
};

pub type Cost = u64;

mod fleet;
mod oracle;

pub use fleet::*;
pub use oracle::TravelTimeOracle;

pub fn get_city_instance_by_name(dir: impl AsRef<Path>, name: &str) -> Result<CityInstance> {
  StdLayout::<CityLayout>::new(dir)?.load_by_name(name)
}

pub fn get_city_instance_by_index(dir: impl AsRef<Path>, idx: usize) -> Result<CityInstance> {
  StdLayout::<CityLayout>::new(dir)?.load_instance(idx)
}
