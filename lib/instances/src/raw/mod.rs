pub mod city;
use std::borrow::Cow;

pub trait FromRaw<T> where Self: Sized {
  fn from_raw(raw: T, id: Cow<str>) -> Self;
}


pub(crate) mod metrics {
  use num_traits::{AsPrimitive, Num};
  use fnv::FnvHashMap;

  pub trait Metric {
    const SYM: bool = false;

    fn compute<T: Num + AsPrimitive<f64>>(p1: (T, T), p2: (T, T)) -> f64;
  }


  pub struct Euclidean();

  impl Metric for Euclidean {
    const SYM: bool = true;

    fn compute<T: Num + AsPrimitive<f64>>(p1: (T, T), p2: (T, T)) -> f64 {
      let a = p1.0.as_() - p2.0.as_();
      let b = p1.1.as_() - p2.1.as_();
      (a*a + b*b).sqrt()
    }
  }

  /// Manhattan (L1) metric, used for grid cities.
  pub struct Manhattan();

  impl Metric for Manhattan {
    const SYM: bool = true;

    fn compute<T: Num + AsPrimitive<f64>>(p1: (T, T), p2: (T, T)) -> f64 {
      (p1.0.as_() - p2.0.as_()).abs() + (p1.1.as_() - p2.1.as_()).abs()
    }
  }

  /// Compute the distance-matrix for the given coordinates, applying `func` to every entry.
  pub fn dist_matrix_pp<M, T, S>(_metric: M, coords: &[(T, T)], func: impl Fn(f64) -> S) -> FnvHashMap<(usize, usize), S>
    where
      M: Metric,
      T: Num + AsPrimitive<f64>,
      S: Copy
  {
    let mut matrix = FnvHashMap::default();
    let n = coords.len();
    if M::SYM {
      for i in 0..n {
        let p1 = coords[i];
        for j in (i+1)..n {
          let p2 = coords[j];
          let d = func(M::compute(p1, p2));
          matrix.insert((i,j), d);
          matrix.insert((j,i), d);
        }
        let d = func(M::compute(p1, p1));
        matrix.insert((i,i), d);
      }
    } else {
      for i in 0..n {
        let p1 = coords[i];
        for j in 0..n {
          let p2 = coords[j];
          let d = func(M::compute(p1, p2));
          matrix.insert((i,j), d);
        }
      }
    }

    matrix
  }

  #[cfg(test)]
  mod tests {
    use super::*;

    #[test]
    fn symmetric_matrix() {
      let coords = [(0.0, 0.0), (3.0, 4.0), (6.0, 8.0)];
      let m = dist_matrix_pp(Euclidean(), &coords, |d| d);
      assert_eq!(m.len(), 9);
      assert_eq!(m[&(0, 1)], 5.0);
      assert_eq!(m[&(1, 0)], 5.0);
      assert_eq!(m[&(0, 2)], 10.0);
      assert_eq!(m[&(2, 2)], 0.0);
    }

    #[test]
    fn manhattan() {
      assert_eq!(Manhattan::compute((0i32, 0i32), (2i32, -3i32)), 5.0);
    }
  }
}
