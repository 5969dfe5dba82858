use std::path::Path;
use anyhow::Context;
use crate::Result;
use crate::raw::city::*;
use super::{
  ParseInstance,
  nom_prelude::*
};

/// Travel-time table: one `origin dest duration distance [std]` arc per line.
#[derive(Debug, Copy, Clone)]
pub struct ArcTableFmt<P>(pub P);

impl<P: AsRef<Path>> ParseInstance<ArcTableFmt<P>> for ArcTable {
  fn parse(path: ArcTableFmt<P>) -> Result<ArcTable> {
    let path = path.0.as_ref();
    let data = std::fs::read_to_string(path).with_context(|| format!("failed to read {:?}", path))?;
    ArcTable::from_text(&data)
  }
}

impl ArcTable {
  pub fn from_text(data: &str) -> Result<ArcTable> {
    match parsers::arc_table(data).finish() {
      Ok((_, table)) => Ok(table),
      Err(e) => Err(
        anyhow::Error::msg(error::convert_error(data, e))
      ),
    }
  }
}


mod parsers {
  use super::*;
  use crate::parsers::common::*;

  fn arc(input: &str) -> IResult<&str, RawArc, error::VerboseError<&str>> {
    let (input, (origin, dest, duration, distance, std)) = tuple((
      usize_,
      preceded(space1, usize_),
      preceded(space1, nonneg),
      preceded(space1, nonneg),
      opt(preceded(space1, nonneg)),
    ))(input)?;
    Ok((input, RawArc { origin, dest, duration, distance, std: std.unwrap_or(0.0) }))
  }

  pub fn arc_table(input: &str) -> IResult<&str, ArcTable, error::VerboseError<&str>> {
    let (input, arcs) = context("arc table", records(arc))(input)?;
    Ok((input, ArcTable { arcs }))
  }
}


#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parse_table() -> Result<()> {
    let table = ArcTable::from_text("# o d dur dist std\n0 1 50 400\n1 0 52.5 410 3\n")?;
    assert_eq!(table.arcs.len(), 2);
    assert_eq!(table.arcs[0], RawArc { origin: 0, dest: 1, duration: 50.0, distance: 400.0, std: 0.0 });
    assert_eq!(table.arcs[1].std, 3.0);
    Ok(())
  }

  #[test]
  fn reject_garbage() {
    assert!(ArcTable::from_text("0 1 fifty 400\n").is_err());
    assert!(ArcTable::from_text("0 1 -5 400\n").is_err());
  }

  #[test]
  fn empty_table() -> Result<()> {
    assert!(ArcTable::from_text("\n# nothing here\n")?.arcs.is_empty());
    Ok(())
  }
}
