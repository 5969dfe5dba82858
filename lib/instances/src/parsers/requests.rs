use std::path::Path;
use anyhow::Context;
use crate::Result;
use crate::raw::city::*;
use super::{
  ParseInstance,
  nom_prelude::*
};

/// Trip log: one `time origin dest` request per line, sorted by time.
#[derive(Debug, Copy, Clone)]
pub struct RequestLogFmt<P>(pub P);

impl<P: AsRef<Path>> ParseInstance<RequestLogFmt<P>> for RequestLog {
  fn parse(path: RequestLogFmt<P>) -> Result<RequestLog> {
    let path = path.0.as_ref();
    let data = std::fs::read_to_string(path).with_context(|| format!("failed to read {:?}", path))?;
    RequestLog::from_text(&data)
  }
}

impl RequestLog {
  pub fn from_text(data: &str) -> Result<RequestLog> {
    let mut log = match parsers::request_log(data).finish() {
      Ok((_, log)) => log,
      Err(e) => return Err(
        anyhow::Error::msg(error::convert_error(data, e))
      ),
    };
    // stable: requests at the same instant keep file order
    log.requests.sort_by(|a, b| a.time.total_cmp(&b.time));
    Ok(log)
  }
}


mod parsers {
  use super::*;
  use crate::parsers::common::*;

  fn request(input: &str) -> IResult<&str, RawRequest, error::VerboseError<&str>> {
    let (input, (time, origin, dest)) = tuple((
      nonneg,
      preceded(space1, usize_),
      preceded(space1, usize_),
    ))(input)?;
    Ok((input, RawRequest { time, origin, dest }))
  }

  pub fn request_log(input: &str) -> IResult<&str, RequestLog, error::VerboseError<&str>> {
    let (input, requests) = context("request log", records(request))(input)?;
    Ok((input, RequestLog { requests }))
  }
}


#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parse_log() -> Result<()> {
    let log = RequestLog::from_text("10 3 4\n0.5 1 2\n10 5 6\n")?;
    let times: Vec<_> = log.requests.iter().map(|r| r.time).collect();
    assert_eq!(times, vec![0.5, 10.0, 10.0]);
    assert_eq!(log.requests[1], RawRequest { time: 10.0, origin: 3, dest: 4 });
    assert_eq!(log.requests[2].origin, 5);
    Ok(())
  }

  #[test]
  fn missing_field() {
    assert!(RequestLog::from_text("10 3\n").is_err());
  }
}
