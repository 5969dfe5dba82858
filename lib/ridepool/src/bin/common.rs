use std::fmt::Display;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::str::FromStr;
use anyhow::Result;
use structopt::StructOpt;

#[derive(Clone, Debug, StructOpt)]
pub struct OutputOptions {
  #[structopt(long="format", short="f", parse(try_from_str), default_value="json-summ", possible_values=&["json", "json-summ"])]
  pub fmt: ReportFormat,
  /// Report file, standard output if not given
  #[structopt(long="output", short="o")]
  pub file: Option<PathBuf>,
  /// Also write a JSON log to this file
  #[structopt(long)]
  pub log: Option<PathBuf>,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ReportFormat {
  /// Summary plus one record per request.
  Full,
  Summary,
}

impl FromStr for ReportFormat {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "json" => Ok(ReportFormat::Full),
      "json-summ" => Ok(ReportFormat::Summary),
      _ => Err(format!("invalid string: {}", s)),
    }
  }
}

/// Argument validator rejecting values below `min`.
pub fn at_least<T>(min: T) -> impl Fn(String) -> Result<(), String>
  where
    T: FromStr + PartialOrd + Display + Copy,
    T::Err: Display
{
  move |val| {
    let x: T = val.parse().map_err(|e: T::Err| e.to_string())?;
    if x < min {
      return Err(format!("must be at least {}", min));
    }
    Ok(())
  }
}

pub fn write_report(options: &OutputOptions, report: &json::JsonValue) -> Result<()> {
  let mut out: Box<dyn Write> = match options.file.as_ref() {
    Some(path) => Box::new(BufWriter::new(File::create(path)?)),
    None => Box::new(io::stdout()),
  };
  report.write_pretty(&mut out, 2)?;
  writeln!(out)?;
  out.flush()?;
  Ok(())
}
