use super::nom_prelude::*;
use nom::branch::alt;

pub fn usize_<'a, E>(input: &'a str) -> IResult<&'a str, usize, E>
  where
    E: ParseError<&'a str> + error::FromExternalError<&'a str, ParseIntError>
{
  map_res(digit1, usize::from_str)(input)
}

/// Non-negative floating point field.
pub fn nonneg<'a, E>(input: &'a str) -> IResult<&'a str, f64, E>
  where
    E: ParseError<&'a str>
{
  verify(double, |x: &f64| *x >= 0.0 && x.is_finite())(input)
}

/// Consumes the rest of a data line: trailing blanks and the line ending (or end of input).
pub fn end_of_record<'a, E>(input: &'a str) -> IResult<&'a str, (), E>
  where
    E: ParseError<&'a str>
{
  value((), pair(space0, alt((line_ending, eof))))(input)
}

/// Skips blank lines and `#` comment lines.
pub fn skip_junk<'a, E>(input: &'a str) -> IResult<&'a str, (), E>
  where
    E: ParseError<&'a str>
{
  value((), many0_count(alt((
    value((), pair(space0, line_ending)),
    value((), tuple((space0, char('#'), not_line_ending, opt(line_ending)))),
    value((), pair(space1, eof)),
  ))))(input)
}

/// Parses a whole file of records, one per line, with blank and comment lines in between.
pub fn records<'a, O, E, F>(mut record: F) -> impl FnMut(&'a str) -> IResult<&'a str, Vec<O>, E>
  where
    F: Parser<&'a str, O, E>,
    E: ParseError<&'a str>
{
  move |input: &'a str| {
    let (mut input, _) = skip_junk(input)?;
    let mut out = Vec::new();
    while !input.is_empty() {
      let (i, o) = preceded(space0, |i| record.parse(i))(input)?;
      let (i, _) = end_of_record(i)?;
      let (i, _) = skip_junk(i)?;
      out.push(o);
      input = i;
    }
    Ok((input, out))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  type E<'a> = error::VerboseError<&'a str>;

  #[test]
  fn junk_is_skipped() {
    let (rest, _) = skip_junk::<E>("\n  # a comment\n\n1 2").unwrap();
    assert_eq!(rest, "1 2");
  }

  #[test]
  fn records_with_comments() {
    let input = "# header\n1\n\n  2  \n# trailing\n3";
    let (rest, out) = records::<_, E, _>(usize_::<E>)(input).unwrap();
    assert_eq!(rest, "");
    assert_eq!(out, vec![1, 2, 3]);
  }

  #[test]
  fn negative_rejected() {
    assert!(nonneg::<E>("-1.0").is_err());
    assert_eq!(nonneg::<E>("2.5").unwrap().1, 2.5);
  }
}
