//! Command line grammar shared by client and server

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use std::fmt;

use crate::protocol::verb;

const DATE_FORMAT: &str = "%Y-%m-%d";
const MAX_EXTENSIONS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListOrder {
    Alphabetical,
    ModifiedTime,
}

/// File-selection queries answered with an archive transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveQuery {
    /// Files with `min < size < max`
    SizeRange { min: u64, max: u64 },
    /// Files whose extension is one of the given (without leading dot)
    Extensions(Vec<String>),
    /// Files last modified before the end of the given day
    ModifiedBefore(NaiveDate),
    /// Files last modified on or after the start of the given day
    ModifiedAfter(NaiveDate),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    DirList(ListOrder),
    FindFile(String),
    Archive(ArchiveQuery),
    Quit,
}

/// Strip line terminators and surrounding whitespace from a received line.
pub fn normalize_line(raw: &str) -> &str {
    raw.trim_end_matches(['\r', '\n']).trim()
}

impl Command {
    /// Parse one command line. Anything outside the verb table, or with the
    /// wrong number or shape of arguments, is an error.
    pub fn parse(line: &str) -> Result<Command> {
        let line = normalize_line(line);
        let (head, rest) = match line.split_once(char::is_whitespace) {
            Some((h, r)) => (h, r.trim()),
            None => (line, ""),
        };
        let args: Vec<&str> = rest.split_whitespace().collect();

        match head {
            verb::DIRLIST => match args.as_slice() {
                [verb::SORT_ALPHA] => Ok(Command::DirList(ListOrder::Alphabetical)),
                [verb::SORT_MTIME] => Ok(Command::DirList(ListOrder::ModifiedTime)),
                _ => bail!("dirlist expects exactly one of -a or -t"),
            },
            verb::FIND => {
                if rest.is_empty() {
                    bail!("w24fn expects a file name");
                }
                Ok(Command::FindFile(rest.to_string()))
            }
            verb::SIZE_RANGE => match args.as_slice() {
                [min, max] => {
                    let min = min
                        .parse::<u64>()
                        .with_context(|| format!("invalid minimum size {:?}", min))?;
                    let max = max
                        .parse::<u64>()
                        .with_context(|| format!("invalid maximum size {:?}", max))?;
                    Ok(Command::Archive(ArchiveQuery::SizeRange { min, max }))
                }
                _ => bail!("w24fz expects two sizes"),
            },
            verb::EXTENSIONS => {
                if args.is_empty() || args.len() > MAX_EXTENSIONS {
                    bail!("w24ft expects 1 to {} extensions", MAX_EXTENSIONS);
                }
                let mut exts = Vec::with_capacity(args.len());
                for a in args {
                    let e = a.trim_start_matches('.');
                    if e.is_empty() {
                        bail!("empty extension");
                    }
                    exts.push(e.to_string());
                }
                Ok(Command::Archive(ArchiveQuery::Extensions(exts)))
            }
            verb::BEFORE => Ok(Command::Archive(ArchiveQuery::ModifiedBefore(
                single_date(verb::BEFORE, &args)?,
            ))),
            verb::AFTER => Ok(Command::Archive(ArchiveQuery::ModifiedAfter(
                single_date(verb::AFTER, &args)?,
            ))),
            verb::QUIT => {
                if !args.is_empty() {
                    bail!("quitc takes no arguments");
                }
                Ok(Command::Quit)
            }
            other => bail!("unknown verb {:?}", other),
        }
    }

    /// Whether the reply to this command is a framed transfer.
    pub fn expects_transfer(&self) -> bool {
        matches!(self, Command::Archive(_))
    }

    pub fn verb(&self) -> &'static str {
        match self {
            Command::DirList(_) => verb::DIRLIST,
            Command::FindFile(_) => verb::FIND,
            Command::Archive(ArchiveQuery::SizeRange { .. }) => verb::SIZE_RANGE,
            Command::Archive(ArchiveQuery::Extensions(_)) => verb::EXTENSIONS,
            Command::Archive(ArchiveQuery::ModifiedBefore(_)) => verb::BEFORE,
            Command::Archive(ArchiveQuery::ModifiedAfter(_)) => verb::AFTER,
            Command::Quit => verb::QUIT,
        }
    }
}

fn single_date(name: &str, args: &[&str]) -> Result<NaiveDate> {
    match args {
        [d] => NaiveDate::parse_from_str(d, DATE_FORMAT)
            .with_context(|| format!("{} expects a YYYY-MM-DD date, got {:?}", name, d)),
        _ => bail!("{} expects exactly one date", name),
    }
}

/// Wire form, without the trailing newline.
impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::DirList(ListOrder::Alphabetical) => {
                write!(f, "{} {}", verb::DIRLIST, verb::SORT_ALPHA)
            }
            Command::DirList(ListOrder::ModifiedTime) => {
                write!(f, "{} {}", verb::DIRLIST, verb::SORT_MTIME)
            }
            Command::FindFile(name) => write!(f, "{} {}", verb::FIND, name),
            Command::Archive(ArchiveQuery::SizeRange { min, max }) => {
                write!(f, "{} {} {}", verb::SIZE_RANGE, min, max)
            }
            Command::Archive(ArchiveQuery::Extensions(exts)) => {
                write!(f, "{} {}", verb::EXTENSIONS, exts.join(" "))
            }
            Command::Archive(ArchiveQuery::ModifiedBefore(d)) => {
                write!(f, "{} {}", verb::BEFORE, d.format(DATE_FORMAT))
            }
            Command::Archive(ArchiveQuery::ModifiedAfter(d)) => {
                write!(f, "{} {}", verb::AFTER, d.format(DATE_FORMAT))
            }
            Command::Quit => write!(f, "{}", verb::QUIT),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_parse_dirlist() {
        assert_eq!(
            Command::parse("dirlist -a").unwrap(),
            Command::DirList(ListOrder::Alphabetical)
        );
        assert_eq!(
            Command::parse("dirlist -t\r\n").unwrap(),
            Command::DirList(ListOrder::ModifiedTime)
        );
        assert!(Command::parse("dirlist").is_err());
        assert!(Command::parse("dirlist -x").is_err());
        assert!(Command::parse("dirlist -a -t").is_err());
    }

    #[test]
    fn test_parse_find_keeps_rest_of_line() {
        assert_eq!(
            Command::parse("w24fn report.txt\n").unwrap(),
            Command::FindFile("report.txt".into())
        );
        assert_eq!(
            Command::parse("w24fn my notes.txt").unwrap(),
            Command::FindFile("my notes.txt".into())
        );
        assert!(Command::parse("w24fn").is_err());
        assert!(Command::parse("w24fn   ").is_err());
    }

    #[test]
    fn test_parse_size_range() {
        assert_eq!(
            Command::parse("w24fz 100 50").unwrap(),
            Command::Archive(ArchiveQuery::SizeRange { min: 100, max: 50 })
        );
        assert!(Command::parse("w24fz 100").is_err());
        assert!(Command::parse("w24fz 1 2 3").is_err());
        assert!(Command::parse("w24fz -1 20").is_err());
        assert!(Command::parse("w24fz ten 20").is_err());
    }

    #[test]
    fn test_parse_extensions() {
        assert_eq!(
            Command::parse("w24ft txt .pdf").unwrap(),
            Command::Archive(ArchiveQuery::Extensions(vec!["txt".into(), "pdf".into()]))
        );
        assert!(Command::parse("w24ft").is_err());
        assert!(Command::parse("w24ft a b c d").is_err());
        assert!(Command::parse("w24ft .").is_err());
    }

    #[test]
    fn test_parse_dates() {
        assert_eq!(
            Command::parse("w24fdb 2024-03-15").unwrap(),
            Command::Archive(ArchiveQuery::ModifiedBefore(date(2024, 3, 15)))
        );
        assert_eq!(
            Command::parse("w24fda 2023-12-31").unwrap(),
            Command::Archive(ArchiveQuery::ModifiedAfter(date(2023, 12, 31)))
        );
        assert!(Command::parse("w24fdb 2024-02-30").is_err());
        assert!(Command::parse("w24fda yesterday").is_err());
        assert!(Command::parse("w24fda").is_err());
    }

    #[test]
    fn test_parse_quit_and_unknown() {
        assert_eq!(Command::parse("quitc").unwrap(), Command::Quit);
        assert!(Command::parse("quitc now").is_err());
        assert!(Command::parse("bogus").is_err());
        assert!(Command::parse("").is_err());
        // Verbs are matched whole, not by prefix
        assert!(Command::parse("w24fnx file").is_err());
    }

    #[test]
    fn test_expects_transfer() {
        assert!(Command::parse("w24ft c").unwrap().expects_transfer());
        assert!(Command::parse("w24fz 1 2").unwrap().expects_transfer());
        assert!(!Command::parse("w24fn a").unwrap().expects_transfer());
        assert!(!Command::parse("dirlist -a").unwrap().expects_transfer());
        assert!(!Command::Quit.expects_transfer());
    }

    #[test]
    fn test_display_is_parseable() {
        for line in [
            "dirlist -a",
            "dirlist -t",
            "w24fn report.txt",
            "w24fz 10 2000",
            "w24ft c h rs",
            "w24fdb 2024-01-05",
            "w24fda 2024-01-05",
            "quitc",
        ] {
            let cmd = Command::parse(line).unwrap();
            assert_eq!(cmd.to_string(), line);
            assert!(line.starts_with(cmd.verb()));
        }
    }
}
