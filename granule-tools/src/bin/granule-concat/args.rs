use anyhow::{anyhow, bail, Result};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use granule_tools::{arg, args_parser};
use granules::config::Bound;

use std::path::PathBuf;

/// Program arguments
pub struct Args {
    /// Output path
    pub dst: Option<PathBuf>,
    /// Input paths; empty means "read from stdin"
    pub src: Vec<PathBuf>,
    /// Unlimited dimension configuration (-u)
    pub udim: Option<UdimSpec>,
    /// Bounds on the indexing variable (-b), requires -u
    pub bounds: Option<(Bound, Bound)>,
    /// Chunksize override (-c)
    pub chunk: Option<(String, usize)>,
    /// Configuration template path (-t)
    pub template: Option<PathBuf>,
    /// Log level (-l)
    pub log_level: String,
    /// Print a reflected config for this sample file and exit
    pub generate_template: Option<PathBuf>,
}

/// Parsed `-u udim:ivar[:hz[:hz...]]`.
pub struct UdimSpec {
    pub dim: String,
    pub index_by: String,
    /// One cadence per dimension of the indexing variable, in order.
    pub cadences: Vec<f64>,
}

pub fn parse_cmd_line() -> Result<Args> {
    use clap::Arg;
    let matches = args_parser!("granule-concat")
        .about("Concatenate array granules along their unlimited dimensions.")
        .arg(
            arg!("dst")
                .required_unless("generate_template")
                .help("Output path"),
        )
        .arg(
            arg!("src")
                .multiple(true)
                .help("Input paths; may also be given whitespace separated on stdin"),
        )
        .arg(
            Arg::with_name("u")
                .short("u")
                .value_name("UDIM:IVAR[:HZ...]")
                .help("Index dimension UDIM by variable IVAR, with optional per-dimension cadences"),
        )
        .arg(
            Arg::with_name("b")
                .short("b")
                .value_name("BOUNDS")
                .requires("u")
                .help(
                    "Bounds for the indexing variable: min:max numeric, or Tstart[:[T]stop] \
                     with YYYY[MM[DD[HH[MM]]]] times. An omitted stop is inferred from the \
                     least significant part of start.",
                ),
        )
        .arg(
            Arg::with_name("c")
                .short("c")
                .value_name("UDIM:CHUNKSIZE")
                .help("Override the chunksize along a dimension"),
        )
        .arg(
            Arg::with_name("t")
                .short("t")
                .value_name("PATH")
                .help("Load a configuration template"),
        )
        .arg(
            Arg::with_name("l")
                .short("l")
                .value_name("LEVEL")
                .possible_values(&["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL"])
                .default_value("WARNING")
                .help("Log level"),
        )
        .arg(
            Arg::with_name("generate_template")
                .long("generate_template")
                .value_name("PATH")
                .help("Print the default template generated for PATH and exit"),
        )
        .get_matches();

    let udim = matches.value_of("u").map(parse_udim_arg).transpose()?;
    let bounds = matches.value_of("b").map(parse_bound_arg).transpose()?;
    let chunk = matches.value_of("c").map(parse_chunk_arg).transpose()?;

    Ok(Args {
        dst: matches.value_of("dst").map(PathBuf::from),
        src: matches
            .values_of("src")
            .map(|vals| vals.map(PathBuf::from).collect())
            .unwrap_or_default(),
        udim,
        bounds,
        chunk,
        template: matches.value_of("t").map(PathBuf::from),
        log_level: matches.value_of("l").unwrap_or("WARNING").to_string(),
        generate_template: matches.value_of("generate_template").map(PathBuf::from),
    })
}

fn parse_udim_arg(u: &str) -> Result<UdimSpec> {
    let parts: Vec<&str> = u.split(':').collect();
    if parts.len() < 2 {
        bail!("-u expects udim:ivar[:hz[:hz...]], got {:?}", u);
    }
    let cadences = parts[2..]
        .iter()
        .map(|hz| {
            hz.parse::<f64>()
                .map_err(|_| anyhow!("-u: bad cadence {:?}", hz))
        })
        .collect::<Result<Vec<f64>>>()?;
    Ok(UdimSpec {
        dim: parts[0].to_string(),
        index_by: parts[1].to_string(),
        cadences,
    })
}

fn parse_chunk_arg(c: &str) -> Result<(String, usize)> {
    let mut parts = c.splitn(2, ':');
    let dim = parts
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| anyhow!("-c expects udim:chunksize, got {:?}", c))?;
    let size = parts
        .next()
        .and_then(|s| s.parse::<usize>().ok())
        .ok_or_else(|| anyhow!("-c expects udim:chunksize, got {:?}", c))?;
    Ok((dim.to_string(), size))
}

/// Parse a YYYY[MM[DD[HH[MM]]]] time string. Omitted parts default to
/// the start of the period.
pub fn parse_time(text: &str) -> Result<NaiveDateTime> {
    if !text.is_ascii() || text.len() < 4 || text.len() > 12 || text.len() % 2 != 0 {
        bail!("bad time {:?}, expected YYYY[MM[DD[HH[MM]]]]", text);
    }
    let field = |from: usize, to: usize, default: u32| -> Result<u32> {
        if text.len() >= to {
            text[from..to]
                .parse()
                .map_err(|_| anyhow!("bad time {:?}", text))
        } else {
            Ok(default)
        }
    };
    let year: i32 = text[0..4].parse().map_err(|_| anyhow!("bad time {:?}", text))?;
    let month = field(4, 6, 1)?;
    let day = field(6, 8, 1)?;
    let hour = field(8, 10, 0)?;
    let minute = field(10, 12, 0)?;
    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(hour, minute, 0))
        .ok_or_else(|| anyhow!("bad time {:?}", text))
}

/// Parse a `-b` bound specifier: numeric `min:max`, or `Tstart[:[T]stop]`.
/// When stop is omitted, it is one unit after start at the least
/// significant specified position, minus one microsecond.
pub fn parse_bound_arg(b: &str) -> Result<(Bound, Bound)> {
    if !b.starts_with('T') {
        let parts: Vec<&str> = b.split(':').collect();
        if parts.len() != 2 {
            bail!("-b expects min:max, got {:?}", b);
        }
        let min: f64 = parts[0]
            .parse()
            .map_err(|_| anyhow!("-b: bad bound {:?}", parts[0]))?;
        let max: f64 = parts[1]
            .parse()
            .map_err(|_| anyhow!("-b: bad bound {:?}", parts[1]))?;
        return Ok((Bound::Number(min), Bound::Number(max)));
    }

    let parts: Vec<&str> = b.split(':').collect();
    match parts.len() {
        2 => {
            let start = parse_time(&parts[0][1..])?;
            // friendly: the second bound may or may not carry a T
            let stop_text = parts[1].strip_prefix('T').unwrap_or(parts[1]);
            let stop = parse_time(stop_text)?;
            Ok((Bound::Time(start), Bound::Time(stop)))
        }
        1 => {
            let text = &parts[0][1..];
            let start = parse_time(text)?;
            let exclusive = match text.len() {
                4 => NaiveDate::from_ymd_opt(start.year() + 1, 1, 1)
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
                    .ok_or_else(|| anyhow!("bad time {:?}", text))?,
                6 => {
                    let (year, month) = if start.month() == 12 {
                        (start.year() + 1, 1)
                    } else {
                        (start.year(), start.month() + 1)
                    };
                    NaiveDate::from_ymd_opt(year, month, 1)
                        .and_then(|d| d.and_hms_opt(0, 0, 0))
                        .ok_or_else(|| anyhow!("bad time {:?}", text))?
                }
                8 => start + Duration::days(1),
                10 => start + Duration::hours(1),
                12 => start + Duration::minutes(1),
                _ => bail!("bad time {:?}", text),
            };
            Ok((
                Bound::Time(start),
                Bound::Time(exclusive - Duration::microseconds(1)),
            ))
        }
        _ => bail!("-b expects min:max or Tstart[:[T]stop], got {:?}", b),
    }
}

use chrono::Datelike;
