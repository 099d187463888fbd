use std::collections::HashMap;
use std::io::Read;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use indicatif::ProgressBar;
use tracing::warn;

use granules::aggregator::{evaluate_plan, generate_plan};
use granules::config::Config;

mod args;
use args::{parse_cmd_line, Args};

// Main function
granule_tools::sync_main!(run());

fn run() -> Result<()> {
    // Parse command line
    let args = parse_cmd_line()?;
    init_logging(&args.log_level);

    if let Some(sample) = &args.generate_template {
        let config = Config::from_file(sample)
            .with_context(|| format!("reflecting config from {}", sample.display()))?;
        println!("{}", config.to_json()?);
        return Ok(());
    }

    let dst = match &args.dst {
        Some(dst) => dst.clone(),
        None => bail!("no output path given"),
    };
    let src = resolve_sources(&args)?;

    let mut config = match &args.template {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading template {}", path.display()))?;
            Config::from_json(&text)?
        }
        None => Config::from_file(&src[0])
            .with_context(|| format!("reflecting config from {}", src[0].display()))?,
    };

    apply_cli_overrides(&mut config, &args)?;
    config.validate()?;

    let plan = generate_plan(&config, &src)?;
    if plan.is_empty() {
        warn!("nothing to aggregate");
        return Ok(());
    }

    let bar = ProgressBar::new(plan.len() as u64);
    let mut tick = || bar.inc(1);
    evaluate_plan(&config, &plan, &dst, Some(&mut tick))?;
    bar.finish();
    println!("Finished: {}", dst.display());
    Ok(())
}

fn init_logging(level: &str) {
    use tracing_subscriber::filter::LevelFilter;
    let level = match level {
        "DEBUG" => LevelFilter::DEBUG,
        "INFO" => LevelFilter::INFO,
        "ERROR" | "CRITICAL" => LevelFilter::ERROR,
        _ => LevelFilter::WARN,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();
}

/// Sources come from the command line, or whitespace separated on
/// stdin when none were given and stdin is not a terminal.
fn resolve_sources(args: &Args) -> Result<Vec<PathBuf>> {
    if !args.src.is_empty() {
        return Ok(args.src.clone());
    }
    if atty::is(atty::Stream::Stdin) {
        bail!("no source files provided");
    }
    let mut text = String::new();
    std::io::stdin().read_to_string(&mut text)?;
    let files: Vec<PathBuf> = text.split_whitespace().map(PathBuf::from).collect();
    if files.is_empty() {
        bail!("no source files provided as arguments or on stdin");
    }
    Ok(files)
}

fn apply_cli_overrides(config: &mut Config, args: &Args) -> Result<()> {
    if let Some(u) = &args.udim {
        let index_dims = match config.vars.get(&u.index_by) {
            Some(var) => var.dimensions.clone(),
            None => bail!("-u: no such variable: {}", u.index_by),
        };
        let dim = match config.dims.get_mut(&u.dim) {
            Some(dim) => dim,
            None => bail!("-u: no such dimension: {}", u.dim),
        };
        dim.index_by = Some(u.index_by.clone());
        for (i, hz) in u.cadences.iter().enumerate() {
            match index_dims.get(i) {
                Some(name) => {
                    dim.expected_cadence.insert(name.clone(), *hz);
                }
                None => bail!(
                    "-u: {} cadences given but {} has only {} dimensions",
                    u.cadences.len(),
                    u.index_by,
                    index_dims.len()
                ),
            }
        }
        if let Some((min, max)) = &args.bounds {
            dim.min = Some(*min);
            dim.max = Some(*max);
        }
    }

    if let Some((dim, size)) = &args.chunk {
        if !config.dims.contains_key(dim) {
            warn!("chunksize specified for non-existent dimension {}", dim);
        } else {
            let dim_sizes: HashMap<String, usize> = config
                .dims
                .iter()
                .map(|(name, d)| (name.clone(), d.size.unwrap_or(1)))
                .collect();
            for var in config.vars.values_mut() {
                if let Some(index) = var.dimensions.iter().position(|d| d == dim) {
                    match &mut var.chunksizes {
                        Some(chunks) => chunks[index] = *size,
                        None => {
                            let mut chunks: Vec<usize> = var
                                .dimensions
                                .iter()
                                .map(|d| dim_sizes.get(d).copied().unwrap_or(1))
                                .collect();
                            chunks[index] = *size;
                            var.chunksizes = Some(chunks);
                        }
                    }
                }
            }
        }
    }

    Ok(())
}
