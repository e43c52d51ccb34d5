use std::{num::NonZeroUsize, path::PathBuf};

use clap::{
    crate_authors, crate_description, crate_name, crate_version, value_parser, Arg, ArgAction,
    ArgGroup, Command,
};

use anyhow::Context;

use cr_core::{
    counts::{AlignmentCounter, CountTableCounter, SamtoolsCounter},
    sample::SampleRegistry,
};
use utils::{init_log, LogLevel};

use crate::config::*;

/// Set up definition of command options for clap
fn cli_model() -> Command {
    Command::new(crate_name!())
        .about(crate_description!())
        .version(crate_version!())
        .author(crate_authors!())
        .arg(
            Arg::new("timestamp")
                .short('X')
                .long("timestamp")
                .value_parser(value_parser!(stderrlog::Timestamp))
                .value_name("GRANULARITY")
                .default_value("none")
                .help("Prepend log entries with a timestamp"),
        )
        .arg(
            Arg::new("loglevel")
                .short('l')
                .long("loglevel")
                .value_name("LOGLEVEL")
                .value_parser(value_parser!(LogLevel))
                .ignore_case(true)
                .default_value("warn")
                .help("Set log level"),
        )
        .arg(
            Arg::new("quiet")
                .action(ArgAction::SetTrue)
                .long("quiet")
                .conflicts_with("loglevel")
                .help("Silence all output"),
        )
        .arg(
            Arg::new("threads")
                .short('t')
                .long("threads")
                .value_parser(value_parser!(NonZeroUsize))
                .value_name("INT")
                .help("Set number of counting threads [default: available cores]"),
        )
        .arg(
            Arg::new("counts")
                .short('c')
                .long("counts")
                .value_parser(value_parser!(PathBuf))
                .value_name("PATH")
                .help("Table of precomputed counts (sample, primary_reads, spikein_reads, include_region_reads)"),
        )
        .arg(
            Arg::new("primary_dir")
                .short('P')
                .long("primary-dir")
                .value_parser(value_parser!(PathBuf))
                .value_name("PATH")
                .requires_all(["spikein_dir", "include_regions"])
                .help("Directory with primary genome alignments (<sample>.bam)"),
        )
        .arg(
            Arg::new("spikein_dir")
                .short('S')
                .long("spikein-dir")
                .value_parser(value_parser!(PathBuf))
                .value_name("PATH")
                .requires("primary_dir")
                .help("Directory with spike-in genome alignments (<sample>.bam)"),
        )
        .arg(
            Arg::new("include_regions")
                .short('i')
                .long("include-regions")
                .value_parser(value_parser!(PathBuf))
                .value_name("PATH")
                .requires("primary_dir")
                .help("BED file with include regions used for CPM normalization"),
        )
        .arg(
            Arg::new("samtools")
                .long("samtools")
                .value_parser(value_parser!(PathBuf))
                .value_name("PATH")
                .default_value("samtools")
                .help("Path to samtools executable"),
        )
        .arg(
            Arg::new("tool_threads")
                .long("tool-threads")
                .value_parser(value_parser!(NonZeroUsize))
                .value_name("INT")
                .default_value("1")
                .help("Threads passed to each samtools call"),
        )
        .group(
            ArgGroup::new("count_source")
                .args(["counts", "primary_dir"])
                .required(true),
        )
        .arg(
            Arg::new("output_prefix")
                .short('p')
                .long("output-prefix")
                .value_parser(value_parser!(String))
                .value_name("STRING")
                .help("Set prefix for output file names [default: no prefix]"),
        )
        .arg(
            Arg::new("output_dir")
                .short('d')
                .long("output-dir")
                .value_parser(value_parser!(PathBuf))
                .value_name("PATH")
                .help("Set output directory [default: current directory]"),
        )
        .arg(
            Arg::new("sample_sheet")
                .value_parser(value_parser!(PathBuf))
                .value_name("SAMPLE_SHEET")
                .required(true)
                .help("Sample sheet (sample, fastq1, fastq2, merge_group)"),
        )
}

/// Handle command line options.  Set up Config structure
pub fn handle_cli() -> anyhow::Result<Config> {
    // Get matches from command line
    let m = cli_model().get_matches();

    // Setup logging
    init_log(&m)?;

    debug!("Processing command line options");

    let nt = m
        .get_one::<NonZeroUsize>("threads")
        .map(|x| usize::from(*x))
        .unwrap_or_else(num_cpus::get);

    let output_prefix = m
        .get_one::<String>("output_prefix")
        .cloned()
        .unwrap_or_default();

    let sheet = m
        .get_one::<PathBuf>("sample_sheet")
        .expect("Missing sample sheet");
    let registry = SampleRegistry::from_file(sheet)
        .with_context(|| format!("Could not read sample sheet {}", sheet.display()))?;
    info!("Read {} samples from {}", registry.len(), sheet.display());

    let mut bam_dir = None;
    let counter: Box<dyn AlignmentCounter> = if let Some(p) = m.get_one::<PathBuf>("counts") {
        Box::new(
            CountTableCounter::from_file(p)
                .with_context(|| format!("Could not read count table {}", p.display()))?,
        )
    } else {
        let get_dir = |s: &str| {
            m.get_one::<PathBuf>(s)
                .cloned()
                .ok_or_else(|| anyhow!("Missing option {}", s))
        };
        let primary = get_dir("primary_dir")?;
        let mut ctr = SamtoolsCounter::new(
            primary.clone(),
            get_dir("spikein_dir")?,
            get_dir("include_regions")?,
        );
        if let Some(p) = m.get_one::<PathBuf>("samtools") {
            ctr.set_samtools(p)
        }
        if let Some(n) = m.get_one::<NonZeroUsize>("tool_threads") {
            ctr.set_threads(usize::from(*n))
        }
        bam_dir = Some(primary);
        Box::new(ctr)
    };

    let mut cfg = Config::new(registry, counter, output_prefix);
    if let Some(d) = bam_dir {
        cfg.set_bam_dir(d)
    }
    if let Some(p) = m.get_one::<PathBuf>("output_dir") {
        cfg.set_output_dir(p.to_owned())
    }
    cfg.set_threads(nt);

    Ok(cfg)
}
