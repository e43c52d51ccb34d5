use std::{num::NonZeroUsize, path::PathBuf};

use clap::{
    crate_authors, crate_description, crate_name, crate_version, value_parser, Arg, ArgAction,
    ArgGroup, Command,
};

use anyhow::Context;

use cr_core::{
    bigwig::BigWigTools,
    factors::ScaleFactorTable,
    genome::Genome,
    regions::RegionSet,
    sample::SampleRegistry,
    scaler::{BamCoverageBinner, BedGraphBinner, CoverageBinner},
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
                .help("Set number of worker threads [default: available cores]"),
        )
        .arg(
            Arg::new("bin_size")
                .short('b')
                .long("bin-size")
                .value_parser(value_parser!(NonZeroUsize))
                .value_name("INT")
                .default_value("50")
                .help("Width of coverage bins"),
        )
        .arg(
            Arg::new("genome")
                .short('g')
                .long("genome")
                .value_parser(value_parser!(PathBuf))
                .value_name("PATH")
                .required(true)
                .help("Chromosome sizes file (chrom, length)"),
        )
        .arg(
            Arg::new("spikein_factors")
                .short('s')
                .long("spikein-factors")
                .value_parser(value_parser!(PathBuf))
                .value_name("PATH")
                .required(true)
                .help("Spike-in factor table"),
        )
        .arg(
            Arg::new("cpm_factors")
                .short('c')
                .long("cpm-factors")
                .value_parser(value_parser!(PathBuf))
                .value_name("PATH")
                .required(true)
                .help("CPM factor table"),
        )
        .arg(
            Arg::new("exclude")
                .short('e')
                .long("exclude")
                .value_parser(value_parser!(PathBuf))
                .value_name("PATH")
                .help("BED file with exclusion (blacklist) regions"),
        )
        .arg(
            Arg::new("bam_dir")
                .short('B')
                .long("bam-dir")
                .value_parser(value_parser!(PathBuf))
                .value_name("PATH")
                .help("Directory with primary genome alignments (<sample>.bam)"),
        )
        .arg(
            Arg::new("bedgraph_dir")
                .short('R')
                .long("bedgraph-dir")
                .value_parser(value_parser!(PathBuf))
                .value_name("PATH")
                .help("Directory with precomputed raw coverage (<sample>.bedGraph)"),
        )
        .group(
            ArgGroup::new("coverage_source")
                .args(["bam_dir", "bedgraph_dir"])
                .required(true),
        )
        .arg(
            Arg::new("work_dir")
                .short('w')
                .long("work-dir")
                .value_parser(value_parser!(PathBuf))
                .value_name("PATH")
                .requires("bam_dir")
                .help("Directory for raw coverage files [default: <output-dir>/raw]"),
        )
        .arg(
            Arg::new("bamcoverage")
                .long("bamcoverage")
                .value_parser(value_parser!(PathBuf))
                .value_name("PATH")
                .default_value("bamCoverage")
                .help("Path to bamCoverage executable"),
        )
        .arg(
            Arg::new("tool_threads")
                .long("tool-threads")
                .value_parser(value_parser!(NonZeroUsize))
                .value_name("INT")
                .default_value("1")
                .help("Threads passed to each bamCoverage call"),
        )
        .arg(
            Arg::new("no_extend_reads")
                .action(ArgAction::SetTrue)
                .long("no-extend-reads")
                .help("Do not extend reads to fragment length when computing coverage"),
        )
        .arg(
            Arg::new("bedgraph_to_bigwig")
                .long("bedgraph-to-bigwig")
                .value_parser(value_parser!(PathBuf))
                .value_name("PATH")
                .default_value("bedGraphToBigWig")
                .help("Path to bedGraphToBigWig executable"),
        )
        .arg(
            Arg::new("no_bigwig")
                .action(ArgAction::SetTrue)
                .long("no-bigwig")
                .help("Do not generate bigWig output"),
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

    let bin_size = m
        .get_one::<NonZeroUsize>("bin_size")
        .map(|x| usize::from(*x))
        .expect("Missing default bin size");

    let sheet = m
        .get_one::<PathBuf>("sample_sheet")
        .expect("Missing sample sheet");
    let registry = SampleRegistry::from_file(sheet)
        .with_context(|| format!("Could not read sample sheet {}", sheet.display()))?;

    let gfile = m.get_one::<PathBuf>("genome").expect("Missing genome file");
    let genome = Genome::from_file(gfile)
        .with_context(|| format!("Could not read chromosome sizes from {}", gfile.display()))?;

    // The full factor table is read before any scaling takes place
    let sp = m
        .get_one::<PathBuf>("spikein_factors")
        .expect("Missing spike-in factor table");
    let cpm = m
        .get_one::<PathBuf>("cpm_factors")
        .expect("Missing CPM factor table");
    let factors = ScaleFactorTable::from_files(sp, cpm)
        .with_context(|| "Could not read scale factor tables")?;
    for s in factors.uncovered(&registry) {
        warn!(
            "Sample {} has no entry in the scale factor tables; only its raw track can be produced",
            s
        )
    }
    info!("Using scale factor table version {}", factors.version());

    let output_dir = m
        .get_one::<PathBuf>("output_dir")
        .cloned()
        .unwrap_or_else(|| PathBuf::from("."));

    let binner: Box<dyn CoverageBinner> = if let Some(d) = m.get_one::<PathBuf>("bam_dir") {
        let work_dir = m
            .get_one::<PathBuf>("work_dir")
            .cloned()
            .unwrap_or_else(|| output_dir.join("raw"));
        std::fs::create_dir_all(&work_dir)
            .with_context(|| format!("Could not create work directory {}", work_dir.display()))?;
        let mut b = BamCoverageBinner::new(d.to_owned(), work_dir);
        if let Some(p) = m.get_one::<PathBuf>("bamcoverage") {
            b.set_exe(p)
        }
        b.set_extend_reads(!m.get_flag("no_extend_reads"));
        if let Some(n) = m.get_one::<NonZeroUsize>("tool_threads") {
            b.set_threads(usize::from(*n))
        }
        Box::new(b)
    } else {
        let d = m
            .get_one::<PathBuf>("bedgraph_dir")
            .expect("Missing coverage source");
        Box::new(BedGraphBinner::new(d.to_owned()))
    };

    let mut cfg = Config::new(registry, genome, factors, binner, bin_size);

    if let Some(r) = m.get_one::<PathBuf>("exclude") {
        let excl = RegionSet::from_bed_file(r)
            .with_context(|| format!("Could not read exclusion regions from {}", r.display()))?;
        info!(
            "Read {} exclusion intervals from {}",
            excl.n_intervals(),
            r.display()
        );
        cfg.set_exclusions(excl)
    }

    if !m.get_flag("no_bigwig") {
        let mut tools = BigWigTools::new();
        if let Some(p) = m.get_one::<PathBuf>("bedgraph_to_bigwig") {
            tools.set_encoder(p)
        }
        cfg.set_encoder(Box::new(tools))
    }

    if let Some(s) = m.get_one::<String>("output_prefix") {
        cfg.set_output_prefix(s.to_owned())
    }
    cfg.set_output_dir(output_dir);
    cfg.set_threads(nt);

    Ok(cfg)
}
