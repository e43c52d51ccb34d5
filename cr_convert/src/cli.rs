use std::path::{Path, PathBuf};

use clap::{
    crate_authors, crate_description, crate_name, crate_version, value_parser, Arg, ArgAction,
    ArgMatches, Command,
};

use anyhow::Context;

use cr_core::{bigwig::BigWigTools, convert::TrackFormat, genome::Genome};
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
            Arg::new("genome")
                .short('g')
                .long("genome")
                .value_parser(value_parser!(PathBuf))
                .value_name("PATH")
                .required(true)
                .help("Chromosome sizes file (chrom, length)"),
        )
        .arg(
            Arg::new("from")
                .short('f')
                .long("from")
                .value_parser(value_parser!(TrackFormat))
                .value_name("FORMAT")
                .help("Input format (bedGraph, wig, bigWig) [default: from file extension]"),
        )
        .arg(
            Arg::new("to")
                .short('T')
                .long("to")
                .value_parser(value_parser!(TrackFormat))
                .value_name("FORMAT")
                .help("Output format (bedGraph, wig, bigWig) [default: from file extension]"),
        )
        .arg(
            Arg::new("name")
                .short('n')
                .long("name")
                .value_parser(value_parser!(String))
                .value_name("STRING")
                .help("Track name for wiggle output [default: output file stem]"),
        )
        .arg(
            Arg::new("coalesce")
                .action(ArgAction::SetTrue)
                .short('C')
                .long("coalesce")
                .help("Merge adjacent intervals with equal values"),
        )
        .arg(
            Arg::new("bedgraph_to_bigwig")
                .long("bedgraph-to-bigwig")
                .value_parser(value_parser!(PathBuf))
                .value_name("PATH")
                .help("Path to bedGraphToBigWig executable [default: bedGraphToBigWig]"),
        )
        .arg(
            Arg::new("bigwig_to_bedgraph")
                .long("bigwig-to-bedgraph")
                .value_parser(value_parser!(PathBuf))
                .value_name("PATH")
                .help("Path to bigWigToBedGraph executable [default: bigWigToBedGraph]"),
        )
        .arg(
            Arg::new("input")
                .value_parser(value_parser!(PathBuf))
                .value_name("INPUT")
                .required(true)
                .help("Input track"),
        )
        .arg(
            Arg::new("output")
                .value_parser(value_parser!(PathBuf))
                .value_name("OUTPUT")
                .required(true)
                .help("Output track"),
        )
}

/// Format from the command line option if given, otherwise from the file extension
fn format_of(m: &ArgMatches, opt: &str, p: &Path) -> anyhow::Result<TrackFormat> {
    match m.get_one::<TrackFormat>(opt) {
        Some(f) => Ok(*f),
        None => TrackFormat::from_path(p)
            .with_context(|| format!("Use --{} to set the format", opt)),
    }
}

/// Handle command line options.  Set up Config structure
pub fn handle_cli() -> anyhow::Result<Config> {
    // Get matches from command line
    let m = cli_model().get_matches();

    // Setup logging
    init_log(&m)?;

    debug!("Processing command line options");

    let input = m.get_one::<PathBuf>("input").expect("Missing input");
    let output = m.get_one::<PathBuf>("output").expect("Missing output");
    let in_format = format_of(&m, "from", input)?;
    let out_format = format_of(&m, "to", output)?;

    let gfile = m.get_one::<PathBuf>("genome").expect("Missing genome file");
    let genome = Genome::from_file(gfile)
        .with_context(|| format!("Could not read chromosome sizes from {}", gfile.display()))?;

    let mut cfg = Config::new(
        input.to_owned(),
        in_format,
        output.to_owned(),
        out_format,
        genome,
    );

    let mut tools = BigWigTools::new();
    if let Some(p) = m.get_one::<PathBuf>("bedgraph_to_bigwig") {
        tools.set_encoder(p)
    }
    if let Some(p) = m.get_one::<PathBuf>("bigwig_to_bedgraph") {
        tools.set_decoder(p)
    }
    cfg.set_tools(tools);

    if let Some(s) = m.get_one::<String>("name") {
        cfg.set_name(s.to_owned())
    }
    cfg.set_coalesce(m.get_flag("coalesce"));

    Ok(cfg)
}
