//! Wiggle (step format) tracks
//!
//! Each chromosome is written as a series of blocks, one per maximal run of
//! bins sharing the same width.  A run whose bins are contiguous becomes a
//! fixedStep block; a run with gaps becomes a variableStep block with span set
//! to the bin width.  Either way the interval list is reproduced exactly on reading.

use std::{
    collections::HashMap,
    io::{BufRead, Write},
    path::Path,
    sync::Arc,
};

use compress_io::compress::CompressIo;
use regex::Regex;

use crate::{
    error::{CoreError, Result},
    genome::Contig,
    track::{Bin, CoverageTrack, TrackKind},
};

pub fn write_wiggle<W: Write>(w: &mut W, track: &CoverageTrack, name: &str) -> Result<()> {
    writeln!(w, "track type=wiggle_0 name=\"{}\"", name)?;
    for (ctg, bins) in track.chrom_slices() {
        let mut i = 0;
        while i < bins.len() {
            let width = bins[i].width();
            let j = bins[i..]
                .iter()
                .position(|b| b.width() != width)
                .map(|k| i + k)
                .unwrap_or(bins.len());
            let run = &bins[i..j];
            let contiguous = run.windows(2).all(|x| x[1].start == x[0].end);
            if contiguous {
                writeln!(
                    w,
                    "fixedStep chrom={} start={} step={} span={}",
                    ctg,
                    run[0].start + 1,
                    width,
                    width
                )?;
                for b in run {
                    writeln!(w, "{}", b.value)?
                }
            } else {
                writeln!(w, "variableStep chrom={} span={}", ctg, width)?;
                for b in run {
                    writeln!(w, "{}\t{}", b.start + 1, b.value)?
                }
            }
            i = j;
        }
    }
    Ok(())
}

enum Block {
    Fixed {
        chrom: Contig,
        next: usize,
        step: usize,
        span: usize,
    },
    Variable {
        chrom: Contig,
        span: usize,
    },
}

struct HeaderParser {
    re: Regex,
    ctgs: HashMap<String, Contig>,
}

impl HeaderParser {
    fn new() -> Self {
        Self {
            re: Regex::new(r"(\w+)=(\S+)").expect("Invalid wiggle header regex"),
            ctgs: HashMap::new(),
        }
    }

    fn parse(&mut self, s: &str, name: &str, line: usize) -> Result<Block> {
        let kv: HashMap<&str, &str> = self
            .re
            .captures_iter(s)
            .filter_map(|c| Some((c.get(1)?.as_str(), c.get(2)?.as_str())))
            .collect();
        let err = |msg: String| CoreError::Parse(format!("{}:{} {}", name, line, msg));
        let get_num = |k: &str, default: Option<usize>| -> Result<usize> {
            match kv.get(k) {
                Some(v) => match v.parse::<usize>() {
                    Ok(x) if x > 0 => Ok(x),
                    _ => Err(err(format!("Invalid value for {}: {}", k, v))),
                },
                None => default.ok_or_else(|| err(format!("Missing {} in header", k))),
            }
        };
        let c = kv
            .get("chrom")
            .ok_or_else(|| err("Missing chrom in header".to_string()))?;
        let chrom = match self.ctgs.get(*c) {
            Some(x) => Arc::clone(x),
            None => {
                let x: Contig = Arc::from(*c);
                self.ctgs.insert(c.to_string(), Arc::clone(&x));
                x
            }
        };
        let span = get_num("span", Some(1))?;
        if s.starts_with("fixedStep") {
            Ok(Block::Fixed {
                chrom,
                next: get_num("start", None)?,
                step: get_num("step", None)?,
                span,
            })
        } else {
            Ok(Block::Variable { chrom, span })
        }
    }
}

/// Read wiggle records.  Both fixedStep and variableStep blocks are accepted;
/// positions are 1-based.  Returned bins are in file order
pub fn read_bins<R: BufRead>(rdr: &mut R, name: &str) -> Result<Vec<Bin>> {
    let mut hp = HeaderParser::new();
    let mut block: Option<Block> = None;
    let mut buf = String::new();
    let mut line = 0;
    let mut v = Vec::new();
    loop {
        buf.clear();
        if rdr.read_line(&mut buf)? == 0 {
            break;
        }
        line += 1;
        let s = buf.trim();
        if s.is_empty() || s.starts_with('#') || s.starts_with("track") || s.starts_with("browser")
        {
            continue;
        }
        if s.starts_with("fixedStep") || s.starts_with("variableStep") {
            block = Some(hp.parse(s, name, line)?);
            continue;
        }
        let parse_val = |x: &str| {
            x.parse::<f64>().map_err(|e| {
                CoreError::Parse(format!("{}:{} Error reading value: {}", name, line, e))
            })
        };
        match block.as_mut() {
            None => {
                return Err(CoreError::Parse(format!(
                    "{}:{} Data line before any fixedStep or variableStep header",
                    name, line
                )))
            }
            Some(Block::Fixed {
                chrom,
                next,
                step,
                span,
            }) => {
                let value = parse_val(s)?;
                v.push(Bin::new(chrom, *next - 1, *next - 1 + *span, value));
                *next += *step;
            }
            Some(Block::Variable { chrom, span }) => {
                let fields: Vec<_> = s.split_whitespace().collect();
                if fields.len() != 2 {
                    return Err(CoreError::Parse(format!(
                        "{}:{} Expected position and value in variableStep record",
                        name, line
                    )));
                }
                let pos = match fields[0].parse::<usize>() {
                    Ok(x) if x > 0 => x,
                    _ => {
                        return Err(CoreError::Parse(format!(
                            "{}:{} Invalid position {}",
                            name, line, fields[0]
                        )))
                    }
                };
                let value = parse_val(fields[1])?;
                v.push(Bin::new(chrom, pos - 1, pos - 1 + *span, value));
            }
        }
    }
    debug!("Read {} records from {}", v.len(), name);
    Ok(v)
}

/// Read wiggle into a validated track
pub fn read_track<R: BufRead>(
    rdr: &mut R,
    name: &str,
    owner: &str,
    kind: TrackKind,
) -> Result<CoverageTrack> {
    let bins = read_bins(rdr, name)?;
    CoverageTrack::new(owner, kind, bins).map_err(|e| e.chain(name))
}

pub fn read_track_from_file<P: AsRef<Path>>(
    p: P,
    owner: &str,
    kind: TrackKind,
) -> Result<CoverageTrack> {
    let p = p.as_ref();
    trace!("Opening wiggle file {} for reading", p.display());
    let mut rdr = CompressIo::new().path(p).bufreader()?;
    read_track(&mut rdr, &p.display().to_string(), owner, kind)
}
