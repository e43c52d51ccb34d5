use std::{
    collections::HashMap,
    io::{BufRead, Write},
    path::Path,
    sync::Arc,
};

use compress_io::compress::CompressIo;

use crate::{
    error::{CoreError, Result},
    genome::Contig,
    track::{Bin, CoverageTrack, TrackKind},
};

fn is_header(s: &str) -> bool {
    s.starts_with('#') || s.starts_with("track") || s.starts_with("browser")
}

/// Read bedGraph records (chrom, start, end, value; whitespace separated).
/// Header, comment and blank lines are skipped.  Records are returned in file order
/// without checking sort order.
pub fn read_bins<R: BufRead>(rdr: &mut R, name: &str) -> Result<Vec<Bin>> {
    let mut buf = String::new();
    let mut line = 0;
    let mut ctgs: HashMap<String, Contig> = HashMap::new();
    let mut v = Vec::new();
    loop {
        buf.clear();
        if rdr.read_line(&mut buf)? == 0 {
            break;
        }
        line += 1;
        let s = buf.trim();
        if s.is_empty() || is_header(s) {
            continue;
        }
        let fields: Vec<_> = s.split_whitespace().collect();
        if fields.len() != 4 {
            return Err(CoreError::Parse(format!(
                "{}:{} Expected 4 fields in bedGraph record, found {}",
                name,
                line,
                fields.len()
            )));
        }
        let pos = |s: &str, what: &str| {
            s.parse::<usize>().map_err(|e| {
                CoreError::Parse(format!("{}:{} Error reading {}: {}", name, line, what, e))
            })
        };
        let start = pos(fields[1], "start")?;
        let end = pos(fields[2], "end")?;
        let value = fields[3].parse::<f64>().map_err(|e| {
            CoreError::Parse(format!("{}:{} Error reading value: {}", name, line, e))
        })?;
        let ctg = match ctgs.get(fields[0]) {
            Some(c) => Arc::clone(c),
            None => {
                trace!("Adding contig {}", fields[0]);
                let c: Contig = Arc::from(fields[0]);
                ctgs.insert(fields[0].to_owned(), Arc::clone(&c));
                c
            }
        };
        v.push(Bin {
            chrom: ctg,
            start,
            end,
            value,
        })
    }
    debug!("Read {} records from {}", v.len(), name);
    Ok(v)
}

pub fn read_bins_from_file<P: AsRef<Path>>(p: P) -> Result<Vec<Bin>> {
    let p = p.as_ref();
    trace!("Opening bedGraph file {} for reading", p.display());
    let mut rdr = CompressIo::new().path(p).bufreader()?;
    read_bins(&mut rdr, &p.display().to_string())
}

/// Read bedGraph into a validated (sorted, non-overlapping) track
pub fn read_track<R: BufRead>(
    rdr: &mut R,
    name: &str,
    owner: &str,
    kind: TrackKind,
) -> Result<CoverageTrack> {
    let bins = read_bins(rdr, name)?;
    CoverageTrack::new(owner, kind, bins).map_err(|e| e.chain(name))
}

/// Write track as tab separated bedGraph without header.  Values use the shortest
/// representation that reads back to the same number
pub fn write_bedgraph<W: Write>(w: &mut W, track: &CoverageTrack) -> Result<()> {
    for b in track.bins() {
        writeln!(w, "{}\t{}\t{}\t{}", b.chrom, b.start, b.end, b.value)?
    }
    Ok(())
}
