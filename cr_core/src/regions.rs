use std::{collections::HashMap, io::BufRead, path::Path};

use compress_io::compress::CompressIo;
use utils::get_next_line;

use crate::error::{CoreError, Result};

/// A set of genomic intervals (exclusion or include regions)
///
/// Held per chromosome as sorted, non-overlapping half open ranges (a, b) with b > a
#[derive(Debug, Default, Clone)]
pub struct RegionSet {
    ranges: HashMap<String, Vec<(usize, usize)>>,
}

/// Form sorted, non-overlapping vector from v.  Touching ranges are joined
fn merge_ranges(mut v: Vec<(usize, usize)>) -> Vec<(usize, usize)> {
    if v.len() < 2 {
        return v;
    }
    v.sort_unstable_by_key(|(a, _)| *a);
    let mut v1 = Vec::with_capacity(v.len());
    let mut prev = v[0];
    for (a, b) in &v[1..] {
        // Check for overlap
        if *a <= prev.1 {
            prev.1 = prev.1.max(*b)
        } else {
            v1.push(prev);
            prev = (*a, *b)
        }
    }
    v1.push(prev);
    v1
}

impl RegionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_ranges<S: AsRef<str>>(ranges: impl IntoIterator<Item = (S, usize, usize)>) -> Self {
        let mut h: HashMap<String, Vec<(usize, usize)>> = HashMap::new();
        for (c, a, b) in ranges {
            if b > a {
                h.entry(c.as_ref().to_owned()).or_default().push((a, b))
            }
        }
        let ranges = h.into_iter().map(|(c, v)| (c, merge_ranges(v))).collect();
        Self { ranges }
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Number of merged intervals
    pub fn n_intervals(&self) -> usize {
        self.ranges.values().map(|v| v.len()).sum()
    }

    /// Does [start, end) touch any interval in the set
    pub fn overlaps(&self, chrom: &str, start: usize, end: usize) -> bool {
        match self.ranges.get(chrom) {
            Some(v) => {
                // First range ending after start
                let i = v.partition_point(|(_, b)| *b <= start);
                v.get(i).map(|(a, _)| *a < end).unwrap_or(false)
            }
            None => false,
        }
    }

    /// Read BED file (chrom, start, end; extra columns ignored).
    /// Header and comment lines (track, browser, #) are skipped
    pub fn from_bed_reader<R: BufRead>(rdr: &mut R, name: &str) -> Result<Self> {
        let mut buf = String::new();
        let mut line = 0;
        let mut v = Vec::new();
        while let Some(fields) = get_next_line(rdr, &mut buf)? {
            line += 1;
            if fields.is_empty()
                || fields[0].starts_with('#')
                || fields[0].starts_with("track")
                || fields[0].starts_with("browser")
            {
                continue;
            }
            if fields.len() < 3 {
                return Err(CoreError::Parse(format!(
                    "{}:{} Expected at least 3 columns in BED record",
                    name, line
                )));
            }
            let parse = |s: &str, what: &str| {
                s.parse::<usize>().map_err(|e| {
                    CoreError::Parse(format!("{}:{} Error reading {}: {}", name, line, what, e))
                })
            };
            let a = parse(fields[1], "start")?;
            let b = parse(fields[2], "end")?;
            if b < a {
                return Err(CoreError::Parse(format!(
                    "{}:{} Range error - {} > {}",
                    name, line, a, b
                )));
            }
            v.push((fields[0].to_owned(), a, b))
        }
        let rs = Self::from_ranges(v);
        debug!(
            "Read {} lines from {}; {} merged intervals",
            line,
            name,
            rs.n_intervals()
        );
        Ok(rs)
    }

    pub fn from_bed_file<P: AsRef<Path>>(p: P) -> Result<Self> {
        let p = p.as_ref();
        debug!("Reading in regions from {}", p.display());
        let mut rdr = CompressIo::new().path(p).bufreader()?;
        Self::from_bed_reader(&mut rdr, &p.display().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn merge() {
        let rs = RegionSet::from_ranges(vec![
            ("chr1", 50, 60),
            ("chr1", 10, 20),
            ("chr1", 15, 30),
            ("chr1", 30, 35),
        ]);
        assert_eq!(rs.n_intervals(), 2);
        assert!(rs.overlaps("chr1", 0, 11));
        assert!(!rs.overlaps("chr1", 0, 10));
        assert!(rs.overlaps("chr1", 34, 40));
        assert!(!rs.overlaps("chr1", 35, 50));
        assert!(rs.overlaps("chr1", 0, 100));
        assert!(!rs.overlaps("chr2", 0, 100));
    }

    #[test]
    fn read_bed() {
        let mut rdr = Cursor::new("track name=bl\nchr1\t100\t200\tbad\nchr2\t0\t5\n");
        let rs = RegionSet::from_bed_reader(&mut rdr, "test").unwrap();
        assert_eq!(rs.n_intervals(), 2);
        assert!(rs.overlaps("chr1", 150, 151));
        let mut rdr = Cursor::new("chr1\t100\n");
        assert!(RegionSet::from_bed_reader(&mut rdr, "test").is_err());
    }
}
