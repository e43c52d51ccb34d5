use std::{
    collections::HashMap,
    io::{BufRead, Write},
    path::Path,
    sync::Arc,
};

use compress_io::compress::CompressIo;
use utils::get_next_line;

use crate::error::{CoreError, Result};

/// Chromosome names are shared across many data structures so we use Arc<str>
pub type Contig = Arc<str>;

/// Genome
///
/// Chromosome name -> length table (the chrom.sizes file).  Chromosomes
/// are kept in input order; `sorted_chroms()` gives the order used by tracks.
///
#[derive(Debug, Default, Clone)]
pub struct Genome {
    chroms: Vec<(Contig, usize)>,
    index: HashMap<Contig, usize>,
}

impl Genome {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a chromosome.  Duplicate names or zero lengths are rejected
    pub fn add(&mut self, name: &str, len: usize) -> Result<()> {
        if len == 0 {
            return Err(CoreError::DataConsistency(format!(
                "Chromosome {} has zero length",
                name
            )));
        }
        if self.index.contains_key(name) {
            return Err(CoreError::DataConsistency(format!(
                "Chromosome {} appears more than once in genome",
                name
            )));
        }
        let ctg: Contig = Arc::from(name);
        self.index.insert(Arc::clone(&ctg), self.chroms.len());
        self.chroms.push((ctg, len));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.chroms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chroms.is_empty()
    }

    pub fn length(&self, chrom: &str) -> Option<usize> {
        self.index.get(chrom).map(|i| self.chroms[*i].1)
    }

    /// Chromosomes in input order
    pub fn chroms(&self) -> impl Iterator<Item = (&Contig, usize)> {
        self.chroms.iter().map(|(c, l)| (c, *l))
    }

    /// Chromosomes sorted by name, matching track sort order
    pub fn sorted_chroms(&self) -> Vec<(&Contig, usize)> {
        let mut v: Vec<_> = self.chroms().collect();
        v.sort_unstable_by(|a, b| a.0.cmp(b.0));
        v
    }

    /// Check that [start, end) lies on a known chromosome
    pub fn check_interval(&self, chrom: &str, start: usize, end: usize) -> Result<()> {
        match self.length(chrom) {
            None => Err(CoreError::DataConsistency(format!(
                "Chromosome {} not found in genome",
                chrom
            ))),
            Some(l) if end > l || start >= end => Err(CoreError::DataConsistency(format!(
                "Interval {}:{}-{} outside chromosome bounds (length {})",
                chrom, start, end, l
            ))),
            _ => Ok(()),
        }
    }

    /// Read tab separated chrom, length lines
    pub fn from_reader<R: BufRead>(rdr: &mut R, name: &str) -> Result<Self> {
        let mut genome = Self::new();
        let mut buf = String::new();
        let mut line = 0;
        while let Some(fields) = get_next_line(rdr, &mut buf)? {
            line += 1;
            // Skip blank lines
            if fields.is_empty() {
                continue;
            }
            if fields.len() < 2 {
                return Err(CoreError::Parse(format!(
                    "{}:{} Expected chromosome name and length",
                    name, line
                )));
            }
            let len = fields[1].parse::<usize>().map_err(|e| {
                CoreError::Parse(format!(
                    "{}:{} Error reading length for {}: {}",
                    name, line, fields[0], e
                ))
            })?;
            genome
                .add(fields[0], len)
                .map_err(|e| e.chain(format!("{}:{}", name, line)))?;
        }
        debug!("Read {} chromosomes from {}", genome.len(), name);
        Ok(genome)
    }

    pub fn from_file<P: AsRef<Path>>(p: P) -> Result<Self> {
        let p = p.as_ref();
        debug!("Reading in genome sizes from {}", p.display());
        let mut rdr = CompressIo::new().path(p).bufreader()?;
        Self::from_reader(&mut rdr, &p.display().to_string())
    }

    /// Write in chrom.sizes form (as needed by bigWig encoders)
    pub fn write_sizes<W: Write>(&self, w: &mut W) -> Result<()> {
        for (c, l) in self.chroms() {
            writeln!(w, "{}\t{}", c, l)?
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn read_sizes() {
        let mut rdr = Cursor::new("chr2\t500\nchr1\t1000\n\n");
        let g = Genome::from_reader(&mut rdr, "test").unwrap();
        assert_eq!(g.len(), 2);
        assert_eq!(g.length("chr1"), Some(1000));
        let names: Vec<_> = g.sorted_chroms().iter().map(|(c, _)| c.to_string()).collect();
        assert_eq!(names, vec!["chr1", "chr2"]);
        let mut out = Vec::new();
        g.write_sizes(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "chr2\t500\nchr1\t1000\n");
    }

    #[test]
    fn bad_sizes() {
        let mut rdr = Cursor::new("chr1\tlots\n");
        assert!(matches!(
            Genome::from_reader(&mut rdr, "test"),
            Err(CoreError::Parse(_))
        ));
        let mut rdr = Cursor::new("chr1\t10\nchr1\t20\n");
        assert!(matches!(
            Genome::from_reader(&mut rdr, "test"),
            Err(CoreError::DataConsistency(_))
        ));
    }

    #[test]
    fn bounds() {
        let mut g = Genome::new();
        g.add("chr1", 100).unwrap();
        assert!(g.check_interval("chr1", 0, 100).is_ok());
        assert!(g.check_interval("chr1", 50, 101).is_err());
        assert!(g.check_interval("chrX", 0, 1).is_err());
    }
}
