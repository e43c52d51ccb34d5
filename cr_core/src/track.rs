use std::{collections::BTreeSet, fmt, str::FromStr, sync::Arc};

use crate::{
    error::{CoreError, Result},
    genome::{Contig, Genome},
};

/// Normalization applied to a coverage track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TrackKind {
    Raw,
    Spikein,
    Cpm,
    MeanSpikein,
    MeanCpm,
}

impl TrackKind {
    /// Kinds produced for every sample
    pub const SAMPLE_KINDS: [TrackKind; 3] = [TrackKind::Raw, TrackKind::Spikein, TrackKind::Cpm];

    /// Kinds averaged over merge groups
    pub const GROUP_SOURCE_KINDS: [TrackKind; 2] = [TrackKind::Spikein, TrackKind::Cpm];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Spikein => "spikein",
            Self::Cpm => "cpm",
            Self::MeanSpikein => "mean_spikein",
            Self::MeanCpm => "mean_cpm",
        }
    }

    /// Kind of the group mean track built from tracks of this kind
    pub fn mean_kind(&self) -> Option<TrackKind> {
        match self {
            Self::Spikein => Some(Self::MeanSpikein),
            Self::Cpm => Some(Self::MeanCpm),
            _ => None,
        }
    }

    pub fn is_mean(&self) -> bool {
        matches!(self, Self::MeanSpikein | Self::MeanCpm)
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TrackKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "raw" => Ok(Self::Raw),
            "spikein" => Ok(Self::Spikein),
            "cpm" => Ok(Self::Cpm),
            "mean_spikein" => Ok(Self::MeanSpikein),
            "mean_cpm" => Ok(Self::MeanCpm),
            _ => Err(format!("Unknown track kind {}", s)),
        }
    }
}

/// One interval of a coverage track: [start, end) on chrom with a constant value
#[derive(Debug, Clone, PartialEq)]
pub struct Bin {
    pub chrom: Contig,
    pub start: usize,
    pub end: usize,
    pub value: f64,
}

impl Bin {
    pub fn new(chrom: &Contig, start: usize, end: usize, value: f64) -> Self {
        Self {
            chrom: Arc::clone(chrom),
            start,
            end,
            value,
        }
    }

    pub fn width(&self) -> usize {
        self.end - self.start
    }
}

/// Check that bins are non-empty, sorted by (chrom, start) and do not overlap
pub fn check_bins(bins: &[Bin]) -> Result<()> {
    for b in bins.iter() {
        if b.end <= b.start {
            return Err(CoreError::DataConsistency(format!(
                "Empty or inverted interval {}:{}-{}",
                b.chrom, b.start, b.end
            )));
        }
        if !b.value.is_finite() {
            return Err(CoreError::DataConsistency(format!(
                "Non finite value at {}:{}-{}",
                b.chrom, b.start, b.end
            )));
        }
    }
    for w in bins.windows(2) {
        let (a, b) = (&w[0], &w[1]);
        match a.chrom.cmp(&b.chrom) {
            std::cmp::Ordering::Greater => {
                return Err(CoreError::DataConsistency(format!(
                    "Intervals not sorted: {} found after {}",
                    b.chrom, a.chrom
                )))
            }
            std::cmp::Ordering::Equal if b.start < a.end => {
                return Err(CoreError::DataConsistency(format!(
                    "Intervals not sorted or overlapping: {}:{}-{} and {}:{}-{}",
                    a.chrom, a.start, a.end, b.chrom, b.start, b.end
                )))
            }
            _ => (),
        }
    }
    Ok(())
}

/// CoverageTrack
///
/// Binned signal for one owner (sample or group) and one normalization kind.
/// Bins are sorted by (chrom, start) and never overlap; regions without a bin
/// have value 0.
///
/// The domain is the set of chromosomes the track covers, including those
/// where the signal is 0 everywhere.  Every bin lies on a domain chromosome.
///
#[derive(Debug, Clone, PartialEq)]
pub struct CoverageTrack {
    owner: Arc<str>,
    kind: TrackKind,
    bins: Vec<Bin>,
    domain: BTreeSet<Contig>,
}

impl CoverageTrack {
    /// Track whose domain is the set of chromosomes with bins
    pub fn new(owner: &str, kind: TrackKind, bins: Vec<Bin>) -> Result<Self> {
        check_bins(&bins)
            .map_err(|e| e.chain(format!("track {} ({})", owner, kind)))?;
        let domain = bins.iter().map(|b| Arc::clone(&b.chrom)).collect();
        Ok(Self {
            owner: Arc::from(owner),
            kind,
            bins,
            domain,
        })
    }

    /// Replace the domain, typically with all chromosomes of the genome the
    /// track was built against
    pub fn with_domain<'b, I>(mut self, chroms: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'b Contig>,
    {
        let domain: BTreeSet<Contig> = chroms.into_iter().map(Arc::clone).collect();
        if let Some(b) = self.bins.iter().find(|b| !domain.contains(&b.chrom)) {
            return Err(CoreError::DataConsistency(format!(
                "track {} ({}) has bins on {} which is outside its chromosome set",
                self.owner, self.kind, b.chrom
            )));
        }
        self.domain = domain;
        Ok(self)
    }

    pub fn domain(&self) -> &BTreeSet<Contig> {
        &self.domain
    }

    pub fn owner(&self) -> &Arc<str> {
        &self.owner
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn bins(&self) -> &[Bin] {
        &self.bins
    }

    pub fn len(&self) -> usize {
        self.bins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    /// Set of chromosomes with at least one bin
    pub fn chroms(&self) -> BTreeSet<&str> {
        self.bins.iter().map(|b| b.chrom.as_ref()).collect()
    }

    /// Bins grouped by chromosome, in sort order
    pub fn chrom_slices(&self) -> Vec<(&Contig, &[Bin])> {
        let mut v = Vec::new();
        let mut i = 0;
        while i < self.bins.len() {
            let c = &self.bins[i].chrom;
            let j = i + self.bins[i..].partition_point(|b| b.chrom == *c);
            v.push((c, &self.bins[i..j]));
            i = j;
        }
        v
    }

    /// Check that every bin lies within its chromosome
    pub fn check_bounds(&self, genome: &Genome) -> Result<()> {
        for b in self.bins.iter() {
            genome
                .check_interval(&b.chrom, b.start, b.end)
                .map_err(|e| e.chain(format!("track {} ({})", self.owner, self.kind)))?
        }
        Ok(())
    }

    /// Merge touching bins with equal values
    pub fn coalesce(&self) -> Self {
        let mut bins: Vec<Bin> = Vec::with_capacity(self.bins.len());
        for b in self.bins.iter() {
            match bins.last_mut() {
                Some(p) if p.chrom == b.chrom && p.end == b.start && p.value == b.value => {
                    p.end = b.end
                }
                _ => bins.push(b.clone()),
            }
        }
        Self {
            owner: Arc::clone(&self.owner),
            kind: self.kind,
            bins,
            domain: self.domain.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bin(c: &str, s: usize, e: usize, v: f64) -> Bin {
        Bin::new(&Arc::from(c), s, e, v)
    }

    #[test]
    fn validation() {
        let ok = vec![bin("chr1", 0, 10, 1.0), bin("chr1", 10, 20, 2.0), bin("chr2", 0, 5, 1.0)];
        assert!(CoverageTrack::new("A", TrackKind::Raw, ok).is_ok());
        let overlap = vec![bin("chr1", 0, 10, 1.0), bin("chr1", 5, 20, 2.0)];
        assert!(matches!(
            CoverageTrack::new("A", TrackKind::Raw, overlap),
            Err(CoreError::DataConsistency(_))
        ));
        let unsorted = vec![bin("chr2", 0, 10, 1.0), bin("chr1", 0, 10, 2.0)];
        assert!(CoverageTrack::new("A", TrackKind::Raw, unsorted).is_err());
        let empty = vec![bin("chr1", 10, 10, 1.0)];
        assert!(CoverageTrack::new("A", TrackKind::Raw, empty).is_err());
        let nan = vec![bin("chr1", 0, 10, f64::NAN)];
        assert!(CoverageTrack::new("A", TrackKind::Raw, nan).is_err());
    }

    #[test]
    fn coalesce_and_slices() {
        let t = CoverageTrack::new(
            "A",
            TrackKind::Cpm,
            vec![
                bin("chr1", 0, 10, 1.0),
                bin("chr1", 10, 20, 1.0),
                bin("chr1", 25, 30, 1.0),
                bin("chr2", 0, 10, 3.0),
            ],
        )
        .unwrap();
        let c = t.coalesce();
        assert_eq!(c.len(), 3);
        assert_eq!(c.bins()[0].end, 20);
        let s = t.chrom_slices();
        assert_eq!(s.len(), 2);
        assert_eq!(s[0].1.len(), 3);
        assert_eq!(t.chroms().into_iter().collect::<Vec<_>>(), vec!["chr1", "chr2"]);
    }

    #[test]
    fn domain() {
        let t = CoverageTrack::new("A", TrackKind::Raw, vec![bin("chr1", 0, 10, 1.0)]).unwrap();
        assert_eq!(t.domain().len(), 1);
        let all: Vec<Contig> = vec![Arc::from("chr1"), Arc::from("chr2")];
        let t = t.with_domain(all.iter()).unwrap();
        assert_eq!(t.domain().iter().map(|c| c.as_ref()).collect::<Vec<_>>(), vec!["chr1", "chr2"]);
        assert_eq!(t.chroms().len(), 1);
        assert_eq!(t.coalesce().domain(), t.domain());
        assert!(matches!(
            t.with_domain(all[1..].iter()),
            Err(CoreError::DataConsistency(_))
        ));
    }

    #[test]
    fn bounds() {
        let mut g = Genome::new();
        g.add("chr1", 15).unwrap();
        let t = CoverageTrack::new("A", TrackKind::Raw, vec![bin("chr1", 10, 20, 1.0)]).unwrap();
        assert!(t.check_bounds(&g).is_err());
    }

    #[test]
    fn kinds() {
        assert_eq!(TrackKind::Spikein.mean_kind(), Some(TrackKind::MeanSpikein));
        assert_eq!(TrackKind::Raw.mean_kind(), None);
        assert_eq!("MEAN_CPM".parse::<TrackKind>().unwrap(), TrackKind::MeanCpm);
        assert_eq!(TrackKind::MeanCpm.to_string(), "mean_cpm");
    }
}
