use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    process::Command,
    sync::Arc,
};

use crate::{
    bedgraph,
    error::{CoreError, Result},
    external::run_tool,
    factors::ScaleFactorTable,
    genome::Genome,
    regions::RegionSet,
    sample::Sample,
    track::{check_bins, Bin, CoverageTrack, TrackKind},
};

/// Supplier of unscaled read depth for a sample.
///
/// The returned intervals need not be sorted or aligned to bin boundaries
/// but must not overlap.  Regions without an interval have zero depth.
pub trait CoverageBinner: Sync + Send {
    fn raw_coverage(&self, sample: &Sample, bin_size: usize) -> Result<Vec<Bin>>;
}

/// Runs deeptools bamCoverage on <bam_dir>/<sample>.bam, writing the raw bedGraph
/// to <work_dir>/<sample>.raw.bedGraph
pub struct BamCoverageBinner {
    exe: PathBuf,
    bam_dir: PathBuf,
    work_dir: PathBuf,
    threads: usize,
    extend_reads: bool,
}

impl BamCoverageBinner {
    pub fn new(bam_dir: PathBuf, work_dir: PathBuf) -> Self {
        Self {
            exe: PathBuf::from("bamCoverage"),
            bam_dir,
            work_dir,
            threads: 1,
            extend_reads: true,
        }
    }

    pub fn set_exe<P: AsRef<Path>>(&mut self, p: P) {
        self.exe = p.as_ref().to_owned()
    }

    pub fn set_threads(&mut self, n: usize) {
        self.threads = n.max(1)
    }

    pub fn set_extend_reads(&mut self, x: bool) {
        self.extend_reads = x
    }

    fn command(&self, bam: &Path, out: &Path, bin_size: usize) -> Command {
        let mut cmd = Command::new(&self.exe);
        cmd.arg("-b")
            .arg(bam)
            .arg("-o")
            .arg(out)
            .args(["--outFileFormat", "bedgraph", "--scaleFactor", "1"])
            .arg("--binSize")
            .arg(bin_size.to_string())
            .arg("-p")
            .arg(self.threads.to_string());
        if self.extend_reads {
            cmd.arg("--extendReads");
        }
        cmd
    }
}

impl CoverageBinner for BamCoverageBinner {
    fn raw_coverage(&self, sample: &Sample, bin_size: usize) -> Result<Vec<Bin>> {
        let bam = self.bam_dir.join(format!("{}.bam", sample.id()));
        if !bam.is_file() {
            return Err(CoreError::DataConsistency(format!(
                "Alignment file {} not found for sample {}",
                bam.display(),
                sample.id()
            )));
        }
        let out = self.work_dir.join(format!("{}.raw.bedGraph", sample.id()));
        run_tool(&mut self.command(&bam, &out, bin_size))?;
        bedgraph::read_bins_from_file(&out)
    }
}

/// Reads precomputed raw coverage from <dir>/<sample>.bedGraph (optionally compressed)
pub struct BedGraphBinner {
    dir: PathBuf,
}

impl BedGraphBinner {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn find(&self, sample: &Sample) -> Option<PathBuf> {
        ["bedGraph", "bedgraph", "bedGraph.gz", "bedgraph.gz", "bg"]
            .iter()
            .map(|ext| self.dir.join(format!("{}.{}", sample.id(), ext)))
            .find(|p| p.is_file())
    }
}

impl CoverageBinner for BedGraphBinner {
    fn raw_coverage(&self, sample: &Sample, _bin_size: usize) -> Result<Vec<Bin>> {
        let p = self.find(sample).ok_or_else(|| {
            CoreError::DataConsistency(format!(
                "No raw coverage file found for sample {} in {}",
                sample.id(),
                self.dir.display()
            ))
        })?;
        bedgraph::read_bins_from_file(&p)
    }
}

/// Accumulator for one output bin
struct BinAcc {
    ix: usize,
    start: usize,
    end: usize,
    sum: f64,
    pieces: usize,
    // Value of a raw interval covering the whole bin
    full: Option<f64>,
}

impl BinAcc {
    fn value(&self) -> f64 {
        match (self.pieces, self.full) {
            (1, Some(v)) => v,
            _ => self.sum / ((self.end - self.start) as f64),
        }
    }
}

/// CoverageScaler
///
/// Turns raw depth into fixed width bins over the genome, drops bins touching
/// exclusion regions and multiplies by a scale factor.  Bins with zero depth are
/// not emitted.  The last bin of a chromosome is truncated at the chromosome end.
///
pub struct CoverageScaler<'a> {
    genome: &'a Genome,
    bin_size: usize,
    exclusions: &'a RegionSet,
}

impl<'a> CoverageScaler<'a> {
    pub fn new(genome: &'a Genome, bin_size: usize, exclusions: &'a RegionSet) -> Result<Self> {
        if bin_size == 0 {
            Err(CoreError::Config("Bin size must be at least 1".to_string()))
        } else if genome.is_empty() {
            Err(CoreError::Config("Genome has no chromosomes".to_string()))
        } else {
            Ok(Self {
                genome,
                bin_size,
                exclusions,
            })
        }
    }

    pub fn bin_size(&self) -> usize {
        self.bin_size
    }

    /// Fixed width, exclusion filtered, unscaled bins from raw depth intervals
    pub fn rebin(&self, mut raw: Vec<Bin>) -> Result<Vec<Bin>> {
        raw.sort_unstable_by(|a, b| a.chrom.cmp(&b.chrom).then(a.start.cmp(&b.start)));
        check_bins(&raw)?;
        for b in raw.iter() {
            self.genome.check_interval(&b.chrom, b.start, b.end)?
        }

        // Raw intervals per chromosome
        let mut by_chrom: HashMap<&str, (usize, usize)> = HashMap::new();
        for (i, b) in raw.iter().enumerate() {
            by_chrom
                .entry(b.chrom.as_ref())
                .and_modify(|e| e.1 = i + 1)
                .or_insert((i, i + 1));
        }

        let bs = self.bin_size;
        let mut out = Vec::new();
        for (ctg, len) in self.genome.sorted_chroms() {
            let (i, j) = match by_chrom.get(&**ctg) {
                Some(x) => *x,
                None => continue,
            };
            let mut acc: Option<BinAcc> = None;
            let flush = |acc: Option<BinAcc>, out: &mut Vec<Bin>| {
                if let Some(a) = acc {
                    let v = a.value();
                    if v != 0.0 && !self.exclusions.overlaps(ctg, a.start, a.end) {
                        out.push(Bin::new(ctg, a.start, a.end, v))
                    }
                }
            };
            for r in raw[i..j].iter().filter(|r| r.value != 0.0) {
                for k in r.start / bs..=(r.end - 1) / bs {
                    let (s, e) = (k * bs, ((k + 1) * bs).min(len));
                    let overlap = r.end.min(e) - r.start.max(s);
                    if acc.as_ref().map(|a| a.ix != k).unwrap_or(true) {
                        flush(acc.take(), &mut out);
                        acc = Some(BinAcc {
                            ix: k,
                            start: s,
                            end: e,
                            sum: 0.0,
                            pieces: 0,
                            full: None,
                        })
                    }
                    if let Some(a) = acc.as_mut() {
                        a.sum += r.value * overlap as f64;
                        a.pieces += 1;
                        if overlap == e - s {
                            a.full = Some(r.value)
                        }
                    }
                }
            }
            flush(acc.take(), &mut out);
        }
        Ok(out)
    }

    /// Multiply binned depth by factor to produce a track
    pub fn apply(
        &self,
        owner: &str,
        kind: TrackKind,
        bins: &[Bin],
        factor: f64,
    ) -> Result<CoverageTrack> {
        if !(factor.is_finite() && factor > 0.0) {
            return Err(CoreError::Normalization(format!(
                "Invalid scale factor {} for {} track of {}",
                factor, kind, owner
            )));
        }
        let v = bins
            .iter()
            .map(|b| Bin::new(&b.chrom, b.start, b.end, b.value * factor))
            .collect();
        CoverageTrack::new(owner, kind, v)?
            .with_domain(self.genome.chroms().map(|(c, _)| c))
    }

    /// Scale raw depth by factor: rebin followed by apply
    pub fn scale(
        &self,
        owner: &str,
        kind: TrackKind,
        raw: Vec<Bin>,
        factor: f64,
    ) -> Result<CoverageTrack> {
        let bins = self.rebin(raw)?;
        self.apply(owner, kind, &bins, factor)
    }

    /// Produce the requested track kinds for a sample.  Failure to obtain the raw
    /// coverage fails the whole sample; a missing factor only fails that kind.
    pub fn scale_sample(
        &self,
        binner: &dyn CoverageBinner,
        sample: &Sample,
        table: &ScaleFactorTable,
        kinds: &[TrackKind],
    ) -> Result<Vec<(TrackKind, Result<CoverageTrack>)>> {
        let id = Arc::clone(sample.id());
        let raw = binner
            .raw_coverage(sample, self.bin_size)
            .map_err(|e| e.chain(format!("sample {} -> raw coverage", id)))?;
        debug!("Read {} raw intervals for {}", raw.len(), id);
        let bins = self
            .rebin(raw)
            .map_err(|e| e.chain(format!("sample {} -> raw coverage", id)))?;
        Ok(kinds
            .iter()
            .map(|k| {
                let t = table
                    .track_factor(&id, *k)
                    .and_then(|f| self.apply(&id, *k, &bins, f))
                    .map_err(|e| e.chain(format!("sample {} -> {} track", id, k)));
                (*k, t)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn genome() -> Genome {
        let mut g = Genome::new();
        g.add("chr2", 250).unwrap();
        g.add("chr1", 1000).unwrap();
        g
    }

    fn bin(c: &str, s: usize, e: usize, v: f64) -> Bin {
        Bin::new(&Arc::from(c), s, e, v)
    }

    #[test]
    fn bamcoverage_arguments() {
        let mut b = BamCoverageBinner::new(PathBuf::from("bam"), PathBuf::from("work"));
        b.set_threads(4);
        b.set_extend_reads(false);
        let cmd = b.command(Path::new("bam/A.bam"), Path::new("work/A.raw.bedGraph"), 50);
        let args: Vec<_> = cmd.get_args().map(|s| s.to_string_lossy().into_owned()).collect();
        let p = args.iter().position(|s| s == "-p").unwrap();
        assert_eq!(args[p + 1], "4");
        let p = args.iter().position(|s| s == "--binSize").unwrap();
        assert_eq!(args[p + 1], "50");
        assert!(!args.iter().any(|s| s == "--extendReads"));
    }

    #[test]
    fn fixed_bins_and_exclusion() {
        let g = genome();
        let excl = RegionSet::from_ranges(vec![("chr1", 250, 260)]);
        let sc = CoverageScaler::new(&g, 100, &excl).unwrap();
        let raw = vec![
            bin("chr2", 200, 250, 3.0),
            bin("chr1", 0, 300, 2.0),
            bin("chr1", 350, 400, 4.0),
        ];
        let t = sc.scale("A", TrackKind::Spikein, raw, 10.0).unwrap();
        let got: Vec<_> = t
            .bins()
            .iter()
            .map(|b| (b.chrom.to_string(), b.start, b.end, b.value))
            .collect();
        assert_eq!(
            got,
            vec![
                ("chr1".to_string(), 0, 100, 20.0),
                ("chr1".to_string(), 100, 200, 20.0),
                // 200-300 dropped (exclusion)
                ("chr1".to_string(), 300, 400, 20.0),
                // last chr2 bin truncated at 250
                ("chr2".to_string(), 200, 250, 30.0),
            ]
        );
    }

    #[test]
    fn raw_factor_keeps_values() {
        let g = genome();
        let excl = RegionSet::new();
        let sc = CoverageScaler::new(&g, 50, &excl).unwrap();
        let raw = vec![bin("chr1", 0, 50, 0.1), bin("chr1", 50, 150, 0.7)];
        let t = sc.scale("A", TrackKind::Raw, raw.clone(), 1.0).unwrap();
        assert_eq!(t.len(), 3);
        assert_eq!(t.bins()[0].value, 0.1);
        assert_eq!(t.bins()[2].value, 0.7);
        // chr2 has no signal but is still part of the track
        assert_eq!(t.domain().len(), 2);
        // Deterministic
        let t2 = sc.scale("A", TrackKind::Raw, raw, 1.0).unwrap();
        assert_eq!(t, t2);
    }

    #[test]
    fn invalid_inputs() {
        let g = genome();
        let excl = RegionSet::new();
        assert!(matches!(
            CoverageScaler::new(&g, 0, &excl),
            Err(CoreError::Config(_))
        ));
        let sc = CoverageScaler::new(&g, 10, &excl).unwrap();
        assert!(matches!(
            sc.scale("A", TrackKind::Cpm, vec![bin("chrZ", 0, 10, 1.0)], 1.0),
            Err(CoreError::DataConsistency(_))
        ));
        assert!(matches!(
            sc.scale("A", TrackKind::Cpm, vec![bin("chr2", 0, 300, 1.0)], 1.0),
            Err(CoreError::DataConsistency(_))
        ));
        assert!(matches!(
            sc.scale("A", TrackKind::Cpm, vec![bin("chr2", 0, 10, 1.0)], 0.0),
            Err(CoreError::Normalization(_))
        ));
    }

    #[test]
    fn partial_bins_are_length_weighted() {
        let g = genome();
        let excl = RegionSet::new();
        let sc = CoverageScaler::new(&g, 100, &excl).unwrap();
        let raw = vec![bin("chr1", 0, 25, 4.0), bin("chr1", 25, 50, 0.0), bin("chr1", 50, 100, 2.0)];
        let t = sc.scale("A", TrackKind::Raw, raw, 1.0).unwrap();
        assert_eq!(t.len(), 1);
        assert!((t.bins()[0].value - 2.0).abs() < 1e-12);
    }
}
