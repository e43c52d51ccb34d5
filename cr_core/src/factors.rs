//! Spike-in and CPM scale factors
//!
//! All factors for a run are computed together and published as a single
//! [`ScaleFactorTable`].  The table is never patched: changed counts mean a new
//! table.  A sample whose counts make a factor undefined keeps a failure entry
//! in the table so that every consumer of that factor fails with the reason,
//! while the other samples are unaffected.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    io::{BufRead, Write},
    path::Path,
    sync::Arc,
};

use compress_io::compress::CompressIo;

use crate::{
    counts::AlignmentCounts,
    error::{CoreError, Result},
    sample::{SampleId, SampleRegistry},
    table::Header,
    track::TrackKind,
};

/// Target total for counts per million scaling
pub const CPM_TOTAL: f64 = 1_000_000.0;

pub const SPIKEIN_COLUMNS: [&str; 5] = [
    "sample",
    "primary_reads",
    "spikein_reads",
    "spikein_factor",
    "inverse_spikein_factor",
];

pub const CPM_COLUMNS: [&str; 3] = ["sample", "total_reads_in_include_region", "cpm_scale_factor"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScaleFactorKind {
    Spikein,
    InverseSpikein,
    Cpm,
}

impl ScaleFactorKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Spikein => "spikein",
            Self::InverseSpikein => "inverse_spikein",
            Self::Cpm => "cpm",
        }
    }

    /// Factor used to scale a track of the given kind.  Raw tracks are unscaled
    pub fn for_track(kind: TrackKind) -> Option<Self> {
        match kind {
            TrackKind::Spikein | TrackKind::MeanSpikein => Some(Self::InverseSpikein),
            TrackKind::Cpm | TrackKind::MeanCpm => Some(Self::Cpm),
            TrackKind::Raw => None,
        }
    }
}

impl fmt::Display for ScaleFactorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single derived factor
#[derive(Debug, Clone, PartialEq)]
pub struct ScaleFactor {
    pub sample_id: SampleId,
    pub kind: ScaleFactorKind,
    pub value: f64,
}

fn check_factor(x: f64, what: &str) -> Result<f64> {
    if x.is_finite() && x > 0.0 {
        Ok(x)
    } else {
        Err(CoreError::Normalization(format!(
            "{} factor {} is not a finite positive number",
            what, x
        )))
    }
}

/// spikein_reads / primary_reads
pub fn spikein_factor(c: &AlignmentCounts) -> Result<f64> {
    if c.primary_reads == 0 {
        Err(CoreError::Normalization(format!(
            "sample {} has no primary genome reads; spike-in factor undefined",
            c.sample_id
        )))
    } else {
        check_factor(
            c.spikein_reads as f64 / c.primary_reads as f64,
            "spike-in",
        )
        .map_err(|_| {
            CoreError::Normalization(format!(
                "sample {} has no spike-in reads; spike-in factor is zero",
                c.sample_id
            ))
        })
    }
}

/// 1 / spikein_factor, i.e., primary_reads / spikein_reads
pub fn inverse_spikein_factor(c: &AlignmentCounts) -> Result<f64> {
    if c.spikein_reads == 0 {
        Err(CoreError::Normalization(format!(
            "sample {} has no spike-in reads; inverse spike-in factor undefined (division by zero)",
            c.sample_id
        )))
    } else {
        let sf = spikein_factor(c)?;
        check_factor(1.0 / sf, "inverse spike-in")
    }
}

/// 1,000,000 / include_region_reads
pub fn cpm_factor(c: &AlignmentCounts) -> Result<f64> {
    if c.include_region_reads == 0 {
        Err(CoreError::Normalization(format!(
            "sample {} has no reads in include regions; CPM factor undefined",
            c.sample_id
        )))
    } else {
        check_factor(CPM_TOTAL / c.include_region_reads as f64, "CPM")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpikeinRow {
    pub primary_reads: u64,
    pub spikein_reads: u64,
    pub spikein_factor: f64,
    pub inverse_spikein_factor: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CpmRow {
    pub include_region_reads: u64,
    pub cpm_factor: f64,
}

/// Per sample entry: either the factor row or the reason it could not be produced
type Entry<T> = std::result::Result<T, String>;

fn reason(e: CoreError) -> String {
    match e {
        CoreError::Normalization(s) => s,
        e => e.to_string(),
    }
}

/// ScaleFactorTable
///
/// Immutable snapshot of all factors for a run.  Rows are keyed and sorted by sample id.
/// The version is a digest of the published table content.
///
#[derive(Debug, Clone)]
pub struct ScaleFactorTable {
    spikein: BTreeMap<SampleId, Entry<SpikeinRow>>,
    cpm: BTreeMap<SampleId, Entry<CpmRow>>,
    version: String,
}

/// ScaleFactorCalculator
///
/// Turns the counts for every sample of a registry into a ScaleFactorTable
///
pub struct ScaleFactorCalculator<'a> {
    registry: &'a SampleRegistry,
}

impl<'a> ScaleFactorCalculator<'a> {
    pub fn new(registry: &'a SampleRegistry) -> Self {
        Self { registry }
    }

    /// Compute all factors.  Counts must be present for every sample in the
    /// registry and only for those samples
    pub fn compute(&self, counts: &[AlignmentCounts]) -> Result<ScaleFactorTable> {
        let mut h: HashMap<&str, &AlignmentCounts> = HashMap::with_capacity(counts.len());
        for c in counts.iter() {
            self.registry
                .get(&c.sample_id)
                .map_err(|e| e.chain("scale factor table"))?;
            if h.insert(c.sample_id.as_ref(), c).is_some() {
                return Err(CoreError::DataConsistency(format!(
                    "Counts supplied twice for sample {}",
                    c.sample_id
                )));
            }
        }
        let missing: Vec<&str> = self
            .registry
            .samples()
            .iter()
            .map(|s| s.id().as_ref())
            .filter(|id| !h.contains_key(id))
            .collect();
        if !missing.is_empty() {
            return Err(CoreError::Config(format!(
                "Scale factor table requested before counts are available for sample(s): {}",
                missing.join(", ")
            )));
        }

        let mut spikein = BTreeMap::new();
        let mut cpm = BTreeMap::new();
        for s in self.registry.samples() {
            let c = h[&**s.id()];
            let sp = spikein_factor(c).and_then(|sf| {
                inverse_spikein_factor(c).map(|isf| SpikeinRow {
                    primary_reads: c.primary_reads,
                    spikein_reads: c.spikein_reads,
                    spikein_factor: sf,
                    inverse_spikein_factor: isf,
                })
            });
            let cp = cpm_factor(c).map(|f| CpmRow {
                include_region_reads: c.include_region_reads,
                cpm_factor: f,
            });
            if let Err(e) = sp.as_ref() {
                warn!("{}", e)
            }
            if let Err(e) = cp.as_ref() {
                warn!("{}", e)
            }
            spikein.insert(Arc::clone(s.id()), sp.map_err(reason));
            cpm.insert(Arc::clone(s.id()), cp.map_err(reason));
        }
        let table = ScaleFactorTable::from_entries(spikein, cpm)?;
        info!(
            "Scale factor table computed for {} samples; version {}",
            self.registry.len(),
            table.version()
        );
        Ok(table)
    }
}

impl ScaleFactorTable {
    fn from_entries(
        spikein: BTreeMap<SampleId, Entry<SpikeinRow>>,
        cpm: BTreeMap<SampleId, Entry<CpmRow>>,
    ) -> Result<Self> {
        let mut t = Self {
            spikein,
            cpm,
            version: String::new(),
        };
        let mut hasher = blake3::Hasher::new();
        let mut buf = Vec::new();
        t.write_spikein_table(&mut buf)?;
        t.write_cpm_table(&mut buf)?;
        hasher.update(&buf);
        t.version = hasher.finalize().to_hex().as_str()[..16].to_string();
        Ok(t)
    }

    /// Digest of the table content
    pub fn version(&self) -> &str {
        &self.version
    }

    /// All samples known to the table (including failed ones)
    pub fn samples(&self) -> impl Iterator<Item = &SampleId> {
        let mut v: Vec<_> = self.spikein.keys().chain(self.cpm.keys()).collect();
        v.sort_unstable();
        v.dedup();
        v.into_iter()
    }

    pub fn contains(&self, sample: &str) -> bool {
        self.spikein.contains_key(sample) || self.cpm.contains_key(sample)
    }

    /// Look up one factor.  Absent samples and failed factors are errors
    pub fn factor(&self, sample: &str, kind: ScaleFactorKind) -> Result<f64> {
        let absent = || {
            CoreError::DataConsistency(format!(
                "Sample {} not found in {} factor table",
                sample, kind
            ))
        };
        let failed = |e: &String| {
            CoreError::Normalization(format!("sample {} -> {} factor: {}", sample, kind, e))
        };
        match kind {
            ScaleFactorKind::Spikein | ScaleFactorKind::InverseSpikein => {
                let row = self
                    .spikein
                    .get(sample)
                    .ok_or_else(absent)?
                    .as_ref()
                    .map_err(failed)?;
                Ok(if kind == ScaleFactorKind::Spikein {
                    row.spikein_factor
                } else {
                    row.inverse_spikein_factor
                })
            }
            ScaleFactorKind::Cpm => self
                .cpm
                .get(sample)
                .ok_or_else(absent)?
                .as_ref()
                .map(|r| r.cpm_factor)
                .map_err(failed),
        }
    }

    /// Multiplier for a sample track of the given kind.  Raw tracks are unscaled
    /// and do not need an entry in the table
    pub fn track_factor(&self, sample: &str, kind: TrackKind) -> Result<f64> {
        match ScaleFactorKind::for_track(kind) {
            Some(k) => self.factor(sample, k),
            None => Ok(1.0),
        }
    }

    /// All successfully computed factors
    pub fn factors(&self) -> Vec<ScaleFactor> {
        let mut v = Vec::new();
        for (s, r) in self.spikein.iter() {
            if let Ok(r) = r {
                v.push(ScaleFactor {
                    sample_id: Arc::clone(s),
                    kind: ScaleFactorKind::Spikein,
                    value: r.spikein_factor,
                });
                v.push(ScaleFactor {
                    sample_id: Arc::clone(s),
                    kind: ScaleFactorKind::InverseSpikein,
                    value: r.inverse_spikein_factor,
                });
            }
        }
        for (s, r) in self.cpm.iter() {
            if let Ok(r) = r {
                v.push(ScaleFactor {
                    sample_id: Arc::clone(s),
                    kind: ScaleFactorKind::Cpm,
                    value: r.cpm_factor,
                });
            }
        }
        v
    }

    /// (sample, factor kind, reason) for every factor that could not be computed
    pub fn failures(&self) -> Vec<(SampleId, ScaleFactorKind, String)> {
        let sp = self.spikein.iter().filter_map(|(s, r)| {
            r.as_ref()
                .err()
                .map(|e| (Arc::clone(s), ScaleFactorKind::InverseSpikein, e.clone()))
        });
        let cp = self.cpm.iter().filter_map(|(s, r)| {
            r.as_ref()
                .err()
                .map(|e| (Arc::clone(s), ScaleFactorKind::Cpm, e.clone()))
        });
        sp.chain(cp).collect()
    }

    pub fn spikein_row(&self, sample: &str) -> Option<&SpikeinRow> {
        self.spikein.get(sample).and_then(|r| r.as_ref().ok())
    }

    pub fn cpm_row(&self, sample: &str) -> Option<&CpmRow> {
        self.cpm.get(sample).and_then(|r| r.as_ref().ok())
    }

    /// Write spike-in factor table (CSV).  Failed samples are omitted
    pub fn write_spikein_table<W: Write>(&self, w: &mut W) -> Result<()> {
        writeln!(w, "{}", SPIKEIN_COLUMNS.join(","))?;
        for (s, r) in self.spikein.iter() {
            if let Ok(r) = r {
                writeln!(
                    w,
                    "{},{},{},{},{}",
                    s, r.primary_reads, r.spikein_reads, r.spikein_factor, r.inverse_spikein_factor
                )?
            }
        }
        Ok(())
    }

    /// Write CPM factor table (CSV).  Failed samples are omitted
    pub fn write_cpm_table<W: Write>(&self, w: &mut W) -> Result<()> {
        writeln!(w, "{}", CPM_COLUMNS.join(","))?;
        for (s, r) in self.cpm.iter() {
            if let Ok(r) = r {
                writeln!(w, "{},{},{}", s, r.include_region_reads, r.cpm_factor)?
            }
        }
        Ok(())
    }

    /// Rebuild a table from the spike-in and CPM table files written by a previous step
    pub fn from_readers<R1: BufRead, R2: BufRead>(
        spikein_rdr: &mut R1,
        spikein_name: &str,
        cpm_rdr: &mut R2,
        cpm_name: &str,
    ) -> Result<Self> {
        let mut spikein = BTreeMap::new();
        let hdr = Header::read(spikein_rdr, spikein_name, &SPIKEIN_COLUMNS)?;
        let mut buf = String::new();
        let mut line = 1;
        while let Some(f) = hdr.next_record(spikein_rdr, &mut buf)? {
            line += 1;
            let s = hdr.get(&f, "sample", line)?;
            let row = SpikeinRow {
                primary_reads: hdr.parse(&f, "primary_reads", line)?,
                spikein_reads: hdr.parse(&f, "spikein_reads", line)?,
                spikein_factor: hdr.parse(&f, "spikein_factor", line)?,
                inverse_spikein_factor: hdr.parse(&f, "inverse_spikein_factor", line)?,
            };
            for (x, what) in [
                (row.spikein_factor, "spike-in"),
                (row.inverse_spikein_factor, "inverse spike-in"),
            ] {
                check_factor(x, what).map_err(|e| {
                    CoreError::Parse(format!("{}:{} {}", spikein_name, line, e))
                })?;
            }
            if spikein.insert(Arc::from(s), Ok(row)).is_some() {
                return Err(CoreError::DataConsistency(format!(
                    "{}:{} Duplicate entry for sample {}",
                    spikein_name, line, s
                )));
            }
        }

        let mut cpm = BTreeMap::new();
        let hdr = Header::read(cpm_rdr, cpm_name, &CPM_COLUMNS)?;
        let mut line = 1;
        while let Some(f) = hdr.next_record(cpm_rdr, &mut buf)? {
            line += 1;
            let s = hdr.get(&f, "sample", line)?;
            let row = CpmRow {
                include_region_reads: hdr.parse(&f, "total_reads_in_include_region", line)?,
                cpm_factor: hdr.parse(&f, "cpm_scale_factor", line)?,
            };
            check_factor(row.cpm_factor, "CPM")
                .map_err(|e| CoreError::Parse(format!("{}:{} {}", cpm_name, line, e)))?;
            if cpm.insert(Arc::from(s), Ok(row)).is_some() {
                return Err(CoreError::DataConsistency(format!(
                    "{}:{} Duplicate entry for sample {}",
                    cpm_name, line, s
                )));
            }
        }
        let t = Self::from_entries(spikein, cpm)?;
        debug!(
            "Read factors for {} samples (version {})",
            t.samples().count(),
            t.version()
        );
        Ok(t)
    }

    pub fn from_files<P: AsRef<Path>>(spikein: P, cpm: P) -> Result<Self> {
        let (p1, p2) = (spikein.as_ref(), cpm.as_ref());
        debug!(
            "Reading scale factors from {} and {}",
            p1.display(),
            p2.display()
        );
        let mut r1 = CompressIo::new().path(p1).bufreader()?;
        let mut r2 = CompressIo::new().path(p2).bufreader()?;
        Self::from_readers(
            &mut r1,
            &p1.display().to_string(),
            &mut r2,
            &p2.display().to_string(),
        )
    }

    /// Samples of the registry without an entry in either table
    pub fn uncovered<'r>(&self, registry: &'r SampleRegistry) -> Vec<&'r SampleId> {
        registry
            .samples()
            .iter()
            .map(|s| s.id())
            .filter(|id| !self.contains(id))
            .collect()
    }
}
