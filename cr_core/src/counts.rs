use std::{
    collections::HashMap,
    io::BufRead,
    path::{Path, PathBuf},
    process::Command,
    sync::Arc,
};

use compress_io::compress::CompressIo;

use crate::{
    error::{CoreError, Result},
    external::run_tool,
    sample::{Sample, SampleId},
    table::Header,
};

/// Read counts for one sample
///
/// primary_reads - mapped reads against the primary genome
/// spikein_reads - mapped reads against the spike-in genome
/// include_region_reads - primary genome reads falling in the include regions
///
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignmentCounts {
    pub sample_id: SampleId,
    pub primary_reads: u64,
    pub spikein_reads: u64,
    pub include_region_reads: u64,
}

/// Supplier of alignment counts.  Implementations must be usable from several
/// worker threads at once
pub trait AlignmentCounter: Sync + Send {
    fn count(&self, sample: &Sample) -> Result<AlignmentCounts>;
}

/// Counts taken from a precomputed table with columns
/// sample, primary_reads, spikein_reads, include_region_reads
pub struct CountTableCounter {
    counts: HashMap<SampleId, AlignmentCounts>,
}

impl CountTableCounter {
    pub fn from_reader<R: BufRead>(rdr: &mut R, name: &str) -> Result<Self> {
        let hdr = Header::read(
            rdr,
            name,
            &[
                "sample",
                "primary_reads",
                "spikein_reads",
                "include_region_reads",
            ],
        )?;
        let mut buf = String::new();
        let mut line = 1;
        let mut counts = HashMap::new();
        while let Some(fields) = hdr.next_record(rdr, &mut buf)? {
            line += 1;
            let sample_id: SampleId = Arc::from(hdr.get(&fields, "sample", line)?);
            if counts.contains_key(&sample_id) {
                return Err(CoreError::DataConsistency(format!(
                    "{}:{} Duplicate entry for sample {}",
                    name, line, sample_id
                )));
            }
            let c = AlignmentCounts {
                sample_id: Arc::clone(&sample_id),
                primary_reads: hdr.parse(&fields, "primary_reads", line)?,
                spikein_reads: hdr.parse(&fields, "spikein_reads", line)?,
                include_region_reads: hdr.parse(&fields, "include_region_reads", line)?,
            };
            counts.insert(sample_id, c);
        }
        debug!("Read counts for {} samples from {}", counts.len(), name);
        Ok(Self { counts })
    }

    pub fn from_file<P: AsRef<Path>>(p: P) -> Result<Self> {
        let p = p.as_ref();
        debug!("Reading in count table from {}", p.display());
        let mut rdr = CompressIo::new().path(p).bufreader()?;
        Self::from_reader(&mut rdr, &p.display().to_string())
    }
}

impl AlignmentCounter for CountTableCounter {
    fn count(&self, sample: &Sample) -> Result<AlignmentCounts> {
        self.counts.get(sample.id()).cloned().ok_or_else(|| {
            CoreError::DataConsistency(format!(
                "No entry for sample {} in count table",
                sample.id()
            ))
        })
    }
}

/// Counts mapped reads with `samtools view -c -F 4`
///
/// Alignments are expected at <primary_dir>/<sample>.bam and <spikein_dir>/<sample>.bam.
/// The include region count is taken from the primary alignments restricted with -L
pub struct SamtoolsCounter {
    samtools: PathBuf,
    primary_dir: PathBuf,
    spikein_dir: PathBuf,
    include_regions: PathBuf,
    threads: usize,
}

impl SamtoolsCounter {
    pub fn new(primary_dir: PathBuf, spikein_dir: PathBuf, include_regions: PathBuf) -> Self {
        Self {
            samtools: PathBuf::from("samtools"),
            primary_dir,
            spikein_dir,
            include_regions,
            threads: 1,
        }
    }

    pub fn set_samtools<P: AsRef<Path>>(&mut self, p: P) {
        self.samtools = p.as_ref().to_owned()
    }

    /// Extra decompression threads per samtools call
    pub fn set_threads(&mut self, n: usize) {
        self.threads = n.max(1)
    }

    fn bam_path(dir: &Path, sample: &Sample) -> PathBuf {
        dir.join(format!("{}.bam", sample.id()))
    }

    fn command(&self, bam: &Path, regions: Option<&Path>) -> Command {
        let mut cmd = Command::new(&self.samtools);
        cmd.args(["view", "-c", "-F", "4", "-@"])
            .arg(self.threads.to_string());
        if let Some(r) = regions {
            cmd.arg("-L").arg(r);
        }
        cmd.arg(bam);
        cmd
    }

    fn count_mapped(&self, bam: &Path, regions: Option<&Path>) -> Result<u64> {
        let out = run_tool(&mut self.command(bam, regions))?;
        out.trim().parse::<u64>().map_err(|e| {
            CoreError::Parse(format!(
                "Could not read count '{}' for {}: {}",
                out.trim(),
                bam.display(),
                e
            ))
        })
    }
}

impl AlignmentCounter for SamtoolsCounter {
    fn count(&self, sample: &Sample) -> Result<AlignmentCounts> {
        let primary = Self::bam_path(&self.primary_dir, sample);
        let spikein = Self::bam_path(&self.spikein_dir, sample);
        for p in [&primary, &spikein] {
            if !p.is_file() {
                return Err(CoreError::DataConsistency(format!(
                    "Alignment file {} not found for sample {}",
                    p.display(),
                    sample.id()
                )));
            }
        }
        let c = AlignmentCounts {
            sample_id: Arc::clone(sample.id()),
            primary_reads: self.count_mapped(&primary, None)?,
            spikein_reads: self.count_mapped(&spikein, None)?,
            include_region_reads: self.count_mapped(&primary, Some(self.include_regions.as_path()))?,
        };
        debug!("Counts for {}: {:?}", sample.id(), c);
        Ok(c)
    }
}

/// Sample name from an alignment path: file name with any trailing .bam removed
pub fn sample_name_from_bam<P: AsRef<Path>>(p: P) -> Option<String> {
    p.as_ref()
        .file_name()
        .and_then(|s| s.to_str())
        .map(|s| s.strip_suffix(".bam").unwrap_or(s).to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn samtools_arguments() {
        let mut ctr = SamtoolsCounter::new(
            PathBuf::from("primary"),
            PathBuf::from("spikein"),
            PathBuf::from("include.bed"),
        );
        ctr.set_threads(3);
        let cmd = ctr.command(Path::new("primary/A.bam"), Some(Path::new("include.bed")));
        let args: Vec<_> = cmd.get_args().map(|s| s.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            vec!["view", "-c", "-F", "4", "-@", "3", "-L", "include.bed", "primary/A.bam"]
        );
    }

    #[test]
    fn count_table() {
        let t = "sample\tprimary_reads\tspikein_reads\tinclude_region_reads\n\
                 A\t1000000\t10000\t800000\n";
        let ctr = CountTableCounter::from_reader(&mut Cursor::new(t), "counts").unwrap();
        let a = Sample::new("A", "a1", "a2", None);
        let c = ctr.count(&a).unwrap();
        assert_eq!(c.primary_reads, 1_000_000);
        assert_eq!(c.spikein_reads, 10_000);
        assert_eq!(c.include_region_reads, 800_000);
        let b = Sample::new("B", "b1", "b2", None);
        assert!(matches!(ctr.count(&b), Err(CoreError::DataConsistency(_))));
    }

    #[test]
    fn count_table_errors() {
        let t = "sample,primary_reads,spikein_reads,include_region_reads\nA,-5,1,1\n";
        assert!(matches!(
            CountTableCounter::from_reader(&mut Cursor::new(t), "counts"),
            Err(CoreError::Parse(_))
        ));
        let t = "sample,primary_reads,spikein_reads\nA,5,1\n";
        assert!(matches!(
            CountTableCounter::from_reader(&mut Cursor::new(t), "counts"),
            Err(CoreError::Parse(_))
        ));
    }

    #[test]
    fn bam_names() {
        assert_eq!(
            sample_name_from_bam("out/dmel/SampleA.bam").as_deref(),
            Some("SampleA")
        );
        assert_eq!(sample_name_from_bam("x.sorted").as_deref(), Some("x.sorted"));
    }

    #[test]
    fn missing_bam() {
        let ctr = SamtoolsCounter::new(
            PathBuf::from("/nonexistent/primary"),
            PathBuf::from("/nonexistent/spikein"),
            PathBuf::from("include.bed"),
        );
        let a = Sample::new("A", "a1", "a2", None);
        assert!(matches!(ctr.count(&a), Err(CoreError::DataConsistency(_))));
    }
}
