//! Conversion of coverage tracks between bedGraph, wiggle and bigWig
//!
//! Text formats are written and read directly.  bigWig goes through a
//! [`TrackEncoder`], which is handed a validated bedGraph file and the
//! chromosome sizes of the genome.

use std::{
    ffi::OsString,
    fmt, fs,
    io::Write,
    path::{Path, PathBuf},
    str::FromStr,
};

use compress_io::compress::CompressIo;

use crate::{
    bedgraph,
    bigwig::TrackEncoder,
    error::{CoreError, Result},
    genome::Genome,
    track::{check_bins, CoverageTrack, TrackKind},
    wiggle,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackFormat {
    BedGraph,
    Wiggle,
    BigWig,
}

impl TrackFormat {
    pub const ALL: [TrackFormat; 3] = [Self::BedGraph, Self::Wiggle, Self::BigWig];

    /// File extension used for output files
    pub fn extension(&self) -> &'static str {
        match self {
            Self::BedGraph => "bedGraph",
            Self::Wiggle => "wig",
            Self::BigWig => "bw",
        }
    }

    /// Guess format from file name, ignoring a trailing compression suffix
    pub fn from_path<P: AsRef<Path>>(p: P) -> Result<Self> {
        let p = p.as_ref();
        let name = p
            .file_name()
            .map(|s| s.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let name = [".gz", ".bz2", ".xz", ".zst"]
            .iter()
            .find_map(|x| name.strip_suffix(x))
            .unwrap_or(name.as_str());
        match name.rsplit_once('.').map(|(_, ext)| ext) {
            Some(ext) => ext.parse().map_err(|e: String| {
                CoreError::Config(format!("{}: {}", p.display(), e))
            }),
            None => Err(CoreError::Config(format!(
                "Can not determine track format of {} (no extension)",
                p.display()
            ))),
        }
    }
}

impl fmt::Display for TrackFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::BedGraph => "bedGraph",
            Self::Wiggle => "wiggle",
            Self::BigWig => "bigWig",
        };
        f.write_str(s)
    }
}

impl FromStr for TrackFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bedgraph" | "bg" | "bdg" => Ok(Self::BedGraph),
            "wig" | "wiggle" => Ok(Self::Wiggle),
            "bw" | "bigwig" => Ok(Self::BigWig),
            _ => Err(format!("Unknown track format {}", s)),
        }
    }
}

/// Path with a suffix appended to the file name
fn sibling(p: &Path, suffix: &str) -> PathBuf {
    let mut s: OsString = p.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

/// Removes a temporary file when dropped
struct TempFile(PathBuf);

impl Drop for TempFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.0) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Could not remove temporary file {}: {}", self.0.display(), e)
            }
        }
    }
}

pub struct TrackFormatConverter<'a> {
    genome: &'a Genome,
    encoder: Option<&'a dyn TrackEncoder>,
}

impl<'a> TrackFormatConverter<'a> {
    pub fn new(genome: &'a Genome) -> Self {
        Self {
            genome,
            encoder: None,
        }
    }

    pub fn with_encoder(genome: &'a Genome, encoder: &'a dyn TrackEncoder) -> Self {
        Self {
            genome,
            encoder: Some(encoder),
        }
    }

    pub fn genome(&self) -> &Genome {
        self.genome
    }

    /// Check sort order, non-overlap and chromosome bounds
    pub fn validate(&self, track: &CoverageTrack) -> Result<()> {
        check_bins(track.bins())
            .map_err(|e| e.chain(format!("track {} ({})", track.owner(), track.kind())))?;
        track.check_bounds(self.genome)
    }

    fn encoder(&self) -> Result<&'a dyn TrackEncoder> {
        self.encoder.ok_or_else(|| {
            CoreError::Config("bigWig conversion requested but no encoder configured".to_string())
        })
    }

    /// Write track to `out` in the given format.  `name` is used for the wiggle track line
    pub fn write(
        &self,
        track: &CoverageTrack,
        format: TrackFormat,
        out: &Path,
        name: &str,
    ) -> Result<()> {
        self.validate(track)?;
        trace!("Writing {} as {}", out.display(), format);
        match format {
            TrackFormat::BedGraph => {
                let mut w = CompressIo::new().path(out).bufwriter()?;
                bedgraph::write_bedgraph(&mut w, track)?;
                w.flush()?
            }
            TrackFormat::Wiggle => {
                let mut w = CompressIo::new().path(out).bufwriter()?;
                wiggle::write_wiggle(&mut w, track, name)?;
                w.flush()?
            }
            TrackFormat::BigWig => {
                let enc = self.encoder()?;
                let bg = TempFile(sibling(out, ".tmp.bedGraph"));
                let sizes = TempFile(sibling(out, ".tmp.chrom.sizes"));
                {
                    let mut w = CompressIo::new().path(&bg.0).bufwriter()?;
                    bedgraph::write_bedgraph(&mut w, track)?;
                    w.flush()?;
                    let mut w = CompressIo::new().path(&sizes.0).bufwriter()?;
                    self.genome.write_sizes(&mut w)?;
                    w.flush()?;
                }
                enc.encode(&bg.0, &sizes.0, out)?
            }
        }
        Ok(())
    }

    /// Read a track, checking it against the genome
    pub fn read(
        &self,
        input: &Path,
        format: TrackFormat,
        owner: &str,
        kind: TrackKind,
    ) -> Result<CoverageTrack> {
        trace!("Reading {} as {}", input.display(), format);
        let track = match format {
            TrackFormat::BedGraph => {
                let mut rdr = CompressIo::new().path(input).bufreader()?;
                bedgraph::read_track(&mut rdr, &input.display().to_string(), owner, kind)?
            }
            TrackFormat::Wiggle => wiggle::read_track_from_file(input, owner, kind)?,
            TrackFormat::BigWig => {
                let enc = self.encoder()?;
                let bg = TempFile(sibling(input, ".tmp.bedGraph"));
                enc.decode(input, &bg.0)?;
                let mut rdr = CompressIo::new().path(&bg.0).bufreader()?;
                bedgraph::read_track(&mut rdr, &input.display().to_string(), owner, kind)?
            }
        };
        self.validate(&track)?;
        track.with_domain(self.genome.chroms().map(|(c, _)| c))
    }

    /// Read `input` and write it to `output`
    pub fn convert(
        &self,
        input: &Path,
        in_format: TrackFormat,
        output: &Path,
        out_format: TrackFormat,
        name: &str,
    ) -> Result<CoverageTrack> {
        let track = self.read(input, in_format, name, TrackKind::Raw)?;
        self.write(&track, out_format, output, name)?;
        debug!(
            "Converted {} ({}) to {} ({}): {} intervals",
            input.display(),
            in_format,
            output.display(),
            out_format,
            track.len()
        );
        Ok(track)
    }
}

/// Output path for a track: <dir>/<owner>/<prefix><owner>.<kind>.<ext>
pub fn output_path(
    dir: &Path,
    prefix: &str,
    owner: &str,
    kind: TrackKind,
    format: TrackFormat,
) -> PathBuf {
    dir.join(owner)
        .join(format!("{}{}.{}.{}", prefix, owner, kind, format.extension()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::Bin;
    use std::{
        io::{BufRead, BufReader},
        sync::{Arc, Mutex},
    };

    fn genome() -> Genome {
        let mut g = Genome::new();
        g.add("chr1", 1000).unwrap();
        g.add("chr2", 500).unwrap();
        g
    }

    fn track() -> CoverageTrack {
        let c1: Arc<str> = Arc::from("chr1");
        let c2: Arc<str> = Arc::from("chr2");
        CoverageTrack::new(
            "A",
            TrackKind::Cpm,
            vec![
                Bin::new(&c1, 0, 50, 0.5),
                Bin::new(&c1, 50, 100, 1.25),
                Bin::new(&c1, 200, 250, 3.0),
                Bin::new(&c2, 450, 500, 2.0),
            ],
        )
        .unwrap()
    }

    /// Encoder storing its input bedGraph and sizes verbatim as the "binary" file
    #[derive(Default)]
    struct CopyEncoder {
        sizes: Mutex<Vec<String>>,
    }

    impl TrackEncoder for CopyEncoder {
        fn encode(&self, bedgraph: &Path, chrom_sizes: &Path, out: &Path) -> Result<()> {
            let rdr = BufReader::new(fs::File::open(chrom_sizes)?);
            let mut v = self.sizes.lock().unwrap();
            for l in rdr.lines() {
                v.push(l?)
            }
            fs::copy(bedgraph, out)?;
            Ok(())
        }

        fn decode(&self, binary: &Path, bedgraph: &Path) -> Result<()> {
            fs::copy(binary, bedgraph)?;
            Ok(())
        }
    }

    #[test]
    fn formats() {
        assert_eq!(TrackFormat::from_path("a/b.bedGraph").unwrap(), TrackFormat::BedGraph);
        assert_eq!(TrackFormat::from_path("b.wig.gz").unwrap(), TrackFormat::Wiggle);
        assert_eq!(TrackFormat::from_path("b.bigWig").unwrap(), TrackFormat::BigWig);
        assert!(TrackFormat::from_path("b.txt").is_err());
        assert!(TrackFormat::from_path("b").is_err());
        assert_eq!(
            output_path(Path::new("out"), "run1_", "G", TrackKind::MeanCpm, TrackFormat::Wiggle),
            Path::new("out/G/run1_G.mean_cpm.wig")
        );
    }

    #[test]
    fn all_formats_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let g = genome();
        let enc = CopyEncoder::default();
        let conv = TrackFormatConverter::with_encoder(&g, &enc);
        let t = track();
        for f in TrackFormat::ALL {
            let p = dir.path().join(format!("A.{}", f.extension()));
            conv.write(&t, f, &p, "A").unwrap();
            let t2 = conv.read(&p, f, "A", TrackKind::Cpm).unwrap();
            assert_eq!(t, t2, "{}", f);
        }
        assert_eq!(
            enc.sizes.lock().unwrap().as_slice(),
            &["chr1\t1000".to_string(), "chr2\t500".to_string()]
        );
        // Temporary files are removed
        let n = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(n, 3);
    }

    #[test]
    fn checks_before_encoding() {
        let dir = tempfile::tempdir().unwrap();
        let mut g = Genome::new();
        g.add("chr1", 1000).unwrap();
        g.add("chr2", 400).unwrap();
        let enc = CopyEncoder::default();
        let conv = TrackFormatConverter::with_encoder(&g, &enc);
        let p = dir.path().join("A.bw");
        assert!(matches!(
            conv.write(&track(), TrackFormat::BigWig, &p, "A"),
            Err(CoreError::DataConsistency(_))
        ));
        assert!(enc.sizes.lock().unwrap().is_empty());
        assert!(!p.exists());

        let g = genome();
        let conv = TrackFormatConverter::new(&g);
        assert!(matches!(
            conv.write(&track(), TrackFormat::BigWig, &p, "A"),
            Err(CoreError::Config(_))
        ));
    }

    #[test]
    fn convert_text_formats() {
        let dir = tempfile::tempdir().unwrap();
        let g = genome();
        let conv = TrackFormatConverter::new(&g);
        let bg = dir.path().join("in.bedGraph");
        fs::write(&bg, "chr1\t0\t50\t0.5\nchr1\t50\t100\t1.25\nchr2\t450\t500\t2\n").unwrap();
        let wig = dir.path().join("out.wig");
        conv.convert(&bg, TrackFormat::BedGraph, &wig, TrackFormat::Wiggle, "in")
            .unwrap();
        let bg2 = dir.path().join("back.bedGraph");
        conv.convert(&wig, TrackFormat::Wiggle, &bg2, TrackFormat::BedGraph, "in")
            .unwrap();
        assert_eq!(
            fs::read_to_string(&bg).unwrap(),
            fs::read_to_string(&bg2).unwrap()
        );
    }
}
