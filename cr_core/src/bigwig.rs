use std::{
    path::{Path, PathBuf},
    process::Command,
};

use crate::{
    error::{CoreError, Result},
    external::run_tool,
};

/// Binary indexed track codec.
///
/// `encode` receives a sorted, non-overlapping bedGraph file and a matching
/// chromosome sizes file; `decode` writes the intervals of a binary track as bedGraph.
pub trait TrackEncoder: Sync + Send {
    fn encode(&self, bedgraph: &Path, chrom_sizes: &Path, out: &Path) -> Result<()>;
    fn decode(&self, binary: &Path, bedgraph: &Path) -> Result<()>;
}

/// bigWig codec using the UCSC bedGraphToBigWig and bigWigToBedGraph utilities
pub struct BigWigTools {
    to_bigwig: PathBuf,
    from_bigwig: PathBuf,
}

impl Default for BigWigTools {
    fn default() -> Self {
        Self {
            to_bigwig: PathBuf::from("bedGraphToBigWig"),
            from_bigwig: PathBuf::from("bigWigToBedGraph"),
        }
    }
}

impl BigWigTools {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_encoder<P: AsRef<Path>>(&mut self, p: P) {
        self.to_bigwig = p.as_ref().to_owned()
    }

    pub fn set_decoder<P: AsRef<Path>>(&mut self, p: P) {
        self.from_bigwig = p.as_ref().to_owned()
    }
}

fn check_input(p: &Path) -> Result<()> {
    if p.is_file() {
        Ok(())
    } else {
        Err(CoreError::Config(format!(
            "Input file {} does not exist",
            p.display()
        )))
    }
}

impl TrackEncoder for BigWigTools {
    fn encode(&self, bedgraph: &Path, chrom_sizes: &Path, out: &Path) -> Result<()> {
        check_input(bedgraph)?;
        check_input(chrom_sizes)?;
        run_tool(
            Command::new(&self.to_bigwig)
                .arg(bedgraph)
                .arg(chrom_sizes)
                .arg(out),
        )
        .map_err(|e| e.chain(format!("encoding {}", out.display())))?;
        debug!("Wrote {}", out.display());
        Ok(())
    }

    fn decode(&self, binary: &Path, bedgraph: &Path) -> Result<()> {
        check_input(binary)?;
        run_tool(Command::new(&self.from_bigwig).arg(binary).arg(bedgraph))
            .map_err(|e| e.chain(format!("decoding {}", binary.display())))?;
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn tool_failures() {
        let dir = tempfile::tempdir().unwrap();
        let bg = dir.path().join("a.bedGraph");
        let sizes = dir.path().join("chrom.sizes");
        let out = dir.path().join("a.bw");
        let mut tools = BigWigTools::new();
        tools.set_encoder("/nonexistent/bedGraphToBigWig");
        // Missing input is reported before the tool is run
        assert!(matches!(
            tools.encode(&bg, &sizes, &out),
            Err(CoreError::Config(_))
        ));
        fs::write(&bg, "chr1\t0\t10\t1\n").unwrap();
        fs::write(&sizes, "chr1\t100\n").unwrap();
        assert!(matches!(
            tools.encode(&bg, &sizes, &out),
            Err(CoreError::External(_))
        ));
    }
}
