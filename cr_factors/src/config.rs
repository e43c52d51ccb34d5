use std::path::{Path, PathBuf};

use cr_core::{counts::AlignmentCounter, sample::SampleRegistry};

pub struct Config {
    registry: SampleRegistry,
    counter: Box<dyn AlignmentCounter>,
    bam_dir: Option<PathBuf>,
    output_prefix: String,
    output_dir: Option<PathBuf>,
    threads: usize,
}

impl Config {
    pub fn new(
        registry: SampleRegistry,
        counter: Box<dyn AlignmentCounter>,
        output_prefix: String,
    ) -> Self {
        Self {
            registry,
            counter,
            bam_dir: None,
            output_prefix,
            output_dir: None,
            threads: 1,
        }
    }

    pub fn set_output_dir(&mut self, d: PathBuf) {
        self.output_dir = Some(d)
    }

    /// Directory with primary alignments (used to check for unmatched BAM files)
    pub fn set_bam_dir(&mut self, d: PathBuf) {
        self.bam_dir = Some(d)
    }

    pub fn set_threads(&mut self, n: usize) {
        self.threads = n.max(1)
    }

    pub fn registry(&self) -> &SampleRegistry {
        &self.registry
    }

    pub fn counter(&self) -> &dyn AlignmentCounter {
        self.counter.as_ref()
    }

    pub fn bam_dir(&self) -> Option<&Path> {
        self.bam_dir.as_deref()
    }

    pub fn output_dir(&self) -> Option<&Path> {
        self.output_dir.as_deref()
    }

    pub fn output_prefix(&self) -> &str {
        &self.output_prefix
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Output path for a file name, adding prefix and output directory
    pub fn output_path(&self, name: &str) -> PathBuf {
        let fname = format!("{}{}", self.output_prefix, name);
        match self.output_dir.as_ref() {
            Some(d) => d.join(fname),
            None => PathBuf::from(fname),
        }
    }
}
