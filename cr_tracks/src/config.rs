use std::path::{Path, PathBuf};

use cr_core::{
    bigwig::TrackEncoder,
    convert::TrackFormat,
    factors::ScaleFactorTable,
    genome::Genome,
    regions::RegionSet,
    sample::{GroupMembership, SampleRegistry},
    scaler::CoverageBinner,
};

pub struct Config {
    registry: SampleRegistry,
    membership: GroupMembership,
    genome: Genome,
    exclusions: RegionSet,
    factors: ScaleFactorTable,
    binner: Box<dyn CoverageBinner>,
    encoder: Option<Box<dyn TrackEncoder>>,
    bin_size: usize,
    output_prefix: String,
    output_dir: PathBuf,
    threads: usize,
}

impl Config {
    pub fn new(
        registry: SampleRegistry,
        genome: Genome,
        factors: ScaleFactorTable,
        binner: Box<dyn CoverageBinner>,
        bin_size: usize,
    ) -> Self {
        let membership = registry.group_membership();
        Self {
            registry,
            membership,
            genome,
            exclusions: RegionSet::new(),
            factors,
            binner,
            encoder: None,
            bin_size,
            output_prefix: String::new(),
            output_dir: PathBuf::from("."),
            threads: 1,
        }
    }

    pub fn set_exclusions(&mut self, r: RegionSet) {
        self.exclusions = r
    }

    pub fn set_encoder(&mut self, e: Box<dyn TrackEncoder>) {
        self.encoder = Some(e)
    }

    pub fn set_output_prefix(&mut self, s: String) {
        self.output_prefix = s
    }

    pub fn set_output_dir(&mut self, d: PathBuf) {
        self.output_dir = d
    }

    pub fn set_threads(&mut self, n: usize) {
        self.threads = n.max(1)
    }

    pub fn registry(&self) -> &SampleRegistry {
        &self.registry
    }

    pub fn membership(&self) -> &GroupMembership {
        &self.membership
    }

    pub fn genome(&self) -> &Genome {
        &self.genome
    }

    pub fn exclusions(&self) -> &RegionSet {
        &self.exclusions
    }

    pub fn factors(&self) -> &ScaleFactorTable {
        &self.factors
    }

    pub fn binner(&self) -> &dyn CoverageBinner {
        self.binner.as_ref()
    }

    pub fn encoder(&self) -> Option<&dyn TrackEncoder> {
        self.encoder.as_deref()
    }

    /// Output formats.  bigWig only if an encoder is available
    pub fn formats(&self) -> Vec<TrackFormat> {
        TrackFormat::ALL
            .iter()
            .copied()
            .filter(|f| *f != TrackFormat::BigWig || self.encoder.is_some())
            .collect()
    }

    pub fn bin_size(&self) -> usize {
        self.bin_size
    }

    pub fn output_prefix(&self) -> &str {
        &self.output_prefix
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// <output_dir>/<prefix>groups.tsv
    pub fn manifest_path(&self) -> PathBuf {
        self.output_dir
            .join(format!("{}groups.tsv", self.output_prefix))
    }
}
