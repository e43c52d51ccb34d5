use std::path::{Path, PathBuf};

use cr_core::{bigwig::BigWigTools, convert::TrackFormat, genome::Genome};

pub struct Config {
    input: PathBuf,
    input_format: TrackFormat,
    output: PathBuf,
    output_format: TrackFormat,
    genome: Genome,
    tools: BigWigTools,
    name: String,
    coalesce: bool,
}

impl Config {
    pub fn new(
        input: PathBuf,
        input_format: TrackFormat,
        output: PathBuf,
        output_format: TrackFormat,
        genome: Genome,
    ) -> Self {
        let name = track_name(&output);
        Self {
            input,
            input_format,
            output,
            output_format,
            genome,
            tools: BigWigTools::new(),
            name,
            coalesce: false,
        }
    }

    pub fn set_tools(&mut self, t: BigWigTools) {
        self.tools = t
    }

    pub fn set_name(&mut self, s: String) {
        self.name = s
    }

    pub fn set_coalesce(&mut self, x: bool) {
        self.coalesce = x
    }

    pub fn input(&self) -> &Path {
        &self.input
    }

    pub fn input_format(&self) -> TrackFormat {
        self.input_format
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    pub fn output_format(&self) -> TrackFormat {
        self.output_format
    }

    pub fn genome(&self) -> &Genome {
        &self.genome
    }

    pub fn tools(&self) -> &BigWigTools {
        &self.tools
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn coalesce(&self) -> bool {
        self.coalesce
    }
}

/// Default track name: output file name up to the first '.'
fn track_name(p: &Path) -> String {
    p.file_name()
        .and_then(|s| s.to_str())
        .and_then(|s| s.split('.').next())
        .filter(|s| !s.is_empty())
        .unwrap_or("track")
        .to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_name() {
        assert_eq!(track_name(Path::new("out/G.mean_cpm.wig")), "G");
        assert_eq!(track_name(Path::new("A.bedGraph.gz")), "A");
        assert_eq!(track_name(Path::new(".wig")), "track");
    }
}
