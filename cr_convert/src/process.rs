use anyhow::Context;

use cr_core::{convert::TrackFormatConverter, track::TrackKind};

use crate::config::Config;

pub fn convert_track(cfg: &Config) -> anyhow::Result<()> {
    let conv = TrackFormatConverter::with_encoder(cfg.genome(), cfg.tools());
    let (input, output) = (cfg.input(), cfg.output());
    let track = if cfg.coalesce() {
        let t = conv
            .read(input, cfg.input_format(), cfg.name(), TrackKind::Raw)
            .with_context(|| format!("Could not read track from {}", input.display()))?
            .coalesce();
        conv.write(&t, cfg.output_format(), output, cfg.name())
            .with_context(|| format!("Could not write track to {}", output.display()))?;
        t
    } else {
        conv.convert(
            input,
            cfg.input_format(),
            output,
            cfg.output_format(),
            cfg.name(),
        )
        .with_context(|| {
            format!(
                "Conversion of {} to {} failed",
                input.display(),
                output.display()
            )
        })?
    };
    info!(
        "Wrote {} intervals over {} chromosomes to {}",
        track.len(),
        track.chroms().len(),
        output.display()
    );
    Ok(())
}
