use std::{fs, io::Write, path::Path, thread};

use anyhow::Context;
use compress_io::compress::CompressIo;
use crossbeam_channel::{bounded, Receiver, Sender};

use cr_core::{
    counts::{sample_name_from_bam, AlignmentCounter, AlignmentCounts},
    factors::{ScaleFactorCalculator, ScaleFactorTable},
    sample::{Sample, SampleRegistry},
};

use crate::config::Config;

pub const SPIKEIN_TABLE: &str = "spikein_factors.csv";
pub const CPM_TABLE: &str = "cpm_factors.csv";

/// Warn about alignment files that do not belong to any sample in the sheet
fn check_bam_dir(registry: &SampleRegistry, dir: &Path) -> anyhow::Result<()> {
    let rd = fs::read_dir(dir)
        .with_context(|| format!("Could not read alignment directory {}", dir.display()))?;
    for e in rd {
        let p = e?.path();
        if p.extension().map(|x| x == "bam").unwrap_or(false) {
            if let Some(name) = sample_name_from_bam(&p) {
                if !registry.contains(&name) {
                    warn!(
                        "Alignment file {} does not match any sample in the sample sheet",
                        p.display()
                    )
                }
            }
        }
    }
    Ok(())
}

fn count_task(
    counter: &dyn AlignmentCounter,
    samples: &[Sample],
    ix: usize,
    recv: Receiver<usize>,
    snd: Sender<(usize, cr_core::Result<AlignmentCounts>)>,
) {
    debug!("Count task {} starting up", ix);
    for i in recv.iter() {
        trace!("Count task {} processing sample {}", ix, samples[i].id());
        let res = counter.count(&samples[i]);
        if snd.send((i, res)).is_err() {
            break;
        }
    }
    debug!("Count task {} closing down", ix);
}

/// Collect counts for every sample using nt worker threads.  Results are
/// returned in sample sheet order
pub fn collect_counts(
    counter: &dyn AlignmentCounter,
    samples: &[Sample],
    nt: usize,
) -> Vec<cr_core::Result<AlignmentCounts>> {
    let n = samples.len();
    let nt = nt.min(n).max(1);
    let mut res: Vec<Option<cr_core::Result<AlignmentCounts>>> = (0..n).map(|_| None).collect();
    thread::scope(|sc| {
        let (send_job, recv_job) = bounded(nt * 4);
        let (send_res, recv_res) = bounded(nt * 4);
        for ix in 0..nt {
            let r = recv_job.clone();
            let s = send_res.clone();
            sc.spawn(move || count_task(counter, samples, ix + 1, r, s));
        }
        drop(send_res);
        drop(recv_job);
        sc.spawn(move || {
            for i in 0..n {
                if send_job.send(i).is_err() {
                    break;
                }
            }
        });
        for (i, r) in recv_res.iter() {
            res[i] = Some(r)
        }
    });
    res.into_iter()
        .enumerate()
        .map(|(i, r)| {
            r.unwrap_or_else(|| {
                Err(cr_core::CoreError::External(format!(
                    "No counts returned for sample {}",
                    samples[i].id()
                )))
            })
        })
        .collect()
}

pub fn write_tables(table: &ScaleFactorTable, spikein: &Path, cpm: &Path) -> anyhow::Result<()> {
    let mut wrt = CompressIo::new()
        .path(spikein)
        .bufwriter()
        .with_context(|| format!("Could not open {} for output", spikein.display()))?;
    table.write_spikein_table(&mut wrt)?;
    wrt.flush()?;
    let mut wrt = CompressIo::new()
        .path(cpm)
        .bufwriter()
        .with_context(|| format!("Could not open {} for output", cpm.display()))?;
    table.write_cpm_table(&mut wrt)?;
    wrt.flush()?;
    Ok(())
}

/// Strategy
///
/// Counts are collected for all samples in parallel.  Only when every sample has
/// counts is the factor table calculated and written.  Samples whose factors are
/// undefined are left out of the tables and reported, after which we exit with an error
pub fn calc_factors(cfg: &Config) -> anyhow::Result<()> {
    debug!("Starting processing");
    let registry = cfg.registry();
    if let Some(d) = cfg.bam_dir() {
        check_bam_dir(registry, d)?
    }

    let mut counts = Vec::with_capacity(registry.len());
    let mut n_failed = 0;
    for (s, r) in registry
        .samples()
        .iter()
        .zip(collect_counts(cfg.counter(), registry.samples(), cfg.threads()))
    {
        match r {
            Ok(c) => counts.push(c),
            Err(e) => {
                error!("Could not obtain counts for sample {}: {}", s.id(), e);
                n_failed += 1;
            }
        }
    }
    info!(
        "Counts collected for {} of {} samples",
        counts.len(),
        registry.len()
    );

    let table = ScaleFactorCalculator::new(registry)
        .compute(&counts)
        .with_context(|| {
            format!(
                "Scale factor table not produced ({} sample(s) without counts)",
                n_failed
            )
        })?;

    if let Some(d) = cfg.output_dir() {
        fs::create_dir_all(d)
            .with_context(|| format!("Could not create output directory {}", d.display()))?
    }
    let spikein = cfg.output_path(SPIKEIN_TABLE);
    let cpm = cfg.output_path(CPM_TABLE);
    write_tables(&table, &spikein, &cpm)?;
    info!(
        "Wrote {} and {} (version {})",
        spikein.display(),
        cpm.display(),
        table.version()
    );

    let failures = table.failures();
    for (s, k, e) in failures.iter() {
        error!("No {} factor for sample {}: {}", k, s, e)
    }
    if failures.is_empty() {
        Ok(())
    } else {
        Err(anyhow!(
            "Scale factors undefined for {} sample/factor combination(s)",
            failures.len()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cr_core::{CoreError, Result};
    use std::sync::Arc;

    struct FixedCounter;

    impl AlignmentCounter for FixedCounter {
        fn count(&self, sample: &Sample) -> Result<AlignmentCounts> {
            let id = sample.id();
            if id.as_ref() == "X" {
                return Err(CoreError::External("samtools failed".to_string()));
            }
            let k = id.len() as u64;
            Ok(AlignmentCounts {
                sample_id: Arc::clone(id),
                primary_reads: 1000 * k,
                spikein_reads: 10 * k,
                include_region_reads: 500 * k,
            })
        }
    }

    fn registry(ids: &[&str]) -> SampleRegistry {
        SampleRegistry::new(
            ids.iter()
                .map(|s| Sample::new(s, format!("{}_1.fq", s), format!("{}_2.fq", s), None))
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn counts_in_sheet_order() {
        let reg = registry(&["a", "bb", "X", "ccc", "dddd"]);
        let v = collect_counts(&FixedCounter, reg.samples(), 3);
        assert_eq!(v.len(), 5);
        assert!(v[2].is_err());
        let p: Vec<_> = v
            .iter()
            .filter_map(|r| r.as_ref().ok().map(|c| c.primary_reads))
            .collect();
        assert_eq!(p, vec![1000, 2000, 3000, 4000]);
    }

    #[test]
    fn tables_written() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(&["b", "a"]);
        let counts: Vec<_> = collect_counts(&FixedCounter, reg.samples(), 2)
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        let table = ScaleFactorCalculator::new(&reg).compute(&counts).unwrap();
        let sp = dir.path().join(SPIKEIN_TABLE);
        let cpm = dir.path().join(CPM_TABLE);
        write_tables(&table, &sp, &cpm).unwrap();
        let s = fs::read_to_string(&sp).unwrap();
        assert_eq!(
            s,
            "sample,primary_reads,spikein_reads,spikein_factor,inverse_spikein_factor\n\
             a,1000,10,0.01,100\nb,1000,10,0.01,100\n"
        );
        let reloaded = ScaleFactorTable::from_files(&sp, &cpm).unwrap();
        assert_eq!(reloaded.version(), table.version());
    }
}
