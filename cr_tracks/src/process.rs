use std::{fs, io::Write, path::Path, sync::Arc, thread};

use anyhow::Context;
use compress_io::compress::CompressIo;
use crossbeam_channel::{bounded, Receiver, Sender};

use cr_core::{
    average::GroupAverager,
    convert::{output_path, TrackFormat, TrackFormatConverter},
    sample::GroupMembership,
    scaler::CoverageScaler,
    track::{CoverageTrack, TrackKind},
};

use crate::{config::Config, controller::*};

/// Everything a task needs to run a job
struct Engine<'a> {
    cfg: &'a Config,
    scaler: CoverageScaler<'a>,
    averager: GroupAverager<'a>,
    converter: TrackFormatConverter<'a>,
    formats: Vec<TrackFormat>,
}

impl<'a> Engine<'a> {
    fn new(cfg: &'a Config) -> anyhow::Result<Self> {
        let scaler = CoverageScaler::new(cfg.genome(), cfg.bin_size(), cfg.exclusions())?;
        let averager = GroupAverager::new(cfg.membership());
        let converter = match cfg.encoder() {
            Some(e) => TrackFormatConverter::with_encoder(cfg.genome(), e),
            None => TrackFormatConverter::new(cfg.genome()),
        };
        Ok(Self {
            cfg,
            scaler,
            averager,
            converter,
            formats: cfg.formats(),
        })
    }

    fn scale_sample(&self, ix: usize) -> Completed {
        let sample = &self.cfg.registry().samples()[ix];
        let res = self.scaler.scale_sample(
            self.cfg.binner(),
            sample,
            self.cfg.factors(),
            &TrackKind::SAMPLE_KINDS,
        );
        Completed::SampleTracks(ix, res)
    }

    fn average(
        &self,
        group: Arc<str>,
        kind: TrackKind,
        tracks: Vec<Arc<CoverageTrack>>,
    ) -> Completed {
        let v: Vec<&CoverageTrack> = tracks.iter().map(|t| t.as_ref()).collect();
        let res = self.averager.average(&group, &v);
        Completed::GroupTrack(group, kind, res)
    }

    fn output(&self, track: &CoverageTrack) -> anyhow::Result<()> {
        let prefix = self.cfg.output_prefix();
        let owner = track.owner();
        let name = format!("{}{}.{}", prefix, owner, track.kind());
        for f in self.formats.iter() {
            let p = output_path(self.cfg.output_dir(), prefix, owner, track.kind(), *f);
            if let Some(d) = p.parent() {
                fs::create_dir_all(d)
                    .with_context(|| format!("Could not create directory {}", d.display()))?
            }
            self.converter
                .write(track, *f, &p, &name)
                .with_context(|| format!("Error writing {}", p.display()))?;
            debug!("Wrote {}", p.display());
        }
        Ok(())
    }
}

fn process_task(
    engine: &Engine,
    ix: usize,
    snd: Sender<JobRequest>,
    recv: Receiver<Option<Job>>,
) -> anyhow::Result<()> {
    debug!("Process task {} starting up", ix);
    snd.send(JobRequest {
        prev_results: Completed::None,
        task_idx: ix,
    })?;

    while let Some(job) = recv.recv()? {
        trace!("Task {} received job {:?}", ix, job);
        let res = match job {
            Job::ScaleSample(i) => engine.scale_sample(i),
            Job::AverageGroup(g, k, v) => engine.average(g, k, v),
            Job::Output(t) => {
                Completed::Output(Arc::clone(t.owner()), t.kind(), engine.output(&t))
            }
        };
        snd.send(JobRequest {
            prev_results: res,
            task_idx: ix,
        })?;
    }
    debug!("Process task {} closing down", ix);
    Ok(())
}

/// Check current merge groups against the manifest of a previous run in the same
/// output directory, then (re)write the manifest
fn check_manifest(membership: &GroupMembership, path: &Path) -> anyhow::Result<()> {
    if path.exists() {
        let prev = GroupMembership::from_file(path)
            .with_context(|| format!("Could not read group manifest {}", path.display()))?;
        membership.check_consistent_with(&prev).with_context(|| {
            format!(
                "Merge groups differ from previous run recorded in {}",
                path.display()
            )
        })?;
    }
    if let Some(d) = path.parent() {
        fs::create_dir_all(d)?
    }
    let mut wrt = CompressIo::new()
        .path(path)
        .bufwriter()
        .with_context(|| format!("Could not open {} for output", path.display()))?;
    membership.write(&mut wrt)?;
    wrt.flush()?;
    Ok(())
}

/// Create child threads to process samples
pub fn process_samples(cfg: &Config) -> anyhow::Result<()> {
    debug!("Starting processing");
    check_manifest(cfg.membership(), &cfg.manifest_path())?;
    let engine = Engine::new(cfg)?;

    let summary = thread::scope(|sc| {
        let nt = cfg.threads();

        // Channel for a task to request a new job
        let (send_ctrl, recv_ctrl) = bounded(nt * 8);

        // Storage for channels by which a task receives a new job
        let mut send_job = Vec::with_capacity(nt);

        // Spawn task processes
        let join_handles: Vec<_> = (0..nt)
            .map(|ix| {
                let (s, r) = bounded(1);
                send_job.push(s);
                let s = send_ctrl.clone();
                let eng = &engine;
                sc.spawn(move || process_task(eng, ix, s, r))
            })
            .collect();
        drop(send_ctrl);

        let summary = controller(cfg, recv_ctrl, send_job);
        for jh in join_handles {
            match jh.join() {
                Ok(r) => r?,
                Err(_) => return Err(anyhow!("Process task panicked")),
            }
        }
        summary
    })?;

    info!("Wrote {} tracks", summary.tracks_written);
    if summary.failures.is_empty() {
        Ok(())
    } else {
        Err(anyhow!(
            "{} track(s) could not be produced; see log for details",
            summary.failures.len()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cr_core::{
        factors::ScaleFactorTable,
        genome::Genome,
        sample::{Sample, SampleRegistry},
        scaler::BedGraphBinner,
    };
    use std::io::Cursor;

    const SPIKEIN: &str = "sample,primary_reads,spikein_reads,spikein_factor,inverse_spikein_factor
A,1000,10,0.01,100
B,1000,20,0.02,50
";
    const CPM: &str = "sample,total_reads_in_include_region,cpm_scale_factor
A,500000,2
B,250000,4
C,1000000,1
";

    fn config(dir: &Path) -> Config {
        config_with(
            dir,
            vec![
                Sample::new("A", "a1", "a2", Some("G")),
                Sample::new("B", "b1", "b2", Some("G")),
                Sample::new("C", "c1", "c2", Some("H")),
            ],
        )
    }

    fn config_with(dir: &Path, samples: Vec<Sample>) -> Config {
        let reg = SampleRegistry::new(samples).unwrap();
        let mut genome = Genome::new();
        genome.add("chr1", 200).unwrap();
        let table = ScaleFactorTable::from_readers(
            &mut Cursor::new(SPIKEIN),
            "spikein",
            &mut Cursor::new(CPM),
            "cpm",
        )
        .unwrap();
        let raw = dir.join("raw");
        fs::create_dir_all(&raw).unwrap();
        fs::write(raw.join("A.bedGraph"), "chr1\t0\t100\t1\n").unwrap();
        fs::write(raw.join("B.bedGraph"), "chr1\t0\t100\t2\nchr1\t100\t200\t1\n").unwrap();
        fs::write(raw.join("C.bedGraph"), "chr1\t0\t200\t3\n").unwrap();
        fs::write(raw.join("Z.bedGraph"), "chr1\t0\t100\t7\n").unwrap();
        let mut cfg = Config::new(reg, genome, table, Box::new(BedGraphBinner::new(raw)), 100);
        cfg.set_output_dir(dir.join("out"));
        cfg.set_threads(3);
        cfg
    }

    #[test]
    fn run_samples_and_groups() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        // C has no spike-in factor, so C and group H fail for spike-in only
        assert!(process_samples(&cfg).is_err());
        let out = dir.path().join("out");
        let g = fs::read_to_string(out.join("G/G.mean_spikein.bedGraph")).unwrap();
        assert_eq!(g, "chr1\t0\t100\t100\nchr1\t100\t200\t25\n");
        let g = fs::read_to_string(out.join("G/G.mean_cpm.wig")).unwrap();
        assert_eq!(
            g,
            "track type=wiggle_0 name=\"G.mean_cpm\"\nfixedStep chrom=chr1 start=1 step=100 span=100\n5\n2\n"
        );
        assert!(out.join("C/C.cpm.bedGraph").exists());
        assert!(out.join("H/H.mean_cpm.bedGraph").exists());
        assert!(!out.join("C/C.spikein.bedGraph").exists());
        assert!(!out.join("H/H.mean_spikein.bedGraph").exists());
        assert_eq!(
            fs::read_to_string(out.join("groups.tsv")).unwrap(),
            "G\tA\nG\tB\nH\tC\n"
        );
    }

    #[test]
    fn sample_without_factors() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config_with(
            dir.path(),
            vec![
                Sample::new("A", "a1", "a2", Some("G")),
                Sample::new("B", "b1", "b2", Some("G")),
                Sample::new("Z", "z1", "z2", Some("K")),
            ],
        );
        assert_eq!(cfg.factors().uncovered(cfg.registry()).len(), 1);
        // Z is in neither factor table: its scaled tracks and group K fail, nothing else does
        assert!(process_samples(&cfg).is_err());
        let out = dir.path().join("out");
        for p in [
            "A/A.raw.bedGraph",
            "A/A.spikein.bedGraph",
            "B/B.cpm.wig",
            "G/G.mean_spikein.bedGraph",
            "G/G.mean_cpm.bedGraph",
        ] {
            assert!(out.join(p).exists(), "{}", p)
        }
        assert_eq!(
            fs::read_to_string(out.join("Z/Z.raw.bedGraph")).unwrap(),
            "chr1\t0\t100\t7\n"
        );
        for p in [
            "Z/Z.spikein.bedGraph",
            "Z/Z.cpm.bedGraph",
            "K/K.mean_spikein.bedGraph",
            "K/K.mean_cpm.bedGraph",
        ] {
            assert!(!out.join(p).exists(), "{}", p)
        }
    }

    #[test]
    fn manifest_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("groups.tsv");
        fs::write(&p, "G\tA\nH\tB\n").unwrap();
        let mut gm = GroupMembership::new();
        gm.insert("G", "A").unwrap();
        gm.insert("G", "B").unwrap();
        assert!(check_manifest(&gm, &p).is_err());
        fs::write(&p, "G\tA\n").unwrap();
        check_manifest(&gm, &p).unwrap();
        check_manifest(&gm, &p).unwrap();
        assert_eq!(fs::read_to_string(&p).unwrap(), "G\tA\nG\tB\n");
    }
}
