//! Coordination of jobs between tasks
//!
//! The pool of process tasks (threads) request jobs from and return results to the
//! controller.  Each request carries the results of the task's previous job (if any).
//! When no job is available the task is parked until either new jobs appear or
//! all work is finished, at which point None is sent and the task exits.
//!
//! Possible job types are:
//!
//!   ScaleSample - obtain raw coverage for a sample and produce its raw, spikein and cpm tracks
//!   AverageGroup - build the mean track of one kind for a merge group
//!   Output - write a track in all output formats
//!
//! The factor table is complete before the controller starts, so every ScaleSample job
//! is issued at the start.  An AverageGroup job for (group, kind) is only issued once
//! every member of the group has returned its track of that kind.  If any member
//! failed then the group track fails with the member's error as the cause.
//!
use std::{
    collections::{HashMap, VecDeque},
    fmt,
    sync::Arc,
};

use crossbeam_channel::{Receiver, Sender};

use cr_core::{
    sample::{GroupId, SampleId},
    track::{CoverageTrack, TrackKind},
};

use crate::config::Config;

pub enum Job {
    ScaleSample(usize),
    AverageGroup(GroupId, TrackKind, Vec<Arc<CoverageTrack>>),
    Output(Arc<CoverageTrack>),
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ScaleSample(i) => write!(f, "Job::ScaleSample({})", i),
            Self::AverageGroup(g, k, _) => write!(f, "Job::AverageGroup({}, {})", g, k),
            Self::Output(t) => write!(f, "Job::Output({}, {})", t.owner(), t.kind()),
        }
    }
}

pub type SampleTracks = Vec<(TrackKind, cr_core::Result<CoverageTrack>)>;

/// The child tasks send their results as Completed objects
pub enum Completed {
    SampleTracks(usize, cr_core::Result<SampleTracks>),
    GroupTrack(GroupId, TrackKind, cr_core::Result<CoverageTrack>),
    Output(Arc<str>, TrackKind, anyhow::Result<()>),
    None, // Initial request from a task
}

impl fmt::Debug for Completed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SampleTracks(i, _) => write!(f, "Completed::SampleTracks({})", i),
            Self::GroupTrack(g, k, _) => write!(f, "Completed::GroupTrack({}, {})", g, k),
            Self::Output(o, k, _) => write!(f, "Completed::Output({}, {})", o, k),
            Self::None => f.write_str("Completed::None"),
        }
    }
}

/// Sent from child tasks to request a new job
#[derive(Debug)]
pub struct JobRequest {
    pub prev_results: Completed, // Results from previous job by this task
    pub task_idx: usize,         // Used to select the channel to send the reply back to
}

/// Outcome of a run
#[derive(Debug, Default)]
pub struct Summary {
    pub tracks_written: usize,
    pub failures: Vec<String>,
}

type TrackEntry = Result<Arc<CoverageTrack>, String>;

struct State<'a> {
    cfg: &'a Config,
    queue: VecDeque<Job>,
    pending: usize,
    tracks: HashMap<(SampleId, TrackKind), TrackEntry>,
    // (group, source kind) not yet averaged
    groups_waiting: Vec<(GroupId, TrackKind)>,
    summary: Summary,
}

impl<'a> State<'a> {
    fn new(cfg: &'a Config) -> Self {
        let queue = (0..cfg.registry().len()).map(Job::ScaleSample).collect();
        let mut groups_waiting = Vec::new();
        for (g, _) in cfg.membership().iter() {
            for k in TrackKind::GROUP_SOURCE_KINDS {
                groups_waiting.push((Arc::clone(g), k))
            }
        }
        Self {
            cfg,
            queue,
            pending: 0,
            tracks: HashMap::new(),
            groups_waiting,
            summary: Summary::default(),
        }
    }

    fn fail(&mut self, msg: String) {
        error!("{}", msg);
        self.summary.failures.push(msg)
    }

    fn add_sample_tracks(&mut self, ix: usize, res: cr_core::Result<SampleTracks>) {
        let id = Arc::clone(self.cfg.registry().samples()[ix].id());
        match res {
            Ok(v) => {
                for (k, t) in v {
                    let entry = match t {
                        Ok(t) => {
                            let t = Arc::new(t);
                            self.queue.push_back(Job::Output(Arc::clone(&t)));
                            Ok(t)
                        }
                        Err(e) => {
                            let s = e.to_string();
                            self.fail(s.clone());
                            Err(s)
                        }
                    };
                    self.tracks.insert((Arc::clone(&id), k), entry);
                }
            }
            Err(e) => {
                let s = e.to_string();
                self.fail(s.clone());
                for k in TrackKind::SAMPLE_KINDS {
                    self.tracks.insert((Arc::clone(&id), k), Err(s.clone()));
                }
            }
        }
        self.check_groups()
    }

    /// Issue average jobs for groups where all member tracks are available
    fn check_groups(&mut self) {
        let cfg = self.cfg;
        let waiting = std::mem::take(&mut self.groups_waiting);
        for (g, k) in waiting {
            let members = match cfg.membership().members(&g) {
                Some(m) => m,
                None => continue,
            };
            let entries: Option<Vec<&TrackEntry>> = members
                .iter()
                .map(|s| self.tracks.get(&(Arc::clone(s), k)))
                .collect();
            let entries = match entries {
                Some(e) => e,
                None => {
                    self.groups_waiting.push((g, k));
                    continue;
                }
            };
            let res: Result<Vec<Arc<CoverageTrack>>, String> =
                entries.into_iter().cloned().collect();
            match res {
                Ok(v) => {
                    debug!("All {} tracks available for group {}", k, g);
                    self.queue.push_back(Job::AverageGroup(g, k, v))
                }
                Err(e) => {
                    let mk = k.mean_kind().map(|x| x.name()).unwrap_or("mean");
                    self.fail(format!(
                        "group {} ({}) not produced: member track failed -> {}",
                        g, mk, e
                    ))
                }
            }
        }
    }

    fn handle(&mut self, res: Completed) {
        trace!("Controller received {:?}", res);
        if !matches!(res, Completed::None) {
            self.pending -= 1
        }
        match res {
            Completed::SampleTracks(ix, r) => self.add_sample_tracks(ix, r),
            Completed::GroupTrack(g, k, r) => match r {
                Ok(t) => self.queue.push_back(Job::Output(Arc::new(t))),
                Err(e) => self.fail(format!("group {} ({}) -> {}", g, k, e)),
            },
            Completed::Output(o, k, r) => match r {
                Ok(_) => self.summary.tracks_written += 1,
                Err(e) => self.fail(format!("Output of {} ({}) failed: {:#}", o, k, e)),
            },
            Completed::None => (),
        }
    }
}

pub fn controller(
    cfg: &Config,
    recv: Receiver<JobRequest>,
    send_job: Vec<Sender<Option<Job>>>,
) -> anyhow::Result<Summary> {
    debug!("Controller starting up");
    let mut state = State::new(cfg);
    let mut idle = Vec::with_capacity(send_job.len());
    let mut n_active = send_job.len();
    while n_active > 0 {
        let jr = recv.recv()?;
        state.handle(jr.prev_results);
        idle.push(jr.task_idx);
        while let Some(ix) = idle.pop() {
            if let Some(job) = state.queue.pop_front() {
                trace!("Sending {:?} to task {}", job, ix);
                state.pending += 1;
                send_job[ix].send(Some(job))?;
            } else if state.pending == 0 {
                // Nothing queued or in progress: shut down all idle tasks
                send_job[ix].send(None)?;
                n_active -= 1;
                for ix in idle.drain(..) {
                    send_job[ix].send(None)?;
                    n_active -= 1;
                }
            } else {
                idle.push(ix);
                break;
            }
        }
    }
    for (g, k) in state.groups_waiting.iter() {
        state
            .summary
            .failures
            .push(format!("group {} ({}) was never averaged", g, k))
    }
    debug!("Controller closing down");
    Ok(state.summary)
}
