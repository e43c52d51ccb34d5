use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::{
    error::{CoreError, Result},
    genome::Contig,
    sample::{GroupMembership, SampleId},
    track::{Bin, CoverageTrack, TrackKind},
};

/// GroupAverager
///
/// Builds the mean track of a merge group from the tracks of its members.
/// The denominator is always the number of members in the group, so a region
/// covered by only some members is down-weighted.
pub struct GroupAverager<'a> {
    membership: &'a GroupMembership,
}

impl<'a> GroupAverager<'a> {
    pub fn new(membership: &'a GroupMembership) -> Self {
        Self { membership }
    }

    pub fn average(&self, group: &str, tracks: &[&CoverageTrack]) -> Result<CoverageTrack> {
        let members = self.membership.members(group).ok_or_else(|| {
            CoreError::DataConsistency(format!("Unknown merge group {}", group))
        })?;
        average_members(group, members, tracks)
    }
}

/// Check inputs and return member tracks in member order together with the
/// kind of the output track
fn order_tracks<'b>(
    group: &str,
    members: &BTreeSet<SampleId>,
    tracks: &[&'b CoverageTrack],
) -> Result<(Vec<&'b CoverageTrack>, TrackKind)> {
    if members.is_empty() {
        return Err(CoreError::DataConsistency(format!(
            "Group {} has no members",
            group
        )));
    }
    let mut by_owner: HashMap<&str, &CoverageTrack> = HashMap::with_capacity(tracks.len());
    for &t in tracks.iter() {
        let owner = t.owner().as_ref();
        if !members.contains(owner) {
            return Err(CoreError::DataConsistency(format!(
                "Track for sample {} supplied but sample is not a member of group {}",
                owner, group
            )));
        }
        if by_owner.insert(owner, t).is_some() {
            return Err(CoreError::DataConsistency(format!(
                "Multiple tracks for sample {} in group {}",
                owner, group
            )));
        }
    }
    let mut v = Vec::with_capacity(members.len());
    for m in members.iter() {
        match by_owner.get(m.as_ref()) {
            Some(t) => v.push(*t),
            None => {
                return Err(CoreError::DataConsistency(format!(
                    "Group {}: no track available for member {}",
                    group, m
                )))
            }
        }
    }
    let kind = v[0].kind();
    if let Some(t) = v.iter().find(|t| t.kind() != kind) {
        return Err(CoreError::DataConsistency(format!(
            "Group {}: member tracks have different kinds ({} and {})",
            group,
            kind,
            t.kind()
        )));
    }
    let mean_kind = kind.mean_kind().ok_or_else(|| {
        CoreError::Config(format!(
            "Group {}: tracks of kind {} can not be averaged",
            group, kind
        ))
    })?;
    let chroms = v[0].domain();
    for t in v[1..].iter() {
        let c = t.domain();
        if c != chroms {
            let diff: Vec<_> = chroms.symmetric_difference(c).map(|c| c.as_ref()).collect();
            return Err(CoreError::DataConsistency(format!(
                "Group {}: members {} and {} have different chromosome sets (differing: {})",
                group,
                v[0].owner(),
                t.owner(),
                diff.join(",")
            )));
        }
    }
    Ok((v, mean_kind))
}

/// Mean of the members' tracks over the refined partition of all their
/// interval boundaries.  Sub-intervals not covered by any member are absent
/// from the output; adjacent bins are not coalesced.
pub fn average_members(
    group: &str,
    members: &BTreeSet<SampleId>,
    tracks: &[&CoverageTrack],
) -> Result<CoverageTrack> {
    let (tracks, kind) = order_tracks(group, members, tracks)?;
    let n = tracks.len() as f64;
    debug!(
        "Averaging {} tracks of kind {} for group {}",
        tracks.len(),
        tracks[0].kind(),
        group
    );

    let per_chrom: Vec<BTreeMap<&Contig, &[Bin]>> = tracks
        .iter()
        .map(|t| t.chrom_slices().into_iter().collect())
        .collect();
    // Chromosomes where any member has signal
    let chroms: BTreeSet<&Contig> = per_chrom.iter().flat_map(|m| m.keys().copied()).collect();

    let mut out = Vec::new();
    for ctg in chroms {
        let slices: Vec<&[Bin]> = per_chrom
            .iter()
            .map(|m| m.get(ctg).copied().unwrap_or(&[]))
            .collect();
        let mut bounds: Vec<usize> = slices
            .iter()
            .flat_map(|s| s.iter().flat_map(|b| [b.start, b.end]))
            .collect();
        bounds.sort_unstable();
        bounds.dedup();
        let mut idx = vec![0; slices.len()];
        for w in bounds.windows(2) {
            let (a, b) = (w[0], w[1]);
            let mut sum = 0.0;
            let mut covered = false;
            for (s, i) in slices.iter().zip(idx.iter_mut()) {
                while *i < s.len() && s[*i].end <= a {
                    *i += 1
                }
                if *i < s.len() && s[*i].start <= a {
                    sum += s[*i].value;
                    covered = true;
                }
            }
            if covered {
                out.push(Bin::new(ctg, a, b, sum / n))
            }
        }
    }
    trace!("Group {} mean track has {} bins", group, out.len());
    CoverageTrack::new(group, kind, out)?.with_domain(tracks[0].domain())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn track(owner: &str, kind: TrackKind, bins: &[(&str, usize, usize, f64)]) -> CoverageTrack {
        let bins = bins
            .iter()
            .map(|(c, s, e, v)| Bin::new(&Arc::from(*c), *s, *e, *v))
            .collect();
        CoverageTrack::new(owner, kind, bins).unwrap()
    }

    fn members(v: &[&str]) -> BTreeSet<SampleId> {
        v.iter().map(|s| Arc::from(*s)).collect()
    }

    #[test]
    fn two_member_mean() {
        let a = track("A", TrackKind::Spikein, &[("chr1", 0, 100, 4.0)]);
        let b = track("B", TrackKind::Spikein, &[("chr1", 0, 100, 2.0)]);
        let m = average_members("G", &members(&["A", "B"]), &[&a, &b]).unwrap();
        assert_eq!(m.owner().as_ref(), "G");
        assert_eq!(m.kind(), TrackKind::MeanSpikein);
        assert_eq!(m.bins(), &[Bin::new(&Arc::from("chr1"), 0, 100, 3.0)]);
    }

    #[test]
    fn partial_coverage_uses_group_size() {
        let a = track("A", TrackKind::Cpm, &[("chr1", 0, 100, 4.0)]);
        let b = track("B", TrackKind::Cpm, &[("chr1", 50, 150, 2.0), ("chr1", 300, 350, 1.0)]);
        let m = average_members("G", &members(&["A", "B"]), &[&a, &b]).unwrap();
        let v: Vec<_> = m.bins().iter().map(|b| (b.start, b.end, b.value)).collect();
        assert_eq!(
            v,
            vec![(0, 50, 2.0), (50, 100, 3.0), (100, 150, 1.0), (300, 350, 0.5)]
        );
    }

    #[test]
    fn member_order_irrelevant() {
        let a = track("A", TrackKind::Cpm, &[("chr1", 0, 10, 0.1), ("chr2", 0, 10, 0.7)]);
        let b = track("B", TrackKind::Cpm, &[("chr1", 5, 15, 0.2), ("chr2", 0, 10, 0.3)]);
        let c = track("C", TrackKind::Cpm, &[("chr1", 0, 20, 0.3), ("chr2", 5, 10, 1e-3)]);
        let g = members(&["A", "B", "C"]);
        let m1 = average_members("G", &g, &[&a, &b, &c]).unwrap();
        let m2 = average_members("G", &g, &[&c, &a, &b]).unwrap();
        let m3 = average_members("G", &g, &[&b, &c, &a]).unwrap();
        assert_eq!(m1, m2);
        assert_eq!(m1, m3);
    }

    #[test]
    fn chromosome_without_signal_in_first_member() {
        let all: Vec<Contig> = vec![Arc::from("chr1"), Arc::from("chr2")];
        let a = track("A", TrackKind::Spikein, &[("chr1", 0, 100, 2.0), ("chr2", 0, 100, 4.0)])
            .with_domain(all.iter())
            .unwrap();
        let b = track("B", TrackKind::Spikein, &[("chr1", 0, 100, 2.0)])
            .with_domain(all.iter())
            .unwrap();
        let g = members(&["A", "B"]);
        for v in [[&a, &b], [&b, &a]] {
            let m = average_members("G", &g, &v).unwrap();
            let bins: Vec<_> = m.bins().iter().map(|b| (b.chrom.as_ref(), b.value)).collect();
            assert_eq!(bins, vec![("chr1", 2.0), ("chr2", 2.0)]);
            assert_eq!(m.domain(), a.domain());
        }
        // Same bins, but B was built without chr2
        let b = track("B", TrackKind::Spikein, &[("chr1", 0, 100, 2.0)]);
        assert!(matches!(
            average_members("G", &g, &[&a, &b]),
            Err(CoreError::DataConsistency(_))
        ));
    }

    #[test]
    fn single_member_unchanged() {
        let a = track(
            "A",
            TrackKind::Spikein,
            &[("chr1", 0, 50, 1.5), ("chr1", 50, 100, 1.5), ("chr1", 200, 250, 0.3)],
        );
        let m = average_members("G", &members(&["A"]), &[&a]).unwrap();
        assert_eq!(m.bins(), a.bins());
    }

    #[test]
    fn inconsistent_inputs() {
        let a = track("A", TrackKind::Spikein, &[("chr1", 0, 100, 4.0)]);
        let b = track("B", TrackKind::Spikein, &[("chr2", 0, 100, 2.0)]);
        let g = members(&["A", "B"]);
        assert!(matches!(
            average_members("G", &g, &[&a, &b]),
            Err(CoreError::DataConsistency(_))
        ));
        // Missing member
        assert!(matches!(
            average_members("G", &g, &[&a]),
            Err(CoreError::DataConsistency(_))
        ));
        // Non-member
        let c = track("C", TrackKind::Spikein, &[("chr1", 0, 100, 2.0)]);
        assert!(average_members("G", &g, &[&a, &c]).is_err());
        // Mixed kinds
        let b = track("B", TrackKind::Cpm, &[("chr1", 0, 100, 2.0)]);
        assert!(average_members("G", &g, &[&a, &b]).is_err());
        // Raw tracks
        let a = track("A", TrackKind::Raw, &[("chr1", 0, 100, 2.0)]);
        assert!(matches!(
            average_members("G", &members(&["A"]), &[&a]),
            Err(CoreError::Config(_))
        ));
        assert!(average_members("G", &BTreeSet::new(), &[]).is_err());
    }

    #[test]
    fn averager_uses_membership() {
        let mut gm = GroupMembership::new();
        gm.insert("G", "B").unwrap();
        gm.insert("G", "A").unwrap();
        let a = track("A", TrackKind::Spikein, &[("chr1", 0, 100, 4.0)]);
        let b = track("B", TrackKind::Spikein, &[("chr1", 0, 100, 2.0)]);
        let avg = GroupAverager::new(&gm);
        assert_eq!(avg.average("G", &[&b, &a]).unwrap().bins()[0].value, 3.0);
        assert!(avg.average("H", &[&a]).is_err());
    }
}
