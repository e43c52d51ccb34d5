use std::{
    collections::{btree_map, BTreeMap, BTreeSet, HashMap},
    io::{BufRead, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use compress_io::compress::CompressIo;
use utils::get_next_line;

use crate::{
    error::{CoreError, Result},
    table::Header,
};

pub type SampleId = Arc<str>;
pub type GroupId = Arc<str>;

/// Input sample
///
/// id - unique name, used as key for counts, factors and output files
/// fastq - paired end read files
/// merge_group - replicate group label (if any)
///
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    id: SampleId,
    fastq: (PathBuf, PathBuf),
    merge_group: Option<GroupId>,
}

impl Sample {
    pub fn new<P: Into<PathBuf>>(id: &str, fastq1: P, fastq2: P, merge_group: Option<&str>) -> Self {
        Self {
            id: Arc::from(id),
            fastq: (fastq1.into(), fastq2.into()),
            merge_group: merge_group.map(Arc::from),
        }
    }

    pub fn id(&self) -> &SampleId {
        &self.id
    }

    pub fn fastq_pair(&self) -> (&Path, &Path) {
        (self.fastq.0.as_path(), self.fastq.1.as_path())
    }

    pub fn merge_group(&self) -> Option<&GroupId> {
        self.merge_group.as_ref()
    }
}

/// SampleRegistry
///
/// All samples of a run in sample sheet order.  Read only once built.
///
#[derive(Debug, Default)]
pub struct SampleRegistry {
    samples: Vec<Sample>,
    index: HashMap<SampleId, usize>,
}

impl SampleRegistry {
    pub fn new(samples: Vec<Sample>) -> Result<Self> {
        let mut index = HashMap::with_capacity(samples.len());
        for (ix, s) in samples.iter().enumerate() {
            if index.insert(Arc::clone(&s.id), ix).is_some() {
                return Err(CoreError::DataConsistency(format!(
                    "Sample {} appears more than once in sample sheet",
                    s.id
                )));
            }
        }
        Ok(Self { samples, index })
    }

    /// Read sample sheet.  Header line required with columns sample, fastq1, fastq2 and,
    /// optionally, merge_group.  Comma or tab separated.
    pub fn from_reader<R: BufRead>(rdr: &mut R, name: &str) -> Result<Self> {
        let hdr = Header::read(rdr, name, &["sample", "fastq1", "fastq2"])?;
        if !hdr.has("merge_group") {
            debug!("{}: no merge_group column; group outputs will be skipped", name)
        }
        let mut buf = String::new();
        let mut line = 1;
        let mut v = Vec::new();
        while let Some(fields) = hdr.next_record(rdr, &mut buf)? {
            line += 1;
            let id = hdr.get(&fields, "sample", line)?;
            if id.is_empty() || id.contains(char::is_whitespace) {
                return Err(CoreError::Parse(format!(
                    "{}:{} Invalid sample name '{}'",
                    name, line, id
                )));
            }
            let sample = Sample::new(
                id,
                hdr.get(&fields, "fastq1", line)?,
                hdr.get(&fields, "fastq2", line)?,
                hdr.get_opt(&fields, "merge_group"),
            );
            trace!("Read in sample {} group {:?}", sample.id, sample.merge_group);
            v.push(sample)
        }
        debug!(
            "Finished reading in {} lines from {}; found {} samples",
            line,
            hdr.name(),
            v.len()
        );
        Self::new(v)
    }

    pub fn from_file<P: AsRef<Path>>(p: P) -> Result<Self> {
        let p = p.as_ref();
        debug!("Reading in sample sheet from {}", p.display());
        let mut rdr = CompressIo::new().path(p).bufreader()?;
        Self::from_reader(&mut rdr, &p.display().to_string())
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Look up sample; absent ids are an error rather than silently ignored
    pub fn get(&self, id: &str) -> Result<&Sample> {
        self.index
            .get(id)
            .map(|i| &self.samples[*i])
            .ok_or_else(|| {
                CoreError::DataConsistency(format!("Sample {} not found in sample sheet", id))
            })
    }

    /// Group id -> members for all samples with a merge group
    pub fn group_membership(&self) -> GroupMembership {
        let mut gm = GroupMembership::new();
        for s in self.samples.iter() {
            if let Some(g) = s.merge_group.as_ref() {
                gm.groups
                    .entry(Arc::clone(g))
                    .or_default()
                    .insert(Arc::clone(&s.id));
            }
        }
        gm
    }
}

/// GroupMembership
///
/// group id -> ordered set of sample ids.  The number of members is the
/// denominator used when averaging a group.
///
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GroupMembership {
    groups: BTreeMap<GroupId, BTreeSet<SampleId>>,
}

impl GroupMembership {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add sample to group.  A sample can only belong to one group
    pub fn insert(&mut self, group: &str, sample: &str) -> Result<()> {
        if let Some(g) = self.group_of(sample) {
            if **g != *group {
                return Err(CoreError::Config(format!(
                    "Sample {} assigned to both group {} and group {}",
                    sample, g, group
                )));
            }
        }
        self.groups
            .entry(Arc::from(group))
            .or_default()
            .insert(Arc::from(sample));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn members(&self, group: &str) -> Option<&BTreeSet<SampleId>> {
        self.groups.get(group)
    }

    pub fn size(&self, group: &str) -> usize {
        self.groups.get(group).map(|s| s.len()).unwrap_or(0)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, GroupId, BTreeSet<SampleId>> {
        self.groups.iter()
    }

    pub fn group_of(&self, sample: &str) -> Option<&GroupId> {
        self.groups
            .iter()
            .find(|(_, m)| m.contains(sample))
            .map(|(g, _)| g)
    }

    /// Check that no sample has moved between groups relative to an earlier run.
    /// Samples only present in one of the two memberships are allowed.
    pub fn check_consistent_with(&self, previous: &GroupMembership) -> Result<()> {
        for (g, members) in self.groups.iter() {
            for s in members.iter() {
                if let Some(pg) = previous.group_of(s) {
                    if pg != g {
                        return Err(CoreError::Config(format!(
                            "Sample {} is in merge group {} but was in group {} in a previous run",
                            s, g, pg
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Read tab separated group, sample manifest
    pub fn from_reader<R: BufRead>(rdr: &mut R, name: &str) -> Result<Self> {
        let mut gm = Self::new();
        let mut buf = String::new();
        let mut line = 0;
        while let Some(fields) = get_next_line(rdr, &mut buf)? {
            line += 1;
            match fields.len() {
                0 => (),
                1 => {
                    return Err(CoreError::Parse(format!(
                        "{}:{} Expected group and sample",
                        name, line
                    )))
                }
                _ => gm
                    .insert(fields[0], fields[1])
                    .map_err(|e| e.chain(format!("{}:{}", name, line)))?,
            }
        }
        Ok(gm)
    }

    pub fn from_file<P: AsRef<Path>>(p: P) -> Result<Self> {
        let p = p.as_ref();
        let mut rdr = CompressIo::new().path(p).bufreader()?;
        Self::from_reader(&mut rdr, &p.display().to_string())
    }

    pub fn write<W: Write>(&self, w: &mut W) -> Result<()> {
        for (g, members) in self.groups.iter() {
            for s in members.iter() {
                writeln!(w, "{}\t{}", g, s)?
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const SHEET: &str = "sample,fastq1,fastq2,merge_group
A,a_1.fq.gz,a_2.fq.gz,G
B,b_1.fq.gz,b_2.fq.gz,G
C,c_1.fq.gz,c_2.fq.gz,
";

    #[test]
    fn read_sheet() {
        let reg = SampleRegistry::from_reader(&mut Cursor::new(SHEET), "sheet").unwrap();
        assert_eq!(reg.len(), 3);
        assert_eq!(reg.get("C").unwrap().merge_group(), None);
        assert_eq!(
            reg.get("A").unwrap().fastq_pair().1,
            Path::new("a_2.fq.gz")
        );
        let gm = reg.group_membership();
        assert_eq!(gm.len(), 1);
        assert_eq!(gm.size("G"), 2);
        let m: Vec<_> = gm.members("G").unwrap().iter().map(|s| s.to_string()).collect();
        assert_eq!(m, vec!["A", "B"]);
    }

    #[test]
    fn tab_sheet_without_groups() {
        let sheet = "fastq1\tsample\tfastq2\nx1\tX\tx2\n";
        let reg = SampleRegistry::from_reader(&mut Cursor::new(sheet), "sheet").unwrap();
        assert!(reg.get("X").is_ok());
        assert!(reg.group_membership().is_empty());
    }

    #[test]
    fn sheet_errors() {
        let dup = "sample,fastq1,fastq2\nA,1,2\nA,3,4\n";
        assert!(matches!(
            SampleRegistry::from_reader(&mut Cursor::new(dup), "sheet"),
            Err(CoreError::DataConsistency(_))
        ));
        let short = "sample,fastq1,fastq2\nA,1\n";
        assert!(matches!(
            SampleRegistry::from_reader(&mut Cursor::new(short), "sheet"),
            Err(CoreError::Parse(_))
        ));
        let no_col = "sample,fastq1\nA,1\n";
        assert!(matches!(
            SampleRegistry::from_reader(&mut Cursor::new(no_col), "sheet"),
            Err(CoreError::Parse(_))
        ));
        let reg = SampleRegistry::from_reader(&mut Cursor::new(SHEET), "sheet").unwrap();
        assert!(matches!(reg.get("Z"), Err(CoreError::DataConsistency(_))));
    }

    #[test]
    fn manifest_consistency() {
        let reg = SampleRegistry::from_reader(&mut Cursor::new(SHEET), "sheet").unwrap();
        let gm = reg.group_membership();
        let mut out = Vec::new();
        gm.write(&mut out).unwrap();
        let prev = GroupMembership::from_reader(&mut Cursor::new(out), "manifest").unwrap();
        assert_eq!(prev, gm);
        assert!(gm.check_consistent_with(&prev).is_ok());

        let mut moved = GroupMembership::new();
        moved.insert("H", "A").unwrap();
        assert!(matches!(
            gm.check_consistent_with(&moved),
            Err(CoreError::Config(_))
        ));
        assert!(moved.insert("G", "A").is_err());
    }
}
