//! Header handling for the delimited tables (sample sheet, count and factor tables)

use std::{collections::HashMap, io::BufRead};

use utils::{get_next_record, guess_delimiter};

use crate::error::{CoreError, Result};

/// Column positions taken from a header line
pub(crate) struct Header {
    name: String,
    delim: char,
    cols: HashMap<String, usize>,
}

impl Header {
    /// Read the first non-blank line of rdr as the header and check that the
    /// required columns are present.  Column names are matched case insensitively
    pub(crate) fn read<R: BufRead>(rdr: &mut R, name: &str, required: &[&str]) -> Result<Self> {
        let mut buf = String::new();
        loop {
            buf.clear();
            if rdr.read_line(&mut buf)? == 0 {
                return Err(CoreError::Parse(format!("{}: Missing header line", name)));
            }
            if !buf.trim().is_empty() {
                break;
            }
        }
        let delim = guess_delimiter(&buf);
        let cols: HashMap<_, _> = buf
            .trim_end_matches(&['\r', '\n'][..])
            .split(delim)
            .enumerate()
            .map(|(i, s)| (s.trim().to_lowercase(), i))
            .collect();
        for c in required {
            if !cols.contains_key(*c) {
                return Err(CoreError::Parse(format!(
                    "{}: Missing column '{}' in header",
                    name, c
                )));
            }
        }
        trace!("{}: header columns {:?}", name, cols);
        Ok(Self {
            name: name.to_owned(),
            delim,
            cols,
        })
    }

    pub(crate) fn has(&self, col: &str) -> bool {
        self.cols.contains_key(col)
    }

    /// Read next data record.  Blank lines are skipped
    pub(crate) fn next_record<'a, R: BufRead>(
        &self,
        rdr: &mut R,
        buf: &'a mut String,
    ) -> Result<Option<Vec<&'a str>>> {
        loop {
            match get_next_record(rdr, buf, self.delim)? {
                None => return Ok(None),
                Some(v) if v.is_empty() => continue,
                Some(_) => break,
            }
        }
        // Re-split the (non blank) line held in buf
        Ok(Some(
            buf.trim_end_matches(&['\r', '\n'][..])
                .split(self.delim)
                .map(|s| s.trim())
                .collect(),
        ))
    }

    /// Field for a column that must be present in the record
    pub(crate) fn get<'a>(&self, fields: &[&'a str], col: &str, line: usize) -> Result<&'a str> {
        self.cols
            .get(col)
            .and_then(|i| fields.get(*i))
            .copied()
            .ok_or_else(|| {
                CoreError::Parse(format!(
                    "{}:{} Missing field for column '{}'",
                    self.name, line, col
                ))
            })
    }

    /// Field for an optional column; empty fields count as absent
    pub(crate) fn get_opt<'a>(&self, fields: &[&'a str], col: &str) -> Option<&'a str> {
        self.cols
            .get(col)
            .and_then(|i| fields.get(*i))
            .copied()
            .filter(|s| !s.is_empty())
    }

    pub(crate) fn parse<T>(&self, fields: &[&str], col: &str, line: usize) -> Result<T>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        let s = self.get(fields, col, line)?;
        s.parse::<T>().map_err(|e| {
            CoreError::Parse(format!(
                "{}:{} Error reading '{}' from column '{}': {}",
                self.name, line, s, col, e
            ))
        })
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn header_lookup() {
        let mut rdr = Cursor::new("\nSample,count\n\nA, 10\nB,x\n");
        let h = Header::read(&mut rdr, "t", &["sample", "count"]).unwrap();
        assert!(h.has("count"));
        let mut buf = String::new();
        let f = h.next_record(&mut rdr, &mut buf).unwrap().unwrap();
        assert_eq!(h.get(&f, "sample", 2).unwrap(), "A");
        assert_eq!(h.parse::<u64>(&f, "count", 2).unwrap(), 10);
        assert!(h.get_opt(&f, "group").is_none());
        let f = h.next_record(&mut rdr, &mut buf).unwrap().unwrap();
        assert!(matches!(
            h.parse::<u64>(&f, "count", 3),
            Err(CoreError::Parse(_))
        ));
        assert!(h.next_record(&mut rdr, &mut buf).unwrap().is_none());
    }

    #[test]
    fn missing_column() {
        let mut rdr = Cursor::new("sample\tfastq1\n");
        assert!(Header::read(&mut rdr, "t", &["sample", "fastq2"]).is_err());
    }
}
