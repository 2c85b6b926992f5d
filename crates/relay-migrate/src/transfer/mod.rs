//! CSV interchange files used to move table data between engines.
//!
//! Rows are streamed from the source into `<work_dir>/<object>.csv` with a
//! header line of column names, then bulk-loaded by the target. The file is
//! removed after a successful load and left in place when the load fails, so
//! it can be inspected.

use crate::catalog::RecordSink;
use crate::error::{MigrateError, Result};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Streams records into a new interchange file.
pub struct InterchangeWriter {
    path: PathBuf,
    header: Vec<String>,
    writer: csv::Writer<BufWriter<File>>,
    records: u64,
}

impl InterchangeWriter {
    /// Create (or truncate) `<work_dir>/<object>.csv` and write the header.
    pub fn create(work_dir: &Path, object: &str, header: &[String]) -> Result<Self> {
        std::fs::create_dir_all(work_dir)?;
        let path = work_dir.join(format!("{}.csv", object));

        let file = File::create(&path)?;
        let mut writer = csv::Writer::from_writer(BufWriter::new(file));
        writer.write_record(header)?;

        debug!("Writing interchange file {:?}", path);
        Ok(Self {
            path,
            header: header.to_vec(),
            writer,
            records: 0,
        })
    }

    /// Flush and close the file.
    pub fn finish(mut self) -> Result<Interchange> {
        self.writer.flush()?;
        Ok(Interchange {
            path: self.path,
            header: self.header,
            records: self.records,
        })
    }
}

impl RecordSink for InterchangeWriter {
    fn write_record(&mut self, record: &[Option<String>]) -> Result<()> {
        if record.len() != self.header.len() {
            return Err(MigrateError::transfer(
                self.path.display().to_string(),
                format!(
                    "record has {} fields, header has {}",
                    record.len(),
                    self.header.len()
                ),
            ));
        }
        // NULL and empty string both end up as an empty field.
        self.writer
            .write_record(record.iter().map(|v| v.as_deref().unwrap_or("")))?;
        self.records += 1;
        Ok(())
    }
}

/// A finished interchange file.
#[derive(Debug, Clone)]
pub struct Interchange {
    path: PathBuf,
    header: Vec<String>,
    records: u64,
}

impl Interchange {
    /// Location of the file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Column names from the header line.
    pub fn header(&self) -> &[String] {
        &self.header
    }

    /// Number of data records written.
    pub fn record_count(&self) -> u64 {
        self.records
    }

    /// Read the data records back, skipping the header. Empty fields come
    /// back as NULL, the way `COPY ... FORMAT csv` reads them.
    #[cfg(test)]
    pub(crate) fn records(&self) -> Result<Vec<crate::catalog::Record>> {
        let mut reader = csv::Reader::from_path(&self.path)?;
        let mut out = Vec::with_capacity(self.records as usize);
        for row in reader.records() {
            let row = row?;
            out.push(
                row.iter()
                    .map(|field| {
                        if field.is_empty() {
                            None
                        } else {
                            Some(field.to_string())
                        }
                    })
                    .collect(),
            );
        }
        Ok(out)
    }

    /// Delete the file.
    pub fn remove(self) -> Result<()> {
        std::fs::remove_file(&self.path)?;
        debug!("Removed interchange file {:?}", self.path);
        Ok(())
    }
}
