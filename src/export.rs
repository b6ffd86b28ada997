//! spreadsheet export of the cutoff-adjusted dataset for external stats packages

use std::collections::HashMap;

use rust_xlsxwriter::Workbook;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::data::Dataset;
use crate::error::{KmError, Result};
use crate::pipeline::AnalysisType;

pub const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
pub const SHEET_NAME: &str = "KM_data";
pub const EXPORT_HEADERS: [&str; 3] = ["Time", "Event", "Group"];

/// KM_OS_for_SPSS.xlsx / KM_PFS_for_SPSS.xlsx
pub fn export_filename(analysis_type: AnalysisType) -> String {
    format!("KM_{}_for_SPSS.xlsx", analysis_type)
}

/// one sheet: header row then Time, Event (0/1), Group per observation
pub fn to_xlsx_bytes(rows: &Dataset) -> Result<Vec<u8>> {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(SHEET_NAME).map_err(KmError::export)?;

    for (col, header) in EXPORT_HEADERS.iter().enumerate() {
        worksheet
            .write_string(0, col as u16, *header)
            .map_err(KmError::export)?;
    }

    for (i, obs) in rows.iter().enumerate() {
        let row = u32::try_from(i + 1)
            .map_err(|_| KmError::export("too many rows for one worksheet"))?;
        worksheet.write_number(row, 0, obs.time).map_err(KmError::export)?;
        worksheet
            .write_number(row, 1, if obs.event { 1.0 } else { 0.0 })
            .map_err(KmError::export)?;
        worksheet
            .write_string(row, 2, obs.group.as_str())
            .map_err(KmError::export)?;
    }

    workbook.save_to_buffer().map_err(KmError::export)
}

/// sha-256 over the row contents, used as the cache key
pub fn content_key(rows: &Dataset) -> String {
    let mut hasher = Sha256::new();
    for obs in rows.iter() {
        hasher.update(obs.time.to_bits().to_le_bytes());
        hasher.update([obs.event as u8]);
        hasher.update((obs.group.len() as u64).to_le_bytes());
        hasher.update(obs.group.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// memoizes spreadsheet bytes by dataset content
///
/// meant for long-lived embedders that re-export the same rows repeatedly;
/// a one-shot run can call `to_xlsx_bytes` directly
#[derive(Debug, Default)]
pub struct ExportCache {
    entries: HashMap<String, Vec<u8>>,
    hits: usize,
    misses: usize,
}

impl ExportCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// cached bytes for `rows`, serializing only on first request
    pub fn get_or_render(&mut self, rows: &Dataset) -> Result<&[u8]> {
        let key = content_key(rows);

        if self.entries.contains_key(&key) {
            self.hits += 1;
            debug!(key = %key, "export cache hit");
        } else {
            self.misses += 1;
            debug!(key = %key, rows = rows.len(), "export cache miss");
            let bytes = to_xlsx_bytes(rows)?;
            self.entries.insert(key.clone(), bytes);
        }

        self.entries
            .get(&key)
            .map(Vec::as_slice)
            .ok_or_else(|| KmError::export("cache entry vanished"))
    }

    pub fn hits(&self) -> usize {
        self.hits
    }

    pub fn misses(&self) -> usize {
        self.misses
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Observation;

    fn rows() -> Dataset {
        Dataset::new(vec![
            Observation::new("A", 10.0, false),
            Observation::new("B", 24.0, false),
            Observation::new("A", 3.5, true),
        ])
        .unwrap()
    }

    #[test]
    fn test_export_filename() {
        assert_eq!(export_filename(AnalysisType::Os), "KM_OS_for_SPSS.xlsx");
        assert_eq!(export_filename(AnalysisType::Pfs), "KM_PFS_for_SPSS.xlsx");
    }

    #[test]
    fn test_xlsx_bytes_are_a_zip_container() {
        let bytes = to_xlsx_bytes(&rows()).unwrap();
        assert_eq!(&bytes[..2], b"PK");
    }

    #[test]
    fn test_content_key_tracks_content() {
        let a = rows();
        let mut b = rows();
        assert_eq!(content_key(&a), content_key(&b));

        b.observations_mut()[2].event = false;
        assert_ne!(content_key(&a), content_key(&b));
    }

    #[test]
    fn test_cache_reuses_bytes() {
        let mut cache = ExportCache::new();
        let first = cache.get_or_render(&rows()).unwrap().to_vec();
        let second = cache.get_or_render(&rows()).unwrap().to_vec();

        assert_eq!(first, second);
        assert_eq!(cache.misses(), 1);
        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.len(), 1);
    }
}
