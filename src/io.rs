// Module for loading bulk uploads. It reads the csv file, resolves the headers onto the
// feature order, and drops rows with missing or non-numeric readings.
use csv::{ReaderBuilder, StringRecord};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{info, warn};

use crate::error::{AqiError, Result};
use crate::features::{is_target_column, Feature, FeatureVector, Observation, FEATURE_COUNT, TARGET_COLUMN};
use crate::preprocess::parse_reading;

/// Rows that survived cleaning plus a tally of what was thrown away.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadBatch {
    pub observations: Vec<Observation>,
    /// Rows with a missing or non-numeric required value.
    pub dropped: usize,
    /// Rows with the wrong number of fields.
    pub skipped: usize,
}

/// Where each required column sits in the header row.
#[derive(Debug, Clone, Copy)]
struct ColumnMap {
    features: [usize; FEATURE_COUNT],
    target: usize,
}

impl ColumnMap {
    /// Resolve headers by normalised name. Every missing column is reported at once.
    fn resolve(headers: &StringRecord) -> Result<Self> {
        let mut features = [None; FEATURE_COUNT];
        let mut target = None;
        for (i, header) in headers.iter().enumerate() {
            if let Some(f) = Feature::resolve(header) {
                features[f.index()].get_or_insert(i);
            } else if is_target_column(header) {
                target.get_or_insert(i);
            }
        }

        let mut missing: Vec<String> = Feature::ALL
            .iter()
            .filter(|f| features[f.index()].is_none())
            .map(|f| f.name().to_string())
            .collect();
        if target.is_none() {
            missing.push(TARGET_COLUMN.to_string());
        }
        match target {
            Some(target) if missing.is_empty() => {
                let mut resolved = [0; FEATURE_COUNT];
                for (slot, idx) in resolved.iter_mut().zip(features) {
                    *slot = idx.unwrap_or_default();
                }
                Ok(ColumnMap {
                    features: resolved,
                    target,
                })
            }
            _ => Err(AqiError::MissingColumn(missing)),
        }
    }

    /// `None` when any required field is blank, non-numeric or non-finite.
    fn observation(&self, raw: &StringRecord) -> Option<Observation> {
        let mut values = [0.0; FEATURE_COUNT];
        for (slot, &col) in values.iter_mut().zip(self.features.iter()) {
            *slot = parse_reading(raw.get(col)?)?;
        }
        Some(Observation {
            features: FeatureVector::new(values),
            aqi: parse_reading(raw.get(self.target)?)?,
        })
    }
}

/// Parse an upload from any reader.
pub fn read_upload<R: Read>(source: R) -> Result<UploadBatch> {
    let mut rdr = ReaderBuilder::new()
        .delimiter(b',')
        .flexible(true)
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(source);

    let headers = rdr.headers()?.clone();
    let expected_len = headers.len();
    let columns = ColumnMap::resolve(&headers)?;

    let mut batch = UploadBatch {
        observations: Vec::new(),
        dropped: 0,
        skipped: 0,
    };
    for result in rdr.records() {
        let raw: StringRecord = result?;
        let line = raw.position().map(|p| p.line()).unwrap_or(0);

        if raw.iter().all(|f| f.trim().is_empty()) {
            continue;
        }

        if raw.len() != expected_len {
            warn!(line, expected = expected_len, found = raw.len(), "skipping row with wrong field count");
            batch.skipped += 1;
            continue;
        }

        match columns.observation(&raw) {
            Some(obs) => batch.observations.push(obs),
            None => batch.dropped += 1,
        }
    }

    if batch.observations.is_empty() {
        return Err(AqiError::NoValidRows);
    }
    info!(
        rows = batch.observations.len(),
        dropped = batch.dropped,
        skipped = batch.skipped,
        "upload parsed"
    );
    Ok(batch)
}

pub fn load_csv(path: impl AsRef<Path>) -> Result<UploadBatch> {
    read_upload(File::open(path)?)
}
