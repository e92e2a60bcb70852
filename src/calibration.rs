//! Persisted per-device calibration.
//!
//! All bridge processes on a host share one JSON file keyed by device
//! identifier. Every mutation reloads the whole file, changes one field of one
//! device and writes the whole file back through a temporary sibling that is
//! renamed into place. There is no cross-process lock: calibration is a rare,
//! operator-driven action.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Raw counts per gram used until a device has been calibrated.
pub const DEFAULT_CALIBRATION_FACTOR: f64 = 420.0;

/// Tare offset and scale factor for one device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRecord {
    /// Raw count that reads as zero grams
    #[serde(default)]
    pub tare_offset: i64,
    /// Raw counts per gram
    #[serde(default = "default_factor")]
    pub calibration_factor: f64,
}

fn default_factor() -> f64 {
    DEFAULT_CALIBRATION_FACTOR
}

impl Default for CalibrationRecord {
    fn default() -> Self {
        CalibrationRecord {
            tare_offset: 0,
            calibration_factor: DEFAULT_CALIBRATION_FACTOR,
        }
    }
}

impl CalibrationRecord {
    /// Convert a (possibly filtered) raw sample to grams, rounded to 2 decimals.
    ///
    /// A zero factor is treated as 1 so a damaged record can never divide by zero.
    pub fn grams(&self, sample: f64) -> f64 {
        let factor = if self.calibration_factor == 0.0 {
            1.0
        } else {
            self.calibration_factor
        };
        let grams = (sample - self.tare_offset as f64) / factor;
        // Adding 0.0 turns -0.0 into 0.0
        (grams * 100.0).round() / 100.0 + 0.0
    }
}

/// A single field update for [`CalibrationStore::set`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CalibrationField {
    TareOffset(i64),
    CalibrationFactor(f64),
}

impl CalibrationField {
    fn apply(self, record: &mut CalibrationRecord) {
        match self {
            CalibrationField::TareOffset(offset) => record.tare_offset = offset,
            CalibrationField::CalibrationFactor(factor) => record.calibration_factor = factor,
        }
    }
}

/// Errors from reading or writing the calibration file.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Calibration store I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Calibration store {path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Failed to serialize calibration store: {0}")]
    Serialize(#[from] serde_json::Error),
}

type Records = BTreeMap<String, CalibrationRecord>;

/// Handle to the shared calibration file.
#[derive(Debug, Clone)]
pub struct CalibrationStore {
    path: PathBuf,
}

impl CalibrationStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        CalibrationStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Calibration for `device_id`, or the default when it has none.
    ///
    /// Never fails: a missing or unreadable file yields the default record.
    pub fn get(&self, device_id: &str) -> CalibrationRecord {
        match self.load() {
            Ok(records) => records.get(device_id).copied().unwrap_or_default(),
            Err(error) => {
                log::warn!("{error}; using default calibration for {device_id}");
                CalibrationRecord::default()
            }
        }
    }

    /// Update one field of one device, leaving everything else in the file untouched.
    ///
    /// Returns the device's record as written.
    pub fn set(
        &self,
        device_id: &str,
        field: CalibrationField,
    ) -> Result<CalibrationRecord, StoreError> {
        let mut records = self.load()?;
        let record = records.entry(device_id.to_string()).or_default();
        field.apply(record);
        let updated = *record;

        self.save(&records)?;
        log::debug!("Stored calibration for {device_id}: {updated:?}");
        Ok(updated)
    }

    fn load(&self) -> Result<Records, StoreError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(Records::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        if content.trim().is_empty() {
            return Ok(Records::new());
        }

        serde_json::from_str(&content).map_err(|source| StoreError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    fn save(&self, records: &Records) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(records)?;

        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };
        fs::write(&tmp_path, json).map_err(io_err)?;
        fs::rename(&tmp_path, &self.path).map_err(io_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> CalibrationStore {
        CalibrationStore::new(dir.path().join("calibration.json"))
    }

    #[test]
    fn test_missing_file_yields_default() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        assert_eq!(store.get("/dev/ttyUSB0"), CalibrationRecord::default());
        assert!(!store.path().exists());
    }

    #[test]
    fn test_unknown_device_yields_default() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store
            .set("/dev/ttyUSB0", CalibrationField::TareOffset(55))
            .unwrap();
        assert_eq!(store.get("/dev/ttyACM0"), CalibrationRecord::default());
    }

    #[test]
    fn test_corrupt_file_reads_as_default() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        fs::write(store.path(), "{ not json").unwrap();
        assert_eq!(store.get("/dev/ttyUSB0"), CalibrationRecord::default());
    }

    #[test]
    fn test_corrupt_file_rejects_writes() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        fs::write(store.path(), "{ not json").unwrap();

        let result = store.set("/dev/ttyUSB0", CalibrationField::TareOffset(1));
        assert!(matches!(result, Err(StoreError::Parse { .. })));
        assert_eq!(fs::read_to_string(store.path()).unwrap(), "{ not json");
    }

    #[test]
    fn test_set_updates_only_named_field() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        store
            .set("/dev/ttyUSB0", CalibrationField::CalibrationFactor(512.5))
            .unwrap();
        let record = store
            .set("/dev/ttyUSB0", CalibrationField::TareOffset(-120))
            .unwrap();

        assert_eq!(
            record,
            CalibrationRecord {
                tare_offset: -120,
                calibration_factor: 512.5,
            }
        );
        assert_eq!(store.get("/dev/ttyUSB0"), record);
    }

    #[test]
    fn test_set_never_touches_other_devices() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        store
            .set("device-b", CalibrationField::TareOffset(777))
            .unwrap();
        store
            .set("device-b", CalibrationField::CalibrationFactor(33.0))
            .unwrap();
        let before = store.get("device-b");

        store
            .set("device-a", CalibrationField::TareOffset(1))
            .unwrap();
        store
            .set("device-a", CalibrationField::CalibrationFactor(2.0))
            .unwrap();

        assert_eq!(store.get("device-b"), before);
    }

    #[test]
    fn test_file_format() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store
            .set("/dev/ttyUSB0", CalibrationField::TareOffset(12345))
            .unwrap();

        let content = fs::read_to_string(store.path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "/dev/ttyUSB0": { "tare_offset": 12345, "calibration_factor": 420.0 }
            })
        );
        assert!(!dir.path().join("calibration.json.tmp").exists());
    }

    #[test]
    fn test_partial_record_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        fs::write(store.path(), r#"{"scale": {"tare_offset": 10}}"#).unwrap();
        assert_eq!(
            store.get("scale"),
            CalibrationRecord {
                tare_offset: 10,
                calibration_factor: DEFAULT_CALIBRATION_FACTOR,
            }
        );
    }

    #[test]
    fn test_grams_conversion() {
        let record = CalibrationRecord {
            tare_offset: 1000,
            calibration_factor: 5.0,
        };
        assert_eq!(record.grams(1000.0), 0.0);
        assert_eq!(record.grams(1500.0), 100.0);
        assert_eq!(record.grams(1002.5), 0.5);
        assert_eq!(record.grams(1000.01), 0.0);
        assert!(record.grams(999.99).is_sign_positive());
    }

    #[test]
    fn test_grams_rounds_to_two_decimals() {
        let record = CalibrationRecord {
            tare_offset: 0,
            calibration_factor: 3.0,
        };
        assert_eq!(record.grams(1.0), 0.33);
        assert_eq!(record.grams(-2.0), -0.67);
    }

    #[test]
    fn test_zero_factor_does_not_divide_by_zero() {
        let record = CalibrationRecord {
            tare_offset: 10,
            calibration_factor: 0.0,
        };
        assert_eq!(record.grams(15.0), 5.0);
    }
}
