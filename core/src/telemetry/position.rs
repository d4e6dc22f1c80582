use crate::prelude::{EngineError, EngineResult};
use bytemuck::{Pod, Zeroable};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Encoded size of one [`PositionRecord`].
pub const POSITION_RECORD_BYTES: usize = 56;

/// Platform position and attitude sample logged alongside flight recordings.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, Pod, Zeroable)]
#[repr(C)]
pub struct PositionRecord {
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    pub altitude_m: f64,
    pub heading_deg: f64,
    pub ground_speed_mps: f64,
    pub pitch_deg: f32,
    pub roll_deg: f32,
}

const _: () = assert!(std::mem::size_of::<PositionRecord>() == POSITION_RECORD_BYTES);

impl PositionRecord {
    /// Fixed little-endian layout, fields in declaration order.
    pub fn encode(&self) -> [u8; POSITION_RECORD_BYTES] {
        bytemuck::cast(self.little_endian())
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let bytes = bytes.get(..POSITION_RECORD_BYTES)?;
        Some(bytemuck::pod_read_unaligned::<Self>(bytes).little_endian())
    }

    /// Swaps every field between native and little-endian order. A no-op on
    /// little-endian targets.
    fn little_endian(self) -> Self {
        let wide = |v: f64| f64::from_bits(v.to_bits().to_le());
        let narrow = |v: f32| f32::from_bits(v.to_bits().to_le());
        Self {
            timestamp: wide(self.timestamp),
            latitude_deg: wide(self.latitude_deg),
            longitude_deg: wide(self.longitude_deg),
            altitude_m: wide(self.altitude_m),
            heading_deg: wide(self.heading_deg),
            ground_speed_mps: wide(self.ground_speed_mps),
            pitch_deg: narrow(self.pitch_deg),
            roll_deg: narrow(self.roll_deg),
        }
    }
}

struct TelemetrySession {
    path: PathBuf,
    file: BufWriter<File>,
    records: u64,
}

/// Positional log kept separate from the frame recording: its failures are reported
/// but never stop a recording.
pub struct TelemetryLogger {
    session: Mutex<Option<TelemetrySession>>,
}

impl TelemetryLogger {
    pub fn new() -> Self {
        Self {
            session: Mutex::new(None),
        }
    }

    /// Opens a new log, closing any previous one first.
    pub fn start(&self, path: impl AsRef<Path>) -> EngineResult<()> {
        let path = path.as_ref();
        self.stop();
        let file = File::create(path)
            .map_err(|err| EngineError::DiskWriteFailure(format!("telemetry {}: {}", path.display(), err)))?;
        info!("telemetry logging to {}", path.display());
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = Some(TelemetrySession {
            path: path.to_path_buf(),
            file: BufWriter::new(file),
            records: 0,
        });
        Ok(())
    }

    /// Appends a record; ignored while no log is open.
    pub fn append(&self, record: &PositionRecord) -> EngineResult<()> {
        let mut guard = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(session) = guard.as_mut() else {
            return Ok(());
        };
        match session.file.write_all(&record.encode()) {
            Ok(()) => {
                session.records += 1;
                Ok(())
            }
            Err(err) => {
                let path = session.path.display().to_string();
                *guard = None;
                Err(EngineError::DiskWriteFailure(format!("telemetry {}: {}", path, err)))
            }
        }
    }

    /// Flushes and closes the log. Returns the number of records written.
    pub fn stop(&self) -> Option<u64> {
        let session = self.session.lock().unwrap_or_else(PoisonError::into_inner).take()?;
        let TelemetrySession {
            path,
            mut file,
            records,
        } = session;
        if let Err(err) = file.flush() {
            warn!("telemetry {} flush failed: {}", path.display(), err);
        }
        info!("telemetry {} closed after {} records", path.display(), records);
        Some(records)
    }

    pub fn is_active(&self) -> bool {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn path(&self) -> Option<PathBuf> {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|session| session.path.clone())
    }
}

impl Default for TelemetryLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TelemetryLogger {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn sample() -> PositionRecord {
        PositionRecord {
            timestamp: 1_700_000_000.25,
            latitude_deg: 34.2,
            longitude_deg: -118.17,
            altitude_m: 3048.0,
            heading_deg: 271.5,
            ground_speed_mps: 62.0,
            pitch_deg: 1.5,
            roll_deg: -0.25,
        }
    }

    #[test]
    fn records_land_in_the_log_until_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("take-scenegps.bin");
        let logger = TelemetryLogger::new();
        logger.append(&sample()).unwrap();
        assert!(!path.exists());

        logger.start(&path).unwrap();
        assert!(logger.is_active());
        logger.append(&sample()).unwrap();
        logger.append(&sample()).unwrap();
        assert_eq!(logger.stop(), Some(2));
        assert!(!logger.is_active());
        logger.append(&sample()).unwrap();

        let bytes = fs::read(&path).unwrap();
        assert_eq!(bytes.len(), 2 * POSITION_RECORD_BYTES);
        assert_eq!(PositionRecord::decode(&bytes[POSITION_RECORD_BYTES..]), Some(sample()));
    }

    #[test]
    fn encoding_is_little_endian_in_field_order() {
        let bytes = sample().encode();
        assert_eq!(&bytes[..8], &1_700_000_000.25f64.to_le_bytes());
        assert_eq!(&bytes[48..52], &1.5f32.to_le_bytes());
        assert_eq!(&bytes[52..], &(-0.25f32).to_le_bytes());
        assert_eq!(PositionRecord::decode(&bytes[..55]), None);
    }

    #[test]
    fn unwritable_target_fails_without_session() {
        let logger = TelemetryLogger::new();
        let err = logger.start("/nonexistent-dir/take-scenegps.bin").unwrap_err();
        assert!(matches!(err, EngineError::DiskWriteFailure(_)));
        assert!(!logger.is_active());
        assert_eq!(logger.stop(), None);
    }
}
