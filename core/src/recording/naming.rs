use chrono::{DateTime, Local, TimeZone};
use std::path::{Path, PathBuf};

pub const SCENE_DATA_SUFFIX: &str = "-scenedata.raw";
pub const SCENE_TELEMETRY_SUFFIX: &str = "-scenegps.bin";
const STAMP_FORMAT: &str = "%Y%m%dt%H%M%S";

/// Builds timestamped recording names inside a data directory.
#[derive(Debug, Clone)]
pub struct FilenameGenerator {
    location: PathBuf,
}

impl FilenameGenerator {
    pub fn new(location: impl Into<PathBuf>) -> Self {
        Self {
            location: location.into(),
        }
    }

    pub fn location(&self) -> &Path {
        &self.location
    }

    /// Raw data and telemetry paths sharing the current local timestamp.
    pub fn generate(&self) -> (PathBuf, PathBuf) {
        self.generate_at(&Local::now())
    }

    pub fn generate_at<Tz: TimeZone>(&self, when: &DateTime<Tz>) -> (PathBuf, PathBuf)
    where
        Tz::Offset: std::fmt::Display,
    {
        let stamp = when.format(STAMP_FORMAT).to_string();
        (
            self.location.join(format!("{}{}", stamp, SCENE_DATA_SUFFIX)),
            self.location.join(format!("{}{}", stamp, SCENE_TELEMETRY_SUFFIX)),
        )
    }
}

/// Telemetry log paired with a recording: `<stem>-scenegps.bin` beside the data file.
/// A stem already ending in `-scenedata` has that suffix replaced.
pub fn telemetry_path_for(data_path: &Path) -> PathBuf {
    let stem = data_path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = stem.strip_suffix("-scenedata").unwrap_or(&stem);
    data_path.with_file_name(format!("{}{}", stem, SCENE_TELEMETRY_SUFFIX))
}

/// JSON description written next to a recording.
pub fn sidecar_path_for(data_path: &Path) -> PathBuf {
    let mut name = data_path.as_os_str().to_owned();
    name.push(".json");
    PathBuf::from(name)
}
