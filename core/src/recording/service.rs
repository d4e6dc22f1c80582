use crate::prelude::{EngineError, EngineEvent, EngineResult};
use crate::recording::naming::sidecar_path_for;
use crate::recording::queue::WriteQueue;
use crate::recording::validation::validate_target;
use crate::source::geometry::SAMPLE_BYTES;
use crate::source::{ByteOrganization, Frame, FrameGeometry, SampleFormat};
use chrono::{DateTime, Local};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use tokio::sync::broadcast;

/// Called once when a job ends, however it ends.
pub type CompletionHook = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingMode {
    Finite,
    Continuous,
}

/// Settings the service reads from the engine configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordingSettings {
    pub check_for_overwrites: bool,
    pub write_queue_depth: usize,
    pub organization: ByteOrganization,
    pub format: SampleFormat,
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self {
            check_for_overwrites: true,
            write_queue_depth: 32,
            organization: ByteOrganization::Bil,
            format: SampleFormat::default(),
        }
    }
}

/// Everything needed to start a job.
pub struct RecordingRequest {
    pub path: PathBuf,
    /// Raw frames to consume; zero records until stopped.
    pub frame_count: u64,
    pub averaging: u64,
    pub confirm_overwrite: bool,
    /// Generated targets skip name validation.
    pub validate: bool,
    pub on_complete: Option<CompletionHook>,
}

impl RecordingRequest {
    pub fn new(path: impl Into<PathBuf>, frame_count: u64, averaging: u64) -> Self {
        Self {
            path: path.into(),
            frame_count,
            averaging,
            confirm_overwrite: false,
            validate: true,
            on_complete: None,
        }
    }

    pub fn confirm_overwrite(mut self, confirm: bool) -> Self {
        self.confirm_overwrite = confirm;
        self
    }

    pub fn skip_validation(mut self) -> Self {
        self.validate = false;
        self
    }

    pub fn on_complete(mut self, hook: CompletionHook) -> Self {
        self.on_complete = Some(hook);
        self
    }
}

/// Read-only view of the active job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingStatus {
    pub mode: RecordingMode,
    pub path: PathBuf,
    pub frame_budget: u64,
    pub averaging: u64,
    pub frames_remaining: u64,
}

/// Description written beside each recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingSidecar {
    pub data_file: PathBuf,
    pub mode: RecordingMode,
    pub width: usize,
    pub height: usize,
    pub organization: ByteOrganization,
    pub twos_complement: bool,
    pub averaging: u64,
    pub frame_budget: u64,
    pub records_written: u64,
    pub started: String,
    pub finished: String,
}

/// Applies the budget rules: zero means continuous, a budget below the averaging factor
/// is raised to it, and the rest is rounded down to whole groups.
pub fn normalize_budget(frame_count: u64, averaging: u64) -> (RecordingMode, u64, u64) {
    let averaging = averaging.max(1);
    if frame_count == 0 {
        return (RecordingMode::Continuous, 0, averaging);
    }
    let raised = frame_count.max(averaging);
    (RecordingMode::Finite, raised - raised % averaging, averaging)
}

struct Record {
    geometry: FrameGeometry,
    values: Vec<u16>,
}

/// Lays a row-major record out on disk.
fn encode_record(record: &Record, organization: ByteOrganization, out: &mut Vec<u8>) {
    out.clear();
    out.reserve(record.values.len() * SAMPLE_BYTES);
    let width = record.geometry.width;
    let height = record.geometry.data_height;
    match organization {
        ByteOrganization::Bil | ByteOrganization::Bsq => {
            for value in &record.values {
                out.extend_from_slice(&value.to_le_bytes());
            }
        }
        ByteOrganization::Bip => {
            for x in 0..width {
                for band in 0..height {
                    out.extend_from_slice(&record.values[band * width + x].to_le_bytes());
                }
            }
        }
    }
}

struct JobShared {
    mode: RecordingMode,
    path: PathBuf,
    frame_budget: u64,
    averaging: u64,
    remaining: AtomicU64,
    failed: AtomicBool,
    /// Set when another job became active first.
    abandoned: AtomicBool,
}

impl JobShared {
    fn status(&self) -> RecordingStatus {
        RecordingStatus {
            mode: self.mode,
            path: self.path.clone(),
            frame_budget: self.frame_budget,
            averaging: self.averaging,
            frames_remaining: self.remaining.load(Ordering::SeqCst),
        }
    }
}

struct ActiveJob {
    shared: Arc<JobShared>,
    queue: Arc<WriteQueue<Record>>,
    writer: Option<JoinHandle<()>>,
    format: SampleFormat,
    geometry: Option<FrameGeometry>,
    group_sums: Vec<u64>,
    group_len: u64,
}

impl ActiveJob {
    /// Folds one frame into the current group. Returns a record when the group is full.
    fn accumulate(&mut self, frame: &Frame) -> Option<Record> {
        let geometry = *frame.geometry();
        match self.geometry {
            None => {
                self.geometry = Some(geometry);
                self.group_sums = vec![0; geometry.pixels()];
            }
            Some(expected) if !expected.same_shape(&geometry) => {
                warn!("recording skips {} frame, job expects {}", geometry, expected);
                return None;
            }
            Some(_) => {}
        }

        let format = self.format;
        for (sum, &raw) in self.group_sums.iter_mut().zip(frame.samples()) {
            *sum += format.ordered(raw) as u64;
        }
        self.group_len += 1;
        if self.shared.mode == RecordingMode::Finite {
            self.shared.remaining.fetch_sub(1, Ordering::SeqCst);
        }
        if self.group_len < self.shared.averaging {
            return None;
        }

        let n = self.group_len;
        let values = self
            .group_sums
            .iter_mut()
            .map(|sum| {
                let mean = ((*sum + n / 2) / n) as u16;
                *sum = 0;
                format.ordered(mean)
            })
            .collect();
        self.group_len = 0;
        Some(Record { geometry, values })
    }

    fn finish(mut self) -> Option<JoinHandle<()>> {
        if self.group_len > 0 {
            debug!("discarding partial group of {} frames", self.group_len);
        }
        self.queue.close();
        self.writer.take()
    }
}

struct WriterTask {
    shared: Arc<JobShared>,
    queue: Arc<WriteQueue<Record>>,
    file: BufWriter<File>,
    organization: ByteOrganization,
    format: SampleFormat,
    events: broadcast::Sender<EngineEvent>,
    started: DateTime<Local>,
    on_complete: Option<CompletionHook>,
}

impl WriterTask {
    fn run(mut self) {
        let mut records = 0u64;
        let mut geometry = None;
        let mut bytes = Vec::new();
        let mut result = Ok(());

        while let Some(record) = self.queue.pop() {
            if geometry.is_none() {
                geometry = Some(record.geometry);
            }
            encode_record(&record, self.organization, &mut bytes);
            if let Err(err) = self.file.write_all(&bytes) {
                result = Err(err);
                break;
            }
            records += 1;
            if self.shared.mode == RecordingMode::Finite {
                let _ = self.events.send(EngineEvent::SavingProgress(
                    self.shared.remaining.load(Ordering::SeqCst),
                ));
            }
        }
        let result = result.and_then(|_| self.file.flush());
        if self.discard_abandoned() {
            return;
        }
        if result.is_ok() {
            if let Some(geometry) = geometry {
                if let Err(err) = self.write_sidecar(geometry, records) {
                    warn!("sidecar for {} not written: {}", self.shared.path.display(), err);
                }
            }
        }
        if let Some(hook) = self.on_complete.take() {
            hook();
        }

        match result {
            Ok(()) => {
                info!("recording {} closed after {} records", self.shared.path.display(), records);
                let _ = self.events.send(EngineEvent::SavingComplete);
            }
            Err(err) => {
                self.shared.failed.store(true, Ordering::SeqCst);
                self.queue.close();
                let err = EngineError::DiskWriteFailure(format!("{}: {}", self.shared.path.display(), err));
                error!("{}", err);
                let _ = self.events.send(EngineEvent::from_error(&err));
            }
        }
    }

    /// A job that never became active ends without sidecar, hook or events. Its file is
    /// left alone since the winning job may share the path.
    fn discard_abandoned(&self) -> bool {
        let abandoned = self.shared.abandoned.load(Ordering::SeqCst);
        if abandoned {
            debug!("writer for {} abandoned before start", self.shared.path.display());
        }
        abandoned
    }

    fn write_sidecar(&self, geometry: FrameGeometry, records: u64) -> std::io::Result<()> {
        let sidecar = RecordingSidecar {
            data_file: self.shared.path.clone(),
            mode: self.shared.mode,
            width: geometry.width,
            height: geometry.data_height,
            organization: self.organization,
            twos_complement: self.format.twos_complement,
            averaging: self.shared.averaging,
            frame_budget: self.shared.frame_budget,
            records_written: records,
            started: self.started.to_rfc3339(),
            finished: Local::now().to_rfc3339(),
        };
        let file = File::create(sidecar_path_for(&self.shared.path))?;
        serde_json::to_writer_pretty(file, &sidecar)?;
        Ok(())
    }
}

/// Streams frames to disk on a dedicated writer thread.
pub struct RecordingService {
    settings: Mutex<RecordingSettings>,
    active: Mutex<Option<ActiveJob>>,
    retired: Mutex<Vec<JoinHandle<()>>>,
    overruns: AtomicU64,
    events: broadcast::Sender<EngineEvent>,
}

impl RecordingService {
    pub fn new(settings: RecordingSettings, events: broadcast::Sender<EngineEvent>) -> Self {
        Self {
            settings: Mutex::new(settings),
            active: Mutex::new(None),
            retired: Mutex::new(Vec::new()),
            overruns: AtomicU64::new(0),
            events,
        }
    }

    /// Applies to jobs started afterwards.
    pub fn update_settings(&self, settings: RecordingSettings) {
        *self.settings.lock().unwrap_or_else(PoisonError::into_inner) = settings;
    }

    pub fn start_finite(
        &self,
        frame_count: u64,
        path: impl AsRef<Path>,
        averaging: u64,
        confirm_overwrite: bool,
    ) -> EngineResult<RecordingStatus> {
        self.start(
            RecordingRequest::new(path.as_ref(), frame_count, averaging).confirm_overwrite(confirm_overwrite),
        )
    }

    pub fn start_continuous(&self, path: impl AsRef<Path>, confirm_overwrite: bool) -> EngineResult<RecordingStatus> {
        self.start(RecordingRequest::new(path.as_ref(), 0, 1).confirm_overwrite(confirm_overwrite))
    }

    pub fn start(&self, request: RecordingRequest) -> EngineResult<RecordingStatus> {
        let settings = *self.settings.lock().unwrap_or_else(PoisonError::into_inner);
        if request.validate {
            validate_target(&request.path, settings.check_for_overwrites, request.confirm_overwrite)?;
        }

        if self.is_recording() {
            return Err(EngineError::InvalidState("a recording is already running".into()));
        }
        // Storage work happens before `active` is taken: `push_frame` needs that lock
        // on every frame.
        self.join_retired();

        let (mode, frame_budget, averaging) = normalize_budget(request.frame_count, request.averaging);
        if mode == RecordingMode::Finite && frame_budget != request.frame_count {
            info!(
                "frame count {} adjusted to {} for averaging {}",
                request.frame_count, frame_budget, averaging
            );
        }

        let file = File::create(&request.path).map_err(|err| {
            EngineError::DiskWriteFailure(format!("creating {}: {}", request.path.display(), err))
        })?;
        let shared = Arc::new(JobShared {
            mode,
            path: request.path.clone(),
            frame_budget,
            averaging,
            remaining: AtomicU64::new(frame_budget),
            failed: AtomicBool::new(false),
            abandoned: AtomicBool::new(false),
        });
        let queue = Arc::new(WriteQueue::new(settings.write_queue_depth));
        let task = WriterTask {
            shared: Arc::clone(&shared),
            queue: Arc::clone(&queue),
            file: BufWriter::new(file),
            organization: settings.organization,
            format: settings.format,
            events: self.events.clone(),
            started: Local::now(),
            on_complete: request.on_complete,
        };
        let writer = thread::Builder::new()
            .name("recording-writer".into())
            .spawn(move || task.run())
            .map_err(|err| EngineError::DiskWriteFailure(format!("spawning writer: {}", err)))?;

        let job = ActiveJob {
            shared: Arc::clone(&shared),
            queue,
            writer: Some(writer),
            format: settings.format,
            geometry: None,
            group_sums: Vec::new(),
            group_len: 0,
        };
        {
            let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
            if active.is_none() {
                *active = Some(job);
                info!(
                    "recording {:?} to {} (budget {}, averaging {})",
                    mode,
                    request.path.display(),
                    frame_budget,
                    averaging
                );
                return Ok(shared.status());
            }
        }

        // Another start won the race while the file was being opened.
        shared.abandoned.store(true, Ordering::SeqCst);
        if let Some(writer) = job.finish() {
            if writer.join().is_err() {
                error!("recording writer panicked");
            }
        }
        Err(EngineError::InvalidState("a recording is already running".into()))
    }

    /// Ends the active job at the current frame boundary. Returns `false` when idle.
    pub fn stop(&self) -> bool {
        let job = self.active.lock().unwrap_or_else(PoisonError::into_inner).take();
        match job {
            Some(job) => {
                info!("stopping recording {}", job.shared.path.display());
                if let Some(writer) = job.finish() {
                    if writer.join().is_err() {
                        error!("recording writer panicked");
                    }
                }
                true
            }
            None => false,
        }
    }

    /// Called by the acquisition thread for every distributed frame.
    pub fn push_frame(&self, frame: &Frame) {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(job) = active.as_mut() else {
            return;
        };
        if job.shared.failed.load(Ordering::SeqCst) {
            if let Some(job) = active.take() {
                self.retire(job);
            }
            return;
        }

        if let Some(record) = job.accumulate(frame) {
            if job.queue.push(record) {
                let count = self.overruns.fetch_add(1, Ordering::SeqCst) + 1;
                warn!("recording writer fell behind, dropped oldest record ({} total)", count);
                let _ = self.events.send(EngineEvent::SavingOverrun(count));
            }
        }

        let done = job.shared.mode == RecordingMode::Finite && job.shared.remaining.load(Ordering::SeqCst) == 0;
        if done {
            if let Some(job) = active.take() {
                debug!("recording budget consumed");
                self.retire(job);
            }
        }
    }

    pub fn is_recording(&self) -> bool {
        self.active.lock().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    pub fn status(&self) -> Option<RecordingStatus> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|job| job.shared.status())
    }

    /// Records dropped because the writer fell behind, over the service lifetime.
    pub fn overruns(&self) -> u64 {
        self.overruns.load(Ordering::SeqCst)
    }

    /// Blocks until writers of jobs that ended on their own have flushed.
    pub fn wait_idle(&self) {
        self.join_retired();
    }

    /// Hands a self-completed job's writer to `retired` before closing its queue, so
    /// `wait_idle` can never miss a writer that is still flushing.
    fn retire(&self, mut job: ActiveJob) {
        let mut retired = self.retired.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(writer) = job.writer.take() {
            retired.push(writer);
        }
        job.finish();
    }

    fn join_retired(&self) {
        let writers: Vec<_> = self
            .retired
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for writer in writers {
            if writer.join().is_err() {
                error!("recording writer panicked");
            }
        }
    }
}

impl Drop for RecordingService {
    fn drop(&mut self) {
        self.stop();
        self.join_retired();
    }
}
