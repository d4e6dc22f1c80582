use crate::config::EngineConfig;
use crate::prelude::{EngineError, EngineEvent, EngineResult, FrameSource};
use crate::processing::{
    load_mask_file, ArcCell, ArcSlot, CalibrationMask, CrossHair, FrameDistributor, LiveParams, MaskBuilder,
    MaskFileSelection, OverlayWidths, ProductContext, ProductKind, ProductRequest, ProductSettings,
    ProductSnapshot, ProductSubscription, StatisticsEngine, MAX_STD_DEV_N,
};
use crate::recording::{
    telemetry_path_for, FilenameGenerator, RecordingRequest, RecordingService, RecordingSettings, RecordingStatus,
};
use crate::source::{Frame, FrameGeometry};
use crate::telemetry::{AcquisitionMetrics, MetricsSnapshot, PositionRecord, TelemetryLogger};
use log::{debug, error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 256;

type SourceSlot = Arc<Mutex<Option<Box<dyn FrameSource>>>>;

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn product_settings(config: &EngineConfig) -> ProductSettings {
    ProductSettings {
        format: config.sample_format(),
        max_fps: config.max_fps,
        fft_window: config.fft_window,
    }
}

fn recording_settings(config: &EngineConfig) -> RecordingSettings {
    RecordingSettings {
        check_for_overwrites: config.check_for_overwrites,
        write_queue_depth: config.write_queue_depth,
        organization: config.recording_organization,
        format: config.sample_format(),
    }
}

fn live_params(config: &EngineConfig, previous: Option<&LiveParams>) -> LiveParams {
    LiveParams {
        std_dev_n: config.std_dev_n,
        lines_to_average: config.lines_to_average,
        overlay_widths: config.overlay_widths,
        crosshair: previous.and_then(|p| p.crosshair),
        use_dsf: previous.map_or(false, |p| p.use_dsf),
        zero_dc: config.zero_dc,
    }
}

/// Shared stop switch for one capture run.
struct CaptureControl {
    running: AtomicBool,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl CaptureControl {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Signals the acquisition thread and waits for it to leave its loop.
    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let handle = lock(&self.handle).take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                error!("acquisition thread panicked");
            }
        }
    }
}

/// Handle for a running capture. Dropping it stops acquisition at the next frame boundary.
pub struct CaptureSession {
    control: Arc<CaptureControl>,
}

impl CaptureSession {
    pub fn is_running(&self) -> bool {
        self.control.is_running()
    }

    pub fn stop(self) {
        self.control.stop();
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.control.stop();
    }
}

/// Everything the acquisition thread touches.
struct Acquisition {
    control: Arc<CaptureControl>,
    source: SourceSlot,
    distributor: Arc<FrameDistributor>,
    mask_builder: Arc<MaskBuilder>,
    recording: Arc<RecordingService>,
    metrics: Arc<AcquisitionMetrics>,
    events: broadcast::Sender<EngineEvent>,
}

impl Acquisition {
    fn run(self) {
        let Some(mut source) = lock(&self.source).take() else {
            warn!("capture started without an open source");
            self.control.running.store(false, Ordering::SeqCst);
            return;
        };
        self.metrics.reset_rate();
        info!("acquisition started");

        while self.control.is_running() {
            match source.next_frame() {
                Ok(Some(frame)) => self.handle_frame(frame),
                Ok(None) => {
                    info!("source reached end of stream");
                    break;
                }
                Err(err) => {
                    self.metrics.record_error();
                    error!("acquisition stopped: {}", err);
                    let _ = self.events.send(EngineEvent::from_error(&err));
                    break;
                }
            }
        }

        *lock(&self.source) = Some(source);
        self.control.running.store(false, Ordering::SeqCst);
        info!("acquisition stopped after {} frames", self.metrics.snapshot().frames);
        let _ = self.events.send(EngineEvent::CaptureStopped);
    }

    fn handle_frame(&self, frame: Frame) {
        let snapshot = self.distributor.publish(frame);
        self.mask_builder.accumulate(&snapshot.frame);
        self.recording.push_frame(&snapshot.frame);
        self.metrics.set_write_overruns(self.recording.overruns());
        if let Some(fps) = self.metrics.record_frame() {
            debug!("acquisition rate {:.2} fps", fps);
            let _ = self.events.send(EngineEvent::FpsUpdate(fps));
        }
        let _ = self.events.send(EngineEvent::FrameReady(snapshot.generation));
    }
}

/// Control surface of the engine: owns the source, the live frame, the dark mask, the
/// active product and the recording and telemetry services.
pub struct TakeEngine {
    config: ArcCell<EngineConfig>,
    events: broadcast::Sender<EngineEvent>,
    distributor: Arc<FrameDistributor>,
    mask: Arc<ArcSlot<CalibrationMask>>,
    mask_builder: Arc<MaskBuilder>,
    params: Arc<ArcCell<LiveParams>>,
    settings: Arc<ArcCell<ProductSettings>>,
    statistics: StatisticsEngine,
    product: Mutex<Option<ProductSubscription>>,
    recording: Arc<RecordingService>,
    telemetry: Arc<TelemetryLogger>,
    metrics: Arc<AcquisitionMetrics>,
    source: SourceSlot,
    geometry: Mutex<Option<FrameGeometry>>,
    capture: Mutex<Option<Arc<CaptureControl>>>,
}

impl TakeEngine {
    pub fn new(config: EngineConfig) -> Self {
        let config = config.normalized();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let distributor = Arc::new(FrameDistributor::new());
        let mask = Arc::new(ArcSlot::empty());
        let params = Arc::new(ArcCell::new(live_params(&config, None)));
        let settings = Arc::new(ArcCell::new(product_settings(&config)));
        let statistics = StatisticsEngine::new(ProductContext {
            distributor: Arc::clone(&distributor),
            mask: Arc::clone(&mask),
            params: Arc::clone(&params),
            settings: Arc::clone(&settings),
            events: events.clone(),
        });
        let recording = Arc::new(RecordingService::new(recording_settings(&config), events.clone()));

        Self {
            config: ArcCell::new(config),
            events,
            distributor,
            mask,
            mask_builder: Arc::new(MaskBuilder::new()),
            params,
            settings,
            statistics,
            product: Mutex::new(None),
            recording,
            telemetry: Arc::new(TelemetryLogger::new()),
            metrics: Arc::new(AcquisitionMetrics::new()),
            source: Arc::new(Mutex::new(None)),
            geometry: Mutex::new(None),
            capture: Mutex::new(None),
        }
    }

    pub fn config(&self) -> Arc<EngineConfig> {
        self.config.load()
    }

    /// Replaces the configuration. Running products pick up the new values on their
    /// next frame; a running recording keeps the settings it started with.
    pub fn reload(&self, config: EngineConfig) {
        let config = config.normalized();
        let previous = self.params.load();
        self.params.store(live_params(&config, Some(&previous)));
        self.settings.store(product_settings(&config));
        self.recording.update_settings(recording_settings(&config));
        self.config.store(config);
        info!("engine configuration reloaded");
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    fn report(&self, err: EngineError) -> EngineError {
        let _ = self.events.send(EngineEvent::from_error(&err));
        err
    }

    // ---- source lifecycle ----

    /// Opens `source` and makes it the engine's source. Any previous source is closed.
    pub fn open(&self, mut source: Box<dyn FrameSource>) -> EngineResult<FrameGeometry> {
        if self.is_capturing() {
            return Err(EngineError::InvalidState("cannot open a source while capturing".into()));
        }
        if let Some(mut previous) = lock(&self.source).take() {
            previous.close();
        }
        let geometry = source.open().map_err(|err| self.report(err))?;
        if let Some(mask) = self.mask.load() {
            if let Err(err) = mask.check_geometry(&geometry) {
                warn!("loaded dark mask no longer applies: {}", err);
                let _ = self.events.send(EngineEvent::from_error(&err));
            }
        }
        info!("source opened with geometry {}", geometry);
        *lock(&self.source) = Some(source);
        *lock(&self.geometry) = Some(geometry);
        Ok(geometry)
    }

    /// Stops everything and releases the source.
    pub fn close(&self) {
        self.stop_capture();
        self.stop_saving();
        *lock(&self.product) = None;
        if let Some(mut source) = lock(&self.source).take() {
            source.close();
        }
        self.distributor.clear();
        *lock(&self.geometry) = None;
        info!("engine closed");
    }

    pub fn start_capture(&self) -> EngineResult<CaptureSession> {
        let mut capture = lock(&self.capture);
        if capture.as_ref().map_or(false, |control| control.is_running()) {
            return Err(EngineError::InvalidState("capture already running".into()));
        }
        if lock(&self.source).is_none() {
            return Err(EngineError::InvalidState("no source is open".into()));
        }

        let control = Arc::new(CaptureControl {
            running: AtomicBool::new(true),
            handle: Mutex::new(None),
        });
        let acquisition = Acquisition {
            control: Arc::clone(&control),
            source: Arc::clone(&self.source),
            distributor: Arc::clone(&self.distributor),
            mask_builder: Arc::clone(&self.mask_builder),
            recording: Arc::clone(&self.recording),
            metrics: Arc::clone(&self.metrics),
            events: self.events.clone(),
        };
        let handle = thread::Builder::new()
            .name("acquisition".into())
            .spawn(move || acquisition.run())
            .map_err(|err| EngineError::InvalidState(format!("spawning acquisition thread: {}", err)))?;
        *lock(&control.handle) = Some(handle);
        *capture = Some(Arc::clone(&control));
        Ok(CaptureSession { control })
    }

    /// Stops acquisition at the next frame boundary. No-op when not capturing.
    pub fn stop_capture(&self) {
        let control = lock(&self.capture).take();
        if let Some(control) = control {
            control.stop();
        }
    }

    pub fn is_capturing(&self) -> bool {
        lock(&self.capture)
            .as_ref()
            .map_or(false, |control| control.is_running())
    }

    // ---- dark mask ----

    pub fn start_mask_capture(&self) -> EngineResult<()> {
        let geometry = self.require_geometry()?;
        self.mask_builder.start(geometry, self.config.load().sample_format());
        Ok(())
    }

    /// Finishes a live dark capture and installs the result.
    pub fn stop_mask_capture(&self) -> EngineResult<()> {
        match self.mask_builder.finish() {
            Some(mask) => {
                self.install_mask(mask);
                Ok(())
            }
            None => Err(EngineError::InvalidState("dark capture collected no frames".into())),
        }
    }

    pub fn is_capturing_mask(&self) -> bool {
        self.mask_builder.is_capturing()
    }

    /// Averages `element_count` samples starting at `element_offset` of a dark file into
    /// the mask. On failure the current mask is left untouched.
    pub fn load_mask(&self, path: impl AsRef<Path>, element_count: u64, element_offset: u64) -> EngineResult<()> {
        let geometry = self.require_geometry()?;
        let selection = MaskFileSelection {
            element_count,
            element_offset,
        };
        let format = self.config.load().sample_format();
        let mask = load_mask_file(path.as_ref(), &geometry, selection, format).map_err(|err| self.report(err))?;
        self.install_mask(mask);
        Ok(())
    }

    /// Loads the inclusive 1-indexed frame range `lo..=hi` of a dark file.
    pub fn load_mask_range(&self, path: impl AsRef<Path>, lo: i64, hi: i64) -> EngineResult<()> {
        let path = path.as_ref();
        let geometry = self.require_geometry()?;
        let file_len = std::fs::metadata(path)
            .map(|meta| meta.len())
            .map_err(|err| self.report(EngineError::MaskFileInvalid(format!("{}: {}", path.display(), err))))?;
        let selection =
            MaskFileSelection::from_frame_range(file_len, &geometry, lo, hi).map_err(|err| self.report(err))?;
        self.load_mask(path, selection.element_count, selection.element_offset)
    }

    pub fn mask(&self) -> Option<Arc<CalibrationMask>> {
        self.mask.load()
    }

    fn install_mask(&self, mask: CalibrationMask) {
        info!("dark mask installed ({} frames)", mask.frames());
        self.mask.store(Arc::new(mask));
        let _ = self.events.send(EngineEvent::MaskReady);
    }

    // ---- products and live parameters ----

    /// Replaces the running product. The previous worker is stopped first.
    pub fn set_active_product(&self, request: ProductRequest) {
        let mut product = lock(&self.product);
        if let Some(previous) = product.take() {
            previous.release();
        }
        debug!("active product {:?}", request);
        *product = Some(self.statistics.subscribe(request));
    }

    pub fn clear_active_product(&self) {
        if let Some(previous) = lock(&self.product).take() {
            previous.release();
        }
    }

    pub fn active_product(&self) -> Option<ProductKind> {
        lock(&self.product).as_ref().map(|product| product.kind())
    }

    pub fn latest_product(&self) -> Option<Arc<ProductSnapshot>> {
        lock(&self.product).as_ref().and_then(|product| product.latest())
    }

    pub fn live_params(&self) -> Arc<LiveParams> {
        self.params.load()
    }

    pub fn set_averaging_window(&self, lines: usize) {
        self.params.update(|p| p.lines_to_average = lines.max(1));
    }

    pub fn set_std_dev_n(&self, n: usize) {
        self.params.update(|p| p.std_dev_n = n.clamp(1, MAX_STD_DEV_N - 1));
    }

    pub fn set_overlay_spans(&self, widths: OverlayWidths) {
        self.params.update(|p| p.overlay_widths = widths.clamped());
    }

    pub fn set_crosshair(&self, crosshair: Option<CrossHair>) {
        self.params.update(|p| p.crosshair = crosshair);
    }

    /// Turns dark subtraction of the derived products on or off. Returns the new state.
    pub fn toggle_use_dsf(&self, enabled: bool) -> bool {
        if enabled && !self.mask.is_set() {
            warn!("dark subtraction enabled without a mask; products stay raw until one loads");
        }
        self.params.update(|p| p.use_dsf = enabled).use_dsf
    }

    pub fn set_zero_dc(&self, zero_dc: bool) {
        self.params.update(|p| p.zero_dc = zero_dc);
    }

    // ---- recording ----

    pub fn start_saving_finite(
        &self,
        frame_count: u64,
        path: impl AsRef<Path>,
        averaging: u64,
        confirm_overwrite: bool,
    ) -> EngineResult<RecordingStatus> {
        let request =
            RecordingRequest::new(path.as_ref(), frame_count, averaging).confirm_overwrite(confirm_overwrite);
        self.start_saving(request)
    }

    pub fn start_saving_continuous(&self, path: impl AsRef<Path>, confirm_overwrite: bool) -> EngineResult<RecordingStatus> {
        let request = RecordingRequest::new(path.as_ref(), 0, 1).confirm_overwrite(confirm_overwrite);
        self.start_saving(request)
    }

    /// Records into a generated `<stamp>-scenedata.raw` under the configured data
    /// location, with telemetry in the matching `-scenegps.bin`.
    pub fn start_flight_recording(&self, frame_count: u64) -> EngineResult<RecordingStatus> {
        let config = self.config.load();
        let (data, telemetry) = FilenameGenerator::new(&config.data_location).generate();
        let request = RecordingRequest::new(data, frame_count, 1).skip_validation();
        self.start_recording_with_telemetry(request, telemetry)
    }

    fn start_saving(&self, request: RecordingRequest) -> EngineResult<RecordingStatus> {
        if self.config.load().flight_mode {
            let telemetry = telemetry_path_for(&request.path);
            self.start_recording_with_telemetry(request, telemetry)
        } else {
            self.recording.start(request).map_err(|err| self.report(err))
        }
    }

    fn start_recording_with_telemetry(
        &self,
        request: RecordingRequest,
        telemetry_path: PathBuf,
    ) -> EngineResult<RecordingStatus> {
        if self.recording.is_recording() {
            return Err(self.report(EngineError::InvalidState("a recording is already running".into())));
        }
        if let Err(err) = self.telemetry.start(&telemetry_path) {
            warn!("recording continues without telemetry: {}", err);
            let _ = self.events.send(EngineEvent::from_error(&err));
        }
        let telemetry = Arc::clone(&self.telemetry);
        let request = request.on_complete(Box::new(move || {
            telemetry.stop();
        }));
        self.recording.start(request).map_err(|err| {
            self.telemetry.stop();
            self.report(err)
        })
    }

    /// Stops the active recording, flushing whole records. Returns `false` when idle.
    pub fn stop_saving(&self) -> bool {
        self.recording.stop()
    }

    pub fn recording_status(&self) -> Option<RecordingStatus> {
        self.recording.status()
    }

    pub fn is_saving(&self) -> bool {
        self.recording.is_recording()
    }

    pub fn telemetry_active(&self) -> bool {
        self.telemetry.is_active()
    }

    /// Appends a position sample to the telemetry log, if one is open.
    pub fn append_telemetry(&self, record: &PositionRecord) -> EngineResult<()> {
        self.telemetry.append(record).map_err(|err| self.report(err))
    }

    /// Waits for writers of self-completed recordings to finish flushing.
    pub fn wait_for_writers(&self) {
        self.recording.wait_idle();
    }

    // ---- queries ----

    fn require_geometry(&self) -> EngineResult<FrameGeometry> {
        (*lock(&self.geometry)).ok_or_else(|| EngineError::InvalidState("no source is open".into()))
    }

    pub fn geometry(&self) -> Option<FrameGeometry> {
        *lock(&self.geometry)
    }

    pub fn frame_width(&self) -> usize {
        self.geometry().map_or(0, |g| g.width)
    }

    /// Sensor rows, header rows included.
    pub fn frame_height(&self) -> usize {
        self.geometry().map_or(0, |g| g.height)
    }

    /// Rows carrying image data.
    pub fn data_height(&self) -> usize {
        self.geometry().map_or(0, |g| g.data_height)
    }

    pub fn using_dsf(&self) -> bool {
        self.params.load().use_dsf && self.mask.is_set()
    }

    pub fn current_fps(&self) -> f64 {
        self.metrics.fps()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn current_generation(&self) -> u64 {
        self.distributor.generation()
    }
}

impl Drop for TakeEngine {
    fn drop(&mut self) {
        self.close();
    }
}
