use crate::prelude::{EngineEvent, StageConfig, StageInput};
use crate::processing::distributor::{FrameDistributor, FrameSnapshot};
use crate::processing::mask::CalibrationMask;
use crate::processing::products::{LiveParams, ProductFilter, ProductKind, ProductRequest, ProductSnapshot};
use crate::processing::slot::{ArcCell, ArcSlot};
use crate::source::SampleFormat;
use log::{debug, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::broadcast;

const WAKE_INTERVAL: Duration = Duration::from_millis(50);

/// Settings fixed for the lifetime of an engine configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProductSettings {
    pub format: SampleFormat,
    pub max_fps: f64,
    pub fft_window: usize,
}

/// State every product worker reads. Each piece sits behind its own short-lived lock.
#[derive(Clone)]
pub struct ProductContext {
    pub distributor: Arc<FrameDistributor>,
    pub mask: Arc<ArcSlot<CalibrationMask>>,
    pub params: Arc<ArcCell<LiveParams>>,
    pub settings: Arc<ArcCell<ProductSettings>>,
    pub events: broadcast::Sender<EngineEvent>,
}

/// Spawns one worker thread per subscribed product.
pub struct StatisticsEngine {
    context: ProductContext,
}

impl StatisticsEngine {
    pub fn new(context: ProductContext) -> Self {
        Self { context }
    }

    pub fn subscribe(&self, request: ProductRequest) -> ProductSubscription {
        let running = Arc::new(AtomicBool::new(true));
        let latest = Arc::new(ArcSlot::empty());
        let worker = ProductWorker {
            filter: ProductFilter::new(request),
            context: self.context.clone(),
            running: Arc::clone(&running),
            latest: Arc::clone(&latest),
        };
        let handle = thread::Builder::new()
            .name(format!("product-{:?}", request.kind()).to_lowercase())
            .spawn(move || worker.run());
        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(err) => {
                warn!("could not spawn worker for {:?}: {}", request.kind(), err);
                None
            }
        };
        ProductSubscription {
            request,
            running,
            latest,
            handle,
        }
    }
}

/// Handle to a running product. Dropping it stops and joins the worker.
pub struct ProductSubscription {
    request: ProductRequest,
    running: Arc<AtomicBool>,
    latest: Arc<ArcSlot<ProductSnapshot>>,
    handle: Option<JoinHandle<()>>,
}

impl ProductSubscription {
    pub fn kind(&self) -> ProductKind {
        self.request.kind()
    }

    pub fn request(&self) -> ProductRequest {
        self.request
    }

    /// Most recent snapshot, if the worker has produced one yet.
    pub fn latest(&self) -> Option<Arc<ProductSnapshot>> {
        self.latest.load()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst) && self.handle.is_some()
    }

    pub fn release(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("{:?} worker panicked", self.request.kind());
            }
        }
    }
}

impl Drop for ProductSubscription {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct ProductWorker {
    filter: ProductFilter,
    context: ProductContext,
    running: Arc<AtomicBool>,
    latest: Arc<ArcSlot<ProductSnapshot>>,
}

impl ProductWorker {
    fn run(mut self) {
        let kind = self.filter.kind();
        debug!("{:?} worker started", kind);
        let mut last_generation = self.context.distributor.generation().saturating_sub(1);
        let mut applied: Option<(Arc<LiveParams>, Arc<ProductSettings>)> = None;
        let mut geometry = None;

        while self.running.load(Ordering::SeqCst) {
            let Some(snapshot) = self
                .context
                .distributor
                .wait_newer(last_generation, WAKE_INTERVAL)
            else {
                continue;
            };
            last_generation = snapshot.generation;

            let params = self.context.params.load();
            let settings = self.context.settings.load();
            let frame_geometry = *snapshot.frame.geometry();
            let stale = match &applied {
                Some((p, s)) => !Arc::ptr_eq(p, &params) || !Arc::ptr_eq(s, &settings),
                None => true,
            };
            if stale || geometry != Some(frame_geometry) {
                self.filter.initialize(&StageConfig {
                    geometry: frame_geometry,
                    params: (*params).clone(),
                    format: settings.format,
                    max_fps: settings.max_fps,
                    fft_window: settings.fft_window,
                });
                applied = Some((params, settings));
                geometry = Some(frame_geometry);
            }

            if let Some(product) = self.compute(&snapshot) {
                let product = Arc::new(product);
                self.latest.store(Arc::clone(&product));
                let _ = self.context.events.send(EngineEvent::ProductReady(kind, product));
            }
        }

        self.filter.cleanup();
        debug!("{:?} worker stopped", kind);
    }

    fn compute(&mut self, snapshot: &FrameSnapshot) -> Option<ProductSnapshot> {
        let mask = self.context.mask.load();
        self.filter.execute(StageInput {
            frame: &snapshot.frame,
            mask: mask.as_deref(),
            generation: snapshot.generation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::products::ProductData;
    use crate::source::{ByteOrganization, Frame, FrameGeometry};
    use std::time::Instant;

    fn context() -> ProductContext {
        let (events, _) = broadcast::channel(64);
        ProductContext {
            distributor: Arc::new(FrameDistributor::new()),
            mask: Arc::new(ArcSlot::empty()),
            params: Arc::new(ArcCell::new(LiveParams::default())),
            settings: Arc::new(ArcCell::new(ProductSettings {
                format: SampleFormat::default(),
                max_fps: 100.0,
                fft_window: 16,
            })),
            events,
        }
    }

    fn wait_for<F: Fn() -> bool>(check: F) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if check() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn worker_publishes_dark_subtracted_snapshots() {
        let context = context();
        let geometry = FrameGeometry::new(2, 1, ByteOrganization::Bil);
        context.mask.store(Arc::new(
            CalibrationMask::from_sums(2, 1, vec![1.0, 2.0], 1).unwrap(),
        ));
        let mut events = context.events.subscribe();
        let engine = StatisticsEngine::new(context.clone());
        let subscription = engine.subscribe(ProductRequest::DarkSubtract);

        let published = wait_for(|| {
            context.distributor.publish(Frame::filled(geometry, 10));
            thread::sleep(Duration::from_millis(10));
            subscription.latest().is_some()
        });
        assert!(published);
        let snapshot = subscription.latest().unwrap();
        assert_eq!(snapshot.kind, ProductKind::DarkSubtract);
        match &snapshot.data {
            ProductData::Frame { values, .. } => assert_eq!(values, &vec![9.0, 8.0]),
            other => panic!("unexpected product {:?}", other),
        }

        let mut saw_event = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, EngineEvent::ProductReady(ProductKind::DarkSubtract, _)) {
                saw_event = true;
            }
        }
        assert!(saw_event);
        subscription.release();
    }

    #[test]
    fn disabled_product_never_publishes_and_stops_on_drop() {
        let context = context();
        let geometry = FrameGeometry::new(4, 2, ByteOrganization::Bil);
        let engine = StatisticsEngine::new(context.clone());
        let subscription = engine.subscribe(ProductRequest::OverlaySpans);
        assert!(subscription.is_running());
        for _ in 0..5 {
            context.distributor.publish(Frame::filled(geometry, 3));
            thread::sleep(Duration::from_millis(10));
        }
        assert!(subscription.latest().is_none());
        drop(subscription);
    }
}
