use crate::gui_bridge::model::{SaveRequest, StatusModel};
use anyhow::Context;
use log::{error, info, warn};
use serde_json::json;
use std::{net::SocketAddr, sync::Arc, thread};
use takecore::TakeEngine;
use tokio::runtime::Builder;
use tokio::sync::oneshot;
use warp::{http::StatusCode, Filter};

/// HTTP routes exposing engine status, the latest product and recording control.
pub fn routes(
    engine: Arc<TakeEngine>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    let engine_filter = warp::any().map(move || engine.clone());

    let status_route = warp::path("status")
        .and(warp::get())
        .and(engine_filter.clone())
        .map(|engine: Arc<TakeEngine>| warp::reply::json(&StatusModel::capture(&engine)));

    let product_route = warp::path("product")
        .and(warp::get())
        .and(engine_filter.clone())
        .map(|engine: Arc<TakeEngine>| match engine.latest_product() {
            Some(product) => warp::reply::with_status(warp::reply::json(&*product), StatusCode::OK),
            None => warp::reply::with_status(
                warp::reply::json(&json!({"status": "no product yet"})),
                StatusCode::NOT_FOUND,
            ),
        });

    let save_route = warp::path("save")
        .and(warp::post())
        .and(warp::body::json())
        .and(engine_filter.clone())
        .map(|request: SaveRequest, engine: Arc<TakeEngine>| {
            match engine.start_saving_finite(
                request.frame_count,
                &request.path,
                request.averaging,
                request.confirm_overwrite,
            ) {
                Ok(status) => {
                    info!("bridge started recording {}", status.path.display());
                    warp::reply::with_status(warp::reply::json(&status), StatusCode::OK)
                }
                Err(err) => {
                    warn!("bridge save refused: {}", err);
                    warp::reply::with_status(
                        warp::reply::json(&json!({"status": "error", "kind": err.kind(), "message": err.to_string()})),
                        StatusCode::BAD_REQUEST,
                    )
                }
            }
        });

    let stop_route = warp::path("stop")
        .and(warp::post())
        .and(engine_filter)
        .map(|engine: Arc<TakeEngine>| {
            let stopped = engine.stop_saving();
            warp::reply::json(&json!({"status": "ok", "stopped": stopped}))
        });

    status_route.or(product_route).or(save_route).or(stop_route)
}

/// Bridge hosting the HTTP routes on a background thread.
pub struct GuiBridge {
    address: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    server: Option<thread::JoinHandle<()>>,
}

impl GuiBridge {
    pub fn start(engine: Arc<TakeEngine>, address: SocketAddr) -> anyhow::Result<Self> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .context("creating runtime for the HTTP bridge")?;
        let (shutdown, signal) = oneshot::channel::<()>();
        let filter = routes(engine);
        let (bound, server) = runtime.block_on(async move {
            warp::serve(filter).try_bind_with_graceful_shutdown(address, async {
                let _ = signal.await;
            })
        })
        .with_context(|| format!("binding HTTP bridge to {}", address))?;

        let server = thread::Builder::new()
            .name("gui-bridge".into())
            .spawn(move || runtime.block_on(server))
            .context("spawning HTTP bridge thread")?;
        info!("HTTP bridge listening on {}", bound);
        Ok(Self {
            address: bound,
            shutdown: Some(shutdown),
            server: Some(server),
        })
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn publish_status(&self, message: &str) {
        info!("[bridge] {}", message);
    }

    pub fn shutdown(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(server) = self.server.take() {
            if server.join().is_err() {
                error!("HTTP bridge thread panicked");
            }
        }
    }
}

impl Drop for GuiBridge {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::{GeneratorConfig, SyntheticSource};
    use takecore::processing::ProductRequest;
    use takecore::EngineConfig;

    fn engine() -> Arc<TakeEngine> {
        let engine = Arc::new(TakeEngine::new(EngineConfig::default()));
        engine
            .open(Box::new(SyntheticSource::new(GeneratorConfig {
                width: 8,
                height: 2,
                frame_count: Some(5),
                frame_rate: None,
                ..Default::default()
            })))
            .unwrap();
        engine
    }

    #[tokio::test]
    async fn status_route_reports_geometry() {
        let filter = routes(engine());
        let response = warp::test::request().method("GET").path("/status").reply(&filter).await;
        assert_eq!(response.status(), StatusCode::OK);
        let status: StatusModel = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(status.frame_width, 8);
        assert_eq!(status.data_height, 2);
    }

    #[tokio::test]
    async fn product_route_is_not_found_before_first_product() {
        let engine = engine();
        engine.set_active_product(ProductRequest::DarkSubtract);
        let filter = routes(engine);
        let response = warp::test::request().method("GET").path("/product").reply(&filter).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn save_and_stop_routes_drive_recording() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine();
        let filter = routes(engine.clone());

        let response = warp::test::request()
            .method("POST")
            .path("/save")
            .json(&json!({"path": "relative.raw"}))
            .reply(&filter)
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let target = dir.path().join("bridge.raw");
        let response = warp::test::request()
            .method("POST")
            .path("/save")
            .json(&json!({"path": target}))
            .reply(&filter)
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(engine.is_saving());

        let response = warp::test::request().method("POST").path("/stop").reply(&filter).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(!engine.is_saving());
    }
}
