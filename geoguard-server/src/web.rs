use axum::{
    debug_handler,
    extract::{
        rejection::JsonRejection,
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, Path, State,
    },
    http::{header, HeaderValue},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, trace, warn};
use serde::Deserialize;
use serde_json::Value;
use std::{
    future::Future,
    io,
    net::{IpAddr, Ipv4Addr, SocketAddr},
};
use thiserror::Error;
use tokio::{net::TcpListener, sync::broadcast};
use tokio_graceful_shutdown::SubsystemHandle;

use geoguard_core::{AlertId, VesselId};

use crate::broadcast::Subscription;
use crate::error::ApiError;
use crate::service::{GeofenceService, ManualAlert};

const ZONES_URI: &str = "/v2/api/geofence/zones";
const STATUS_URI: &str = "/v2/api/geofence/status";
const ALERTS_URI: &str = "/v2/api/geofence/alerts";
const ALERT_LOG_URI: &str = "/v2/api/geofence/alerts/{vessel_id}";
const ACKNOWLEDGE_URI: &str = "/v2/api/geofence/alerts/{vessel_id}/acknowledge";
const EVENTS_URI: &str = "/v2/api/geofence/events";

#[derive(Error, Debug)]
pub enum WebError {
    #[error("Socket operation failed")]
    Io(#[from] io::Error),
}

#[derive(Clone)]
pub struct Web {
    service: GeofenceService,
    shutdown_tx: broadcast::Sender<()>,
}

impl Web {
    pub fn new(service: GeofenceService) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Web {
            service,
            shutdown_tx,
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route(ZONES_URI, get(get_zones).put(put_zones))
            .route(STATUS_URI, get(get_status))
            .route(ALERTS_URI, get(get_alert_logs))
            .route(ALERT_LOG_URI, get(get_alert_log).post(post_alert))
            .route(ACKNOWLEDGE_URI, post(acknowledge_alert))
            .route(EVENTS_URI, get(events_handler))
            .layer(middleware::from_fn(no_cache_middleware))
            .with_state(self.clone())
    }

    /// Serve on `listener` until `shutdown` completes; open push streams are
    /// closed first so the graceful shutdown does not wait on them
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<(), WebError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        let shutdown_tx = self.shutdown_tx.clone();
        let app = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();

        info!("Starting HTTP web server on {}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.await;
                let _ = shutdown_tx.send(());
            })
            .await?;

        info!("HTTP web server stopped");
        Ok(())
    }

    pub async fn run(self, subsys: SubsystemHandle, port: u16) -> Result<(), WebError> {
        let listener =
            TcpListener::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port)).await?;

        self.serve(listener, async move {
            subsys.on_shutdown_requested().await;
        })
        .await
    }
}

/// Middleware to add no-cache headers to API responses
async fn no_cache_middleware(request: axum::http::Request<axum::body::Body>, next: Next) -> Response {
    let mut response = next.run(request).await;
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );
    response
}

fn invalid_body(rejection: JsonRejection) -> ApiError {
    ApiError::InvalidInput(rejection.body_text())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AcknowledgeRequest {
    alert_id: AlertId,
}

// Request body: {"zoneIds": ["12", "15"], "alertClasses": ["Danger", "Warning"]}
//
#[debug_handler]
async fn put_zones(
    State(state): State<Web>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = body.map_err(invalid_body)?;
    let update = state.service.configure(&body).await?;
    debug!("Zone update: +{:?} -{:?}", update.added, update.removed);
    Ok(Json(update).into_response())
}

#[debug_handler]
async fn get_zones(State(state): State<Web>) -> Response {
    Json(state.service.zones()).into_response()
}

#[debug_handler]
async fn get_status(State(state): State<Web>) -> Response {
    Json(state.service.status()).into_response()
}

#[debug_handler]
async fn get_alert_logs(State(state): State<Web>) -> Result<Response, ApiError> {
    let logs = state
        .service
        .alert_logs()
        .await
        .map_err(ApiError::from_store)?;
    Ok(Json(logs).into_response())
}

#[debug_handler]
async fn get_alert_log(
    State(state): State<Web>,
    Path(vessel_id): Path<String>,
) -> Result<Response, ApiError> {
    let log = state
        .service
        .alert_log(&VesselId::new(vessel_id))
        .await
        .map_err(ApiError::from_store)?;
    Ok(Json(log).into_response())
}

// Request body: {"zoneId": "12", "kind": "entered", "alertClass": "Danger", "comment": "Pilot on board"}
//
#[debug_handler]
async fn post_alert(
    State(state): State<Web>,
    Path(vessel_id): Path<String>,
    body: Result<Json<ManualAlert>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(manual) = body.map_err(invalid_body)?;
    if manual.zone_id.as_str().is_empty() {
        return Err(ApiError::InvalidInput("zoneId must not be empty".into()));
    }
    let event = state
        .service
        .record_alert(&VesselId::new(vessel_id), manual)
        .await
        .map_err(ApiError::from_store)?;
    Ok(Json(event).into_response())
}

#[debug_handler]
async fn acknowledge_alert(
    State(state): State<Web>,
    Path(vessel_id): Path<String>,
    body: Result<Json<AcknowledgeRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = body.map_err(invalid_body)?;
    let event = state
        .service
        .acknowledge(&VesselId::new(vessel_id), request.alert_id)
        .await
        .map_err(ApiError::from_store)?;
    Ok(Json(event).into_response())
}

#[debug_handler]
async fn events_handler(
    State(state): State<Web>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Response {
    debug!("Push stream request from {}", addr);

    // Subscribe before the upgrade so nothing published after the handshake
    // is missed; a failed upgrade drops the subscription again
    let subscription = state.service.subscribe();
    let shutdown_rx = state.shutdown_tx.subscribe();
    ws.on_upgrade(move |socket| events_stream(socket, subscription, shutdown_rx))
}

/// Actual websocket statemachine (one will be spawned per connection)
async fn events_stream(
    socket: WebSocket,
    mut subscription: Subscription,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let (mut sender, mut receiver) = socket.split();
    debug!("Started push stream {}", subscription.id());

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                debug!("Shutdown of push stream");
                let _ = sender.send(Message::Close(None)).await;
                break;
            },
            r = subscription.recv() => {
                match r {
                    Some(text) => {
                        trace!("Pushing {}", text);
                        if let Err(e) = sender.send(Message::Text(text.to_string().into())).await {
                            warn!("Error on send to websocket: {}", e);
                            break;
                        }
                    }
                    None => {
                        debug!("Broadcaster gone");
                        break;
                    }
                }
            },
            r = receiver.next() => {
                match r {
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("Push client {} closed the stream", subscription.id());
                        break;
                    }
                    Some(Err(e)) => {
                        debug!("Push client {} failed: {}", subscription.id(), e);
                        break;
                    }
                    // Clients have nothing to say; pings are answered by axum
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}
