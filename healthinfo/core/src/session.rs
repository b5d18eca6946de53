use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::job::{HealthInfoJob, HealthInfoRequest};
use crate::sink::ReportSink;
use crate::{parse_deadline, HealthInfoError, HealthInfoResult};

/// Route that upgrades to a health-info session.
pub const HEALTH_INFO_PATH: &str = "/ws/health-info";

/// Largest close reason a control frame can carry.
const MAX_CLOSE_REASON: usize = 123;

#[derive(Debug, Deserialize)]
struct DeadlineQuery {
    deadline: Option<String>,
}

/// Router exposing the session endpoint and a liveness probe.
pub fn build_router(job: Arc<HealthInfoJob>) -> Router {
    Router::new()
        .route(HEALTH_INFO_PATH, get(open_session))
        .route("/healthz", get(healthz))
        .with_state(job)
}

/// Serve sessions on an already bound listener.
pub async fn serve(job: Arc<HealthInfoJob>, listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(
        listener,
        build_router(job).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
}

/// Bind `addr` and serve sessions until the listener fails.
pub async fn run_server(job: Arc<HealthInfoJob>, addr: SocketAddr) -> Result<(), std::io::Error> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "health info sessions listening");
    serve(job, listener).await
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({"status": "ok"})))
}

async fn open_session(
    State(job): State<Arc<HealthInfoJob>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Query(query): Query<DeadlineQuery>,
    upgrade: Option<WebSocketUpgrade>,
) -> Response {
    let deadline = match query.deadline.as_deref().map(parse_deadline) {
        Some(Ok(deadline)) => deadline,
        _ => {
            warn!(%peer, deadline = ?query.deadline, "rejecting health info session");
            return (
                StatusCode::BAD_REQUEST,
                HealthInfoError::InvalidDeadline.to_string(),
            )
                .into_response();
        }
    };
    let Some(upgrade) = upgrade else {
        return (StatusCode::UPGRADE_REQUIRED, "websocket upgrade required").into_response();
    };

    let request = HealthInfoRequest::new(Some(deadline), peer.to_string());
    upgrade.on_upgrade(move |socket| drive_session(job, request, socket))
}

struct WebSocketSink {
    sender: SplitSink<WebSocket, Message>,
}

#[async_trait]
impl ReportSink for WebSocketSink {
    async fn deliver(&mut self, message: String) -> HealthInfoResult<()> {
        self.sender
            .send(Message::Text(message))
            .await
            .map_err(|err| HealthInfoError::Delivery(err.to_string()))
    }
}

/// Run one job for the connection, racing it against the client going away.
async fn drive_session(job: Arc<HealthInfoJob>, request: HealthInfoRequest, socket: WebSocket) {
    info!(caller = %request.caller, "health info session opened");
    let (sender, mut receiver) = socket.split();
    let mut sink = WebSocketSink { sender };

    let outcome = tokio::select! {
        result = job.run(&request, &mut sink) => result,
        _ = client_closed(&mut receiver) => Err(HealthInfoError::Cancelled),
    };

    let frame = match outcome {
        Ok(()) => CloseFrame {
            code: close_code::NORMAL,
            reason: "".into(),
        },
        Err(HealthInfoError::Cancelled) => {
            info!(caller = %request.caller, "client left, health info job abandoned");
            return;
        }
        Err(err) => CloseFrame {
            code: close_code::ERROR,
            reason: close_reason(&err.to_string()).into(),
        },
    };
    if let Err(err) = sink.sender.send(Message::Close(Some(frame))).await {
        debug!(error = %err, "close frame not delivered");
    }
}

async fn client_closed(receiver: &mut SplitStream<WebSocket>) {
    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Close(_)) | Err(_) => return,
            Ok(_) => {}
        }
    }
}

fn close_reason(message: &str) -> String {
    if message.len() <= MAX_CLOSE_REASON {
        return message.to_string();
    }
    let mut end = MAX_CLOSE_REASON;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    message[..end].to_string()
}
