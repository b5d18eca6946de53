#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Multipart, Query};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures::stream;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpListener;

/// Serve `router` on an ephemeral loopback port.
pub async fn spawn(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
    addr
}

#[derive(Default)]
pub struct ClusterLog {
    pub queries: Mutex<Vec<HashMap<String, String>>>,
    pub authorization: Mutex<Vec<Option<String>>>,
}

/// Fake cluster admin API. Every health-info call streams `chunks` verbatim;
/// `subnet_kv` is served as the `subnet` config sub-system.
pub fn cluster_router(
    chunks: Vec<&'static str>,
    subnet_kv: &'static str,
    log: Arc<ClusterLog>,
) -> Router {
    Router::new()
        .route(
            "/minio/admin/v3/healthinfo",
            get(
                move |Query(query): Query<HashMap<String, String>>, headers: HeaderMap| {
                    let chunks = chunks.clone();
                    let log = log.clone();
                    async move {
                        log.queries.lock().push(query);
                        log.authorization.lock().push(
                            headers
                                .get(header::AUTHORIZATION)
                                .and_then(|v| v.to_str().ok())
                                .map(str::to_string),
                        );
                        let body = stream::iter(chunks.into_iter().map(|chunk| {
                            Ok::<_, std::io::Error>(Bytes::from_static(chunk.as_bytes()))
                        }));
                        Body::from_stream(body)
                    }
                },
            ),
        )
        .route(
            "/minio/admin/v3/get-config-kv",
            get(move || async move { subnet_kv }),
        )
}

/// Fake cluster whose health-info endpoint always fails.
pub fn failing_cluster_router() -> Router {
    Router::new().route(
        "/minio/admin/v3/healthinfo",
        get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "drive offline") }),
    )
}

/// One upload as received by the fake SUBNET.
#[derive(Debug, Clone)]
pub struct ReceivedUpload {
    pub api_key: Option<String>,
    pub filename_query: Option<String>,
    pub field_name: Option<String>,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub body: Value,
}

#[derive(Default)]
pub struct SubnetLog {
    pub uploads: Mutex<Vec<ReceivedUpload>>,
    pub licenses: Mutex<Vec<String>>,
}

/// Fake SUBNET: exchanges `license` for `exchanged_key` and answers uploads
/// with `upload_response`.
pub fn subnet_router(
    license: &'static str,
    exchanged_key: &'static str,
    upload_response: Value,
    log: Arc<SubnetLog>,
) -> Router {
    let auth_log = log.clone();
    Router::new()
        .route(
            "/api/auth/api-key",
            get(move |headers: HeaderMap| {
                let log = auth_log.clone();
                async move {
                    let presented = headers
                        .get("x-subnet-license")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    log.licenses.lock().push(presented.clone());
                    if presented == license {
                        Json(json!({"api_key": exchanged_key})).into_response()
                    } else {
                        StatusCode::UNAUTHORIZED.into_response()
                    }
                }
            }),
        )
        .route(
            "/api/health/upload",
            post(
                move |Query(query): Query<HashMap<String, String>>,
                      headers: HeaderMap,
                      mut multipart: Multipart| {
                    let log = log.clone();
                    let upload_response = upload_response.clone();
                    async move {
                        let field = multipart.next_field().await.unwrap().unwrap();
                        let field_name = field.name().map(str::to_string);
                        let file_name = field.file_name().map(str::to_string);
                        let content_type = field.content_type().map(str::to_string);
                        let bytes = field.bytes().await.unwrap();
                        let body: Value = serde_json::from_slice(&bytes).unwrap();
                        log.uploads.lock().push(ReceivedUpload {
                            api_key: headers
                                .get("x-subnet-api-key")
                                .and_then(|v| v.to_str().ok())
                                .map(str::to_string),
                            filename_query: query.get("filename").cloned(),
                            field_name,
                            file_name,
                            content_type,
                            body,
                        });
                        Json(upload_response).into_response()
                    }
                },
            ),
        )
}

/// A streamed health response: version preamble, an early partial object,
/// then the final object split across chunk boundaries.
pub fn health_chunks() -> Vec<&'static str> {
    vec![
        "{\"version\":\"3\"}\n",
        "{\"version\":\"\",\"timestamp\":\"2024-01-01T00:00:00Z\"}\n{\"vers",
        "ion\":\"3\",\"servers\":[{\"endpoint\":\"node1:9000\",",
        "\"state\":\"online\"}]}\n",
    ]
}

pub fn final_document() -> Value {
    json!({"version": "3", "servers": [{"endpoint": "node1:9000", "state": "online"}]})
}
