//! HTTP stats surface over [`TelemetryQuery`].
//!
//! `GET /cameras.json` lists units in the low-level-discovery shape monitoring
//! agents expect; `GET /camera/<name>/<field>` returns one plain-text number.

use crate::capture::UnitStatus;
use crate::fleet::TelemetryQuery;
use crate::progress::StatsSnapshot;
use anyhow::{Context, Result};
use hyper::header::{HeaderValue, ALLOW, CONTENT_TYPE};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use percent_encoding::percent_decode_str;
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use std::convert::Infallible;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Serialize)]
struct DiscoveryReply<'a> {
    data: Vec<DiscoveryEntry<'a>>,
}

#[derive(Serialize)]
struct DiscoveryEntry<'a> {
    #[serde(rename = "{#CAMERA}")]
    name: &'a str,
}

#[derive(Serialize)]
struct StatsReply<'a> {
    name: &'a str,
    snapshot: StatsSnapshot,
    status: UnitStatus,
}

/// Running stats server; stops when its token is cancelled.
pub struct StatsServer {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

impl StatsServer {
    pub async fn bind(
        addr: SocketAddr,
        query: TelemetryQuery,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind stats server on {addr}"))?;
        let local_addr = listener
            .local_addr()
            .context("failed to read stats server address")?;
        let std_listener = listener
            .into_std()
            .context("failed to convert stats listener")?;
        std_listener
            .set_nonblocking(true)
            .context("failed to set stats listener non-blocking")?;

        let make_service = make_service_fn(move |_| {
            let query = query.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| {
                    let response = handle_request(&query, &req);
                    async move { Ok::<_, Infallible>(response) }
                }))
            }
        });

        let server = Server::from_tcp(std_listener)
            .context("failed to build stats server")?
            .serve(make_service);
        let token = shutdown.clone();
        let graceful = server.with_graceful_shutdown(async move { token.cancelled().await });

        let handle = tokio::spawn(async move {
            if let Err(err) = graceful.await {
                tracing::error!(error = %err, "stats server stopped");
            }
        });

        tracing::info!(address = %local_addr, "stats server listening");
        Ok(Self {
            local_addr,
            shutdown,
            handle,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Cancels the server token and waits for in-flight connections.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(err) = self.handle.await {
            tracing::warn!(error = %err, "stats server task panicked");
        }
    }
}

/// Routes one request. Pure with respect to the query so it can be tested
/// without a socket.
pub fn handle_request(query: &TelemetryQuery, req: &Request<Body>) -> Response<Body> {
    if req.method() != Method::GET && req.method() != Method::HEAD {
        let mut response = text(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed\n");
        response
            .headers_mut()
            .insert(ALLOW, HeaderValue::from_static("GET, HEAD"));
        return response;
    }

    let path = req.uri().path();
    if path == "/cameras.json" {
        return camera_list(query);
    }

    let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();
    match segments.as_slice() {
        ["camera", name, field] if !name.is_empty() => {
            match percent_decode_str(name).decode_utf8() {
                Ok(name) => camera_field(query, &name, field),
                Err(_) => text(StatusCode::BAD_REQUEST, "camera name is not valid UTF-8\n"),
            }
        }
        _ => text(StatusCode::NOT_FOUND, "404 page not found\n"),
    }
}

fn camera_list(query: &TelemetryQuery) -> Response<Body> {
    let names = query.list_unit_names();
    let reply = DiscoveryReply {
        data: names
            .iter()
            .map(|name| DiscoveryEntry { name })
            .collect(),
    };
    match to_tab_indented_json(&reply) {
        Ok(body) => json(body),
        Err(err) => text(StatusCode::INTERNAL_SERVER_ERROR, &format!("{err}\n")),
    }
}

fn camera_field(query: &TelemetryQuery, name: &str, field: &str) -> Response<Body> {
    let (snapshot, status) = match query
        .snapshot(name)
        .and_then(|snapshot| query.status(name).map(|status| (snapshot, status)))
    {
        Ok(pair) => pair,
        Err(err) => {
            let body = format!("Didn't find camera \"{}\"\n", err.name());
            return text(StatusCode::NOT_FOUND, &body);
        }
    };

    let body = match field {
        "frame" => snapshot.frame.to_string(),
        "fps" => format!("{:.6}", snapshot.fps),
        "bitrate" => snapshot.bitrate.to_string(),
        "outtime" => (snapshot.out_time_ms / 1_000_000).to_string(),
        "dupframes" => snapshot.dup_frames.to_string(),
        "dropframes" => snapshot.drop_frames.to_string(),
        "restarts" => status.restarts.to_string(),
        "state" => status.state.to_string(),
        "stats" => {
            let reply = StatsReply {
                name,
                snapshot,
                status,
            };
            return match to_tab_indented_json(&reply) {
                Ok(body) => json(body),
                Err(err) => text(StatusCode::INTERNAL_SERVER_ERROR, &format!("{err}\n")),
            };
        }
        _ => return text(StatusCode::NOT_FOUND, "404 page not found\n"),
    };
    text(StatusCode::OK, &body)
}

fn to_tab_indented_json<T: Serialize>(value: &T) -> serde_json::Result<Vec<u8>> {
    let mut body = Vec::new();
    let mut serializer =
        serde_json::Serializer::with_formatter(&mut body, PrettyFormatter::with_indent(b"\t"));
    value.serialize(&mut serializer)?;
    Ok(body)
}

fn json(body: Vec<u8>) -> Response<Body> {
    let mut response = Response::new(Body::from(body));
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

fn text(status: StatusCode, body: &str) -> Response<Body> {
    let mut response = Response::new(Body::from(body.to_owned()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}
