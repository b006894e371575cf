use std::net::{IpAddr, Ipv6Addr};
use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use tiny_http::{Header, Method, Response, Server, StatusCode};

use crate::controller::{ControlError, Controller};
use crate::library::{LibraryError, PatternLibrary, SavedPattern};
use crate::offline::{AssetCache, AssetSource};
use crate::share::{self, query_param};
use crate::storage::KeyValueStore;
use crate::timer::{RealtimeClock, TimerHost};
use crate::vibration::pattern::Pattern;
use crate::vibration::port::VibrationPort;
use crate::vibration::scheduler::{RepeatConfig, SessionState};

const MAX_WAIT_MS: u64 = 200;

#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    pub bind_addr: String,
    pub port: u16,
}

pub struct ApiState<V, T, S> {
    pub controller: Controller<V, T>,
    pub library: PatternLibrary<S>,
    pub assets: AssetCache,
    pub asset_source: Box<dyn AssetSource>,
    pub share_base_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl ApiResponse {
    fn json<T: Serialize>(status: u16, payload: &T) -> Self {
        match serde_json::to_vec(payload) {
            Ok(body) => Self {
                status,
                content_type: "application/json; charset=utf-8",
                body,
            },
            Err(err) => Self::error(500, &format!("serialization failed: {err}")),
        }
    }

    fn error(status: u16, message: &str) -> Self {
        #[derive(Serialize)]
        struct ErrorBody<'a> {
            error: &'a str,
        }

        let body = serde_json::to_vec(&ErrorBody { error: message })
            .unwrap_or_else(|_| message.as_bytes().to_vec());
        Self {
            status,
            content_type: "application/json; charset=utf-8",
            body,
        }
    }
}

#[derive(Debug, Serialize)]
struct RepeatView {
    enabled: bool,
    count: String,
    interval_ms: u64,
}

impl From<RepeatConfig> for RepeatView {
    fn from(value: RepeatConfig) -> Self {
        Self {
            enabled: value.enabled,
            count: value.count.to_string(),
            interval_ms: value.interval_ms,
        }
    }
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    controls_enabled: bool,
    message: String,
    running: bool,
    progress: Option<String>,
    pattern_text: String,
    duration_ms: u64,
    repeat: RepeatView,
}

#[derive(Debug, Serialize)]
struct PlayResponse {
    pattern: Vec<u64>,
    total_ms: u64,
    progress: Option<String>,
}

/// Runs the API on the calling thread, dispatching scheduler timers between requests.
pub fn serve<V, T, S>(config: &ApiServerConfig, state: &mut ApiState<V, T, S>) -> Result<()>
where
    V: VibrationPort,
    T: TimerHost,
    S: KeyValueStore,
{
    let bind = format!("{}:{}", config.bind_addr, config.port);
    let server = Server::http(&bind)
        .map_err(|err| anyhow::anyhow!("failed to start API server on {bind}: {err}"))?;
    tracing::info!(address = %bind, "API listening");

    let clock = RealtimeClock::new(state.controller.now_ms());
    loop {
        let wait_ms = state
            .controller
            .next_deadline()
            .map_or(MAX_WAIT_MS, |deadline| {
                deadline.saturating_sub(clock.now_ms()).min(MAX_WAIT_MS)
            });
        match server.recv_timeout(Duration::from_millis(wait_ms)) {
            Ok(Some(request)) => handle_request(request, state, clock.now_ms()),
            Ok(None) => {}
            Err(err) => tracing::warn!(error = %err, "failed to receive request"),
        }
        dispatch_timers(&mut state.controller, clock.now_ms());
    }
}

fn dispatch_timers<V: VibrationPort, T: TimerHost>(controller: &mut Controller<V, T>, now_ms: u64) {
    for event in controller.advance_to(now_ms) {
        tracing::debug!(?event, "timer event");
    }
}

/// Catches the scheduler up to `now_ms` before routing, so timers a request starts are
/// measured from the moment it arrived.
pub fn route_at<V, T, S>(
    state: &mut ApiState<V, T, S>,
    now_ms: u64,
    method: &Method,
    path: &str,
    query: &str,
) -> ApiResponse
where
    V: VibrationPort,
    T: TimerHost,
    S: KeyValueStore,
{
    dispatch_timers(&mut state.controller, now_ms);
    route(state, method, path, query)
}

fn handle_request<V, T, S>(request: tiny_http::Request, state: &mut ApiState<V, T, S>, now_ms: u64)
where
    V: VibrationPort,
    T: TimerHost,
    S: KeyValueStore,
{
    let Some(remote_addr) = request.remote_addr() else {
        let _ = send(request, ApiResponse::error(400, "missing remote address"));
        return;
    };
    if !is_local_network_ip(remote_addr.ip()) {
        let _ = send(request, ApiResponse::error(403, "forbidden: local network only"));
        return;
    }

    let url = request.url().to_string();
    let (path, query) = split_path_query(&url);
    let response = route_at(state, now_ms, request.method(), path, query);
    tracing::debug!(method = %request.method(), path, status = response.status, "request");
    if let Err(err) = send(request, response) {
        tracing::warn!(error = %err, "failed to send response");
    }
}

pub fn route<V, T, S>(
    state: &mut ApiState<V, T, S>,
    method: &Method,
    path: &str,
    query: &str,
) -> ApiResponse
where
    V: VibrationPort,
    T: TimerHost,
    S: KeyValueStore,
{
    let segments = path
        .trim_matches('/')
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>();

    match (method, segments.as_slice()) {
        (Method::Get, ["api", "status"]) => ApiResponse::json(200, &status_of(&state.controller)),
        (Method::Post, ["api", "vibrate"]) => vibrate(&mut state.controller, query),
        (Method::Post, ["api", "stop"]) => match state.controller.stop() {
            Ok(()) => ApiResponse::json(200, &status_of(&state.controller)),
            Err(err) => control_error(&err),
        },
        (Method::Get, ["api", "share"]) => {
            #[derive(Serialize)]
            struct ShareResponse {
                url: String,
                query: String,
            }

            ApiResponse::json(
                200,
                &ShareResponse {
                    url: state.controller.share_url(&state.share_base_url),
                    query: state.controller.share_query(),
                },
            )
        }
        (Method::Post, ["api", "hydrate"]) => {
            let outcome = state.controller.hydrate(query);
            #[derive(Serialize)]
            struct HydrateResponse {
                pattern_text: bool,
                duration: bool,
                repeat: bool,
                auto_scheduled: bool,
            }

            ApiResponse::json(
                200,
                &HydrateResponse {
                    pattern_text: outcome.pattern_text,
                    duration: outcome.duration,
                    repeat: outcome.repeat,
                    auto_scheduled: outcome.auto_scheduled,
                },
            )
        }
        (Method::Get, ["api", "patterns"]) => {
            #[derive(Serialize)]
            struct PatternList {
                patterns: Vec<SavedPattern>,
            }

            ApiResponse::json(
                200,
                &PatternList {
                    patterns: state.library.list(),
                },
            )
        }
        (Method::Post, ["api", "patterns"]) => {
            let name = query_param(query, "name").unwrap_or_default();
            let pattern = query_param(query, "pattern").unwrap_or_default();
            library_result(201, state.library.save(&name, &pattern))
        }
        (Method::Post, ["api", "patterns", "reorder"]) => {
            let (Some(dragged), Some(target)) = (
                id_param(query, "dragged"),
                id_param(query, "target"),
            ) else {
                return ApiResponse::error(400, "dragged and target ids are required");
            };
            #[derive(Serialize)]
            struct ReorderResponse {
                moved: bool,
            }

            match state.library.reorder_favorites(dragged, target) {
                Ok(moved) => ApiResponse::json(200, &ReorderResponse { moved }),
                Err(err) => library_error(&err),
            }
        }
        (Method::Post, ["api", "patterns", id, action]) => {
            let Ok(id) = id.parse::<i64>() else {
                return ApiResponse::error(400, "pattern id must be an integer");
            };
            match *action {
                "favorite" => library_result(200, state.library.toggle_favorite(id)),
                "rename" => {
                    let name = query_param(query, "name").unwrap_or_default();
                    library_result(200, state.library.rename(id, &name))
                }
                "play" => match state.library.replay(id) {
                    Ok(pattern) => play(&mut state.controller, pattern),
                    Err(err) => library_error(&err),
                },
                _ => ApiResponse::error(404, "unknown pattern action"),
            }
        }
        (Method::Delete, ["api", "patterns", id]) => {
            let Ok(id) = id.parse::<i64>() else {
                return ApiResponse::error(400, "pattern id must be an integer");
            };
            #[derive(Serialize)]
            struct DeleteResponse {
                deleted: bool,
            }

            match state.library.delete(id) {
                Ok(deleted) => ApiResponse::json(200, &DeleteResponse { deleted }),
                Err(err) => library_error(&err),
            }
        }
        (_, ["api", ..]) => ApiResponse::error(404, "unknown API route"),
        (Method::Get, _) => {
            let (asset, served) = state.assets.respond(path, state.asset_source.as_ref());
            tracing::trace!(path, ?served, "static asset");
            ApiResponse {
                status: asset.status,
                content_type: asset.content_type,
                body: asset.body,
            }
        }
        _ => ApiResponse::error(405, "method not allowed"),
    }
}

fn status_of<V: VibrationPort, T: TimerHost>(controller: &Controller<V, T>) -> StatusResponse {
    StatusResponse {
        controls_enabled: controller.controls_enabled(),
        message: controller.status_message(),
        running: matches!(controller.session_state(), SessionState::Running(_)),
        progress: controller.repeat_status().map(|status| status.to_string()),
        pattern_text: controller.pattern_text().to_string(),
        duration_ms: controller.duration_ms(),
        repeat: controller.repeat().into(),
    }
}

/// `POST /api/vibrate` takes the same keys as a share link and plays immediately.
/// Nothing changes unless the request is playable.
fn vibrate<V: VibrationPort, T: TimerHost>(
    controller: &mut Controller<V, T>,
    query: &str,
) -> ApiResponse {
    if !controller.controls_enabled() {
        return ApiResponse::error(409, &controller.status_message());
    }

    let decoded = share::decode(query);
    let mut repeat = RepeatConfig {
        enabled: decoded.repeat_enabled,
        ..controller.repeat()
    };
    if let Some(count) = decoded.repeat_count {
        repeat.count = count;
    }
    if let Some(interval_ms) = decoded.interval_ms {
        repeat.interval_ms = interval_ms;
    }

    let mut pattern_text = None;
    let mut duration_ms = None;
    let pattern = if decoded.preset_requested {
        let Some(preset) = decoded.preset else {
            return ApiResponse::error(400, "unknown preset");
        };
        preset.pattern()
    } else if let Some(text) = decoded.pattern_text {
        match Pattern::parse(&text) {
            Ok(pattern) => {
                pattern_text = Some(text);
                pattern
            }
            Err(err) => return control_error(&ControlError::from(err)),
        }
    } else if decoded.duration_requested {
        let Some(duration) = decoded.duration_ms else {
            return ApiResponse::error(400, "duration must be between 10 and 1000 ms");
        };
        duration_ms = Some(duration);
        Pattern::single(duration)
    } else {
        match Pattern::parse(controller.pattern_text()) {
            Ok(pattern) => pattern,
            Err(err) => return control_error(&ControlError::from(err)),
        }
    };

    controller.set_repeat(repeat);
    if let Some(text) = pattern_text {
        controller.set_pattern_text(text);
    }
    if let Some(duration) = duration_ms {
        controller.set_duration_ms(duration);
    }
    play(controller, pattern)
}

fn play<V: VibrationPort, T: TimerHost>(
    controller: &mut Controller<V, T>,
    pattern: Pattern,
) -> ApiResponse {
    match controller.play(pattern) {
        Ok(pattern) => played(controller, &pattern),
        Err(err) => control_error(&err),
    }
}

fn played<V: VibrationPort, T: TimerHost>(
    controller: &Controller<V, T>,
    pattern: &Pattern,
) -> ApiResponse {
    ApiResponse::json(
        200,
        &PlayResponse {
            pattern: pattern.durations().to_vec(),
            total_ms: pattern.total_ms(),
            progress: controller.repeat_status().map(|status| status.to_string()),
        },
    )
}

fn control_error(err: &ControlError) -> ApiResponse {
    match err {
        ControlError::Unsupported(message) => ApiResponse::error(409, message),
        ControlError::Parse(_) => ApiResponse::error(400, &err.to_string()),
    }
}

fn library_result(status: u16, result: Result<SavedPattern, LibraryError>) -> ApiResponse {
    match result {
        Ok(saved) => ApiResponse::json(status, &saved),
        Err(err) => library_error(&err),
    }
}

fn library_error(err: &LibraryError) -> ApiResponse {
    let status = match err {
        LibraryError::InvalidPattern(_) | LibraryError::EmptyName => 400,
        LibraryError::NotFound(_) => 404,
        LibraryError::IdsExhausted(_) | LibraryError::Storage(_) => 500,
    };
    ApiResponse::error(status, &err.to_string())
}

fn id_param(query: &str, key: &str) -> Option<i64> {
    query_param(query, key)?.trim().parse().ok()
}

fn send(request: tiny_http::Request, response: ApiResponse) -> Result<()> {
    let content_type = Header::from_str(&format!("Content-Type: {}", response.content_type))
        .map_err(|_| anyhow::anyhow!("failed to build content-type header"))?;
    request.respond(
        Response::from_data(response.body)
            .with_status_code(StatusCode(response.status))
            .with_header(content_type),
    )?;
    Ok(())
}

fn split_path_query(url: &str) -> (&str, &str) {
    match url.split_once('?') {
        Some((path, query)) => (path, query),
        None => (url, ""),
    }
}

fn is_local_network_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_private() || v4.is_link_local(),
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unique_local()
                || v6.is_unicast_link_local()
                || is_ipv4_mapped_local(v6)
        }
    }
}

fn is_ipv4_mapped_local(v6: Ipv6Addr) -> bool {
    match v6.to_ipv4_mapped() {
        Some(v4) => v4.is_loopback() || v4.is_private() || v4.is_link_local(),
        None => false,
    }
}
