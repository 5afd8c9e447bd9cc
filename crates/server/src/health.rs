use std::sync::Arc;

use anyhow::Context;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Serialize;
use serde_json::json;
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System};

use crate::app_state::AppState;

const BYTES_PER_MB: u64 = 1024 * 1024;

pub fn install_recorder() -> anyhow::Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .context("installing prometheus recorder")
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemorySample {
    pub process_bytes: u64,
    pub system_total_bytes: u64,
    pub system_used_bytes: u64,
}

impl MemorySample {
    pub fn capture() -> Self {
        let mut system = System::new();
        system.refresh_memory();
        let process_bytes = sysinfo::get_current_pid()
            .ok()
            .and_then(|pid| {
                system.refresh_processes_specifics(
                    ProcessesToUpdate::Some(&[pid]),
                    true,
                    ProcessRefreshKind::nothing().with_memory(),
                );
                system.process(pid).map(|process| process.memory())
            })
            .unwrap_or(0);
        Self {
            process_bytes,
            system_total_bytes: system.total_memory(),
            system_used_bytes: system.used_memory(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConnectionsReport {
    active: usize,
    max: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthReport {
    status: &'static str,
    version: &'static str,
    uptime_secs: u64,
    connections: ConnectionsReport,
    users_online: usize,
    active_rooms: usize,
    memory: MemorySample,
    cpu_count: usize,
    checks: Vec<&'static str>,
}

pub async fn live() -> Json<serde_json::Value> {
    Json(json!({ "status": "alive" }))
}

pub async fn ready(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let active = state.connections.active();
    let max = state.settings.max_connections;
    if state.over_capacity() {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "over_capacity", "connections": active, "maxConnections": max })),
        )
    } else {
        (
            StatusCode::OK,
            Json(json!({ "status": "ready", "connections": active, "maxConnections": max })),
        )
    }
}

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let memory = MemorySample::capture();
    let mut failing = Vec::new();
    if state.over_capacity() {
        failing.push("over_capacity");
    }
    let memory_limit = state
        .settings
        .health_memory_limit_mb
        .saturating_mul(BYTES_PER_MB);
    if memory.process_bytes > memory_limit {
        failing.push("memory");
    }

    let report = HealthReport {
        status: if failing.is_empty() { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.started_at.elapsed().as_secs(),
        connections: ConnectionsReport {
            active: state.connections.active(),
            max: state.settings.max_connections,
        },
        users_online: state.relay.presence.online_count(),
        active_rooms: state.relay.rooms.chat_room_count(),
        memory,
        cpu_count: std::thread::available_parallelism().map_or(1, usize::from),
        checks: failing,
    };
    let status = if report.checks.is_empty() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}

pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let Some(handle) = &state.metrics else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            "metrics recorder not installed\n".to_string(),
        );
    };

    metrics::gauge!("relay_connections_active").set(state.connections.active() as f64);
    metrics::gauge!("relay_users_online").set(state.relay.presence.online_count() as f64);
    metrics::gauge!("relay_rooms_active").set(state.relay.rooms.chat_room_count() as f64);
    metrics::gauge!("relay_process_memory_bytes")
        .set(MemorySample::capture().process_bytes as f64);
    metrics::gauge!("relay_uptime_seconds").set(state.started_at.elapsed().as_secs_f64());

    (StatusCode::OK, handle.render())
}

#[cfg(test)]
#[path = "tests/health_tests.rs"]
mod tests;
