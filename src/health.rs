use crate::analysis::model::AnalysisStatus;
use crate::config::AppConfig;
use crate::error::AppError;
use crate::state::{AppMetrics, AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;
use std::collections::BTreeMap;

pub async fn health_check(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let metrics = state.get_metrics_snapshot();
    let config = state.get_config();

    let mut analyses: BTreeMap<&'static str, usize> = [
        AnalysisStatus::Pending,
        AnalysisStatus::Processing,
        AnalysisStatus::Completed,
        AnalysisStatus::Failed,
    ]
    .iter()
    .map(|status| (status.as_str(), 0))
    .collect();
    for session in state.store.list_sessions().await? {
        *analyses.entry(session.analysis_status.as_str()).or_default() += 1;
    }

    Ok(HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.get_uptime_seconds(),
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "interviews": {
            "active": metrics.active_interviews,
            "started": metrics.interviews_started,
            "failed": metrics.interviews_failed
        },
        "analyses": analyses,
        "system": load_status(&config, &metrics)
    })))
}

fn load_status(config: &AppConfig, metrics: &AppMetrics) -> serde_json::Value {
    let usage = if config.performance.max_concurrent_sessions > 0 {
        metrics.active_interviews as f64 / config.performance.max_concurrent_sessions as f64
    } else {
        0.0
    };

    let status = if usage > 0.9 {
        "high_load"
    } else if usage > 0.7 {
        "moderate_load"
    } else {
        "normal"
    };

    json!({
        "status": status,
        "interview_usage_percent": (usage * 100.0).round(),
        "max_interviews": config.performance.max_concurrent_sessions
    })
}
