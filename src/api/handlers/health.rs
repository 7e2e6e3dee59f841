use actix_web::{web, HttpResponse};
use serde::Serialize;
use tracing::error;

use crate::AppState;

#[derive(Debug, Serialize)]
struct Services {
    database: &'static str,
    cache: &'static str,
}

#[derive(Debug, Serialize)]
struct HealthReport {
    status: &'static str,
    services: Services,
}

fn label(ok: bool) -> &'static str {
    if ok {
        "healthy"
    } else {
        "unhealthy"
    }
}

/// Unauthenticated liveness check; 503 when any dependency is down.
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    let database = match state.ehr.ping().await {
        Ok(()) => true,
        Err(e) => {
            error!(error = %e, "Database health check failed");
            false
        }
    };
    let cache = state.ehr.cache_roundtrip();
    if !cache {
        error!("Cache health check failed");
    }

    let report = HealthReport {
        status: label(database && cache),
        services: Services {
            database: label(database),
            cache: label(cache),
        },
    };
    if database && cache {
        HttpResponse::Ok().json(report)
    } else {
        HttpResponse::ServiceUnavailable().json(report)
    }
}
