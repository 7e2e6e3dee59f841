//! Aggregate reports and the dashboard counters.

use actix_web::http::header;
use actix_web::{web, HttpResponse};
use chrono::Utc;

use super::ApiResult;
use crate::api::middleware::AuthUser;
use crate::models::report::{LabStatisticsQuery, ReportFormat, ReportQuery};
use crate::AppState;

pub async fn patient_demographics(
    state: web::Data<AppState>,
    _user: AuthUser,
    query: web::Query<ReportQuery>,
) -> ApiResult {
    let report = state.ehr.patient_demographics(Utc::now().date_naive()).await?;
    Ok(match query.format {
        ReportFormat::Json => HttpResponse::Ok().json(report),
        ReportFormat::Csv => HttpResponse::Ok()
            .content_type("text/csv")
            .insert_header((
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"patient_demographics.csv\"",
            ))
            .body(report.to_csv()),
    })
}

pub async fn lab_statistics(
    state: web::Data<AppState>,
    _user: AuthUser,
    query: web::Query<LabStatisticsQuery>,
) -> ApiResult {
    Ok(HttpResponse::Ok().json(state.ehr.lab_statistics(&query).await?))
}

pub async fn pharmacy_statistics(state: web::Data<AppState>, _user: AuthUser) -> ApiResult {
    Ok(HttpResponse::Ok().json(state.ehr.pharmacy_statistics(Utc::now().date_naive()).await?))
}

pub async fn dashboard_stats(state: web::Data<AppState>, _user: AuthUser) -> ApiResult {
    Ok(HttpResponse::Ok().json(state.ehr.dashboard_stats().await?))
}
