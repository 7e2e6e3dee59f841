//! URL table for `/api/v1`.

use actix_web::{web, HttpRequest};

use super::handlers::{
    appointments, audit, auth, consultation, health, laboratory, notifications, nursing, organization, patients,
    permissions, pharmacy, radiology, reports, users, visits,
};
use crate::error::ApiError;

/// Registers extractor error handlers and every API route.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(json_config())
        .app_data(query_config())
        .app_data(path_config())
        .service(
            web::scope("/api/v1")
                .route("/health/", web::get().to(health::health))
                .configure(auth_routes)
                .service(web::scope("/organization").configure(organization_routes))
                .configure(permission_routes)
                .configure(patient_routes)
                .configure(laboratory_routes)
                .configure(pharmacy_routes)
                .configure(radiology_routes)
                .configure(consultation_routes)
                .configure(nursing_routes)
                .service(web::scope("/appointments").configure(appointment_routes))
                .configure(notification_routes)
                .configure(report_routes),
        );
}

// Malformed bodies, query strings and path ids all render as API errors.

fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err, _req: &HttpRequest| ApiError::BadRequest(err.to_string()).into())
}

fn query_config() -> web::QueryConfig {
    web::QueryConfig::default().error_handler(|err, _req: &HttpRequest| ApiError::BadRequest(err.to_string()).into())
}

fn path_config() -> web::PathConfig {
    web::PathConfig::default().error_handler(|_err, _req: &HttpRequest| ApiError::NotFound("Not found.".into()).into())
}

fn auth_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/auth/token/", web::post().to(auth::token))
        .route("/auth/token/refresh/", web::post().to(auth::refresh))
        .route("/auth/token/blacklist/", web::post().to(auth::blacklist_token))
        .route("/auth/me/permissions/", web::get().to(auth::my_permissions))
        .service(
            web::resource("/auth/me/")
                .route(web::get().to(auth::me))
                .route(web::patch().to(auth::update_me)),
        )
        .route("/auth/change-password/", web::post().to(auth::change_password))
        .service(
            web::resource("/users/")
                .route(web::get().to(users::list))
                .route(web::post().to(users::create)),
        )
        .service(
            web::resource("/users/{id}/")
                .route(web::get().to(users::detail))
                .route(web::put().to(users::update))
                .route(web::patch().to(users::update))
                .route(web::delete().to(users::delete)),
        );
}

fn organization_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/clinics/")
            .route(web::get().to(organization::list_clinics))
            .route(web::post().to(organization::create_clinic)),
    )
    .service(
        web::resource("/clinics/{id}/")
            .route(web::get().to(organization::clinic))
            .route(web::put().to(organization::update_clinic))
            .route(web::patch().to(organization::update_clinic))
            .route(web::delete().to(organization::delete_clinic)),
    )
    .service(
        web::resource("/departments/")
            .route(web::get().to(organization::list_departments))
            .route(web::post().to(organization::create_department)),
    )
    .service(
        web::resource("/departments/{id}/")
            .route(web::get().to(organization::department))
            .route(web::put().to(organization::update_department))
            .route(web::patch().to(organization::update_department))
            .route(web::delete().to(organization::delete_department)),
    )
    .service(
        web::resource("/rooms/")
            .route(web::get().to(organization::list_rooms))
            .route(web::post().to(organization::create_room)),
    )
    .service(
        web::resource("/rooms/{id}/")
            .route(web::get().to(organization::room))
            .route(web::put().to(organization::update_room))
            .route(web::patch().to(organization::update_room))
            .route(web::delete().to(organization::delete_room)),
    );
}

fn permission_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/roles/")
            .route(web::get().to(permissions::list_roles))
            .route(web::post().to(permissions::create_role)),
    )
    .service(
        web::resource("/roles/{id}/")
            .route(web::get().to(permissions::role))
            .route(web::put().to(permissions::update_role))
            .route(web::patch().to(permissions::update_role))
            .route(web::delete().to(permissions::delete_role)),
    )
    .route("/roles/{id}/users/", web::get().to(permissions::role_users))
    .service(
        web::resource("/user-roles/")
            .route(web::get().to(permissions::list_user_roles))
            .route(web::post().to(permissions::assign_role)),
    )
    .service(
        web::resource("/user-roles/{id}/")
            .route(web::get().to(permissions::user_role))
            .route(web::delete().to(permissions::revoke_role)),
    );
}

fn patient_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/patients/")
            .route(web::get().to(patients::list))
            .route(web::post().to(patients::create)),
    )
    .service(
        web::resource("/patients/{id}/")
            .route(web::get().to(patients::detail))
            .route(web::put().to(patients::update))
            .route(web::patch().to(patients::update))
            .route(web::delete().to(patients::delete)),
    )
    .route("/patients/{id}/visits/", web::get().to(patients::visits))
    .route("/patients/{id}/vitals/", web::get().to(patients::vitals))
    .route("/patients/{id}/history/", web::get().to(patients::history))
    .route("/patients/{id}/update_history/", web::patch().to(patients::update_history))
    .route("/patients/{id}/dependents/", web::get().to(patients::dependents))
    .service(
        web::resource("/visits/")
            .route(web::get().to(visits::list_visits))
            .route(web::post().to(visits::create_visit)),
    )
    .service(
        web::resource("/visits/{id}/")
            .route(web::get().to(visits::visit))
            .route(web::put().to(visits::update_visit))
            .route(web::patch().to(visits::update_visit))
            .route(web::delete().to(visits::delete_visit)),
    )
    .service(
        web::resource("/vitals/")
            .route(web::get().to(visits::list_vitals))
            .route(web::post().to(visits::record_vitals)),
    )
    .service(
        web::resource("/vitals/{id}/")
            .route(web::get().to(visits::vitals))
            .route(web::put().to(visits::update_vitals))
            .route(web::patch().to(visits::update_vitals))
            .route(web::delete().to(visits::delete_vitals)),
    );
}

fn laboratory_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/lab-templates/")
            .route(web::get().to(laboratory::list_templates))
            .route(web::post().to(laboratory::create_template)),
    )
    .service(
        web::resource("/lab-templates/{id}/")
            .route(web::get().to(laboratory::template))
            .route(web::put().to(laboratory::update_template))
            .route(web::patch().to(laboratory::update_template))
            .route(web::delete().to(laboratory::delete_template)),
    )
    .service(
        web::resource("/lab-orders/")
            .route(web::get().to(laboratory::list_orders))
            .route(web::post().to(laboratory::create_order)),
    )
    .service(
        web::resource("/lab-orders/{id}/")
            .route(web::get().to(laboratory::order))
            .route(web::put().to(laboratory::update_order))
            .route(web::patch().to(laboratory::update_order))
            .route(web::delete().to(laboratory::delete_order)),
    )
    .route("/lab-orders/{id}/collect_sample/", web::post().to(laboratory::collect_sample))
    .route("/lab-orders/{id}/process/", web::post().to(laboratory::process))
    .route("/lab-orders/{id}/submit_results/", web::post().to(laboratory::submit_results))
    .route("/lab-tests/", web::get().to(laboratory::list_tests))
    .route("/lab-tests/{id}/", web::get().to(laboratory::lab_test))
    .route("/lab-results/", web::get().to(laboratory::list_results))
    .route("/lab-results/{id}/", web::get().to(laboratory::lab_result))
    .route("/lab-results/{id}/verify/", web::post().to(laboratory::verify_result));
}

fn pharmacy_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/medications/")
            .route(web::get().to(pharmacy::list_medications))
            .route(web::post().to(pharmacy::create_medication)),
    )
    .service(
        web::resource("/medications/{id}/")
            .route(web::get().to(pharmacy::medication))
            .route(web::put().to(pharmacy::update_medication))
            .route(web::patch().to(pharmacy::update_medication))
            .route(web::delete().to(pharmacy::delete_medication)),
    )
    .service(
        web::resource("/inventory/")
            .route(web::get().to(pharmacy::list_inventory))
            .route(web::post().to(pharmacy::create_inventory)),
    )
    .service(
        web::resource("/inventory/{id}/")
            .route(web::get().to(pharmacy::inventory_item))
            .route(web::put().to(pharmacy::update_inventory))
            .route(web::patch().to(pharmacy::update_inventory))
            .route(web::delete().to(pharmacy::delete_inventory)),
    )
    .route("/inventory-alerts/", web::get().to(pharmacy::inventory_alerts))
    .route("/inventory-alerts/summary/", web::get().to(pharmacy::alert_summary))
    .service(
        web::resource("/prescriptions/")
            .route(web::get().to(pharmacy::list_prescriptions))
            .route(web::post().to(pharmacy::create_prescription)),
    )
    .service(
        web::resource("/prescriptions/{id}/")
            .route(web::get().to(pharmacy::prescription))
            .route(web::put().to(pharmacy::update_prescription))
            .route(web::patch().to(pharmacy::update_prescription))
            .route(web::delete().to(pharmacy::delete_prescription)),
    )
    .route("/prescriptions/{id}/dispense/", web::post().to(pharmacy::dispense))
    .route("/prescriptions/{id}/cancel/", web::post().to(pharmacy::cancel_prescription))
    .route("/dispenses/", web::get().to(pharmacy::list_dispenses))
    .route("/dispenses/{id}/", web::get().to(pharmacy::dispense_record));
}

fn radiology_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/radiology-orders/")
            .route(web::get().to(radiology::list_orders))
            .route(web::post().to(radiology::create_order)),
    )
    .service(
        web::resource("/radiology-orders/{id}/")
            .route(web::get().to(radiology::order))
            .route(web::put().to(radiology::update_order))
            .route(web::patch().to(radiology::update_order))
            .route(web::delete().to(radiology::delete_order)),
    )
    .route("/radiology-orders/{id}/schedule/", web::post().to(radiology::schedule))
    .route("/radiology-orders/{id}/acquire/", web::post().to(radiology::acquire))
    .route("/radiology-orders/{id}/report/", web::post().to(radiology::report))
    .route("/radiology-reports/", web::get().to(radiology::list_reports))
    .route("/radiology-reports/{id}/", web::get().to(radiology::report_detail))
    .route("/radiology-reports/{id}/verify/", web::post().to(radiology::verify_report))
    .route("/radiology-reports/{id}/reject/", web::post().to(radiology::reject_report));
}

fn consultation_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/consultation-rooms/")
            .route(web::get().to(consultation::list_rooms))
            .route(web::post().to(consultation::create_room)),
    )
    .service(
        web::resource("/consultation-rooms/{id}/")
            .route(web::get().to(consultation::room))
            .route(web::put().to(consultation::update_room))
            .route(web::patch().to(consultation::update_room))
            .route(web::delete().to(consultation::delete_room)),
    )
    .route("/consultation-rooms/{id}/queue/", web::get().to(consultation::room_queue))
    .route("/consultation-rooms/{id}/call_next/", web::post().to(consultation::call_next))
    .service(
        web::resource("/consultation-sessions/")
            .route(web::get().to(consultation::list_sessions))
            .route(web::post().to(consultation::create_session)),
    )
    .service(
        web::resource("/consultation-sessions/{id}/")
            .route(web::get().to(consultation::session))
            .route(web::put().to(consultation::update_session))
            .route(web::patch().to(consultation::update_session))
            .route(web::delete().to(consultation::delete_session)),
    )
    .route("/consultation-sessions/{id}/end/", web::post().to(consultation::end_session))
    .service(
        web::resource("/consultation-queue/")
            .route(web::get().to(consultation::list_queue))
            .route(web::post().to(consultation::enqueue)),
    )
    .service(
        web::resource("/consultation-queue/{id}/")
            .route(web::get().to(consultation::queue_entry))
            .route(web::put().to(consultation::update_queue_entry))
            .route(web::patch().to(consultation::update_queue_entry))
            .route(web::delete().to(consultation::delete_queue_entry)),
    )
    .route("/consultation-queue/{id}/call/", web::post().to(consultation::call_queue_entry))
    .service(
        web::resource("/referrals/")
            .route(web::get().to(consultation::list_referrals))
            .route(web::post().to(consultation::create_referral)),
    )
    .service(
        web::resource("/referrals/{id}/")
            .route(web::get().to(consultation::referral))
            .route(web::put().to(consultation::update_referral))
            .route(web::patch().to(consultation::update_referral))
            .route(web::delete().to(consultation::delete_referral)),
    )
    .route("/referrals/{id}/update_status/", web::post().to(consultation::update_referral_status));
}

fn nursing_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/nursing-orders/")
            .route(web::get().to(nursing::list_orders))
            .route(web::post().to(nursing::create_order)),
    )
    .service(
        web::resource("/nursing-orders/{id}/")
            .route(web::get().to(nursing::order))
            .route(web::put().to(nursing::update_order))
            .route(web::patch().to(nursing::update_order))
            .route(web::delete().to(nursing::delete_order)),
    )
    .route("/nursing-orders/{id}/start/", web::post().to(nursing::start_order))
    .route("/nursing-orders/{id}/complete/", web::post().to(nursing::complete_order))
    .route("/nursing-orders/{id}/cancel/", web::post().to(nursing::cancel_order))
    .service(
        web::resource("/procedures/")
            .route(web::get().to(nursing::list_procedures))
            .route(web::post().to(nursing::record_procedure)),
    )
    .service(
        web::resource("/procedures/{id}/")
            .route(web::get().to(nursing::procedure))
            .route(web::put().to(nursing::update_procedure))
            .route(web::patch().to(nursing::update_procedure))
            .route(web::delete().to(nursing::delete_procedure)),
    );
}

fn appointment_routes(cfg: &mut web::ServiceConfig) {
    // Collection actions first so they are not captured by `{id}`.
    cfg.service(
        web::resource("/appointments/")
            .route(web::get().to(appointments::list_appointments))
            .route(web::post().to(appointments::create_appointment)),
    )
    .route("/appointments/upcoming/", web::get().to(appointments::upcoming))
    .route("/appointments/today/", web::get().to(appointments::today))
    .service(
        web::resource("/appointments/{id}/")
            .route(web::get().to(appointments::appointment))
            .route(web::put().to(appointments::update_appointment))
            .route(web::patch().to(appointments::update_appointment))
            .route(web::delete().to(appointments::delete_appointment)),
    )
    .route("/appointments/{id}/confirm/", web::post().to(appointments::confirm))
    .route("/appointments/{id}/cancel/", web::post().to(appointments::cancel))
    .service(
        web::resource("/slots/")
            .route(web::get().to(appointments::list_slots))
            .route(web::post().to(appointments::create_slot)),
    )
    .service(
        web::resource("/slots/{id}/")
            .route(web::get().to(appointments::slot))
            .route(web::put().to(appointments::update_slot))
            .route(web::patch().to(appointments::update_slot))
            .route(web::delete().to(appointments::delete_slot)),
    );
}

fn notification_routes(cfg: &mut web::ServiceConfig) {
    // Collection actions first so they are not captured by `{id}`.
    cfg.route("/notifications/", web::get().to(notifications::list))
        .route("/notifications/unread_count/", web::get().to(notifications::unread_count))
        .route("/notifications/mark_all_read/", web::post().to(notifications::mark_all_read))
        .service(
            web::resource("/notifications/{id}/")
                .route(web::get().to(notifications::detail))
                .route(web::delete().to(notifications::delete)),
        )
        .route("/notifications/{id}/mark_read/", web::post().to(notifications::mark_read))
        .route("/notifications/{id}/archive/", web::post().to(notifications::archive))
        .service(
            web::resource("/notification-preferences/")
                .route(web::get().to(notifications::preferences))
                .route(web::patch().to(notifications::update_preferences))
                .route(web::put().to(notifications::update_preferences)),
        )
        .route("/activity-logs/", web::get().to(audit::list))
        .route("/activity-logs/stats/", web::get().to(audit::stats));
}

fn report_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/reports/patient-demographics/", web::get().to(reports::patient_demographics))
        .route("/reports/lab-statistics/", web::get().to(reports::lab_statistics))
        .route("/reports/pharmacy-statistics/", web::get().to(reports::pharmacy_statistics))
        .route("/dashboard/stats/", web::get().to(reports::dashboard_stats));
}
