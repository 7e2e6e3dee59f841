//! Shared fixtures for the HTTP integration tests.
#![allow(dead_code)]

use actix_web::web;
use fake::faker::name::en::{FirstName, LastName};
use fake::Fake;
use serde_json::{json, Value};

use emr::config::Config;
use emr::db::Database;
use emr::ehr::EhrDatabase;
use emr::models::accounts::{NewUser, User};
use emr::security::TokenType;
use emr::AppState;

pub const PASSWORD: &str = "s3cure-passw0rd";

/// Builds the service under test from a shared state.
macro_rules! app {
    ($state:expr) => {
        actix_web::test::init_service(
            actix_web::App::new()
                .app_data($state.clone())
                .configure(emr::api::configure),
        )
        .await
    };
}
pub(crate) use app;

/// Fresh migrated in-memory database behind default settings.
pub async fn state() -> web::Data<AppState> {
    let database = Database::connect_in_memory().await.unwrap();
    database.run_migrations().await.unwrap();
    web::Data::new(AppState::new(EhrDatabase::new(&database), Config::default()))
}

/// Creates an active account and returns it with a valid access token.
pub async fn user(state: &web::Data<AppState>, username: &str, role: &str, staff: bool) -> (User, String) {
    let input: NewUser = serde_json::from_value(json!({
        "username": username,
        "email": format!("{username}@clinic.test"),
        "password": PASSWORD,
        "password_confirm": PASSWORD,
        "first_name": FirstName().fake::<String>(),
        "last_name": LastName().fake::<String>(),
        "system_role": role,
        "is_staff": staff,
    }))
    .unwrap();
    let user = state.ehr.create_user(input).await.unwrap();
    let token = state.tokens.issue(&user.subject(), TokenType::Access).unwrap();
    (user, token)
}

pub fn bearer(token: &str) -> (&'static str, String) {
    ("Authorization", format!("Bearer {token}"))
}

pub fn employee(personal_number: &str) -> Value {
    json!({
        "category": "employee",
        "surname": LastName().fake::<String>(),
        "first_name": FirstName().fake::<String>(),
        "gender": "female",
        "date_of_birth": "1985-04-12",
        "personal_number": personal_number,
    })
}
