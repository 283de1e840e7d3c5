#![allow(dead_code)]

use std::sync::Arc;

use serde_json::{json, Value};
use vaani_server::db::models::AdminApiConfig;
use vaani_server::{AppState, OpenRouterClient, Settings};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const TEST_API_KEY: &str = "sk-or-test-key";
pub const TEST_MODEL: &str = "openrouter/sonoma-dusk-alpha";

/// Test settings pointing the completion client at `server`.
pub fn settings_for(server: &MockServer) -> Settings {
    let mut settings = Settings::new_for_test().expect("Failed to load test config");
    settings.completion.base_url = server.uri();
    settings.completion.timeout_secs = 2;
    settings
}

/// Application state on a fresh in-memory database.
pub async fn test_state(server: &MockServer) -> AppState {
    let settings = settings_for(server);
    let client = OpenRouterClient::new(&settings.completion).expect("Failed to build client");
    AppState::with_completion(settings, Arc::new(client))
        .await
        .expect("Failed to build application state")
}

pub async fn configure_upstream(state: &AppState, api_key: Option<&str>, rate_limit: i64) {
    state
        .admin_config
        .set(&AdminApiConfig {
            api_key: api_key.map(str::to_owned),
            selected_model: TEST_MODEL.into(),
            rate_limit,
            max_tokens: 500,
            temperature: 0.7,
        })
        .await
        .expect("Failed to store admin config");
}

pub fn completion_body(reply: &str) -> Value {
    json!({
        "id": "gen-test",
        "model": TEST_MODEL,
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": reply },
            "finish_reason": "stop"
        }]
    })
}

/// Mounts a completion endpoint that always answers `reply`.
pub async fn mock_reply(server: &MockServer, reply: &str) {
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body(reply)))
        .mount(server)
        .await;
}

/// Registers an account directly through the service and returns a token.
pub async fn user_token(state: &AppState, email: &str) -> String {
    state
        .auth_service
        .register("Test User", email, "password123")
        .await
        .expect("Failed to register test user");
    let (token, _) = state
        .auth_service
        .authenticate(email, "password123")
        .await
        .expect("Failed to log in test user");
    token
}

pub fn admin_token(state: &AppState) -> String {
    state
        .auth_service
        .authenticate_admin("admin", "admin123")
        .expect("Failed to log in as admin")
}

pub fn bearer(token: &str) -> (&'static str, String) {
    ("Authorization", format!("Bearer {}", token))
}

pub fn guest(id: &str) -> (&'static str, String) {
    (vaani_server::auth::GUEST_ID_HEADER, id.to_string())
}
