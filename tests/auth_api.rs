mod common;

use actix_web::{test, web, App};
use serde_json::{json, Value};
use tokio_test::assert_ok;
use vaani_server::configure_routes;
use wiremock::MockServer;

use common::{bearer, test_state, user_token};

#[actix_web::test]
async fn test_register_and_login() {
    let server = MockServer::start().await;
    let state = test_state(&server).await;
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state.clone()))
            .configure(configure_routes)
    ).await;

    // Test registration
    let register_response = test::TestRequest::post()
        .uri("/register")
        .set_json(json!({
            "name": "आशा",
            "email": "asha@example.com",
            "password": "password123"
        }))
        .send_request(&app)
        .await;

    assert_eq!(register_response.status(), 201);
    let register_body: Value = test::read_body_json(register_response).await;
    assert!(register_body.get("token").is_some());
    assert_eq!(register_body["user"]["plan"], "free");
    assert_eq!(register_body["user"]["messages_used"], 0);
    assert_eq!(register_body["user"]["messages_limit"], 100);
    assert!(register_body["user"].get("password_hash").is_none());

    // Test login
    let login_response = test::TestRequest::post()
        .uri("/login")
        .set_json(json!({
            "email": "asha@example.com",
            "password": "password123"
        }))
        .send_request(&app)
        .await;

    assert_eq!(login_response.status(), 200);
    let login_body: Value = test::read_body_json(login_response).await;
    let token = login_body["token"].as_str().unwrap();

    let me = test::TestRequest::get()
        .uri("/me")
        .insert_header(bearer(token))
        .send_request(&app)
        .await;
    assert_eq!(me.status(), 200);
    let me: Value = test::read_body_json(me).await;
    assert_eq!(me["email"], "asha@example.com");
}

#[actix_web::test]
async fn test_duplicate_registration_is_conflict() {
    let server = MockServer::start().await;
    let state = test_state(&server).await;
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state.clone()))
            .configure(configure_routes)
    ).await;

    user_token(&state, "taken@example.com").await;

    let response = test::TestRequest::post()
        .uri("/register")
        .set_json(json!({
            "name": "Someone Else",
            "email": "taken@example.com",
            "password": "another-password"
        }))
        .send_request(&app)
        .await;

    assert_eq!(response.status(), 409);
    assert_ok!(state.auth_service.authenticate("taken@example.com", "password123").await);
}

#[actix_web::test]
async fn test_invalid_login() {
    let server = MockServer::start().await;
    let state = test_state(&server).await;
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state.clone()))
            .configure(configure_routes)
    ).await;
    user_token(&state, "known@example.com").await;

    let unknown = test::TestRequest::post()
        .uri("/login")
        .set_json(json!({
            "email": "nonexistent@example.com",
            "password": "wrongpassword"
        }))
        .send_request(&app)
        .await;
    assert_eq!(unknown.status(), 401);
    let unknown: Value = test::read_body_json(unknown).await;

    let wrong_password = test::TestRequest::post()
        .uri("/login")
        .set_json(json!({
            "email": "known@example.com",
            "password": "wrongpassword"
        }))
        .send_request(&app)
        .await;
    assert_eq!(wrong_password.status(), 401);
    let wrong_password: Value = test::read_body_json(wrong_password).await;

    assert_eq!(unknown, wrong_password);
}

#[actix_web::test]
async fn test_invalid_registration() {
    let server = MockServer::start().await;
    let state = test_state(&server).await;
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state.clone()))
            .configure(configure_routes)
    ).await;

    let response = test::TestRequest::post()
        .uri("/register")
        .set_json(json!({
            "name": "Test",
            "email": "test@example.com",
            "password": ""  // Empty password should fail
        }))
        .send_request(&app)
        .await;

    assert_eq!(response.status(), 400);
    let body: Value = test::read_body_json(response).await;
    assert_eq!(body["error"]["status"], 400);
    assert_eq!(state.db.count_users().await.unwrap(), 0);
}

#[actix_web::test]
async fn test_logout() {
    let server = MockServer::start().await;
    let state = test_state(&server).await;
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state.clone()))
            .configure(configure_routes)
    ).await;

    let token = user_token(&state, "test@example.com").await;

    // Test logout
    let logout_response = test::TestRequest::post()
        .uri("/logout")
        .insert_header(bearer(&token))
        .send_request(&app)
        .await;

    assert_eq!(logout_response.status(), 200);

    // Verify token is invalidated by trying to use it
    let protected_response = test::TestRequest::get()
        .uri("/me")
        .insert_header(bearer(&token))
        .send_request(&app)
        .await;

    assert_eq!(protected_response.status(), 401);
}

#[actix_web::test]
async fn test_profile_updates() {
    let server = MockServer::start().await;
    let state = test_state(&server).await;
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state.clone()))
            .configure(configure_routes)
    ).await;
    let token = user_token(&state, "profile@example.com").await;

    let renamed = test::TestRequest::patch()
        .uri("/me")
        .insert_header(bearer(&token))
        .set_json(json!({ "name": "नया नाम" }))
        .send_request(&app)
        .await;
    assert_eq!(renamed.status(), 200);
    let renamed: Value = test::read_body_json(renamed).await;
    assert_eq!(renamed["name"], "नया नाम");

    let upgraded = test::TestRequest::put()
        .uri("/me/plan")
        .insert_header(bearer(&token))
        .set_json(json!({ "plan": "premium" }))
        .send_request(&app)
        .await;
    assert_eq!(upgraded.status(), 200);
    let upgraded: Value = test::read_body_json(upgraded).await;
    assert_eq!(upgraded["plan"], "premium");
    assert_eq!(upgraded["messages_limit"], 5000);

    let bad_password = test::TestRequest::put()
        .uri("/me/password")
        .insert_header(bearer(&token))
        .set_json(json!({ "current_password": "nope-nope", "new_password": "newpassword" }))
        .send_request(&app)
        .await;
    assert_eq!(bad_password.status(), 401);

    let changed = test::TestRequest::put()
        .uri("/me/password")
        .insert_header(bearer(&token))
        .set_json(json!({ "current_password": "password123", "new_password": "newpassword" }))
        .send_request(&app)
        .await;
    assert_eq!(changed.status(), 204);
    assert_ok!(state.auth_service.authenticate("profile@example.com", "newpassword").await);
}

#[actix_web::test]
async fn test_export_and_delete_account() {
    let server = MockServer::start().await;
    let state = test_state(&server).await;
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state.clone()))
            .configure(configure_routes)
    ).await;
    let token = user_token(&state, "export@example.com").await;

    let created = test::TestRequest::post()
        .uri("/sessions")
        .insert_header(bearer(&token))
        .send_request(&app)
        .await;
    assert_eq!(created.status(), 201);

    let export = test::TestRequest::get()
        .uri("/me/export")
        .insert_header(bearer(&token))
        .send_request(&app)
        .await;
    assert_eq!(export.status(), 200);
    let export: Value = test::read_body_json(export).await;
    assert_eq!(export["profile"]["email"], "export@example.com");
    assert_eq!(export["sessions"].as_array().unwrap().len(), 1);

    let deleted = test::TestRequest::delete()
        .uri("/me")
        .insert_header(bearer(&token))
        .send_request(&app)
        .await;
    assert_eq!(deleted.status(), 204);

    assert_eq!(state.db.count_users().await.unwrap(), 0);
    let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chat_sessions")
        .fetch_one(state.db.pool().as_ref())
        .await
        .unwrap();
    assert_eq!(remaining, 0);

    let after = test::TestRequest::get()
        .uri("/me")
        .insert_header(bearer(&token))
        .send_request(&app)
        .await;
    assert_eq!(after.status(), 401);
}

#[actix_web::test]
async fn test_missing_credentials_rejected() {
    let server = MockServer::start().await;
    let state = test_state(&server).await;
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state.clone()))
            .configure(configure_routes)
    ).await;

    let response = test::TestRequest::get().uri("/me").send_request(&app).await;
    assert_eq!(response.status(), 401);

    let response = test::TestRequest::get()
        .uri("/me")
        .insert_header(bearer("not-a-jwt"))
        .send_request(&app)
        .await;
    assert_eq!(response.status(), 401);
}
