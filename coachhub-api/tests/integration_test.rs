/// Integration tests for the CoachHub API
///
/// The first group drives the router without a database: authentication,
/// validation, rate limiting and health reporting all answer before a
/// query is issued. The second group needs PostgreSQL and is ignored
/// unless run with `DATABASE_URL` set and `--ignored`.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{Duration, DurationRound, Utc};
use common::{create_member, offline_app, send, TestContext, TEST_PASSWORD};
use coachhub_shared::models::user::UserRole;
use serde_json::json;
use tower::ServiceExt;

#[tokio::test]
async fn test_health_reports_degraded_without_database() {
    let (app, _dir) = offline_app(&[]);

    let (status, body) = send(&app, "GET", "/health", None, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["database"], "disconnected");
}

#[tokio::test]
async fn test_protected_routes_require_token() {
    let (app, _dir) = offline_app(&[]);

    for uri in [
        "/api/v1/users",
        "/api/v1/sessions",
        "/api/v1/goals",
        "/api/v1/payments",
        "/api/v1/dashboard/stats",
        "/api/v1/admin/activity",
        "/api/v1/exports/dashboard",
    ] {
        let (status, body) = send(&app, "GET", uri, None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{}", uri);
        assert_eq!(body["error"], "unauthorized");
    }

    let (status, _) = send(&app, "GET", "/api/v1/auth/me", Some("not-a-jwt"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_register_validation_errors() {
    let (app, _dir) = offline_app(&[]);

    let (status, body) = send(
        &app,
        "POST",
        "/api/v1/auth/register",
        None,
        Some(json!({
            "email": "not-an-email",
            "password": "short",
            "role": "coach",
            "firstName": "",
            "lastName": "Doe"
        })),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "validation_error");

    let fields: Vec<&str> = body["details"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|d| d["field"].as_str())
        .collect();
    assert!(fields.contains(&"email"));
    assert!(fields.contains(&"password"));
    assert!(fields.contains(&"first_name"));
}

#[tokio::test]
async fn test_auth_rate_limit() {
    let (app, _dir) = offline_app(&[("AUTH_RATE_LIMIT_PER_MINUTE", "3")]);
    let attempt = json!({ "email": "bad", "password": "x" });

    for _ in 0..3 {
        let (status, _) =
            send(&app, "POST", "/api/v1/auth/login", None, Some(attempt.clone())).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/auth/login")
        .header("content-type", "application/json")
        .body(Body::from(attempt.to_string()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key("retry-after"));
}

#[tokio::test]
async fn test_security_headers_on_every_response() {
    let (app, _dir) = offline_app(&[]);

    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.headers()["x-content-type-options"], "nosniff");
    assert_eq!(response.headers()["x-frame-options"], "DENY");
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_login_and_me() {
    let ctx = TestContext::new().await.unwrap();

    let (status, body) = send(
        &ctx.app,
        "POST",
        "/api/v1/auth/login",
        None,
        Some(json!({ "email": ctx.coach.email, "password": TEST_PASSWORD })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);

    let token = body["data"]["accessToken"].as_str().unwrap().to_string();
    assert!(body["data"]["refreshToken"].is_string());
    assert!(body["data"]["user"].get("passwordHash").is_none());

    let (status, me) = send(&ctx.app, "GET", "/api/v1/auth/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["data"]["id"], ctx.coach.id.to_string());

    let (status, _) = send(
        &ctx.app,
        "POST",
        "/api/v1/auth/login",
        None,
        Some(json!({ "email": ctx.coach.email, "password": "Wr0ng$password" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    ctx.cleanup().await.unwrap();
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_coach_double_booking_rejected() {
    let ctx = TestContext::new().await.unwrap();
    let start = (Utc::now() + Duration::days(3))
        .duration_trunc(Duration::hours(1))
        .unwrap();

    let booking = |at: chrono::DateTime<Utc>| {
        json!({
            "coachId": ctx.coach.id,
            "entrepreneurId": ctx.entrepreneur.id,
            "managerId": ctx.admin.id,
            "scheduledAt": at,
            "duration": 60
        })
    };

    let (status, first) = ctx
        .send("POST", "/api/v1/sessions", &ctx.admin, Some(booking(start)))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", first);

    let (status, clash) = ctx
        .send(
            "POST",
            "/api/v1/sessions",
            &ctx.admin,
            Some(booking(start + Duration::minutes(30))),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(clash["data"]["id"], first["data"]["id"]);

    // Back-to-back is allowed
    let (status, _) = ctx
        .send(
            "POST",
            "/api/v1/sessions",
            &ctx.admin,
            Some(booking(start + Duration::minutes(60))),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    ctx.cleanup().await.unwrap();
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_invoice_generation_and_double_billing() {
    let ctx = TestContext::new().await.unwrap();

    let (status, session) = ctx
        .send(
            "POST",
            "/api/v1/sessions",
            &ctx.admin,
            Some(json!({
                "coachId": ctx.coach.id,
                "entrepreneurId": ctx.entrepreneur.id,
                "managerId": ctx.admin.id,
                "scheduledAt": Utc::now() + Duration::days(1),
                "duration": 90
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", session);
    let session_id = session["data"]["id"].as_str().unwrap().to_string();

    let request = json!({ "coachId": ctx.coach.id, "sessionIds": [session_id] });

    // Not completed yet
    let (status, _) = ctx
        .send("POST", "/api/v1/payments/generate", &ctx.admin, Some(request.clone()))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = ctx
        .send(
            "PATCH",
            &format!("/api/v1/sessions/{}", session_id),
            &ctx.admin,
            Some(json!({ "status": "completed" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, payment) = ctx
        .send("POST", "/api/v1/payments/generate", &ctx.admin, Some(request.clone()))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", payment);

    // 1.5h at 100 plus 8% tax
    assert_eq!(payment["data"]["amount"], json!(150.0));
    assert_eq!(payment["data"]["taxAmount"], json!(12.0));
    assert_eq!(payment["data"]["totalAmount"], json!(162.0));
    assert!(payment["data"]["invoiceNumber"]
        .as_str()
        .unwrap()
        .starts_with("INV-"));

    let (status, _) = ctx
        .send("POST", "/api/v1/payments/generate", &ctx.admin, Some(request))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    // Entrepreneurs never see payments
    let (status, _) = ctx
        .send("GET", "/api/v1/payments", &ctx.entrepreneur, None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    ctx.cleanup().await.unwrap();
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_cross_tenant_access_is_not_found() {
    let ctx = TestContext::new().await.unwrap();
    let other = TestContext::new().await.unwrap();

    let (status, session) = ctx
        .send(
            "POST",
            "/api/v1/sessions",
            &ctx.admin,
            Some(json!({
                "coachId": ctx.coach.id,
                "entrepreneurId": ctx.entrepreneur.id,
                "managerId": ctx.admin.id,
                "scheduledAt": Utc::now() + Duration::days(5),
                "duration": 45
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let uri = format!("/api/v1/sessions/{}", session["data"]["id"].as_str().unwrap());
    let (status, _) = other.send("GET", &uri, &other.admin, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Same tenant, not a participant
    let outsider = create_member(&ctx.db, ctx.organization.id, UserRole::Coach)
        .await
        .unwrap();
    let (status, _) = ctx.send("GET", &uri, &outsider, None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    ctx.cleanup().await.unwrap();
    other.cleanup().await.unwrap();
}

/// Books, completes and invoices one session. Returns `(session_id, payment_id)`.
async fn billed_session(ctx: &TestContext, days_ahead: i64) -> (String, String) {
    let (status, session) = ctx
        .send(
            "POST",
            "/api/v1/sessions",
            &ctx.admin,
            Some(json!({
                "coachId": ctx.coach.id,
                "entrepreneurId": ctx.entrepreneur.id,
                "managerId": ctx.admin.id,
                "scheduledAt": Utc::now() + Duration::days(days_ahead),
                "duration": 60
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", session);
    let session_id = session["data"]["id"].as_str().unwrap().to_string();

    let (status, _) = ctx
        .send(
            "PATCH",
            &format!("/api/v1/sessions/{}", session_id),
            &ctx.admin,
            Some(json!({ "status": "completed" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, payment) = ctx
        .send(
            "POST",
            "/api/v1/payments/generate",
            &ctx.admin,
            Some(json!({ "coachId": ctx.coach.id, "sessionIds": [session_id] })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", payment);

    let payment_id = payment["data"]["id"].as_str().unwrap().to_string();
    (session_id, payment_id)
}

async fn login(ctx: &TestContext, email: &str, password: &str) -> (StatusCode, serde_json::Value) {
    send(
        &ctx.app,
        "POST",
        "/api/v1/auth/login",
        None,
        Some(json!({ "email": email, "password": password })),
    )
    .await
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_logout_revokes_access_token() {
    let ctx = TestContext::new().await.unwrap();

    let (status, body) = login(&ctx, &ctx.coach.email, TEST_PASSWORD).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    let access = body["data"]["accessToken"].as_str().unwrap().to_string();
    let refresh = body["data"]["refreshToken"].as_str().unwrap().to_string();

    let (status, _) = send(&ctx.app, "GET", "/api/v1/auth/me", Some(&access), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&ctx.app, "POST", "/api/v1/auth/logout", Some(&access), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&ctx.app, "GET", "/api/v1/auth/me", Some(&access), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(
        &ctx.app,
        "POST",
        "/api/v1/auth/refresh",
        None,
        Some(json!({ "refreshToken": refresh })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    ctx.cleanup().await.unwrap();
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_refresh_rotation_rejects_old_token() {
    let ctx = TestContext::new().await.unwrap();

    let (status, body) = login(&ctx, &ctx.entrepreneur.email, TEST_PASSWORD).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    let first = body["data"]["refreshToken"].as_str().unwrap().to_string();

    let (status, rotated) = send(
        &ctx.app,
        "POST",
        "/api/v1/auth/refresh",
        None,
        Some(json!({ "refreshToken": first })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", rotated);
    let second = rotated["data"]["refreshToken"].as_str().unwrap().to_string();
    assert_ne!(first, second);

    let (status, _) = send(
        &ctx.app,
        "POST",
        "/api/v1/auth/refresh",
        None,
        Some(json!({ "refreshToken": first })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(
        &ctx.app,
        "POST",
        "/api/v1/auth/refresh",
        None,
        Some(json!({ "refreshToken": second })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    ctx.cleanup().await.unwrap();
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_coach_quota_is_enforced_at_the_limit() {
    let ctx = TestContext::new().await.unwrap();

    // The context already holds one coach
    sqlx::query("UPDATE organizations SET max_coaches = 1 WHERE id = $1")
        .bind(ctx.organization.id)
        .execute(&ctx.db)
        .await
        .unwrap();

    let new_coach = |tag: &str| {
        json!({
            "email": format!("coach-{}-{}@example.com", tag, ctx.organization.id.simple()),
            "password": TEST_PASSWORD,
            "role": "coach",
            "firstName": "Extra",
            "lastName": "Coach",
            "hourlyRate": 80
        })
    };

    let (status, body) = ctx
        .send("POST", "/api/v1/users", &ctx.admin, Some(new_coach("a")))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN, "{}", body);
    assert!(body["message"].as_str().unwrap().contains("maximum limit of 1 coaches"));

    sqlx::query("UPDATE organizations SET max_coaches = 2 WHERE id = $1")
        .bind(ctx.organization.id)
        .execute(&ctx.db)
        .await
        .unwrap();

    let (status, body) = ctx
        .send("POST", "/api/v1/users", &ctx.admin, Some(new_coach("b")))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);

    ctx.cleanup().await.unwrap();
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_role_gates() {
    let ctx = TestContext::new().await.unwrap();

    for uri in ["/api/v1/payments", "/api/v1/payments/stats"] {
        let (status, _) = ctx.send("GET", uri, &ctx.entrepreneur, None).await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{}", uri);
    }

    let manager = create_member(&ctx.db, ctx.organization.id, UserRole::Manager)
        .await
        .unwrap();
    let new_user = |role: &str| {
        json!({
            "email": format!("{}-{}@example.com", role, uuid::Uuid::new_v4().simple()),
            "password": TEST_PASSWORD,
            "role": role,
            "firstName": "New",
            "lastName": "Member",
            "startupName": "Acme"
        })
    };

    let (status, _) = ctx
        .send("POST", "/api/v1/users", &manager, Some(new_user("admin")))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = ctx
        .send("POST", "/api/v1/users", &manager, Some(new_user("entrepreneur")))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);

    ctx.cleanup().await.unwrap();
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_void_payment_cannot_change_status() {
    let ctx = TestContext::new().await.unwrap();
    let (_, payment_id) = billed_session(&ctx, 2).await;
    let uri = format!("/api/v1/payments/{}", payment_id);

    let (status, body) = ctx
        .send("PATCH", &uri, &ctx.admin, Some(json!({ "status": "void" })))
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);

    for next in ["paid", "pending", "refunded"] {
        let (status, body) = ctx
            .send("PATCH", &uri, &ctx.admin, Some(json!({ "status": next })))
            .await;
        assert_eq!(status, StatusCode::CONFLICT, "{}: {}", next, body);
    }

    let (status, payment) = ctx.send("GET", &uri, &ctx.admin, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payment["data"]["status"], "void");

    ctx.cleanup().await.unwrap();
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_billed_session_update_is_conflict() {
    let ctx = TestContext::new().await.unwrap();
    let (session_id, _) = billed_session(&ctx, 4).await;
    let uri = format!("/api/v1/sessions/{}", session_id);

    let (status, _) = ctx
        .send("PATCH", &uri, &ctx.admin, Some(json!({ "status": "cancelled" })))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = ctx
        .send(
            "PATCH",
            &uri,
            &ctx.admin,
            Some(json!({ "scheduledAt": Utc::now() + Duration::days(6) })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = ctx.send("DELETE", &uri, &ctx.admin, None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, session) = ctx.send("GET", &uri, &ctx.admin, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(session["data"]["status"], "completed");

    ctx.cleanup().await.unwrap();
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_password_reset_flow() {
    let ctx = TestContext::new().await.unwrap();
    let email = ctx.entrepreneur.email.clone();
    let new_password = "N3w$ecretPass";

    let (status, body) = send(
        &ctx.app,
        "POST",
        "/api/v1/auth/forgot-password",
        None,
        Some(json!({ "email": email })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    let token = body["data"]["resetToken"].as_str().unwrap().to_string();

    let (status, body) = send(
        &ctx.app,
        "POST",
        "/api/v1/auth/verify-reset-token",
        None,
        Some(json!({ "email": email, "resetToken": token })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["valid"], true);

    let (status, _) = send(
        &ctx.app,
        "POST",
        "/api/v1/auth/verify-reset-token",
        None,
        Some(json!({ "email": email, "resetToken": "not-the-token" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &ctx.app,
        "POST",
        "/api/v1/auth/reset-password",
        None,
        Some(json!({ "email": email, "resetToken": "not-the-token", "newPassword": new_password })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Invalid reset token");

    let (status, body) = send(
        &ctx.app,
        "POST",
        "/api/v1/auth/reset-password",
        None,
        Some(json!({ "email": email, "resetToken": token, "newPassword": new_password })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);

    // Single use
    let (status, _) = send(
        &ctx.app,
        "POST",
        "/api/v1/auth/reset-password",
        None,
        Some(json!({ "email": email, "resetToken": token, "newPassword": "An0ther$ecret" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = login(&ctx, &email, TEST_PASSWORD).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = login(&ctx, &email, new_password).await;
    assert_eq!(status, StatusCode::OK);

    ctx.cleanup().await.unwrap();
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_expired_reset_token_is_rejected() {
    let ctx = TestContext::new().await.unwrap();
    let email = ctx.coach.email.clone();

    let (status, body) = send(
        &ctx.app,
        "POST",
        "/api/v1/auth/forgot-password",
        None,
        Some(json!({ "email": email })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let token = body["data"]["resetToken"].as_str().unwrap().to_string();

    sqlx::query("UPDATE users SET reset_token_expires_at = NOW() - INTERVAL '1 minute' WHERE id = $1")
        .bind(ctx.coach.id)
        .execute(&ctx.db)
        .await
        .unwrap();

    let (status, body) = send(
        &ctx.app,
        "POST",
        "/api/v1/auth/verify-reset-token",
        None,
        Some(json!({ "email": email, "resetToken": token })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Reset token has expired");

    let (status, _) = send(
        &ctx.app,
        "POST",
        "/api/v1/auth/reset-password",
        None,
        Some(json!({ "email": email, "resetToken": token, "newPassword": "N3w$ecretPass" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = login(&ctx, &email, TEST_PASSWORD).await;
    assert_eq!(status, StatusCode::OK);

    ctx.cleanup().await.unwrap();
}
