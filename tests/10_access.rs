mod common;

use anyhow::Result;
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use serde_json::json;
use uuid::Uuid;

use common::{get, post, request, TestApp};
use emarketer_api::database::models::Role;

#[tokio::test]
async fn missing_session_is_unauthorized() -> Result<()> {
    let app = TestApp::new();

    let res = app.send(request(Method::GET, "/api/me/companies", None, None)).await?;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    assert_eq!(res.body["success"], false);
    assert_eq!(res.body["error"], "Unauthorized");

    let res = app.send(get("/api/me/companies", "not-a-jwt")).await?;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    assert_eq!(res.body["error"], "Unauthorized");
    Ok(())
}

#[tokio::test]
async fn session_cookie_is_accepted() -> Result<()> {
    let app = TestApp::new();
    let user = Uuid::new_v4();
    app.company_with_member("Acme", user, Role::Analyst).await;

    let req = Request::builder()
        .uri("/api/me/companies")
        .header(header::COOKIE, format!("theme=dark; session={}", app.token(user)))
        .body(Body::empty())?;
    let res = app.send(req).await?;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["data"][0]["name"], "Acme");
    Ok(())
}

#[tokio::test]
async fn companies_follow_membership_order() -> Result<()> {
    let app = TestApp::new();
    let user = Uuid::new_v4();
    app.company_with_member("First joined", user, Role::Owner).await;
    app.company_with_member("Second joined", user, Role::Analyst).await;
    app.company_with_member("Someone else's", Uuid::new_v4(), Role::Owner).await;

    let res = app.send(get("/api/me/companies", &app.token(user))).await?;
    assert_eq!(res.status, StatusCode::OK);
    let names: Vec<&str> = res.body["data"]
        .as_array()
        .expect("array")
        .iter()
        .filter_map(|c| c["name"].as_str())
        .collect();
    assert_eq!(names, vec!["First joined", "Second joined"]);
    Ok(())
}

#[tokio::test]
async fn foreign_and_unknown_companies_look_the_same() -> Result<()> {
    let app = TestApp::new();
    let user = Uuid::new_v4();
    let own = app.company_with_member("Mine", user, Role::Analyst).await;
    let foreign = app.company_with_member("Theirs", Uuid::new_v4(), Role::Owner).await;
    let token = app.token(user);

    let res = app.send(get(&format!("/api/companies/{}", own.id), &token)).await?;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["data"]["name"], "Mine");
    assert_eq!(res.body["data"]["role"], "analyst");

    let denied = app.send(get(&format!("/api/companies/{}", foreign.id), &token)).await?;
    let unknown = app.send(get(&format!("/api/companies/{}", Uuid::new_v4()), &token)).await?;
    assert_eq!(denied.status, StatusCode::FORBIDDEN);
    assert_eq!(denied.body["error"], "Access denied");
    assert_eq!(denied.body, unknown.body);

    let malformed = app.send(get("/api/companies/not-a-uuid/integrations", &token)).await?;
    assert_eq!(malformed.status, StatusCode::FORBIDDEN);
    Ok(())
}

#[tokio::test]
async fn removed_membership_loses_access() -> Result<()> {
    let app = TestApp::new();
    let user = Uuid::new_v4();
    let company = app.company_with_member("Acme", user, Role::Manager).await;
    let path = format!("/api/companies/{}/integrations", company.id);

    assert_eq!(app.send(get(&path, &app.token(user))).await?.status, StatusCode::OK);
    app.store.remove_membership(user, company.id).await;
    assert_eq!(app.send(get(&path, &app.token(user))).await?.status, StatusCode::FORBIDDEN);
    Ok(())
}

#[tokio::test]
async fn integrations_require_manager_to_modify() -> Result<()> {
    let app = TestApp::new();
    let analyst = Uuid::new_v4();
    let manager = Uuid::new_v4();
    let company = app.company_with_member("Acme", analyst, Role::Analyst).await;
    app.store.insert_membership(manager, company.id, Role::Manager).await;
    let path = format!("/api/companies/{}/integrations", company.id);
    let payload = json!({
        "platform": "meta",
        "accountId": "act_42",
        "accountName": "Shop",
        "accessToken": "EAAB",
        "refreshToken": "refresh-me"
    });

    let res = app.send(post(&path, &app.token(analyst), Some(payload.clone()))).await?;
    assert_eq!(res.status, StatusCode::FORBIDDEN);
    assert_eq!(res.body["error"], "Forbidden");

    let res = app.send(post(&path, &app.token(manager), Some(payload))).await?;
    assert_eq!(res.status, StatusCode::CREATED);
    let created = &res.body["data"];
    assert_eq!(created["companyId"], json!(company.id));
    assert!(created.get("userId").is_none());
    assert_eq!(created["platform"], "meta");
    assert_eq!(created["refreshToken"], "refresh-me");
    assert_eq!(created["isActive"], true);
    let integration_id = created["id"].as_str().expect("id").to_string();

    // Reconnecting the same account refreshes it in place
    let res = app
        .send(post(
            &path,
            &app.token(manager),
            Some(json!({ "platform": "meta", "accountId": "act_42", "accessToken": "EAAC" })),
        ))
        .await?;
    assert_eq!(res.body["data"]["id"], integration_id.as_str());
    assert_eq!(res.body["data"]["accessToken"], "EAAC");

    let list = app.send(get(&path, &app.token(analyst))).await?;
    assert_eq!(list.body["data"].as_array().map(Vec::len), Some(1));

    let delete = |token: String| request(Method::DELETE, &format!("{}/{}", path, integration_id), Some(&token), None);
    assert_eq!(app.send(delete(app.token(analyst))).await?.status, StatusCode::FORBIDDEN);
    let res = app.send(delete(app.token(manager))).await?;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["data"]["isActive"], false);
    Ok(())
}

#[tokio::test]
async fn integration_payload_is_validated() -> Result<()> {
    let app = TestApp::new();
    let owner = Uuid::new_v4();
    let company = app.company_with_member("Acme", owner, Role::Owner).await;

    let res = app
        .send(post(
            &format!("/api/companies/{}/integrations", company.id),
            &app.token(owner),
            Some(json!({ "platform": "myspace", "accountId": "", "accessToken": "x" })),
        ))
        .await?;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(res.body["code"], "VALIDATION_ERROR");
    assert!(res.body["field_errors"]["platform"].is_string());
    assert!(res.body["field_errors"]["accountId"].is_string());
    Ok(())
}

#[tokio::test]
async fn deleting_another_companys_integration_is_not_found() -> Result<()> {
    let app = TestApp::new();
    let owner = Uuid::new_v4();
    let mine = app.company_with_member("Mine", owner, Role::Owner).await;
    let theirs = app.company_with_member("Theirs", Uuid::new_v4(), Role::Owner).await;
    let integration = app
        .company_integration(theirs.id, emarketer_api::database::models::Platform::Ga4)
        .await;

    let path = format!("/api/companies/{}/integrations/{}", mine.id, integration.id);
    let res = app.send(request(Method::DELETE, &path, Some(&app.token(owner)), None)).await?;
    assert_eq!(res.status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn refresh_reissues_session() -> Result<()> {
    let app = TestApp::new();
    let user = Uuid::new_v4();

    let res = app.send(request(Method::POST, "/auth/refresh", None, None)).await?;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);

    let res = app.send(post("/auth/refresh", &app.token(user), None)).await?;
    assert_eq!(res.status, StatusCode::OK);
    let token = res.body["data"]["token"].as_str().expect("token");
    let claims = emarketer_api::auth::validate_jwt(token, common::JWT_SECRET)?;
    assert_eq!(claims.sub, user);
    let cookie = res.headers[header::SET_COOKIE].to_str()?;
    assert!(cookie.starts_with("session="));
    assert!(cookie.contains("HttpOnly"));
    Ok(())
}

#[tokio::test]
async fn public_endpoints_need_no_session() -> Result<()> {
    let app = TestApp::new();
    let health = app.send(request(Method::GET, "/health", None, None)).await?;
    assert_eq!(health.status, StatusCode::OK);
    assert_eq!(health.body["data"]["database"], "memory");

    let root = app.send(request(Method::GET, "/", None, None)).await?;
    assert_eq!(root.body["success"], true);
    Ok(())
}

#[tokio::test]
async fn rejected_request_bodies_use_error_envelope() -> Result<()> {
    let app = TestApp::new();
    let owner = Uuid::new_v4();
    let company = app.company_with_member("Acme", owner, Role::Owner).await;
    let token = app.token(owner);

    let res = app
        .send(post(&format!("/api/companies/{}/chat", company.id), &token, Some(json!({}))))
        .await?;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(res.body["success"], false);
    assert_eq!(res.body["code"], "VALIDATION_ERROR");
    assert!(res.body["error"].as_str().is_some_and(|e| e.contains("message")));

    let res = app
        .send(post(
            &format!("/api/companies/{}/integrations", company.id),
            &token,
            Some(json!({ "platform": "meta" })),
        ))
        .await?;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(res.body["code"], "VALIDATION_ERROR");

    let res = app
        .send(request(
            Method::DELETE,
            &format!("/api/companies/{}/integrations/not-a-uuid", company.id),
            Some(&token),
            None,
        ))
        .await?;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(res.body["code"], "VALIDATION_ERROR");
    Ok(())
}
