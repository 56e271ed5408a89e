//! Auth API endpoints.

use crate::auth::address::EvmAddress;
use crate::auth::clock::Clock;
use crate::auth::middleware::{AppState, AuthSession};
use crate::auth::nonce::Subject;
use crate::auth::session::{
    clear_session, generate_session_id, read_session, write_session, Session,
};
use crate::auth::verifier::Binding;
use crate::config::NonceBinding;
use crate::error::AppError;
use crate::models::{NonceRequest, NonceResponse, SessionResponse, VerifyRequest, VerifyResponse};
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use axum_extra::extract::cookie::PrivateCookieJar;

/// GET /auth/nonce[?address=0x..] - Issue a sign-in nonce
pub async fn get_nonce(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
    Query(req): Query<NonceRequest>,
) -> Result<(PrivateCookieJar, Json<NonceResponse>), AppError> {
    issue_nonce(&state, jar, req).await
}

/// POST /auth/nonce - Issue a sign-in nonce, optional `{ "address": .. }` body
pub async fn post_nonce(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
    body: Bytes,
) -> Result<(PrivateCookieJar, Json<NonceResponse>), AppError> {
    let req = if body.iter().all(u8::is_ascii_whitespace) {
        NonceRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| AppError::BadRequest(format!("Invalid request body: {}", e)))?
    };
    issue_nonce(&state, jar, req).await
}

async fn issue_nonce(
    state: &AppState,
    jar: PrivateCookieJar,
    req: NonceRequest,
) -> Result<(PrivateCookieJar, Json<NonceResponse>), AppError> {
    let config = &state.config;

    // A pending session keeps its id; anything else starts a fresh one
    let session_id = match read_session(&jar, config) {
        Some(Session::Pending { id, .. }) => id,
        _ => generate_session_id(),
    };

    let subject = match config.nonce_binding {
        NonceBinding::Address => {
            let address = req
                .address
                .as_deref()
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .ok_or_else(|| AppError::BadRequest("Address is required".to_string()))?;
            let address = EvmAddress::parse(address)
                .map_err(|e| AppError::BadRequest(format!("Invalid address: {}", e)))?;
            Subject::Address(address)
        }
        NonceBinding::Session => Subject::session(session_id.as_str())
            .map_err(|e| AppError::Internal(format!("Invalid session id: {}", e)))?,
    };

    let nonce = state.verifier.nonces().issue(&subject).await?;

    let jar = write_session(jar, config, &Session::pending(session_id, nonce.clone()))?;

    tracing::info!(
        action = "nonce_issued",
        binding = %config.nonce_binding,
        subject = %subject,
        "Sign-in nonce issued"
    );

    Ok((jar, Json(NonceResponse { nonce })))
}

/// POST /auth/verify - Verify a signed message and sign the session in
///
/// The pending nonce is always removed from the cookie: on success the
/// session becomes authenticated under a new id, otherwise it is cleared.
pub async fn verify(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
    body: Bytes,
) -> Result<(PrivateCookieJar, Json<VerifyResponse>), (PrivateCookieJar, AppError)> {
    let config = &state.config;
    let previous = read_session(&jar, config);
    let jar = clear_session(jar, config);

    let pending_id = match previous {
        Some(Session::Pending { id, .. }) => Some(id),
        _ => None,
    };

    let binding = match config.nonce_binding {
        NonceBinding::Address => Binding::ClaimedAddress,
        // An absent session holds no nonce; the verifier reports it after
        // the message has been checked for well-formedness
        NonceBinding::Session => Binding::Session(pending_id.clone().unwrap_or_default()),
    };

    let req: VerifyRequest = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(e) => {
            if let (Binding::Session(_), Some(id)) = (&binding, &pending_id) {
                discard_session_nonce(&state, id).await;
            }
            tracing::warn!(action = "auth_failed", reason = "invalid_body", "Sign-in rejected");
            return Err((
                jar,
                AppError::BadRequest(format!("Invalid request body: {}", e)),
            ));
        }
    };

    let login = match state
        .verifier
        .verify(req.message.into(), &req.signature, binding)
        .await
    {
        Ok(login) => login,
        Err(e) => {
            tracing::warn!(action = "auth_failed", reason = e.kind(), "Sign-in rejected");
            return Err((jar, e.into()));
        }
    };

    let now = state.verifier.nonces().clock().now();
    let session = Session::authenticated(&login, now, config.session_ttl());

    let cleared = jar.clone();
    let jar = write_session(jar, config, &session).map_err(|e| (cleared, e))?;

    tracing::info!(
        action = "auth_success",
        address = %login.address,
        chain_id = login.chain_id,
        "Sign-in verified"
    );

    Ok((
        jar,
        Json(VerifyResponse {
            ok: true,
            address: login.address.to_string(),
        }),
    ))
}

/// GET /auth/session - Current signed-in identity
pub async fn session(auth: AuthSession) -> Json<SessionResponse> {
    Json(SessionResponse {
        authenticated: true,
        address: auth.address.to_string(),
        chain_id: auth.chain_id,
        expires_at: auth.expires_at,
    })
}

/// POST /auth/logout - Drop the session cookie
pub async fn logout(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
) -> (PrivateCookieJar, StatusCode) {
    let config = &state.config;

    match read_session(&jar, config) {
        Some(Session::Pending { id, .. }) if config.nonce_binding == NonceBinding::Session => {
            discard_session_nonce(&state, &id).await;
        }
        Some(Session::Authenticated { address, .. }) => {
            tracing::info!(action = "logout", address = %address, "Signed out");
        }
        _ => {}
    }

    (clear_session(jar, config), StatusCode::NO_CONTENT)
}

async fn discard_session_nonce(state: &AppState, session_id: &str) {
    let Ok(subject) = Subject::session(session_id) else {
        return;
    };
    if let Err(e) = state.verifier.nonces().consume(&subject).await {
        tracing::error!(error = %e, "Failed to clear session nonce");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::clock::FakeClock;
    use crate::auth::message::{MessageFields, SiweMessage};
    use crate::auth::nonce::NonceAuthority;
    use crate::auth::signature::testing::{address_of, key, sign};
    use crate::auth::verifier::{SignatureVerifier, VerifierOptions};
    use crate::config::Config;
    use crate::routes::api_router;
    use crate::storage::memory::MemoryNonceStore;
    use axum::{
        body::Body,
        http::{header, Request},
        Router,
    };
    use k256::ecdsa::SigningKey;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn test_config(binding: NonceBinding) -> Config {
        Config {
            session_key: vec![42u8; 64],
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            max_body_bytes: 16_384,
            redis_url: None,
            nonce_binding: binding,
            siwe_domain: None,
            nonce_ttl_secs: 300,
            session_ttl_secs: 3600,
            cleanup_interval_secs: 60,
            cookie_name: "meritbase-session".to_string(),
            cookie_secure: false,
        }
    }

    fn test_app(binding: NonceBinding) -> (Router, FakeClock) {
        let clock = FakeClock::new();
        let nonces = NonceAuthority::new(
            Arc::new(MemoryNonceStore::new()),
            Arc::new(clock.clone()),
            chrono::Duration::seconds(300),
        );
        let verifier = SignatureVerifier::new(nonces, VerifierOptions::default());
        let state = AppState::new(test_config(binding), verifier);
        (api_router().with_state(state), clock)
    }

    fn signed_message(key: &SigningKey, nonce: &str, clock: &FakeClock) -> (String, String) {
        let fields = MessageFields {
            domain: "meritbase.io".to_string(),
            address: address_of(key).to_checksum(),
            statement: Some("Sign in to MeritBase.".to_string()),
            uri: "https://meritbase.io".to_string(),
            version: "1".to_string(),
            chain_id: 1,
            nonce: nonce.to_string(),
            issued_at: clock
                .now()
                .to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            expiration_time: None,
            not_before: None,
            request_id: None,
            resources: vec![],
        };
        let message = SiweMessage::from_fields(fields).unwrap();
        let signature = sign(key, &message);
        (message.to_canonical(), signature)
    }

    /// The `name=value` part of the response's session cookie.
    fn session_cookie(response: &axum::response::Response) -> Option<String> {
        response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find(|v| v.starts_with("meritbase-session="))
            .and_then(|v| v.split(';').next())
            .map(str::to_string)
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    async fn request_nonce(app: &Router, address: &str) -> (String, String) {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/auth/nonce?address={}", address))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let cookie = session_cookie(&response).expect("nonce sets a session cookie");
        let body = json_body(response).await;
        (body["nonce"].as_str().unwrap().to_string(), cookie)
    }

    fn verify_request(cookie: Option<&str>, body: serde_json::Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/auth/verify")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    #[tokio::test]
    async fn test_nonce_requires_address() {
        let (app, _) = test_app(NonceBinding::Address);

        let response = app
            .oneshot(Request::builder().uri("/auth/nonce").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["ok"], false);
        assert_eq!(body["message"], "Address is required");
    }

    #[tokio::test]
    async fn test_nonce_rejects_bad_address() {
        let (app, _) = test_app(NonceBinding::Address);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/auth/nonce")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"address":"0x1234"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_session_mode_nonce_without_body() {
        let (app, _) = test_app(NonceBinding::Session);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/auth/nonce")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(session_cookie(&response).is_some());
        let body = json_body(response).await;
        assert_eq!(body["nonce"].as_str().unwrap().len(), 32);
    }

    #[tokio::test]
    async fn test_verify_signs_session_in() {
        let (app, clock) = test_app(NonceBinding::Address);
        let alice = key(7);
        let address = address_of(&alice).to_checksum();

        let (nonce, cookie) = request_nonce(&app, &address).await;
        let (message, signature) = signed_message(&alice, &nonce, &clock);

        let response = app
            .clone()
            .oneshot(verify_request(
                Some(&cookie),
                serde_json::json!({ "message": message, "signature": signature }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let auth_cookie = session_cookie(&response).expect("authenticated cookie");
        let body = json_body(response).await;
        assert_eq!(body["ok"], true);
        assert_eq!(body["address"], address.to_lowercase());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/auth/session")
                    .header(header::COOKIE, auth_cookie)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["authenticated"], true);
        assert_eq!(body["address"], address.to_lowercase());
        assert_eq!(body["chain_id"], 1);
    }

    #[tokio::test]
    async fn test_session_expires_after_ttl() {
        let (app, clock) = test_app(NonceBinding::Address);
        let alice = key(9);
        let address = address_of(&alice).to_checksum();

        let (nonce, cookie) = request_nonce(&app, &address).await;
        let (message, signature) = signed_message(&alice, &nonce, &clock);
        let response = app
            .clone()
            .oneshot(verify_request(
                Some(&cookie),
                serde_json::json!({ "message": message, "signature": signature }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let auth_cookie = session_cookie(&response).expect("authenticated cookie");

        let session_request = || {
            Request::builder()
                .uri("/auth/session")
                .header(header::COOKIE, auth_cookie.clone())
                .body(Body::empty())
                .unwrap()
        };

        // session_ttl_secs is 3600
        clock.advance(chrono::Duration::seconds(3599));
        let response = app.clone().oneshot(session_request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        clock.advance(chrono::Duration::seconds(1));
        let response = app.oneshot(session_request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = json_body(response).await;
        assert_eq!(body["message"], "Not signed in");
    }

    #[tokio::test]
    async fn test_verify_failure_clears_cookie() {
        let (app, clock) = test_app(NonceBinding::Address);
        let alice = key(7);
        let address = address_of(&alice).to_checksum();

        let (nonce, cookie) = request_nonce(&app, &address).await;
        let (message, _) = signed_message(&alice, &nonce, &clock);
        let (_, wrong_signature) = signed_message(&key(8), &nonce, &clock);

        let response = app
            .oneshot(verify_request(
                Some(&cookie),
                serde_json::json!({ "message": message, "signature": wrong_signature }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        // Removal cookie carries an empty value
        assert_eq!(
            session_cookie(&response).as_deref(),
            Some("meritbase-session=")
        );
        let body = json_body(response).await;
        assert_eq!(body["message"], "Invalid signature.");
    }

    #[tokio::test]
    async fn test_verify_malformed_message_is_bad_request() {
        let (app, _) = test_app(NonceBinding::Address);

        let response = app
            .oneshot(verify_request(
                None,
                serde_json::json!({ "message": "hello", "signature": "0x00" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["ok"], false);
    }

    #[tokio::test]
    async fn test_verify_invalid_body_is_bad_request() {
        let (app, _) = test_app(NonceBinding::Address);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/auth/verify")
                    .body(Body::from("not json"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_session_mode_without_cookie_has_no_nonce() {
        let (app, clock) = test_app(NonceBinding::Session);
        let alice = key(7);
        let (message, signature) = signed_message(&alice, "abcdEFGH1234abcd", &clock);

        let response = app
            .oneshot(verify_request(
                None,
                serde_json::json!({ "message": message, "signature": signature }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = json_body(response).await;
        assert_eq!(body["message"], "Invalid or expired nonce.");
    }

    #[tokio::test]
    async fn test_session_requires_sign_in() {
        let (app, _) = test_app(NonceBinding::Address);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/auth/session")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_pending_session_is_not_signed_in() {
        let (app, _) = test_app(NonceBinding::Address);
        let address = address_of(&key(7)).to_checksum();
        let (_, cookie) = request_nonce(&app, &address).await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/auth/session")
                    .header(header::COOKIE, cookie)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_logout() {
        let (app, _) = test_app(NonceBinding::Address);
        let address = address_of(&key(7)).to_checksum();
        let (_, cookie) = request_nonce(&app, &address).await;

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/auth/logout")
                    .header(header::COOKIE, cookie)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(
            session_cookie(&response).as_deref(),
            Some("meritbase-session=")
        );
    }
}
