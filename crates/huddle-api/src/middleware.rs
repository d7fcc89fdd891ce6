use axum::{
    extract::{Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{DecodingKey, Validation, decode};

use huddle_types::api::Claims;

use crate::AppState;

/// Extract and validate the externally-issued JWT from the Authorization
/// header against the secret configured in app state. Validated claims are
/// injected as a request extension.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(state.jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| StatusCode::UNAUTHORIZED)?;

    req.extensions_mut().insert(token_data.claims);
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::{
        Router,
        body::Body,
        http::Request as HttpRequest,
        middleware::from_fn_with_state,
        routing::get,
    };
    use jsonwebtoken::{EncodingKey, Header, encode};
    use tower::ServiceExt;
    use uuid::Uuid;

    use huddle_db::Database;
    use huddle_gateway::{Hub, Pipeline};

    use crate::{AppState, AppStateInner};

    fn test_router(secret: &str) -> Router {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let hub = Hub::new();
        let pipeline = Pipeline::new(hub.clone(), db.clone());
        let state: AppState = Arc::new(AppStateInner {
            db,
            hub,
            pipeline,
            jwt_secret: secret.to_string(),
        });
        Router::new()
            .route("/ping", get(|| async { "pong" }))
            .layer(from_fn_with_state(state, require_auth))
    }

    fn token(secret: &str) -> String {
        let claims = Claims {
            sub: Uuid::new_v4(),
            username: "ana".into(),
            workspace_id: Uuid::new_v4(),
            exp: (chrono::Utc::now().timestamp() + 3600) as usize,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn accepts_tokens_signed_with_the_configured_secret() {
        let app = test_router("state-secret");
        let req = HttpRequest::builder()
            .uri("/ping")
            .header("authorization", format!("Bearer {}", token("state-secret")))
            .body(Body::empty())
            .unwrap();
        let res = app.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn rejects_missing_and_wrongly_signed_tokens() {
        let app = test_router("state-secret");

        let missing = HttpRequest::builder()
            .uri("/ping")
            .body(Body::empty())
            .unwrap();
        let res = app.clone().oneshot(missing).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        let forged = HttpRequest::builder()
            .uri("/ping")
            .header("authorization", format!("Bearer {}", token("other-secret")))
            .body(Body::empty())
            .unwrap();
        let res = app.oneshot(forged).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }
}
