use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::domain::auth::{AuthConfig, AuthContext, AuthMode};

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
    #[serde(default)]
    pub roles: Vec<String>,
}

pub struct AuthMiddleware {
    config: Arc<AuthConfig>,
}

impl AuthMiddleware {
    pub fn new(config: Arc<AuthConfig>) -> Self {
        Self { config }
    }

    pub fn authenticate(&self, headers: &HeaderMap) -> Result<AuthContext, AuthError> {
        if !self.config.enabled {
            return Ok(AuthContext::local_admin());
        }

        match self.config.mode {
            AuthMode::None => Ok(AuthContext::local_admin()),
            AuthMode::ApiKey => self.validate_api_key(headers),
            AuthMode::BearerToken => self.validate_bearer_token(headers),
        }
    }

    fn validate_api_key(&self, headers: &HeaderMap) -> Result<AuthContext, AuthError> {
        let api_key = headers
            .get("x-api-key")
            .and_then(|v| v.to_str().ok())
            .ok_or(AuthError::MissingCredentials)?;

        let entries = self
            .config
            .api_keys
            .as_ref()
            .ok_or(AuthError::ConfigurationError)?;

        let entry = entries
            .iter()
            .find(|e| e.key == api_key)
            .ok_or(AuthError::InvalidCredentials)?;

        Ok(AuthContext {
            authenticated: true,
            user_id: Some(entry.user_id.clone()),
            roles: vec![entry.role.clone()],
        })
    }

    fn validate_bearer_token(&self, headers: &HeaderMap) -> Result<AuthContext, AuthError> {
        let auth_header = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or(AuthError::MissingCredentials)?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or(AuthError::InvalidCredentials)?;

        let secret = self
            .config
            .jwt_secret
            .as_ref()
            .ok_or(AuthError::ConfigurationError)?;

        let algorithm = match self.config.jwt_algorithm.as_deref() {
            Some("HS384") => Algorithm::HS384,
            Some("HS512") => Algorithm::HS512,
            _ => Algorithm::HS256,
        };

        let mut validation = Validation::new(algorithm);
        validation.validate_exp = true;

        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &validation,
        )
        .map_err(|e| {
            tracing::debug!(error = %e, "Bearer token rejected");
            AuthError::InvalidCredentials
        })?;

        Ok(AuthContext {
            authenticated: true,
            user_id: Some(token_data.claims.sub),
            roles: token_data.claims.roles,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing credentials")]
    MissingCredentials,
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Auth configuration error")]
    ConfigurationError,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = match self {
            AuthError::MissingCredentials | AuthError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            AuthError::ConfigurationError => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(serde_json::json!({ "success": false, "error": self.to_string() }));
        (status, body).into_response()
    }
}

/// Attaches the caller's `AuthContext` to the request extensions.
pub async fn auth_middleware(
    State(auth): State<Arc<AuthMiddleware>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let auth_context = auth.authenticate(request.headers())?;
    request.extensions_mut().insert(auth_context);
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::auth::ApiKeyEntry;
    use crate::domain::Role;
    use axum::http::HeaderValue;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn api_key_config() -> Arc<AuthConfig> {
        Arc::new(AuthConfig {
            enabled: true,
            mode: AuthMode::ApiKey,
            api_keys: Some(vec![ApiKeyEntry {
                key: "test-key-123".to_string(),
                user_id: "alice".to_string(),
                role: "developer".to_string(),
            }]),
            jwt_secret: None,
            jwt_algorithm: None,
        })
    }

    fn bearer_config() -> Arc<AuthConfig> {
        Arc::new(AuthConfig {
            enabled: true,
            mode: AuthMode::BearerToken,
            api_keys: None,
            jwt_secret: Some("jwt-secret".to_string()),
            jwt_algorithm: Some("HS256".to_string()),
        })
    }

    fn token(secret: &str, exp_offset: i64) -> String {
        let exp = (chrono::Utc::now().timestamp() + exp_offset) as usize;
        let claims = Claims {
            sub: "bob".to_string(),
            exp,
            roles: vec!["manager".to_string()],
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    #[test]
    fn test_api_key_maps_to_its_principal() {
        let middleware = AuthMiddleware::new(api_key_config());
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_static("test-key-123"));

        let ctx = middleware.authenticate(&headers).unwrap();
        assert!(ctx.authenticated);
        assert_eq!(ctx.caller_id(), "alice");
        assert_eq!(ctx.role(), Role::Developer);
    }

    #[test]
    fn test_api_key_auth_failure() {
        let middleware = AuthMiddleware::new(api_key_config());
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_static("wrong-key"));
        assert!(matches!(
            middleware.authenticate(&headers),
            Err(AuthError::InvalidCredentials)
        ));

        assert!(matches!(
            middleware.authenticate(&HeaderMap::new()),
            Err(AuthError::MissingCredentials)
        ));
    }

    #[test]
    fn test_bearer_token_roles() {
        let middleware = AuthMiddleware::new(bearer_config());
        let mut headers = HeaderMap::new();
        let value = format!("Bearer {}", token("jwt-secret", 3600));
        headers.insert("authorization", HeaderValue::from_str(&value).unwrap());

        let ctx = middleware.authenticate(&headers).unwrap();
        assert_eq!(ctx.caller_id(), "bob");
        assert_eq!(ctx.role(), Role::Manager);
    }

    #[test]
    fn test_expired_or_foreign_token_is_rejected() {
        let middleware = AuthMiddleware::new(bearer_config());

        for bad in [token("jwt-secret", -3600), token("other-secret", 3600)] {
            let mut headers = HeaderMap::new();
            let value = format!("Bearer {}", bad);
            headers.insert("authorization", HeaderValue::from_str(&value).unwrap());
            assert!(middleware.authenticate(&headers).is_err());
        }
    }

    #[test]
    fn test_disabled_auth_acts_as_local_admin() {
        let middleware = AuthMiddleware::new(Arc::new(AuthConfig::default()));
        let ctx = middleware.authenticate(&HeaderMap::new()).unwrap();
        assert!(ctx.is_admin());
        assert_eq!(ctx.caller_id(), "local");
    }

    #[test]
    fn test_error_response_status() {
        let response = AuthError::MissingCredentials.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
