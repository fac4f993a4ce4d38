//! Request authentication and tenant identity.
//!
//! HTTP requests are authenticated before any session lookup. API-key mode
//! checks a static bearer key and carries no tenant; JWT mode verifies a
//! bearer token and, with multi-tenancy on, uses its `sub` claim as the
//! tenant identifier.

use std::sync::Arc;

use axum::http::{header, HeaderMap};
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;

use crate::config::{AuthMode, GatewayConfig, TenancyConfig};
use crate::errors::{GatewayError, Result};
use crate::tenant::SEPARATOR;

/// Identity attached to one inbound call. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TenantContext {
    pub tenant_id: Option<String>,
}

impl TenantContext {
    /// No tenant: legacy, single-tenant behaviour.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn for_tenant(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: Some(tenant_id.into()),
        }
    }

    pub fn tenant(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }
}

/// Turns a bearer token into the subject it was issued for.
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
}

const ASYMMETRIC_ALGORITHMS: &[Algorithm] = &[
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::PS256,
    Algorithm::PS384,
    Algorithm::PS512,
    Algorithm::ES256,
    Algorithm::ES384,
    Algorithm::EdDSA,
];

enum KeySource {
    Secret(DecodingKey),
    Jwks(JwkSet),
}

/// JWT verifier backed by `jsonwebtoken`.
pub struct JwtVerifier {
    keys: KeySource,
    issuer: Option<String>,
    audience: Option<String>,
}

impl JwtVerifier {
    /// Verifies HS256 tokens signed with a shared secret.
    pub fn from_secret(secret: &str, issuer: Option<String>, audience: Option<String>) -> Self {
        Self {
            keys: KeySource::Secret(DecodingKey::from_secret(secret.as_bytes())),
            issuer,
            audience,
        }
    }

    /// Verifies asymmetric tokens against a key set.
    pub fn from_jwks(jwks: JwkSet, issuer: Option<String>, audience: Option<String>) -> Self {
        Self {
            keys: KeySource::Jwks(jwks),
            issuer,
            audience,
        }
    }

    /// Downloads a JWKS document. Runs the blocking fetch off the runtime.
    pub async fn fetch_jwks(url: &str) -> Result<JwkSet> {
        let url = url.to_string();
        tokio::task::spawn_blocking(move || {
            let mut response = ureq::get(&url)
                .call()
                .map_err(|e| GatewayError::connection(format!("failed to fetch JWKS: {e}")))?;
            response
                .body_mut()
                .read_json::<JwkSet>()
                .map_err(|e| GatewayError::Config {
                    message: format!("invalid JWKS document: {e}"),
                })
        })
        .await
        .map_err(|e| GatewayError::connection(format!("JWKS fetch task failed: {e}")))?
    }

    fn validation(&self, algorithm: Algorithm) -> Validation {
        let mut validation = Validation::new(algorithm);
        if let Some(issuer) = &self.issuer {
            validation.set_issuer(&[issuer]);
        }
        match &self.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }
        validation
    }

    fn invalid(reason: impl std::fmt::Display) -> GatewayError {
        GatewayError::Auth {
            message: format!("invalid token: {reason}"),
        }
    }
}

impl TokenVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> Result<String> {
        let claims = match &self.keys {
            KeySource::Secret(key) => {
                decode::<Claims>(token, key, &self.validation(Algorithm::HS256))
                    .map_err(Self::invalid)?
                    .claims
            }
            KeySource::Jwks(set) => {
                let header = decode_header(token).map_err(Self::invalid)?;
                if !ASYMMETRIC_ALGORITHMS.contains(&header.alg) {
                    return Err(Self::invalid(format!("algorithm {:?} not allowed", header.alg)));
                }
                let jwk = match header.kid.as_deref() {
                    Some(kid) => set.find(kid),
                    None => set.keys.first(),
                }
                .ok_or_else(|| Self::invalid("no matching key"))?;
                let key = DecodingKey::from_jwk(jwk).map_err(Self::invalid)?;
                decode::<Claims>(token, &key, &self.validation(header.alg))
                    .map_err(Self::invalid)?
                    .claims
            }
        };

        if claims.sub.is_empty() {
            return Err(Self::invalid("empty subject"));
        }
        Ok(claims.sub)
    }
}

/// Builds the token verifier the configuration asks for, if any.
pub async fn build_verifier(config: &TenancyConfig) -> Result<Option<Arc<dyn TokenVerifier>>> {
    if config.auth_mode != AuthMode::Jwt {
        return Ok(None);
    }
    let verifier = if let Some(url) = &config.jwks_url {
        let jwks = JwtVerifier::fetch_jwks(url).await?;
        JwtVerifier::from_jwks(jwks, config.issuer.clone(), config.audience.clone())
    } else if let Some(secret) = &config.jwt_secret {
        JwtVerifier::from_secret(secret, config.issuer.clone(), config.audience.clone())
    } else {
        return Err(GatewayError::Config {
            message: "jwt auth mode needs a secret or a JWKS url".to_string(),
        });
    };
    Ok(Some(Arc::new(verifier)))
}

/// Authentication policy applied to every HTTP request.
#[derive(Clone)]
pub enum Authenticator {
    /// No credentials required.
    Disabled,
    /// `Authorization: Bearer <key>` must match exactly.
    ApiKey(String),
    /// Bearer JWT; `tenant_scoped` makes the subject the tenant.
    Jwt {
        verifier: Arc<dyn TokenVerifier>,
        tenant_scoped: bool,
    },
}

impl Authenticator {
    pub fn from_config(config: &GatewayConfig, verifier: Option<Arc<dyn TokenVerifier>>) -> Self {
        match verifier {
            Some(verifier) => Self::Jwt {
                verifier,
                tenant_scoped: config.tenancy.multi_tenancy,
            },
            None => match &config.http.api_key {
                Some(key) if !key.is_empty() => Self::ApiKey(key.clone()),
                _ => Self::Disabled,
            },
        }
    }

    /// Checks the request's credentials and derives its tenant context.
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<TenantContext> {
        match self {
            Self::Disabled => Ok(TenantContext::none()),
            Self::ApiKey(expected) => {
                let token = bearer_token(headers).ok_or_else(missing_credentials)?;
                if token == expected.as_str() {
                    Ok(TenantContext::none())
                } else {
                    Err(GatewayError::Auth {
                        message: "invalid API key".to_string(),
                    })
                }
            }
            Self::Jwt {
                verifier,
                tenant_scoped,
            } => {
                let token = bearer_token(headers).ok_or_else(missing_credentials)?;
                let subject = verifier.verify(token)?;
                if *tenant_scoped {
                    // A separator in the tenant id would let it reach another
                    // tenant's prefixed names.
                    if subject.contains(SEPARATOR) {
                        return Err(GatewayError::Auth {
                            message: format!("subject must not contain '{SEPARATOR}'"),
                        });
                    }
                    Ok(TenantContext::for_tenant(subject))
                } else {
                    Ok(TenantContext::none())
                }
            }
        }
    }
}

fn missing_credentials() -> GatewayError {
    GatewayError::Auth {
        message: "missing bearer credentials".to_string(),
    }
}

/// Extracts the token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde::Serialize;

    #[derive(Serialize)]
    struct TestClaims<'a> {
        sub: &'a str,
        exp: u64,
    }

    fn headers_with(auth: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(auth).unwrap());
        headers
    }

    fn token(secret: &str, sub: &str) -> String {
        let exp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs()
            + 600;
        encode(
            &Header::default(),
            &TestClaims { sub, exp },
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn test_api_key_exact_match() {
        let auth = Authenticator::ApiKey("secret".into());
        assert!(auth.authenticate(&headers_with("Bearer secret")).is_ok());
        assert!(auth.authenticate(&headers_with("Bearer secret ")).is_err());
        assert!(auth.authenticate(&headers_with("bearer secret")).is_err());
        assert!(auth.authenticate(&HeaderMap::new()).is_err());
    }

    #[test]
    fn test_jwt_subject_becomes_tenant() {
        let auth = Authenticator::Jwt {
            verifier: Arc::new(JwtVerifier::from_secret("k", None, None)),
            tenant_scoped: true,
        };
        let ctx = auth
            .authenticate(&headers_with(&format!("Bearer {}", token("k", "tenantA"))))
            .unwrap();
        assert_eq!(ctx.tenant(), Some("tenantA"));
    }

    #[test]
    fn test_jwt_wrong_secret_rejected() {
        let auth = Authenticator::Jwt {
            verifier: Arc::new(JwtVerifier::from_secret("k", None, None)),
            tenant_scoped: true,
        };
        let err = auth
            .authenticate(&headers_with(&format!("Bearer {}", token("other", "t"))))
            .unwrap_err();
        assert!(matches!(err, GatewayError::Auth { .. }));
    }

    #[test]
    fn test_jwt_subject_with_separator_rejected() {
        let auth = Authenticator::Jwt {
            verifier: Arc::new(JwtVerifier::from_secret("k", None, None)),
            tenant_scoped: true,
        };
        let err = auth
            .authenticate(&headers_with(&format!("Bearer {}", token("k", "acme_corp"))))
            .unwrap_err();
        assert!(matches!(err, GatewayError::Auth { .. }));
    }

    #[test]
    fn test_jwt_without_tenancy_has_no_tenant() {
        let auth = Authenticator::Jwt {
            verifier: Arc::new(JwtVerifier::from_secret("k", None, None)),
            tenant_scoped: false,
        };
        let ctx = auth
            .authenticate(&headers_with(&format!("Bearer {}", token("k", "t"))))
            .unwrap();
        assert_eq!(ctx, TenantContext::none());
    }
}
