//! Bearer-token validation against fetched OIDC metadata
//!
//! One validation engine serves both the auth plugin's OAuth2 mode and
//! the CRUD plugin's entra mode: discovery document -> JWKS -> token
//! checks, each switchable per configuration.

use jsonwebtoken::{decode, decode_header, jwk::JwkSet, DecodingKey, Validation};
use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::core::error::{ProxyError, ProxyResult};

#[derive(Debug, Deserialize)]
struct OpenIdMetadata {
    issuer: String,
    jwks_uri: String,
}

/// Which checks to run and which claim filters to apply.
#[derive(Debug, Clone, Default)]
pub struct TokenValidationOptions {
    pub audiences: Vec<String>,
    pub validate_issuer: bool,
    pub validate_audience: bool,
    pub validate_lifetime: bool,
    pub validate_signing_key: bool,
    /// When non-empty, the token must carry at least one of these roles.
    pub roles: Vec<String>,
    /// Consulted only when `roles` is empty: at least one scope must match.
    pub scopes: Vec<String>,
    pub allowed_tenants: Vec<String>,
    pub allowed_applications: Vec<String>,
    pub allowed_principals: Vec<String>,
}

/// Token validator bound to one identity provider.
pub struct TokenValidator {
    issuer: String,
    keys: JwkSet,
}

impl TokenValidator {
    /// Fetch the OpenID configuration and its signing keys. Callers
    /// disable themselves when this fails.
    pub async fn discover(metadata_url: &str) -> ProxyResult<Self> {
        let client = reqwest::Client::new();
        let metadata: OpenIdMetadata = client
            .get(metadata_url)
            .send()
            .await
            .map_err(|e| ProxyError::Upstream(format!("OIDC metadata fetch failed: {e}")))?
            .json()
            .await
            .map_err(|e| ProxyError::Upstream(format!("OIDC metadata parse failed: {e}")))?;
        let keys: JwkSet = client
            .get(&metadata.jwks_uri)
            .send()
            .await
            .map_err(|e| ProxyError::Upstream(format!("JWKS fetch failed: {e}")))?
            .json()
            .await
            .map_err(|e| ProxyError::Upstream(format!("JWKS parse failed: {e}")))?;
        Ok(Self {
            issuer: metadata.issuer,
            keys,
        })
    }

    #[cfg(test)]
    pub fn for_tests(issuer: &str, keys: JwkSet) -> Self {
        Self {
            issuer: issuer.to_string(),
            keys,
        }
    }

    /// Validate a bearer token and return its claims.
    pub fn validate(
        &self,
        token: &str,
        options: &TokenValidationOptions,
    ) -> ProxyResult<JsonValue> {
        let header = decode_header(token)
            .map_err(|e| ProxyError::Unauthorized(format!("malformed token: {e}")))?;

        let mut validation = Validation::new(header.alg);
        validation.set_required_spec_claims::<&str>(&[]);
        validation.validate_exp = options.validate_lifetime;
        validation.validate_nbf = options.validate_lifetime;
        validation.validate_aud = options.validate_audience && !options.audiences.is_empty();
        if validation.validate_aud {
            validation.set_audience(&options.audiences);
        }
        if options.validate_issuer {
            validation.set_issuer(&[&self.issuer]);
        }

        let key = if options.validate_signing_key {
            let kid = header
                .kid
                .ok_or_else(|| ProxyError::Unauthorized("token has no key id".to_string()))?;
            let jwk = self
                .keys
                .find(&kid)
                .ok_or_else(|| ProxyError::Unauthorized(format!("unknown signing key {kid}")))?;
            DecodingKey::from_jwk(jwk)
                .map_err(|e| ProxyError::Unauthorized(format!("unusable signing key: {e}")))?
        } else {
            validation.insecure_disable_signature_validation();
            DecodingKey::from_secret(&[])
        };

        let data = decode::<JsonValue>(token, &key, &validation)
            .map_err(|e| ProxyError::Unauthorized(format!("token rejected: {e}")))?;
        let claims = data.claims;

        self.check_claim_filters(&claims, options)?;
        Ok(claims)
    }

    fn check_claim_filters(
        &self,
        claims: &JsonValue,
        options: &TokenValidationOptions,
    ) -> ProxyResult<()> {
        check_allowed(claims, "tid", &options.allowed_tenants, "tenant")?;
        check_allowed(claims, "oid", &options.allowed_principals, "principal")?;
        if !options.allowed_applications.is_empty() {
            // v1 tokens carry appid, v2 tokens carry azp.
            let app = claims
                .get("appid")
                .or_else(|| claims.get("azp"))
                .and_then(JsonValue::as_str)
                .unwrap_or_default();
            if !options.allowed_applications.iter().any(|a| a == app) {
                return Err(ProxyError::Unauthorized(format!(
                    "application {app} not allowed"
                )));
            }
        }

        if !options.roles.is_empty() {
            let roles = claim_values(claims, "roles");
            if !options.roles.iter().any(|r| roles.iter().any(|c| c == r)) {
                return Err(ProxyError::Unauthorized("no matching role claim".to_string()));
            }
        } else if !options.scopes.is_empty() {
            let scopes = claim_values(claims, "scp");
            if !options.scopes.iter().any(|s| scopes.iter().any(|c| c == s)) {
                return Err(ProxyError::Unauthorized(
                    "no matching scope claim".to_string(),
                ));
            }
        }
        Ok(())
    }
}

fn check_allowed(
    claims: &JsonValue,
    claim: &str,
    allowed: &[String],
    what: &str,
) -> ProxyResult<()> {
    if allowed.is_empty() {
        return Ok(());
    }
    let value = claims.get(claim).and_then(JsonValue::as_str).unwrap_or_default();
    if allowed.iter().any(|a| a == value) {
        Ok(())
    } else {
        Err(ProxyError::Unauthorized(format!(
            "{what} {value} not allowed"
        )))
    }
}

/// A claim that may be a JSON array of strings or a space-separated
/// string ("scp" is a string, "roles" is an array).
fn claim_values(claims: &JsonValue, claim: &str) -> Vec<String> {
    match claims.get(claim) {
        Some(JsonValue::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Some(JsonValue::String(s)) => s.split_whitespace().map(str::to_string).collect(),
        _ => Vec::new(),
    }
}
