//! CRUD API file records
//!
//! Typed configuration for the CRUD plugin: base URL, backing data file,
//! authorization policy, and the action table.

use std::{fs, path::Path};

use http::Method;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{
    core::error::{ErrorContext, ProxyResult},
    utils::oidc::TokenValidationOptions,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CrudAuthType {
    #[default]
    None,
    Entra,
}

/// Root of a CRUD API file.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CrudApiFile {
    #[validate(length(min = 1))]
    pub base_url: String,

    #[validate(length(min = 1))]
    pub data_file: String,

    #[serde(default)]
    pub auth: CrudAuthType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entra_auth_config: Option<EntraAuthConfig>,

    #[validate(length(min = 1))]
    pub actions: Vec<CrudAction>,

    #[serde(default = "default_true")]
    pub enable_cors: bool,
}

fn default_true() -> bool {
    true
}

/// Bearer validation switches for entra-protected APIs. Each check can
/// be turned off individually for local development tokens.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct EntraAuthConfig {
    /// OpenID configuration document to validate against.
    #[validate(length(min = 1))]
    pub metadata_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audience: Option<String>,

    #[serde(default = "default_true")]
    pub validate_issuer: bool,

    #[serde(default = "default_true")]
    pub validate_audience: bool,

    #[serde(default = "default_true")]
    pub validate_lifetime: bool,

    #[serde(default = "default_true")]
    pub validate_signing_key: bool,

    #[serde(default)]
    pub roles: Vec<String>,

    #[serde(default)]
    pub scopes: Vec<String>,
}

impl EntraAuthConfig {
    pub fn validation_options(&self) -> TokenValidationOptions {
        TokenValidationOptions {
            audiences: self.audience.iter().cloned().collect(),
            validate_issuer: self.validate_issuer,
            validate_audience: self.validate_audience,
            validate_lifetime: self.validate_lifetime,
            validate_signing_key: self.validate_signing_key,
            roles: self.roles.clone(),
            scopes: self.scopes.clone(),
            ..TokenValidationOptions::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CrudActionType {
    Create,
    GetAll,
    GetOne,
    GetMany,
    Merge,
    Update,
    Delete,
}

impl CrudActionType {
    /// The HTTP method an action answers to when none is configured.
    pub fn default_method(&self) -> Method {
        match self {
            CrudActionType::Create => Method::POST,
            CrudActionType::GetAll | CrudActionType::GetOne | CrudActionType::GetMany => {
                Method::GET
            }
            CrudActionType::Merge => Method::PATCH,
            CrudActionType::Update => Method::PUT,
            CrudActionType::Delete => Method::DELETE,
        }
    }
}

/// One routed operation over the backing document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrudAction {
    pub action: CrudActionType,

    /// Explicit HTTP method override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    /// URL template relative to the base URL; `{name}` segments capture
    /// parameters.
    #[serde(default)]
    pub url: String,

    /// JSONPath into the document, with `{name}` parameter substitution.
    #[serde(default)]
    pub query: String,

    /// Per-action auth override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<CrudAuthType>,
}

impl CrudApiFile {
    pub fn load(path: &Path) -> ProxyResult<Self> {
        let text = fs::read_to_string(path)
            .config_context(&format!("unable to read CRUD API file {}", path.display()))?;
        let file: CrudApiFile = serde_json::from_str(&text)
            .config_context(&format!("unable to parse CRUD API file {}", path.display()))?;
        file.validate()?;
        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_api_file() {
        let file: CrudApiFile = serde_json::from_value(json!({
            "baseUrl": "https://api.example.com/v1/items",
            "dataFile": "items.json",
            "auth": "entra",
            "entraAuthConfig": {
                "metadataUrl": "https://login.example.com/common/v2.0/.well-known/openid-configuration",
                "audience": "api://items",
                "validateSigningKey": false,
                "roles": ["item.admin"]
            },
            "actions": [
                { "action": "getAll" },
                { "action": "getOne", "url": "/{id}", "query": "$[?(@.id=='{id}')]" },
                { "action": "merge", "url": "/{id}", "query": "$[?(@.id=='{id}')]", "auth": "none" }
            ]
        }))
        .unwrap();
        assert_eq!(file.auth, CrudAuthType::Entra);
        assert_eq!(file.actions.len(), 3);
        assert_eq!(file.actions[2].auth, Some(CrudAuthType::None));
        assert!(file.enable_cors);

        let opts = file.entra_auth_config.unwrap().validation_options();
        assert!(!opts.validate_signing_key);
        assert!(opts.validate_lifetime);
        assert_eq!(opts.audiences, vec!["api://items".to_string()]);
    }

    #[test]
    fn test_default_methods_per_action() {
        assert_eq!(CrudActionType::Create.default_method(), Method::POST);
        assert_eq!(CrudActionType::GetMany.default_method(), Method::GET);
        assert_eq!(CrudActionType::Merge.default_method(), Method::PATCH);
        assert_eq!(CrudActionType::Update.default_method(), Method::PUT);
        assert_eq!(CrudActionType::Delete.default_method(), Method::DELETE);
    }

    #[test]
    fn test_missing_base_url_fails_validation() {
        let file: Result<CrudApiFile, _> = serde_json::from_value(json!({
            "dataFile": "items.json",
            "actions": [{ "action": "getAll" }]
        }));
        assert!(file.is_err());
    }
}
