#![doc = include_str!("../README.md")]

use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use thiserror::Error;
use tracing::{debug, info};
use vicat::{Catalog, CatalogError, Entity, EntityId, EntityRef, Query};

// ============================================================================
// Errors and configuration
// ============================================================================

#[derive(Debug, Error)]
pub enum IcatError {
    #[error("{0} is not set")]
    MissingSetting(&'static str),

    #[error("Invalid {name}: {reason}")]
    InvalidSetting { name: &'static str, reason: String },

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// How to reach and authenticate with an ICAT server.
#[derive(Clone)]
pub struct IcatConfig {
    /// Server root, e.g. `https://icat.example.org`.
    pub url: String,
    /// Authentication plugin, `simple` by default.
    pub plugin: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Reuse an existing session instead of logging in.
    pub session_id: Option<String>,
    pub verify_tls: bool,
}

impl std::fmt::Debug for IcatConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IcatConfig")
            .field("url", &self.url)
            .field("plugin", &self.plugin)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("session_id", &self.session_id.as_ref().map(|_| "<redacted>"))
            .field("verify_tls", &self.verify_tls)
            .finish()
    }
}

impl IcatConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            plugin: "simple".to_string(),
            username: None,
            password: None,
            session_id: None,
            verify_tls: true,
        }
    }

    pub fn with_credentials(
        mut self,
        plugin: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.plugin = plugin.into();
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_verify_tls(mut self, verify_tls: bool) -> Self {
        self.verify_tls = verify_tls;
        self
    }

    /// Read `ICAT_URL` (required), `ICAT_PLUGIN`, `ICAT_USERNAME`,
    /// `ICAT_PASSWORD`, `ICAT_SESSION_ID` and `ICAT_INSECURE`.
    pub fn from_env() -> Result<Self, IcatError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, IcatError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = lookup("ICAT_URL")
            .filter(|u| !u.trim().is_empty())
            .ok_or(IcatError::MissingSetting("ICAT_URL"))?;
        let mut config = Self::new(url);

        if let Some(plugin) = lookup("ICAT_PLUGIN") {
            config.plugin = plugin;
        }
        config.username = lookup("ICAT_USERNAME");
        config.password = lookup("ICAT_PASSWORD");
        config.session_id = lookup("ICAT_SESSION_ID").filter(|s| !s.is_empty());

        if let Some(insecure) = lookup("ICAT_INSECURE") {
            config.verify_tls = match insecure.trim().to_ascii_lowercase().as_str() {
                "" | "0" | "false" | "no" => true,
                "1" | "true" | "yes" => false,
                other => {
                    return Err(IcatError::InvalidSetting {
                        name: "ICAT_INSECURE",
                        reason: format!("expected a boolean, got '{}'", other),
                    });
                }
            };
        }

        Ok(config)
    }
}

// ============================================================================
// Client
// ============================================================================

/// A logged-in ICAT session implementing [`vicat::Catalog`] over the REST API.
#[derive(Debug, Clone)]
pub struct IcatClient {
    http: Client,
    base: String,
    session_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    session_id: String,
}

#[derive(Deserialize)]
struct CloneResponse {
    id: EntityId,
}

#[derive(Deserialize)]
struct ErrorBody {
    code: String,
    message: String,
}

impl IcatClient {
    /// Reuse the configured session, or log in with the configured
    /// credentials.
    pub fn connect(config: &IcatConfig) -> Result<Self, IcatError> {
        if let Some(session_id) = &config.session_id {
            return Self::with_session(&config.url, session_id, config.verify_tls);
        }

        let username = config
            .username
            .as_deref()
            .ok_or(IcatError::MissingSetting("ICAT_USERNAME"))?;
        let password = config
            .password
            .as_deref()
            .ok_or(IcatError::MissingSetting("ICAT_PASSWORD"))?;

        let mut client = Self::with_session(&config.url, "", config.verify_tls)?;
        let response: LoginResponse =
            decode(send(client.login_request(&config.plugin, username, password))?)?;
        client.session_id = response.session_id;
        info!(url = %client.base, plugin = %config.plugin, username, "logged in to ICAT");
        Ok(client)
    }

    pub fn with_session(url: &str, session_id: &str, verify_tls: bool) -> Result<Self, IcatError> {
        let http = Client::builder()
            .danger_accept_invalid_certs(!verify_tls)
            .build()
            .map_err(transport)?;
        Ok(Self {
            http,
            base: url.trim_end_matches('/').to_string(),
            session_id: session_id.to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.base
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// End the session on the server.
    pub fn logout(self) -> Result<(), CatalogError> {
        send(
            self.http
                .delete(format!("{}/icat/session/{}", self.base, self.session_id)),
        )?;
        debug!(url = %self.base, "logged out of ICAT");
        Ok(())
    }

    fn login_request(&self, plugin: &str, username: &str, password: &str) -> RequestBuilder {
        let body = json!({
            "plugin": plugin,
            "credentials": [{"username": username}, {"password": password}],
        });
        self.http
            .post(format!("{}/icat/session", self.base))
            .form(&[("json", body.to_string())])
    }

    fn entity_manager(&self) -> String {
        format!("{}/icat/entityManager", self.base)
    }

    fn search_request(&self, query: &Query) -> RequestBuilder {
        self.http.get(self.entity_manager()).query(&[
            ("sessionId", self.session_id.as_str()),
            ("query", query.to_jpql().as_str()),
        ])
    }

    fn write_request(&self, entity: &Entity) -> Result<RequestBuilder, CatalogError> {
        let entities = serde_json::to_string(entity)
            .map_err(|e| CatalogError::Decode(format!("cannot encode entity: {}", e)))?;
        Ok(self.http.post(self.entity_manager()).form(&[
            ("sessionId", self.session_id.as_str()),
            ("entities", entities.as_str()),
        ]))
    }

    fn delete_request(&self, entity: &EntityRef) -> RequestBuilder {
        self.http.delete(self.entity_manager()).query(&[
            ("sessionId", self.session_id.as_str()),
            ("entities", entity.envelope().to_string().as_str()),
        ])
    }

    fn clone_request(
        &self,
        type_name: &str,
        id: EntityId,
        overrides: &Map<String, Value>,
    ) -> RequestBuilder {
        self.http.post(format!("{}/icat/cloner", self.base)).form(&[
            ("sessionId", self.session_id.clone()),
            ("name", type_name.to_string()),
            ("id", id.to_string()),
            ("keys", Value::Object(overrides.clone()).to_string()),
        ])
    }
}

impl Catalog for IcatClient {
    fn search(&self, query: &Query) -> Result<Vec<Value>, CatalogError> {
        debug!(query = %query.to_jpql(), "ICAT search");
        decode(send(self.search_request(query))?)
    }

    fn write(&self, entity: &Entity) -> Result<Vec<EntityId>, CatalogError> {
        debug!(entity = entity.type_name(), "ICAT write");
        decode(send(self.write_request(entity)?)?)
    }

    fn delete(&self, entity: &EntityRef) -> Result<(), CatalogError> {
        debug!(entity = %entity.kind, id = entity.id, "ICAT delete");
        send(self.delete_request(entity))?;
        Ok(())
    }

    fn clone_entity(
        &self,
        type_name: &str,
        id: EntityId,
        overrides: &Map<String, Value>,
    ) -> Result<EntityId, CatalogError> {
        debug!(entity = type_name, id, "ICAT clone");
        let response: CloneResponse = decode(send(self.clone_request(type_name, id, overrides))?)?;
        Ok(response.id)
    }
}

// ============================================================================
// Transport helpers
// ============================================================================

fn transport(e: reqwest::Error) -> CatalogError {
    CatalogError::Transport(e.to_string())
}

fn send(request: RequestBuilder) -> Result<Response, CatalogError> {
    let response = request.send().map_err(transport)?;
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        let body = response.text().unwrap_or_default();
        Err(server_error(status, &body))
    }
}

fn decode<T: DeserializeOwned>(response: Response) -> Result<T, CatalogError> {
    let text = response.text().map_err(transport)?;
    parse_body(&text)
}

fn parse_body<T: DeserializeOwned>(text: &str) -> Result<T, CatalogError> {
    serde_json::from_str(text).map_err(|e| CatalogError::Decode(format!("{}: {}", e, text)))
}

/// ICAT reports failures as `{"code": ..., "message": ...}`.
fn server_error(status: StatusCode, body: &str) -> CatalogError {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(err) if err.code == "NO_SUCH_OBJECT_FOUND" => CatalogError::NotFound(err.message),
        Ok(err) => CatalogError::Server {
            code: err.code,
            message: err.message,
        },
        Err(_) => CatalogError::Server {
            code: format!("HTTP {}", status.as_u16()),
            message: body.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use vicat::{DatasetParameter, ParameterTypeSpec, ValueKind};

    fn client() -> IcatClient {
        IcatClient::with_session("https://icat.example.org/", "abc-123", true).unwrap()
    }

    fn query_pairs(request: &reqwest::blocking::Request) -> HashMap<String, String> {
        request
            .url()
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    fn body_text(request: &reqwest::blocking::Request) -> String {
        let bytes = request.body().and_then(|b| b.as_bytes()).unwrap_or_default();
        String::from_utf8_lossy(bytes).into_owned()
    }

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        assert_eq!(client().url(), "https://icat.example.org");
        assert_eq!(client().session_id(), "abc-123");
    }

    #[test]
    fn test_search_request() {
        let request = client()
            .search_request(&Query::FacilityByName("LSF".into()))
            .build()
            .unwrap();
        assert_eq!(request.method(), &reqwest::Method::GET);
        assert_eq!(request.url().path(), "/icat/entityManager");
        let pairs = query_pairs(&request);
        assert_eq!(pairs["sessionId"], "abc-123");
        assert_eq!(
            pairs["query"],
            "SELECT f.id FROM Facility f WHERE f.name = 'LSF'"
        );
    }

    #[test]
    fn test_write_request_is_form_encoded() {
        let entity = Entity::DatasetParameter(DatasetParameter {
            dataset: 5.into(),
            type_ref: 2.into(),
            numeric_value: Some(4.0),
            string_value: None,
        });
        let request = client().write_request(&entity).unwrap().build().unwrap();
        assert_eq!(request.method(), &reqwest::Method::POST);
        let body = body_text(&request);
        assert!(body.contains("sessionId=abc-123"));
        assert!(body.contains("entities="));
        assert!(body.contains("DatasetParameter"));
    }

    #[test]
    fn test_write_request_parameter_type() {
        let entity = Entity::ParameterType(ParameterTypeSpec {
            name: "comment".into(),
            facility: 1.into(),
            value_type: ValueKind::String,
            description: "d".into(),
            applicable_to_dataset: true,
            units: "N/A".into(),
        });
        let request = client().write_request(&entity).unwrap().build().unwrap();
        assert!(body_text(&request).contains("ParameterType"));
    }

    #[test]
    fn test_delete_request() {
        let request = client()
            .delete_request(&EntityRef::new("DatasetParameter", 9))
            .build()
            .unwrap();
        assert_eq!(request.method(), &reqwest::Method::DELETE);
        let entities: Value = serde_json::from_str(&query_pairs(&request)["entities"]).unwrap();
        assert_eq!(entities, json!({"DatasetParameter": {"id": 9}}));
    }

    #[test]
    fn test_clone_request() {
        let mut overrides = Map::new();
        overrides.insert("name".into(), json!("ds1_v2"));
        let request = client()
            .clone_request("Dataset", 42, &overrides)
            .build()
            .unwrap();
        assert_eq!(request.url().path(), "/icat/cloner");
        let body = body_text(&request);
        assert!(body.contains("name=Dataset"));
        assert!(body.contains("id=42"));
        assert!(body.contains("keys="));
    }

    #[test]
    fn test_login_request() {
        let request = client()
            .login_request("simple", "br54", "secret")
            .build()
            .unwrap();
        assert_eq!(request.url().path(), "/icat/session");
        assert!(body_text(&request).starts_with("json="));
    }

    #[test]
    fn test_server_error_from_icat_body() {
        let err = server_error(
            StatusCode::FORBIDDEN,
            r#"{"code":"SESSION","message":"Unable to find user by sessionid"}"#,
        );
        assert!(matches!(err, CatalogError::Server { ref code, .. } if code == "SESSION"));
    }

    #[test]
    fn test_server_error_not_found() {
        let err = server_error(
            StatusCode::NOT_FOUND,
            r#"{"code":"NO_SUCH_OBJECT_FOUND","message":"Dataset[id:9] not found."}"#,
        );
        assert!(matches!(err, CatalogError::NotFound(_)));
    }

    #[test]
    fn test_server_error_plain_body() {
        let err = server_error(StatusCode::BAD_GATEWAY, "upstream down");
        match err {
            CatalogError::Server { code, message } => {
                assert_eq!(code, "HTTP 502");
                assert_eq!(message, "upstream down");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_bodies() {
        let ids: Vec<EntityId> = parse_body("[101]").unwrap();
        assert_eq!(ids, vec![101]);
        let clone: CloneResponse = parse_body(r#"{"id": 7}"#).unwrap();
        assert_eq!(clone.id, 7);
        let login: LoginResponse = parse_body(r#"{"sessionId": "s-1"}"#).unwrap();
        assert_eq!(login.session_id, "s-1");
        assert!(matches!(
            parse_body::<Vec<EntityId>>("<html>"),
            Err(CatalogError::Decode(_))
        ));
    }

    #[test]
    fn test_config_from_lookup() {
        let config = IcatConfig::from_lookup(lookup(&[
            ("ICAT_URL", "https://icat.example.org"),
            ("ICAT_USERNAME", "br54"),
            ("ICAT_PASSWORD", "pw"),
            ("ICAT_INSECURE", "true"),
        ]))
        .unwrap();
        assert_eq!(config.plugin, "simple");
        assert_eq!(config.username.as_deref(), Some("br54"));
        assert!(!config.verify_tls);
        assert!(config.session_id.is_none());
    }

    #[test]
    fn test_config_requires_url() {
        let err = IcatConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, IcatError::MissingSetting("ICAT_URL")));
    }

    #[test]
    fn test_config_rejects_bad_insecure_flag() {
        let err = IcatConfig::from_lookup(lookup(&[
            ("ICAT_URL", "https://icat.example.org"),
            ("ICAT_INSECURE", "sometimes"),
        ]))
        .unwrap_err();
        assert!(matches!(err, IcatError::InvalidSetting { .. }));
    }

    #[test]
    fn test_config_debug_redacts_secrets() {
        let config = IcatConfig::new("https://icat.example.org")
            .with_credentials("simple", "br54", "hunter2")
            .with_session("sess-xyz");
        let debug = format!("{:?}", config);
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("sess-xyz"));
        assert!(debug.contains("br54"));
    }

    #[test]
    fn test_connect_without_credentials() {
        let config = IcatConfig::new("https://icat.example.org");
        let err = IcatClient::connect(&config).unwrap_err();
        assert!(matches!(err, IcatError::MissingSetting("ICAT_USERNAME")));
    }

    #[test]
    fn test_connect_with_session_skips_login() {
        let config = IcatConfig::new("https://icat.example.org").with_session("existing");
        let client = IcatClient::connect(&config).unwrap();
        assert_eq!(client.session_id(), "existing");
    }
}
