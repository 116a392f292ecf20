//! REST backend over HTTP
//!
//! JSON bodies, bearer-token auth on every call. Non-2xx responses carry
//! `{"error": "..."}`, which is passed through verbatim.

use reqwest::blocking::{Client, RequestBuilder};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::traits::{Backend, BackendType, Result};
use crate::error::BackendError;
use crate::models::{
    AuthResponse, Build, BuildDraft, Credentials, DeploymentDraft, DeploymentUpdate, Environment,
    EnvironmentDraft, EnvironmentGroup, EnvironmentGroupDraft, EnvironmentSystem,
    EnvironmentSystems, Release, ReleaseDraft, System, SystemDraft, User,
};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

#[derive(Deserialize)]
struct AddedSystems {
    #[serde(default)]
    systems: Option<Vec<EnvironmentSystem>>,
}

#[derive(Deserialize)]
struct SyncResult {
    #[serde(default)]
    updated_count: usize,
}

/// HTTP implementation of [`Backend`]
pub struct HttpBackend {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpBackend {
    pub fn with_timeout(
        base_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.client.request(method, self.url(path));
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn execute(&self, builder: RequestBuilder) -> Result<String> {
        let response = builder
            .send()
            .map_err(|e| BackendError::Network(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .map_err(|e| BackendError::Network(e.to_string()))?;

        if (200..300).contains(&status) {
            Ok(body)
        } else {
            Err(classify_failure(status, &body))
        }
    }

    fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        log::debug!("GET {}", path);
        let body = self.execute(self.request(Method::GET, path))?;
        decode(&body)
    }

    fn send<B: Serialize, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        payload: &B,
    ) -> Result<T> {
        log::debug!("{} {}", method, path);
        let body = self.execute(self.request(method, path).json(payload))?;
        decode(&body)
    }

    /// Sends `payload` and ignores the response body
    fn send_only<B: Serialize>(&self, method: Method, path: &str, payload: &B) -> Result<()> {
        log::debug!("{} {}", method, path);
        self.execute(self.request(method, path).json(payload)).map(|_| ())
    }

    fn delete(&self, path: &str) -> Result<()> {
        log::debug!("DELETE {}", path);
        self.execute(self.request(Method::DELETE, path)).map(|_| ())
    }
}

/// Maps a non-2xx response to a backend error
pub(crate) fn classify_failure(status: u16, body: &str) -> BackendError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.error)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| format!("HTTP {}", status));

    if status == 401 {
        BackendError::Unauthorized(message)
    } else {
        BackendError::Rejected { status, message }
    }
}

fn decode<T: DeserializeOwned>(body: &str) -> Result<T> {
    serde_json::from_str(body).map_err(|e| BackendError::Decode(e.to_string()))
}

impl Backend for HttpBackend {
    fn backend_type(&self) -> BackendType {
        BackendType::Http
    }

    fn location(&self) -> String {
        self.base_url.clone()
    }

    fn list_releases(&self) -> Result<Vec<Release>> {
        self.get("releases")
    }

    fn get_release(&self, id: &str) -> Result<Release> {
        self.get(&format!("releases/{}", id))
    }

    fn create_release(&self, draft: &ReleaseDraft) -> Result<Release> {
        self.send(Method::POST, "releases", draft)
    }

    fn update_release(&self, id: &str, draft: &ReleaseDraft) -> Result<Release> {
        self.send(Method::PUT, &format!("releases/{}", id), draft)
    }

    fn delete_release(&self, id: &str) -> Result<()> {
        self.delete(&format!("releases/{}", id))
    }

    fn release_builds(&self, id: &str) -> Result<Vec<Build>> {
        self.get(&format!("releases/{}/builds", id))
    }

    fn list_builds(&self) -> Result<Vec<Build>> {
        self.get("builds")
    }

    fn get_build(&self, id: &str) -> Result<Build> {
        self.get(&format!("builds/{}", id))
    }

    fn create_build(&self, draft: &BuildDraft) -> Result<Build> {
        self.send(Method::POST, "builds", draft)
    }

    fn update_build(&self, id: &str, draft: &BuildDraft) -> Result<Build> {
        self.send(Method::PUT, &format!("builds/{}", id), draft)
    }

    fn delete_build(&self, id: &str) -> Result<()> {
        self.delete(&format!("builds/{}", id))
    }

    fn list_systems(&self) -> Result<Vec<System>> {
        self.get("systems")
    }

    fn get_system(&self, id: &str) -> Result<System> {
        self.get(&format!("systems/{}", id))
    }

    fn create_system(&self, draft: &SystemDraft) -> Result<System> {
        self.send(Method::POST, "systems", draft)
    }

    fn update_system(&self, id: &str, draft: &SystemDraft) -> Result<System> {
        self.send(Method::PUT, &format!("systems/{}", id), draft)
    }

    fn delete_system(&self, id: &str) -> Result<()> {
        self.delete(&format!("systems/{}", id))
    }

    fn subsystems(&self, id: &str) -> Result<Vec<System>> {
        self.get(&format!("systems/{}/subsystems", id))
    }

    fn list_environments(&self) -> Result<Vec<Environment>> {
        self.get("environments")
    }

    fn get_environment(&self, id: &str) -> Result<Environment> {
        self.get(&format!("environments/{}", id))
    }

    fn create_environment(&self, draft: &EnvironmentDraft) -> Result<Environment> {
        self.send(Method::POST, "environments", draft)
    }

    fn update_environment(&self, id: &str, draft: &EnvironmentDraft) -> Result<Environment> {
        self.send(Method::PUT, &format!("environments/{}", id), draft)
    }

    fn delete_environment(&self, id: &str) -> Result<()> {
        self.delete(&format!("environments/{}", id))
    }

    fn list_environment_groups(&self) -> Result<Vec<EnvironmentGroup>> {
        self.get("environment-groups")
    }

    fn get_environment_group(&self, id: &str) -> Result<EnvironmentGroup> {
        self.get(&format!("environment-groups/{}", id))
    }

    fn create_environment_group(&self, draft: &EnvironmentGroupDraft) -> Result<EnvironmentGroup> {
        self.send(Method::POST, "environment-groups", draft)
    }

    fn update_environment_group(
        &self,
        id: &str,
        draft: &EnvironmentGroupDraft,
    ) -> Result<EnvironmentGroup> {
        self.send(Method::PUT, &format!("environment-groups/{}", id), draft)
    }

    fn delete_environment_group(&self, id: &str) -> Result<()> {
        self.delete(&format!("environment-groups/{}", id))
    }

    fn environment_systems(&self, environment_id: &str) -> Result<EnvironmentSystems> {
        self.get(&format!("environments/{}/systems", environment_id))
    }

    fn add_system_to_environment(
        &self,
        environment_id: &str,
        draft: &DeploymentDraft,
    ) -> Result<Vec<EnvironmentSystem>> {
        let added: AddedSystems = self.send(
            Method::POST,
            &format!("environments/{}/systems", environment_id),
            draft,
        )?;
        Ok(added.systems.unwrap_or_default())
    }

    fn update_environment_system(
        &self,
        environment_id: &str,
        system_id: &str,
        update: &DeploymentUpdate,
    ) -> Result<()> {
        self.send_only(
            Method::PUT,
            &format!("environments/{}/systems/{}", environment_id, system_id),
            update,
        )
    }

    fn remove_system_from_environment(&self, environment_id: &str, system_id: &str) -> Result<()> {
        self.delete(&format!("environments/{}/systems/{}", environment_id, system_id))
    }

    fn sync_environment_systems(&self, environment_id: &str) -> Result<usize> {
        let path = format!("environments/{}/systems/sync", environment_id);
        log::debug!("POST {}", path);
        let body = self.execute(self.request(Method::POST, &path))?;
        let result: SyncResult = decode(&body)?;
        Ok(result.updated_count)
    }

    fn me(&self) -> Result<User> {
        self.get("me")
    }

    fn login(&self, credentials: &Credentials) -> Result<AuthResponse> {
        self.send(Method::POST, "auth/login", credentials)
    }

    fn register(&self, credentials: &Credentials) -> Result<AuthResponse> {
        self.send(Method::POST, "auth/register", credentials)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_body_is_passed_through() {
        let err = classify_failure(400, r#"{"error":"Release not found"}"#);
        assert_eq!(
            err,
            BackendError::Rejected {
                status: 400,
                message: "Release not found".into()
            }
        );
    }

    #[test]
    fn test_401_is_unauthorized() {
        let err = classify_failure(401, r#"{"error":"Invalid token"}"#);
        assert_eq!(err, BackendError::Unauthorized("Invalid token".into()));
    }

    #[test]
    fn test_non_json_body_falls_back_to_status() {
        let err = classify_failure(502, "<html>Bad Gateway</html>");
        assert_eq!(
            err,
            BackendError::Rejected {
                status: 502,
                message: "HTTP 502".into()
            }
        );
    }

    #[test]
    fn test_url_joining() {
        let backend =
            HttpBackend::with_timeout("http://localhost:8080/api/", Some(String::new()), DEFAULT_TIMEOUT)
                .unwrap();
        assert_eq!(backend.url("/releases/r1/builds"), "http://localhost:8080/api/releases/r1/builds");
        assert!(backend.token.is_none());
    }

    #[test]
    fn test_deployment_responses_decode() {
        let added: AddedSystems = decode(r#"{"message":"Added 0 system(s) to environment","systems":null}"#).unwrap();
        assert!(added.systems.unwrap_or_default().is_empty());

        let synced: SyncResult = decode(r#"{"message":"Updated 2 system version(s)","updated_count":2}"#).unwrap();
        assert_eq!(synced.updated_count, 2);
    }
}
