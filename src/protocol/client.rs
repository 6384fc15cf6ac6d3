//! # Protocol Client
//!
//! Session-authenticated HTTP client for one game server. Holds the mutable
//! session state for exactly one task: session identifiers, the bounded
//! re-login counter, and the bidirectional planet-id table.
//!
//! Failure taxonomy: transport problems (timeout, connection, malformed body)
//! each map to a distinct error message under the same failure status;
//! a session-expired response (code 111) triggers a transparent re-login and
//! a single re-issue of the original call, bounded by the retry counter;
//! any other remote error is surfaced verbatim.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::config::ProtocolConfig;
use crate::error::{Result, WorkerError};
use crate::models::{Account, MissionType, Task};
use crate::protocol::proxy::ProxyLease;
use crate::protocol::response::{ProtocolResponse, SESSION_EXPIRED_CODE};
use crate::protocol::signing;
use crate::protocol::{ClientFactory, GameOps};

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=UTF-8";

/// Server-issued session identifiers attached to every authenticated call
#[derive(Debug, Clone)]
struct SessionState {
    sess_id: String,
    ppy_id: String,
}

/// Authenticated client for a single game server
pub struct ProtocolClient {
    http: reqwest::Client,
    account: Account,
    config: ProtocolConfig,
    /// Resolved from the per-server URL table; `None` fails every call
    base_url: Option<String>,
    /// False while proxy acquisition is pending or after it failed
    ready: bool,
    session: Option<SessionState>,
    login_retries: u32,
    /// Bidirectional map: position key <-> server planet id
    planet_table: HashMap<String, String>,
    proxy: Option<ProxyLease>,
}

impl ProtocolClient {
    /// Build a client for the account's server. When a proxy pool is
    /// configured, the lease happens here; a failed lease leaves the client
    /// permanently not ready (per-task fatal, not process fatal).
    pub async fn connect(account: Account, config: ProtocolConfig) -> Result<Self> {
        let base_url = config.servers.get(&account.server).cloned();

        let mut builder = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .user_agent("android");

        let mut ready = true;
        let mut proxy = None;

        if let Some(proxy_config) = &config.proxy {
            ready = false;
            match ProxyLease::acquire(proxy_config).await {
                Ok(lease) => match reqwest::Proxy::all(&lease.proxy_url) {
                    Ok(p) => {
                        builder = builder.proxy(p);
                        proxy = Some(lease);
                        ready = true;
                    }
                    Err(e) => {
                        error!(proxy = %lease.proxy_url, error = %e, "Invalid proxy URL; client disabled");
                    }
                },
                Err(e) => {
                    error!(error = %e, "Proxy lease failed; client disabled");
                }
            }
        }

        let http = builder
            .build()
            .map_err(|e| WorkerError::Protocol(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            account,
            config,
            base_url,
            ready,
            session: None,
            login_retries: 0,
            planet_table: HashMap::new(),
            proxy,
        })
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Generic authenticated request primitive. Session identifiers are
    /// attached to every endpoint except login itself.
    pub async fn call(&mut self, endpoint: &str, args: &[(String, String)]) -> ProtocolResponse {
        self.call_boxed(endpoint.to_string(), args.to_vec()).await
    }

    // Boxed so the expiry path can re-issue the original call after a
    // re-login without an infinitely-sized future.
    fn call_boxed(
        &mut self,
        endpoint: String,
        args: Vec<(String, String)>,
    ) -> Pin<Box<dyn Future<Output = ProtocolResponse> + Send + '_>> {
        Box::pin(async move {
            if !self.ready {
                error!("Protocol client not ready; refusing call");
                return ProtocolResponse::error("Protocol client not ready");
            }
            let Some(base_url) = self.base_url.clone() else {
                return ProtocolResponse::error(format!(
                    "Invalid server configuration: {}",
                    self.account.server
                ));
            };

            let is_login = endpoint.to_lowercase().contains("login");
            let mut full_url = format!("{base_url}{endpoint}");
            for (key, value) in &args {
                full_url.push_str(&format!("&{key}={value}"));
            }
            if !is_login {
                if let Some(session) = &self.session {
                    full_url.push_str(&format!(
                        "&sess_id={}&ppy_id={}",
                        session.sess_id, session.ppy_id
                    ));
                }
            }
            debug!(url = %full_url, "POST request");

            let request = self
                .http
                .post(&full_url)
                .header(CONTENT_TYPE, FORM_CONTENT_TYPE)
                .body(signing::sign_request(&full_url));

            let response = match request.send().await {
                Ok(r) => r,
                Err(e) if e.is_timeout() => {
                    error!("Request timed out");
                    return ProtocolResponse::error("Request timed out");
                }
                Err(e) => {
                    error!(error = %e, "Transport error");
                    return ProtocolResponse::error(format!("Transport error: {e}"));
                }
            };
            if let Err(e) = response.error_for_status_ref() {
                error!(error = %e, "HTTP error");
                return ProtocolResponse::error(format!("HTTP error: {e}"));
            }
            let data: Value = match response.json().await {
                Ok(d) => d,
                Err(e) => {
                    error!(error = %e, "JSON decode error");
                    return ProtocolResponse::error("Invalid JSON response");
                }
            };

            if data.get("status").and_then(|v| v.as_str()) != Some("error") {
                if !is_login {
                    // A successful authenticated call ends the expiry episode
                    self.login_retries = 0;
                }
                return ProtocolResponse::ok(data);
            }

            if data.get("err_code").and_then(|v| v.as_i64()) == Some(SESSION_EXPIRED_CODE) {
                if self.login_retries >= self.config.max_login_retries {
                    error!("Max login retries exceeded");
                    return ProtocolResponse::error("Max login retries exceeded");
                }
                warn!(
                    retries = self.login_retries,
                    "Session expired; attempting re-login"
                );
                self.login_retries += 1;
                let login_response = self.login().await;
                if login_response.is_ok() {
                    return self.call_boxed(endpoint, args).await;
                }
                return login_response;
            }

            let err_msg = data
                .get("err_msg")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            ProtocolResponse::error(err_msg)
        })
    }

    /// Authenticate against the server and store session identifiers
    pub async fn login(&mut self) -> ProtocolResponse {
        if !self.ready {
            error!("Protocol client not ready; refusing login");
            return ProtocolResponse::error("Protocol client not ready");
        }

        let endpoint = format!(
            "index.php?page=gamelogin&ver=0.1&tz=7&device_id=51dd0b0337f00c2e03c5bb110a56f818\
             &device_name=OPPO&username={}&password={}",
            self.account.username,
            signing::md5_hex(&self.account.password)
        );
        info!(username = %self.account.username, "Attempting login");

        let result = self.call_boxed(endpoint, Vec::new()).await;
        if !result.is_ok() {
            error!(error = %result.err_msg, "Login failed");
            return result;
        }

        let sess_id = scalar_to_string(result.data.get("ssid"));
        let ppy_id = scalar_to_string(result.data.get("ppy_id"));
        self.session = Some(SessionState { sess_id, ppy_id });
        info!("Login successful");
        result
    }

    /// Change the active planet with bounded exponential backoff, refreshing
    /// the planet-id table from the response on success.
    pub async fn change_planet(&mut self, planet_id: i64) -> ProtocolResponse {
        let endpoint = "game.php?page=buildings";
        let mut args = Vec::new();
        if planet_id != 0 {
            args.push(("cp".to_string(), planet_id.to_string()));
        }

        let mut delay = Duration::from_millis(self.config.change_planet_initial_delay_ms);
        for attempt in 1..=self.config.change_planet_attempts {
            info!(
                planet_id,
                attempt,
                attempts = self.config.change_planet_attempts,
                "Changing planet"
            );
            let result = self.call(endpoint, &args).await;
            if result.is_ok() {
                if let Some(data) = result.data.get("result").cloned() {
                    info!(planet_id, "Planet changed");
                    self.update_planet_table(&data);
                    return ProtocolResponse::ok(data);
                }
            }
            warn!(
                planet_id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %result.err_msg,
                "Planet change failed; backing off"
            );
            tokio::time::sleep(delay).await;
            delay = delay.saturating_mul(2);
        }

        let attempts = self.config.change_planet_attempts;
        error!(planet_id, attempts, "Planet change exhausted retries");
        ProtocolResponse::error(format!("Failed to change planet after {attempts} attempts"))
    }

    /// Rebuild the bidirectional planet table from a buildings response
    fn update_planet_table(&mut self, data: &Value) {
        let Some(planets) = data
            .pointer("/buildInfo/result/Planets")
            .and_then(|v| v.as_object())
        else {
            debug!("No planet data in response");
            return;
        };

        let mut table = HashMap::new();
        for (planet_id, planet) in planets {
            let position = format!(
                "{}:{}:{}:{}",
                scalar_to_i64(planet.get("galaxy")),
                scalar_to_i64(planet.get("system")),
                scalar_to_i64(planet.get("planet")),
                u8::from(scalar_to_i64(planet.get("planet_type")) == 3)
            );
            table.insert(position.clone(), planet_id.clone());
            table.insert(planet_id.clone(), position);
        }
        debug!(entries = table.len(), "Planet table updated");
        self.planet_table = table;
    }

    /// Stage a fleet for dispatch; returns the prepared arguments and the
    /// server token required by the send call.
    async fn prepare_fleet(
        &mut self,
        task: &Task,
    ) -> std::result::Result<(Vec<(String, String)>, String), ProtocolResponse> {
        let Some(mission) = MissionType::for_kind(task.task_type) else {
            let err_msg = format!("Unsupported task kind: {}", task.task_type);
            error!("{err_msg}");
            return Err(ProtocolResponse::error(err_msg));
        };

        let mut args: Vec<(String, String)> = vec![
            ("mission".to_string(), mission.code().to_string()),
            (
                "type".to_string(),
                task.task_type.code().unwrap_or_default().to_string(),
            ),
            ("galaxy".to_string(), task.target.galaxy.to_string()),
            ("system".to_string(), task.target.system.to_string()),
            ("planet".to_string(), task.target.planet.to_string()),
            ("speed".to_string(), "10".to_string()),
        ];
        args.extend(
            task.fleet
                .ship_args()
                .into_iter()
                .map(|(k, v)| (k.to_string(), v)),
        );

        let response = self.call("game.php?page=my_fleet1", &args).await;
        if !response.is_ok() {
            error!(error = %response.err_msg, "Fleet preparation failed");
            return Err(response);
        }
        match response.data.pointer("/result/token").and_then(|v| v.as_str()) {
            Some(token) => Ok((args, token.to_string())),
            None => {
                error!("Token not found in response");
                Err(ProtocolResponse::error("Token not found in response"))
            }
        }
    }

    /// Prepare and send one fleet; `extra` distinguishes mission flavors
    async fn send_fleet(&mut self, task: &Task, extra: &[(&str, &str)]) -> ProtocolResponse {
        let (mut args, token) = match self.prepare_fleet(task).await {
            Ok(prepared) => prepared,
            Err(response) => return response,
        };
        args.push(("token".to_string(), token));
        for (key, value) in extra {
            args.push((key.to_string(), value.to_string()));
        }

        let response = self.call("game.php?page=fleet3", &args).await;
        if !response.is_ok() {
            error!(error = %response.err_msg, "Fleet dispatch failed");
            return response;
        }
        let back_ts = response
            .data
            .pointer("/result/back_ts")
            .and_then(|v| v.as_i64())
            .unwrap_or(-1);
        ProtocolResponse::ok(json!({ "back_ts": back_ts }))
    }
}

fn scalar_to_string(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

fn scalar_to_i64(value: Option<&Value>) -> i64 {
    match value {
        Some(Value::Number(n)) => n.as_i64().unwrap_or(0),
        Some(Value::String(s)) => s.parse().unwrap_or(0),
        _ => 0,
    }
}

#[async_trait]
impl GameOps for ProtocolClient {
    async fn login(&mut self) -> ProtocolResponse {
        ProtocolClient::login(self).await
    }

    async fn change_planet(&mut self, planet_id: i64) -> ProtocolResponse {
        ProtocolClient::change_planet(self, planet_id).await
    }

    async fn attack_once(&mut self, task: &Task) -> ProtocolResponse {
        self.send_fleet(task, &[]).await
    }

    async fn explore_once(&mut self, task: &Task) -> ProtocolResponse {
        // Exploration fleets hold position briefly before returning
        self.send_fleet(task, &[("staytime", "1")]).await
    }

    async fn query_planets(&mut self, task: &Task) -> ProtocolResponse {
        // Refresh the table without switching planets, then resolve the target
        let refresh = ProtocolClient::change_planet(self, 0).await;
        if !refresh.is_ok() {
            return refresh;
        }
        let mut data = serde_json::Map::new();
        let key = task.target.position_key();
        if let Some(planet_id) = self.planet_table.get(&key) {
            data.insert("planet_id".to_string(), Value::String(planet_id.clone()));
        }
        data.insert("planets".to_string(), json!(self.planet_table));
        ProtocolResponse::ok(Value::Object(data))
    }

    async fn close(&mut self) {
        if let (Some(lease), Some(proxy_config)) = (self.proxy.take(), self.config.proxy.as_ref())
        {
            lease.release(proxy_config).await;
        }
    }
}

/// Builds one [`ProtocolClient`] per task
pub struct ProtocolClientFactory {
    config: ProtocolConfig,
}

impl ProtocolClientFactory {
    pub fn new(config: ProtocolConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ClientFactory for ProtocolClientFactory {
    async fn client_for(&self, account: &Account) -> Result<Box<dyn GameOps>> {
        let client = ProtocolClient::connect(account.clone(), self.config.clone()).await?;
        Ok(Box::new(client))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProxyConfig;
    use crate::models::{Fleet, Target, TaskKind};
    use std::time::Instant;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_account() -> Account {
        Account {
            username: "pilot".to_string(),
            password: "secret".to_string(),
            email: "pilot@example.com".to_string(),
            server: "test".to_string(),
        }
    }

    fn test_config(server_uri: &str) -> ProtocolConfig {
        let mut servers = HashMap::new();
        servers.insert("test".to_string(), format!("{server_uri}/"));
        ProtocolConfig {
            servers,
            timeout_ms: 1_000,
            max_login_retries: 3,
            change_planet_attempts: 3,
            change_planet_initial_delay_ms: 20,
            proxy: None,
        }
    }

    fn test_task(kind: TaskKind) -> Task {
        Task {
            task_id: 1,
            uuid: "u-1".to_string(),
            task_type: kind,
            account: test_account(),
            fleet: Fleet {
                lf: 10,
                ..Fleet::default()
            },
            repeat: 1,
            target: Target {
                galaxy: 1,
                system: 2,
                planet: 3,
                is_moon: false,
            },
            start_planet_id: 0,
        }
    }

    async fn connect(server: &MockServer) -> ProtocolClient {
        ProtocolClient::connect(test_account(), test_config(&server.uri()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_login_stores_session_and_attaches_it() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/index.php"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "ok", "ppy_id": 7, "ssid": "sess-1"
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/game.php"))
            .and(query_param("sess_id", "sess-1"))
            .and(query_param("ppy_id", "7"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "status": "ok", "result": {} })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let mut client = connect(&server).await;
        let login = client.login().await;
        assert!(login.is_ok(), "login failed: {}", login.err_msg);

        let call = client.call("game.php?page=overview", &[]).await;
        assert!(call.is_ok(), "call failed: {}", call.err_msg);
    }

    #[tokio::test]
    async fn test_session_expiry_bounded_by_retry_counter() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/game.php"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "error", "err_code": 111, "err_msg": "session expired"
            })))
            .mount(&server)
            .await;
        // Re-login always succeeds; the counter alone must stop the loop
        Mock::given(method("POST"))
            .and(path("/index.php"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "ok", "ppy_id": 7, "ssid": "sess-1"
            })))
            .expect(3)
            .mount(&server)
            .await;

        let mut client = connect(&server).await;
        let response = client.call("game.php?page=buildings", &[]).await;
        assert!(!response.is_ok());
        assert_eq!(response.err_msg, "Max login retries exceeded");
    }

    #[tokio::test]
    async fn test_domain_error_surfaces_verbatim_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/game.php"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "error", "err_code": 5, "err_msg": "not enough fuel"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut client = connect(&server).await;
        let response = client.call("game.php?page=fleet3", &[]).await;
        assert!(!response.is_ok());
        assert_eq!(response.err_msg, "not enough fuel");
    }

    #[tokio::test]
    async fn test_timeout_maps_to_distinct_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/game.php"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "status": "ok" }))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let mut config = test_config(&server.uri());
        config.timeout_ms = 100;
        let mut client = ProtocolClient::connect(test_account(), config).await.unwrap();
        let response = client.call("game.php?page=overview", &[]).await;
        assert!(!response.is_ok());
        assert_eq!(response.err_msg, "Request timed out");
    }

    #[tokio::test]
    async fn test_malformed_body_maps_to_distinct_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/game.php"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>not json</html>"))
            .mount(&server)
            .await;

        let mut client = connect(&server).await;
        let response = client.call("game.php?page=overview", &[]).await;
        assert!(!response.is_ok());
        assert_eq!(response.err_msg, "Invalid JSON response");
    }

    #[tokio::test]
    async fn test_change_planet_backoff_and_exhaustion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/game.php"))
            .and(query_param("page", "buildings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "error", "err_msg": "nope"
            })))
            .expect(3)
            .mount(&server)
            .await;

        let mut client = connect(&server).await;
        let started = Instant::now();
        let response = client.change_planet(42).await;
        assert!(!response.is_ok());
        assert_eq!(response.err_msg, "Failed to change planet after 3 attempts");
        // Backoff sleeps 20, 40, 80ms between/after the three attempts
        assert!(started.elapsed() >= Duration::from_millis(140));
    }

    #[tokio::test]
    async fn test_change_planet_updates_bidirectional_table() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/game.php"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "ok",
                "result": {
                    "buildInfo": { "result": { "Planets": {
                        "1234": { "galaxy": 1, "system": 2, "planet": 3, "planet_type": 1 },
                        "5678": { "galaxy": 4, "system": 5, "planet": 6, "planet_type": 3 }
                    }}}
                }
            })))
            .mount(&server)
            .await;

        let mut client = connect(&server).await;
        let response = client.change_planet(0).await;
        assert!(response.is_ok(), "change failed: {}", response.err_msg);
        assert_eq!(client.planet_table.get("1:2:3:0").unwrap(), "1234");
        assert_eq!(client.planet_table.get("5678").unwrap(), "4:5:6:1");
    }

    #[tokio::test]
    async fn test_attack_once_prepares_and_sends() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/game.php"))
            .and(query_param("page", "my_fleet1"))
            .and(query_param("mission", "1"))
            .and(query_param("ship204", "10"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "ok", "result": { "token": "tok-9" }
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/game.php"))
            .and(query_param("page", "fleet3"))
            .and(query_param("token", "tok-9"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "ok", "result": { "back_ts": 4200 }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut client = connect(&server).await;
        let response = client.attack_once(&test_task(TaskKind::Attack)).await;
        assert!(response.is_ok(), "attack failed: {}", response.err_msg);
        assert_eq!(response.data["back_ts"], 4200);
    }

    #[tokio::test]
    async fn test_proxy_lease_failure_disables_client() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/get/"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let mut config = test_config(&server.uri());
        config.proxy = Some(ProxyConfig {
            base_url: server.uri(),
            username: "user".to_string(),
            password: "password".to_string(),
        });
        let mut client = ProtocolClient::connect(test_account(), config).await.unwrap();
        assert!(!client.is_ready());

        let response = client.login().await;
        assert!(!response.is_ok());
        assert_eq!(response.err_msg, "Protocol client not ready");
    }

    #[tokio::test]
    async fn test_proxy_lease_success_keeps_client_ready() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/get/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "proxy": "http://127.0.0.1:1"
            })))
            .mount(&server)
            .await;

        let mut config = test_config(&server.uri());
        config.proxy = Some(ProxyConfig {
            base_url: server.uri(),
            username: "user".to_string(),
            password: "password".to_string(),
        });
        let client = ProtocolClient::connect(test_account(), config).await.unwrap();
        assert!(client.is_ready());
    }
}
