//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! `APP_OIDC_AUTHORITY` and `APP_OIDC_CLIENT_ID` override the identity
//! provider coordinates served by `serve`; `APP_ORIGIN` overrides the
//! application origin the callback URL is derived from.

use oidc_session::FailurePolicy;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub oidc: OidcConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

/// Where the application lives
#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Origin the callback URL is derived from (`<origin>/callback`)
    #[serde(default = "default_origin")]
    pub origin: String,
    /// Base URL of the API serving `v1/config` and the fetched resources.
    /// Defaults to the origin.
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default)]
    pub post_logout_redirect_uri: Option<String>,
}

/// Identity provider coordinates published by `serve`
#[derive(Debug, Default, Deserialize)]
pub struct OidcConfig {
    #[serde(default)]
    pub authority: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

#[derive(Debug, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    /// File holding the signed-in user between invocations
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_renew_interval")]
    pub renew_interval_secs: u64,
    /// Renew when the access token expires within this window
    #[serde(default = "default_renew_threshold")]
    pub renew_threshold_secs: u64,
}

fn default_origin() -> String {
    "http://localhost:8080/".into()
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_store_path() -> PathBuf {
    PathBuf::from("oidc-session.json")
}

fn default_timeout() -> u64 {
    30
}

fn default_renew_interval() -> u64 {
    60
}

fn default_renew_threshold() -> u64 {
    300
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            origin: default_origin(),
            api_url: None,
            post_logout_redirect_uri: None,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            failure_policy: FailurePolicy::default(),
            store_path: default_store_path(),
            timeout_secs: default_timeout(),
            renew_interval_secs: default_renew_interval(),
            renew_threshold_secs: default_renew_threshold(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if let Ok(authority) = std::env::var("APP_OIDC_AUTHORITY") {
            config.oidc.authority = Some(authority);
        }
        if let Ok(client_id) = std::env::var("APP_OIDC_CLIENT_ID") {
            config.oidc.client_id = Some(client_id);
        }
        if let Ok(origin) = std::env::var("APP_ORIGIN") {
            config.app.origin = origin;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        require_http_url("origin", &self.app.origin)?;
        if let Some(api_url) = &self.app.api_url {
            require_http_url("api_url", api_url)?;
        }
        if let Some(uri) = &self.app.post_logout_redirect_uri {
            require_http_url("post_logout_redirect_uri", uri)?;
        }
        if let Some(authority) = &self.oidc.authority {
            require_http_url("authority", authority)?;
        }

        for (name, value) in [
            ("timeout_secs", self.session.timeout_secs),
            ("renew_interval_secs", self.session.renew_interval_secs),
        ] {
            if value == 0 {
                return Err(common::Error::Config(format!(
                    "{name} must be greater than 0"
                )));
            }
        }

        Ok(())
    }

    /// Base URL requests are resolved against.
    pub fn api_url(&self) -> &str {
        self.app.api_url.as_deref().unwrap_or(&self.app.origin)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.session.timeout_secs)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("oidc-session.toml")
    }
}

fn require_http_url(name: &str, value: &str) -> common::Result<()> {
    if value.starts_with("http://") || value.starts_with("https://") {
        Ok(())
    } else {
        Err(common::Error::Config(format!(
            "{name} must start with http:// or https://, got: {value}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Every variable the loader reads; each test starts with all of them unset.
    const OVERRIDE_VARS: [&str; 4] = [
        "APP_OIDC_AUTHORITY",
        "APP_OIDC_CLIENT_ID",
        "APP_ORIGIN",
        "CONFIG_PATH",
    ];

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    /// Run `f` with exactly `vars` set among the override variables, then
    /// unset them again. The process environment is shared across test
    /// threads, so the whole run happens under `ENV_LOCK`.
    fn with_env<T>(vars: &[(&str, &str)], f: impl FnOnce() -> T) -> T {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        // SAFETY: env mutation only happens while ENV_LOCK is held
        unsafe {
            for key in OVERRIDE_VARS {
                std::env::remove_var(key);
            }
            for (key, value) in vars {
                std::env::set_var(key, value);
            }
        }
        let out = f();
        unsafe {
            for key in OVERRIDE_VARS {
                std::env::remove_var(key);
            }
        }
        out
    }

    fn write_config(dir: &tempfile::TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("oidc-session.toml");
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn load_str(contents: &str, vars: &[(&str, &str)]) -> common::Result<Config> {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, contents);
        with_env(vars, || Config::load(&path))
    }

    const FULL: &str = r#"
[app]
origin = "https://app.example/"
api_url = "https://api.example/"

[oidc]
authority = "https://idp.example"
client_id = "abc"

[server]
listen_addr = "127.0.0.1:9090"

[session]
failure_policy = "retry"
store_path = "/tmp/session.json"
"#;

    #[test]
    fn full_file_is_read() {
        let config = load_str(FULL, &[]).unwrap();
        assert_eq!(config.app.origin, "https://app.example/");
        assert_eq!(config.api_url(), "https://api.example/");
        assert_eq!(config.oidc.authority.as_deref(), Some("https://idp.example"));
        assert_eq!(config.oidc.client_id.as_deref(), Some("abc"));
        assert_eq!(config.server.listen_addr.port(), 9090);
        assert_eq!(config.session.failure_policy, FailurePolicy::Retry);
        assert_eq!(config.session.timeout_secs, 30);
        assert_eq!(config.session.renew_threshold_secs, 300);
    }

    #[test]
    fn empty_file_falls_back_to_defaults() {
        let config = load_str("", &[]).unwrap();
        assert_eq!(config.app.origin, "http://localhost:8080/");
        assert_eq!(config.api_url(), "http://localhost:8080/");
        assert_eq!(config.session.failure_policy, FailurePolicy::Memoize);
        assert!(config.oidc.authority.is_none());
        assert_eq!(config.session.store_path, PathBuf::from("oidc-session.json"));
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(Config::load(Path::new("/nonexistent/oidc-session.toml")).is_err());
    }

    #[test]
    fn malformed_toml_is_an_error() {
        assert!(load_str("not valid {{{{ toml", &[]).is_err());
    }

    #[test]
    fn app_variables_override_file_values() {
        let config = load_str(
            FULL,
            &[
                ("APP_OIDC_AUTHORITY", "https://other-idp.example"),
                ("APP_OIDC_CLIENT_ID", "from-env"),
                ("APP_ORIGIN", "https://host.example/lists/"),
            ],
        )
        .unwrap();

        assert_eq!(
            config.oidc.authority.as_deref(),
            Some("https://other-idp.example")
        );
        assert_eq!(config.oidc.client_id.as_deref(), Some("from-env"));
        assert_eq!(config.app.origin, "https://host.example/lists/");
    }

    #[test]
    fn invalid_values_are_rejected() {
        let cases: &[(&str, &[(&str, &str)])] = &[
            ("[session]\nfailure_policy = \"sometimes\"\n", &[]),
            ("[session]\ntimeout_secs = 0\n", &[]),
            ("[session]\nrenew_interval_secs = 0\n", &[]),
            ("[app]\norigin = \"app.example\"\n", &[]),
            ("", &[("APP_OIDC_AUTHORITY", "idp.example")]),
        ];
        for (contents, vars) in cases {
            assert!(
                load_str(contents, vars).is_err(),
                "accepted {contents:?} with {vars:?}"
            );
        }
    }

    #[test]
    fn origin_error_names_the_problem() {
        let err = load_str("[app]\norigin = \"app.example\"\n", &[])
            .unwrap_err()
            .to_string();
        assert!(err.contains("origin must start with http"), "got: {err}");
    }

    #[test]
    fn config_path_precedence() {
        let cases: &[(Option<&str>, &[(&str, &str)], &str)] = &[
            (None, &[], "oidc-session.toml"),
            (None, &[("CONFIG_PATH", "/etc/oidc/session.toml")], "/etc/oidc/session.toml"),
            (Some("./local.toml"), &[], "./local.toml"),
            (
                Some("./local.toml"),
                &[("CONFIG_PATH", "/etc/oidc/session.toml")],
                "./local.toml",
            ),
        ];
        for (flag, vars, expected) in cases {
            let resolved = with_env(vars, || Config::resolve_path(*flag));
            assert_eq!(resolved, PathBuf::from(expected), "flag={flag:?} env={vars:?}");
        }
    }
}
