use serde::{Deserialize, Serialize};

/// Manager configuration file (YAML).
///
/// Example `config.yaml`:
/// ```yaml
/// listen-addr: 0.0.0.0:9090
/// data-dir: /var/lib/stratus/data
/// callback-url: http://manager.stratus.svc:9090
/// join-token: my-secret-token
/// leader-elect: true
/// workers: 4
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManagerConfigFile {
    #[serde(default, alias = "listen-addr")]
    pub listen_addr: Option<String>,
    #[serde(default, alias = "data-dir")]
    pub data_dir: Option<String>,
    /// Base URL brokers must POST callbacks to.
    #[serde(default, alias = "callback-url")]
    pub callback_url: Option<String>,
    /// Token brokers present when registering.
    #[serde(default, alias = "join-token")]
    pub join_token: Option<String>,
    #[serde(default, alias = "leader-elect")]
    pub leader_elect: Option<bool>,
    /// Periodic full resync interval, in seconds.
    #[serde(default, alias = "resync-secs")]
    pub resync_secs: Option<u64>,
    /// Reconcile worker concurrency per kind.
    #[serde(default)]
    pub workers: Option<usize>,
}

/// Broker configuration file (YAML).
///
/// Example `config.yaml`:
/// ```yaml
/// port: 8080
/// manager-url: http://manager.stratus.svc:9090
/// broker-name: broker-east
/// broker-namespace: default
/// private-key-path: /var/run/broker/private.key
/// join-token: my-secret-token
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrokerConfigFile {
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default, alias = "manager-url")]
    pub manager_url: Option<String>,
    /// Identity used for signature attribution.
    #[serde(default, alias = "broker-name")]
    pub broker_name: Option<String>,
    #[serde(default, alias = "broker-namespace")]
    pub broker_namespace: Option<String>,
    /// Filesystem location of the Ed25519 private key.
    #[serde(default, alias = "private-key-path")]
    pub private_key_path: Option<String>,
    #[serde(default, alias = "join-token")]
    pub join_token: Option<String>,
}

/// Load a YAML config file, returning the default if the file doesn't exist.
pub fn load_config_file<T: serde::de::DeserializeOwned + Default>(path: &str) -> anyhow::Result<T> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(T::default());
        }
        Err(e) => return Err(e.into()),
    };
    let config: T = serde_yaml::from_str(&content)?;
    Ok(config)
}
