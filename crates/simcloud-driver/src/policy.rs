//! Quota policy store and hot reload
//!
//! The quota table lives in a JSON file operators may edit while the driver
//! runs:
//!
//! ```json
//! {
//!   "Quotas": [
//!     { "MachineType": "m5.large", "Region": "eu-west-1", "Amount": 5 }
//!   ]
//! }
//! ```
//!
//! On first start the file is derived from the configured MachineClasses.
//! Afterwards [`PolicyWatcher`] polls its modification time and swaps a newly
//! parsed table into the driver state. A file that fails to parse never
//! replaces the live policy.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Deserializer, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use simcloud_common::{Error, MachineClass};

use crate::client::ClusterStateClient;
use crate::state::SharedState;

/// Default location of the policy file
pub const DEFAULT_POLICY_PATH: &str = "gen/simulation-config.json";

/// Amount given to each quota derived from a MachineClass
pub const DEFAULT_QUOTA_AMOUNT: u32 = 5;

/// Default interval between modification-time checks
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Maximum number of nodes allowed for one (machine type, region) pair
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct Quota {
    /// Instance type the quota applies to
    #[serde(alias = "machineType")]
    pub machine_type: String,
    /// Region the quota applies to
    #[serde(alias = "region")]
    pub region: String,
    /// Maximum node count; zero or negative rejects every request
    #[serde(alias = "amount")]
    pub amount: i64,
}

impl Quota {
    /// Create a quota
    pub fn new(machine_type: impl Into<String>, region: impl Into<String>, amount: i64) -> Self {
        Self {
            machine_type: machine_type.into(),
            region: region.into(),
            amount,
        }
    }

    /// Whether the quota covers the given region and machine type
    pub fn matches(&self, region: &str, machine_type: &str) -> bool {
        self.region == region && self.machine_type == machine_type
    }
}

impl fmt::Display for Quota {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(Region:{}, MachineType:{}, Amount:{})",
            self.region, self.machine_type, self.amount
        )
    }
}

/// The serialized quota table
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyConfig {
    /// Quotas in file order; order matters for duplicate entries
    #[serde(default, alias = "quotas", deserialize_with = "null_as_empty")]
    pub quotas: Vec<Quota>,
}

impl PolicyConfig {
    /// Create a policy from a list of quotas
    pub fn new(quotas: Vec<Quota>) -> Self {
        Self { quotas }
    }

    /// Derive one quota per MachineClass, ordered by class name
    pub fn derive_from_classes(classes: &[MachineClass], amount: u32) -> Self {
        let mut sorted: Vec<&MachineClass> = classes.iter().collect();
        sorted.sort_by(|a, b| a.name().cmp(b.name()));

        let quotas = sorted
            .into_iter()
            .filter(|c| c.node_template.is_some())
            .map(|c| Quota::new(c.instance_type(), c.region(), i64::from(amount)))
            .collect();
        Self { quotas }
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<Quota>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<Quota>>::deserialize(deserializer)?.unwrap_or_default())
}

/// File-backed storage for the policy
#[derive(Clone, Debug)]
pub struct PolicyStore {
    path: PathBuf,
}

impl PolicyStore {
    /// Create a store for the given file path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the policy file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a regular file exists at the path
    pub async fn exists(&self) -> bool {
        tokio::fs::metadata(&self.path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    /// Modification time of the policy file
    pub async fn modified(&self) -> Result<SystemTime, Error> {
        let metadata = tokio::fs::metadata(&self.path)
            .await
            .map_err(|e| self.error(format!("cannot stat: {}", e)))?;
        metadata
            .modified()
            .map_err(|e| self.error(format!("cannot read modification time: {}", e)))
    }

    /// Read and parse the file, returning the policy with the mtime it was read at
    ///
    /// The mtime is taken before the contents so a write racing the read is
    /// picked up again on the next poll.
    pub async fn load(&self) -> Result<(PolicyConfig, SystemTime), Error> {
        let modified = self.modified().await?;
        let data = tokio::fs::read(&self.path)
            .await
            .map_err(|e| self.error(format!("cannot read: {}", e)))?;
        let policy: PolicyConfig = serde_json::from_slice(&data)
            .map_err(|e| self.error(format!("cannot parse: {}", e)))?;
        Ok((policy, modified))
    }

    /// Write the policy as pretty-printed JSON, returning the new mtime
    ///
    /// Writes to a sibling temp file and renames it into place so readers
    /// never observe a partial document.
    pub async fn persist(&self, policy: &PolicyConfig) -> Result<SystemTime, Error> {
        let data = serde_json::to_vec_pretty(policy)
            .map_err(|e| self.error(format!("cannot serialize: {}", e)))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.error(format!("cannot create directory: {}", e)))?;
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, &data)
            .await
            .map_err(|e| self.error(format!("cannot write: {}", e)))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| self.error(format!("cannot rename into place: {}", e)))?;

        self.modified().await
    }

    /// Load the policy, or derive and persist it from the MachineClasses
    ///
    /// Derivation only happens when no file exists yet; an existing file that
    /// fails to parse is an error rather than silently overwritten.
    pub async fn initialize(
        &self,
        client: &dyn ClusterStateClient,
        namespace: &str,
        default_amount: u32,
    ) -> Result<(PolicyConfig, SystemTime), Error> {
        if self.exists().await {
            info!(path = %self.path.display(), "Policy file exists, loading");
            return self.load().await;
        }

        let classes = client.list_machine_classes(namespace).await?;
        let policy = PolicyConfig::derive_from_classes(&classes, default_amount);
        let modified = self.persist(&policy).await?;

        info!(
            path = %self.path.display(),
            namespace = %namespace,
            quotas = policy.quotas.len(),
            "Derived policy from machine classes"
        );
        Ok((policy, modified))
    }

    fn error(&self, msg: String) -> Error {
        Error::policy(self.path.display().to_string(), msg)
    }
}

/// Background task that hot-reloads the policy file
pub struct PolicyWatcher {
    store: PolicyStore,
    state: SharedState,
    interval: Duration,
}

impl PolicyWatcher {
    pub(crate) fn new(store: PolicyStore, state: SharedState, interval: Duration) -> Self {
        Self {
            store,
            state,
            interval,
        }
    }

    /// Check the file once, reloading it if it changed since the last load
    ///
    /// Returns whether a new policy was swapped in. On a parse failure the
    /// live policy and the last-loaded marker stay as they were, so the next
    /// poll tries again.
    pub async fn poll_once(&self) -> Result<bool, Error> {
        let modified = self.store.modified().await?;
        let loaded_at = self.state.lock().await.policy_loaded_at;
        if loaded_at.is_some_and(|t| modified <= t) {
            return Ok(false);
        }

        let (policy, modified) = self.store.load().await?;

        let mut state = self.state.lock().await;
        state.policy = policy;
        state.policy_loaded_at = Some(modified);
        info!(
            path = %self.store.path().display(),
            quotas = state.policy.quotas.len(),
            "Policy reloaded"
        );
        Ok(true)
    }

    /// Poll until cancelled
    pub async fn run(self, cancel: CancellationToken) {
        debug!(
            path = %self.store.path().display(),
            interval_secs = self.interval.as_secs(),
            "Policy watcher started"
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; the policy was just loaded
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Policy watcher stopped");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        warn!(error = %e, "Policy reload failed, keeping previous policy");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockClusterStateClient;
    use crate::state::DriverState;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use simcloud_common::NodeTemplate;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    fn class(name: &str, machine_type: &str, region: &str) -> MachineClass {
        MachineClass {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            provider: "AWS".to_string(),
            provider_spec: None,
            node_template: Some(NodeTemplate {
                instance_type: machine_type.to_string(),
                region: region.to_string(),
                ..Default::default()
            }),
        }
    }

    fn shared(policy: PolicyConfig, loaded_at: Option<SystemTime>) -> SharedState {
        Arc::new(Mutex::new(DriverState {
            policy,
            policy_loaded_at: loaded_at,
            ..Default::default()
        }))
    }

    #[test]
    fn file_format_uses_pascal_case_keys() {
        let policy = PolicyConfig::new(vec![Quota::new("m5.large", "eu-west-1", 3)]);
        let json = serde_json::to_value(&policy).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "Quotas": [{"MachineType": "m5.large", "Region": "eu-west-1", "Amount": 3}]
            })
        );
    }

    #[test]
    fn null_or_missing_quotas_parse_as_empty() {
        let policy: PolicyConfig = serde_json::from_str(r#"{"Quotas": null}"#).unwrap();
        assert!(policy.quotas.is_empty());
        let policy: PolicyConfig = serde_json::from_str("{}").unwrap();
        assert!(policy.quotas.is_empty());
    }

    #[test]
    fn derived_quotas_follow_class_name_order() {
        let classes = vec![
            class("zeta", "m5.xlarge", "us-east-1"),
            class("alpha", "m5.large", "eu-west-1"),
            MachineClass {
                metadata: ObjectMeta {
                    name: Some("no-template".to_string()),
                    ..Default::default()
                },
                ..Default::default()
            },
        ];

        let policy = PolicyConfig::derive_from_classes(&classes, DEFAULT_QUOTA_AMOUNT);
        assert_eq!(
            policy.quotas,
            vec![
                Quota::new("m5.large", "eu-west-1", 5),
                Quota::new("m5.xlarge", "us-east-1", 5),
            ]
        );
    }

    #[test]
    fn quota_display_names_all_fields() {
        assert_eq!(
            Quota::new("m5.large", "eu-west-1", 1).to_string(),
            "(Region:eu-west-1, MachineType:m5.large, Amount:1)"
        );
    }

    #[tokio::test]
    async fn persist_then_load_returns_same_policy() {
        let dir = tempfile::tempdir().unwrap();
        let store = PolicyStore::new(dir.path().join("gen").join("simulation-config.json"));
        let policy = PolicyConfig::new(vec![Quota::new("m5.large", "eu-west-1", 2)]);

        let written_at = store.persist(&policy).await.unwrap();
        let (loaded, loaded_at) = store.load().await.unwrap();

        assert_eq!(loaded, policy);
        assert_eq!(loaded_at, written_at);
    }

    #[tokio::test]
    async fn initialize_derives_and_persists_when_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = PolicyStore::new(dir.path().join("simulation-config.json"));

        let mut mock = MockClusterStateClient::new();
        mock.expect_list_machine_classes()
            .withf(|ns| ns == "shoot--dev")
            .times(1)
            .returning(|_| Ok(vec![class("worker-a", "m5.large", "eu-west-1")]));

        let (policy, _) = store.initialize(&mock, "shoot--dev", 7).await.unwrap();
        assert_eq!(policy.quotas, vec![Quota::new("m5.large", "eu-west-1", 7)]);

        let (on_disk, _) = store.load().await.unwrap();
        assert_eq!(on_disk, policy);
    }

    #[tokio::test]
    async fn initialize_loads_existing_file_without_listing_classes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("simulation-config.json");
        std::fs::write(
            &path,
            r#"{"Quotas":[{"MachineType":"c5.large","Region":"us-west-2","Amount":9}]}"#,
        )
        .unwrap();
        let store = PolicyStore::new(&path);

        let mut mock = MockClusterStateClient::new();
        mock.expect_list_machine_classes().never();

        let (policy, _) = store.initialize(&mock, "ns", 5).await.unwrap();
        assert_eq!(policy.quotas, vec![Quota::new("c5.large", "us-west-2", 9)]);
    }

    #[tokio::test]
    async fn initialize_refuses_to_overwrite_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("simulation-config.json");
        std::fs::write(&path, "{ not json").unwrap();
        let store = PolicyStore::new(&path);

        let mut mock = MockClusterStateClient::new();
        mock.expect_list_machine_classes().never();

        let err = store.initialize(&mock, "ns", 5).await.unwrap_err();
        assert!(matches!(err, Error::Policy { .. }));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{ not json");
    }

    #[tokio::test]
    async fn poll_reloads_newer_valid_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = PolicyStore::new(dir.path().join("simulation-config.json"));
        store
            .persist(&PolicyConfig::new(vec![Quota::new("m5.large", "eu-west-1", 1)]))
            .await
            .unwrap();

        // Marker older than the file: the next poll must pick it up
        let state = shared(PolicyConfig::default(), Some(SystemTime::UNIX_EPOCH));
        let watcher = PolicyWatcher::new(store.clone(), state.clone(), DEFAULT_POLL_INTERVAL);

        assert!(watcher.poll_once().await.unwrap());
        assert_eq!(
            state.lock().await.policy.quotas,
            vec![Quota::new("m5.large", "eu-west-1", 1)]
        );

        // Nothing changed since: no reload
        assert!(!watcher.poll_once().await.unwrap());
    }

    #[tokio::test]
    async fn poll_keeps_previous_policy_on_parse_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("simulation-config.json");
        std::fs::write(&path, r#"{"Quotas": [{"MachineType": "m5.large""#).unwrap();

        let previous = PolicyConfig::new(vec![Quota::new("m5.large", "eu-west-1", 4)]);
        let state = shared(previous.clone(), Some(SystemTime::UNIX_EPOCH));
        let watcher = PolicyWatcher::new(PolicyStore::new(&path), state.clone(), DEFAULT_POLL_INTERVAL);

        let err = watcher.poll_once().await.unwrap_err();
        assert!(matches!(err, Error::Policy { .. }));

        let guard = state.lock().await;
        assert_eq!(guard.policy, previous);
        assert_eq!(guard.policy_loaded_at, Some(SystemTime::UNIX_EPOCH));
    }

    #[tokio::test]
    async fn poll_accepts_negative_amounts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("simulation-config.json");
        std::fs::write(
            &path,
            r#"{"Quotas":[{"MachineType":"m5.large","Region":"eu-west-1","Amount":-1}]}"#,
        )
        .unwrap();

        let state = shared(PolicyConfig::default(), Some(SystemTime::UNIX_EPOCH));
        let watcher = PolicyWatcher::new(PolicyStore::new(&path), state.clone(), DEFAULT_POLL_INTERVAL);

        assert!(watcher.poll_once().await.unwrap());
        assert_eq!(
            state.lock().await.policy.quotas,
            vec![Quota::new("m5.large", "eu-west-1", -1)]
        );
    }

    #[tokio::test]
    async fn poll_skips_file_not_newer_than_marker() {
        let dir = tempfile::tempdir().unwrap();
        let store = PolicyStore::new(dir.path().join("simulation-config.json"));
        let written_at = store
            .persist(&PolicyConfig::new(vec![Quota::new("m5.large", "eu-west-1", 1)]))
            .await
            .unwrap();

        let state = shared(PolicyConfig::default(), Some(written_at));
        let watcher = PolicyWatcher::new(store, state.clone(), DEFAULT_POLL_INTERVAL);

        assert!(!watcher.poll_once().await.unwrap());
        assert!(state.lock().await.policy.quotas.is_empty());
    }

    #[tokio::test]
    async fn watcher_stops_on_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let store = PolicyStore::new(dir.path().join("simulation-config.json"));
        let state = shared(PolicyConfig::default(), None);
        let watcher = PolicyWatcher::new(store, state, Duration::from_millis(10));

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(watcher.run(cancel.clone()));
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("watcher should stop after cancellation")
            .unwrap();
    }
}
