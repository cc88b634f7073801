//! Bringing services up in dependency order
//!
//! A [`School`] holds one provider per service key. Bringing a key up first
//! brings up each declared dependency, one at a time and in declared order,
//! then hands the resulting processes to the key's provider. Within one call
//! every key starts at most once, so shared dependencies (diamonds) resolve
//! to the same process for every dependent. Services that are already
//! healthy in the registry are reused rather than restarted.

mod error;

pub use error::SchoolError;

use crate::BoxError;
use crate::health::{ReadinessGate, TcpReadinessGate};
use crate::registry::{ProcessRecord, Registry};
use crate::service::{ServiceKey, ServiceName, Tier};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Starts the process for one service, given its running dependencies in
/// declared order.
pub trait Provider {
    fn provide(&self, key: &ServiceKey, deps: &[ProcessRecord]) -> Result<ProcessRecord, BoxError>;
}

impl<F> Provider for F
where
    F: Fn(&ServiceKey, &[ProcessRecord]) -> Result<ProcessRecord, BoxError>,
{
    fn provide(&self, key: &ServiceKey, deps: &[ProcessRecord]) -> Result<ProcessRecord, BoxError> {
        self(key, deps)
    }
}

struct ProviderSpec {
    deps: Vec<ServiceName>,
    provider: Box<dyn Provider>,
    /// Where the provider was declared, for diagnostics
    position: String,
}

type Healthy = HashMap<ServiceKey, ProcessRecord>;

pub struct School {
    registry: Registry,
    providers: HashMap<ServiceKey, ProviderSpec>,
    overrides: HashMap<ServiceName, Tier>,
    gate: Box<dyn ReadinessGate>,
}

impl School {
    pub fn new(registry: Registry) -> Self {
        Self {
            registry,
            providers: HashMap::new(),
            overrides: HashMap::new(),
            gate: Box::new(TcpReadinessGate::default()),
        }
    }

    /// Replace the readiness check run on every newly provided service.
    pub fn with_gate(mut self, gate: Box<dyn ReadinessGate>) -> Self {
        self.gate = gate;
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Resolve `name` against `tier` wherever it appears, at any depth.
    pub fn add_override(&mut self, name: ServiceName, tier: Tier) {
        self.overrides.insert(name, tier);
    }

    pub fn add_provider(
        &mut self,
        key: ServiceKey,
        deps: Vec<ServiceName>,
        provider: Box<dyn Provider>,
        position: impl Into<String>,
    ) -> Result<(), SchoolError> {
        let position = position.into();
        if let Some(existing) = self.providers.get(&key) {
            return Err(SchoolError::DuplicateProvider {
                name: key.name,
                tier: key.tier,
                first: existing.position.clone(),
                second: position,
            });
        }
        debug!(%key, ?deps, %position, "registered provider");
        self.providers.insert(
            key,
            ProviderSpec {
                deps,
                provider,
                position,
            },
        );
        Ok(())
    }

    /// Keys of every provider declared for `tier`, sorted.
    pub fn providers_for_tier(&self, tier: &Tier) -> Vec<ServiceKey> {
        let mut keys: Vec<ServiceKey> = self
            .providers
            .keys()
            .filter(|key| &key.tier == tier)
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// Bring up the service with the given key, including all its dependencies.
    pub fn up_by_key(&self, key: &ServiceKey) -> Result<ProcessRecord, SchoolError> {
        let mut healthy = self.registry.healthy_services()?;
        self.up(key.clone(), &mut healthy, &mut Vec::new())
    }

    /// Bring up every service declared for `tier`.
    pub fn up_by_tier(&self, tier: &Tier) -> Result<Vec<ProcessRecord>, SchoolError> {
        let keys = self.providers_for_tier(tier);
        if keys.is_empty() {
            return Err(SchoolError::NoProvidersForTier { tier: tier.clone() });
        }

        let mut healthy = self.registry.healthy_services()?;
        keys.into_iter()
            .map(|key| self.up(key, &mut healthy, &mut Vec::new()))
            .collect()
    }

    fn up(
        &self,
        mut key: ServiceKey,
        healthy: &mut Healthy,
        visiting: &mut Vec<ServiceKey>,
    ) -> Result<ProcessRecord, SchoolError> {
        if let Some(tier) = self.overrides.get(&key.name) {
            key.tier = tier.clone();
        }

        if let Some(running) = healthy.get(&key) {
            debug!(%key, pid = running.pid, "service already healthy");
            return Ok(running.clone());
        }

        if let Some(start) = visiting.iter().position(|k| k == &key) {
            let mut chain = visiting[start..].to_vec();
            chain.push(key);
            return Err(SchoolError::DependencyCycle { chain });
        }

        let spec = self
            .providers
            .get(&key)
            .ok_or_else(|| SchoolError::NoProviderFound {
                name: key.name.clone(),
                tier: key.tier.clone(),
            })?;

        visiting.push(key.clone());
        let mut inputs = Vec::with_capacity(spec.deps.len());
        for dep in &spec.deps {
            let dep_key = ServiceKey::from_parts(dep.clone(), key.tier.clone());
            let input = self.up(dep_key, healthy, visiting).map_err(|e| {
                SchoolError::DependencyFailed {
                    service: key.name.clone(),
                    dependency: dep.clone(),
                    source: Box::new(e),
                }
            })?;
            inputs.push(input);
        }
        visiting.pop();

        info!(%key, position = %spec.position, "starting service");
        let record = spec
            .provider
            .provide(&key, &inputs)
            .map_err(|source| SchoolError::Provider {
                key: key.clone(),
                source,
            })?;

        if record.is_exposed() {
            self.gate.wait_until_ready(&record)?;
        }

        let tagged = record.with_service_key(&key);
        self.registry.modify(tagged.clone())?;

        if tagged.is_exposed() {
            info!(%key, pid = tagged.pid, host = ?tagged.host(), "service ready");
        } else {
            warn!(%key, pid = tagged.pid, "provider returned a process without a host and port");
        }
        // Within one call a key starts once, exposed or not.
        healthy.insert(key, tagged.clone());
        Ok(tagged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::HealthError;
    use chrono::Utc;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;
    use tempfile::TempDir;

    struct AlwaysReady;

    impl ReadinessGate for AlwaysReady {
        fn wait_until_ready(&self, _record: &ProcessRecord) -> Result<(), HealthError> {
            Ok(())
        }
    }

    /// Shared state for fake providers: every call is logged along with the
    /// dependency pids it received.
    #[derive(Clone, Default)]
    struct Calls {
        log: Rc<RefCell<Vec<(ServiceKey, Vec<u32>)>>>,
        next_pid: Rc<Cell<u32>>,
    }

    impl Calls {
        fn count(&self, key: &ServiceKey) -> usize {
            self.log.borrow().iter().filter(|(k, _)| k == key).count()
        }

        fn deps_of(&self, key: &ServiceKey) -> Vec<u32> {
            self.log
                .borrow()
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, deps)| deps.clone())
                .unwrap_or_default()
        }

        fn keys(&self) -> Vec<ServiceKey> {
            self.log.borrow().iter().map(|(k, _)| k.clone()).collect()
        }
    }

    struct Harness {
        _temp_dir: TempDir,
        registry: Registry,
        school: School,
        calls: Calls,
    }

    impl Harness {
        fn new() -> Self {
            let temp_dir = TempDir::new().unwrap();
            let registry = Registry::open(temp_dir.path()).unwrap();
            let school = School::new(registry.clone()).with_gate(Box::new(AlwaysReady));
            let calls = Calls::default();
            calls.next_pid.set(3_000_000);
            Self {
                _temp_dir: temp_dir,
                registry,
                school,
                calls,
            }
        }

        /// Register a provider that pretends to start a server.
        fn add(&mut self, name: &str, tier: &str, deps: &[&str]) -> Result<(), SchoolError> {
            self.add_with(name, tier, deps, true)
        }

        /// Register a provider whose process never gets a host and port.
        fn add_unexposed(&mut self, name: &str, tier: &str, deps: &[&str]) -> Result<(), SchoolError> {
            self.add_with(name, tier, deps, false)
        }

        fn add_with(
            &mut self,
            name: &str,
            tier: &str,
            deps: &[&str],
            exposed: bool,
        ) -> Result<(), SchoolError> {
            let key = ServiceKey::new(name, tier).unwrap();
            let deps = deps.iter().map(|d| ServiceName::new(*d).unwrap()).collect();
            let registry = self.registry.clone();
            let calls = self.calls.clone();
            let provider = move |key: &ServiceKey,
                                 inputs: &[ProcessRecord]|
                  -> Result<ProcessRecord, BoxError> {
                let pid = calls.next_pid.get();
                calls.next_pid.set(pid + 1);
                calls
                    .log
                    .borrow_mut()
                    .push((key.clone(), inputs.iter().map(|r| r.pid).collect()));
                let mut record = ProcessRecord {
                    display_name: format!("serve {key}"),
                    pid,
                    start_time: Utc::now(),
                    ..Default::default()
                };
                if exposed {
                    record = record.with_exposed_host("localhost", (pid % 60_000) as u16 + 1);
                }
                registry.add(record.clone())?;
                Ok(record)
            };
            self.school.add_provider(
                key,
                deps,
                Box::new(provider),
                format!("Petsfile:{}:1", self.school.providers.len() + 1),
            )
        }
    }

    fn key(name: &str, tier: &str) -> ServiceKey {
        ServiceKey::new(name, tier).unwrap()
    }

    #[test]
    fn test_one_server() {
        let mut h = Harness::new();
        h.add("frontend", "local", &[]).unwrap();

        let record = h.school.up_by_key(&key("frontend", "local")).unwrap();
        assert_eq!(record.service_key(), key("frontend", "local"));
        assert!(record.is_exposed());

        let stored = h.registry.get(record.pid).unwrap().unwrap();
        assert_eq!(stored, record);
    }

    #[test]
    fn test_dependencies_start_first_in_declared_order() {
        let mut h = Harness::new();
        h.add("frontend", "local", &["backend", "db"]).unwrap();
        h.add("backend", "local", &[]).unwrap();
        h.add("db", "local", &[]).unwrap();

        h.school.up_by_key(&key("frontend", "local")).unwrap();
        assert_eq!(
            h.calls.keys(),
            vec![
                key("backend", "local"),
                key("db", "local"),
                key("frontend", "local")
            ]
        );
    }

    #[test]
    fn test_diamond_starts_shared_dependency_once() {
        let mut h = Harness::new();
        h.add("frontend", "local", &["backend1", "backend2"]).unwrap();
        h.add("backend1", "local", &["db"]).unwrap();
        h.add("backend2", "local", &["db"]).unwrap();
        h.add("db", "local", &[]).unwrap();

        h.school.up_by_key(&key("frontend", "local")).unwrap();

        assert_eq!(h.calls.count(&key("db", "local")), 1);
        let db_for_1 = h.calls.deps_of(&key("backend1", "local"));
        let db_for_2 = h.calls.deps_of(&key("backend2", "local"));
        assert_eq!(db_for_1.len(), 1);
        assert_eq!(db_for_1, db_for_2);
    }

    #[test]
    fn test_diamond_starts_unexposed_dependency_once() {
        let mut h = Harness::new();
        h.add("frontend", "local", &["backend1", "backend2"]).unwrap();
        h.add("backend1", "local", &["db"]).unwrap();
        h.add("backend2", "local", &["db"]).unwrap();
        h.add_unexposed("db", "local", &[]).unwrap();

        h.school.up_by_key(&key("frontend", "local")).unwrap();

        assert_eq!(h.calls.count(&key("db", "local")), 1);
        assert_eq!(
            h.calls.deps_of(&key("backend1", "local")),
            h.calls.deps_of(&key("backend2", "local"))
        );
    }

    #[test]
    fn test_unregistered_key_names_exactly_that_key() {
        let h = Harness::new();
        let err = h.school.up_by_key(&key("nope", "local")).unwrap_err();
        match err {
            SchoolError::NoProviderFound { name, tier } => {
                assert_eq!(name.as_str(), "nope");
                assert_eq!(tier.as_str(), "local");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_dependency_names_the_chain() {
        let mut h = Harness::new();
        h.add("frontend", "local", &["db"]).unwrap();

        let err = h.school.up_by_key(&key("frontend", "local")).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Service \"frontend\" depends on service \"db\", but \"db\" failed:\n\
             No provider found for service \"db\", tier \"local\""
        );
        assert!(matches!(
            err.root_cause(),
            SchoolError::NoProviderFound { .. }
        ));
        assert!(h.calls.keys().is_empty());
    }

    #[test]
    fn test_duplicate_provider_names_both_positions() {
        let mut h = Harness::new();
        h.school
            .add_provider(
                key("db", "local"),
                vec![],
                Box::new(|_: &ServiceKey, _: &[ProcessRecord]| -> Result<ProcessRecord, BoxError> {
                    Ok(ProcessRecord::default())
                }),
                "Petsfile:3:1",
            )
            .unwrap();
        let err = h
            .school
            .add_provider(
                key("db", "local"),
                vec![],
                Box::new(|_: &ServiceKey, _: &[ProcessRecord]| -> Result<ProcessRecord, BoxError> {
                    Ok(ProcessRecord::default())
                }),
                "lib/Petsfile:7:1",
            )
            .unwrap_err();

        let message = err.to_string();
        assert!(message.contains("Petsfile:3:1"), "{message}");
        assert!(message.contains("lib/Petsfile:7:1"), "{message}");
        assert!(matches!(err, SchoolError::DuplicateProvider { .. }));
    }

    #[test]
    fn test_override_changes_only_that_dependency() {
        let mut h = Harness::new();
        h.add("frontend", "local", &["backend", "db"]).unwrap();
        h.add("backend", "local", &[]).unwrap();
        h.add("backend", "k8s", &[]).unwrap();
        h.add("db", "local", &[]).unwrap();
        h.add("db", "k8s", &[]).unwrap();
        h.school
            .add_override(ServiceName::new("backend").unwrap(), Tier::new("k8s").unwrap());

        h.school.up_by_key(&key("frontend", "local")).unwrap();
        assert_eq!(
            h.calls.keys(),
            vec![
                key("backend", "k8s"),
                key("db", "local"),
                key("frontend", "local")
            ]
        );
    }

    #[test]
    fn test_override_applies_at_top_level() {
        let mut h = Harness::new();
        h.add("db", "local", &[]).unwrap();
        h.add("db", "k8s", &[]).unwrap();
        h.school
            .add_override(ServiceName::new("db").unwrap(), Tier::new("k8s").unwrap());

        let record = h.school.up_by_key(&key("db", "local")).unwrap();
        assert_eq!(record.service_key(), key("db", "k8s"));
    }

    #[test]
    fn test_already_healthy_service_is_not_restarted() {
        let mut h = Harness::new();
        h.add("frontend", "local", &["db"]).unwrap();
        h.add("db", "local", &[]).unwrap();

        let running_db = ProcessRecord {
            display_name: "postgres".to_string(),
            pid: std::process::id(),
            start_time: Utc::now(),
            ..Default::default()
        }
        .with_exposed_host("localhost", 5432)
        .with_service_key(&key("db", "local"));
        h.registry.add(running_db.clone()).unwrap();

        h.school.up_by_key(&key("frontend", "local")).unwrap();
        assert_eq!(h.calls.count(&key("db", "local")), 0);
        assert_eq!(
            h.calls.deps_of(&key("frontend", "local")),
            vec![running_db.pid]
        );
    }

    #[test]
    fn test_up_by_tier_brings_up_every_provider_in_order() {
        let mut h = Harness::new();
        h.add("b", "local", &["a"]).unwrap();
        h.add("a", "local", &[]).unwrap();
        h.add("c", "k8s", &[]).unwrap();

        let records = h.school.up_by_tier(&Tier::new("local").unwrap()).unwrap();
        let keys: Vec<ServiceKey> = records.iter().map(ProcessRecord::service_key).collect();
        assert_eq!(keys, vec![key("a", "local"), key("b", "local")]);
        // "a" was already up by the time "b" needed it.
        assert_eq!(h.calls.count(&key("a", "local")), 1);
        assert_eq!(h.calls.count(&key("c", "k8s")), 0);
    }

    #[test]
    fn test_up_by_tier_without_providers_fails() {
        let mut h = Harness::new();
        h.add("a", "local", &[]).unwrap();
        let err = h
            .school
            .up_by_tier(&Tier::new("staging").unwrap())
            .unwrap_err();
        assert!(matches!(err, SchoolError::NoProvidersForTier { .. }));
    }

    #[test]
    fn test_service_cycle_is_rejected() {
        let mut h = Harness::new();
        h.add("a", "local", &["b"]).unwrap();
        h.add("b", "local", &["a"]).unwrap();

        let err = h.school.up_by_key(&key("a", "local")).unwrap_err();
        match err.root_cause() {
            SchoolError::DependencyCycle { chain } => assert_eq!(
                chain,
                &vec![key("a", "local"), key("b", "local"), key("a", "local")]
            ),
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().contains("a-local -> b-local -> a-local"));
        assert!(h.calls.keys().is_empty());
    }

    #[test]
    fn test_provider_error_is_reported_with_key() {
        let mut h = Harness::new();
        h.school
            .add_provider(
                key("db", "local"),
                vec![],
                Box::new(|_: &ServiceKey, _: &[ProcessRecord]| -> Result<ProcessRecord, BoxError> {
                    Err("port already in use".into())
                }),
                "Petsfile:1:1",
            )
            .unwrap();

        let err = h.school.up_by_key(&key("db", "local")).unwrap_err();
        assert_eq!(err.to_string(), "Provider for db-local failed: port already in use");
    }

    #[test]
    fn test_unexposed_result_is_tagged_but_not_reused() {
        let mut h = Harness::new();
        let registry = h.registry.clone();
        let calls = h.calls.clone();
        h.school
            .add_provider(
                key("worker", "local"),
                vec![],
                Box::new(move |key: &ServiceKey, _: &[ProcessRecord]| -> Result<ProcessRecord, BoxError> {
                    calls.log.borrow_mut().push((key.clone(), Vec::new()));
                    let record = ProcessRecord::started(std::process::id(), "worker");
                    registry.add(record.clone())?;
                    Ok(record)
                }),
                "Petsfile:1:1",
            )
            .unwrap();

        let record = h.school.up_by_key(&key("worker", "local")).unwrap();
        assert_eq!(record.service_key(), key("worker", "local"));
        let stored = h.registry.get(record.pid).unwrap().unwrap();
        assert_eq!(stored.service_key(), key("worker", "local"));
        assert!(h.registry.healthy_services().unwrap().is_empty());
    }
}
