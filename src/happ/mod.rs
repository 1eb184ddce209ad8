//! hApp instance lifecycle
//!
//! A [`Happ`] manages the live instances of one installed hApp: the original
//! instance per role and any clone instances created at runtime. Roles are
//! declared as explicit [`RoleDef`] records carrying a factory closure, so
//! instance construction is plain data flow.
//!
//! Clone creation is two-phase: the conductor creates the cell first, then
//! the local registry records it. A crash between the phases leaves a clone
//! on the conductor that the registry does not know about; re-fetching the
//! role's cells is the recovery path.

use dashmap::DashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::cell::{ClonedCell, DnaModifiers};
use crate::error::{ProxyError, Result};
use crate::hcl::{destructure_clone_id, Hcl};
use crate::proxy::{AppProxy, CallLogRow, CellProxy};
use crate::signal::AppSignal;
use crate::transport::CreateCloneCellRequest;

/// A live view over one cell, built by a role's factory.
pub trait CellInstance: Send + Sync {
    fn hcl(&self) -> &Hcl;

    /// Called for every signal emitted by this instance's cell.
    fn on_signal(&self, _signal: &AppSignal) {}
}

/// Factory building an instance from its cell proxy and locator.
pub type InstanceFactory = Arc<dyn Fn(Arc<CellProxy>, Hcl) -> Arc<dyn CellInstance> + Send + Sync>;

/// Declaration of one role of a hApp.
#[derive(Clone)]
pub struct RoleDef {
    pub default_role_name: String,
    pub clonable: bool,
    pub factory: InstanceFactory,
}

/// Optional overrides for clone creation.
#[derive(Default, Clone)]
pub struct CloneOverrides {
    pub modifiers: Option<DnaModifiers>,
    pub membrane_proof: Option<Vec<u8>>,
    pub name: Option<String>,
}

/// Live instances of one installed hApp.
pub struct Happ {
    app_id: String,
    registry: Arc<AppProxy>,
    /// locator string → instance
    instances: DashMap<String, Arc<dyn CellInstance>>,
    /// base role name → definition
    defs: DashMap<String, RoleDef>,
}

impl Happ {
    pub fn new(app_id: impl Into<String>, registry: Arc<AppProxy>) -> Self {
        Self {
            app_id: app_id.into(),
            registry,
            instances: DashMap::new(),
            defs: DashMap::new(),
        }
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn registry(&self) -> &Arc<AppProxy> {
        &self.registry
    }

    /// Create the original instance for a role. The role name defaults to
    /// the definition's but can be overridden at install time.
    pub async fn create_original(
        &self,
        def: RoleDef,
        role_override: Option<&str>,
    ) -> Result<Arc<dyn CellInstance>> {
        let role = role_override.unwrap_or(&def.default_role_name).to_string();
        if self.defs.contains_key(&role) {
            return Err(ProxyError::DuplicateOriginal(role));
        }

        self.registry.fetch_cells(&self.app_id, &role).await?;
        let hcl = Hcl::new(self.app_id.clone(), &role);
        let proxy = self.registry.create_cell_proxy(&hcl, None)?;
        let instance = self.instantiate(&def, proxy, hcl);

        info!(app = %self.app_id, role = %role, "Original instance created");
        self.defs.insert(role, def);
        Ok(instance)
    }

    /// Instantiate clones that already existed on the conductor when their
    /// role was fetched. Call after the originals are in place.
    pub fn create_starting_clones(&self) -> Result<Vec<Arc<dyn CellInstance>>> {
        let mut created = Vec::new();
        let roles: Vec<(String, RoleDef)> = self
            .defs
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        for (role, def) in roles {
            for cloned in self.registry.get_clones(&self.app_id, &role) {
                let Some((_, index)) = destructure_clone_id(&cloned.clone_id) else {
                    warn!(clone_id = %cloned.clone_id, "Unparseable clone id, skipping");
                    continue;
                };
                let hcl = Hcl::with_clone(self.app_id.clone(), role.clone(), index);
                if self.instances.contains_key(&hcl.to_string()) {
                    continue;
                }
                created.push(self.attach_clone(&def, &hcl, &cloned)?);
            }
        }
        Ok(created)
    }

    /// Create a new clone of a role.
    ///
    /// Fails before contacting the conductor when the role has no original
    /// instance or is not clonable. The new clone's index is the current
    /// clone count; its network seed defaults to that index.
    pub async fn create_clone(
        &self,
        role: &str,
        overrides: CloneOverrides,
    ) -> Result<(u32, Arc<dyn CellInstance>)> {
        let def = {
            let entry = self
                .defs
                .get(role)
                .ok_or_else(|| ProxyError::NoOriginal(role.to_string()))?;
            entry.value().clone()
        };
        if !def.clonable {
            return Err(ProxyError::RoleNotClonable(role.to_string()));
        }

        let index = self.registry.get_clones(&self.app_id, role).len() as u32;
        let modifiers = overrides.modifiers.unwrap_or_else(|| DnaModifiers {
            network_seed: index.to_string(),
            properties: None,
        });

        let cloned = self
            .registry
            .create_clone_cell(CreateCloneCellRequest {
                app_id: self.app_id.clone(),
                role_name: role.to_string(),
                modifiers,
                membrane_proof: overrides.membrane_proof,
                name: overrides.name,
            })
            .await?;

        let hcl = Hcl::with_clone(self.app_id.clone(), role, index);
        self.registry.add_clone(&hcl, &cloned)?;
        let instance = self.attach_clone(&def, &hcl, &cloned)?;

        info!(
            app = %self.app_id,
            role = role,
            clone_id = %cloned.clone_id,
            "Clone instance created"
        );
        Ok((index, instance))
    }

    /// Instances of a role's clones, ordered by clone index. Descriptors
    /// without a constructed instance are skipped with a warning.
    pub fn clones(&self, role: &str) -> Vec<Arc<dyn CellInstance>> {
        let mut out = Vec::new();
        for cloned in self.registry.get_clones(&self.app_id, role) {
            let Some((_, index)) = destructure_clone_id(&cloned.clone_id) else {
                continue;
            };
            let hcl = Hcl::with_clone(self.app_id.clone(), role, index);
            match self.instances.get(&hcl.to_string()) {
                Some(instance) => out.push(instance.clone()),
                None => {
                    warn!(clone_id = %cloned.clone_id, "Clone descriptor without an instance");
                }
            }
        }
        out
    }

    /// Look up an instance by role string, combined `"<base>.<index>"`
    /// included. Absence is a normal outcome.
    pub fn get_instance(&self, role: &str) -> Option<Arc<dyn CellInstance>> {
        let hcl = Hcl::new(self.app_id.clone(), role);
        self.instances.get(&hcl.to_string()).map(|i| i.clone())
    }

    /// Dump call logs of every instance, or of one role's instances.
    pub fn dump_call_logs(&self, role: Option<&str>) -> Vec<CallLogRow> {
        let mut rows = Vec::new();
        for entry in self.instances.iter() {
            let hcl = entry.value().hcl();
            if let Some(role) = role {
                if hcl.base_role_name != role {
                    continue;
                }
            }
            if let Ok(proxy) = self.registry.cell_proxy(hcl) {
                rows.extend(proxy.dump_call_logs(None));
            }
        }
        rows
    }

    fn attach_clone(
        &self,
        def: &RoleDef,
        hcl: &Hcl,
        cloned: &ClonedCell,
    ) -> Result<Arc<dyn CellInstance>> {
        let proxy = self.registry.create_cell_proxy(hcl, Some(&cloned.name))?;
        Ok(self.instantiate(def, proxy, hcl.clone()))
    }

    fn instantiate(
        &self,
        def: &RoleDef,
        proxy: Arc<CellProxy>,
        hcl: Hcl,
    ) -> Arc<dyn CellInstance> {
        let instance = (def.factory)(proxy, hcl.clone());
        let for_signals = instance.clone();
        self.registry.add_signal_handler(
            Arc::new(move |signal: &AppSignal| for_signals.on_signal(signal)),
            Some(&hcl),
        );
        self.instances.insert(hcl.to_string(), instance.clone());
        instance
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::transport::mock::MockConductor;
    use crate::transport::ConductorTransport;
    use parking_lot::Mutex;
    use serde_json::json;

    struct Recorder {
        hcl: Hcl,
        signals: Arc<Mutex<u32>>,
    }

    impl CellInstance for Recorder {
        fn hcl(&self) -> &Hcl {
            &self.hcl
        }

        fn on_signal(&self, _signal: &AppSignal) {
            *self.signals.lock() += 1;
        }
    }

    fn recorder_def(role: &str, clonable: bool, signals: Arc<Mutex<u32>>) -> RoleDef {
        RoleDef {
            default_role_name: role.to_string(),
            clonable,
            factory: Arc::new(move |_proxy, hcl| {
                Arc::new(Recorder {
                    hcl,
                    signals: signals.clone(),
                })
            }),
        }
    }

    async fn happ_with_role(app_id: &str, role: &str) -> (Arc<MockConductor>, Happ) {
        let mock = Arc::new(MockConductor::new());
        mock.add_role(app_id, role);
        let registry = AppProxy::new(RuntimeConfig::default(), mock.clone());
        (mock, Happ::new(app_id, registry))
    }

    #[tokio::test]
    async fn test_create_original_rejects_duplicates() {
        let (_, happ) = happ_with_role("app-1", "role-a").await;
        let signals = Arc::new(Mutex::new(0));

        let original = happ
            .create_original(recorder_def("role-a", true, signals.clone()), None)
            .await
            .unwrap();
        assert!(!original.hcl().is_clone());

        let duplicate = happ
            .create_original(recorder_def("role-a", true, signals), None)
            .await;
        assert!(matches!(duplicate, Err(ProxyError::DuplicateOriginal(_))));
    }

    #[tokio::test]
    async fn test_clone_indices_are_sequential_from_zero() {
        let (_, happ) = happ_with_role("app-1", "role-a").await;
        let signals = Arc::new(Mutex::new(0));
        happ.create_original(recorder_def("role-a", true, signals), None)
            .await
            .unwrap();

        for expected in 0..3u32 {
            let (index, instance) = happ
                .create_clone("role-a", CloneOverrides::default())
                .await
                .unwrap();
            assert_eq!(index, expected);
            assert_eq!(instance.hcl().clone_index, Some(expected));
        }

        // Default network seed is the clone index.
        let clones = happ.registry.get_clones("app-1", "role-a");
        let seeds: Vec<&str> = clones
            .iter()
            .map(|c| c.dna_modifiers.network_seed.as_str())
            .collect();
        assert_eq!(seeds, vec!["0", "1", "2"]);

        let locators: Vec<String> = happ
            .clones("role-a")
            .iter()
            .map(|i| i.hcl().to_string())
            .collect();
        assert_eq!(
            locators,
            vec![
                "cell:/app-1/role-a/0",
                "cell:/app-1/role-a/1",
                "cell:/app-1/role-a/2",
            ]
        );
    }

    #[tokio::test]
    async fn test_clone_preconditions_fail_without_host_calls() {
        let (mock, happ) = happ_with_role("app-1", "role-a").await;
        let signals = Arc::new(Mutex::new(0));
        happ.create_original(recorder_def("role-a", false, signals), None)
            .await
            .unwrap();
        let calls_before = mock.host_call_count();

        let no_original = happ.create_clone("role-b", CloneOverrides::default()).await;
        assert!(matches!(no_original, Err(ProxyError::NoOriginal(_))));

        let not_clonable = happ.create_clone("role-a", CloneOverrides::default()).await;
        assert!(matches!(not_clonable, Err(ProxyError::RoleNotClonable(_))));

        assert_eq!(mock.host_call_count(), calls_before);
    }

    #[tokio::test]
    async fn test_get_instance_accepts_combined_role_strings() {
        let (_, happ) = happ_with_role("app-1", "role-a").await;
        let signals = Arc::new(Mutex::new(0));
        happ.create_original(recorder_def("role-a", true, signals), None)
            .await
            .unwrap();
        happ.create_clone("role-a", CloneOverrides::default())
            .await
            .unwrap();

        assert!(happ.get_instance("role-a").is_some());
        let clone = happ.get_instance("role-a.0").unwrap();
        assert_eq!(clone.hcl().clone_index, Some(0));
        assert!(happ.get_instance("role-a.9").is_none());
        assert_eq!(happ.clones("role-a").len(), 1);
    }

    #[tokio::test]
    async fn test_create_starting_clones_picks_up_preexisting_clones() {
        let (mock, happ) = happ_with_role("app-1", "role-a").await;
        // A clone already lives on the conductor before the role is fetched.
        mock.create_clone_cell(CreateCloneCellRequest {
            app_id: "app-1".to_string(),
            role_name: "role-a".to_string(),
            modifiers: DnaModifiers::default(),
            membrane_proof: None,
            name: Some("carried-over".to_string()),
        })
        .await
        .unwrap();

        let signals = Arc::new(Mutex::new(0));
        happ.create_original(recorder_def("role-a", true, signals), None)
            .await
            .unwrap();
        let started = happ.create_starting_clones().unwrap();
        assert_eq!(started.len(), 1);
        assert_eq!(started[0].hcl().clone_index, Some(0));

        // Idempotent: nothing new on a second pass.
        assert!(happ.create_starting_clones().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_instance_receives_its_cell_signals() {
        let (mock, happ) = happ_with_role("app-1", "role-a").await;
        let signals = Arc::new(Mutex::new(0));
        happ.create_original(recorder_def("role-a", true, signals.clone()), None)
            .await
            .unwrap();

        let address = happ
            .registry
            .get_cell(&Hcl::new("app-1", "role-a"))
            .unwrap()
            .address()
            .clone();
        mock.push_signal(AppSignal {
            cell_address: address,
            zome_name: "notify".to_string(),
            payload: json!({"from": "agent", "pulses": []}),
        });
        assert_eq!(*signals.lock(), 1);
    }

    #[tokio::test]
    async fn test_dump_call_logs_does_not_affect_signal_delivery() {
        let (mock, happ) = happ_with_role("app-1", "role-a").await;
        let signals = Arc::new(Mutex::new(0));
        happ.create_original(recorder_def("role-a", true, signals.clone()), None)
            .await
            .unwrap();

        // A read-side dump must not register anything.
        happ.dump_call_logs(None);
        happ.dump_call_logs(Some("role-a"));

        let hcl = Hcl::new("app-1", "role-a");
        let address = happ.registry.get_cell(&hcl).unwrap().address().clone();
        assert_eq!(happ.registry.journal().locations(&address).len(), 1);

        mock.push_signal(AppSignal {
            cell_address: address,
            zome_name: "notify".to_string(),
            payload: json!({"from": "agent", "pulses": []}),
        });
        assert_eq!(*signals.lock(), 1);
    }
}
