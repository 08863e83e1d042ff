//! Test fixtures: an in-memory cluster and helpers shared by unit tests
//!
//! `FakeCluster` implements both client traits over plain maps. When
//! issuance is enabled it plays the signing authority: declaring a
//! Certificate immediately writes its secret with a PEM whose body is the
//! certificate's common name.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ObjectReference, Secret};
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;
use kube::runtime::events::EventType;

use crate::crd::{Certificate, Issuer, Tenant, TenantSpec, TenantStatus};
use crate::events::EventPublisher;
use crate::kube_client::{CertManagerClient, KubeClient};
use crate::resources::TenantResources;
use crate::{Error, CA_CHAIN_KEY, CA_CHAIN_SECRET, ROOT_CA_SECRET, TLS_CERT_KEY};

/// PEM block whose body is `label`
pub fn pem(label: &str) -> Vec<u8> {
    format!("-----BEGIN CERTIFICATE-----\n{label}\n-----END CERTIFICATE-----").into_bytes()
}

/// Secret with a single data entry
pub fn secret_with(name: &str, key: &str, value: &[u8]) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            key.to_string(),
            ByteString(value.to_vec()),
        )])),
        ..Default::default()
    }
}

/// API server answering 503
pub fn unavailable() -> Error {
    kube::Error::Api(kube::core::ErrorResponse {
        status: "Failure".to_string(),
        message: "service unavailable".to_string(),
        reason: "ServiceUnavailable".to_string(),
        code: 503,
    })
    .into()
}

/// Tenant in `default` whose object name equals its spec name
pub fn tenant(name: &str, status_revoked: bool) -> Tenant {
    let mut t = new_tenant(name, false);
    t.status = Some(TenantStatus::settled(status_revoked));
    t
}

/// Freshly created Tenant with no status and no finalizer
pub fn new_tenant(name: &str, revoked: bool) -> Tenant {
    let mut t = Tenant::new(
        name,
        TenantSpec {
            name: name.to_string(),
            namespace: None,
            revoked,
            certificate_template: None,
        },
    );
    t.metadata.namespace = Some("default".to_string());
    t
}

#[derive(Default)]
struct State {
    secrets: BTreeMap<String, Secret>,
    secret_writes: HashMap<String, u32>,
    tenants: Vec<Tenant>,
    certificates: BTreeMap<String, Certificate>,
    certificate_creates: u32,
    issuers: BTreeMap<String, Issuer>,
    issue: bool,
    withheld: BTreeSet<String>,
    failing_deletes: BTreeSet<String>,
    ops: Vec<String>,
}

/// In-memory single-namespace cluster
pub struct FakeCluster {
    namespace: String,
    state: Mutex<State>,
}

impl FakeCluster {
    /// Empty cluster; issuance disabled
    pub fn new(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            state: Mutex::new(State::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("fake cluster lock poisoned")
    }

    fn check_namespace(&self, namespace: &str) {
        assert_eq!(namespace, self.namespace, "unexpected namespace");
    }

    /// Seed the root CA secret
    pub fn with_root_ca(self) -> Self {
        self.put_secret(secret_with(ROOT_CA_SECRET, TLS_CERT_KEY, &pem("root-ca")));
        self
    }

    /// Issue certificates as soon as they are declared
    pub fn issuing(self) -> Self {
        self.state().issue = true;
        self
    }

    /// Never issue the given secret
    pub fn withhold(&self, secret: &str) {
        self.state().withheld.insert(secret.to_string());
    }

    /// Issue the given secret again; already declared Certificates are not
    /// re-issued until they are patched
    pub fn release(&self, secret: &str) {
        self.state().withheld.remove(secret);
    }

    /// Make deletes of the named object fail with 503
    pub fn fail_delete(&self, name: &str) {
        self.state().failing_deletes.insert(name.to_string());
    }

    /// Store a secret directly
    pub fn put_secret(&self, secret: Secret) {
        let name = secret.metadata.name.clone().unwrap_or_default();
        self.state().secrets.insert(name, secret);
    }

    /// Drop a secret directly
    pub fn remove_secret(&self, name: &str) {
        self.state().secrets.remove(name);
    }

    /// Whether a secret exists
    pub fn has_secret(&self, name: &str) -> bool {
        self.state().secrets.contains_key(name)
    }

    /// Number of writes through `write_secret` for `name`
    pub fn secret_writes(&self, name: &str) -> u32 {
        self.state().secret_writes.get(name).copied().unwrap_or(0)
    }

    /// Add a tenant as-is
    pub fn add_tenant(&self, tenant: Tenant) {
        self.state().tenants.push(tenant);
    }

    /// Add a tenant together with already-issued certificate secrets
    pub fn add_issued_tenant(&self, tenant: Tenant) {
        let resources = TenantResources::for_tenant(tenant.tenant_name());
        self.put_secret(secret_with(
            &resources.intermediate_ca_secret,
            TLS_CERT_KEY,
            &pem(&resources.intermediate_ca),
        ));
        self.put_secret(secret_with(
            &resources.client_cert_secret,
            TLS_CERT_KEY,
            &pem(tenant.tenant_name()),
        ));
        self.add_tenant(tenant);
    }

    /// Current copy of a tenant by object name
    pub fn tenant(&self, name: &str) -> Option<Tenant> {
        self.state()
            .tenants
            .iter()
            .find(|t| t.metadata.name.as_deref() == Some(name))
            .cloned()
    }

    /// Mutate a stored tenant in place
    pub fn update_tenant(&self, name: &str, f: impl FnOnce(&mut Tenant)) {
        let mut state = self.state();
        if let Some(t) = state
            .tenants
            .iter_mut()
            .find(|t| t.metadata.name.as_deref() == Some(name))
        {
            f(t);
        }
    }

    /// Chain secret content
    pub fn chain_bytes(&self) -> Option<Vec<u8>> {
        self.state()
            .secrets
            .get(CA_CHAIN_SECRET)
            .and_then(|s| s.data.as_ref())
            .and_then(|d| d.get(CA_CHAIN_KEY))
            .map(|b| b.0.clone())
    }

    /// Whether the chain contains a PEM labelled `label`
    pub fn chain_contains(&self, label: &str) -> bool {
        self.chain_bytes().is_some_and(|chain| {
            String::from_utf8_lossy(&chain)
                .lines()
                .any(|line| line == label)
        })
    }

    /// Number of certificates in the chain
    pub fn chain_len(&self) -> usize {
        self.chain_bytes().map_or(0, |chain| {
            String::from_utf8_lossy(&chain)
                .matches("-----BEGIN CERTIFICATE-----")
                .count()
        })
    }

    /// Names of declared Certificates, sorted
    pub fn certificate_names(&self) -> Vec<String> {
        self.state().certificates.keys().cloned().collect()
    }

    /// Declared Certificate by name
    pub fn certificate(&self, name: &str) -> Option<Certificate> {
        self.state().certificates.get(name).cloned()
    }

    /// Number of Certificate creates (patches excluded)
    pub fn certificate_creates(&self) -> u32 {
        self.state().certificate_creates
    }

    /// Names of declared Issuers, sorted
    pub fn issuer_names(&self) -> Vec<String> {
        self.state().issuers.keys().cloned().collect()
    }

    /// Mutating calls in the order they happened, as `"verb name"`
    pub fn ops(&self) -> Vec<String> {
        self.state().ops.clone()
    }

    fn issue(state: &mut State, cert: &Certificate) {
        let secret = &cert.spec.secret_name;
        if state.issue && !state.withheld.contains(secret) {
            state.secrets.insert(
                secret.clone(),
                secret_with(secret, TLS_CERT_KEY, &pem(&cert.spec.common_name)),
            );
        }
    }

    fn delete_from<T>(
        state: &mut State,
        verb: &str,
        name: &str,
        pick: impl FnOnce(&mut State) -> Option<T>,
    ) -> Result<bool, Error> {
        state.ops.push(format!("{verb} {name}"));
        if state.failing_deletes.contains(name) {
            return Err(unavailable());
        }
        Ok(pick(state).is_some())
    }
}

#[async_trait]
impl KubeClient for FakeCluster {
    async fn get_secret(&self, name: &str, namespace: &str) -> Result<Option<Secret>, Error> {
        self.check_namespace(namespace);
        Ok(self.state().secrets.get(name).cloned())
    }

    async fn write_secret(&self, namespace: &str, secret: &Secret) -> Result<(), Error> {
        self.check_namespace(namespace);
        let name = secret.metadata.name.clone().unwrap_or_default();
        let mut state = self.state();
        state.ops.push(format!("write_secret {name}"));
        *state.secret_writes.entry(name.clone()).or_default() += 1;
        state.secrets.insert(name, secret.clone());
        Ok(())
    }

    async fn delete_secret(&self, name: &str, namespace: &str) -> Result<bool, Error> {
        self.check_namespace(namespace);
        Self::delete_from(&mut self.state(), "delete_secret", name, |s| {
            s.secrets.remove(name)
        })
    }

    async fn list_tenants(&self, namespace: &str) -> Result<Vec<Tenant>, Error> {
        self.check_namespace(namespace);
        Ok(self.state().tenants.clone())
    }

    async fn patch_tenant_status(
        &self,
        name: &str,
        namespace: &str,
        status: &TenantStatus,
    ) -> Result<(), Error> {
        self.check_namespace(namespace);
        self.update_tenant(name, |t| {
            t.status.get_or_insert_with(Default::default).merge(status);
        });
        Ok(())
    }

    async fn add_finalizer(&self, name: &str, namespace: &str) -> Result<(), Error> {
        self.check_namespace(namespace);
        self.update_tenant(name, |t| {
            if !t.has_finalizer() {
                t.metadata
                    .finalizers
                    .get_or_insert_with(Vec::new)
                    .push(crate::TENANT_FINALIZER.to_string());
            }
        });
        Ok(())
    }

    async fn remove_finalizer(&self, name: &str, namespace: &str) -> Result<(), Error> {
        self.check_namespace(namespace);
        self.state().ops.push(format!("remove_finalizer {name}"));
        self.update_tenant(name, |t| {
            if let Some(f) = t.metadata.finalizers.as_mut() {
                f.retain(|s| s != crate::TENANT_FINALIZER);
            }
        });
        Ok(())
    }
}

#[async_trait]
impl CertManagerClient for FakeCluster {
    async fn get_certificate(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<Certificate>, Error> {
        self.check_namespace(namespace);
        Ok(self.state().certificates.get(name).cloned())
    }

    async fn create_certificate(&self, namespace: &str, cert: &Certificate) -> Result<(), Error> {
        self.check_namespace(namespace);
        let name = cert.metadata.name.clone().unwrap_or_default();
        let mut state = self.state();
        assert!(
            !state.certificates.contains_key(&name),
            "certificate {name} already exists"
        );
        state.ops.push(format!("create_certificate {name}"));
        state.certificate_creates += 1;
        Self::issue(&mut state, cert);
        state.certificates.insert(name, cert.clone());
        Ok(())
    }

    async fn patch_certificate(
        &self,
        name: &str,
        namespace: &str,
        cert: &Certificate,
    ) -> Result<(), Error> {
        self.check_namespace(namespace);
        let mut state = self.state();
        state.ops.push(format!("patch_certificate {name}"));
        Self::issue(&mut state, cert);
        state.certificates.insert(name.to_string(), cert.clone());
        Ok(())
    }

    async fn delete_certificate(&self, name: &str, namespace: &str) -> Result<bool, Error> {
        self.check_namespace(namespace);
        Self::delete_from(&mut self.state(), "delete_certificate", name, |s| {
            s.certificates.remove(name)
        })
    }

    async fn get_issuer(&self, name: &str, namespace: &str) -> Result<Option<Issuer>, Error> {
        self.check_namespace(namespace);
        Ok(self.state().issuers.get(name).cloned())
    }

    async fn create_issuer(&self, namespace: &str, issuer: &Issuer) -> Result<(), Error> {
        self.check_namespace(namespace);
        let name = issuer.metadata.name.clone().unwrap_or_default();
        let mut state = self.state();
        state.ops.push(format!("create_issuer {name}"));
        state.issuers.insert(name, issuer.clone());
        Ok(())
    }

    async fn patch_issuer(
        &self,
        name: &str,
        namespace: &str,
        issuer: &Issuer,
    ) -> Result<(), Error> {
        self.check_namespace(namespace);
        self.state().issuers.insert(name.to_string(), issuer.clone());
        Ok(())
    }

    async fn delete_issuer(&self, name: &str, namespace: &str) -> Result<bool, Error> {
        self.check_namespace(namespace);
        Self::delete_from(&mut self.state(), "delete_issuer", name, |s| {
            s.issuers.remove(name)
        })
    }
}

/// One published event
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedEvent {
    /// Object name from the reference
    pub object: String,
    /// Warning or Normal
    pub warning: bool,
    /// Event reason
    pub reason: String,
}

/// Event publisher that keeps everything it is given
#[derive(Default)]
pub struct RecordingEventPublisher {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingEventPublisher {
    /// Reasons in publish order
    pub fn reasons(&self) -> Vec<String> {
        self.events
            .lock()
            .expect("event lock poisoned")
            .iter()
            .map(|e| e.reason.clone())
            .collect()
    }

    /// All recorded events
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().expect("event lock poisoned").clone()
    }
}

#[async_trait]
impl EventPublisher for RecordingEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
        self.events
            .lock()
            .expect("event lock poisoned")
            .push(RecordedEvent {
                object: resource_ref.name.clone().unwrap_or_default(),
                warning: matches!(type_, EventType::Warning),
                reason: reason.to_string(),
            });
    }
}
