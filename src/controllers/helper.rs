/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/controllers/helper.rs
*
* This file contains the logic shared by the KeycloakRealmComponent and
* KeycloakClient reconcilers, keeping each controller focused on its own
* convergence steps.
*
* Functions:
* - `get_or_create_realm_owner_ref`: resolves the owning KeycloakRealm and links
*   the resource to it.
* - `create_keycloak_client_for_realm`: builds an authenticated Keycloak client
*   from the realm's Keycloak resource and credentials Secret.
* - `try_to_delete`: the finalizer protocol. Attaches the finalizer on live
*   resources, runs the terminator and releases the finalizer on deleted ones.
* - `next_status` / `finish_cycle`: turn a cycle's result into the persisted
*   status and the requeue decision governed by the failure backoff.
*
* SPDX-License-Identifier: Apache-2.0
*/

use super::backoff::FailureBackoff;
use super::ownership;
use crate::crds::{
    Keycloak, KeycloakClient, KeycloakRealm, KeycloakRealmComponent, KeycloakResourceStatus,
    REALM_KIND,
};
use crate::error::Error;
use crate::keycloak::{KeycloakAdapter, KeycloakApi};
use crate::metrics;
use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{
    api::{Api, Patch, PatchParams},
    client::Client,
    runtime::controller::Action,
    Resource, ResourceExt,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Map, Value};
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub const SUCCESS_STATUS: &str = "OK";

/// The context shared by every reconciliation of both controllers.
pub struct Context {
    pub client: Client,
    pub backoff: FailureBackoff,
    pub success_requeue: Option<Duration>,
    pub http_timeout: Duration,
}

/// Cleanup of the remote entity, run before the finalizer is released.
#[async_trait]
pub trait Terminator: Send + Sync {
    async fn delete_resource(&self) -> Result<(), Error>;
}

/// Resources whose reconciliation outcome is tracked in `KeycloakResourceStatus`.
pub trait FailureCountable {
    fn reconcile_status(&self) -> Option<&KeycloakResourceStatus>;
}

impl FailureCountable for KeycloakRealmComponent {
    fn reconcile_status(&self) -> Option<&KeycloakResourceStatus> {
        self.status.as_ref()
    }
}

impl FailureCountable for KeycloakClient {
    fn reconcile_status(&self) -> Option<&KeycloakResourceStatus> {
        self.status.as_ref()
    }
}

fn namespace_of<K: Resource>(obj: &K) -> Result<String, Error> {
    obj.meta()
        .namespace
        .clone()
        .ok_or(Error::MissingMetadata("namespace"))
}

/// Merge patch for `metadata.<field>`, guarded by the object's resourceVersion
/// so a concurrent writer makes the patch fail instead of being overwritten.
fn metadata_patch<K: Resource>(obj: &K, field: &str, value: Value) -> Value {
    let mut metadata = Map::new();
    metadata.insert(field.to_string(), value);
    if let Some(rv) = &obj.meta().resource_version {
        metadata.insert("resourceVersion".to_string(), Value::String(rv.clone()));
    }
    json!({ "metadata": metadata })
}

pub async fn patch_owner_references<K>(
    api: &Api<K>,
    obj: &K,
    owner_references: Vec<OwnerReference>,
) -> Result<K, Error>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Serialize + Debug,
{
    let patch = metadata_patch(obj, "ownerReferences", json!(owner_references));
    Ok(api
        .patch(&obj.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
        .await?)
}

async fn patch_finalizers<K>(api: &Api<K>, obj: &K, finalizers: Vec<String>) -> Result<K, Error>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Serialize + Debug,
{
    let patch = metadata_patch(obj, "finalizers", json!(finalizers));
    Ok(api
        .patch(&obj.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
        .await?)
}

/// Resolves the KeycloakRealm named `realm_ref` in the resource's namespace and
/// records it as an owner of the resource if it is not one already.
pub async fn get_or_create_realm_owner_ref<K>(
    client: &Client,
    obj: &mut K,
    realm_ref: &str,
) -> Result<KeycloakRealm, Error>
where
    K: Resource<DynamicType = (), Scope = k8s_openapi::NamespaceResourceScope> + Clone + DeserializeOwned + Serialize + Debug,
{
    let ns = namespace_of(obj)?;
    let realms: Api<KeycloakRealm> = Api::namespaced(client.clone(), &ns);
    let realm = realms
        .get(realm_ref)
        .await
        .map_err(|e| Error::from(e).wrap(format!("unable to get KeycloakRealm {}", realm_ref)))?;

    let linked = obj
        .owner_references()
        .iter()
        .any(|r| r.kind == REALM_KIND && r.name == realm.name_any());
    if !linked {
        let mut refs = obj.owner_references().to_vec();
        refs.push(ownership::owner_reference(&realm, false)?);
        let api: Api<K> = Api::namespaced(client.clone(), &ns);
        *obj = patch_owner_references(&api, obj, refs)
            .await
            .map_err(|e| e.wrap("unable to set realm owner reference"))?;
        info!(realm = %realm.name_any(), "Realm owner reference attached");
    }

    Ok(realm)
}

fn secret_value(secret: &Secret, key: &str) -> Result<String, Error> {
    secret
        .data
        .as_ref()
        .and_then(|data| data.get(key))
        .map(|value| String::from_utf8_lossy(&value.0).into_owned())
        .ok_or_else(|| {
            Error::Validation(format!(
                "key '{}' not found in secret '{}'",
                key,
                secret.name_any()
            ))
        })
}

pub async fn create_keycloak_client_for_realm(
    client: &Client,
    realm: &KeycloakRealm,
    timeout: Duration,
) -> Result<Arc<dyn KeycloakApi>, Error> {
    let ns = namespace_of(realm)?;
    let keycloaks: Api<Keycloak> = Api::namespaced(client.clone(), &ns);
    let keycloak = keycloaks.get(&realm.spec.keycloak_ref).await.map_err(|e| {
        Error::from(e).wrap(format!("unable to get Keycloak {}", realm.spec.keycloak_ref))
    })?;

    let secrets: Api<Secret> = Api::namespaced(client.clone(), &ns);
    let secret = secrets.get(&keycloak.spec.secret).await.map_err(|e| {
        Error::from(e).wrap(format!("unable to get credentials secret {}", keycloak.spec.secret))
    })?;
    let username = secret_value(&secret, "username")?;
    let password = secret_value(&secret, "password")?;

    let adapter = KeycloakAdapter::connect(&keycloak.spec.url, &username, &password, timeout)
        .await
        .map_err(|e| e.wrap(format!("unable to log in to Keycloak at {}", keycloak.spec.url)))?;
    Ok(Arc::new(adapter))
}

/// Drives the finalizer protocol. Returns `true` when the resource is being
/// deleted and the reconciler must stop here.
///
/// Re-entrant: if cleanup fails the finalizer stays in place and the next
/// cycle runs the terminator again.
pub async fn try_to_delete<K>(
    api: &Api<K>,
    obj: &K,
    terminator: &dyn Terminator,
    finalizer: &str,
) -> Result<bool, Error>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Serialize + Debug,
{
    let finalizers = obj.finalizers();
    let has_finalizer = finalizers.iter().any(|f| f == finalizer);

    if obj.meta().deletion_timestamp.is_none() {
        if !has_finalizer {
            let mut updated = finalizers.to_vec();
            updated.push(finalizer.to_string());
            patch_finalizers(api, obj, updated)
                .await
                .map_err(|e| e.wrap("unable to add finalizer"))?;
        }
        return Ok(false);
    }

    if has_finalizer {
        info!(name = %obj.name_any(), "Resource is being deleted, running cleanup");
        terminator
            .delete_resource()
            .await
            .map_err(|e| e.wrap("unable to delete remote resource"))?;

        let remaining: Vec<String> = finalizers
            .iter()
            .filter(|f| f.as_str() != finalizer)
            .cloned()
            .collect();
        patch_finalizers(api, obj, remaining)
            .await
            .map_err(|e| e.wrap("unable to remove finalizer"))?;
    }

    Ok(true)
}

/// Computes the status to persist after a cycle and when to run the next one.
///
/// `result` carries the remote id on success. On failure the previous id is
/// kept, the failure counter grows by one and the delay is taken from the
/// counter as it was before this failure.
pub fn next_status(
    previous: Option<&KeycloakResourceStatus>,
    result: &Result<Option<String>, Error>,
    backoff: &FailureBackoff,
    success_requeue: Option<Duration>,
) -> (KeycloakResourceStatus, Option<Duration>) {
    let previous_id = previous.and_then(|s| s.id.clone());
    let failures = previous.map_or(0, |s| s.failure_count);
    let now = Some(Utc::now().to_rfc3339());

    match result {
        Ok(id) => (
            KeycloakResourceStatus {
                value: SUCCESS_STATUS.to_string(),
                id: id.clone().or(previous_id),
                failure_count: 0,
                last_reconcile_time: now,
            },
            success_requeue,
        ),
        Err(err) => (
            KeycloakResourceStatus {
                value: err.to_string(),
                id: previous_id,
                failure_count: failures.saturating_add(1),
                last_reconcile_time: now,
            },
            Some(backoff.delay(failures)),
        ),
    }
}

/// Persists the cycle's status and translates it into the controller action.
pub async fn finish_cycle<K>(
    api: &Api<K>,
    obj: &K,
    result: Result<Option<String>, Error>,
    ctx: &Context,
) -> Result<Action, Error>
where
    K: Resource<DynamicType = ()> + FailureCountable + Clone + DeserializeOwned + Serialize + Debug,
{
    let kind = K::kind(&()).to_string();
    let name = obj.name_any();
    let (status, requeue) = next_status(
        obj.reconcile_status(),
        &result,
        &ctx.backoff,
        ctx.success_requeue,
    );

    let patch = json!({ "status": status });
    api.patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
        .await
        .map_err(|e| Error::from(e).wrap(format!("unable to update {} status", kind)))?;

    match &result {
        Ok(_) => {
            metrics::RECONCILIATIONS_TOTAL
                .with_label_values(&[kind.as_str(), "success"])
                .inc();
            info!(%kind, %name, "Reconciled successfully");
        }
        Err(err) => {
            metrics::RECONCILIATIONS_TOTAL
                .with_label_values(&[kind.as_str(), "failure"])
                .inc();
            if let Some(delay) = requeue {
                metrics::FAILURE_REQUEUE_SECONDS
                    .with_label_values(&[kind.as_str()])
                    .observe(delay.as_secs_f64());
            }
            warn!(
                %kind,
                %name,
                failures = status.failure_count,
                ?requeue,
                "Reconciliation failed: {}",
                err
            );
        }
    }

    Ok(requeue.map_or_else(Action::await_change, Action::requeue))
}
