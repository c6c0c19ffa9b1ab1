/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/controllers/ownership.rs
*
* Resolution of a KeycloakRealmComponent's parent and the owner links that tie
* it to other custom resources.
*
* Architecture:
* - Local lookups and owner-reference writes go through `ComponentStore`, so the
*   resolution rules can be exercised without a cluster.
* - The parent is decided once from `ParentRef::target()`; unsupported kinds are
*   rejected before any lookup.
*
* SPDX-License-Identifier: Apache-2.0
*/

use super::helper::patch_owner_references;
use crate::crds::{KeycloakRealm, KeycloakRealmComponent, ParentTarget, REALM_COMPONENT_KIND};
use crate::error::Error;
use crate::keycloak::KeycloakApi;
use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{api::Api, client::Client, Resource, ResourceExt};
use tracing::info;

#[cfg(test)]
use mockall::automock;

/// Local (cluster-side) lookups needed to resolve component parents.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ComponentStore: Send + Sync {
    async fn get_realm(&self, namespace: &str, name: &str) -> Result<KeycloakRealm, Error>;
    async fn get_component(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<KeycloakRealmComponent, Error>;
    /// Replaces the component's owner references and returns the stored object.
    async fn set_owner_references(
        &self,
        component: &KeycloakRealmComponent,
        owner_references: Vec<OwnerReference>,
    ) -> Result<KeycloakRealmComponent, Error>;
}

pub struct KubeComponentStore {
    client: Client,
}

impl KubeComponentStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ComponentStore for KubeComponentStore {
    async fn get_realm(&self, namespace: &str, name: &str) -> Result<KeycloakRealm, Error> {
        let api: Api<KeycloakRealm> = Api::namespaced(self.client.clone(), namespace);
        api.get(name)
            .await
            .map_err(|e| Error::from(e).wrap(format!("unable to get KeycloakRealm {}", name)))
    }

    async fn get_component(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<KeycloakRealmComponent, Error> {
        let api: Api<KeycloakRealmComponent> = Api::namespaced(self.client.clone(), namespace);
        api.get(name).await.map_err(|e| {
            Error::from(e).wrap(format!("unable to get KeycloakRealmComponent {}", name))
        })
    }

    async fn set_owner_references(
        &self,
        component: &KeycloakRealmComponent,
        owner_references: Vec<OwnerReference>,
    ) -> Result<KeycloakRealmComponent, Error> {
        let namespace = component
            .namespace()
            .ok_or(Error::MissingMetadata("namespace"))?;
        let api: Api<KeycloakRealmComponent> = Api::namespaced(self.client.clone(), &namespace);
        patch_owner_references(&api, component, owner_references).await
    }
}

/// Builds an owner reference pointing at `parent`. Deletion of the owner is
/// blocked until the dependent is gone.
pub fn owner_reference<P>(parent: &P, controller: bool) -> Result<OwnerReference, Error>
where
    P: Resource<DynamicType = ()>,
{
    Ok(OwnerReference {
        api_version: P::api_version(&()).into_owned(),
        kind: P::kind(&()).into_owned(),
        name: parent.name_any(),
        uid: parent.uid().ok_or(Error::MissingMetadata("uid"))?,
        controller: controller.then_some(true),
        block_owner_deletion: Some(true),
    })
}

/// Remote id under which the component must be created: its parent's id.
///
/// `realm_name` is the remote realm the component lives in, used to look up a
/// parent component. A realm parent's id must be non-empty; a component
/// parent's id is returned as found.
pub async fn resolve_parent_id(
    store: &dyn ComponentStore,
    keycloak: &dyn KeycloakApi,
    component: &KeycloakRealmComponent,
    realm_name: &str,
) -> Result<Option<String>, Error> {
    let parent = match &component.spec.parent_ref {
        Some(parent) => parent,
        None => return Ok(None),
    };
    let namespace = component
        .namespace()
        .ok_or(Error::MissingMetadata("namespace"))?;

    match parent.target() {
        ParentTarget::Realm(name) => {
            let realm = store.get_realm(&namespace, name).await?;
            let remote = keycloak
                .get_realm(&realm.spec.realm_name)
                .await
                .map_err(|e| e.wrap("unable to get realm"))?;
            match remote.id {
                Some(id) if !id.is_empty() => Ok(Some(id)),
                _ => Err(Error::Validation(format!(
                    "realm {} has no id",
                    realm.spec.realm_name
                ))),
            }
        }
        ParentTarget::Component(name) => {
            let local = store.get_component(&namespace, name).await?;
            let remote = keycloak
                .get_component(realm_name, &local.spec.name)
                .await
                .map_err(|e| e.wrap("unable to get parent component"))?;
            Ok(remote.id)
        }
        ParentTarget::Unsupported(kind) => Err(Error::UnsupportedParentKind(kind.to_string())),
    }
}

/// Attaches a controller owner link from `component` to its parent component.
///
/// Does nothing unless the parent is a KeycloakRealmComponent, and performs no
/// write if a link of that kind already exists. Other owner references are
/// preserved.
pub async fn set_component_owner_reference(
    store: &dyn ComponentStore,
    component: &mut KeycloakRealmComponent,
) -> Result<(), Error> {
    let parent_name = match component.spec.parent_ref.as_ref().map(|p| p.target()) {
        Some(ParentTarget::Component(name)) => name.to_string(),
        _ => return Ok(()),
    };
    if component
        .owner_references()
        .iter()
        .any(|r| r.kind == REALM_COMPONENT_KIND)
    {
        return Ok(());
    }

    let namespace = component
        .namespace()
        .ok_or(Error::MissingMetadata("namespace"))?;
    let parent = store.get_component(&namespace, &parent_name).await?;

    let mut refs = component.owner_references().to_vec();
    refs.push(owner_reference(&parent, true)?);
    *component = store
        .set_owner_references(component, refs)
        .await
        .map_err(|e| e.wrap("unable to set component owner reference"))?;
    info!(parent = %parent_name, "Component owner reference attached");
    Ok(())
}
