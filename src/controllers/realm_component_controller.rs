/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/controllers/realm_component_controller.rs
*
* This file implements the reconciliation logic for the KeycloakRealmComponent
* custom resource: a pluggable realm component (user storage provider, key
* provider, LDAP mapper and the like) kept in sync with Keycloak.
*
* Architecture:
* A cycle fetches the resource, links it to its realm and parent component,
* logs in to the realm's Keycloak and then either runs the deletion path
* (remove the remote component, release the finalizer) or upserts the remote
* component. The outcome is always written to the resource's status.
*
* SPDX-License-Identifier: Apache-2.0
*/

use super::helper::{self, Context, Terminator};
use super::ownership::{self, ComponentStore, KubeComponentStore};
use crate::crds::KeycloakRealmComponent;
use crate::error::Error;
use crate::keycloak::{Component, KeycloakApi};
use async_trait::async_trait;
use kube::{api::Api, runtime::controller::Action, ResourceExt};
use std::sync::Arc;
use tracing::{info, info_span, Instrument};

pub const FINALIZER: &str = "keycloak.realmcomponent.operator.finalizer.name";

/// Removes the remote component when its resource is deleted.
pub struct ComponentTerminator {
    api: Arc<dyn KeycloakApi>,
    realm_name: String,
    component_name: String,
}

impl ComponentTerminator {
    pub fn new(api: Arc<dyn KeycloakApi>, realm_name: String, component_name: String) -> Self {
        Self {
            api,
            realm_name,
            component_name,
        }
    }
}

#[async_trait]
impl Terminator for ComponentTerminator {
    async fn delete_resource(&self) -> Result<(), Error> {
        let component = match self
            .api
            .get_component(&self.realm_name, &self.component_name)
            .await
        {
            Ok(component) => component,
            Err(err) if err.is_not_found() => {
                info!(component = %self.component_name, "Component already absent from Keycloak");
                return Ok(());
            }
            Err(err) => return Err(err.wrap("unable to get component")),
        };

        let Some(id) = component.id else {
            return Ok(());
        };
        self.api
            .delete_component(&self.realm_name, &id)
            .await
            .map_err(|e| e.wrap("unable to delete component"))?;
        info!(component = %self.component_name, %id, "Component deleted from Keycloak");
        Ok(())
    }
}

/// Main reconciliation function for the KeycloakRealmComponent resource.
pub async fn reconcile(
    component: Arc<KeycloakRealmComponent>,
    ctx: Arc<Context>,
) -> Result<Action, Error> {
    let span = info_span!(
        "reconcile_realm_component",
        name = component.name_any().as_str(),
        namespace = component.namespace().unwrap_or_default().as_str()
    );

    async move {
        let ns = component
            .namespace()
            .ok_or(Error::MissingMetadata("namespace"))?;
        let components: Api<KeycloakRealmComponent> = Api::namespaced(ctx.client.clone(), &ns);

        let Some(mut component) = components.get_opt(&component.name_any()).await? else {
            info!("KeycloakRealmComponent no longer exists, nothing to do");
            return Ok(Action::await_change());
        };
        info!("Reconciling KeycloakRealmComponent");

        let realm_ref = component.spec.realm_ref.clone();
        let realm = helper::get_or_create_realm_owner_ref(&ctx.client, &mut component, &realm_ref)
            .await?;

        let store = KubeComponentStore::new(ctx.client.clone());
        ownership::set_component_owner_reference(&store, &mut component).await?;

        let keycloak =
            helper::create_keycloak_client_for_realm(&ctx.client, &realm, ctx.http_timeout).await?;

        let terminator = ComponentTerminator::new(
            keycloak.clone(),
            realm.spec.realm_name.clone(),
            component.spec.name.clone(),
        );
        if helper::try_to_delete(&components, &component, &terminator, FINALIZER).await? {
            return Ok(Action::await_change());
        }

        let result = try_reconcile(&store, keycloak.as_ref(), &component, &realm.spec.realm_name)
            .await;
        helper::finish_cycle(&components, &component, result, &ctx).await
    }
    .instrument(span)
    .await
}

/// Creates the remote component or updates it in place. Returns its id when
/// Keycloak reported one.
pub async fn try_reconcile(
    store: &dyn ComponentStore,
    keycloak: &dyn KeycloakApi,
    component: &KeycloakRealmComponent,
    realm_name: &str,
) -> Result<Option<String>, Error> {
    let parent_id = ownership::resolve_parent_id(store, keycloak, component, realm_name)
        .await
        .map_err(|e| e.wrap("unable to get parent id"))?;

    let spec = &component.spec;
    let mut desired = Component {
        id: None,
        name: spec.name.clone(),
        parent_id,
        provider_id: spec.provider_id.clone(),
        provider_type: spec.provider_type.clone(),
        config: spec.config.clone().unwrap_or_default(),
    };

    match keycloak.get_component(realm_name, &spec.name).await {
        Ok(existing) => {
            desired.id = existing.id;
            keycloak
                .update_component(realm_name, &desired)
                .await
                .map_err(|e| e.wrap("unable to update component"))?;
            info!(component = %spec.name, "Component updated");
            Ok(desired.id)
        }
        Err(err) if err.is_not_found() => {
            let id = keycloak
                .create_component(realm_name, &desired)
                .await
                .map_err(|e| e.wrap("unable to create component"))?;
            info!(component = %spec.name, %id, "Component created");
            Ok(Some(id))
        }
        Err(err) => Err(err.wrap("unable to get component, unexpected error")),
    }
}

pub fn on_error(component: Arc<KeycloakRealmComponent>, error: &Error, ctx: Arc<Context>) -> Action {
    tracing::error!(
        name = %component.name_any(),
        "KeycloakRealmComponent reconciliation failed: {}",
        error
    );
    Action::requeue(ctx.backoff.base())
}
