/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/controllers/client_controller.rs
*
* This file implements the reconciliation logic for the KeycloakClient custom
* resource. The resource lifecycle (realm link, finalizer, status) is shared
* with the component controller; the convergence itself is delegated to the
* client step chain.
*
* SPDX-License-Identifier: Apache-2.0
*/

use super::chain::{Chain, ChainState};
use super::helper::{self, Context, Terminator};
use crate::crds::KeycloakClient;
use crate::error::Error;
use crate::keycloak::KeycloakApi;
use async_trait::async_trait;
use kube::{api::Api, runtime::controller::Action, ResourceExt};
use std::sync::Arc;
use tracing::{info, info_span, Instrument};

pub const FINALIZER: &str = "keycloak.client.operator.finalizer.name";

/// Removes the remote client when its resource is deleted.
pub struct ClientTerminator {
    api: Arc<dyn KeycloakApi>,
    realm_name: String,
    client_id: String,
}

impl ClientTerminator {
    pub fn new(api: Arc<dyn KeycloakApi>, realm_name: String, client_id: String) -> Self {
        Self {
            api,
            realm_name,
            client_id,
        }
    }
}

#[async_trait]
impl Terminator for ClientTerminator {
    async fn delete_resource(&self) -> Result<(), Error> {
        let id = match self.api.get_client_id(&self.client_id, &self.realm_name).await {
            Ok(id) => id,
            Err(err) if err.is_not_found() => {
                info!(client_id = %self.client_id, "Client already absent from Keycloak");
                return Ok(());
            }
            Err(err) => return Err(err.wrap("unable to get client id")),
        };

        self.api
            .delete_client(&self.realm_name, &id)
            .await
            .map_err(|e| e.wrap("unable to delete client"))?;
        info!(client_id = %self.client_id, %id, "Client deleted from Keycloak");
        Ok(())
    }
}

/// Main reconciliation function for the KeycloakClient resource.
pub async fn reconcile(client: Arc<KeycloakClient>, ctx: Arc<Context>) -> Result<Action, Error> {
    let span = info_span!(
        "reconcile_client",
        name = client.name_any().as_str(),
        namespace = client.namespace().unwrap_or_default().as_str()
    );

    async move {
        let ns = client
            .namespace()
            .ok_or(Error::MissingMetadata("namespace"))?;
        let clients: Api<KeycloakClient> = Api::namespaced(ctx.client.clone(), &ns);

        let Some(mut client) = clients.get_opt(&client.name_any()).await? else {
            info!("KeycloakClient no longer exists, nothing to do");
            return Ok(Action::await_change());
        };
        info!("Reconciling KeycloakClient");

        let realm_ref = client.spec.realm_ref.clone();
        let realm =
            helper::get_or_create_realm_owner_ref(&ctx.client, &mut client, &realm_ref).await?;

        let keycloak =
            helper::create_keycloak_client_for_realm(&ctx.client, &realm, ctx.http_timeout).await?;

        let terminator = ClientTerminator::new(
            keycloak.clone(),
            realm.spec.realm_name.clone(),
            client.spec.client_id.clone(),
        );
        if helper::try_to_delete(&clients, &client, &terminator, FINALIZER).await? {
            return Ok(Action::await_change());
        }

        let result = try_reconcile(keycloak, &client, &realm.spec.realm_name).await;
        helper::finish_cycle(&clients, &client, result, &ctx).await
    }
    .instrument(span)
    .await
}

/// Runs the client chain. Returns the remote client id once it is known.
pub async fn try_reconcile(
    keycloak: Arc<dyn KeycloakApi>,
    client: &KeycloakClient,
    realm_name: &str,
) -> Result<Option<String>, Error> {
    let mut state = ChainState::new(keycloak, realm_name);
    Chain::make_client_chain().serve(client, &mut state).await?;
    Ok(state.client.and_then(|c| c.id))
}

pub fn on_error(client: Arc<KeycloakClient>, error: &Error, ctx: Arc<Context>) -> Action {
    tracing::error!(
        name = %client.name_any(),
        "KeycloakClient reconciliation failed: {}",
        error
    );
    Action::requeue(ctx.backoff.base())
}
