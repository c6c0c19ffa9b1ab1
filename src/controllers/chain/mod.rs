/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/controllers/chain/mod.rs
*
* The ordered set of convergence steps applied to a KeycloakClient.
*
* Architecture:
* - Every step implements `Step`. Steps share a `ChainState` that carries the
*   remote API handle, the realm and, once `PutClient` ran, the client's
*   remote representation.
* - `Chain::serve` first validates every step against the resource, so a
*   conflicting spec is rejected before any remote mutation. It then serves
*   the steps in order and stops at the first failure, which is wrapped with
*   the failing step's name.
*
* SPDX-License-Identifier: Apache-2.0
*/

pub mod put_admin_fine_grained_permissions;
pub mod put_client;
pub mod put_protocol_mappers;
pub mod service_account;

use crate::crds::KeycloakClient;
use crate::error::Error;
use crate::keycloak::{ClientRepresentation, KeycloakApi};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info_span, Instrument};

pub use put_admin_fine_grained_permissions::PutAdminFineGrainedPermissions;
pub use put_client::PutClient;
pub use put_protocol_mappers::PutProtocolMappers;
pub use service_account::ServiceAccount;

/// State threaded through the steps of one chain run.
pub struct ChainState {
    pub api: Arc<dyn KeycloakApi>,
    pub realm_name: String,
    /// Remote client as last written by `PutClient`, with its id filled in.
    pub client: Option<ClientRepresentation>,
}

impl ChainState {
    pub fn new(api: Arc<dyn KeycloakApi>, realm_name: impl Into<String>) -> Self {
        Self {
            api,
            realm_name: realm_name.into(),
            client: None,
        }
    }

    /// Remote id of the client, looked up if no earlier step resolved it.
    pub async fn client_id(&self, client: &KeycloakClient) -> Result<String, Error> {
        if let Some(id) = self.client.as_ref().and_then(|c| c.id.clone()) {
            return Ok(id);
        }
        self.api
            .get_client_id(&client.spec.client_id, &self.realm_name)
            .await
            .map_err(|e| e.wrap("unable to get client id"))
    }
}

#[async_trait]
pub trait Step: Send + Sync {
    fn name(&self) -> &'static str;

    /// Checks the resource before any step is served. Must not call out.
    fn validate(&self, _client: &KeycloakClient) -> Result<(), Error> {
        Ok(())
    }

    async fn serve(&self, client: &KeycloakClient, state: &mut ChainState) -> Result<(), Error>;
}

pub struct Chain {
    steps: Vec<Box<dyn Step>>,
}

impl Chain {
    pub fn new(steps: Vec<Box<dyn Step>>) -> Self {
        Self { steps }
    }

    /// The client chain in execution order.
    pub fn make_client_chain() -> Self {
        Self::new(vec![
            Box::new(PutClient),
            Box::new(PutProtocolMappers),
            Box::new(ServiceAccount),
            Box::new(PutAdminFineGrainedPermissions),
        ])
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    pub async fn serve(&self, client: &KeycloakClient, state: &mut ChainState) -> Result<(), Error> {
        for step in &self.steps {
            step.validate(client).map_err(|e| e.wrap(step.name()))?;
        }

        for step in &self.steps {
            let span = info_span!("chain_step", step = step.name());
            async {
                debug!("Serving step");
                step.serve(client, state).await
            }
            .instrument(span)
            .await
            .map_err(|e| e.wrap(step.name()))?;
        }

        Ok(())
    }
}
