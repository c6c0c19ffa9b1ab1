/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/controllers/chain/put_client.rs
*
* Creates the remote client or brings an existing one in line with the
* KeycloakClient resource.
*
* SPDX-License-Identifier: Apache-2.0
*/

use super::{ChainState, Step};
use crate::crds::KeycloakClient;
use crate::error::Error;
use crate::keycloak::ClientRepresentation;
use async_trait::async_trait;
use tracing::info;

pub struct PutClient;

pub fn desired_client(client: &KeycloakClient) -> ClientRepresentation {
    let spec = &client.spec;
    ClientRepresentation {
        id: None,
        client_id: spec.client_id.clone(),
        enabled: spec.enabled,
        public_client: spec.public,
        protocol: spec.protocol.clone(),
        root_url: spec.web_url.clone(),
        redirect_uris: spec.redirect_uris.clone(),
        direct_access_grants_enabled: spec.direct_access,
        service_accounts_enabled: spec.service_account.as_ref().is_some_and(|sa| sa.enabled),
        attributes: spec.attributes.clone(),
    }
}

#[async_trait]
impl Step for PutClient {
    fn name(&self) -> &'static str {
        "PutClient"
    }

    async fn serve(&self, client: &KeycloakClient, state: &mut ChainState) -> Result<(), Error> {
        let mut desired = desired_client(client);
        let realm = state.realm_name.as_str();

        let id = match state.api.get_client_id(&desired.client_id, realm).await {
            Ok(id) => {
                desired.id = Some(id.clone());
                state
                    .api
                    .update_client(realm, &desired)
                    .await
                    .map_err(|e| e.wrap("unable to update client"))?;
                id
            }
            Err(err) if err.is_not_found() => {
                let id = state
                    .api
                    .create_client(realm, &desired)
                    .await
                    .map_err(|e| e.wrap("unable to create client"))?;
                info!(client_id = %desired.client_id, %id, "Client created");
                desired.id = Some(id.clone());
                id
            }
            Err(err) => return Err(err.wrap("unable to check client existence")),
        };

        info!(client_id = %desired.client_id, %id, "Client is up to date");
        state.client = Some(desired);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::keycloak_client;
    use super::*;
    use crate::keycloak::MockKeycloakApi;
    use serde_json::json;
    use std::sync::Arc;

    fn spec() -> serde_json::Value {
        json!({
            "clientId": "app",
            "realmRef": "main",
            "webUrl": "https://app.example.com",
            "redirectUris": ["https://app.example.com/*"]
        })
    }

    #[tokio::test]
    async fn missing_client_is_created() {
        let mut api = MockKeycloakApi::new();
        api.expect_get_client_id()
            .returning(|id, _| Err(Error::NotFound(format!("client {}", id))));
        api.expect_create_client()
            .times(1)
            .withf(|realm, c| {
                realm == "sso"
                    && c.id.is_none()
                    && c.client_id == "app"
                    && c.enabled
                    && c.protocol == "openid-connect"
                    && c.root_url == "https://app.example.com"
            })
            .returning(|_, _| Ok("id-1".to_string()));
        api.expect_update_client().never();

        let mut state = ChainState::new(Arc::new(api), "sso");
        PutClient
            .serve(&keycloak_client(spec()), &mut state)
            .await
            .unwrap();

        assert_eq!(state.client.unwrap().id.as_deref(), Some("id-1"));
    }

    #[tokio::test]
    async fn existing_client_is_updated_with_its_remote_id() {
        let mut api = MockKeycloakApi::new();
        api.expect_get_client_id()
            .returning(|_, _| Ok("id-1".to_string()));
        api.expect_create_client().never();
        api.expect_update_client()
            .times(1)
            .withf(|_, c| c.id.as_deref() == Some("id-1"))
            .returning(|_, _| Ok(()));

        let mut state = ChainState::new(Arc::new(api), "sso");
        PutClient
            .serve(&keycloak_client(spec()), &mut state)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unexpected_lookup_error_creates_nothing() {
        let mut api = MockKeycloakApi::new();
        api.expect_get_client_id().returning(|_, _| {
            Err(Error::KeycloakApi {
                status: 500,
                url: "/clients".to_string(),
                body: String::new(),
            })
        });
        api.expect_create_client().never();
        api.expect_update_client().never();

        let mut state = ChainState::new(Arc::new(api), "sso");
        let result = PutClient.serve(&keycloak_client(spec()), &mut state).await;

        assert!(result.is_err());
        assert!(state.client.is_none());
    }
}
