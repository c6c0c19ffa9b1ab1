/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/controllers/chain/put_protocol_mappers.rs
*
* Replaces the client's protocol mappers with the declared set. An absent
* `protocolMappers` list converges the client to no mappers at all.
*
* SPDX-License-Identifier: Apache-2.0
*/

use super::{ChainState, Step};
use crate::crds::KeycloakClient;
use crate::error::Error;
use crate::keycloak::ProtocolMapperRepresentation;
use async_trait::async_trait;
use tracing::info;

pub struct PutProtocolMappers;

pub fn desired_mappers(client: &KeycloakClient) -> Vec<ProtocolMapperRepresentation> {
    client
        .spec
        .protocol_mappers
        .iter()
        .flatten()
        .map(|m| ProtocolMapperRepresentation {
            id: None,
            name: m.name.clone(),
            protocol: m.protocol.clone(),
            protocol_mapper: m.protocol_mapper.clone(),
            config: m.config.clone(),
        })
        .collect()
}

#[async_trait]
impl Step for PutProtocolMappers {
    fn name(&self) -> &'static str {
        "PutProtocolMappers"
    }

    async fn serve(&self, client: &KeycloakClient, state: &mut ChainState) -> Result<(), Error> {
        let remote = match &state.client {
            Some(remote) => remote.clone(),
            None => {
                let mut desired = super::put_client::desired_client(client);
                desired.id = Some(state.client_id(client).await?);
                desired
            }
        };
        let mappers = desired_mappers(client);
        let count = mappers.len();

        state
            .api
            .sync_client_protocol_mappers(&state.realm_name, &remote, mappers)
            .await
            .map_err(|e| e.wrap("unable to sync protocol mappers"))?;

        info!(client_id = %remote.client_id, mappers = count, "Protocol mappers synced");
        Ok(())
    }
}
