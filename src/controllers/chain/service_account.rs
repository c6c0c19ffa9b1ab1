/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/controllers/chain/service_account.rs
*
* Converges the role assignments of the client's service-account user.
* Skipped unless `serviceAccount.enabled` is set.
*
* SPDX-License-Identifier: Apache-2.0
*/

use super::{ChainState, Step};
use crate::crds::KeycloakClient;
use crate::error::Error;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::{debug, info};

pub struct ServiceAccount;

fn enabled(client: &KeycloakClient) -> bool {
    client
        .spec
        .service_account
        .as_ref()
        .is_some_and(|sa| sa.enabled)
}

#[async_trait]
impl Step for ServiceAccount {
    fn name(&self) -> &'static str {
        "ServiceAccount"
    }

    fn validate(&self, client: &KeycloakClient) -> Result<(), Error> {
        if enabled(client) && client.spec.public {
            return Err(Error::ServiceAccountOnPublicClient);
        }
        Ok(())
    }

    async fn serve(&self, client: &KeycloakClient, state: &mut ChainState) -> Result<(), Error> {
        let account = match client.spec.service_account.as_ref() {
            Some(account) if account.enabled => account,
            _ => {
                debug!("Service account disabled, skipping");
                return Ok(());
            }
        };
        self.validate(client)?;

        // A client listed twice keeps only its last entry.
        let client_roles: BTreeMap<String, Vec<String>> = account
            .client_roles
            .iter()
            .map(|entry| (entry.client_id.clone(), entry.roles.clone()))
            .collect();

        let id = state.client_id(client).await?;
        state
            .api
            .sync_service_account_roles(
                &state.realm_name,
                &id,
                account.realm_roles.clone(),
                client_roles,
            )
            .await
            .map_err(|e| e.wrap("unable to sync service account roles"))?;

        info!(client_id = %client.spec.client_id, "Service account roles synced");
        Ok(())
    }
}
