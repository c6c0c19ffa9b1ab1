/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/controllers/chain/put_admin_fine_grained_permissions.rs
*
* Synchronizes the fine-grained admin permissions of a client.
*
* The management-permissions flag is always pushed. When it is enabled and a
* `permission` block is declared, the policies of each declared scope are
* written onto the permission Keycloak generated for that scope under the
* `realm-management` client. All declared scopes are checked before the first
* update, so an unknown scope leaves every permission untouched.
*
* SPDX-License-Identifier: Apache-2.0
*/

use super::{ChainState, Step};
use crate::crds::KeycloakClient;
use crate::error::Error;
use crate::keycloak::{scope_permission_name, ManagementPermissions, REALM_MANAGEMENT_CLIENT};
use async_trait::async_trait;
use tracing::{debug, info};

pub struct PutAdminFineGrainedPermissions;

#[async_trait]
impl Step for PutAdminFineGrainedPermissions {
    fn name(&self) -> &'static str {
        "PutAdminFineGrainedPermissions"
    }

    async fn serve(&self, client: &KeycloakClient, state: &mut ChainState) -> Result<(), Error> {
        let spec = &client.spec;
        let realm = state.realm_name.clone();
        let client_id = state.client_id(client).await?;

        state
            .api
            .update_client_management_permissions(
                &realm,
                &client_id,
                &ManagementPermissions {
                    enabled: spec.admin_fine_grained_permissions_enabled,
                    scope_permissions: None,
                },
            )
            .await
            .map_err(|e| e.wrap("unable to update management permissions"))?;

        let permission = match (&spec.permission, spec.admin_fine_grained_permissions_enabled) {
            (Some(permission), true) => permission,
            _ => return Ok(()),
        };

        let admin_client_id = state
            .api
            .get_client_id(REALM_MANAGEMENT_CLIENT, &realm)
            .await
            .map_err(|e| e.wrap("unable to get realm-management client id"))?;
        let permissions = state
            .api
            .get_permissions(&realm, &admin_client_id)
            .await
            .map_err(|e| e.wrap("unable to get realm-management permissions"))?;
        let management = state
            .api
            .get_client_management_permissions(&realm, &client_id)
            .await
            .map_err(|e| e.wrap("unable to get client management permissions"))?;

        let existing = management.scope_permissions.unwrap_or_default();
        if let Some(unknown) = permission
            .scope_permissions
            .iter()
            .find(|scope| !existing.contains_key(&scope.name))
        {
            return Err(Error::UnknownScope(unknown.name.clone()));
        }

        for scope in &permission.scope_permissions {
            let name = scope_permission_name(&scope.name, &client_id);
            let Some(current) = permissions.get(&name) else {
                debug!(permission = %name, "Generated permission not found, skipping");
                continue;
            };

            let mut updated = current.clone();
            updated.policies = scope.policies.clone();
            state
                .api
                .update_permission(&realm, &admin_client_id, &updated)
                .await
                .map_err(|e| e.wrap(format!("unable to update permission {}", name)))?;
            info!(permission = %name, "Scope permission updated");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::keycloak_client;
    use super::*;
    use crate::keycloak::{MockKeycloakApi, PermissionRepresentation};
    use serde_json::json;
    use std::collections::{BTreeMap, HashMap};
    use std::sync::Arc;

    fn permission(name: &str) -> PermissionRepresentation {
        PermissionRepresentation {
            id: Some(format!("p-{}", name)),
            name: name.to_string(),
            ..Default::default()
        }
    }

    fn api_with_scopes(scopes: &[&str], generated: &[&str]) -> MockKeycloakApi {
        let scopes: BTreeMap<String, String> = scopes
            .iter()
            .map(|s| (s.to_string(), format!("p-{}", s)))
            .collect();
        let generated: HashMap<String, PermissionRepresentation> = generated
            .iter()
            .map(|s| {
                let name = scope_permission_name(s, "id-1");
                (name.clone(), permission(&name))
            })
            .collect();

        let mut api = MockKeycloakApi::new();
        api.expect_get_client_id()
            .withf(|client_id, _| client_id == "app")
            .returning(|_, _| Ok("id-1".to_string()));
        api.expect_get_client_id()
            .withf(|client_id, _| client_id == REALM_MANAGEMENT_CLIENT)
            .returning(|_, _| Ok("rm-1".to_string()));
        api.expect_update_client_management_permissions()
            .times(1)
            .withf(|_, id, p| id == "id-1" && p.enabled)
            .returning(|_, _, _| Ok(()));
        api.expect_get_permissions()
            .withf(|_, admin| admin == "rm-1")
            .returning(move |_, _| Ok(generated.clone()));
        api.expect_get_client_management_permissions()
            .returning(move |_, _| {
                Ok(ManagementPermissions {
                    enabled: true,
                    scope_permissions: Some(scopes.clone()),
                })
            });
        api
    }

    fn client_with_scopes(scopes: &[&str]) -> KeycloakClient {
        let scope_permissions: Vec<_> = scopes
            .iter()
            .map(|s| json!({"name": s, "policies": ["admins"]}))
            .collect();
        keycloak_client(json!({
            "clientId": "app",
            "realmRef": "main",
            "adminFineGrainedPermissionsEnabled": true,
            "permission": {"scopePermissions": scope_permissions}
        }))
    }

    #[tokio::test]
    async fn declared_scopes_get_their_policies() {
        let mut api = api_with_scopes(&["view", "manage"], &["view", "manage"]);
        api.expect_update_permission()
            .times(1)
            .withf(|_, admin, p| {
                admin == "rm-1"
                    && p.name == "view.permission.client.id-1"
                    && p.policies == vec!["admins".to_string()]
            })
            .returning(|_, _, _| Ok(()));

        let mut state = ChainState::new(Arc::new(api), "sso");
        PutAdminFineGrainedPermissions
            .serve(&client_with_scopes(&["view"]), &mut state)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unknown_scope_aborts_before_any_update() {
        let mut api = api_with_scopes(&["view"], &["view"]);
        api.expect_update_permission().never();

        let mut state = ChainState::new(Arc::new(api), "sso");
        let err = PutAdminFineGrainedPermissions
            .serve(&client_with_scopes(&["view", "token-exchange"]), &mut state)
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "scope token-exchange not found in permissions");
    }

    #[tokio::test]
    async fn missing_generated_permission_is_skipped() {
        let mut api = api_with_scopes(&["view", "manage"], &["manage"]);
        api.expect_update_permission()
            .times(1)
            .withf(|_, _, p| p.name == "manage.permission.client.id-1")
            .returning(|_, _, _| Ok(()));

        let mut state = ChainState::new(Arc::new(api), "sso");
        PutAdminFineGrainedPermissions
            .serve(&client_with_scopes(&["view", "manage"]), &mut state)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn disabled_flag_is_still_pushed() {
        let mut api = MockKeycloakApi::new();
        api.expect_get_client_id()
            .returning(|_, _| Ok("id-1".to_string()));
        api.expect_update_client_management_permissions()
            .times(1)
            .withf(|_, _, p| !p.enabled)
            .returning(|_, _, _| Ok(()));
        api.expect_get_permissions().never();
        api.expect_update_permission().never();

        let mut state = ChainState::new(Arc::new(api), "sso");
        let client = keycloak_client(json!({
            "clientId": "app",
            "realmRef": "main",
            "permission": {"scopePermissions": [{"name": "view", "policies": ["admins"]}]}
        }));

        PutAdminFineGrainedPermissions
            .serve(&client, &mut state)
            .await
            .unwrap();
    }
}
