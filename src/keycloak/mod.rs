/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/keycloak/mod.rs
*
* This module defines the boundary between the reconcilers and the Keycloak
* admin REST API.
*
* Architecture:
* - `KeycloakApi` is the abstraction every reconciler and chain step talks to.
*   It is an async trait so the production HTTP implementation and the mocks
*   used in tests are interchangeable behind an `Arc<dyn KeycloakApi>`.
* - The representation structs mirror the JSON bodies Keycloak accepts and
*   returns. Only the fields the operator manages are typed; everything else is
*   carried along untouched where a full-replace update would otherwise drop it.
* - Lookups report a missing entity as `Error::NotFound` (or a 404
*   `Error::KeycloakApi`), both classified as an expected absence.
*
* SPDX-License-Identifier: Apache-2.0
*/

pub mod adapter;

use crate::error::Error;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

#[cfg(test)]
use mockall::automock;

pub use adapter::KeycloakAdapter;

/// Name of the built-in client that hosts generated fine-grained permissions.
pub const REALM_MANAGEMENT_CLIENT: &str = "realm-management";

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RealmRepresentation {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub realm: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Component {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub provider_id: String,
    pub provider_type: String,
    #[serde(default)]
    pub config: BTreeMap<String, Vec<String>>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientRepresentation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub client_id: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub public_client: bool,
    #[serde(default)]
    pub protocol: String,
    #[serde(default)]
    pub root_url: String,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    #[serde(default)]
    pub direct_access_grants_enabled: bool,
    #[serde(default)]
    pub service_accounts_enabled: bool,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolMapperRepresentation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub protocol: String,
    pub protocol_mapper: String,
    #[serde(default)]
    pub config: BTreeMap<String, String>,
}

impl ProtocolMapperRepresentation {
    /// Two mappers are the same when everything but the server-assigned id matches.
    pub fn same_definition(&self, other: &Self) -> bool {
        self.name == other.name
            && self.protocol == other.protocol
            && self.protocol_mapper == other.protocol_mapper
            && self.config == other.config
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManagementPermissions {
    pub enabled: bool,
    /// Scope name to generated permission id. Only the keys are relied upon.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_permissions: Option<BTreeMap<String, String>>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRepresentation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub policies: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Name of the permission Keycloak generates for `scope` on the client with `client_id`.
pub fn scope_permission_name(scope: &str, client_id: &str) -> String {
    format!("{}.permission.client.{}", scope, client_id)
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait KeycloakApi: Send + Sync {
    async fn get_realm(&self, realm: &str) -> Result<RealmRepresentation, Error>;

    async fn get_component(&self, realm: &str, name: &str) -> Result<Component, Error>;
    /// Returns the id Keycloak assigned to the new component.
    async fn create_component(&self, realm: &str, component: &Component) -> Result<String, Error>;
    async fn update_component(&self, realm: &str, component: &Component) -> Result<(), Error>;
    async fn delete_component(&self, realm: &str, id: &str) -> Result<(), Error>;

    /// Resolves the internal id of the client whose `clientId` is `client_id`.
    async fn get_client_id(&self, client_id: &str, realm: &str) -> Result<String, Error>;
    async fn create_client(&self, realm: &str, client: &ClientRepresentation) -> Result<String, Error>;
    async fn update_client(&self, realm: &str, client: &ClientRepresentation) -> Result<(), Error>;
    async fn delete_client(&self, realm: &str, id: &str) -> Result<(), Error>;

    /// Makes the client's protocol mappers exactly `mappers`.
    async fn sync_client_protocol_mappers(
        &self,
        realm: &str,
        client: &ClientRepresentation,
        mappers: Vec<ProtocolMapperRepresentation>,
    ) -> Result<(), Error>;

    /// Makes the service account's realm roles and per-client roles exactly the given sets.
    async fn sync_service_account_roles(
        &self,
        realm: &str,
        client_id: &str,
        realm_roles: Vec<String>,
        client_roles: BTreeMap<String, Vec<String>>,
    ) -> Result<(), Error>;

    async fn update_client_management_permissions(
        &self,
        realm: &str,
        client_id: &str,
        permissions: &ManagementPermissions,
    ) -> Result<(), Error>;
    async fn get_client_management_permissions(
        &self,
        realm: &str,
        client_id: &str,
    ) -> Result<ManagementPermissions, Error>;

    /// All authorization permissions of `admin_client_id`, keyed by name.
    async fn get_permissions(
        &self,
        realm: &str,
        admin_client_id: &str,
    ) -> Result<HashMap<String, PermissionRepresentation>, Error>;
    async fn update_permission(
        &self,
        realm: &str,
        admin_client_id: &str,
        permission: &PermissionRepresentation,
    ) -> Result<(), Error>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn permission_name_follows_keycloak_convention() {
        assert_eq!(
            scope_permission_name("manage", "7f1c"),
            "manage.permission.client.7f1c"
        );
    }

    #[test]
    fn permission_keeps_unknown_fields() {
        let permission: PermissionRepresentation = serde_json::from_value(json!({
            "id": "p1",
            "name": "view.permission.client.7f1c",
            "type": "scope",
            "decisionStrategy": "UNANIMOUS"
        }))
        .unwrap();

        assert!(permission.policies.is_empty());
        let back = serde_json::to_value(&permission).unwrap();
        assert_eq!(back["type"], "scope");
        assert_eq!(back["decisionStrategy"], "UNANIMOUS");
    }

    #[test]
    fn mapper_identity_ignores_server_id() {
        let desired = ProtocolMapperRepresentation {
            id: None,
            name: "groups".into(),
            protocol: "openid-connect".into(),
            protocol_mapper: "oidc-group-membership-mapper".into(),
            config: BTreeMap::from([("claim.name".to_string(), "groups".to_string())]),
        };
        let remote = ProtocolMapperRepresentation {
            id: Some("m-1".into()),
            ..desired.clone()
        };

        assert!(desired.same_definition(&remote));
    }
}
