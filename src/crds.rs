/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/crds.rs
*
* This file defines the Rust data structures that correspond to our Custom
* Resource Definitions (CRDs). By using the `kube::CustomResource` derive macro,
* we create a strongly-typed representation of the custom APIs this operator
* consumes and reconciles.
*
* Architecture:
* - `Keycloak` and `KeycloakRealm` are inputs only: they tell the operator how to
*   reach a Keycloak server and which realm a child resource lives in.
* - `KeycloakRealmComponent` and `KeycloakClient` are reconciled. Both report
*   their progress through the shared `KeycloakResourceStatus`.
* - The `#[kube(...)]` attribute metadata MUST exactly match the installed CRD
*   manifests (group, version, kind).
* - `serde` attributes map between Rust `snake_case` and Kubernetes `camelCase`.
*
* SPDX-License-Identifier: Apache-2.0
*/

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const REALM_KIND: &str = "KeycloakRealm";
pub const REALM_COMPONENT_KIND: &str = "KeycloakRealmComponent";

// --- Keycloak connection ---

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "v1.edp.epam.com",
    version = "v1",
    kind = "Keycloak",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct KeycloakSpec {
    /// Base URL of the Keycloak server, e.g. `https://keycloak.example.com`.
    pub url: String,
    /// Name of a Secret in the same namespace with `username` and `password` keys.
    pub secret: String,
}

// --- KeycloakRealm ---

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "v1.edp.epam.com",
    version = "v1",
    kind = "KeycloakRealm",
    namespaced,
    shortname = "kcrealm"
)]
#[serde(rename_all = "camelCase")]
pub struct KeycloakRealmSpec {
    pub realm_name: String,
    /// Name of the `Keycloak` resource hosting this realm.
    pub keycloak_ref: String,
}

// --- Shared status ---

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KeycloakResourceStatus {
    /// Last error message, or `OK` after a successful reconciliation.
    #[serde(default)]
    pub value: String,
    /// Identifier of the remote entity once it has been created or found.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Number of consecutive failed reconciliations.
    #[serde(default)]
    pub failure_count: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reconcile_time: Option<String>,
}

// --- KeycloakRealmComponent ---

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "v1.edp.epam.com",
    version = "v1",
    kind = "KeycloakRealmComponent",
    namespaced,
    status = "KeycloakResourceStatus",
    printcolumn = r#"{"name":"Status", "type":"string", "jsonPath":".status.value"}"#,
    printcolumn = r#"{"name":"Failures", "type":"integer", "jsonPath":".status.failureCount"}"#,
    shortname = "kccomponent"
)]
#[serde(rename_all = "camelCase")]
pub struct KeycloakRealmComponentSpec {
    /// Component name, unique within its parent.
    pub name: String,
    /// Name of the `KeycloakRealm` resource this component belongs to.
    pub realm_ref: String,
    pub provider_id: String,
    pub provider_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<BTreeMap<String, Vec<String>>>,
    /// Parent of the component. Defaults to the realm when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_ref: Option<ParentRef>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ParentRef {
    /// `KeycloakRealm` or `KeycloakRealmComponent`.
    pub kind: String,
    pub name: String,
}

/// What a [`ParentRef`] points at, decided once from its `kind` string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParentTarget<'a> {
    Realm(&'a str),
    Component(&'a str),
    Unsupported(&'a str),
}

impl ParentRef {
    pub fn target(&self) -> ParentTarget<'_> {
        match self.kind.as_str() {
            REALM_KIND => ParentTarget::Realm(&self.name),
            REALM_COMPONENT_KIND => ParentTarget::Component(&self.name),
            other => ParentTarget::Unsupported(other),
        }
    }
}

// --- KeycloakClient ---

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "v1.edp.epam.com",
    version = "v1",
    kind = "KeycloakClient",
    namespaced,
    status = "KeycloakResourceStatus",
    printcolumn = r#"{"name":"Status", "type":"string", "jsonPath":".status.value"}"#,
    printcolumn = r#"{"name":"Failures", "type":"integer", "jsonPath":".status.failureCount"}"#,
    shortname = "kcclient"
)]
#[serde(rename_all = "camelCase")]
pub struct KeycloakClientSpec {
    pub client_id: String,
    pub realm_ref: String,
    #[serde(default)]
    pub public: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_protocol")]
    pub protocol: String,
    #[serde(default)]
    pub web_url: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub redirect_uris: Vec<String>,
    #[serde(default)]
    pub direct_access: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol_mappers: Option<Vec<ProtocolMapper>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account: Option<ServiceAccount>,
    #[serde(default)]
    pub admin_fine_grained_permissions_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission: Option<Permission>,
}

fn default_true() -> bool {
    true
}

fn default_protocol() -> String {
    "openid-connect".to_string()
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolMapper {
    pub name: String,
    #[serde(default = "default_protocol")]
    pub protocol: String,
    pub protocol_mapper: String,
    #[serde(default)]
    pub config: BTreeMap<String, String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAccount {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub realm_roles: Vec<String>,
    #[serde(default)]
    pub client_roles: Vec<ClientRoles>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientRoles {
    pub client_id: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Permission {
    #[serde(default)]
    pub scope_permissions: Vec<ScopePermission>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScopePermission {
    /// Administrative operation, e.g. `manage`, `configure`, `view`.
    pub name: String,
    #[serde(default)]
    pub policies: Vec<String>,
}
