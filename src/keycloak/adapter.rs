/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/keycloak/adapter.rs
*
* This file provides the concrete implementation of the `KeycloakApi` trait on
* top of the Keycloak admin REST API.
*
* Architecture:
* The implementation uses the `reqwest` crate for all HTTP communication.
*
* Key components:
* 1. `KeycloakAdapter::connect`: obtains an admin access token with the password
*    grant against the `master` realm's `admin-cli` client. A new adapter is
*    built for every reconciliation, so the token never outlives a cycle.
* 2. `admin_url`: URLs are assembled segment by segment, so realm names, ids and
*    role names are percent-encoded.
* 3. `send`: attaches the bearer token, records the request in the metrics and
*    turns every non-success status into `Error::KeycloakApi`.
* 4. Full-replace synchronisation of protocol mappers and service account role
*    mappings: remote entries that are not desired are removed, missing desired
*    entries are added, and matching entries are left alone so repeated runs
*    with the same input issue no writes.
*
* SPDX-License-Identifier: Apache-2.0
*/

use super::{
    ClientRepresentation, Component, KeycloakApi, ManagementPermissions,
    PermissionRepresentation, ProtocolMapperRepresentation, RealmRepresentation,
};
use crate::error::Error;
use crate::metrics;
use async_trait::async_trait;
use reqwest::{header::LOCATION, RequestBuilder, Response, Url};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct UserRepresentation {
    id: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
struct RoleRepresentation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    name: String,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

/// All role mappings of a user, as returned by `users/{id}/role-mappings`.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MappingsRepresentation {
    /// Keyed by the client's `clientId`.
    #[serde(default)]
    client_mappings: HashMap<String, ClientMappings>,
}

#[derive(Deserialize)]
struct ClientMappings {
    id: String,
    #[serde(default)]
    mappings: Vec<RoleRepresentation>,
}

/// Appends path segments to `base`, percent-encoding each one.
fn join_segments(base: &Url, segments: &[&str]) -> Result<Url, Error> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| Error::Validation(format!("Keycloak URL {} can not be a base", base)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// An authenticated client for the Keycloak admin REST API.
pub struct KeycloakAdapter {
    client: reqwest::Client,
    /// Example: "https://keycloak.example.com"
    base_url: Url,
    token: String,
}

impl KeycloakAdapter {
    /// Builds the HTTP client and logs in as the given admin user.
    pub async fn connect(
        url: &str,
        username: &str,
        password: &str,
        timeout: Duration,
    ) -> Result<Self, Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let base_url = Url::parse(url)
            .map_err(|e| Error::Validation(format!("invalid Keycloak URL {}: {}", url, e)))?;
        let token_url = join_segments(
            &base_url,
            &["realms", "master", "protocol", "openid-connect", "token"],
        )?;

        let response = client
            .post(token_url.as_str())
            .form(&[
                ("grant_type", "password"),
                ("client_id", "admin-cli"),
                ("username", username),
                ("password", password),
            ])
            .send()
            .await?;
        let token: TokenResponse = check_status(response, token_url.as_str())
            .await?
            .json()
            .await?;

        debug!(url = %base_url, "Authenticated against Keycloak");
        Ok(Self {
            client,
            base_url,
            token: token.access_token,
        })
    }

    /// `{base}/admin/realms/{realm}/{segments..}`
    fn admin_url(&self, realm: &str, segments: &[&str]) -> Result<Url, Error> {
        let realm_root = join_segments(&self.base_url, &["admin", "realms", realm])?;
        join_segments(&realm_root, segments)
    }

    async fn send(&self, request: RequestBuilder, url: &Url) -> Result<Response, Error> {
        let response = request.bearer_auth(&self.token).send().await;
        let outcome = match &response {
            Ok(r) if r.status().is_success() => "success",
            Ok(_) => "error_status",
            Err(_) => "transport_error",
        };
        metrics::KEYCLOAK_REQUESTS_TOTAL
            .with_label_values(&[outcome])
            .inc();
        check_status(response?, url.as_str()).await
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &Url) -> Result<T, Error> {
        let response = self.send(self.client.get(url.as_str()), url).await?;
        Ok(response.json().await?)
    }

    async fn post_created<T: Serialize + ?Sized>(&self, url: &Url, body: &T) -> Result<String, Error> {
        let response = self
            .send(self.client.post(url.as_str()).json(body), url)
            .await?;
        created_id(&response).ok_or_else(|| Error::KeycloakApi {
            status: response.status().as_u16(),
            url: url.to_string(),
            body: "response carries no Location header".to_string(),
        })
    }

    async fn service_account_user_id(&self, realm: &str, client_id: &str) -> Result<String, Error> {
        let url = self.admin_url(realm, &["clients", client_id, "service-account-user"])?;
        let user: UserRepresentation = self.get_json(&url).await?;
        Ok(user.id)
    }

    /// Replaces the roles mapped at `mapping_url` with `desired`, looking each
    /// missing role up below `roles_url`.
    async fn sync_role_mapping(
        &self,
        mapping_url: &Url,
        roles_url: &Url,
        desired: &[String],
    ) -> Result<(), Error> {
        let current: Vec<RoleRepresentation> = self.get_json(mapping_url).await?;

        let stale: Vec<&RoleRepresentation> = current
            .iter()
            .filter(|role| !desired.contains(&role.name))
            .collect();
        if !stale.is_empty() {
            self.send(self.client.delete(mapping_url.as_str()).json(&stale), mapping_url)
                .await?;
        }

        let mut missing = Vec::new();
        for name in desired {
            if current.iter().any(|role| &role.name == name) {
                continue;
            }
            let role_url = join_segments(roles_url, &[name.as_str()])?;
            let role: RoleRepresentation = self.get_json(&role_url).await?;
            missing.push(role);
        }
        if !missing.is_empty() {
            self.send(self.client.post(mapping_url.as_str()).json(&missing), mapping_url)
                .await?;
        }

        Ok(())
    }

    /// Removes the user's roles of every client that is not a key of `kept`.
    async fn remove_unlisted_client_roles(
        &self,
        realm: &str,
        user_id: &str,
        kept: &BTreeMap<String, Vec<String>>,
    ) -> Result<(), Error> {
        let url = self.admin_url(realm, &["users", user_id, "role-mappings"])?;
        let mappings: MappingsRepresentation = self.get_json(&url).await?;

        for (client_id, client) in &mappings.client_mappings {
            if kept.contains_key(client_id) || client.mappings.is_empty() {
                continue;
            }
            let mapping_url = self.admin_url(
                realm,
                &["users", user_id, "role-mappings", "clients", &client.id],
            )?;
            self.send(
                self.client
                    .delete(mapping_url.as_str())
                    .json(&client.mappings),
                &mapping_url,
            )
            .await?;
            info!(%client_id, "Removed service account roles of an unlisted client");
        }
        Ok(())
    }
}

async fn check_status(response: Response, url: &str) -> Result<Response, Error> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Failed to read error body.".to_string());
    Err(Error::KeycloakApi {
        status,
        url: url.to_string(),
        body,
    })
}

/// Keycloak answers a create with `201` and the new entity's URL in `Location`.
fn created_id(response: &Response) -> Option<String> {
    id_from_location(response.headers().get(LOCATION)?.to_str().ok()?)
}

fn id_from_location(location: &str) -> Option<String> {
    location
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

#[async_trait]
impl KeycloakApi for KeycloakAdapter {
    async fn get_realm(&self, realm: &str) -> Result<RealmRepresentation, Error> {
        self.get_json(&self.admin_url(realm, &[])?).await
    }

    async fn get_component(&self, realm: &str, name: &str) -> Result<Component, Error> {
        let url = self.admin_url(realm, &["components"])?;
        let response = self
            .send(self.client.get(url.as_str()).query(&[("name", name)]), &url)
            .await?;
        let components: Vec<Component> = response.json().await?;

        components
            .into_iter()
            .find(|c| c.name == name)
            .ok_or_else(|| Error::NotFound(format!("component \"{}\"", name)))
    }

    async fn create_component(&self, realm: &str, component: &Component) -> Result<String, Error> {
        self.post_created(&self.admin_url(realm, &["components"])?, component)
            .await
    }

    async fn update_component(&self, realm: &str, component: &Component) -> Result<(), Error> {
        let id = component
            .id
            .as_deref()
            .ok_or_else(|| Error::Validation("component id is required for update".to_string()))?;
        let url = self.admin_url(realm, &["components", id])?;
        self.send(self.client.put(url.as_str()).json(component), &url)
            .await?;
        Ok(())
    }

    async fn delete_component(&self, realm: &str, id: &str) -> Result<(), Error> {
        let url = self.admin_url(realm, &["components", id])?;
        self.send(self.client.delete(url.as_str()), &url).await?;
        Ok(())
    }

    async fn get_client_id(&self, client_id: &str, realm: &str) -> Result<String, Error> {
        let url = self.admin_url(realm, &["clients"])?;
        let response = self
            .send(self.client.get(url.as_str()).query(&[("clientId", client_id)]), &url)
            .await?;
        let clients: Vec<ClientRepresentation> = response.json().await?;

        clients
            .into_iter()
            .find(|c| c.client_id == client_id)
            .and_then(|c| c.id)
            .ok_or_else(|| Error::NotFound(format!("client \"{}\"", client_id)))
    }

    async fn create_client(&self, realm: &str, client: &ClientRepresentation) -> Result<String, Error> {
        self.post_created(&self.admin_url(realm, &["clients"])?, client)
            .await
    }

    async fn update_client(&self, realm: &str, client: &ClientRepresentation) -> Result<(), Error> {
        let id = client
            .id
            .as_deref()
            .ok_or_else(|| Error::Validation("client id is required for update".to_string()))?;
        let url = self.admin_url(realm, &["clients", id])?;
        self.send(self.client.put(url.as_str()).json(client), &url)
            .await?;
        Ok(())
    }

    async fn delete_client(&self, realm: &str, id: &str) -> Result<(), Error> {
        let url = self.admin_url(realm, &["clients", id])?;
        self.send(self.client.delete(url.as_str()), &url).await?;
        Ok(())
    }

    async fn sync_client_protocol_mappers(
        &self,
        realm: &str,
        client: &ClientRepresentation,
        mappers: Vec<ProtocolMapperRepresentation>,
    ) -> Result<(), Error> {
        let id = match &client.id {
            Some(id) => id.clone(),
            None => self.get_client_id(&client.client_id, realm).await?,
        };
        let models_url = self.admin_url(realm, &["clients", &id, "protocol-mappers", "models"])?;
        let current: Vec<ProtocolMapperRepresentation> = self.get_json(&models_url).await?;

        for existing in &current {
            if mappers.iter().any(|m| m.same_definition(existing)) {
                continue;
            }
            if let Some(mapper_id) = &existing.id {
                let url = join_segments(&models_url, &[mapper_id.as_str()])?;
                self.send(self.client.delete(url.as_str()), &url).await?;
            }
        }

        for desired in &mappers {
            if current.iter().any(|m| m.same_definition(desired)) {
                continue;
            }
            self.send(self.client.post(models_url.as_str()).json(desired), &models_url)
                .await?;
        }

        Ok(())
    }

    async fn sync_service_account_roles(
        &self,
        realm: &str,
        client_id: &str,
        realm_roles: Vec<String>,
        client_roles: BTreeMap<String, Vec<String>>,
    ) -> Result<(), Error> {
        let user_id = self.service_account_user_id(realm, client_id).await?;

        let mapping_url = self.admin_url(realm, &["users", &user_id, "role-mappings", "realm"])?;
        let roles_url = self.admin_url(realm, &["roles"])?;
        self.sync_role_mapping(&mapping_url, &roles_url, &realm_roles)
            .await?;

        for (target_client, roles) in &client_roles {
            let target_id = self.get_client_id(target_client, realm).await?;
            let mapping_url = self.admin_url(
                realm,
                &["users", &user_id, "role-mappings", "clients", &target_id],
            )?;
            let roles_url = self.admin_url(realm, &["clients", &target_id, "roles"])?;
            self.sync_role_mapping(&mapping_url, &roles_url, roles).await?;
        }

        self.remove_unlisted_client_roles(realm, &user_id, &client_roles)
            .await
    }

    async fn update_client_management_permissions(
        &self,
        realm: &str,
        client_id: &str,
        permissions: &ManagementPermissions,
    ) -> Result<(), Error> {
        let url = self.admin_url(realm, &["clients", client_id, "management", "permissions"])?;
        self.send(self.client.put(url.as_str()).json(permissions), &url)
            .await?;
        Ok(())
    }

    async fn get_client_management_permissions(
        &self,
        realm: &str,
        client_id: &str,
    ) -> Result<ManagementPermissions, Error> {
        let url = self.admin_url(realm, &["clients", client_id, "management", "permissions"])?;
        self.get_json(&url).await
    }

    async fn get_permissions(
        &self,
        realm: &str,
        admin_client_id: &str,
    ) -> Result<HashMap<String, PermissionRepresentation>, Error> {
        let url = self.admin_url(
            realm,
            &["clients", admin_client_id, "authz", "resource-server", "permission"],
        )?;
        let response = self
            .send(self.client.get(url.as_str()).query(&[("max", "-1")]), &url)
            .await?;
        let permissions: Vec<PermissionRepresentation> = response.json().await?;

        Ok(permissions
            .into_iter()
            .map(|p| (p.name.clone(), p))
            .collect())
    }

    async fn update_permission(
        &self,
        realm: &str,
        admin_client_id: &str,
        permission: &PermissionRepresentation,
    ) -> Result<(), Error> {
        let id = permission
            .id
            .as_deref()
            .ok_or_else(|| Error::Validation(format!("permission {} has no id", permission.name)))?;
        let kind = permission
            .extra
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("scope");
        let url = self.admin_url(
            realm,
            &["clients", admin_client_id, "authz", "resource-server", "permission", kind, id],
        )?;
        self.send(self.client.put(url.as_str()).json(permission), &url)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use serde_json::json;

    fn adapter(base_url: &str) -> KeycloakAdapter {
        KeycloakAdapter {
            client: reqwest::Client::new(),
            base_url: Url::parse(base_url).unwrap(),
            token: "t".to_string(),
        }
    }

    #[test]
    fn id_is_taken_from_the_last_location_segment() {
        assert_eq!(
            id_from_location("https://kc/admin/realms/main/components/4d2c-11"),
            Some("4d2c-11".to_string())
        );
        assert_eq!(
            id_from_location("https://kc/admin/realms/main/clients/abc/"),
            Some("abc".to_string())
        );
        assert_eq!(id_from_location(""), None);
    }

    #[test]
    fn role_representation_round_trips_extra_fields() {
        let role: RoleRepresentation = serde_json::from_value(serde_json::json!({
            "id": "r1",
            "name": "offline_access",
            "composite": false,
            "clientRole": false
        }))
        .unwrap();
        let back = serde_json::to_value(&role).unwrap();
        assert_eq!(back["composite"], false);
        assert_eq!(back["name"], "offline_access");
    }

    #[test]
    fn names_are_encoded_as_single_path_segments() {
        let adapter = adapter("https://kc.example.com/");
        let url = adapter.admin_url("my realm", &["roles", "a/b"]).unwrap();
        assert_eq!(url.path(), "/admin/realms/my%20realm/roles/a%2Fb");

        let roles_url = adapter.admin_url("sso", &["roles"]).unwrap();
        let role_url = join_segments(&roles_url, &["a?b"]).unwrap();
        assert_eq!(role_url.path(), "/admin/realms/sso/roles/a%3Fb");
        assert_eq!(role_url.query(), None);
    }

    #[test]
    fn base_path_is_kept() {
        let adapter = adapter("https://kc.example.com/auth");
        let url = adapter.admin_url("sso", &["clients"]).unwrap();
        assert_eq!(url.as_str(), "https://kc.example.com/auth/admin/realms/sso/clients");
    }

    #[tokio::test]
    async fn login_posts_the_password_grant_to_the_master_realm() {
        let mut server = Server::new_async().await;
        let token = server
            .mock("POST", "/realms/master/protocol/openid-connect/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "password".into()),
                Matcher::UrlEncoded("client_id".into(), "admin-cli".into()),
                Matcher::UrlEncoded("username".into(), "admin".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({"access_token": "secret-token"}).to_string())
            .create_async()
            .await;

        let adapter =
            KeycloakAdapter::connect(&server.url(), "admin", "pass", Duration::from_secs(5))
                .await
                .unwrap();

        assert_eq!(adapter.token, "secret-token");
        token.assert_async().await;
    }

    #[tokio::test]
    async fn roles_of_unlisted_clients_are_removed() {
        let mut server = Server::new_async().await;
        let _user = server
            .mock("GET", "/admin/realms/sso/clients/id-1/service-account-user")
            .with_header("content-type", "application/json")
            .with_body(json!({"id": "u-1"}).to_string())
            .create_async()
            .await;
        let _realm_roles = server
            .mock("GET", "/admin/realms/sso/users/u-1/role-mappings/realm")
            .with_header("content-type", "application/json")
            .with_body("[]")
            .create_async()
            .await;
        let _all_roles = server
            .mock("GET", "/admin/realms/sso/users/u-1/role-mappings")
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "realmMappings": [],
                    "clientMappings": {
                        "broker": {
                            "id": "b-1",
                            "client": "broker",
                            "mappings": [{"id": "r-9", "name": "read-token", "composite": false}]
                        }
                    }
                })
                .to_string(),
            )
            .create_async()
            .await;
        let removed = server
            .mock("DELETE", "/admin/realms/sso/users/u-1/role-mappings/clients/b-1")
            .match_body(Matcher::Json(json!([
                {"id": "r-9", "name": "read-token", "composite": false}
            ])))
            .with_status(204)
            .expect(1)
            .create_async()
            .await;

        adapter(&server.url())
            .sync_service_account_roles("sso", "id-1", vec![], BTreeMap::new())
            .await
            .unwrap();

        removed.assert_async().await;
    }
}
