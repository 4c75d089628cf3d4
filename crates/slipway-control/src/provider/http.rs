//! HTTP client for the machine provider API.

use std::time::Duration;

use reqwest::{Client, StatusCode};

use crate::config::ProviderConfig;
use crate::error::{ControlError, ControlResult};
use crate::types::{MachineId, MachineSpec};

use super::{Machine, MachineProvider, NetworkAddress, NetworkScope};

/// Raw machine payload from the provider API.
#[derive(serde::Deserialize)]
struct RawMachine {
    id: i64,
    name: String,
    #[serde(default)]
    networks: Vec<RawNetwork>,
}

#[derive(serde::Deserialize)]
struct RawNetwork {
    address: String,
    #[serde(rename = "type")]
    scope: String,
}

#[derive(serde::Deserialize)]
struct MachineEnvelope {
    machine: RawMachine,
}

#[derive(serde::Deserialize)]
struct MachineListEnvelope {
    machines: Vec<RawMachine>,
}

#[derive(serde::Serialize)]
struct CreateMachineRequest<'a> {
    name: &'a str,
    region: &'a str,
    size: &'a str,
    image: &'a str,
}

impl From<RawMachine> for Machine {
    fn from(raw: RawMachine) -> Self {
        Self {
            id: MachineId::new(raw.id),
            name: raw.name,
            networks: raw
                .networks
                .into_iter()
                .map(|n| NetworkAddress {
                    address: n.address,
                    scope: if n.scope == "public" {
                        NetworkScope::Public
                    } else {
                        NetworkScope::Private
                    },
                })
                .collect(),
        }
    }
}

/// HTTP client for the machine provider service.
#[derive(Debug, Clone)]
pub struct HttpProvider {
    client: Client,
    base_url: String,
    token: String,
}

impl HttpProvider {
    /// Create a new provider client from configuration.
    pub fn new(config: &ProviderConfig) -> ControlResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(ControlError::Http)?;

        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_owned(),
            token: config.api_token.clone(),
        })
    }
}

#[async_trait::async_trait]
impl MachineProvider for HttpProvider {
    async fn create_machine(&self, spec: &MachineSpec) -> ControlResult<Machine> {
        let url = format!("{}/machines", self.base_url);
        let body = CreateMachineRequest {
            name: &spec.name,
            region: &spec.region,
            size: &spec.size,
            image: &spec.image,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(ControlError::Http)?;

        if !response.status().is_success() {
            return Err(ControlError::provider(format!(
                "failed to create machine: {}",
                response.status()
            )));
        }

        let envelope: MachineEnvelope = response.json().await.map_err(ControlError::Http)?;
        Ok(envelope.machine.into())
    }

    async fn get_machine(&self, id: MachineId) -> ControlResult<Machine> {
        let url = format!("{}/machines/{}", self.base_url, id.as_i64());
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(ControlError::Http)?;

        if !response.status().is_success() {
            return Err(ControlError::provider(format!(
                "failed to get machine {id}: {}",
                response.status()
            )));
        }

        let envelope: MachineEnvelope = response.json().await.map_err(ControlError::Http)?;
        Ok(envelope.machine.into())
    }

    async fn find_machine(&self, name: &str) -> ControlResult<Option<Machine>> {
        let url = format!("{}/machines", self.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .query(&[("name", name)])
            .send()
            .await
            .map_err(ControlError::Http)?;

        if !response.status().is_success() {
            return Err(ControlError::provider(format!(
                "failed to list machines: {}",
                response.status()
            )));
        }

        let envelope: MachineListEnvelope = response.json().await.map_err(ControlError::Http)?;
        Ok(envelope
            .machines
            .into_iter()
            .find(|m| m.name == name)
            .map(Machine::from))
    }

    async fn delete_machine(&self, id: MachineId) -> ControlResult<()> {
        let url = format!("{}/machines/{}", self.base_url, id.as_i64());
        let response = self
            .client
            .delete(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(ControlError::Http)?;

        match response.status() {
            // A machine already gone counts as deleted.
            StatusCode::NO_CONTENT | StatusCode::OK | StatusCode::NOT_FOUND => Ok(()),
            status => Err(ControlError::provider(format!(
                "failed to delete machine {id}: {status}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_creation() {
        let config = ProviderConfig::default();
        let client = HttpProvider::new(&config);
        assert!(client.is_ok());
    }

    #[test]
    fn raw_machine_parsing() {
        let json = r#"{
            "machine": {
                "id": 42,
                "name": "app-job1",
                "networks": [
                    {"address": "10.0.0.5", "type": "private"},
                    {"address": "203.0.113.7", "type": "public"}
                ]
            }
        }"#;

        let envelope: MachineEnvelope = serde_json::from_str(json).unwrap();
        let machine: Machine = envelope.machine.into();

        assert_eq!(machine.id, MachineId::new(42));
        assert_eq!(machine.public_address(), Some("203.0.113.7"));
    }

    #[test]
    fn machine_without_networks() {
        let json = r#"{"machine": {"id": 7, "name": "app-job2"}}"#;
        let envelope: MachineEnvelope = serde_json::from_str(json).unwrap();
        let machine: Machine = envelope.machine.into();

        assert!(!machine.has_network());
        assert!(machine.public_address().is_none());
    }
}
