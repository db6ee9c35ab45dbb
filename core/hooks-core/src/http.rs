//! Blocking HTTP clients for talking to running servers.
//!
//! Used from the hook CLI, which is synchronous and short-lived.

use cc_hooks_protocol::{HealthResponse, InstanceId, LastEventResponse};
use reqwest::blocking::Client;
use std::time::Duration;
use tracing::debug;

use crate::error::{HooksError, Result};
use crate::launcher::HealthProbe;
use crate::shutdown::InstanceControl;

pub fn base_url(host: &str, port: u16) -> String {
    format!("http://{}:{}", host, port)
}

fn client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(HooksError::http("Failed to build HTTP client"))
}

pub struct HttpHealthProbe {
    client: Client,
}

impl HttpHealthProbe {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: client(timeout)?,
        })
    }
}

impl HealthProbe for HttpHealthProbe {
    fn health(&self, host: &str, port: u16) -> Option<HealthResponse> {
        let url = format!("{}/health", base_url(host, port));
        match self.client.get(&url).send() {
            Ok(response) if response.status().is_success() => response.json().ok(),
            Ok(response) => {
                debug!(port, status = %response.status(), "Health check rejected");
                None
            }
            Err(_) => None,
        }
    }
}

pub struct HttpInstanceControl {
    client: Client,
}

impl HttpInstanceControl {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: client(timeout)?,
        })
    }
}

impl InstanceControl for HttpInstanceControl {
    fn has_pending(&self, host: &str, port: u16, instance_id: &InstanceId) -> Result<bool> {
        let url = format!("{}/instances/{}/last-event", base_url(host, port), instance_id);
        let response: LastEventResponse = self
            .client
            .get(&url)
            .send()
            .and_then(|response| response.error_for_status())
            .map_err(HooksError::http("Failed to query last event"))?
            .json()
            .map_err(HooksError::http("Failed to decode last event"))?;
        Ok(response.has_pending)
    }

    fn request_shutdown(&self, host: &str, port: u16) -> Result<()> {
        let url = format!("{}/shutdown", base_url(host, port));
        self.client
            .post(&url)
            .send()
            .and_then(|response| response.error_for_status())
            .map_err(HooksError::http("Failed to request shutdown"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn closed_port_has_no_health() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("addr").port();
        drop(listener);

        let probe = HttpHealthProbe::new(Duration::from_millis(200)).expect("client");
        assert!(probe.health("127.0.0.1", port).is_none());

        let control = HttpInstanceControl::new(Duration::from_millis(200)).expect("client");
        assert!(control
            .has_pending("127.0.0.1", port, &InstanceId::new(1, port))
            .is_err());
        assert!(control.request_shutdown("127.0.0.1", port).is_err());
    }
}
