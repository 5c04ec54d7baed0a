/*!
HTTP transport seam for the REST vault backend.

[`KmeTransport`] carries one request to the KME and returns the raw status
and body; the backend owns URL building and JSON decoding. The production
transport is [`HttpsTransport`], a blocking reqwest client with mutual TLS.
*/

use std::time::Duration;

use log::{debug, error};
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Certificate, Identity};

use crate::core::backend::Role;
use crate::core::constants::rest::DEFAULT_TIMEOUT_SECS;
use crate::core::error::{Error, Result};
use crate::vault::credentials::CredentialStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// One request to a KME
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KmeRequest {
    pub method: Method,
    pub url: String,
    /// JSON body for POST requests
    pub body: Option<String>,
}

/// Raw KME answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KmeResponse {
    pub status: u16,
    pub body: String,
}

/// Carries requests to the KME with the credentials of `role`
pub trait KmeTransport: Send {
    fn execute(&self, request: &KmeRequest, role: Role) -> Result<KmeResponse>;
}

/// Blocking HTTPS transport with per-role client certificates
pub struct HttpsTransport {
    credentials: CredentialStore,
    timeout: Duration,
}

impl HttpsTransport {
    pub fn new(credentials: CredentialStore) -> Self {
        Self {
            credentials,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build a client for `role`, reading its credential files
    fn client(&self, role: Role) -> Result<Client> {
        let loaded = self.credentials.resolve(role)?.load()?;
        let identity = Identity::from_pem(&loaded.identity_pem)
            .map_err(|err| Error::Credentials(format!("invalid {role} certificate or key: {err}")))?;
        let ca = Certificate::from_pem(&loaded.ca_pem)
            .map_err(|err| Error::Credentials(format!("invalid {role} CA certificate: {err}")))?;

        Client::builder()
            .use_rustls_tls()
            .identity(identity)
            .add_root_certificate(ca)
            .timeout(self.timeout)
            .build()
            .map_err(|err| Error::Transport(format!("failed to build HTTPS client: {err}")))
    }

    fn map_err(&self, err: reqwest::Error) -> Error {
        if err.is_timeout() {
            Error::Timeout(self.timeout.as_millis() as u64)
        } else {
            Error::Transport(err.to_string())
        }
    }
}

impl KmeTransport for HttpsTransport {
    fn execute(&self, request: &KmeRequest, role: Role) -> Result<KmeResponse> {
        let client = self.client(role)?;
        let builder = match request.method {
            Method::Get => client.get(&request.url),
            Method::Post => client
                .post(&request.url)
                .header(CONTENT_TYPE, "application/json")
                .body(request.body.clone().unwrap_or_default()),
        };

        debug!("{:?} {} as {role}", request.method, request.url);
        let response = builder.send().map_err(|err| {
            error!("Request to {} failed: {err}", request.url);
            self.map_err(err)
        })?;
        let status = response.status().as_u16();
        let body = response.text().map_err(|err| self.map_err(err))?;
        Ok(KmeResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_role_credentials_fail_before_network() {
        let transport = HttpsTransport::new(CredentialStore::default());
        let request = KmeRequest {
            method: Method::Get,
            url: "https://127.0.0.1:1/api/v1/keys/sae/status".into(),
            body: None,
        };
        match transport.execute(&request, Role::Initiator) {
            Err(Error::Credentials(msg)) => assert!(msg.contains("initiator")),
            other => panic!("Expected Credentials error, got {other:?}"),
        }
    }
}
