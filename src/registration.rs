//! Registration: the one-shot HTTPS handshake that exchanges a Curve25519
//! public key for a shared secret and topic root (spec.md §6,
//! SPEC_FULL.md §4.11). HTTPS transport internals are out of scope; this
//! module only shapes the request/response and drives the capability seams.

use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::capability::{ArcEcdh, ArcHttpClient, ArcStorage};
use crate::error::RegistrationError;

fn b64_encode(bytes: impl AsRef<[u8]>) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

fn b64_decode(s: &str) -> Result<Vec<u8>, base64::DecodeError> {
    base64::engine::general_purpose::STANDARD.decode(s)
}

const ECDH_ALGORITHM: &str = "CURVE25519";
const STORAGE_KEY_TOPIC_ROOT: &str = "topic_root";
const STORAGE_KEY_SECRET: &str = "shared_secret";

#[derive(Debug, Deserialize)]
struct RegistrationResponse {
    encryption: ResponseEncryption,
    iot: ResponseIot,
}

#[derive(Debug, Deserialize)]
struct ResponseEncryption {
    #[serde(rename = "publicKey")]
    public_key: String,
}

#[derive(Debug, Deserialize)]
struct ResponseIot {
    #[serde(rename = "topicRoot")]
    topic_root: String,
}

#[derive(Debug, Serialize)]
struct RegistrationRequest<'a> {
    authentication: RequestAuthentication<'a>,
    encryption: RequestEncryption,
    iot: RequestIot<'a>,
}

#[derive(Debug, Serialize)]
struct RequestAuthentication<'a> {
    token: &'a str,
    #[serde(rename = "clientId")]
    client_id: &'a str,
}

#[derive(Debug, Serialize)]
struct RequestEncryption {
    algorithm: &'static str,
    #[serde(rename = "publicKey")]
    public_key: String,
}

#[derive(Debug, Serialize)]
struct RequestIot<'a> {
    #[serde(rename = "awsAccountId")]
    aws_account_id: &'a str,
    #[serde(rename = "clientId")]
    client_id: &'a str,
    endpoint: &'a str,
}

pub struct RegistrationOutcome {
    pub topic_root: String,
}

pub struct Registrar {
    http: ArcHttpClient,
    ecdh: ArcEcdh,
    storage: ArcStorage,
}

impl Registrar {
    pub fn new(http: ArcHttpClient, ecdh: ArcEcdh, storage: ArcStorage) -> Self {
        Self { http, ecdh, storage }
    }

    pub fn register(
        &self,
        url: &str,
        token: &str,
        aws_account_id: &str,
        client_id: &str,
        endpoint: &str,
    ) -> Result<RegistrationOutcome, RegistrationError> {
        let (public_key, keypair_handle) = self
            .ecdh
            .generate_keypair()
            .map_err(|_| RegistrationError::SendFailed)?;

        let request = RegistrationRequest {
            authentication: RequestAuthentication { token, client_id },
            encryption: RequestEncryption {
                algorithm: ECDH_ALGORITHM,
                public_key: b64_encode(public_key),
            },
            iot: RequestIot { aws_account_id, client_id, endpoint },
        };
        let body = serde_json::to_vec(&request).map_err(|_| RegistrationError::SendFailed)?;

        let response_bytes = self
            .http
            .post(url, &body)
            .map_err(|_| RegistrationError::SendFailed)?;
        let response: RegistrationResponse =
            serde_json::from_slice(&response_bytes).map_err(|_| RegistrationError::ResponseError)?;

        let peer_public_key_bytes =
            b64_decode(&response.encryption.public_key).map_err(|_| RegistrationError::ResponseError)?;
        let peer_public_key: [u8; 32] = peer_public_key_bytes
            .try_into()
            .map_err(|_| RegistrationError::ResponseError)?;

        let shared_secret = self
            .ecdh
            .shared_secret(&keypair_handle, &peer_public_key)
            .map_err(|_| RegistrationError::ResponseError)?;

        self.storage
            .store(STORAGE_KEY_TOPIC_ROOT, response.iot.topic_root.as_bytes())
            .map_err(|_| RegistrationError::ResponseError)?;
        self.storage
            .store(STORAGE_KEY_SECRET, &shared_secret)
            .map_err(|_| RegistrationError::ResponseError)?;

        Ok(RegistrationOutcome { topic_root: response.iot.topic_root })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    struct FakeEcdh;
    impl crate::capability::Ecdh for FakeEcdh {
        fn generate_keypair(&self) -> crate::capability::Result<([u8; 32], Vec<u8>)> {
            Ok(([7u8; 32], vec![1, 2, 3]))
        }
        fn shared_secret(&self, _handle: &[u8], _peer: &[u8; 32]) -> crate::capability::Result<[u8; 32]> {
            Ok([9u8; 32])
        }
    }

    struct FakeHttp {
        response: Vec<u8>,
    }
    impl crate::capability::HttpClient for FakeHttp {
        fn post(&self, _url: &str, _body: &[u8]) -> crate::capability::Result<Vec<u8>> {
            Ok(self.response.clone())
        }
    }

    struct MemStorage {
        data: Mutex<HashMap<String, Vec<u8>>>,
    }
    impl crate::capability::Storage for MemStorage {
        fn load(&self, key: &str) -> crate::capability::Result<Option<Vec<u8>>> {
            Ok(self.data.lock().unwrap().get(key).cloned())
        }
        fn store(&self, key: &str, value: &[u8]) -> crate::capability::Result<()> {
            self.data.lock().unwrap().insert(key.to_string(), value.to_vec());
            Ok(())
        }
    }

    #[test]
    fn successful_registration_persists_secret_and_topic_root() {
        let response = json!({
            "encryption": { "publicKey": b64_encode([3u8; 32]) },
            "iot": { "topicRoot": "root/abc" }
        });
        let http = Arc::new(FakeHttp { response: serde_json::to_vec(&response).unwrap() });
        let storage = Arc::new(MemStorage { data: Mutex::new(HashMap::new()) });
        let registrar = Registrar::new(http, Arc::new(FakeEcdh), storage.clone());

        let outcome = registrar
            .register("https://example.invalid/register", "tok", "acct", "client-1", "endpoint")
            .unwrap();

        assert_eq!(outcome.topic_root, "root/abc");
        assert_eq!(
            storage.data.lock().unwrap().get("topic_root").unwrap(),
            b"root/abc"
        );
        assert_eq!(storage.data.lock().unwrap().get("shared_secret").unwrap(), &[9u8; 32]);
    }

    #[test]
    fn malformed_response_yields_response_error() {
        let http = Arc::new(FakeHttp { response: b"not json".to_vec() });
        let storage = Arc::new(MemStorage { data: Mutex::new(HashMap::new()) });
        let registrar = Registrar::new(http, Arc::new(FakeEcdh), storage);

        let err = registrar
            .register("https://example.invalid/register", "tok", "acct", "client-1", "endpoint")
            .unwrap_err();
        assert_eq!(err, RegistrationError::ResponseError);
    }
}
