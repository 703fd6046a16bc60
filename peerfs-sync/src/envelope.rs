//! Signed message envelopes.
//!
//! Signing freezes the payload's canonical JSON bytes next to the
//! signature, so the pair always describes one state. Verification checks
//! the signature over the frozen bytes and that the live payload still
//! serializes to exactly those bytes.

use crate::error::SyncResult;
use peerfs_crypto::{CryptoProvider, KeyPair, VerifyingKey};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// The frozen state, signature and signer of a signed payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seal {
    #[serde(with = "hex_bytes")]
    signed_state: Vec<u8>,
    #[serde(with = "hex_bytes")]
    signature: Vec<u8>,
    signer: VerifyingKey,
}

/// A payload with an optional seal over its canonical form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedEnvelope<T> {
    payload: T,
    seal: Option<Seal>,
}

impl<T> SignedEnvelope<T>
where
    T: Serialize + DeserializeOwned,
{
    /// Wraps an unsigned payload.
    pub fn new(payload: T) -> Self {
        Self {
            payload,
            seal: None,
        }
    }

    /// Wraps and signs in one step.
    pub fn signed(payload: T, crypto: &dyn CryptoProvider, keys: &KeyPair) -> SyncResult<Self> {
        let mut envelope = Self::new(payload);
        envelope.sign(crypto, keys)?;
        Ok(envelope)
    }

    pub fn payload(&self) -> &T {
        &self.payload
    }

    /// Mutable access to the payload. Changes invalidate an existing seal
    /// until the envelope is signed again.
    pub fn payload_mut(&mut self) -> &mut T {
        &mut self.payload
    }

    pub fn into_payload(self) -> T {
        self.payload
    }

    pub fn is_signed(&self) -> bool {
        self.seal.is_some()
    }

    /// Key the envelope claims to be signed with.
    pub fn signer(&self) -> Option<&VerifyingKey> {
        self.seal.as_ref().map(|s| &s.signer)
    }

    pub fn signature(&self) -> Option<&[u8]> {
        self.seal.as_ref().map(|s| s.signature.as_slice())
    }

    /// The bytes frozen at signing time.
    pub fn signed_state(&self) -> Option<&[u8]> {
        self.seal.as_ref().map(|s| s.signed_state.as_slice())
    }

    /// Canonical byte form of the current payload.
    pub fn canonical_bytes(&self) -> SyncResult<Vec<u8>> {
        Ok(serde_json::to_vec(&self.payload)?)
    }

    /// Signs the current payload, replacing any previous seal.
    pub fn sign(&mut self, crypto: &dyn CryptoProvider, keys: &KeyPair) -> SyncResult<()> {
        let signed_state = self.canonical_bytes()?;
        let signature = crypto.sign(&signed_state, &keys.signing_key);
        self.seal = Some(Seal {
            signed_state,
            signature: signature.to_bytes().to_vec(),
            signer: keys.verifying_key,
        });
        Ok(())
    }

    /// Whether the envelope was signed by `key` and the payload is
    /// unchanged since. Never fails: every problem reads as `false`.
    pub fn verify(&self, crypto: &dyn CryptoProvider, key: &VerifyingKey) -> bool {
        let Some(seal) = &self.seal else {
            debug!("Rejecting unsigned envelope");
            return false;
        };

        match crypto.verify(&seal.signed_state, &seal.signature, key) {
            Ok(true) => {}
            Ok(false) => {
                warn!("Envelope signature does not match key {}", key.to_hex());
                return false;
            }
            Err(e) => {
                warn!("Envelope signature unusable: {}", e);
                return false;
            }
        }

        match self.canonical_bytes() {
            Ok(bytes) if bytes == seal.signed_state => true,
            Ok(_) => {
                warn!("Envelope payload changed after signing");
                false
            }
            Err(e) => {
                warn!("Envelope payload cannot be serialized: {}", e);
                false
            }
        }
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}
