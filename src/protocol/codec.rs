use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;

use super::message::{Envelope, Pack, CLIENT_ID};
use crate::crypto::{Cipher, CipherError};

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(#[source] serde_json::Error),
    #[error("unexpected envelope type: {0}")]
    UnexpectedType(String),
    #[error("cipher error: {0}")]
    CipherError(#[from] CipherError),
    #[error("invalid payload: {0}")]
    InvalidPayload(#[source] serde_json::Error),
}

/// Turns [`Pack`]s into datagrams and back. `key` is `None` until the device is bound.
#[derive(Clone)]
pub struct Codec {
    cipher: Arc<dyn Cipher>,
}

impl Codec {
    pub fn new(cipher: Arc<dyn Cipher>) -> Self {
        Self { cipher }
    }

    pub fn encode(&self, pack: &Pack, key: Option<&str>) -> Result<Bytes, ProtocolError> {
        let plaintext = serde_json::to_vec(pack).map_err(ProtocolError::InvalidPayload)?;

        // Discovery goes out unwrapped, the appliance answers with a packed `dev`
        if let Pack::Scan = pack {
            return Ok(Bytes::from(plaintext));
        }

        let envelope = Envelope {
            cid: CLIENT_ID.into(),
            i: key.is_none() as u8,
            t: Envelope::PACK.into(),
            uid: 0,
            pack: self.cipher.encrypt(&plaintext, key)?,
        };
        let encoded = serde_json::to_vec(&envelope).map_err(ProtocolError::InvalidEnvelope)?;
        Ok(Bytes::from(encoded))
    }

    pub fn decode(&self, datagram: &[u8], key: Option<&str>) -> Result<Pack, ProtocolError> {
        let envelope: Envelope =
            serde_json::from_slice(datagram).map_err(ProtocolError::InvalidEnvelope)?;
        if envelope.t != Envelope::PACK {
            return Err(ProtocolError::UnexpectedType(envelope.t));
        }

        let plaintext = self.cipher.decrypt(&envelope.pack, key)?;
        serde_json::from_slice(&plaintext).map_err(ProtocolError::InvalidPayload)
    }
}
