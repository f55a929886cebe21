use std::{str::FromStr, sync::Arc};

use bytes::Bytes;
use strum::IntoEnumIterator;
use thiserror::Error;

use super::{
    codec::{Codec, ProtocolError},
    message::Pack,
};
use crate::{
    crypto::Cipher,
    fields::{Command, Field},
    status::StatusStore,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Scanning,
    AwaitingBind,
    Bound,
}

/// What the owner of the socket has to do after feeding a datagram to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Send(Bytes),
    StartPolling,
    StatusChanged,
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("device is not bound yet")]
    NotBound,
    #[error("session already started")]
    AlreadyStarted,
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Handshake and polling state for one appliance, independent of any socket.
pub struct Session {
    codec: Codec,
    state: ConnectionState,
    mac: Option<String>,
    key: Option<String>,
    status: StatusStore,
    commands_sent: u64,
    responses: u64,
}

impl Session {
    pub fn new(cipher: Arc<dyn Cipher>) -> Self {
        Self {
            codec: Codec::new(cipher),
            state: ConnectionState::Disconnected,
            mac: None,
            key: None,
            status: StatusStore::new(),
            commands_sent: 0,
            responses: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_bound(&self) -> bool {
        self.state == ConnectionState::Bound
    }

    pub fn mac(&self) -> Option<&str> {
        self.mac.as_deref()
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn status(&self) -> &StatusStore {
        &self.status
    }

    pub fn status_mut(&mut self) -> &mut StatusStore {
        &mut self.status
    }

    /// Commands sent and command responses received since the session was created.
    pub fn sequence(&self) -> (u64, u64) {
        (self.commands_sent, self.responses)
    }

    /// Leaves `Disconnected` and returns the discovery request to send.
    pub fn start(&mut self) -> Result<Bytes, SessionError> {
        if self.state != ConnectionState::Disconnected {
            return Err(SessionError::AlreadyStarted);
        }
        let scan = self.codec.encode(&Pack::Scan, None)?;
        self.state = ConnectionState::Scanning;
        tracing::debug!("Scanning for device");
        Ok(scan)
    }

    /// Request to re-send when the current handshake step went unanswered.
    pub fn retry(&self) -> Result<Option<Bytes>, ProtocolError> {
        match self.state {
            ConnectionState::Scanning => self.codec.encode(&Pack::Scan, None).map(Some),
            ConnectionState::AwaitingBind => self.bind_request().map(Some),
            ConnectionState::Disconnected | ConnectionState::Bound => Ok(None),
        }
    }

    /// Drops identity and key so the next [`Session::start`] runs a fresh handshake. Raw
    /// status is kept.
    pub fn reset(&mut self) {
        tracing::info!(mac = ?self.mac, state = %self.state, "Resetting session");
        self.state = ConnectionState::Disconnected;
        self.mac = None;
        self.key = None;
    }

    pub fn handle_datagram(&mut self, datagram: &[u8]) -> Result<Vec<Action>, ProtocolError> {
        let pack = self.codec.decode(datagram, self.key.as_deref())?;
        tracing::trace!(kind = pack.kind(), state = %self.state, "Received pack");

        match (self.state, pack) {
            (ConnectionState::Scanning, Pack::Dev { mac, cid }) => {
                let Some(mac) = mac.or(cid) else {
                    tracing::warn!("Device announcement without an identity");
                    return Ok(vec![]);
                };
                if !self.learn_identity(mac) {
                    return Ok(vec![]);
                }
                self.state = ConnectionState::AwaitingBind;
                tracing::debug!(mac = ?self.mac, "Device found, binding");
                Ok(vec![Action::Send(self.bind_request()?)])
            }
            (ConnectionState::AwaitingBind, Pack::BindOk { mac, cid, key }) => {
                if let Some(mac) = mac.or(cid) {
                    if !self.learn_identity(mac) {
                        return Ok(vec![]);
                    }
                }
                self.key = Some(key);
                self.state = ConnectionState::Bound;
                tracing::info!(mac = ?self.mac, "Device bound");
                Ok(vec![Action::StartPolling])
            }
            (ConnectionState::Bound, Pack::Dat { cols, dat }) => {
                self.merge(&cols, &dat);
                Ok(vec![Action::StatusChanged])
            }
            (ConnectionState::Bound, Pack::Res { opt, val }) => {
                self.responses += 1;
                tracing::debug!(
                    sent = self.commands_sent,
                    received = self.responses,
                    "Command response"
                );
                self.merge(&opt, &val);
                Ok(vec![Action::StatusChanged])
            }
            (state, pack) => {
                tracing::debug!(kind = pack.kind(), %state, "Ignoring unexpected pack");
                Ok(vec![])
            }
        }
    }

    pub fn status_request(&self) -> Result<Bytes, SessionError> {
        let mac = self.bound_mac()?;
        let pack = Pack::Status {
            mac: mac.to_owned(),
            cols: Field::iter().map(|f| f.code().to_owned()).collect(),
        };
        Ok(self.codec.encode(&pack, self.key.as_deref())?)
    }

    pub fn command(&mut self, command: &Command) -> Result<Bytes, SessionError> {
        self.bound_mac()?;
        let (opt, p): (Vec<_>, Vec<_>) = command
            .iter()
            .map(|(field, value)| (field.code().to_owned(), value))
            .unzip();
        let encoded = self.codec.encode(&Pack::Cmd { opt, p }, self.key.as_deref())?;
        self.commands_sent += 1;
        Ok(encoded)
    }

    fn bound_mac(&self) -> Result<&str, SessionError> {
        match (self.state, self.mac.as_deref()) {
            (ConnectionState::Bound, Some(mac)) => Ok(mac),
            _ => Err(SessionError::NotBound),
        }
    }

    fn bind_request(&self) -> Result<Bytes, ProtocolError> {
        let pack = Pack::Bind {
            mac: self.mac.clone().unwrap_or_default(),
            uid: 0,
        };
        // The device key is only known once this request is answered
        self.codec.encode(&pack, None)
    }

    // Returns false when the message came from a different device than the one already learned
    fn learn_identity(&mut self, mac: String) -> bool {
        match &self.mac {
            Some(known) if *known != mac => {
                tracing::warn!(known = %known, received = %mac, "Ignoring message for another device");
                false
            }
            Some(_) => true,
            None => {
                self.mac = Some(mac);
                true
            }
        }
    }

    fn merge(&mut self, codes: &[String], values: &[i64]) {
        if codes.len() != values.len() {
            tracing::warn!(
                codes = codes.len(),
                values = values.len(),
                "Mismatched field and value counts"
            );
        }

        let updates: Vec<_> = codes
            .iter()
            .zip(values)
            .filter_map(|(code, &value)| match Field::from_str(code) {
                Ok(field) => Some((field, value)),
                Err(_) => {
                    tracing::trace!(code = %code, "Skipping unknown field");
                    None
                }
            })
            .collect();

        self.status.merge(updates);
    }
}
