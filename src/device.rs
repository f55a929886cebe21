use std::{future, sync::Arc};

use thiserror::Error;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::{self, Instant, Interval, MissedTickBehavior},
};
use tracing::Instrument;

use crate::{
    config::{ConfigError, DeviceConfig},
    crypto::{AesEcb, Cipher},
    derive::{DerivationError, Property, Value},
    fields::Command,
    protocol::{Action, ConnectionState, Session},
    status::{Observer, RawStatus},
    transport::{UdpTransport, MAX_DATAGRAM},
};

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("device is not bound yet")]
    NotBound,
    #[error("device connection closed")]
    Closed,
    #[error(transparent)]
    Derivation(#[from] DerivationError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Connection progress as seen from outside the reactor task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Link {
    pub state: ConnectionState,
    pub mac: Option<String>,
}

enum Request {
    Command(Command),
    Refresh,
    Observe(Observer),
}

/// Handle to one appliance. A background task owns the socket, the session and the raw
/// status; it stops when the handle is dropped.
pub struct Device {
    config: Arc<DeviceConfig>,
    requests: mpsc::UnboundedSender<Request>,
    status: watch::Receiver<RawStatus>,
    link: watch::Receiver<Link>,
    task: Option<JoinHandle<()>>,
}

impl Device {
    /// Starts talking to the device. Must be called from within a tokio runtime.
    pub fn connect(config: DeviceConfig) -> Result<Self, DeviceError> {
        Self::with_cipher(config, Arc::new(AesEcb))
    }

    pub fn with_cipher(config: DeviceConfig, cipher: Arc<dyn Cipher>) -> Result<Self, DeviceError> {
        config.validate()?;
        let config = Arc::new(config);

        let session = Session::new(cipher);
        let status = session.status().subscribe();
        let (link_tx, link) = watch::channel(Link::default());
        let (requests, requests_rx) = mpsc::unbounded_channel();

        let reactor = Reactor {
            config: config.clone(),
            session,
            requests: requests_rx,
            link: link_tx,
        };
        let span = tracing::info_span!("device", address = %config.address);
        let task = tokio::spawn(reactor.run().instrument(span));

        Ok(Self {
            config,
            requests,
            status,
            link,
            task: Some(task),
        })
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.link.borrow().state
    }

    pub fn mac(&self) -> Option<String> {
        self.link.borrow().mac.clone()
    }

    pub fn status(&self) -> RawStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<RawStatus> {
        self.status.clone()
    }

    /// Registers a callback run after every raw status update.
    ///
    /// Registration goes through the background task, so updates it handles before picking up
    /// the request are not replayed. Use [`Device::subscribe`] to also see the current status.
    pub fn on_status_changed(
        &self,
        observer: impl Fn(&RawStatus) + Send + Sync + 'static,
    ) -> Result<(), DeviceError> {
        self.request(Request::Observe(Box::new(observer)))
    }

    pub async fn wait_bound(&self) -> Result<(), DeviceError> {
        let mut link = self.link.clone();
        link.wait_for(|link| link.state == ConnectionState::Bound)
            .await
            .map(|_| ())
            .map_err(|_| DeviceError::Closed)
    }

    /// Waits until the device has reported at least one field.
    pub async fn wait_status(&self) -> Result<RawStatus, DeviceError> {
        let mut status = self.status.clone();
        status
            .wait_for(|status| !status.is_empty())
            .await
            .map(|status| status.clone())
            .map_err(|_| DeviceError::Closed)
    }

    pub fn get_property(&self, property: Property) -> Result<Value, DerivationError> {
        property.get(&self.status.borrow(), &self.config)
    }

    /// Sends the command for `value` without waiting for the device to acknowledge it.
    pub fn set_property(&self, property: Property, value: Value) -> Result<(), DeviceError> {
        if self.state() != ConnectionState::Bound {
            return Err(DeviceError::NotBound);
        }

        let command = property.write(value, &self.status.borrow(), &self.config)?;
        let Some(command) = command else {
            tracing::debug!(%property, ?value, "Value unchanged, nothing to send");
            return Ok(());
        };

        tracing::debug!(%property, ?value, ?command, "Setting property");
        self.request(Request::Command(command))?;
        if property.refreshes_display() {
            self.request(Request::Refresh)?;
        }
        Ok(())
    }

    /// Stops the background task and waits for it to finish.
    pub async fn shutdown(mut self) {
        let task = self.task.take();
        drop(self);
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    fn request(&self, request: Request) -> Result<(), DeviceError> {
        self.requests.send(request).map_err(|_| DeviceError::Closed)
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct Reactor {
    config: Arc<DeviceConfig>,
    session: Session,
    requests: mpsc::UnboundedReceiver<Request>,
    link: watch::Sender<Link>,
}

impl Reactor {
    async fn run(mut self) {
        let Some(transport) = self.bind().await else {
            return;
        };

        let retry_interval = self.config.retry_interval();
        let mut retry = time::interval_at(Instant::now() + retry_interval, retry_interval);
        retry.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut poll: Option<Interval> = None;
        let mut last_seen = Instant::now();
        let mut buf = vec![0u8; MAX_DATAGRAM];

        self.start(&transport).await;

        loop {
            let stale_at = self.stale_deadline(last_seen);

            tokio::select! {
                received = transport.recv(&mut buf) => match received {
                    Ok(n) => {
                        if self.handle_datagram(&transport, &buf[..n], &mut poll).await {
                            last_seen = Instant::now();
                        }
                    }
                    Err(error) => tracing::warn!(%error, "Failed to receive datagram"),
                },
                _ = retry.tick() => self.retry(&transport).await,
                _ = tick(&mut poll) => self.poll(&transport).await,
                _ = deadline(stale_at) => {
                    tracing::warn!(after = ?self.config.reconnect_after(), "Device went quiet, reconnecting");
                    poll = None;
                    self.session.reset();
                    self.start(&transport).await;
                    retry.reset();
                    last_seen = Instant::now();
                }
                request = self.requests.recv() => match request {
                    Some(request) => self.handle_request(Some(&transport), request).await,
                    None => break,
                },
            }
        }

        tracing::debug!("Device handle dropped, stopping");
    }

    // Socket setup is retried until it works or the handle goes away
    async fn bind(&mut self) -> Option<UdpTransport> {
        loop {
            match UdpTransport::bind(self.config.local_port, self.config.remote_addr()).await {
                Ok(transport) => return Some(transport),
                Err(error) => tracing::warn!(
                    %error,
                    retry_in = ?self.config.retry_interval(),
                    "Failed to open socket"
                ),
            }

            let retry_at = Instant::now() + self.config.retry_interval();
            loop {
                tokio::select! {
                    _ = time::sleep_until(retry_at) => break,
                    request = self.requests.recv() => match request {
                        Some(request) => self.handle_request(None, request).await,
                        None => return None,
                    },
                }
            }
        }
    }

    async fn start(&mut self, transport: &UdpTransport) {
        match self.session.start() {
            Ok(scan) => send(transport, &scan).await,
            Err(error) => tracing::warn!(%error, "Failed to start handshake"),
        }
        self.publish_link();
    }

    async fn retry(&mut self, transport: &UdpTransport) {
        match self.session.retry() {
            Ok(Some(request)) => {
                tracing::debug!(state = %self.session.state(), "Handshake unanswered, retrying");
                send(transport, &request).await;
            }
            Ok(None) => {}
            Err(error) => tracing::warn!(%error, "Failed to encode handshake request"),
        }
    }

    async fn poll(&mut self, transport: &UdpTransport) {
        match self.session.status_request() {
            Ok(request) => send(transport, &request).await,
            Err(error) => tracing::warn!(%error, "Failed to request status"),
        }
    }

    // Returns whether the datagram was understood
    async fn handle_datagram(
        &mut self,
        transport: &UdpTransport,
        datagram: &[u8],
        poll: &mut Option<Interval>,
    ) -> bool {
        let actions = match self.session.handle_datagram(datagram) {
            Ok(actions) => actions,
            Err(error) => {
                tracing::warn!(%error, "Dropping datagram");
                tracing::trace!(datagram = %hex::encode(datagram), "Dropped datagram");
                return false;
            }
        };

        for action in actions {
            match action {
                Action::Send(request) => send(transport, &request).await,
                Action::StartPolling => {
                    let mut interval = time::interval(self.config.poll_interval());
                    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    *poll = Some(interval);
                }
                Action::StatusChanged => tracing::trace!("Status changed"),
            }
        }

        self.publish_link();
        true
    }

    async fn handle_request(&mut self, transport: Option<&UdpTransport>, request: Request) {
        match request {
            Request::Observe(observer) => self.session.status_mut().add_observer(observer),
            Request::Refresh => self.session.status().notify(),
            Request::Command(command) => {
                let Some(transport) = transport else {
                    tracing::warn!(?command, "Dropping command, no socket yet");
                    return;
                };
                match self.session.command(&command) {
                    Ok(request) => send(transport, &request).await,
                    Err(error) => tracing::warn!(%error, ?command, "Dropping command"),
                }
            }
        }
    }

    fn stale_deadline(&self, last_seen: Instant) -> Option<Instant> {
        if !self.session.is_bound() {
            return None;
        }
        self.config.reconnect_after().map(|after| last_seen + after)
    }

    fn publish_link(&self) {
        let next = Link {
            state: self.session.state(),
            mac: self.session.mac().map(str::to_owned),
        };
        self.link.send_if_modified(|link| {
            if *link == next {
                return false;
            }
            *link = next;
            true
        });
    }
}

async fn send(transport: &UdpTransport, datagram: &[u8]) {
    if let Err(error) = transport.send(datagram).await {
        tracing::warn!(%error, "Failed to send datagram");
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => future::pending().await,
    }
}

async fn deadline(at: Option<Instant>) {
    match at {
        Some(at) => time::sleep_until(at).await,
        None => future::pending().await,
    }
}
