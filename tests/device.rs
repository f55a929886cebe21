use std::{net::SocketAddr, sync::Arc, time::Duration};

use greeac::{
    crypto::AesEcb,
    derive::{OperatingState, Property, Value},
    protocol::{Codec, Pack},
    ConnectionState, Device, DeviceConfig, DeviceError, Field,
};
use tokio::{net::UdpSocket, sync::mpsc, time::timeout};

const MAC: &str = "f4911e7aca59";
const KEY: &str = "St8Vw1Yz4Bc7Ef0H";
const WAIT: Duration = Duration::from_secs(5);

/// Plays the appliance side of the protocol on a loopback socket.
struct FakeAppliance {
    socket: UdpSocket,
    codec: Codec,
    client: Option<SocketAddr>,
}

impl FakeAppliance {
    async fn bind() -> Self {
        Self {
            socket: UdpSocket::bind("127.0.0.1:0").await.unwrap(),
            codec: Codec::new(Arc::new(AesEcb)),
            client: None,
        }
    }

    fn config(&self) -> DeviceConfig {
        let mut config = DeviceConfig::new("127.0.0.1".parse().unwrap());
        config.remote_port = self.socket.local_addr().unwrap().port();
        config.retry_interval = 200;
        config.poll_interval = 50;
        config.reconnect_after = None;
        config
    }

    fn decode(&self, datagram: &[u8], key: Option<&str>) -> Option<Pack> {
        // Discovery is the only request sent without an envelope
        if let Ok(pack) = serde_json::from_slice::<Pack>(datagram) {
            return Some(pack);
        }
        self.codec.decode(datagram, key).ok()
    }

    /// Skips datagrams until one decodes with `key` and matches.
    async fn expect(&mut self, key: Option<&str>, wanted: impl Fn(&Pack) -> bool) -> Pack {
        let mut buf = vec![0u8; 4096];
        timeout(WAIT, async {
            loop {
                let (n, src) = self.socket.recv_from(&mut buf).await.unwrap();
                self.client = Some(src);
                match self.decode(&buf[..n], key) {
                    Some(pack) if wanted(&pack) => return pack,
                    _ => continue,
                }
            }
        })
        .await
        .expect("timed out waiting for a request")
    }

    /// Discards whatever is already queued on the socket.
    fn drain(&self) {
        let mut buf = vec![0u8; 4096];
        while self.socket.try_recv_from(&mut buf).is_ok() {}
    }

    async fn send_raw(&self, datagram: &[u8]) {
        let client = self.client.expect("no client yet");
        self.socket.send_to(datagram, client).await.unwrap();
    }

    async fn reply(&self, pack: &Pack, key: Option<&str>) {
        let datagram = self.codec.encode(pack, key).unwrap();
        self.send_raw(&datagram).await;
    }

    async fn handshake(&mut self, device: &Device) {
        self.expect(None, |p| matches!(p, Pack::Scan)).await;
        self.reply(
            &Pack::Dev {
                mac: Some(MAC.into()),
                cid: Some(MAC.into()),
            },
            None,
        )
        .await;

        let bind = self.expect(None, |p| matches!(p, Pack::Bind { .. })).await;
        assert_eq!(
            bind,
            Pack::Bind {
                mac: MAC.into(),
                uid: 0
            }
        );
        self.reply(
            &Pack::BindOk {
                mac: Some(MAC.into()),
                cid: None,
                key: KEY.into(),
            },
            None,
        )
        .await;

        timeout(WAIT, device.wait_bound()).await.unwrap().unwrap();
    }
}

fn codes(codes: &[&str]) -> Vec<String> {
    codes.iter().map(|c| c.to_string()).collect()
}

#[tokio::test]
async fn test_handshake_poll_and_command() {
    let mut fake = FakeAppliance::bind().await;
    let device = Device::connect(fake.config()).unwrap();

    assert!(matches!(
        device.set_property(Property::Power, Value::Bool(true)),
        Err(DeviceError::NotBound)
    ));

    fake.handshake(&device).await;
    assert_eq!(device.state(), ConnectionState::Bound);
    assert_eq!(device.mac().as_deref(), Some(MAC));

    let Pack::Status { mac, cols } = fake
        .expect(Some(KEY), |p| matches!(p, Pack::Status { .. }))
        .await
    else {
        unreachable!()
    };
    assert_eq!(mac, MAC);
    assert_eq!(cols.len(), 9);

    // Garbage must not derail the session
    fake.send_raw(b"not json").await;
    fake.reply(
        &Pack::Dat {
            cols: codes(&["Pow", "Mod", "SetTem", "TemRec", "TemSen", "SwUpDn"]),
            dat: vec![1, 1, 24, 1, 26, 1],
        },
        Some(KEY),
    )
    .await;
    timeout(WAIT, device.wait_status()).await.unwrap().unwrap();

    assert_eq!(device.get_property(Property::CurrentTemperature), Ok(Value::Temperature(26.0)));
    assert_eq!(
        device.get_property(Property::CurrentState),
        Ok(Value::State(OperatingState::Cooling))
    );
    let Ok(Value::Temperature(target)) = device.get_property(Property::TargetTemperature) else {
        panic!("target temperature unknown");
    };
    assert!((target - 24.24).abs() < 1e-9);
    assert!(device.get_property(Property::Speed).is_err());

    device.set_property(Property::Power, Value::Bool(false)).unwrap();
    let cmd = fake.expect(Some(KEY), |p| matches!(p, Pack::Cmd { .. })).await;
    assert_eq!(
        cmd,
        Pack::Cmd {
            opt: codes(&["Pow"]),
            p: vec![0]
        }
    );
    fake.reply(
        &Pack::Res {
            opt: codes(&["Pow"]),
            val: vec![0],
        },
        Some(KEY),
    )
    .await;

    let mut status = device.subscribe();
    timeout(WAIT, status.wait_for(|s| s.get(Field::Power) == Some(0)))
        .await
        .unwrap()
        .unwrap();

    // Unchanged value sends nothing, so the next command seen is the swing one
    device.set_property(Property::Power, Value::Bool(false)).unwrap();
    device.set_property(Property::SwingMode, Value::Bool(false)).unwrap();
    let cmd = fake.expect(Some(KEY), |p| matches!(p, Pack::Cmd { .. })).await;
    assert_eq!(
        cmd,
        Pack::Cmd {
            opt: codes(&["SwUpDn"]),
            p: vec![0]
        }
    );

    device.shutdown().await;
}

#[tokio::test]
async fn test_observer_sees_merged_status() {
    let mut fake = FakeAppliance::bind().await;
    let device = Device::connect(fake.config()).unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    device
        .on_status_changed(move |status| {
            let _ = tx.send(status.clone());
        })
        .unwrap();

    fake.handshake(&device).await;
    fake.expect(Some(KEY), |p| matches!(p, Pack::Status { .. })).await;

    fake.reply(
        &Pack::Dat {
            cols: codes(&["Pow", "WdSpd"]),
            dat: vec![1, 0],
        },
        Some(KEY),
    )
    .await;
    let first = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(first.get(Field::Speed), Some(0));

    fake.reply(
        &Pack::Dat {
            cols: codes(&["TemSen"]),
            dat: vec![22],
        },
        Some(KEY),
    )
    .await;
    let second = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(second.get(Field::Power), Some(1));
    assert_eq!(second.get(Field::Temperature), Some(22));

    assert_eq!(device.get_property(Property::Speed), Ok(Value::Speed(6)));

    // Display unit writes are pushed back to observers right away
    device
        .set_property(Property::Units, Value::Units(greeac::derive::Units::Fahrenheit))
        .unwrap();
    let refreshed = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(refreshed, second);

    device.shutdown().await;
}

#[tokio::test]
async fn test_handshake_retried() {
    let mut fake = FakeAppliance::bind().await;
    let device = Device::connect(fake.config()).unwrap();

    // Ignore the first scan, the device asks again
    fake.expect(None, |p| matches!(p, Pack::Scan)).await;
    fake.expect(None, |p| matches!(p, Pack::Scan)).await;
    assert_eq!(device.state(), ConnectionState::Scanning);

    fake.reply(
        &Pack::Dev {
            mac: Some(MAC.into()),
            cid: None,
        },
        None,
    )
    .await;
    fake.expect(None, |p| matches!(p, Pack::Bind { .. })).await;
    fake.expect(None, |p| matches!(p, Pack::Bind { .. })).await;
    assert_eq!(device.state(), ConnectionState::AwaitingBind);

    device.shutdown().await;
}

#[tokio::test]
async fn test_reconnects_after_silence() {
    let mut fake = FakeAppliance::bind().await;
    let mut config = fake.config();
    config.reconnect_after = Some(300);
    let device = Device::connect(config).unwrap();

    fake.handshake(&device).await;

    // Never answer the polls, the device starts over with a new scan
    fake.expect(None, |p| matches!(p, Pack::Scan)).await;
    fake.handshake(&device).await;
    assert_eq!(device.state(), ConnectionState::Bound);

    device.shutdown().await;
}

#[tokio::test]
async fn test_socket_bind_retried() {
    let mut fake = FakeAppliance::bind().await;
    let blocker = std::net::UdpSocket::bind("0.0.0.0:0").unwrap();
    let mut config = fake.config();
    config.local_port = Some(blocker.local_addr().unwrap().port());
    let device = Device::connect(config).unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(device.state(), ConnectionState::Disconnected);
    drop(blocker);

    fake.expect(None, |p| matches!(p, Pack::Scan)).await;
    fake.handshake(&device).await;
    assert_eq!(device.state(), ConnectionState::Bound);

    device.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_stops_polling() {
    let mut fake = FakeAppliance::bind().await;
    let device = Device::connect(fake.config()).unwrap();

    fake.handshake(&device).await;
    fake.expect(Some(KEY), |p| matches!(p, Pack::Status { .. })).await;

    device.shutdown().await;
    fake.drain();

    // Several poll intervals pass without another request
    let mut buf = vec![0u8; 4096];
    let quiet = timeout(Duration::from_millis(300), fake.socket.recv_from(&mut buf)).await;
    assert!(quiet.is_err());
}
