use async_trait::async_trait;
use std::fmt;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::LinkConfig;
use crate::error::{LinkError, Result};
use crate::protocol::{Angle, SetAngle, StatusLine};
use crate::serial_driver::{FramedDriver, FramedSerialDriver};

/// Opens a transport to the controller.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, port: &str, config: &LinkConfig) -> Result<Box<dyn FramedDriver>>;
}

pub struct SerialConnector;

#[async_trait]
impl Connector for SerialConnector {
    async fn open(&self, port: &str, config: &LinkConfig) -> Result<Box<dyn FramedDriver>> {
        let driver = FramedSerialDriver::open(port, config).await?;
        Ok(Box::new(driver))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    Closed,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let text = match self {
            LinkState::Disconnected => "Disconnected",
            LinkState::Connecting => "Connecting",
            LinkState::Connected => "Connected",
            LinkState::Closed => "Closed",
        };
        write!(f, "{}", text)
    }
}

pub struct ServoLink {
    port: Option<String>,
    config: LinkConfig,
    connector: Box<dyn Connector>,
    driver: Option<Box<dyn FramedDriver>>,
    state: LinkState,
    confirmed: Option<Angle>,
    reconnect_attempts: u64,
    failed_reconnects: u32,
    gave_up: bool,
}

impl ServoLink {
    /// Link over a real serial port. A `None` port runs in simulation mode.
    pub fn new(port: Option<String>, config: LinkConfig) -> ServoLink {
        ServoLink::with_connector(port, config, Box::new(SerialConnector))
    }

    pub fn with_connector(
        port: Option<String>,
        config: LinkConfig,
        connector: Box<dyn Connector>,
    ) -> ServoLink {
        ServoLink {
            port,
            config,
            connector,
            driver: None,
            state: LinkState::Disconnected,
            confirmed: None,
            reconnect_attempts: 0,
            failed_reconnects: 0,
            gave_up: false,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == LinkState::Connected
    }

    pub fn is_simulated(&self) -> bool {
        self.port.is_none()
    }

    pub fn port(&self) -> Option<&str> {
        self.port.as_deref()
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn confirmed_angle(&self) -> Option<Angle> {
        self.confirmed
    }

    pub fn reconnect_attempts(&self) -> u64 {
        self.reconnect_attempts
    }

    /// Set once the reconnect policy bound is exhausted; the link then
    /// behaves like a simulated one.
    pub fn has_given_up(&self) -> bool {
        self.gave_up
    }

    pub async fn connect(&mut self) -> Result<()> {
        if self.state == LinkState::Closed {
            return Err(LinkError::Closed);
        }
        let port = match &self.port {
            Some(port) => port.clone(),
            None => {
                self.state = LinkState::Disconnected;
                return Err(LinkError::PortNotFound);
            }
        };
        self.driver = None;
        self.state = LinkState::Connecting;
        let mut driver = match self.connector.open(&port, &self.config).await {
            Ok(driver) => driver,
            Err(err) => {
                warn!(%port, %err, "failed to connect, running without the controller");
                self.state = LinkState::Disconnected;
                return Err(err);
            }
        };
        info!(%port, baud_rate = self.config.baud_rate, "connected to controller");
        self.handshake(driver.as_mut()).await;
        self.driver = Some(driver);
        self.state = LinkState::Connected;
        Ok(())
    }

    async fn handshake(&mut self, driver: &mut dyn FramedDriver) {
        if let Err(err) = driver.send(SetAngle::new(Angle::CENTER)).await {
            warn!(%err, "test command failed, continuing");
            return;
        }
        let window = self.config.handshake_window;
        let verified = timeout(window, async {
            loop {
                match driver.receive().await {
                    Ok(line) => {
                        if let Some(angle) = line.confirmed_angle() {
                            self.confirmed = Some(angle);
                        }
                        if line.is_response() {
                            debug!(?line, "controller response");
                            return true;
                        }
                    }
                    Err(err) => {
                        debug!(%err, "no response to test command");
                        return false;
                    }
                }
            }
        })
        .await
        .unwrap_or(false);
        if verified {
            info!("communication verified with controller");
        } else {
            debug!("controller did not answer the test command");
        }
    }

    fn drop_handle(&mut self) {
        if self.driver.take().is_some() {
            debug!("serial handle closed");
        }
        if self.state != LinkState::Closed {
            self.state = LinkState::Disconnected;
        }
    }

    /// Reopens the port. Consecutive failures count against the
    /// reconnect policy; once it is exhausted no further attempt is made.
    pub async fn reconnect(&mut self) -> Result<()> {
        if self.state == LinkState::Closed {
            return Err(LinkError::Closed);
        }
        self.drop_handle();
        if self.gave_up {
            return Err(LinkError::ReconnectLimit(self.failed_reconnects));
        }
        if !self.config.reconnect.allows(self.failed_reconnects) {
            warn!(
                attempts = self.failed_reconnects,
                "giving up on the controller, continuing in simulation"
            );
            self.gave_up = true;
            return Err(LinkError::ReconnectLimit(self.failed_reconnects));
        }
        self.reconnect_attempts += 1;
        info!(attempt = self.reconnect_attempts, "reconnecting");
        match self.connect().await {
            Ok(()) => {
                self.failed_reconnects = 0;
                Ok(())
            }
            Err(err) => {
                self.failed_reconnects += 1;
                Err(err)
            }
        }
    }

    async fn write(&mut self, command: SetAngle) -> Result<()> {
        let driver = self.driver.as_mut().ok_or(LinkError::NotConnected)?;
        if let Err(err) = driver.send(command).await {
            self.drop_handle();
            return Err(err);
        }
        debug!(angle = %command.angle(), "sent angle");
        Ok(())
    }

    /// Clamps and sends an angle. A failed write gets one reconnect and
    /// one retry before the error is returned.
    pub async fn send(&mut self, degrees: i64) -> Result<Angle> {
        if self.state == LinkState::Closed {
            return Err(LinkError::Closed);
        }
        if self.port.is_none() {
            return Err(LinkError::NotConnected);
        }
        if self.gave_up {
            return Err(LinkError::ReconnectLimit(self.failed_reconnects));
        }
        let command = SetAngle::clamped(degrees);
        if let Err(err) = self.write(command).await {
            warn!(%err, "failed to send angle");
            self.reconnect().await?;
            self.write(command).await?;
        }
        Ok(command.angle())
    }

    pub fn poll_incoming(&mut self) -> Result<Option<StatusLine>> {
        let driver = match self.driver.as_mut() {
            Some(driver) => driver,
            None => return Ok(None),
        };
        match driver.try_receive() {
            None => Ok(None),
            Some(Ok(line)) => {
                match &line {
                    StatusLine::Ack(angle) => {
                        debug!(%angle, "servo angle");
                        self.confirmed = Some(*angle);
                    }
                    StatusLine::Acknowledged(_) => {}
                    StatusLine::Unrecognized(raw) => debug!(%raw, "ignoring line"),
                }
                Ok(Some(line))
            }
            Some(Err(err)) => {
                self.drop_handle();
                Err(err.into_read_failure())
            }
        }
    }

    pub fn close(&mut self) {
        if self.state == LinkState::Closed {
            return;
        }
        self.drop_handle();
        self.state = LinkState::Closed;
        info!("link closed");
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::ReconnectPolicy;
    use std::collections::VecDeque;
    use std::io;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::mpsc::{channel, Receiver, Sender};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    pub(crate) struct MockDriver {
        written_data: Sender<Vec<u8>>,
        mock_read_data: Arc<Mutex<VecDeque<Result<StatusLine>>>>,
        fail_writes: Arc<AtomicBool>,
    }

    #[async_trait]
    impl FramedDriver for MockDriver {
        async fn send(&mut self, command: SetAngle) -> Result<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(LinkError::WriteFailed(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "unplugged",
                )));
            }
            let payload = crate::protocol::clamp_and_format(command.angle().degrees() as i64);
            self.written_data.send(payload.into_bytes()).unwrap();
            Ok(())
        }

        async fn receive(&mut self) -> Result<StatusLine> {
            self.try_receive().unwrap_or(Err(LinkError::Timeout))
        }

        fn try_receive(&mut self) -> Option<Result<StatusLine>> {
            self.mock_read_data.lock().unwrap().pop_front()
        }
    }

    /// Hands out mock drivers sharing one write log and one read queue.
    #[derive(Clone)]
    pub(crate) struct MockConnector {
        pub(crate) written_data: Sender<Vec<u8>>,
        pub(crate) mock_read_data: Arc<Mutex<VecDeque<Result<StatusLine>>>>,
        pub(crate) fail_writes: Arc<AtomicBool>,
        pub(crate) fail_opens: Arc<AtomicBool>,
        pub(crate) opens: Arc<AtomicUsize>,
    }

    impl MockConnector {
        pub(crate) fn new() -> (MockConnector, Receiver<Vec<u8>>) {
            let (tx, rx) = channel();
            let connector = MockConnector {
                written_data: tx,
                mock_read_data: Arc::new(Mutex::new(VecDeque::new())),
                fail_writes: Arc::new(AtomicBool::new(false)),
                fail_opens: Arc::new(AtomicBool::new(false)),
                opens: Arc::new(AtomicUsize::new(0)),
            };
            (connector, rx)
        }

        pub(crate) fn push_line(&self, line: &str) {
            self.mock_read_data
                .lock()
                .unwrap()
                .push_back(Ok(StatusLine::parse(line)));
        }

        pub(crate) fn push_error(&self, err: LinkError) {
            self.mock_read_data.lock().unwrap().push_back(Err(err));
        }
    }

    #[async_trait]
    impl Connector for MockConnector {
        async fn open(&self, port: &str, _config: &LinkConfig) -> Result<Box<dyn FramedDriver>> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            if self.fail_opens.load(Ordering::SeqCst) {
                return Err(LinkError::OpenFailed {
                    port: port.to_owned(),
                    source: io::Error::new(io::ErrorKind::NotFound, "no such device"),
                });
            }
            Ok(Box::new(MockDriver {
                written_data: self.written_data.clone(),
                mock_read_data: self.mock_read_data.clone(),
                fail_writes: self.fail_writes.clone(),
            }))
        }
    }

    pub(crate) fn mock_link() -> (ServoLink, MockConnector, Receiver<Vec<u8>>) {
        let (connector, rx) = MockConnector::new();
        let link = ServoLink::with_connector(
            Some("/dev/ttyMOCK".to_owned()),
            LinkConfig::default(),
            Box::new(connector.clone()),
        );
        (link, connector, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn connect_sends_test_command() {
        let (mut link, connector, rx) = mock_link();
        connector.push_line("ACK:90");
        link.connect().await.unwrap();
        assert_eq!(link.state(), LinkState::Connected);
        assert_eq!(rx.try_recv().unwrap(), b"S:90\n".to_vec());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn connect_succeeds_without_response() {
        let (mut link, _connector, _rx) = mock_link();
        link.connect().await.unwrap();
        assert!(link.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn connect_succeeds_when_test_command_fails() {
        let (mut link, connector, rx) = mock_link();
        connector.fail_writes.store(true, Ordering::SeqCst);
        link.connect().await.unwrap();
        assert!(link.is_connected());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn handshake_report_sets_confirmed_angle() {
        let (mut link, connector, _rx) = mock_link();
        connector.push_line("A:90");
        link.connect().await.unwrap();
        assert_eq!(link.confirmed_angle(), Angle::new(90));
    }

    #[tokio::test(start_paused = true)]
    async fn open_failure_leaves_link_disconnected() {
        let (mut link, connector, _rx) = mock_link();
        connector.fail_opens.store(true, Ordering::SeqCst);
        match link.connect().await {
            Err(LinkError::OpenFailed { port, .. }) => assert_eq!(port, "/dev/ttyMOCK"),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(link.state(), LinkState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn simulation_mode_has_no_port() {
        let mut link = ServoLink::new(None, LinkConfig::default());
        assert!(link.is_simulated());
        assert!(matches!(link.connect().await, Err(LinkError::PortNotFound)));
        assert!(matches!(link.send(10).await, Err(LinkError::NotConnected)));
        assert!(link.poll_incoming().unwrap().is_none());
        assert_eq!(link.state(), LinkState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn send_clamps_angles() {
        let (mut link, _connector, rx) = mock_link();
        link.connect().await.unwrap();
        let _ = rx.try_recv();
        assert_eq!(link.send(200).await.unwrap(), Angle::MAX);
        assert_eq!(link.send(-5).await.unwrap(), Angle::MIN);
        assert_eq!(rx.try_recv().unwrap(), b"S:180\n".to_vec());
        assert_eq!(rx.try_recv().unwrap(), b"S:0\n".to_vec());
    }

    #[tokio::test(start_paused = true)]
    async fn one_reconnect_per_failed_send() {
        let (mut link, connector, _rx) = mock_link();
        link.connect().await.unwrap();
        connector.fail_writes.store(true, Ordering::SeqCst);
        for failures in 1..=5_u64 {
            assert!(link.send(45).await.is_err());
            assert_eq!(link.reconnect_attempts(), failures);
        }
        // one initial open plus one per failed send
        assert_eq!(connector.opens.load(Ordering::SeqCst), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_that_fails_to_open_reports_error() {
        let (mut link, connector, _rx) = mock_link();
        link.connect().await.unwrap();
        connector.fail_writes.store(true, Ordering::SeqCst);
        connector.fail_opens.store(true, Ordering::SeqCst);
        assert!(matches!(
            link.send(45).await,
            Err(LinkError::OpenFailed { .. })
        ));
        assert_eq!(link.reconnect_attempts(), 1);
        assert_eq!(link.state(), LinkState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn send_recovers_after_reconnect() {
        let (mut link, connector, rx) = mock_link();
        connector.fail_opens.store(true, Ordering::SeqCst);
        assert!(link.connect().await.is_err());
        connector.fail_opens.store(false, Ordering::SeqCst);
        assert_eq!(link.send(120).await.unwrap(), Angle::new(120).unwrap());
        assert_eq!(link.reconnect_attempts(), 1);
        assert_eq!(rx.try_recv().unwrap(), b"S:90\n".to_vec());
        assert_eq!(rx.try_recv().unwrap(), b"S:120\n".to_vec());
        assert!(link.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn poll_updates_confirmed_angle() {
        let (mut link, connector, _rx) = mock_link();
        link.connect().await.unwrap();
        assert_eq!(link.poll_incoming().unwrap(), None);
        connector.push_line("A:45");
        connector.push_line("A:999");
        connector.push_line("hello");
        assert_eq!(
            link.poll_incoming().unwrap(),
            Some(StatusLine::Ack(Angle::new(45).unwrap()))
        );
        assert_eq!(link.confirmed_angle(), Angle::new(45));
        assert!(matches!(
            link.poll_incoming().unwrap(),
            Some(StatusLine::Unrecognized(_))
        ));
        assert_eq!(link.confirmed_angle(), Angle::new(45));
        assert!(link.poll_incoming().unwrap().is_some());
        assert_eq!(link.confirmed_angle(), Angle::new(45));
    }

    #[tokio::test(start_paused = true)]
    async fn read_error_disconnects() {
        let (mut link, connector, _rx) = mock_link();
        link.connect().await.unwrap();
        connector.push_error(LinkError::Io(io::Error::new(
            io::ErrorKind::BrokenPipe,
            "unplugged",
        )));
        assert!(matches!(
            link.poll_incoming(),
            Err(LinkError::ReadFailed(_))
        ));
        assert_eq!(link.state(), LinkState::Disconnected);
        assert!(link.poll_incoming().unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn send_path_respects_reconnect_bound() {
        let (connector, _rx) = MockConnector::new();
        let config = LinkConfig {
            reconnect: ReconnectPolicy::bounded(Duration::from_millis(10), 2),
            ..LinkConfig::default()
        };
        let mut link = ServoLink::with_connector(
            Some("/dev/ttyMOCK".to_owned()),
            config,
            Box::new(connector.clone()),
        );
        connector.fail_opens.store(true, Ordering::SeqCst);
        for _ in 0..10 {
            assert!(link.send(45).await.is_err());
        }
        assert_eq!(link.reconnect_attempts(), 2);
        assert_eq!(connector.opens.load(Ordering::SeqCst), 2);
        assert!(link.has_given_up());
        assert!(matches!(link.send(45).await, Err(LinkError::ReconnectLimit(2))));
    }

    #[tokio::test(start_paused = true)]
    async fn successful_reconnect_resets_failure_count() {
        let (connector, _rx) = MockConnector::new();
        let config = LinkConfig {
            reconnect: ReconnectPolicy::bounded(Duration::from_millis(10), 2),
            ..LinkConfig::default()
        };
        let mut link = ServoLink::with_connector(
            Some("/dev/ttyMOCK".to_owned()),
            config,
            Box::new(connector.clone()),
        );
        connector.fail_opens.store(true, Ordering::SeqCst);
        assert!(link.reconnect().await.is_err());
        connector.fail_opens.store(false, Ordering::SeqCst);
        link.reconnect().await.unwrap();
        connector.fail_opens.store(true, Ordering::SeqCst);
        assert!(link.reconnect().await.is_err());
        assert!(link.reconnect().await.is_err());
        assert!(!link.has_given_up());
        assert_eq!(link.reconnect_attempts(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn close_is_idempotent() {
        let (mut link, _connector, _rx) = mock_link();
        link.close();
        link.close();
        assert_eq!(link.state(), LinkState::Closed);

        let (mut link, _connector, _rx) = mock_link();
        link.connect().await.unwrap();
        link.close();
        link.close();
        assert_eq!(link.state(), LinkState::Closed);
        assert!(matches!(link.send(10).await, Err(LinkError::Closed)));
        assert!(matches!(link.reconnect().await, Err(LinkError::Closed)));
    }
}
