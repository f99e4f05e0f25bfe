//! BLE Connection Module
//!
//! Handles device selection, connection establishment, characteristic
//! resolution and link-loss detection for one band at a time.

use crate::domain::error::{BandError, BandResult, TransportError};
use crate::domain::models::{
    AppEvent, ConnectOutcome, ConnectionStatus, MessageSeverity, StatusMessage,
};
use crate::infrastructure::bluetooth::catalog::{ServiceCatalog, SessionState};
use crate::infrastructure::bluetooth::protocol::SERVICE_UUID16;
use crate::infrastructure::bluetooth::transport::{
    CharacteristicOf, DisconnectHandler, GattPeripheral, GattTransport,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// A live link to one band together with its resolved characteristics
pub struct DeviceSession<T: GattTransport> {
    peripheral: T::Peripheral,
    name: Option<String>,
    catalog: ServiceCatalog<CharacteristicOf<T>>,
    state: SessionState,
}

impl<T: GattTransport> DeviceSession<T> {
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn catalog(&self) -> &ServiceCatalog<CharacteristicOf<T>> {
        &self.catalog
    }

    pub fn is_live(&self) -> bool {
        self.state.is_live()
    }

    /// Invalidate the session and close the link. Returns false when the
    /// link had already dropped.
    fn close(self) -> bool {
        let was_live = self.state.invalidate();
        self.peripheral.disconnect();
        was_live
    }
}

/// Owns the transport and at most one device session
pub struct ConnectionManager<T: GattTransport> {
    transport: T,
    session: Option<DeviceSession<T>>,
    event_sender: mpsc::UnboundedSender<AppEvent>,
}

impl<T: GattTransport> ConnectionManager<T> {
    pub fn new(transport: T, event_sender: mpsc::UnboundedSender<AppEvent>) -> Self {
        Self {
            transport,
            session: None,
            event_sender,
        }
    }

    /// Select a band, connect to it and resolve its characteristics.
    ///
    /// Characteristics that fail to resolve are left out of the table; they
    /// never fail the connect.
    pub async fn connect(&mut self) -> ConnectOutcome {
        if self.session.is_some() {
            info!("Replacing existing session");
            self.disconnect();
        }

        self.send_status(ConnectionStatus::Connecting);
        self.send_log("Looking for a band...", MessageSeverity::Info);

        match self.establish().await {
            Ok(session) => {
                info!(
                    "Session established with {}",
                    session.name().unwrap_or("unnamed device")
                );
                self.session = Some(session);
                self.send_log("Connected", MessageSeverity::Success);
                self.send_status(ConnectionStatus::Connected);
                ConnectOutcome::Connected
            }
            Err(BandError::UserDeclined) => {
                info!("Device selection declined");
                self.send_log("No band selected", MessageSeverity::Warning);
                self.send_status(ConnectionStatus::Disconnected);
                ConnectOutcome::Declined
            }
            Err(e) => {
                error!("Connection failed: {}", e);
                self.send_log(&format!("Connection failed: {}", e), MessageSeverity::Error);
                self.send_status(ConnectionStatus::Error);
                ConnectOutcome::Failed(e)
            }
        }
    }

    async fn establish(&self) -> BandResult<DeviceSession<T>> {
        // Step 1: Device selection
        let peripheral = self
            .transport
            .request_device(SERVICE_UUID16)
            .await?
            .ok_or(BandError::UserDeclined)?;
        let name = peripheral.name();
        info!("Found device {}", name.as_deref().unwrap_or("(unnamed)"));

        // Step 2: Observe link loss before the link exists
        let state = SessionState::new();
        peripheral.on_disconnect(disconnect_observer(
            state.clone(),
            name.clone(),
            self.event_sender.clone(),
        ))?;
        peripheral.connect().await?;
        info!("Connected successfully");

        // Steps 3 and 4: Service and characteristics
        let catalog = match ServiceCatalog::resolve(&peripheral, state.clone()).await {
            Ok(catalog) => catalog,
            Err(e) => {
                state.invalidate();
                peripheral.disconnect();
                return Err(e);
            }
        };

        // The link may have dropped while characteristics were resolving
        if !state.is_live() {
            peripheral.disconnect();
            return Err(TransportError::NotConnected.into());
        }

        for id in catalog.table().missing() {
            warn!("{} is not available in this session", id);
        }

        Ok(DeviceSession {
            peripheral,
            name,
            catalog,
            state,
        })
    }

    /// Close the current session, if any
    pub fn disconnect(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        if !session.close() {
            debug!("Session was already closed by link loss");
            return;
        }
        info!("Disconnected from device");
        self.send_log("Disconnected from device", MessageSeverity::Info);
        self.send_status(ConnectionStatus::Disconnected);
    }

    /// The current session; fails when no band was ever connected
    pub fn session(&self) -> BandResult<&DeviceSession<T>> {
        self.session
            .as_ref()
            .ok_or(BandError::Transport(TransportError::NotConnected))
    }

    pub fn is_connected(&self) -> bool {
        self.session.as_ref().is_some_and(DeviceSession::is_live)
    }

    fn send_status(&self, status: ConnectionStatus) {
        let _ = self.event_sender.send(AppEvent::ConnectionStatus(status));
    }

    fn send_log(&self, message: &str, severity: MessageSeverity) {
        let _ = self.event_sender.send(AppEvent::LogMessage(StatusMessage {
            message: message.to_string(),
            severity,
        }));
    }
}

/// Marks the captured session dead when the link drops. Fires at most once
/// per session; explicit teardown invalidates first and silences it.
fn disconnect_observer(
    state: SessionState,
    name: Option<String>,
    sender: mpsc::UnboundedSender<AppEvent>,
) -> DisconnectHandler {
    Arc::new(move || {
        if !state.invalidate() {
            return;
        }
        let name = name.as_deref().unwrap_or("Band");
        info!("{} has left the building", name);
        let _ = sender.send(AppEvent::LogMessage(StatusMessage {
            message: format!("{} disconnected", name),
            severity: MessageSeverity::Warning,
        }));
        let _ = sender.send(AppEvent::ConnectionStatus(ConnectionStatus::Disconnected));
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::CharacteristicId;
    use crate::infrastructure::bluetooth::mock::{MockPeripheral, MockTransport};

    fn manager(
        transport: MockTransport,
    ) -> (
        ConnectionManager<MockTransport>,
        mpsc::UnboundedReceiver<AppEvent>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ConnectionManager::new(transport, tx), rx)
    }

    fn statuses(rx: &mut mpsc::UnboundedReceiver<AppEvent>) -> Vec<ConnectionStatus> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let AppEvent::ConnectionStatus(status) = event {
                out.push(status);
            }
        }
        out
    }

    #[tokio::test]
    async fn test_connect_resolves_all_characteristics() {
        let peripheral = MockPeripheral::new("MI1S");
        let (mut manager, mut rx) = manager(MockTransport::new(peripheral.clone()));

        assert_eq!(manager.connect().await, ConnectOutcome::Connected);
        assert!(manager.is_connected());
        assert!(peripheral.is_connected());

        let session = manager.session().unwrap();
        assert_eq!(session.name(), Some("MI1S"));
        assert_eq!(session.catalog().table().available().count(), 5);
        assert_eq!(
            statuses(&mut rx),
            vec![ConnectionStatus::Connecting, ConnectionStatus::Connected]
        );
    }

    #[tokio::test]
    async fn test_connect_tolerates_one_failed_characteristic() {
        let peripheral = MockPeripheral::new("MI");
        peripheral.fail_characteristic(CharacteristicId::BatteryInfo);
        let (mut manager, _rx) = manager(MockTransport::new(peripheral));

        assert!(manager.connect().await.is_connected());
        let table = manager.session().unwrap().catalog().table();
        assert!(table.get(CharacteristicId::BatteryInfo).is_none());
        assert!(table.failure(CharacteristicId::BatteryInfo).is_some());
        for id in [
            CharacteristicId::Steps,
            CharacteristicId::DeviceInfo,
            CharacteristicId::ControlPoint,
            CharacteristicId::ConnectionParameters,
        ] {
            assert!(table.get(id).is_some(), "{} should resolve", id);
        }
    }

    #[tokio::test]
    async fn test_connect_succeeds_with_no_characteristics() {
        let peripheral = MockPeripheral::new("MI");
        for id in CharacteristicId::ALL {
            peripheral.fail_characteristic(id);
        }
        let (mut manager, _rx) = manager(MockTransport::new(peripheral));
        assert_eq!(manager.connect().await, ConnectOutcome::Connected);
        assert_eq!(
            manager.session().unwrap().catalog().table().missing().count(),
            5
        );
    }

    #[tokio::test]
    async fn test_declined_selection() {
        let (mut manager, mut rx) = manager(MockTransport::declined());
        let outcome = manager.connect().await;
        assert_eq!(outcome, ConnectOutcome::Declined);
        assert!(!outcome.is_connected());
        assert!(!manager.is_connected());
        assert_eq!(
            statuses(&mut rx),
            vec![ConnectionStatus::Connecting, ConnectionStatus::Disconnected]
        );
    }

    #[tokio::test]
    async fn test_selection_error_is_failure() {
        let error = TransportError::Link("adapter is off".to_string());
        let (mut manager, _rx) = manager(MockTransport::unavailable(error.clone()));
        assert_eq!(
            manager.connect().await,
            ConnectOutcome::Failed(BandError::Transport(error))
        );
    }

    #[tokio::test]
    async fn test_transport_connect_failure() {
        let peripheral = MockPeripheral::new("MI");
        peripheral.fail_connect();
        let (mut manager, mut rx) = manager(MockTransport::new(peripheral));

        let outcome = manager.connect().await;
        assert!(matches!(
            outcome,
            ConnectOutcome::Failed(BandError::Transport(TransportError::Link(_)))
        ));
        assert!(manager.session().is_err());
        assert_eq!(
            statuses(&mut rx),
            vec![ConnectionStatus::Connecting, ConnectionStatus::Error]
        );
    }

    #[tokio::test]
    async fn test_service_failure_closes_link() {
        let peripheral = MockPeripheral::new("MI");
        peripheral.fail_service_lookup();
        let (mut manager, mut rx) = manager(MockTransport::new(peripheral.clone()));

        assert!(matches!(
            manager.connect().await,
            ConnectOutcome::Failed(BandError::Transport(TransportError::Status(_)))
        ));
        assert!(!peripheral.is_connected());
        // The link was closed by us, so the observer stays silent
        assert_eq!(
            statuses(&mut rx),
            vec![ConnectionStatus::Connecting, ConnectionStatus::Error]
        );
    }

    #[tokio::test]
    async fn test_link_loss_invalidates_session() {
        let peripheral = MockPeripheral::new("MI");
        peripheral.set_value(CharacteristicId::Steps, vec![1, 0, 0, 0]);
        let (mut manager, mut rx) = manager(MockTransport::new(peripheral.clone()));
        manager.connect().await;
        statuses(&mut rx);

        peripheral.simulate_link_loss();
        assert!(!manager.is_connected());
        assert_eq!(statuses(&mut rx), vec![ConnectionStatus::Disconnected]);

        let read = manager
            .session()
            .unwrap()
            .catalog()
            .read(CharacteristicId::Steps)
            .await;
        assert_eq!(read, Err(BandError::Transport(TransportError::NotConnected)));
    }

    #[tokio::test]
    async fn test_link_loss_during_resolution_fails_connect() {
        let peripheral = MockPeripheral::new("MI");
        peripheral.drop_link_on_lookup();
        let (mut manager, mut rx) = manager(MockTransport::new(peripheral.clone()));

        assert_eq!(
            manager.connect().await,
            ConnectOutcome::Failed(BandError::Transport(TransportError::NotConnected))
        );
        assert!(!manager.is_connected());
        assert!(manager.session().is_err());
        assert_eq!(
            statuses(&mut rx),
            vec![
                ConnectionStatus::Connecting,
                ConnectionStatus::Disconnected,
                ConnectionStatus::Error,
            ]
        );
    }

    #[tokio::test]
    async fn test_observer_sees_link_loss_during_connect() {
        let peripheral = MockPeripheral::new("MI");
        peripheral.drop_link_on_connect();
        let (mut manager, mut rx) = manager(MockTransport::new(peripheral.clone()));

        assert!(matches!(
            manager.connect().await,
            ConnectOutcome::Failed(BandError::Transport(_))
        ));
        // Disconnected comes from the observer, which must already be in place
        assert_eq!(
            statuses(&mut rx),
            vec![
                ConnectionStatus::Connecting,
                ConnectionStatus::Disconnected,
                ConnectionStatus::Error,
            ]
        );
    }

    #[tokio::test]
    async fn test_disconnect_after_link_loss_reports_once() {
        let peripheral = MockPeripheral::new("MI");
        let (mut manager, mut rx) = manager(MockTransport::new(peripheral.clone()));
        manager.connect().await;
        statuses(&mut rx);

        peripheral.simulate_link_loss();
        manager.disconnect();
        assert!(manager.session().is_err());
        assert_eq!(statuses(&mut rx), vec![ConnectionStatus::Disconnected]);
    }

    #[tokio::test]
    async fn test_explicit_disconnect() {
        let peripheral = MockPeripheral::new("MI");
        let (mut manager, mut rx) = manager(MockTransport::new(peripheral.clone()));
        manager.connect().await;
        statuses(&mut rx);

        manager.disconnect();
        assert!(!peripheral.is_connected());
        assert!(manager.session().is_err());
        assert_eq!(statuses(&mut rx), vec![ConnectionStatus::Disconnected]);

        manager.disconnect();
        assert!(statuses(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_reconnect_replaces_session() {
        let peripheral = MockPeripheral::new("MI");
        let (mut manager, mut rx) = manager(MockTransport::new(peripheral.clone()));
        manager.connect().await;
        assert_eq!(manager.connect().await, ConnectOutcome::Connected);
        assert!(manager.is_connected());
        assert_eq!(
            statuses(&mut rx),
            vec![
                ConnectionStatus::Connecting,
                ConnectionStatus::Connected,
                ConnectionStatus::Disconnected,
                ConnectionStatus::Connecting,
                ConnectionStatus::Connected,
            ]
        );
    }
}
