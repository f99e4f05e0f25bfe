//! Band Service Module
//!
//! `MiBand` is the surface a presentation layer talks to: connect, one-shot
//! reads of every decoded reading, and the live step stream.

use crate::domain::error::BandResult;
use crate::domain::models::{
    AppEvent, BatteryInfo, CharacteristicId, ConnectOutcome, ConnectionParameters, DeviceInfo,
    StepCount,
};
use crate::infrastructure::bluetooth::connection::ConnectionManager;
use crate::infrastructure::bluetooth::notifications::NotificationStream;
use crate::infrastructure::bluetooth::protocol;
use crate::infrastructure::bluetooth::transport::{CharacteristicOf, GattTransport};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub struct MiBand<T: GattTransport> {
    connection: ConnectionManager<T>,
    steps: NotificationStream<CharacteristicOf<T>>,
}

impl<T: GattTransport> MiBand<T> {
    pub fn new(transport: T, event_sender: mpsc::UnboundedSender<AppEvent>) -> Self {
        Self {
            connection: ConnectionManager::new(transport, event_sender),
            steps: NotificationStream::new(),
        }
    }

    /// Connect to the first band the transport offers
    pub async fn connect(&mut self) -> ConnectOutcome {
        self.close_stream().await;
        self.connection.connect().await
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Name captured when the band was selected
    pub fn device_name(&self) -> Option<String> {
        self.connection
            .session()
            .ok()
            .and_then(|session| session.name().map(str::to_string))
    }

    pub async fn get_battery_info(&self) -> BandResult<BatteryInfo> {
        let bytes = self.read(CharacteristicId::BatteryInfo).await?;
        protocol::decode_battery_info(&bytes)
    }

    pub async fn get_device_info(&self) -> BandResult<DeviceInfo> {
        let bytes = self.read(CharacteristicId::DeviceInfo).await?;
        protocol::decode_device_info(&bytes)
    }

    pub async fn get_bluetooth_connection_parameters(&self) -> BandResult<ConnectionParameters> {
        let bytes = self.read(CharacteristicId::ConnectionParameters).await?;
        protocol::decode_connection_parameters(&bytes)
    }

    pub async fn get_steps(&self) -> BandResult<StepCount> {
        let bytes = self.read(CharacteristicId::Steps).await?;
        protocol::decode_steps(&bytes)
    }

    /// Send a raw command to the control point
    pub async fn write_control_point(&self, command: &[u8]) -> BandResult<()> {
        self.connection
            .session()?
            .catalog()
            .write(CharacteristicId::ControlPoint, command)
            .await
    }

    /// Deliver every step change to `on_step` until [`Self::stop_scan_steps`]
    pub async fn scan_steps<F>(&mut self, on_step: F) -> BandResult<()>
    where
        F: Fn(StepCount) + Send + Sync + 'static,
    {
        let catalog = self.connection.session()?.catalog();
        self.steps.start(catalog, on_step).await
    }

    pub async fn stop_scan_steps(&mut self) -> BandResult<()> {
        self.steps.stop().await
    }

    pub fn is_scanning_steps(&self) -> bool {
        self.steps.is_streaming()
    }

    /// Stop streaming and close the link
    pub async fn disconnect(&mut self) {
        self.close_stream().await;
        self.connection.disconnect();
        info!("Band session closed");
    }

    async fn read(&self, id: CharacteristicId) -> BandResult<Vec<u8>> {
        let bytes = self.connection.session()?.catalog().read(id).await?;
        debug!("{} -> {:02X?}", id, bytes);
        Ok(bytes)
    }

    async fn close_stream(&mut self) {
        if let Err(e) = self.steps.stop().await {
            warn!("Failed to stop step notifications: {}", e);
        }
    }
}
