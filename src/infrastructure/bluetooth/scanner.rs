//! BLE Scanner Module
//!
//! Advertisement watcher used as the device picker on Windows.

use crate::domain::error::TransportError;
use crate::infrastructure::bluetooth::protocol;
use crate::infrastructure::bluetooth::winrt::uuid16_to_guid;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;
use windows::Devices::Bluetooth::Advertisement::{
    BluetoothLEAdvertisementReceivedEventArgs, BluetoothLEAdvertisementWatcher,
    BluetoothLEScanningMode,
};
use windows::Foundation::TypedEventHandler;

#[derive(Debug, Clone)]
pub struct ScannedDevice {
    pub name: String,
    pub address: u64,
    pub signal_strength: i16,
}

/// BLE Scanner for discovering bands
pub struct BleScanner {
    watcher: Option<BluetoothLEAdvertisementWatcher>,
}

impl BleScanner {
    pub fn new() -> Self {
        Self { watcher: None }
    }

    /// Start reporting every advertiser of `service_uuid16` on `sender`
    pub fn start(
        &mut self,
        service_uuid16: u16,
        sender: mpsc::UnboundedSender<ScannedDevice>,
    ) -> Result<(), TransportError> {
        self.stop()?;

        info!(
            "Starting BLE scan for service UUID: {}",
            protocol::expand_uuid16(service_uuid16)
        );

        let watcher = BluetoothLEAdvertisementWatcher::new()?;
        watcher.SetScanningMode(BluetoothLEScanningMode::Active)?;

        let target_uuid = uuid16_to_guid(service_uuid16);

        let handler = TypedEventHandler::new(
            move |_: windows::core::Ref<BluetoothLEAdvertisementWatcher>,
                  args: windows::core::Ref<BluetoothLEAdvertisementReceivedEventArgs>| {
                if let Some(args) = args.as_ref() {
                    let adv = args.Advertisement()?;
                    let service_uuids = adv.ServiceUuids()?;

                    let mut found = false;
                    for i in 0..service_uuids.Size()? {
                        if service_uuids.GetAt(i)? == target_uuid {
                            found = true;
                            break;
                        }
                    }

                    if found {
                        let name = adv.LocalName()?.to_string();
                        let device = ScannedDevice {
                            name: if name.is_empty() {
                                "Unknown".to_string()
                            } else {
                                name
                            },
                            address: args.BluetoothAddress()?,
                            signal_strength: args.RawSignalStrengthInDBm()?,
                        };
                        let _ = sender.send(device);
                    }
                }
                Ok(())
            },
        );

        watcher.Received(&handler)?;
        watcher.Start()?;
        self.watcher = Some(watcher);

        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), TransportError> {
        if let Some(watcher) = self.watcher.take() {
            info!("Stopping BLE scan...");
            watcher.Stop()?;
        }
        Ok(())
    }

    /// Scan until the first matching advertiser shows up or `timeout` elapses
    pub async fn select_first(
        &mut self,
        service_uuid16: u16,
        timeout: Duration,
    ) -> Result<Option<ScannedDevice>, TransportError> {
        let (sender, mut receiver) = mpsc::unbounded_channel();
        self.start(service_uuid16, sender)?;
        let found = tokio::time::timeout(timeout, receiver.recv())
            .await
            .ok()
            .flatten();
        self.stop()?;

        match &found {
            Some(device) => info!(
                "Selected {} ({:#X}, {} dBm)",
                device.name, device.address, device.signal_strength
            ),
            None => info!("No band advertised within {:?}", timeout),
        }
        Ok(found)
    }
}

impl Default for BleScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for BleScanner {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
