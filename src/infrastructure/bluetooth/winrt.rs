//! WinRT GATT Transport
//!
//! Implements the transport traits on top of `Windows.Devices.Bluetooth`.

use crate::domain::error::TransportError;
use crate::infrastructure::bluetooth::scanner::BleScanner;
use crate::infrastructure::bluetooth::transport::{
    DisconnectHandler, GattCharacteristic, GattPeripheral, GattService, GattTransport,
    HandlerToken, ValueChangedHandler,
};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::{info, warn};
use windows::core::GUID;
use windows::Devices::Bluetooth::GenericAttributeProfile as gatt;
use windows::Devices::Bluetooth::GenericAttributeProfile::{
    GattClientCharacteristicConfigurationDescriptorValue, GattCommunicationStatus,
    GattDeviceService, GattSession, GattValueChangedEventArgs,
};
use windows::Devices::Bluetooth::{BluetoothCacheMode, BluetoothConnectionStatus, BluetoothLEDevice};
use windows::Foundation::TypedEventHandler;
use windows::Storage::Streams::{DataReader, DataWriter, IBuffer};

const NOTIFY_ATTEMPTS: u32 = 3;
const NOTIFY_RETRY_DELAY_MS: u64 = 500;

impl From<windows::core::Error> for TransportError {
    fn from(err: windows::core::Error) -> Self {
        TransportError::Link(err.message())
    }
}

/// Expand a 16-bit assigned number onto the Bluetooth base UUID
pub fn uuid16_to_guid(short: u16) -> GUID {
    GUID {
        data1: u32::from(short),
        data2: 0x0000,
        data3: 0x1000,
        data4: [0x80, 0x00, 0x00, 0x80, 0x5F, 0x9B, 0x34, 0xFB],
    }
}

fn check_status(status: GattCommunicationStatus, what: &str) -> Result<(), TransportError> {
    if status == GattCommunicationStatus::Success {
        Ok(())
    } else {
        Err(TransportError::Status(format!("{}: {:?}", what, status)))
    }
}

fn buffer_to_vec(buffer: &IBuffer) -> Result<Vec<u8>, TransportError> {
    let reader = DataReader::FromBuffer(buffer)?;
    let length = reader.UnconsumedBufferLength()? as usize;
    let mut bytes = vec![0u8; length];
    reader.ReadBytes(&mut bytes)?;
    Ok(bytes)
}

/// Device picker backed by an advertisement scan
pub struct WinRtTransport {
    scan_timeout: Duration,
}

impl WinRtTransport {
    pub fn new(scan_timeout: Duration) -> Self {
        Self { scan_timeout }
    }
}

impl GattTransport for WinRtTransport {
    type Peripheral = WinRtPeripheral;

    async fn request_device(
        &self,
        service_uuid16: u16,
    ) -> Result<Option<WinRtPeripheral>, TransportError> {
        let mut scanner = BleScanner::new();
        let Some(found) = scanner
            .select_first(service_uuid16, self.scan_timeout)
            .await?
        else {
            return Ok(None);
        };

        let device = BluetoothLEDevice::FromBluetoothAddressAsync(found.address)?.await?;
        Ok(Some(WinRtPeripheral {
            device,
            name: Some(found.name),
            session: Mutex::new(None),
        }))
    }
}

pub struct WinRtPeripheral {
    device: BluetoothLEDevice,
    name: Option<String>,
    // Held for the life of the link so Windows keeps it open
    session: Mutex<Option<GattSession>>,
}

impl GattPeripheral for WinRtPeripheral {
    type Service = WinRtService;

    fn name(&self) -> Option<String> {
        self.name.clone()
    }

    fn on_disconnect(&self, handler: DisconnectHandler) -> Result<(), TransportError> {
        let status_handler =
            TypedEventHandler::new(move |dev: windows::core::Ref<BluetoothLEDevice>, _| {
                if let Some(dev) = dev.as_ref() {
                    if let Ok(BluetoothConnectionStatus::Disconnected) = dev.ConnectionStatus() {
                        handler();
                    }
                }
                Ok(())
            });
        self.device.ConnectionStatusChanged(&status_handler)?;
        Ok(())
    }

    async fn connect(&self) -> Result<(), TransportError> {
        let device_id = self.device.BluetoothDeviceId()?;
        let session = GattSession::FromDeviceIdAsync(&device_id)?.await?;
        session.SetMaintainConnection(true)?;
        info!("GattSession created, MaintainConnection set to true");
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = Some(session);
        Ok(())
    }

    async fn primary_service(&self, uuid16: u16) -> Result<WinRtService, TransportError> {
        let services_result = self
            .device
            .GetGattServicesForUuidWithCacheModeAsync(
                uuid16_to_guid(uuid16),
                BluetoothCacheMode::Uncached,
            )?
            .await?;
        check_status(services_result.Status()?, "service lookup")?;

        let services = services_result.Services()?;
        if services.Size()? == 0 {
            return Err(TransportError::Status(format!(
                "service 0x{:04X} not found",
                uuid16
            )));
        }
        Ok(WinRtService {
            service: services.GetAt(0)?,
        })
    }

    fn disconnect(&self) {
        if let Some(session) = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            let _ = session.Close();
        }
        let _ = self.device.Close();
    }
}

pub struct WinRtService {
    service: GattDeviceService,
}

impl GattService for WinRtService {
    type Characteristic = WinRtCharacteristic;

    async fn characteristic(&self, uuid16: u16) -> Result<WinRtCharacteristic, TransportError> {
        let chars_result = self
            .service
            .GetCharacteristicsForUuidWithCacheModeAsync(
                uuid16_to_guid(uuid16),
                BluetoothCacheMode::Uncached,
            )?
            .await?;
        check_status(chars_result.Status()?, "characteristic lookup")?;

        let characteristics = chars_result.Characteristics()?;
        if characteristics.Size()? == 0 {
            return Err(TransportError::Status(format!(
                "characteristic 0x{:04X} not found",
                uuid16
            )));
        }
        Ok(WinRtCharacteristic {
            inner: characteristics.GetAt(0)?,
            uuid16,
        })
    }
}

#[derive(Clone)]
pub struct WinRtCharacteristic {
    inner: gatt::GattCharacteristic,
    uuid16: u16,
}

impl WinRtCharacteristic {
    async fn write_cccd(
        &self,
        value: GattClientCharacteristicConfigurationDescriptorValue,
    ) -> Result<(), TransportError> {
        let mut last_error = None;
        for attempt in 1..=NOTIFY_ATTEMPTS {
            let result = self
                .inner
                .WriteClientCharacteristicConfigurationDescriptorAsync(value)?
                .await
                .map_err(TransportError::from)
                .and_then(|status| check_status(status, "CCCD write"));

            match result {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(
                        "CCCD write on 0x{:04X} attempt {}/{} failed: {}",
                        self.uuid16, attempt, NOTIFY_ATTEMPTS, e
                    );
                    last_error = Some(e);
                    if attempt < NOTIFY_ATTEMPTS {
                        tokio::time::sleep(Duration::from_millis(NOTIFY_RETRY_DELAY_MS)).await;
                    }
                }
            }
        }
        Err(last_error.unwrap_or_else(|| TransportError::Status("CCCD write".to_string())))
    }
}

impl GattCharacteristic for WinRtCharacteristic {
    fn uuid16(&self) -> u16 {
        self.uuid16
    }

    async fn read_value(&self) -> Result<Vec<u8>, TransportError> {
        let read_result = self
            .inner
            .ReadValueWithCacheModeAsync(BluetoothCacheMode::Uncached)?
            .await?;
        check_status(read_result.Status()?, "read")?;
        buffer_to_vec(&read_result.Value()?)
    }

    async fn write_value(&self, value: &[u8]) -> Result<(), TransportError> {
        let writer = DataWriter::new()?;
        writer.WriteBytes(value)?;
        let buffer = writer.DetachBuffer()?;
        let status = self.inner.WriteValueAsync(&buffer)?.await?;
        check_status(status, "write")
    }

    fn on_value_changed(
        &self,
        handler: ValueChangedHandler,
    ) -> Result<HandlerToken, TransportError> {
        let value_handler = TypedEventHandler::new(
            move |_: windows::core::Ref<gatt::GattCharacteristic>,
                  args: windows::core::Ref<GattValueChangedEventArgs>| {
                if let Some(args) = args.as_ref() {
                    if let Ok(value) = args.CharacteristicValue() {
                        match buffer_to_vec(&value) {
                            Ok(bytes) => handler(&bytes),
                            Err(e) => warn!("Unreadable notification buffer: {}", e),
                        }
                    }
                }
                Ok(())
            },
        );
        let token = self.inner.ValueChanged(&value_handler)?;
        Ok(HandlerToken(token))
    }

    fn remove_value_changed(&self, token: HandlerToken) -> Result<(), TransportError> {
        self.inner.RemoveValueChanged(token.0)?;
        Ok(())
    }

    async fn start_notifications(&self) -> Result<(), TransportError> {
        self.write_cccd(GattClientCharacteristicConfigurationDescriptorValue::Notify)
            .await
    }

    async fn stop_notifications(&self) -> Result<(), TransportError> {
        self.write_cccd(GattClientCharacteristicConfigurationDescriptorValue::None)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid16_to_guid() {
        let guid = uuid16_to_guid(0xFEE0);
        assert_eq!(guid.data1, 0x0000FEE0);
        assert_eq!(guid.data3, 0x1000);
        assert_eq!(guid.data4[7], 0xFB);
    }
}
