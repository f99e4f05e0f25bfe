//! GATT Transport Abstraction
//!
//! The band logic is written against these traits so that it can run on top
//! of the WinRT stack or the in-memory [`super::mock`] transport. All
//! operations are asynchronous and are expected to be driven by a single
//! cooperative task.

use crate::domain::error::TransportError;
use std::sync::Arc;

/// Invoked once per characteristic change event with the raw value
pub type ValueChangedHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Invoked whenever the link to the peripheral drops
pub type DisconnectHandler = Arc<dyn Fn() + Send + Sync>;

/// Token returned when a value-changed handler is registered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerToken(pub i64);

/// Entry point of a transport: device selection
#[allow(async_fn_in_trait)]
pub trait GattTransport {
    type Peripheral: GattPeripheral;

    /// Ask for a peripheral advertising `service_uuid16`. `Ok(None)` means the
    /// selection was declined or nothing matched.
    async fn request_device(
        &self,
        service_uuid16: u16,
    ) -> Result<Option<Self::Peripheral>, TransportError>;
}

#[allow(async_fn_in_trait)]
pub trait GattPeripheral {
    type Service: GattService;

    /// Name captured when the device was selected
    fn name(&self) -> Option<String>;

    /// Register a link-loss observer. Must be called before [`Self::connect`].
    fn on_disconnect(&self, handler: DisconnectHandler) -> Result<(), TransportError>;

    async fn connect(&self) -> Result<(), TransportError>;

    async fn primary_service(&self, uuid16: u16) -> Result<Self::Service, TransportError>;

    /// Close the link. Observers registered with [`Self::on_disconnect`] may fire.
    fn disconnect(&self);
}

#[allow(async_fn_in_trait)]
pub trait GattService {
    type Characteristic: GattCharacteristic;

    async fn characteristic(&self, uuid16: u16) -> Result<Self::Characteristic, TransportError>;
}

#[allow(async_fn_in_trait)]
pub trait GattCharacteristic: Clone {
    fn uuid16(&self) -> u16;

    async fn read_value(&self) -> Result<Vec<u8>, TransportError>;

    async fn write_value(&self, value: &[u8]) -> Result<(), TransportError>;

    fn on_value_changed(&self, handler: ValueChangedHandler)
        -> Result<HandlerToken, TransportError>;

    fn remove_value_changed(&self, token: HandlerToken) -> Result<(), TransportError>;

    async fn start_notifications(&self) -> Result<(), TransportError>;

    async fn stop_notifications(&self) -> Result<(), TransportError>;
}

pub type ServiceOf<T> = <<T as GattTransport>::Peripheral as GattPeripheral>::Service;
pub type CharacteristicOf<T> = <ServiceOf<T> as GattService>::Characteristic;
