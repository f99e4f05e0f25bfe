//! In-memory GATT transport.
//!
//! Scripted peripheral used by the tests and by front-ends that want to run
//! without hardware. Change events are delivered synchronously, in the order
//! they are emitted.

use crate::domain::error::TransportError;
use crate::domain::models::CharacteristicId;
use crate::infrastructure::bluetooth::protocol::SERVICE_UUID16;
use crate::infrastructure::bluetooth::transport::{
    DisconnectHandler, GattCharacteristic, GattPeripheral, GattService, GattTransport,
    HandlerToken, ValueChangedHandler,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct MockState {
    connected: bool,
    fail_connect: bool,
    fail_service: bool,
    stale_dispatch: bool,
    drop_on_connect: bool,
    drop_on_lookup: bool,
    fail_removal: bool,
    failing: HashSet<u16>,
    values: HashMap<u16, Vec<u8>>,
    written: HashMap<u16, Vec<Vec<u8>>>,
    notifying: HashSet<u16>,
    value_handlers: Vec<(u16, HandlerToken, ValueChangedHandler)>,
    disconnect_handlers: Vec<DisconnectHandler>,
    next_token: i64,
}

#[derive(Clone)]
pub struct MockPeripheral {
    name: Option<String>,
    state: Arc<Mutex<MockState>>,
}

impl MockPeripheral {
    pub fn new(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn fail_connect(&self) {
        self.lock().fail_connect = true;
    }

    pub fn fail_service_lookup(&self) {
        self.lock().fail_service = true;
    }

    /// Keep dispatching to observers after they are removed, like a stack
    /// draining events that were queued before the removal.
    pub fn dispatch_stale_events(&self) {
        self.lock().stale_dispatch = true;
    }

    /// Lose the link right after the connection is established
    pub fn drop_link_on_connect(&self) {
        self.lock().drop_on_connect = true;
    }

    /// Lose the link during the first characteristic lookup
    pub fn drop_link_on_lookup(&self) {
        self.lock().drop_on_lookup = true;
    }

    pub fn fail_observer_removal(&self) {
        self.lock().fail_removal = true;
    }

    pub fn fail_characteristic(&self, id: CharacteristicId) {
        self.lock().failing.insert(id.uuid16());
    }

    pub fn set_value(&self, id: CharacteristicId, value: Vec<u8>) {
        self.lock().values.insert(id.uuid16(), value);
    }

    /// Values written to `id`, oldest first
    pub fn written(&self, id: CharacteristicId) -> Vec<Vec<u8>> {
        self.lock()
            .written
            .get(&id.uuid16())
            .cloned()
            .unwrap_or_default()
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    pub fn is_notifying(&self, id: CharacteristicId) -> bool {
        self.lock().notifying.contains(&id.uuid16())
    }

    pub fn handler_count(&self, id: CharacteristicId) -> usize {
        let uuid16 = id.uuid16();
        self.lock()
            .value_handlers
            .iter()
            .filter(|(uuid, _, _)| *uuid == uuid16)
            .count()
    }

    /// Push a new value the way the peripheral does: only while notifications
    /// are enabled. Returns whether the event was delivered.
    pub fn notify(&self, id: CharacteristicId, value: &[u8]) -> bool {
        if !self.is_notifying(id) {
            return false;
        }
        self.emit(id, value);
        true
    }

    /// Deliver a change event to every registered observer regardless of
    /// notification state, like an event already queued when delivery stops.
    pub fn emit(&self, id: CharacteristicId, value: &[u8]) {
        let uuid16 = id.uuid16();
        let handlers: Vec<ValueChangedHandler> = {
            let mut state = self.lock();
            state.values.insert(uuid16, value.to_vec());
            state
                .value_handlers
                .iter()
                .filter(|(uuid, _, _)| *uuid == uuid16)
                .map(|(_, _, handler)| handler.clone())
                .collect()
        };
        for handler in handlers {
            handler(value);
        }
    }

    /// Drop the link from the peripheral side
    pub fn simulate_link_loss(&self) {
        drop_link(&self.state);
    }
}

fn drop_link(state: &Mutex<MockState>) {
    let handlers = {
        let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
        if !state.connected {
            return;
        }
        state.connected = false;
        state.notifying.clear();
        state.disconnect_handlers.clone()
    };
    for handler in handlers {
        handler();
    }
}

impl GattPeripheral for MockPeripheral {
    type Service = MockService;

    fn name(&self) -> Option<String> {
        self.name.clone()
    }

    fn on_disconnect(&self, handler: DisconnectHandler) -> Result<(), TransportError> {
        self.lock().disconnect_handlers.push(handler);
        Ok(())
    }

    async fn connect(&self) -> Result<(), TransportError> {
        let drop_now = {
            let mut state = self.lock();
            if state.fail_connect {
                return Err(TransportError::Link("connection attempt failed".to_string()));
            }
            state.connected = true;
            state.drop_on_connect
        };
        if drop_now {
            self.simulate_link_loss();
        }
        Ok(())
    }

    async fn primary_service(&self, uuid16: u16) -> Result<MockService, TransportError> {
        let state = self.lock();
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        if state.fail_service || uuid16 != SERVICE_UUID16 {
            return Err(TransportError::Status(format!(
                "service 0x{:04X} not found",
                uuid16
            )));
        }
        Ok(MockService {
            state: self.state.clone(),
        })
    }

    fn disconnect(&self) {
        self.simulate_link_loss();
    }
}

pub struct MockService {
    state: Arc<Mutex<MockState>>,
}

impl GattService for MockService {
    type Characteristic = MockCharacteristic;

    async fn characteristic(&self, uuid16: u16) -> Result<MockCharacteristic, TransportError> {
        let drop_now = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut state.drop_on_lookup)
        };
        if drop_now {
            drop_link(&self.state);
        }

        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !state.connected {
            return Err(TransportError::Link("device is unreachable".to_string()));
        }
        if state.failing.contains(&uuid16) {
            return Err(TransportError::Status(format!(
                "characteristic 0x{:04X} not found",
                uuid16
            )));
        }
        Ok(MockCharacteristic {
            uuid16,
            state: self.state.clone(),
        })
    }
}

#[derive(Clone)]
pub struct MockCharacteristic {
    uuid16: u16,
    state: Arc<Mutex<MockState>>,
}

impl MockCharacteristic {
    fn lock_connected(&self) -> Result<MutexGuard<'_, MockState>, TransportError> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.connected {
            Ok(state)
        } else {
            Err(TransportError::Link("device is unreachable".to_string()))
        }
    }
}

impl std::fmt::Debug for MockCharacteristic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MockCharacteristic(0x{:04X})", self.uuid16)
    }
}

impl GattCharacteristic for MockCharacteristic {
    fn uuid16(&self) -> u16 {
        self.uuid16
    }

    async fn read_value(&self) -> Result<Vec<u8>, TransportError> {
        let state = self.lock_connected()?;
        Ok(state.values.get(&self.uuid16).cloned().unwrap_or_default())
    }

    async fn write_value(&self, value: &[u8]) -> Result<(), TransportError> {
        let mut state = self.lock_connected()?;
        state
            .written
            .entry(self.uuid16)
            .or_default()
            .push(value.to_vec());
        Ok(())
    }

    fn on_value_changed(
        &self,
        handler: ValueChangedHandler,
    ) -> Result<HandlerToken, TransportError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.next_token += 1;
        let token = HandlerToken(state.next_token);
        state.value_handlers.push((self.uuid16, token, handler));
        Ok(token)
    }

    fn remove_value_changed(&self, token: HandlerToken) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.fail_removal {
            return Err(TransportError::Status("observer removal failed".to_string()));
        }
        if !state.stale_dispatch {
            state.value_handlers.retain(|(_, t, _)| *t != token);
        }
        Ok(())
    }

    async fn start_notifications(&self) -> Result<(), TransportError> {
        let mut state = self.lock_connected()?;
        state.notifying.insert(self.uuid16);
        Ok(())
    }

    async fn stop_notifications(&self) -> Result<(), TransportError> {
        let mut state = self.lock_connected()?;
        state.notifying.remove(&self.uuid16);
        Ok(())
    }
}

/// Device picker that offers at most one scripted peripheral
pub struct MockTransport {
    peripheral: Option<MockPeripheral>,
    selection_error: Option<TransportError>,
}

impl MockTransport {
    pub fn new(peripheral: MockPeripheral) -> Self {
        Self {
            peripheral: Some(peripheral),
            selection_error: None,
        }
    }

    /// A picker the user dismisses
    pub fn declined() -> Self {
        Self {
            peripheral: None,
            selection_error: None,
        }
    }

    /// A picker that cannot run at all, e.g. radio switched off
    pub fn unavailable(error: TransportError) -> Self {
        Self {
            peripheral: None,
            selection_error: Some(error),
        }
    }
}

impl GattTransport for MockTransport {
    type Peripheral = MockPeripheral;

    async fn request_device(
        &self,
        service_uuid16: u16,
    ) -> Result<Option<MockPeripheral>, TransportError> {
        if let Some(error) = &self.selection_error {
            return Err(error.clone());
        }
        if service_uuid16 != SERVICE_UUID16 {
            return Ok(None);
        }
        Ok(self.peripheral.clone())
    }
}
