//! Service Catalog
//!
//! Resolves the band's primary service and its fixed characteristics, and
//! routes raw reads and writes through the resolved handles.

use crate::domain::error::{BandError, BandResult, TransportError};
use crate::domain::models::CharacteristicId;
use crate::infrastructure::bluetooth::protocol::SERVICE_UUID16;
use crate::infrastructure::bluetooth::transport::{GattCharacteristic, GattPeripheral, GattService};
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Shared liveness flag of one device session.
///
/// Cloned into the disconnect observer so that link loss can invalidate the
/// session without reaching back into its owner.
#[derive(Debug, Clone)]
pub struct SessionState {
    live: Arc<AtomicBool>,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            live: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// Returns true if this call is the one that ended the session
    pub fn invalidate(&self) -> bool {
        self.live.swap(false, Ordering::SeqCst)
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-identifier resolution results captured at connect time.
///
/// A failed entry keeps its error; it never aborts the session.
#[derive(Debug)]
pub struct CharacteristicTable<C> {
    entries: BTreeMap<CharacteristicId, Result<C, TransportError>>,
}

impl<C> CharacteristicTable<C> {
    pub fn from_resolutions(
        resolutions: impl IntoIterator<Item = (CharacteristicId, Result<C, TransportError>)>,
    ) -> Self {
        Self {
            entries: resolutions.into_iter().collect(),
        }
    }

    pub fn get(&self, id: CharacteristicId) -> Option<&C> {
        self.entries.get(&id).and_then(|entry| entry.as_ref().ok())
    }

    /// The error recorded when `id` failed to resolve
    pub fn failure(&self, id: CharacteristicId) -> Option<&TransportError> {
        self.entries.get(&id).and_then(|entry| entry.as_ref().err())
    }

    pub fn available(&self) -> impl Iterator<Item = CharacteristicId> + '_ {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.is_ok())
            .map(|(id, _)| *id)
    }

    pub fn missing(&self) -> impl Iterator<Item = CharacteristicId> + '_ {
        CharacteristicId::ALL
            .into_iter()
            .filter(move |id| self.get(*id).is_none())
    }
}

pub struct ServiceCatalog<C> {
    table: CharacteristicTable<C>,
    state: SessionState,
}

impl<C: GattCharacteristic> ServiceCatalog<C> {
    pub fn new(table: CharacteristicTable<C>, state: SessionState) -> Self {
        Self { table, state }
    }

    /// Resolve the primary service, then every characteristic concurrently.
    ///
    /// Only a service lookup failure is an error; characteristic failures
    /// are recorded in the table.
    pub async fn resolve<P>(peripheral: &P, state: SessionState) -> BandResult<Self>
    where
        P: GattPeripheral,
        P::Service: GattService<Characteristic = C>,
    {
        let service = peripheral.primary_service(SERVICE_UUID16).await?;
        info!("Found band service 0x{:04X}", SERVICE_UUID16);

        let lookups = CharacteristicId::ALL.into_iter().map(|id| {
            let service = &service;
            async move {
                let result = service.characteristic(id.uuid16()).await;
                match &result {
                    Ok(_) => debug!("Resolved characteristic {}", id),
                    Err(e) => warn!("Characteristic {} unavailable: {}", id, e),
                }
                (id, result)
            }
        });
        let table = CharacteristicTable::from_resolutions(join_all(lookups).await);

        info!(
            "Resolved {}/{} characteristics",
            table.available().count(),
            CharacteristicId::ALL.len()
        );

        Ok(Self::new(table, state))
    }

    pub fn table(&self) -> &CharacteristicTable<C> {
        &self.table
    }

    pub fn is_live(&self) -> bool {
        self.state.is_live()
    }

    pub fn session_state(&self) -> SessionState {
        self.state.clone()
    }

    pub fn resolve_characteristic(&self, id: CharacteristicId) -> Option<&C> {
        self.table.get(id)
    }

    pub fn require(&self, id: CharacteristicId) -> BandResult<&C> {
        self.resolve_characteristic(id)
            .ok_or(BandError::CharacteristicUnavailable(id))
    }

    pub async fn read_raw(&self, handle: &C) -> BandResult<Vec<u8>> {
        self.ensure_live()?;
        let value = handle.read_value().await?;
        debug!("Read {} bytes from 0x{:04X}", value.len(), handle.uuid16());
        Ok(value)
    }

    pub async fn write_raw(&self, handle: &C, value: &[u8]) -> BandResult<()> {
        self.ensure_live()?;
        handle.write_value(value).await?;
        debug!("Wrote {} bytes to 0x{:04X}", value.len(), handle.uuid16());
        Ok(())
    }

    pub async fn read(&self, id: CharacteristicId) -> BandResult<Vec<u8>> {
        let handle = self.require(id)?;
        self.read_raw(handle).await
    }

    pub async fn write(&self, id: CharacteristicId, value: &[u8]) -> BandResult<()> {
        let handle = self.require(id)?;
        self.write_raw(handle, value).await
    }

    fn ensure_live(&self) -> BandResult<()> {
        if self.state.is_live() {
            Ok(())
        } else {
            Err(TransportError::NotConnected.into())
        }
    }
}
