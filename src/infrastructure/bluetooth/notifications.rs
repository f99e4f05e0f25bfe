//! Step Notification Stream
//!
//! Subscribes to change events on the step characteristic and hands each
//! decoded value to a consumer callback.

use crate::domain::error::{BandResult, TransportError};
use crate::domain::models::{CharacteristicId, StepCount};
use crate::infrastructure::bluetooth::catalog::{ServiceCatalog, SessionState};
use crate::infrastructure::bluetooth::protocol;
use crate::infrastructure::bluetooth::transport::{GattCharacteristic, HandlerToken};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

struct Subscription<C> {
    handle: C,
    token: HandlerToken,
    // Closed on stop; events still queued in the transport are dropped
    open: Arc<AtomicBool>,
    session: SessionState,
}

pub struct NotificationStream<C> {
    subscription: Option<Subscription<C>>,
}

impl<C: GattCharacteristic> NotificationStream<C> {
    pub fn new() -> Self {
        Self { subscription: None }
    }

    /// Streaming until stopped or until the session's link drops
    pub fn is_streaming(&self) -> bool {
        self.subscription
            .as_ref()
            .is_some_and(|sub| sub.session.is_live())
    }

    /// Begin delivering step updates to `on_step`, one call per change event.
    ///
    /// An active subscription is replaced.
    pub async fn start<F>(&mut self, catalog: &ServiceCatalog<C>, on_step: F) -> BandResult<()>
    where
        F: Fn(StepCount) + Send + Sync + 'static,
    {
        let handle = catalog.require(CharacteristicId::Steps)?.clone();
        if !catalog.is_live() {
            return Err(TransportError::NotConnected.into());
        }
        self.stop().await?;

        let open = Arc::new(AtomicBool::new(true));
        let gate = open.clone();
        let token = handle.on_value_changed(Arc::new(move |value: &[u8]| {
            if !gate.load(Ordering::SeqCst) {
                return;
            }
            match protocol::decode_steps(value) {
                Ok(steps) => on_step(steps),
                Err(e) => warn!("Ignoring step notification: {}", e),
            }
        }))?;

        if let Err(e) = handle.start_notifications().await {
            open.store(false, Ordering::SeqCst);
            if let Err(remove_err) = handle.remove_value_changed(token) {
                debug!("Could not remove step observer: {}", remove_err);
            }
            return Err(e.into());
        }

        info!("Step notifications enabled");
        self.subscription = Some(Subscription {
            handle,
            token,
            open,
            session: catalog.session_state(),
        });
        Ok(())
    }

    /// Stop delivery. Calling it while idle is a no-op.
    pub async fn stop(&mut self) -> BandResult<()> {
        let Some(sub) = self.subscription.take() else {
            return Ok(());
        };
        sub.open.store(false, Ordering::SeqCst);
        let removed = sub.handle.remove_value_changed(sub.token);

        // A dropped link already ended delivery at the transport
        let disabled = if sub.session.is_live() {
            let result = sub.handle.stop_notifications().await;
            if result.is_ok() {
                info!("Step notifications disabled");
            }
            result
        } else {
            debug!("Step stream closed after link loss");
            Ok(())
        };

        // Report the first failure
        removed.and(disabled)?;
        Ok(())
    }
}

impl<C: GattCharacteristic> Default for NotificationStream<C> {
    fn default() -> Self {
        Self::new()
    }
}
