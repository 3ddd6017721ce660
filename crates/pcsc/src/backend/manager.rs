//! Native card service

use std::fmt;

use async_trait::async_trait;
use parking_lot::Mutex;
use pcsc::Context;
use tracing::debug;

use super::handle::PcscCardHandle;
use super::monitor::MonitorHandle;
use crate::config::ClientConfig;
use crate::error::PcscError;
use crate::service::{CardHandle, CardService, MonitorSender};
use crate::types::{CardMode, Protocol};

/// Card service talking to the platform PC/SC resource manager.
pub struct PcscService {
    /// Context used for card connections
    context: Context,
    /// Configuration
    config: ClientConfig,
    /// Monitor of the current session, if any
    monitor: Mutex<Option<MonitorHandle>>,
}

impl PcscService {
    /// Establish a context with the default configuration.
    pub fn new() -> Result<Self, PcscError> {
        Self::with_config(ClientConfig::default())
    }

    /// Establish a context with a custom configuration.
    pub fn with_config(config: ClientConfig) -> Result<Self, PcscError> {
        let context = Context::establish(config.scope.into())?;
        Ok(Self {
            context,
            config,
            monitor: Mutex::new(None),
        })
    }

    /// Names of the readers currently attached, without monitoring them.
    pub fn list_readers(&self) -> Result<Vec<String>, PcscError> {
        match self.context.list_readers_owned() {
            Ok(names) => Ok(names
                .iter()
                .map(|name| name.to_string_lossy().into_owned())
                .collect()),
            Err(pcsc::Error::NoReadersAvailable) => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Configuration the service was created with.
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }
}

impl fmt::Debug for PcscService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PcscService")
            .field("config", &self.config)
            .field("monitoring", &self.monitor.lock().is_some())
            .finish()
    }
}

#[async_trait]
impl CardService for PcscService {
    fn start(&self, events: MonitorSender) -> Result<(), PcscError> {
        let mut monitor = self.monitor.lock();
        if monitor.is_some() {
            return Err(PcscError::AlreadyRunning);
        }
        *monitor = Some(MonitorHandle::spawn(&self.config, events)?);
        Ok(())
    }

    fn stop(&self) -> Result<(), PcscError> {
        // Joining happens outside the lock.
        let monitor = self.monitor.lock().take();
        match monitor {
            Some(monitor) => monitor.stop(),
            None => {
                debug!("reader monitor not running");
                Ok(())
            }
        }
    }

    async fn connect(
        &self,
        reader: &str,
        mode: CardMode,
        protocol: Protocol,
    ) -> Result<Box<dyn CardHandle>, PcscError> {
        let handle = PcscCardHandle::connect(&self.context, reader, mode, protocol).await?;
        Ok(Box::new(handle))
    }
}

impl Drop for PcscService {
    fn drop(&mut self) {
        if let Some(monitor) = self.monitor.get_mut().take() {
            let _ = monitor.stop();
        }
    }
}
