//! Reader monitor thread

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use pcsc::{Context, ReaderState, State};
use tracing::{debug, error, trace, warn};

use crate::config::ClientConfig;
use crate::error::PcscError;
use crate::service::{MonitorEvent, MonitorSender};
use crate::status::ReaderStatus;

/// A running monitor thread and the context it waits on.
pub(super) struct MonitorHandle {
    context: Context,
    stopping: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

impl MonitorHandle {
    /// Establish a dedicated context and start monitoring on a new thread.
    pub(super) fn spawn(config: &ClientConfig, events: MonitorSender) -> Result<Self, PcscError> {
        let context = Context::establish(config.scope.into())?;
        let stopping = Arc::new(AtomicBool::new(false));

        let monitor = Monitor {
            context: context.clone(),
            stopping: Arc::clone(&stopping),
            timeout: config.monitor_timeout,
            max_readers: config.max_readers,
            events,
        };

        let thread = thread::Builder::new()
            .name("pcsc-monitor".into())
            .spawn(move || monitor.run())?;

        Ok(Self {
            context,
            stopping,
            thread,
        })
    }

    /// Cancel the pending wait and join the thread.
    ///
    /// The thread is not joined when called from the monitor thread itself, or
    /// when the wait could not be cancelled.
    pub(super) fn stop(self) -> Result<(), PcscError> {
        self.stopping.store(true, Ordering::Release);

        if let Err(e) = self.context.cancel() {
            warn!(error = %e, "failed to cancel reader monitor wait");
            return Err(e.into());
        }

        if thread::current().id() == self.thread.thread().id() {
            return Ok(());
        }

        if self.thread.join().is_err() {
            error!("reader monitor thread panicked");
        }
        Ok(())
    }
}

struct Monitor {
    context: Context,
    stopping: Arc<AtomicBool>,
    timeout: Option<Duration>,
    max_readers: usize,
    events: MonitorSender,
}

impl Monitor {
    fn run(self) {
        debug!(timeout = ?self.timeout, max_readers = self.max_readers, "reader monitor started");

        let mut states = vec![ReaderState::new(pcsc::PNP_NOTIFICATION(), State::UNAWARE)];
        let mut over_limit = HashSet::new();

        while !self.stopping.load(Ordering::Acquire) {
            if let Err(e) = self.refresh(&mut states, &mut over_limit) {
                error!(error = %e, "failed to list readers");
                let _ = self.events.send(MonitorEvent::Error(e.into()));
                break;
            }

            match self.context.get_status_change(self.timeout, &mut states) {
                Ok(()) => {}
                Err(pcsc::Error::Timeout) => continue,
                Err(pcsc::Error::Cancelled) if self.stopping.load(Ordering::Acquire) => break,
                // A reader vanished between listing and waiting; list again.
                Err(pcsc::Error::UnknownReader) => continue,
                Err(e) => {
                    error!(error = %e, "reader monitor wait failed");
                    let _ = self.events.send(MonitorEvent::Error(e.into()));
                    break;
                }
            }

            if !self.publish(&mut states) {
                debug!("monitor event receiver dropped");
                break;
            }
        }

        debug!("reader monitor stopped");
    }

    /// Sync the watched set with the attached readers. Readers that disappeared
    /// are reported as unknown; new readers are watched from an unaware state so
    /// the next wait reports them immediately.
    fn refresh(
        &self,
        states: &mut Vec<ReaderState>,
        over_limit: &mut HashSet<String>,
    ) -> Result<(), pcsc::Error> {
        let names = match self.context.list_readers_owned() {
            Ok(names) => names,
            Err(pcsc::Error::NoReadersAvailable) => Vec::new(),
            Err(e) => return Err(e),
        };

        states.retain(|state| {
            if is_pnp(state) || names.iter().any(|name| name.as_c_str() == state.name()) {
                return true;
            }
            let reader = state.name().to_string_lossy().into_owned();
            trace!(%reader, "reader no longer listed");
            let _ = self.events.send(MonitorEvent::Change {
                reader,
                status: (ReaderStatus::Unknown | ReaderStatus::Changed).raw(),
                atr: Bytes::new(),
            });
            false
        });

        for name in names {
            if states.iter().any(|state| state.name() == name.as_c_str()) {
                continue;
            }
            // The plug-and-play entry is not a reader.
            if states.len() > self.max_readers {
                let reader = name.to_string_lossy().into_owned();
                if over_limit.insert(reader.clone()) {
                    warn!(%reader, max_readers = self.max_readers, "reader limit reached, not monitoring");
                }
                continue;
            }
            states.push(ReaderState::new(name, State::UNAWARE));
        }

        Ok(())
    }

    /// Push a notification for every reader whose state changed. Returns `false`
    /// once nobody is listening anymore.
    fn publish(&self, states: &mut Vec<ReaderState>) -> bool {
        for state in states.iter_mut() {
            let event = state.event_state();
            state.sync_current_state();

            if is_pnp(state) || !event.contains(State::CHANGED) {
                continue;
            }

            let reader = state.name().to_string_lossy().into_owned();
            let status = (event.bits() & 0xffff) as u32;
            trace!(%reader, status = %crate::reader_status_string(status), "reader state changed");

            let sent = self.events.send(MonitorEvent::Change {
                reader,
                status,
                atr: Bytes::copy_from_slice(state.atr()),
            });
            if sent.is_err() {
                return false;
            }
        }

        states.retain(|state| is_pnp(state) || !state.event_state().contains(State::UNKNOWN));
        true
    }
}

fn is_pnp(state: &ReaderState) -> bool {
    state.name() == pcsc::PNP_NOTIFICATION()
}
