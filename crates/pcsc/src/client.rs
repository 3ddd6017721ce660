//! Reader monitoring sessions

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::backend::PcscService;
use crate::config::ClientConfig;
use crate::error::PcscError;
use crate::event::{ClientEvent, ClientEventDispatcher, EventStream, Subscription};
use crate::reader::Reader;
use crate::service::{CardService, MonitorEvent, MonitorReceiver, monitor_channel};
use crate::status::{ReaderStatus, ReaderStatusFlags};

/// Entry point of the library: watches the attached readers and publishes them
/// as [`Reader`] values.
///
/// A client starts stopped. [`start`](Self::start) launches a monitoring
/// session; every reader attached at that point, and every reader attached
/// later, is published once through [`on_reader`](Self::on_reader). Status
/// transitions are then delivered by the reader itself.
///
/// Handlers run on the client's event thread, one notification at a time and in
/// arrival order. They may call back into the client, including
/// [`stop`](Self::stop) and [`start`](Self::start).
///
/// ```no_run
/// use nexum_pcsc::{CardMode, Client, Disposition, ReaderStatus};
///
/// # fn main() -> Result<(), nexum_pcsc::PcscError> {
/// let client = Client::new()?;
/// let runtime = tokio::runtime::Handle::current();
///
/// let _readers = client.on_reader(move |reader| {
///     let runtime = runtime.clone();
///     let connect_to = reader.clone();
///     let _changes = reader.on_change(move |status, _atr| {
///         if status.has(&[ReaderStatus::Present]) {
///             let reader = connect_to.clone();
///             runtime.spawn(async move {
///                 let card = reader.connect(CardMode::Shared).await?;
///                 let response = card.transmit(&[0x00, 0xa4, 0x04, 0x00]).await?;
///                 println!("{}", hex::encode(&response));
///                 card.disconnect(Disposition::Reset).await
///             });
///         }
///     });
/// });
///
/// client.start()?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    shared: Arc<Shared>,
}

struct Shared {
    service: Arc<dyn CardService>,
    config: ClientConfig,
    events: ClientEventDispatcher,
    state: RwLock<State>,
    next_session: AtomicU64,
}

#[derive(Default)]
struct State {
    /// Id of the running session, `None` while stopped
    session: Option<u64>,
    /// Readers currently attached, by name
    readers: HashMap<String, Reader>,
}

impl Client {
    /// Create a stopped client backed by the platform PC/SC service.
    pub fn new() -> Result<Self, PcscError> {
        Self::with_config(ClientConfig::default())
    }

    /// Create a stopped client backed by the platform PC/SC service.
    pub fn with_config(config: ClientConfig) -> Result<Self, PcscError> {
        let service = PcscService::with_config(config.clone())?;
        Ok(Self::with_service(Arc::new(service), config))
    }

    /// Create a stopped client on top of any card service.
    pub fn with_service(service: Arc<dyn CardService>, config: ClientConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                service,
                config,
                events: ClientEventDispatcher::new(),
                state: RwLock::new(State::default()),
                next_session: AtomicU64::new(0),
            }),
        }
    }

    /// Start monitoring readers.
    ///
    /// Fails with [`PcscError::AlreadyRunning`] if the client is running, or with
    /// the service error if monitoring could not be started (the client then
    /// stays stopped).
    pub fn start(&self) -> Result<(), PcscError> {
        let session = {
            let mut state = self.shared.state.write();
            if state.session.is_some() {
                return Err(PcscError::AlreadyRunning);
            }
            let session = self.shared.next_session.fetch_add(1, Ordering::Relaxed);
            state.session = Some(session);
            session
        };

        let (sender, receiver) = monitor_channel();
        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(format!("pcsc-client-{session}"))
            .spawn(move || shared.run(session, receiver));

        if let Err(e) = spawned {
            self.shared.end_session(session);
            return Err(e.into());
        }

        if let Err(e) = self.shared.service.start(sender) {
            // The event thread exits once the sender is gone.
            self.shared.end_session(session);
            warn!(error = %e, "failed to start reader monitor");
            return Err(e);
        }

        info!(session, "client started");
        Ok(())
    }

    /// Stop monitoring. Every known reader publishes its disconnect event and
    /// the directory is emptied. Stopping a stopped client does nothing.
    ///
    /// Cards connected before the call are left alone.
    pub fn stop(&self) -> Result<(), PcscError> {
        let Some(session) = self.shared.state.write().session.take() else {
            return Ok(());
        };

        let stopped = self.shared.service.stop();

        let readers: Vec<Reader> = self
            .shared
            .state
            .write()
            .readers
            .drain()
            .map(|(_, reader)| reader)
            .collect();
        for reader in &readers {
            reader.detach();
        }

        info!(session, readers = readers.len(), "client stopped");
        stopped
    }

    /// `true` while a monitoring session is running.
    pub fn running(&self) -> bool {
        self.shared.state.read().session.is_some()
    }

    /// Look up an attached reader by name.
    pub fn reader(&self, name: &str) -> Option<Reader> {
        self.shared.state.read().readers.get(name).cloned()
    }

    /// Snapshot of the attached readers, sorted by name.
    pub fn readers(&self) -> Vec<Reader> {
        let mut readers: Vec<Reader> =
            self.shared.state.read().readers.values().cloned().collect();
        readers.sort_by(|a, b| a.name().cmp(b.name()));
        readers
    }

    /// Configuration the client was created with.
    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    /// Call `handler` once for every newly attached reader.
    pub fn on_reader<F>(&self, mut handler: F) -> Subscription
    where
        F: FnMut(Reader) + Send + 'static,
    {
        self.shared.events.subscribe(move |event| {
            if let ClientEvent::Reader(reader) = event {
                handler(reader);
            }
        })
    }

    /// Call `handler` for every error the monitoring session reports while the
    /// client is running.
    pub fn on_error<F>(&self, mut handler: F) -> Subscription
    where
        F: FnMut(PcscError) + Send + 'static,
    {
        self.shared.events.subscribe(move |event| {
            if let ClientEvent::Error(error) = event {
                handler(error);
            }
        })
    }

    /// Stream of every client event published from now on.
    pub fn events(&self) -> EventStream<ClientEvent> {
        EventStream::subscribe(&self.shared.events)
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.read();
        f.debug_struct("Client")
            .field("service", &self.shared.service)
            .field("session", &state.session)
            .field("readers", &state.readers.len())
            .finish()
    }
}

impl Shared {
    fn end_session(&self, session: u64) {
        let mut state = self.state.write();
        if state.session == Some(session) {
            state.session = None;
        }
    }

    fn current(&self, session: u64) -> bool {
        self.state.read().session == Some(session)
    }

    /// Event thread of one session.
    fn run(&self, session: u64, events: MonitorReceiver) {
        debug!(session, "client event thread started");
        for event in events {
            match event {
                MonitorEvent::Change { reader, status, atr } => {
                    self.translate(session, reader, ReaderStatusFlags::from_raw(status), atr);
                }
                MonitorEvent::Error(error) => {
                    if self.current(session) {
                        warn!(session, error = %error, "monitor error");
                        self.events.dispatch(ClientEvent::Error(error));
                    } else {
                        debug!(session, error = %error, "suppressed monitor error after stop");
                    }
                }
            }
        }
        debug!(session, "client event thread finished");
    }

    fn translate(&self, session: u64, name: String, status: ReaderStatusFlags, atr: Bytes) {
        if status.has_any(&[ReaderStatus::Unknown, ReaderStatus::Unavailable]) {
            let removed = {
                let mut state = self.state.write();
                if state.session != Some(session) {
                    return;
                }
                state.readers.remove(&name)
            };
            if let Some(reader) = removed {
                info!(reader = %name, %status, "reader removed");
                reader.detach();
            }
            return;
        }

        let (reader, sighted) = {
            let mut state = self.state.write();
            if state.session != Some(session) {
                return;
            }
            match state.readers.get(&name) {
                Some(reader) => (reader.clone(), false),
                None => {
                    let reader = Reader::new(
                        name.clone(),
                        Arc::clone(&self.service),
                        self.config.default_capacity,
                    );
                    state.readers.insert(name, reader.clone());
                    (reader, true)
                }
            }
        };

        if sighted {
            info!(reader = %reader, %status, "reader attached");
            self.events.dispatch(ClientEvent::Reader(reader.clone()));
        }
        reader.emit_change(status, atr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CardMode;
    use crate::mock::MockService;
    use crossbeam_channel::{Receiver, RecvTimeoutError, unbounded};
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(2);

    #[derive(Debug)]
    enum Seen {
        Reader(String),
        Change(String, ReaderStatusFlags, Bytes),
        Disconnect(String),
        Error(String),
    }

    /// Client plus a channel fed by handlers on every published event.
    fn observed(service: &Arc<MockService>) -> (Client, Receiver<Seen>) {
        let client = Client::with_service(
            Arc::clone(service) as Arc<dyn CardService>,
            ClientConfig::default(),
        );
        let (tx, rx) = unbounded();

        let errors = tx.clone();
        let _ = client.on_error(move |e| {
            let _ = errors.send(Seen::Error(e.code()));
        });
        let _ = client.on_reader(move |reader| {
            let _ = tx.send(Seen::Reader(reader.name().to_string()));
            let name = reader.name().to_string();
            let changes = tx.clone();
            let _ = reader.on_change(move |status, atr| {
                let _ = changes.send(Seen::Change(name.clone(), status, atr));
            });
            let name = reader.name().to_string();
            let disconnects = tx.clone();
            let _ = reader.on_disconnect(move || {
                let _ = disconnects.send(Seen::Disconnect(name.clone()));
            });
        });

        (client, rx)
    }

    fn next(rx: &Receiver<Seen>) -> Seen {
        rx.recv_timeout(WAIT).expect("event")
    }

    fn quiet(rx: &Receiver<Seen>) {
        match rx.recv_timeout(Duration::from_millis(100)) {
            Err(RecvTimeoutError::Timeout) => {}
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_first_sighting_publishes_reader_then_change() {
        let service = Arc::new(MockService::new());
        let (client, rx) = observed(&service);
        client.start().unwrap();

        service.push_change(
            "Reader A",
            ReaderStatus::Present | ReaderStatus::Changed,
            &[0x3b, 0x8f],
        );

        assert!(matches!(next(&rx), Seen::Reader(name) if name == "Reader A"));
        match next(&rx) {
            Seen::Change(name, status, atr) => {
                assert_eq!(name, "Reader A");
                assert!(status.has(&[ReaderStatus::Present]));
                assert_eq!(&atr[..], &[0x3b, 0x8f]);
            }
            other => panic!("unexpected event: {other:?}"),
        }

        // Later notifications only produce changes.
        service.push_change("Reader A", ReaderStatus::Empty | ReaderStatus::Changed, &[]);
        assert!(matches!(
            next(&rx),
            Seen::Change(_, status, _) if status.has(&[ReaderStatus::Empty])
        ));
        quiet(&rx);

        client.stop().unwrap();
    }

    #[test]
    fn test_reader_identity_is_stable() {
        let service = Arc::new(MockService::new());
        let (client, rx) = observed(&service);
        client.start().unwrap();

        service.push_change("Reader A", ReaderStatus::Empty | ReaderStatus::Changed, &[]);
        next(&rx);
        next(&rx);

        let first = client.reader("Reader A").unwrap();
        let second = client.reader("Reader A").unwrap();
        assert!(first.ptr_eq(&second));
        assert!(client.reader("Reader B").is_none());
        assert_eq!(client.readers(), vec![first]);

        client.stop().unwrap();
    }

    #[test]
    fn test_unavailable_reader_is_removed_once() {
        let service = Arc::new(MockService::new());
        let (client, rx) = observed(&service);
        client.start().unwrap();

        service.push_change("Reader A", ReaderStatus::Empty | ReaderStatus::Changed, &[]);
        next(&rx);
        next(&rx);

        service.push_change("Reader A", ReaderStatus::Unknown | ReaderStatus::Changed, &[]);
        assert!(matches!(next(&rx), Seen::Disconnect(name) if name == "Reader A"));

        // A second removal notification is a no-op.
        service.push_change("Reader A", ReaderStatus::Unavailable | ReaderStatus::Changed, &[]);
        quiet(&rx);
        assert!(client.reader("Reader A").is_none());

        // The same name attached again is a new reader.
        service.push_change("Reader A", ReaderStatus::Empty | ReaderStatus::Changed, &[]);
        assert!(matches!(next(&rx), Seen::Reader(_)));

        client.stop().unwrap();
    }

    #[test]
    fn test_errors_forwarded_only_while_running() {
        let service = Arc::new(MockService::new());
        let (client, rx) = observed(&service);
        client.start().unwrap();

        service.push_error(PcscError::Pcsc(pcsc::Error::NoService));
        assert!(matches!(next(&rx), Seen::Error(code) if code == "PCSC_NO_SERVICE"));

        let sender = service.sender().unwrap();
        client.stop().unwrap();
        let _ = sender.send(MonitorEvent::Error(PcscError::Pcsc(pcsc::Error::NoService)));
        quiet(&rx);
    }

    #[test]
    fn test_stop_disconnects_every_reader() {
        let service = Arc::new(MockService::new());
        let (client, rx) = observed(&service);
        client.start().unwrap();
        assert!(client.running());

        service.push_change("Reader A", ReaderStatus::Empty | ReaderStatus::Changed, &[]);
        next(&rx);
        next(&rx);
        let reader = client.reader("Reader A").unwrap();

        client.stop().unwrap();
        assert!(!client.running());
        assert!(matches!(next(&rx), Seen::Disconnect(name) if name == "Reader A"));
        assert!(client.readers().is_empty());
        assert!(!reader.is_attached());

        // Stopping again does nothing.
        client.stop().unwrap();
        quiet(&rx);
    }

    #[test]
    fn test_double_start_fails() {
        let service = Arc::new(MockService::new());
        let (client, _rx) = observed(&service);
        client.start().unwrap();

        let err = client.start().unwrap_err();
        assert!(matches!(err, PcscError::AlreadyRunning));
        assert!(err.is_misuse());
        assert!(client.running());

        client.stop().unwrap();
        client.start().unwrap();
        client.stop().unwrap();
    }

    #[test]
    fn test_failed_service_start_leaves_client_stopped() {
        let service = Arc::new(MockService::new());
        service.fail_start(PcscError::Pcsc(pcsc::Error::NoService));
        let (client, _rx) = observed(&service);

        assert!(client.start().is_err());
        assert!(!client.running());
    }

    #[test]
    fn test_handler_can_restart_client() {
        let service = Arc::new(MockService::new());
        let client = Client::with_service(
            Arc::clone(&service) as Arc<dyn CardService>,
            ClientConfig::default(),
        );
        let (tx, rx) = unbounded();

        let restart = client.clone();
        let _ = client.on_error(move |_| {
            restart.stop().unwrap();
            restart.start().unwrap();
            let _ = tx.send(());
        });

        client.start().unwrap();
        service.push_error(PcscError::Pcsc(pcsc::Error::ReaderUnavailable));
        rx.recv_timeout(WAIT).unwrap();
        assert!(client.running());
        client.stop().unwrap();
    }

    #[test]
    fn test_change_handler_can_stop_client() {
        let service = Arc::new(MockService::new());
        let client = Client::with_service(
            Arc::clone(&service) as Arc<dyn CardService>,
            ClientConfig::default(),
        );
        let (tx, rx) = unbounded();

        let stopper = client.clone();
        let _ = client.on_reader(move |reader| {
            let stopper = stopper.clone();
            let stopped = tx.clone();
            let _ = reader.on_change(move |_, _| {
                stopper.stop().unwrap();
                let _ = stopped.send("stopped");
            });
            let disconnected = tx.clone();
            let _ = reader.on_disconnect(move || {
                let _ = disconnected.send("disconnected");
            });
        });

        client.start().unwrap();
        service.push_change("Reader A", ReaderStatus::Empty | ReaderStatus::Changed, &[]);

        let mut seen = vec![
            rx.recv_timeout(WAIT).unwrap(),
            rx.recv_timeout(WAIT).unwrap(),
        ];
        seen.sort_unstable();
        assert_eq!(seen, vec!["disconnected", "stopped"]);
        assert!(!client.running());
        assert!(client.readers().is_empty());

        // The event thread is still free to serve a new session.
        client.start().unwrap();
        client.stop().unwrap();
    }

    #[tokio::test]
    async fn test_connect_through_published_reader() {
        let service = Arc::new(MockService::new());
        service.insert_card("Reader A", &[0x3b, 0x8f]);
        let client = Client::with_service(
            Arc::clone(&service) as Arc<dyn CardService>,
            ClientConfig::default(),
        );
        let mut events = client.events();
        client.start().unwrap();

        service.push_change(
            "Reader A",
            ReaderStatus::Present | ReaderStatus::Changed,
            &[0x3b, 0x8f],
        );
        let reader = match events.recv().await {
            Some(ClientEvent::Reader(reader)) => reader,
            other => panic!("unexpected event: {other:?}"),
        };

        let card = reader.connect(CardMode::Shared).await.unwrap();
        let response = card.transmit(&[0x00, 0xca, 0x01, 0x00]).await.unwrap();
        assert_eq!(&response[response.len() - 2..], &[0x90, 0x00]);

        // Stopping leaves connected cards usable.
        client.stop().unwrap();
        assert!(card.transmit(&[0x00]).await.is_ok());
    }
}
