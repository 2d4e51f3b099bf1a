//! Line-framed TCP fallback transport for chat messages.
//!
//! Multicast is lossy on some networks, so TCP-capable clients exchange
//! chat over direct connections as well and let the deduplicator pick one
//! copy. A connection starts with a single identification line carrying
//! the sender's user code; every later line is a regular wire message.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, warn};

use parlor_shared::constants::PORT_BIND_ATTEMPTS;
use parlor_shared::types::User;
use parlor_shared::Settings;

use crate::event::{TcpReceiverListener, UserRegistry};

const CLIENT_QUEUE_SIZE: usize = 64;

type ClientMap = Arc<Mutex<HashMap<i32, mpsc::Sender<String>>>>;

/// Accepts and opens chat connections to TCP-capable users, keeping one
/// live connection per user code.
pub struct TcpChatService {
    settings: Settings,
    registry: RwLock<Option<Arc<dyn UserRegistry>>>,
    listener: RwLock<Option<Arc<dyn TcpReceiverListener>>>,
    clients: ClientMap,
    started: Mutex<bool>,
    stop_signal: Mutex<Option<watch::Sender<()>>>,
}

impl TcpChatService {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            registry: RwLock::new(None),
            listener: RwLock::new(None),
            clients: Arc::new(Mutex::new(HashMap::new())),
            started: Mutex::new(false),
            stop_signal: Mutex::new(None),
        }
    }

    pub fn register_listener(&self, listener: Arc<dyn TcpReceiverListener>) {
        *self
            .listener
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(listener);
    }

    pub fn register_user_registry(&self, registry: Arc<dyn UserRegistry>) {
        *self
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(registry);
    }

    /// Bind the first free port in `[base_port, base_port + 50)` and start
    /// accepting connections. The chosen port is recorded on the local
    /// user so other clients learn where to connect. Must be called from
    /// within a tokio runtime.
    pub fn start(&self, base_port: u16) -> bool {
        let mut started = self.started_lock();

        if *started {
            debug!("Already started");
            return true;
        }

        for port in base_port..base_port + PORT_BIND_ATTEMPTS {
            match bind_listener(port) {
                Ok(listener) => {
                    debug!(port, "TCP chat service started");

                    {
                        let mut me = self.settings.me().write();
                        me.tcp_chat_port = port;
                        me.tcp_enabled = true;
                    }

                    *started = true;
                    tokio::spawn(accept_loop(
                        listener,
                        self.clients.clone(),
                        self.message_listener(),
                        self.user_registry(),
                        self.shutdown_rx(),
                    ));

                    return true;
                }
                Err(e) => debug!(port, error = %e, "Port taken, trying next"),
            }
        }

        error!(base_port, "No available TCP port found");
        false
    }

    /// Drop all connections and stop accepting new ones. The stop signal
    /// reaches the accept loop and every connection task, including tasks
    /// that have not been polled yet.
    pub fn stop(&self) {
        let mut started = self.started_lock();
        let was_started = *started;
        *started = false;

        if let Some(stop) = self
            .stop_signal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            let _ = stop.send(());
        }

        self.clients_lock().clear();

        if was_started {
            let mut me = self.settings.me().write();
            me.tcp_chat_port = 0;
            me.tcp_enabled = false;

            debug!("TCP chat service stopped");
        }
    }

    /// Queue a message on every open connection.
    pub async fn send_to_all(&self, message: &str) {
        let clients: Vec<(i32, mpsc::Sender<String>)> = self
            .clients_lock()
            .iter()
            .map(|(code, tx)| (*code, tx.clone()))
            .collect();

        for (code, tx) in clients {
            if tx.send(message.to_string()).await.is_err() {
                debug!(code, "Client gone, dropping connection entry");
                self.clients_lock().remove(&code);
            }
        }
    }

    /// Queue a message for one user, connecting first if no connection to
    /// that user is open yet. Returns whether the message was queued.
    pub async fn send_to_user(&self, message: &str, user: &User) -> bool {
        if !user.tcp_enabled || user.tcp_chat_port == 0 {
            return false;
        }

        let tx = match self.client_for(user.code()) {
            Some(tx) => tx,
            None => match self.connect_to_user(user).await {
                Some(tx) => tx,
                None => return false,
            },
        };

        match tx.send(message.to_string()).await {
            Ok(()) => true,
            Err(_) => {
                debug!(code = user.code(), "Client gone, dropping connection entry");
                self.clients_lock().remove(&user.code());
                false
            }
        }
    }

    /// Open an outgoing connection to a user, identify with our own user
    /// code, and register the connection like an accepted one.
    async fn connect_to_user(&self, user: &User) -> Option<mpsc::Sender<String>> {
        let ip = match user.ip_address {
            Some(ip) => ip,
            None => return None,
        };

        let address = SocketAddr::new(ip, user.tcp_chat_port);

        let stream = match TcpStream::connect(address).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(to = %address, error = %e, "Could not connect");
                return None;
            }
        };

        debug!(to = %address, code = user.code(), "Connected");

        let tx = spawn_connection(
            stream,
            ip,
            user.clone(),
            self.clients.clone(),
            self.message_listener(),
            Some(self.settings.me().code()),
            self.shutdown_rx(),
        );

        self.clients_lock().insert(user.code(), tx.clone());
        Some(tx)
    }

    fn client_for(&self, code: i32) -> Option<mpsc::Sender<String>> {
        self.clients_lock().get(&code).cloned()
    }

    fn message_listener(&self) -> Option<Arc<dyn TcpReceiverListener>> {
        self.listener
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn user_registry(&self) -> Option<Arc<dyn UserRegistry>> {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Subscribe to the stop signal, setting up a fresh channel when no
    /// stop is pending. A subscription taken before `stop()` sees the
    /// signal even if its task runs later.
    fn shutdown_rx(&self) -> watch::Receiver<()> {
        self.stop_signal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_or_insert_with(|| watch::channel(()).0)
            .subscribe()
    }

    fn started_lock(&self) -> std::sync::MutexGuard<'_, bool> {
        self.started.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn clients_lock(&self) -> std::sync::MutexGuard<'_, HashMap<i32, mpsc::Sender<String>>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn bind_listener(port: u16) -> std::io::Result<TcpListener> {
    let listener = std::net::TcpListener::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port))?;
    listener.set_nonblocking(true)?;
    TcpListener::from_std(listener)
}

async fn accept_loop(
    listener: TcpListener,
    clients: ClientMap,
    message_listener: Option<Arc<dyn TcpReceiverListener>>,
    registry: Option<Arc<dyn UserRegistry>>,
    mut shutdown: watch::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;

            _ = shutdown.changed() => break,

            result = listener.accept() => match result {
                Ok((stream, from)) => {
                    debug!(from = %from, "Connection accepted");
                    tokio::spawn(identify_and_run(
                        stream,
                        from.ip(),
                        clients.clone(),
                        message_listener.clone(),
                        registry.clone(),
                        shutdown.clone(),
                    ));
                }
                Err(e) => warn!(error = %e, "Accept failed"),
            }
        }
    }

    debug!("Accept loop ended");
}

/// Reads the identification line from an accepted connection, resolves
/// the user, and registers the connection. Connections from codes the
/// registry does not know are dropped.
async fn identify_and_run(
    stream: TcpStream,
    ip_address: IpAddr,
    clients: ClientMap,
    message_listener: Option<Arc<dyn TcpReceiverListener>>,
    registry: Option<Arc<dyn UserRegistry>>,
    mut shutdown: watch::Receiver<()>,
) {
    let (read_half, write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut first_line = String::new();

    tokio::select! {
        biased;

        _ = shutdown.changed() => return,

        result = reader.read_line(&mut first_line) => match result {
            Ok(0) => {
                debug!(from = %ip_address, "Closed before identifying");
                return;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(from = %ip_address, error = %e, "Failed to read identification");
                return;
            }
        }
    }

    let code: i32 = match first_line.trim().parse() {
        Ok(code) => code,
        Err(_) => {
            warn!(from = %ip_address, line = %first_line.trim(), "Invalid identification");
            return;
        }
    };

    let user = match registry.as_ref().and_then(|r| r.user_by_code(code)) {
        Some(user) => user,
        None => {
            debug!(from = %ip_address, code, "Unknown user, dropping connection");
            return;
        }
    };

    debug!(from = %ip_address, code, "Identified");

    let tx = spawn_connection_tasks(
        reader,
        write_half,
        ip_address,
        user,
        clients.clone(),
        message_listener,
        None,
        shutdown,
    );

    clients
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(code, tx);
}

#[allow(clippy::too_many_arguments)]
fn spawn_connection(
    stream: TcpStream,
    ip_address: IpAddr,
    user: User,
    clients: ClientMap,
    message_listener: Option<Arc<dyn TcpReceiverListener>>,
    identify_as: Option<i32>,
    shutdown: watch::Receiver<()>,
) -> mpsc::Sender<String> {
    let (read_half, write_half) = stream.into_split();

    spawn_connection_tasks(
        BufReader::new(read_half),
        write_half,
        ip_address,
        user,
        clients,
        message_listener,
        identify_as,
        shutdown,
    )
}

/// Spawns the reader and writer tasks for one live connection and returns
/// the outgoing queue. When `identify_as` is set the writer sends that
/// code as its first line. The reader keeps the BufReader the
/// identification was read with, so nothing buffered behind it is lost.
/// Both tasks end when the service stop signal fires.
#[allow(clippy::too_many_arguments)]
fn spawn_connection_tasks(
    mut reader: BufReader<OwnedReadHalf>,
    mut write_half: OwnedWriteHalf,
    ip_address: IpAddr,
    user: User,
    clients: ClientMap,
    message_listener: Option<Arc<dyn TcpReceiverListener>>,
    identify_as: Option<i32>,
    shutdown: watch::Receiver<()>,
) -> mpsc::Sender<String> {
    let (tx, mut rx) = mpsc::channel::<String>(CLIENT_QUEUE_SIZE);
    let code = user.code();

    let mut write_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if let Some(own_code) = identify_as {
            if let Err(e) = write_half.write_all(format!("{own_code}\n").as_bytes()).await {
                warn!(code, error = %e, "Failed to identify, closing connection");
                return;
            }
        }

        loop {
            tokio::select! {
                biased;

                _ = write_shutdown.changed() => break,

                message = rx.recv() => match message {
                    Some(message) => {
                        if let Err(e) =
                            write_half.write_all(format!("{message}\n").as_bytes()).await
                        {
                            warn!(code, error = %e, "Write failed, closing connection");
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    });

    let mut read_shutdown = shutdown;
    tokio::spawn(async move {
        let mut line = String::new();

        loop {
            line.clear();

            tokio::select! {
                biased;

                _ = read_shutdown.changed() => break,

                result = reader.read_line(&mut line) => match result {
                    Ok(0) => {
                        debug!(code, "Connection closed");
                        break;
                    }
                    Ok(_) => {
                        let message = line.trim();

                        if message.is_empty() {
                            continue;
                        }

                        debug!(from = %ip_address, code, message = %message, "Message arrived");

                        if let Some(listener) = &message_listener {
                            listener.tcp_message_arrived(message, ip_address, &user);
                        }
                    }
                    Err(e) => {
                        warn!(code, error = %e, "Read failed, closing connection");
                        break;
                    }
                }
            }
        }

        clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&code);
    });

    tx
}
