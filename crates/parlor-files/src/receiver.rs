//! Receiving side of a file transfer.
//!
//! The receiver opens a one-shot server socket, announces the port in the
//! accept message, and waits a bounded time for the sender to connect. A
//! transfer only counts as completed when every expected byte arrived and
//! nobody cancelled.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing::{debug, warn};

use parlor_shared::constants::{
    FILE_ACCEPT_TIMEOUT, FILE_TRANSFER_BUFFER_SIZE, PORT_BIND_ATTEMPTS,
};
use parlor_shared::types::User;
use parlor_shared::ServerError;

use crate::byte_counter::ByteCounter;
use crate::transfer::{
    Direction, FileTransferListener, ListenerSlot, Progress, UPDATE_CHUNK_INTERVAL,
};

/// The server socket and whether the transfer claimed it yet. Shared with
/// the timeout task that closes the socket if the sender never shows up.
#[derive(Default)]
struct ServerSlot {
    listener: Mutex<Option<TcpListener>>,
    claimed: AtomicBool,
}

impl ServerSlot {
    fn take(&self) -> Option<TcpListener> {
        self.listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn put(&self, listener: TcpListener) {
        *self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(listener);
    }
}

pub struct FileReceiver {
    id: u32,
    user: User,
    file_name: String,
    file_hash: i32,
    size: u64,
    path: PathBuf,
    listener: ListenerSlot,
    progress: Progress,
    counter: ByteCounter,
    cancel: AtomicBool,
    cancel_notify: Notify,
    accepted: AtomicBool,
    rejected: AtomicBool,
    server: Arc<ServerSlot>,
}

impl FileReceiver {
    /// `user` is the sender of the file, `path` is where the received
    /// bytes land.
    pub fn new(
        id: u32,
        user: User,
        file_name: impl Into<String>,
        size: u64,
        file_hash: i32,
        path: PathBuf,
    ) -> Self {
        Self {
            id,
            user,
            file_name: file_name.into(),
            file_hash,
            size,
            path,
            listener: ListenerSlot::default(),
            progress: Progress::default(),
            counter: ByteCounter::new(),
            cancel: AtomicBool::new(false),
            cancel_notify: Notify::new(),
            accepted: AtomicBool::new(false),
            rejected: AtomicBool::new(false),
            server: Arc::new(ServerSlot::default()),
        }
    }

    pub fn register_listener(&self, listener: Arc<dyn FileTransferListener>) {
        self.listener.set(listener);
        self.listener.with(|l| l.status_waiting());
    }

    /// Open the server socket on the first free port in
    /// `[base_port, base_port + 50)`. The socket closes itself if no
    /// sender connects within the accept timeout. Returns the bound port
    /// for the accept message. Must be called from within a tokio runtime.
    pub fn start_server(&self, base_port: u16) -> Result<u16, ServerError> {
        for port in base_port..base_port + PORT_BIND_ATTEMPTS {
            match bind_listener(port) {
                Ok(listener) => {
                    debug!(port, file = %self.file_name, "File transfer server started");
                    self.server.put(listener);

                    let server = self.server.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(FILE_ACCEPT_TIMEOUT).await;

                        if !server.claimed.load(Ordering::SeqCst) && server.take().is_some() {
                            debug!(port, "Nobody connected, closing file transfer server");
                        }
                    });

                    return Ok(port);
                }
                Err(e) => debug!(port, error = %e, "Port taken, trying next"),
            }
        }

        Err(ServerError(format!(
            "Could not start server for receiving the file {}",
            self.file_name
        )))
    }

    /// Wait for the sender, then receive the whole file. Returns whether
    /// the transfer completed. Every exit path closes the socket and the
    /// file.
    pub async fn transfer(&self) -> bool {
        self.server.claimed.store(true, Ordering::SeqCst);

        let listener = match self.server.take() {
            Some(listener) => listener,
            None => {
                warn!(file = %self.file_name, "No server socket to accept on");
                self.listener.with(|l| l.status_failed());
                return false;
            }
        };

        self.listener.with(|l| l.status_connecting());

        let stream = tokio::select! {
            accepted = tokio::time::timeout(FILE_ACCEPT_TIMEOUT, listener.accept()) => {
                match accepted {
                    Ok(Ok((stream, from))) => {
                        debug!(from = %from, file = %self.file_name, "Sender connected");
                        stream
                    }
                    Ok(Err(e)) => {
                        warn!(error = %e, file = %self.file_name, "Accept failed");
                        self.listener.with(|l| l.status_failed());
                        return false;
                    }
                    Err(_) => {
                        warn!(file = %self.file_name, "Sender never connected");
                        self.listener.with(|l| l.status_failed());
                        return false;
                    }
                }
            }
            _ = self.cancel_notify.notified() => {
                debug!(file = %self.file_name, "Cancelled while waiting for the sender");
                self.listener.with(|l| l.status_failed());
                return false;
            }
        };

        let mut file = match File::create(&self.path).await {
            Ok(file) => file,
            Err(e) => {
                warn!(error = %e, path = %self.path.display(), "Could not create file");
                self.listener.with(|l| l.status_failed());
                return false;
            }
        };

        self.listener.with(|l| l.status_transferring());
        self.progress.reset();
        self.counter.prepare();

        let mut stream = stream;
        let mut buffer = [0u8; FILE_TRANSFER_BUFFER_SIZE];
        let mut chunks: u64 = 0;

        loop {
            if self.is_canceled() {
                break;
            }

            let read = match stream.read(&mut buffer).await {
                Ok(0) => break,
                Ok(read) => read,
                Err(e) => {
                    warn!(error = %e, file = %self.file_name, "Read failed");
                    break;
                }
            };

            if let Err(e) = file.write_all(&buffer[..read]).await {
                warn!(error = %e, file = %self.file_name, "Write failed");
                break;
            }

            self.counter.add_bytes(read as i64);
            let percent_moved = self.progress.add(read as u64, self.size);
            chunks += 1;

            if percent_moved || chunks % UPDATE_CHUNK_INTERVAL == 0 {
                self.listener.with(|l| l.transfer_update());
            }
        }

        let _ = file.flush().await;
        drop(file);
        drop(stream);

        let completed = self.transferred() == self.size && !self.is_canceled();

        if completed {
            debug!(file = %self.file_name, bytes = self.size, "File received");
            self.listener.with(|l| l.status_completed());
        } else {
            debug!(file = %self.file_name, transferred = self.transferred(),
                   expected = self.size, "File transfer incomplete");
            self.listener.with(|l| l.status_failed());
        }

        completed
    }

    /// Stop the transfer. Idempotent; takes effect after the chunk in
    /// flight, or right away while still waiting for the sender.
    pub fn cancel(&self) {
        if !self.cancel.swap(true, Ordering::SeqCst) {
            debug!(file = %self.file_name, "Cancelling file transfer");
            self.cancel_notify.notify_waiters();
            self.server.take();
        }
    }

    /// Mark the offer as accepted by the local user.
    pub fn accept(&self) {
        self.accepted.store(true, Ordering::SeqCst);
    }

    /// Mark the offer as rejected by the local user.
    pub fn reject(&self) {
        self.rejected.store(true, Ordering::SeqCst);
        self.listener.with(|l| l.status_failed());
    }

    pub fn is_accepted(&self) -> bool {
        self.accepted.load(Ordering::SeqCst)
    }

    pub fn is_rejected(&self) -> bool {
        self.rejected.load(Ordering::SeqCst)
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn file_hash(&self) -> i32 {
        self.file_hash
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn transferred(&self) -> u64 {
        self.progress.transferred()
    }

    pub fn percent(&self) -> u32 {
        self.progress.percent()
    }

    /// Current speed in bytes per second.
    pub fn speed(&self) -> i64 {
        self.counter.bytes_per_sec()
    }

    pub fn direction(&self) -> Direction {
        Direction::Receive
    }
}

fn bind_listener(port: u16) -> std::io::Result<TcpListener> {
    let listener = std::net::TcpListener::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port))?;
    listener.set_nonblocking(true)?;
    TcpListener::from_std(listener)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receiver_for(file_name: &str, size: u64, dir: &std::path::Path) -> FileReceiver {
        FileReceiver::new(
            1,
            User::new("Bob", 12345678),
            file_name,
            size,
            98765,
            dir.join(file_name),
        )
    }

    #[tokio::test]
    async fn test_start_server_skips_taken_ports() {
        let dir = tempfile::tempdir().unwrap();

        let taken =
            std::net::TcpListener::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)).unwrap();
        let base = taken.local_addr().unwrap().port();

        let receiver = receiver_for("notes.txt", 2048, dir.path());
        let port = receiver.start_server(base).unwrap();

        assert!(port > base);
        assert!(port < base + PORT_BIND_ATTEMPTS);
    }

    #[tokio::test]
    async fn test_transfer_without_server_fails() {
        let dir = tempfile::tempdir().unwrap();
        let receiver = receiver_for("notes.txt", 2048, dir.path());

        assert!(!receiver.transfer().await);
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_for_sender() {
        let dir = tempfile::tempdir().unwrap();
        let receiver = Arc::new(receiver_for("notes.txt", 2048, dir.path()));
        receiver.start_server(45100).unwrap();

        let cancelling = receiver.clone();
        let transfer = tokio::spawn(async move { cancelling.transfer().await });

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        receiver.cancel();

        assert!(!transfer.await.unwrap());
        assert!(receiver.is_canceled());
    }

    #[test]
    fn test_accept_and_reject_flags() {
        let dir = tempfile::tempdir().unwrap();
        let receiver = receiver_for("notes.txt", 2048, dir.path());

        assert!(!receiver.is_accepted());
        receiver.accept();
        assert!(receiver.is_accepted());

        let other = receiver_for("other.txt", 10, dir.path());
        other.reject();
        assert!(other.is_rejected());
    }
}
