//! Sending side of a file transfer.
//!
//! Connects to the port the receiver announced in its accept message. The
//! receiver may still be opening its server socket when the accept
//! arrives, so the connect is retried a few times before giving up.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use parlor_shared::constants::{
    FILE_CONNECT_ATTEMPTS, FILE_CONNECT_RETRY_INTERVAL, FILE_TRANSFER_BUFFER_SIZE,
};
use parlor_shared::types::User;

use crate::byte_counter::ByteCounter;
use crate::transfer::{
    Direction, FileTransferListener, ListenerSlot, Progress, UPDATE_CHUNK_INTERVAL,
};

pub struct FileSender {
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
}

impl FileSender {
    /// `user` is the receiver of the file, `path` is the file to send.
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
        }
    }

    pub fn register_listener(&self, listener: Arc<dyn FileTransferListener>) {
        self.listener.set(listener);
        self.listener.with(|l| l.status_waiting());
    }

    /// Connect to the receiver and send the whole file. Returns whether
    /// the transfer completed.
    pub async fn transfer(&self, port: u16) -> bool {
        self.listener.with(|l| l.status_connecting());

        let mut stream = match self.connect(port).await {
            Some(stream) => stream,
            None => {
                self.listener.with(|l| l.status_failed());
                return false;
            }
        };

        let mut file = match File::open(&self.path).await {
            Ok(file) => file,
            Err(e) => {
                warn!(error = %e, path = %self.path.display(), "Could not open file");
                self.listener.with(|l| l.status_failed());
                return false;
            }
        };

        self.listener.with(|l| l.status_transferring());
        self.progress.reset();
        self.counter.prepare();

        let mut buffer = [0u8; FILE_TRANSFER_BUFFER_SIZE];
        let mut chunks: u64 = 0;

        loop {
            if self.is_canceled() {
                break;
            }

            let read = match file.read(&mut buffer).await {
                Ok(0) => break,
                Ok(read) => read,
                Err(e) => {
                    warn!(error = %e, file = %self.file_name, "Read failed");
                    break;
                }
            };

            if let Err(e) = stream.write_all(&buffer[..read]).await {
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

        let _ = stream.flush().await;
        drop(stream);
        drop(file);

        let completed = self.transferred() == self.size && !self.is_canceled();

        if completed {
            debug!(file = %self.file_name, bytes = self.size, "File sent");
            self.listener.with(|l| l.status_completed());
        } else {
            debug!(file = %self.file_name, transferred = self.transferred(),
                   expected = self.size, "File transfer incomplete");
            self.listener.with(|l| l.status_failed());
        }

        completed
    }

    /// The receiver announces its port before the server socket is
    /// guaranteed to accept, so retry for a second before giving up.
    async fn connect(&self, port: u16) -> Option<TcpStream> {
        let ip = match self.user.ip_address {
            Some(ip) => ip,
            None => {
                warn!(nick = %self.user.nick, "Receiver has no known address");
                return None;
            }
        };

        let address = SocketAddr::new(ip, port);

        for attempt in 1..=FILE_CONNECT_ATTEMPTS {
            if self.is_canceled() {
                return None;
            }

            match TcpStream::connect(address).await {
                Ok(stream) => {
                    debug!(to = %address, attempt, "Connected to receiver");
                    return Some(stream);
                }
                Err(e) => {
                    debug!(to = %address, attempt, error = %e, "Connect failed");
                    tokio::time::sleep(FILE_CONNECT_RETRY_INTERVAL).await;
                }
            }
        }

        warn!(to = %address, "Could not connect to receiver");
        None
    }

    /// Stop the transfer. Idempotent; takes effect after the chunk in
    /// flight.
    pub fn cancel(&self) {
        if !self.cancel.swap(true, Ordering::SeqCst) {
            debug!(file = %self.file_name, "Cancelling file transfer");
        }
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
        Direction::Send
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::receiver::FileReceiver;
    use std::io::Write;
    use std::sync::Mutex;

    struct RecordingListener {
        events: Arc<Mutex<Vec<String>>>,
    }

    impl FileTransferListener for RecordingListener {
        fn status_waiting(&self) {
            self.events.lock().unwrap().push("waiting".to_string());
        }

        fn status_connecting(&self) {
            self.events.lock().unwrap().push("connecting".to_string());
        }

        fn status_transferring(&self) {
            self.events.lock().unwrap().push("transferring".to_string());
        }

        fn status_completed(&self) {
            self.events.lock().unwrap().push("completed".to_string());
        }

        fn status_failed(&self) {
            self.events.lock().unwrap().push("failed".to_string());
        }

        fn transfer_update(&self) {}
    }

    fn loopback_user(code: i32) -> User {
        let mut user = User::new("Peer", code);
        user.ip_address = Some("127.0.0.1".parse().unwrap());
        user
    }

    fn write_test_file(dir: &std::path::Path, name: &str, size: usize) -> PathBuf {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
        file.write_all(&data).unwrap();
        path
    }

    #[tokio::test]
    async fn test_loopback_transfer_completes_both_sides() {
        let dir = tempfile::tempdir().unwrap();

        // Big enough to take several chunks.
        let size = 10 * 1024 + 37;
        let source = write_test_file(dir.path(), "source.bin", size);
        let target = dir.path().join("target.bin");

        let receiver = Arc::new(FileReceiver::new(
            1,
            loopback_user(11111111),
            "source.bin",
            size as u64,
            98765,
            target.clone(),
        ));

        let events = Arc::new(Mutex::new(Vec::new()));
        receiver.register_listener(Arc::new(RecordingListener {
            events: events.clone(),
        }));

        let port = receiver.start_server(45200).unwrap();

        let receiving = receiver.clone();
        let receive = tokio::spawn(async move { receiving.transfer().await });

        let sender = FileSender::new(
            1,
            loopback_user(22222222),
            "source.bin",
            size as u64,
            98765,
            source.clone(),
        );

        assert!(sender.transfer(port).await);
        assert!(receive.await.unwrap());

        assert_eq!(sender.transferred(), size as u64);
        assert_eq!(receiver.transferred(), size as u64);
        assert_eq!(receiver.percent(), 100);

        let sent = std::fs::read(&source).unwrap();
        let received = std::fs::read(&target).unwrap();
        assert_eq!(sent, received);

        let events = events.lock().unwrap().clone();
        assert_eq!(
            events,
            vec!["waiting", "connecting", "transferring", "completed"]
        );
    }

    #[tokio::test]
    async fn test_short_read_is_not_completed() {
        let dir = tempfile::tempdir().unwrap();

        // The receiver expects more bytes than the sender has.
        let size = 2048;
        let source = write_test_file(dir.path(), "short.bin", size);

        let receiver = Arc::new(FileReceiver::new(
            1,
            loopback_user(11111111),
            "short.bin",
            (size as u64) * 2,
            98765,
            dir.path().join("short-received.bin"),
        ));

        let port = receiver.start_server(45300).unwrap();

        let receiving = receiver.clone();
        let receive = tokio::spawn(async move { receiving.transfer().await });

        let sender = FileSender::new(1, loopback_user(22222222), "short.bin", size as u64, 98765, source);

        // The sender itself completes: it sent everything it had.
        assert!(sender.transfer(port).await);

        // The receiver saw a short stream and must not report completion.
        assert!(!receive.await.unwrap());
        assert_eq!(receiver.transferred(), size as u64);
    }

    #[tokio::test]
    async fn test_connect_gives_up_when_nobody_listens() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_test_file(dir.path(), "unsent.bin", 128);

        let sender = FileSender::new(1, loopback_user(22222222), "unsent.bin", 128, 98765, source);

        // Port 1 is never listening on a test machine.
        assert!(!sender.transfer(1).await);
        assert_eq!(sender.transferred(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_sender_does_not_complete() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_test_file(dir.path(), "cancelled.bin", 4096);

        let sender = FileSender::new(
            1,
            loopback_user(22222222),
            "cancelled.bin",
            4096,
            98765,
            source,
        );
        sender.cancel();

        assert!(!sender.transfer(45400).await);
        assert!(sender.is_canceled());
    }
}
