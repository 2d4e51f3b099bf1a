//! Registry of active file transfers.
//!
//! Transfers are created through the list so every one gets a unique id.
//! Ids are handed out from a process-wide counter starting at 1 and are
//! never reused, so a stale id from the UI can never reach the wrong
//! transfer.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use parlor_shared::types::User;

use crate::receiver::FileReceiver;
use crate::sender::FileSender;

pub struct TransferList {
    next_id: AtomicU32,
    senders: Mutex<Vec<Arc<FileSender>>>,
    receivers: Mutex<Vec<Arc<FileReceiver>>>,
}

impl TransferList {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU32::new(1),
            senders: Mutex::new(Vec::new()),
            receivers: Mutex::new(Vec::new()),
        }
    }

    /// Register a new outgoing transfer to `user`.
    pub fn add_file_sender(
        &self,
        user: User,
        file_name: impl Into<String>,
        size: u64,
        file_hash: i32,
        path: PathBuf,
    ) -> Arc<FileSender> {
        let sender = Arc::new(FileSender::new(
            self.next_id(),
            user,
            file_name,
            size,
            file_hash,
            path,
        ));

        self.senders_lock().push(sender.clone());
        sender
    }

    /// Register a new incoming transfer from `user`.
    pub fn add_file_receiver(
        &self,
        user: User,
        file_name: impl Into<String>,
        size: u64,
        file_hash: i32,
        path: PathBuf,
    ) -> Arc<FileReceiver> {
        let receiver = Arc::new(FileReceiver::new(
            self.next_id(),
            user,
            file_name,
            size,
            file_hash,
            path,
        ));

        self.receivers_lock().push(receiver.clone());
        receiver
    }

    pub fn remove_file_sender(&self, sender: &Arc<FileSender>) {
        self.senders_lock().retain(|s| s.id() != sender.id());
    }

    pub fn remove_file_receiver(&self, receiver: &Arc<FileReceiver>) {
        self.receivers_lock().retain(|r| r.id() != receiver.id());
    }

    /// The sender to `user_code` for the given file name, if any.
    pub fn file_sender(&self, user_code: i32, file_name: &str) -> Option<Arc<FileSender>> {
        self.senders_lock()
            .iter()
            .find(|s| s.user().code() == user_code && s.file_name() == file_name)
            .cloned()
    }

    /// Like [`TransferList::file_sender`] but also matching the file
    /// hash, for when the same file is offered twice.
    pub fn file_sender_with_hash(
        &self,
        user_code: i32,
        file_name: &str,
        file_hash: i32,
    ) -> Option<Arc<FileSender>> {
        self.senders_lock()
            .iter()
            .find(|s| {
                s.user().code() == user_code
                    && s.file_name() == file_name
                    && s.file_hash() == file_hash
            })
            .cloned()
    }

    pub fn file_sender_by_id(&self, user_code: i32, id: u32) -> Option<Arc<FileSender>> {
        self.senders_lock()
            .iter()
            .find(|s| s.user().code() == user_code && s.id() == id)
            .cloned()
    }

    pub fn file_receiver(&self, user_code: i32, file_name: &str) -> Option<Arc<FileReceiver>> {
        self.receivers_lock()
            .iter()
            .find(|r| r.user().code() == user_code && r.file_name() == file_name)
            .cloned()
    }

    pub fn file_receiver_with_hash(
        &self,
        user_code: i32,
        file_name: &str,
        file_hash: i32,
    ) -> Option<Arc<FileReceiver>> {
        self.receivers_lock()
            .iter()
            .find(|r| {
                r.user().code() == user_code
                    && r.file_name() == file_name
                    && r.file_hash() == file_hash
            })
            .cloned()
    }

    pub fn file_receiver_by_id(&self, user_code: i32, id: u32) -> Option<Arc<FileReceiver>> {
        self.receivers_lock()
            .iter()
            .find(|r| r.user().code() == user_code && r.id() == id)
            .cloned()
    }

    /// Snapshot of all outgoing transfers.
    pub fn file_senders(&self) -> Vec<Arc<FileSender>> {
        self.senders_lock().clone()
    }

    /// Snapshot of all incoming transfers.
    pub fn file_receivers(&self) -> Vec<Arc<FileReceiver>> {
        self.receivers_lock().clone()
    }

    fn next_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn senders_lock(&self) -> std::sync::MutexGuard<'_, Vec<Arc<FileSender>>> {
        self.senders.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn receivers_lock(&self) -> std::sync::MutexGuard<'_, Vec<Arc<FileReceiver>>> {
        self.receivers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for TransferList {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list() -> TransferList {
        TransferList::new()
    }

    fn user(code: i32) -> User {
        User::new("Bob", code)
    }

    #[test]
    fn test_ids_are_monotonic_from_one_and_never_reused() {
        let list = list();

        let first = list.add_file_sender(user(1), "a.txt", 10, 1, "a.txt".into());
        let second = list.add_file_receiver(user(1), "b.txt", 10, 2, "b.txt".into());

        assert_eq!(first.id(), 1);
        assert_eq!(second.id(), 2);

        list.remove_file_sender(&first);
        let third = list.add_file_sender(user(1), "c.txt", 10, 3, "c.txt".into());
        assert_eq!(third.id(), 3);
    }

    #[test]
    fn test_lookup_by_user_and_name() {
        let list = list();

        list.add_file_sender(user(1), "a.txt", 10, 1, "a.txt".into());
        list.add_file_sender(user(2), "a.txt", 10, 2, "a.txt".into());

        let found = list.file_sender(2, "a.txt").unwrap();
        assert_eq!(found.user().code(), 2);

        assert!(list.file_sender(3, "a.txt").is_none());
        assert!(list.file_sender(1, "b.txt").is_none());
    }

    #[test]
    fn test_lookup_by_hash_distinguishes_duplicate_names() {
        let list = list();

        list.add_file_sender(user(1), "a.txt", 10, 100, "a.txt".into());
        list.add_file_sender(user(1), "a.txt", 20, 200, "a.txt".into());

        let found = list.file_sender_with_hash(1, "a.txt", 200).unwrap();
        assert_eq!(found.size(), 20);
    }

    #[test]
    fn test_lookup_by_id() {
        let list = list();

        let receiver = list.add_file_receiver(user(1), "a.txt", 10, 1, "a.txt".into());

        assert!(list.file_receiver_by_id(1, receiver.id()).is_some());
        assert!(list.file_receiver_by_id(2, receiver.id()).is_none());
        assert!(list.file_receiver_by_id(1, 999).is_none());
    }

    #[test]
    fn test_directions_are_kept_apart() {
        let list = list();

        list.add_file_sender(user(1), "a.txt", 10, 1, "a.txt".into());
        list.add_file_receiver(user(1), "a.txt", 10, 1, "a.txt".into());

        assert_eq!(list.file_senders().len(), 1);
        assert_eq!(list.file_receivers().len(), 1);
        assert!(list.file_sender(1, "a.txt").is_some());
        assert!(list.file_receiver(1, "a.txt").is_some());
    }

    #[test]
    fn test_remove() {
        let list = list();

        let sender = list.add_file_sender(user(1), "a.txt", 10, 1, "a.txt".into());
        list.remove_file_sender(&sender);

        assert!(list.file_senders().is_empty());
        assert!(list.file_sender(1, "a.txt").is_none());
    }
}
