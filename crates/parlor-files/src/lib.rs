//! Direct file transfers between two users, negotiated over the chat
//! protocol and carried over a plain TCP stream.

pub mod byte_counter;
pub mod receiver;
pub mod sender;
pub mod transfer;
pub mod transfer_list;

pub use byte_counter::ByteCounter;
pub use receiver::FileReceiver;
pub use sender::FileSender;
pub use transfer::{Direction, FileTransferListener};
pub use transfer_list::TransferList;
