pub mod deep_link;
pub mod notice;

pub use deep_link::{validate_pairing_uri, wallet_deep_link};
pub use notice::{readable_error, Notice, NoticeLevel};
