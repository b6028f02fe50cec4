pub mod config;
pub mod error;
pub mod namespace;
pub mod session;

pub use config::Config;
pub use error::ConnectError;
pub use namespace::{Namespace, Namespaces, RequiredNamespaces};
pub use session::{
    now_secs, Connection, Pairing, PeerMetadata, Reason, Session, SessionEvent, WalletInfo,
};
