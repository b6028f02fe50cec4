pub mod manager;
pub mod projection;
pub mod reconciler;
pub mod requests;
pub mod settle;

pub use manager::{ConnectionManagerHandle, ManagerOptions};
pub use projection::{ConnectionState, FollowUp, ObservedEvent, Subscription};
pub use reconciler::{
    latest_active_pairing, latest_active_session, select_latest_active_pairing,
    select_latest_active_session, ReconcilePath, Reconciler, UriPresenter,
};
pub use settle::{wait_until, SettlePolicy};
