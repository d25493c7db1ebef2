pub mod broadcaster;

pub use broadcaster::{
    ConnectionAuthorizer, RealtimeBroadcaster, RealtimeConnection, RealtimeMessage,
    StaticTokenAuthorizer, UpdateData, UpdateType,
};
