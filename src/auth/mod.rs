pub mod feed;
pub mod providers;
pub mod session;
pub mod storage;

pub use feed::{AuthSubscription, ChangeFeed, ChangeReceiver, SubscriptionHandle};
pub use providers::{GoTrueProvider, IdentityProvider, MemoryIdentityProvider};
pub use session::{AuthChange, AuthChangeKind, FederatedRedirect, Identity, Session};
pub use storage::SessionFile;
