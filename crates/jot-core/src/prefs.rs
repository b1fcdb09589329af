//! Device-local preferences and sync-token storage boundaries

/// Durable per-device flags and the last known remote identity.
///
/// Implementations recover from storage failures internally (log and fall
/// back to defaults); the engine never branches on persistence errors here.
pub trait Preferences: Send + Sync {
    /// Remote zone and subscription have been set up on this device;
    /// no need to set them up again.
    fn remote_setup_done(&self) -> bool;

    fn set_remote_setup_done(&self, done: bool);

    /// User record identifier on the remote store.
    ///
    /// Used to detect account switches on this device: if the store ever
    /// reports a different identity, all local state is cleared so one
    /// user cannot see another's thoughts.
    fn remote_user_id(&self) -> Option<String>;

    fn set_remote_user_id(&self, user_id: Option<&str>);

    /// Test/demo affordance: treat all saves to the remote store as failed.
    fn simulate_send_failure(&self) -> bool;

    fn set_simulate_send_failure(&self, simulate: bool);

    /// Test/demo affordance: treat all change fetches as failed.
    fn simulate_fetch_failure(&self) -> bool;

    fn set_simulate_fetch_failure(&self, simulate: bool);

    /// Reset everything to defaults.
    fn clear(&self);
}

/// Change-token continuation state for delta fetches from the remote store.
pub trait TokenStore: Send + Sync {
    /// Token from the last database-level change fetch.
    fn database_token(&self) -> Option<String>;

    fn set_database_token(&self, token: Option<&str>);

    /// Token from the last record fetch for the given zone.
    fn zone_token(&self, zone: &str) -> Option<String>;

    fn set_zone_token(&self, zone: &str, token: Option<&str>);

    /// Drop all continuation state, forcing the next fetch to start over.
    fn clear(&self);
}
