// tests/integration_test.rs

//! End-to-end tests for the Opalite client against an in-process mock node
//! speaking the real wire protocol: connection lifecycle, reconnection,
//! data-plane operations and subscriptions.

mod integration {
    pub mod data_plane_test;
    pub mod lifecycle_test;
    pub mod subscription_test;
    pub mod test_helpers;
}
