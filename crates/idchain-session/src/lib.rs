//! Session establishment between wallets and organization endpoints:
//! connection strings, the session transport boundary and the client-side
//! session broker.
pub mod broker;
pub mod connection;
pub mod transport;
