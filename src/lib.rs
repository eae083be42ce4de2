//! qwallet-shared - infrastructure shared by qwallet services.
//!
//! The core is the message bus: producer and consumer handles over a
//! broker connector, synchronous delivery confirmation and cancellable
//! multi-handler dispatch. Alongside it sit the cache, database and gRPC
//! logging collaborators.

pub mod bus;
pub mod cache;
pub mod config;
pub mod database;
pub mod grpc;
pub mod proto;
pub mod utils;
