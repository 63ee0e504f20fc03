mod bits;
mod bytes;

#[cfg(test)]
mod simulator;

pub mod bepp;
pub mod bubble;
pub mod catalog;
pub mod client;
pub mod consts;
pub mod crypto;
pub mod draw;
pub mod error;
pub mod framing;
pub mod inventory;
pub mod keyfile;
pub mod lighting;
pub mod macroman;
pub mod movie;
pub mod notify;
pub mod packet;
pub mod pipeline;
pub mod player;
pub mod snapshot;
pub mod socket;
pub mod store;
pub mod task;
pub mod time;
pub mod transceiver;
pub mod world;

pub use client::{Credentials, Session, SessionConfig, SessionState};
pub use error::{Error, Result};
pub use movie::{Movie, MoviePlayer, MovieReader, MovieRecorder};
pub use pipeline::Presentation;
pub use snapshot::WorldSnapshot;
pub use world::World;
