pub mod clearnode;
pub mod core;

pub use clearnode::{
    build_client, ClearNodeClient, ClientBuilder, ClientEvent, ClientHandle, GameStatus,
};
pub use core::{config::ClientConfig, errors::ClearNodeError, types::*};
