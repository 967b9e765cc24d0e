//! World mirror client.
//!
//! Ties the transport session to the object graph, navigation, render
//! notifier and chat log behind one [`WorldClient`].

pub mod chat;
pub mod client;
pub mod config;

pub use chat::{ChatKind, ChatLine, ChatLog, DEFAULT_CHANNEL};
pub use client::{ClientError, ClientUpdate, WorldClient};
pub use config::ClientConfig;

pub use worldlink_core::{Crumb, Direction, GameObject, ObjectId};
pub use worldlink_transport::ConnectionStatus;
