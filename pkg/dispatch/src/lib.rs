//! Outbound broker traffic: the provision/deprovision dispatch client
//! and the broker-side signed callback sender.

pub mod callback;
pub mod client;
pub mod models;

pub use callback::CallbackSender;
pub use client::{DispatchError, Dispatcher, HttpDispatcher};
pub use models::{
    CallbackRequest, CallbackStatus, DeprovisionRequest, DeprovisionResponse, ProvisionRequest,
    ProvisionResponse,
};
