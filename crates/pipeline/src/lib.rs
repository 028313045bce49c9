//! Ingestion, classification, and delivery of group attachments.
//!
//! Session events flow through [`dispatch::Dispatcher`]: connection and
//! credential events drive [`lifecycle::LifecycleController`], message batches
//! are classified, their media persisted, and a payload posted to the webhook.

pub mod classifier;
pub mod dedupe;
pub mod delivery;
pub mod dispatch;
pub mod error;
pub mod lifecycle;
pub mod media;
pub mod pairing;
pub mod relay;

pub use {
    classifier::{Decision, GROUP_NAME_FALLBACK, IgnoreReason, QualifiedMessage, Route, classify},
    delivery::{DeliveryClient, DeliveryPayload, ImagePayload, SkipOcrPayload},
    dispatch::{Dispatcher, MessageWorker, Outcome},
    error::{Error, Result},
    lifecycle::{LifecycleAction, LifecycleController, Phase, SessionWatch},
    media::{MediaStore, StoredMediaFile},
    pairing::QrRenderer,
    relay::Relay,
};
