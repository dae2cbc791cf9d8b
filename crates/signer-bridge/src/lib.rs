//! NIP-55 signing bridge core.
//!
//! Third-party apps ask a trusted signer to read its public key, sign events
//! and encrypt or decrypt NIP-04/NIP-44 payloads. This crate is the part
//! behind the transport: it validates requests, decides them against
//! remembered permissions or a human prompt, signs without exposing key
//! material, coalesces duplicate requests and records an audit trail.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use signer_bridge::{ChannelApprover, LocalKey, SigningBridge};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let (approver, mut prompts) = ChannelApprover::new();
//! let bridge = SigningBridge::builder(Arc::new(LocalKey::generate()), Arc::new(approver))
//!     .build()?;
//!
//! tokio::spawn(async move {
//!     while let Some(ticket) = prompts.next().await {
//!         println!("{}", ticket.prompt.describe());
//!         ticket.respond(signer_bridge::ApprovalDecision::allow().remembered());
//!     }
//! });
//!
//! let response = bridge.handle(br#"{"type":"get_public_key","id":"1",
//!     "callingApp":"com.example","timestamp":1760000000000}"#).await;
//! println!("{}", response.to_json());
//! # Ok(())
//! # }
//! ```

pub mod approval;
pub mod audit;
pub mod bridge;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod operation;
pub mod permissions;
pub mod request;
pub mod response;
pub mod signer;
pub mod telemetry;
pub mod validator;

pub use approval::{ApprovalDecision, ApprovalError, ApprovalPrompt, Approver, ChannelApprover};
pub use audit::{AuditDecision, AuditEntry, AuditLog, AuditSink, InMemoryAuditLog};
pub use bridge::{BridgeStatus, SigningBridge, SigningBridgeBuilder};
pub use config::{BridgeConfig, ConfigError, LogFormat};
pub use engine::{DecisionEngine, PendingDecision, SubmitMode};
pub use error::{BridgeError, ErrorClass, Result};
pub use permissions::{PermissionRule, PermissionStore, RuleDecision, RuleScope};
pub use request::{Action, RequestKey, SigningRequest};
pub use response::BridgeResponse;
pub use signer::keys::{KeyMaterial, LocalKey};
pub use signer::{SigningCore, SigningResult};
