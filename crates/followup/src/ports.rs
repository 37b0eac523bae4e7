//! Collaborator contracts of the follow-up engine.
//!
//! The engine never talks to mail servers, printers, the partner directory or
//! a database directly. Adapters live in the infra crate.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use dunning_core::{CompanyId, LevelId, PartnerId};
use dunning_receivables::DocumentKind;

use crate::contacts::{Contact, PartnerContacts};
use crate::error::FollowupResult;
use crate::level::{FollowupLevel, TemplateRef};
use crate::state::PartnerFollowupState;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store conflict: {0}")]
    Conflict(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RenderError {
    #[error("unknown template {0}")]
    UnknownTemplate(String),

    #[error("template {template} failed: {reason}")]
    Failed { template: String, reason: String },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("transient: {0}")]
    Transient(String),

    #[error("permanent: {0}")]
    Permanent(String),
}

/// Synchronous result of a mail hand-off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum MailOutcome {
    Ok,
    TransientError(String),
    PermanentError(String),
}

/// Opaque bytes produced by the template layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedDocument {
    pub template: TemplateRef,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Print queue reference; success means enqueued, not delivered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrintHandle(pub String);

/// Ledger document to attach to a reminder email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub document_ref: String,
    pub document_kind: DocumentKind,
}

pub trait PartnerDirectory: Send + Sync {
    fn get_followup_contacts(&self, partner_id: PartnerId) -> Result<PartnerContacts, StoreError>;
}

pub trait MailDispatcher: Send + Sync {
    fn send(
        &self,
        template: &TemplateRef,
        recipient: &Contact,
        context: &Value,
        attachments: &[Attachment],
    ) -> MailOutcome;
}

pub trait PrintDispatcher: Send + Sync {
    fn enqueue(
        &self,
        document: &RenderedDocument,
        recipient_address: &str,
    ) -> Result<PrintHandle, DispatchError>;
}

pub trait DocumentRenderer: Send + Sync {
    fn render(&self, template: &TemplateRef, context: &Value)
    -> Result<RenderedDocument, RenderError>;
}

/// Audit trail on the partner record. Fire-and-forget.
pub trait Chatter: Send + Sync {
    fn post(&self, partner_id: PartnerId, body: &str, metadata: &Value);
}

pub trait LevelStore: Send + Sync {
    fn levels_for(&self, company_id: CompanyId) -> Result<Vec<FollowupLevel>, StoreError>;

    /// Replace the company's whole table.
    fn save_levels(&self, company_id: CompanyId, levels: &[FollowupLevel])
    -> Result<(), StoreError>;
}

/// Partner follow-up state with per-partner exclusive access.
pub trait FollowupStateStore: Send + Sync {
    /// Unlocked snapshot.
    fn load(&self, partner_id: PartnerId) -> Result<Option<PartnerFollowupState>, StoreError>;

    /// Partners whose current level is one of `levels`, in stable order.
    fn partners_in_cycle(&self, levels: &[LevelId]) -> Result<Vec<PartnerId>, StoreError>;

    /// Run `f` while holding the partner's lock.
    ///
    /// The slot is persisted when `f` returns `Ok` and changed it; an `Err`
    /// discards every change.
    fn with_lock(
        &self,
        partner_id: PartnerId,
        f: &mut dyn FnMut(&mut Option<PartnerFollowupState>) -> FollowupResult<()>,
    ) -> FollowupResult<()>;
}

impl<T> LevelStore for Arc<T>
where
    T: LevelStore + ?Sized,
{
    fn levels_for(&self, company_id: CompanyId) -> Result<Vec<FollowupLevel>, StoreError> {
        (**self).levels_for(company_id)
    }

    fn save_levels(
        &self,
        company_id: CompanyId,
        levels: &[FollowupLevel],
    ) -> Result<(), StoreError> {
        (**self).save_levels(company_id, levels)
    }
}

impl<T> FollowupStateStore for Arc<T>
where
    T: FollowupStateStore + ?Sized,
{
    fn load(&self, partner_id: PartnerId) -> Result<Option<PartnerFollowupState>, StoreError> {
        (**self).load(partner_id)
    }

    fn partners_in_cycle(&self, levels: &[LevelId]) -> Result<Vec<PartnerId>, StoreError> {
        (**self).partners_in_cycle(levels)
    }

    fn with_lock(
        &self,
        partner_id: PartnerId,
        f: &mut dyn FnMut(&mut Option<PartnerFollowupState>) -> FollowupResult<()>,
    ) -> FollowupResult<()> {
        (**self).with_lock(partner_id, f)
    }
}

/// Everything the executor reaches outside the ledger.
#[derive(Clone)]
pub struct FollowupPorts {
    pub directory: Arc<dyn PartnerDirectory>,
    pub mail: Arc<dyn MailDispatcher>,
    pub print: Arc<dyn PrintDispatcher>,
    pub documents: Arc<dyn DocumentRenderer>,
    pub chatter: Arc<dyn Chatter>,
    pub levels: Arc<dyn LevelStore>,
    pub states: Arc<dyn FollowupStateStore>,
}

impl core::fmt::Debug for FollowupPorts {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FollowupPorts").finish_non_exhaustive()
    }
}
