//! Recording dispatchers, a JSON document renderer and a chatter log.

use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use dunning_core::PartnerId;
use dunning_followup::{
    Attachment, Chatter, Contact, DispatchError, DocumentRenderer, MailDispatcher, MailOutcome,
    PrintDispatcher, PrintHandle, RenderError, RenderedDocument, TemplateRef,
};

#[derive(Debug, Clone, PartialEq)]
pub struct SentMail {
    pub template: TemplateRef,
    pub recipient: Contact,
    pub context: Value,
    pub attachments: Vec<Attachment>,
    pub outcome: MailOutcome,
}

/// Records every hand-off. Outcomes can be scripted with [`Self::push_outcome`];
/// unscripted sends succeed.
#[derive(Debug, Default)]
pub struct RecordingMailDispatcher {
    sent: Mutex<Vec<SentMail>>,
    script: Mutex<VecDeque<MailOutcome>>,
    latency: Mutex<Option<Duration>>,
}

impl RecordingMailDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_outcome(&self, outcome: MailOutcome) {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(outcome);
    }

    /// Block every send for `latency`, like a slow mail server.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap_or_else(PoisonError::into_inner) = Some(latency);
    }

    /// Every attempt, including failed ones.
    pub fn attempts(&self) -> Vec<SentMail> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Successfully handed-off mails.
    pub fn delivered(&self) -> Vec<SentMail> {
        self.attempts()
            .into_iter()
            .filter(|m| m.outcome == MailOutcome::Ok)
            .collect()
    }
}

impl MailDispatcher for RecordingMailDispatcher {
    fn send(
        &self,
        template: &TemplateRef,
        recipient: &Contact,
        context: &Value,
        attachments: &[Attachment],
    ) -> MailOutcome {
        let latency = *self.latency.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(latency) = latency {
            std::thread::sleep(latency);
        }
        let outcome = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or(MailOutcome::Ok);
        debug!(template = %template, recipient = %recipient.name, ?outcome, "mail dispatched");
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(SentMail {
                template: template.clone(),
                recipient: recipient.clone(),
                context: context.clone(),
                attachments: attachments.to_vec(),
                outcome: outcome.clone(),
            });
        outcome
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrintJob {
    pub handle: PrintHandle,
    pub template: TemplateRef,
    pub address: String,
}

#[derive(Debug, Default)]
pub struct RecordingPrintDispatcher {
    jobs: Mutex<Vec<PrintJob>>,
    script: Mutex<VecDeque<DispatchError>>,
}

impl RecordingPrintDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next enqueue fail.
    pub fn push_failure(&self, error: DispatchError) {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(error);
    }

    pub fn jobs(&self) -> Vec<PrintJob> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl PrintDispatcher for RecordingPrintDispatcher {
    fn enqueue(
        &self,
        document: &RenderedDocument,
        recipient_address: &str,
    ) -> Result<PrintHandle, DispatchError> {
        if let Some(error) = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
        {
            return Err(error);
        }

        let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        let handle = PrintHandle(format!("print-{}", jobs.len() + 1));
        jobs.push(PrintJob {
            handle: handle.clone(),
            template: document.template.clone(),
            address: recipient_address.to_string(),
        });
        Ok(handle)
    }
}

/// Renders the template context as JSON bytes.
#[derive(Debug, Default)]
pub struct JsonDocumentRenderer {
    broken: Mutex<HashSet<TemplateRef>>,
}

impl JsonDocumentRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every render of `template` fail.
    pub fn break_template(&self, template: TemplateRef) {
        self.broken
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(template);
    }
}

impl DocumentRenderer for JsonDocumentRenderer {
    fn render(&self, template: &TemplateRef, context: &Value) -> Result<RenderedDocument, RenderError> {
        if self
            .broken
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(template)
        {
            return Err(RenderError::Failed {
                template: template.to_string(),
                reason: "template marked broken".into(),
            });
        }

        let bytes = serde_json::to_vec(context).map_err(|err| RenderError::Failed {
            template: template.to_string(),
            reason: err.to_string(),
        })?;
        Ok(RenderedDocument {
            template: template.clone(),
            content_type: "application/json".to_string(),
            bytes,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatterPost {
    pub partner_id: PartnerId,
    pub body: String,
    pub metadata: Value,
}

#[derive(Debug, Default)]
pub struct MemoryChatter {
    posts: Mutex<Vec<ChatterPost>>,
}

impl MemoryChatter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn posts(&self) -> Vec<ChatterPost> {
        self.posts.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn posts_for(&self, partner_id: PartnerId) -> Vec<ChatterPost> {
        self.posts()
            .into_iter()
            .filter(|p| p.partner_id == partner_id)
            .collect()
    }
}

impl Chatter for MemoryChatter {
    fn post(&self, partner_id: PartnerId, body: &str, metadata: &Value) {
        self.posts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ChatterPost {
                partner_id,
                body: body.to_string(),
                metadata: metadata.clone(),
            });
    }
}
