//! Reminder addressee resolution.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContactKind {
    Followup,
    Invoice,
    Contact,
    Default,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub kind: ContactKind,
    pub name: String,
    pub email: Option<String>,
    pub postal_address: Option<String>,
    /// Locale code such as "fr_FR".
    pub language: Option<String>,
}

impl Contact {
    pub fn new(kind: ContactKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            email: None,
            postal_address: None,
            language: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_postal_address(mut self, address: impl Into<String>) -> Self {
        self.postal_address = Some(address.into());
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    /// Non-blank email address, if any.
    pub fn email(&self) -> Option<&str> {
        self.email.as_deref().map(str::trim).filter(|e| !e.is_empty())
    }

    /// Non-blank postal address, if any.
    pub fn postal_address(&self) -> Option<&str> {
        self.postal_address
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
    }
}

/// Everything the partner directory knows about who to remind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartnerContacts {
    /// The partner record itself.
    pub partner: Contact,
    /// Commercial (parent) entity, when the partner is a child contact.
    pub commercial_partner: Option<Contact>,
    /// Child contacts, in directory order.
    pub contacts: Vec<Contact>,
}

impl PartnerContacts {
    pub fn new(partner: Contact) -> Self {
        Self {
            partner,
            commercial_partner: None,
            contacts: Vec::new(),
        }
    }

    /// First `followup` contact, else first `invoice` contact, else the
    /// commercial partner, else the partner itself.
    pub fn addressee(&self) -> &Contact {
        self.first_of(ContactKind::Followup)
            .or_else(|| self.first_of(ContactKind::Invoice))
            .or(self.commercial_partner.as_ref())
            .unwrap_or(&self.partner)
    }

    fn first_of(&self, kind: ContactKind) -> Option<&Contact> {
        self.contacts.iter().find(|c| c.kind == kind)
    }
}
