//! Follow-up level table.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use dunning_core::{CompanyId, DomainError, DomainResult, Entity, LevelId};

/// Opaque reference to a mail or print template owned by the template layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TemplateRef(pub String);

impl TemplateRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for TemplateRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One row of a company's escalation table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowupLevel {
    pub id: LevelId,
    pub company_id: CompanyId,
    /// Ordering key, unique within the company.
    pub sequence: u32,
    /// Short operator-facing name (e.g. "First reminder").
    pub name: String,
    /// Days past the most-overdue item's due date before this level triggers.
    pub delay_days: u32,
    pub send_email: bool,
    pub send_letter: bool,
    /// Never fired by the scheduler, only by explicit operator action.
    pub manual: bool,
    /// Whether the scheduler may execute the level by itself.
    pub auto_execute: bool,
    pub mail_template: Option<TemplateRef>,
    pub print_template: Option<TemplateRef>,
    /// Body header in the company's default language.
    pub description: String,
    /// Body header per locale (e.g. "fr_FR" -> "...").
    #[serde(default)]
    pub translations: BTreeMap<String, String>,
}

impl FollowupLevel {
    /// Level that sends nothing by itself; see the `with_*` builders.
    pub fn new(
        company_id: CompanyId,
        sequence: u32,
        delay_days: u32,
        name: impl Into<String>,
    ) -> Self {
        let name = name.into();
        Self {
            id: LevelId::new(),
            company_id,
            sequence,
            description: name.clone(),
            name,
            delay_days,
            send_email: false,
            send_letter: false,
            manual: false,
            auto_execute: true,
            mail_template: None,
            print_template: None,
            translations: BTreeMap::new(),
        }
    }

    pub fn with_email(mut self, template: TemplateRef) -> Self {
        self.send_email = true;
        self.mail_template = Some(template);
        self
    }

    pub fn with_letter(mut self, template: TemplateRef) -> Self {
        self.send_letter = true;
        self.print_template = Some(template);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_translation(mut self, locale: impl Into<String>, text: impl Into<String>) -> Self {
        self.translations.insert(locale.into(), text.into());
        self
    }

    pub fn manual(mut self) -> Self {
        self.manual = true;
        self
    }

    pub fn without_auto_execute(mut self) -> Self {
        self.auto_execute = false;
        self
    }

    /// The scheduler may fire this level without an operator.
    pub fn is_automatic(&self) -> bool {
        !self.manual && self.auto_execute
    }

    /// Localized description: exact locale, then its language part, then default.
    pub fn description_for(&self, locale: &str) -> &str {
        if let Some(text) = self.translations.get(locale) {
            return text;
        }
        let lang = locale.split(['_', '-']).next().unwrap_or(locale);
        self.translations
            .iter()
            .find(|(key, _)| key.split(['_', '-']).next() == Some(lang))
            .map(|(_, text)| text.as_str())
            .unwrap_or(&self.description)
    }
}

impl Entity for FollowupLevel {
    type Id = LevelId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Validated, sequence-ordered level table of one company.
///
/// Invariants:
/// - at least one level
/// - `sequence` unique
/// - `delay_days` non-decreasing with `sequence`
/// - every email (letter) level references a mail (print) template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelTable {
    company_id: CompanyId,
    levels: Vec<FollowupLevel>,
}

impl LevelTable {
    pub fn new(company_id: CompanyId, mut levels: Vec<FollowupLevel>) -> DomainResult<Self> {
        if levels.is_empty() {
            return Err(DomainError::validation(format!(
                "company {company_id} has no follow-up levels"
            )));
        }

        levels.sort_by_key(|l| l.sequence);

        let mut seen = HashSet::new();
        for level in &levels {
            if level.company_id != company_id {
                return Err(DomainError::invariant(format!(
                    "level {} belongs to company {}",
                    level.id, level.company_id
                )));
            }
            if !seen.insert(level.sequence) {
                return Err(DomainError::invariant(format!(
                    "duplicate follow-up sequence {}",
                    level.sequence
                )));
            }
            if level.send_email && level.mail_template.is_none() {
                return Err(DomainError::validation(format!(
                    "level '{}' sends email but has no mail template",
                    level.name
                )));
            }
            if level.send_letter && level.print_template.is_none() {
                return Err(DomainError::validation(format!(
                    "level '{}' sends letters but has no print template",
                    level.name
                )));
            }
        }

        for pair in levels.windows(2) {
            if pair[1].delay_days < pair[0].delay_days {
                return Err(DomainError::invariant(format!(
                    "delay of level '{}' ({}) is shorter than level '{}' ({})",
                    pair[1].name, pair[1].delay_days, pair[0].name, pair[0].delay_days
                )));
            }
        }

        Ok(Self { company_id, levels })
    }

    pub fn company_id(&self) -> CompanyId {
        self.company_id
    }

    /// Levels ordered by sequence.
    pub fn levels(&self) -> &[FollowupLevel] {
        &self.levels
    }

    pub fn get(&self, id: LevelId) -> Option<&FollowupLevel> {
        self.levels.iter().find(|l| l.id == id)
    }

    pub fn terminal(&self) -> Option<&FollowupLevel> {
        self.levels.last()
    }

    /// Level immediately following `level` in sequence order.
    pub fn level_after(&self, level: &FollowupLevel) -> Option<&FollowupLevel> {
        self.levels.iter().find(|l| l.sequence > level.sequence)
    }

    /// Highest-sequence level with `delay_days <= most_overdue_days` and a
    /// sequence above `current` (any sequence when `current` is `None`).
    pub fn next_level_after(
        &self,
        current: Option<&FollowupLevel>,
        most_overdue_days: u32,
    ) -> Option<&FollowupLevel> {
        self.levels
            .iter()
            .filter(|l| current.is_none_or(|c| l.sequence > c.sequence))
            .filter(|l| l.delay_days <= most_overdue_days)
            .last()
    }
}
