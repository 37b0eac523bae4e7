use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use dunning_core::{CompanyId, UserId};
use dunning_receivables::Currency;

/// Explicit evaluation environment threaded into every engine call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationContext {
    pub company_id: CompanyId,
    /// Operator on whose behalf the run happens (`None` for the scheduler).
    pub actor_id: Option<UserId>,
    pub today: NaiveDate,
    /// Fallback language when the addressee has none (e.g. "en_US").
    pub locale: String,
    pub target_currency: Currency,
}

impl EvaluationContext {
    pub fn new(company_id: CompanyId, today: NaiveDate, target_currency: Currency) -> Self {
        Self {
            company_id,
            actor_id: None,
            today,
            locale: "en_US".to_string(),
            target_currency,
        }
    }

    pub fn with_actor(mut self, actor_id: UserId) -> Self {
        self.actor_id = Some(actor_id);
        self
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = locale.into();
        self
    }
}
