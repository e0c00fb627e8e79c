use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::AutonomyTier;

/// Risk class of a governed action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionSpec {
    pub name: String,
    /// Minimum effective autonomy at which the action may execute unsupervised.
    pub required: AutonomyTier,
    /// Automations also count against the per-company hourly limit.
    pub automation: bool,
    /// Lowest effective autonomy at which a downgraded request is surfaced as a
    /// suggestion instead of being only logged.
    pub suggest_floor: AutonomyTier,
}

impl ActionSpec {
    pub fn new(name: impl Into<String>, required: AutonomyTier) -> Self {
        Self {
            name: name.into(),
            required,
            automation: false,
            suggest_floor: AutonomyTier::SuggestOnly,
        }
    }

    pub fn automation(mut self) -> Self {
        self.automation = true;
        self
    }

    pub fn suggest_floor(mut self, floor: AutonomyTier) -> Self {
        self.suggest_floor = floor;
        self
    }
}

/// Static mapping from action name to its risk class.
#[derive(Debug, Clone, Default)]
pub struct ActionCatalog {
    actions: BTreeMap<String, ActionSpec>,
}

impl ActionCatalog {
    /// An empty catalog: every action is unknown.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The actions the CRM, chat, reminder and workflow modules route through the gatekeeper.
    pub fn builtin() -> Self {
        use AutonomyTier::{AutoFull, AutoLow, SuggestOnly};

        let mut catalog = Self::empty();
        // Notifications are themselves the suggestion, so they surface even at NONE.
        catalog.insert(
            ActionSpec::new("send_notification", SuggestOnly).suggest_floor(AutonomyTier::None),
        );
        catalog.insert(ActionSpec::new("create_zettel", SuggestOnly));
        catalog.insert(ActionSpec::new("create_reminder", SuggestOnly));
        catalog.insert(ActionSpec::new("suggest_reply", SuggestOnly));

        catalog.insert(ActionSpec::new("send_email", AutoLow));
        catalog.insert(ActionSpec::new("send_push", AutoLow));
        catalog.insert(ActionSpec::new("send_whatsapp", AutoLow));
        catalog.insert(ActionSpec::new("send_sms", AutoLow));
        catalog.insert(ActionSpec::new("send_external_message", AutoLow));
        catalog.insert(ActionSpec::new("create_contact", AutoLow));
        catalog.insert(ActionSpec::new("update_contact", AutoLow));
        catalog.insert(ActionSpec::new("enrich_contact", AutoLow));
        catalog.insert(ActionSpec::new("create_activity", AutoLow));
        catalog.insert(ActionSpec::new("update_deal", AutoLow));
        catalog.insert(ActionSpec::new("move_deal_stage", AutoLow));

        catalog.insert(ActionSpec::new("delete_contact_auto", AutoFull));
        catalog.insert(ActionSpec::new("modify_invoice_auto", AutoFull));
        catalog.insert(ActionSpec::new("delete_deal", AutoFull));

        catalog.insert(ActionSpec::new("workflow_send_email", AutoLow).automation());
        catalog.insert(ActionSpec::new("workflow_send_whatsapp", AutoLow).automation());
        catalog.insert(ActionSpec::new("workflow_update_record", AutoLow).automation());
        catalog.insert(ActionSpec::new("workflow_webhook", AutoFull).automation());
        catalog
    }

    /// Add or replace an action.
    pub fn insert(&mut self, spec: ActionSpec) {
        self.actions.insert(spec.name.clone(), spec);
    }

    pub fn get(&self, name: &str) -> Option<&ActionSpec> {
        self.actions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    /// All actions, sorted by name.
    pub fn iter(&self) -> impl Iterator<Item = &ActionSpec> {
        self.actions.values()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}
