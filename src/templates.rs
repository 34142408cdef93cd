//! Message template catalog.
//!
//! The copy itself is authored outside the engine; the catalog is a pure
//! lookup: (template ref, tier, lead) → rendered draft. Placeholder
//! substitution covers lead fields only. A cadence step referencing a
//! missing template is a startup configuration error — the engine fails
//! closed rather than dispatching empty messages.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::channels::{ChannelKind, MessageDraft};
use crate::leads::Lead;
use crate::scoring::Tier;

/// One configured template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateConfig {
    pub id: String,
    pub channel: ChannelKind,
    #[serde(default)]
    pub subject: Option<String>,
    pub body: String,
}

/// Pure template lookup and rendering.
#[derive(Debug, Clone, Default)]
pub struct TemplateCatalog {
    templates: HashMap<String, TemplateConfig>,
}

impl TemplateCatalog {
    pub fn new(templates: Vec<TemplateConfig>) -> Self {
        Self {
            templates: templates.into_iter().map(|t| (t.id.clone(), t)).collect(),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.templates.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&TemplateConfig> {
        self.templates.get(id)
    }

    /// Render a draft for a lead. `None` when the template is unknown or
    /// bound to a different channel.
    pub fn render(
        &self,
        id: &str,
        channel: ChannelKind,
        tier: Tier,
        lead: &Lead,
    ) -> Option<MessageDraft> {
        let template = self.templates.get(id)?;
        if template.channel != channel {
            return None;
        }

        Some(MessageDraft {
            subject: template.subject.as_deref().map(|s| substitute(s, tier, lead)),
            body: substitute(&template.body, tier, lead),
            template: id.to_string(),
        })
    }
}

/// Replace `{{field}}` placeholders with lead fields.
fn substitute(text: &str, tier: Tier, lead: &Lead) -> String {
    text.replace("{{organization}}", &lead.attributes.organization)
        .replace("{{title}}", &lead.attributes.title)
        .replace("{{industry}}", &lead.attributes.industry)
        .replace("{{tier}}", tier.as_str())
}
