use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A chat message that reached the bot, already stripped of transport framing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct InboundMessage {
    pub(crate) user: String,
    pub(crate) channel: String,
    pub(crate) text: String,
    pub(crate) ts: String,
}

/// Slack "secondary attachment" used for coloured side panels.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub(crate) struct Attachment {
    pub(crate) title: String,
    pub(crate) text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) color: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub(crate) footer: String,
    #[serde(default = "default_mrkdwn_in")]
    pub(crate) mrkdwn_in: Vec<String>,
}

fn default_mrkdwn_in() -> Vec<String> {
    vec!["text".to_string()]
}

// ── Neuron database ──────────────────────────────────────────────────────

/// Entry in the neuron database, keyed by skeleton id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub(crate) struct NeuronRecord {
    #[serde(default)]
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) catmaid_name: String,
    pub(crate) skid: u64,
    #[serde(default)]
    pub(crate) alternative_names: Vec<String>,
    #[serde(default, rename = "type")]
    pub(crate) neuron_type: String,
    #[serde(default)]
    pub(crate) neuropils: Vec<String>,
    #[serde(default = "default_status")]
    pub(crate) status: String,
    #[serde(default)]
    pub(crate) tags: Vec<String>,
    pub(crate) last_edited: NaiveDate,
    #[serde(default)]
    pub(crate) comments: Vec<String>,
}

fn default_status() -> String {
    "unknown".to_string()
}

impl NeuronRecord {
    pub(crate) fn new(skid: u64, catmaid_name: &str, today: NaiveDate) -> Self {
        Self {
            name: String::new(),
            catmaid_name: catmaid_name.to_string(),
            skid,
            alternative_names: Vec::new(),
            neuron_type: String::new(),
            neuropils: Vec::new(),
            status: default_status(),
            tags: Vec::new(),
            last_edited: today,
            comments: Vec::new(),
        }
    }
}

/// Editable fields of a [`NeuronRecord`], in display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NeuronField {
    Name,
    CatmaidName,
    AlternativeNames,
    Type,
    Neuropils,
    Status,
    Tags,
    Comments,
}

impl NeuronField {
    pub(crate) const ALL: [NeuronField; 8] = [
        NeuronField::Name,
        NeuronField::CatmaidName,
        NeuronField::AlternativeNames,
        NeuronField::Type,
        NeuronField::Neuropils,
        NeuronField::Status,
        NeuronField::Tags,
        NeuronField::Comments,
    ];

    pub(crate) fn key(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::CatmaidName => "catmaid_name",
            Self::AlternativeNames => "alternative_names",
            Self::Type => "type",
            Self::Neuropils => "neuropils",
            Self::Status => "status",
            Self::Tags => "tags",
            Self::Comments => "comments",
        }
    }

    pub(crate) fn is_list(self) -> bool {
        matches!(
            self,
            Self::AlternativeNames | Self::Neuropils | Self::Tags | Self::Comments
        )
    }
}

impl NeuronRecord {
    pub(crate) fn scalar_mut(&mut self, field: NeuronField) -> Option<&mut String> {
        match field {
            NeuronField::Name => Some(&mut self.name),
            NeuronField::CatmaidName => Some(&mut self.catmaid_name),
            NeuronField::Type => Some(&mut self.neuron_type),
            NeuronField::Status => Some(&mut self.status),
            _ => None,
        }
    }

    pub(crate) fn list_mut(&mut self, field: NeuronField) -> Option<&mut Vec<String>> {
        match field {
            NeuronField::AlternativeNames => Some(&mut self.alternative_names),
            NeuronField::Neuropils => Some(&mut self.neuropils),
            NeuronField::Tags => Some(&mut self.tags),
            NeuronField::Comments => Some(&mut self.comments),
            _ => None,
        }
    }

    pub(crate) fn scalar(&self, field: NeuronField) -> Option<&str> {
        match field {
            NeuronField::Name => Some(&self.name),
            NeuronField::CatmaidName => Some(&self.catmaid_name),
            NeuronField::Type => Some(&self.neuron_type),
            NeuronField::Status => Some(&self.status),
            _ => None,
        }
    }

    pub(crate) fn list(&self, field: NeuronField) -> Option<&[String]> {
        match field {
            NeuronField::AlternativeNames => Some(&self.alternative_names),
            NeuronField::Neuropils => Some(&self.neuropils),
            NeuronField::Tags => Some(&self.tags),
            NeuronField::Comments => Some(&self.comments),
            _ => None,
        }
    }
}

// ── Subscriptions ────────────────────────────────────────────────────────

/// Per-user subscription state, keyed by Slack user id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub(crate) struct Subscriber {
    #[serde(default)]
    pub(crate) subscriptions: Vec<u64>,
    #[serde(default = "default_daily_updates")]
    pub(crate) daily_updates: bool,
    #[serde(default)]
    pub(crate) neurons: BTreeMap<u64, NeuronSnapshot>,
}

fn default_daily_updates() -> bool {
    true
}

impl Default for Subscriber {
    fn default() -> Self {
        Self {
            subscriptions: Vec::new(),
            daily_updates: true,
            neurons: BTreeMap::new(),
        }
    }
}

/// What a subscriber last saw of a neuron; diffed on the next update.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub(crate) struct NeuronSnapshot {
    pub(crate) name: String,
    pub(crate) branch_points: usize,
    pub(crate) n_nodes: usize,
    pub(crate) pre_synapses: usize,
    pub(crate) post_synapses: usize,
    pub(crate) open_ends: usize,
    pub(crate) review_status: f64,
    #[serde(default)]
    pub(crate) annotations: Vec<String>,
    #[serde(default)]
    pub(crate) synaptic_partners: BTreeMap<u64, PartnerCounts>,
    pub(crate) last_update: NaiveDate,
}

/// Synapse counts between a subscribed neuron and one partner.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub(crate) struct PartnerCounts {
    /// Synapses from the partner onto the neuron.
    #[serde(default)]
    pub(crate) upstream: Option<u32>,
    /// Synapses from the neuron onto the partner.
    #[serde(default)]
    pub(crate) downstream: Option<u32>,
}

impl PartnerCounts {
    pub(crate) fn display_upstream(&self) -> String {
        self.upstream.map_or_else(|| "-".to_string(), |n| n.to_string())
    }

    pub(crate) fn display_downstream(&self) -> String {
        self.downstream.map_or_else(|| "-".to_string(), |n| n.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neuron_record_serializes_type_field() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let mut record = NeuronRecord::new(16, "PN glomerulus DA1", date);
        record.neuron_type = "PN".into();
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["type"], "PN");
        assert_eq!(json["status"], "unknown");
        assert_eq!(json["last_edited"], "2024-03-01");
    }

    #[test]
    fn list_and_scalar_fields_are_disjoint() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let mut record = NeuronRecord::new(1, "", date);
        for field in NeuronField::ALL {
            assert_eq!(field.is_list(), record.list_mut(field).is_some());
            assert_eq!(!field.is_list(), record.scalar_mut(field).is_some());
        }
    }

    #[test]
    fn subscriber_defaults_to_daily_updates() {
        let subscriber: Subscriber = serde_json::from_str("{}").unwrap();
        assert!(subscriber.daily_updates);
        assert!(subscriber.subscriptions.is_empty());
    }

    #[test]
    fn partner_counts_render_dash_when_absent() {
        let counts = PartnerCounts {
            upstream: Some(4),
            downstream: None,
        };
        assert_eq!(counts.display_upstream(), "4");
        assert_eq!(counts.display_downstream(), "-");
    }
}
