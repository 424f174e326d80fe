use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::{Catmaid, Result};

static SKID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"#(\d+)").expect("skid regex"));
static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"name="(.*?)""#).expect("name regex"));
static ANNOTATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"annotation="(.*?)""#).expect("annotation regex"));

/// Slack turns straight quotes into typographic ones; undo that before parsing.
pub(crate) fn normalize_quotes(text: &str) -> String {
    text.replace(['\u{201c}', '\u{201d}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'")
}

/// Neuron references found in free text, before resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct NeuronQuery {
    pub(crate) skids: Vec<u64>,
    pub(crate) names: Vec<String>,
    pub(crate) annotations: Vec<String>,
}

impl NeuronQuery {
    pub(crate) fn parse(text: &str) -> Self {
        let text = normalize_quotes(text);
        Self {
            skids: SKID_RE
                .captures_iter(&text)
                .filter_map(|c| c[1].parse().ok())
                .collect(),
            names: NAME_RE
                .captures_iter(&text)
                .map(|c| c[1].to_string())
                .filter(|n| !n.is_empty())
                .collect(),
            annotations: ANNOTATION_RE
                .captures_iter(&text)
                .map(|c| c[1].to_string())
                .filter(|a| !a.is_empty())
                .collect(),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.skids.is_empty() && self.names.is_empty() && self.annotations.is_empty()
    }
}

/// Resolve every reference in `text` to the de-duplicated union of skeleton ids.
///
/// An empty set is a normal outcome ("no neurons given"), not an error.
pub(crate) fn resolve_neurons(catmaid: &dyn Catmaid, text: &str) -> Result<BTreeSet<u64>> {
    let query = NeuronQuery::parse(text);
    let mut skids: BTreeSet<u64> = query.skids.iter().copied().collect();
    for name in &query.names {
        skids.extend(catmaid.skids_by_name(name)?);
    }
    for annotation in &query.annotations {
        skids.extend(catmaid.skids_by_annotation(annotation)?);
    }
    Ok(skids)
}
