//! Zotero group-library client used by the `zotero` command.

use std::io::Read;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::{BotError, Result, ZoteroSection};

const ZOTERO_API_BASE: &str = "https://api.zotero.org";
const PAGE_SIZE: usize = 100;
const MAX_FILE_BYTES: u64 = 50_000_000;

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub(crate) struct ZoteroItem {
    pub(crate) key: String,
    #[serde(default)]
    pub(crate) data: ZoteroItemData,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct ZoteroItemData {
    pub(crate) item_type: String,
    pub(crate) title: String,
    pub(crate) date: String,
    pub(crate) creators: Vec<ZoteroCreator>,
    pub(crate) tags: Vec<ZoteroTag>,
    #[serde(rename = "DOI")]
    pub(crate) doi: Option<String>,
    pub(crate) journal_abbreviation: Option<String>,
    pub(crate) parent_item: Option<String>,
    pub(crate) filename: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct ZoteroCreator {
    pub(crate) last_name: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
#[serde(default)]
pub(crate) struct ZoteroTag {
    pub(crate) tag: String,
}

pub(crate) trait ZoteroLibrary: Send + Sync {
    fn items(&self) -> Result<Vec<ZoteroItem>>;
    fn download(&self, key: &str, dest: &Path) -> Result<()>;
}

pub(crate) struct ZoteroClient {
    agent: ureq::Agent,
    group_id: String,
    api_key: String,
}

impl ZoteroClient {
    pub(crate) fn new(section: &ZoteroSection) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(30))
            .timeout_read(Duration::from_secs(120))
            .build();
        Self {
            agent,
            group_id: section.group_id.clone(),
            api_key: section.api_key.clone(),
        }
    }

    fn group_url(&self, rest: &str) -> String {
        format!(
            "{ZOTERO_API_BASE}/groups/{}/{rest}",
            urlencoding::encode(&self.group_id)
        )
    }

    fn request(&self, url: &str) -> ureq::Request {
        let request = self.agent.get(url).set("Zotero-API-Version", "3");
        if self.api_key.is_empty() {
            request
        } else {
            request.set("Zotero-API-Key", &self.api_key)
        }
    }
}

impl ZoteroLibrary for ZoteroClient {
    fn items(&self) -> Result<Vec<ZoteroItem>> {
        let url = self.group_url("items");
        let mut items = Vec::new();
        loop {
            let start = items.len().to_string();
            let limit = PAGE_SIZE.to_string();
            let response = self
                .request(&url)
                .query("limit", &limit)
                .query("start", &start)
                .call()
                .map_err(|e| BotError::Zotero(format!("items request error: {e}")))?;
            let total: Option<usize> = response
                .header("Total-Results")
                .and_then(|v| v.trim().parse().ok());
            let page: Vec<ZoteroItem> = response
                .into_json()
                .map_err(|e| BotError::Zotero(format!("items decode error: {e}")))?;
            let fetched = page.len();
            items.extend(page);
            if fetched < PAGE_SIZE || total.is_some_and(|t| items.len() >= t) {
                break;
            }
        }
        Ok(items)
    }

    fn download(&self, key: &str, dest: &Path) -> Result<()> {
        let url = self.group_url(&format!("items/{}/file", urlencoding::encode(key)));
        let response = self
            .request(&url)
            .call()
            .map_err(|e| BotError::Zotero(format!("file request error: {e}")))?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_FILE_BYTES)
            .read_to_end(&mut bytes)?;
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(dest, bytes)?;
        Ok(())
    }
}

/// Every term must hit the date, a creator's last name, the title, or a tag.
pub(crate) fn item_matches(item: &ZoteroItem, terms: &[String]) -> bool {
    let data = &item.data;
    terms.iter().all(|term| {
        let term = term.to_lowercase();
        data.date.contains(&term)
            || data.creators.iter().any(|c| c.last_name.to_lowercase() == term)
            || data.title.to_lowercase().contains(&term)
            || data.tags.iter().any(|t| t.tag.to_lowercase().contains(&term))
    })
}

/// The full-text PDF attached to the item with key `parent`.
pub(crate) fn find_pdf_attachment<'a>(items: &'a [ZoteroItem], parent: &str) -> Option<&'a ZoteroItem> {
    items.iter().find(|item| {
        item.data.item_type == "attachment"
            && item.data.title == "Full Text PDF"
            && item
                .data
                .parent_item
                .as_deref()
                .is_some_and(|p| p.eq_ignore_ascii_case(parent))
    })
}

/// One-line citation; items without creators (notes, attachments) yield `None`.
pub(crate) fn format_citation(item: &ZoteroItem) -> Option<String> {
    let data = &item.data;
    let authors: Vec<&str> = data.creators.iter().map(|c| c.last_name.as_str()).collect();
    let lead = match authors.as_slice() {
        [] => return None,
        [one] => one.to_string(),
        [first, second] => format!("{first} and {second}"),
        [first, ..] => format!("{first} et al."),
    };
    let doi = data
        .doi
        .as_deref()
        .filter(|d| !d.is_empty())
        .map(|d| format!(" - http://dx.doi.org/{d}"))
        .unwrap_or_default();
    Some(format!(
        "{lead}, {} ({}): {}{doi} ({})",
        data.journal_abbreviation.as_deref().unwrap_or(""),
        data.date,
        data.title,
        item.key
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn article() -> ZoteroItem {
        serde_json::from_value(json!({
            "key": "ABCD1234",
            "data": {
                "itemType": "journalArticle",
                "title": "Synaptic transmission parallels neuromodulation",
                "date": "2016-05",
                "creators": [{"lastName": "Schlegel"}, {"lastName": "Texada"}, {"lastName": "Miroschnikow"}],
                "tags": [{"tag": "Drosophila"}, {"tag": "connectomics"}],
                "DOI": "10.7554/eLife.16799",
                "journalAbbreviation": "eLife"
            }
        }))
        .unwrap()
    }

    fn terms(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn every_term_must_match() {
        let item = article();
        assert!(item_matches(&item, &terms(&["schlegel", "2016"])));
        assert!(item_matches(&item, &terms(&["drosophila", "neuromodulation"])));
        assert!(!item_matches(&item, &terms(&["schlegel", "2017"])));
        assert!(item_matches(&item, &[]));
    }

    #[test]
    fn citation_formats_author_lists() {
        let item = article();
        assert_eq!(
            format_citation(&item).unwrap(),
            "Schlegel et al., eLife (2016-05): Synaptic transmission parallels neuromodulation - http://dx.doi.org/10.7554/eLife.16799 (ABCD1234)"
        );
        let mut two = item.clone();
        two.data.creators.truncate(2);
        assert!(format_citation(&two).unwrap().starts_with("Schlegel and Texada, "));
        let mut none = item;
        none.data.creators.clear();
        assert!(format_citation(&none).is_none());
    }

    #[test]
    fn finds_pdf_by_parent_key() {
        let pdf: ZoteroItem = serde_json::from_value(json!({
            "key": "PDF0001",
            "data": {"itemType": "attachment", "title": "Full Text PDF", "parentItem": "ABCD1234", "filename": "paper.pdf"}
        }))
        .unwrap();
        let items = vec![article(), pdf];
        assert_eq!(find_pdf_attachment(&items, "abcd1234").map(|i| i.key.as_str()), Some("PDF0001"));
        assert!(find_pdf_attachment(&items, "nothing").is_none());
    }
}
