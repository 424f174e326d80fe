//! Turns raw chat text into a classified command.
//!
//! Classification walks [`ROUTES`] in order and stops at the first route whose
//! keywords all occur in the lower-cased command. Order is priority: a message
//! that mentions both `help` and `nblast` is a help request, wherever the words
//! appear in the text.

use crate::{normalize_quotes, InboundMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Action {
    Help,
    ReviewStatus,
    Plot,
    Url,
    Partners,
    NeuronDb,
    Subscription,
    Nblast,
    Zotero,
    HappyHour,
    Fallback,
}

impl Action {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Self::Help => "help",
            Self::ReviewStatus => "review-status",
            Self::Plot => "plot",
            Self::Url => "url",
            Self::Partners => "partners",
            Self::NeuronDb => "neurondb",
            Self::Subscription => "subscription",
            Self::Nblast => "nblast",
            Self::Zotero => "zotero",
            Self::HappyHour => "happy-hour",
            Self::Fallback => "fallback",
        }
    }
}

/// Matches when every keyword is a substring of the lower-cased command.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Route {
    pub(crate) all_of: &'static [&'static str],
    pub(crate) action: Action,
}

impl Route {
    pub(crate) fn matches(&self, lowered: &str) -> bool {
        self.all_of.iter().all(|keyword| lowered.contains(keyword))
    }
}

pub(crate) const ROUTES: &[Route] = &[
    Route { all_of: &["help"], action: Action::Help },
    Route { all_of: &["review-status"], action: Action::ReviewStatus },
    Route { all_of: &["plot"], action: Action::Plot },
    Route { all_of: &["url"], action: Action::Url },
    Route { all_of: &["partners"], action: Action::Partners },
    Route { all_of: &["neurondb"], action: Action::NeuronDb },
    Route { all_of: &["subscription"], action: Action::Subscription },
    Route { all_of: &["nblast"], action: Action::Nblast },
    Route { all_of: &["zotero"], action: Action::Zotero },
    Route { all_of: &["happy", "hour"], action: Action::HappyHour },
];

pub(crate) fn classify(command: &str) -> Action {
    let lowered = command.to_lowercase();
    ROUTES
        .iter()
        .find(|route| route.matches(&lowered))
        .map_or(Action::Fallback, |route| route.action)
}

pub(crate) fn mention_marker(bot_user_id: &str) -> String {
    format!("<@{bot_user_id}>")
}

/// Text following the first mention of the bot, or `None` when the bot is not
/// mentioned. Case is preserved; names and field values are case-sensitive.
pub(crate) fn extract_command(text: &str, bot_user_id: &str) -> Option<String> {
    let marker = mention_marker(bot_user_id);
    let mut parts = text.split(marker.as_str());
    parts.next()?;
    let command = parts.next()?;
    Some(normalize_quotes(command.trim()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RoutedCommand {
    pub(crate) action: Action,
    pub(crate) command: String,
    pub(crate) channel: String,
    pub(crate) user: String,
}

pub(crate) fn route(message: &InboundMessage, bot_user_id: &str) -> Option<RoutedCommand> {
    if message.user == bot_user_id {
        return None;
    }
    let command = extract_command(&message.text, bot_user_id)?;
    Some(RoutedCommand {
        action: classify(&command),
        command,
        channel: message.channel.clone(),
        user: message.user.clone(),
    })
}
