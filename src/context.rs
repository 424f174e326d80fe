use std::path::PathBuf;
use std::sync::Arc;

use crate::{BotConfig, Catmaid, ChatApi, Stores, UserDirectory, ZoteroLibrary};

/// Process-wide collaborators, built once at startup and shared with handler
/// threads by `Arc`. The worker registry and the daily schedule are not here:
/// the main loop owns them.
pub(crate) struct BotContext {
    pub(crate) config: BotConfig,
    /// Forwarded to search subprocesses so they read the same settings.
    pub(crate) config_path: PathBuf,
    pub(crate) bot_user_id: String,
    pub(crate) chat: Arc<dyn ChatApi>,
    pub(crate) catmaid: Arc<dyn Catmaid>,
    pub(crate) autoseg: Option<Arc<dyn Catmaid>>,
    /// Short-timeout clients for lookups made on the main loop.
    pub(crate) lookup: Option<Arc<dyn Catmaid>>,
    pub(crate) lookup_autoseg: Option<Arc<dyn Catmaid>>,
    pub(crate) zotero: Option<Arc<dyn ZoteroLibrary>>,
    pub(crate) stores: Stores,
    pub(crate) users: UserDirectory,
}

impl BotContext {
    pub(crate) fn new(
        config: BotConfig,
        config_path: PathBuf,
        bot_user_id: String,
        chat: Arc<dyn ChatApi>,
        catmaid: Arc<dyn Catmaid>,
    ) -> Self {
        let stores = Stores::new(config.neurondb_path(), config.subscriptions_path());
        let users = UserDirectory::new(Arc::clone(&chat));
        Self {
            config,
            config_path,
            bot_user_id,
            chat,
            catmaid,
            autoseg: None,
            lookup: None,
            lookup_autoseg: None,
            zotero: None,
            stores,
            users,
        }
    }

    pub(crate) fn with_autoseg(mut self, autoseg: Arc<dyn Catmaid>) -> Self {
        self.autoseg = Some(autoseg);
        self
    }

    pub(crate) fn with_lookup(
        mut self,
        lookup: Arc<dyn Catmaid>,
        lookup_autoseg: Option<Arc<dyn Catmaid>>,
    ) -> Self {
        self.lookup = Some(lookup);
        self.lookup_autoseg = lookup_autoseg;
        self
    }

    pub(crate) fn with_zotero(mut self, zotero: Arc<dyn ZoteroLibrary>) -> Self {
        self.zotero = Some(zotero);
        self
    }

    /// The instance nblast validates against: autoseg when asked and configured.
    pub(crate) fn catmaid_for(&self, autoseg: bool) -> &dyn Catmaid {
        match (&self.autoseg, autoseg) {
            (Some(instance), true) => instance.as_ref(),
            _ => self.catmaid.as_ref(),
        }
    }

    /// Like [`catmaid_for`](Self::catmaid_for), preferring the short-timeout
    /// lookup clients when they are configured.
    pub(crate) fn lookup_for(&self, autoseg: bool) -> &dyn Catmaid {
        let lookup = if autoseg && self.autoseg.is_some() {
            &self.lookup_autoseg
        } else {
            &self.lookup
        };
        match lookup {
            Some(instance) => instance.as_ref(),
            None => self.catmaid_for(autoseg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{test_context, FakeCatmaid, FakeChat};

    fn context() -> BotContext {
        let chat = Arc::new(FakeChat::default());
        test_context("context_lookup", chat, FakeCatmaid::new().with_neuron(1, "main"))
            .with_autoseg(Arc::new(FakeCatmaid::new().with_neuron(2, "autoseg")))
    }

    #[test]
    fn lookup_falls_back_to_handler_clients() {
        let ctx = context();
        assert!(ctx.lookup_for(false).neuron_exists(1).unwrap());
        assert!(ctx.lookup_for(true).neuron_exists(2).unwrap());
    }

    #[test]
    fn lookup_prefers_short_timeout_clients() {
        let ctx = context().with_lookup(
            Arc::new(FakeCatmaid::new().with_neuron(3, "main lookup")),
            Some(Arc::new(FakeCatmaid::new().with_neuron(4, "autoseg lookup")) as Arc<dyn Catmaid>),
        );
        assert!(ctx.lookup_for(false).neuron_exists(3).unwrap());
        assert!(ctx.lookup_for(true).neuron_exists(4).unwrap());
        assert!(!ctx.lookup_for(false).neuron_exists(1).unwrap());
    }
}
