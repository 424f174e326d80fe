//! Startup wiring and the main event loop.

use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::{
    dispatch, ensure_dir, parse_socket_event, route, run_scheduled_update, today, BotConfig,
    BotContext, Catmaid, CatmaidClient, DailySchedule, EventDeduper, Result, SlackClient,
    SocketFrame, WorkerRegistry, ZoteroClient,
};

/// Build the shared context from a validated config.
pub(crate) fn build_context(
    config: BotConfig,
    config_path: PathBuf,
    slack: Arc<SlackClient>,
    bot_user_id: String,
) -> BotContext {
    let catmaid: Arc<dyn Catmaid> =
        Arc::new(CatmaidClient::new(&config.catmaid.server_url, &config.catmaid));
    let autoseg = config
        .catmaid
        .autoseg_server_url
        .as_deref()
        .map(|url| Arc::new(CatmaidClient::new(url, &config.catmaid)) as Arc<dyn Catmaid>);
    let zotero = config.zotero.as_ref().map(|section| Arc::new(ZoteroClient::new(section)));
    let lookup_timeout = Duration::from_millis(config.catmaid.lookup_timeout_ms);
    let lookup: Arc<dyn Catmaid> = Arc::new(CatmaidClient::with_timeout(
        &config.catmaid.server_url,
        &config.catmaid,
        lookup_timeout,
    ));
    let lookup_autoseg = config.catmaid.autoseg_server_url.as_deref().map(|url| {
        Arc::new(CatmaidClient::with_timeout(url, &config.catmaid, lookup_timeout))
            as Arc<dyn Catmaid>
    });

    let mut ctx = BotContext::new(config, config_path, bot_user_id, slack, catmaid)
        .with_lookup(lookup, lookup_autoseg);
    if let Some(autoseg) = autoseg {
        ctx = ctx.with_autoseg(autoseg);
    }
    if let Some(zotero) = zotero {
        ctx = ctx.with_zotero(zotero);
    }
    ctx
}

/// Connect and serve until the process is killed.
pub(crate) fn run_bot(config: BotConfig, config_path: PathBuf) -> Result<()> {
    config.validate()?;
    ensure_dir(&config.renderings_dir())?;

    let slack = Arc::new(SlackClient::new(&config.slack)?);
    let bot_user_id = slack.auth_test()?;
    info!(bot = %config.bot.name, user_id = %bot_user_id, "authenticated with slack");

    let poll_interval = config.poll_interval();
    let mut registry = WorkerRegistry::new(config.bot.max_parallel);
    let ctx = Arc::new(build_context(config, config_path, Arc::clone(&slack), bot_user_id));
    // The first broadcast happens the day after startup.
    let mut schedule = DailySchedule::new(Some(today()));

    loop {
        let ws_url = match slack.open_socket_url() {
            Ok(url) => url,
            Err(err) => {
                warn!(error = %err, "apps.connections.open failed");
                thread::sleep(poll_interval);
                continue;
            }
        };

        let (socket_tx, socket_rx) = mpsc::channel::<SocketFrame>();
        let _listener = crate::spawn_socket_listener(ws_url, socket_tx);
        let mut deduper = EventDeduper::default();
        info!("connected to slack socket mode");

        loop {
            match socket_rx.recv_timeout(poll_interval) {
                Ok(SocketFrame::Event(payload)) => {
                    if let Some(message) = parse_socket_event(&payload) {
                        if deduper.is_duplicate(&message) {
                            continue;
                        }
                        if let Some(routed) = route(&message, &ctx.bot_user_id) {
                            debug!(user = %ctx.users.name(&routed.user), "routing command");
                            dispatch(&ctx, &mut registry, routed);
                        }
                    }
                }
                Ok(SocketFrame::Disconnected(reason)) => {
                    warn!(%reason, "slack socket disconnected");
                    break;
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {}
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }

            run_scheduled_update(&ctx, &mut registry, &mut schedule, today());
            registry.reap();
        }

        thread::sleep(poll_interval);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DoctorCheck {
    pub(crate) name: &'static str,
    pub(crate) ok: bool,
    pub(crate) detail: String,
}

impl DoctorCheck {
    fn from_result<T>(name: &'static str, result: Result<T>, describe: impl FnOnce(T) -> String) -> Self {
        match result {
            Ok(value) => Self { name, ok: true, detail: describe(value) },
            Err(err) => Self { name, ok: false, detail: err.to_string() },
        }
    }
}

fn script_check(name: &'static str, path: &Path) -> DoctorCheck {
    DoctorCheck {
        name,
        ok: path.is_file(),
        detail: path.display().to_string(),
    }
}

/// Offline and online health checks for an operator.
pub(crate) fn run_doctor(config: &BotConfig) -> Vec<DoctorCheck> {
    let mut checks = vec![DoctorCheck::from_result("config", config.validate(), |_| {
        "valid".to_string()
    })];

    let slack = SlackClient::new(&config.slack).and_then(|client| client.auth_test());
    checks.push(DoctorCheck::from_result("slack auth.test", slack, |id| {
        format!("bot user {id}")
    }));

    let catmaid = CatmaidClient::new(&config.catmaid.server_url, &config.catmaid);
    checks.push(DoctorCheck::from_result("catmaid volumes", catmaid.volumes(), |volumes| {
        format!("{} volumes", volumes.len())
    }));
    if let Some(url) = config.catmaid.autoseg_server_url.as_deref() {
        let autoseg = CatmaidClient::new(url, &config.catmaid);
        checks.push(DoctorCheck::from_result("autoseg volumes", autoseg.volumes(), |volumes| {
            format!("{} volumes", volumes.len())
        }));
    }

    checks.push(script_check("nblast script", &config.nblast.script));
    checks.push(script_check("nblast fafb script", &config.nblast.fafb_script));
    checks.push(DoctorCheck::from_result(
        "data dir",
        ensure_dir(&config.bot.data_dir),
        |_| config.bot.data_dir.display().to_string(),
    ));
    for check in checks.iter().filter(|check| !check.ok) {
        error!(check = check.name, detail = %check.detail, "doctor check failed");
    }
    checks
}
