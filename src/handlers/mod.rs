//! One module per chat command. Every handler runs on its own worker thread
//! behind [`spawn_handler_thread`], except nblast which runs out of process.

mod happy_hour;
mod help;
mod nblast;
mod neurondb;
mod partners;
mod plot;
mod review;
mod subscription;
mod url;
mod zotero;

#[allow(unused_imports)]
pub(crate) use happy_hour::*;
#[allow(unused_imports)]
pub(crate) use help::*;
#[allow(unused_imports)]
pub(crate) use nblast::*;
#[allow(unused_imports)]
pub(crate) use neurondb::*;
#[allow(unused_imports)]
pub(crate) use partners::*;
#[allow(unused_imports)]
pub(crate) use plot::*;
#[allow(unused_imports)]
pub(crate) use review::*;
#[allow(unused_imports)]
pub(crate) use subscription::*;
#[allow(unused_imports)]
pub(crate) use self::url::*;
#[allow(unused_imports)]
pub(crate) use zotero::*;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{error, info};

use crate::{Action, BotContext, Catmaid, Result};

pub(crate) const GENERIC_ERROR_REPLY: &str =
    "Ooops - something went wrong! Please let one of my admins know if this keeps happening!";
pub(crate) const BUSY_REPLY: &str =
    "I am currently really busy. Please give me a moment and try again. Cheers!";
pub(crate) const FALLBACK_REPLY: &str =
    "Not sure what you mean. Type _@catbot help_ to get a list of things I can do for you.";
pub(crate) const COLLECTING_INTEL: &str = "Got it! Collecting intel - please wait...";

pub(crate) fn missing_neuron_reply(skid: u64) -> String {
    format!("I'm sorry - the neuron #{skid} does not seem to exist. Please try again.")
}

pub(crate) fn no_neurons_reply(example: &str) -> String {
    format!(
        "Please provide neurons as `#skid`, `annotation=\"...\"` or `name=\"...\"`! For example: `@catbot {example} #957684`"
    )
}

/// One command as handed to a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HandlerRequest {
    pub(crate) worker_id: u64,
    pub(crate) command: String,
    pub(crate) channel: Option<String>,
    pub(crate) user: Option<String>,
}

impl HandlerRequest {
    pub(crate) fn lowered(&self) -> String {
        self.command.to_lowercase()
    }

    /// Where replies go: the originating channel, else the user's DM.
    pub(crate) fn reply_to(&self) -> Option<&str> {
        self.channel.as_deref().or(self.user.as_deref())
    }
}

/// Reply in the request's channel; a request without one (the scheduled job)
/// only logs.
pub(crate) fn reply(ctx: &BotContext, request: &HandlerRequest, text: &str) -> Result<Option<String>> {
    match request.reply_to() {
        Some(channel) => Ok(Some(ctx.chat.post_message(channel, text, &[])?)),
        None => {
            info!(worker = request.worker_id, "{text}");
            Ok(None)
        }
    }
}

/// First skid that does not exist in the database, if any.
pub(crate) fn first_missing_neuron(catmaid: &dyn Catmaid, skids: &[u64]) -> Result<Option<u64>> {
    for skid in skids {
        if !catmaid.neuron_exists(*skid)? {
            return Ok(Some(*skid));
        }
    }
    Ok(None)
}

pub(crate) type HandlerFn = fn(&BotContext, &HandlerRequest) -> Result<()>;

/// Handler for a threaded action. `Nblast` and `HappyHour` are answered by the
/// dispatcher and `Fallback` never spawns, so they have none.
pub(crate) fn handler_for(action: Action) -> Option<HandlerFn> {
    match action {
        Action::Help => Some(run_help),
        Action::ReviewStatus => Some(run_review_status),
        Action::Plot => Some(run_plot),
        Action::Url => Some(run_url),
        Action::Partners => Some(run_partners),
        Action::NeuronDb => Some(run_neurondb),
        Action::Subscription => Some(run_subscription),
        Action::Zotero => Some(run_zotero),
        Action::Nblast | Action::HappyHour | Action::Fallback => None,
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

/// Run `body` on a new thread. Errors and panics are logged and turned into
/// the generic apology so the thread always ends and frees its slot.
pub(crate) fn spawn_handler_thread(
    ctx: Arc<BotContext>,
    request: HandlerRequest,
    label: &'static str,
    body: HandlerFn,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("worker-{}", request.worker_id))
        .spawn(move || {
            info!(worker = request.worker_id, handler = label, command = %request.command, "worker started");
            let outcome = catch_unwind(AssertUnwindSafe(|| body(&ctx, &request)));
            let failure = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(err)) => Some(err.to_string()),
                Err(panic) => Some(panic_message(panic.as_ref())),
            };
            match failure {
                None => info!(worker = request.worker_id, handler = label, "worker finished"),
                Some(reason) => {
                    error!(worker = request.worker_id, handler = label, %reason, "worker failed");
                    if let Some(channel) = request.reply_to() {
                        if let Err(err) = ctx.chat.post_message(channel, GENERIC_ERROR_REPLY, &[]) {
                            error!(worker = request.worker_id, error = %err, "could not post apology");
                        }
                    }
                }
            }
        })
}
