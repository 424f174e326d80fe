//! Admission and dispatch of routed commands. Runs on the main loop only, so
//! the worker registry needs no locking.

use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, error, info, warn};

use crate::{
    handler_for, happy_hour_now, missing_neuron_reply, resolve_neurons, run_subscription,
    spawn_handler_thread, spawn_nblast, Action, BotContext, DailySchedule, HandlerRequest,
    NblastOptions, Result, RoutedCommand, WorkerHandle, WorkerRegistry, WorkerSpec, BUSY_REPLY,
    FALLBACK_REPLY, GENERIC_ERROR_REPLY, NBLAST_SINGLE_NEURON_REPLY,
};

const GLOBAL_UPDATE_COMMAND: &str = "subscription update";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum DispatchOutcome {
    /// At the ceiling; the busy reply was sent.
    Refused,
    /// Answered on the main loop without a worker.
    Answered,
    Spawned(u64),
    Failed,
}

/// Admit and start one command. Failures are logged and reported to the
/// channel; they never escape into the main loop.
pub(crate) fn dispatch(
    ctx: &Arc<BotContext>,
    registry: &mut WorkerRegistry,
    routed: RoutedCommand,
) -> DispatchOutcome {
    let action = routed.action;
    let channel = routed.channel.clone();
    match try_dispatch(ctx, registry, routed) {
        Ok(outcome) => outcome,
        Err(err) => {
            error!(action = action.as_str(), error = %err, "dispatch failed");
            if let Err(err) = ctx.chat.post_message(&channel, GENERIC_ERROR_REPLY, &[]) {
                error!(error = %err, "could not post apology");
            }
            DispatchOutcome::Failed
        }
    }
}

fn try_dispatch(
    ctx: &Arc<BotContext>,
    registry: &mut WorkerRegistry,
    routed: RoutedCommand,
) -> Result<DispatchOutcome> {
    if !registry.has_capacity() {
        warn!(
            live = registry.live_count(),
            max = registry.max_parallel(),
            command = %routed.command,
            "at capacity; refusing command"
        );
        ctx.chat.post_message(&routed.channel, BUSY_REPLY, &[])?;
        return Ok(DispatchOutcome::Refused);
    }
    info!(action = routed.action.as_str(), user = %routed.user, channel = %routed.channel, "command received");

    match routed.action {
        Action::Fallback => {
            ctx.chat.post_message(&routed.channel, FALLBACK_REPLY, &[])?;
            Ok(DispatchOutcome::Answered)
        }
        Action::HappyHour => {
            ctx.chat.post_message(&routed.channel, &happy_hour_now(), &[])?;
            Ok(DispatchOutcome::Answered)
        }
        Action::Nblast => dispatch_nblast(ctx, registry, routed),
        action => {
            let Some(body) = handler_for(action) else {
                ctx.chat.post_message(&routed.channel, FALLBACK_REPLY, &[])?;
                return Ok(DispatchOutcome::Answered);
            };
            let id = registry.allocate_id();
            let request = HandlerRequest {
                worker_id: id,
                command: routed.command.clone(),
                channel: Some(routed.channel.clone()),
                user: Some(routed.user.clone()),
            };
            let handle = spawn_handler_thread(Arc::clone(ctx), request, action.as_str(), body)?;
            registry.register(
                id,
                WorkerSpec {
                    command: routed.command,
                    channel: Some(routed.channel),
                    user: Some(routed.user),
                    global: false,
                },
                WorkerHandle::InProcess(handle),
            );
            Ok(DispatchOutcome::Spawned(id))
        }
    }
}

/// Validate on the main loop, then hand off to the search script.
fn dispatch_nblast(
    ctx: &Arc<BotContext>,
    registry: &mut WorkerRegistry,
    routed: RoutedCommand,
) -> Result<DispatchOutcome> {
    let options = NblastOptions::parse(&routed.command);
    // Runs on the main loop: these clients use catmaid.lookup_timeout_ms, and
    // the loop reads no events until they return.
    let catmaid = ctx.lookup_for(options.autoseg);
    let skids = resolve_neurons(catmaid, &routed.command)?;
    let skid = match skids.iter().copied().collect::<Vec<_>>().as_slice() {
        [skid] => *skid,
        _ => {
            ctx.chat
                .post_message(&routed.channel, NBLAST_SINGLE_NEURON_REPLY, &[])?;
            return Ok(DispatchOutcome::Answered);
        }
    };
    if !catmaid.neuron_exists(skid)? {
        ctx.chat
            .post_message(&routed.channel, &missing_neuron_reply(skid), &[])?;
        return Ok(DispatchOutcome::Answered);
    }

    let (child, argv) = spawn_nblast(ctx, skid, &routed.channel, &options)?;
    let id = registry.allocate_id();
    registry.register(
        id,
        WorkerSpec {
            command: routed.command,
            channel: Some(routed.channel),
            user: Some(routed.user),
            global: false,
        },
        WorkerHandle::OutOfProcess { child, argv },
    );
    Ok(DispatchOutcome::Spawned(id))
}

/// Start the daily broadcast when it is due and a slot is free. Returns the
/// worker id when a run was started.
pub(crate) fn run_scheduled_update(
    ctx: &Arc<BotContext>,
    registry: &mut WorkerRegistry,
    schedule: &mut DailySchedule,
    today: NaiveDate,
) -> Option<u64> {
    if !schedule.due(today) {
        return None;
    }
    if !registry.has_capacity() {
        debug!(live = registry.live_count(), "daily update deferred; at capacity");
        return None;
    }

    let id = registry.allocate_id();
    let request = HandlerRequest {
        worker_id: id,
        command: GLOBAL_UPDATE_COMMAND.to_string(),
        channel: None,
        user: None,
    };
    match spawn_handler_thread(Arc::clone(ctx), request, "daily-update", run_subscription) {
        Ok(handle) => {
            registry.register(
                id,
                WorkerSpec {
                    command: GLOBAL_UPDATE_COMMAND.to_string(),
                    global: true,
                    ..WorkerSpec::default()
                },
                WorkerHandle::InProcess(handle),
            );
            schedule.mark_ran(today);
            info!(worker = id, %today, "daily update started");
            Some(id)
        }
        Err(err) => {
            error!(error = %err, "could not start daily update");
            None
        }
    }
}
