//! Per-user neuron subscriptions and the change reports sent to subscribers.
//!
//! A subscriber keeps a snapshot of every neuron they follow. An update
//! fetches fresh snapshots, reports the differences and then stores the fresh
//! snapshots, so the next report is relative to what the user last saw.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use tracing::{debug, info, warn};

use crate::{
    format_table, resolve_neurons, today, BotContext, Catmaid, Direction, HandlerRequest,
    NeuronSnapshot, PartnerCounts, Result, Subscriber, COLLECTING_INTEL,
};

/// Partners smaller than this are fragments and are not tracked.
const MIN_PARTNER_NODES: u64 = 500;

const SUBSCRIPTION_HINT: &str = "Not quite sure what you want me to do with your subscriptions. Please use `@catbot help subscription` to learn more.";
const NOTHING_CHANGED: &str = "None of the neurons you are subscribed to have changed recently!";

/// Fresh snapshots plus a deep link to each neuron's root node.
#[derive(Debug, Default)]
pub(crate) struct SnapshotBatch {
    pub(crate) snapshots: BTreeMap<u64, NeuronSnapshot>,
    pub(crate) links: BTreeMap<u64, String>,
}

/// Snapshot every neuron in `skids` that still exists.
pub(crate) fn build_snapshots(
    catmaid: &dyn Catmaid,
    skids: &[u64],
    date: NaiveDate,
) -> Result<SnapshotBatch> {
    let names = catmaid.neuron_names(skids)?;
    let present: Vec<u64> = skids.iter().copied().filter(|s| names.contains_key(s)).collect();
    if present.is_empty() {
        return Ok(SnapshotBatch::default());
    }

    let skeletons = catmaid.skeletons(&present)?;
    let review: BTreeMap<u64, f64> = catmaid
        .review_status(&present)?
        .into_iter()
        .map(|r| (r.skid, r.percent_reviewed()))
        .collect();
    let mut annotations = catmaid.annotations(&present)?;

    let mut partners: BTreeMap<u64, BTreeMap<u64, PartnerCounts>> = BTreeMap::new();
    for partner in catmaid.partners(&present, 1)? {
        if partner.num_nodes < MIN_PARTNER_NODES {
            continue;
        }
        for (skid, count) in partner.synapses.iter().filter(|(_, n)| **n > 0) {
            let counts = partners
                .entry(*skid)
                .or_default()
                .entry(partner.skid)
                .or_default();
            match partner.direction {
                Direction::Upstream => counts.upstream = Some(*count),
                Direction::Downstream => counts.downstream = Some(*count),
            }
        }
    }

    let mut batch = SnapshotBatch::default();
    for skeleton in skeletons {
        let skid = skeleton.skid;
        if let Some(root) = skeleton.root() {
            batch
                .links
                .insert(skid, catmaid.deep_link([root.x, root.y, root.z], skid, root.id));
        }
        let mut neuron_annotations = annotations.remove(&skid).unwrap_or_default();
        neuron_annotations.sort();
        batch.snapshots.insert(
            skid,
            NeuronSnapshot {
                name: names.get(&skid).cloned().unwrap_or_else(|| skeleton.name.clone()),
                branch_points: skeleton.branch_points(),
                n_nodes: skeleton.nodes.len(),
                pre_synapses: skeleton.pre_synapses(),
                post_synapses: skeleton.post_synapses(),
                open_ends: skeleton.open_ends(),
                review_status: review.get(&skid).copied().unwrap_or(0.0),
                annotations: neuron_annotations,
                synaptic_partners: partners.remove(&skid).unwrap_or_default(),
                last_update: date,
            },
        );
    }
    Ok(batch)
}

#[derive(Debug, Default, PartialEq)]
pub(crate) struct NeuronChanges {
    /// `(value, new, old)` for every basic value that differs.
    pub(crate) basic: Vec<(&'static str, String, String)>,
    pub(crate) new_annotations: Vec<String>,
    pub(crate) gone_annotations: Vec<String>,
    /// Partner skid to `(new, old)` counts.
    pub(crate) partners: BTreeMap<u64, (PartnerCounts, PartnerCounts)>,
}

impl NeuronChanges {
    pub(crate) fn is_empty(&self) -> bool {
        self.basic.is_empty()
            && self.new_annotations.is_empty()
            && self.gone_annotations.is_empty()
            && self.partners.is_empty()
    }
}

fn basic_values(snapshot: &NeuronSnapshot) -> [(&'static str, String); 7] {
    [
        ("name", snapshot.name.clone()),
        ("branch_points", snapshot.branch_points.to_string()),
        ("n_nodes", snapshot.n_nodes.to_string()),
        ("pre_synapses", snapshot.pre_synapses.to_string()),
        ("post_synapses", snapshot.post_synapses.to_string()),
        ("open_ends", snapshot.open_ends.to_string()),
        ("review_status", snapshot.review_status.to_string()),
    ]
}

pub(crate) fn diff_snapshots(old: &NeuronSnapshot, new: &NeuronSnapshot) -> NeuronChanges {
    let basic = basic_values(new)
        .into_iter()
        .zip(basic_values(old))
        .filter(|((_, n), (_, o))| n != o)
        .map(|((key, n), (_, o))| (key, n, o))
        .collect();

    let new_annotations = new
        .annotations
        .iter()
        .filter(|a| !old.annotations.contains(a))
        .cloned()
        .collect();
    let gone_annotations = old
        .annotations
        .iter()
        .filter(|a| !new.annotations.contains(a))
        .cloned()
        .collect();

    let partner_ids: BTreeSet<u64> = new
        .synaptic_partners
        .keys()
        .chain(old.synaptic_partners.keys())
        .copied()
        .collect();
    let partners = partner_ids
        .into_iter()
        .filter_map(|skid| {
            let n = new.synaptic_partners.get(&skid).copied().unwrap_or_default();
            let o = old.synaptic_partners.get(&skid).copied().unwrap_or_default();
            (n != o).then_some((skid, (n, o)))
        })
        .collect();

    NeuronChanges {
        basic,
        new_annotations,
        gone_annotations,
        partners,
    }
}

/// One neuron's section of a change report.
pub(crate) fn format_changes(
    skid: u64,
    link: &str,
    name: &str,
    since: NaiveDate,
    changes: &NeuronChanges,
    partner_names: &BTreeMap<u64, String>,
) -> String {
    let mut text = format!("<{link}|{name}> - #{skid} (changes since {since}) \n```");
    if !changes.basic.is_empty() {
        let rows: Vec<Vec<String>> = changes
            .basic
            .iter()
            .map(|(key, n, o)| vec![key.to_string(), n.clone(), o.clone()])
            .collect();
        text.push_str(&format_table(Some(&["Value", "New", "Old"]), &rows));
        text.push('\n');
    }
    if !changes.new_annotations.is_empty() {
        text.push_str(&format!("New annotations: {} \n", changes.new_annotations.join("; ")));
    }
    if !changes.gone_annotations.is_empty() {
        text.push_str(&format!(
            "Deleted annotations: {} \n",
            changes.gone_annotations.join("; ")
        ));
    }
    if !changes.partners.is_empty() {
        text.push_str("Synaptic partners:\n");
        let rows: Vec<Vec<String>> = changes
            .partners
            .iter()
            .map(|(partner, (n, o))| {
                vec![
                    partner_names
                        .get(partner)
                        .cloned()
                        .unwrap_or_else(|| "not found".to_string()),
                    partner.to_string(),
                    format!("{}/{}", n.display_upstream(), o.display_upstream()),
                    format!("{}/{}", n.display_downstream(), o.display_downstream()),
                ]
            })
            .collect();
        text.push_str(&format_table(
            Some(&["Name", "SKID", "Synapses from (new/old)", "Synapses to (new/old)"]),
            &rows,
        ));
        text.push('\n');
    }
    text.push_str("```\n");
    text
}

/// Report for one subscriber over `skids`: the changed-neuron text and the
/// neurons without changes.
fn build_report(
    catmaid: &dyn Catmaid,
    subscriber: &Subscriber,
    fresh: &SnapshotBatch,
    skids: &[u64],
) -> Result<(String, Vec<u64>)> {
    let mut report = String::new();
    let mut unchanged = Vec::new();
    for skid in skids {
        let (Some(old), Some(new)) = (subscriber.neurons.get(skid), fresh.snapshots.get(skid))
        else {
            unchanged.push(*skid);
            continue;
        };
        let changes = diff_snapshots(old, new);
        if changes.is_empty() {
            unchanged.push(*skid);
            continue;
        }
        let partner_ids: Vec<u64> = changes.partners.keys().copied().collect();
        let partner_names = if partner_ids.is_empty() {
            BTreeMap::new()
        } else {
            catmaid.neuron_names(&partner_ids)?
        };
        let link = fresh.links.get(skid).map(String::as_str).unwrap_or_default();
        report.push_str(&format_changes(
            *skid,
            link,
            &new.name,
            old.last_update,
            &changes,
            &partner_names,
        ));
    }
    Ok((report, unchanged))
}

fn post_report(ctx: &BotContext, user: &str, report: &str, unchanged: &[u64]) -> Result<()> {
    if report.is_empty() {
        ctx.chat.post_message(user, NOTHING_CHANGED, &[])?;
        return Ok(());
    }
    ctx.chat.post_message(user, report, &[])?;
    if !unchanged.is_empty() {
        let list = unchanged
            .iter()
            .map(u64::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        ctx.chat
            .post_message(user, &format!("No changes for neurons `{list}`"), &[])?;
    }
    Ok(())
}

fn load_subscriber(ctx: &BotContext, user: &str) -> Result<Subscriber> {
    Ok(ctx
        .stores
        .subscriptions
        .transact(|txn| txn.get::<Subscriber>(user))?
        .unwrap_or_default())
}

/// Read-modify-write of one subscriber under the store lock.
fn update_subscriber<T>(
    ctx: &BotContext,
    user: &str,
    f: impl FnOnce(&mut Subscriber) -> T,
) -> Result<T> {
    ctx.stores.subscriptions.transact(|txn| {
        let mut subscriber = txn.get::<Subscriber>(user)?.unwrap_or_default();
        let value = f(&mut subscriber);
        txn.put(user, &subscriber)?;
        Ok(value)
    })
}

fn store_snapshots(ctx: &BotContext, user: &str, fresh: &SnapshotBatch, skids: &[u64]) -> Result<()> {
    update_subscriber(ctx, user, |subscriber| {
        for skid in skids {
            if let Some(snapshot) = fresh.snapshots.get(skid) {
                subscriber.neurons.insert(*skid, snapshot.clone());
            }
        }
    })
}

fn skid_list(skids: &[u64]) -> String {
    skids
        .iter()
        .map(|s| format!("#{s}"))
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubscriptionCommand {
    List,
    New,
    Auto,
    Delete,
    Update,
}

fn parse_subscription_command(lowered: &str) -> Option<SubscriptionCommand> {
    lowered.split_whitespace().find_map(|word| match word {
        "list" => Some(SubscriptionCommand::List),
        "new" => Some(SubscriptionCommand::New),
        "auto" => Some(SubscriptionCommand::Auto),
        "delete" => Some(SubscriptionCommand::Delete),
        "update" => Some(SubscriptionCommand::Update),
        _ => None,
    })
}

pub(crate) fn run_subscription(ctx: &BotContext, request: &HandlerRequest) -> Result<()> {
    let Some(user) = request.user.as_deref() else {
        return run_global_update(ctx, request.worker_id);
    };
    let Some(command) = parse_subscription_command(&request.lowered()) else {
        ctx.chat.post_message(user, SUBSCRIPTION_HINT, &[])?;
        return Ok(());
    };
    let skids: Vec<u64> = resolve_neurons(ctx.catmaid.as_ref(), &request.command)?
        .into_iter()
        .collect();

    let response = match command {
        SubscriptionCommand::List => {
            let subscriber = load_subscriber(ctx, user)?;
            if subscriber.subscriptions.is_empty() {
                "Currently, I do not have any subscriptions for you!".to_string()
            } else {
                let names = ctx.catmaid.neuron_names(&subscriber.subscriptions)?;
                let rows: Vec<Vec<String>> = subscriber
                    .subscriptions
                    .iter()
                    .map(|s| {
                        vec![
                            names.get(s).cloned().unwrap_or_else(|| "not found".to_string()),
                            format!("#{s}"),
                        ]
                    })
                    .collect();
                format!(
                    "You are currently subscribed to the following neurons: \n```{}```",
                    format_table(None, &rows)
                )
            }
        }
        SubscriptionCommand::New if skids.is_empty() => {
            "Please give me at least a single neuron to subscribe you to!".to_string()
        }
        SubscriptionCommand::New => {
            let known = load_subscriber(ctx, user)?.neurons;
            let unseen: Vec<u64> = skids.iter().copied().filter(|s| !known.contains_key(s)).collect();
            let fresh = build_snapshots(ctx.catmaid.as_ref(), &unseen, today())?;
            update_subscriber(ctx, user, |subscriber| {
                for skid in &skids {
                    if !subscriber.subscriptions.contains(skid) {
                        subscriber.subscriptions.push(*skid);
                    }
                }
                for (skid, snapshot) in fresh.snapshots {
                    subscriber.neurons.entry(skid).or_insert(snapshot);
                }
            })?;
            format!("Thanks! I have subscribed you to `{}`", skid_list(&skids))
        }
        SubscriptionCommand::Auto => {
            let enabled = update_subscriber(ctx, user, |subscriber| {
                subscriber.daily_updates = !subscriber.daily_updates;
                subscriber.daily_updates
            })?;
            if enabled {
                "Thanks! You will now automatically receive daily updates for your subscribed neurons.".to_string()
            } else {
                "Thanks! You will no longer receive daily updates.".to_string()
            }
        }
        SubscriptionCommand::Delete if skids.is_empty() => {
            "Please give me at least a single neuron to unsubscribe you from!".to_string()
        }
        SubscriptionCommand::Delete => {
            let removed = update_subscriber(ctx, user, |subscriber| {
                let removed: Vec<u64> = skids
                    .iter()
                    .copied()
                    .filter(|s| subscriber.subscriptions.contains(s))
                    .collect();
                subscriber.subscriptions.retain(|s| !removed.contains(s));
                for skid in &removed {
                    subscriber.neurons.remove(skid);
                }
                removed
            })?;
            format!(
                "Thanks! I successfully unsubscribed you from neuron(s) ```{} ```",
                skid_list(&removed)
            )
        }
        SubscriptionCommand::Update => {
            return run_user_update(ctx, user, &skids);
        }
    };
    ctx.chat.post_message(user, &response, &[])?;
    Ok(())
}

/// On-demand report for one user over `requested` (all subscriptions when empty).
fn run_user_update(ctx: &BotContext, user: &str, requested: &[u64]) -> Result<()> {
    let placeholder = ctx.chat.post_message(user, COLLECTING_INTEL, &[])?;
    let subscriber = load_subscriber(ctx, user)?;
    let targets: Vec<u64> = if requested.is_empty() {
        subscriber.subscriptions.clone()
    } else {
        requested
            .iter()
            .copied()
            .filter(|s| subscriber.subscriptions.contains(s))
            .collect()
    };

    let fresh = build_snapshots(ctx.catmaid.as_ref(), &targets, today())?;
    let (report, unchanged) = build_report(ctx.catmaid.as_ref(), &subscriber, &fresh, &targets)?;
    ctx.chat.delete_message(user, &placeholder)?;
    post_report(ctx, user, &report, &unchanged)?;
    store_snapshots(ctx, user, &fresh, &targets)
}

/// Scheduled run: every user with daily updates gets a report over all of
/// their subscriptions. Neurons are fetched once for all users.
pub(crate) fn run_global_update(ctx: &BotContext, worker_id: u64) -> Result<()> {
    let subscribers: Vec<(String, Subscriber)> =
        ctx.stores.subscriptions.transact(|txn| txn.entries())?;
    let to_notify: Vec<&(String, Subscriber)> =
        subscribers.iter().filter(|(_, s)| s.daily_updates).collect();
    info!(worker = worker_id, users = to_notify.len(), "daily subscription update");

    let all_skids: Vec<u64> = to_notify
        .iter()
        .flat_map(|(_, s)| s.subscriptions.iter().copied())
        .collect::<BTreeSet<u64>>()
        .into_iter()
        .collect();
    let fresh = build_snapshots(ctx.catmaid.as_ref(), &all_skids, today())?;

    let mut failed = 0usize;
    for (user, subscriber) in to_notify {
        if let Err(err) = notify_subscriber(ctx, worker_id, user, subscriber, &fresh) {
            warn!(worker = worker_id, %user, error = %err, "daily update failed for user");
            failed += 1;
        }
    }
    if failed > 0 {
        warn!(worker = worker_id, failed, "daily update finished with failures");
    }
    Ok(())
}

/// Report to one subscriber and write back; the snapshot is kept on failure so
/// the next run reports the same changes.
fn notify_subscriber(
    ctx: &BotContext,
    worker_id: u64,
    user: &str,
    subscriber: &Subscriber,
    fresh: &SnapshotBatch,
) -> Result<()> {
    let (report, unchanged) =
        build_report(ctx.catmaid.as_ref(), subscriber, fresh, &subscriber.subscriptions)?;
    if report.is_empty() {
        debug!(worker = worker_id, %user, "no changes for user");
    }
    post_report(ctx, user, &report, &unchanged)?;
    store_snapshots(ctx, user, fresh, &subscriber.subscriptions)
}
