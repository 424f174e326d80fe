use crate::{
    first_missing_neuron, format_table, missing_neuron_reply, no_neurons_reply, reply,
    resolve_neurons, BotContext, HandlerRequest, Result, COLLECTING_INTEL,
};

/// Review-status table. Missing neurons are reported before the placeholder
/// goes up, so a bad id gets exactly one reply.
pub(crate) fn run_review_status(ctx: &BotContext, request: &HandlerRequest) -> Result<()> {
    let skids: Vec<u64> = resolve_neurons(ctx.catmaid.as_ref(), &request.command)?
        .into_iter()
        .collect();
    if skids.is_empty() {
        reply(ctx, request, &no_neurons_reply("review-status"))?;
        return Ok(());
    }
    if let Some(missing) = first_missing_neuron(ctx.catmaid.as_ref(), &skids)? {
        reply(ctx, request, &missing_neuron_reply(missing))?;
        return Ok(());
    }

    let placeholder = reply(ctx, request, COLLECTING_INTEL)?;
    let names = ctx.catmaid.neuron_names(&skids)?;
    let statuses = ctx.catmaid.review_status(&skids)?;

    let rows: Vec<Vec<String>> = statuses
        .iter()
        .map(|status| {
            vec![
                status.skid.to_string(),
                names.get(&status.skid).cloned().unwrap_or_default(),
                status.total_nodes.to_string(),
                status.reviewed_nodes.to_string(),
                format!("{:.1}", status.percent_reviewed()),
            ]
        })
        .collect();
    let table = format_table(
        Some(&["Skid", "Name", "Nodes", "Reviewed", "% reviewed"]),
        &rows,
    );

    if let (Some(ts), Some(channel)) = (placeholder, request.reply_to()) {
        ctx.chat.delete_message(channel, &ts)?;
    }
    reply(
        ctx,
        request,
        &format!("This is the current review status:\n```{table}```"),
    )?;
    Ok(())
}
