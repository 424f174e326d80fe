use crate::{
    first_missing_neuron, missing_neuron_reply, no_neurons_reply, reply, resolve_neurons,
    BotContext, HandlerRequest, Result,
};

/// Deep links to each neuron's root node.
pub(crate) fn run_url(ctx: &BotContext, request: &HandlerRequest) -> Result<()> {
    let skids: Vec<u64> = resolve_neurons(ctx.catmaid.as_ref(), &request.command)?
        .into_iter()
        .collect();
    if skids.is_empty() {
        reply(ctx, request, &no_neurons_reply("url"))?;
        return Ok(());
    }
    if let Some(missing) = first_missing_neuron(ctx.catmaid.as_ref(), &skids)? {
        reply(ctx, request, &missing_neuron_reply(missing))?;
        return Ok(());
    }

    let mut response = String::from("Here are URLs to the neurons you have provided!");
    for skeleton in ctx.catmaid.skeletons(&skids)? {
        if let Some(root) = skeleton.root() {
            let link = ctx
                .catmaid
                .deep_link([root.x, root.y, root.z], skeleton.skid, root.id);
            response.push_str(&format!("\n *#{}*: {link}", skeleton.skid));
        }
    }
    reply(ctx, request, &response)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{test_context, FakeCatmaid, FakeChat};
    use std::sync::Arc;

    fn request(command: &str) -> HandlerRequest {
        HandlerRequest {
            worker_id: 2,
            command: command.into(),
            channel: Some("C1".into()),
            user: Some("U1".into()),
        }
    }

    #[test]
    fn links_point_at_root_nodes() {
        let chat = Arc::new(FakeChat::default());
        let catmaid = FakeCatmaid::new().with_neuron(16, "a").with_neuron(17, "b");
        let ctx = test_context("url_ok", chat.clone(), catmaid);
        run_url(&ctx, &request("url #16 #17")).unwrap();

        let text = &chat.texts()[0];
        assert!(text.starts_with("Here are URLs"));
        assert!(text.contains("*#16*: https://catmaid.test/?pid=1&xp=16&yp=16&zp=0"));
        assert!(text.contains("active_skeleton_id=16&active_node_id=161"));
        assert!(text.contains("active_skeleton_id=17&active_node_id=171"));
    }

    #[test]
    fn aborts_on_missing_neuron() {
        let chat = Arc::new(FakeChat::default());
        let ctx = test_context("url_missing", chat.clone(), FakeCatmaid::new().with_neuron(16, "a"));
        run_url(&ctx, &request("url #16 #404")).unwrap();
        assert_eq!(chat.texts(), vec![missing_neuron_reply(404)]);
    }
}
