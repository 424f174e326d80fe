use std::sync::LazyLock;

use regex::Regex;

use crate::{
    first_missing_neuron, format_table, missing_neuron_reply, no_neurons_reply, reply,
    resolve_neurons, Attachment, BotContext, Direction, HandlerRequest, Partner, Result,
};

const MAX_PARTNER_ROWS: usize = 70;
const TRUNCATED_FOOTER: &str = "Truncated (too many neurons)!!!";

static THRESHOLD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"threshold=(\d+)").expect("threshold regex"));
static FILTER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"filter="(.*?)""#).expect("filter regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PartnerOptions {
    pub(crate) threshold: u32,
    /// Lower-cased name fragments; a partner is kept if its name has any.
    pub(crate) filters: Vec<String>,
    pub(crate) directions: Vec<Direction>,
}

impl PartnerOptions {
    pub(crate) fn parse(command: &str) -> Self {
        let lowered = command.to_lowercase();
        let threshold = THRESHOLD_RE
            .captures(&lowered)
            .and_then(|c| c[1].parse().ok())
            .unwrap_or(1);
        let filters = FILTER_RE
            .captures(&lowered)
            .map(|c| {
                c[1].split(',')
                    .map(|f| f.trim().to_string())
                    .filter(|f| !f.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let mut directions = Vec::new();
        if lowered.contains("incoming") || lowered.contains("upstream") {
            directions.push(Direction::Upstream);
        }
        if lowered.contains("outgoing") || lowered.contains("downstream") {
            directions.push(Direction::Downstream);
        }
        if directions.is_empty() {
            directions = vec![Direction::Upstream, Direction::Downstream];
        }

        Self {
            threshold,
            filters,
            directions,
        }
    }

    fn keeps(&self, partner: &Partner) -> bool {
        if self.filters.is_empty() {
            return true;
        }
        let name = partner.name.to_lowercase();
        self.filters.iter().any(|f| name.contains(f))
    }
}

fn direction_color(direction: Direction) -> &'static str {
    match direction {
        Direction::Upstream => "#2874A6",
        Direction::Downstream => "#C0392B",
    }
}

/// One attachment per direction, strongest partners first.
pub(crate) fn partner_attachments(
    query: &[u64],
    partners: &[Partner],
    options: &PartnerOptions,
) -> Vec<Attachment> {
    let mut headers: Vec<String> = vec!["Name".into(), "Skid".into()];
    headers.extend(query.iter().map(|skid| format!("#{skid}")));
    let header_refs: Vec<&str> = headers.iter().map(String::as_str).collect();

    options
        .directions
        .iter()
        .map(|direction| {
            let mut selected: Vec<&Partner> = partners
                .iter()
                .filter(|p| p.direction == *direction && options.keeps(p))
                .collect();
            selected.sort_by(|a, b| b.total().cmp(&a.total()).then(a.skid.cmp(&b.skid)));

            let rows: Vec<Vec<String>> = selected
                .iter()
                .take(MAX_PARTNER_ROWS)
                .map(|p| {
                    let mut row = vec![p.name.clone(), p.skid.to_string()];
                    row.extend(
                        query
                            .iter()
                            .map(|skid| p.synapses.get(skid).copied().unwrap_or(0).to_string()),
                    );
                    row
                })
                .collect();

            Attachment {
                title: format!("{} partners", direction.as_str()),
                text: format!("```{}```", format_table(Some(&header_refs), &rows)),
                color: Some(direction_color(*direction).to_string()),
                footer: if selected.len() > MAX_PARTNER_ROWS {
                    TRUNCATED_FOOTER.to_string()
                } else {
                    String::new()
                },
                mrkdwn_in: vec!["text".to_string()],
            }
        })
        .collect()
}

pub(crate) fn run_partners(ctx: &BotContext, request: &HandlerRequest) -> Result<()> {
    let skids: Vec<u64> = resolve_neurons(ctx.catmaid.as_ref(), &request.command)?
        .into_iter()
        .collect();
    if skids.is_empty() {
        reply(ctx, request, &no_neurons_reply("partners"))?;
        return Ok(());
    }
    if let Some(missing) = first_missing_neuron(ctx.catmaid.as_ref(), &skids)? {
        reply(ctx, request, &missing_neuron_reply(missing))?;
        return Ok(());
    }

    let options = PartnerOptions::parse(&request.command);
    let partners = ctx.catmaid.partners(&skids, options.threshold)?;
    let attachments = partner_attachments(&skids, &partners, &options);
    if let Some(channel) = request.reply_to() {
        ctx.chat.post_message(
            channel,
            "Here are the partners of neurons you requested:",
            &attachments,
        )?;
    }
    Ok(())
}
