use std::path::Path;

use crate::{
    find_pdf_attachment, format_citation, item_matches, reply, BotContext, HandlerRequest,
    Result,
};

pub(crate) const ZOTERO_UNCONFIGURED_REPLY: &str =
    "Sorry, I can't process your Zotero request unless you have it properly configured :(";
const ZOTERO_PLACEHOLDER: &str = "Searching Zotero database. Please hold...";
const SINGLE_KEY_REPLY: &str = "If you want me to grab you a PDF, please give me a single zotero key: `@catbot zotero file <ZOTERO-ID>`";
const NO_PDF_REPLY: &str = "Oops! I can't seem to find a PDF to the Zotero key you have given me...";
const NO_MATCH_REPLY: &str = "Sorry, I could not find anything matching your criteria!";

/// Search terms: every word of the command except the `zotero` keyword.
fn zotero_terms(lowered: &str) -> Vec<String> {
    lowered
        .split_whitespace()
        .filter(|word| *word != "zotero")
        .map(str::to_string)
        .collect()
}

pub(crate) fn run_zotero(ctx: &BotContext, request: &HandlerRequest) -> Result<()> {
    let Some(library) = ctx.zotero.as_ref() else {
        reply(ctx, request, ZOTERO_UNCONFIGURED_REPLY)?;
        return Ok(());
    };
    let mut terms = zotero_terms(&request.lowered());

    let placeholder = reply(ctx, request, ZOTERO_PLACEHOLDER)?;
    let items = library.items()?;
    if let (Some(ts), Some(channel)) = (placeholder, request.reply_to()) {
        ctx.chat.delete_message(channel, &ts)?;
    }

    if let Some(pos) = terms.iter().position(|t| t == "file") {
        terms.remove(pos);
        let [key] = terms.as_slice() else {
            reply(ctx, request, SINGLE_KEY_REPLY)?;
            return Ok(());
        };
        let Some(pdf) = find_pdf_attachment(&items, key) else {
            reply(ctx, request, NO_PDF_REPLY)?;
            return Ok(());
        };
        let filename = pdf
            .data
            .filename
            .as_deref()
            .and_then(|f| Path::new(f).file_name())
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}.pdf", pdf.key));
        let dest = ctx.config.renderings_dir().join(&filename);
        library.download(&pdf.key, &dest)?;
        if let Some(channel) = request.reply_to() {
            ctx.chat.upload_file(channel, &dest, &filename, "")?;
        }
        return Ok(());
    }

    let citations: Vec<String> = if terms.is_empty() {
        Vec::new()
    } else {
        items
            .iter()
            .filter(|item| item_matches(item, &terms))
            .filter_map(format_citation)
            .collect()
    };
    if citations.is_empty() {
        reply(ctx, request, NO_MATCH_REPLY)?;
    } else {
        reply(
            ctx,
            request,
            &format!(
                "Here are the publications matching your criteria:\n```{}```\nUse `@catbot zotero file <ZOTERO-ID>` if you want me to grab you the PDF!",
                citations.join("\n\n")
            ),
        )?;
    }
    Ok(())
}
