use tracing::warn;

use crate::{
    first_missing_neuron, missing_neuron_reply, no_neurons_reply, parse_volume_colors, reply,
    render_svg, resolve_neurons, write_svg, BotContext, HandlerRequest, Result, VolumeInfo,
    VolumeLayer, DEFAULT_VOLUME_COLOR,
};

const PLOT_PLACEHOLDER: &str = "Got it! Generating plot - please wait...";
const PLOT_FAILED_REPLY: &str = "Oops - something went wrong while trying to plot your neuron(s).";

/// The configured default volume plus every volume named in the command.
pub(crate) fn select_volumes<'a>(
    available: &'a [VolumeInfo],
    default_volume: &str,
    command: &str,
) -> Vec<&'a VolumeInfo> {
    let lowered = command.to_lowercase();
    let colored = parse_volume_colors(command);
    let words: Vec<&str> = lowered
        .split_whitespace()
        .map(|word| word.trim_matches(|c: char| matches!(c, ',' | ';' | '"' | '\'')))
        .collect();
    available
        .iter()
        .filter(|v| {
            let name = v.name.to_lowercase();
            name == default_volume.to_lowercase()
                || colored.contains_key(&name)
                || words.contains(&name.as_str())
        })
        .collect()
}

pub(crate) fn run_plot(ctx: &BotContext, request: &HandlerRequest) -> Result<()> {
    let skids: Vec<u64> = resolve_neurons(ctx.catmaid.as_ref(), &request.command)?
        .into_iter()
        .collect();
    if skids.is_empty() {
        reply(ctx, request, &no_neurons_reply("plot"))?;
        return Ok(());
    }
    if let Some(missing) = first_missing_neuron(ctx.catmaid.as_ref(), &skids)? {
        reply(ctx, request, &missing_neuron_reply(missing))?;
        return Ok(());
    }
    let Some(channel) = request.reply_to() else {
        return Ok(());
    };

    let placeholder = ctx.chat.post_message(channel, PLOT_PLACEHOLDER, &[])?;

    let available = ctx.catmaid.volumes()?;
    let colors = parse_volume_colors(&request.command);
    let rendered = select_volumes(&available, &ctx.config.plot.default_volume, &request.command)
        .into_iter()
        .map(|info| {
            Ok(VolumeLayer {
                name: info.name.clone(),
                mesh: ctx.catmaid.volume_mesh(info.id)?,
                color: colors
                    .get(&info.name.to_lowercase())
                    .copied()
                    .unwrap_or(DEFAULT_VOLUME_COLOR),
            })
        })
        .collect::<Result<Vec<_>>>()
        .and_then(|layers| {
            let skeletons = ctx.catmaid.skeletons(&skids)?;
            render_svg(&skeletons, &layers)
        });

    let svg = match rendered {
        Ok(svg) => svg,
        Err(err) => {
            warn!(worker = request.worker_id, error = %err, "plot failed");
            ctx.chat.delete_message(channel, &placeholder)?;
            ctx.chat.post_message(channel, PLOT_FAILED_REPLY, &[])?;
            return Ok(());
        }
    };

    let path = ctx
        .config
        .renderings_dir()
        .join(format!("neuron_plot_{}.svg", request.worker_id));
    write_svg(&path, &svg)?;
    ctx.chat.delete_message(channel, &placeholder)?;

    let comment = skids
        .iter()
        .map(|skid| format!("#{skid}"))
        .collect::<Vec<_>>()
        .join(" ");
    let uploaded = ctx
        .chat
        .upload_file(channel, &path, "Neuron plot", &format!("Neurons {comment}"));
    if let Err(err) = std::fs::remove_file(&path) {
        warn!(path = %path.display(), error = %err, "could not remove rendering");
    }
    uploaded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{test_context, FakeCatmaid, FakeChat};
    use std::sync::Arc;

    fn request(command: &str) -> HandlerRequest {
        HandlerRequest {
            worker_id: 11,
            command: command.into(),
            channel: Some("C1".into()),
            user: Some("U1".into()),
        }
    }

    fn volume(id: u64, name: &str) -> VolumeInfo {
        VolumeInfo {
            id,
            name: name.into(),
        }
    }

    #[test]
    fn default_volume_is_always_selected() {
        let available = vec![volume(1, "v14.neuropil"), volume(2, "LH_R"), volume(3, "MB_CA_R")];
        let picked = select_volumes(&available, "v14.neuropil", "plot #16 lh_r=(1,0,0)");
        let names: Vec<&str> = picked.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["v14.neuropil", "LH_R"]);
    }

    #[test]
    fn uploads_svg_with_comment() {
        let chat = Arc::new(FakeChat::default());
        let catmaid = FakeCatmaid::new()
            .with_neuron(16, "DA1 PN")
            .with_neuron(17, "DA1 PN l")
            .with_volume(1, "v14.neuropil")
            .with_volume(2, "LH_R");
        let ctx = test_context("plot_ok", chat.clone(), catmaid);
        run_plot(&ctx, &request("plot #16 #17 LH_R")).unwrap();

        assert_eq!(chat.texts(), vec![PLOT_PLACEHOLDER.to_string()]);
        assert_eq!(chat.deleted(), vec![("C1".to_string(), "1.000100".to_string())]);
        let uploads = chat.uploads();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].title, "Neuron plot");
        assert_eq!(uploads[0].comment, "Neurons #16 #17");
        assert!(uploads[0].path.ends_with("neuron_plot_11.svg"));
        let svg = String::from_utf8(uploads[0].content.clone()).unwrap();
        assert!(svg.contains("LH_R"));
        assert!(!uploads[0].path.exists());
    }

    #[test]
    fn volume_names_match_whole_words_only() {
        let available = vec![
            volume(1, "v14.neuropil"),
            volume(2, "lo"),
            volume(3, "16"),
            volume(4, "AL_R"),
            volume(5, "MB_CA_R"),
        ];
        let picked = select_volumes(&available, "v14.neuropil", "plot #16 AL_R, mb_ca_r=(0,1,0)");
        let names: Vec<&str> = picked.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["v14.neuropil", "AL_R", "MB_CA_R"]);
    }

    #[test]
    fn render_failure_apologises() {
        let chat = Arc::new(FakeChat::default());
        let catmaid = FakeCatmaid::new().with_neuron(16, "DA1 PN").failing_skeletons();
        let ctx = test_context("plot_fail", chat.clone(), catmaid);
        run_plot(&ctx, &request("plot #16")).unwrap();

        assert_eq!(
            chat.texts(),
            vec![PLOT_PLACEHOLDER.to_string(), PLOT_FAILED_REPLY.to_string()]
        );
        assert_eq!(chat.deleted().len(), 1);
        assert!(chat.uploads().is_empty());
    }

    #[test]
    fn missing_neuron_skips_placeholder() {
        let chat = Arc::new(FakeChat::default());
        let ctx = test_context("plot_missing", chat.clone(), FakeCatmaid::new());
        run_plot(&ctx, &request("plot #9")).unwrap();
        assert_eq!(chat.texts(), vec![missing_neuron_reply(9)]);
    }
}
