use crate::{reply, BotContext, HandlerRequest, Result};

const GENERAL_HELP: &[&str] = &[
    "`neurondb` : accesses the neuron database. Use `@catbot help neurondb` to learn more.",
    "`subscription` : accesses the subscription system. Use `@catbot help subscription` to learn more.",
    "`review-status <neurons>` : give me a list of neurons and I will tell you their review status.",
    "`plot <neurons>` : give me a list of neurons to plot. Use `@catbot help plot` to learn about how to show neuropils.",
    "`url <neurons>` : give me a list of neurons and I will generate urls to their root nodes.",
    "`nblast <neuron>` : give me a *single* neuron and let me run an nblast search. Use `@catbot help nblast` to learn more.",
    "`nblast-fafb <neuron>` : `nblast` against a nightly dump of (simplified) CATMAID neurons. Use `@catbot help nblast-fafb` to learn more.",
    "`zotero TAG1 TAG2 TAG3` : give me tags and I will search our Zotero group for you",
    "`zotero file ZOTERO-ID` : give me a Zotero ID and I will download the PDF for you",
    "`partners <neurons>` : returns synaptic partners. Use `@catbot help partners` to learn more.",
    "`happy hour` : tells you how long until Friday's happy hour.",
    "`help` : You have just used that, dummy...",
];

const PARTNERS_HELP: &str = "`partners` returns the synaptic partners for a list of <neurons>. You can pass me keywords to filter the list:
1. Add `incoming` or `outgoing` to limit results to up- or downstream partners
2. Add `filter=\"tag1,tag2\"` to filter results for neuron names (case-insensitive, non-intersecting)
3. Add `threshold=3` to filter partners for a minimum number of synapses";

const NBLAST_FAFB_HELP: &str = "`nblast-fafb` blasts the provided neuron against the nightly dump of FAFB neurons. Use combinations of the following optional arguments to refine:
1. Use `nblast-fafb <neuron> mirror` to mirror neuron before nblasting (if you are looking for the left version of your neuron).
2. Use `nblast-fafb <neuron> hits=N` to return the top N hits in the 3D plot. Default is 3
3. Use `nblast-fafb <neuron> cores=N` to set the number of CPU cores used to nblast. Default is 8
4. Use `nblast-fafb <neuron> prefermu` to sort hits by reverse score (muscore) rather than forward score
5. Use `nblast-fafb <neuron> usealpha` to make nblast value backbones higher than smaller neurites
6. Use `nblast-fafb <neuron> autoseg` if your neuron lives in the autoseg instance";

const NBLAST_HELP: &str = "`nblast` blasts the provided neuron against the flycircuit database. Use combinations of the following optional arguments to refine:
1. Use `nblast <neuron> nomirror` to prevent mirroring of neurons before nblasting (i.e. if cellbody is already on the flys left).
2. Use `nblast <neuron> hits=N` to return the top N hits in the 3D plot. Default is 3
3. Use `nblast <neuron> gmrdb` to nblast against Janelia GMR lines
4. Use `nblast <neuron> cores=N` to set the number of CPU cores used to nblast. Default is 8
5. Use `nblast <neuron> prefermu` to sort hits by reverse score (muscore) rather than forward score
6. Use `nblast <neuron> usealpha` to make nblast value backbones higher than smaller neurites";

const NEURONDB_HELP: &str = "`neurondb` lets you access and edit the neuron database.
I am using skeleton IDs as unique identifiers -> you can search for names/annotations/etc but I need a SKID when you want to add/edit an entry!
1. Use `neurondb list` to get a list of all neurons in the database.
2. Use `neurondb search <tag1> <tag2> ...` to search for hits in the database.
3. Use `neurondb show <neurons>` to show a summary for those skeleton ids.
4. Use `neurondb edit <single neuron> name=\"MVP2\" comments=\"awesome neuron\"` to edit entries.
   For list entries such as <comments> or <neuropils> you can use `comments=\"comment1;comment2\"` to add multiple entries at a time.
5. To delete specific comments/tags use e.g. `neurondb delete #skid comments=<index>` to remove the <index> (e.g. 1 = first) comment.";

const SUBSCRIPTION_HELP: &str = "`subscription` lets you flag neurons of interest and I will keep you informed when they are modified.
By default you will automatically receive daily updates but you can use `update` at any time to get an unscheduled summary.
1. Use `subscription list` to get a list of all neurons you are currently subscribed to.
2. Use `subscription new <neuron(s)>` to subscribe to neurons.
3. Use `subscription update` to get an unscheduled summary of changes. Unless you also provide <neurons>, you will get all subscriptions.
4. Use `subscription delete <neuron(s)>` to unsubscribe from neurons.
5. Use `subscription auto` to switch daily updates on or off.";

const PLOT_HELP: &str = "`plot` lets you plot neurons of interest.
1. Use `plot <neuron(s)> neuropil1 neuropil2` to make me plot neuropils.
2. Use `plot <neuron(s)> neuropil1=(r,g,b) neuropil2=(r,g,b)` to give neuropils specific colors (`r`,`g`,`b` must be range 0-1).";

/// Topic help; `nblast-fafb` is checked before `nblast` since it contains it.
pub(crate) fn help_text(command: &str) -> String {
    let lowered = command.to_lowercase();
    let topics: [(&str, &str); 6] = [
        ("partners", PARTNERS_HELP),
        ("nblast-fafb", NBLAST_FAFB_HELP),
        ("nblast", NBLAST_HELP),
        ("neurondb", NEURONDB_HELP),
        ("subscription", SUBSCRIPTION_HELP),
        ("plot", PLOT_HELP),
    ];
    if let Some((_, text)) = topics.iter().find(|(topic, _)| lowered.contains(topic)) {
        return text.to_string();
    }

    let mut text = String::from("Currently I can help you with the following commands:");
    for line in GENERAL_HELP {
        text.push('\n');
        text.push_str(line);
    }
    text.push_str("\nYou can pass me `<neurons>` either via their skids `#451234`, annotation `annotation=\"DA1\"` or name `name=\"DA1 PN\"`");
    text
}

pub(crate) fn run_help(ctx: &BotContext, request: &HandlerRequest) -> Result<()> {
    reply(ctx, request, &help_text(&request.command))?;
    Ok(())
}
