use std::sync::LazyLock;

use regex::Regex;

use crate::{
    format_table, reply, resolve_neurons, today, BotContext, HandlerRequest, NeuronField,
    NeuronRecord, Result, UNKNOWN_USER,
};

const USAGE_HINT: &str = "Not quite sure what you want me to do with the neurondb. Please use `@catbot help neurondb` to learn more.";

/// Any `field="..."` or `field=N` directive naming a record field.
static FIELD_DIRECTIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"\b(?:name|catmaid_name|alternative_names|type|neuropils|status|tags|comments)=(?:"[^"]*"|\d+)"#,
    )
    .expect("field directive regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Subcommand {
    List,
    Show,
    Search,
    Edit,
    Delete,
}

/// First subcommand keyword among the command's words.
fn parse_subcommand(lowered: &str) -> Option<Subcommand> {
    lowered.split_whitespace().find_map(|word| match word {
        "list" => Some(Subcommand::List),
        "show" => Some(Subcommand::Show),
        "search" => Some(Subcommand::Search),
        "edit" => Some(Subcommand::Edit),
        "delete" => Some(Subcommand::Delete),
        _ => None,
    })
}

pub(crate) fn strip_field_directives(command: &str) -> String {
    FIELD_DIRECTIVE_RE.replace_all(command, "").into_owned()
}

fn field_value(command: &str, field: NeuronField) -> Option<String> {
    let re = Regex::new(&format!(r#"\b{}="(.*?)""#, field.key())).ok()?;
    re.captures(command).map(|c| c[1].to_string())
}

fn field_index(command: &str, field: NeuronField) -> Option<usize> {
    let re = Regex::new(&format!(r"\b{}=(\d+)", field.key())).ok()?;
    re.captures(command).and_then(|c| c[1].parse().ok())
}

/// Apply every `field="value"` in `command`. Scalars are replaced; list
/// fields gain one entry per `;`-separated value, signed with `editor`.
pub(crate) fn apply_edits(record: &mut NeuronRecord, command: &str, editor: &str) {
    for field in NeuronField::ALL {
        let Some(value) = field_value(command, field) else {
            continue;
        };
        if let Some(list) = record.list_mut(field) {
            list.extend(
                value
                    .split(';')
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(|v| format!("{v} ({editor})")),
            );
        } else if let Some(scalar) = record.scalar_mut(field) {
            *scalar = value;
        }
    }
}

/// Remove list entries addressed as `field=N` (1-based); out-of-range
/// indices are ignored.
pub(crate) fn apply_deletions(record: &mut NeuronRecord, command: &str) {
    for field in NeuronField::ALL {
        let (Some(index), Some(list)) = (field_index(command, field), record.list_mut(field)) else {
            continue;
        };
        if (1..=list.len()).contains(&index) {
            list.remove(index - 1);
        }
    }
}

/// Words of a search command, minus the first `neurondb` and `search` keywords.
pub(crate) fn search_terms(lowered: &str) -> Vec<String> {
    let mut keywords = vec!["neurondb", "search"];
    lowered
        .split_whitespace()
        .filter(|word| match keywords.iter().position(|k| k == word) {
            Some(pos) => {
                keywords.remove(pos);
                false
            }
            None => true,
        })
        .map(str::to_string)
        .collect()
}

/// Two-column summary of one record.
pub(crate) fn record_summary(record: &NeuronRecord) -> String {
    let mut rows: Vec<Vec<String>> = Vec::new();
    let capitalised = |key: &str| -> String {
        let mut chars = key.chars();
        chars
            .next()
            .map(|c| c.to_uppercase().chain(chars).collect())
            .unwrap_or_default()
    };
    for field in NeuronField::ALL {
        let label = capitalised(field.key());
        match (record.scalar(field), record.list(field)) {
            (Some(value), _) => rows.push(vec![label, value.to_string()]),
            (_, Some(values)) if field == NeuronField::Comments => {
                if values.is_empty() {
                    rows.push(vec![label, String::new()]);
                } else {
                    for (i, comment) in values.iter().enumerate() {
                        let label = if i == 0 { label.clone() } else { String::new() };
                        rows.push(vec![label, comment.clone()]);
                    }
                }
            }
            (_, Some(values)) => rows.push(vec![label, values.join("; ")]),
            (None, None) => {}
        }
        if field == NeuronField::CatmaidName {
            rows.push(vec!["Skid".into(), record.skid.to_string()]);
        }
        if field == NeuronField::Tags {
            rows.push(vec!["Last_edited".into(), record.last_edited.to_string()]);
        }
    }
    format!("```{}```\n", format_table(None, &rows))
}

/// True when any term occurs in any field of the record.
pub(crate) fn record_matches(record: &NeuronRecord, terms: &[String]) -> bool {
    let mut haystack: Vec<String> = vec![record.skid.to_string()];
    for field in NeuronField::ALL {
        if let Some(value) = record.scalar(field) {
            haystack.push(value.to_lowercase());
        }
        if let Some(values) = record.list(field) {
            haystack.extend(values.iter().map(|v| v.to_lowercase()));
        }
    }
    terms
        .iter()
        .any(|term| haystack.iter().any(|field| field.contains(term.as_str())))
}

fn name_table(records: &[NeuronRecord]) -> String {
    let rows: Vec<Vec<String>> = records
        .iter()
        .map(|r| vec![r.name.clone(), r.skid.to_string()])
        .collect();
    format_table(Some(&["Name", "Skid"]), &rows)
}

fn all_records(ctx: &BotContext) -> Result<Vec<NeuronRecord>> {
    let mut records: Vec<NeuronRecord> = ctx
        .stores
        .neurondb
        .transact(|txn| txn.entries::<NeuronRecord>())?
        .into_iter()
        .map(|(_, record)| record)
        .collect();
    records.sort_by_key(|r| r.skid);
    Ok(records)
}

enum EditOutcome {
    Updated { name: String, created: bool },
    Unknown,
}

fn edit_record(ctx: &BotContext, request: &HandlerRequest, skid: u64) -> Result<EditOutcome> {
    let catmaid_name = ctx.catmaid.neuron_names(&[skid])?.remove(&skid);
    let editor = request
        .user
        .as_deref()
        .map(|user| ctx.users.name(user))
        .unwrap_or_else(|| UNKNOWN_USER.to_string());
    let key = skid.to_string();
    let date = today();

    ctx.stores.neurondb.transact(|txn| {
        let (mut record, created) = match (txn.get::<NeuronRecord>(&key)?, catmaid_name) {
            (Some(record), _) => (record, false),
            (None, Some(name)) => (NeuronRecord::new(skid, &name, date), true),
            (None, None) => return Ok(EditOutcome::Unknown),
        };
        apply_edits(&mut record, &request.command, &editor);
        record.last_edited = date;
        txn.put(&key, &record)?;
        Ok(EditOutcome::Updated {
            name: record.name,
            created,
        })
    })
}

fn delete_values(ctx: &BotContext, request: &HandlerRequest, skid: u64) -> Result<Option<String>> {
    let key = skid.to_string();
    ctx.stores.neurondb.transact(|txn| {
        let Some(mut record) = txn.get::<NeuronRecord>(&key)? else {
            return Ok(None);
        };
        apply_deletions(&mut record, &request.command);
        record.last_edited = today();
        txn.put(&key, &record)?;
        Ok(Some(record.name))
    })
}

pub(crate) fn run_neurondb(ctx: &BotContext, request: &HandlerRequest) -> Result<()> {
    let lowered = request.lowered();
    let Some(subcommand) = parse_subcommand(&lowered) else {
        reply(ctx, request, USAGE_HINT)?;
        return Ok(());
    };

    let response = match subcommand {
        Subcommand::List => format!(
            "I have these neurons in my database:\n```{}```",
            name_table(&all_records(ctx)?)
        ),
        Subcommand::Show => {
            let skids = resolve_neurons(ctx.catmaid.as_ref(), &request.command)?;
            if skids.is_empty() {
                "Sorry, I need at least a single #skid.".to_string()
            } else {
                let records = all_records(ctx)?;
                skids
                    .iter()
                    .map(|skid| match records.iter().find(|r| r.skid == *skid) {
                        Some(record) => record_summary(record),
                        None => format!("Sorry, I did not find skid #{skid} in my database!"),
                    })
                    .collect()
            }
        }
        Subcommand::Search => {
            let terms = search_terms(&lowered);
            let hits: Vec<NeuronRecord> = all_records(ctx)?
                .into_iter()
                .filter(|r| !terms.is_empty() && record_matches(r, &terms))
                .collect();
            if hits.is_empty() {
                "Sorry, could not find anything matching your query!".to_string()
            } else {
                format!("I found the following match(es):\n```{}```", name_table(&hits))
            }
        }
        Subcommand::Edit | Subcommand::Delete => {
            let references = strip_field_directives(&request.command);
            let skids: Vec<u64> = resolve_neurons(ctx.catmaid.as_ref(), &references)?
                .into_iter()
                .collect();
            let verb = if subcommand == Subcommand::Edit { "edit" } else { "delete" };
            match skids.as_slice() {
                [skid] if subcommand == Subcommand::Edit => {
                    match edit_record(ctx, request, *skid)? {
                        EditOutcome::Unknown => format!(
                            "Could not find neuron #{skid} in my database or in CATMAID!"
                        ),
                        EditOutcome::Updated { name, created } => {
                            if created {
                                reply(
                                    ctx,
                                    request,
                                    &format!(
                                        "Neuron #{skid} not in my database - created a new entry!"
                                    ),
                                )?;
                            }
                            format!("Updated entry for neuron {name} #{skid}!")
                        }
                    }
                }
                [skid] => match delete_values(ctx, request, *skid)? {
                    Some(name) => format!("Updated entry for neuron {name} #{skid}!"),
                    None => format!("Could not find neuron #{skid} in my database."),
                },
                _ => format!(
                    "Please give me a *single* skid: e.g. `@catbot neurondb {verb} #435678`"
                ),
            }
        }
    };
    reply(ctx, request, &response)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{test_context, FakeCatmaid, FakeChat};
    use chrono::NaiveDate;
    use std::sync::Arc;

    fn request(command: &str) -> HandlerRequest {
        HandlerRequest {
            worker_id: 4,
            command: command.into(),
            channel: Some("C1".into()),
            user: Some("U1".into()),
        }
    }

    fn record(skid: u64) -> NeuronRecord {
        NeuronRecord::new(skid, "PN glomerulus DA1", NaiveDate::from_ymd_opt(2024, 1, 2).unwrap())
    }

    fn stored(ctx: &BotContext, skid: u64) -> Option<NeuronRecord> {
        ctx.stores
            .neurondb
            .transact(|txn| txn.get(&skid.to_string()))
            .unwrap()
    }

    #[test]
    fn directives_are_stripped_before_resolution() {
        let stripped = strip_field_directives(r#"neurondb edit #16 name="DA1 PN" comments=2"#);
        assert_eq!(stripped.split_whitespace().collect::<Vec<_>>(), vec!["neurondb", "edit", "#16"]);
    }

    #[test]
    fn edits_replace_scalars_and_sign_list_entries() {
        let mut r = record(16);
        apply_edits(
            &mut r,
            r#"edit #16 name="DA1 PN" comments="nice;complete" catmaid_name="x""#,
            "alice",
        );
        assert_eq!(r.name, "DA1 PN");
        assert_eq!(r.catmaid_name, "x");
        assert_eq!(r.comments, vec!["nice (alice)".to_string(), "complete (alice)".to_string()]);
        assert!(r.alternative_names.is_empty());
    }

    #[test]
    fn deletions_are_one_based() {
        let mut r = record(16);
        r.comments = vec!["a".into(), "b".into(), "c".into()];
        apply_deletions(&mut r, "delete #16 comments=2 tags=5");
        assert_eq!(r.comments, vec!["a".to_string(), "c".to_string()]);
    }

    #[test]
    fn search_hits_any_field() {
        let mut r = record(16);
        r.neuropils = vec!["LH (bob)".into()];
        assert!(record_matches(&r, &["lh".to_string()]));
        assert!(record_matches(&r, &["nothing".to_string(), "da1".to_string()]));
        assert!(!record_matches(&r, &["mb".to_string()]));
    }

    #[test]
    fn summary_lists_comments_one_per_row() {
        let mut r = record(16);
        r.comments = vec!["first".into(), "second".into()];
        let summary = record_summary(&r);
        assert!(summary.contains("Catmaid_name"));
        let edited = summary.lines().find(|l| l.starts_with("Last_edited")).unwrap();
        assert!(edited.ends_with("2024-01-02"));
        let comment_rows: Vec<&str> = summary
            .lines()
            .filter(|l| l.contains("first") || l.contains("second"))
            .collect();
        assert!(comment_rows[0].starts_with("Comments"));
        assert!(comment_rows[1].trim_start().starts_with("second"));
    }

    #[test]
    fn summary_without_comments_keeps_an_empty_row() {
        let summary = record_summary(&record(16));
        let comments = summary.lines().find(|l| l.starts_with("Comments")).unwrap();
        assert_eq!(comments.trim_end(), "Comments");
    }

    #[test]
    fn search_terms_keep_words_containing_keywords() {
        assert_eq!(
            search_terms("neurondb search research lh"),
            vec!["research".to_string(), "lh".to_string()]
        );
        assert_eq!(search_terms("neurondb search search"), vec!["search".to_string()]);
    }

    #[test]
    fn edit_creates_entry_for_known_neuron() {
        let chat = Arc::new(FakeChat::default().with_user("U1", "alice"));
        let catmaid = FakeCatmaid::new().with_neuron(16, "PN glomerulus DA1");
        let ctx = test_context("neurondb_create", chat.clone(), catmaid);
        run_neurondb(&ctx, &request(r#"neurondb edit #16 name="DA1 PN" tags="olfactory""#)).unwrap();

        assert_eq!(
            chat.texts(),
            vec![
                "Neuron #16 not in my database - created a new entry!".to_string(),
                "Updated entry for neuron DA1 PN #16!".to_string(),
            ]
        );
        let saved = stored(&ctx, 16).unwrap();
        assert_eq!(saved.catmaid_name, "PN glomerulus DA1");
        assert_eq!(saved.tags, vec!["olfactory (alice)".to_string()]);
        assert_eq!(saved.last_edited, today());
    }

    #[test]
    fn edit_of_unknown_neuron_writes_nothing() {
        let chat = Arc::new(FakeChat::default());
        let ctx = test_context("neurondb_unknown", chat.clone(), FakeCatmaid::new());
        run_neurondb(&ctx, &request(r#"neurondb edit #99 name="ghost""#)).unwrap();
        assert_eq!(
            chat.texts(),
            vec!["Could not find neuron #99 in my database or in CATMAID!".to_string()]
        );
        assert!(stored(&ctx, 99).is_none());
    }

    #[test]
    fn edit_needs_single_skid() {
        let chat = Arc::new(FakeChat::default());
        let ctx = test_context("neurondb_single", chat.clone(), FakeCatmaid::new());
        run_neurondb(&ctx, &request("neurondb edit #1 #2")).unwrap();
        assert!(chat.texts()[0].starts_with("Please give me a *single* skid"));
    }

    #[test]
    fn list_show_search_and_delete() {
        let chat = Arc::new(FakeChat::default());
        let ctx = test_context("neurondb_flow", chat.clone(), FakeCatmaid::new());
        let mut r = record(16);
        r.name = "DA1 PN".into();
        r.comments = vec!["one".into(), "two".into()];
        ctx.stores
            .neurondb
            .transact(|txn| txn.put("16", &r))
            .unwrap();

        run_neurondb(&ctx, &request("neurondb list")).unwrap();
        run_neurondb(&ctx, &request("neurondb show #16 #17")).unwrap();
        run_neurondb(&ctx, &request("neurondb search da1")).unwrap();
        run_neurondb(&ctx, &request("neurondb search kenyon")).unwrap();
        run_neurondb(&ctx, &request("neurondb delete #16 comments=1")).unwrap();
        run_neurondb(&ctx, &request("neurondb delete #17 comments=1")).unwrap();
        run_neurondb(&ctx, &request("neurondb frobnicate")).unwrap();

        let texts = chat.texts();
        assert!(texts[0].starts_with("I have these neurons in my database:"));
        assert!(texts[0].contains("DA1 PN"));
        assert!(texts[1].contains("Comments"));
        assert!(texts[1].ends_with("Sorry, I did not find skid #17 in my database!"));
        assert!(texts[2].starts_with("I found the following match(es):"));
        assert_eq!(texts[3], "Sorry, could not find anything matching your query!");
        assert_eq!(texts[4], "Updated entry for neuron DA1 PN #16!");
        assert_eq!(texts[5], "Could not find neuron #17 in my database.");
        assert_eq!(texts[6], USAGE_HINT);
        assert_eq!(stored(&ctx, 16).unwrap().comments, vec!["two".to_string()]);
    }
}
