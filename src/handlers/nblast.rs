//! Similarity search. The search scripts run in their own process and post
//! their results to the channel themselves; the bot only validates the request
//! and tracks the child until it exits.

use std::process::{Child, Stdio};
use std::sync::LazyLock;

use regex::Regex;
use tracing::info;

use crate::{bool_flag, build_external_command, BotContext, BotError, NblastSection, Result};

pub(crate) const NBLAST_SINGLE_NEURON_REPLY: &str =
    "I need a *single* neuron to nblast! E.g. `@catbot nblast #123456`";

const DEFAULT_HITS: u32 = 3;
const DEFAULT_CORES: u32 = 8;

static HITS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"hits=(\d+)").expect("hits regex"));
static CORES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"cores=(\d+)").expect("cores regex"));

fn captured_number(re: &Regex, text: &str, default: u32) -> u32 {
    re.captures(text)
        .and_then(|c| c[1].parse().ok())
        .unwrap_or(default)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NblastDatabase {
    FlyCircuit,
    JaneliaGmr,
    Fafb,
}

impl NblastDatabase {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Self::FlyCircuit => "fc",
            Self::JaneliaGmr => "gmr",
            Self::Fafb => "fafb",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct NblastOptions {
    pub(crate) database: NblastDatabase,
    pub(crate) mirror: bool,
    pub(crate) hits: u32,
    pub(crate) cores: u32,
    pub(crate) prefer_mu: bool,
    pub(crate) use_alpha: bool,
    /// Only meaningful for FAFB searches.
    pub(crate) autoseg: bool,
}

impl NblastOptions {
    pub(crate) fn parse(command: &str) -> Self {
        let lowered = command.to_lowercase();
        let database = if lowered.contains("fafb") {
            NblastDatabase::Fafb
        } else if lowered.contains("gmrdb") {
            NblastDatabase::JaneliaGmr
        } else {
            NblastDatabase::FlyCircuit
        };
        // FAFB neurons mirror on request; the light-level databases by default.
        let mirror = match database {
            NblastDatabase::Fafb => lowered.contains("mirror") && !lowered.contains("nomirror"),
            _ => !lowered.contains("nomirror"),
        };
        Self {
            database,
            mirror,
            hits: captured_number(&HITS_RE, &lowered, DEFAULT_HITS),
            cores: captured_number(&CORES_RE, &lowered, DEFAULT_CORES),
            prefer_mu: lowered.contains("prefermu"),
            use_alpha: lowered.contains("alpha"),
            autoseg: lowered.contains("autoseg"),
        }
    }
}

/// Full argv: interpreter words, script, then the positional contract.
///
/// Light-level searches take `skid channel mirror hits db cores prefermu alpha`.
/// The FAFB script has no database slot and takes
/// `skid channel mirror hits cores prefermu alpha autoseg`.
pub(crate) fn nblast_argv(
    section: &NblastSection,
    skid: u64,
    channel: &str,
    options: &NblastOptions,
) -> Result<Vec<String>> {
    let mut argv = shlex::split(&section.interpreter)
        .filter(|parts| !parts.is_empty())
        .ok_or_else(|| {
            BotError::Config(format!("Invalid nblast.interpreter: {:?}", section.interpreter))
        })?;
    let script = match options.database {
        NblastDatabase::Fafb => &section.fafb_script,
        _ => &section.script,
    };
    argv.push(script.display().to_string());
    argv.extend([
        skid.to_string(),
        channel.to_string(),
        bool_flag(options.mirror),
        options.hits.to_string(),
    ]);
    if options.database != NblastDatabase::Fafb {
        argv.push(options.database.as_str().to_string());
    }
    argv.extend([
        options.cores.to_string(),
        bool_flag(options.prefer_mu),
        bool_flag(options.use_alpha),
    ]);
    if options.database == NblastDatabase::Fafb {
        argv.push(bool_flag(options.autoseg));
    }
    Ok(argv)
}

/// Start the search script. Returns the child and the argv it was given.
pub(crate) fn spawn_nblast(
    ctx: &BotContext,
    skid: u64,
    channel: &str,
    options: &NblastOptions,
) -> Result<(Child, Vec<String>)> {
    let section = &ctx.config.nblast;
    let argv = nblast_argv(section, skid, channel, options)?;
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| BotError::Config("empty nblast command".into()))?;

    let mut cmd = build_external_command(program, args);
    cmd.stdin(Stdio::null())
        .env("CATBOT_CONFIG", &ctx.config_path);
    let databases = [
        ("CATBOT_FLYCIRCUIT_DB", &section.flycircuit_db),
        ("CATBOT_JANELIA_GMR_DB", &section.janelia_gmr_db),
        ("CATBOT_FAFB_DUMP", &section.fafb_dump),
    ];
    for (name, value) in databases {
        if let Some(value) = value {
            cmd.env(name, value);
        }
    }

    let child = cmd.spawn().map_err(|source| BotError::Spawn {
        program: program.clone(),
        source,
    })?;
    info!(skid, pid = child.id(), database = options.database.as_str(), "nblast started");
    Ok((child, argv))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn section() -> NblastSection {
        NblastSection {
            interpreter: "python3 -u".into(),
            script: PathBuf::from("ffnblast.py"),
            fafb_script: PathBuf::from("ffnblast_fafb.py"),
            ..NblastSection::default()
        }
    }

    #[test]
    fn defaults_for_flycircuit() {
        let options = NblastOptions::parse("nblast #123");
        assert_eq!(options.database, NblastDatabase::FlyCircuit);
        assert!(options.mirror);
        assert_eq!((options.hits, options.cores), (3, 8));
        assert!(!options.prefer_mu && !options.use_alpha && !options.autoseg);
    }

    #[test]
    fn flags_are_recognised() {
        let options = NblastOptions::parse("nblast #123 gmrdb nomirror hits=10 cores=2 prefermu usealpha");
        assert_eq!(options.database, NblastDatabase::JaneliaGmr);
        assert!(!options.mirror);
        assert_eq!((options.hits, options.cores), (10, 2));
        assert!(options.prefer_mu && options.use_alpha);
    }

    #[test]
    fn fafb_mirrors_only_on_request() {
        assert!(!NblastOptions::parse("nblast-fafb #1").mirror);
        assert!(NblastOptions::parse("nblast-fafb #1 mirror").mirror);
        assert!(!NblastOptions::parse("nblast-fafb #1 nomirror").mirror);
    }

    #[test]
    fn argv_follows_positional_contract() {
        let options = NblastOptions::parse("nblast #123 hits=5 cores=4");
        let argv = nblast_argv(&section(), 123, "C42", &options).unwrap();
        assert_eq!(
            argv,
            vec!["python3", "-u", "ffnblast.py", "123", "C42", "1", "5", "fc", "4", "0", "0"]
        );
    }

    #[test]
    fn fafb_argv_has_no_database_slot() {
        let options = NblastOptions::parse("nblast-fafb #77 autoseg");
        let argv = nblast_argv(&section(), 77, "C1", &options).unwrap();
        assert_eq!(&argv[2..], &["ffnblast_fafb.py", "77", "C1", "0", "3", "8", "0", "0", "1"]);

        let options = NblastOptions::parse("nblast-fafb #77 cores=4");
        let argv = nblast_argv(&section(), 77, "C1", &options).unwrap();
        let script_args = &argv[3..];
        assert_eq!(script_args[4], "4");
        assert!(script_args.iter().all(|arg| arg.parse::<u64>().is_ok() || arg == "C1"));
        assert_eq!(script_args[7], "0");
    }

    #[test]
    fn invalid_interpreter_is_a_config_error() {
        let bad = NblastSection {
            interpreter: "python3 'unterminated".into(),
            ..section()
        };
        let options = NblastOptions::parse("nblast #1");
        assert!(matches!(nblast_argv(&bad, 1, "C", &options), Err(BotError::Config(_))));
    }
}
