//! `arbor`: drive recursive decomposition and search sessions from the shell.
//!
//! Sessions live under `.arbor/sessions/` in the project root and are advanced
//! one iteration per `arbor step`, or until they finish with `arbor loop`.
//! Collaborator decisions come from the command configured in `arbor.toml`.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};

use arbor::core::snapshot::{Mode, Snapshot, Structure};
use arbor::core::types::{RunOutcome, ScoringMode, SearchType, SiblingLookup};
use arbor::exit_codes;
use arbor::io::command::CommandCollaborator;
use arbor::io::config::{ArborConfig, config_path, load_config, write_config};
use arbor::io::session_store::FileSnapshotStore;
use arbor::logging;
use arbor::looping::{DriveOptions, LoopStop, run_loop, step_session};
use arbor::session::SnapshotStore;
use arbor::start::{StartRequest, start_session};
use arbor::step::StepOutcome;

#[derive(Parser)]
#[command(
    name = "arbor",
    version,
    about = "Step-driven recursive task decomposition and search"
)]
struct Cli {
    /// Project root holding `arbor.toml` and `.arbor/`.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default `arbor.toml`.
    Init {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
    /// Seed a session with a root task (no-op if it already exists).
    Start {
        #[arg(short, long)]
        session: String,
        #[command(flatten)]
        overrides: RunOverrides,
        /// Root task text.
        task: String,
    },
    /// Run one iteration.
    Step {
        #[arg(short, long)]
        session: String,
    },
    /// Run iterations until the session finishes.
    Loop {
        #[arg(short, long)]
        session: String,
        /// Stop after this many iterations in this invocation.
        #[arg(long)]
        max_iterations: Option<u32>,
    },
    /// Print a session summary and, once solved, the answer path.
    Show {
        #[arg(short, long)]
        session: String,
        /// Print the raw snapshot JSON instead.
        #[arg(long)]
        json: bool,
    },
    /// Check config and snapshot invariants.
    Validate {
        /// Only this session (default: all sessions).
        #[arg(short, long)]
        session: Option<String>,
    },
}

/// `[run]` values that can be overridden when a session starts.
#[derive(clap::Args, Debug)]
struct RunOverrides {
    #[arg(long, value_enum)]
    mode: Option<Mode>,
    #[arg(long, value_enum)]
    search_type: Option<SearchType>,
    #[arg(long, value_enum)]
    scoring: Option<ScoringMode>,
    #[arg(long)]
    max_depth: Option<u32>,
    #[arg(long)]
    max_steps: Option<u32>,
    #[arg(long)]
    beam_width: Option<usize>,
    /// Use the parent's ordered child list to find the next DnC sibling.
    #[arg(long)]
    ordered_siblings: bool,
}

impl RunOverrides {
    fn apply(&self, cfg: &mut ArborConfig) {
        if let Some(mode) = self.mode {
            cfg.run.mode = mode;
        }
        let params = &mut cfg.run.params;
        if let Some(search_type) = self.search_type {
            params.search_type = search_type;
        }
        if let Some(scoring) = self.scoring {
            params.scoring = scoring;
        }
        if let Some(max_depth) = self.max_depth {
            params.max_depth = max_depth;
        }
        if let Some(max_steps) = self.max_steps {
            params.max_steps = max_steps;
        }
        if let Some(beam_width) = self.beam_width {
            params.beam_width = beam_width;
        }
        if self.ordered_siblings {
            params.sibling_lookup = SiblingLookup::Ordered;
        }
    }
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let root = cli.root.as_path();
    match cli.command {
        Command::Init { force } => cmd_init(root, force),
        Command::Start {
            session,
            overrides,
            task,
        } => cmd_start(root, &session, &overrides, &task),
        Command::Step { session } => cmd_step(root, &session),
        Command::Loop {
            session,
            max_iterations,
        } => cmd_loop(root, &session, max_iterations),
        Command::Show { session, json } => cmd_show(root, &session, json),
        Command::Validate { session } => cmd_validate(root, session.as_deref()),
    }
}

fn cmd_init(root: &Path, force: bool) -> Result<i32> {
    let path = config_path(root);
    if path.exists() && !force {
        println!("{} already exists", path.display());
        return Ok(exit_codes::OK);
    }
    write_config(&path, &ArborConfig::default())?;
    println!("wrote {}", path.display());
    Ok(exit_codes::OK)
}

fn cmd_start(root: &Path, session: &str, overrides: &RunOverrides, task: &str) -> Result<i32> {
    let mut cfg = load_config(&config_path(root))?;
    overrides.apply(&mut cfg);
    let store = FileSnapshotStore::new(root);
    let outcome = start_session(
        &store,
        &StartRequest {
            session_id: session,
            root_task: task,
            mode: cfg.run.mode,
            params: cfg.run.params,
        },
    )?;
    if outcome.resumed {
        println!(
            "session {} already exists ({}, {} steps)",
            outcome.session_id, outcome.structure, outcome.steps_taken
        );
    } else {
        println!("started session {} ({})", outcome.session_id, outcome.structure);
    }
    Ok(exit_codes::OK)
}

fn collaborator(root: &Path) -> Result<CommandCollaborator> {
    let cfg = load_config(&config_path(root))?;
    CommandCollaborator::from_config(root, &cfg.collaborator)
}

fn cmd_step(root: &Path, session: &str) -> Result<i32> {
    let store = FileSnapshotStore::new(root);
    let collab = collaborator(root)?;
    let outcome = step_session(&store, &collab, session, DriveOptions { log_root: Some(root) })?;
    print_step(&outcome);
    Ok(step_exit_code(&outcome))
}

fn cmd_loop(root: &Path, session: &str, max_iterations: Option<u32>) -> Result<i32> {
    let store = FileSnapshotStore::new(root);
    let collab = collaborator(root)?;
    let outcome = run_loop(
        &store,
        &collab,
        session,
        max_iterations,
        DriveOptions { log_root: Some(root) },
        print_step,
    )?;
    println!("steps executed: {}", outcome.steps_executed);
    Ok(match outcome.stop {
        LoopStop::Finished(result) => {
            println!("finished: {}", result.label());
            exit_codes::for_outcome(&result)
        }
        LoopStop::MaxIterations { max_iterations } => {
            println!("stopped after {} iterations", max_iterations);
            exit_codes::OK
        }
        LoopStop::InvalidGeneration { message } => {
            eprintln!("{message}");
            exit_codes::INVALID
        }
    })
}

fn cmd_show(root: &Path, session: &str, json: bool) -> Result<i32> {
    let snapshot = load_session(&FileSnapshotStore::new(root), session)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        print!("{}", describe(&snapshot));
    }
    Ok(exit_codes::OK)
}

fn cmd_validate(root: &Path, session: Option<&str>) -> Result<i32> {
    load_config(&config_path(root))?;
    let store = FileSnapshotStore::new(root);
    let sessions = match session {
        Some(id) => vec![id.to_string()],
        None => store.list()?,
    };
    let mut failures = 0usize;
    for id in &sessions {
        let problems = match store.get(id) {
            Ok(Some(snapshot)) => snapshot.validate(),
            Ok(None) => vec!["session does not exist".to_string()],
            Err(err) => vec![format!("{err:#}")],
        };
        if problems.is_empty() {
            println!("{id}: ok");
        } else {
            failures += 1;
            println!("{id}:\n- {}", problems.join("\n- "));
        }
    }
    if failures > 0 {
        bail!("{failures} of {} session(s) failed validation", sessions.len());
    }
    Ok(exit_codes::OK)
}

fn load_session<S: SnapshotStore>(store: &S, session: &str) -> Result<Snapshot> {
    store
        .get(session)
        .with_context(|| format!("load session {session}"))?
        .ok_or_else(|| anyhow!("session '{session}' does not exist (run `arbor start` first)"))
}

fn step_exit_code(outcome: &StepOutcome) -> i32 {
    match (outcome.exit, &outcome.snapshot.outcome) {
        (true, Some(result)) => exit_codes::for_outcome(result),
        _ => exit_codes::OK,
    }
}

fn print_step(outcome: &StepOutcome) {
    let report = &outcome.report;
    let mut line = format!("iteration {} ({})", report.iteration, report.structure);
    if let Some(focus) = report.focus {
        let _ = write!(line, " focus={focus}");
    }
    if !report.created.is_empty() {
        let _ = write!(line, " created={:?}", report.created);
    }
    if let Some(result) = &report.outcome {
        let _ = write!(line, " -> {}", result.label());
    }
    println!("{line}");
}

/// Human-readable snapshot summary.
fn describe(snapshot: &Snapshot) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "session:   {}", snapshot.session_id);
    let _ = writeln!(out, "structure: {}", snapshot.structure.name());
    let _ = writeln!(
        out,
        "steps:     {}/{}",
        snapshot.steps_taken, snapshot.params.max_steps
    );
    match &snapshot.structure {
        Structure::Dnc { tree } => {
            let _ = writeln!(out, "nodes:     {}", tree.len());
            let _ = writeln!(out, "cursor:    {} ({})", tree.cursor(), tree.current().task);
        }
        Structure::Search { tree, depth } => {
            let live = tree.iter().filter(|node| node.is_live()).count();
            let _ = writeln!(out, "nodes:     {} ({} live)", tree.len(), live);
            let _ = writeln!(out, "depth:     {}/{}", depth, snapshot.params.max_depth);
        }
        Structure::Graph { graph } => {
            let _ = writeln!(out, "nodes:     {}", graph.len());
            let _ = writeln!(out, "phase:     {} ({:?})", graph.phase(), graph.phase_label());
            let _ = writeln!(out, "leaves:    {:?}", graph.leaves());
        }
    }
    match &snapshot.outcome {
        None => {
            let _ = writeln!(out, "outcome:   running");
        }
        Some(RunOutcome::Failed { node_id }) => {
            let _ = writeln!(out, "outcome:   failed at node {node_id}");
        }
        Some(result) => {
            let _ = writeln!(out, "outcome:   {}", result.label());
        }
    }
    if let Some(answer) = snapshot.answer() {
        let _ = writeln!(out, "answer:");
        for (i, task) in answer.iter().enumerate() {
            let _ = writeln!(out, "  {}. {}", i + 1, task);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor::core::snapshot::RunParams;

    #[test]
    fn parse_init() {
        let cli = Cli::parse_from(["arbor", "init"]);
        assert!(matches!(cli.command, Command::Init { force: false }));
        assert_eq!(cli.root, PathBuf::from("."));
    }

    #[test]
    fn parse_start_with_overrides() {
        let cli = Cli::parse_from([
            "arbor",
            "--root",
            "/tmp/p",
            "start",
            "-s",
            "demo",
            "--mode",
            "search",
            "--search-type",
            "dfs",
            "--scoring",
            "vote",
            "--beam-width",
            "5",
            "make 24 from 4 6 1 1",
        ]);
        let Command::Start {
            session,
            overrides,
            task,
        } = cli.command
        else {
            panic!("expected start");
        };
        assert_eq!(session, "demo");
        assert_eq!(task, "make 24 from 4 6 1 1");

        let mut cfg = ArborConfig::default();
        overrides.apply(&mut cfg);
        assert_eq!(cfg.run.mode, Mode::Search);
        assert_eq!(cfg.run.params.search_type, SearchType::Dfs);
        assert_eq!(cfg.run.params.scoring, ScoringMode::Vote);
        assert_eq!(cfg.run.params.beam_width, 5);
        assert_eq!(cfg.run.params.max_depth, RunParams::default().max_depth);
    }

    #[test]
    fn unknown_mode_is_rejected() {
        let err = Cli::try_parse_from(["arbor", "start", "-s", "x", "--mode", "beam", "task"])
            .err()
            .expect("invalid mode");
        assert_eq!(err.kind(), clap::error::ErrorKind::InvalidValue);
    }

    #[test]
    fn parse_loop_limit() {
        let cli = Cli::parse_from(["arbor", "loop", "--session", "s", "--max-iterations", "4"]);
        assert!(matches!(
            cli.command,
            Command::Loop {
                max_iterations: Some(4),
                ..
            }
        ));
    }

    #[test]
    fn describe_lists_answer_path() {
        let mut snapshot = Snapshot::seed("s", Mode::Search, "question", RunParams::default());
        if let Structure::Search { tree, .. } = &mut snapshot.structure {
            tree.add_subtasks(0, ["step one"]).expect("child");
        }
        snapshot.outcome = Some(RunOutcome::Solved {
            answer_path: vec![0, 1],
        });
        let text = describe(&snapshot);
        assert!(text.contains("structure: search"));
        assert!(text.contains("outcome:   solved"));
        assert!(text.contains("  1. question\n  2. step one\n"));
    }
}
