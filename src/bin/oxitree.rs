// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use oxitree::{
    config::{SourceDefinition, TreeDefinition},
    path::{default_definition_path, home_dir},
    tree::{
        execute::Outcome,
        plan::{Operation, Plan},
    },
    Tree,
};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use inquire::Confirm;
use std::{error::Error, fs, path::PathBuf, process::exit};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "oxitree [options] <oxitree-command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    fn run(self) -> Result<()> {
        match self.command {
            Command::Init(opts) => run_init(opts),
            Command::Plan(opts) => run_plan(opts),
            Command::Apply(opts) => run_apply(opts),
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Write skeleton tree definition.
    #[command(override_usage = "oxitree init [options] [<definition>]")]
    Init(InitOptions),

    /// Show operations needed to reconcile destination without doing them.
    #[command(override_usage = "oxitree plan [options] [<definition>]")]
    Plan(TreeOptions),

    /// Reconcile destination with tree sources.
    #[command(override_usage = "oxitree apply [options] [<definition>]")]
    Apply(ApplyOptions),
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct InitOptions {
    /// Path to tree definition to write.
    #[arg(value_name = "definition")]
    pub definition: Option<PathBuf>,

    /// Brief description of tree.
    #[arg(short = 'D', long, value_name = "summary")]
    pub description: Option<String>,

    /// Path to destination root.
    #[arg(short, long, value_name = "path")]
    pub destination: Option<PathBuf>,
}

#[derive(Args, Clone, Debug)]
struct TreeOptions {
    /// Path to tree definition.
    #[arg(value_name = "definition")]
    pub definition: Option<PathBuf>,

    /// Remove destination entries that no source provides.
    #[arg(short = 'x', long)]
    pub exclusive: bool,

    /// Bind extra template variable, overriding the definition.
    #[arg(short = 'e', long = "extra-var", value_name = "key=value", value_parser = parse_binding)]
    pub variables: Vec<(String, String)>,
}

#[derive(Args, Clone, Debug)]
struct ApplyOptions {
    #[command(flatten)]
    pub tree: TreeOptions,

    /// Do not ask before removing anything.
    #[arg(short, long)]
    pub yes: bool,
}

fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_timer(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = run() {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

fn run() -> Result<()> {
    Cli::parse().run()
}

fn run_init(opts: InitOptions) -> Result<()> {
    let path = match opts.definition {
        Some(path) => path,
        None => default_definition_path()?,
    };
    if path.exists() {
        bail!("tree definition {:?} already exists", path.display());
    }

    let mut definition = TreeDefinition::default();
    definition.settings.description = match opts.description {
        Some(description) => description,
        None => "<put one sentence description here>".into(),
    };
    definition.settings.destination = match opts.destination {
        Some(path) => path,
        None => home_dir()?,
    };
    definition
        .sources
        .push(SourceDefinition::new("<put source root here>/"));

    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        mkdirp::mkdirp(parent)
            .with_context(|| format!("failed to create directory {:?}", parent.display()))?;
    }
    fs::write(&path, definition.to_string())
        .with_context(|| format!("failed to write tree definition {:?}", path.display()))?;
    info!("wrote tree definition {:?}", path.display());

    Ok(())
}

fn run_plan(opts: TreeOptions) -> Result<()> {
    let tree = load_tree(opts)?;
    let plan = tree.plan()?;
    if plan.is_empty() {
        info!("{:?} is already reconciled", tree.destination().display());
        return Ok(());
    }

    print!("{plan}");

    Ok(())
}

fn run_apply(opts: ApplyOptions) -> Result<()> {
    let tree = load_tree(opts.tree)?;
    let plan = tree.plan()?;
    if plan.removals() > 0 && !opts.yes && !confirm_removals(&plan)? {
        warn!("reconciliation aborted, nothing was changed");
        return Ok(());
    }

    let bar = ProgressBar::new((plan.len() + plan.unchanged().len()) as u64);
    let style = ProgressStyle::with_template(
        "{elapsed_precise:.green}  {msg:<50}  [{wide_bar:.yellow/blue}]",
    )?
    .progress_chars("-Cco.");
    bar.set_style(style);

    let summary = tree.apply_with(&plan, |path, _| {
        bar.set_message(path.to_string());
        bar.inc(1);
    });
    bar.finish_and_clear();

    for (path, failure) in summary.failures() {
        let mut message = format!("{path}: failed to {failure}");
        let mut source = failure.error.source();
        while let Some(cause) = source {
            message.push_str(&format!(": {cause}"));
            source = cause.source();
        }
        error!("{message}");
    }

    info!(
        "{} created, {} updated, {} removed, {} unchanged",
        summary.count(|outcome| matches!(outcome, Outcome::Created)),
        summary.count(|outcome| matches!(outcome, Outcome::Updated)),
        summary.count(|outcome| matches!(outcome, Outcome::Removed)),
        summary.count(|outcome| matches!(outcome, Outcome::Unchanged)),
    );

    if summary.failed() {
        return Err(anyhow!(
            "failed to reconcile {} paths",
            summary.count(Outcome::is_failure)
        ));
    }

    Ok(())
}

fn load_tree(opts: TreeOptions) -> Result<Tree> {
    let path = match opts.definition {
        Some(path) => path,
        None => default_definition_path()?,
    };

    let mut tree = Tree::load(path)?;
    let definition = tree.definition_mut();
    definition.settings.exclusive |= opts.exclusive;
    definition.variables.extend(opts.variables);

    Ok(tree)
}

fn confirm_removals(plan: &Plan) -> Result<bool> {
    for operation in plan.operations() {
        if matches!(operation, Operation::Remove { .. }) {
            println!("{operation}");
        }
    }

    let answer = Confirm::new(&format!(
        "remove {} entries from {:?}?",
        plan.removals(),
        plan.root().display()
    ))
    .with_default(false)
    .prompt()?;

    Ok(answer)
}

fn parse_binding(data: &str) -> Result<(String, String), String> {
    data.split_once('=')
        .map(|(key, value)| (key.trim().to_string(), value.to_string()))
        .filter(|(key, _)| !key.is_empty())
        .ok_or_else(|| format!("expected key=value, got {data:?}"))
}
