//! Story - cross-repository stories over a metarepo
//!
//! The `story` command runs from the root of a metarepo whose `.meta` file
//! lists the member projects.
//!
//! ## Commands
//!
//! - `create`, `load`, `reset`: start, resume or leave a story
//! - `add`, `remove`, `prune`: manage the projects in a story
//! - `commit`, `push`, `update`: git operations across every member
//! - `pin`, `unpin`: pin member dependencies to commit hashes and back
//! - `prepare`, `merge`, `pr`: land a story on trunk

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{debug, Level};

use story_core::lifecycle::no_arguments;
use story_core::telemetry::init_tracing;
use story_core::{
    AddOptions, GitCli, GitHubClient, HostMergeOutcome, ManifestGraphCalculator, Mode,
    OsWorkspace, PullRequestOutcome, RepoOutput, StoryConfig, StoryLifecycle,
};

#[derive(Parser)]
#[command(name = "story")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Cross-repository stories over a metarepo", long_about = None)]
struct Cli {
    /// Release branch name
    #[arg(long, global = true, default_value = "master", env = "STORY_TRUNK")]
    trunk: String,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a story branch in the metarepo
    Create {
        /// Story name, used as the branch name everywhere
        name: String,
    },

    /// Check out an existing story, cloning missing projects
    Load {
        name: String,
    },

    /// Return every project and the metarepo to trunk
    Reset {
        #[arg(hide = true)]
        args: Vec<String>,
    },

    /// Add projects to the current story
    Add {
        projects: Vec<String>,

        /// Only clone missing projects, leave the story untouched
        #[arg(long)]
        ci: bool,

        /// Also add private package dependencies of each project
        #[arg(long)]
        deps: bool,
    },

    /// Remove projects from the current story
    Remove {
        projects: Vec<String>,
    },

    /// Remove projects with no changes on the story branch
    Prune {
        #[arg(hide = true)]
        args: Vec<String>,
    },

    /// List the projects in the current story
    List {
        #[arg(hide = true)]
        args: Vec<String>,
    },

    /// List the artifacts that must be rebuilt
    Artifacts {
        #[arg(hide = true)]
        args: Vec<String>,
    },

    /// List every project affected by the story
    #[command(name = "blastradius")]
    BlastRadius {
        #[arg(hide = true)]
        args: Vec<String>,
    },

    /// Commit staged work in every project, then the story manifest
    Commit {
        #[arg(short, long, default_value = "")]
        message: String,
    },

    /// Push the story branch everywhere
    Push {
        #[arg(hide = true)]
        args: Vec<String>,
    },

    /// Pin member dependencies to their current commit hashes
    Pin {
        #[arg(hide = true)]
        args: Vec<String>,
    },

    /// Revert member dependencies to trunk references
    Unpin {
        #[arg(hide = true)]
        args: Vec<String>,
    },

    /// Archive the story and restore the registry ahead of merging
    Prepare {
        #[arg(hide = true)]
        args: Vec<String>,
    },

    /// Merge trunk into the story branch of every project
    Update {
        #[arg(hide = true)]
        args: Vec<String>,
    },

    /// Squash-merge the story into trunk
    Merge {
        /// Merge the pull requests through GitHub instead of locally
        #[arg(long)]
        github: bool,

        #[arg(long, env = "GITHUB_API_TOKEN", hide_env_values = true)]
        github_api_token: Option<String>,
    },

    /// Open a pull request per project
    Pr {
        /// Issue URL used as the pull request body
        #[arg(long, default_value = "")]
        issue: String,

        #[arg(long, env = "GITHUB_API_TOKEN", hide_env_values = true)]
        github_api_token: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    let root = std::env::current_dir().context("Failed to resolve the metarepo directory")?;
    let config = StoryConfig::from_env().with_trunk(&cli.trunk);
    let lifecycle = StoryLifecycle::new(
        Arc::new(OsWorkspace::new(root.clone())),
        Arc::new(GitCli::new(root.clone())),
        Arc::new(ManifestGraphCalculator::new()),
        config,
    );
    let mode = lifecycle.detect_mode().context("Failed to read the metarepo branch")?;
    debug!(?mode, root = %root.display(), "mode detected");

    run(&lifecycle, &mode, cli.command).await
}

async fn run(lifecycle: &StoryLifecycle, mode: &Mode, command: Commands) -> Result<()> {
    match command {
        Commands::Create { name } => print_outputs(&lifecycle.create(mode, &name)?),
        Commands::Load { name } => print_outputs(&lifecycle.load(mode, &name)?),
        Commands::Reset { args } => {
            no_arguments(&args)?;
            print_outputs(&lifecycle.reset(mode)?);
        }
        Commands::Add { projects, ci, deps } => cmd_add(lifecycle, mode, &projects, ci, deps)?,
        Commands::Remove { projects } => cmd_remove(lifecycle, mode, &projects)?,
        Commands::Prune { args } => {
            no_arguments(&args)?;
            cmd_prune(lifecycle, mode)?;
        }
        Commands::List { args } => {
            no_arguments(&args)?;
            print_lines(&lifecycle.list(mode)?);
        }
        Commands::Artifacts { args } => {
            no_arguments(&args)?;
            print_lines(&lifecycle.artifacts(mode)?);
        }
        Commands::BlastRadius { args } => {
            no_arguments(&args)?;
            print_lines(&lifecycle.blast_radius(mode)?);
        }
        Commands::Commit { message } => print_outputs(&lifecycle.commit(mode, &message)?),
        Commands::Push { args } => {
            no_arguments(&args)?;
            print_outputs(&lifecycle.push(mode)?);
        }
        Commands::Pin { args } => {
            no_arguments(&args)?;
            print_outputs(&lifecycle.pin(mode)?);
        }
        Commands::Unpin { args } => {
            no_arguments(&args)?;
            print_outputs(&lifecycle.unpin(mode)?);
        }
        Commands::Prepare { args } => {
            no_arguments(&args)?;
            print_outputs(&lifecycle.prepare(mode)?);
        }
        Commands::Update { args } => {
            no_arguments(&args)?;
            print_outputs(&lifecycle.update(mode)?);
        }
        Commands::Merge {
            github,
            github_api_token,
        } => {
            if github {
                let host = github_client(github_api_token)?;
                cmd_merge_github(lifecycle, mode, &host).await?;
            } else {
                print_outputs(&lifecycle.merge(mode)?);
            }
        }
        Commands::Pr {
            issue,
            github_api_token,
        } => {
            let host = github_client(github_api_token)?;
            cmd_pr(lifecycle, mode, &host, &issue).await?;
        }
    }
    Ok(())
}

fn github_client(token: Option<String>) -> Result<GitHubClient> {
    let client = GitHubClient::new(&token.unwrap_or_default())
        .context("A GitHub API token is required (--github-api-token or GITHUB_API_TOKEN)")?;
    Ok(client)
}

/// Add projects to the story
fn cmd_add(
    lifecycle: &StoryLifecycle,
    mode: &Mode,
    projects: &[String],
    ci: bool,
    deps: bool,
) -> Result<()> {
    let options = AddOptions {
        ci,
        dependencies: deps,
    };
    let report = lifecycle.add(mode, projects, options)?;
    print_outputs(&report.outputs);

    for project in &report.skipped {
        println!("{project} is not a project in the metarepo, skipped");
    }
    for project in &report.added {
        println!("Added {project}");
    }
    for project in &report.derived {
        println!("Added {project} (dependency)");
    }
    Ok(())
}

/// Remove projects from the story
fn cmd_remove(lifecycle: &StoryLifecycle, mode: &Mode, projects: &[String]) -> Result<()> {
    let report = lifecycle.remove(mode, projects)?;
    print_outputs(&report.outputs);

    for project in &report.skipped {
        println!("{project} is not part of the story, skipped");
    }
    for project in &report.removed {
        println!("Removed {project}");
    }
    Ok(())
}

fn cmd_prune(lifecycle: &StoryLifecycle, mode: &Mode) -> Result<()> {
    let report = lifecycle.prune(mode)?;
    print_outputs(&report.outputs);

    if report.unchanged.is_empty() && report.promoted.is_empty() {
        println!("Nothing to prune");
    }
    for project in &report.unchanged {
        println!("Pruned {project} (no changes)");
    }
    for project in &report.promoted {
        println!("Kept {project} as a direct member (no longer a dependency, has changes)");
    }
    Ok(())
}

/// Open a pull request per project
async fn cmd_pr(
    lifecycle: &StoryLifecycle,
    mode: &Mode,
    host: &GitHubClient,
    issue: &str,
) -> Result<()> {
    let reports = lifecycle
        .open_pull_requests(mode, host, issue)
        .await
        .context("Failed to open pull requests")?;

    for report in reports {
        match report.outcome {
            PullRequestOutcome::Opened { url } => {
                println!("{}: opened {}", report.repo, url)
            }
            PullRequestOutcome::Existing { url } => {
                println!("{}: already open at {}", report.repo, url)
            }
            PullRequestOutcome::IdenticalToTrunk => {
                println!("{}: no commits over trunk, nothing to open", report.repo)
            }
        }
    }
    Ok(())
}

/// Merge the story's pull requests through GitHub
async fn cmd_merge_github(
    lifecycle: &StoryLifecycle,
    mode: &Mode,
    host: &GitHubClient,
) -> Result<()> {
    let reports = lifecycle
        .merge_via_host(mode, host)
        .await
        .context("Failed to merge pull requests")?;

    for report in reports {
        let line = match report.outcome {
            HostMergeOutcome::Merged { url } => format!("merged {url}"),
            HostMergeOutcome::NotMergeable { url } => format!("{url} is not mergeable"),
            HostMergeOutcome::HeadModified { url } => {
                format!("{url} head was modified, review and merge again")
            }
            HostMergeOutcome::AlreadyClosed { url } => format!("{url} is already closed"),
            HostMergeOutcome::NotFound => "no pull request found".to_string(),
        };
        println!("{}: {}", report.repo, line);
    }
    Ok(())
}

fn print_outputs(outputs: &[RepoOutput]) {
    for output in outputs {
        if output.output.is_empty() {
            continue;
        }
        println!("{}: {}", output.repo, output.output);
    }
}

fn print_lines(lines: &[String]) {
    for line in lines {
        println!("{line}");
    }
}
