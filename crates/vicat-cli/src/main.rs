mod cmd_create;
mod cmd_query;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use vicat::{EntityId, PolicyConfig, VersionGraph};
use vicat_icat::{IcatClient, IcatConfig};

#[derive(Parser, Debug)]
#[command(name = "vicat")]
#[command(about = "Create and trace versions of ICAT datasets")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Facility holding the version parameters (overrides VICAT_FACILITY_ID)
    #[arg(long, global = true)]
    facility_id: Option<EntityId>,

    /// Facility name to look up (overrides VICAT_FACILITY_NAME)
    #[arg(long, global = true, conflicts_with = "facility_id")]
    facility: Option<String>,

    /// Allow a dataset to have several newer versions (overrides VICAT_BRANCHING)
    #[arg(long, global = true)]
    branching: bool,

    /// Allow at most one newer version per dataset (overrides VICAT_BRANCHING)
    #[arg(long, global = true, conflicts_with = "branching")]
    no_branching: bool,

    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pretty: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Clone a dataset as its newest version
    Create {
        /// Dataset to make a new version of
        dataset: EntityId,

        /// Name for the new dataset
        #[arg(short, long)]
        name: String,

        /// Why the version is being created
        #[arg(short, long)]
        comment: Option<String>,
    },
    #[command(flatten)]
    Query(cmd_query::QueryOp),
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_policy(cli: &Cli) -> Result<PolicyConfig> {
    let policy = PolicyConfig::from_env().context("Invalid VICAT_* settings")?;
    Ok(apply_overrides(cli, policy))
}

fn apply_overrides(cli: &Cli, mut policy: PolicyConfig) -> PolicyConfig {
    if let Some(id) = cli.facility_id {
        policy = policy.with_scope_id(id);
    } else if let Some(name) = &cli.facility {
        policy = policy.with_scope_name(name.clone());
    }
    if cli.branching {
        policy = policy.with_branching(true);
    } else if cli.no_branching {
        policy = policy.with_branching(false);
    }
    policy
}

fn open_graph(policy: PolicyConfig) -> Result<VersionGraph<IcatClient>> {
    let config = IcatConfig::from_env().context("Invalid ICAT_* settings")?;
    let client = IcatClient::connect(&config)
        .with_context(|| format!("Failed to connect to ICAT at {}", config.url))?;
    VersionGraph::new(client, policy).context("Failed to prepare version parameters")
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging();

    let policy = build_policy(&cli)?;
    tracing::debug!(?policy, "resolved policy");
    let graph = open_graph(policy)?;

    let output = match cli.command {
        Commands::Create {
            dataset,
            name,
            comment,
        } => cmd_create::run(&graph, dataset, &name, comment.as_deref())?,
        Commands::Query(op) => cmd_query::run(&graph, op)?,
    };

    let json = if cli.pretty {
        serde_json::to_string_pretty(&output)?
    } else {
        serde_json::to_string(&output)?
    };
    println!("{}", json);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use vicat::ScopeSelector;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("vicat").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_no_branching_overrides_environment() {
        let env = PolicyConfig::new().with_branching(true);
        let policy = apply_overrides(&parse(&["--no-branching", "show", "1"]), env.clone());
        assert!(!policy.branching);

        let kept = apply_overrides(&parse(&["show", "1"]), env);
        assert!(kept.branching);
    }

    #[test]
    fn test_branching_flag_turns_branching_on() {
        let policy = apply_overrides(&parse(&["--branching", "show", "1"]), PolicyConfig::new());
        assert!(policy.branching);
    }

    #[test]
    fn test_branching_flags_conflict() {
        let result = Cli::try_parse_from(["vicat", "--branching", "--no-branching", "show", "1"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_facility_flag_sets_scope() {
        let policy = apply_overrides(&parse(&["--facility-id", "7", "show", "1"]), PolicyConfig::new());
        assert_eq!(policy.scope, ScopeSelector::Id(7));

        let policy = apply_overrides(&parse(&["--facility", "ISIS", "show", "1"]), PolicyConfig::new());
        assert_eq!(policy.scope, ScopeSelector::Named("ISIS".into()));
    }
}
