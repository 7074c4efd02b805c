use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "stratum")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Plan and apply declarative cloud resource graphs", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Directory containing the declaration files
    #[arg(short = 'C', long = "dir", global = true, default_value = ".")]
    pub dir: PathBuf,

    /// State file (default: stratum.state.json in the declaration directory)
    #[arg(long, global = true, env = "STRATUM_STATE")]
    pub state: Option<PathBuf>,

    /// Set a variable (repeatable)
    #[arg(long = "var", value_name = "NAME=VALUE", value_parser = parse_var, global = true)]
    pub vars: Vec<(String, String)>,

    /// Limit the run to a resource and what it needs, or on destroy to a
    /// resource and what depends on it (repeatable)
    #[arg(long = "target", value_name = "KIND.NAME", global = true)]
    pub targets: Vec<String>,

    /// Number of provider calls in flight at once
    #[arg(short, long, global = true)]
    pub jobs: Option<usize>,

    /// Stop starting new changes after this many seconds
    #[arg(long, value_name = "SECS", global = true)]
    pub timeout: Option<u64>,

    /// Re-read recorded resources from the provider before planning
    #[arg(
        long,
        value_name = "BOOL",
        num_args = 0..=1,
        default_missing_value = "true",
        global = true
    )]
    pub refresh: Option<bool>,

    /// Skip the confirmation prompt
    #[arg(long, short = 'y', global = true)]
    pub auto_approve: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show the changes apply would make
    ///
    /// Exits 0 when there is nothing to do and 2 when changes are pending.
    Plan(PlanArgs),

    /// Converge remote resources to match the declarations
    Apply,

    /// Destroy every resource recorded in state
    Destroy,

    /// Print stored outputs
    Output(OutputArgs),

    /// Check the declarations without contacting the provider
    Validate,

    /// Inspect the state file
    #[command(subcommand)]
    State(StateCommand),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args)]
pub struct PlanArgs {
    /// Plan a destroy of everything in state
    #[arg(long)]
    pub destroy: bool,

    /// Print the plan as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct OutputArgs {
    /// Output to print (all outputs if omitted)
    pub name: Option<String>,

    /// Print as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum StateCommand {
    /// List recorded resources
    List,
}

fn parse_var(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{raw}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing variable name in '{raw}'"));
    }
    Ok((name.to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_var() {
        assert_eq!(
            parse_var("cidr=10.0.0.0/16").unwrap(),
            ("cidr".to_string(), "10.0.0.0/16".to_string())
        );
        assert_eq!(parse_var("tags={ a = \"b=c\" }").unwrap().1, "{ a = \"b=c\" }");
        assert!(parse_var("novalue").is_err());
        assert!(parse_var("=1").is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "stratum",
            "apply",
            "-C",
            "infra",
            "--var",
            "a=1",
            "--target",
            "subnet.public",
            "--jobs",
            "8",
            "--refresh=false",
            "-y",
        ])
        .unwrap();
        assert!(matches!(cli.command, Command::Apply));
        assert_eq!(cli.dir, PathBuf::from("infra"));
        assert!(cli.auto_approve);
        assert_eq!(cli.jobs, Some(8));
        assert_eq!(cli.refresh, Some(false));
        assert_eq!(cli.targets, vec!["subnet.public"]);
        assert_eq!(cli.vars, vec![("a".to_string(), "1".to_string())]);
    }

    #[test]
    fn test_bare_refresh_flag() {
        let cli = Cli::try_parse_from(["stratum", "plan", "--refresh", "--json"]).unwrap();
        assert_eq!(cli.refresh, Some(true));
        let Command::Plan(args) = cli.command else {
            panic!("expected plan");
        };
        assert!(args.json);
        assert!(!args.destroy);
    }
}
