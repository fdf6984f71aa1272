use std::path::PathBuf;
use std::process;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod account;
pub mod artifacts;
pub mod aws;
pub mod checks;
pub mod cleanup;
pub mod config;
pub mod deploy;
pub mod git;
pub mod parameters;
pub mod pipeline;
pub mod report;
pub mod stack;
pub mod template;

use account::Account;
use artifacts::S3Store;
use cleanup::{AccountReport, CleanupOptions, CloudFormationInventory, SsmInventory};
use config::{Catalog, Solution};
use deploy::DeployOutcome;
use git::Git;
use pipeline::{Mode, Outcome, RunOptions, Services};
use report::Classification;
use stack::Stacks;

#[derive(Parser)]
#[command(name = "sra-deploy", version)]
#[command(about = "Deploy AWS Security Reference Architecture solutions", long_about = None)]
struct Cli {
    /// Directory holding the parameters files and templates
    #[arg(short = 'w', long = "workdir", global = true)]
    workdir: Option<PathBuf>,

    /// Solution catalog to use instead of the built-in one
    #[arg(long = "catalog", global = true)]
    catalog: Option<PathBuf>,

    /// Enable debug output
    #[arg(long = "debug", default_value_t = false, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct TargetArgs {
    /// Solution name from the catalog
    solution: String,

    /// AWS profile, the default credentials chain when omitted
    #[arg(env = "AWS_PROFILE")]
    profile: Option<String>,

    /// Parameters file, `sra-parameters-<branch>.json` when omitted
    parameters_file: Option<PathBuf>,

    /// Branch whose parameters file is used instead of the checked out one
    #[arg(long = "branch")]
    branch: Option<String>,
}

#[derive(Args)]
struct DeployArgs {
    #[command(flatten)]
    target: TargetArgs,

    /// Compare the Log Archive and Audit account ids with Control Tower
    #[arg(long = "verify-control-tower-accounts", default_value_t = false)]
    verify_control_tower_accounts: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate, deploy and report on a solution stack
    Deploy(DeployArgs),

    /// Run every check and validate the template without deploying
    Validate(DeployArgs),

    /// Report the current status of a solution stack
    Status {
        /// Solution name from the catalog
        solution: String,

        /// AWS profile, the default credentials chain when omitted
        #[arg(env = "AWS_PROFILE")]
        profile: Option<String>,

        /// Region of the stack, the default region chain when omitted
        #[arg(long = "region")]
        region: Option<String>,
    },

    /// Package and upload a solution's artifacts to the staging bucket
    Sync(TargetArgs),

    /// List the solutions in the catalog
    Solutions,

    /// Find leftover SRA stacks, StackSets and `/sra` parameters
    Cleanup {
        /// AWS profiles to scan, one account each
        #[arg(env = "AWS_PROFILE", value_delimiter = ',')]
        profiles: Vec<String>,

        /// Regions to scan
        #[arg(long = "region", default_values = ["us-east-1", "us-west-2"])]
        regions: Vec<String>,

        /// Delete what is found instead of only listing it
        #[arg(long = "delete", default_value_t = false)]
        delete: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter(cli.debug).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let code = match run(cli).await {
        Ok(code) => code,
        Err(error) => {
            eprintln!("[ERROR] {}: {}", error.kind(), error);
            1
        }
    };

    process::exit(code);
}

/// Warnings only, unless `--debug` asks for this crate's debug output.
fn default_filter(debug: bool) -> String {
    match debug {
        true => format!("error,{}=debug", env!("CARGO_CRATE_NAME")),
        false => String::from("warn"),
    }
}

async fn run(cli: Cli) -> Result<i32, pipeline::Error> {
    let workdir = cli.workdir.unwrap_or_else(|| PathBuf::from("."));
    let catalog = config::load(cli.catalog.as_ref())?;

    match cli.command {
        Commands::Deploy(args) => deploy(&catalog, workdir, args, Mode::Deploy).await,
        Commands::Validate(args) => deploy(&catalog, workdir, args, Mode::Validate).await,
        Commands::Status {
            solution,
            profile,
            region,
        } => {
            let solution = config::find(&catalog, &solution)?;
            status(solution, workdir, profile, region).await
        }
        Commands::Sync(args) => sync(&catalog, workdir, args).await,
        Commands::Solutions => {
            list(&catalog);
            Ok(0)
        }
        Commands::Cleanup {
            profiles,
            regions,
            delete,
        } => Ok(clean(profiles, regions, delete).await),
    }
}

fn run_options(workdir: PathBuf, args: &TargetArgs) -> RunOptions {
    let mut options = RunOptions::new(workdir);
    options.profile = args.profile.clone();
    options.parameters_file = args.parameters_file.clone();
    options.branch = args.branch.clone();
    options
}

async fn deploy(
    catalog: &Catalog,
    workdir: PathBuf,
    args: DeployArgs,
    mode: Mode,
) -> Result<i32, pipeline::Error> {
    let solution = config::find(catalog, &args.target.solution)?;
    let repository = Git::new(workdir.clone());
    let mut options = run_options(workdir, &args.target);
    options.verify_control_tower_accounts = args.verify_control_tower_accounts;

    let prepared = pipeline::prepare(solution, &options, &repository).await?;
    let target = &prepared.target;

    let sdk_config = aws::load_config(target.profile.as_deref(), Some(target.region.as_str())).await;
    let stacks = Stacks::new(&sdk_config);
    let accounts = Account::new(&sdk_config);
    let services = Services {
        stacks: &stacks,
        accounts: &accounts,
        repository: &repository,
    };

    match pipeline::run(solution, &prepared, &services, &options, mode).await? {
        Outcome::Validated => {
            println!(
                "[OK] {} passed all checks with {}, template {} is valid",
                solution.name,
                prepared.document.path.display(),
                target.template.display()
            );
            Ok(0)
        }
        Outcome::Deployed { deploy, report: summary } => {
            if deploy == DeployOutcome::NoChanges {
                println!("No changes to deploy for stack {}", target.stack_name);
            }
            print!("{}", report::render(&summary, solution, target));
            match summary.classification() {
                Classification::Success => Ok(0),
                Classification::Failure => Ok(1),
            }
        }
    }
}

async fn status(
    solution: &Solution,
    workdir: PathBuf,
    profile: Option<String>,
    region: Option<String>,
) -> Result<i32, pipeline::Error> {
    let sdk_config = aws::load_config(profile.as_deref(), region.as_deref()).await;
    let region = sdk_config
        .region()
        .map(|r| r.to_string())
        .unwrap_or_default();
    let target = solution.target(&workdir, &region, profile.as_deref());

    let stacks = Stacks::new(&sdk_config);
    let summary = report::status(&stacks, &target.stack_name).await;
    print!("{}", report::render(&summary, solution, &target));

    match summary.classification() {
        Classification::Success => Ok(0),
        Classification::Failure => Ok(1),
    }
}

async fn sync(catalog: &Catalog, workdir: PathBuf, args: TargetArgs) -> Result<i32, pipeline::Error> {
    let solution = config::find(catalog, &args.solution)?;
    if solution.artifacts.is_empty() {
        println!("Solution {} has no artifacts to sync", solution.name);
        return Ok(0);
    }

    let repository = Git::new(workdir.clone());
    let options = run_options(workdir, &args);
    let (_, common) = pipeline::load_common(&options, &repository).await?;

    let sdk_config = aws::load_config(options.profile.as_deref(), Some(common.region.as_str())).await;
    let store = S3Store::new(&sdk_config);
    let uploaded = artifacts::sync(&store, solution, &options.workdir).await?;

    for uri in uploaded {
        println!("[OK] uploaded {}", uri);
    }
    Ok(0)
}

fn list(catalog: &Catalog) {
    let width = catalog
        .iter()
        .map(|s| s.name.len())
        .max()
        .unwrap_or_default();

    for solution in catalog {
        println!(
            "{:<width$}  {}  [{}]  {}",
            solution.name,
            solution.stack_name,
            solution.section,
            solution.template.display(),
            width = width
        );
    }
}

async fn clean(profiles: Vec<String>, regions: Vec<String>, delete: bool) -> i32 {
    let profiles: Vec<Option<String>> = match profiles.is_empty() {
        true => vec![None],
        false => profiles.into_iter().map(Some).collect(),
    };
    let options = CleanupOptions {
        delete,
        ..CleanupOptions::default()
    };

    let mut reports = vec![];
    for profile in profiles {
        let mut report = AccountReport {
            account: String::from("unknown"),
            profile: profile.clone(),
            error: None,
            entries: vec![],
        };

        let sdk_config = aws::load_config(profile.as_deref(), regions.first().map(String::as_str)).await;
        match checks::credentials(&Account::new(&sdk_config), profile.as_deref()).await {
            Ok(identity) => report.account = identity.account,
            Err(error) => {
                report.error = Some(error.to_string());
                reports.push(report);
                continue;
            }
        }

        for region in &regions {
            let sdk_config = aws::load_config(profile.as_deref(), Some(region.as_str())).await;
            let stacks = CloudFormationInventory::new(&sdk_config);
            let parameters = SsmInventory::new(&sdk_config);
            report
                .entries
                .extend(cleanup::clean_region(&stacks, &parameters, region, &options).await);
        }
        reports.push(report);
    }

    print!("{}", cleanup::render(&reports, delete));
    match reports.iter().any(|r| r.failures() > 0) {
        true => 1,
        false => 0,
    }
}
