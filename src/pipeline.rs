use std::fmt;
use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::account::{AccountApi, CallerIdentity};
use crate::artifacts;
use crate::checks;
use crate::config::{self, Check, DeploymentTarget, Solution};
use crate::deploy::{self, DeployOptions, DeployOutcome};
use crate::git::SourceControl;
use crate::parameters::{self, CommonParameters, ParameterOverride, ParametersDocument};
use crate::report::{self, StatusReport};
use crate::stack::StackApi;
use crate::template;

const DEFAULT_BRANCH: &str = "main";

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error(transparent)]
    Catalog(#[from] config::Error),

    #[error(transparent)]
    Parameters(#[from] parameters::Error),

    #[error(transparent)]
    Precondition(#[from] checks::Error),

    #[error(transparent)]
    Template(#[from] template::Error),

    #[error(transparent)]
    Deploy(#[from] deploy::Error),

    #[error(transparent)]
    Artifacts(#[from] artifacts::Error),
}

/// Failure classes an operator sees; all of them end the run with exit code 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    MissingFile,
    InvalidFormat,
    PreconditionMismatch,
    ExternalCommandFailure,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorKind::MissingFile => "missing file",
            ErrorKind::InvalidFormat => "invalid format",
            ErrorKind::PreconditionMismatch => "precondition failed",
            ErrorKind::ExternalCommandFailure => "AWS call failed",
        };
        f.write_str(label)
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Catalog(config::Error::FileNotFound(_)) => ErrorKind::MissingFile,
            Error::Catalog(config::Error::UnknownSolution(..)) => ErrorKind::PreconditionMismatch,
            Error::Catalog(_) => ErrorKind::InvalidFormat,

            Error::Parameters(parameters::Error::FileNotFound { .. })
            | Error::Parameters(parameters::Error::Unknown(_)) => ErrorKind::MissingFile,
            Error::Parameters(parameters::Error::ParsingError(..)) => ErrorKind::InvalidFormat,
            Error::Parameters(_) => ErrorKind::PreconditionMismatch,

            Error::Precondition(checks::Error::Credentials { .. })
            | Error::Precondition(checks::Error::Account(_))
            | Error::Precondition(checks::Error::SourceControl(_)) => {
                ErrorKind::ExternalCommandFailure
            }
            Error::Precondition(_) => ErrorKind::PreconditionMismatch,

            Error::Template(template::Error::FileNotFound(_))
            | Error::Template(template::Error::Unknown(_)) => ErrorKind::MissingFile,
            Error::Template(template::Error::TooLarge { .. }) => ErrorKind::InvalidFormat,
            Error::Template(template::Error::Invalid { .. }) => ErrorKind::ExternalCommandFailure,

            Error::Deploy(_) => ErrorKind::ExternalCommandFailure,

            Error::Artifacts(artifacts::Error::MissingSource(_)) => ErrorKind::MissingFile,
            Error::Artifacts(_) => ErrorKind::ExternalCommandFailure,
        }
    }
}

/// Everything the operator decided on the command line, fixed for the run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub workdir: PathBuf,
    pub profile: Option<String>,
    pub parameters_file: Option<PathBuf>,
    pub branch: Option<String>,
    pub verify_control_tower_accounts: bool,
    pub deploy: DeployOptions,
}

impl RunOptions {
    pub fn new(workdir: PathBuf) -> Self {
        Self {
            workdir,
            profile: None,
            parameters_file: None,
            branch: None,
            verify_control_tower_accounts: false,
            deploy: DeployOptions::default(),
        }
    }
}

/// Local inputs, loaded and validated before any AWS call.
#[derive(Debug, Clone)]
pub struct Prepared {
    pub document: ParametersDocument,
    pub common: CommonParameters,
    pub overrides: Vec<ParameterOverride>,
    pub target: DeploymentTarget,
}

pub struct Services<'a> {
    pub stacks: &'a dyn StackApi,
    pub accounts: &'a dyn AccountApi,
    pub repository: &'a dyn SourceControl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Stop once the template has been validated.
    Validate,
    Deploy,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Validated,
    Deployed {
        deploy: DeployOutcome,
        report: StatusReport,
    },
}

/// The explicit parameters file, or `sra-parameters-<branch>.json` for the
/// current branch.
pub async fn parameters_path(options: &RunOptions, repository: &dyn SourceControl) -> PathBuf {
    if let Some(path) = &options.parameters_file {
        return options.workdir.join(path);
    }

    let branch = match &options.branch {
        Some(branch) => branch.clone(),
        None => match repository.current_branch().await {
            Ok(branch) if !branch.is_empty() && branch != "HEAD" => branch,
            Ok(_) => {
                warn!("detached HEAD, using the {} parameters", DEFAULT_BRANCH);
                String::from(DEFAULT_BRANCH)
            }
            Err(error) => {
                warn!(%error, "unable to detect branch, using the {} parameters", DEFAULT_BRANCH);
                String::from(DEFAULT_BRANCH)
            }
        },
    };

    options.workdir.join(parameters::file_name(&branch))
}

pub async fn load_common(
    options: &RunOptions,
    repository: &dyn SourceControl,
) -> Result<(ParametersDocument, CommonParameters), Error> {
    let path = parameters_path(options, repository).await;
    info!(parameters = %path.display(), "loading parameters");

    let document = ParametersDocument::load(&path)?;
    let common = document.common()?;
    checks::region(&common)?;

    if let (Some(selected), Some(declared)) = (&options.profile, &common.profile) {
        if selected != declared {
            warn!(%selected, %declared, "profile differs from pAWSProfile");
        }
    }

    Ok((document, common))
}

pub async fn prepare(
    solution: &Solution,
    options: &RunOptions,
    repository: &dyn SourceControl,
) -> Result<Prepared, Error> {
    let (document, common) = load_common(options, repository).await?;
    let overrides = document.require(&solution.section)?;
    debug!(
        section = %solution.section,
        count = overrides.len(),
        "extracted parameters"
    );

    let region = checks::region(&common)?;
    let target = solution.target(&options.workdir, region, options.profile.as_deref());

    Ok(Prepared {
        document,
        common,
        overrides,
        target,
    })
}

/// Preconditions, template validation and, in [`Mode::Deploy`], the
/// deployment and its status report. Stops at the first failure.
pub async fn run(
    solution: &Solution,
    prepared: &Prepared,
    services: &Services<'_>,
    options: &RunOptions,
    mode: Mode,
) -> Result<Outcome, Error> {
    let common = &prepared.common;
    let target = &prepared.target;
    let mut identity: Option<CallerIdentity> = None;

    for check in &solution.checks {
        debug!(?check, "running check");
        match check {
            Check::Credentials => {
                identity = Some(
                    checks::credentials(services.accounts, target.profile.as_deref()).await?,
                );
            }
            Check::Region => {
                checks::region(common)?;
            }
            Check::Organization => {
                checks::organization(services.accounts, &common.organization_id).await?;
            }
            Check::Kms => {
                let caller = match &identity {
                    Some(identity) => identity.clone(),
                    None => {
                        checks::credentials(services.accounts, target.profile.as_deref()).await?
                    }
                };
                checks::kms_key(services.accounts, &common.kms_key_arn, &caller.account).await?;
                identity = Some(caller);
            }
            Check::Repository => {
                checks::repository(services.repository, &common.repo_url, &common.repo_branch)
                    .await?;
            }
            Check::ControlTowerAccounts => {
                if !options.verify_control_tower_accounts {
                    debug!("Control Tower account check disabled");
                    continue;
                }
                checks::control_tower_accounts(
                    services.accounts,
                    common.log_archive_account_id.as_deref().unwrap_or_default(),
                    common.audit_account_id.as_deref().unwrap_or_default(),
                )
                .await?;
            }
        }
    }

    let validated = template::validate(services.stacks, &target.template).await?;
    if mode == Mode::Validate {
        return Ok(Outcome::Validated);
    }

    info!(stack = %target.stack_name, region = %target.region, "deploying");
    let deployed = deploy::deploy(
        services.stacks,
        target,
        &validated,
        &prepared.overrides,
        &options.deploy,
    )
    .await?;

    let report = report::status(services.stacks, &target.stack_name).await;

    Ok(Outcome::Deployed {
        deploy: deployed,
        report,
    })
}
