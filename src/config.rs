use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::{fs, io};
use validator::{Validate, ValidationError};

const DEFAULT_CATALOG: &str = include_str!("solutions.yaml");

pub const DEFAULT_STAGING_BUCKET_PARAMETER: &str = "/sra/staging-s3-bucket-name";

const KNOWN_CAPABILITIES: [&str; 3] = [
    "CAPABILITY_IAM",
    "CAPABILITY_NAMED_IAM",
    "CAPABILITY_AUTO_EXPAND",
];

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("File {0} not found")]
    FileNotFound(String),

    #[error("Parsing error: {0}")]
    ParsingError(String),

    #[error("Validation errors: {0}")]
    ValidationError(String),

    #[error("Unknown solution `{0}`, available solutions: {1}")]
    UnknownSolution(String, String),

    #[error("Unknown error occurred: {0}")]
    Unknown(String),
}

/// Precondition checks a solution opts into, run in the listed order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Check {
    Credentials,
    Region,
    Organization,
    Kms,
    Repository,
    ControlTowerAccounts,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Zip the `source` directory into `name`.
    Zip,
    /// Upload the `source` file unchanged as `name`.
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Artifact {
    pub kind: ArtifactKind,

    #[validate(length(min = 1))]
    pub name: String,

    pub source: PathBuf,

    #[validate(length(min = 1))]
    pub prefix: String,
}

impl Artifact {
    pub fn key(&self) -> String {
        format!("{}/{}", self.prefix.trim_matches('/'), self.name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Solution {
    #[validate(length(min = 1))]
    pub name: String,

    #[validate(length(min = 1))]
    pub stack_name: String,

    #[validate(custom = "validate_template_file")]
    pub template: PathBuf,

    #[validate(length(min = 1))]
    pub section: String,

    #[serde(default = "default_capabilities")]
    #[validate(custom = "validate_capabilities")]
    pub capabilities: Vec<String>,

    #[serde(default = "default_checks")]
    pub checks: Vec<Check>,

    #[serde(default)]
    pub features: Vec<String>,

    #[serde(default)]
    pub follow_up: Vec<String>,

    #[serde(default)]
    pub artifacts: Vec<Artifact>,

    #[serde(default = "default_staging_bucket_parameter")]
    #[validate(length(min = 1))]
    pub staging_bucket_parameter: String,
}

/// Everything needed to address one stack, derived from a catalog entry and
/// the `common` parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentTarget {
    pub stack_name: String,
    pub template: PathBuf,
    pub region: String,
    pub profile: Option<String>,
    pub capabilities: Vec<String>,
}

impl Solution {
    pub fn target(&self, workdir: &Path, region: &str, profile: Option<&str>) -> DeploymentTarget {
        DeploymentTarget {
            stack_name: self.stack_name.clone(),
            template: workdir.join(&self.template),
            region: region.to_string(),
            profile: profile.map(String::from),
            capabilities: self.capabilities.clone(),
        }
    }
}

pub type Catalog = Vec<Solution>;

/// Loads the catalog at `path`, or the embedded default when no path is given.
pub fn load(path: Option<&PathBuf>) -> Result<Catalog, Error> {
    match path {
        Some(path) => parse(path),
        None => parse_str(DEFAULT_CATALOG),
    }
}

pub fn parse(path: &PathBuf) -> Result<Catalog, Error> {
    let contents = match fs::read_to_string(path) {
        Ok(raw_contents) => Ok(raw_contents),
        Err(error) => match error.kind() {
            io::ErrorKind::NotFound => Err(Error::FileNotFound(path.display().to_string())),
            _ => Err(Error::Unknown(error.to_string())),
        },
    }?;

    return parse_str(&contents);
}

pub fn parse_str(contents: &str) -> Result<Catalog, Error> {
    let catalog: Catalog = match serde_yaml::from_str(contents) {
        Ok(data) => Ok(data),
        Err(error) => Err(Error::ParsingError(error.to_string())),
    }?;

    let mut seen = HashSet::new();
    for solution in &catalog {
        if let Err(error) = solution.validate() {
            return Err(Error::ValidationError(format!("{}: {}", solution.name, error)));
        }
        for artifact in &solution.artifacts {
            if let Err(error) = artifact.validate() {
                return Err(Error::ValidationError(format!("{}: {}", solution.name, error)));
            }
        }
        if !seen.insert(solution.name.as_str()) {
            return Err(Error::ValidationError(format!(
                "duplicate solution name `{}`",
                solution.name
            )));
        }
    }

    return Ok(catalog);
}

pub fn find<'a>(catalog: &'a Catalog, name: &str) -> Result<&'a Solution, Error> {
    match catalog.iter().find(|solution| solution.name == name) {
        Some(solution) => Ok(solution),
        None => {
            let available: Vec<&str> = catalog.iter().map(|s| s.name.as_str()).collect();
            Err(Error::UnknownSolution(name.to_string(), available.join(", ")))
        }
    }
}

fn default_capabilities() -> Vec<String> {
    vec![String::from("CAPABILITY_NAMED_IAM")]
}

fn default_checks() -> Vec<Check> {
    vec![Check::Credentials, Check::Region]
}

fn default_staging_bucket_parameter() -> String {
    String::from(DEFAULT_STAGING_BUCKET_PARAMETER)
}

fn validate_template_file(template: &PathBuf) -> Result<(), ValidationError> {
    let file_extension = match template.extension().and_then(|e| e.to_str()) {
        Some(extension) => extension,
        None => {
            return Err(ValidationError::new(
                "Unable to parse the extension of the template location",
            ))
        }
    };
    if !matches!(file_extension, "yaml" | "yml" | "json" | "template") {
        return Err(ValidationError::new(
            "The template location has to end with `.yaml`, `.yml`, `.json` or `.template`",
        ));
    }

    return Ok(());
}

fn validate_capabilities(capabilities: &Vec<String>) -> Result<(), ValidationError> {
    for capability in capabilities {
        if !KNOWN_CAPABILITIES.contains(&capability.as_str()) {
            return Err(ValidationError::new("Unknown CloudFormation capability"));
        }
    }

    return Ok(());
}
