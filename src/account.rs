use aws_smithy_types::Document;
use aws_types::region::Region;
use aws_types::SdkConfig;
use futures::future::BoxFuture;

use crate::aws::describe_error;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("Unable to resolve caller identity: {0}")]
    Credentials(String),

    #[error("Service error ocurred: {0}.")]
    ServiceError(String),

    #[error("{0} not found")]
    NotFoundError(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallerIdentity {
    pub account: String,
    pub arn: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeyDescription {
    pub arn: String,
    pub state: String,
}

/// Account ids Control Tower assigns to the shared account roles.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControlTowerAccounts {
    pub log_archive: Option<String>,
    pub audit: Option<String>,
}

/// Read-only view of the live account the credentials point at.
pub trait AccountApi: Send + Sync {
    fn caller_identity(&self) -> BoxFuture<'_, Result<CallerIdentity, Error>>;

    fn organization_id(&self) -> BoxFuture<'_, Result<String, Error>>;

    /// Describes a KMS key in `region`, which may differ from the default one.
    fn describe_key<'a>(
        &'a self,
        key_arn: &'a str,
        region: &'a str,
    ) -> BoxFuture<'a, Result<KeyDescription, Error>>;

    fn control_tower_accounts(&self) -> BoxFuture<'_, Result<ControlTowerAccounts, Error>>;
}

pub struct Account {
    sdk_config: SdkConfig,
    sts: aws_sdk_sts::Client,
    organizations: aws_sdk_organizations::Client,
    controltower: aws_sdk_controltower::Client,
}

impl Account {
    pub fn new(sdk_config: &SdkConfig) -> Self {
        return Self {
            sdk_config: sdk_config.clone(),
            sts: aws_sdk_sts::Client::new(sdk_config),
            organizations: aws_sdk_organizations::Client::new(sdk_config),
            controltower: aws_sdk_controltower::Client::new(sdk_config),
        };
    }

    async fn get_caller_identity(&self) -> Result<CallerIdentity, Error> {
        let output = self
            .sts
            .get_caller_identity()
            .send()
            .await
            .map_err(|error| Error::Credentials(describe_error(&error)))?;

        let account = output
            .account()
            .ok_or_else(|| Error::Credentials(String::from("response is missing the account")))?;

        return Ok(CallerIdentity {
            account: account.to_string(),
            arn: output.arn().unwrap_or_default().to_string(),
        });
    }

    async fn describe_organization(&self) -> Result<String, Error> {
        let output = self
            .organizations
            .describe_organization()
            .send()
            .await
            .map_err(|error| Error::ServiceError(describe_error(&error)))?;

        output
            .organization()
            .and_then(|organization| organization.id())
            .map(String::from)
            .ok_or_else(|| Error::NotFoundError(String::from("Organization")))
    }

    async fn describe_kms_key(&self, key_arn: &str, region: &str) -> Result<KeyDescription, Error> {
        let kms_config = aws_sdk_kms::config::Builder::from(&self.sdk_config)
            .region(Region::new(region.to_string()))
            .build();
        let client = aws_sdk_kms::Client::from_conf(kms_config);

        let output = client
            .describe_key()
            .key_id(key_arn)
            .send()
            .await
            .map_err(|error| Error::ServiceError(describe_error(&error)))?;

        let metadata = output
            .key_metadata()
            .ok_or_else(|| Error::NotFoundError(key_arn.to_string()))?;
        let state: Option<&aws_sdk_kms::types::KeyState> = metadata.key_state().into();

        return Ok(KeyDescription {
            arn: metadata.arn().unwrap_or(key_arn).to_string(),
            state: state.map(|s| s.as_str()).unwrap_or("Unknown").to_string(),
        });
    }

    async fn landing_zone_accounts(&self) -> Result<ControlTowerAccounts, Error> {
        let zones = self
            .controltower
            .list_landing_zones()
            .send()
            .await
            .map_err(|error| Error::ServiceError(describe_error(&error)))?;

        let arn = zones
            .landing_zones()
            .first()
            .and_then(|zone| zone.arn())
            .ok_or_else(|| Error::NotFoundError(String::from("Control Tower landing zone")))?;

        let output = self
            .controltower
            .get_landing_zone()
            .landing_zone_identifier(arn)
            .send()
            .await
            .map_err(|error| Error::ServiceError(describe_error(&error)))?;

        // Required members are plain references in newer SDK releases.
        let detail: Option<&aws_sdk_controltower::types::LandingZoneDetail> =
            output.landing_zone().into();
        let manifest: Option<&Document> = detail.and_then(|d| d.manifest().into());
        let manifest = manifest
            .ok_or_else(|| Error::NotFoundError(String::from("landing zone manifest")))?;

        return Ok(manifest_accounts(manifest));
    }
}

impl AccountApi for Account {
    fn caller_identity(&self) -> BoxFuture<'_, Result<CallerIdentity, Error>> {
        Box::pin(self.get_caller_identity())
    }

    fn organization_id(&self) -> BoxFuture<'_, Result<String, Error>> {
        Box::pin(self.describe_organization())
    }

    fn describe_key<'a>(
        &'a self,
        key_arn: &'a str,
        region: &'a str,
    ) -> BoxFuture<'a, Result<KeyDescription, Error>> {
        Box::pin(self.describe_kms_key(key_arn, region))
    }

    fn control_tower_accounts(&self) -> BoxFuture<'_, Result<ControlTowerAccounts, Error>> {
        Box::pin(self.landing_zone_accounts())
    }
}

/// Reads `centralizedLogging.accountId` and `securityRoles.accountId` from a
/// landing zone manifest.
pub fn manifest_accounts(manifest: &Document) -> ControlTowerAccounts {
    ControlTowerAccounts {
        log_archive: document_str(manifest, &["centralizedLogging", "accountId"]),
        audit: document_str(manifest, &["securityRoles", "accountId"]),
    }
}

fn document_str(document: &Document, path: &[&str]) -> Option<String> {
    let mut current = document;
    for key in path {
        current = match current {
            Document::Object(map) => map.get(*key)?,
            _ => return None,
        };
    }

    match current {
        Document::String(value) => Some(value.clone()),
        _ => None,
    }
}
