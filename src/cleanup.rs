use std::fmt;
use std::time::{Duration, Instant};

use aws_sdk_cloudformation::types::{StackSetOperationStatus, StackSetStatus};
use aws_types::SdkConfig;
use futures::future::BoxFuture;
use tracing::{debug, info, warn};

use crate::aws::describe_error;
use crate::stack::{self, StackApi, Stacks};

const NAME_PREFIX: &str = "sra-";
const PARAMETER_PATH: &str = "/sra";
const PARAMETER_BATCH: usize = 10;
const INSTANCE_BATCH: usize = 10;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("Service error ocurred: {0}.")]
    ServiceError(String),

    #[error("Timed out after {0:?} waiting for {1}")]
    Timeout(Duration, String),

    #[error(transparent)]
    Stack(#[from] stack::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StackSummary {
    pub name: String,
    pub status: String,
    /// Creation time, seconds since the epoch.
    pub created: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackInstance {
    pub account: String,
    pub region: String,
}

/// CloudFormation stacks and StackSets of one region.
pub trait StackInventory: Send + Sync {
    /// Root stacks that are not yet deleted.
    fn list_stacks(&self) -> BoxFuture<'_, Result<Vec<StackSummary>, Error>>;

    fn delete_stack<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<(), Error>>;

    /// `None` once the stack is gone.
    fn stack_status<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Option<String>, Error>>;

    /// Names of the active StackSets.
    fn list_stack_sets(&self) -> BoxFuture<'_, Result<Vec<String>, Error>>;

    fn list_stack_instances<'a>(
        &'a self,
        stack_set: &'a str,
    ) -> BoxFuture<'a, Result<Vec<StackInstance>, Error>>;

    /// Returns the operation id.
    fn delete_stack_instances<'a>(
        &'a self,
        stack_set: &'a str,
        region: &'a str,
        accounts: &'a [String],
    ) -> BoxFuture<'a, Result<String, Error>>;

    fn operation_status<'a>(
        &'a self,
        stack_set: &'a str,
        operation_id: &'a str,
    ) -> BoxFuture<'a, Result<String, Error>>;

    fn delete_stack_set<'a>(&'a self, stack_set: &'a str) -> BoxFuture<'a, Result<(), Error>>;
}

/// SSM parameters of one region.
pub trait ParameterInventory: Send + Sync {
    fn list_parameters<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<Vec<String>, Error>>;

    /// Returns the names that could not be deleted.
    fn delete_parameters<'a>(
        &'a self,
        names: &'a [String],
    ) -> BoxFuture<'a, Result<Vec<String>, Error>>;
}

pub struct CloudFormationInventory {
    client: aws_sdk_cloudformation::Client,
    stacks: Stacks,
}

impl CloudFormationInventory {
    pub fn new(sdk_config: &SdkConfig) -> Self {
        Self {
            client: aws_sdk_cloudformation::Client::new(sdk_config),
            stacks: Stacks::new(sdk_config),
        }
    }

    async fn stacks(&self) -> Result<Vec<StackSummary>, Error> {
        let mut summaries = vec![];
        let mut next_token: Option<String> = None;
        loop {
            let output = self
                .client
                .list_stacks()
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|err| Error::ServiceError(describe_error(&err)))?;

            for summary in output.stack_summaries() {
                // Nested stacks go away with their root.
                if summary.parent_id().is_some() {
                    continue;
                }
                let name: Option<&str> = summary.stack_name().into();
                let status: Option<&aws_sdk_cloudformation::types::StackStatus> =
                    summary.stack_status().into();
                let created: Option<&aws_sdk_cloudformation::primitives::DateTime> =
                    summary.creation_time().into();
                let status = status.map(|s| s.as_str()).unwrap_or("UNKNOWN");
                if status == "DELETE_COMPLETE" {
                    continue;
                }
                if let Some(name) = name {
                    summaries.push(StackSummary {
                        name: name.to_string(),
                        status: status.to_string(),
                        created: created.map(|t| t.secs()).unwrap_or_default(),
                    });
                }
            }

            next_token = output.next_token().map(String::from);
            if next_token.is_none() {
                break;
            }
        }

        Ok(summaries)
    }

    async fn remove_stack(&self, name: &str) -> Result<(), Error> {
        self.client
            .delete_stack()
            .stack_name(name)
            .send()
            .await
            .map_err(|err| Error::ServiceError(describe_error(&err)))?;

        Ok(())
    }

    async fn status(&self, name: &str) -> Result<Option<String>, Error> {
        Ok(self.stacks.stack_status(name).await?)
    }

    async fn stack_sets(&self) -> Result<Vec<String>, Error> {
        let mut names = vec![];
        let mut next_token: Option<String> = None;
        loop {
            let output = self
                .client
                .list_stack_sets()
                .status(StackSetStatus::Active)
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|err| Error::ServiceError(describe_error(&err)))?;

            names.extend(
                output
                    .summaries()
                    .iter()
                    .filter_map(|s| s.stack_set_name().map(String::from)),
            );

            next_token = output.next_token().map(String::from);
            if next_token.is_none() {
                break;
            }
        }

        Ok(names)
    }

    async fn instances(&self, stack_set: &str) -> Result<Vec<StackInstance>, Error> {
        let mut instances = vec![];
        let mut next_token: Option<String> = None;
        loop {
            let output = self
                .client
                .list_stack_instances()
                .stack_set_name(stack_set)
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|err| Error::ServiceError(describe_error(&err)))?;

            for instance in output.summaries() {
                if let (Some(account), Some(region)) = (instance.account(), instance.region()) {
                    instances.push(StackInstance {
                        account: account.to_string(),
                        region: region.to_string(),
                    });
                }
            }

            next_token = output.next_token().map(String::from);
            if next_token.is_none() {
                break;
            }
        }

        Ok(instances)
    }

    async fn remove_instances(
        &self,
        stack_set: &str,
        region: &str,
        accounts: &[String],
    ) -> Result<String, Error> {
        let output = self
            .client
            .delete_stack_instances()
            .stack_set_name(stack_set)
            .set_accounts(Some(accounts.to_vec()))
            .regions(region)
            .retain_stacks(false)
            .send()
            .await
            .map_err(|err| Error::ServiceError(describe_error(&err)))?;

        Ok(output.operation_id().unwrap_or_default().to_string())
    }

    async fn operation(&self, stack_set: &str, operation_id: &str) -> Result<String, Error> {
        let output = self
            .client
            .describe_stack_set_operation()
            .stack_set_name(stack_set)
            .operation_id(operation_id)
            .send()
            .await
            .map_err(|err| Error::ServiceError(describe_error(&err)))?;

        let status: Option<&StackSetOperationStatus> = output
            .stack_set_operation()
            .and_then(|operation| operation.status());

        Ok(status.map(|s| s.as_str()).unwrap_or("UNKNOWN").to_string())
    }

    async fn remove_stack_set(&self, stack_set: &str) -> Result<(), Error> {
        self.client
            .delete_stack_set()
            .stack_set_name(stack_set)
            .send()
            .await
            .map_err(|err| Error::ServiceError(describe_error(&err)))?;

        Ok(())
    }
}

impl StackInventory for CloudFormationInventory {
    fn list_stacks(&self) -> BoxFuture<'_, Result<Vec<StackSummary>, Error>> {
        Box::pin(self.stacks())
    }

    fn delete_stack<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(self.remove_stack(name))
    }

    fn stack_status<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Option<String>, Error>> {
        Box::pin(self.status(name))
    }

    fn list_stack_sets(&self) -> BoxFuture<'_, Result<Vec<String>, Error>> {
        Box::pin(self.stack_sets())
    }

    fn list_stack_instances<'a>(
        &'a self,
        stack_set: &'a str,
    ) -> BoxFuture<'a, Result<Vec<StackInstance>, Error>> {
        Box::pin(self.instances(stack_set))
    }

    fn delete_stack_instances<'a>(
        &'a self,
        stack_set: &'a str,
        region: &'a str,
        accounts: &'a [String],
    ) -> BoxFuture<'a, Result<String, Error>> {
        Box::pin(self.remove_instances(stack_set, region, accounts))
    }

    fn operation_status<'a>(
        &'a self,
        stack_set: &'a str,
        operation_id: &'a str,
    ) -> BoxFuture<'a, Result<String, Error>> {
        Box::pin(self.operation(stack_set, operation_id))
    }

    fn delete_stack_set<'a>(&'a self, stack_set: &'a str) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(self.remove_stack_set(stack_set))
    }
}

pub struct SsmInventory {
    client: aws_sdk_ssm::Client,
}

impl SsmInventory {
    pub fn new(sdk_config: &SdkConfig) -> Self {
        Self {
            client: aws_sdk_ssm::Client::new(sdk_config),
        }
    }

    async fn parameters(&self, path: &str) -> Result<Vec<String>, Error> {
        let mut names = vec![];
        let mut next_token: Option<String> = None;
        loop {
            let output = self
                .client
                .get_parameters_by_path()
                .path(path)
                .recursive(true)
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|err| Error::ServiceError(describe_error(&err)))?;

            names.extend(
                output
                    .parameters()
                    .iter()
                    .filter_map(|p| p.name().map(String::from)),
            );

            next_token = output.next_token().map(String::from);
            if next_token.is_none() {
                break;
            }
        }

        Ok(names)
    }

    async fn remove(&self, names: &[String]) -> Result<Vec<String>, Error> {
        let output = self
            .client
            .delete_parameters()
            .set_names(Some(names.to_vec()))
            .send()
            .await
            .map_err(|err| Error::ServiceError(describe_error(&err)))?;

        Ok(output.invalid_parameters().to_vec())
    }
}

impl ParameterInventory for SsmInventory {
    fn list_parameters<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<Vec<String>, Error>> {
        Box::pin(self.parameters(path))
    }

    fn delete_parameters<'a>(
        &'a self,
        names: &'a [String],
    ) -> BoxFuture<'a, Result<Vec<String>, Error>> {
        Box::pin(self.remove(names))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Stack,
    StackSet,
    Parameter,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ResourceKind::Stack => "CloudFormation stacks",
            ResourceKind::StackSet => "CloudFormation StackSets",
            ResourceKind::Parameter => "SSM parameters",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Found,
    Deleted,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub region: String,
    pub kind: ResourceKind,
    pub name: String,
    pub action: Action,
}

#[derive(Debug, Clone)]
pub struct CleanupOptions {
    pub delete: bool,
    pub poll_interval: Duration,
    pub max_wait: Duration,
}

impl Default for CleanupOptions {
    fn default() -> Self {
        Self {
            delete: false,
            poll_interval: Duration::from_secs(10),
            max_wait: Duration::from_secs(10 * 60),
        }
    }
}

pub fn is_sra_name(name: &str) -> bool {
    name.to_ascii_lowercase().starts_with(NAME_PREFIX)
}

/// Finds the SRA stacks, StackSets and `/sra` parameters of one region and,
/// with `options.delete`, removes them in that order. Stacks go newest first
/// so dependants are removed before what they import. Failures are recorded
/// and the scan moves on.
pub async fn clean_region(
    stacks: &dyn StackInventory,
    parameters: &dyn ParameterInventory,
    region: &str,
    options: &CleanupOptions,
) -> Vec<Entry> {
    let mut entries = vec![];
    let entry = |kind: ResourceKind, name: &str, action: Action| Entry {
        region: region.to_string(),
        kind,
        name: name.to_string(),
        action,
    };

    match stacks.list_stacks().await {
        Ok(found) => {
            let mut found: Vec<StackSummary> =
                found.into_iter().filter(|s| is_sra_name(&s.name)).collect();
            found.sort_by(|a, b| b.created.cmp(&a.created).then_with(|| a.name.cmp(&b.name)));
            info!(region, count = found.len(), "SRA stacks found");

            for summary in found {
                let action = match options.delete {
                    true => delete_stack(stacks, &summary.name, options).await,
                    false => Action::Found,
                };
                entries.push(entry(ResourceKind::Stack, &summary.name, action));
            }
        }
        Err(error) => {
            warn!(%error, region, "unable to list stacks");
            entries.push(entry(ResourceKind::Stack, "*", Action::Failed(error.to_string())));
        }
    }

    match stacks.list_stack_sets().await {
        Ok(found) => {
            let found: Vec<String> = found.into_iter().filter(|s| is_sra_name(s)).collect();
            info!(region, count = found.len(), "SRA StackSets found");

            for name in found {
                let action = match options.delete {
                    true => delete_stack_set(stacks, &name, options).await,
                    false => Action::Found,
                };
                entries.push(entry(ResourceKind::StackSet, &name, action));
            }
        }
        Err(error) => {
            warn!(%error, region, "unable to list StackSets");
            entries.push(entry(ResourceKind::StackSet, "*", Action::Failed(error.to_string())));
        }
    }

    match parameters.list_parameters(PARAMETER_PATH).await {
        Ok(mut found) => {
            found.sort();
            info!(region, count = found.len(), "SRA parameters found");

            if !options.delete {
                entries.extend(
                    found
                        .iter()
                        .map(|name| entry(ResourceKind::Parameter, name, Action::Found)),
                );
            } else {
                for batch in found.chunks(PARAMETER_BATCH) {
                    match parameters.delete_parameters(batch).await {
                        Ok(invalid) => {
                            for name in batch {
                                let action = match invalid.contains(name) {
                                    true => Action::Failed(String::from("invalid parameter")),
                                    false => Action::Deleted,
                                };
                                entries.push(entry(ResourceKind::Parameter, name, action));
                            }
                        }
                        Err(error) => {
                            warn!(%error, region, "unable to delete parameters");
                            for name in batch {
                                entries.push(entry(
                                    ResourceKind::Parameter,
                                    name,
                                    Action::Failed(error.to_string()),
                                ));
                            }
                        }
                    }
                }
            }
        }
        Err(error) => {
            warn!(%error, region, "unable to list parameters");
            entries.push(entry(ResourceKind::Parameter, "*", Action::Failed(error.to_string())));
        }
    }

    entries
}

async fn delete_stack(stacks: &dyn StackInventory, name: &str, options: &CleanupOptions) -> Action {
    info!(stack = name, "deleting stack");
    if let Err(error) = stacks.delete_stack(name).await {
        return Action::Failed(error.to_string());
    }

    let started = Instant::now();
    loop {
        match stacks.stack_status(name).await {
            Ok(None) => return Action::Deleted,
            Ok(Some(status)) if status == "DELETE_COMPLETE" => return Action::Deleted,
            Ok(Some(status)) if status == "DELETE_FAILED" => {
                return Action::Failed(String::from("DELETE_FAILED, needs manual deletion"))
            }
            Ok(Some(status)) => debug!(stack = name, %status, "waiting for deletion"),
            Err(error) => return Action::Failed(error.to_string()),
        }
        if let Err(error) = pause(started, options, name).await {
            return Action::Failed(error.to_string());
        }
    }
}

/// Instances first, batched per region, then the StackSet itself.
async fn delete_stack_set(
    stacks: &dyn StackInventory,
    name: &str,
    options: &CleanupOptions,
) -> Action {
    info!(stack_set = name, "deleting StackSet");
    let instances = match stacks.list_stack_instances(name).await {
        Ok(instances) => instances,
        Err(error) => return Action::Failed(error.to_string()),
    };

    let mut regions: Vec<&str> = instances.iter().map(|i| i.region.as_str()).collect();
    regions.sort();
    regions.dedup();

    for region in regions {
        let accounts: Vec<String> = instances
            .iter()
            .filter(|i| i.region == region)
            .map(|i| i.account.clone())
            .collect();

        for batch in accounts.chunks(INSTANCE_BATCH) {
            let operation_id = match stacks.delete_stack_instances(name, region, batch).await {
                Ok(operation_id) => operation_id,
                Err(error) => return Action::Failed(error.to_string()),
            };
            if let Err(error) = wait_for_operation(stacks, name, &operation_id, options).await {
                return Action::Failed(error.to_string());
            }
        }
    }

    match stacks.delete_stack_set(name).await {
        Ok(()) => Action::Deleted,
        Err(error) => Action::Failed(error.to_string()),
    }
}

async fn wait_for_operation(
    stacks: &dyn StackInventory,
    stack_set: &str,
    operation_id: &str,
    options: &CleanupOptions,
) -> Result<(), Error> {
    let started = Instant::now();
    loop {
        let status = stacks.operation_status(stack_set, operation_id).await?;
        match status.as_str() {
            "SUCCEEDED" => return Ok(()),
            "FAILED" | "STOPPED" => {
                return Err(Error::ServiceError(format!(
                    "StackSet operation {} ended {}",
                    operation_id, status
                )))
            }
            _ => debug!(stack_set, operation_id, %status, "waiting for StackSet operation"),
        }
        pause(started, options, operation_id).await?;
    }
}

async fn pause(started: Instant, options: &CleanupOptions, what: &str) -> Result<(), Error> {
    if started.elapsed() >= options.max_wait {
        return Err(Error::Timeout(options.max_wait, what.to_string()));
    }
    tokio::time::sleep(options.poll_interval).await;
    Ok(())
}

/// Everything found in one account, across the scanned regions.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountReport {
    pub account: String,
    pub profile: Option<String>,
    /// Set when the account could not be reached at all.
    pub error: Option<String>,
    pub entries: Vec<Entry>,
}

impl AccountReport {
    pub fn failures(&self) -> usize {
        let failed = self
            .entries
            .iter()
            .filter(|e| matches!(e.action, Action::Failed(_)))
            .count();
        failed + usize::from(self.error.is_some())
    }
}

pub fn render(reports: &[AccountReport], delete: bool) -> String {
    let mut contents = String::new();

    for report in reports {
        let profile = report.profile.as_deref().unwrap_or("default");
        contents.push_str(&format!("Account {} (profile {})\n", report.account, profile));
        if let Some(error) = &report.error {
            contents.push_str(&format!("  [FAILED] {}\n", error));
            continue;
        }

        let mut regions: Vec<&str> = report.entries.iter().map(|e| e.region.as_str()).collect();
        regions.dedup();
        if regions.is_empty() {
            contents.push_str("  nothing found\n");
        }

        for region in regions {
            contents.push_str(&format!("  {}:\n", region));
            for kind in [ResourceKind::Stack, ResourceKind::StackSet, ResourceKind::Parameter] {
                let entries: Vec<&Entry> = report
                    .entries
                    .iter()
                    .filter(|e| e.region == region && e.kind == kind)
                    .collect();
                if entries.is_empty() {
                    continue;
                }
                let count = |action: fn(&Action) -> bool| {
                    entries.iter().filter(|e| action(&e.action)).count()
                };
                let failed = count(|a| matches!(a, Action::Failed(_)));
                match delete {
                    true => contents.push_str(&format!(
                        "    {}: {} deleted, {} failed\n",
                        kind,
                        count(|a| *a == Action::Deleted),
                        failed
                    )),
                    false => contents.push_str(&format!(
                        "    {}: {} found\n",
                        kind,
                        count(|a| *a == Action::Found)
                    )),
                }
                for entry in &entries {
                    match &entry.action {
                        Action::Failed(reason) => contents
                            .push_str(&format!("      [FAILED] {}: {}\n", entry.name, reason)),
                        _ => contents.push_str(&format!("      - {}\n", entry.name)),
                    }
                }
            }
        }
    }

    let failures: usize = reports.iter().map(|r| r.failures()).sum();
    if failures > 0 {
        contents.push_str(&format!("\n{} operations failed\n", failures));
    }
    if !delete {
        contents.push_str("\nDry run, nothing was deleted. Run again with --delete to remove these resources.\n");
    }

    return contents;
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    struct FakeInventory {
        stacks: Vec<StackSummary>,
        stack_sets: Vec<String>,
        instances: HashMap<String, Vec<StackInstance>>,
        parameters: Vec<String>,
        delete_failed: Vec<String>,
        list_error: bool,
        calls: Mutex<Vec<String>>,
    }

    impl FakeInventory {
        fn new() -> Self {
            Self {
                stacks: vec![
                    summary("sra-common-prerequisites-main-ssm", 100),
                    summary("sra-config-management-main-ssm", 300),
                    summary("SRA-github-oidc-main-ssm", 200),
                    summary("workload-app", 400),
                ],
                stack_sets: vec![
                    String::from("sra-config-management"),
                    String::from("AWSControlTowerBP-BASELINE-CONFIG"),
                ],
                instances: HashMap::from([(
                    String::from("sra-config-management"),
                    vec![
                        instance("111111111111", "us-east-1"),
                        instance("222222222222", "us-east-1"),
                        instance("111111111111", "us-west-2"),
                    ],
                )]),
                parameters: vec![
                    String::from("/sra/staging-s3-bucket-name"),
                    String::from("/sra/control-tower/root-organizational-unit-id"),
                ],
                delete_failed: vec![],
                list_error: false,
                calls: Mutex::new(vec![]),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    fn summary(name: &str, created: i64) -> StackSummary {
        StackSummary {
            name: name.to_string(),
            status: String::from("CREATE_COMPLETE"),
            created,
        }
    }

    fn instance(account: &str, region: &str) -> StackInstance {
        StackInstance {
            account: account.to_string(),
            region: region.to_string(),
        }
    }

    impl StackInventory for FakeInventory {
        fn list_stacks(&self) -> BoxFuture<'_, Result<Vec<StackSummary>, Error>> {
            Box::pin(async move {
                if self.list_error {
                    return Err(Error::ServiceError(String::from("AccessDenied")));
                }
                Ok(self.stacks.clone())
            })
        }

        fn delete_stack<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<(), Error>> {
            Box::pin(async move {
                self.record(format!("delete_stack {}", name));
                Ok(())
            })
        }

        fn stack_status<'a>(
            &'a self,
            name: &'a str,
        ) -> BoxFuture<'a, Result<Option<String>, Error>> {
            Box::pin(async move {
                if self.delete_failed.iter().any(|n| n == name) {
                    return Ok(Some(String::from("DELETE_FAILED")));
                }
                Ok(None)
            })
        }

        fn list_stack_sets(&self) -> BoxFuture<'_, Result<Vec<String>, Error>> {
            Box::pin(async move { Ok(self.stack_sets.clone()) })
        }

        fn list_stack_instances<'a>(
            &'a self,
            stack_set: &'a str,
        ) -> BoxFuture<'a, Result<Vec<StackInstance>, Error>> {
            Box::pin(async move { Ok(self.instances.get(stack_set).cloned().unwrap_or_default()) })
        }

        fn delete_stack_instances<'a>(
            &'a self,
            stack_set: &'a str,
            region: &'a str,
            accounts: &'a [String],
        ) -> BoxFuture<'a, Result<String, Error>> {
            Box::pin(async move {
                self.record(format!(
                    "delete_stack_instances {} {} {}",
                    stack_set,
                    region,
                    accounts.join(",")
                ));
                Ok(format!("op-{}", region))
            })
        }

        fn operation_status<'a>(
            &'a self,
            _stack_set: &'a str,
            _operation_id: &'a str,
        ) -> BoxFuture<'a, Result<String, Error>> {
            Box::pin(async move { Ok(String::from("SUCCEEDED")) })
        }

        fn delete_stack_set<'a>(&'a self, stack_set: &'a str) -> BoxFuture<'a, Result<(), Error>> {
            Box::pin(async move {
                self.record(format!("delete_stack_set {}", stack_set));
                Ok(())
            })
        }
    }

    impl ParameterInventory for FakeInventory {
        fn list_parameters<'a>(
            &'a self,
            _path: &'a str,
        ) -> BoxFuture<'a, Result<Vec<String>, Error>> {
            Box::pin(async move { Ok(self.parameters.clone()) })
        }

        fn delete_parameters<'a>(
            &'a self,
            names: &'a [String],
        ) -> BoxFuture<'a, Result<Vec<String>, Error>> {
            Box::pin(async move {
                self.record(format!("delete_parameters {}", names.len()));
                Ok(vec![])
            })
        }
    }

    fn options(delete: bool) -> CleanupOptions {
        CleanupOptions {
            delete,
            poll_interval: Duration::ZERO,
            max_wait: Duration::from_secs(5),
        }
    }

    fn names(entries: &[Entry], kind: ResourceKind) -> Vec<&str> {
        entries
            .iter()
            .filter(|e| e.kind == kind)
            .map(|e| e.name.as_str())
            .collect()
    }

    #[test]
    fn sra_names() {
        assert!(is_sra_name("sra-config-management-main-ssm"));
        assert!(is_sra_name("SRA-github-oidc"));
        assert!(!is_sra_name("StackSet-sra-config-management-1234"));
        assert!(!is_sra_name("workload-app"));
    }

    #[tokio::test]
    async fn dry_run_deletes_nothing() {
        let inventory = FakeInventory::new();

        let entries = clean_region(&inventory, &inventory, "us-east-1", &options(false)).await;

        assert!(inventory.calls().is_empty());
        assert!(entries.iter().all(|e| e.action == Action::Found));
        assert_eq!(
            vec![
                "sra-config-management-main-ssm",
                "SRA-github-oidc-main-ssm",
                "sra-common-prerequisites-main-ssm"
            ],
            names(&entries, ResourceKind::Stack)
        );
        assert_eq!(vec!["sra-config-management"], names(&entries, ResourceKind::StackSet));
        assert_eq!(2, names(&entries, ResourceKind::Parameter).len());
    }

    #[tokio::test]
    async fn delete_removes_newest_stacks_first() {
        let inventory = FakeInventory::new();

        let entries = clean_region(&inventory, &inventory, "us-east-1", &options(true)).await;

        assert!(entries.iter().all(|e| e.action == Action::Deleted));
        assert_eq!(
            vec![
                "delete_stack sra-config-management-main-ssm",
                "delete_stack SRA-github-oidc-main-ssm",
                "delete_stack sra-common-prerequisites-main-ssm",
                "delete_stack_instances sra-config-management us-east-1 111111111111,222222222222",
                "delete_stack_instances sra-config-management us-west-2 111111111111",
                "delete_stack_set sra-config-management",
                "delete_parameters 2",
            ],
            inventory.calls()
        );
    }

    #[tokio::test]
    async fn failures_are_recorded_and_the_scan_continues() {
        let mut inventory = FakeInventory::new();
        inventory.delete_failed = vec![String::from("sra-config-management-main-ssm")];

        let entries = clean_region(&inventory, &inventory, "us-east-1", &options(true)).await;

        let failed: Vec<&Entry> = entries
            .iter()
            .filter(|e| matches!(e.action, Action::Failed(_)))
            .collect();
        assert_eq!(1, failed.len());
        assert_eq!("sra-config-management-main-ssm", failed[0].name);
        assert!(inventory
            .calls()
            .contains(&String::from("delete_stack sra-common-prerequisites-main-ssm")));
    }

    #[tokio::test]
    async fn listing_failure_is_reported() {
        let mut inventory = FakeInventory::new();
        inventory.list_error = true;

        let entries = clean_region(&inventory, &inventory, "us-west-2", &options(false)).await;
        let report = AccountReport {
            account: String::from("111111111111"),
            profile: None,
            error: None,
            entries,
        };

        assert_eq!(1, report.failures());
        let rendered = render(&[report], false);
        assert!(rendered.contains("[FAILED] *: Service error ocurred: AccessDenied."));
        assert!(rendered.contains("Run again with --delete"));
    }

    #[tokio::test]
    async fn summary_per_account_and_region() {
        let inventory = FakeInventory::new();
        let entries = clean_region(&inventory, &inventory, "us-east-1", &options(true)).await;
        let reports = vec![
            AccountReport {
                account: String::from("111111111111"),
                profile: Some(String::from("sra-dev-root")),
                error: None,
                entries,
            },
            AccountReport {
                account: String::from("unknown"),
                profile: Some(String::from("sra-dev-audit")),
                error: Some(String::from("expired token")),
                entries: vec![],
            },
        ];

        let rendered = render(&reports, true);

        assert!(rendered.contains("Account 111111111111 (profile sra-dev-root)\n  us-east-1:\n"));
        assert!(rendered.contains("    CloudFormation stacks: 3 deleted, 0 failed\n"));
        assert!(rendered.contains("    SSM parameters: 2 deleted, 0 failed\n"));
        assert!(rendered.contains("  [FAILED] expired token\n"));
        assert!(rendered.contains("1 operations failed"));
        assert!(!rendered.contains("Dry run"));
    }
}
