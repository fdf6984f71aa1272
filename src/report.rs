use tracing::warn;

use crate::config::{DeploymentTarget, Solution};
use crate::stack::{StackApi, StackEvent};

pub const EVENT_LIMIT: usize = 5;

const UNKNOWN_STATUS: &str = "UNKNOWN";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Success,
    Failure,
}

pub fn classify(status: &str) -> Classification {
    match status {
        "CREATE_COMPLETE" | "UPDATE_COMPLETE" => Classification::Success,
        _ => Classification::Failure,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub stack_name: String,
    pub status: String,
    /// Only fetched for failures.
    pub events: Vec<StackEvent>,
}

impl StatusReport {
    pub fn classification(&self) -> Classification {
        classify(&self.status)
    }
}

/// Looks the stack up once. A failed lookup counts as `UNKNOWN`.
pub async fn status(stacks: &dyn StackApi, stack_name: &str) -> StatusReport {
    let status = match stacks.stack_status(stack_name).await {
        Ok(Some(status)) => status,
        Ok(None) => String::from(UNKNOWN_STATUS),
        Err(error) => {
            warn!(%error, stack = stack_name, "unable to read stack status");
            String::from(UNKNOWN_STATUS)
        }
    };

    let mut events = vec![];
    if classify(&status) == Classification::Failure {
        match stacks.recent_events(stack_name, EVENT_LIMIT).await {
            Ok(recent) => events = recent,
            Err(error) => warn!(%error, stack = stack_name, "unable to read stack events"),
        }
    }

    StatusReport {
        stack_name: stack_name.to_string(),
        status,
        events,
    }
}

pub fn render(report: &StatusReport, solution: &Solution, target: &DeploymentTarget) -> String {
    match report.classification() {
        Classification::Success => render_success(report, solution, target),
        Classification::Failure => render_failure(report, target),
    }
}

fn render_success(report: &StatusReport, solution: &Solution, target: &DeploymentTarget) -> String {
    let mut contents = format!(
        "[OK] Stack {} is {} in {}\n",
        report.stack_name, report.status, target.region
    );

    if !solution.features.is_empty() {
        contents.push_str("\nFeatures implemented:\n");
        for feature in &solution.features {
            contents.push_str(&format!("  [x] {}\n", feature));
        }
    }

    contents.push_str("\nNext steps:\n");
    for command in follow_up_commands(solution, target) {
        contents.push_str(&format!("  {}\n", command));
    }

    return contents;
}

fn render_failure(report: &StatusReport, target: &DeploymentTarget) -> String {
    let mut contents = format!(
        "[FAILED] Stack {} is {} in {}\n",
        report.stack_name, report.status, target.region
    );

    if report.events.is_empty() {
        contents.push_str("\nNo stack events available.\n");
    } else {
        contents.push_str(&format!("\nLast {} stack events:\n", report.events.len()));
        contents.push_str(&events_table(&report.events));
    }

    contents.push_str(&format!(
        "\nInspect all events with:\n  aws cloudformation describe-stack-events --stack-name {} --region {}{}\n",
        target.stack_name,
        target.region,
        profile_flag(target)
    ));

    return contents;
}

fn events_table(events: &[StackEvent]) -> String {
    let headers = ["TIME", "RESOURCE", "STATUS", "REASON"];
    let rows: Vec<[&str; 4]> = events
        .iter()
        .map(|e| {
            [
                e.timestamp.as_str(),
                e.logical_resource_id.as_str(),
                e.resource_status.as_str(),
                e.reason.as_str(),
            ]
        })
        .collect();

    // The reason column is last and left unpadded.
    let mut widths = [0usize; 3];
    for row in rows.iter().chain([&headers]) {
        for (width, cell) in widths.iter_mut().zip(row.iter()) {
            *width = (*width).max(cell.len());
        }
    }

    let mut table = String::new();
    for row in [&headers].into_iter().chain(rows.iter()) {
        table.push_str(&format!(
            "  {:<w0$}  {:<w1$}  {:<w2$}  {}\n",
            row[0],
            row[1],
            row[2],
            row[3],
            w0 = widths[0],
            w1 = widths[1],
            w2 = widths[2]
        ));
    }

    return table;
}

fn profile_flag(target: &DeploymentTarget) -> String {
    match &target.profile {
        Some(profile) => format!(" --profile {}", profile),
        None => String::new(),
    }
}

/// Fixed inspection commands followed by the solution's own, with
/// `{stack}`, `{region}` and `{profile}` filled in.
pub fn follow_up_commands(solution: &Solution, target: &DeploymentTarget) -> Vec<String> {
    let profile = profile_flag(target);
    let mut commands = vec![
        format!(
            "aws cloudformation describe-stacks --stack-name {} --region {}{}",
            target.stack_name, target.region, profile
        ),
        format!(
            "aws cloudformation list-stack-resources --stack-name {} --region {}{}",
            target.stack_name, target.region, profile
        ),
    ];

    for command in &solution.follow_up {
        // An empty profile takes its leading separator with it.
        let command = match target.profile {
            Some(_) => command.replace("{profile}", profile.trim_start()),
            None => command.replace(" {profile}", "").replace("{profile}", ""),
        };
        let command = command
            .replace("{stack}", &target.stack_name)
            .replace("{region}", &target.region);
        commands.push(command.trim_end().to_string());
    }

    return commands;
}
