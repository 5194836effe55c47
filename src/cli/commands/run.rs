//! Run command - publish locally and test every example

use crate::cli::args::RunArgs;
use crate::config::Config;
use crate::error::{ShipcheckError, ShipcheckResult};
use crate::example::{ExampleOutcome, ExampleReport};
use crate::pipeline::{Pipeline, RunOptions, RunSummary};
use crate::ui::{self, format_duration, UiContext};
use tokio::fs;
use tracing::debug;

/// Execute the run command
pub async fn execute(
    args: RunArgs,
    config: Config,
    ctx: &UiContext,
    show_output: bool,
) -> ShipcheckResult<()> {
    let options = RunOptions {
        only: args.only,
        skip_publish: args.skip_publish,
        no_cache: args.no_cache,
        port: args.port,
        fail_fast: args.fail_fast,
        keep_workspace: args.keep_workspace,
        show_output,
    };
    debug!("Run options: {:?}", options);

    ui::intro(ctx, "shipcheck run");
    let summary = Pipeline::new(config, options, ctx.clone()).run().await?;

    print_reports(ctx, &summary);

    if let Some(ref path) = args.report {
        let json = serde_json::to_string_pretty(&summary)?;
        fs::write(path, json).await.map_err(|e| {
            ShipcheckError::io(format!("writing report to {}", path.display()), e)
        })?;
        ui::remark(ctx, &format!("Report written to {}", path.display()));
    }

    let total = summary.reports.len();
    if summary.success() {
        ui::outro_success(
            ctx,
            &format!("{} of {} examples passed", summary.passed(), total),
        );
        Ok(())
    } else {
        ui::outro_error(ctx, &format!("{} of {} examples failed", summary.failed(), total));
        Err(ShipcheckError::User(format!(
            "{} of {} examples failed",
            summary.failed(),
            total
        )))
    }
}

fn print_reports(ctx: &UiContext, summary: &RunSummary) {
    if let Some(ref version) = summary.version {
        ui::key_value(ctx, "Version", version);
    }
    ui::key_value(ctx, "Run", &summary.run_id.to_string());
    ui::key_value(ctx, "Elapsed", &format_duration(summary.elapsed));

    if summary.reports.is_empty() {
        return;
    }

    ui::section(ctx, "Examples");
    for report in &summary.reports {
        print_report(ctx, report);
    }
}

/// One printed line of an example's result
#[derive(Debug, PartialEq, Eq)]
enum ReportLine {
    Ok { label: String, detail: String },
    Error { label: String, detail: String },
    Skipped(String),
}

fn report_lines(report: &ExampleReport) -> Vec<ReportLine> {
    let mut lines = Vec::new();

    match report.outcome {
        ExampleOutcome::Passed if report.teardown_error.is_none() => {
            let cache = report
                .cache
                .map(|c| format!("cache {}", c))
                .unwrap_or_else(|| "no install".to_string());
            lines.push(ReportLine::Ok {
                label: report.name.clone(),
                detail: format!("{}, {}", format_duration(report.elapsed), cache),
            });
        }
        ExampleOutcome::Passed => {}
        ExampleOutcome::Failed { phase, ref error } => lines.push(ReportLine::Error {
            label: format!("{} ({})", report.name, phase),
            detail: first_line(error).to_string(),
        }),
        ExampleOutcome::Skipped => lines.push(ReportLine::Skipped(report.name.clone())),
    }

    if let Some(ref teardown) = report.teardown_error {
        lines.push(ReportLine::Error {
            label: format!("{} teardown", report.name),
            detail: teardown.clone(),
        });
    }
    lines
}

fn print_report(ctx: &UiContext, report: &ExampleReport) {
    for line in report_lines(report) {
        match line {
            ReportLine::Ok { label, detail } => ui::step_ok_detail(ctx, &label, &detail),
            ReportLine::Error { label, detail } => ui::step_error_detail(ctx, &label, &detail),
            ReportLine::Skipped(name) => ui::remark(ctx, &format!("{} skipped", name)),
        }
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or(text)
}
