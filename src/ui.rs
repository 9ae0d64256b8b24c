//! Terminal output: the acquisition spinner and styled results.
//!
//! Uses `indicatif` for the spinner and `console` for colors.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::error::ServiceError;
use crate::lifecycle::{ServiceJob, ServiceStatus, VisitSummary};
use crate::location::{LocationError, PermissionState, Position};
use crate::notify::NotificationRecord;

/// Spinner shown while the sensor is being read.
pub struct AcquisitionProgress {
    pb: ProgressBar,
    green: Style,
    red: Style,
}

impl AcquisitionProgress {
    pub fn start(message: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        let style = ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg} {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        pb.set_style(style);
        pb.set_message(message.to_string());
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
        }
    }

    pub fn succeed(&self, message: &str) {
        self.pb.finish_and_clear();
        println!("  {} {message}", self.green.apply_to("✓"));
    }

    pub fn fail(&self) {
        self.pb.finish_and_clear();
        eprintln!("  {} location not acquired", self.red.apply_to("✗"));
    }
}

fn status_style(status: ServiceStatus) -> Style {
    match status {
        ServiceStatus::Pending => Style::new().yellow(),
        ServiceStatus::InProgress => Style::new().cyan().bold(),
        ServiceStatus::Completed => Style::new().green().bold(),
        ServiceStatus::Cancelled => Style::new().red(),
    }
}

pub fn format_position(position: &Position) -> String {
    format!(
        "{:.6}, {:.6} (±{:.0} m, {})",
        position.latitude(),
        position.longitude(),
        position.accuracy(),
        position.device().name
    )
}

/// One line per job, for `list`.
pub fn print_job_line(job: &ServiceJob) {
    let status = job.status();
    println!(
        "{:<12} {:<12} {:<12} {}",
        job.id,
        status_style(status).apply_to(status),
        job.technician().unwrap_or("-"),
        job.client.as_deref().unwrap_or("")
    );
}

pub fn print_job(job: &ServiceJob) {
    let dim = Style::new().dim();
    let status = job.status();
    println!(
        "{} {}",
        Style::new().bold().apply_to(&job.id),
        status_style(status).apply_to(status)
    );
    for (label, value) in [
        ("client", job.client.as_deref()),
        ("address", job.address.as_deref()),
        ("description", job.description.as_deref()),
        ("technician", job.technician()),
        ("cancel reason", job.cancellation_reason()),
    ] {
        if let Some(value) = value {
            println!("  {:<14} {value}", dim.apply_to(label));
        }
    }
    if let Some(started) = job.started() {
        let at = started.at.format("%Y-%m-%d %H:%M");
        match &started.position {
            Some(p) => println!("  {:<14} {at} at {}", dim.apply_to("started"), format_position(p)),
            None => println!("  {:<14} {at}", dim.apply_to("started")),
        }
    }
    if let Some(closed) = job.closed() {
        let at = closed.at.format("%Y-%m-%d %H:%M");
        match &closed.position {
            Some(p) => println!("  {:<14} {at} at {}", dim.apply_to("closed"), format_position(p)),
            None => println!("  {:<14} {at}", dim.apply_to("closed")),
        }
    }
}

/// Prints the visit summary as pretty JSON.
pub fn print_summary(summary: &VisitSummary) {
    println!();
    println!(
        "{}",
        status_style(summary.status).apply_to("─── Visit Summary ───")
    );
    println!(
        "{}",
        serde_json::to_string_pretty(summary).unwrap_or_default()
    );
}

pub fn print_permission(state: PermissionState) {
    let style = match state {
        PermissionState::Granted => Style::new().green(),
        PermissionState::Denied => Style::new().red(),
        PermissionState::Prompt | PermissionState::Unknown => Style::new().yellow(),
    };
    println!("  location permission: {}", style.apply_to(state));
}

pub fn print_inbox(records: &[NotificationRecord]) {
    if records.is_empty() {
        println!("  no notifications");
        return;
    }
    let dim = Style::new().dim();
    for record in records {
        println!(
            "  {} {:<14} {}",
            dim.apply_to(record.sent_at.format("%Y-%m-%d %H:%M:%S")),
            record.target.to_string(),
            record.message
        );
    }
}

/// Short message first, remediation underneath.
pub fn print_error(err: &ServiceError) {
    let red = Style::new().red().bold();
    eprintln!("  {} {}", red.apply_to("✗"), err.user_message());
    if let Some(hint) = err.remediation() {
        eprintln!("    {}", Style::new().dim().apply_to(hint));
    }
}

pub fn print_location_error(err: &LocationError) {
    let red = Style::new().red().bold();
    eprintln!("  {} {}", red.apply_to("✗"), err.user_message());
    eprintln!("    {}", Style::new().dim().apply_to(err.remediation()));
}
