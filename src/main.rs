use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;

use fieldvisit::cli::{Cli, Command};
use fieldvisit::config::FieldConfig;
use fieldvisit::error::ServiceError;
use fieldvisit::lifecycle::{ProofBundle, Role, ServiceJob, ServiceLifecycle, VisitSummary};
use fieldvisit::location::{
    DeviceProfile, LocationAcquirer, PermissionNegotiator, PermissionState, ReplaySensor,
};
use fieldvisit::notify::{DedupNotifier, NotifyTarget, OutboxNotifier};
use fieldvisit::store::JsonFileStore;
use fieldvisit::{logging, ui};

type Lifecycle =
    ServiceLifecycle<ReplaySensor, JsonFileStore, DedupNotifier<OutboxNotifier<JsonFileStore>>>;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = FieldConfig::load()?;
    let user_agent = cli.user_agent.clone().unwrap_or(config.user_agent.clone());
    let device = DeviceProfile::detect(&user_agent);
    tracing::debug!(family = %device.family, mobile = device.is_mobile, "device detected");

    let sensor = match (cli.fix, &cli.fixes) {
        (Some(reading), _) => ReplaySensor::fixed(reading).with_permission(PermissionState::Granted),
        (None, Some(path)) => ReplaySensor::from_file(path)
            .with_context(|| format!("loading fixes from {}", path.display()))?,
        (None, None) => ReplaySensor::unsupported(),
    };

    let store = JsonFileStore::new(&config.data_dir)
        .with_context(|| format!("opening {}", config.data_dir.display()))?;
    let outbox = OutboxNotifier::new(JsonFileStore::new(&config.data_dir)?);
    let notifier = DedupNotifier::with_window(outbox, config.dedup_window());

    let acquirer = LocationAcquirer::new(sensor, device, config.acquisition_settings());
    let lifecycle = ServiceLifecycle::new(acquirer, store, notifier)
        .with_position_mode(config.lifecycle.position_mode);

    let caller = cli.caller();
    let outcome = match cli.command {
        Command::Create {
            id,
            client,
            address,
            description,
            technician,
        } => {
            let mut job = ServiceJob::new(id);
            job.client = client;
            job.address = address;
            job.description = description;
            let created = lifecycle.create(job);
            match (created, technician) {
                (Ok(job), Some(technician)) => lifecycle.assign(&job.id, &technician),
                (created, _) => created,
            }
        }
        Command::Assign { id, technician } => lifecycle.assign(&id, &technician),
        Command::Unassign { id } => lifecycle.unassign(&id),
        Command::Start { id } => {
            ui::print_permission(lifecycle.permission_hint().await);
            let progress = ui::AcquisitionProgress::start("Acquiring position to start...");
            let result = lifecycle.start(&id, &caller).await;
            finish_progress(&progress, &result, "Checked in");
            result
        }
        Command::Finish {
            id,
            photo,
            client_signature,
            technician_signature,
        } => {
            let proof = ProofBundle {
                photo: proof_reference(&photo)?,
                client_signature: optional_proof(client_signature.as_deref())?,
                technician_signature: optional_proof(technician_signature.as_deref())?,
            };
            ui::print_permission(lifecycle.permission_hint().await);
            let progress = ui::AcquisitionProgress::start("Acquiring position to finish...");
            let result = lifecycle.finish(&id, &caller, &proof).await;
            finish_progress(&progress, &result, "Visit completed");
            result
        }
        Command::Cancel { id, reason } => {
            if caller.role == Role::Technician {
                ui::print_permission(lifecycle.permission_hint().await);
            }
            lifecycle.cancel(&id, &caller, &reason).await
        }
        Command::Show { id } => lifecycle.get(&id).inspect(|job| {
            ui::print_job(job);
            ui::print_summary(&VisitSummary::from_job(job));
        }),
        Command::List => {
            match lifecycle.list() {
                Ok(jobs) => jobs.iter().for_each(ui::print_job_line),
                Err(err) => {
                    ui::print_error(&err);
                    return Ok(ExitCode::FAILURE);
                }
            }
            return Ok(ExitCode::SUCCESS);
        }
        Command::Locate { precise } => return locate(&lifecycle, precise).await,
        Command::Permission => return permission(&lifecycle).await,
        Command::Inbox { target } => {
            let target = target.as_deref().map(parse_target);
            let records = lifecycle.notifier().inner().inbox(target.as_ref())?;
            ui::print_inbox(&records);
            return Ok(ExitCode::SUCCESS);
        }
    };

    Ok(report(outcome))
}

fn report(outcome: Result<ServiceJob, ServiceError>) -> ExitCode {
    match outcome {
        Ok(job) => {
            ui::print_job(&job);
            ExitCode::SUCCESS
        }
        Err(err) => {
            ui::print_error(&err);
            ExitCode::FAILURE
        }
    }
}

fn finish_progress<T>(
    progress: &ui::AcquisitionProgress,
    result: &Result<T, ServiceError>,
    done: &str,
) {
    match result {
        Ok(_) => progress.succeed(done),
        Err(_) => progress.fail(),
    }
}

async fn locate(lifecycle: &Lifecycle, precise: bool) -> Result<ExitCode> {
    let acquirer = lifecycle.acquirer();
    let progress = ui::AcquisitionProgress::start("Acquiring position...");
    let result = if precise {
        acquirer.acquire_precise().await
    } else {
        acquirer.acquire_fast().await
    };
    match result {
        Ok(position) => {
            progress.succeed(&ui::format_position(&position));
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            progress.fail();
            ui::print_location_error(&err);
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn permission(lifecycle: &Lifecycle) -> Result<ExitCode> {
    let acquirer = lifecycle.acquirer();
    let negotiator = PermissionNegotiator::new(acquirer, acquirer.sensor());
    let state = negotiator.current_state().await;
    ui::print_permission(state);
    if matches!(state, PermissionState::Granted | PermissionState::Denied) {
        return Ok(ExitCode::SUCCESS);
    }

    let progress = ui::AcquisitionProgress::start("Requesting location access...");
    match negotiator.prompt().await {
        Ok(position) => {
            progress.succeed(&ui::format_position(&position));
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            progress.fail();
            ui::print_location_error(&err);
            Ok(ExitCode::FAILURE)
        }
    }
}

fn parse_target(value: &str) -> NotifyTarget {
    match value {
        "role:admin" => NotifyTarget::Role(Role::Admin),
        "role:technician" => NotifyTarget::Role(Role::Technician),
        user => NotifyTarget::User(user.to_string()),
    }
}

/// Proof files are referenced by path; an empty file counts as missing.
fn proof_reference(path: &Path) -> Result<Option<String>> {
    let meta = std::fs::metadata(path).with_context(|| format!("reading {}", path.display()))?;
    Ok((meta.len() > 0).then(|| path.display().to_string()))
}

fn optional_proof(path: Option<&Path>) -> Result<Option<String>> {
    match path {
        Some(path) => proof_reference(path),
        None => Ok(None),
    }
}
