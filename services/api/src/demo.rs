use crate::infra::{listing_directory, queue_service};
use clap::Args;
use rental_queue::config::AppConfig;
use rental_queue::error::AppError;
use rental_queue::workflows::applications::{
    ApplicationStatus, ApplicationSubmission, ListingId, QueueError, TransitionRequest, UserId,
};
use tokio::task::JoinSet;

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Number of applicants racing for the listing.
    #[arg(long, default_value_t = 12)]
    pub(crate) applicants: u32,
    /// Listing identifier used for the demo queue.
    #[arg(long, default_value = "demo-listing")]
    pub(crate) listing: String,
    /// Every Nth applicant withdraws before reconciliation (0 disables).
    #[arg(long, default_value_t = 4)]
    pub(crate) withdraw_every: u32,
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        applicants,
        listing,
        withdraw_every,
    } = args;

    let config = AppConfig::load()?;
    let listing_id = ListingId(listing);
    let owner = UserId("demo-landlord".to_string());
    let directory = listing_directory(&config)?;
    directory.register(listing_id.clone(), owner.clone());
    let service = queue_service(&config, directory);

    println!(
        "Application queue demo: {applicants} applicants racing for {listing_id}"
    );

    let mut storm = JoinSet::new();
    for n in 1..=applicants {
        let service = service.clone();
        let listing_id = listing_id.clone();
        storm.spawn(async move {
            let applicant = UserId(format!("applicant-{n:03}"));
            let submission = ApplicationSubmission {
                notes: Some(format!("demo applicant #{n}")),
                documents: Vec::new(),
            };
            service.submit(&listing_id, &applicant, submission).await
        });
    }

    let mut queued = Vec::new();
    while let Some(joined) = storm.join_next().await {
        match joined {
            Ok(Ok(record)) => queued.push(record),
            Ok(Err(err)) => println!("  submission failed: {err}"),
            Err(err) => println!("  submission task aborted: {err}"),
        }
    }
    queued.sort_by_key(|record| record.position);

    println!("\nQueue after concurrent submissions");
    for record in &queued {
        println!("  #{:<3} {}", record.position, record.applicant_id);
    }

    if withdraw_every > 0 {
        for record in queued
            .iter()
            .filter(|record| record.position % withdraw_every == 0)
        {
            match service.transition(
                &record.id,
                &record.applicant_id,
                TransitionRequest::new(ApplicationStatus::Withdrawn),
            ) {
                Ok(_) => println!("  {} withdrew from #{}", record.applicant_id, record.position),
                Err(err) => println!("  withdrawal failed: {err}"),
            }
        }
    }

    let health = service.audit(&listing_id)?;
    println!(
        "\nAudit: {} pending | gaps {:?} | duplicates {:?}",
        health.pending, health.missing_positions, health.duplicate_positions
    );

    match service.reconcile(&listing_id, &owner) {
        Ok(outcome) => {
            println!(
                "Reconciled {} pending applications ({} renumbered)",
                outcome.pending, outcome.renumbered
            );
        }
        Err(QueueError::ReconciliationConflict { .. }) => {
            println!("Reconciliation skipped: queue busy");
        }
        Err(err) => return Err(err.into()),
    }

    println!("\nFinal pending queue");
    for record in service.listing_applications(&listing_id, &owner, Some(ApplicationStatus::Pending))? {
        println!("  #{:<3} {}", record.position, record.applicant_id);
    }

    Ok(())
}
