use super::Session;
use anyhow::{Context, Result, bail};
use sharepilot::lifecycle::{ProvisionReport, Provisioner, TeardownCoordinator};
use sharepilot::task::spawn_named;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub async fn run(config: &Path, keep: bool) -> Result<()> {
    let session = Session::open(config)?;
    let settings = &session.settings;
    let assignment = session.assignment()?;
    info!(
        run_id = %session.ctx.run_id(),
        cluster = %settings.cluster.name,
        clients = assignment.client_count(),
        shares = assignment.share_count(),
        "starting run"
    );

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    spawn_named("ctrl-c", async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received SIGINT, cancelling provisioning");
            signal.cancel();
        }
    });

    if settings.cluster.create {
        let ingress = settings.cluster.ingress();
        session
            .ceph
            .create_cluster(ingress.as_ref(), &settings.policy.cluster_ready())
            .await
            .context("Failed to create NFS cluster")?;
    }

    if settings.cluster.check_coredumps {
        session
            .ceph
            .enable_coredumps()
            .await
            .context("Failed to enable coredumps on NFS nodes")?;
    }

    let report = Provisioner::new(Arc::clone(&session.ceph))
        .with_policy(settings.policy.lifecycle())
        .with_max_parallel(settings.shares.max_parallel)
        .with_shutdown(shutdown.clone())
        .provision(&assignment)
        .await;
    print_report(&report);
    let provisioned = report.is_success();

    if keep && !shutdown.is_cancelled() {
        println!("Leaving exports in place (--keep)");
        if !provisioned {
            bail!("{} pair(s) failed to provision", report.failed().count());
        }
        return Ok(());
    }

    let mut problems = Vec::new();
    if !provisioned {
        problems.push(format!(
            "{} pair(s) failed to provision",
            report.pairs().len() - report.verified().count()
        ));
    }

    let teardown = TeardownCoordinator::new(Arc::clone(&session.ctx), Arc::clone(&session.ceph))
        .with_policy(settings.policy.teardown(settings.cluster.delete))
        .teardown_pairs(report.into_pairs())
        .await;
    if let Err(e) = teardown.into_result() {
        error!("{}", e);
        problems.push(e.to_string());
    }

    if settings.cluster.check_coredumps {
        let dumps = session
            .ceph
            .find_coredumps(session.ctx.started_at())
            .await
            .context("Failed to check NFS nodes for coredumps")?;
        for dump in &dumps {
            problems.push(format!(
                "{} wrote {} coredump(s): {}",
                dump.node.hostname,
                dump.files.len(),
                dump.files.join(", ")
            ));
        }
    }

    if !problems.is_empty() {
        bail!("Run failed:\n  - {}", problems.join("\n  - "));
    }
    println!("✓ Run completed successfully");
    Ok(())
}

pub async fn teardown(config: &Path) -> Result<()> {
    let session = Session::open(config)?;
    let assignment = session.assignment()?;
    TeardownCoordinator::new(Arc::clone(&session.ctx), Arc::clone(&session.ceph))
        .with_policy(
            session
                .settings
                .policy
                .teardown(session.settings.cluster.delete),
        )
        .teardown(&assignment)
        .await?;
    println!("✓ Teardown completed successfully");
    Ok(())
}

fn print_report(report: &ProvisionReport) {
    for pair in report.pairs() {
        match pair.failure() {
            None => println!(
                "  {:<12} {:<16} {}",
                pair.client().hostname,
                pair.share().name,
                pair.state()
            ),
            Some(failure) => println!(
                "  {:<12} {:<16} {} ({})",
                pair.client().hostname,
                pair.share().name,
                pair.state(),
                failure
            ),
        }
    }
    println!(
        "{} of {} pair(s) verified",
        report.verified().count(),
        report.pairs().len()
    );
}
