use super::Session;
use anyhow::Result;
use std::path::Path;

pub fn print_plan(config: &Path, json: bool) -> Result<()> {
    let session = Session::open(config)?;
    let assignment = session.assignment()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&assignment)?);
        return Ok(());
    }

    println!(
        "{} share(s) over {} client(s), cluster {}",
        assignment.share_count(),
        assignment.client_count(),
        session.settings.cluster.name
    );
    for entry in &assignment {
        println!("{} ({})", entry.client.hostname, entry.client.address);
        if entry.shares.is_empty() {
            println!("  (no shares)");
        }
        for share in &entry.shares {
            println!(
                "  {:<16} {:<16} -> {:<20} nfs v{}",
                share.name, share.export_path, share.mount_path, share.options.version
            );
        }
    }
    Ok(())
}
