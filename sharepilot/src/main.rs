use anyhow::Result;

mod cli;

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse_args();

    match cli.command {
        cli::Commands::Init { path } => {
            println!("Generating configuration file at: {}", path.display());
            sharepilot::config::Settings::write_default_config(&path)?;
            println!("Configuration file created successfully!");
            println!("Edit the file and run: sharepilot run -c {}", path.display());
        }
        cli::Commands::Plan { config, json } => {
            cli::plan::print_plan(&config, json)?;
        }
        cli::Commands::Run { config, keep } => {
            cli::init_tracing();
            cli::run::run(&config, keep).await?;
        }
        cli::Commands::Teardown { config } => {
            cli::init_tracing();
            cli::run::teardown(&config).await?;
        }
        cli::Commands::Failover {
            config,
            node,
            timeout_secs,
        } => {
            cli::init_tracing();
            cli::failover::failover(&config, &node, timeout_secs).await?;
        }
        cli::Commands::WaitHealthy {
            config,
            timeout_secs,
        } => {
            cli::init_tracing();
            cli::health::wait_healthy(&config, timeout_secs).await?;
        }
    }

    Ok(())
}
