mod cli;
mod config_loader;

use clap::Parser;
use sable_node::SableNode;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Parse CLI
    let args = cli::Cli::parse();

    // 2. Load Config
    let config = config_loader::load_node_config(&args.config, args.data_dir)?;

    // 3. Setup Logging
    let _guard = config.logging.init()?;
    info!("Loaded config from {:?}", args.config);

    // 4. Initialize Node
    let node = SableNode::new(config).await?;

    match args.command.unwrap_or(cli::Commands::Run) {
        cli::Commands::Status => {
            let status = node.status().await;
            println!("committed height: {}", fmt_height(status.current_block_height));
            println!("header height:    {}", fmt_height(status.last_header_index));
        }
        // 5. Start Node
        cli::Commands::Run => node.start().await?,
    }

    Ok(())
}

fn fmt_height(height: Option<u32>) -> String {
    height.map_or_else(|| "none".to_string(), |h| h.to_string())
}
