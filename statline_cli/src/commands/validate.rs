use crate::ui;
use anyhow::Result;
use statline_core::parse_config_from_file;
use std::path::PathBuf;

pub async fn execute(config_file: PathBuf) -> Result<()> {
    ui::print_header("Validating Config");
    println!("File: {}", config_file.display());

    match parse_config_from_file(&config_file).await {
        Ok(config) => {
            println!();
            ui::print_success("Config is valid!");

            let client = &config.client;
            println!("\nClient:");
            println!("  Server: {}", client.server_url);
            println!("  Push period: {:?}", client.push_period);
            println!("  Percentile: {}", client.percentile);
            println!(
                "  Backoff: {:?} .. {:?}",
                client.backoff_base, client.backoff_max
            );
            match client.process_name() {
                Some(process) => println!("  Process: {}", process),
                None => println!("  Process: (none)"),
            }

            let server = &config.server;
            println!("\nServer:");
            println!("  Bind: {}", server.bind);
            println!("  Retention: {:?}", server.retention_period);
            println!("  Commit period: {:?}", server.commit_period);
            println!("  Sweep interval: {:?}", server.sweep_interval);
            println!("  Liveness timeout: {:?}", server.liveness_timeout);
            println!("  Long-poll hold: {:?}", server.long_poll_hold);

            if client.auth.is_empty() {
                println!();
                ui::print_warning("Warning: client auth is empty");
            }

            Ok(())
        }
        Err(e) => {
            println!();
            ui::print_error("Config is invalid!");
            println!("\nError: {}", e);
            Err(e)
        }
    }
}
