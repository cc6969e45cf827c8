use crate::ui;
use anyhow::Result;
use statline_client::Agent;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, warn};

/// Captures one `path value` pair per stdin line until EOF, then pushes
/// whatever is left and waits for the push to settle.
pub async fn execute(config_file: Option<PathBuf>, auth: Option<String>) -> Result<()> {
    let mut config = super::load_config(config_file).await?.client;
    if let Some(auth) = auth {
        config.auth = auth;
    }

    let agent = Agent::new(config)?;
    agent.start();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut captured = 0usize;
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        match line.split_once(char::is_whitespace) {
            Some((path, value)) => {
                agent.capture(path, value.trim());
                captured += 1;
            }
            None => warn!("Skipping malformed line: {}", line),
        }
    }
    debug!("Captured {} line(s)", captured);

    agent.stop();
    agent.flush_now();

    let settled = tokio::time::timeout(Duration::from_secs(10), async {
        while agent.is_pushing() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;

    if settled.is_err() {
        ui::print_warning("Final push did not complete");
    }
    agent.shutdown();
    Ok(())
}
