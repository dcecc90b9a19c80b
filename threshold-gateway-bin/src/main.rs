//! Threshold gateway binary - receives log events, writes triggers when thresholds are reached.

#![deny(missing_docs)]

use conf::Conf;
use std::{env, fs, path::PathBuf, sync::Arc};
use threshold_gateway::{Batcher, Gateway, GatewayConfig, SystemClock, Trigger, run_batcher};
use tokio::sync::mpsc::unbounded_channel;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

mod json;
use json::JsonConfig;

mod output;
use output::write_batches;

/// Top-level configuration for threshold-gateway.
#[derive(Conf, Debug)]
#[conf(serde)]
pub struct Config {
    /// Optional TOML config file. Flags and env vars override what it sets.
    #[allow(dead_code)] // read by load_config before parsing, listed here for --help
    #[conf(long)]
    config_file: Option<PathBuf>,
    /// Validate the config and thresholds, then exit
    #[conf(long)]
    dry_run: bool,
    #[conf(flatten, prefix)]
    json: Option<JsonConfig>,
    #[conf(flatten, serde(flatten))]
    gateway: GatewayConfig,
}

/// Install the stderr log subscriber, then load a `.env` file if there is one.
///
/// Stdout is reserved for triggers. `RUST_LOG` sets the filter, `info` by default.
fn init_logging() -> Result<(), dotenvy::Error> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_file(true)
        .with_line_number(true)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match dotenvy::dotenv() {
        Ok(path) => info!(path = %path.display(), "Loaded dotenv file"),
        Err(err) if err.not_found() => debug!("No dotenv file found"),
        Err(err) => return Err(err),
    }
    Ok(())
}

/// Parse args and env vars, layered over the TOML file named by `--config-file`, if any.
fn load_config() -> Result<Config, Box<dyn std::error::Error>> {
    // Located before the real parse, since conf needs the document up front
    let Some(config_path) = conf::find_parameter("config-file", env::args_os()) else {
        return Ok(Config::parse());
    };
    let path_display = config_path.to_string_lossy();
    let text = fs::read_to_string(&config_path)
        .map_err(|err| format!("Could not read config file '{path_display}': {err}"))?;
    let doc: toml::Value = toml::from_str(&text)
        .map_err(|err| format!("Config file '{path_display}' is not valid TOML: {err}"))?;
    info!(config_file = %path_display, "Loaded config file");
    Ok(Config::conf_builder().doc(path_display, doc).parse())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging()?;
    let config = load_config()?;

    info!("Config = {config:#?}");

    // Every threshold is validated here, before anything is listening
    let (events_tx, events_rx) = unbounded_channel();
    let (triggers_tx, triggers_rx) = unbounded_channel::<Trigger>();
    let gateway = Gateway::new(
        &config.gateway,
        Arc::new(SystemClock),
        events_rx,
        triggers_tx,
    )
    .map_err(|err| format!("Invalid threshold config: {err}"))?;

    if gateway.thresholds().is_empty() {
        warn!("No thresholds configured, no triggers will be written");
    }
    for detector in gateway.thresholds().iter() {
        info!("Threshold {}", detector.settings());
    }

    if config.dry_run {
        return Ok(());
    }

    let token = CancellationToken::new();
    let ctrl_c_token = token.clone();
    tokio::task::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Could not listen for ctrl-c: {err}");
            return;
        }
        warn!("ctrl-c: stopping");
        ctrl_c_token.cancel();
    });

    let _listener_tasks = match &config.json {
        Some(json) => Some(json.start_tasks(events_tx).await?),
        None => {
            warn!("No JSON listener configured, no events will be received");
            None
        }
    };

    // The batcher gets its own token: it stops once the gateway drops its sender,
    // so triggers still in flight at shutdown are written out.
    let (batches_tx, batches_rx) = unbounded_channel();
    let batcher = Batcher::new(config.gateway.output.clone(), |trigger: &Trigger| {
        trigger.threshold_name.clone()
    });
    let batcher_task = tokio::task::spawn(run_batcher(
        batcher,
        triggers_rx,
        batches_tx,
        CancellationToken::new(),
    ));
    let output_task = tokio::task::spawn(write_batches(batches_rx, tokio::io::stdout()));

    // Returns once ctrl-c cancels the token
    gateway.run(token).await;

    batcher_task.await?;
    let written = output_task.await??;
    info!("Wrote {written} triggers");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use conf::Conf;
    use std::time::Duration;
    use threshold_gateway::{Level, ThresholdSet};

    fn parse_toml(text: &str) -> Config {
        let doc: toml::Value = toml::from_str(text).expect("Failed to parse TOML");
        let no_env: [(&str, &str); 0] = [];
        Config::conf_builder()
            .args(["threshold-gateway"])
            .env(no_env)
            .doc("test.toml", doc)
            .try_parse()
            .expect("Failed to parse config")
    }

    #[test]
    fn test_toml_config() {
        let toml_config = r#"
dry_run = true

[json]
listen_addr = "0.0.0.0:5000"

[output]
batch_delay = "30s"
batch_max_delay = "5m"
batch_max_size = 20

[[threshold]]
threshold_name = "db-timeouts"
window_seconds = 60
threshold = 5
suppression_seconds = 300
reset_on_trigger = true
msg_contains = "timeout"
app_equals = "billing"

[[threshold]]
name = "any-critical"
window_seconds = 10
threshold = 1
min_level = "crit"
"#;

        let config = parse_toml(toml_config);

        assert!(config.dry_run);

        let json = config.json.as_ref().expect("json should be present");
        assert_eq!(json.listen_addr, "0.0.0.0:5000".parse().unwrap());

        let output = &config.gateway.output;
        assert_eq!(output.batch_delay, Some(Duration::from_secs(30)));
        assert_eq!(output.batch_max_delay, Some(Duration::from_secs(300)));
        assert_eq!(output.batch_max_size, Some(20));

        let thresholds = &config.gateway.thresholds;
        assert_eq!(thresholds.len(), 2);
        assert_eq!(thresholds[0].threshold_name, "db-timeouts");
        assert_eq!(thresholds[0].suppression_seconds, 300);
        assert!(thresholds[0].reset_on_trigger);
        assert_eq!(thresholds[0].filter.app_equals, "billing");
        assert_eq!(thresholds[1].threshold_name, "any-critical");
        assert_eq!(thresholds[1].suppression_seconds, 0);
        assert!(!thresholds[1].reset_on_trigger);
        assert_eq!(thresholds[1].filter.min_level, Some(Level::CRITICAL));

        let set = ThresholdSet::new(thresholds, Arc::new(SystemClock)).unwrap();
        assert_eq!(
            set.get("db-timeouts").unwrap().settings().to_string(),
            "db-timeouts: >= 5 / 1m, suppress 5m, reset on trigger"
        );
    }

    #[test]
    fn test_toml_config_defaults() {
        let config = parse_toml("");
        assert!(!config.dry_run);
        assert!(config.json.is_none());
        assert!(config.gateway.thresholds.is_empty());
        assert_eq!(config.gateway.output.batch_delay, None);
    }
}
