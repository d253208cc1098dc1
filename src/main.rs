use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

use swr_fetch::config::Config;
use swr_fetch::{
  logging, ApiContext, FetchOptions, FetchOrchestrator, Method, MutationOrchestrator,
  RequestBody, RequestDescriptor, RequestState, ReqwestTransport, Transport,
};

#[derive(Parser, Debug)]
#[command(name = "swrf")]
#[command(about = "Stale-while-revalidate HTTP requests from the command line")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/swrf/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Prefix prepended to every URL (overrides base_api_url)
  #[arg(short, long, global = true)]
  base_url: Option<String>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Fetch a resource and print every state change as a JSON line
  Get {
    url: String,
    /// Explicit cache key
    #[arg(long)]
    id: Option<String>,
    /// Extra header, e.g. "Authorization: Bearer ..."
    #[arg(short = 'H', long = "header", value_parser = parse_header)]
    headers: Vec<(String, String)>,
    #[arg(long)]
    retry: Option<u32>,
    /// Cache entry lifetime in milliseconds
    #[arg(long)]
    cache_expiry: Option<u64>,
    /// Revalidate every N milliseconds until Ctrl-C
    #[arg(long)]
    poll: Option<u64>,
    /// Number of sequential fetches (later ones are served from cache first)
    #[arg(long, default_value_t = 1)]
    times: u32,
  },
  /// Send a mutation and print the resulting state
  Send {
    url: String,
    #[arg(short = 'X', long, default_value = "POST")]
    method: Method,
    /// JSON payload
    #[arg(short, long, conflicts_with = "file")]
    data: Option<String>,
    /// Send the contents of a file as a binary payload
    #[arg(long)]
    file: Option<PathBuf>,
    #[arg(short = 'H', long = "header", value_parser = parse_header)]
    headers: Vec<(String, String)>,
    #[arg(long)]
    retry: Option<u32>,
  },
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
  let (name, value) = raw
    .split_once(':')
    .ok_or_else(|| format!("expected \"name: value\", got {:?}", raw))?;
  Ok((name.trim().to_lowercase(), value.trim().to_string()))
}

/// Config defaults with command line headers on top.
fn merged_headers(config: &Config, headers: Vec<(String, String)>) -> BTreeMap<String, String> {
  let mut merged = config.headers.clone();
  merged.extend(headers);
  merged
}

fn print_state(state: &RequestState<Value>) -> Result<()> {
  println!("{}", serde_json::to_string(state)?);
  Ok(())
}

fn finish(state: RequestState<Value>) -> Result<()> {
  match state.error {
    Some(error) if state.is_error => Err(eyre!("Request failed: {}", error)),
    _ => Ok(()),
  }
}

/// A Ctrl-C listener that could not be installed ends polling with an error.
fn check_signal(signal: std::io::Result<()>) -> Result<()> {
  signal.map_err(|e| eyre!("Failed to listen for Ctrl-C: {}", e))
}

/// Print state changes until `work` completes.
async fn print_until<F: std::future::Future<Output = ()>>(
  rx: &mut watch::Receiver<RequestState<Value>>,
  work: F,
) -> Result<()> {
  tokio::pin!(work);
  loop {
    tokio::select! {
      changed = rx.changed() => {
        if changed.is_err() {
          break;
        }
        print_state(&rx.borrow_and_update())?;
      }
      _ = &mut work => break,
    }
  }
  if rx.has_changed().unwrap_or(false) {
    print_state(&rx.borrow_and_update())?;
  }
  Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let config = Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(&config)?;

  let mut context = ApiContext::scoped();
  if let Some(base_url) = args.base_url.clone().or_else(|| config.base_api_url.clone()) {
    context = context.with_base_url(base_url);
  }
  let transport: Arc<dyn Transport> = Arc::new(ReqwestTransport::new()?);
  let options = FetchOptions::<Value>::new().with_backoff(config.backoff.to_backoff());

  match args.command {
    Command::Get {
      url,
      id,
      headers,
      retry,
      cache_expiry,
      poll,
      times,
    } => {
      let mut descriptor = RequestDescriptor::get(url).with_retry(retry.unwrap_or(config.retry));
      descriptor.headers = merged_headers(&config, headers);
      descriptor.id = id;
      descriptor.cache_expiry = cache_expiry
        .map(Duration::from_millis)
        .or_else(|| config.cache_expiry());

      let mut orchestrator = FetchOrchestrator::new(context, transport, options);
      let mut rx = orchestrator.subscribe();

      let poll = poll.map(Duration::from_millis).or_else(|| config.poll_interval());
      if let Some(interval) = poll {
        info!("polling every {:?}, Ctrl-C to stop", interval);
        orchestrator.start(descriptor.with_poll_interval(interval));
        print_state(&rx.borrow_and_update())?;
        let mut signal = Ok(());
        print_until(&mut rx, async {
          signal = tokio::signal::ctrl_c().await;
        })
        .await?;
        orchestrator.stop();
        check_signal(signal)?;
        return Ok(());
      }

      // Fire by hand so each fetch can be awaited
      orchestrator.start(descriptor.manual_trigger(true));
      let _ = rx.borrow_and_update();
      for _ in 0..times.max(1) {
        print_until(&mut rx, orchestrator.trigger_api()).await?;
      }
      finish(orchestrator.state())
    }
    Command::Send {
      url,
      method,
      data,
      file,
      headers,
      retry,
    } => {
      let body = match (data, file) {
        (Some(data), _) => Some(RequestBody::Json(
          serde_json::from_str(&data).map_err(|e| eyre!("Invalid JSON payload: {}", e))?,
        )),
        (None, Some(path)) => Some(RequestBody::Binary(
          std::fs::read(&path).map_err(|e| eyre!("Failed to read {}: {}", path.display(), e))?,
        )),
        (None, None) => None,
      };

      let mut descriptor =
        RequestDescriptor::new(method, url).with_retry(retry.unwrap_or(config.retry));
      descriptor.headers = merged_headers(&config, headers);

      let mutation = MutationOrchestrator::new(context, transport, descriptor, options);
      let mut rx = mutation.subscribe();
      let mut outcome = None;
      print_until(&mut rx, async {
        outcome = Some(mutation.mutate(body).await);
      })
      .await?;

      match outcome {
        Some(state) => finish(state),
        None => Err(eyre!("Mutation did not complete")),
      }
    }
  }
}
