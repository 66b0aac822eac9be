//! Watch one resource and print its change events as JSON lines.
//!
//! Settings come from `~/.nimbus/settings.json` and `NIMBUS_*` variables;
//! `logging.level` and `logging.json` pick the stderr subscriber.

#![deny(unsafe_code)]

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use futures::StreamExt;
use nimbus_core::logging::{init_json_subscriber, init_subscriber};
use nimbus_realtime::{
    EventStream, RealtimeClient, ResourceIdentity, ResourceType, StaticToken, watch,
};
use nimbus_settings::{LoggingSettings, NimbusSettings, get_settings};
use tracing::info;

#[derive(Debug, Parser)]
#[command(
    name = "nimbus-watch",
    about = "Stream real-time change events for one resource"
)]
struct Args {
    /// Resource as `<type>/<name>`, type one of ds, fs, channel, users.
    target: String,

    /// Event type to watch (repeatable). None means all.
    #[arg(long = "event", short = 'e')]
    events: Vec<String>,

    /// Access token sent on connect.
    #[arg(long)]
    token: String,

    /// Endpoint, overriding `realtime.wsUrl`.
    #[arg(long)]
    url: Option<String>,

    /// JSON log lines, whatever `logging.json` says.
    #[arg(long, default_value_t = false)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let settings = effective_settings(get_settings(), &args);
    init_logging(&settings.logging, args.json_logs);

    let resource = parse_target(&args.target)?;
    let client = RealtimeClient::from_settings(&settings, Arc::new(StaticToken::new(args.token.clone())));
    let connection = client.connect().await.context("failed to connect")?;
    info!(%connection, %resource, "watching");

    let mut stream = open_stream(&client, &resource, &args.events)?;
    loop {
        tokio::select! {
            item = stream.next() => match item {
                Some(Ok(event)) => println!("{}", serde_json::to_string(&event)?),
                Some(Err(err)) => {
                    client.shutdown();
                    return Err(err).context("subscription failed");
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    client.shutdown();
    Ok(())
}

fn effective_settings(loaded: &NimbusSettings, args: &Args) -> NimbusSettings {
    let mut settings = loaded.clone();
    if let Some(url) = &args.url {
        settings.realtime.ws_url.clone_from(url);
    }
    settings
}

fn init_logging(logging: &LoggingSettings, force_json: bool) {
    if force_json || logging.json {
        init_json_subscriber(&logging.level);
    } else {
        init_subscriber(&logging.level);
    }
}

fn parse_target(target: &str) -> Result<ResourceIdentity> {
    let Some((kind, name)) = target.split_once('/') else {
        bail!("expected <type>/<name>, got {target:?}");
    };
    if name.is_empty() {
        bail!("missing resource name in {target:?}");
    }
    let kind: ResourceType = serde_json::from_value(serde_json::Value::String(kind.to_owned()))
        .with_context(|| format!("unknown resource type {kind:?}"))?;
    Ok(ResourceIdentity::new(kind, name))
}

fn open_stream(
    client: &RealtimeClient,
    resource: &ResourceIdentity,
    events: &[String],
) -> Result<EventStream> {
    let name = resource.name.clone();
    let stream = match resource.kind {
        ResourceType::Dataset => watch(&client.dataset(name), events),
        ResourceType::Fileset => watch(&client.fileset(name), events),
        ResourceType::Channel => watch(&client.channel(name), events),
        ResourceType::Users => watch(&client.users(name), events),
    };
    Ok(stream?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_repeated_events() {
        let args = Args::try_parse_from([
            "nimbus-watch", "ds/orders", "-e", "created", "--event", "deleted", "--token", "t",
        ])
        .unwrap();
        assert_eq!(args.target, "ds/orders");
        assert_eq!(args.events, vec!["created", "deleted"]);
        assert!(args.url.is_none());
        assert!(!args.json_logs);
    }

    #[test]
    fn token_is_required() {
        assert!(Args::try_parse_from(["nimbus-watch", "ds/orders"]).is_err());
    }

    #[test]
    fn target_types_use_wire_names() {
        assert_eq!(parse_target("ds/orders").unwrap(), ResourceIdentity::dataset("orders"));
        assert_eq!(parse_target("users/staff").unwrap(), ResourceIdentity::users("staff"));
        assert_eq!(parse_target("channel/a/b").unwrap(), ResourceIdentity::channel("a/b"));
    }

    #[test]
    fn malformed_targets_are_rejected() {
        assert!(parse_target("orders").is_err());
        assert!(parse_target("ds/").is_err());
        assert!(parse_target("dataset/orders").is_err());
    }

    #[test]
    fn url_flag_overrides_settings() {
        let args = Args::try_parse_from([
            "nimbus-watch", "fs/avatars", "--token", "t", "--url", "wss://rt.example.com/ws",
        ])
        .unwrap();
        let loaded = NimbusSettings::default();
        let settings = effective_settings(&loaded, &args);
        assert_eq!(settings.realtime.ws_url, "wss://rt.example.com/ws");
        assert_eq!(settings.logging, loaded.logging);
    }

    #[test]
    fn logging_settings_pick_the_subscriber() {
        let logging = LoggingSettings {
            level: "nimbus_realtime=debug".into(),
            json: true,
        };
        init_logging(&logging, false);
        init_logging(&LoggingSettings::default(), true);
    }
}
