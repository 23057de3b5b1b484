#![forbid(unsafe_code)]

mod config;
mod server;
mod util;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use botgate_identity::{IdMap, MemoryKvStore, UnionCache};
use botgate_platform::{OpenApiClient, PlatformClient, SessionTracker};
use botgate_util::endpoint::WsEndpoint;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::server::actions::ActionContext;
use crate::server::correlation::MemoryCorrelationRegistry;
use crate::server::delivery::DeliveryPipeline;
use crate::server::error_log::ErrorLog;
use crate::server::fanout::{BroadcasterConfig, spawn_broadcaster};
use crate::server::health::{HealthState, spawn_health_server};
use crate::server::hub::{ClientHub, ClientHubConfig};
use crate::server::normalize::EventNormalizer;
use crate::server::webhook::{WebhookState, spawn_webhook_server};
use crate::server::ws::{WsSettings, run_ws_server};

struct Args {
	bind: SocketAddr,
	config_path: Option<PathBuf>,
}

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: botgate_server [--bind ws://host:port] [--config path]\n\
\n\
Options:\n\
\t--bind     Downstream WebSocket bind endpoint (default: ws://127.0.0.1:15630)\n\
\t          Format: ws://host:port\n\
\t--config   Config file (default: ~/.botgate/config.toml)\n\
\t--help     Show this help\n\
"
	);
	std::process::exit(2)
}

fn parse_args() -> Args {
	let mut bind_endpoint = "ws://127.0.0.1:15630".to_string();
	let mut config_path = None;

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
			"--bind" | "--listen" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				if v.trim().is_empty() {
					eprintln!("--bind must be non-empty (expected ws://host:port)");
					usage_and_exit();
				}
				bind_endpoint = v;
			}
			"--config" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				config_path = Some(PathBuf::from(v));
			}
			other => {
				eprintln!("Unknown argument: {other}");
				usage_and_exit();
			}
		}
	}

	let bind = WsEndpoint::parse(&bind_endpoint).unwrap_or_else(|e| {
		eprintln!("{e}");
		usage_and_exit();
	});

	let bind = bind.to_socket_addr_if_ip_literal().unwrap_or_else(|e| {
		eprintln!("{e}");
		usage_and_exit();
	});

	Args { bind, config_path }
}

fn init_tracing() {
	let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,botgate_server=debug".to_string());

	let otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
		.ok()
		.map(|v| v.trim().to_string())
		.filter(|v| !v.is_empty());
	let base = tracing_subscriber::registry()
		.with(tracing_subscriber::EnvFilter::new(filter))
		.with(tracing_subscriber::fmt::layer().with_target(false));

	if let Some(endpoint) = otlp_endpoint {
		use opentelemetry::global;
		use opentelemetry::trace::TracerProvider as _;
		use opentelemetry_otlp::WithExportConfig;

		match opentelemetry_otlp::SpanExporter::builder()
			.with_tonic()
			.with_endpoint(endpoint.clone())
			.build()
		{
			Ok(exporter) => {
				let tracer_provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
					.with_batch_exporter(exporter)
					.build();
				let tracer = tracer_provider.tracer("botgate_server");
				global::set_tracer_provider(tracer_provider);

				let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
				base.with(otel_layer).init();
				info!(endpoint = %endpoint, "otlp tracing enabled");
			}
			Err(e) => {
				base.init();
				warn!(error = %e, "failed to initialize otlp tracing");
			}
		}
	} else {
		base.init();
	}
}

fn init_metrics(bind: Option<&str>) {
	let Some(bind) = bind else {
		return;
	};

	match bind.parse::<SocketAddr>() {
		Ok(addr) => {
			if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new()
				.with_http_listener(addr)
				.install()
			{
				warn!(error = %e, "failed to start metrics exporter");
			} else {
				info!(%addr, "metrics exporter listening");
			}
		}
		Err(e) => {
			warn!(error = %e, %bind, "invalid metrics bind address (expected host:port)");
		}
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_tracing();

	let args = parse_args();

	let config_path = match args.config_path {
		Some(path) => path,
		None => crate::config::default_config_path()?,
	};
	let cfg = crate::config::load_server_config_from_path(&config_path)?;
	info!(path = %config_path.display(), "loaded gateway config (toml + env overrides)");

	init_metrics(cfg.server.metrics_bind.as_deref());

	let health_state = HealthState::new();
	if let Some(bind) = cfg.server.health_bind.as_deref() {
		match bind.parse::<SocketAddr>() {
			Ok(addr) => {
				spawn_health_server(addr, health_state.clone());
				info!(%addr, "health server listening");
			}
			Err(e) => warn!(error = %e, %bind, "invalid health bind address (expected host:port)"),
		}
	}

	let ids = Arc::new(IdMap::new(cfg.idmap, Arc::new(MemoryKvStore::new())).context("build id map")?);
	let unions = Arc::new(UnionCache::new());
	let registry = Arc::new(MemoryCorrelationRegistry::new());
	let session = Arc::new(SessionTracker::new());

	let hub = ClientHub::new(ClientHubConfig::default());
	let broadcaster = spawn_broadcaster(hub.clone(), BroadcasterConfig::default());

	let normalizer = Arc::new(EventNormalizer::new(
		Arc::new(cfg.normalize_settings()),
		ids,
		Arc::clone(&unions),
		registry,
		session.clone(),
		broadcaster,
	));

	let client: Arc<dyn PlatformClient> =
		Arc::new(OpenApiClient::new(cfg.open_api_config()).context("build platform client")?);

	let error_log = if cfg.delivery.save_error {
		let path = cfg.error_log_path()?;
		info!(path = %path.display(), "send attempts will be logged");
		Some(Arc::new(ErrorLog::new(path)))
	} else {
		None
	};

	let delivery_settings = Arc::new(cfg.delivery_settings());
	let self_id = delivery_settings.self_id;
	let delivery = Arc::new(DeliveryPipeline::new(
		Arc::clone(&client),
		delivery_settings,
		unions,
		error_log,
	));

	if let Some(bind) = cfg.server.webhook_bind.as_deref() {
		match bind.parse::<SocketAddr>() {
			Ok(addr) => {
				let state = WebhookState {
					path: Arc::from(cfg.server.webhook_path.as_str()),
					normalizer,
					session,
				};
				spawn_webhook_server(addr, state);
				info!(%addr, path = %cfg.server.webhook_path, "platform webhook listening");
			}
			Err(e) => warn!(error = %e, %bind, "invalid webhook bind address (expected host:port)"),
		}
	} else {
		warn!("no server.webhook_bind configured; inbound platform events are disabled");
	}

	let ctx = ActionContext {
		delivery,
		client,
		hub,
		self_id,
	};
	let ws_settings = WsSettings {
		access_token: cfg.server.access_token.clone(),
	};

	let listener = TcpListener::bind(args.bind)
		.await
		.with_context(|| format!("bind downstream listener on {}", args.bind))?;
	info!(bind = %args.bind, "botgate_server: downstream WebSocket endpoint ready");

	health_state.mark_ready();

	run_ws_server(listener, ws_settings, ctx).await
}
