use clap::Parser;
use magpie_repo::{ClientConfig, HttpTransport, NavigationSignal, Repository, Resource, StaticAuth};
use magpie_store::{CacheStore, InvalidationBus, Metrics};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Magpie demo client: fetch tenant resources through the caching repository.
#[derive(Parser)]
#[command(name = "magpie")]
struct Args {
    /// Base URL of the resource API
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    api_base: String,

    /// Config file; overrides --api-base when present
    #[arg(long)]
    config: Option<PathBuf>,

    /// Tenant to query
    #[arg(long)]
    tenant: String,

    /// Resource collection name (e.g. "projects")
    #[arg(long)]
    resource: String,

    /// Item id; the whole collection is aggregated when omitted
    #[arg(long)]
    id: Option<String>,
}

/// Untyped adapter: DTO and model are raw JSON.
struct RawResource {
    name: String,
}

impl Resource for RawResource {
    type Dto = Value;
    type Model = Value;

    fn name(&self) -> &str {
        &self.name
    }

    fn from_dto(&self, dto: Value) -> Value {
        dto
    }

    fn to_dto(&self, model: &Value) -> Value {
        model.clone()
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => match ClientConfig::load(path) {
            Ok(c) => {
                tracing::info!(path = %path.display(), "loaded config");
                c
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to load config, falling back to flags");
                ClientConfig::new(args.api_base.clone())
            }
        },
        None => ClientConfig::new(args.api_base.clone()),
    };

    let metrics = Arc::new(Metrics::new());
    let cache = Arc::new(CacheStore::new(Arc::clone(&metrics)));
    cache.attach(&InvalidationBus::default());

    let transport = Arc::new(HttpTransport::new(config.timeout()));

    tracing::info!(
        api_base = %config.api_base,
        tenant = %args.tenant,
        resource = %args.resource,
        "magpie client starting"
    );

    let repo = Repository::new(
        RawResource {
            name: args.resource.clone(),
        },
        config,
        transport,
        Arc::clone(&cache),
        Arc::clone(&metrics),
        Arc::new(StaticAuth::default()),
        NavigationSignal::new(),
    );

    let result = match &args.id {
        Some(id) => repo.get_one(&args.tenant, id).await.map(|item| vec![item]),
        None => repo.get_all(&args.tenant, BTreeMap::new()).await,
    };

    match result {
        Ok(items) => {
            for item in &items {
                println!("{}", serde_json::to_string_pretty(item).unwrap_or_default());
            }
            tracing::info!(
                count = items.len(),
                counters = ?metrics.snapshot(),
                "fetch complete"
            );
        }
        Err(e) => {
            tracing::error!(error = %e, "fetch failed");
            std::process::exit(1);
        }
    }
}
