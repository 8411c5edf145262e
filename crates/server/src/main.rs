//! Fanout server entry point.
//!
//! Runs the HTTP gateway, the telemetry listener and one change consumer per
//! routed entity kind in a single process.

use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fanout_api::{AppState, Probe, RedisLimiter, RedisProbe};
use fanout_common::{AppError, AppResult, Config, IdGenerator, SourceKind};
use fanout_core::{Core, Stores};
use fanout_db::{
    CountsCache, MemorySource, NopSource, RedisCountsCache, Service, Source,
    entities::{
        App, Connection, Device, Entity, Event, Object, Reaction, Rule, Session, User,
        app::APPS_NAMESPACE,
    },
    middleware::stack,
    store::PostgresStore,
};
use fanout_queue::{Consumer, LogSink, MessageSink, RedisSink, Routed};
use fred::clients::Client as RedisClient;
use fred::interfaces::ClientLike;
use sea_orm::DatabaseConnection;
use tokio::{signal, sync::watch, task::JoinHandle};
use tracing::{error, info, warn};
use tracing_subscriber::{Layer, layer::SubscriberExt, util::SubscriberInitExt};

/// Postgres liveness through the pool.
struct PgProbe(Arc<DatabaseConnection>);

#[async_trait]
impl Probe for PgProbe {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn healthy(&self) -> bool {
        self.0.ping().await.is_ok()
    }
}

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received SIGINT, shutting down"),
        () = terminate => info!("received SIGTERM, shutting down"),
    }
}

async fn stopped(mut shutdown: watch::Receiver<bool>) {
    // A dropped sender counts as shutdown too.
    let _ = shutdown.wait_for(|stop| *stop).await;
}

fn init_tracing(config: &Config) {
    let fmt = if config.logging.json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };
    tracing_subscriber::registry()
        .with(fmt)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fanout=debug,tower_http=debug".into()),
        )
        .init();
}

async fn connect_redis(url: &str) -> AppResult<RedisClient> {
    let config =
        fred::types::config::Config::from_url(url).map_err(|e| AppError::Redis(e.to_string()))?;
    let client = RedisClient::new(config, None, None, None);
    client.init().await.map_err(|e| AppError::Redis(e.to_string()))?;
    Ok(client)
}

/// Change source of one entity kind as selected by the configuration.
async fn source<E: Routed + 'static>(config: &Config) -> AppResult<Arc<dyn Source<E>>> {
    match config.source.kind {
        SourceKind::Nop => Ok(Arc::new(NopSource::new())),
        SourceKind::Memory => Ok(Arc::new(MemorySource::default())),
        #[cfg(feature = "sqs")]
        SourceKind::Sqs => {
            let client = fanout_queue::sqs::client(&config.source.region).await;
            let source =
                fanout_queue::SqsSource::<E>::connect(client, &config.source.queue_prefix).await?;
            Ok(Arc::new(source))
        }
        #[cfg(not(feature = "sqs"))]
        SourceKind::Sqs => Err(AppError::Config(
            "sqs source requires the `sqs` feature".to_string(),
        )),
    }
}

/// Postgres store of `E` wrapped in the service middleware.
fn service<E: Entity + 'static>(
    db: &Arc<DatabaseConnection>,
    ids: &IdGenerator,
    counts: Option<Arc<dyn CountsCache>>,
    source: Option<Arc<dyn Source<E>>>,
) -> Arc<dyn Service<E>> {
    stack(
        Arc::new(PostgresStore::<E>::new(Arc::clone(db), ids.clone())),
        counts,
        source,
    )
}

/// Change sources of the routed entity kinds, shared by stores and consumers.
struct Sources {
    connections: Arc<dyn Source<Connection>>,
    events: Arc<dyn Source<Event>>,
    objects: Arc<dyn Source<Object>>,
    reactions: Arc<dyn Source<Reaction>>,
}

impl Sources {
    async fn from_config(config: &Config) -> AppResult<Self> {
        Ok(Self {
            connections: source(config).await?,
            events: source(config).await?,
            objects: source(config).await?,
            reactions: source(config).await?,
        })
    }
}

fn stores(
    db: &Arc<DatabaseConnection>,
    ids: &IdGenerator,
    counts: &Arc<dyn CountsCache>,
    sources: &Sources,
) -> Stores {
    Stores {
        apps: service::<App>(db, ids, None, None),
        connections: service(
            db,
            ids,
            Some(Arc::clone(counts)),
            Some(Arc::clone(&sources.connections)),
        ),
        devices: service::<Device>(db, ids, None, None),
        events: service(
            db,
            ids,
            Some(Arc::clone(counts)),
            Some(Arc::clone(&sources.events)),
        ),
        objects: service(
            db,
            ids,
            Some(Arc::clone(counts)),
            Some(Arc::clone(&sources.objects)),
        ),
        reactions: service(
            db,
            ids,
            Some(Arc::clone(counts)),
            Some(Arc::clone(&sources.reactions)),
        ),
        rules: service::<Rule>(db, ids, None, None),
        sessions: service::<Session>(db, ids, None, None),
        users: service::<User>(db, ids, None, None),
    }
}

fn spawn_consumer<E: Routed + 'static>(
    core: &Core,
    source: &Arc<dyn Source<E>>,
    sink: &Arc<dyn MessageSink>,
    shutdown: &watch::Receiver<bool>,
) -> JoinHandle<()> {
    let consumer = Consumer::new(core.clone(), Arc::clone(source), Arc::clone(sink));
    tokio::spawn(consumer.run(shutdown.clone()))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    init_tracing(&config);
    info!(env = %config.env, "starting fanout");

    let db = Arc::new(fanout_db::init(&config).await?);
    info!("connected to database");

    let redis = connect_redis(&config.redis.url).await?;
    info!("connected to redis");

    let ids = IdGenerator::new();
    let counts: Arc<dyn CountsCache> = Arc::new(RedisCountsCache::new(
        Arc::new(redis.clone()),
        Duration::from_secs(config.cache.count_ttl_secs),
    ));
    let sources = Sources::from_config(&config).await?;
    let core = Core::new(stores(&db, &ids, &counts, &sources), ids);
    core.stores().apps.setup(APPS_NAMESPACE).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut workers = Vec::new();
    if config.source.kind == SourceKind::Nop {
        warn!("nop change source, consumers not started");
    } else {
        let sink: Arc<dyn MessageSink> = if redis.is_connected() {
            Arc::new(RedisSink::new(redis.clone()))
        } else {
            Arc::new(LogSink)
        };
        workers.push(spawn_consumer(&core, &sources.connections, &sink, &shutdown_rx));
        workers.push(spawn_consumer(&core, &sources.events, &sink, &shutdown_rx));
        workers.push(spawn_consumer(&core, &sources.objects, &sink, &shutdown_rx));
        workers.push(spawn_consumer(&core, &sources.reactions, &sink, &shutdown_rx));
    }

    let probes: Vec<Arc<dyn Probe>> = vec![
        Arc::new(PgProbe(Arc::clone(&db))),
        Arc::new(RedisProbe(redis.clone())),
    ];
    let state = probes.into_iter().fold(
        AppState::new(core, config.ratelimit.clone()).with_limiter(Arc::new(RedisLimiter::new(
            redis.clone(),
            config.redis.ratelimit_prefix.clone(),
        ))),
        AppState::with_probe,
    );

    let listener = tokio::net::TcpListener::bind(config.listen_addr()).await?;
    info!(addr = %config.listen_addr(), "listening");
    let telemetry_listener = tokio::net::TcpListener::bind(&config.server.telemetry_addr).await?;
    info!(addr = %config.server.telemetry_addr, "telemetry listening");

    let api = axum::serve(listener, fanout_api::app(state))
        .with_graceful_shutdown(stopped(shutdown_rx.clone()))
        .into_future();
    let telemetry = axum::serve(telemetry_listener, fanout_api::telemetry())
        .with_graceful_shutdown(stopped(shutdown_rx.clone()))
        .into_future();
    let signal = async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    };

    let (api_res, telemetry_res, ()) = tokio::join!(api, telemetry, signal);
    if let Err(e) = telemetry_res {
        error!(error = %e, "telemetry listener failed");
    }

    for worker in workers {
        if let Err(e) = worker.await {
            error!(error = %e, "consumer task failed");
        }
    }

    info!("shutdown complete");
    api_res.map_err(Into::into)
}
