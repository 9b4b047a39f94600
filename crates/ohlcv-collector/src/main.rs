//! OHLCV collector CLI.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use ohlcv_collector::{
    modules, BackfillOrchestrator, CandleAggregator, CollectorConfig, CollectorError,
    HistoryInitializer, PriceCollector, Result,
};
use ohlcv_core::{
    init_logging, BackfillWindow, LogFormat, PipelineError, PipelineResult, TrackedAsset,
};
use ohlcv_data::{
    AssetDirectory, CandleStore, Database, GeckoTerminalClient, JupiterPriceClient,
    MemoryAssetDirectory, MemoryStore, RateLimitedHistoryFetcher, RunLock, SampleStore,
    TimescaleStore,
};
use serde::Serialize;

#[derive(Parser)]
#[command(name = "ohlcv-collector")]
#[command(about = "OHLCV candle aggregation and backfill", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// 설정 파일 경로 (기본: config/default.toml, 있으면)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// 로그 레벨 (trace, debug, info, warn, error). 설정 파일보다 우선합니다
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// 로그 형식 (pretty, json, compact)
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    /// 데이터베이스 없이 인메모리 저장소로 실행 (결과는 저장되지 않음)
    #[arg(long, global = true)]
    dry_run: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// 데몬 모드: 실시간 가격 수집 + 분 단위 캔들 집계 (Ctrl-C로 종료)
    Daemon,

    /// 캔들 집계 한 회차 즉시 실행
    Tick {
        /// 기준 시각 (RFC3339, 기본: 현재)
        #[arg(long)]
        at: Option<String>,
    },

    /// 단일 자산 백필
    Backfill {
        /// 자산 ID (토큰 주소)
        #[arg(long)]
        asset: String,

        #[command(flatten)]
        window: WindowArgs,
    },

    /// 모든 활성 자산 백필
    BackfillAll {
        #[command(flatten)]
        window: WindowArgs,
    },

    /// 백필 상태와 추적 자산 수 출력
    Status,

    /// 데이터베이스 마이그레이션 실행
    Migrate,
}

/// 백필 구간 지정. 아무것도 없으면 최근 1일.
#[derive(Args, Debug, Default)]
struct WindowArgs {
    /// 시작 (RFC3339 또는 YYYY-MM-DD)
    #[arg(long, conflicts_with_all = ["hours", "days"])]
    start: Option<String>,

    /// 종료 (RFC3339 또는 YYYY-MM-DD, 기본: 현재)
    #[arg(long, requires = "start")]
    end: Option<String>,

    /// 최근 N시간
    #[arg(long, conflicts_with = "days")]
    hours: Option<i64>,

    /// 최근 N일
    #[arg(long)]
    days: Option<i64>,
}

impl WindowArgs {
    fn to_window(&self, now: DateTime<Utc>) -> PipelineResult<BackfillWindow> {
        match (&self.start, self.hours, self.days) {
            (Some(start), _, _) => {
                let end = match &self.end {
                    Some(end) => parse_time(end)?,
                    None => now,
                };
                BackfillWindow::from_dates(parse_time(start)?, end)
            }
            (None, Some(hours), _) => BackfillWindow::last_hours(now, hours),
            (None, None, Some(days)) => BackfillWindow::last_days(now, days),
            (None, None, None) => BackfillWindow::last_days(now, 1),
        }
    }
}

fn parse_time(value: &str) -> PipelineResult<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| PipelineError::Validation(format!("잘못된 시각 형식: {}", value)))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn failure(message: String) -> CollectorError {
    CollectorError::Other(message.into())
}

/// 저장소와 외부 소스를 연결한 실행 컨텍스트.
///
/// `--dry-run`이면 데이터베이스 대신 인메모리 저장소를 씁니다. 이때 백필 대상
/// 자산은 실행 시 등록되며 결과는 프로세스 종료와 함께 사라집니다.
struct Runtime {
    db: Option<Database>,
    samples: Arc<dyn SampleStore>,
    candles: Arc<dyn CandleStore>,
    assets: Arc<dyn AssetDirectory>,
    lock: Arc<dyn RunLock>,
    aggregator: Arc<CandleAggregator>,
    memory_assets: Option<Arc<MemoryAssetDirectory>>,
}

impl Runtime {
    async fn connect(config: &CollectorConfig) -> Result<Self> {
        let db = Database::connect(&config.app.database).await?;
        let store = Arc::new(TimescaleStore::new(db.clone()));
        let aggregator = Arc::new(CandleAggregator::new(
            store.clone(),
            store.clone(),
            store.clone(),
            config.aggregation.clone(),
        ));
        Ok(Self {
            db: Some(db),
            samples: store.clone(),
            candles: store.clone(),
            assets: store.clone(),
            lock: store,
            aggregator,
            memory_assets: None,
        })
    }

    fn in_memory(config: &CollectorConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let directory = Arc::new(MemoryAssetDirectory::default());
        let aggregator = Arc::new(CandleAggregator::new(
            store.clone(),
            store.clone(),
            directory.clone(),
            config.aggregation.clone(),
        ));
        Self {
            db: None,
            samples: store.clone(),
            candles: store.clone(),
            assets: directory.clone(),
            lock: store,
            aggregator,
            memory_assets: Some(directory),
        }
    }

    /// 인메모리 실행에서 대상 자산을 활성 상태로 등록합니다. DB 실행에서는 아무것도 하지 않습니다.
    async fn seed_asset(&self, asset_id: &str) -> Result<()> {
        if let Some(directory) = &self.memory_assets {
            if directory.get_asset(asset_id).await?.is_none() {
                directory.upsert(TrackedAsset::new(asset_id, asset_id)).await;
            }
        }
        Ok(())
    }

    fn orchestrator(&self, config: &CollectorConfig) -> Result<BackfillOrchestrator> {
        let source = Arc::new(GeckoTerminalClient::new(&config.app.history)?);
        let fetcher = Arc::new(RateLimitedHistoryFetcher::new(
            source,
            config.fetcher(),
            config.retry(),
        ));
        Ok(BackfillOrchestrator::new(
            self.aggregator.clone(),
            self.samples.clone(),
            self.candles.clone(),
            self.assets.clone(),
            self.lock.clone(),
            fetcher,
            config.backfill.clone(),
        ))
    }

    async fn close(&self) {
        if let Some(db) = &self.db {
            db.pool().close().await;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 설정 로드
    let config = CollectorConfig::load(cli.config.as_deref())?;

    // 로깅 초기화
    let mut log_config = config.logging();
    if let Some(level) = &cli.log_level {
        log_config.level = level.clone();
    }
    if let Some(format) = cli.log_format {
        log_config.format = format;
    }
    init_logging(log_config)?;

    tracing::info!("OHLCV Collector 시작");

    let runtime = if cli.dry_run {
        tracing::warn!("dry-run: 인메모리 저장소 사용, 결과는 저장되지 않음");
        Runtime::in_memory(&config)
    } else {
        let runtime = Runtime::connect(&config).await?;
        tracing::info!("데이터베이스 연결 성공");
        runtime
    };

    // 명령 실행
    let outcome = run_command(cli.command, &config, &runtime).await;

    runtime.close().await;
    tracing::info!("OHLCV Collector 종료");

    outcome
}

async fn run_command(command: Commands, config: &CollectorConfig, runtime: &Runtime) -> Result<()> {
    match command {
        Commands::Daemon => {
            let prices = if config.daemon.price_collection {
                let feed = Arc::new(JupiterPriceClient::new(&config.app.price_feed)?);
                Some(Arc::new(PriceCollector::new(
                    feed,
                    runtime.samples.clone(),
                    runtime.assets.clone(),
                )))
            } else {
                None
            };
            let initializer = if config.daemon.initialization {
                Some(Arc::new(HistoryInitializer::new(
                    Arc::new(runtime.orchestrator(config)?),
                    runtime.assets.clone(),
                    config.initializer.clone(),
                )))
            } else {
                None
            };

            let shutdown = async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!("종료 신호 대기 실패: {}", e);
                }
            };
            modules::run_daemon(
                runtime.aggregator.clone(),
                prices,
                initializer,
                config.daemon.clone(),
                shutdown,
            )
            .await;
        }
        Commands::Tick { at } => {
            let now = match at {
                Some(at) => parse_time(&at)?,
                None => Utc::now(),
            };
            let stats = runtime.aggregator.on_tick(now).await;
            print_json(&stats)?;
            if stats.errors > 0 {
                return Err(failure(format!("{}개 캔들 집계 실패", stats.errors)));
            }
        }
        Commands::Backfill { asset, window } => {
            let window = window.to_window(Utc::now())?;
            runtime.seed_asset(&asset).await?;
            let orchestrator = runtime.orchestrator(config)?;
            let result = orchestrator.run_backfill(&asset, window).await?;
            print_json(&result)?;
            if !result.success {
                return Err(failure(
                    result.error.unwrap_or_else(|| "백필 실패".to_string()),
                ));
            }
        }
        Commands::BackfillAll { window } => {
            let window = window.to_window(Utc::now())?;
            let orchestrator = runtime.orchestrator(config)?;
            let summary = orchestrator.run_backfill_all(window).await?;
            print_json(&summary)?;
            if summary.failed > 0 {
                return Err(failure(format!(
                    "{}/{}개 자산 백필 실패",
                    summary.failed, summary.total_assets
                )));
            }
        }
        Commands::Status => {
            let orchestrator = runtime.orchestrator(config)?;
            let assets = runtime.assets.list_active_assets().await?;
            let database_healthy = match &runtime.db {
                Some(db) => Some(db.health_check().await.unwrap_or(false)),
                None => None,
            };
            print_json(&serde_json::json!({
                "backfill": orchestrator.status().await,
                "databaseHealthy": database_healthy,
                "activeAssets": assets.len(),
                "timeframes": config.aggregation.timeframes,
            }))?;
        }
        Commands::Migrate => {
            let db = runtime.db.as_ref().ok_or_else(|| {
                CollectorError::Config("dry-run에서는 마이그레이션을 실행할 수 없습니다".to_string())
            })?;
            db.migrate().await?;
        }
    }

    Ok(())
}
