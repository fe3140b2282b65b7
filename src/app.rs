use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{load_config, AppConfig, ConfigWatcher};
use crate::ltm::{LtmClient, MembershipFetcher};
use crate::metrics::MetricsCollector;
use crate::router::create_app_router;
use crate::scheduler::Scheduler;
use crate::store::PoolStore;

/// 应用状态，注入HTTP处理器
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
    pub store: Arc<PoolStore>,
}

impl AppState {
    pub fn new(store: Arc<PoolStore>) -> Self {
        Self {
            scheduler: Arc::new(Scheduler::new(store.clone())),
            store,
        }
    }
}

/// 调度器应用：持有共享状态并驱动全部后台任务
pub struct SchedulerApp {
    config_path: PathBuf,
    config: Arc<RwLock<AppConfig>>,
    store: Arc<PoolStore>,
    ltm: Arc<LtmClient>,
    collector: Arc<MetricsCollector>,
    fetcher: MembershipFetcher,
    running: Arc<RwLock<bool>>,
}

impl SchedulerApp {
    pub fn new(config_path: impl AsRef<Path>, config: AppConfig) -> Result<Self> {
        let store = Arc::new(PoolStore::new());
        let ltm = Arc::new(LtmClient::new(
            &config.f5.host,
            config.f5.port,
            &config.f5.username,
            &config.f5.password,
        )?);
        let collector = Arc::new(MetricsCollector::new(config.scheduler.scrape_concurrency)?);
        let fetcher = MembershipFetcher::new(ltm.clone(), store.clone());

        Ok(Self {
            config_path: config_path.as_ref().to_path_buf(),
            config: Arc::new(RwLock::new(config)),
            store,
            ltm,
            collector,
            fetcher,
            running: Arc::new(RwLock::new(false)),
        })
    }

    pub fn store(&self) -> Arc<PoolStore> {
        self.store.clone()
    }

    /// 启动全部后台任务并阻塞运行HTTP服务，直到收到退出信号
    pub async fn run(&self) -> Result<()> {
        {
            let mut running = self.running.write().await;
            if *running {
                return Ok(());
            }
            *running = true;
        }

        let (api_host, api_port) = {
            let config = self.config.read().await;
            (config.global.api_host.clone(), config.global.api_port)
        };

        let tasks = vec![
            self.spawn_config_monitor_task(),
            self.spawn_pool_fetch_task(),
            self.spawn_metrics_collection_task(),
        ];
        info!("scheduler started, all background tasks are running");

        // HTTP服务
        let state = AppState::new(self.store.clone());
        let app = create_app_router().with_state(state);
        let bind_addr = format!("{api_host}:{api_port}");
        let listener = tokio::net::TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("failed to bind API listener on {bind_addr}"))?;
        info!("API server listening on http://{}", listener.local_addr()?);

        let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());
        let result = server.await;

        self.stop(tasks).await;
        result.map_err(Into::into)
    }

    /// 停止调度器：置停运行标志、停掉后台任务、清理LTM token
    async fn stop(&self, tasks: Vec<JoinHandle<()>>) {
        info!("stopping scheduler...");
        {
            let mut running = self.running.write().await;
            *running = false;
        }

        for task in tasks {
            task.abort();
        }

        // 尽力删除LTM侧token
        self.ltm.shutdown().await;
        info!("scheduler stopped");
    }

    /// 配置文件监控任务（热加载）
    fn spawn_config_monitor_task(&self) -> JoinHandle<()> {
        let app = self.clone_refs();
        let mut watcher = ConfigWatcher::new(&self.config_path);

        tokio::spawn(async move {
            loop {
                let interval = app.config.read().await.global.interval;
                tokio::time::sleep(Duration::from_secs(interval)).await;
                if !*app.running.read().await {
                    break;
                }

                debug!("checking configuration file for updates");
                if !watcher.detect_changes() {
                    continue;
                }

                info!("configuration file change detected, starting hot reload");
                match load_config(watcher.path()) {
                    Ok(new_config) => {
                        app.apply_config_changes(new_config).await;
                    }
                    Err(e) => {
                        // 热加载失败不致命：保留旧配置继续运行
                        error!("configuration hot reload failed, keeping previous config: {}", e);
                    }
                }
            }
        })
    }

    /// Pool成员拉取任务
    fn spawn_pool_fetch_task(&self) -> JoinHandle<()> {
        let app = self.clone_refs();

        tokio::spawn(async move {
            loop {
                let interval = app.config.read().await.scheduler.pool_fetch_interval;
                tokio::time::sleep(Duration::from_secs(interval)).await;
                if !*app.running.read().await {
                    break;
                }

                let config = app.config.read().await.clone();
                app.fetcher.fetch_all(&config).await;
            }
        })
    }

    /// 指标采集任务：各Pool并发采集，Pool内部自带tick防重入
    fn spawn_metrics_collection_task(&self) -> JoinHandle<()> {
        let app = self.clone_refs();

        tokio::spawn(async move {
            loop {
                let interval = app.config.read().await.scheduler.metrics_fetch_interval;
                tokio::time::sleep(Duration::from_millis(interval)).await;
                if !*app.running.read().await {
                    break;
                }

                let pools = app.store.all();
                if pools.is_empty() {
                    continue;
                }

                let mut handles = Vec::with_capacity(pools.len());
                for pool in pools {
                    let collector = app.collector.clone();
                    handles.push(tokio::spawn(async move {
                        collector.collect_pool(pool).await;
                    }));
                }
                for handle in handles {
                    if let Err(e) = handle.await {
                        error!("pool metrics task panicked: {}", e);
                    }
                }
            }
        })
    }

    /// 热加载入口（测试亦直接使用）
    pub async fn apply_config_changes(&self, new_config: AppConfig) {
        apply_config_changes(&self.config, &self.store, new_config).await;
    }

    fn clone_refs(&self) -> AppRefs {
        AppRefs {
            config: self.config.clone(),
            store: self.store.clone(),
            collector: self.collector.clone(),
            fetcher: self.fetcher.clone(),
            running: self.running.clone(),
        }
    }
}

/// 后台任务共享的引用束
#[derive(Clone)]
struct AppRefs {
    config: Arc<RwLock<AppConfig>>,
    store: Arc<PoolStore>,
    collector: Arc<MetricsCollector>,
    fetcher: MembershipFetcher,
    running: Arc<RwLock<bool>>,
}

impl AppRefs {
    async fn apply_config_changes(&self, new_config: AppConfig) {
        apply_config_changes(&self.config, &self.store, new_config).await;
    }
}

/// 应用新配置：Pool增删与可变字段的原地更新。
/// 成员与指标状态重建代价高，热加载绝不推倒重来。
pub async fn apply_config_changes(
    config: &RwLock<AppConfig>,
    store: &PoolStore,
    new_config: AppConfig,
) {
    let old_config = config.read().await.clone();

    if old_config == new_config {
        debug!("configuration unchanged after reload");
        return;
    }

    // Pool身份集合的差分
    let old_keys: HashSet<(String, String)> = old_config
        .pools
        .iter()
        .map(|p| (p.partition.clone(), p.name.clone()))
        .collect();
    let new_keys: HashSet<(String, String)> = new_config
        .pools
        .iter()
        .map(|p| (p.partition.clone(), p.name.clone()))
        .collect();

    for (partition, name) in old_keys.difference(&new_keys) {
        info!(pool = %format!("{partition}/{name}"), "pool dropped from configuration");
        store.remove(partition, name);
    }

    for (partition, name) in new_keys.difference(&old_keys) {
        info!(pool = %format!("{partition}/{name}"), "pool added to configuration, will be created on next fetch");
    }

    // 留存Pool的可变字段原地更新
    for pool_config in &new_config.pools {
        let Some(pool) = store.get(&pool_config.partition, &pool_config.name) else {
            continue;
        };
        let mode = new_config.resolve_mode(pool_config);
        let Some(engine_type) = pool_config.engine() else {
            continue;
        };
        let Some(algorithm) = mode.algorithm() else {
            continue;
        };
        pool.apply_settings(
            engine_type,
            algorithm,
            mode.score_params(),
            pool_config.fallback_settings(),
            pool_config.metrics_endpoint(),
        )
        .await;
    }

    // 注册表中可能残留已不在配置里的Pool（例如拉取失败清理与配置
    // 变更交错），一并清掉
    for pool in store.all() {
        let key = (pool.partition().to_string(), pool.name().to_string());
        if !new_keys.contains(&key) {
            store.remove(pool.partition(), pool.name());
        }
    }

    // 需要重启才能生效的变更仅提示
    if old_config.global.api_host != new_config.global.api_host
        || old_config.global.api_port != new_config.global.api_port
    {
        warn!("API listen address change requires a restart to take effect");
    }
    if old_config.global.log_level != new_config.global.log_level {
        warn!("log_level change requires a restart to take effect");
    }
    if old_config.f5 != new_config.f5 {
        warn!("f5 connection change requires a restart to take effect");
    }

    *config.write().await = new_config;
    info!("hot configuration update completed");
}

/// 等待退出信号（ctrl-c或SIGTERM）
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C signal handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}

/// 初始化日志：RUST_LOG优先，否则使用配置中的log_level
fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_ascii_lowercase()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_file(true)
        .with_line_number(true)
        .init();
}

/// 启动应用服务器
pub async fn start_server(config_path: impl AsRef<Path>) -> Result<()> {
    let config_path = config_path.as_ref();
    let config = load_config(config_path)?;
    init_tracing(&config.global.log_level);

    info!("starting LLM inference gateway scheduler...");
    info!(config = %config_path.display(), pools = config.pools.len(), "configuration loaded");

    let app = SchedulerApp::new(config_path, config)?;
    app.run().await
}
