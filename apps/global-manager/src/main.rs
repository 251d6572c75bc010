//! 全局组件管理器服务
//!
//! 在 UDP 上提供集群目录；`--query` 连接一个正在运行的实例并以 JSON 打印目录。

use anyhow::{Context, Result, bail};
use armature::manager::{GlobalComponentManager, ManagerConfig, Transport, UdpTransport};
use armature::protocol::{PeerAddress, Request, Response};
use clap::{Parser, ValueEnum};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tracing::info;

/// 目录状态打印间隔
const STATUS_INTERVAL: Duration = Duration::from_secs(30);

/// 查询目标
#[derive(Clone, Copy, Debug, ValueEnum)]
enum Query {
    Processes,
    Connections,
}

/// Armature 全局组件管理器
#[derive(Parser, Debug)]
#[command(name = "armature-gcm")]
#[command(about = "Armature global component manager - cluster directory over UDP", long_about = None)]
struct Args {
    /// UDP 监听地址
    ///
    /// 格式: IP:PORT (例如: 127.0.0.1:18890)
    #[arg(long, default_value = "127.0.0.1:18890")]
    udp: String,

    /// TOML 配置文件（`[manager]` / `[transport]` 段）
    ///
    /// 配置中的 `listen_address` 优先于 `--udp`
    #[arg(long)]
    config: Option<String>,

    /// 默认日志过滤（`RUST_LOG` 优先）
    #[arg(long, default_value = "info")]
    log_level: String,

    /// 不启动服务，查询 `--udp` 上正在运行的实例
    #[arg(long, value_enum)]
    query: Option<Query>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    armature::init_logger(&args.log_level);

    let udp: PeerAddress = format!("udp://{}", args.udp)
        .parse()
        .with_context(|| format!("invalid UDP address '{}'", args.udp))?;

    if let Some(query) = args.query {
        return run_query(&udp, query);
    }

    let mut config = match &args.config {
        Some(path) => ManagerConfig::load(path).with_context(|| format!("loading {}", path))?,
        None => ManagerConfig::new("gcm"),
    };
    if config.transport.listen_address.is_none() {
        config.transport.listen_address = Some(udp.to_string());
    }

    let gcm = GlobalComponentManager::from_config(&config, Arc::new(UdpTransport::new()))
        .context("failed to start global component manager")?;
    let Some(address) = gcm.address() else {
        bail!("global component manager is not listening");
    };

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        eprintln!("\nReceived interrupt signal. Shutting down...");
        r.store(false, Ordering::SeqCst);
    })
    .context("failed to set signal handler")?;

    eprintln!("Armature GCM started on {}. Press Ctrl+C to stop.", address);

    let mut waited = Duration::ZERO;
    while running.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(100));
        waited += Duration::from_millis(100);
        if waited >= STATUS_INTERVAL {
            waited = Duration::ZERO;
            info!(
                "{} process(es), {} connection(s)",
                gcm.processes().len(),
                gcm.connections().len()
            );
        }
    }

    gcm.shutdown();
    info!("Armature GCM stopped");
    Ok(())
}

fn run_query(at: &PeerAddress, query: Query) -> Result<()> {
    let request = match query {
        Query::Processes => Request::ListProcesses,
        Query::Connections => Request::ListConnections,
    };
    let response = UdpTransport::new()
        .call(at, &request, Duration::from_secs(2))
        .with_context(|| format!("querying {}", at))?;

    let json = match response {
        Response::Processes(list) => serde_json::to_string_pretty(&list)?,
        Response::Connections(list) => serde_json::to_string_pretty(&list)?,
        Response::Error { code, message } => bail!("{} ({})", message, code),
        other => bail!("unexpected response: {:?}", other),
    };
    println!("{}", json);
    Ok(())
}
