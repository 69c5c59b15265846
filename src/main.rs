//! depscan 命令行
//!
//! ```bash
//! depscan scan lodash@4.17.15 left-pad@1.0.0 --preset balanced
//! depscan scan --file packages.json --filter
//! depscan list
//! depscan resume <task-id>
//! ```
//!
//! 扫描过程中按 Ctrl-C 会暂停任务，之后可用 `resume` 从断点继续。

use clap::{Parser, Subcommand};
use depscan::config::ScannerConfig;
use depscan::error::{Result, ScanError};
use depscan::scan::{PackageRef, ScanConfig};
use depscan::tasks::{ScanEvent, ScanOrchestrator, ScanRequest, ScanTask};
use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "depscan")]
#[command(about = "依赖漏洞后台扫描", long_about = None)]
struct Args {
    /// YAML 配置文件；未指定时读取 DEPSCAN_* 环境变量
    #[arg(short, long, env = "DEPSCAN_CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 创建扫描任务并在前台跟随进度
    Scan {
        /// 形如 name@version 的包
        packages: Vec<String>,
        /// 从 JSON 文件读取包列表（[{"name": "...", "version": "...", "kind": "dev"}]）
        #[arg(short, long)]
        file: Option<String>,
        /// 扫描配置：quick / balanced / thorough
        #[arg(short, long, default_value = "balanced")]
        preset: String,
        #[arg(short, long)]
        name: Option<String>,
        /// 按扫描配置过滤依赖类型
        #[arg(long)]
        filter: bool,
        /// 只创建，不开始
        #[arg(long)]
        no_start: bool,
    },
    /// 恢复已暂停或待开始的任务
    Resume { task_id: String },
    /// 取消任务
    Cancel { task_id: String },
    /// 删除任务（活动或历史）
    Delete { task_id: String },
    /// 列出活动任务与历史
    List,
    /// 查看任务详情
    Show { task_id: String },
    /// 立即清理过期任务
    Cleanup,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("depscan=info")),
        )
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => ScannerConfig::load(path)?,
        None => ScannerConfig::from_env()?,
    };
    let orchestrator = ScanOrchestrator::from_config(&config).await?;

    match args.command {
        Command::Scan {
            packages,
            file,
            preset,
            name,
            filter,
            no_start,
        } => {
            let scan_config = ScanConfig::preset(&preset)
                .ok_or_else(|| ScanError::Other(format!("未知的扫描配置: {preset}")))?;
            let packages = collect_packages(packages, file.as_deref()).await?;
            let mut request = ScanRequest::new(packages, scan_config)
                .apply_filter(filter)
                .start_immediately(!no_start);
            if let Some(name) = name {
                request = request.name(name);
            }

            let events = orchestrator.event_stream();
            let task_id = orchestrator.create_task(request).await;
            println!("📝 已创建任务 {task_id}");
            if !no_start {
                follow(&orchestrator, &task_id, events).await;
            }
        }
        Command::Resume { task_id } => {
            let events = orchestrator.event_stream();
            if !orchestrator.start(&task_id).await {
                return Err(ScanError::Other(format!("任务 {task_id} 无法恢复")));
            }
            follow(&orchestrator, &task_id, events).await;
        }
        Command::Cancel { task_id } => {
            report(orchestrator.cancel(&task_id).await, "已取消", &task_id);
        }
        Command::Delete { task_id } => {
            report(orchestrator.delete(&task_id).await, "已删除", &task_id);
        }
        Command::List => {
            let stats = orchestrator.task_stats();
            println!(
                "活动 {} (运行 {} / 暂停 {} / 待开始 {})，历史: 完成 {} / 失败 {} / 取消 {}",
                stats.active,
                stats.running,
                stats.paused,
                stats.pending,
                stats.completed,
                stats.failed,
                stats.cancelled
            );
            for task in orchestrator
                .list_active()
                .iter()
                .chain(orchestrator.list_history().iter())
            {
                print_row(task);
            }
        }
        Command::Show { task_id } => match orchestrator.get_task(&task_id) {
            Some(task) => print_detail(&task),
            None => println!("❓ 找不到任务 {task_id}"),
        },
        Command::Cleanup => {
            let evicted = orchestrator.manual_cleanup().await;
            println!("🧹 清理了 {evicted} 个过期任务");
        }
    }
    Ok(())
}

async fn collect_packages(args: Vec<String>, file: Option<&str>) -> Result<Vec<PackageRef>> {
    let mut packages = match file {
        Some(path) => {
            let raw = tokio::fs::read_to_string(path).await?;
            serde_json::from_str::<Vec<PackageRef>>(&raw)
                .map_err(|e| ScanError::Other(format!("包列表解析失败: {e}")))?
        }
        None => Vec::new(),
    };
    for arg in args {
        packages.push(arg.parse()?);
    }
    if packages.is_empty() {
        return Err(ScanError::Other("没有要扫描的包".to_string()));
    }
    Ok(packages)
}

/// 打印进度直到扫描循环结束；Ctrl-C 暂停任务
async fn follow(
    orchestrator: &ScanOrchestrator,
    task_id: &str,
    events: impl Stream<Item = ScanEvent>,
) {
    let shutdown = CancellationToken::new();
    let sweeper = orchestrator.spawn_sweeper(shutdown.clone());
    tokio::pin!(events);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                if orchestrator.pause(task_id).await {
                    println!("\n⏸️ 已暂停，使用 `depscan resume {task_id}` 继续");
                }
                orchestrator.wait_for_idle().await;
                break;
            }
            _ = orchestrator.wait_for_idle() => break,
            Some(event) = events.next() => print_event(&event),
        }
    }
    shutdown.cancel();
    let _ = sweeper.await;

    if let Some(task) = orchestrator.get_task(task_id) {
        print_detail(&task);
    }
}

fn print_event(event: &ScanEvent) {
    match event {
        ScanEvent::Progress { progress, .. } => println!(
            "🔍 [{}/{}] {:.0}% {}",
            progress.current + 1,
            progress.total,
            progress.percentage,
            progress.current_label
        ),
        ScanEvent::Waiting { label, .. } => println!("⏳ {label}"),
        ScanEvent::PackageFailed { package, error, .. } => {
            println!("⚠️ {package} 查询失败，按无漏洞记录: {error}")
        }
        ScanEvent::StatusChanged { task_id, status } => println!("🔄 {task_id} → {status}"),
        ScanEvent::Finished { status, .. } => println!("🏁 扫描结束: {status}"),
    }
}

fn print_row(task: &ScanTask) {
    println!(
        "{}  {:<10} {:<24} {}",
        task.id,
        task.status,
        task.name,
        task.summary()
    );
}

fn print_detail(task: &ScanTask) {
    println!("任务: {} ({})", task.name, task.id);
    println!("状态: {}  配置: {}", task.status, task.config.name);
    println!("摘要: {}", task.summary());
    if let Some(results) = &task.results {
        for result in results.iter().filter(|r| !r.is_clean()) {
            println!("  📦 {}", result.package_name);
            for vuln in &result.vulnerabilities {
                let fix = vuln.fixed_version.as_deref().unwrap_or("暂无修复");
                println!("     {:?} {} (修复版本: {})", vuln.severity, vuln.cve_id, fix);
            }
        }
    }
}

fn report(applied: bool, what: &str, task_id: &str) {
    if applied {
        println!("✅ {what} {task_id}");
    } else {
        println!("❓ 任务 {task_id} 不存在或状态不允许该操作");
    }
}
