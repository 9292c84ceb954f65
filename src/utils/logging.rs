/// 日志工具模块
///
/// 提供日志初始化、格式化和输出的辅助函数
use tracing::info;

use crate::infrastructure::StatusCounts;

/// 初始化日志
///
/// # 参数
/// - `verbose`: 0 = info，1 = debug，更大 = trace
///
/// 设置了 `RUST_LOG` 时以环境变量为准。
pub fn init(verbose: u8) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = match verbose {
        0 => "transcript_digest=info",
        1 => "transcript_digest=debug",
        _ => "transcript_digest=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    let _ = fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .try_init();
}

/// 记录程序启动信息
///
/// # 参数
/// - `command`: 子命令名称
/// - `max_concurrency`: 最大并发数
pub fn log_startup(command: &str, max_concurrency: usize) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - {}", command);
    info!("📊 最大并发数: {}", max_concurrency);
    info!("{}", "=".repeat(60));
}

/// 记录单个分类的开始
pub fn log_category_start(index: usize, total: usize, label: &str) {
    info!("\n{}", "=".repeat(60));
    info!("📦 [{}/{}] 分类: {}", index, total, label);
    info!("{}", "=".repeat(60));
}

/// 打印最终统计信息
///
/// # 参数
/// - `counts`: 进度存储中各状态的数量
/// - `skipped`: 本次运行跳过的数量
pub fn print_final_stats(counts: &StatusCounts, skipped: usize) {
    info!("\n{}", "=".repeat(60));
    info!("📊 全部处理完成统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("✅ 完成: {}/{}", counts.done, counts.total());
    info!("❌ 失败: {}", counts.failed);
    info!("⏭️ 跳过: {}", skipped);
    if counts.pending > 0 {
        info!("⏳ 待处理: {}", counts.pending);
    }
    info!("{}", "=".repeat(60));
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}

/// 千位分隔的数字，例如 `47000` → `47,000`
pub fn format_thousands(value: usize) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}
