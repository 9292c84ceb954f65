//! 命令行定义与子命令路由

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use transcript_digest::utils::logging::log_startup;
use transcript_digest::{
    run_consolidate, run_summarize, Config, ConsolidateOptions, OpenAiTransform,
    SummarizeOptions,
};

/// 视频转录摘要与分类整理工具
#[derive(Parser)]
#[command(
    name = "transcript-digest",
    version,
    about = "Summarize video transcripts and consolidate category digests with an LLM.",
    long_about = None,
)]
pub struct Cli {
    /// 日志详细程度 (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// TOML 配置文件
    #[arg(short, long, global = true, env = "DIGEST_CONFIG")]
    pub config: Option<PathBuf>,

    /// 最大并发调用数
    #[arg(long, global = true)]
    pub concurrency: Option<usize>,

    /// 模型名称
    #[arg(long, global = true)]
    pub model: Option<String>,

    /// OpenAI 兼容接口地址
    #[arg(long, global = true)]
    pub api_base: Option<String>,

    /// 单次调用的最大输出 tokens
    #[arg(long, global = true)]
    pub max_tokens: Option<u32>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// 为 index.json 中已转录的视频逐个生成摘要
    Summarize {
        /// 含 index.json 的目录
        input_dir: PathBuf,

        /// 输出文档（默认 <input_dir>/summaries.md）
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// 自定义提示词文件，可使用 {bullet_count} 和 {title}
        #[arg(long)]
        prompt_file: Option<PathBuf>,

        /// 重新处理上次失败的条目
        #[arg(long)]
        retry_failed: bool,
    },

    /// 整理分类摘要文件
    Consolidate {
        /// 单个 .md 文件或目录
        input: PathBuf,

        /// 输出目录（默认 <输入目录>/../_consolidated）
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// 每个分组的 token 预算
        #[arg(long)]
        chunk_tokens: Option<usize>,

        /// 只输出计划，不调用模型
        #[arg(long)]
        dry_run: bool,

        /// 输出文件已存在时跳过
        #[arg(long)]
        skip_existing: bool,

        /// 重新处理上次失败的文件
        #[arg(long)]
        retry_failed: bool,
    },
}

/// 运行子命令
pub async fn run(cli: Cli) -> Result<()> {
    let mut config = load_config(&cli)?;

    match cli.command {
        Command::Summarize {
            input_dir,
            output,
            prompt_file,
            retry_failed,
        } => {
            if let Some(max_tokens) = cli.max_tokens {
                config.summary_max_tokens = max_tokens;
            }
            config.validate().context("配置无效")?;
            require_api_key(&config)?;
            log_startup("批量摘要", config.max_concurrency);

            let transform = Arc::new(OpenAiTransform::new(&config, config.summary_max_tokens));
            let options = SummarizeOptions {
                input_dir,
                output,
                prompt_file,
                retry_failed,
            };
            let report = run_summarize(transform, &config, &options)
                .await
                .context("批量摘要失败")?;
            info!(
                "本次完成 {}，失败 {}，跳过 {}",
                report.processed, report.failed, report.skipped
            );
        }
        Command::Consolidate {
            input,
            output,
            chunk_tokens,
            dry_run,
            skip_existing,
            retry_failed,
        } => {
            if let Some(max_tokens) = cli.max_tokens {
                config.max_output_tokens = max_tokens;
            }
            if let Some(chunk_tokens) = chunk_tokens {
                config.chunk_tokens = chunk_tokens;
            }
            config.validate().context("配置无效")?;
            if !dry_run {
                require_api_key(&config)?;
            }
            log_startup("分类整理", config.max_concurrency);

            let transform = Arc::new(OpenAiTransform::new(&config, config.max_output_tokens));
            let options = ConsolidateOptions {
                input,
                output_dir: output,
                dry_run,
                retry_failed,
                skip_existing,
            };
            let report = run_consolidate(transform, &config, &options)
                .await
                .context("分类整理失败")?;
            info!(
                "写入 {} 个文件，跳过 {}，输出目录: {}",
                report.written.len(),
                report.skipped,
                report.output_dir.display()
            );
        }
    }

    Ok(())
}

/// 默认值 → TOML 文件 → 环境变量 → 命令行参数
fn load_config(cli: &Cli) -> Result<Config> {
    let base = match &cli.config {
        Some(path) => Config::from_toml_file(path)
            .with_context(|| format!("加载配置文件失败: {}", path.display()))?,
        None => Config::default(),
    };
    let mut config = base.with_env().context("读取环境变量失败")?;

    if let Some(concurrency) = cli.concurrency {
        config.max_concurrency = concurrency;
    }
    if let Some(model) = &cli.model {
        config.llm_model_name = model.clone();
    }
    if let Some(api_base) = &cli.api_base {
        config.llm_api_base_url = api_base.clone();
    }
    Ok(config)
}

fn require_api_key(config: &Config) -> Result<()> {
    if config.llm_api_key.trim().is_empty() {
        bail!("缺少 API key，请设置环境变量 LLM_API_KEY 或在配置文件中填写 llm_api_key");
    }
    Ok(())
}
