mod commands;

use anyhow::Result;
use clap::Parser;

use commands::Cli;
use transcript_digest::utils::logging;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 初始化日志
    logging::init(cli.verbose);

    // 加载配置并运行子命令
    commands::run(cli).await
}
