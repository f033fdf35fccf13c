use clap::Parser;

use caliban::cli::{Cli, Commands};
use caliban::config::{get_config, init_config};
use caliban::runtime::modes;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Serve);

    // 生成配置不需要加载现有配置
    if let Commands::GenerateConfig { output } = &command {
        return modes::run_generate_config(output.as_deref());
    }

    init_config(cli.config.as_deref());
    let config = get_config();
    if let Err(e) = config.validate() {
        eprintln!("{}", e.format_colored());
        std::process::exit(1);
    }

    // 日志 guard 必须存活到进程结束
    let _guard = match caliban::system::init_logging(&config.logging) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("{}", e.format_colored());
            std::process::exit(1);
        }
    };

    match command {
        Commands::Serve => modes::run_server().await,
        Commands::Inspect { session_id, debug } => modes::run_inspect(&session_id, debug).await,
        Commands::GenerateConfig { .. } => Ok(()),
    }
}
