use clap::Parser;
use spandex::utils::error::{ErrorCategory, SpandexError};
use spandex::utils::{logger, validation::Validate};
use spandex::{load_config, CliConfig, EtlEngine, LocalStorage, SpandexPipeline};

fn exit_code(e: &SpandexError) -> i32 {
    match e.category() {
        ErrorCategory::Configuration => 3,
        ErrorCategory::Network => 2,
        ErrorCategory::Input | ErrorCategory::Data | ErrorCategory::Spatial => 1,
    }
}

fn fail(e: SpandexError) -> ! {
    tracing::error!(
        "❌ spandex failed: {} (Category: {:?}, Severity: {:?})",
        e,
        e.category(),
        e.severity()
    );
    tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());
    eprintln!("❌ {}", e.user_friendly_message());
    eprintln!("💡 建議: {}", e.recovery_suggestion());
    std::process::exit(exit_code(&e));
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliConfig::parse();

    // 初始化日誌
    if cli.json_logs {
        logger::init_json_logger();
    } else {
        logger::init_cli_logger(cli.verbose);
    }
    tracing::debug!("CLI config: {:?}", cli);

    let mut config = load_config(cli.config.as_deref()).unwrap_or_else(|e| fail(e));
    if let Some(seed) = cli.seed {
        tracing::info!("🔧 Seed overridden to: {}", seed);
        config.project.seed = Some(seed);
    }

    // 驗證配置
    if let Err(e) = config.validate() {
        tracing::error!("❌ Configuration validation failed: {}", e);
        fail(e);
    }
    tracing::info!(
        "🚀 Project '{}': {} steps, data from {}",
        config.project.name,
        config.steps.len(),
        config.data.directory
    );

    let storage = LocalStorage::new(config.export.path.clone());
    let engine = EtlEngine::new(SpandexPipeline::new(storage, config));

    if cli.dry_run {
        let reports = engine.dry_run().await.unwrap_or_else(|e| fail(e));
        println!("🔍 Dry run finished: {} steps", reports.len());
        return Ok(());
    }

    match engine.run().await {
        Ok(output_path) => {
            println!("✅ spandex run completed successfully!");
            println!("📁 Output saved to: {}", output_path);
            Ok(())
        }
        Err(e) => fail(e),
    }
}
