use crate::domain::model::StepReport;
use crate::domain::ports::Pipeline;
use crate::utils::error::Result;
use std::time::Instant;

pub struct EtlEngine<P: Pipeline> {
    pipeline: P,
}

impl<P: Pipeline> EtlEngine<P> {
    pub fn new(pipeline: P) -> Self {
        Self { pipeline }
    }

    pub async fn run(&self) -> Result<String> {
        let started = Instant::now();
        tracing::info!("🚀 Starting ETL process...");

        // Extract
        tracing::info!("📡 Extracting data...");
        let catalog = self.pipeline.extract().await?;
        tracing::info!("📥 Extracted {} tables", catalog.len());

        // Transform
        tracing::info!("🔄 Transforming data...");
        let result = self.pipeline.transform(catalog).await?;
        log_reports(&result.reports);

        // Load
        tracing::info!("💾 Loading data...");
        let output_path = self.pipeline.load(result).await?;
        tracing::info!(
            "✅ Output saved to: {} ({:.1}s)",
            output_path,
            started.elapsed().as_secs_f64()
        );

        Ok(output_path)
    }

    /// Extract and transform without loading anything.
    pub async fn dry_run(&self) -> Result<Vec<StepReport>> {
        tracing::info!("🔍 DRY RUN MODE - nothing will be written");
        let catalog = self.pipeline.extract().await?;
        for name in catalog.names() {
            tracing::info!("  📋 {}", name);
        }
        let result = self.pipeline.transform(catalog).await?;
        log_reports(&result.reports);
        Ok(result.reports)
    }
}

fn log_reports(reports: &[StepReport]) {
    for report in reports {
        match &report.detail {
            Some(detail) => tracing::info!(
                "  {} {}: {} -> {} rows, {}",
                report.step,
                report.table,
                report.rows_before,
                report.rows_after,
                detail
            ),
            None => tracing::info!(
                "  {} {}: {} -> {} rows",
                report.step,
                report.table,
                report.rows_before,
                report.rows_after
            ),
        }
    }
}
