use crate::domain::geometry::Catalog;
use crate::domain::model::TransformResult;
use crate::utils::error::Result;
use async_trait::async_trait;

pub trait Storage: Send + Sync {
    fn read_file(&self, path: &str) -> impl std::future::Future<Output = Result<Vec<u8>>> + Send;
    fn write_file(
        &self,
        path: &str,
        data: &[u8],
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// Resolves projection WKT to an EPSG code.
#[async_trait]
pub trait SridLookup: Send + Sync {
    async fn lookup(&self, wkt: &str) -> Result<Option<i32>>;
}

#[async_trait]
pub trait Pipeline: Send + Sync {
    async fn extract(&self) -> Result<Catalog>;
    async fn transform(&self, catalog: Catalog) -> Result<TransformResult>;
    async fn load(&self, result: TransformResult) -> Result<String>;
}
