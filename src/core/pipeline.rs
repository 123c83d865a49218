use crate::adapters::geojson::write_feature_collection;
use crate::adapters::store::export_bundle;
use crate::adapters::{DataLoader, Prj2EpsgClient};
use crate::config::{ProjectConfig, StepConfig};
use crate::core::columns::{broadcast, derive_column, ColumnOptions, Derived};
use crate::core::expr::eval_column;
use crate::core::spatial;
use crate::core::targets::scaling::scale_to_targets_from_table;
use crate::core::targets::synthesis::synthesize_from_table;
use crate::domain::geometry::{split_qualified, Catalog, GeoTable};
use crate::domain::model::{StepReport, TransformResult};
use crate::domain::ports::{Pipeline, SridLookup, Storage};
use crate::utils::error::{Result, SpandexError};
use geo::MultiPolygon;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::Duration;

pub const REPORT_FILE: &str = "spandex-report.json";

/// Loads the configured data directory, runs `[[steps]]` in order and
/// writes an export bundle.
pub struct SpandexPipeline<S: Storage> {
    storage: S,
    config: ProjectConfig,
    lookup: Option<Arc<dyn SridLookup>>,
}

impl<S: Storage> SpandexPipeline<S> {
    pub fn new(storage: S, config: ProjectConfig) -> Self {
        Self {
            storage,
            config,
            lookup: None,
        }
    }

    /// Use `lookup` for projection files without an EPSG authority,
    /// instead of the one configured in `[lookup]`.
    pub fn with_lookup(mut self, lookup: Arc<dyn SridLookup>) -> Self {
        self.lookup = Some(lookup);
        self
    }

    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    fn loader(&self) -> Result<DataLoader> {
        let loader = DataLoader::new(&self.config.data.directory, self.config.data.srid)?;
        if let Some(lookup) = &self.lookup {
            return Ok(loader.with_lookup(lookup.clone()));
        }
        match self.config.lookup.as_ref().filter(|_| self.config.lookup_enabled()) {
            Some(lookup) => {
                let mut client = Prj2EpsgClient::new(lookup.endpoint());
                if let Some(seconds) = lookup.timeout_seconds {
                    client = client.with_timeout(Duration::from_secs(seconds))?;
                }
                Ok(loader.with_lookup(Arc::new(client)))
            }
            None => Ok(loader),
        }
    }

    fn rng(&self) -> StdRng {
        match self.config.project.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }
}

fn rows(catalog: &Catalog, table: &str) -> usize {
    catalog.get(table).map(GeoTable::len).unwrap_or(0)
}

fn renamed(mut table: GeoTable, qualified_name: &str) -> GeoTable {
    let (schema, name) = split_qualified(qualified_name);
    table.schema = schema;
    table.name = name;
    table
}

/// Run one step against the catalog.
pub fn apply_step(catalog: &mut Catalog, step: &StepConfig, rng: &mut StdRng) -> Result<StepReport> {
    let report = |table: &str, before: usize, after: usize, detail: Option<String>| StepReport {
        step: step.name().to_string(),
        table: table.to_string(),
        rows_before: before,
        rows_after: after,
        detail,
    };

    match step {
        StepConfig::ConformSrids { srid, schema, fix } => {
            let reprojected = spatial::conform_srids(catalog, *srid, schema.as_deref(), *fix)?;
            let scope = schema.clone().unwrap_or_else(|| "*".to_string());
            Ok(report(
                &scope,
                0,
                0,
                Some(format!("{} geometry columns reprojected to {}", reprojected, srid)),
            ))
        }
        StepConfig::Tag {
            target,
            target_column,
            source,
            source_column,
            how,
        } => {
            let source_table = catalog.get(source)?.clone();
            let target_table = catalog.get_mut(target)?;
            let tagged = spatial::tag(target_table, target_column, &source_table, source_column, how)?;
            let n = target_table.len();
            Ok(report(target, n, n, Some(format!("{} rows tagged from {}", tagged, source))))
        }
        StepConfig::ProportionOverlap { target, over, column } => {
            let over_table = catalog.get(over)?.clone();
            let target_table = catalog.get_mut(target)?;
            spatial::proportion_overlap(target_table, &over_table, column)?;
            let n = target_table.len();
            Ok(report(target, n, n, None))
        }
        StepConfig::CalcArea { table } => {
            let t = catalog.get_mut(table)?;
            spatial::calc_area(t)?;
            Ok(report(table, t.len(), t.len(), None))
        }
        StepConfig::CalcDist { table, to } => {
            let geoms: Vec<MultiPolygon<f64>> = catalog.get(to)?.geom()?.values.iter().flatten().cloned().collect();
            let t = catalog.get_mut(table)?;
            spatial::calc_dist(t, &geoms)?;
            Ok(report(table, t.len(), t.len(), None))
        }
        StepConfig::Trim {
            target,
            trimmer,
            target_geom,
            trim_geom,
        } => {
            let trimmer_table = catalog.get(trimmer)?.clone();
            let trim_geom = match trim_geom {
                Some(name) => name.clone(),
                None => trimmer_table.geom_name()?,
            };
            let target_table = catalog.get_mut(target)?;
            let target_geom = match target_geom {
                Some(name) => name.clone(),
                None => target_table.geom_name()?,
            };
            let trimmed = spatial::trim(target_table, &target_geom, &trimmer_table, &trim_geom)?;
            let n = target_table.len();
            Ok(report(target, n, n, Some(format!("{} cuts", trimmed))))
        }
        StepConfig::ValidateGeometry { table, column } => {
            let t = catalog.get_mut(table)?;
            let summary = spatial::invalid_summary(t)?;
            let changed = spatial::validate(t, column.as_deref())?;
            let mut reasons: Vec<String> = summary.iter().map(|(r, n)| format!("{}: {}", r, n)).collect();
            reasons.sort();
            let detail = if reasons.is_empty() {
                format!("{} geometries repaired", changed)
            } else {
                format!("{} geometries repaired ({})", changed, reasons.join(", "))
            };
            Ok(report(table, t.len(), t.len(), Some(detail)))
        }
        StepConfig::GeometryQa { table, key, schema } => {
            let source = catalog.get(table)?.clone();
            let base = format!("{}.{}", schema, source.name);

            let invalid = spatial::geom_invalid(&source, Some(key))?;
            let duplicate = renamed(spatial::geom_duplicate(&source)?, &format!("{}_duplicate", base));
            let overlapping = spatial::geom_overlapping(&source, key, &format!("{}_overlapping", base))?;
            let unfilled = spatial::geom_unfilled(&source, &format!("{}_unfilled", base))?;

            let detail = format!(
                "{} invalid, {} duplicate, {} overlapping pairs, {} unfilled",
                invalid.len(),
                duplicate.len(),
                overlapping.len(),
                unfilled.len()
            );
            catalog.insert(GeoTable::new(&format!("{}_invalid", base), invalid));
            catalog.insert(duplicate);
            catalog.insert(overlapping);
            catalog.insert(unfilled);
            Ok(report(table, source.len(), source.len(), Some(detail)))
        }
        StepConfig::ScaleToTargets { table, targets } => {
            let targets_frame = catalog.get(targets)?.frame.clone();
            let t = catalog.get_mut(table)?;
            t.frame = scale_to_targets_from_table(&t.frame, &targets_frame)?;
            Ok(report(table, t.len(), t.len(), None))
        }
        StepConfig::Synthesize {
            table,
            geo_table,
            targets,
            output,
        } => {
            let source = catalog.get(table)?;
            if !source.geometries.is_empty() {
                return Err(SpandexError::synthesis(format!(
                    "{} has geometry columns; synthesis works on attribute tables",
                    source.qualified_name()
                )));
            }
            let before = source.len();
            let frame = synthesize_from_table(
                &source.frame,
                &catalog.get(geo_table)?.frame,
                &catalog.get(targets)?.frame,
                rng,
            )?;
            let after = frame.len();
            let output = output.as_deref().unwrap_or(table);
            catalog.insert(GeoTable::new(output, frame));
            Ok(report(output, before, after, None))
        }
        StepConfig::DeriveColumn {
            table,
            column,
            expr,
            fillna,
            astype,
            groupby,
            agg,
            into,
            key,
        } => {
            let opts = ColumnOptions {
                fillna: fillna.clone(),
                astype: astype.clone(),
                agg: *agg,
            };
            let t = catalog.get(table)?;
            let values = eval_column(&t.frame, expr)?;
            let groups = match groupby {
                Some(name) => Some(t.frame.column(name)?.to_vec()),
                None => None,
            };

            match derive_column(values, &opts, groups.as_deref())? {
                Derived::Column(values) => {
                    let t = catalog.get_mut(table)?;
                    t.frame.set_column(column, values)?;
                    Ok(report(table, t.len(), t.len(), None))
                }
                Derived::Grouped(grouped) => {
                    let into = into
                        .as_deref()
                        .ok_or_else(|| SpandexError::MissingConfigError { field: "into".to_string() })?;
                    let key = key.as_deref().or(groupby.as_deref()).unwrap_or_default();
                    let target = catalog.get_mut(into)?;
                    let values = broadcast(&grouped, &target.frame, key)?;
                    target.frame.set_column(column, values)?;
                    Ok(report(
                        into,
                        target.len(),
                        target.len(),
                        Some(format!("{} groups from {}", grouped.len(), table)),
                    ))
                }
            }
        }
        StepConfig::Duplicate {
            table,
            new_name,
            schema,
        } => {
            let copy = catalog.duplicate(table, new_name, schema)?;
            let n = copy.len();
            let name = copy.qualified_name();
            Ok(report(&name, rows(catalog, table), n, None))
        }
    }
}

#[async_trait::async_trait]
impl<S: Storage> Pipeline for SpandexPipeline<S> {
    async fn extract(&self) -> Result<Catalog> {
        let loader = self.loader()?;
        let mut catalog = Catalog::new();

        tracing::debug!("Loading from data directory {}", loader.directory().display());
        let mut total = loader.load_map(&mut catalog, &self.config.data.tables).await?;
        total += loader
            .load_multiple(&mut catalog, &self.config.data.categories)
            .await?;

        tracing::info!("📥 Extracted {} tables ({} rows)", catalog.len(), total);
        Ok(catalog)
    }

    async fn transform(&self, catalog: Catalog) -> Result<TransformResult> {
        let mut catalog = catalog;
        let mut rng = self.rng();
        let mut reports = Vec::with_capacity(self.config.steps.len());

        for (i, step) in self.config.steps.iter().enumerate() {
            tracing::info!("🔄 Step {}/{}: {}", i + 1, self.config.steps.len(), step.name());
            let report = apply_step(&mut catalog, step, &mut rng).map_err(|e| {
                tracing::error!("❌ Step {} ({}) failed: {}", i + 1, step.name(), e);
                e
            })?;
            tracing::debug!("{:?}", report);
            reports.push(report);
        }

        Ok(TransformResult { catalog, reports })
    }

    async fn load(&self, result: TransformResult) -> Result<String> {
        let export = &self.config.export;
        let filename = self.config.export_filename();

        let bundle = export_bundle(&result.catalog, &export.tables)?;
        tracing::debug!("Writing bundle ({} bytes) to storage", bundle.len());
        self.storage.write_file(filename, &bundle).await?;

        for table in &export.geojson {
            let geo_table = result.catalog.get(table)?;
            let name = format!("{}.geojson", geo_table.qualified_name());
            let text = write_feature_collection(geo_table)?;
            self.storage.write_file(&name, text.as_bytes()).await?;
            tracing::debug!("💾 Wrote {}", name);
        }

        let report = serde_json::to_string_pretty(&result.reports)?;
        self.storage.write_file(REPORT_FILE, report.as_bytes()).await?;

        Ok(format!("{}/{}", export.path, filename))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::geometry::GeometryColumn;
    use crate::domain::model::{Table, Value};
    use geo::polygon;

    fn square(x: f64, y: f64, size: f64) -> Option<MultiPolygon<f64>> {
        Some(MultiPolygon::new(vec![polygon![
            (x: x, y: y),
            (x: x + size, y: y),
            (x: x + size, y: y + size),
            (x: x, y: y + size),
        ]]))
    }

    fn catalog() -> Catalog {
        let parcels = GeoTable::new(
            "parcels",
            Table::from_columns(vec![("parcel_id", vec![1.into(), 2.into(), 3.into()])]).unwrap(),
        )
        .with_geometry(GeometryColumn::new(
            "geom",
            2227,
            vec![square(0.0, 0.0, 1.0), square(5.0, 5.0, 1.0), square(0.5, 0.0, 1.0)],
        ))
        .unwrap();
        let zones = GeoTable::new(
            "zones",
            Table::from_columns(vec![("zone_id", vec![10.into(), 20.into()])]).unwrap(),
        )
        .with_geometry(GeometryColumn::new(
            "geom",
            2227,
            vec![square(0.0, 0.0, 4.0), square(4.0, 4.0, 4.0)],
        ))
        .unwrap();

        let mut catalog = Catalog::new();
        catalog.insert(parcels);
        catalog.insert(zones);
        catalog
    }

    #[test]
    fn test_tag_then_derive_grouped_column() {
        let mut catalog = catalog();
        let mut rng = StdRng::seed_from_u64(0);

        let tag = StepConfig::Tag {
            target: "parcels".into(),
            target_column: "zone_id".into(),
            source: "zones".into(),
            source_column: "zone_id".into(),
            how: "point_in_poly".into(),
        };
        let report = apply_step(&mut catalog, &tag, &mut rng).unwrap();
        assert_eq!(report.detail.as_deref(), Some("3 rows tagged from zones"));

        let derive = StepConfig::DeriveColumn {
            table: "parcels".into(),
            column: "parcels".into(),
            expr: "parcel_id".into(),
            fillna: None,
            astype: None,
            groupby: Some("zone_id".into()),
            agg: Some(crate::core::columns::Agg::Count),
            into: Some("zones".into()),
            key: None,
        };
        apply_step(&mut catalog, &derive, &mut rng).unwrap();
        assert_eq!(
            catalog.get("zones").unwrap().frame.column("parcels").unwrap(),
            &[Value::Int(2), Value::Int(1)]
        );
    }

    #[test]
    fn test_geometry_qa_writes_tables() {
        let mut catalog = catalog();
        let mut rng = StdRng::seed_from_u64(0);
        let qa = StepConfig::GeometryQa {
            table: "parcels".into(),
            key: "parcel_id".into(),
            schema: "qa".into(),
        };
        let report = apply_step(&mut catalog, &qa, &mut rng).unwrap();

        assert_eq!(
            report.detail.as_deref(),
            Some("0 invalid, 0 duplicate, 1 overlapping pairs, 0 unfilled")
        );
        for name in ["qa.parcels_invalid", "qa.parcels_duplicate", "qa.parcels_overlapping", "qa.parcels_unfilled"] {
            assert!(catalog.contains(name), "missing {}", name);
        }
    }

    #[test]
    fn test_synthesize_rejects_geometry_tables() {
        let mut catalog = catalog();
        let mut rng = StdRng::seed_from_u64(0);
        let step = StepConfig::Synthesize {
            table: "parcels".into(),
            geo_table: "zones".into(),
            targets: "zones".into(),
            output: None,
        };
        assert!(matches!(
            apply_step(&mut catalog, &step, &mut rng),
            Err(SpandexError::SynthesisError { .. })
        ));
    }
}
