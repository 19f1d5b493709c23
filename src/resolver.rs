//! Accession resolution: file name + rule → one catalog record.
//!
//! Lookups are cached for the lifetime of one batch run, keyed by the
//! rendered query path (a function of the rule's template and the captured
//! values). Several files mapping to one accession, e.g. the crops of one
//! image, cost a single catalog round trip. The cache is cleared with
//! [`AccessionResolver::clear`] at the end of each run.

use serde_json::Value;
use std::collections::HashMap;

use crate::catalog::CatalogClient;
use crate::error::UploadError;
use crate::mapping::AssetMapping;
use crate::models::{AccessionRecord, AmbiguousLookup, Row, ID_COLUMN};

#[derive(Debug, Default)]
pub struct AccessionResolver {
    cache: HashMap<String, Vec<Row>>,
    ambiguous: Vec<AmbiguousLookup>,
    lookups: usize,
}

impl AccessionResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `file_name` under `rule` to its accession record.
    ///
    /// Fails with [`UploadError::NameMismatch`] when the name does not fit
    /// the rule (no catalog call is made) and with
    /// [`UploadError::AccessionNotFound`] when the lookup returns no rows.
    /// When several rows come back the first is used and the lookup is
    /// recorded as ambiguous.
    pub async fn resolve(
        &mut self,
        catalog: &dyn CatalogClient,
        file_name: &str,
        rule: &AssetMapping,
    ) -> Result<AccessionRecord, UploadError> {
        let captures = rule.match_file(file_name)?;
        let query = rule.render_query(&captures);

        if !self.cache.contains_key(&query) {
            let rows = catalog.get(&query).await?;
            self.lookups += 1;
            if rows.len() > 1 {
                tracing::warn!(
                    file = file_name,
                    query = %query,
                    rows = rows.len(),
                    "catalog lookup returned more than one record, using the first"
                );
                self.ambiguous.push(AmbiguousLookup {
                    query: query.clone(),
                    rows: rows.len(),
                });
            }
            self.cache.insert(query.clone(), rows);
        }

        let first = self
            .cache
            .get(&query)
            .and_then(|rows| rows.first())
            .cloned()
            .ok_or_else(|| UploadError::AccessionNotFound {
                file_name: file_name.to_string(),
                file_type: rule.synapse_file_type().to_string(),
            })?;
        AccessionRecord::from_row(file_name, first)
    }

    /// Record a catalog write made during this run.
    ///
    /// The cached row for `record` now holds `url` in the rule's tracking
    /// column, so later files resolving to the same accession plan against
    /// what the catalog actually holds.
    pub fn record_binding(
        &mut self,
        file_name: &str,
        rule: &AssetMapping,
        record: &AccessionRecord,
        url: &str,
    ) {
        let Some(column) = rule.url_tracking_column() else {
            return;
        };
        let Ok(captures) = rule.match_file(file_name) else {
            return;
        };
        let query = rule.render_query(&captures);
        if let Some(rows) = self.cache.get_mut(&query) {
            for row in rows
                .iter_mut()
                .filter(|r| r.get(ID_COLUMN) == Some(record.id()))
            {
                row.insert(column.to_string(), Value::String(url.to_string()));
            }
        }
    }

    /// Lookups that returned more than one row during this run.
    pub fn ambiguous(&self) -> &[AmbiguousLookup] {
        &self.ambiguous
    }

    /// Catalog round trips made during this run.
    pub fn lookups(&self) -> usize {
        self.lookups
    }

    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    /// Drop every cached binding and counter.
    pub fn clear(&mut self) {
        self.cache.clear();
        self.ambiguous.clear();
        self.lookups = 0;
    }

    /// Take the ambiguity log, leaving it empty.
    pub fn take_ambiguous(&mut self) -> Vec<AmbiguousLookup> {
        std::mem::take(&mut self.ambiguous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::UpdateStatus;
    use crate::error::TransportError;
    use crate::models::CatalogTable;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    struct CannedCatalog {
        rows: Vec<Row>,
        gets: Mutex<Vec<String>>,
    }

    impl CannedCatalog {
        fn new(rows: Vec<Value>) -> Self {
            Self {
                rows: rows
                    .into_iter()
                    .map(|v| v.as_object().cloned().unwrap())
                    .collect(),
                gets: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CatalogClient for CannedCatalog {
        async fn get(&self, path: &str) -> Result<Vec<Row>, TransportError> {
            self.gets.lock().unwrap().push(path.to_string());
            Ok(self.rows.clone())
        }

        async fn update(
            &self,
            _table: &CatalogTable,
            _original: &Row,
            _update: &Row,
        ) -> Result<UpdateStatus, TransportError> {
            unreachable!("resolver never writes")
        }
    }

    fn rules() -> Vec<AssetMapping> {
        crate::config::default_config().unwrap().rules().unwrap()
    }

    #[tokio::test]
    async fn resolves_single_row() {
        let catalog = CannedCatalog::new(vec![json!({"ID": "Bhv001", "Raw URL": null, "Subject": "S1"})]);
        let mut resolver = AccessionResolver::new();
        let rec = resolver
            .resolve(&catalog, "Bhv001.m4v", &rules()[0])
            .await
            .unwrap();
        assert_eq!(rec.id_display(), "Bhv001");
        assert_eq!(
            *catalog.gets.lock().unwrap(),
            vec!["/entity/Zebrafish:Behavior/ID=Bhv001".to_string()]
        );
    }

    #[tokio::test]
    async fn mismatch_makes_no_catalog_call() {
        let catalog = CannedCatalog::new(vec![]);
        let mut resolver = AccessionResolver::new();
        let err = resolver
            .resolve(&catalog, "notes.txt", &rules()[0])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "name_mismatch");
        assert!(catalog.gets.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_result_is_not_found_and_cached() {
        let catalog = CannedCatalog::new(vec![]);
        let mut resolver = AccessionResolver::new();
        for _ in 0..2 {
            let err = resolver
                .resolve(&catalog, "Bhv404.m4v", &rules()[0])
                .await
                .unwrap_err();
            assert_eq!(err.kind(), "accession_not_found");
        }
        assert_eq!(catalog.gets.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn several_rows_pick_first_and_are_recorded() {
        let catalog = CannedCatalog::new(vec![
            json!({"ID": "Roi1", "Segments URL": null, "Subject": "S1"}),
            json!({"ID": "Roi1", "Segments URL": null, "Subject": "S2"}),
        ]);
        let mut resolver = AccessionResolver::new();
        let rec = resolver
            .resolve(&catalog, "Roi1_synapses.csv", &rules()[3])
            .await
            .unwrap();
        assert_eq!(rec.text("Subject").as_deref(), Some("S1"));
        assert_eq!(resolver.ambiguous().len(), 1);
        assert_eq!(resolver.ambiguous()[0].rows, 2);
    }

    #[tokio::test]
    async fn files_sharing_a_key_share_one_lookup_until_cleared() {
        let catalog = CannedCatalog::new(vec![json!({"ID": "Roi1", "Segments URL": null, "Subject": "S1"})]);
        let rules = rules();
        let mut resolver = AccessionResolver::new();
        resolver.resolve(&catalog, "Roi1_synapses.csv", &rules[3]).await.unwrap();
        resolver.resolve(&catalog, "Roi1-segments.csv", &rules[3]).await.unwrap();
        assert_eq!(resolver.lookups(), 1);

        resolver.clear();
        assert_eq!(resolver.cached(), 0);
        resolver.resolve(&catalog, "Roi1_synapses.csv", &rules[3]).await.unwrap();
        assert_eq!(catalog.gets.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn recorded_binding_is_seen_by_later_files() {
        let catalog = CannedCatalog::new(vec![json!({"ID": "Roi1", "Segments URL": null, "Subject": "S1"})]);
        let rules = rules();
        let mut resolver = AccessionResolver::new();
        let rec = resolver.resolve(&catalog, "Roi1_synapses.csv", &rules[3]).await.unwrap();

        resolver.record_binding("Roi1_synapses.csv", &rules[3], &rec, "/hatrac/Zf/S1/Roi1_synapses.csv:V1");

        // The nucleus list shares the query and the column.
        let again = resolver.resolve(&catalog, "Roi1_nuclei.csv", &rules[4]).await.unwrap();
        assert_eq!(
            again.text("Segments URL").as_deref(),
            Some("/hatrac/Zf/S1/Roi1_synapses.csv:V1")
        );
        assert_eq!(resolver.lookups(), 1);
    }

    #[tokio::test]
    async fn binding_for_untracked_rule_changes_nothing() {
        let catalog = CannedCatalog::new(vec![json!({"ID": "CropImg7", "Subject": "S3"})]);
        let rules = rules();
        let mut resolver = AccessionResolver::new();
        let rec = resolver.resolve(&catalog, "CropImg7.ome.tif", &rules[2]).await.unwrap();

        resolver.record_binding("CropImg7.ome.tif", &rules[2], &rec, "/hatrac/Zf/S3/CropImg7.ome.tif:V1");

        let again = resolver.resolve(&catalog, "CropImg7.ome.tif", &rules[2]).await.unwrap();
        assert_eq!(again.row(), rec.row());
    }
}
