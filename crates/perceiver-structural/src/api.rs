use std::sync::Arc;

use async_trait::async_trait;
use cdp_adapter::Page;

use crate::errors::SnapshotError;
use crate::interactive::{collect_interactive, paginate, ElementPage, ElementQuery};
use crate::metrics;
use crate::model::Snapshot;

#[async_trait]
pub trait StructuralPerceiver: Send + Sync {
    /// Merged accessibility/DOM tree of every frame of `page`.
    async fn snapshot(&self, page: &Arc<Page>) -> Result<Snapshot, SnapshotError>;

    /// One page of the interactable elements of `page`. Arguments are checked before the
    /// page is touched.
    async fn interactive_elements(
        &self,
        page: &Arc<Page>,
        query: &ElementQuery,
    ) -> Result<ElementPage, SnapshotError> {
        query.validate()?;
        let snapshot = self.snapshot(page).await?;
        let listed = paginate(collect_interactive(&snapshot), query)?;
        metrics::record_listing(listed.elements.len());
        Ok(listed)
    }
}
