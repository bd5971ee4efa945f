use tracing::debug;

use pkg_state::{Store, StoreError, StoreExt};
use pkg_types::meta::Record;

/// Update a record's status, falling back to a full update when the
/// store does not support status sub-object writes. The fallback only
/// triggers on test substrates; it exists so the same reconciler code
/// runs against the in-memory fake.
pub async fn update_status_with_fallback<S: Store, R: Record>(
    store: &S,
    record: &R,
) -> Result<R, StoreError> {
    match store.update_status(record).await {
        Ok(updated) => Ok(updated),
        Err(StoreError::StatusUnsupported) => {
            debug!(
                "Status update unsupported for {} {}, falling back to full update",
                R::KIND,
                record.name()
            );
            store.update(record).await
        }
        Err(e) => Err(e),
    }
}
