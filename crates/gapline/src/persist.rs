//! Durable-store writes from async tasks.
//!
//! Store writes append to a file and `fsync` it, so they run on tokio's
//! blocking pool. Reads only touch the stores' in-memory index and stay on
//! the calling task.

use gapline_storage::StorageError;

/// Runs `write` on the blocking pool and waits for it.
///
/// The write is not cancelled when the waiting task is: once started it
/// reaches the disk or fails there.
pub(crate) async fn offload<T, F>(write: F) -> Result<T, StorageError>
where
    F: FnOnce() -> Result<T, StorageError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(write)
        .await
        .map_err(|e| StorageError::Interrupted(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_result_is_returned() {
        assert_eq!(offload(|| Ok(7)).await.unwrap(), 7);

        let err = offload::<(), _>(|| Err(StorageError::LockPoisoned))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::LockPoisoned));
    }

    #[tokio::test]
    async fn panicking_write_is_reported() {
        let err = offload::<(), _>(|| panic!("disk on fire")).await.unwrap_err();
        assert!(matches!(err, StorageError::Interrupted(_)));
    }
}
