// SPDX-FileCopyrightText: 2026 Spyglass Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `spyglass sweep` and `spyglass remove` command implementation.

use spyglass_core::{SessionId, SpyglassError};
use spyglass_storage::LogStore;

/// Apply the configured retention policy once.
pub async fn run_sweep(store: &LogStore) -> Result<(), SpyglassError> {
    let report = store.sweep().await?;
    if report.is_empty() {
        eprintln!("Sweep complete: nothing to remove");
    } else {
        eprintln!(
            "Sweep complete: removed {} sessions and {} messages, released {} bodies",
            report.removed_sessions, report.removed_messages, report.released_bodies
        );
    }
    Ok(())
}

/// Delete the given sessions, or every record when `all` is set.
pub async fn run_remove(
    store: &LogStore,
    sessions: Vec<SessionId>,
    all: bool,
) -> Result<(), SpyglassError> {
    if all {
        store.remove_all().await?;
        eprintln!("Removed all records");
        return Ok(());
    }

    let known: Vec<SessionId> = store.sessions().await?.into_iter().map(|s| s.id).collect();
    if let Some(missing) = sessions.iter().find(|id| !known.contains(id)) {
        return Err(SpyglassError::InvalidArgument(format!("no session {missing}")));
    }
    let count = sessions.len();
    store.remove_sessions(sessions).await?;
    eprintln!("Removed {count} sessions");
    Ok(())
}

#[cfg(test)]
mod tests {
    use spyglass_config::model::StoreConfig;
    use spyglass_core::Level;
    use spyglass_core::types::{MessageRecord, NewMessage};
    use spyglass_storage::Predicate;

    use super::*;

    #[tokio::test]
    async fn remove_rejects_unknown_sessions() {
        let store = LogStore::in_memory(&StoreConfig::default()).await.unwrap();
        store
            .append_message(NewMessage::new(store.session().id, Level::Info, "app", "hello"))
            .await
            .unwrap();

        let err = run_remove(&store, vec![SessionId::new()], false)
            .await
            .unwrap_err();
        assert!(matches!(err, SpyglassError::InvalidArgument(_)));
        assert_eq!(store.count::<MessageRecord>(Predicate::True).await.unwrap(), 1);

        run_remove(&store, vec![store.session().id], false).await.unwrap();
        assert_eq!(store.count::<MessageRecord>(Predicate::True).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn remove_all_clears_the_store() {
        let store = LogStore::in_memory(&StoreConfig::default()).await.unwrap();
        store
            .append_message(NewMessage::new(store.session().id, Level::Info, "app", "hello"))
            .await
            .unwrap();
        run_remove(&store, Vec::new(), true).await.unwrap();
        assert!(store.sessions().await.unwrap().is_empty());
    }
}
