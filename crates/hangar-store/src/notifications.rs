use rusqlite::params;

use crate::{Store, StoreError};

impl Store {
    /// Record that a webhook handler has acted on a (job, session, worker)
    /// triple. Returns `false` when the tuple was already recorded, which is
    /// the caller's signal to skip duplicate delivery.
    pub fn record_inbound_notification(
        &self,
        id: &str,
        job_id: &str,
        session_id: &str,
        worker_id: &str,
        handler_id: &str,
    ) -> Result<bool, StoreError> {
        let result = self.conn().execute(
            "INSERT INTO inbound_event_notifications (id, job_id, session_id, worker_id, handler_id) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, job_id, session_id, worker_id, handler_id],
        );
        match result {
            Ok(_) => Ok(true),
            Err(e) => match StoreError::from(e) {
                StoreError::Conflict(_) => Ok(false),
                other => Err(other),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_insert_wins() {
        let store = Store::open_in_memory().unwrap();
        assert!(
            store
                .record_inbound_notification("n1", "j1", "s1", "w1", "github-inbound")
                .unwrap()
        );
        // Same tuple, different row id — deduplicated.
        assert!(
            !store
                .record_inbound_notification("n2", "j1", "s1", "w1", "github-inbound")
                .unwrap()
        );
        // A different handler on the same event is a fresh delivery.
        assert!(
            store
                .record_inbound_notification("n3", "j1", "s1", "w1", "slack-notify")
                .unwrap()
        );
    }
}
