//! Submission deduplication
//!
//! A candidate is compared against the existing records that could plausibly match it:
//! every record of the same driver for special submissions, the records sharing content
//! and driver otherwise. The driver's equality predicate decides, and the first match
//! rejects. The predicate is driver-defined and not assumed transitive, so no attempt is
//! made to compute equivalence classes.

use crate::config::RetryConfig;
use crate::db::{Database, NewTask};
use crate::drivers::RegisteredDriver;
use crate::error::Result;
use crate::retry::with_retry;
use crate::types::{SubmissionKind, TaskRecord};
use std::sync::Arc;

/// Outcome of a duplicate check
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// No existing record matches
    Accepted,
    /// An existing record matches; carries a human-readable reason
    Rejected(String),
}

/// Applies driver equality predicates against the backlog
#[derive(Clone)]
pub struct Deduplicator {
    db: Arc<Database>,
    retry: RetryConfig,
}

impl Deduplicator {
    /// Create a deduplicator over a task store
    pub fn new(db: Arc<Database>, retry: RetryConfig) -> Self {
        Self { db, retry }
    }

    /// Decide whether `candidate` may be stored for `driver`
    pub async fn accept(
        &self,
        candidate: &NewTask,
        driver: &RegisteredDriver,
        kind: SubmissionKind,
    ) -> Result<Verdict> {
        let rows = match kind {
            SubmissionKind::Special => {
                with_retry(&self.retry, "find tasks by driver", || {
                    self.db.find_by_driver(&candidate.driver)
                })
                .await?
            }
            SubmissionKind::Regular => {
                with_retry(&self.retry, "find tasks by content and driver", || {
                    self.db
                        .find_by_content_and_driver(&candidate.content, &candidate.driver)
                })
                .await?
            }
        };

        for row in rows {
            let existing = TaskRecord::try_from(row)?;
            if driver.driver.is_equal(candidate, &existing, kind) {
                tracing::debug!(
                    driver = %candidate.driver,
                    content = %candidate.content,
                    existing_id = %existing.id,
                    "Duplicate submission"
                );
                return Ok(Verdict::Rejected(format!(
                    "{} already exists for {} (task {})",
                    candidate.content, candidate.driver, existing.id
                )));
            }
        }

        Ok(Verdict::Accepted)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DriverConfig, ExtensionsConfig};
    use crate::drivers::testing::ScriptedDriver;
    use crate::drivers::{Driver, DriverCatalog, DriverRegistry};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::NamedTempFile;

    /// Equality that counts calls and treats everything as equal
    struct AlwaysEqual {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Driver for AlwaysEqual {
        fn name(&self) -> &str {
            "greedy"
        }
        fn can_merge_batch(&self) -> bool {
            true
        }
        fn is_equal(&self, _c: &NewTask, _e: &TaskRecord, _k: SubmissionKind) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            true
        }
        async fn prepare(
            &self,
            _r: &crate::resource::ResourceHandle,
            _b: &crate::drivers::BatchContext,
            _c: &crate::config::Config,
        ) -> Result<()> {
            Ok(())
        }
        async fn handle(&self) -> Result<()> {
            Ok(())
        }
        async fn collect(&self) -> Result<crate::drivers::PluginReturn> {
            Ok(Default::default())
        }
    }

    async fn setup() -> (Deduplicator, Arc<Database>, DriverRegistry, Arc<AlwaysEqual>, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        let db = Arc::new(Database::new(temp_file.path()).await.unwrap());

        let greedy = Arc::new(AlwaysEqual {
            calls: AtomicUsize::new(0),
        });
        let greedy_clone = greedy.clone();
        let mut catalog = DriverCatalog::new();
        catalog.register("scripted", |name, _| {
            Ok(Arc::new(ScriptedDriver::new(name, true)) as Arc<dyn Driver>)
        });
        catalog.register("greedy", move |_, _| Ok(greedy_clone.clone() as Arc<dyn Driver>));

        let mut ext = ExtensionsConfig {
            namespace: "ns".into(),
            ..Default::default()
        };
        for (name, kind) in [("pages", "scripted"), ("greedy", "greedy")] {
            let mut d = DriverConfig::new("redis://localhost");
            d.kind = Some(kind.into());
            ext.drivers.insert(name.into(), d);
        }
        let registry = DriverRegistry::from_config(&ext, catalog).unwrap();

        let dedup = Deduplicator::new(db.clone(), RetryConfig::default());
        (dedup, db, registry, greedy, temp_file)
    }

    #[tokio::test]
    async fn identical_regular_submission_is_rejected() {
        let (dedup, db, registry, _, _temp) = setup().await;
        let pages = registry.lookup("pages").await.unwrap();
        let candidate = NewTask::new("https://x/1", "ns:pages").with_uid("u1");

        assert_eq!(
            dedup.accept(&candidate, &pages, SubmissionKind::Regular).await.unwrap(),
            Verdict::Accepted
        );
        db.insert_task(&candidate).await.unwrap();

        let again = NewTask::new("https://x/1", "ns:pages").with_uid("u2");
        match dedup.accept(&again, &pages, SubmissionKind::Regular).await.unwrap() {
            Verdict::Rejected(reason) => assert!(reason.contains("already exists")),
            Verdict::Accepted => panic!("duplicate accepted"),
        }
    }

    #[tokio::test]
    async fn regular_comparison_set_is_content_and_driver() {
        let (dedup, db, registry, greedy, _temp) = setup().await;
        let driver = registry.lookup("greedy").await.unwrap();
        db.insert_task(&NewTask::new("https://x/1", "ns:greedy")).await.unwrap();

        // Different content: empty comparison set, predicate never consulted
        let candidate = NewTask::new("https://x/2", "ns:greedy");
        assert_eq!(
            dedup.accept(&candidate, &driver, SubmissionKind::Regular).await.unwrap(),
            Verdict::Accepted
        );
        assert_eq!(greedy.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn special_comparison_set_is_every_record_of_driver() {
        let (dedup, db, registry, greedy, _temp) = setup().await;
        let driver = registry.lookup("greedy").await.unwrap();
        db.insert_task(&NewTask::new("https://x/1", "ns:greedy")).await.unwrap();
        db.insert_task(&NewTask::new("https://x/2", "ns:greedy")).await.unwrap();

        let candidate = NewTask::new("https://x/3", "ns:greedy");
        let verdict = dedup
            .accept(&candidate, &driver, SubmissionKind::Special)
            .await
            .unwrap();

        assert!(matches!(verdict, Verdict::Rejected(_)));
        // First match short-circuits
        assert_eq!(greedy.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn special_submission_with_new_extra_content_is_accepted() {
        let (dedup, db, registry, _, _temp) = setup().await;
        let pages = registry.lookup("pages").await.unwrap();
        db.insert_task(&NewTask::new("https://x/1", "ns:pages").with_extra_content("a"))
            .await
            .unwrap();

        let same = NewTask::new("https://x/1", "ns:pages").with_extra_content("a");
        let different = NewTask::new("https://x/1", "ns:pages").with_extra_content("b");

        assert!(matches!(
            dedup.accept(&same, &pages, SubmissionKind::Special).await.unwrap(),
            Verdict::Rejected(_)
        ));
        assert_eq!(
            dedup.accept(&different, &pages, SubmissionKind::Special).await.unwrap(),
            Verdict::Accepted
        );
    }
}
