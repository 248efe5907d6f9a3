// The provider accepted the email but writing the outcome failed.
mod common;

use chrono::{Duration, Utc};
use common::{company, draft, flaky_harness, item_in, settings, FakeMailer};
use sendflow::queue::{DraftStatus, QueueError, QueueStatus, SendStatus, TickOptions, TickOutcome};

#[tokio::test]
async fn tick_leaves_an_unrecorded_delivery_processing() {
    let (h, flaky) = flaky_harness(FakeMailer::ok(), usize::MAX);
    let c = company(&h.store, "Acme", Some("a@acme.test"));
    let d = draft(&h.store, c.id, 1);
    h.engine.enqueue_drafts(&[d.id]).await.unwrap();

    let err = h
        .engine
        .tick(&settings(10), TickOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, QueueError::Storage(_)), "{err:?}");
    assert_eq!(h.mailer.attempts().len(), 1);
    // first commit plus one retry
    assert_eq!(flaky.commit_calls(), 2);

    let items = h.engine.list_queue(&Default::default()).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].status, QueueStatus::Processing);
    assert!(h.store.mail_logs().is_empty());

    let company = h.store.company(c.id).unwrap();
    assert_eq!(company.send_status, SendStatus::NotSent);
    assert_eq!(company.send_count, 0);
    assert_eq!(h.store.draft(d.id).unwrap().status, DraftStatus::Queued);

    // the next tick has nothing to claim and does not resend it
    let next = h
        .engine
        .tick(&settings(10), TickOptions::default())
        .await
        .unwrap();
    assert!(matches!(next, TickOutcome::Idle { .. }), "{next:?}");
    assert_eq!(h.mailer.attempts().len(), 1);
}

#[tokio::test]
async fn manual_send_reports_the_recording_failure() {
    let (h, _) = flaky_harness(FakeMailer::ok(), usize::MAX);
    let c = company(&h.store, "Acme", Some("a@acme.test"));
    let item = item_in(&h.store, &c, QueueStatus::Waiting, Utc::now());

    let report = h.engine.send_queue_items(&[item.id]).await.unwrap();
    assert_eq!(report.fail_count, 1);
    assert!(report.results[0]
        .error
        .as_deref()
        .unwrap()
        .contains("database unavailable"));
    assert_eq!(
        h.store.queue_item(item.id).unwrap().status,
        QueueStatus::Processing
    );

    let again = h.engine.retry(&[item.id]).await.unwrap();
    assert_eq!(again.fail_count, 1);
    assert_eq!(h.mailer.attempts().len(), 1);
}

#[tokio::test]
async fn one_failed_commit_is_retried() {
    let (h, flaky) = flaky_harness(FakeMailer::ok(), 1);
    let c = company(&h.store, "Acme", Some("a@acme.test"));
    let item = item_in(&h.store, &c, QueueStatus::Waiting, Utc::now());

    let report = h.engine.send_queue_items(&[item.id]).await.unwrap();
    assert_eq!(report.success_count, 1);
    assert_eq!(flaky.commit_calls(), 2);
    assert_eq!(h.mailer.attempts().len(), 1);
    assert_eq!(
        h.store.queue_item(item.id).unwrap().status,
        QueueStatus::Complete
    );
    assert_eq!(h.store.mail_logs().len(), 1);
}

#[tokio::test]
async fn unrecorded_direct_send_marks_the_draft_sent() {
    let (h, _) = flaky_harness(FakeMailer::ok(), usize::MAX);
    let c = company(&h.store, "Acme", Some("a@acme.test"));
    let d = draft(&h.store, c.id, 1);

    let report = h.engine.send_drafts(&[d.id]).await.unwrap();
    assert_eq!(report.fail_count, 1);
    assert_eq!(h.store.draft(d.id).unwrap().status, DraftStatus::Sent);
    assert!(h.store.mail_logs().is_empty());
    assert_eq!(h.store.company(c.id).unwrap().send_count, 0);

    let swept = h
        .engine
        .sweep_stale(Utc::now() + Duration::minutes(1))
        .await
        .unwrap();
    assert!(swept.is_empty());

    let again = h.engine.send_drafts(&[d.id]).await.unwrap();
    assert_eq!(again.fail_count, 1);
    assert_eq!(h.mailer.attempts().len(), 1);
}

#[tokio::test]
async fn draft_stranded_in_queued_is_released_by_the_sweep() {
    let (h, flaky) = flaky_harness(FakeMailer::ok(), usize::MAX);
    flaky.fail_draft_marks();
    let c = company(&h.store, "Acme", Some("a@acme.test"));
    let d = draft(&h.store, c.id, 1);

    let report = h.engine.send_drafts(&[d.id]).await.unwrap();
    assert_eq!(report.fail_count, 1);
    assert_eq!(h.store.draft(d.id).unwrap().status, DraftStatus::Queued);

    // nothing to enqueue it with or remove it by
    assert_eq!(h.engine.enqueue_drafts(&[d.id]).await.unwrap().fail_count, 1);

    let fresh = h
        .engine
        .sweep_stale(Utc::now() - Duration::minutes(30))
        .await
        .unwrap();
    assert!(fresh.released_drafts.is_empty());

    let swept = h
        .engine
        .sweep_stale(Utc::now() + Duration::minutes(1))
        .await
        .unwrap();
    assert_eq!(swept.released_drafts, vec![d.id]);
    assert!(swept.failed_items.is_empty());
    assert_eq!(h.store.draft(d.id).unwrap().status, DraftStatus::Draft);
}
