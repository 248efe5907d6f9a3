mod common;

use chrono::Utc;
use common::{company, draft, harness, item_in, FakeMailer};
use sendflow::queue::{DraftStatus, QueueEdit, QueueError, QueueStatus, SendStatus};
use uuid::Uuid;

#[tokio::test]
async fn enqueued_draft_sends_and_rolls_up_company_and_draft() {
    let h = harness(FakeMailer::ok());
    let c1 = company(&h.store, "Acme", Some("ceo@acme.test"));
    let d1 = draft(&h.store, c1.id, 1);

    let report = h.engine.enqueue_drafts(&[d1.id]).await.unwrap();
    assert_eq!((report.success_count, report.fail_count), (1, 0));
    assert_eq!(h.store.draft(d1.id).unwrap().status, DraftStatus::Queued);

    let queued = h
        .engine
        .list_queue(&Default::default())
        .await
        .unwrap()
        .pop()
        .unwrap();
    assert_eq!(queued.status, QueueStatus::Waiting);
    assert_eq!(queued.draft_id, Some(d1.id));
    assert_eq!(queued.to_email, "ceo@acme.test");

    let report = h.engine.send_queue_items(&[queued.id]).await.unwrap();
    assert_eq!((report.success_count, report.fail_count), (1, 0));

    let item = h.store.queue_item(queued.id).unwrap();
    assert_eq!(item.status, QueueStatus::Complete);
    assert!(item.sent_at.is_some());
    assert!(item.external_id.is_some());

    let c = h.store.company(c1.id).unwrap();
    assert_eq!(c.send_status, SendStatus::FirstDone);
    assert_eq!(c.send_count, 1);
    assert!(c.last_send_date.is_some());

    assert_eq!(h.store.draft(d1.id).unwrap().status, DraftStatus::Sent);

    let logs = h.store.mail_logs();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].queue_item_id, Some(queued.id));
    assert_eq!(logs[0].send_order, 1);
}

#[tokio::test]
async fn edit_succeeds_only_while_waiting() {
    let h = harness(FakeMailer::ok());
    let c = company(&h.store, "Acme", Some("a@acme.test"));

    let waiting = item_in(&h.store, &c, QueueStatus::Waiting, Utc::now());
    let edited = h
        .engine
        .edit(
            waiting.id,
            QueueEdit {
                subject: Some("new subject".into()),
                body: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(edited.subject, "new subject");
    assert_eq!(edited.body, "body");

    for status in [
        QueueStatus::Processing,
        QueueStatus::Complete,
        QueueStatus::Failed,
    ] {
        let item = item_in(&h.store, &c, status, Utc::now());
        let err = h
            .engine
            .edit(
                item.id,
                QueueEdit {
                    subject: Some("changed".into()),
                    body: Some("changed".into()),
                },
            )
            .await
            .unwrap_err();
        assert!(
            matches!(err, QueueError::NotEditable { status: s, .. } if s == status),
            "{status}: {err}"
        );
        assert_eq!(h.store.queue_item(item.id).unwrap(), item, "{status} mutated");
    }
}

#[tokio::test]
async fn edit_rejects_empty_and_unknown() {
    let h = harness(FakeMailer::ok());
    let c = company(&h.store, "Acme", Some("a@acme.test"));
    let item = item_in(&h.store, &c, QueueStatus::Waiting, Utc::now());

    let err = h.engine.edit(item.id, QueueEdit::default()).await.unwrap_err();
    assert!(matches!(err, QueueError::Validation(_)));

    let err = h
        .engine
        .edit(
            item.id,
            QueueEdit {
                subject: Some("   ".into()),
                body: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, QueueError::Validation(_)));

    let err = h
        .engine
        .edit(
            Uuid::new_v4(),
            QueueEdit {
                subject: Some("x".into()),
                body: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, QueueError::NotFound { .. }));
}

#[tokio::test]
async fn removing_waiting_item_restores_its_draft() {
    let h = harness(FakeMailer::ok());
    let c = company(&h.store, "Acme", Some("a@acme.test"));
    let d2 = draft(&h.store, c.id, 2);

    h.engine.enqueue_drafts(&[d2.id]).await.unwrap();
    let item = h
        .engine
        .list_queue(&Default::default())
        .await
        .unwrap()
        .pop()
        .unwrap();

    let removed = h.engine.remove(item.id).await.unwrap();
    assert_eq!(removed.id, item.id);
    assert!(h.store.queue_item(item.id).is_none());
    assert_eq!(h.store.draft(d2.id).unwrap().status, DraftStatus::Draft);

    // the restored draft can be queued again
    let again = h.engine.enqueue_drafts(&[d2.id]).await.unwrap();
    assert_eq!(again.success_count, 1);
}

#[tokio::test]
async fn removing_completed_item_is_rejected_and_draft_untouched() {
    let h = harness(FakeMailer::ok());
    let c = company(&h.store, "Acme", Some("a@acme.test"));
    let d = draft(&h.store, c.id, 1);

    h.engine.enqueue_drafts(&[d.id]).await.unwrap();
    let item = h
        .engine
        .list_queue(&Default::default())
        .await
        .unwrap()
        .pop()
        .unwrap();
    h.engine.send_queue_items(&[item.id]).await.unwrap();

    let err = h.engine.remove(item.id).await.unwrap_err();
    assert!(matches!(
        err,
        QueueError::NotEditable {
            status: QueueStatus::Complete,
            ..
        }
    ));
    assert_eq!(
        h.store.queue_item(item.id).unwrap().status,
        QueueStatus::Complete
    );
    assert_eq!(h.store.draft(d.id).unwrap().status, DraftStatus::Sent);
}

#[tokio::test]
async fn enqueue_reports_each_draft_independently() {
    let h = harness(FakeMailer::ok());
    let good = company(&h.store, "Acme", Some("a@acme.test"));
    let no_email = company(&h.store, "Ghost", None);

    let d_ok = draft(&h.store, good.id, 1);
    let d_bad = draft(&h.store, no_email.id, 1);
    let missing = Uuid::new_v4();

    let report = h
        .engine
        .enqueue_drafts(&[d_ok.id, d_bad.id, missing])
        .await
        .unwrap();

    assert_eq!((report.success_count, report.fail_count), (1, 2));
    assert!(report.result_for(d_ok.id).unwrap().success);

    let bad = report.result_for(d_bad.id).unwrap();
    assert!(bad.error.as_deref().unwrap().contains("contact email"));
    assert_eq!(h.store.draft(d_bad.id).unwrap().status, DraftStatus::Draft);

    let nf = report.result_for(missing).unwrap();
    assert!(nf.error.as_deref().unwrap().contains("not found"));
}

#[tokio::test]
async fn draft_cannot_be_enqueued_twice() {
    let h = harness(FakeMailer::ok());
    let c = company(&h.store, "Acme", Some("a@acme.test"));
    let d = draft(&h.store, c.id, 1);

    assert_eq!(h.engine.enqueue_drafts(&[d.id]).await.unwrap().success_count, 1);
    let second = h.engine.enqueue_drafts(&[d.id]).await.unwrap();
    assert_eq!(second.fail_count, 1);
    assert_eq!(h.engine.list_queue(&Default::default()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn empty_selection_is_a_validation_error() {
    let h = harness(FakeMailer::ok());
    assert!(matches!(
        h.engine.enqueue_drafts(&[]).await,
        Err(QueueError::Validation(_))
    ));
    assert!(matches!(
        h.engine.send_queue_items(&[]).await,
        Err(QueueError::Validation(_))
    ));
    assert!(matches!(
        h.engine.retry(&[]).await,
        Err(QueueError::Validation(_))
    ));
    assert!(matches!(
        h.engine.send_drafts(&[]).await,
        Err(QueueError::Validation(_))
    ));
    assert!(matches!(
        h.engine.enqueue_direct(&[], None).await,
        Err(QueueError::Validation(_))
    ));
}
