use std::sync::Arc;

use blotter::{
    application::{
        polls::{PollEngine, PollError, PollService},
        render::parse,
        repos::{BlobsRepo, DocumentsRepo, PollsRepo},
    },
    domain::{
        attachments::{AttachedFile, Payload, ShortRef},
        blocks::Block,
        documents::Document,
        polls::{PollDefinition, VoterId},
    },
    infra::fs::FsStore,
};

fn poll(text: &str) -> PollDefinition {
    parse(text)
        .find_map(|block| match block {
            Block::Poll(definition) => Some(definition),
            _ => None,
        })
        .expect("poll block")
}

#[tokio::test]
async fn documents_survive_a_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    let payload = Payload::new("image/png", vec![1_u8, 2, 3]);
    let reference = ShortRef::parse("abc123.png").expect("reference");

    let mut document = Document::new("notes", "# Notes\n\n![x](abc123.png)\n");
    document
        .attachments
        .push(AttachedFile::stored(reference.clone(), "x.png", &payload));

    {
        let store = FsStore::new(dir.path()).expect("store");
        store.save_document(&document).await.expect("save");
        store.put_blob(&reference, &payload).await.expect("blob");
    }

    let store = FsStore::new(dir.path()).expect("reopen");
    assert_eq!(store.list_documents().await.expect("list"), vec![document.id]);

    let loaded = store
        .load_document(document.id)
        .await
        .expect("load")
        .expect("present");
    assert_eq!(loaded.body, document.body);
    assert_eq!(loaded.attachments, document.attachments);

    let blobs = store.load_blobs().await.expect("blobs");
    let stored = blobs.get(&reference).expect("stored blob");
    assert_eq!(stored.bytes().as_ref(), &[1_u8, 2, 3][..]);
    assert_eq!(stored.mime(), "image/png");
}

#[tokio::test]
async fn missing_documents_load_as_none() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = FsStore::new(dir.path()).expect("store");
    let absent = Document::new("absent", "");
    assert!(
        store
            .load_document(absent.id)
            .await
            .expect("load")
            .is_none()
    );
    assert!(store.load_ballots().await.expect("ballots").is_empty());
}

#[tokio::test]
async fn ballots_are_restored_after_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    let definition = poll("[POLL:Tea or coffee?|Tea|Coffee]");
    let voter = VoterId::new("reader-1");

    {
        let store = Arc::new(FsStore::new(dir.path()).expect("store"));
        let service = PollService::new(Arc::new(PollEngine::new()), store);
        service.engine().register(definition.clone());
        service
            .vote(&definition.id, &voter, "Tea")
            .await
            .expect("vote");
    }

    let store = Arc::new(FsStore::new(dir.path()).expect("reopen"));
    let service = PollService::new(Arc::new(PollEngine::new()), store);
    service.engine().register(definition.clone());
    assert_eq!(service.hydrate().await.expect("hydrate"), 1);

    let tally = service.tally(&definition.id).expect("tally");
    assert_eq!(tally.count_for("Tea"), 1);
    assert_eq!(tally.total, 1);

    let again = service.vote(&definition.id, &voter, "Coffee").await;
    assert!(matches!(again, Err(PollError::AlreadyVoted { .. })));
}
