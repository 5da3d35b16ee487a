//! File-backed store tests: durability across reopen, exclusive ownership
//! and corruption detection, driven through object contexts.

#![cfg(feature = "persistent")]

use std::fs;
use std::sync::Arc;

use tempfile::tempdir;

use objgraph::{
    open_file_store, AttributeType, ContextError, EntityDefinition, FetchRequest, FileStoreConfig,
    GraphError, Model, ObjectContext, StoreCoordinator, Value,
};

fn model() -> Arc<Model> {
    Arc::new(
        Model::from_entities([
            EntityDefinition::new("Author")
                .attribute("name", AttributeType::String)
                .to_many("books", "Book", Some("author")),
            EntityDefinition::new("Book")
                .attribute("title", AttributeType::String)
                .attribute("pages", AttributeType::Integer)
                .attribute("rating", AttributeType::Float)
                .to_one("author", "Author", Some("books")),
        ])
        .unwrap(),
    )
}

#[test]
fn test_graph_survives_reopen() {
    let dir = tempdir().unwrap();
    let author_id;
    {
        let coordinator = Arc::new(StoreCoordinator::new(model()));
        coordinator
            .add_store(Arc::new(open_file_store(dir.path(), None).unwrap()))
            .unwrap();
        let mut ctx = ObjectContext::new(coordinator);
        let author = ctx.new_object("Author").unwrap();
        ctx.set_value(author, "name", "Le Guin").unwrap();
        for (title, pages) in [("Earthsea", 205), ("The Dispossessed", 387)] {
            let book = ctx.new_object("Book").unwrap();
            ctx.set_value(book, "title", title).unwrap();
            ctx.set_value(book, "pages", pages).unwrap();
            ctx.related(author, "books").unwrap().add(book).unwrap();
        }
        ctx.save().unwrap();
        author_id = ctx.object_id(author).unwrap();
    }

    let coordinator = Arc::new(StoreCoordinator::new(model()));
    let config = FileStoreConfig {
        sync_on_write: false,
    };
    coordinator
        .add_store(Arc::new(open_file_store(dir.path(), Some(config)).unwrap()))
        .unwrap();
    let mut ctx = ObjectContext::new(coordinator);

    let author = ctx.existing_object(&author_id).unwrap();
    assert_eq!(ctx.to_many(author, "books").unwrap().len(), 2);

    let long = FetchRequest::new("Book").filter("pages > 300").unwrap();
    let books = ctx.execute_fetch(&long).unwrap();
    assert_eq!(books.len(), 1);
    assert_eq!(ctx.attribute(books[0], "title").unwrap(), Value::from("The Dispossessed"));
    assert_eq!(ctx.to_one(books[0], "author").unwrap(), Some(author));
}

#[test]
fn test_second_owner_is_locked_out() {
    let dir = tempdir().unwrap();
    let _store = open_file_store(dir.path(), None).unwrap();
    let err = open_file_store(dir.path(), None).unwrap_err();
    assert!(err.is_retryable());
}

#[test]
fn test_corrupt_snapshot_is_rejected() {
    let dir = tempdir().unwrap();
    let path = {
        let store = open_file_store(dir.path(), None).unwrap();
        store.backend().path().to_path_buf()
    };

    let mut bytes = fs::read(&path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    fs::write(&path, bytes).unwrap();

    let err = open_file_store(dir.path(), None).unwrap_err();
    assert!(err.is_storage());
    assert!(!err.is_retryable());
}

#[test]
fn test_non_finite_rating_never_reaches_disk() {
    let dir = tempdir().unwrap();
    let book_id;
    {
        let coordinator = Arc::new(StoreCoordinator::new(model()));
        coordinator
            .add_store(Arc::new(open_file_store(dir.path(), None).unwrap()))
            .unwrap();
        let mut ctx = ObjectContext::new(coordinator);
        let book = ctx.new_object("Book").unwrap();
        ctx.set_value(book, "title", "Solaris").unwrap();
        for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let err = ctx.set_value(book, "rating", bad).unwrap_err();
            assert!(matches!(err, GraphError::Context(ContextError::InvalidValue { .. })));
        }
        ctx.set_value(book, "rating", 4.5).unwrap();
        ctx.save().unwrap();
        book_id = ctx.object_id(book).unwrap();
    }

    let coordinator = Arc::new(StoreCoordinator::new(model()));
    coordinator
        .add_store(Arc::new(open_file_store(dir.path(), None).unwrap()))
        .unwrap();
    let mut ctx = ObjectContext::new(coordinator);
    let book = ctx.existing_object(&book_id).unwrap();
    assert_eq!(ctx.attribute(book, "rating").unwrap(), Value::Float(4.5));
}
