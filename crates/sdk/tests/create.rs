mod helpers;

use firemap::{DocPath, Error, Id, Options};
use helpers::{new_db, Account, Note, Order, RaceResult};
use serde_json::json;

#[tokio::test]
async fn create_then_read_round_trips() {
	let db = new_db();
	db.run(Options::default(), |ctx| {
		Box::pin(async move {
			ctx.create::<Order>(json!({
				"id": "A1",
				"product": "coffee",
				"quantity": 1,
			}))?;
			Ok(())
		})
	})
	.await
	.unwrap();
	// A fresh context observes the stored document
	db.run(Options::default(), |ctx| {
		Box::pin(async move {
			let order = ctx.get::<Order>(json!("A1")).await?.expect("order was stored");
			let order = ctx.model(order)?;
			assert!(!order.is_new());
			assert_eq!(order.get("product")?, Some(json!("coffee")));
			assert_eq!(order.get("quantity")?, Some(json!(1)));
			assert_eq!(order.id().to_string(), "A1");
			Ok(())
		})
	})
	.await
	.unwrap();
}

#[tokio::test]
async fn compound_key_document_identifier() {
	let db = new_db();
	db.run(Options::default(), |ctx| {
		Box::pin(async move {
			ctx.create::<RaceResult>(json!({
				"race_id": 123,
				"runner_name": "Joe",
				"time_ms": 600000,
			}))?;
			Ok(())
		})
	})
	.await
	.unwrap();
	// The stored identifier is the NUL-joined component encoding
	let path = DocPath::new("RaceResult", Id::from("123\u{0}Joe"));
	let doc = db.store().peek(&path).await.expect("document exists at the encoded path");
	assert_eq!(doc["time_ms"], json!(600000));
}

#[tokio::test]
async fn default_applies_on_create_and_fetch() {
	let db = new_db();
	db.run(Options::default(), |ctx| {
		Box::pin(async move {
			ctx.create::<Account>(json!({"id": "B", "balance": 0}))?;
			Ok(())
		})
	})
	.await
	.unwrap();
	// The default was stored with the document
	let doc = db.store().peek(&DocPath::new("Account", Id::from("B"))).await.unwrap();
	assert_eq!(doc["balance"], json!(0));
	assert_eq!(doc["bonus"], json!(5));
	// A fetched model exposes it, and rejects reassignment
	db.run(Options::default(), |ctx| {
		Box::pin(async move {
			let account = ctx.get::<Account>(json!("B")).await?.expect("stored above");
			let account = ctx.model(account)?;
			assert_eq!(account.get("bonus")?, Some(json!(5)));
			let err = account.set("bonus", json!(6)).unwrap_err();
			assert!(err.to_string().contains("immutable"));
			Ok(())
		})
	})
	.await
	.unwrap();
}

#[tokio::test]
async fn create_collides_with_existing_document() {
	let db = new_db();
	for _ in 0..2 {
		let result = db
			.run(Options::default(), |ctx| {
				Box::pin(async move {
					ctx.create::<Order>(json!({
						"id": "dup",
						"product": "tea",
						"quantity": 1,
					}))?;
					Ok(())
				})
			})
			.await;
		if result.is_ok() {
			continue;
		}
		match result.unwrap_err() {
			Error::TxFailed {
				attempts,
				source,
			} => {
				assert_eq!(attempts, 1);
				assert!(matches!(*source, Error::ModelAlreadyExists { .. }));
				return;
			}
			other => panic!("unexpected error: {other}"),
		}
	}
	panic!("the second create did not collide");
}

#[tokio::test]
async fn create_or_overwrite_replaces() {
	let db = new_db();
	db.run(Options::default(), |ctx| {
		Box::pin(async move {
			ctx.create::<Order>(json!({"id": "o", "product": "tea", "quantity": 1}))?;
			Ok(())
		})
	})
	.await
	.unwrap();
	db.run(Options::default(), |ctx| {
		Box::pin(async move {
			ctx.create_or_overwrite::<Order>(json!({
				"id": "o",
				"product": "chai",
				"quantity": 2,
			}))?;
			Ok(())
		})
	})
	.await
	.unwrap();
	let doc = db.store().peek(&DocPath::new("Order", Id::from("o"))).await.unwrap();
	assert_eq!(doc["product"], json!("chai"));
	assert_eq!(doc["quantity"], json!(2));
}

#[tokio::test]
async fn create_rejects_schema_violations_immediately() {
	let db = new_db();
	let err = db
		.run(Options::default(), |ctx| {
			Box::pin(async move {
				ctx.create::<Order>(json!({"id": "x", "product": "tea", "quantity": -1}))?;
				Ok(())
			})
		})
		.await
		.unwrap_err();
	// Validation errors raised in the closure surface unchanged
	assert!(matches!(err, Error::InvalidField { .. }));
}

#[tokio::test]
async fn finalize_runs_before_every_write() {
	let db = new_db();
	db.run(Options::default(), |ctx| {
		Box::pin(async move {
			ctx.create::<Note>(json!({"id": "n", "body": "first"}))?;
			Ok(())
		})
	})
	.await
	.unwrap();
	let doc = db.store().peek(&DocPath::new("Note", Id::from("n"))).await.unwrap();
	assert_eq!(doc["version"], json!(1));
	db.run(Options::default(), |ctx| {
		Box::pin(async move {
			let note = ctx.get::<Note>(json!("n")).await?.expect("stored above");
			ctx.model(note)?.set("body", json!("second"))?;
			Ok(())
		})
	})
	.await
	.unwrap();
	let doc = db.store().peek(&DocPath::new("Note", Id::from("n"))).await.unwrap();
	assert_eq!(doc["body"], json!("second"));
	assert_eq!(doc["version"], json!(2));
}

#[tokio::test]
async fn untouched_fetch_writes_nothing() {
	let db = new_db();
	db.run(Options::default(), |ctx| {
		Box::pin(async move {
			ctx.create::<Note>(json!({"id": "quiet", "body": "still"}))?;
			Ok(())
		})
	})
	.await
	.unwrap();
	db.run(Options::default(), |ctx| {
		Box::pin(async move {
			ctx.get::<Note>(json!("quiet")).await?;
			Ok(())
		})
	})
	.await
	.unwrap();
	// The finalize hook never ran a second time
	let doc = db.store().peek(&DocPath::new("Note", Id::from("quiet"))).await.unwrap();
	assert_eq!(doc["version"], json!(1));
}
