//! Batch accumulation and dispatch.

mod support;

use dynamo_mapper::{item, Batch, Params};
use serde_json::json;
use support::*;

fn batch_data() -> Vec<serde_json::Value> {
    vec![
        json!({"name": "Peter Smith", "email": "peter@example.com", "status": "active"}),
        json!({"name": "Patty O'Furniture", "email": "patty@example.com", "status": "active"}),
        json!({"name": "Cu Later", "email": "cu@example.com", "status": "inactive"}),
    ]
}

#[tokio::test]
async fn test_batch_put_write() {
    let (table, mock) = make_table("BatchTable", default_schema(), false);
    let batch = Batch::new();
    for props in batch_data() {
        let preview = table
            .create("User", item(props), &Params::new().batch(&batch))
            .await
            .unwrap()
            .unwrap();
        assert_ulid(&preview, "id");
        assert_absent(&preview, "pk");
    }
    assert_eq!(mock.count("BatchTable"), 0, "staged writes must not execute");

    table.batch_write(&batch, &Params::new()).await.unwrap();
    assert_eq!(mock.count("BatchTable"), 3);
}

#[tokio::test]
async fn test_batch_get_parsed() {
    let (table, _) = make_table("BatchTable", default_schema(), false);
    let mut users = Vec::new();
    for props in batch_data() {
        users.push(
            table
                .create("User", item(props), &Params::new())
                .await
                .unwrap()
                .unwrap(),
        );
    }

    let batch = Batch::new();
    for user in &users {
        let _ = table
            .get(
                "User",
                item(json!({"id": user["id"].as_str().unwrap()})),
                &Params::new().batch(&batch),
            )
            .await
            .unwrap();
    }
    let output = table
        .batch_get(
            &batch,
            &Params::new().parse(true).hidden(false).consistent(true),
        )
        .await
        .unwrap();
    assert_eq!(output.items.len(), 3);
    for found in &output.items {
        let name = found["name"].as_str().unwrap();
        assert!(
            batch_data()
                .iter()
                .any(|d| d["name"].as_str().unwrap() == name),
            "unexpected item {}",
            name
        );
        assert_absent(found, "pk");
    }
}

#[tokio::test]
async fn test_batch_put_delete_combined() {
    let (table, mock) = make_table("BatchTable", default_schema(), false);
    let mut users = Vec::new();
    for props in batch_data() {
        users.push(
            table
                .create("User", item(props), &Params::new())
                .await
                .unwrap()
                .unwrap(),
        );
    }
    assert_eq!(mock.count("BatchTable"), 3);

    let batch = Batch::new();
    for user in &users {
        let _ = table
            .remove(
                "User",
                item(json!({"id": user["id"].as_str().unwrap()})),
                &Params::new().batch(&batch),
            )
            .await
            .unwrap();
    }
    let _ = table
        .create("User", item(batch_data()[0].clone()), &Params::new().batch(&batch))
        .await
        .unwrap();

    table.batch_write(&batch, &Params::new()).await.unwrap();
    assert_eq!(mock.count("BatchTable"), 1);
}

#[tokio::test]
async fn test_batch_get_raw_responses() {
    let (table, _) = make_table("BatchTable", default_schema(), false);
    let mut users = Vec::new();
    for props in batch_data() {
        users.push(
            table
                .create("User", item(props), &Params::new())
                .await
                .unwrap()
                .unwrap(),
        );
    }

    let batch = Batch::new();
    for user in &users {
        let _ = table
            .get(
                "User",
                item(json!({"id": user["id"].as_str().unwrap()})),
                &Params::new().batch(&batch),
            )
            .await
            .unwrap();
    }
    let output = table.batch_get(&batch, &Params::new()).await.unwrap();
    assert!(output.items.is_empty());
    assert_eq!(output.responses["BatchTable"].len(), 3);
}

#[tokio::test]
async fn test_batch_get_with_fields() {
    let (table, _) = make_table("BatchTable", default_schema(), false);
    let mut users = Vec::new();
    for props in batch_data() {
        users.push(
            table
                .create("User", item(props), &Params::new())
                .await
                .unwrap()
                .unwrap(),
        );
    }

    let batch = Batch::new();
    for user in &users {
        let _ = table
            .get(
                "User",
                item(json!({"id": user["id"].as_str().unwrap()})),
                &Params::new().batch(&batch),
            )
            .await
            .unwrap();
    }
    let output = table
        .batch_get(&batch, &Params::new().parse(true).fields(["email"]))
        .await
        .unwrap();
    assert_eq!(output.items.len(), 3);
    for found in &output.items {
        assert_present(found, "email");
    }
}

#[tokio::test]
async fn test_empty_batch() {
    let (table, _) = make_table("BatchTable", default_schema(), false);
    let batch = Batch::new();
    let output = table.batch_get(&batch, &Params::new()).await.unwrap();
    assert!(output.items.is_empty());
    table.batch_write(&batch, &Params::new()).await.unwrap();
}

#[tokio::test]
async fn test_batch_rejects_filters() {
    let (table, _) = make_table("BatchTable", default_schema(), false);
    let user = table
        .create("User", item(json!({"name": "Peter Smith"})), &Params::new())
        .await
        .unwrap()
        .unwrap();

    let batch = Batch::new();
    let err = table
        .find(
            "User",
            item(json!({"id": user["id"].as_str().unwrap(), "status": "idle"})),
            &Params::new().batch(&batch).where_clause("${status} = {idle}"),
        )
        .await
        .unwrap_err();
    assert!(err.to_string().contains("batch"), "got {}", err);
}
