//! Table context injection: multi-tenant key templates filled from the
//! context map.

mod support;

use dynamo_mapper::{item, Params};
use serde_json::json;
use support::*;

#[tokio::test]
async fn test_context_set_merge_clear() {
    let (table, _) = make_table("ContextTable", tenant_schema(), false);
    let account = table
        .create("Account", item(json!({"name": "Acme"})), &Params::new())
        .await
        .unwrap()
        .unwrap();
    let account_id = account["id"].as_str().unwrap().to_string();

    table.set_context(item(json!({"accountId": account_id})), false);
    assert_eq!(
        table.get_context()["accountId"].as_str(),
        Some(account_id.as_str())
    );

    table.set_context(item(json!({"color": "blue"})), true);
    let context = table.get_context();
    assert_eq!(context["accountId"].as_str(), Some(account_id.as_str()));
    assert_eq!(context["color"].as_str(), Some("blue"));

    table.set_context(item(json!({"accountId": account_id})), false);
    assert!(table.get_context().get("color").is_none());

    table.add_context(item(json!({"color": "blue"})));
    assert_eq!(table.get_context()["color"].as_str(), Some("blue"));

    table.clear_context();
    assert!(table.get_context().is_empty());
}

#[tokio::test]
async fn test_create_users_with_context() {
    let (table, _) = make_table("ContextTable", tenant_schema(), false);
    let account = table
        .create("Account", item(json!({"name": "Acme"})), &Params::new())
        .await
        .unwrap()
        .unwrap();
    let account_id = account["id"].as_str().unwrap().to_string();
    table.set_context(item(json!({"accountId": account_id})), false);

    for props in [
        json!({"name": "Peter Smith", "email": "peter@example.com"}),
        json!({"name": "Patty O'Furniture", "email": "patty@example.com"}),
        json!({"name": "Cu Later", "email": "cu@example.com"}),
    ] {
        let user = table.create("User", item(props), &Params::new()).await.unwrap().unwrap();
        assert_ulid(&user, "id");
        assert_str(&user, "accountId", &account_id);
    }

    let result = table.scan("User", item(json!({})), &Params::new()).await.unwrap();
    assert_eq!(result.items.len(), 3);
}

#[tokio::test]
async fn test_find_scoped_by_context() {
    let (table, _) = make_table("ContextTable", tenant_schema(), false);
    let acme = table
        .create("Account", item(json!({"name": "Acme"})), &Params::new())
        .await
        .unwrap()
        .unwrap();
    let other = table
        .create("Account", item(json!({"name": "Other"})), &Params::new())
        .await
        .unwrap()
        .unwrap();

    table.set_context(
        item(json!({"accountId": acme["id"].as_str().unwrap()})),
        false,
    );
    let _ = table
        .create(
            "User",
            item(json!({"name": "Peter", "email": "p@x.com"})),
            &Params::new(),
        )
        .await
        .unwrap();

    table.set_context(
        item(json!({"accountId": other["id"].as_str().unwrap()})),
        false,
    );
    let _ = table
        .create(
            "User",
            item(json!({"name": "Judy", "email": "j@x.com"})),
            &Params::new(),
        )
        .await
        .unwrap();

    // the partition template scopes finds to the context's account
    let result = table.find("User", item(json!({})), &Params::new()).await.unwrap();
    assert_eq!(result.items.len(), 1);
    assert_str(&result.items[0], "name", "Judy");
}

#[tokio::test]
async fn test_remove_many_with_context() {
    let (table, _) = make_table("ContextTable", tenant_schema(), false);
    let account = table
        .create("Account", item(json!({"name": "Acme"})), &Params::new())
        .await
        .unwrap()
        .unwrap();
    table.set_context(
        item(json!({"accountId": account["id"].as_str().unwrap()})),
        false,
    );

    for props in [
        json!({"name": "Peter Smith", "email": "peter@example.com"}),
        json!({"name": "Patty O'Furniture", "email": "patty@example.com"}),
    ] {
        let _ = table.create("User", item(props), &Params::new()).await.unwrap();
    }

    let _ = table
        .remove("User", item(json!({})), &Params::new().many(true))
        .await
        .unwrap();

    let result = table.scan("User", item(json!({})), &Params::new()).await.unwrap();
    assert!(result.items.is_empty());
}

#[tokio::test]
async fn test_remove_many_requires_flag() {
    let (table, _) = make_table("ContextTable", tenant_schema(), false);
    let account = table
        .create("Account", item(json!({"name": "Acme"})), &Params::new())
        .await
        .unwrap()
        .unwrap();
    table.set_context(
        item(json!({"accountId": account["id"].as_str().unwrap()})),
        false,
    );
    for props in [
        json!({"name": "Peter Smith", "email": "peter@example.com"}),
        json!({"name": "Patty O'Furniture", "email": "patty@example.com"}),
    ] {
        let _ = table.create("User", item(props), &Params::new()).await.unwrap();
    }

    let err = table
        .remove("User", item(json!({})), &Params::new())
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some(dynamo_mapper::ErrorCode::NonUnique));
}
