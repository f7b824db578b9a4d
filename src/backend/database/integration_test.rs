//! End-to-end checks of the SQLite statements against an in-memory database

use super::sqlite::SqliteOperationService;
use super::DatabaseBackendConfig;
use crate::backend::OperationService;
use crate::error::AppError;
use crate::filter::{CompareOp, FilterExpression};
use crate::models::{
    AttributeModification, RawEntry, ResumeToken, SearchRequest, SearchScope, SortSpec,
};

async fn service() -> SqliteOperationService {
    let service = SqliteOperationService::connect(&DatabaseBackendConfig::memory_sqlite())
        .await
        .unwrap();
    for dn in ["o=gluu", "ou=people,o=gluu", "ou=groups,o=gluu"] {
        service.add(&RawEntry::new(dn)).await.unwrap();
    }
    for (uid, mail, exp) in [
        ("alice", "alice@example.org", "20240101000000.000Z"),
        ("bob", "bob@example.com", "20250101000000.000Z"),
        ("carol", "carol@example.org", "20230101000000.000Z"),
    ] {
        let entry = RawEntry::new(format!("uid={},ou=people,o=gluu", uid))
            .with("uid", uid)
            .with("mail", mail)
            .with("exp", exp)
            .with("objectClass", "person");
        service.add(&entry).await.unwrap();
    }
    service
}

fn dns(entries: &[RawEntry]) -> Vec<&str> {
    entries.iter().map(|e| e.dn.as_str()).collect()
}

#[tokio::test]
async fn test_filters_and_scopes() {
    let service = service().await;

    let request = SearchRequest::new(
        "o=gluu",
        FilterExpression::Comparison("mail".into(), CompareOp::EndsWith, ".org".into()),
    );
    let page = service.search(&request, None).await.unwrap();
    assert_eq!(
        dns(&page.entries),
        vec!["uid=alice,ou=people,o=gluu", "uid=carol,ou=people,o=gluu"]
    );
    assert!(!page.has_more);

    let request = SearchRequest::new(
        "ou=people,o=gluu",
        FilterExpression::And(vec![
            FilterExpression::Comparison(
                "exp".into(),
                CompareOp::LessOrEqual,
                "20240601000000.000Z".into(),
            ),
            FilterExpression::Not(Box::new(FilterExpression::Equality(
                "uid".into(),
                "carol".into(),
            ))),
        ]),
    )
    .scope(SearchScope::OneLevel);
    let page = service.search(&request, None).await.unwrap();
    assert_eq!(dns(&page.entries), vec!["uid=alice,ou=people,o=gluu"]);

    let request = SearchRequest::new("ou=people,o=gluu", FilterExpression::Presence("uid".into()))
        .scope(SearchScope::Base);
    assert!(service.search(&request, None).await.unwrap().entries.is_empty());
}

#[tokio::test]
async fn test_offset_windows_and_sort() {
    let service = service().await;
    let request = SearchRequest::new("o=gluu", FilterExpression::Presence("uid".into()))
        .sort(SortSpec::descending("exp"))
        .attributes(["uid"])
        .page_size(2);

    let first = service.search(&request, None).await.unwrap();
    assert!(first.has_more);
    assert_eq!(first.entries[0].first_value("uid"), Some("bob"));
    assert!(!first.entries[0].has_attribute("mail"));

    let second = service
        .search(&request, Some(&ResumeToken::Offset(2)))
        .await
        .unwrap();
    assert_eq!(dns(&second.entries), vec!["uid=carol,ou=people,o=gluu"]);
    assert!(!second.has_more);

    let wrong = service
        .search(&request, Some(&ResumeToken::Cursor("abc".into())))
        .await;
    assert!(matches!(wrong, Err(AppError::Search(_))));
}

#[tokio::test]
async fn test_crud() {
    let service = service().await;
    let dn = "uid=alice,ou=people,o=gluu";

    assert!(matches!(
        service.add(&RawEntry::new("UID=Alice,ou=People,o=gluu")).await,
        Err(AppError::DuplicateEntry(_))
    ));

    service
        .update(
            dn,
            &[
                AttributeModification::Add("mail".into(), vec!["a2@example.org".into()]),
                AttributeModification::Remove("exp".into(), vec![]),
            ],
        )
        .await
        .unwrap();
    let entry = service.lookup(dn, &[]).await.unwrap();
    assert_eq!(entry.values("mail").unwrap().len(), 2);
    assert!(!entry.has_attribute("exp"));

    assert!(matches!(
        service.update("uid=zed,ou=people,o=gluu", &[]).await,
        Err(AppError::EntryNotFound(_))
    ));

    service.delete(dn).await.unwrap();
    assert!(matches!(
        service.lookup(dn, &[]).await,
        Err(AppError::EntryNotFound(_))
    ));

    assert_eq!(service.delete_recursively("ou=people,o=gluu").await.unwrap(), 3);
    assert!(service.lookup("ou=groups,o=gluu", &[]).await.is_ok());
    service.health_check().await.unwrap();
}
