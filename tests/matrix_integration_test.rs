use entry_persistence::batch::BatchPolicy;
use entry_persistence::error::AppError;
use entry_persistence::filter::CompareOp;
use entry_persistence::models::{AttributeModification, RawEntry, SearchScope, SortSpec};
use entry_persistence::search::{PagedSearchEngine, SearchSettings};
use entry_persistence::FilterExpression;

mod common;

use common::{seed_tokens, setup_store, token_dn, TestBackend, BASE};

// Macro to run the same test against every backend
macro_rules! matrix_test {
    ($test_name:ident, $test_fn:ident) => {
        paste::paste! {
            #[tokio::test]
            async fn [<$test_name _sqlite>]() {
                $test_fn(TestBackend::Sqlite).await;
            }

            #[tokio::test]
            async fn [<$test_name _document>]() {
                $test_fn(TestBackend::Document).await;
            }

            #[tokio::test]
            async fn [<$test_name _directory>]() {
                $test_fn(TestBackend::Directory).await;
            }

            #[tokio::test]
            #[ignore = "requires Docker"]
            async fn [<$test_name _postgres>]() {
                $test_fn(TestBackend::Postgres).await;
            }
        }
    };
}

fn eq(attr: &str, value: &str) -> FilterExpression {
    FilterExpression::Equality(attr.to_string(), value.to_string())
}

fn cmp(attr: &str, op: CompareOp, value: &str) -> FilterExpression {
    FilterExpression::Comparison(attr.to_string(), op, value.to_string())
}

async fn paged_scan_test(backend: TestBackend) {
    let store = setup_store(backend).await;
    seed_tokens(&store.service, 25).await;
    let engine = PagedSearchEngine::new(store.service.clone(), SearchSettings::default());

    let request = engine
        .request(BASE, FilterExpression::Presence("exp".into()))
        .page_size(10);
    let result = engine.search(&request, BatchPolicy::Collect).await.unwrap();

    assert_eq!(result.total_count, 25, "{:?}", backend);
    assert!(result.count_is_exact);
    assert_eq!(result.round_trips, 3);
    assert!(result.resume_token.is_none());
    let dns: Vec<String> = result.entries().iter().map(|e| e.dn.clone()).collect();
    let expected: Vec<String> = (0..25).map(token_dn).collect();
    assert_eq!(dns, expected);

    // a bounded scan leaves a token to continue from
    let bounded = request.clone().limit(15);
    let result = engine.search(&bounded, BatchPolicy::Collect).await.unwrap();
    assert_eq!(result.total_count, 15);
    assert!(!result.count_is_exact);
    assert!(result.resume_token.is_some());
    assert_eq!(result.entries()[14].dn, token_dn(14));
}

async fn resume_test(backend: TestBackend) {
    let store = setup_store(backend).await;
    seed_tokens(&store.service, 25).await;
    let engine = PagedSearchEngine::new(store.service.clone(), SearchSettings::default());

    let request = engine
        .request(BASE, FilterExpression::Presence("exp".into()))
        .page_size(10);
    let bounded = engine
        .search(&request.clone().limit(15), BatchPolicy::Collect)
        .await
        .unwrap();
    let token = bounded.resume_token.clone().unwrap();

    let rest = engine
        .search(&request.clone().resume_from(token), BatchPolicy::Collect)
        .await
        .unwrap();
    assert_eq!(rest.total_count, 10, "{:?}", backend);
    assert!(rest.count_is_exact);
    assert!(rest.resume_token.is_none());
    let dns: Vec<String> = rest.entries().iter().map(|e| e.dn.clone()).collect();
    let expected: Vec<String> = (15..25).map(token_dn).collect();
    assert_eq!(dns, expected);

    // an abandoned scan can hand its token back
    let abandoned = engine
        .search(&request.clone().limit(5), BatchPolicy::Collect)
        .await
        .unwrap();
    engine
        .release(&abandoned.resume_token.unwrap())
        .await
        .unwrap();
}

async fn filter_test(backend: TestBackend) {
    let store = setup_store(backend).await;
    seed_tokens(&store.service, 25).await;
    let engine = PagedSearchEngine::new(store.service.clone(), SearchSettings::default());

    let cases = vec![
        (eq("tknTyp", "refresh_token"), 9),
        (cmp("exp", CompareOp::LessThan, "20240401"), 7),
        (cmp("exp", CompareOp::GreaterOrEqual, "20241201000000.000Z"), 2),
        (
            FilterExpression::And(vec![
                eq("objectClass", "jansToken"),
                FilterExpression::negate(eq("tknTyp", "refresh_token")),
            ]),
            16,
        ),
        (
            FilterExpression::Or(vec![eq("tknCde", "0001"), eq("tknCde", "0002")]),
            2,
        ),
        (cmp("tknCde", CompareOp::StartsWith, "001"), 10),
        (cmp("tknCde", CompareOp::EndsWith, "5"), 2),
        (cmp("tknTyp", CompareOp::Contains, "fresh"), 9),
        (FilterExpression::Presence("missing".into()), 0),
        // LIKE wildcards in values are literal
        (cmp("tknCde", CompareOp::StartsWith, "00_"), 0),
        (eq("tknTyp", "x' OR '1'='1"), 0),
    ];

    for (filter, expected) in cases {
        let count = engine
            .count_entries(BASE, &filter, SearchScope::Subtree)
            .await
            .unwrap();
        assert_eq!(count, expected, "{:?} {}", backend, filter);
    }
}

async fn scope_test(backend: TestBackend) {
    let store = setup_store(backend).await;
    seed_tokens(&store.service, 25).await;
    let engine = PagedSearchEngine::new(store.service.clone(), SearchSettings::default());

    let everything = FilterExpression::negate(FilterExpression::Presence("missing".into()));
    let cases = [
        (BASE, SearchScope::Base, 1),
        (BASE, SearchScope::OneLevel, 25),
        (BASE, SearchScope::Subtree, 26),
        ("o=gluu", SearchScope::OneLevel, 1),
        ("o=gluu", SearchScope::Subtree, 27),
        ("OU=Tokens, O=Gluu", SearchScope::Subtree, 26),
        ("ou=other,o=gluu", SearchScope::Subtree, 0),
    ];

    for (base, scope, expected) in cases {
        let count = engine.count_entries(base, &everything, scope).await.unwrap();
        assert_eq!(count, expected, "{:?} {} {}", backend, base, scope);
    }
}

async fn sort_test(backend: TestBackend) {
    let store = setup_store(backend).await;
    seed_tokens(&store.service, 25).await;
    let engine = PagedSearchEngine::new(store.service.clone(), SearchSettings::default());

    let request = engine
        .request(BASE, FilterExpression::Presence("exp".into()))
        .attributes(["exp", "tknCde"])
        .sort(SortSpec::descending("exp"))
        .page_size(7);
    let result = engine.search(&request, BatchPolicy::Collect).await.unwrap();

    assert_eq!(result.total_count, 25);
    let values: Vec<&str> = result
        .entries()
        .iter()
        .map(|e| e.first_value("exp").unwrap())
        .collect();
    assert!(values.windows(2).all(|w| w[0] >= w[1]), "{:?}", values);
    assert_eq!(values[0], "20241201000000.000Z");
    // ties fall back to DN order
    assert_eq!(result.entries()[0].dn, token_dn(11));
    assert_eq!(result.entries()[1].dn, token_dn(23));
    assert!(!result.entries()[0].has_attribute("tknTyp"));
}

async fn crud_test(backend: TestBackend) {
    let store = setup_store(backend).await;
    let service = store.service.clone();
    seed_tokens(&service, 3).await;

    let dn = format!("tknCde=extra,{}", BASE);
    let entry = RawEntry::new(dn.as_str())
        .with("objectClass", "jansToken")
        .with("tknCde", "extra")
        .with("scope", "openid");
    service.add(&entry).await.unwrap();
    assert!(matches!(
        service.add(&entry).await,
        Err(AppError::DuplicateEntry(_))
    ));

    let found = service
        .lookup(&dn.to_uppercase(), &["scope".to_string()])
        .await
        .unwrap();
    assert_eq!(found.dn, dn);
    assert_eq!(found.values("scope").unwrap(), &["openid".to_string()]);
    assert!(!found.has_attribute("tknCde"));

    service
        .update(
            &dn,
            &[
                AttributeModification::Add("scope".into(), vec!["profile".into(), "openid".into()]),
                AttributeModification::Replace("tknCde".into(), vec!["renamed".into()]),
                AttributeModification::Remove("objectClass".into(), Vec::new()),
            ],
        )
        .await
        .unwrap();
    let updated = service.lookup(&dn, &[]).await.unwrap();
    assert_eq!(
        updated.values("scope").unwrap(),
        &["openid".to_string(), "profile".to_string()]
    );
    assert_eq!(updated.first_value("tknCde"), Some("renamed"));
    assert!(!updated.has_attribute("objectClass"));

    assert!(matches!(
        service.update("tknCde=none,ou=tokens,o=gluu", &[]).await,
        Err(AppError::EntryNotFound(_))
    ));

    service.delete(&dn).await.unwrap();
    assert!(matches!(
        service.lookup(&dn, &[]).await,
        Err(AppError::EntryNotFound(_))
    ));
    assert!(matches!(
        service.delete(&dn).await,
        Err(AppError::EntryNotFound(_))
    ));

    // container plus three tokens
    assert_eq!(service.delete_recursively(BASE).await.unwrap(), 4);
    assert!(service.lookup("o=gluu", &[]).await.is_ok());
    assert!(matches!(
        service.lookup(&token_dn(0), &[]).await,
        Err(AppError::EntryNotFound(_))
    ));

    service.destroy().await.unwrap();
}

async fn delete_entries_test(backend: TestBackend) {
    let store = setup_store(backend).await;
    let service = store.service.clone();
    seed_tokens(&service, 25).await;
    let has_exp = FilterExpression::Presence("exp".into());

    let refresh = eq("tknTyp", "refresh_token");
    assert_eq!(service.delete_entries(BASE, &refresh, 0).await.unwrap(), 9);
    assert!(matches!(
        service.lookup(&token_dn(3), &[]).await,
        Err(AppError::EntryNotFound(_))
    ));

    // bounded deletes take the first matches in DN order
    assert_eq!(service.delete_entries(BASE, &has_exp, 5).await.unwrap(), 5);
    for i in [1, 2, 4, 5, 7] {
        assert!(service.lookup(&token_dn(i), &[]).await.is_err(), "{:?} {}", backend, i);
    }
    assert!(service.lookup(&token_dn(8), &[]).await.is_ok());

    let engine = PagedSearchEngine::new(service.clone(), SearchSettings::default());
    let remaining = engine
        .count_entries(BASE, &has_exp, SearchScope::Subtree)
        .await
        .unwrap();
    assert_eq!(remaining, 11);

    // outside the base nothing matches
    assert_eq!(
        service
            .delete_entries("ou=other,o=gluu", &has_exp, 0)
            .await
            .unwrap(),
        0
    );
    assert!(matches!(
        service
            .delete_entries(BASE, &FilterExpression::And(Vec::new()), 0)
            .await,
        Err(AppError::InvalidFilter(_))
    ));
    assert!(service.lookup(BASE, &[]).await.is_ok());
}

matrix_test!(test_paged_scan, paged_scan_test);
matrix_test!(test_resume, resume_test);
matrix_test!(test_delete_entries, delete_entries_test);
matrix_test!(test_filters, filter_test);
matrix_test!(test_scopes, scope_test);
matrix_test!(test_sorting, sort_test);
matrix_test!(test_crud, crud_test);
