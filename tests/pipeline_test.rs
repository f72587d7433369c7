//! Short link creation pipeline against a local fixture site
//!
//! Drives `ShortLinkService` directly: fetch, status check, storage of the
//! link and best-effort meta extraction.

mod common;

use std::time::Duration;

use shortlinks::error::AppError;
use shortlinks::model::{AddShortLinkInput, AddUserInput, MetaTag, RemoveShortLinksInput, User};
use shortlinks::state::AppState;

use common::{
    closed_port_url, setup_test_app, setup_test_app_with, spawn_chunked_site, spawn_fixture_site,
    spawn_status_site, RAW_CHUNK,
};

async fn create_user(state: &AppState, username: &str) -> User {
    let output = state
        .auth
        .add_user(AddUserInput {
            name: None,
            username: username.to_string(),
            password: "pw".to_string(),
        })
        .await
        .unwrap();
    state.auth.load_user_by_id(&output.user.id).unwrap()
}

fn input(full_link: String) -> AddShortLinkInput {
    AddShortLinkInput {
        full_link,
        slug: None,
    }
}

#[tokio::test]
async fn test_og_page_metas_are_stored_in_document_order() {
    let test = setup_test_app();
    let site = spawn_fixture_site().await;
    let user = create_user(&test.state, "alice@example.com").await;

    let output = test
        .state
        .links
        .add_short_link(input(format!("{site}/og")), &user)
        .await
        .unwrap();
    let metas = test.state.links.load_short_link_metas(&output.short_link).unwrap();

    let tags: Vec<MetaTag> = metas.into_iter().map(|meta| meta.tag).collect();
    assert_eq!(
        tags,
        vec![
            MetaTag::Title {
                raw_text: "Fixture & Page".to_string()
            },
            MetaTag::Meta {
                content: "Fixture Page".to_string(),
                property: Some("og:title".to_string()),
                name: None,
            },
            MetaTag::Meta {
                content: "https://example.com/cover.png".to_string(),
                property: Some("og:image".to_string()),
                name: None,
            },
            MetaTag::Meta {
                content: "A page served to the tests".to_string(),
                property: None,
                name: Some("description".to_string()),
            },
            MetaTag::Meta {
                content: "summary".to_string(),
                property: None,
                name: Some("twitter:card".to_string()),
            },
        ]
    );
}

#[tokio::test]
async fn test_non_html_and_broken_bodies_still_create_the_link() {
    let test = setup_test_app();
    let site = spawn_fixture_site().await;
    let user = create_user(&test.state, "bob@example.com").await;

    let plain = test
        .state
        .links
        .add_short_link(input(format!("{site}/plain")), &user)
        .await
        .unwrap();
    let metas = test.state.links.load_short_link_metas(&plain.short_link).unwrap();
    assert!(metas.is_empty());

    let broken = test
        .state
        .links
        .add_short_link(input(format!("{site}/broken")), &user)
        .await
        .unwrap();
    assert_eq!(
        test.state.links.load_short_link_by_id(&broken.short_link.id).unwrap(),
        broken.short_link
    );

    assert_eq!(test.state.links.load_short_links_by_user_id(&user.id).unwrap().len(), 2);
}

#[tokio::test]
async fn test_failed_fetches_store_nothing() {
    let test = setup_test_app();
    let site = spawn_fixture_site().await;
    let user = create_user(&test.state, "carol@example.com").await;

    let err = test
        .state
        .links
        .add_short_link(input(format!("{site}/missing")), &user)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::LinkUnreachable { .. }));
    assert!(err.to_string().ends_with(&format!("from: {site}/missing")));

    let err = test
        .state
        .links
        .add_short_link(input(closed_port_url()), &user)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::LinkUnreachable { .. }));

    let err = test
        .state
        .links
        .add_short_link(input("mailto".to_string()), &user)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidLink(_)));

    assert!(test.state.links.load_short_links_by_user_id(&user.id).unwrap().is_empty());
}

#[tokio::test]
async fn test_status_error_keeps_the_servers_reason_phrase() {
    let test = setup_test_app();
    let user = create_user(&test.state, "teapot@example.com").await;
    let url = spawn_status_site("HTTP/1.1 418 Short And Stout").await;

    let err = test
        .state
        .links
        .add_short_link(input(url.clone()), &user)
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), format!("Response: 418 Short And Stout\nfrom: {url}"));
}

#[tokio::test]
async fn test_oversized_chunked_body_is_not_read_to_the_end() {
    let test = setup_test_app_with(|config| config.fetch_max_body_bytes = 1_000);
    let user = create_user(&test.state, "big@example.com").await;
    let chunks = 1024;
    let (url, delivered) = spawn_chunked_site(chunks).await;

    let output = test
        .state
        .links
        .add_short_link(input(url), &user)
        .await
        .unwrap();
    assert!(test.state.links.load_short_link_metas(&output.short_link).unwrap().is_empty());

    // The client hangs up after the first chunk; the server stops once the
    // socket buffers fill instead of streaming all 64 MiB
    let delivered = tokio::time::timeout(Duration::from_secs(10), delivered)
        .await
        .unwrap()
        .unwrap();
    assert!(delivered < chunks * RAW_CHUNK / 2, "server delivered {delivered} bytes");
}

#[tokio::test]
async fn test_taken_custom_slug_fails_before_fetching() {
    let test = setup_test_app();
    let site = spawn_fixture_site().await;
    let user = create_user(&test.state, "dave@example.com").await;

    test.state
        .links
        .add_short_link(
            AddShortLinkInput {
                full_link: format!("{site}/plain"),
                slug: Some("taken".to_string()),
            },
            &user,
        )
        .await
        .unwrap();

    // The closed port would fail the fetch; the slug check comes first
    let err = test
        .state
        .links
        .add_short_link(
            AddShortLinkInput {
                full_link: closed_port_url(),
                slug: Some("taken".to_string()),
            },
            &user,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(ref msg) if msg == "slug must be unique"));
}

#[tokio::test]
async fn test_slug_resolution_and_removal() {
    let test = setup_test_app();
    let site = spawn_fixture_site().await;
    let user = create_user(&test.state, "erin@example.com").await;
    let links = &test.state.links;

    let output = links.add_short_link(input(format!("{site}/og")), &user).await.unwrap();
    let slug = output.short_link.slug.clone();

    let (a, b) = tokio::join!(
        links.get_short_link_by_slug(&slug),
        links.get_short_link_by_slug(&slug)
    );
    let a = a.unwrap().unwrap();
    assert_eq!(Some(a.clone()), b.unwrap());
    assert_eq!(a.short_link, output.short_link);
    assert_eq!(a.meta_list.len(), 5);

    links.record_view_of_short_link(&a.short_link).unwrap();
    links.record_view_of_short_link(&a.short_link).unwrap();
    assert_eq!(links.count_views(&a.short_link).unwrap(), 2);

    let removed = links
        .remove_short_links(
            RemoveShortLinksInput {
                short_link_id_list: vec![output.short_link.id.clone()],
            },
            &user,
        )
        .await
        .unwrap();
    assert_eq!(removed.removed_count, 1);

    assert!(links.get_short_link_by_slug(&slug).await.unwrap().is_none());
    assert!(matches!(
        links.load_short_link_by_id(&output.short_link.id),
        Err(AppError::NotFound(_))
    ));
    assert_eq!(links.count_views(&output.short_link).unwrap(), 0);
}
