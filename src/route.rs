//! Route definitions
//!
//! `/api` carries the JSON API behind the authentication middleware; every
//! other single-segment path is a short link slug.

use axum::routing::{get, post, put};
use axum::{middleware, Router};

use crate::handler::{
    add_short_link, add_user, change_password, get_short_link, landing, list_short_links, me,
    remove_short_links, sign_in, sign_out,
};
use crate::middleware::authenticate;
use crate::state::AppState;

/// Creates the application router
///
/// # Route Definitions
///
/// - `POST /api/users` - sign up
/// - `POST /api/sign-in`, `POST /api/sign-out` - session
/// - `GET /api/me` - current user (`?token=` overrides header and cookie)
/// - `PUT /api/me/password` - change password
/// - `GET|POST /api/short-links` - list or create own short links
/// - `POST /api/short-links/remove` - bulk remove own short links
/// - `GET /api/short-links/{id}` - one own short link with metas and views
/// - `GET /{slug}` - public landing page
///
/// # Example Usage
///
/// ```no_run
/// # use shortlinks::config::Config;
/// # use shortlinks::database::init_db;
/// # use shortlinks::route::create_app;
/// # use shortlinks::state::AppState;
/// let config = Config::from_env();
/// let db = init_db(&config.database_url).unwrap();
/// let app = create_app(AppState::new(config, db).unwrap());
/// // axum::serve(listener, app).await.unwrap();
/// ```
pub fn create_app(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/users", post(add_user))
        .route("/sign-in", post(sign_in))
        .route("/sign-out", post(sign_out))
        .route("/me", get(me))
        .route("/me/password", put(change_password))
        .route("/short-links", get(list_short_links).post(add_short_link))
        .route("/short-links/remove", post(remove_short_links))
        .route("/short-links/{id}", get(get_short_link))
        .layer(middleware::from_fn_with_state(state.clone(), authenticate));

    Router::new()
        .route("/{slug}", get(landing))
        .nest("/api", api_routes)
        .with_state(state)
}
