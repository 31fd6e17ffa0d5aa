use axum::{body::Body, http::Request, response::Response};

use crate::{
    AppState,
    error::AppResult,
    middleware::request_session,
    routes::{Params, page_context, stamp::model::{StampFilters, StampSummary}},
    views::{HomeTemplate, StampCard, render},
};

/// Stamps shown under "Derniers ajouts" on the home page.
const RECENT_STAMPS: i64 = 4;

pub async fn index(state: AppState, req: Request<Body>, _: Params) -> AppResult<Response> {
    let session = request_session(&req);

    // The catalogue is members-only, so visitors get the plain landing page.
    let recent: Vec<StampCard> = if session.user_id().await.is_some() {
        StampSummary::list(&state.pool, &StampFilters::default(), RECENT_STAMPS, 0)
            .await?
            .iter()
            .map(|s| StampCard::from_summary(s, &state.config.base_path))
            .collect()
    } else {
        Vec::new()
    };

    let template = HomeTemplate {
        page: page_context(&state, &session, "Catalogue des enchères").await,
        recent,
    };
    render(&template)
}
