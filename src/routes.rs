// routes.rs - the composition root
//
// Routes are grouped by identical policy; each group gets one ordered
// policy layer (IP limits, then session resolution, then the status guard).
// The health route sits outside every group: no limits, no session.

use axum::{
    middleware,
    routing::{delete, get, patch, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config;
use crate::handlers::{
    admin, clubs, compare, misc, onboarding, otp, profile, questions, search, skip,
};
use crate::middleware::{enforce, Guard, RoutePolicy};
use crate::state::AppState;

pub fn app(state: AppState) -> Router {
    let mut router = Router::new()
        // Always exempt: no policy, no limits
        .route("/health", get(misc::health))
        .merge(public_routes(&state))
        .merge(otp_request_routes(&state))
        .merge(otp_challenge_routes(&state))
        .merge(session_routes(&state))
        .merge(signup_routes(&state))
        .merge(onboardee_routes(&state))
        .merge(member_routes(&state))
        .layer(TraceLayer::new_for_http());

    if config::config().api.enable_cors {
        router = router.layer(CorsLayer::permissive());
    }

    router.with_state(state)
}

/// Attach one policy to every route added to `router` so far.
fn with_policy(router: Router<AppState>, state: &AppState, policy: RoutePolicy) -> Router<AppState> {
    router.layer(middleware::from_fn_with_state(
        (state.clone(), Arc::new(policy)),
        enforce,
    ))
}

/// No session; coarse IP limit only.
fn public_routes(state: &AppState) -> Router<AppState> {
    let router = Router::new()
        .route("/me/:person_id", get(profile::get_me_by_id))
        .route("/update-notifications", get(misc::update_notifications))
        .route("/stats", get(misc::stats))
        .route("/admin/ban-link/:token", get(admin::ban_link))
        .route("/admin/ban/:token", get(admin::ban))
        .route("/admin/delete-photo-link/:token", get(admin::delete_photo_link))
        .route("/admin/delete-photo/:token", get(admin::delete_photo));

    with_policy(
        router,
        state,
        RoutePolicy::public().limit(state.rules.default_ip.clone()),
    )
}

/// No session yet; draws from the shared OTP bucket.
fn otp_request_routes(state: &AppState) -> Router<AppState> {
    let router = Router::new().route("/request-otp", post(otp::request_otp));

    with_policy(
        router,
        state,
        RoutePolicy::public()
            .limit(state.rules.default_ip.clone())
            .limit(state.rules.otp.clone()),
    )
}

/// Session exists but the OTP challenge is still open; same shared bucket
/// as /request-otp so resends and checks cannot sidestep the quota.
fn otp_challenge_routes(state: &AppState) -> Router<AppState> {
    let router = Router::new()
        .route("/resend-otp", post(otp::resend_otp))
        .route("/check-otp", post(otp::check_otp));

    with_policy(
        router,
        state,
        RoutePolicy::session(Guard::pre_sign_in())
            .limit(state.rules.default_ip.clone())
            .limit(state.rules.otp.clone()),
    )
}

/// Signed in, any onboarding stage.
fn session_routes(state: &AppState) -> Router<AppState> {
    let router = Router::new()
        .route("/sign-out", post(otp::sign_out))
        .route("/check-session-token", post(otp::check_session_token));

    with_policy(
        router,
        state,
        RoutePolicy::session(Guard::any_stage()).limit(state.rules.default_ip.clone()),
    )
}

/// Any valid session, even before the OTP check.
fn signup_routes(state: &AppState) -> Router<AppState> {
    let router = Router::new().route("/search-locations", get(misc::search_locations));

    with_policy(
        router,
        state,
        RoutePolicy::session(Guard::any()).limit(state.rules.default_ip.clone()),
    )
}

/// Mid-onboarding accounts only.
fn onboardee_routes(state: &AppState) -> Router<AppState> {
    let router = Router::new()
        .route(
            "/onboardee-info",
            patch(onboarding::patch_onboardee_info).delete(onboarding::delete_onboardee_info),
        )
        .route("/finish-onboarding", post(onboarding::finish_onboarding));

    with_policy(
        router,
        state,
        RoutePolicy::session(Guard::onboardee()).limit(state.rules.default_ip.clone()),
    )
}

/// Fully onboarded, signed-in members.
fn member_routes(state: &AppState) -> Router<AppState> {
    let router = Router::new()
        .route("/next-questions", get(questions::next_questions))
        .route(
            "/answer",
            post(questions::post_answer).delete(questions::delete_answer),
        )
        .route("/search", get(search::get_search))
        .route("/me", get(profile::get_me_by_session))
        .route("/prospect-profile/:prospect_uuid", get(profile::get_prospect_profile))
        .route("/skip/:prospect_person_id", post(skip::post_skip))
        .route("/skip/by-uuid/:prospect_uuid", post(skip::post_skip_by_uuid))
        .route("/unskip/:prospect_person_id", post(skip::post_unskip))
        .route(
            "/compare-personalities/:prospect_person_id/:topic",
            get(compare::compare_personalities),
        )
        .route(
            "/compare-answers/:prospect_person_id",
            get(compare::compare_answers),
        )
        .route("/inbox-info", post(profile::post_inbox_info))
        .route("/account", delete(profile::delete_account))
        .route("/deactivate", post(profile::post_deactivate))
        .route(
            "/profile-info",
            get(profile::get_profile_info)
                .patch(profile::patch_profile_info)
                .delete(profile::delete_profile_info),
        )
        .route("/search-filters", get(search::get_search_filters))
        .route("/search-filter", post(search::post_search_filter))
        .route(
            "/search-filter-questions",
            get(questions::search_filter_questions),
        )
        .route(
            "/search-filter-answer",
            post(search::post_search_filter_answer),
        )
        .route("/search-clubs", get(clubs::search_clubs))
        .route("/join-club", post(clubs::join_club))
        .route("/leave-club", post(clubs::leave_club));

    with_policy(
        router,
        state,
        RoutePolicy::session(Guard::default()).limit(state.rules.default_ip.clone()),
    )
}
